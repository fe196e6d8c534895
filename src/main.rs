use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use anyhow::{Context, bail};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use uplink::utils::{format_bytes, format_duration, format_speed, read_files, scan_folder};
use uplink::{Config, HttpRemoteApi, ManagerOptions, MemoryRemote, RemoteApi, UploadEvent, UploadManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let paths: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        bail!("usage: uplink <file or folder>...");
    }

    let config = Config::load_default().context("loading config")?;
    let api: Arc<dyn RemoteApi> = if config.is_memory() {
        warn!("No endpoint configured, uploading to an in-memory remote");
        Arc::new(MemoryRemote::new())
    } else {
        Arc::new(HttpRemoteApi::from_config(&config)?)
    };

    let handle = UploadManager::new(api, ManagerOptions::from_config(&config));
    let manager = handle.manager.clone();
    tokio::spawn(log_events(manager.subscribe_events()));

    let started = Instant::now();
    let (folders, files): (Vec<PathBuf>, Vec<PathBuf>) = paths.into_iter().partition(|path| path.is_dir());
    for folder in folders {
        let selection = scan_folder(&folder).await?;
        for skipped in &selection.skipped {
            warn!(path = %skipped, "Skipping empty file");
        }
        manager.enqueue_folder(selection.files, selection.name).await?;
    }
    if !files.is_empty() {
        manager.enqueue_files(read_files(&files).await?).await?;
    }

    tokio::select! {
        result = manager.wait_until_idle() => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling uploads");
            manager.cancel_upload().await?;
        }
    }

    let snapshot = manager.snapshot().await?;
    let summary = manager.summary().await?;
    for item in &snapshot.items {
        match &item.error {
            Some(error) => println!("{:<40} {} ({})", item.name(), item.status.label(), error),
            None => println!("{:<40} {}", item.name(), item.status.label()),
        }
    }
    let elapsed = started.elapsed();
    println!(
        "{} folders, {} files, {} in {} ({})",
        summary.folders,
        summary.files,
        format_bytes(summary.total_size),
        format_duration(elapsed),
        format_speed(summary.uploaded_size / elapsed.as_secs_f64().max(0.001))
    );

    drop(manager);
    handle.shutdown().await?;
    Ok(())
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<UploadEvent>) {
    loop {
        match events.recv().await {
            Ok(UploadEvent::StatusChanged { id, old_status, new_status }) => {
                info!(item = %id, from = old_status.label(), to = new_status.label(), "Status changed");
            }
            Ok(UploadEvent::Progress { id, progress, chunks_completed, total_chunks }) => {
                debug!(item = %id, progress, chunks_completed, total_chunks, "Progress");
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "Event logger lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
