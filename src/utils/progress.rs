use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding-window transfer rate.
///
/// Fed with cumulative byte counts; reports bytes per second over the window.
pub struct SpeedCalculator {
    history: VecDeque<(Instant, u64)>,
    window_size: Duration,
    max_entries: usize,
}

impl SpeedCalculator {
    pub fn new(window_size: Duration) -> Self {
        Self {
            history: VecDeque::new(),
            window_size,
            max_entries: 100,
        }
    }

    pub fn add_data_point(&mut self, bytes: u64) {
        self.add_data_point_at(Instant::now(), bytes);
    }

    pub fn add_data_point_at(&mut self, now: Instant, bytes: u64) {
        self.history.push_back((now, bytes));

        while let Some(&(time, _)) = self.history.front() {
            if now.duration_since(time) > self.window_size && self.history.len() > 2 {
                self.history.pop_front();
            } else {
                break;
            }
        }

        while self.history.len() > self.max_entries {
            self.history.pop_front();
        }
    }

    /// Bytes per second
    pub fn calculate_speed(&self) -> f64 {
        let (Some(first), Some(last)) = (self.history.front(), self.history.back()) else {
            return 0.0;
        };

        let duration = last.0.duration_since(first.0).as_secs_f64();
        let bytes = last.1.saturating_sub(first.1);

        if duration > 0.0 {
            bytes as f64 / duration
        } else {
            0.0
        }
    }

    pub fn estimate_eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.calculate_speed();

        if speed > 0.0 {
            Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
        } else {
            None
        }
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const UNIT_SIZE: f64 = 1024.0;

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= UNIT_SIZE && unit_index < UNITS.len() - 1 {
        size /= UNIT_SIZE;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

pub fn format_speed(bytes_per_second: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_second as u64))
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
