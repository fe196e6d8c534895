use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use crate::core::{Result, UploadError};

const SALT_LEN: usize = 32;
const KEY_INFO: &[u8] = b"uplink-file-key";

/// Per-file part cipher.
///
/// The key is HKDF-SHA256 over the configured secret and a random per-file
/// salt. Part numbers are unique within a file, so they double as nonces.
pub struct FileCipher {
    cipher: ChaCha20Poly1305,
    salt: [u8; SALT_LEN],
}

impl FileCipher {
    pub fn new(secret: &str) -> Result<Self> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        Self::with_salt(secret, salt)
    }

    pub fn with_salt(secret: &str, salt: [u8; SALT_LEN]) -> Result<Self> {
        let hk = Hkdf::<Sha256>::new(Some(&salt), secret.as_bytes());
        let mut key = [0u8; 32];
        hk.expand(KEY_INFO, &mut key)
            .map_err(|e| UploadError::Encryption(format!("Key derivation failed: {}", e)))?;

        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| UploadError::Encryption(format!("Cipher creation failed: {}", e)))?;

        Ok(Self { cipher, salt })
    }

    /// Salt as recorded in the part manifest.
    pub fn encoded_salt(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.salt)
    }

    pub fn decode_salt(encoded: &str) -> Result<[u8; SALT_LEN]> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| UploadError::Encryption(format!("Invalid salt: {}", e)))?;

        bytes
            .try_into()
            .map_err(|_| UploadError::Encryption("Invalid salt length".to_string()))
    }

    pub fn seal(&self, part_number: u32, data: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(Nonce::from_slice(&nonce(part_number)), data)
            .map_err(|e| UploadError::Encryption(format!("Encryption failed: {}", e)))
    }

    pub fn open(&self, part_number: u32, data: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .decrypt(Nonce::from_slice(&nonce(part_number)), data)
            .map_err(|e| UploadError::Encryption(format!("Decryption failed: {}", e)))
    }
}

fn nonce(part_number: u32) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[8..].copy_from_slice(&part_number.to_be_bytes());
    nonce
}
