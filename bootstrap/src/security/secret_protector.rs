// Secret encryption (encryption-at-rest)
//
// Stored admin passwords are written as `ENCv1:<base64(nonce || ciphertext)>` using
// AES-256-GCM. The master key is created lazily next to the credentials file on first use.
// Values without the prefix are read back as plaintext so hand-edited files keep working.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{Context, Result};
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

const ENC_PREFIX: &str = "ENCv1:";
const KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;

#[derive(Debug)]
pub struct SecretProtector {
    key_path: PathBuf,
    key: OnceCell<[u8; KEY_BYTES]>,
}

impl SecretProtector {
    pub fn new(key_path: PathBuf) -> Self {
        Self {
            key_path,
            key: OnceCell::new(),
        }
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    pub fn is_encrypted(&self, value: &str) -> bool {
        value.starts_with(ENC_PREFIX)
    }

    pub async fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(ENC_PREFIX.to_string());
        }

        let cipher = self.cipher().await?;

        let mut nonce_bytes = [0u8; NONCE_BYTES];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| anyhow::anyhow!("Failed to generate nonce"))?;

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| anyhow::anyhow!("Secret encryption failed"))?;

        // nonce || ciphertext (ciphertext includes GCM tag)
        let mut blob = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);

        Ok(format!(
            "{}{}",
            ENC_PREFIX,
            base64::engine::general_purpose::STANDARD.encode(blob)
        ))
    }

    pub async fn decrypt(&self, value: &str) -> Result<String> {
        if !self.is_encrypted(value) {
            return Ok(value.to_string());
        }

        let encoded = value.trim_start_matches(ENC_PREFIX);
        if encoded.is_empty() {
            return Ok(String::new());
        }

        let blob = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .context("Failed to base64-decode encrypted secret")?;

        if blob.len() < NONCE_BYTES {
            anyhow::bail!("Encrypted secret blob is too short");
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_BYTES);
        let cipher = self.cipher().await?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| anyhow::anyhow!("Secret decryption failed (wrong key or corrupted value)"))?;
        String::from_utf8(plaintext).context("Decrypted secret is not valid UTF-8")
    }

    async fn cipher(&self) -> Result<Aes256Gcm> {
        let key = self
            .key
            .get_or_try_init(|| load_or_create_key(&self.key_path))
            .await?;
        Aes256Gcm::new_from_slice(key)
            .map_err(|_| anyhow::anyhow!("Internal error: invalid AES-256 key length"))
    }
}

async fn load_or_create_key(key_path: &Path) -> Result<[u8; KEY_BYTES]> {
    if tokio::fs::try_exists(key_path).await.unwrap_or(false) {
        return load_key(key_path).await;
    }

    if let Some(parent) = key_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create secret key directory: {:?}", parent))?;
    }

    let mut key_bytes = [0u8; KEY_BYTES];
    SystemRandom::new()
        .fill(&mut key_bytes)
        .map_err(|_| anyhow::anyhow!("Failed to generate secret key"))?;

    let encoded = base64::engine::general_purpose::STANDARD.encode(key_bytes);
    let write_action = || async {
        // create_new: never clobber a key another run wrote in the meantime
        let mut opts = tokio::fs::OpenOptions::new();
        opts.write(true).create_new(true);
        #[cfg(unix)]
        opts.mode(0o600);
        let mut file = opts
            .open(key_path)
            .await
            .with_context(|| format!("Failed to create secret key file: {:?}", key_path))?;
        file.write_all(encoded.as_bytes()).await?;
        file.flush().await?;
        Ok::<(), anyhow::Error>(())
    };

    let retry_strategy = ExponentialBackoff::from_millis(50)
        .factor(2)
        .max_delay(std::time::Duration::from_millis(750))
        .take(3)
        .map(jitter);

    match RetryIf::spawn(retry_strategy, write_action, is_transient_io_error).await {
        Ok(()) => Ok(key_bytes),
        // Lost a create race: the key on disk is the one every later run will use.
        Err(_) if tokio::fs::try_exists(key_path).await.unwrap_or(false) => {
            load_key(key_path).await
        }
        Err(e) => Err(e),
    }
}

async fn load_key(key_path: &Path) -> Result<[u8; KEY_BYTES]> {
    let contents = tokio::fs::read_to_string(key_path)
        .await
        .with_context(|| format!("Failed to read secret key file: {:?}", key_path))?;

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(contents.trim())
        .context("Failed to decode secret key file (base64)")?;

    if decoded.len() != KEY_BYTES {
        anyhow::bail!("Secret key file has invalid length (expected {KEY_BYTES} bytes)");
    }

    let mut key = [0u8; KEY_BYTES];
    key.copy_from_slice(&decoded);
    Ok(key)
}

fn is_transient_io_error(err: &anyhow::Error) -> bool {
    // File lock / access denied can be transient (AV, indexing).
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("used by another process")
        || msg.contains("access is denied")
        || msg.contains("sharing violation")
}
