// Cryptographic utilities

use anyhow::Result;
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

/// Random bytes behind a generated internal admin password (2048 bits).
pub const GENERATED_PASSWORD_BYTES: usize = 256;

/// SHA-256 base64 digest (STANDARD).
pub fn sha256_base64(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Compute a safe fingerprint for a secret (hash only; never store the raw secret).
pub fn secret_fingerprint(input: &str) -> String {
    sha256_base64(input.as_bytes())
}

/// High-entropy password from the OS CSPRNG, base64 so it survives JSON and basic auth.
pub fn generate_password() -> Result<String> {
    let mut bytes = [0u8; GENERATED_PASSWORD_BYTES];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| anyhow::anyhow!("Failed to generate random password bytes"))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}
