use base64::{engine::general_purpose, Engine as _};
use ring::{aead, pbkdf2, rand::{SecureRandom, SystemRandom}};
use std::num::NonZeroU32;

use crate::error::{AuditError, Result};

const APP_SECRET: &[u8] = b"receipt-audit-secret-v1";
const PBKDF2_ITERATIONS: u32 = 100_000;
const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;
const PREFIX: &str = "enc";

/// AES-256-GCM sealing for the provider key stored in the settings table.
/// Payload format: `enc:<salt>:<nonce>:<ciphertext+tag>`, each part base64.
pub struct CryptoService;

impl CryptoService {
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with("enc:")
    }

    pub fn encrypt_api_key(plaintext: &str) -> Result<String> {
        let rng = SystemRandom::new();
        let mut salt = [0u8; SALT_LEN];
        rng.fill(&mut salt)
            .map_err(|_| AuditError::Crypto("Failed to generate salt".to_string()))?;

        let key = derive_key(&salt)?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rng.fill(&mut nonce_bytes)
            .map_err(|_| AuditError::Crypto("Failed to generate nonce".to_string()))?;

        let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);
        let mut in_out = plaintext.as_bytes().to_vec();
        key.seal_in_place_append_tag(nonce, aead::Aad::empty(), &mut in_out)
            .map_err(|_| AuditError::Crypto("Encryption failed".to_string()))?;

        Ok(format!(
            "{}:{}:{}:{}",
            PREFIX,
            general_purpose::STANDARD.encode(salt),
            general_purpose::STANDARD.encode(nonce_bytes),
            general_purpose::STANDARD.encode(in_out)
        ))
    }

    pub fn decrypt_api_key(payload: &str) -> Result<String> {
        let parts: Vec<&str> = payload.split(':').collect();
        if parts.len() != 4 || parts[0] != PREFIX {
            return Err(AuditError::Crypto("Invalid encrypted payload".to_string()));
        }
        let salt = decode(parts[1], "salt")?;
        let nonce_bytes = decode(parts[2], "nonce")?;
        let mut data = decode(parts[3], "ciphertext")?;

        let key = derive_key(&salt)?;
        let nonce = aead::Nonce::try_assume_unique_for_key(&nonce_bytes)
            .map_err(|_| AuditError::Crypto("Invalid nonce length".to_string()))?;

        let decrypted = key
            .open_in_place(nonce, aead::Aad::empty(), &mut data)
            .map_err(|_| AuditError::Crypto("Decryption failed".to_string()))?;
        String::from_utf8(decrypted.to_vec()).map_err(|e| AuditError::Crypto(e.to_string()))
    }
}

fn decode(part: &str, what: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(part)
        .map_err(|e| AuditError::Crypto(format!("Decode {}: {}", what, e)))
}

fn derive_key(salt: &[u8]) -> Result<aead::LessSafeKey> {
    let mut key_bytes = [0u8; 32];
    let iterations = NonZeroU32::new(PBKDF2_ITERATIONS)
        .ok_or_else(|| AuditError::Crypto("Invalid iterations".to_string()))?;
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        APP_SECRET,
        &mut key_bytes,
    );
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &key_bytes)
        .map_err(|_| AuditError::Crypto("Invalid key material".to_string()))?;
    Ok(aead::LessSafeKey::new(unbound))
}
