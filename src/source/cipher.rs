//! Encryption at rest for secrets embedded in stored source configurations.
//!
//! AES-256-GCM with a key derived from `security.secret_key`. The stored form is
//! `hex(nonce (12 bytes) || ciphertext || tag (16 bytes))`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use crate::source::Error;

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

#[derive(Clone)]
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl SecretBox {
    pub fn new(secret_key: &str) -> Self {
        let mut digest = Sha256::digest(secret_key.as_bytes());
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(digest.as_slice()));
        digest.as_mut_slice().zeroize();
        Self { cipher }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, Error> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| Error::Configuration(format!("Unable to encrypt secret: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(hex::encode(sealed))
    }

    pub fn decrypt(&self, sealed: &str) -> Result<Zeroizing<String>, Error> {
        let sealed = hex::decode(sealed)
            .map_err(|e| Error::Configuration(format!("Encrypted secret is not hex: {e}")))?;
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::Configuration("Encrypted secret too short".to_string()));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Configuration("Unable to decrypt secret".to_string()))?;

        String::from_utf8(plaintext)
            .map(Zeroizing::new)
            .map_err(|_| Error::Configuration("Decrypted secret is not UTF-8".to_string()))
    }
}
