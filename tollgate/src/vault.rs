//! Encryption of the private key at rest
//!
//! Blobs are AES-256-GCM sealed under a key derived from the configured
//! passphrase with PBKDF2-HMAC-SHA256. Each blob carries its own random salt
//! and nonce, and is stored as standard base64 of:
//!
//! ```text
//! [1 byte: version=1][16 bytes: salt][12 bytes: nonce][N bytes: ciphertext][16 bytes: tag]
//! ```
//!
//! The header bytes are authenticated as associated data.

use std::{fmt, num::NonZeroU32, sync::Arc};

use base64::{engine::general_purpose::STANDARD, Engine};
use ring::{
    aead, pbkdf2,
    rand::{SecureRandom, SystemRandom},
};

use crate::{
    error::{self, DecryptionError, DecryptionFailure, EncryptionError, VaultError},
    store::{keys, KeyValueStore},
    EncryptionKey, EncryptionKeyRef, PrivateKeyPem, PrivateKeyPemRef,
};

const VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const HEADER_LEN: usize = 1 + SALT_LEN + aead::NONCE_LEN;
const TAG_LEN: usize = 16;

const PBKDF2_ITERATIONS: NonZeroU32 = match NonZeroU32::new(100_000) {
    Some(n) => n,
    None => unreachable!(),
};

fn derive_key(
    passphrase: &EncryptionKeyRef,
    salt: &[u8],
) -> Result<aead::LessSafeKey, ring::error::Unspecified> {
    let mut raw = [0u8; 32];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        PBKDF2_ITERATIONS,
        salt,
        passphrase.as_str().as_bytes(),
        &mut raw,
    );
    let key = aead::UnboundKey::new(&aead::AES_256_GCM, &raw)?;
    Ok(aead::LessSafeKey::new(key))
}

/// Encrypts `plaintext` under a key derived from `passphrase`
///
/// # Errors
///
/// Only if the system random number generator fails.
pub fn encrypt(plaintext: &str, passphrase: &EncryptionKeyRef) -> Result<String, EncryptionError> {
    let rng = SystemRandom::new();

    let mut header = [0u8; HEADER_LEN];
    header[0] = VERSION;
    rng.fill(&mut header[1..])
        .map_err(|_| error::encryption_failed())?;

    let (salt, nonce) = header[1..].split_at(SALT_LEN);
    let key = derive_key(passphrase, salt).map_err(|_| error::encryption_failed())?;
    let nonce =
        aead::Nonce::try_assume_unique_for_key(nonce).map_err(|_| error::encryption_failed())?;

    let mut in_out = plaintext.as_bytes().to_vec();
    key.seal_in_place_append_tag(nonce, aead::Aad::from(&header[..]), &mut in_out)
        .map_err(|_| error::encryption_failed())?;

    let mut blob = Vec::with_capacity(HEADER_LEN + in_out.len());
    blob.extend_from_slice(&header);
    blob.extend_from_slice(&in_out);
    Ok(STANDARD.encode(blob))
}

/// Decrypts a blob produced by [`encrypt`]
///
/// # Errors
///
/// Fails closed, returning no plaintext, if the blob is malformed or the
/// passphrase does not match the one it was sealed with.
pub fn decrypt(ciphertext: &str, passphrase: &EncryptionKeyRef) -> Result<String, DecryptionError> {
    let blob = STANDARD
        .decode(ciphertext.trim())
        .map_err(|_| error::decryption_failed(DecryptionFailure::Encoding))?;

    match blob.first() {
        None => return Err(error::decryption_failed(DecryptionFailure::Truncated)),
        Some(&v) if v != VERSION => {
            return Err(error::decryption_failed(
                DecryptionFailure::UnsupportedVersion(v),
            ))
        }
        Some(_) => {}
    }

    if blob.len() < HEADER_LEN + TAG_LEN {
        return Err(error::decryption_failed(DecryptionFailure::Truncated));
    }

    let (header, sealed) = blob.split_at(HEADER_LEN);
    let (salt, nonce) = header[1..].split_at(SALT_LEN);

    let key = derive_key(passphrase, salt)
        .map_err(|_| error::decryption_failed(DecryptionFailure::Unauthenticated))?;
    let nonce = aead::Nonce::try_assume_unique_for_key(nonce)
        .map_err(|_| error::decryption_failed(DecryptionFailure::Truncated))?;

    let mut in_out = sealed.to_vec();
    let plaintext = key
        .open_in_place(nonce, aead::Aad::from(header), &mut in_out)
        .map_err(|_| error::decryption_failed(DecryptionFailure::Unauthenticated))?;

    String::from_utf8(plaintext.to_vec())
        .map_err(|_| error::decryption_failed(DecryptionFailure::NotUtf8))
}

/// Persists the private key encrypted under the configured passphrase
pub struct KeyVault {
    store: Arc<dyn KeyValueStore>,
    passphrase: EncryptionKey,
}

impl KeyVault {
    /// Constructs a vault over `store`
    pub fn new(store: Arc<dyn KeyValueStore>, passphrase: EncryptionKey) -> Self {
        Self { store, passphrase }
    }

    /// Encrypts the key and writes it to the store, replacing any prior key
    pub fn save(&self, pem: &PrivateKeyPemRef) -> Result<(), VaultError> {
        let blob = encrypt(pem.as_str(), &self.passphrase)?;
        self.store.set(keys::ENCRYPTED_PRIVATE_KEY, &blob)?;
        tracing::debug!("stored encrypted private key");
        Ok(())
    }

    /// Reads and decrypts the stored key
    ///
    /// Returns `Ok(None)` when no key has been stored.
    pub fn load(&self) -> Result<Option<PrivateKeyPem>, VaultError> {
        match self.store.get(keys::ENCRYPTED_PRIVATE_KEY)? {
            Some(blob) if !blob.is_empty() => {
                let pem = decrypt(&blob, &self.passphrase)?;
                Ok(Some(PrivateKeyPem::new(pem)))
            }
            _ => Ok(None),
        }
    }

    /// Removes the stored key
    pub fn clear(&self) -> Result<(), VaultError> {
        self.store.remove(keys::ENCRYPTED_PRIVATE_KEY)?;
        Ok(())
    }
}

impl fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeyVault")
            .field("passphrase", &self.passphrase)
            .finish_non_exhaustive()
    }
}
