//! Signed application assertions (RS256 JSON Web Tokens)
//!
//! An assertion proves to the provider that the caller holds the
//! application's private key. It is short-lived: the provider refuses
//! assertions that expire more than ten minutes after they are issued, so a
//! fresh one is minted for every exchange.

use std::{fmt, sync::Arc};

use aliri_braid::braid;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::{
    rand::SystemRandom,
    signature::{self, RsaKeyPair},
};
use serde::{Deserialize, Serialize};
use tollgate_clock::{DurationMillis, UnixMillis};

use crate::{
    braids::limited_reveal,
    error::{self, InvalidKeyError},
    AppId, AppIdRef, PrivateKeyPemRef,
};

/// How long an assertion remains valid after it is minted
pub const ASSERTION_LIFETIME: DurationMillis = DurationMillis::from_mins(10);

/// How far `iat` is backdated to tolerate clock drift against the provider
pub const CLOCK_SKEW: DurationMillis = DurationMillis::from_secs(60);

/// A signed JSON Web Token
///
/// The value is a bearer credential for the lifetime of the assertion, so
/// it is not printed by `Debug` or `Display` unless the alternate form is
/// requested. Even then the signature is elided unless a width is given.
#[braid(serde, debug = "owned", display = "owned", ord = "omit")]
#[must_use]
pub struct Jwt;

impl fmt::Debug for JwtRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if f.alternate() {
            f.write_str("\"")?;
            if let Some(last_period) = self.0.rfind('.') {
                f.write_str(&self.0[..=last_period])?;
                limited_reveal(&self.0[last_period + 1..], &mut *f, 0)?;
            } else {
                limited_reveal(&self.0, &mut *f, 0)?;
            }
            f.write_str("\"")
        } else {
            f.write_str("***JWT***")
        }
    }
}

impl fmt::Display for JwtRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if f.alternate() {
            if let Some(last_period) = self.0.rfind('.') {
                f.write_str(&self.0[..=last_period])?;
                limited_reveal(&self.0[last_period + 1..], &mut *f, usize::MAX)
            } else {
                limited_reveal(&self.0, &mut *f, usize::MAX)
            }
        } else {
            f.write_str("***JWT***")
        }
    }
}

/// An RSA private key ready for signing
#[derive(Clone)]
pub struct AppKey {
    pair: Arc<RsaKeyPair>,
}

impl AppKey {
    /// Parses an RSA private key from PEM text
    ///
    /// Both PKCS#1 (`RSA PRIVATE KEY`) and PKCS#8 (`PRIVATE KEY`) encodings
    /// are accepted. The first private key in the input is used.
    ///
    /// # Errors
    ///
    /// The input holds no private key, holds a key that is not RSA, or the
    /// key is rejected (for example, a modulus under 2048 bits).
    pub fn from_pem(pem: &PrivateKeyPemRef) -> Result<Self, InvalidKeyError> {
        let mut reader = pem.as_str().as_bytes();
        for item in rustls_pemfile::read_all(&mut reader) {
            let pair = match item.map_err(error::invalid_key)? {
                rustls_pemfile::Item::Pkcs1Key(key) => RsaKeyPair::from_der(key.secret_pkcs1_der()),
                rustls_pemfile::Item::Pkcs8Key(key) => {
                    RsaKeyPair::from_pkcs8(key.secret_pkcs8_der())
                }
                rustls_pemfile::Item::Sec1Key(_) => {
                    return Err(error::invalid_key(
                        "elliptic curve keys cannot produce RS256 signatures",
                    ))
                }
                _ => continue,
            };

            return pair
                .map(|pair| Self {
                    pair: Arc::new(pair),
                })
                .map_err(|e| error::invalid_key(e.to_string()));
        }

        Err(error::invalid_key("no private key found in PEM input"))
    }

    /// The DER-encoded `RSAPublicKey` matching this key
    #[must_use]
    pub fn public_key_der(&self) -> &[u8] {
        self.pair.public().as_ref()
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, InvalidKeyError> {
        let mut buf = vec![0; self.pair.public().modulus_len()];
        self.pair
            .sign(
                &signature::RSA_PKCS1_SHA256,
                &SystemRandom::new(),
                message,
                &mut buf,
            )
            .map_err(|e| error::invalid_key(e.to_string()))?;
        Ok(buf)
    }
}

impl fmt::Debug for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AppKey")
            .field("modulus_bits", &(self.pair.public().modulus_len() * 8))
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// The claims carried by an application assertion
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AssertionClaims {
    /// Issued-at, in seconds since the epoch
    pub iat: u64,
    /// Expiry, in seconds since the epoch
    pub exp: u64,
    /// The application identifier
    pub iss: AppId,
}

#[derive(Serialize)]
struct Headers {
    alg: &'static str,
    typ: &'static str,
}

const RS256_HEADERS: Headers = Headers {
    alg: "RS256",
    typ: "JWT",
};

/// A signed, time-bounded application assertion
#[derive(Clone, Debug)]
pub struct Assertion {
    token: Jwt,
    claims: AssertionClaims,
    issued_at: UnixMillis,
    expires_at: UnixMillis,
}

impl Assertion {
    /// The signed token, for use as a bearer credential
    pub fn token(&self) -> &JwtRef {
        &self.token
    }

    /// The claims that were signed
    #[must_use]
    pub fn claims(&self) -> &AssertionClaims {
        &self.claims
    }

    /// The backdated issue time
    #[must_use]
    pub fn issued_at(&self) -> UnixMillis {
        self.issued_at
    }

    /// The time after which the provider will refuse the assertion
    #[must_use]
    pub fn expires_at(&self) -> UnixMillis {
        self.expires_at
    }

    /// Whether the assertion may still be presented at `now`
    #[must_use]
    pub fn is_valid_at(&self, now: UnixMillis) -> bool {
        now < self.expires_at
    }
}

/// Mints an assertion for `app_id` signed with `key`
///
/// The result depends only on the arguments: `iat` is `now` less
/// [`CLOCK_SKEW`], `exp` is `now` plus [`ASSERTION_LIFETIME`].
///
/// # Errors
///
/// The key refuses to produce a signature.
pub fn sign(app_id: &AppIdRef, key: &AppKey, now: UnixMillis) -> Result<Assertion, InvalidKeyError> {
    let issued_at = now.saturating_sub(CLOCK_SKEW);
    let expires_at = now + ASSERTION_LIFETIME;

    let claims = AssertionClaims {
        iat: issued_at.as_secs(),
        exp: expires_at.as_secs(),
        iss: app_id.to_owned(),
    };

    let h_raw = serde_json::to_vec(&RS256_HEADERS).map_err(error::invalid_key)?;
    let p_raw = serde_json::to_vec(&claims).map_err(error::invalid_key)?;

    let mut message = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(h_raw),
        URL_SAFE_NO_PAD.encode(p_raw)
    );
    let sig = key.sign(message.as_bytes())?;
    message.push('.');
    message.push_str(&URL_SAFE_NO_PAD.encode(sig));

    Ok(Assertion {
        token: Jwt::new(message),
        claims,
        issued_at,
        expires_at,
    })
}

/// Parses `pem` and mints an assertion with it
///
/// # Errors
///
/// The key cannot be parsed or used for RS256.
pub fn sign_pem(
    app_id: &AppIdRef,
    pem: &PrivateKeyPemRef,
    now: UnixMillis,
) -> Result<Assertion, InvalidKeyError> {
    sign(app_id, &AppKey::from_pem(pem)?, now)
}
