use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

pub(crate) fn limited_reveal(
    unprotected: &str,
    f: &mut fmt::Formatter,
    default_len: usize,
) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// The identifier of the application whose key signs assertions
#[braid(serde)]
pub struct AppId;

/// The account that owns the target repository
#[braid(serde)]
pub struct Owner;

/// The name of the target repository
#[braid(serde)]
pub struct Repo;

/// A user name presented to the identity provider
#[braid(serde)]
pub struct Username;

/// A password presented to the identity provider
#[braid(serde, debug = "owned", display = "owned")]
pub struct Password;

limited_reveal!(PasswordRef: "PASSWORD", 0);

/// An installation access token, usable as a bearer credential
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 8);

/// A local session credential established by logging in
#[braid(serde, debug = "owned", display = "owned")]
pub struct LoginToken;

limited_reveal!(LoginTokenRef: "LOGIN TOKEN", 5);

/// PEM text of the application's private signing key
#[braid(serde, debug = "owned", display = "owned")]
pub struct PrivateKeyPem;

limited_reveal!(PrivateKeyPemRef: "PRIVATE KEY", 0);

/// A passphrase from which the at-rest encryption key is derived
#[braid(serde, debug = "owned", display = "owned")]
pub struct EncryptionKey;

limited_reveal!(EncryptionKeyRef: "ENCRYPTION KEY", 0);
