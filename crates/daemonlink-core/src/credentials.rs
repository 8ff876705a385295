//! Credential secret and its one-way wire form.
//!
//! The plaintext secret never leaves the process. The handshake answers the
//! password prompt with `hex(HMAC-SHA256(key = login, msg = secret))`, so the
//! server can verify a stored hash without ever seeing the password.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// A credential secret, wiped from memory on drop.
///
/// `Debug` is redacted so the secret cannot leak through logs or panics.
#[derive(Clone)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    /// Wrap a plaintext secret
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    /// Plaintext bytes, for hashing only
    fn expose(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl From<&str> for Secret {
    fn from(secret: &str) -> Self {
        Self::new(secret)
    }
}

impl From<String> for Secret {
    fn from(secret: String) -> Self {
        Self::new(secret)
    }
}

/// Keyed one-way hash of `secret`, lowercase hex.
///
/// The login name is the HMAC key, which binds the hash to one account: two
/// users sharing a password still produce different wire values.
pub fn hash_secret(login: &str, secret: &Secret) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(login.as_bytes()) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(secret.expose());
    hex::encode(mac.finalize().into_bytes())
}
