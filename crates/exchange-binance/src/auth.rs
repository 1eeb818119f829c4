//! HMAC-SHA256 request signing.
//!
//! Binance authenticates private endpoints by appending
//! `signature=<hex>` to the request's query string, where the signature
//! is HMAC-SHA256 of the canonical query computed with the account
//! secret. The secret never leaves this module and is never logged.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs canonical query strings with an account secret.
pub struct QuerySigner {
    secret: String,
}

impl std::fmt::Debug for QuerySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySigner").finish_non_exhaustive()
    }
}

impl QuerySigner {
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Hex-encoded HMAC-SHA256 of `query`.
    #[must_use]
    pub fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Appends the signature parameter to a canonical query.
    #[must_use]
    pub fn signed_query(&self, query: &str) -> String {
        format!("{query}&signature={}", self.sign(query))
    }
}

/// Joins `key=value` pairs with `&` in the given order. The venue signs
/// the exact byte sequence, so parameter order must be stable.
#[must_use]
pub fn canonical_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}
