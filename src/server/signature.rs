//! Request signatures: `md5("{url}:{salt}")`, hex encoded

use md5::{Digest, Md5};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid hash")]
    Mismatch,
}

/// Signature a caller must send along with `url`.
pub fn expected_hash(url: &str, salt: &str) -> String {
    hex::encode(Md5::digest(format!("{url}:{salt}").as_bytes()))
}

/// Check `hash` against the signature of `url`.
///
/// The comparison is exact: lowercase hex, no surrounding whitespace.
pub fn verify(url: &str, hash: &str, salt: &str) -> Result<(), SignatureError> {
    let expected = expected_hash(url, salt);
    if hash == expected {
        return Ok(());
    }
    tracing::debug!(
        "invalid provided hash: {}, while a proper one is: {} built from: \"{}:<salt>\"",
        hash,
        expected,
        url
    );
    Err(SignatureError::Mismatch)
}
