//! Credential identity: fingerprints and display forms.

use sha2::{Digest, Sha256};

/// Minimum accepted credential length in characters.
pub const MIN_CREDENTIAL_LEN: usize = 16;

/// Maximum accepted credential length in characters.
pub const MAX_CREDENTIAL_LEN: usize = 256;

/// Compute the fingerprint of a raw credential: SHA-256, lowercase hex.
///
/// The fingerprint is the only identity used to look up presented
/// credentials; the raw material itself is never persisted in clear.
pub fn fingerprint(material: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    hex::encode(hasher.finalize())
}

/// Non-sensitive abbreviation of a credential for logs and the status page.
///
/// Credentials of 8 characters or fewer show only the first four
/// (`abcd..`); longer ones show first and last four (`abcd..wxyz`).
pub fn display_form(material: &str) -> String {
    let chars: Vec<char> = material.chars().collect();
    let head: String = chars.iter().take(4).collect();
    if chars.len() <= 8 {
        format!("{head}..")
    } else {
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}..{tail}")
    }
}
