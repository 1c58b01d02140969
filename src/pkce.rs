use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}

/// Generates a random PKCE code verifier.
///
/// 48 random bytes encode to a 64-character URL-safe string (RFC 7636 allows 43-128).
#[must_use]
pub fn generate_code_verifier() -> String {
    URL_SAFE_NO_PAD.encode(random_bytes::<48>())
}

/// Computes the S256 code challenge: `BASE64URL(SHA256(verifier))`.
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generates the OAuth `state` parameter. 16 random bytes, 22 characters.
#[must_use]
pub fn generate_state() -> String {
    URL_SAFE_NO_PAD.encode(random_bytes::<16>())
}

/// Generates an opaque session id (32 random bytes, hex encoded).
#[must_use]
pub fn generate_session_id() -> String {
    hex::encode(random_bytes::<32>())
}
