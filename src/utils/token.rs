use base64::Engine;
use sha2::{Digest, Sha256};

/// Prefix for session tokens. Disjoint from share tokens so a token can
/// never be replayed across the two namespaces.
pub const SESSION_PREFIX: &str = "sess_";

/// Prefix for share-link tokens.
pub const SHARE_PREFIX: &str = "shr_";

/// Generate an unguessable URL-safe token under the given namespace.
pub fn generate_token(prefix: &str) -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.r#gen()).collect();
    format!(
        "{}{}",
        prefix,
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&bytes)
    )
}

/// Short stable digest of a token, safe to write to logs and audit rows
/// in place of the raw secret.
pub fn fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}
