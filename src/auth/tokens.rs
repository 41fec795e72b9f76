use anyhow::Context;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

const TOKEN_BYTES: usize = 32;

/// Random URL-safe token. Only the client ever sees this value.
pub fn generate_token() -> anyhow::Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Storage key for a token: base64url(sha256(token)).
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    Base64UrlUnpadded::encode_string(&digest)
}
