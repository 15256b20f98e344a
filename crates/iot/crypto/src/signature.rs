//! Webhook payload signatures.

use color_eyre::eyre::WrapErr as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header naming the signature algorithm.
pub const HEADER_ALGORITHM: &str = "X-Men-Algorithm";

/// Header carrying the hex-encoded payload signature.
pub const HEADER_SIGNATURE: &str = "X-Men-Signature";

/// Algorithm identifier sent in [`HEADER_ALGORITHM`].
pub const ALGORITHM_HMAC_SHA256: &str = "MEN-HMAC-SHA256-Payload";

/// Sign a request body with HMAC-SHA256, returning the lowercase hex digest.
pub fn sign_payload(secret: &[u8], body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any size"));
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex-encoded payload signature in constant time.
pub fn verify_payload(secret: &[u8], body: &[u8], signature: &str) -> color_eyre::eyre::Result<()> {
    let expected = hex::decode(signature).wrap_err("signature is not valid hex")?;

    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any size"));
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| color_eyre::eyre::eyre!("payload signature mismatch"))
}
