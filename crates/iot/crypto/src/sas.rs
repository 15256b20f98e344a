//! Shared access signature tokens.

use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Build a `SharedAccessSignature` authorization token.
///
/// The signed message is the URL-encoded resource and the expiry (unix
/// seconds) separated by a newline. `key_name` is appended as `skn` when set.
pub fn sas_token(resource: &str, key: &[u8], expires_at: i64, key_name: Option<&str>) -> String {
    let resource = urlencoding::encode(resource);
    let message = format!("{resource}\n{expires_at}");

    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any size"));
    mac.update(message.as_bytes());
    let signature =
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    let mut token = format!(
        "SharedAccessSignature sr={resource}&sig={}&se={expires_at}",
        urlencoding::encode(&signature)
    );
    if let Some(name) = key_name.filter(|n| !n.is_empty()) {
        token.push_str("&skn=");
        token.push_str(name);
    }
    token
}
