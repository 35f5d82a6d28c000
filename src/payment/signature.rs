//! HMAC-SHA256 callback signatures

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header the processor signs callbacks with: lowercase hex of HMAC-SHA256 over the raw body.
pub const SIGNATURE_HEADER: &str = "x-signature";

#[derive(Clone)]
pub struct WebhookVerifier { secret: Vec<u8> }

impl WebhookVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self { Self { secret: secret.as_ref().to_vec() } }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length.
        HmacSha256::new_from_slice(&self.secret).unwrap_or_else(|_| unreachable!())
    }

    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time comparison against the hex signature from the header.
    pub fn verify(&self, body: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature.trim()) else { return false };
        let mut mac = self.mac();
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    }
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str("WebhookVerifier([REDACTED])") }
}
