//! Signed anonymous device tokens.
//!
//! A token is `{device_id}.{signature}` where the signature is the URL-safe base64 HMAC-SHA256
//! of the device id under the server's `secret_key`. The server is the only authority on how
//! many free generations a device has left; the token only proves which device is asking.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::types::DeviceId;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the device token on anonymous requests.
pub const DEVICE_TOKEN_HEADER: &str = "x-device-token";

#[derive(Clone)]
pub struct DeviceTokens {
    keyed: HmacSha256,
}

impl std::fmt::Debug for DeviceTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceTokens").finish_non_exhaustive()
    }
}

impl DeviceTokens {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        let keyed = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| anyhow::anyhow!("invalid device token secret: {e}"))?;
        Ok(Self { keyed })
    }

    fn mac(&self, device_id: &DeviceId) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(device_id.as_hyphenated().to_string().as_bytes());
        mac
    }

    /// Create a new device and its token.
    pub fn issue(&self) -> (DeviceId, String) {
        let device_id = Uuid::new_v4();
        (device_id, self.token_for(&device_id))
    }

    pub fn token_for(&self, device_id: &DeviceId) -> String {
        let signature = self.mac(device_id).finalize().into_bytes();
        format!("{}.{}", device_id.as_hyphenated(), URL_SAFE_NO_PAD.encode(signature))
    }

    /// The device id the token was issued for, or `None` if it is malformed or forged.
    pub fn verify(&self, token: &str) -> Option<DeviceId> {
        let (id, signature) = token.trim().split_once('.')?;
        let device_id = Uuid::parse_str(id).ok()?;
        let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;
        self.mac(&device_id).verify_slice(&signature).ok()?;
        Some(device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_verify() {
        let tokens = DeviceTokens::new("test-secret").unwrap();
        let (device_id, token) = tokens.issue();
        assert_eq!(tokens.verify(&token), Some(device_id));
    }

    #[test]
    fn rejects_tampered_or_foreign_tokens() {
        let tokens = DeviceTokens::new("test-secret").unwrap();
        let (_, token) = tokens.issue();

        let (_, signature) = token.split_once('.').unwrap();
        let forged = format!("{}.{}", Uuid::new_v4(), signature);
        assert_eq!(tokens.verify(&forged), None);

        let other_server = DeviceTokens::new("another-secret").unwrap();
        assert_eq!(other_server.verify(&token), None);

        assert_eq!(tokens.verify("not-a-token"), None);
        assert_eq!(tokens.verify(""), None);
    }
}
