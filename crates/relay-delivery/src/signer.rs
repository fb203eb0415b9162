//! HMAC signing of outbound payloads.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{DeliveryError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Signs the canonical payload bytes with HMAC-SHA256.
///
/// Returns the MAC as lowercase hex, the exact form carried in the request
/// URL's `sign` parameter. The same bytes must be signed and transmitted;
/// any re-serialization between signing and sending voids the signature.
pub fn sign(payload: &[u8], key: &str) -> Result<String> {
    if key.is_empty() {
        return Err(DeliveryError::signing("signing key is empty"));
    }

    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| DeliveryError::signing(format!("invalid HMAC key: {e}")))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
