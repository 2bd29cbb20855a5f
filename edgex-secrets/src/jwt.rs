//! Identity token expiry.
//!
//! Only the `exp` claim of the payload segment is read; the signature is the
//! consumer's business.

use std::time::Duration;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde_json::Value;

/// Renew this long before the token expires.
pub const RENEWAL_MARGIN_SECS: i64 = 60;

/// Delay used when the expiry is unknown or too close.
pub const FALLBACK_RENEWAL: Duration = Duration::from_secs(600);

// JWT segments are unpadded base64url, but tolerate padding anyway.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The `exp` claim (seconds since the epoch), if the token is a three-part
/// JWT whose payload decodes to JSON with a non-zero `exp`.
pub fn decode_expiry(jwt: &str) -> Option<i64> {
    let mut parts = jwt.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };

    let bytes = PAYLOAD_ENGINE.decode(payload).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?;
    exp.as_i64()
        .or_else(|| exp.as_f64().map(|f| f as i64))
        .filter(|exp| *exp != 0)
}

/// How long to wait before renewing `jwt`, given the current unix time.
///
/// `exp - now - 60` seconds when that is positive, otherwise ten minutes.
pub fn identity_renewal_delay(jwt: &str, now_unix: i64) -> Duration {
    match decode_expiry(jwt).and_then(|exp| exp.checked_sub(now_unix)) {
        Some(remaining) if remaining > RENEWAL_MARGIN_SECS => {
            Duration::from_secs((remaining - RENEWAL_MARGIN_SECS) as u64)
        }
        _ => FALLBACK_RENEWAL,
    }
}

#[cfg(test)]
pub(crate) fn encode_test_token(claims: &Value) -> String {
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    format!(
        "{}.{}.signature",
        engine.encode(br#"{"alg":"ES384","typ":"JWT"}"#),
        engine.encode(claims.to_string())
    )
}
