//! Webhook request signing as done by Twilio: base64(HMAC-SHA1(auth token,
//! full URL followed by every POST parameter as key+value, sorted by key)).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use thiserror::Error;

type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing X-Twilio-Signature header")]
    Missing,
    #[error("webhook signature does not match")]
    Mismatch,
    #[error("webhook signing key is unusable")]
    InvalidKey,
}

pub fn compute_signature(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
) -> Result<String, SignatureError> {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|left, right| left.0.cmp(&right.0).then_with(|| left.1.cmp(&right.1)));

    let mut payload = String::from(url);
    for (key, value) in sorted {
        payload.push_str(key);
        payload.push_str(value);
    }

    let mut mac =
        HmacSha1::new_from_slice(auth_token.as_bytes()).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(payload.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

pub fn validate_signature(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
    provided: Option<&str>,
) -> Result<(), SignatureError> {
    let provided = provided.map(str::trim).filter(|value| !value.is_empty());
    let Some(provided) = provided else {
        return Err(SignatureError::Missing);
    };
    let expected = compute_signature(auth_token, url, params)?;
    if constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter().zip(right).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}
