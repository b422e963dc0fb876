use hmac::{ Hmac, Mac };
use sha2::Sha256;
use std::collections::HashMap;
use thiserror::Error;
use url::form_urlencoded;

type HmacSha256 = Hmac<Sha256>;

/// How far a client's `ts` may drift from the server clock, in seconds.
pub const MAX_CLOCK_SKEW_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing ts/sig")]
    MissingParams,
    #[error("timestamp out of range")]
    StaleTimestamp,
    #[error("bad signature")]
    BadSignature,
    #[error("invalid server key")]
    InvalidKey,
}

fn mac_for(secret: &str, ts: &str) -> Result<HmacSha256, AuthError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidKey)?;
    mac.update(ts.as_bytes());
    Ok(mac)
}

/// Hex HMAC-SHA256 of `ts` keyed by `secret`, as clients send it in `sig`.
pub fn sign(secret: &str, ts: &str) -> Result<String, AuthError> {
    Ok(hex::encode(mac_for(secret, ts)?.finalize().into_bytes()))
}

/// Checks the `ts`/`sig` pair in a handshake query string.
/// `X-Api-Ts` and `X-Api-Sign` are accepted as aliases.
pub fn verify_query(secret: &str, query: &str, now: i64) -> Result<(), AuthError> {
    let params: HashMap<String, String> = form_urlencoded
        ::parse(query.as_bytes())
        .into_owned()
        .collect();

    let ts = params.get("ts").or_else(|| params.get("X-Api-Ts"));
    let sig = params.get("sig").or_else(|| params.get("X-Api-Sign"));
    let (Some(ts), Some(sig)) = (ts, sig) else {
        return Err(AuthError::MissingParams);
    };

    let ts_i: i64 = ts.parse().map_err(|_| AuthError::StaleTimestamp)?;
    if (now - ts_i).abs() > MAX_CLOCK_SKEW_SECS {
        return Err(AuthError::StaleTimestamp);
    }

    let sig_bytes = hex::decode(sig).map_err(|_| AuthError::BadSignature)?;
    mac_for(secret, ts)?
        .verify_slice(&sig_bytes)
        .map_err(|_| AuthError::BadSignature)
}
