use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use chrono::Utc;
use hex::encode;
use hmac::{Hmac, Mac};
use http::HeaderMap;
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// Signature checks for requests from GitHub and Slack.
pub trait RequestVerifier {
    fn verify_github(headers: &HeaderMap, body: &str, secret: &str) -> Result<()>;

    fn verify_slack(headers: &HeaderMap, body: &str, secret: &str, max_skew: Duration)
    -> Result<()>;
}

pub struct DefaultVerifier;

impl RequestVerifier for DefaultVerifier {
    fn verify_github(headers: &HeaderMap, body: &str, secret: &str) -> Result<()> {
        let signature = header_str(headers, "x-hub-signature-256")?;
        let computed = format!("sha256={}", hmac_hex(secret, &[body.as_bytes()])?);
        compare(signature, &computed)
    }

    // https://api.slack.com/authentication/verifying-requests-from-slack
    fn verify_slack(
        headers: &HeaderMap,
        body: &str,
        secret: &str,
        max_skew: Duration,
    ) -> Result<()> {
        let timestamp = header_str(headers, "x-slack-request-timestamp")?;
        check_timestamp(timestamp, Utc::now().timestamp(), max_skew)?;
        let signature = header_str(headers, "x-slack-signature")?;
        let computed = format!(
            "v0={}",
            hmac_hex(secret, &[b"v0:", timestamp.as_bytes(), b":", body.as_bytes()])?
        );
        compare(signature, &computed)
    }
}

fn header_str<'hdr>(headers: &'hdr HeaderMap, key: &str) -> Result<&'hdr str> {
    headers
        .get(key)
        .with_context(|| format!("missing {key} header field"))?
        .to_str()
        .with_context(|| format!("invalid {key} header field"))
}

fn hmac_hex(secret: &str, parts: &[&[u8]]) -> Result<String> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).with_context(|| "HMAC creation failed")?;
    for part in parts {
        mac.update(part);
    }
    Ok(encode(mac.finalize().into_bytes()))
}

fn compare(signature: &str, computed: &str) -> Result<()> {
    // Into bool will be false if it's ok, so we need to negate it.
    let choice = !computed.as_bytes().ct_eq(signature.as_bytes());
    if choice.into() {
        bail!("comparison failed: signature={signature}, computed={computed}")
    }
    Ok(())
}

/// OAuth `state` for the Slack install flow: `{issued_at}.{hmac}`, signed with the client secret.
pub fn issue_oauth_state(secret: &str, now: i64) -> Result<String> {
    let issued_at = now.to_string();
    let signature = hmac_hex(secret, &[b"oauth-state:", issued_at.as_bytes()])?;
    Ok(format!("{issued_at}.{signature}"))
}

pub fn verify_oauth_state(state: &str, secret: &str, now: i64, max_age: Duration) -> Result<()> {
    let (issued_at, signature) = state
        .split_once('.')
        .with_context(|| format!("malformed oauth state: {state}"))?;
    let computed = hmac_hex(secret, &[b"oauth-state:", issued_at.as_bytes()])?;
    compare(signature, &computed)?;
    check_timestamp(issued_at, now, max_age)
}

// Replayed requests carry an old timestamp.
fn check_timestamp(timestamp: &str, now: i64, max_skew: Duration) -> Result<()> {
    let ts = timestamp
        .parse::<i64>()
        .with_context(|| format!("invalid request timestamp: {timestamp}"))?;
    let skew = now.abs_diff(ts);
    if skew > max_skew.as_secs() {
        bail!("request timestamp out of range: timestamp={ts}, now={now}");
    }
    Ok(())
}

// mockall for static methods needs synchronization, so avoid it.
#[cfg(test)]
pub mod test {
    use super::*;

    pub struct NullVerifier;

    impl RequestVerifier for NullVerifier {
        fn verify_github(_headers: &HeaderMap, _body: &str, _secret: &str) -> Result<()> {
            Ok(())
        }

        fn verify_slack(
            _headers: &HeaderMap,
            _body: &str,
            _secret: &str,
            _max_skew: Duration,
        ) -> Result<()> {
            Ok(())
        }
    }

    pub struct FailVerifier;

    impl RequestVerifier for FailVerifier {
        fn verify_github(_headers: &HeaderMap, _body: &str, _secret: &str) -> Result<()> {
            bail!("always failed")
        }

        fn verify_slack(
            _headers: &HeaderMap,
            _body: &str,
            _secret: &str,
            _max_skew: Duration,
        ) -> Result<()> {
            bail!("always failed")
        }
    }

    pub fn github_signature(secret: &str, body: &str) -> String {
        format!("sha256={}", hmac_hex(secret, &[body.as_bytes()]).unwrap())
    }

    pub fn slack_signature(secret: &str, timestamp: &str, body: &str) -> String {
        let base = format!("v0:{timestamp}:{body}");
        format!("v0={}", hmac_hex(secret, &[base.as_bytes()]).unwrap())
    }
}
