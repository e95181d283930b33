//! AWS Signature Version 4.
//!
//! Signs a built `reqwest::Request` in place: adds `host` and `x-amz-date`,
//! then an `authorization` header covering every header on the request.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderValue, AUTHORIZATION, HOST};
use reqwest::Request;
use sha2::{Digest, Sha256};

use crate::provider::{ProviderError, ProviderResult};

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

type HmacSha256 = Hmac<Sha256>;

/// Static access key pair.
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Signs requests for one service in one region.
#[derive(Debug, Clone)]
pub struct Signer {
    credentials: Credentials,
    region: String,
    service: String,
}

fn hmac(key: &[u8], data: &str) -> ProviderResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ProviderError::Api(format!("signing key: {}", e)))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// RFC 3986 encoding: everything but unreserved characters is escaped.
fn uri_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

/// Derive the key for `date` (YYYYMMDD).
pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> ProviderResult<Vec<u8>> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date)?;
    let k_region = hmac(&k_date, region)?;
    let k_service = hmac(&k_region, service)?;
    hmac(&k_service, "aws4_request")
}

/// Canonical form of a request. `headers` must have lowercase names.
pub fn canonical_request(
    method: &str,
    path: &str,
    query: &[(String, String)],
    headers: &BTreeMap<String, String>,
    payload_hash: &str,
) -> String {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    pairs.sort();
    let canonical_query = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
        .collect();
    let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method,
        if path.is_empty() { "/" } else { path },
        canonical_query,
        canonical_headers,
        signed_headers,
        payload_hash
    )
}

pub fn string_to_sign(amz_date: &str, scope: &str, canonical_request: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        sha256_hex(canonical_request.as_bytes())
    )
}

impl Signer {
    pub fn new(credentials: Credentials, region: &str, service: &str) -> Self {
        Self {
            credentials,
            region: region.to_string(),
            service: service.to_string(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Sign `request` as of `now`.
    pub fn sign(&self, request: &mut Request, now: DateTime<Utc>) -> ProviderResult<()> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        let url = request.url().clone();
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(ProviderError::Api(format!("no host in {}", url))),
        };
        let invalid = |e: reqwest::header::InvalidHeaderValue| ProviderError::Api(e.to_string());
        request
            .headers_mut()
            .insert(HOST, HeaderValue::from_str(&host).map_err(invalid)?);
        request
            .headers_mut()
            .insert("x-amz-date", HeaderValue::from_str(&amz_date).map_err(invalid)?);

        let mut headers = BTreeMap::new();
        for (name, value) in request.headers() {
            let value = value
                .to_str()
                .map_err(|e| ProviderError::Api(format!("header {}: {}", name, e)))?;
            headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
        }

        let payload = request
            .body()
            .and_then(|body| body.as_bytes())
            .unwrap_or_default();
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let canonical = canonical_request(
            request.method().as_str(),
            url.path(),
            &query,
            &headers,
            &sha256_hex(payload),
        );

        let scope = format!("{}/{}/{}/aws4_request", date, self.region, self.service);
        let key = signing_key(&self.credentials.secret_access_key, &date, &self.region, &self.service)?;
        let signature = hex::encode(hmac(&key, &string_to_sign(&amz_date, &scope, &canonical))?);

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM,
            self.credentials.access_key_id,
            scope,
            headers.keys().cloned().collect::<Vec<_>>().join(";"),
            signature
        );
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_str(&authorization).map_err(invalid)?);
        Ok(())
    }
}
