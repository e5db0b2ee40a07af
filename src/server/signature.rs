//! HTTP message signatures (draft-cavage) as produced by Drone's extension client.

use axum::http::{HeaderMap, Method, Uri};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "signature";
pub const DIGEST_HEADER: &str = "digest";
pub const ALGORITHM: &str = "hmac-sha256";
const REQUEST_TARGET: &str = "(request-target)";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,
    #[error("malformed signature header: {0}")]
    Malformed(String),
    #[error("unsupported signature algorithm {0}")]
    UnsupportedAlgorithm(String),
    #[error("header {0} must be part of the signature")]
    RequiredHeader(&'static str),
    #[error("signed header {0} is missing from the request")]
    MissingHeader(String),
    #[error("digest does not match the request body")]
    DigestMismatch,
    #[error("invalid signature")]
    Invalid,
}

/// Parsed `Signature` header parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureParams {
    pub key_id: String,
    pub algorithm: String,
    pub headers: Vec<String>,
    pub signature: String,
}

impl SignatureParams {
    pub fn parse(raw: &str) -> Result<Self, SignatureError> {
        let raw = raw.trim();
        let raw = raw.strip_prefix("Signature ").unwrap_or(raw);

        let mut key_id = None;
        let mut algorithm = None;
        let mut headers = None;
        let mut signature = None;
        for part in split_params(raw) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| SignatureError::Malformed(part.to_string()))?;
            let value = value
                .trim()
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .ok_or_else(|| SignatureError::Malformed(part.to_string()))?
                .to_string();
            match key.trim() {
                "keyId" => key_id = Some(value),
                "algorithm" => algorithm = Some(value),
                "headers" => headers = Some(value),
                "signature" => signature = Some(value),
                _ => {}
            }
        }

        let signature =
            signature.ok_or_else(|| SignatureError::Malformed("signature is missing".into()))?;
        // Without an explicit list only the date header is signed.
        let headers = headers
            .unwrap_or_else(|| "date".to_string())
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        Ok(SignatureParams {
            key_id: key_id.unwrap_or_default(),
            algorithm: algorithm.unwrap_or_else(|| ALGORITHM.to_string()),
            headers,
            signature,
        })
    }
}

fn split_params(raw: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    for (index, ch) in raw.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                parts.push(raw[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(raw[start..].trim());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

/// Build the string that is fed to the HMAC for the given header list.
pub fn signing_string(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    signed: &[String],
) -> Result<String, SignatureError> {
    let mut lines = Vec::with_capacity(signed.len());
    for name in signed {
        if name == REQUEST_TARGET {
            let target = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
            lines.push(format!(
                "{}: {} {}",
                REQUEST_TARGET,
                method.as_str().to_lowercase(),
                target
            ));
            continue;
        }
        let values: Vec<&str> = headers
            .get_all(name.as_str())
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::trim)
            .collect();
        if values.is_empty() {
            return Err(SignatureError::MissingHeader(name.clone()));
        }
        lines.push(format!("{}: {}", name, values.join(", ")));
    }
    Ok(lines.join("\n"))
}

fn mac(secret: &[u8], message: &str) -> Result<Vec<u8>, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|err| SignatureError::Malformed(err.to_string()))?;
    mac.update(message.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// `SHA-256=<base64>` digest of a request body.
pub fn body_digest(body: &[u8]) -> String {
    format!("SHA-256={}", STANDARD.encode(Sha256::digest(body)))
}

/// Sign a request, returning the value for the `Signature` header.
pub fn sign(
    secret: &[u8],
    key_id: &str,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    signed: &[&str],
) -> Result<String, SignatureError> {
    let signed: Vec<String> = signed.iter().map(|h| h.to_lowercase()).collect();
    let message = signing_string(method, uri, headers, &signed)?;
    let signature = STANDARD.encode(mac(secret, &message)?);
    Ok(format!(
        "keyId=\"{}\",algorithm=\"{}\",headers=\"{}\",signature=\"{}\"",
        key_id,
        ALGORITHM,
        signed.join(" "),
        signature
    ))
}

/// Verifies signed requests against the shared secret.
#[derive(Clone)]
pub struct Verifier {
    secret: Vec<u8>,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier").finish_non_exhaustive()
    }
}

impl Verifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Verifier {
            secret: secret.into(),
        }
    }

    pub fn verify(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<SignatureParams, SignatureError> {
        let raw = headers
            .get(SIGNATURE_HEADER)
            .or_else(|| headers.get("authorization"))
            .and_then(|v| v.to_str().ok())
            .ok_or(SignatureError::Missing)?;
        let params = SignatureParams::parse(raw)?;

        if !params.algorithm.eq_ignore_ascii_case(ALGORITHM) {
            return Err(SignatureError::UnsupportedAlgorithm(params.algorithm));
        }
        if !params.headers.iter().any(|h| h == "date") {
            return Err(SignatureError::RequiredHeader("date"));
        }

        if params.headers.iter().any(|h| h == DIGEST_HEADER) {
            let digest = headers
                .get(DIGEST_HEADER)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| SignatureError::MissingHeader(DIGEST_HEADER.to_string()))?;
            let expected = body_digest(body);
            if !bool::from(digest.trim().as_bytes().ct_eq(expected.as_bytes())) {
                return Err(SignatureError::DigestMismatch);
            }
        }

        let provided = STANDARD
            .decode(params.signature.as_bytes())
            .map_err(|err| SignatureError::Malformed(err.to_string()))?;
        let message = signing_string(method, uri, headers, &params.headers)?;
        let expected = mac(&self.secret, &message)?;
        if !bool::from(provided.as_slice().ct_eq(expected.as_slice())) {
            return Err(SignatureError::Invalid);
        }
        Ok(params)
    }
}
