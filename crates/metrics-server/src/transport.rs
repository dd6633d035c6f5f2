// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Body-level concerns shared by every route: gzip in both directions and
//! `HashSHA256` request verification and response signing.

use crate::error::ServerError;
use crate::http_utils::{HttpResponse, APPLICATION_JSON};
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use hmac::{Hmac, Mac};
use http_body_util::Full;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use sha2::Sha256;
use std::io::{Read, Write};
use tracing::{debug, warn};

pub const HASH_HEADER: HeaderName = HeaderName::from_static("hashsha256");

type HmacSha256 = Hmac<Sha256>;

fn mac(key: &str) -> Result<HmacSha256, ServerError> {
    HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| ServerError::InvalidConfig(format!("unusable KEY: {e}")))
}

pub fn sign(key: &str, body: &[u8]) -> Result<String, ServerError> {
    let mut mac = mac(key)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a hex `HashSHA256` value against `body`.
pub fn verify(key: &str, body: &[u8], signature: &str) -> Result<(), ServerError> {
    let expected = hex::decode(signature.trim())
        .map_err(|_| ServerError::BadRequest("Malformed HashSHA256 header".to_string()))?;
    let mut mac = mac(key)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| ServerError::BadRequest("HashSHA256 mismatch".to_string()))
}

fn header_contains(headers: &HeaderMap, name: header::HeaderName, needle: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.split(',').any(|part| part.trim().starts_with(needle)))
}

pub fn is_gzip_encoded(headers: &HeaderMap) -> bool {
    header_contains(headers, header::CONTENT_ENCODING, "gzip")
}

pub fn accepts_gzip(headers: &HeaderMap) -> bool {
    header_contains(headers, header::ACCEPT_ENCODING, "gzip")
}

/// Decompresses a gzip request body, bounded by `max_len` decompressed bytes.
pub fn decompress(body: &[u8], max_len: usize) -> Result<Bytes, ServerError> {
    let mut decoded = Vec::new();
    GzDecoder::new(body)
        .take(max_len as u64 + 1)
        .read_to_end(&mut decoded)
        .map_err(|e| ServerError::BadRequest(format!("Invalid gzip body: {e}")))?;
    if decoded.len() > max_len {
        return Err(ServerError::PayloadTooLarge);
    }
    Ok(Bytes::from(decoded))
}

/// Request body with transport encoding removed and its signature checked.
///
/// The signature is only enforced when both a key is configured and the
/// client sent one.
pub fn decode_request(
    headers: &HeaderMap,
    body: Bytes,
    key: Option<&str>,
    max_len: usize,
) -> Result<Bytes, ServerError> {
    let body = if is_gzip_encoded(headers) {
        decompress(&body, max_len)?
    } else {
        body
    };

    if let (Some(key), Some(signature)) = (key, headers.get(&HASH_HEADER)) {
        let signature = signature
            .to_str()
            .map_err(|_| ServerError::BadRequest("Malformed HashSHA256 header".to_string()))?;
        verify(key, &body, signature)?;
        debug!("Request signature verified");
    }
    Ok(body)
}

/// Signs and, when the client accepts it, compresses a response.
pub async fn encode_response(response: HttpResponse, key: Option<&str>, gzip: bool) -> HttpResponse {
    let (mut parts, body) = response.into_parts();
    let body = match http_body_util::BodyExt::collect(body).await {
        Ok(collected) => collected.to_bytes(),
        Err(never) => match never {},
    };

    if let Some(key) = key {
        match sign(key, &body).map(|hash| HeaderValue::from_str(&hash)) {
            Ok(Ok(hash)) => {
                parts.headers.insert(HASH_HEADER, hash);
            }
            _ => warn!("Failed to sign response"),
        }
    }

    let compressible = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with(APPLICATION_JSON) || value.starts_with("text/html"));
    if !(gzip && compressible && !body.is_empty()) {
        return HttpResponse::from_parts(parts, Full::new(body));
    }

    match compress(&body) {
        Ok(compressed) => {
            parts
                .headers
                .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            parts.headers.remove(header::CONTENT_LENGTH);
            HttpResponse::from_parts(parts, Full::new(compressed))
        }
        Err(e) => {
            warn!("Failed to compress response: {e}");
            HttpResponse::from_parts(parts, Full::new(body))
        }
    }
}

fn compress(body: &[u8]) -> std::io::Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body)?;
    Ok(Bytes::from(encoder.finish()?))
}
