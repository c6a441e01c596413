//! Builds outbound message headers from an inbound HTTP request.

use courier_core::headers::{HDR_IDENTITY, HDR_REQUEST_ID, HDR_TYPE, REQUEST_ID_LEN};
use courier_core::{EventType, HeaderSet};
use http::HeaderMap;
use rand::distr::Alphanumeric;
use rand::Rng;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("expected a value for 'X-Rh-Identity' http header")]
    MissingIdentity,
}

/// Produces the header set for a message of type `event`.
///
/// The identity header is copied from the request and must be present. The
/// request id is copied when present and non-empty, otherwise a fresh
/// alphanumeric token is generated. The `Type` header always comes from
/// `event`, never from the request.
///
/// # Errors
///
/// [`HeaderError::MissingIdentity`] when the request carries no identity.
pub fn headers_from_request(inbound: &HeaderMap, event: EventType) -> Result<HeaderSet, HeaderError> {
    let identity = inbound
        .get(HDR_IDENTITY)
        .map(http::HeaderValue::as_bytes)
        .filter(|value| !value.is_empty())
        .ok_or(HeaderError::MissingIdentity)?;

    let request_id = inbound
        .get(HDR_REQUEST_ID)
        .map(http::HeaderValue::as_bytes)
        .filter(|value| !value.is_empty())
        .map_or_else(|| new_request_id().into_bytes(), <[u8]>::to_vec);

    let mut headers = HeaderSet::new();
    headers.push(HDR_TYPE, event.as_str());
    headers.push(HDR_IDENTITY, identity);
    headers.push(HDR_REQUEST_ID, request_id);
    Ok(headers)
}

/// Random alphanumeric correlation id of [`REQUEST_ID_LEN`] characters.
#[must_use]
pub fn new_request_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(REQUEST_ID_LEN)
        .map(char::from)
        .collect()
}
