//! Identity propagation onto forwarded requests.
//!
//! Upstreams trust `X-User-ID` and `X-User-Email` as set by the gateway, so
//! whatever the client sent under those names is always removed first.

use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::auth::IdentityClaim;

/// Header carrying the verified subject identifier.
pub static HEADER_USER_ID: HeaderName = HeaderName::from_static("x-user-id");

/// Header carrying the verified email.
pub static HEADER_USER_EMAIL: HeaderName = HeaderName::from_static("x-user-email");

/// Replace identity headers on an outbound request.
///
/// With `Some(claim)` both headers are set from the claim; with `None` both
/// are absent afterwards. No other header is touched.
pub fn propagate_identity(headers: &mut HeaderMap, claim: Option<&IdentityClaim>) {
    headers.remove(&HEADER_USER_ID);
    headers.remove(&HEADER_USER_EMAIL);

    let Some(claim) = claim else {
        return;
    };

    headers.insert(HEADER_USER_ID.clone(), HeaderValue::from(claim.subject()));
    // The verifier rejects control characters, so this only fails on
    // bytes a header cannot carry at all; the email is then omitted.
    if let Ok(email) = HeaderValue::from_bytes(claim.email().as_bytes()) {
        headers.insert(HEADER_USER_EMAIL.clone(), email);
    }
}
