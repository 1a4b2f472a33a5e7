use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use tracing::{debug, warn};

use crate::api::state::AppState;

pub const API_VERSION_HEADER: &str = "X-Broker-Api-Version";

/// Parse `<major>.<minor>` from the version header.
pub fn extract_version(headers: &HeaderMap) -> std::result::Result<(u32, u32), (StatusCode, String)> {
    let mut values = headers.get_all(API_VERSION_HEADER).iter();
    let (Some(raw), None) = (values.next(), values.next()) else {
        return Err((
            StatusCode::BAD_REQUEST,
            "Missing Broker API version".to_string(),
        ));
    };

    let invalid = || (StatusCode::BAD_REQUEST, "Invalid Broker API version".to_string());
    let raw = raw.to_str().map_err(|_| invalid())?;
    let (major, minor) = raw.trim().split_once('.').ok_or_else(invalid)?;
    let major = major.parse::<u32>().map_err(|_| invalid())?;
    let minor = minor.parse::<u32>().map_err(|_| invalid())?;
    Ok((major, minor))
}

/// Decode `Authorization: Basic <base64(user:pass)>`.
pub fn extract_credentials(
    headers: &HeaderMap,
) -> std::result::Result<(String, String), (StatusCode, String)> {
    let unauthorized = |msg: &str| (StatusCode::UNAUTHORIZED, msg.to_string());

    let raw = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| unauthorized("Unauthorized access"))?;
    let encoded = raw
        .strip_prefix("Basic ")
        .ok_or_else(|| unauthorized("Unsupported authentication method"))?;
    let decoded = BASE64_STANDARD
        .decode(encoded.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| unauthorized("Unable to decode 'Authorization' header"))?;
    let (user, pass) = decoded
        .split_once(':')
        .ok_or_else(|| unauthorized("Missing credentials"))?;
    Ok((user.to_string(), pass.to_string()))
}

pub fn ensure_authorized(
    headers: &HeaderMap,
    username: &str,
    password: &str,
) -> std::result::Result<(), (StatusCode, String)> {
    let (user, pass) = extract_credentials(headers)?;
    if user != username || pass != password {
        warn!(user = %user, "rejected broker credentials");
        return Err((
            StatusCode::UNAUTHORIZED,
            format!("Invalid Credentials for :{}", user),
        ));
    }
    Ok(())
}

/// Version check first, then basic auth, for every route.
pub async fn require_broker_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let headers = request.headers();
    let (major, minor) = match extract_version(headers) {
        Ok(version) => version,
        Err(rejection) => return rejection.into_response(),
    };
    debug!(major, minor, method = %request.method(), uri = %request.uri(), "broker request");

    if let Err(rejection) = ensure_authorized(headers, &state.username, &state.password) {
        return rejection.into_response();
    }
    next.run(request).await
}
