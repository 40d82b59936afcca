use std::convert::Infallible;

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};

/// Scheme and host of the current request, used to turn server paths into
/// absolute URLs. Without a `Host` header links stay relative.
#[derive(Debug, Clone, Default)]
pub struct RequestBase {
    origin: Option<String>,
}

impl RequestBase {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|h| !h.is_empty());

        let scheme = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').next().unwrap_or(v).trim())
            .filter(|s| *s == "http" || *s == "https")
            .unwrap_or("http");

        Self {
            origin: host.map(|host| format!("{scheme}://{host}")),
        }
    }

    /// `path` must start with `/`.
    pub fn absolute(&self, path: &str) -> String {
        match &self.origin {
            Some(origin) => format!("{origin}{path}"),
            None => path.to_string(),
        }
    }
}

impl<S> FromRequestParts<S> for RequestBase
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

/// Join the media URL prefix and a storage-relative path.
pub fn media_path(media_url: &str, file: &str) -> String {
    format!("{}/{}", media_url.trim_end_matches('/'), file.trim_start_matches('/'))
}
