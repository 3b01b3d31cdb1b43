//! URL canonicalization.
//!
//! The canonical form defines registry uniqueness and per-host grouping, so
//! it favors stability over aggressiveness: no query reordering, no
//! percent-encoding normalization.

use thiserror::Error;
use url::Url;

/// Rejection reasons for a raw URL.
#[derive(Error, Debug)]
pub enum CanonError {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported scheme: {0}")]
    InvalidScheme(String),
}

/// Normalize a raw URL to its comparison-stable form.
///
/// Lowercases the scheme and host, strips the scheme-default port, drops the
/// fragment, and removes trailing slashes from the path. Userinfo, query,
/// non-default ports, and path casing are preserved verbatim. Only `http`
/// and `https` are accepted.
pub fn canonicalize(raw: &str) -> Result<String, CanonError> {
    let url = Url::parse(raw)?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(CanonError::InvalidScheme(other.to_string())),
    }

    // The url crate already lowercases scheme and host and drops the
    // scheme-default port during parsing.
    let host = url.host_str().ok_or(url::ParseError::EmptyHost)?;

    let mut out = format!("{}://", url.scheme());
    if !url.username().is_empty() || url.password().is_some() {
        out.push_str(url.username());
        if let Some(password) = url.password() {
            out.push(':');
            out.push_str(password);
        }
        out.push('@');
    }
    out.push_str(host);
    if let Some(port) = url.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(url.path().trim_end_matches('/'));
    if let Some(query) = url.query() {
        out.push('?');
        out.push_str(query);
    }
    Ok(out)
}

/// Lowercase canonical host of a URL, or empty if it cannot be parsed.
///
/// Used for per-host probe grouping and the stored host column.
pub fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .unwrap_or_default()
}
