use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur during endpoint URL validation.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// Plain http to a non-loopback host.
    #[error("Insecure URL: HTTPS required for {0} (plain http only allowed for localhost)")]
    Insecure(String),
}

/// Validates a remote endpoint (feed or publisher list) from configuration.
///
/// Accepts `https://` URLs for any host. Plain `http://` is accepted only for
/// loopback hosts (`localhost`, `127.0.0.0/8`, `::1`), which covers local
/// mirrors and test servers without allowing cleartext fetches elsewhere.
///
/// # Examples
///
/// ```
/// use today_feed::util::validate_endpoint;
///
/// assert!(validate_endpoint("https://cdn.example.com/feed.json").is_ok());
/// assert!(validate_endpoint("http://127.0.0.1:8080/feed.json").is_ok());
/// assert!(validate_endpoint("http://cdn.example.com/feed.json").is_err());
/// assert!(validate_endpoint("file:///etc/passwd").is_err());
/// ```
pub fn validate_endpoint(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;

    let https = match url.scheme() {
        "https" => true,
        "http" => false,
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    };

    let host = url.host_str().ok_or(UrlValidationError::MissingHost)?;
    if !https && !is_loopback_host(host) {
        return Err(UrlValidationError::Insecure(host.to_owned()));
    }

    Ok(url)
}

fn is_loopback_host(host: &str) -> bool {
    if host == "localhost" {
        return true;
    }

    // Strip brackets from IPv6 addresses for parsing
    let host_for_parse = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    host_for_parse
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}
