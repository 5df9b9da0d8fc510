use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur while validating an instance URL.
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
    /// The URL points to a private/internal IP address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    /// The URL points to localhost.
    #[error("Localhost not allowed")]
    Localhost,
}

/// Validates a string naming a Nitter instance base URL.
///
/// The URL must parse, use `http` or `https`, and carry a host. When
/// `allow_private` is false (instances scraped from a remote directory page),
/// localhost and private/link-local addresses are rejected as well so that a
/// tampered directory cannot point the proxy at internal services.
///
/// # Examples
///
/// ```
/// use nitter_rss_proxy::util::validate_instance_url;
///
/// let url = validate_instance_url("https://nitter.example.org", false).unwrap();
/// assert_eq!(url.host_str(), Some("nitter.example.org"));
///
/// assert!(validate_instance_url("http://127.0.0.1:8080", false).is_err());
/// assert!(validate_instance_url("http://127.0.0.1:8080", true).is_ok());
/// assert!(validate_instance_url("ftp://example.org", true).is_err());
/// ```
pub fn validate_instance_url(url_str: &str, allow_private: bool) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    let host = url.host_str().ok_or(UrlValidationError::MissingHost)?;
    if host.is_empty() {
        return Err(UrlValidationError::MissingHost);
    }

    if !allow_private {
        if host == "localhost" {
            return Err(UrlValidationError::Localhost);
        }

        // Strip brackets from IPv6 addresses for parsing
        let host_for_parse = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if let Ok(ip) = host_for_parse.parse::<IpAddr>() {
            if ip.is_loopback() {
                return Err(UrlValidationError::Localhost);
            }
            if is_private_ip(&ip) {
                return Err(UrlValidationError::PrivateIp(ip.to_string()));
            }
        }
    }

    Ok(url)
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private() || ipv4.is_link_local() || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_unspecified() {
                return true;
            }
            let segments = ipv6.segments();
            // Unique Local (fc00::/7)
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            // Link-Local (fe80::/10)
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            is_unique_local || is_link_local
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_instances_accepted() {
        assert!(validate_instance_url("https://nitter.net", false).is_ok());
        assert!(validate_instance_url("http://nitter.example.org/prefix", false).is_ok());
        assert!(validate_instance_url("  https://twiiit.com  ", false).is_ok());
    }

    #[test]
    fn test_invalid_schemes() {
        assert!(matches!(
            validate_instance_url("file:///etc/passwd", true),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
        assert!(validate_instance_url("ftp://example.com", true).is_err());
    }

    #[test]
    fn test_relative_url_rejected() {
        assert!(matches!(
            validate_instance_url("nitter.net", true),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_localhost_rejected_unless_allowed() {
        assert!(validate_instance_url("http://localhost:8080", false).is_err());
        assert!(validate_instance_url("http://127.0.0.1/", false).is_err());
        assert!(validate_instance_url("http://[::1]/", false).is_err());
        assert!(validate_instance_url("http://localhost:8080", true).is_ok());
    }

    #[test]
    fn test_private_ips_rejected_unless_allowed() {
        assert!(validate_instance_url("http://192.168.1.1", false).is_err());
        assert!(validate_instance_url("http://10.0.0.1:3000", false).is_err());
        assert!(validate_instance_url("http://169.254.1.1", false).is_err());
        assert!(validate_instance_url("http://[fe80::1]/", false).is_err());
        assert!(validate_instance_url("http://0.0.0.0/", false).is_err());
        assert!(validate_instance_url("http://10.0.0.1:3000", true).is_ok());
    }
}
