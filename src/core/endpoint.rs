//! Endpoint allow-listing for external S3-compatible destinations.
//!
//! Adapters check endpoints here before the first request, so a malformed
//! or unexpected endpoint never causes network I/O.
//!
//! Patterns are matched against the endpoint's origin (`scheme://host[:port]`)
//! rebuilt from the parsed URL. Endpoints carrying a path, query, fragment or
//! credentials are refused before any pattern is tried.

use regex::Regex;
use reqwest::Url;
use std::sync::LazyLock;

/// Endpoint pattern accepted when no allow-list is configured.
pub const DEFAULT_ENDPOINT_PATTERN: &str = r"^https?://.+\.idrivee2\.com$";

/// Region used when the endpoint does not encode one.
pub const DEFAULT_REGION: &str = "us-east-1";

static REGION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"s3\.([^.]+)\.idrivee2").expect("static regex"));

static BUCKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{1,61}[a-z0-9]$").expect("static regex"));

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("endpoint is empty")]
    Empty,

    #[error("endpoint is not a valid URL")]
    Malformed,

    #[error("endpoint is not on the allow-list")]
    NotAllowed,

    #[error("invalid bucket name")]
    InvalidBucket,
}

/// Compiled allow-list of endpoint patterns.
#[derive(Debug, Clone)]
pub struct EndpointPolicy {
    patterns: Vec<Regex>,
}

impl Default for EndpointPolicy {
    fn default() -> Self {
        Self {
            patterns: vec![Regex::new(DEFAULT_ENDPOINT_PATTERN).expect("static regex")],
        }
    }
}

impl EndpointPolicy {
    /// Compile a policy from configured patterns. An empty list means the default pattern.
    pub fn from_patterns(patterns: &[String]) -> Result<Self, regex::Error> {
        if patterns.is_empty() {
            return Ok(Self::default());
        }

        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    /// Check an already-normalized endpoint against the allow-list.
    pub fn check(&self, endpoint: &str) -> Result<(), EndpointError> {
        if endpoint.trim().is_empty() {
            return Err(EndpointError::Empty);
        }

        let origin = endpoint_origin(endpoint)?;
        if self.patterns.iter().any(|re| re.is_match(&origin)) {
            Ok(())
        } else {
            Err(EndpointError::NotAllowed)
        }
    }
}

/// `scheme://host[:port]` of a bare endpoint URL.
fn endpoint_origin(endpoint: &str) -> Result<String, EndpointError> {
    let url = Url::parse(endpoint).map_err(|_| EndpointError::Malformed)?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(EndpointError::NotAllowed);
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(EndpointError::NotAllowed);
    }
    if !matches!(url.path(), "" | "/") || url.query().is_some() || url.fragment().is_some() {
        return Err(EndpointError::NotAllowed);
    }

    let host = url.host_str().ok_or(EndpointError::Malformed)?;
    Ok(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

/// Trim, default the scheme to https, and drop trailing slashes.
pub fn normalize_endpoint(raw: &str) -> String {
    let trimmed = raw.trim();
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    with_scheme.trim_end_matches('/').to_string()
}

/// Region for an endpoint: explicit value wins, then `s3.<region>.idrivee2`, then the default.
pub fn region_for(endpoint: &str, explicit: Option<&str>) -> String {
    if let Some(region) = explicit.map(str::trim).filter(|r| !r.is_empty()) {
        return region.to_string();
    }

    REGION_RE
        .captures(endpoint)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| DEFAULT_REGION.to_string())
}

pub fn check_bucket(bucket: &str) -> Result<(), EndpointError> {
    if BUCKET_RE.is_match(bucket) {
        Ok(())
    } else {
        Err(EndpointError::InvalidBucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_accepts_idrive_endpoints() {
        let policy = EndpointPolicy::default();
        assert!(policy.check("https://s3.us-west-1.idrivee2.com").is_ok());
        assert!(policy.check("http://x.idrivee2.com").is_ok());
    }

    #[test]
    fn default_policy_rejects_other_hosts() {
        let policy = EndpointPolicy::default();
        assert_eq!(
            policy.check("https://evil.example.com"),
            Err(EndpointError::NotAllowed)
        );
        assert_eq!(
            policy.check("https://s3.idrivee2.com.evil.net"),
            Err(EndpointError::NotAllowed)
        );
        assert_eq!(policy.check("  "), Err(EndpointError::Empty));
    }

    #[test]
    fn only_the_host_can_satisfy_a_pattern() {
        let policy = EndpointPolicy::default();
        for endpoint in [
            "https://evil.example.com/.idrivee2.com",
            "https://evil.example.com/x.idrivee2.com",
            "https://evil.example.com?x.idrivee2.com",
            "https://evil.example.com/?q=.idrivee2.com",
            "https://evil.example.com#x.idrivee2.com",
            "https://s3.idrivee2.com@evil.example.com",
            "https://user:pw@s3.us-west-1.idrivee2.com",
            "https://evil.example.com\\.idrivee2.com",
        ] {
            assert_eq!(policy.check(endpoint), Err(EndpointError::NotAllowed), "{endpoint}");
        }
    }

    #[test]
    fn unparseable_endpoint_is_malformed() {
        let policy = EndpointPolicy::default();
        assert_eq!(policy.check("https://"), Err(EndpointError::Malformed));
        assert_eq!(policy.check("not a url"), Err(EndpointError::Malformed));
    }

    #[test]
    fn custom_patterns_replace_default() {
        let policy =
            EndpointPolicy::from_patterns(&[r"^https://minio\.internal:9000$".to_string()])
                .unwrap();
        assert!(policy.check("https://minio.internal:9000").is_ok());
        assert!(policy.check("https://s3.eu.idrivee2.com").is_err());
    }

    #[test]
    fn invalid_pattern_is_reported() {
        assert!(EndpointPolicy::from_patterns(&["(".to_string()]).is_err());
    }

    #[test]
    fn normalize_adds_scheme_and_strips_slash() {
        assert_eq!(
            normalize_endpoint(" s3.ca.idrivee2.com/ "),
            "https://s3.ca.idrivee2.com"
        );
        assert_eq!(
            normalize_endpoint("http://s3.ca.idrivee2.com"),
            "http://s3.ca.idrivee2.com"
        );
    }

    #[test]
    fn region_extraction() {
        assert_eq!(region_for("https://s3.eu-central-2.idrivee2.com", None), "eu-central-2");
        assert_eq!(region_for("https://abc.idrivee2.com", None), "us-east-1");
        assert_eq!(region_for("https://s3.x.idrivee2.com", Some("ap-1")), "ap-1");
    }

    #[test]
    fn bucket_rule() {
        assert!(check_bucket("my-bucket-01").is_ok());
        assert!(check_bucket("My_Bucket").is_err());
        assert!(check_bucket("-bad").is_err());
        assert!(check_bucket("ab").is_err());
    }
}
