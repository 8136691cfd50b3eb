//! Caller IP discovery
//!
//! The administrative firewall rules are scoped to the address the operator
//! runs from. The address comes from a plain-text "what is my IP" service or
//! from `--caller-ip`; there is no fallback to an open rule.

use crate::config::DiscoveryConfig;
use declarative::{Error, Result};
use std::net::Ipv4Addr;
use std::time::Duration;

const USER_AGENT: &str = concat!("tierform/", env!("CARGO_PKG_VERSION"));

/// Largest body accepted from the discovery service
const MAX_BODY: u64 = 1024;

/// Parse a discovery response body: a single IPv4 address
pub fn parse_caller_ip(body: &str) -> Result<Ipv4Addr> {
    let trimmed = body.trim();
    trimmed.parse::<Ipv4Addr>().map_err(|_| {
        let shown: String = trimmed.chars().take(64).collect();
        Error::validation(format!(
            "caller IP discovery returned {shown:?}, which is not an IPv4 address"
        ))
    })
}

/// Query the discovery service
pub fn discover(config: &DiscoveryConfig) -> Result<Ipv4Addr> {
    log::debug!("Discovering caller IP via {}", config.url);

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(Duration::from_secs(config.timeout_secs.max(1))))
        .build()
        .into();

    let failed = |e: ureq::Error| {
        Error::validation(format!(
            "caller IP discovery via {} failed: {e}",
            config.url
        ))
    };

    let mut response = agent
        .get(&config.url)
        .header("User-Agent", USER_AGENT)
        .call()
        .map_err(failed)?;
    let body = response
        .body_mut()
        .with_config()
        .limit(MAX_BODY)
        .read_to_string()
        .map_err(failed)?;

    let ip = parse_caller_ip(&body)?;
    log::info!("Discovered caller IP {ip}");
    Ok(ip)
}

/// The caller address: the override when given, otherwise discovered
pub fn caller_ip(override_ip: Option<&str>, config: &DiscoveryConfig) -> Result<Ipv4Addr> {
    match override_ip {
        Some(raw) => {
            let ip = raw.trim().parse::<Ipv4Addr>().map_err(|_| {
                Error::validation(format!("--caller-ip {raw:?} is not an IPv4 address"))
            })?;
            log::debug!("Using caller IP override {ip}");
            Ok(ip)
        }
        None => discover(config),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use declarative::ErrorCategory;
    use tokio::runtime::Runtime;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// A mock HTTP server driven from blocking tests
    pub(crate) struct MockApi {
        server: MockServer,
        runtime: Runtime,
    }

    impl MockApi {
        pub(crate) fn start() -> Self {
            let runtime = Runtime::new().unwrap();
            let server = runtime.block_on(MockServer::start());
            Self { server, runtime }
        }

        pub(crate) fn uri(&self) -> String {
            self.server.uri()
        }

        pub(crate) fn mount(&self, mock: Mock) {
            self.runtime.block_on(mock.mount(&self.server));
        }
    }

    fn discovery(url: String) -> DiscoveryConfig {
        DiscoveryConfig {
            url,
            timeout_secs: 2,
        }
    }

    #[test]
    fn test_parse_caller_ip() {
        assert_eq!(
            parse_caller_ip("203.0.113.7\n").unwrap(),
            Ipv4Addr::new(203, 0, 113, 7)
        );
        for body in ["", "2001:db8::1", "<html>blocked</html>", "203.0.113"] {
            let err = parse_caller_ip(body).unwrap_err();
            assert_eq!(err.category(), ErrorCategory::ConfigValidation);
        }
    }

    #[test]
    fn test_override_skips_discovery() {
        let config = discovery("http://127.0.0.1:9".to_string());
        let ip = caller_ip(Some(" 198.51.100.4 "), &config).unwrap();
        assert_eq!(ip, Ipv4Addr::new(198, 51, 100, 4));
        assert!(caller_ip(Some("example.com"), &config).is_err());
    }

    #[test]
    fn test_discover_from_service() {
        let api = MockApi::start();
        api.mount(
            Mock::given(method("GET"))
                .and(path("/ip"))
                .respond_with(ResponseTemplate::new(200).set_body_string("192.0.2.10\n")),
        );
        assert_eq!(
            discover(&discovery(format!("{}/ip", api.uri()))).unwrap(),
            Ipv4Addr::new(192, 0, 2, 10)
        );
    }

    #[test]
    fn test_discovery_failures_are_validation_errors() {
        let api = MockApi::start();
        api.mount(
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(200).set_body_string("not an address"))
                .up_to_n_times(1),
        );
        api.mount(
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(503).set_body_string("unavailable")),
        );
        let config = discovery(api.uri());
        for _ in 0..2 {
            let err = discover(&config).unwrap_err();
            assert_eq!(err.category(), ErrorCategory::ConfigValidation);
        }
    }
}
