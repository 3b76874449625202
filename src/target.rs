//! Logical endpoint targets.
//!
//! An [`EndpointTarget`] is supplied when a client is constructed and never
//! changes. Resolution turns it into a concrete address and port on every
//! connect, so the resolved address may differ between reconnects.

use std::fmt;
use std::net::IpAddr;

use http::Uri;

use crate::error::ResolutionError;

/// Identifies an SRV record set as `_service._protocol.<domain>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceRecordSpec {
    service: String,
    protocol: String,
}

impl ServiceRecordSpec {
    /// Create a new spec. Leading underscores are optional.
    pub fn new(service: impl AsRef<str>, protocol: impl AsRef<str>) -> Self {
        Self {
            service: service.as_ref().trim_start_matches('_').to_owned(),
            protocol: protocol.as_ref().trim_start_matches('_').to_owned(),
        }
    }

    /// Shorthand for a TCP service.
    pub fn tcp(service: impl AsRef<str>) -> Self {
        Self::new(service, "tcp")
    }

    /// The service name, without the leading underscore.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The protocol name, without the leading underscore.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// The DNS name to query for this spec under `domain`.
    pub fn query_name(&self, domain: &str) -> String {
        format!(
            "_{}._{}.{}",
            self.service,
            self.protocol,
            domain.trim_end_matches('.')
        )
    }
}

/// The endpoint a client connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointTarget {
    /// A host (literal address or DNS name) and a port.
    Host {
        /// Literal IPv4/IPv6 address, localhost alias, or DNS name.
        host: String,

        /// Port to connect to.
        port: u16,
    },

    /// A domain located through SRV records.
    Service {
        /// The domain the SRV records live under.
        domain: String,

        /// Which SRV records to query.
        service: ServiceRecordSpec,

        /// Port used if the selected SRV record does not provide one.
        fallback_port: Option<u16>,
    },

    /// A URL-style target, optionally located through SRV records.
    Url {
        /// The parsed URL. Its host is required.
        uri: Uri,

        /// SRV records to query under the URL host.
        service: Option<ServiceRecordSpec>,
    },
}

impl EndpointTarget {
    /// A literal IP address and port.
    pub fn address(addr: IpAddr, port: u16) -> Self {
        Self::Host {
            host: addr.to_string(),
            port,
        }
    }

    /// A host name (or literal address) and port.
    pub fn host(host: impl Into<String>, port: u16) -> Self {
        Self::Host {
            host: host.into(),
            port,
        }
    }

    /// A domain located through SRV records.
    pub fn service(domain: impl Into<String>, service: ServiceRecordSpec) -> Self {
        Self::Service {
            domain: domain.into(),
            service,
            fallback_port: None,
        }
    }

    /// A URL target, with an optional SRV spec.
    pub fn url(url: &str, service: Option<ServiceRecordSpec>) -> Result<Self, ResolutionError> {
        let uri: Uri = url
            .parse()
            .map_err(|err: http::uri::InvalidUri| ResolutionError::InvalidTarget(err.to_string()))?;
        if uri.host().is_none() {
            return Err(ResolutionError::InvalidTarget(format!(
                "missing host in {url}"
            )));
        }
        Ok(Self::Url { uri, service })
    }

    /// Set the port used when an SRV target provides none.
    pub fn with_fallback_port(mut self, port: u16) -> Self {
        if let Self::Service { fallback_port, .. } = &mut self {
            *fallback_port = Some(port);
        }
        self
    }

    /// The host name this target names, with IPv6 brackets removed.
    pub fn host_name(&self) -> &str {
        match self {
            Self::Host { host, .. } => host.trim_start_matches('[').trim_end_matches(']'),
            Self::Service { domain, .. } => domain,
            Self::Url { uri, .. } => uri
                .host()
                .unwrap_or_default()
                .trim_start_matches('[')
                .trim_end_matches(']'),
        }
    }

    /// The SRV spec, if this target is located through service records.
    pub fn service_spec(&self) -> Option<&ServiceRecordSpec> {
        match self {
            Self::Host { .. } => None,
            Self::Service { service, .. } => Some(service),
            Self::Url { service, .. } => service.as_ref(),
        }
    }

    /// The port stated explicitly by a host target or URL.
    pub fn explicit_port(&self) -> Option<u16> {
        match self {
            Self::Host { port, .. } => Some(*port),
            Self::Service { .. } => None,
            Self::Url { uri, .. } => uri.port_u16(),
        }
    }

    /// The statically configured port, used when nothing better is available.
    ///
    /// For URLs this is the default port of a well-known scheme.
    pub fn static_port(&self) -> Option<u16> {
        match self {
            Self::Host { port, .. } => Some(*port),
            Self::Service { fallback_port, .. } => *fallback_port,
            Self::Url { uri, .. } => match uri.scheme_str() {
                Some("http") | Some("ws") => Some(80),
                Some("https") | Some("wss") => Some(443),
                _ => None,
            },
        }
    }

    /// The hostname declared by the target for identity checks.
    ///
    /// This is the URL host, when it is a name rather than a literal address.
    pub fn declared_hostname(&self) -> Option<&str> {
        match self {
            Self::Url { .. } => {
                let host = self.host_name();
                (!host.is_empty() && host.parse::<IpAddr>().is_err()).then_some(host)
            }
            _ => None,
        }
    }

    /// Whether the target's scheme implies an encrypted channel.
    pub fn implies_secure(&self) -> bool {
        match self {
            Self::Url { uri, .. } => uri.scheme_str().is_some_and(is_secure_scheme),
            _ => false,
        }
    }
}

pub(crate) fn is_secure_scheme(scheme: &str) -> bool {
    matches!(
        scheme.to_ascii_lowercase().as_str(),
        "https" | "wss" | "tls" | "ssl" | "secure"
    )
}

impl fmt::Display for EndpointTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host { host, port } if host.contains(':') && !host.starts_with('[') => {
                write!(f, "[{host}]:{port}")
            }
            Self::Host { host, port } => write!(f, "{host}:{port}"),
            Self::Service {
                domain, service, ..
            } => f.write_str(&service.query_name(domain)),
            Self::Url {
                uri,
                service: Some(service),
            } => write!(f, "{uri} ({})", service.query_name(self.host_name())),
            Self::Url { uri, service: None } => write!(f, "{uri}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv6Addr;

    use super::*;

    #[test]
    fn query_name() {
        let spec = ServiceRecordSpec::new("_echo", "_tcp");
        assert_eq!(spec.query_name("example.com."), "_echo._tcp.example.com");
        assert_eq!(
            ServiceRecordSpec::tcp("xmpp").query_name("example.org"),
            "_xmpp._tcp.example.org"
        );
    }

    #[test]
    fn url_ports() {
        let target = EndpointTarget::url("https://example.com", None).unwrap();
        assert_eq!(target.explicit_port(), None);
        assert_eq!(target.static_port(), Some(443));
        assert!(target.implies_secure());
        assert_eq!(target.declared_hostname(), Some("example.com"));

        let target = EndpointTarget::url("ws://example.com:9000/chat", None).unwrap();
        assert_eq!(target.explicit_port(), Some(9000));
        assert!(!target.implies_secure());

        let target = EndpointTarget::url("grpc://example.com", None).unwrap();
        assert_eq!(target.static_port(), None);
    }

    #[test]
    fn url_requires_host() {
        assert!(EndpointTarget::url("/just/a/path", None).is_err());
    }

    #[test]
    fn ipv6_url_host() {
        let target = EndpointTarget::url("wss://[::1]:8443", None).unwrap();
        assert_eq!(target.host_name(), "::1");
        assert_eq!(target.declared_hostname(), None);
        assert!(target.implies_secure());
    }

    #[test]
    fn display() {
        let target = EndpointTarget::address(Ipv6Addr::LOCALHOST.into(), 7);
        assert_eq!(target.to_string(), "[::1]:7");

        let target = EndpointTarget::service("example.com", ServiceRecordSpec::tcp("echo"));
        assert_eq!(target.to_string(), "_echo._tcp.example.com");
    }

    #[test]
    fn fallback_port_only_applies_to_services() {
        let target = EndpointTarget::service("example.com", ServiceRecordSpec::tcp("echo"))
            .with_fallback_port(7);
        assert_eq!(target.static_port(), Some(7));

        let target = EndpointTarget::host("example.com", 9).with_fallback_port(7);
        assert_eq!(target.static_port(), Some(9));
    }
}
