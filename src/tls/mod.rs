//! Secure-channel upgrade.
//!
//! [`TlsOptions`] describes the policy for the handshake: which server
//! identities to trust, which client identity to present, protocol versions,
//! cipher suites and ALPN. [`upgrade`] runs the handshake over an established
//! stream and returns the secured stream. A failed handshake drops (and so
//! closes) the underlying transport, so a connection is never left
//! half-secured.
//!
//! [`TlsOptions::default`] validates servers against the platform's root
//! certificates. Accepting any server identity is only available through
//! [`TlsOptions::diagnostic`] or an explicit [`TrustPolicy::accept_any`].

use std::fmt;
use std::sync::Arc;

use rustls::client::Resumption;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, SupportedProtocolVersion};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;

use crate::error::Error;
use crate::resolve::ResolvedEndpoint;
use crate::target::EndpointTarget;

mod identity;
mod trust;

pub use self::identity::{IdentitySelector, StaticIdentity};
pub use self::trust::{AcceptAnyServer, PeerIdentity, PredicateTrust, ServerTrust, TrustPolicy};

/// TLS protocol versions which can be enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsVersion {
    /// TLS 1.2
    Tls12,

    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    fn supported(self) -> &'static SupportedProtocolVersion {
        match self {
            TlsVersion::Tls12 => &rustls::version::TLS12,
            TlsVersion::Tls13 => &rustls::version::TLS13,
        }
    }
}

/// The crypto provider used for client connections.
///
/// The process-wide default is used if one is installed, otherwise the
/// provider selected by the `tls-ring` or `tls-aws-lc` feature.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    if let Some(provider) = CryptoProvider::get_default() {
        return provider.clone();
    }

    #[cfg(feature = "tls-ring")]
    {
        Arc::new(rustls::crypto::ring::default_provider())
    }

    #[cfg(all(feature = "tls-aws-lc", not(feature = "tls-ring")))]
    {
        Arc::new(rustls::crypto::aws_lc_rs::default_provider())
    }

    #[cfg(not(any(feature = "tls-ring", feature = "tls-aws-lc")))]
    {
        compile_error!("one of the `tls-ring` or `tls-aws-lc` features must be enabled")
    }
}

/// Secure-channel policy.
#[derive(Clone)]
pub struct TlsOptions {
    /// Always upgrade, even when the target's scheme does not imply TLS.
    pub enforce: bool,

    /// How the server's identity is validated.
    pub trust: TrustPolicy,

    /// Client identity presented when the server requests one.
    pub identity: Option<Arc<dyn IdentitySelector>>,

    /// Enabled protocol versions.
    pub versions: Vec<TlsVersion>,

    /// Allowed cipher suite names (e.g. `TLS13_AES_128_GCM_SHA256`).
    ///
    /// `None` allows every suite of the crypto provider.
    pub cipher_suites: Option<Vec<String>>,

    /// Application protocols to offer, in preference order.
    pub alpn: Vec<Vec<u8>>,

    /// Name to use for identity checks instead of the one derived from the target.
    pub server_name: Option<String>,

    /// Resume sessions across reconnects.
    pub session_resumption: bool,

    /// Allow renegotiation. rustls never renegotiates, so this only
    /// produces a warning when set.
    pub allow_renegotiation: bool,
}

impl fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsOptions")
            .field("enforce", &self.enforce)
            .field("trust", &self.trust)
            .field("identity", &self.identity.is_some())
            .field("versions", &self.versions)
            .field("cipher_suites", &self.cipher_suites)
            .field("alpn", &self.alpn)
            .field("server_name", &self.server_name)
            .finish()
    }
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            enforce: false,
            trust: TrustPolicy::Platform,
            identity: None,
            versions: vec![TlsVersion::Tls13, TlsVersion::Tls12],
            cipher_suites: None,
            alpn: Vec::new(),
            server_name: None,
            session_resumption: true,
            allow_renegotiation: false,
        }
    }
}

impl TlsOptions {
    /// Options for diagnostics against servers whose identity is irrelevant.
    ///
    /// TLS is enforced and every server certificate is accepted. This is
    /// unsafe anywhere authentication matters.
    pub fn diagnostic() -> Self {
        tracing::warn!("tls configured to accept any server identity");
        Self {
            enforce: true,
            trust: TrustPolicy::accept_any(),
            ..Default::default()
        }
    }

    /// Options which always upgrade, trusting servers per `trust`.
    pub fn enforced(trust: TrustPolicy) -> Self {
        Self {
            enforce: true,
            trust,
            ..Default::default()
        }
    }

    /// Whether a connection to `target` should be upgraded.
    pub fn applies_to(&self, target: &EndpointTarget) -> bool {
        self.enforce || target.implies_secure()
    }

    /// Build the rustls client configuration.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>, Error> {
        let mut provider = (*crypto_provider()).clone();
        if let Some(allowed) = &self.cipher_suites {
            provider.cipher_suites.retain(|suite| {
                let name = format!("{:?}", suite.suite());
                allowed.iter().any(|allowed| allowed.eq_ignore_ascii_case(&name))
            });
        }
        let provider = Arc::new(provider);

        let versions: Vec<&'static SupportedProtocolVersion> =
            self.versions.iter().map(|v| v.supported()).collect();

        let verifier = self.trust.verifier(provider.clone())?;

        let builder = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&versions)
            .map_err(Error::TlsConfig)?
            .dangerous()
            .with_custom_certificate_verifier(verifier);

        let mut config = match &self.identity {
            Some(selector) => builder.with_client_cert_resolver(Arc::new(
                identity::SelectorResolver(selector.clone()),
            )),
            None => builder.with_no_client_auth(),
        };

        config.alpn_protocols = self.alpn.clone();
        if !self.session_resumption {
            config.resumption = Resumption::disabled();
        }
        if self.allow_renegotiation {
            tracing::warn!("renegotiation requested but not supported; ignoring");
        }

        Ok(Arc::new(config))
    }

    /// The name used for identity checks.
    ///
    /// In order: the explicit override, the name the target declares, the
    /// name used for the DNS lookup, and finally the resolved IP address.
    pub fn server_name_for(&self, target: &EndpointTarget, endpoint: &ResolvedEndpoint) -> String {
        self.server_name
            .clone()
            .or_else(|| target.declared_hostname().map(str::to_owned))
            .or_else(|| endpoint.lookup_name.clone())
            .unwrap_or_else(|| endpoint.ip().to_string())
    }
}

/// Negotiate TLS over `stream`, checking the server against `server_name`.
///
/// On failure `stream` is dropped, closing the transport.
pub async fn upgrade<IO>(
    stream: IO,
    server_name: &str,
    config: Arc<ClientConfig>,
) -> Result<TlsStream<IO>, Error>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let name = ServerName::try_from(server_name.to_owned())
        .map_err(|_| Error::InvalidServerName(server_name.to_owned()))?;

    tracing::trace!(server.name = %server_name, "tls handshake starting");
    let stream = tokio_rustls::TlsConnector::from(config)
        .connect(name, stream)
        .await
        .map_err(Error::Handshake)?;
    tracing::trace!(server.name = %server_name, "tls handshake complete");

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddr};

    use super::*;

    fn endpoint(lookup_name: Option<&str>) -> ResolvedEndpoint {
        ResolvedEndpoint {
            addr: SocketAddr::new(Ipv4Addr::new(192, 0, 2, 7).into(), 443),
            lookup_name: lookup_name.map(str::to_owned),
        }
    }

    #[test]
    fn server_name_priority() {
        let options = TlsOptions::default();
        let url = EndpointTarget::url("wss://echo.example.com/socket", None).unwrap();
        assert_eq!(
            options.server_name_for(&url, &endpoint(Some("node1.example.com"))),
            "echo.example.com"
        );

        let host = EndpointTarget::host("echo.example.com", 7);
        assert_eq!(
            options.server_name_for(&host, &endpoint(Some("echo.example.com"))),
            "echo.example.com"
        );

        let literal = EndpointTarget::host("192.0.2.7", 443);
        assert_eq!(options.server_name_for(&literal, &endpoint(None)), "192.0.2.7");

        let options = TlsOptions {
            server_name: Some("override.test".into()),
            ..Default::default()
        };
        assert_eq!(options.server_name_for(&url, &endpoint(None)), "override.test");
    }

    #[test]
    fn applies_to_secure_schemes() {
        let options = TlsOptions::default();
        assert!(options.applies_to(&EndpointTarget::url("wss://a.test", None).unwrap()));
        assert!(options.applies_to(&EndpointTarget::url("https://a.test", None).unwrap()));
        assert!(!options.applies_to(&EndpointTarget::url("ws://a.test", None).unwrap()));
        assert!(!options.applies_to(&EndpointTarget::host("a.test", 7)));
        assert!(TlsOptions::diagnostic().applies_to(&EndpointTarget::host("a.test", 7)));
    }

    #[test]
    fn default_config_offers_both_versions() {
        let options = TlsOptions::enforced(TrustPolicy::accept_any());
        let offered: Vec<_> = options.versions.iter().map(|v| v.supported().version).collect();
        assert_eq!(
            offered,
            vec![rustls::ProtocolVersion::TLSv1_3, rustls::ProtocolVersion::TLSv1_2]
        );
        assert!(options.client_config().is_ok());
    }

    #[test]
    fn versions_restrict_usable_suites() {
        let options = TlsOptions {
            trust: TrustPolicy::accept_any(),
            versions: vec![TlsVersion::Tls12],
            cipher_suites: Some(vec!["TLS13_AES_128_GCM_SHA256".into()]),
            ..Default::default()
        };
        assert!(matches!(
            options.client_config().unwrap_err(),
            Error::TlsConfig(_)
        ));

        let options = TlsOptions {
            versions: vec![TlsVersion::Tls13],
            ..options
        };
        assert!(options.client_config().is_ok());
    }

    #[test]
    fn cipher_allow_list_filters_suites() {
        let options = TlsOptions {
            trust: TrustPolicy::accept_any(),
            versions: vec![TlsVersion::Tls13],
            cipher_suites: Some(vec!["TLS13_AES_128_GCM_SHA256".into()]),
            ..Default::default()
        };
        let config = options.client_config().unwrap();
        let suites: Vec<String> = config
            .crypto_provider()
            .cipher_suites
            .iter()
            .map(|s| format!("{:?}", s.suite()))
            .collect();
        assert_eq!(suites, vec!["TLS13_AES_128_GCM_SHA256".to_string()]);
    }

    #[test]
    fn empty_cipher_list_is_a_config_error() {
        let options = TlsOptions {
            trust: TrustPolicy::accept_any(),
            cipher_suites: Some(Vec::new()),
            ..Default::default()
        };
        assert!(matches!(
            options.client_config().unwrap_err(),
            Error::TlsConfig(_)
        ));
    }

    #[test]
    fn alpn_and_resumption_options() {
        let options = TlsOptions {
            trust: TrustPolicy::accept_any(),
            session_resumption: false,
            alpn: vec![b"echo".to_vec()],
            ..Default::default()
        };
        let config = options.client_config().unwrap();
        assert_eq!(config.alpn_protocols, vec![b"echo".to_vec()]);
    }

    #[tokio::test]
    async fn invalid_server_name() {
        let (client, _server) = tokio::io::duplex(64);
        let config = TlsOptions::enforced(TrustPolicy::accept_any())
            .client_config()
            .unwrap();
        let err = upgrade(client, "not a name!", config).await.unwrap_err();
        assert!(matches!(err, Error::InvalidServerName(_)));
    }
}
