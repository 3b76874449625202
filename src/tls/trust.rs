//! Server trust strategies.
//!
//! Whether to trust a server's identity is decided by a [`ServerTrust`]
//! strategy. Strategies see the peer's certificate material and the name
//! being checked; handshake signatures are always verified against the
//! presented certificate regardless of the strategy, so a trusted identity
//! still has to prove possession of its key.

use std::fmt;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::error::Error;

/// The identity material presented by a server during the handshake.
#[derive(Debug)]
pub struct PeerIdentity<'a> {
    /// The name the client is checking the server against.
    pub server_name: &'a ServerName<'a>,

    /// The server's end-entity certificate, DER encoded.
    pub end_entity: &'a CertificateDer<'a>,

    /// Intermediate certificates sent by the server.
    pub intermediates: &'a [CertificateDer<'a>],
}

/// Decides whether a server identity is trusted.
///
/// Implementations should be pure: the same identity must always produce the
/// same decision.
pub trait ServerTrust: fmt::Debug + Send + Sync {
    /// Return `true` to accept the peer.
    fn is_trusted(&self, peer: &PeerIdentity<'_>) -> bool;
}

/// Accepts every server identity.
///
/// This disables authentication of the server entirely and is only suitable
/// for diagnostics against endpoints whose identity does not matter (e.g.
/// checking that a TLS listener answers at all). A warning is logged on
/// every handshake that relies on it.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAnyServer;

impl ServerTrust for AcceptAnyServer {
    fn is_trusted(&self, peer: &PeerIdentity<'_>) -> bool {
        tracing::warn!(
            server.name = ?peer.server_name,
            "accepting server certificate without verification"
        );
        true
    }
}

/// Trusts a server when a caller-supplied predicate accepts its identity.
pub struct PredicateTrust<F> {
    predicate: F,
}

impl<F> PredicateTrust<F>
where
    F: Fn(&PeerIdentity<'_>) -> bool + Send + Sync,
{
    /// Wrap `predicate` as a trust strategy.
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> fmt::Debug for PredicateTrust<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateTrust").finish()
    }
}

impl<F> ServerTrust for PredicateTrust<F>
where
    F: Fn(&PeerIdentity<'_>) -> bool + Send + Sync,
{
    fn is_trusted(&self, peer: &PeerIdentity<'_>) -> bool {
        (self.predicate)(peer)
    }
}

/// How server identities are validated.
#[derive(Debug, Clone)]
pub enum TrustPolicy {
    /// WebPKI validation against the operating system's root store.
    Platform,

    /// WebPKI validation against an explicit root store.
    Roots(Arc<RootCertStore>),

    /// A custom strategy.
    Custom(Arc<dyn ServerTrust>),
}

impl TrustPolicy {
    /// Accept any server. See [`AcceptAnyServer`].
    pub fn accept_any() -> Self {
        Self::Custom(Arc::new(AcceptAnyServer))
    }

    /// Trust servers accepted by `predicate`.
    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&PeerIdentity<'_>) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(PredicateTrust::new(predicate)))
    }

    pub(crate) fn verifier(
        &self,
        provider: Arc<CryptoProvider>,
    ) -> Result<Arc<dyn ServerCertVerifier>, Error> {
        let roots = match self {
            Self::Custom(trust) => {
                return Ok(Arc::new(StrategyVerifier {
                    trust: trust.clone(),
                    provider,
                }))
            }
            Self::Roots(roots) => roots.clone(),
            Self::Platform => Arc::new(platform_roots()),
        };

        let verifier = rustls::client::WebPkiServerVerifier::builder_with_provider(roots, provider)
            .build()
            .map_err(|err| Error::TlsConfig(rustls::Error::General(err.to_string())))?;
        Ok(verifier)
    }
}

fn platform_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        tracing::warn!(%error, "failed to load a platform root certificate");
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    tracing::trace!(added, ignored, "loaded platform root certificates");
    roots
}

/// Adapts a [`ServerTrust`] strategy to rustls.
#[derive(Debug)]
struct StrategyVerifier {
    trust: Arc<dyn ServerTrust>,
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for StrategyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let peer = PeerIdentity {
            server_name,
            end_entity,
            intermediates,
        };

        if self.trust.is_trusted(&peer) {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
