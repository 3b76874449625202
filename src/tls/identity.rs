//! Client identity selection.

use std::fmt;
use std::sync::Arc;

use rustls::client::ResolvesClientCert;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use rustls::SignatureScheme;

use crate::error::Error;

/// Chooses the certificate the client presents when a server asks for one.
pub trait IdentitySelector: fmt::Debug + Send + Sync {
    /// Pick an identity given the server's acceptable issuers (DER-encoded
    /// distinguished names) and the signature schemes it supports.
    ///
    /// Returning `None` sends no certificate.
    fn select(&self, acceptable_issuers: &[&[u8]], schemes: &[SignatureScheme]) -> Option<Arc<CertifiedKey>>;
}

/// Always presents the same certificate chain.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    key: Arc<CertifiedKey>,
}

impl StaticIdentity {
    /// Load a certificate chain and its private key using `provider`.
    pub fn new(
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        provider: &CryptoProvider,
    ) -> Result<Self, Error> {
        let signer = provider
            .key_provider
            .load_private_key(key)
            .map_err(Error::TlsConfig)?;
        Ok(Self {
            key: Arc::new(CertifiedKey::new(chain, signer)),
        })
    }
}

impl IdentitySelector for StaticIdentity {
    fn select(&self, _acceptable_issuers: &[&[u8]], schemes: &[SignatureScheme]) -> Option<Arc<CertifiedKey>> {
        if self.key.key.choose_scheme(schemes).is_none() {
            tracing::debug!("client identity does not support any offered signature scheme");
            return None;
        }
        Some(self.key.clone())
    }
}

/// Adapts an [`IdentitySelector`] to rustls.
#[derive(Debug)]
pub(crate) struct SelectorResolver(pub(crate) Arc<dyn IdentitySelector>);

impl ResolvesClientCert for SelectorResolver {
    fn resolve(&self, root_hint_subjects: &[&[u8]], sigschemes: &[SignatureScheme]) -> Option<Arc<CertifiedKey>> {
        let selected = self.0.select(root_hint_subjects, sigschemes);
        tracing::trace!(presented = selected.is_some(), "client identity requested");
        selected
    }

    fn has_certs(&self) -> bool {
        true
    }
}
