//! DNS resolver backed by `hickory-resolver`.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::rr::rdata::SRV;
use hickory_resolver::TokioAsyncResolver;

use super::{DnsResolver, SrvRecord};
use crate::BoxFuture;

/// Resolver which speaks DNS directly, and so can answer SRV queries.
///
/// Uses the system resolver configuration (`/etc/resolv.conf` on unix),
/// falling back to the library defaults when it cannot be read.
#[derive(Clone)]
pub struct HickoryResolver {
    inner: TokioAsyncResolver,
}

impl std::fmt::Debug for HickoryResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HickoryResolver").finish()
    }
}

impl Default for HickoryResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl HickoryResolver {
    /// Create a resolver from the system configuration.
    pub fn new() -> Self {
        let inner = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|error| {
            tracing::warn!(%error, "system dns configuration unavailable, using defaults");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { inner }
    }

    /// Wrap an already configured resolver.
    pub fn from_resolver(inner: TokioAsyncResolver) -> Self {
        Self { inner }
    }
}

impl From<TokioAsyncResolver> for HickoryResolver {
    fn from(inner: TokioAsyncResolver) -> Self {
        Self::from_resolver(inner)
    }
}

/// Names are looked up as given, never through the search list.
fn fully_qualified(name: &str) -> String {
    if name.ends_with('.') {
        name.to_owned()
    } else {
        format!("{name}.")
    }
}

fn srv_record(srv: &SRV) -> SrvRecord {
    SrvRecord::new(
        srv.priority(),
        srv.weight(),
        srv.target().to_utf8(),
        srv.port(),
    )
}

/// An authoritative "no such record" is an empty answer, not a failure.
fn empty_on_no_records<T>(result: Result<Vec<T>, ResolveError>) -> io::Result<Vec<T>> {
    match result {
        Ok(records) => Ok(records),
        Err(error) => match error.kind() {
            ResolveErrorKind::NoRecordsFound { .. } => Ok(Vec::new()),
            _ => Err(io::Error::other(error)),
        },
    }
}

impl DnsResolver for HickoryResolver {
    fn query_service_records<'a>(&'a self, name: &'a str) -> BoxFuture<'a, io::Result<Vec<SrvRecord>>> {
        Box::pin(async move {
            let lookup = self.inner.srv_lookup(fully_qualified(name)).await;
            empty_on_no_records(lookup.map(|srv| srv.iter().map(srv_record).collect()))
        })
    }

    fn query_ipv4<'a>(&'a self, name: &'a str) -> BoxFuture<'a, io::Result<Vec<Ipv4Addr>>> {
        Box::pin(async move {
            let lookup = self.inner.ipv4_lookup(fully_qualified(name)).await;
            empty_on_no_records(lookup.map(|a| a.iter().map(|a| a.0).collect()))
        })
    }

    fn query_ipv6<'a>(&'a self, name: &'a str) -> BoxFuture<'a, io::Result<Vec<Ipv6Addr>>> {
        Box::pin(async move {
            let lookup = self.inner.ipv6_lookup(fully_qualified(name)).await;
            empty_on_no_records(lookup.map(|aaaa| aaaa.iter().map(|aaaa| aaaa.0).collect()))
        })
    }
}
