//! DNS lookups consumed by the endpoint resolver.
//!
//! The record lookup mechanics are provided by an implementation of
//! [`DnsResolver`]. [`GaiResolver`] asks the operating system via
//! `getaddrinfo`, and [`StaticResolver`] answers from an in-memory table. With
//! the `hickory` feature, `HickoryResolver` queries DNS servers directly and
//! is the only one of these which can answer SRV queries from the network.
//! [`system_resolver`] picks the best one available.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::{fmt, io};

use futures_util::Future;
use pin_project::{pin_project, pinned_drop};
use tokio::task::JoinHandle;

use crate::BoxFuture;

#[cfg(feature = "hickory")]
mod hickory;

#[cfg(feature = "hickory")]
pub use self::hickory::HickoryResolver;

/// The default resolver: `HickoryResolver` when the `hickory` feature is
/// enabled, [`GaiResolver`] otherwise.
pub fn system_resolver() -> Arc<dyn DnsResolver> {
    #[cfg(feature = "hickory")]
    {
        Arc::new(HickoryResolver::new())
    }

    #[cfg(not(feature = "hickory"))]
    {
        Arc::new(GaiResolver::new())
    }
}

/// A DNS SRV record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SrvRecord {
    /// Lower priorities are preferred.
    pub priority: u16,

    /// Relative weight among records of the same priority.
    pub weight: u16,

    /// Host name providing the service.
    pub target: String,

    /// Port the service listens on.
    pub port: u16,
}

impl SrvRecord {
    /// Create a new record.
    pub fn new(priority: u16, weight: u16, target: impl Into<String>, port: u16) -> Self {
        Self {
            priority,
            weight,
            target: target.into(),
            port,
        }
    }
}

/// The DNS operations the endpoint resolver needs.
pub trait DnsResolver: fmt::Debug + Send + Sync {
    /// Look up SRV records for a fully-formed `_service._proto.domain` name.
    fn query_service_records<'a>(&'a self, name: &'a str) -> BoxFuture<'a, io::Result<Vec<SrvRecord>>>;

    /// Look up IPv4 addresses for a host.
    fn query_ipv4<'a>(&'a self, name: &'a str) -> BoxFuture<'a, io::Result<Vec<Ipv4Addr>>>;

    /// Look up IPv6 addresses for a host.
    fn query_ipv6<'a>(&'a self, name: &'a str) -> BoxFuture<'a, io::Result<Vec<Ipv6Addr>>>;
}

impl<R> DnsResolver for Arc<R>
where
    R: DnsResolver + ?Sized,
{
    fn query_service_records<'a>(&'a self, name: &'a str) -> BoxFuture<'a, io::Result<Vec<SrvRecord>>> {
        (**self).query_service_records(name)
    }

    fn query_ipv4<'a>(&'a self, name: &'a str) -> BoxFuture<'a, io::Result<Vec<Ipv4Addr>>> {
        (**self).query_ipv4(name)
    }

    fn query_ipv6<'a>(&'a self, name: &'a str) -> BoxFuture<'a, io::Result<Vec<Ipv6Addr>>> {
        (**self).query_ipv6(name)
    }
}

/// Extension trait for `IpAddr` and `SocketAddr` to get the IP version.
pub trait IpVersionExt {
    /// Get the IP version of this address.
    fn version(&self) -> IpVersion;
}

/// IP version, also used as the address family preference.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Default)]
pub enum IpVersion {
    /// IPv4
    #[default]
    V4,

    /// IPv6
    V6,
}

impl IpVersion {
    /// Is this IP version IPv4?
    pub fn is_v4(&self) -> bool {
        matches!(self, Self::V4)
    }

    /// Is this IP version IPv6?
    pub fn is_v6(&self) -> bool {
        matches!(self, Self::V6)
    }

    /// The loopback address of this family.
    pub fn loopback(&self) -> IpAddr {
        match self {
            Self::V4 => Ipv4Addr::LOCALHOST.into(),
            Self::V6 => Ipv6Addr::LOCALHOST.into(),
        }
    }
}

impl IpVersionExt for SocketAddr {
    fn version(&self) -> IpVersion {
        match self {
            SocketAddr::V4(_) => IpVersion::V4,
            SocketAddr::V6(_) => IpVersion::V6,
        }
    }
}

impl IpVersionExt for IpAddr {
    fn version(&self) -> IpVersion {
        match self {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }
}

/// GetAddrInfo based resolver.
///
/// This resolver uses the `getaddrinfo` system call to resolve
/// hostnames to IP addresses via the operating system. It cannot
/// answer SRV queries; those fail with [`io::ErrorKind::Unsupported`].
#[derive(Debug, Default, Clone, Copy)]
pub struct GaiResolver {
    _priv: (),
}

impl GaiResolver {
    /// Create a new `GaiResolver`.
    pub fn new() -> Self {
        Self { _priv: () }
    }

    fn lookup(&self, host: &str) -> GaiFuture {
        let host: Box<str> = host.into();
        let span = tracing::Span::current();
        GaiFuture {
            handle: tokio::task::spawn_blocking(move || {
                tracing::trace_span!(parent: &span, "getaddrinfo", %host).in_scope(|| {
                    tracing::trace!("dns resolution starting");
                    (host.as_ref(), 0)
                        .to_socket_addrs()
                        .map(|addrs| addrs.map(|addr| addr.ip()).collect())
                })
            }),
        }
    }
}

impl DnsResolver for GaiResolver {
    fn query_service_records<'a>(&'a self, name: &'a str) -> BoxFuture<'a, io::Result<Vec<SrvRecord>>> {
        Box::pin(std::future::ready(Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("getaddrinfo cannot query SRV records ({name})"),
        ))))
    }

    fn query_ipv4<'a>(&'a self, name: &'a str) -> BoxFuture<'a, io::Result<Vec<Ipv4Addr>>> {
        let lookup = self.lookup(name);
        Box::pin(async move {
            Ok(lookup
                .await?
                .into_iter()
                .filter_map(|ip| match ip {
                    IpAddr::V4(ip) => Some(ip),
                    IpAddr::V6(_) => None,
                })
                .collect())
        })
    }

    fn query_ipv6<'a>(&'a self, name: &'a str) -> BoxFuture<'a, io::Result<Vec<Ipv6Addr>>> {
        let lookup = self.lookup(name);
        Box::pin(async move {
            Ok(lookup
                .await?
                .into_iter()
                .filter_map(|ip| match ip {
                    IpAddr::V6(ip) => Some(ip),
                    IpAddr::V4(_) => None,
                })
                .collect())
        })
    }
}

/// Future returned by `GaiResolver` when resolving
/// via getaddrinfo.
#[pin_project(PinnedDrop)]
pub struct GaiFuture {
    #[pin]
    handle: JoinHandle<Result<Vec<IpAddr>, io::Error>>,
}

impl fmt::Debug for GaiFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GaiFuture").finish()
    }
}

impl Future for GaiFuture {
    type Output = Result<Vec<IpAddr>, io::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(self.project().handle.poll(cx)) {
            Ok(Ok(addrs)) => Poll::Ready(Ok(addrs)),
            Ok(Err(error)) => Poll::Ready(Err(error)),
            Err(join_err) => {
                if join_err.is_cancelled() {
                    Poll::Ready(Err(io::Error::new(io::ErrorKind::Interrupted, join_err)))
                } else {
                    Poll::Ready(Err(io::Error::other(join_err)))
                }
            }
        }
    }
}

#[pinned_drop]
impl PinnedDrop for GaiFuture {
    fn drop(self: Pin<&mut Self>) {
        self.handle.abort()
    }
}

/// A resolver which answers from fixed, in-memory records.
///
/// Names without records resolve to an empty list rather than an error,
/// matching an authoritative "no data" answer. Every query is counted, which
/// makes it possible to assert that a lookup did or did not happen.
#[derive(Debug, Default)]
pub struct StaticResolver {
    srv: HashMap<String, Vec<SrvRecord>>,
    ipv4: HashMap<String, Vec<Ipv4Addr>>,
    ipv6: HashMap<String, Vec<Ipv6Addr>>,
    queries: AtomicUsize,
}

impl StaticResolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add SRV records for a `_service._proto.domain` name.
    pub fn with_srv(mut self, name: impl Into<String>, records: Vec<SrvRecord>) -> Self {
        self.srv.entry(name.into()).or_default().extend(records);
        self
    }

    /// Add an address record for a host.
    pub fn with_addr(mut self, host: impl Into<String>, addr: IpAddr) -> Self {
        let host = host.into();
        match addr {
            IpAddr::V4(addr) => self.ipv4.entry(host).or_default().push(addr),
            IpAddr::V6(addr) => self.ipv6.entry(host).or_default().push(addr),
        }
        self
    }

    /// Number of queries answered so far.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    fn answer<T: Clone>(&self, table: &HashMap<String, Vec<T>>, name: &str) -> Vec<T> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        table
            .get(name.trim_end_matches('.'))
            .cloned()
            .unwrap_or_default()
    }
}

impl DnsResolver for StaticResolver {
    fn query_service_records<'a>(&'a self, name: &'a str) -> BoxFuture<'a, io::Result<Vec<SrvRecord>>> {
        Box::pin(std::future::ready(Ok(self.answer(&self.srv, name))))
    }

    fn query_ipv4<'a>(&'a self, name: &'a str) -> BoxFuture<'a, io::Result<Vec<Ipv4Addr>>> {
        Box::pin(std::future::ready(Ok(self.answer(&self.ipv4, name))))
    }

    fn query_ipv6<'a>(&'a self, name: &'a str) -> BoxFuture<'a, io::Result<Vec<Ipv6Addr>>> {
        Box::pin(std::future::ready(Ok(self.answer(&self.ipv6, name))))
    }
}
