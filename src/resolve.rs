//! Endpoint resolution.
//!
//! Turns an [`EndpointTarget`] into a concrete [`ResolvedEndpoint`]:
//!
//! 1. Literal addresses and localhost aliases are used directly, without any
//!    DNS query.
//! 2. If the target carries an SRV spec, the SRV records are queried and one
//!    candidate is selected from the minimum-priority set, by weight.
//! 3. The (possibly SRV-selected) host is looked up for IPv4 and IPv6
//!    concurrently, and the first address of the preferred family is used,
//!    falling back to the other family.
//! 4. The port comes from the URL, else the SRV record, else the statically
//!    configured port.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tracing::Instrument as _;

use crate::dns::{system_resolver, DnsResolver, IpVersion, SrvRecord};
use crate::error::ResolutionError;
use crate::target::EndpointTarget;
use crate::timing::Phase;
use crate::BoxFuture;

const LOCALHOST_ALIASES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "ip6-localhost",
    "ip6-loopback",
];

/// A concrete address and port for a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    /// The address to connect to.
    pub addr: SocketAddr,

    /// The DNS name that was looked up to find `addr`, if any.
    ///
    /// For SRV targets this is the selected record's target host.
    pub lookup_name: Option<String>,
}

impl ResolvedEndpoint {
    /// The resolved IP address.
    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    /// The resolved port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl fmt::Display for ResolvedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lookup_name {
            Some(name) => write!(f, "{} ({name})", self.addr),
            None => write!(f, "{}", self.addr),
        }
    }
}

/// The outcome of a successful resolution, with the time each phase took.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The resolved endpoint.
    pub endpoint: ResolvedEndpoint,

    /// Phases which ran, and how long they took.
    pub phases: Vec<(Phase, Duration)>,
}

/// Pick one SRV record.
///
/// Only records with the minimum priority are considered. If their total
/// weight is zero the choice is uniform; otherwise a value is drawn from
/// `[0, total_weight)` and the first record whose cumulative weight exceeds it
/// is chosen. Given the same records and an identically seeded `rng`, the
/// choice is always the same.
pub fn select_service_record<'r, R>(records: &'r [SrvRecord], rng: &mut R) -> Option<&'r SrvRecord>
where
    R: Rng,
{
    let priority = records.iter().map(|r| r.priority).min()?;
    let candidates: Vec<&SrvRecord> = records.iter().filter(|r| r.priority == priority).collect();

    let total: u32 = candidates.iter().map(|r| u32::from(r.weight)).sum();
    if total == 0 {
        let idx = rng.gen_range(0..candidates.len());
        return Some(candidates[idx]);
    }

    let draw = rng.gen_range(0..total);
    let mut cumulative = 0;
    for candidate in candidates.iter().copied() {
        cumulative += u32::from(candidate.weight);
        if cumulative > draw {
            return Some(candidate);
        }
    }

    // Unreachable: cumulative reaches `total`, which exceeds any draw.
    candidates.last().copied()
}

/// Interpret `host` as a literal address or a localhost alias.
pub fn literal_address(host: &str, prefer: IpVersion) -> Option<IpAddr> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(ip);
    }

    let host = host.trim_end_matches('.');
    LOCALHOST_ALIASES
        .iter()
        .any(|alias| alias.eq_ignore_ascii_case(host))
        .then(|| {
            if host.starts_with("ip6-") {
                IpVersion::V6.loopback()
            } else {
                prefer.loopback()
            }
        })
}

/// Resolves endpoint targets to addresses using a [`DnsResolver`].
pub struct EndpointResolver {
    dns: Arc<dyn DnsResolver>,
    prefer: IpVersion,
    rng: StdRng,
}

impl fmt::Debug for EndpointResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointResolver")
            .field("dns", &self.dns)
            .field("prefer", &self.prefer)
            .finish()
    }
}

impl Default for EndpointResolver {
    fn default() -> Self {
        Self::new(system_resolver())
    }
}

impl EndpointResolver {
    /// Create a resolver using `dns`, preferring IPv4 and seeded from entropy.
    pub fn new(dns: Arc<dyn DnsResolver>) -> Self {
        Self {
            dns,
            prefer: IpVersion::V4,
            rng: StdRng::from_entropy(),
        }
    }

    /// Set the preferred address family.
    pub fn with_preference(mut self, prefer: IpVersion) -> Self {
        self.prefer = prefer;
        self
    }

    /// Seed the random source used for SRV selection.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// The preferred address family.
    pub fn preference(&self) -> IpVersion {
        self.prefer
    }

    /// Resolve `target` to a concrete address and port.
    pub async fn resolve(&mut self, target: &EndpointTarget) -> Result<Resolution, ResolutionError> {
        let mut phases = Vec::new();
        let endpoint = self.resolve_timed(target, &mut phases).await?;
        Ok(Resolution { endpoint, phases })
    }

    /// Resolve `target`, appending each lookup phase and its duration to
    /// `phases`.
    ///
    /// A phase is recorded once its lookup finishes, whether it succeeded or
    /// not, so after a failure `phases` shows how far resolution got.
    pub async fn resolve_timed(
        &mut self,
        target: &EndpointTarget,
        phases: &mut Vec<(Phase, Duration)>,
    ) -> Result<ResolvedEndpoint, ResolutionError> {
        let seed = self.rng.next_u64();
        resolve(self.dns.as_ref(), self.prefer, seed, target, phases).await
    }
}

impl tower::Service<EndpointTarget> for EndpointResolver {
    type Response = Resolution;
    type Error = ResolutionError;
    type Future = BoxFuture<'static, Result<Resolution, ResolutionError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, target: EndpointTarget) -> Self::Future {
        let seed = self.rng.next_u64();
        let dns = self.dns.clone();
        let prefer = self.prefer;
        Box::pin(async move {
            let mut phases = Vec::new();
            let endpoint = resolve(dns.as_ref(), prefer, seed, &target, &mut phases).await?;
            Ok(Resolution { endpoint, phases })
        })
    }
}

async fn resolve(
    dns: &dyn DnsResolver,
    prefer: IpVersion,
    seed: u64,
    target: &EndpointTarget,
    phases: &mut Vec<(Phase, Duration)>,
) -> Result<ResolvedEndpoint, ResolutionError> {
    let span = tracing::trace_span!("resolve", endpoint = %target);
    async move {
        let host = target.host_name();

        if host.is_empty() {
            return Err(ResolutionError::InvalidTarget(target.to_string()));
        }

        // A literal host is final even when an SRV spec is present.
        if let Some(ip) = literal_address(host, prefer) {
            let port = target
                .explicit_port()
                .or_else(|| target.static_port())
                .ok_or_else(|| ResolutionError::MissingPort { host: host.into() })?;
            tracing::trace!(%ip, port, "literal address, skipping dns");
            let alias = host.parse::<IpAddr>().is_err();
            return Ok(ResolvedEndpoint {
                addr: SocketAddr::new(ip, port),
                lookup_name: alias.then(|| host.to_owned()),
            });
        }

        let mut lookup_host = host.to_owned();
        let mut srv_port = None;

        if let Some(spec) = target.service_spec() {
            let name = spec.query_name(host);
            let started = Instant::now();
            let records = dns
                .query_service_records(&name)
                .await
                .map_err(ResolutionError::lookup(Phase::SrvLookup, name.clone()));
            phases.push((Phase::SrvLookup, started.elapsed()));
            let records = records?;

            let mut rng = StdRng::seed_from_u64(seed);
            let selected = select_service_record(&records, &mut rng)
                .ok_or_else(|| ResolutionError::NoServiceRecords { name: name.clone() })?;
            tracing::debug!(
                srv = %name,
                srv.target = %selected.target,
                srv.port = selected.port,
                priority = selected.priority,
                weight = selected.weight,
                "selected service record"
            );

            lookup_host = selected.target.trim_end_matches('.').to_owned();
            srv_port = (selected.port != 0).then_some(selected.port);
        }

        let port = target
            .explicit_port()
            .or(srv_port)
            .or_else(|| target.static_port())
            .ok_or_else(|| ResolutionError::MissingPort {
                host: lookup_host.clone(),
            })?;

        let started = Instant::now();
        let ip = match literal_address(&lookup_host, prefer) {
            Some(ip) => Ok(ip),
            None => lookup_address(dns, &lookup_host, prefer).await,
        };
        phases.push((Phase::AddressLookup, started.elapsed()));
        let ip = ip?;

        tracing::trace!(%ip, port, host = %lookup_host, "resolved");
        Ok(ResolvedEndpoint {
            addr: SocketAddr::new(ip, port),
            lookup_name: Some(lookup_host),
        })
    }
    .instrument(span)
    .await
}

async fn lookup_address(
    dns: &dyn DnsResolver,
    host: &str,
    prefer: IpVersion,
) -> Result<IpAddr, ResolutionError> {
    let (v4, v6) = tokio::join!(dns.query_ipv4(host), dns.query_ipv6(host));

    let (v4, v6) = match (v4, v6) {
        (Err(error), Err(_)) => {
            return Err(ResolutionError::lookup(Phase::AddressLookup, host)(error))
        }
        (Ok(v4), Err(error)) => {
            tracing::debug!(%host, %error, "ipv6 lookup failed");
            (v4, Vec::new())
        }
        (Err(error), Ok(v6)) => {
            tracing::debug!(%host, %error, "ipv4 lookup failed");
            (Vec::new(), v6)
        }
        (Ok(v4), Ok(v6)) => (v4, v6),
    };

    let first_v4 = v4.first().copied().map(IpAddr::from);
    let first_v6 = v6.first().copied().map(IpAddr::from);

    let chosen = match prefer {
        IpVersion::V4 => first_v4.or(first_v6),
        IpVersion::V6 => first_v6.or(first_v4),
    };

    chosen.ok_or_else(|| ResolutionError::NoAddresses { host: host.into() })
}
