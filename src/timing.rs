//! Per-attempt connect timing.
//!
//! A [`ConnectTimingBuilder`] is created at the start of every connect attempt
//! and accumulates phase durations and timestamped errors as the attempt
//! progresses. Once the attempt concludes it is frozen into a
//! [`ConnectTiming`], which is immutable and cheap to clone.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Phases of a connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// DNS SRV lookup and candidate selection.
    SrvLookup,

    /// A/AAAA lookup.
    AddressLookup,

    /// Transport connect.
    Connect,

    /// Secure channel handshake.
    Handshake,
}

impl Phase {
    /// Short lowercase name for this phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::SrvLookup => "srv lookup",
            Phase::AddressLookup => "address lookup",
            Phase::Connect => "connect",
            Phase::Handshake => "handshake",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error recorded during a connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedError {
    /// Wall-clock time the error was recorded.
    pub at: SystemTime,

    /// Error message.
    pub message: String,
}

/// Accumulates timings for a single connect attempt.
#[derive(Debug)]
pub struct ConnectTimingBuilder {
    started: Instant,
    phases: Vec<(Phase, Duration)>,
    errors: Vec<TimedError>,
}

impl Default for ConnectTimingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectTimingBuilder {
    /// Start timing a new attempt.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            phases: Vec::with_capacity(4),
            errors: Vec::new(),
        }
    }

    /// Record the duration of a completed (or failed) phase.
    pub fn record(&mut self, phase: Phase, elapsed: Duration) {
        self.phases.push((phase, elapsed));
    }

    /// Record a phase which started at `started` and ends now.
    pub fn record_since(&mut self, phase: Phase, started: Instant) {
        self.record(phase, started.elapsed());
    }

    /// Append an error message with the current timestamp.
    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(TimedError {
            at: SystemTime::now(),
            message: message.into(),
        });
    }

    /// Freeze the record.
    pub fn finish(self) -> ConnectTiming {
        ConnectTiming {
            inner: Arc::new(Inner {
                total: self.started.elapsed(),
                phases: self.phases,
                errors: self.errors,
            }),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Inner {
    total: Duration,
    phases: Vec<(Phase, Duration)>,
    errors: Vec<TimedError>,
}

/// The immutable timing record of a finished connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTiming {
    inner: Arc<Inner>,
}

impl ConnectTiming {
    /// Total wall time spent on the attempt.
    pub fn total(&self) -> Duration {
        self.inner.total
    }

    /// Time spent in a phase, if that phase ran.
    ///
    /// If a phase was recorded more than once the durations are summed.
    pub fn phase(&self, phase: Phase) -> Option<Duration> {
        self.inner
            .phases
            .iter()
            .filter(|(p, _)| *p == phase)
            .map(|(_, d)| *d)
            .reduce(|a, b| a + b)
    }

    /// All recorded phases, in the order they ran.
    pub fn phases(&self) -> &[(Phase, Duration)] {
        &self.inner.phases
    }

    /// Errors recorded during the attempt, oldest first.
    pub fn errors(&self) -> &[TimedError] {
        &self.inner.errors
    }
}

impl fmt::Display for ConnectTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (phase, elapsed) in self.phases() {
            write!(f, "{phase}={}ms ", elapsed.as_millis())?;
        }
        write!(f, "total={}ms", self.total().as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_freezes_phases_and_errors() {
        let mut builder = ConnectTimingBuilder::new();
        builder.record(Phase::AddressLookup, Duration::from_millis(3));
        builder.record(Phase::Connect, Duration::from_millis(7));
        builder.error("connection refused");
        let timing = builder.finish();

        assert_eq!(
            timing.phase(Phase::AddressLookup),
            Some(Duration::from_millis(3))
        );
        assert_eq!(timing.phase(Phase::Connect), Some(Duration::from_millis(7)));
        assert_eq!(timing.phase(Phase::Handshake), None);
        assert_eq!(timing.errors().len(), 1);
        assert_eq!(timing.errors()[0].message, "connection refused");

        let shown = timing.to_string();
        assert!(shown.starts_with("address lookup=3ms connect=7ms total="));
    }

    #[test]
    fn repeated_phase_is_summed() {
        let mut builder = ConnectTimingBuilder::new();
        builder.record(Phase::Connect, Duration::from_millis(2));
        builder.record(Phase::Connect, Duration::from_millis(5));
        let timing = builder.finish();
        assert_eq!(timing.phase(Phase::Connect), Some(Duration::from_millis(7)));
    }
}
