//! Request observation hook and the in-process counters behind `/metrics`.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which transport a request or frame arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Http,
    Stream,
}

impl Transport {
    const ALL: [Transport; 2] = [Transport::Http, Transport::Stream];

    fn as_str(&self) -> &'static str {
        match self {
            Transport::Http => "http",
            Transport::Stream => "stream",
        }
    }
}

/// Failure classes reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Auth,
    Decode,
    Inference,
    Protocol,
    Unexpected,
}

impl FailureKind {
    const ALL: [FailureKind; 5] = [
        FailureKind::Auth,
        FailureKind::Decode,
        FailureKind::Inference,
        FailureKind::Protocol,
        FailureKind::Unexpected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Auth => "auth",
            FailureKind::Decode => "decode",
            FailureKind::Inference => "inference",
            FailureKind::Protocol => "protocol",
            FailureKind::Unexpected => "unexpected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "kind")]
pub enum Outcome {
    Success,
    Failure(FailureKind),
}

/// Emitted once per completed one-shot request or streamed frame.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEvent {
    pub timestamp: DateTime<Utc>,
    pub transport: Transport,
    pub route: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl RequestEvent {
    pub fn new(transport: Transport, route: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            timestamp: Utc::now(),
            transport,
            route: route.into(),
            outcome,
        }
    }
}

/// Hook for external metrics aggregation.
pub trait RequestObserver: Send + Sync {
    fn observe(&self, event: &RequestEvent);
}

// One slot for success followed by one per failure kind.
const OUTCOME_SLOTS: usize = 1 + FailureKind::ALL.len();

fn slot(outcome: Outcome) -> usize {
    match outcome {
        Outcome::Success => 0,
        Outcome::Failure(kind) => 1 + kind as usize,
    }
}

/// Lock-free request counters, exported in Prometheus text format.
#[derive(Debug, Default)]
pub struct RequestCounters {
    http: [AtomicU64; OUTCOME_SLOTS],
    stream: [AtomicU64; OUTCOME_SLOTS],
}

impl RequestCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn row(&self, transport: Transport) -> &[AtomicU64; OUTCOME_SLOTS] {
        match transport {
            Transport::Http => &self.http,
            Transport::Stream => &self.stream,
        }
    }

    pub fn count(&self, transport: Transport, outcome: Outcome) -> u64 {
        self.row(transport)[slot(outcome)].load(Ordering::Relaxed)
    }

    /// Render counters, plus the service up/info gauges.
    pub fn render(&self) -> String {
        let mut body = format!(
            "# HELP wildlens_up Whether the service is up\n\
             # TYPE wildlens_up gauge\n\
             wildlens_up 1\n\
             # HELP wildlens_info Service information\n\
             # TYPE wildlens_info gauge\n\
             wildlens_info{{version=\"{}\"}} 1\n\
             # HELP wildlens_requests_total Completed requests and streamed frames\n\
             # TYPE wildlens_requests_total counter\n",
            env!("CARGO_PKG_VERSION")
        );

        let outcomes = std::iter::once(Outcome::Success)
            .chain(FailureKind::ALL.into_iter().map(Outcome::Failure));
        for transport in Transport::ALL {
            for outcome in outcomes.clone() {
                let (label, kind) = match outcome {
                    Outcome::Success => ("success", "none"),
                    Outcome::Failure(kind) => ("failure", kind.as_str()),
                };
                let _ = writeln!(
                    body,
                    "wildlens_requests_total{{transport=\"{}\",outcome=\"{}\",kind=\"{}\"}} {}",
                    transport.as_str(),
                    label,
                    kind,
                    self.count(transport, outcome)
                );
            }
        }

        body
    }
}

impl RequestObserver for RequestCounters {
    fn observe(&self, event: &RequestEvent) {
        self.row(event.transport)[slot(event.outcome)].fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_track_outcomes_per_transport() {
        let counters = RequestCounters::new();
        counters.observe(&RequestEvent::new(Transport::Http, "/predictions/binary", Outcome::Success));
        counters.observe(&RequestEvent::new(Transport::Http, "/predictions/binary", Outcome::Success));
        counters.observe(&RequestEvent::new(
            Transport::Stream,
            "/predictions/ws",
            Outcome::Failure(FailureKind::Decode),
        ));

        assert_eq!(counters.count(Transport::Http, Outcome::Success), 2);
        assert_eq!(counters.count(Transport::Stream, Outcome::Success), 0);
        assert_eq!(
            counters.count(Transport::Stream, Outcome::Failure(FailureKind::Decode)),
            1
        );
    }

    #[test]
    fn test_render_prometheus_text() {
        let counters = RequestCounters::new();
        counters.observe(&RequestEvent::new(
            Transport::Http,
            "/predictions/multiclass",
            Outcome::Failure(FailureKind::Auth),
        ));

        let body = counters.render();
        assert!(body.contains("wildlens_up 1"));
        assert!(body.contains("# TYPE wildlens_requests_total counter"));
        assert!(body.contains(
            "wildlens_requests_total{transport=\"http\",outcome=\"failure\",kind=\"auth\"} 1"
        ));
        assert!(body.contains(
            "wildlens_requests_total{transport=\"stream\",outcome=\"success\",kind=\"none\"} 0"
        ));
    }

    #[test]
    fn test_event_serialization() {
        let event = RequestEvent::new(
            Transport::Stream,
            "/predictions/ws",
            Outcome::Failure(FailureKind::Protocol),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["transport"], "stream");
        assert_eq!(value["outcome"], "failure");
        assert_eq!(value["kind"], "protocol");
    }
}
