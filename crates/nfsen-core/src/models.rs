use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ── Source ─────────────────────────────────────────────────────────────────────

/// A named flow-collection observation point (e.g. `"gateway"`).
///
/// Each source owns the subtree `<profiles-data>/<profile>/<source>/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Source(String);

impl Source {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Source {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ── Counters ───────────────────────────────────────────────────────────────────

/// Flow, packet and byte totals for one slice of traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficCounters {
    #[serde(default)]
    pub flows: u64,
    #[serde(default)]
    pub packets: u64,
    #[serde(default)]
    pub bytes: u64,
}

impl TrafficCounters {
    pub fn is_empty(&self) -> bool {
        self.flows == 0 && self.packets == 0 && self.bytes == 0
    }
}

/// Transport protocol buckets reported by the flow tool summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Other,
}

impl Protocol {
    pub const ALL: [Protocol; 4] = [Protocol::Tcp, Protocol::Udp, Protocol::Icmp, Protocol::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s)
    }
}

// ── FlowStatistic ──────────────────────────────────────────────────────────────

/// Aggregate counters for one (source, day) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStatistic {
    /// Totals across all protocols.
    pub total: TrafficCounters,
    /// Per-protocol breakdown.
    #[serde(default)]
    pub protocols: BTreeMap<Protocol, TrafficCounters>,
    /// Timestamp of the first flow seen, if the tool reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    /// Timestamp of the last flow seen, if the tool reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl FlowStatistic {
    pub fn protocol(&self, protocol: Protocol) -> TrafficCounters {
        self.protocols.get(&protocol).copied().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.total.is_empty() && self.protocols.values().all(TrafficCounters::is_empty)
    }
}

// ── PortStatistic ──────────────────────────────────────────────────────────────

/// Whether port aggregates belong to one source or to the whole profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PortScope {
    Global,
    PerSource,
}

/// Secondary aggregate keyed by port number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStatistic {
    pub scope: PortScope,
    pub ports: BTreeMap<u16, FlowStatistic>,
}

// ── DayStatistics ──────────────────────────────────────────────────────────────

/// Everything one processor unit produces for a (source, day) bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayStatistics {
    pub day: NaiveDate,
    pub flows: FlowStatistic,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<PortStatistic>,
    /// Number of capture files that contributed to the bucket.
    #[serde(default)]
    pub capture_files: usize,
}

impl DayStatistics {
    /// Statistics for a day without any capture files.
    pub fn empty(day: NaiveDate) -> Self {
        Self {
            day,
            flows: FlowStatistic::default(),
            ports: None,
            capture_files: 0,
        }
    }
}

// ── ProcessOptions ─────────────────────────────────────────────────────────────

/// Per-unit processor switches derived from the CLI and the configured ports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOptions {
    /// Compute port statistics (`-p`).
    pub process_ports: bool,
    /// Split port statistics per source (`-ps`). Implies port processing.
    pub ports_per_source: bool,
    /// Ports to aggregate when port processing is enabled.
    pub ports: Vec<u16>,
}

impl ProcessOptions {
    /// The scope port statistics are computed for, or `None` when disabled.
    pub fn port_scope(&self) -> Option<PortScope> {
        if self.ports.is_empty() {
            return None;
        }
        if self.ports_per_source {
            Some(PortScope::PerSource)
        } else if self.process_ports {
            Some(PortScope::Global)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_display_and_serde() {
        let source = Source::new("gateway");
        assert_eq!(source.to_string(), "gateway");
        assert_eq!(serde_json::to_string(&source).unwrap(), "\"gateway\"");
        let back: Source = serde_json::from_str("\"mailserver\"").unwrap();
        assert_eq!(back.as_str(), "mailserver");
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!(Protocol::parse("tcp"), Some(Protocol::Tcp));
        assert_eq!(Protocol::parse("other"), Some(Protocol::Other));
        assert_eq!(Protocol::parse("sctp"), None);
    }

    #[test]
    fn test_flow_statistic_protocol_defaults_to_zero() {
        let stats = FlowStatistic::default();
        assert!(stats.is_empty());
        assert_eq!(stats.protocol(Protocol::Udp), TrafficCounters::default());
    }

    #[test]
    fn test_port_scope() {
        let mut opts = ProcessOptions {
            ports: vec![80, 443],
            ..Default::default()
        };
        assert_eq!(opts.port_scope(), None);

        opts.process_ports = true;
        assert_eq!(opts.port_scope(), Some(PortScope::Global));

        opts.ports_per_source = true;
        assert_eq!(opts.port_scope(), Some(PortScope::PerSource));

        opts.ports.clear();
        assert_eq!(opts.port_scope(), None, "no configured ports means nothing to do");
    }

    #[test]
    fn test_day_statistics_empty() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let stats = DayStatistics::empty(day);
        assert_eq!(stats.day, day);
        assert_eq!(stats.capture_files, 0);
        assert!(stats.flows.is_empty());
        assert!(stats.ports.is_none());
    }
}
