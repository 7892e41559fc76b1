//! Parser for the `nfdump -I` statistics summary.
//!
//! The summary is a list of `Key: value` lines, for example:
//!
//! ```text
//! Ident: gateway
//! Flows: 1286
//! Flows_tcp: 1021
//! Flows_udp: 243
//! Flows_icmp: 20
//! Flows_other: 2
//! Packets: 48213
//! ...
//! First: 1704067200
//! Last: 1704067499
//! ```

use chrono::{DateTime, Utc};
use nfsen_core::error::ProcessorError;
use nfsen_core::models::{FlowStatistic, Protocol, TrafficCounters};

#[derive(Clone, Copy)]
enum Counter {
    Flows,
    Packets,
    Bytes,
}

impl Counter {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "flows" => Some(Counter::Flows),
            "packets" => Some(Counter::Packets),
            "bytes" => Some(Counter::Bytes),
            _ => None,
        }
    }

    fn slot<'a>(&self, counters: &'a mut TrafficCounters) -> &'a mut u64 {
        match self {
            Counter::Flows => &mut counters.flows,
            Counter::Packets => &mut counters.packets,
            Counter::Bytes => &mut counters.bytes,
        }
    }
}

/// Turn the tool's summary output into a [`FlowStatistic`].
///
/// Unknown keys are ignored. Output without any total counter is rejected,
/// since that is what nfdump prints when it failed to read its input.
pub fn parse_summary(output: &str) -> Result<FlowStatistic, ProcessorError> {
    let mut stats = FlowStatistic::default();
    let mut saw_total = false;

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();

        match key.as_str() {
            "first" => stats.first_seen = parse_epoch(&key, value)?,
            "last" => stats.last_seen = parse_epoch(&key, value)?,
            _ => {
                let (name, protocol) = match key.split_once('_') {
                    Some((name, proto)) => (name, Some(proto)),
                    None => (key.as_str(), None),
                };
                let Some(counter) = Counter::parse(name) else {
                    continue;
                };
                let parsed = parse_number(&key, value)?;
                match protocol {
                    None => {
                        *counter.slot(&mut stats.total) = parsed;
                        saw_total = true;
                    }
                    Some(proto) => {
                        let Some(protocol) = Protocol::parse(proto) else {
                            continue;
                        };
                        *counter.slot(stats.protocols.entry(protocol).or_default()) = parsed;
                    }
                }
            }
        }
    }

    if !saw_total {
        return Err(ProcessorError::ParseError {
            detail: "no flow counters in summary output".to_string(),
        });
    }
    Ok(stats)
}

fn parse_number(key: &str, value: &str) -> Result<u64, ProcessorError> {
    value.parse().map_err(|_| ProcessorError::ParseError {
        detail: format!("'{key}' has non-numeric value '{value}'"),
    })
}

fn parse_epoch(key: &str, value: &str) -> Result<Option<DateTime<Utc>>, ProcessorError> {
    let secs: i64 = value.parse().map_err(|_| ProcessorError::ParseError {
        detail: format!("'{key}' has non-numeric value '{value}'"),
    })?;
    if secs == 0 {
        return Ok(None);
    }
    Ok(DateTime::from_timestamp(secs, 0))
}
