//! Live write forwarding.
//!
//! A write body in line protocol is split by measurement, each line is
//! routed through the [`Topology`], and every backend receives its lines
//! as one payload. A backend that cannot take the payload right now gets
//! it parked in its write buffer for the drain loop.

use std::collections::HashMap;

use tracing::{debug, warn};

use fluxgate_queue::QueueResult;

use crate::buffer::QueueSet;
use crate::drain::Deliver;
use crate::topology::Topology;

/// What happened to one write body.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ForwardReport {
    /// Backends that acknowledged their payload.
    pub delivered: Vec<String>,
    /// Backends whose payload went to the write buffer.
    pub buffered: Vec<String>,
    /// Lines whose measurement routes to no backend. They are dropped.
    pub unrouted: usize,
}

/// Measurement name of a line-protocol line.
///
/// The measurement ends at the first unescaped comma or space. Blank
/// lines and `#` comments have none.
pub fn measurement(line: &[u8]) -> Option<String> {
    let line = line.trim_ascii_start();
    if line.is_empty() || line[0] == b'#' {
        return None;
    }
    let mut name = Vec::new();
    let mut bytes = line.iter();
    while let Some(&b) = bytes.next() {
        match b {
            b'\\' => match bytes.next() {
                Some(&escaped) => name.push(escaped),
                None => name.push(b),
            },
            b',' | b' ' => break,
            _ => name.push(b),
        }
    }
    if name.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(&name).into_owned())
}

/// Group the lines of `body` per target backend, keeping line order.
///
/// Returns the payloads in order of first use plus the unrouted count.
pub fn split_by_backend(topology: &Topology, body: &[u8]) -> (Vec<(String, Vec<u8>)>, usize) {
    let mut order: Vec<(String, Vec<u8>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut unrouted = 0;

    for line in body.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let Some(key) = measurement(line) else {
            continue;
        };
        let targets = topology.route(&key);
        if targets.is_empty() {
            debug!(measurement = %key, "no backend for measurement, dropping line");
            unrouted += 1;
            continue;
        }
        for (name, _) in targets {
            let slot = *index.entry(name.to_string()).or_insert_with(|| {
                order.push((name.to_string(), Vec::new()));
                order.len() - 1
            });
            let payload = &mut order[slot].1;
            payload.extend_from_slice(line);
            payload.push(b'\n');
        }
    }
    (order, unrouted)
}

/// Forward one write body.
///
/// A backend with writes already buffered gets the new payload buffered
/// behind them, so its writes stay in order. Failing to buffer is the
/// only error.
pub async fn forward_write<D: Deliver>(
    topology: &Topology,
    queues: &QueueSet,
    deliver: &D,
    body: &[u8],
) -> QueueResult<ForwardReport> {
    let (payloads, unrouted) = split_by_backend(topology, body);
    let mut report = ForwardReport {
        unrouted,
        ..ForwardReport::default()
    };

    for (name, payload) in payloads {
        let Some(backend) = topology.backend(&name) else {
            continue;
        };
        let backlog = queues.get(&name).is_some_and(|q| !q.is_empty());
        if !backlog {
            match deliver.deliver(backend, &payload).await {
                Ok(()) => {
                    report.delivered.push(name);
                    continue;
                }
                Err(e) => {
                    warn!(backend = %name, error = %e, bytes = payload.len(), "write not delivered, buffering");
                }
            }
        }
        queues.buffer(&name, &payload)?;
        report.buffered.push(name);
    }
    Ok(report)
}
