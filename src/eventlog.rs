//! Fired-event log and replay verification.
//!
//! Records every fired event into an append-only log, supports
//! checkpoints carrying a hash of the compartment assignment, and
//! provides a line-oriented export/import so two runs can be compared
//! exactly. Times are written as raw `f64` bit patterns, so an imported
//! log compares equal to the one that was exported.

use std::io::{self, BufRead, Write};

use crate::event::{EventId, FiredEvent, Origin};
use crate::graph::{EdgeId, NodeId};
use crate::locus::{Element, LocusId, OrientedEdge};
use crate::time::SimTime;

// ── Hash utility ──────────────────────────────────────────────────────

/// Combine two u64 hashes deterministically.
pub fn hash_combine(a: u64, b: u64) -> u64 {
    let mut h = a;
    h = h.wrapping_mul(0x517cc1b727220a95);
    h = h.wrapping_add(b);
    h ^= h >> 32;
    h
}

// ── Checkpoint ────────────────────────────────────────────────────────

/// A snapshot of the compartment assignment at a point in the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Number of events fired when this checkpoint was taken.
    pub event_index: u64,
    /// Clock value at the checkpoint.
    pub time: SimTime,
    /// Hash of every node's compartment.
    pub state_hash: u64,
}

// ── Event Log ─────────────────────────────────────────────────────────

/// Append-only log of fired events with optional checkpointing.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<FiredEvent>,
    checkpoints: Vec<Checkpoint>,
    checkpoint_interval: Option<u64>,
}

impl EventLog {
    /// Create an empty event log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an event log with automatic checkpointing every `n` events.
    pub fn with_checkpoint_interval(n: u64) -> Self {
        EventLog {
            events: Vec::new(),
            checkpoints: Vec::new(),
            checkpoint_interval: Some(n),
        }
    }

    /// Record a fired event.
    pub fn record(&mut self, event: FiredEvent) {
        self.events.push(event);
    }

    /// Add a checkpoint.
    pub fn add_checkpoint(&mut self, event_index: u64, time: SimTime, state_hash: u64) {
        self.checkpoints.push(Checkpoint {
            event_index,
            time,
            state_hash,
        });
    }

    /// Check if a checkpoint should be taken at this event count.
    pub fn should_checkpoint(&self, events_fired: u64) -> bool {
        match self.checkpoint_interval {
            Some(n) if n > 0 => events_fired % n == 0,
            _ => false,
        }
    }

    /// Access the recorded events.
    pub fn events(&self) -> &[FiredEvent] {
        &self.events
    }

    /// Access the checkpoints.
    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Compute a deterministic hash of the entire event log.
    pub fn log_hash(&self) -> u64 {
        self.events.iter().fold(0u64, |h, e| {
            let mut h = hash_combine(h, e.sequence);
            h = hash_combine(h, e.time.to_bits());
            h = hash_combine(h, e.event.index() as u64);
            h = hash_combine(h, e.locus.index() as u64);
            hash_combine(h, element_hash(&e.element))
        })
    }

    // ── Export / Import ───────────────────────────────────────────

    /// Export the log to a writer in a deterministic text format.
    pub fn export<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "# EPILOCI EVENT LOG v1")?;
        writeln!(w, "# events: {}", self.events.len())?;
        writeln!(w, "# checkpoints: {}", self.checkpoints.len())?;

        for e in &self.events {
            write!(
                w,
                "F {} {:016x} {} {} {} ",
                e.sequence,
                e.time.to_bits(),
                e.event.index(),
                e.locus.index(),
                match e.origin {
                    Origin::Sampled => "s",
                    Origin::Posted => "p",
                },
            )?;
            match e.element {
                Element::Node(n) => writeln!(w, "N {}", n.raw())?,
                Element::Edge(oe) => writeln!(
                    w,
                    "E {} {} {}",
                    oe.edge.raw(),
                    oe.left.raw(),
                    oe.right.raw()
                )?,
            }
        }

        for cp in &self.checkpoints {
            writeln!(
                w,
                "C {} {:016x} {:016x}",
                cp.event_index,
                cp.time.to_bits(),
                cp.state_hash
            )?;
        }

        Ok(())
    }

    /// Import an event log from a reader.
    pub fn import<R: BufRead>(r: R) -> io::Result<Self> {
        let mut events = Vec::new();
        let mut checkpoints = Vec::new();

        for line in r.lines() {
            let line = line?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('F') {
                let event = parse_fired(line)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                events.push(event);
            } else if line.starts_with('C') {
                let cp = parse_checkpoint(line)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                checkpoints.push(cp);
            } else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unrecognised line: {}", line),
                ));
            }
        }

        Ok(EventLog {
            events,
            checkpoints,
            checkpoint_interval: None,
        })
    }
}

// ── Verification ──────────────────────────────────────────────────────

/// Compare two event logs for identical event sequences.
pub fn logs_match(a: &EventLog, b: &EventLog) -> bool {
    a.events == b.events
}

/// Compare checkpoints between two logs.
pub fn checkpoints_match(a: &EventLog, b: &EventLog) -> bool {
    a.checkpoints == b.checkpoints
}

// ── Parsing helpers ───────────────────────────────────────────────────

fn parse_fired(line: &str) -> Result<FiredEvent, String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 8 || parts[0] != "F" {
        return Err(format!("invalid event line: {}", line));
    }
    let sequence = parse_u64(parts[1], "sequence")?;
    let time = parse_time(parts[2])?;
    let event = EventId::new(parse_u64(parts[3], "event")? as usize);
    let locus = parse_locus(parts[4])?;
    let origin = match parts[5] {
        "s" => Origin::Sampled,
        "p" => Origin::Posted,
        other => return Err(format!("unknown origin: {}", other)),
    };
    let element = match (parts[6], parts.len()) {
        ("N", 8) => Element::Node(NodeId::new(parse_u64(parts[7], "node")?)),
        ("E", 10) => Element::Edge(OrientedEdge {
            edge: EdgeId::new(parse_u64(parts[7], "edge")?),
            left: NodeId::new(parse_u64(parts[8], "left")?),
            right: NodeId::new(parse_u64(parts[9], "right")?),
        }),
        _ => return Err(format!("invalid element in: {}", line)),
    };
    Ok(FiredEvent { sequence, time, event, locus, element, origin })
}

fn parse_checkpoint(line: &str) -> Result<Checkpoint, String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 4 || parts[0] != "C" {
        return Err(format!("invalid checkpoint: {}", line));
    }
    Ok(Checkpoint {
        event_index: parse_u64(parts[1], "index")?,
        time: parse_time(parts[2])?,
        state_hash: u64::from_str_radix(parts[3], 16).map_err(|e| format!("hash: {}", e))?,
    })
}

fn parse_u64(s: &str, label: &str) -> Result<u64, String> {
    s.parse().map_err(|e| format!("{}: {}", label, e))
}

fn parse_time(s: &str) -> Result<SimTime, String> {
    let bits = u64::from_str_radix(s, 16).map_err(|e| format!("time: {}", e))?;
    SimTime::from_bits(bits).ok_or_else(|| format!("time: invalid value {}", s))
}

fn parse_locus(s: &str) -> Result<LocusId, String> {
    let raw: usize = s.parse().map_err(|e| format!("locus: {}", e))?;
    Ok(LocusId::from_index(raw))
}

fn element_hash(e: &Element) -> u64 {
    match e {
        Element::Node(n) => hash_combine(1, n.raw()),
        Element::Edge(oe) => {
            let h = hash_combine(2, oe.edge.raw());
            hash_combine(hash_combine(h, oe.left.raw()), oe.right.raw())
        }
    }
}
