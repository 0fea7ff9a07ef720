//! Segment lifecycle tracing and HLS protocol checks.
//!
//! One observer is owned per running stream and shared by reference with
//! the segment builder and the HTTP handlers.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

const MAX_HISTORY_SIZE: usize = 1000;
const MAX_TRACES: usize = 1000;
const MAX_ISSUES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentEvent {
    Created,
    Stored,
    Requested,
    Served,
    NotFound,
    Removed,
    PlaylistUpdated,
}

/// One recorded event.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub at: DateTime<Utc>,
    #[serde(skip)]
    pub instant: Instant,
    pub event: SegmentEvent,
    pub name: String,
    pub sequence: Option<u64>,
    pub size: usize,
}

/// Lifecycle of one named segment.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SegmentTrace {
    pub name: String,
    pub sequence: Option<u64>,
    pub size: usize,
    pub created_at: Option<DateTime<Utc>>,
    pub stored_at: Option<DateTime<Utc>>,
    pub removed_at: Option<DateTime<Utc>>,
    pub requests: u64,
    pub served: u64,
    pub not_found: u64,
    /// Served while already removed from the store.
    pub served_after_removal: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComplianceIssue {
    /// A client asked for a segment after it was evicted.
    RequestedAfterEviction { name: String, requests: u64 },
    /// Sequence numbers of created segments skipped values.
    SequenceGap { after: u64, next: u64 },
    /// A segment was served after it had been removed.
    ServedAfterRemoval { name: String },
}

impl fmt::Display for ComplianceIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestedAfterEviction { name, requests } => write!(
                f,
                "{} requested {} time(s) after eviction; clients are behind the window",
                name, requests
            ),
            Self::SequenceGap { after, next } => {
                write!(f, "Sequence gap: segment {} followed by {}", after, next)
            }
            Self::ServedAfterRemoval { name } => write!(f, "{} served after removal", name),
        }
    }
}

/// Aggregate counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    pub segments_created: u64,
    pub segments_removed: u64,
    pub active_segments: usize,
    pub requests: u64,
    pub served: u64,
    pub not_found: u64,
    pub playlist_updates: u64,
    pub failures: u64,
    pub compliance_issues: usize,
    pub healthy: bool,
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Segments: {} created, {} removed, {} active",
            self.segments_created, self.segments_removed, self.active_segments
        )?;
        writeln!(
            f,
            "Requests: {} total, {} served, {} not found",
            self.requests, self.served, self.not_found
        )?;
        writeln!(f, "Playlist updates: {}", self.playlist_updates)?;
        writeln!(f, "Failures: {}", self.failures)?;
        write!(
            f,
            "Status: {} ({} compliance issues)",
            if self.healthy { "healthy" } else { "degraded" },
            self.compliance_issues
        )
    }
}

#[derive(Default)]
struct ObserverState {
    history: VecDeque<TraceEvent>,
    traces: HashMap<String, SegmentTrace>,
    /// Trace names in first-seen order.
    trace_order: VecDeque<String>,
    counts: HashMap<SegmentEvent, u64>,
    /// Sequence numbers of created media segments, in creation order.
    created_sequences: Vec<u64>,
    issues: VecDeque<(Instant, String)>,
    failures: u64,
}

impl ObserverState {
    /// Drop traces until at most `keep` remain, finished ones first.
    fn evict_traces(&mut self, keep: usize) {
        while self.traces.len() > keep {
            let traces = &self.traces;
            let position = self
                .trace_order
                .iter()
                .position(|name| traces.get(name).map_or(true, |t| !t.is_live()))
                .unwrap_or(0);
            match self.trace_order.remove(position) {
                Some(name) => {
                    self.traces.remove(&name);
                }
                None => break,
            }
        }
    }
}

impl SegmentTrace {
    /// Created and not yet removed.
    fn is_live(&self) -> bool {
        self.created_at.is_some() && self.removed_at.is_none()
    }
}

/// Records segment events and derives health and compliance reports.
#[derive(Default)]
pub struct SegmentObserver {
    state: Mutex<ObserverState>,
}

impl SegmentObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, event: SegmentEvent, name: &str, sequence: Option<u64>, size: usize) {
        self.record(event, name, sequence, size, true);
    }

    /// Count an event without keeping a per-name trace, for names that
    /// never referred to a produced segment.
    pub fn track_untraced(&self, event: SegmentEvent, name: &str, sequence: Option<u64>) {
        self.record(event, name, sequence, 0, false);
    }

    fn record(
        &self,
        event: SegmentEvent,
        name: &str,
        sequence: Option<u64>,
        size: usize,
        keep_trace: bool,
    ) {
        let now = Utc::now();
        let mut state = self.state.lock();

        *state.counts.entry(event).or_insert(0) += 1;
        if event == SegmentEvent::Created {
            if let Some(seq) = sequence {
                state.created_sequences.push(seq);
                let excess = state.created_sequences.len().saturating_sub(MAX_HISTORY_SIZE);
                state.created_sequences.drain(..excess);
            }
        }

        if keep_trace && event != SegmentEvent::PlaylistUpdated {
            if !state.traces.contains_key(name) {
                state.evict_traces(MAX_TRACES - 1);
                state.trace_order.push_back(name.to_string());
            }
            let trace = state
                .traces
                .entry(name.to_string())
                .or_insert_with(|| SegmentTrace {
                    name: name.to_string(),
                    ..Default::default()
                });
            if sequence.is_some() {
                trace.sequence = sequence;
            }
            if size > 0 {
                trace.size = size;
            }
            match event {
                SegmentEvent::Created => trace.created_at = Some(now),
                SegmentEvent::Stored => trace.stored_at = Some(now),
                SegmentEvent::Requested => trace.requests += 1,
                SegmentEvent::Served => {
                    trace.served += 1;
                    if trace.removed_at.is_some() {
                        trace.served_after_removal += 1;
                    }
                }
                SegmentEvent::NotFound => trace.not_found += 1,
                SegmentEvent::Removed => trace.removed_at = Some(now),
                SegmentEvent::PlaylistUpdated => {}
            }
        }

        tracing::trace!(event = ?event, segment = %name, sequence = ?sequence, size, "Segment event");

        if state.history.len() >= MAX_HISTORY_SIZE {
            state.history.pop_front();
        }
        state.history.push_back(TraceEvent {
            at: now,
            instant: Instant::now(),
            event,
            name: name.to_string(),
            sequence,
            size,
        });
    }

    /// Record a segment that could not be produced.
    pub fn record_failure(&self, description: &str) {
        let mut state = self.state.lock();
        state.failures += 1;
        if state.issues.len() >= MAX_ISSUES {
            state.issues.pop_front();
        }
        state
            .issues
            .push_back((Instant::now(), description.to_string()));
    }

    /// Lifecycle of the named segment, if it was ever seen.
    pub fn trace(&self, name: &str) -> Option<SegmentTrace> {
        self.state.lock().traces.get(name).cloned()
    }

    /// Most recent events, oldest first.
    pub fn history(&self, limit: usize) -> Vec<TraceEvent> {
        let state = self.state.lock();
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn check_protocol_compliance(&self) -> Vec<ComplianceIssue> {
        let state = self.state.lock();
        let mut issues = Vec::new();

        // Sequences restart at 1 when a new session begins
        for pair in state.created_sequences.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            if next != prev + 1 && next != 1 {
                issues.push(ComplianceIssue::SequenceGap { after: prev, next });
            }
        }

        let mut traces: Vec<&SegmentTrace> = state.traces.values().collect();
        traces.sort_by(|a, b| a.sequence.cmp(&b.sequence).then(a.name.cmp(&b.name)));
        for trace in traces {
            if trace.removed_at.is_some() && trace.not_found > 0 {
                issues.push(ComplianceIssue::RequestedAfterEviction {
                    name: trace.name.clone(),
                    requests: trace.not_found,
                });
            }
            if trace.served_after_removal > 0 {
                issues.push(ComplianceIssue::ServedAfterRemoval {
                    name: trace.name.clone(),
                });
            }
        }

        issues
    }

    pub fn health_report(&self) -> HealthReport {
        let compliance_issues = self.check_protocol_compliance().len();
        let state = self.state.lock();
        let count = |event| state.counts.get(&event).copied().unwrap_or(0);

        let segments_created = count(SegmentEvent::Created);
        let segments_removed = count(SegmentEvent::Removed);
        let active_segments = state
            .traces
            .values()
            .filter(|t| t.is_live())
            .count();

        HealthReport {
            segments_created,
            segments_removed,
            active_segments,
            requests: count(SegmentEvent::Requested),
            served: count(SegmentEvent::Served),
            not_found: count(SegmentEvent::NotFound),
            playlist_updates: count(SegmentEvent::PlaylistUpdated),
            failures: state.failures,
            compliance_issues,
            healthy: compliance_issues == 0 && state.failures == 0,
        }
    }

    /// Failure descriptions and compliance findings, newest last.
    pub fn recent_issues(&self, limit: usize) -> Vec<String> {
        let mut issues: Vec<String> = {
            let state = self.state.lock();
            state.issues.iter().map(|(_, d)| d.clone()).collect()
        };
        issues.extend(
            self.check_protocol_compliance()
                .iter()
                .map(ToString::to_string),
        );
        let skip = issues.len().saturating_sub(limit);
        issues.split_off(skip)
    }

    /// Drop history, traces, and failures older than `age`.
    pub fn clear_older_than(&self, age: Duration) {
        let Some(cutoff) = Instant::now().checked_sub(age) else {
            return;
        };
        let cutoff_wall = Utc::now()
            - chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero());

        let mut state = self.state.lock();
        state.history.retain(|e| e.instant >= cutoff);
        state.issues.retain(|(at, _)| *at >= cutoff);
        state.traces.retain(|_, trace| {
            let last = [trace.created_at, trace.stored_at, trace.removed_at]
                .into_iter()
                .flatten()
                .max();
            // Removed segments age out; live ones stay
            trace.removed_at.is_none() || last.map_or(false, |t| t >= cutoff_wall)
        });
        let ObserverState {
            traces, trace_order, ..
        } = &mut *state;
        trace_order.retain(|name| traces.contains_key(name));
    }
}

impl fmt::Debug for SegmentObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentObserver")
            .field("health", &self.health_report())
            .finish()
    }
}
