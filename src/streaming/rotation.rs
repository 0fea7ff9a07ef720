//! Segment rotation scheduling.
//!
//! A segment is due once the nominal duration of media time has elapsed,
//! but it is only cut at the next keyframe so every segment opens with a
//! sync sample. If no keyframe shows up within `max_keyframe_wait` the
//! scheduler reports it once so the caller can ask the encoder for one.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPhase {
    /// Segment is shorter than the nominal duration.
    WaitingForTimer,
    /// Nominal duration reached at `since`; waiting for a keyframe.
    WaitingForKeyframe { since: Duration },
    /// A keyframe arrived; the caller cuts the segment and calls
    /// [`RotationScheduler::segment_started`].
    Rotating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationDecision {
    Continue,
    /// Cut the current segment before this keyframe.
    Rotate,
    /// The keyframe wait exceeded its bound; reported once per segment.
    KeyframeOverdue,
}

#[derive(Debug, Clone)]
pub struct RotationScheduler {
    target: Duration,
    max_keyframe_wait: Duration,
    segment_start: Option<Duration>,
    phase: RotationPhase,
    overdue_reported: bool,
}

impl RotationScheduler {
    pub fn new(target: Duration, max_keyframe_wait: Duration) -> Self {
        Self {
            target,
            max_keyframe_wait,
            segment_start: None,
            phase: RotationPhase::WaitingForTimer,
            overdue_reported: false,
        }
    }

    pub fn phase(&self) -> RotationPhase {
        self.phase
    }

    /// Media time the current segment started at.
    pub fn segment_start(&self) -> Option<Duration> {
        self.segment_start
    }

    /// A new segment begins at `now`.
    pub fn segment_started(&mut self, now: Duration) {
        self.segment_start = Some(now);
        self.phase = RotationPhase::WaitingForTimer;
        self.overdue_reported = false;
    }

    /// Forget the current segment, e.g. after a resync.
    pub fn reset(&mut self) {
        self.segment_start = None;
        self.phase = RotationPhase::WaitingForTimer;
        self.overdue_reported = false;
    }

    /// Timer signal: media time has advanced to `now`.
    pub fn on_timer(&mut self, now: Duration) -> RotationDecision {
        let Some(start) = self.segment_start else {
            return RotationDecision::Continue;
        };

        match self.phase {
            RotationPhase::WaitingForTimer => {
                if now.saturating_sub(start) >= self.target {
                    self.phase = RotationPhase::WaitingForKeyframe { since: now };
                }
                RotationDecision::Continue
            }
            RotationPhase::WaitingForKeyframe { since } => {
                if !self.overdue_reported && now.saturating_sub(since) > self.max_keyframe_wait {
                    self.overdue_reported = true;
                    RotationDecision::KeyframeOverdue
                } else {
                    RotationDecision::Continue
                }
            }
            RotationPhase::Rotating => RotationDecision::Continue,
        }
    }

    /// Keyframe signal at media time `now`.
    pub fn on_keyframe(&mut self, now: Duration) -> RotationDecision {
        let Some(start) = self.segment_start else {
            return RotationDecision::Continue;
        };

        let due = match self.phase {
            RotationPhase::WaitingForTimer => now.saturating_sub(start) >= self.target,
            RotationPhase::WaitingForKeyframe { .. } | RotationPhase::Rotating => true,
        };
        if due {
            self.phase = RotationPhase::Rotating;
            RotationDecision::Rotate
        } else {
            RotationDecision::Continue
        }
    }
}
