//! Tick-driven analysis engine.
//!
//! One engine instance owns the sample buffers, the EMA-smoothed channel
//! scores, and the bounded histories of smoothed values that feed the
//! coherence estimator. The caller drives it with `tick(now_ms)` at whatever
//! cadence it likes (display refresh, fixed timer); the engine starts scanning
//! on the first qualifying samples and freezes the score once the analysis
//! window has elapsed.
//!
//! Engines are single-owner: nothing here is shared across runs, and `reset`
//! must not race an in-flight tick (stop the tick loop first).

use crate::signal::buffer::RingBuffer;
use crate::signal::estimators::{
    cross_channel_coherence, human_score, keystroke_rhythm, lerp, micro_tremor, mobile_tremor,
    pointer_jitter, scroll_entropy,
};
use crate::signal::types::{
    ChannelScores, KeystrokeSample, MotionSample, PointerSample, SampleEvent, ScrollSample,
    SignalBuffers,
};
use crate::signal::{ANALYSIS_DURATION_MS, HISTORY_SIZE};
use serde::{Deserialize, Serialize};

/// EMA smoothing factors. Keystroke adapts faster because key events are
/// sparse; coherence adapts slower because it needs history to mean anything.
const POINTER_ALPHA: f64 = 0.12;
const SCROLL_ALPHA: f64 = 0.12;
const KEYSTROKE_ALPHA: f64 = 0.15;
const TREMOR_ALPHA: f64 = 0.12;
const COHERENCE_ALPHA: f64 = 0.10;

/// Where an analysis run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisPhase {
    Idle,
    Scanning,
    Complete,
}

/// What the engine reports after each tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    pub phase: AnalysisPhase,
    pub scores: ChannelScores,
    pub overall_score: f64,
    pub elapsed_ms: f64,
    pub progress: f64,
}

/// Bounded history of smoothed values per channel, consumed by the coherence
/// estimator. Kept separate from the smoothed scalars so the coherence input
/// contract stays independent of any display concern.
#[derive(Debug)]
struct ChannelHistory {
    pointer: RingBuffer<f64>,
    scroll: RingBuffer<f64>,
    keystroke: RingBuffer<f64>,
    tremor: RingBuffer<f64>,
    coherence: RingBuffer<f64>,
}

impl ChannelHistory {
    fn new() -> Self {
        Self {
            pointer: RingBuffer::new(HISTORY_SIZE),
            scroll: RingBuffer::new(HISTORY_SIZE),
            keystroke: RingBuffer::new(HISTORY_SIZE),
            tremor: RingBuffer::new(HISTORY_SIZE),
            coherence: RingBuffer::new(HISTORY_SIZE),
        }
    }
}

/// A single passive analysis run.
#[derive(Debug)]
pub struct AnalysisEngine {
    buffers: SignalBuffers,
    phase: AnalysisPhase,
    started_at_ms: f64,
    elapsed_ms: f64,
    smoothed: ChannelScores,
    history: ChannelHistory,
    overall: f64,
}

impl AnalysisEngine {
    pub fn new() -> Self {
        Self {
            buffers: SignalBuffers::new(),
            phase: AnalysisPhase::Idle,
            started_at_ms: 0.0,
            elapsed_ms: 0.0,
            smoothed: ChannelScores::default(),
            history: ChannelHistory::new(),
            overall: 0.0,
        }
    }

    pub fn phase(&self) -> AnalysisPhase {
        self.phase
    }

    pub fn scores(&self) -> ChannelScores {
        self.smoothed
    }

    pub fn overall_score(&self) -> f64 {
        self.overall
    }

    pub fn push(&mut self, event: SampleEvent) {
        self.buffers.push(event);
    }

    pub fn push_pointer(&mut self, sample: PointerSample) {
        self.buffers.pointer.push(sample);
    }

    pub fn push_scroll(&mut self, sample: ScrollSample) {
        self.buffers.scroll.push(sample);
    }

    pub fn push_keystroke(&mut self, sample: KeystrokeSample) {
        self.buffers.keystroke.push(sample);
    }

    pub fn push_motion(&mut self, sample: MotionSample) {
        self.buffers.motion.push(sample);
    }

    /// Advance the run by one aggregation step.
    ///
    /// `now_ms` is the tick driver's clock in milliseconds; it only needs to
    /// be monotonic within a run. Idle runs start scanning once the buffers
    /// hold enough samples to say anything; completed runs are frozen and
    /// report their final state.
    pub fn tick(&mut self, now_ms: f64) -> AnalysisSnapshot {
        if self.phase == AnalysisPhase::Complete {
            return self.snapshot();
        }

        if self.phase == AnalysisPhase::Idle {
            let qualifies = self.buffers.pointer.len() > 3
                || self.buffers.scroll.len() > 2
                || self.buffers.keystroke.len() > 2;
            if !qualifies {
                return self.snapshot();
            }
            self.started_at_ms = now_ms;
            self.phase = AnalysisPhase::Scanning;
        }

        self.elapsed_ms = now_ms - self.started_at_ms;

        let pointer_raw = pointer_jitter(&self.buffers.pointer.tail_vec(60));
        let scroll_raw = scroll_entropy(&self.buffers.scroll.tail_vec(30));
        let keystroke_raw = keystroke_rhythm(&self.buffers.keystroke.tail_vec(20));
        // Capability check, not a mode: prefer device motion when there is
        // enough of it, otherwise derive tremor from pointer data.
        let tremor_raw = if self.buffers.motion.len() > 20 {
            mobile_tremor(&self.buffers.motion.tail_vec(40))
        } else {
            micro_tremor(&self.buffers.pointer.tail_vec(20))
        };

        let sm = &mut self.smoothed;
        sm.pointer = lerp(sm.pointer, pointer_raw, POINTER_ALPHA);
        sm.scroll = lerp(sm.scroll, scroll_raw, SCROLL_ALPHA);
        sm.keystroke = lerp(sm.keystroke, keystroke_raw, KEYSTROKE_ALPHA);
        sm.tremor = lerp(sm.tremor, tremor_raw, TREMOR_ALPHA);

        self.history.pointer.push(sm.pointer);
        self.history.scroll.push(sm.scroll);
        self.history.keystroke.push(sm.keystroke);
        self.history.tremor.push(sm.tremor);

        let coherence_raw = cross_channel_coherence([
            &self.history.pointer.to_vec(),
            &self.history.scroll.to_vec(),
            &self.history.keystroke.to_vec(),
            &self.history.tremor.to_vec(),
        ]);
        let sm = &mut self.smoothed;
        sm.coherence = lerp(sm.coherence, coherence_raw, COHERENCE_ALPHA);
        self.history.coherence.push(sm.coherence);

        self.overall = human_score(
            &[sm.pointer, sm.scroll, sm.keystroke, sm.tremor],
            sm.coherence,
            self.elapsed_ms,
        );

        if self.elapsed_ms >= ANALYSIS_DURATION_MS {
            self.phase = AnalysisPhase::Complete;
        }

        self.snapshot()
    }

    /// Clear all buffers, histories, and smoothed state, returning to idle.
    ///
    /// Callers must stop the tick loop before resetting; this is the one
    /// operation that would otherwise race an in-flight tick.
    pub fn reset(&mut self) {
        self.buffers.clear();
        self.history = ChannelHistory::new();
        self.smoothed = ChannelScores::default();
        self.phase = AnalysisPhase::Idle;
        self.started_at_ms = 0.0;
        self.elapsed_ms = 0.0;
        self.overall = 0.0;
    }

    pub fn snapshot(&self) -> AnalysisSnapshot {
        AnalysisSnapshot {
            phase: self.phase,
            scores: self.smoothed,
            overall_score: self.overall,
            elapsed_ms: self.elapsed_ms,
            progress: (self.elapsed_ms / ANALYSIS_DURATION_MS).clamp(0.0, 1.0),
        }
    }
}

impl Default for AnalysisEngine {
    fn default() -> Self {
        Self::new()
    }
}
