//! Signal-processing core: sample buffers, channel estimators, and the
//! tick-driven analysis engine that turns raw behavioral samples into a
//! stable humanness score.

pub mod analysis;
pub mod buffer;
pub mod estimators;
pub mod types;

pub use analysis::{AnalysisEngine, AnalysisPhase, AnalysisSnapshot};
pub use buffer::RingBuffer;
pub use estimators::{
    cross_channel_coherence, human_score, keystroke_rhythm, lerp, micro_tremor, mobile_tremor,
    pointer_jitter, scroll_entropy,
};
pub use types::{
    ChannelScores, KeystrokeSample, MotionSample, PointerSample, SampleEvent, ScrollSample,
    SignalBuffers,
};

/// Analysis window length; the score freezes once this much time has elapsed.
pub const ANALYSIS_DURATION_MS: f64 = 8000.0;

/// Raw sample buffer capacities, per channel.
pub const POINTER_BUFFER_SIZE: usize = 300;
pub const SCROLL_BUFFER_SIZE: usize = 200;
pub const KEYSTROKE_BUFFER_SIZE: usize = 100;
pub const MOTION_BUFFER_SIZE: usize = 200;

/// Length of the smoothed-value history kept per channel for coherence.
pub const HISTORY_SIZE: usize = 120;

/// Upper bound for any single channel's pre-aggregation score.
pub const CHANNEL_SCORE_CAP: f64 = 0.85;

/// Calibration scale applied to mean pairwise correlation.
pub const COHERENCE_SCALE: f64 = 0.8;

/// Smoothed values at or below this are treated as idle channels.
pub const ACTIVE_CHANNEL_FLOOR: f64 = 0.01;
