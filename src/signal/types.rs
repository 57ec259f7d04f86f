//! Sample and score types for the signal pipeline.
//!
//! Samples carry timing and magnitude data only. Keystroke samples never
//! include key identity, pointer samples never leave the analysis run.

use crate::signal::buffer::RingBuffer;
use crate::signal::{
    KEYSTROKE_BUFFER_SIZE, MOTION_BUFFER_SIZE, POINTER_BUFFER_SIZE, SCROLL_BUFFER_SIZE,
};
use serde::{Deserialize, Serialize};

/// One pointer movement. `t` is milliseconds on the producer's clock.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PointerSample {
    pub x: f64,
    pub y: f64,
    pub t: f64,
    pub pressure: f64,
}

/// Cumulative scroll position at time `t`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScrollSample {
    pub y: f64,
    pub t: f64,
}

/// A key press instant. Timing only, never key identity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KeystrokeSample {
    pub t: f64,
}

/// One device-motion reading: 3-axis acceleration and rotation rate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MotionSample {
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
    pub gx: f64,
    pub gy: f64,
    pub gz: f64,
    pub t: f64,
}

/// A raw sample on any channel, as produced by capture layers or replay files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SampleEvent {
    Pointer(PointerSample),
    Scroll(ScrollSample),
    Keystroke(KeystrokeSample),
    Motion(MotionSample),
}

impl SampleEvent {
    /// Producer-clock timestamp in milliseconds.
    pub fn t(&self) -> f64 {
        match self {
            SampleEvent::Pointer(s) => s.t,
            SampleEvent::Scroll(s) => s.t,
            SampleEvent::Keystroke(s) => s.t,
            SampleEvent::Motion(s) => s.t,
        }
    }
}

/// Smoothed per-channel activity scores. Each value is EMA state owned by a
/// single analysis run; pre-aggregation values stay within [0, 0.85].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelScores {
    pub pointer: f64,
    pub scroll: f64,
    pub keystroke: f64,
    pub tremor: f64,
    pub coherence: f64,
}

/// The four raw-sample ring buffers feeding the estimators.
#[derive(Debug)]
pub struct SignalBuffers {
    pub pointer: RingBuffer<PointerSample>,
    pub scroll: RingBuffer<ScrollSample>,
    pub keystroke: RingBuffer<KeystrokeSample>,
    pub motion: RingBuffer<MotionSample>,
}

impl SignalBuffers {
    pub fn new() -> Self {
        Self {
            pointer: RingBuffer::new(POINTER_BUFFER_SIZE),
            scroll: RingBuffer::new(SCROLL_BUFFER_SIZE),
            keystroke: RingBuffer::new(KEYSTROKE_BUFFER_SIZE),
            motion: RingBuffer::new(MOTION_BUFFER_SIZE),
        }
    }

    pub fn push(&mut self, event: SampleEvent) {
        match event {
            SampleEvent::Pointer(s) => self.pointer.push(s),
            SampleEvent::Scroll(s) => self.scroll.push(s),
            SampleEvent::Keystroke(s) => self.keystroke.push(s),
            SampleEvent::Motion(s) => self.motion.push(s),
        }
    }

    pub fn clear(&mut self) {
        self.pointer.clear();
        self.scroll.clear();
        self.keystroke.clear();
        self.motion.clear();
    }
}

impl Default for SignalBuffers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_respect_channel_capacities() {
        let mut buffers = SignalBuffers::new();
        for i in 0..500 {
            buffers.push(SampleEvent::Keystroke(KeystrokeSample { t: i as f64 }));
        }
        assert_eq!(buffers.keystroke.len(), KEYSTROKE_BUFFER_SIZE);
        assert_eq!(buffers.pointer.capacity(), POINTER_BUFFER_SIZE);
    }

    #[test]
    fn test_sample_event_json_tagging() {
        let json = r#"{"type":"pointer","x":10.0,"y":20.0,"t":100.0,"pressure":0.5}"#;
        let event: SampleEvent = serde_json::from_str(json).unwrap();
        match event {
            SampleEvent::Pointer(s) => assert_eq!(s.x, 10.0),
            _ => panic!("wrong variant"),
        }
        assert_eq!(event.t(), 100.0);
    }
}
