//! Per-channel activity estimators.
//!
//! Each estimator takes a short window of one channel's samples and returns an
//! instantaneous activity value in [0, `CHANNEL_SCORE_CAP`]. All are pure and
//! deterministic; a window below the documented minimum yields 0, which the
//! pipeline treats as "no signal yet" rather than an error.

use crate::signal::types::{KeystrokeSample, MotionSample, PointerSample, ScrollSample};
use crate::signal::{ACTIVE_CHANNEL_FLOOR, ANALYSIS_DURATION_MS, CHANNEL_SCORE_CAP, COHERENCE_SCALE};
use statrs::statistics::Statistics;

/// Linear interpolation, the EMA step: `a + (b - a) * t`.
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

fn last_n<T>(samples: &[T], n: usize) -> &[T] {
    &samples[samples.len().saturating_sub(n)..]
}

/// Pointer dynamics: mean frame-to-frame speed plus an acceleration proxy
/// over the last 6 samples. Requires at least 4 samples.
pub fn pointer_jitter(samples: &[PointerSample]) -> f64 {
    if samples.len() < 4 {
        return 0.0;
    }
    let r = last_n(samples, 6);

    let speeds: Vec<f64> = r
        .windows(2)
        .map(|w| {
            let dx = w[1].x - w[0].x;
            let dy = w[1].y - w[0].y;
            (dx * dx + dy * dy).sqrt()
        })
        .collect();
    let speed = speeds.iter().mean();

    let accel = speeds
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .sum::<f64>()
        / (speeds.len() - 1).max(1) as f64;

    // Speed 0-20px/frame maps to 0-0.4, accel 0-10 to 0-0.45
    (speed * 0.02 + accel * 0.045).clamp(0.0, CHANNEL_SCORE_CAP)
}

/// Scroll entropy: how much the latest scroll speed deviates from the recent
/// window, plus overall spread. Requires at least 3 samples; zero-dt steps
/// are skipped.
pub fn scroll_entropy(samples: &[ScrollSample]) -> f64 {
    if samples.len() < 3 {
        return 0.0;
    }
    let r = last_n(samples, 6);

    let mut speeds = Vec::with_capacity(r.len());
    for w in r.windows(2) {
        let dt = w[1].t - w[0].t;
        if dt > 0.0 {
            speeds.push((w[1].y - w[0].y).abs() / dt);
        }
    }
    if speeds.len() < 2 {
        return 0.0;
    }

    let mean = speeds.iter().mean();
    let latest = speeds[speeds.len() - 1];
    let deviation = if mean > 0.001 {
        (latest - mean).abs() / mean
    } else {
        0.0
    };

    let max = speeds.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = speeds.iter().copied().fold(f64::INFINITY, f64::min);
    let spread = if max > 0.0 { (max - min) / max } else { 0.0 };

    let activity = if mean > 0.0 { 0.1 } else { 0.0 };
    (deviation * 0.3 + spread * 0.4 + activity).clamp(0.0, CHANNEL_SCORE_CAP)
}

/// Keystroke rhythm: latest inter-key interval deviation from the window mean
/// plus the coefficient of variation of the interval set, over the last 8
/// keystrokes. Timing only; key identity is never captured.
pub fn keystroke_rhythm(samples: &[KeystrokeSample]) -> f64 {
    if samples.len() < 3 {
        return 0.0;
    }
    let r = last_n(samples, 8);

    let intervals: Vec<f64> = r.windows(2).map(|w| w[1].t - w[0].t).collect();
    if intervals.len() < 2 {
        return 0.0;
    }

    let mean = intervals.iter().mean();
    if mean == 0.0 {
        return 0.0;
    }

    let latest = intervals[intervals.len() - 1];
    let deviation = (latest - mean).abs() / mean;
    let cv = intervals.iter().population_std_dev() / mean;

    (deviation * 0.3 + cv * 0.4).clamp(0.0, CHANNEL_SCORE_CAP)
}

/// Micro-tremor from pointer data (desktop fallback): spread of frame-to-frame
/// displacement magnitudes combined with the rate of displacement-delta sign
/// reversals, a discrete analogue of zero-crossing rate. Requires at least 4
/// of the last 10 samples.
pub fn micro_tremor(samples: &[PointerSample]) -> f64 {
    let r = last_n(samples, 10);
    if r.len() < 4 {
        return 0.0;
    }

    let disps: Vec<f64> = r
        .windows(2)
        .map(|w| {
            let dx = w[1].x - w[0].x;
            let dy = w[1].y - w[0].y;
            (dx * dx + dy * dy).sqrt()
        })
        .collect();
    let variance = disps.iter().population_variance();

    let reversals = disps
        .windows(3)
        .filter(|w| (w[2] - w[1]) * (w[1] - w[0]) < 0.0)
        .count();
    let osc = if disps.len() > 2 {
        reversals as f64 / (disps.len() - 2) as f64
    } else {
        0.0
    };

    (variance.sqrt() * 0.08 + osc * 0.4).clamp(0.0, CHANNEL_SCORE_CAP)
}

/// Micro-tremor from device motion (preferred when enough motion samples are
/// available): variance of the 3-axis acceleration magnitude over the last 20
/// readings.
pub fn mobile_tremor(samples: &[MotionSample]) -> f64 {
    if samples.len() < 20 {
        return 0.0;
    }
    let r = last_n(samples, 20);

    let mags: Vec<f64> = r
        .iter()
        .map(|s| (s.ax * s.ax + s.ay * s.ay + s.az * s.az).sqrt())
        .collect();
    (mags.iter().population_variance().sqrt() * 3.0).clamp(0.0, CHANNEL_SCORE_CAP)
}

/// Pearson correlation over two equal-length series. Fewer than 3 points or a
/// degenerate (constant) series yields 0.
fn pearson(x: &[f64], y: &[f64]) -> f64 {
    if x.len() < 3 || x.len() != y.len() {
        return 0.0;
    }
    let denom = x.iter().population_std_dev() * y.iter().population_std_dev();
    if denom <= f64::EPSILON {
        return 0.0;
    }
    x.iter().population_covariance(y.iter()) / denom
}

/// Cross-channel coherence: mean absolute pairwise correlation over the
/// smoothed histories of the pointer/scroll/keystroke/tremor channels.
///
/// Channels with history length > 5 count as active; fewer than 2 active
/// channels yields exactly 0. Correlation is taken over the last
/// min(lenA, lenB, 30) aligned values per pair, sign-agnostic: genuine motor
/// output from a single human correlates across channels, and anti-correlation
/// is just as informative as correlation. Scale and cap are calibration
/// constants, not correctness requirements.
pub fn cross_channel_coherence(channels: [&[f64]; 4]) -> f64 {
    let active: Vec<&[f64]> = channels.into_iter().filter(|c| c.len() > 5).collect();
    if active.len() < 2 {
        return 0.0;
    }

    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..active.len() {
        for j in (i + 1)..active.len() {
            let len = active[i].len().min(active[j].len()).min(30);
            if len < 3 {
                continue;
            }
            let a = &active[i][active[i].len() - len..];
            let b = &active[j][active[j].len() - len..];
            total += pearson(a, b).abs();
            pairs += 1;
        }
    }

    if pairs == 0 {
        0.0
    } else {
        (total / pairs as f64 * COHERENCE_SCALE).clamp(0.0, CHANNEL_SCORE_CAP)
    }
}

/// Overall humanness score in [0, 0.99].
///
/// Weighted combination of the average of active channel scores, coherence,
/// elapsed-time confidence, and a breadth-of-evidence bonus. Monotonic in each
/// input: more signal, more coherence, more elapsed time, or more active
/// channels never lowers the score.
pub fn human_score(channels: &[f64], coherence: f64, elapsed_ms: f64) -> f64 {
    let active: Vec<f64> = channels
        .iter()
        .copied()
        .filter(|v| *v > ACTIVE_CHANNEL_FLOOR)
        .collect();
    let avg = if active.is_empty() {
        0.0
    } else {
        active.iter().mean()
    };
    let time = (elapsed_ms / ANALYSIS_DURATION_MS).clamp(0.0, 1.0);
    let bonus = (active.len() as f64 * 0.06).clamp(0.0, 0.2);

    (avg * 0.4 + coherence * 0.25 + time * 0.15 + bonus).clamp(0.0, 0.99)
}
