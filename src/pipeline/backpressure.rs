use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Thresholds and step sizes for one job's controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackpressureSettings {
    pub high_water: f64,
    pub low_water: f64,
    pub delay_step_ms: u64,
    pub max_delay_ms: u64,
    /// Configured batch size; growth never goes past it.
    pub batch_size: usize,
    pub batch_step: usize,
    pub batch_floor: usize,
    /// Shrink the batch under pressure. Off when the signal is queue depth,
    /// where smaller batches only add round-trips to the slow sink.
    pub shrink_batch: bool,
    /// Consecutive low readings needed before relaxing.
    pub relax_after: u32,
}

impl Default for BackpressureSettings {
    fn default() -> Self {
        Self {
            high_water: 0.75,
            low_water: 0.25,
            delay_step_ms: 50,
            max_delay_ms: 2_000,
            batch_size: 100,
            batch_step: 10,
            batch_floor: 1,
            shrink_batch: true,
            relax_after: 2,
        }
    }
}

/// What the pipeline should do before the next chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adjustment {
    pub pressure: f64,
    pub delay: Duration,
    pub batch_size: usize,
    pub reclaim: bool,
}

/// Additive-increase/additive-decrease throttle. Owned by a single job.
#[derive(Debug, Clone)]
pub struct BackpressureController {
    settings: BackpressureSettings,
    delay_ms: u64,
    batch_size: usize,
    low_streak: u32,
}

impl BackpressureController {
    pub fn new(mut settings: BackpressureSettings) -> Self {
        settings.batch_size = settings.batch_size.max(1);
        settings.batch_floor = settings.batch_floor.clamp(1, settings.batch_size);
        settings.batch_step = settings.batch_step.max(1);
        if settings.low_water > settings.high_water {
            std::mem::swap(&mut settings.low_water, &mut settings.high_water);
        }
        let batch_size = settings.batch_size;
        Self { settings, delay_ms: 0, batch_size, low_streak: 0 }
    }

    pub fn settings(&self) -> &BackpressureSettings {
        &self.settings
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Feed one pressure reading in `[0, 1]`; out-of-range and NaN readings are clamped.
    pub fn observe(&mut self, pressure: f64) -> Adjustment {
        let pressure = if pressure.is_nan() { 0.0 } else { pressure.clamp(0.0, 1.0) };
        let s = &self.settings;
        let mut reclaim = false;

        if pressure >= s.high_water {
            self.low_streak = 0;
            self.delay_ms = (self.delay_ms + s.delay_step_ms).min(s.max_delay_ms);
            if s.shrink_batch {
                self.batch_size = self.batch_size.saturating_sub(s.batch_step).max(s.batch_floor);
            }
            reclaim = true;
        } else if pressure <= s.low_water {
            self.low_streak = self.low_streak.saturating_add(1);
            if self.low_streak >= s.relax_after.max(1) {
                self.delay_ms = self.delay_ms.saturating_sub(s.delay_step_ms);
                self.batch_size = (self.batch_size + s.batch_step).min(s.batch_size);
            }
        } else {
            self.low_streak = 0;
        }

        Adjustment { pressure, delay: self.delay(), batch_size: self.batch_size, reclaim }
    }
}

/// Source of pressure readings in `[0, 1]`.
pub trait PressureProbe: Send + Sync + std::fmt::Debug {
    fn sample(&self) -> f64;
}

/// Fill level of the decoded-chunk queue.
#[derive(Debug, Clone)]
pub struct QueueDepthProbe {
    depth: Arc<AtomicUsize>,
    capacity: usize,
}

impl QueueDepthProbe {
    pub fn new(capacity: usize) -> Self {
        Self { depth: Arc::new(AtomicUsize::new(0)), capacity: capacity.max(1) }
    }

    /// Shared counter the producer increments and the consumer decrements.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.depth.clone()
    }
}

impl PressureProbe for QueueDepthProbe {
    fn sample(&self) -> f64 {
        self.depth.load(Ordering::Relaxed) as f64 / self.capacity as f64
    }
}

/// Resident set size against a memory budget. Linux only; reads 0 elsewhere.
#[derive(Debug, Clone)]
pub struct RssProbe {
    budget_bytes: u64,
}

// statm reports pages; 4 KiB covers the platforms this runs on
const PAGE_SIZE: u64 = 4096;

impl RssProbe {
    pub fn new(budget_bytes: u64) -> Self {
        Self { budget_bytes: budget_bytes.max(1) }
    }

    fn resident_bytes() -> Option<u64> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        Some(pages * PAGE_SIZE)
    }
}

impl PressureProbe for RssProbe {
    fn sample(&self) -> f64 {
        Self::resident_bytes()
            .map(|rss| rss as f64 / self.budget_bytes as f64)
            .unwrap_or(0.0)
    }
}

/// Replays fixed readings, then repeats the last one.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    readings: Mutex<VecDeque<f64>>,
    last: Mutex<f64>,
}

impl ScriptedProbe {
    pub fn new(readings: impl IntoIterator<Item = f64>) -> Self {
        Self { readings: Mutex::new(readings.into_iter().collect()), last: Mutex::new(0.0) }
    }
}

impl PressureProbe for ScriptedProbe {
    fn sample(&self) -> f64 {
        let next = self.readings.lock().ok().and_then(|mut q| q.pop_front());
        match (next, self.last.lock()) {
            (Some(v), Ok(mut last)) => {
                *last = v;
                v
            }
            (Some(v), Err(_)) => v,
            (None, Ok(last)) => *last,
            (None, Err(_)) => 0.0,
        }
    }
}
