//! A stand-in [`ExportSampler`] for exporter tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::config::SamplingConfig;
use crate::record::{LogRecord, SpanRecord};
use crate::sampler::ExportSampler;

/// Keeps or drops every record without looking at rules, and remembers the
/// configs it was given.
pub struct FakeSampler {
    keep: bool,
    enabled: AtomicBool,
    config: Mutex<Option<SamplingConfig>>,
    set_config_calls: AtomicUsize,
}

impl FakeSampler {
    pub fn keep_all() -> Self {
        Self::new(true)
    }

    pub fn drop_all() -> Self {
        Self::new(false)
    }

    fn new(keep: bool) -> Self {
        Self {
            keep,
            enabled: AtomicBool::new(true),
            config: Mutex::new(None),
            set_config_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// The last config passed to `set_config`.
    pub fn config(&self) -> Option<SamplingConfig> {
        self.config.lock().clone()
    }

    pub fn set_config_calls(&self) -> usize {
        self.set_config_calls.load(Ordering::Relaxed)
    }

    fn filter<T>(&self, items: Vec<T>) -> Vec<T> {
        if !self.is_sampling_enabled() || self.keep {
            items
        } else {
            Vec::new()
        }
    }
}

impl ExportSampler for FakeSampler {
    fn sample_spans<S: SpanRecord>(&self, items: Vec<S>) -> Vec<S> {
        self.filter(items)
    }

    fn sample_logs<L: LogRecord>(&self, items: Vec<L>) -> Vec<L> {
        self.filter(items)
    }

    fn is_sampling_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_config(&self, config: Option<SamplingConfig>) {
        self.set_config_calls.fetch_add(1, Ordering::Relaxed);
        *self.config.lock() = config;
    }
}
