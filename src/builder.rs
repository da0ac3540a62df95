use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64};

use arc_swap::ArcSwapOption;

use crate::config::SamplingConfig;
use crate::matcher::{DEFAULT_REGEX_CACHE_CAPACITY, Matcher};
use crate::rule::RuleEvaluator;
use crate::sampler::{CustomSampler, Decider, Installed, default_decider};

/// Builder for [`CustomSampler`](crate::CustomSampler).
///
/// Created via [`CustomSampler::builder()`](crate::CustomSampler::builder).
pub struct SamplerBuilder {
    config: Option<SamplingConfig>,
    enabled: bool,
    regex_cache_capacity: usize,
    decider: Decider,
    drop_orphaned_children: bool,
}

impl Default for SamplerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SamplerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            enabled: true,
            regex_cache_capacity: DEFAULT_REGEX_CACHE_CAPACITY,
            decider: default_decider,
            drop_orphaned_children: false,
        }
    }

    /// Install `config` before the sampler is shared. Defaults to none.
    pub fn config(mut self, config: SamplingConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Initial state of the kill switch. Defaults to enabled.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Maximum number of distinct regex patterns kept compiled outside the
    /// installed config. Defaults to 1024.
    ///
    /// Patterns of an installed config are compiled when it is installed and
    /// are not bounded by this. Zero is treated as one.
    pub fn regex_cache_capacity(mut self, capacity: usize) -> Self {
        self.regex_cache_capacity = capacity;
        self
    }

    /// Replace the probabilistic keep/drop draw.
    pub fn decider(mut self, decider: Decider) -> Self {
        self.decider = decider;
        self
    }

    /// Also drop spans whose parent span in the same batch was dropped.
    pub fn drop_orphaned_children(mut self, enabled: bool) -> Self {
        self.drop_orphaned_children = enabled;
        self
    }

    /// Consume the builder and create a [`CustomSampler`](crate::CustomSampler).
    pub fn build(self) -> CustomSampler {
        let rules = RuleEvaluator::new(Matcher::new(self.regex_cache_capacity));
        let installed = self
            .config
            .map(|config| Arc::new(Installed::new(config, rules.matcher())));
        CustomSampler {
            installed: ArcSwapOption::new(installed),
            enabled: AtomicBool::new(self.enabled),
            rules,
            decider: self.decider,
            drop_orphaned_children: self.drop_orphaned_children,
            evaluated: AtomicU64::new(0),
            matched: AtomicU64::new(0),
            sampled: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }
}
