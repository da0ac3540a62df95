use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use arc_swap::ArcSwapOption;

use crate::builder::SamplerBuilder;
use crate::config::{SamplingConfig, clamp_ratio};
use crate::matcher::Matcher;
use crate::record::{AttributeValue, Attributes, LogRecord, SpanRecord};
use crate::rule::RuleEvaluator;

/// Attribute recording the ratio of the rule that matched a record.
pub const ATTR_SAMPLING_RATIO: &str = "launchdarkly.sampling.ratio";

/// Decides whether a record is kept, given the clamped ratio of its rule.
pub type Decider = fn(f64) -> bool;

/// Keeps with probability `ratio` using a uniform draw on `[0, 1)`.
pub fn default_decider(ratio: f64) -> bool {
    if ratio >= 1.0 {
        return true;
    }
    if ratio <= 0.0 {
        return false;
    }
    fastrand::f64() < ratio
}

/// Outcome of sampling one record.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingResult {
    pub sample: bool,
    /// Attributes to merge into the record, whether or not it is kept.
    pub attributes: Option<Attributes>,
}

impl SamplingResult {
    pub fn keep() -> Self {
        Self {
            sample: true,
            attributes: None,
        }
    }

    fn matched(ratio: f64, sample: bool) -> Self {
        let mut attributes = Attributes::new();
        attributes.insert(ATTR_SAMPLING_RATIO.to_owned(), AttributeValue::Double(ratio));
        Self {
            sample,
            attributes: Some(attributes),
        }
    }
}

/// The sampling capability an exporter depends on.
///
/// Batch calls never reorder or add records, and return their input
/// untouched when sampling is disabled.
///
/// The batch methods are generic over the host's record types, so exporters
/// take the sampler as a type parameter rather than as `dyn ExportSampler`.
pub trait ExportSampler: Send + Sync {
    fn sample_spans<S: SpanRecord>(&self, items: Vec<S>) -> Vec<S>;
    fn sample_logs<L: LogRecord>(&self, items: Vec<L>) -> Vec<L>;
    fn is_sampling_enabled(&self) -> bool;

    /// Install a new configuration, or clear it with `None`.
    fn set_config(&self, config: Option<SamplingConfig>);
}

/// Counters tracking how many records went through the sampler.
///
/// All counts are cumulative since the sampler was built. Pass-through
/// calls (disabled or unconfigured) are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Records checked against the installed rules.
    pub evaluated: u64,
    /// Records for which some rule matched.
    pub matched: u64,
    /// Records kept by batch calls.
    pub sampled: u64,
    /// Records removed from their batch.
    pub dropped: u64,
}

/// An installed config and an evaluator with its regexes already compiled.
///
/// Both are swapped together, so a batch never sees rules compiled for
/// another config.
pub(crate) struct Installed {
    config: Arc<SamplingConfig>,
    rules: RuleEvaluator,
}

impl Installed {
    pub(crate) fn new(config: SamplingConfig, current: &Matcher) -> Self {
        Self {
            rules: RuleEvaluator::new(current.pinned_to(&config)),
            config: Arc::new(config),
        }
    }
}

/// Rule-based sampler whose configuration can be swapped at any time.
///
/// Construct via [`CustomSampler::builder()`](crate::SamplerBuilder).
pub struct CustomSampler {
    pub(crate) installed: ArcSwapOption<Installed>,
    pub(crate) enabled: AtomicBool,
    pub(crate) rules: RuleEvaluator,
    pub(crate) decider: Decider,
    pub(crate) drop_orphaned_children: bool,
    pub(crate) evaluated: AtomicU64,
    pub(crate) matched: AtomicU64,
    pub(crate) sampled: AtomicU64,
    pub(crate) dropped: AtomicU64,
}

impl Default for CustomSampler {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CustomSampler {
    pub fn builder() -> SamplerBuilder {
        SamplerBuilder::new()
    }

    /// The currently installed configuration.
    pub fn config(&self) -> Option<Arc<SamplingConfig>> {
        self.installed
            .load()
            .as_ref()
            .map(|installed| Arc::clone(&installed.config))
    }

    /// Flip the kill switch. While disabled every call is a pass-through.
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::AcqRel);
        if was != enabled {
            tracing::debug!(enabled, "sampling kill switch changed");
        }
    }

    /// Evaluator for rules outside the installed config. Shares the
    /// sampler's bounded regex cache.
    pub fn rules(&self) -> &RuleEvaluator {
        &self.rules
    }

    /// Return a snapshot of the sampler's counters.
    pub fn stats(&self) -> Stats {
        Stats {
            evaluated: self.evaluated.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            sampled: self.sampled.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Sample a single span against the current configuration.
    pub fn sample_span<S: SpanRecord + ?Sized>(&self, span: &S) -> SamplingResult {
        match self.active_config() {
            Some(installed) => self.decide_span(&installed, span),
            None => SamplingResult::keep(),
        }
    }

    /// Sample a single log record against the current configuration.
    pub fn sample_log<L: LogRecord + ?Sized>(&self, log: &L) -> SamplingResult {
        match self.active_config() {
            Some(installed) => self.decide_log(&installed, log),
            None => SamplingResult::keep(),
        }
    }

    fn active_config(&self) -> Option<Arc<Installed>> {
        if !self.is_sampling_enabled() {
            return None;
        }
        self.installed.load_full()
    }

    fn decide_span<S: SpanRecord + ?Sized>(&self, installed: &Installed, span: &S) -> SamplingResult {
        self.evaluated.fetch_add(1, Ordering::Relaxed);
        match installed.rules.first_span_rule(&installed.config.spans, span) {
            Some(rule) => self.decide(rule.sampling_ratio),
            None => SamplingResult::keep(),
        }
    }

    fn decide_log<L: LogRecord + ?Sized>(&self, installed: &Installed, log: &L) -> SamplingResult {
        self.evaluated.fetch_add(1, Ordering::Relaxed);
        match installed.rules.first_log_rule(&installed.config.logs, log) {
            Some(rule) => self.decide(rule.sampling_ratio),
            None => SamplingResult::keep(),
        }
    }

    fn decide(&self, ratio: f64) -> SamplingResult {
        self.matched.fetch_add(1, Ordering::Relaxed);
        let ratio = clamp_ratio(ratio);
        SamplingResult::matched(ratio, (self.decider)(ratio))
    }

    fn retain<T>(&self, items: Vec<T>, keep: Vec<bool>) -> Vec<T> {
        let kept = keep.iter().filter(|k| **k).count() as u64;
        self.sampled.fetch_add(kept, Ordering::Relaxed);
        self.dropped
            .fetch_add(keep.len() as u64 - kept, Ordering::Relaxed);

        items
            .into_iter()
            .zip(keep)
            .filter_map(|(item, keep)| keep.then_some(item))
            .collect()
    }
}

/// Clear `keep` for every span whose ancestor in the batch was dropped.
fn drop_orphans<S: SpanRecord>(items: &[S], keep: &mut [bool]) {
    let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, item) in items.iter().enumerate() {
        if let Some(parent) = item.parent_span_id() {
            children.entry(parent).or_default().push(i);
        }
    }

    let mut pending: Vec<&str> = items
        .iter()
        .zip(keep.iter())
        .filter(|(_, keep)| !**keep)
        .filter_map(|(item, _)| item.span_id())
        .collect();

    while let Some(span_id) = pending.pop() {
        let Some(kids) = children.get(span_id) else {
            continue;
        };
        for &i in kids {
            if keep[i] {
                keep[i] = false;
                pending.extend(items[i].span_id());
            }
        }
    }
}

impl ExportSampler for CustomSampler {
    fn sample_spans<S: SpanRecord>(&self, mut items: Vec<S>) -> Vec<S> {
        // One snapshot per batch, so a concurrent swap never mixes rule sets.
        let Some(installed) = self.active_config() else {
            return items;
        };
        if installed.config.spans.is_empty() {
            return items;
        }

        let mut keep = Vec::with_capacity(items.len());
        for item in &mut items {
            let result = self.decide_span(&installed, &*item);
            if let Some(attributes) = result.attributes {
                item.merge_attributes(attributes);
            }
            keep.push(result.sample);
        }
        if self.drop_orphaned_children {
            drop_orphans(&items, &mut keep);
        }
        self.retain(items, keep)
    }

    fn sample_logs<L: LogRecord>(&self, mut items: Vec<L>) -> Vec<L> {
        let Some(installed) = self.active_config() else {
            return items;
        };
        if installed.config.logs.is_empty() {
            return items;
        }

        let mut keep = Vec::with_capacity(items.len());
        for item in &mut items {
            let result = self.decide_log(&installed, &*item);
            if let Some(attributes) = result.attributes {
                item.merge_attributes(attributes);
            }
            keep.push(result.sample);
        }
        self.retain(items, keep)
    }

    fn is_sampling_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_config(&self, config: Option<SamplingConfig>) {
        match &config {
            Some(config) => tracing::debug!(
                span_rules = config.spans.len(),
                log_rules = config.logs.len(),
                "installing sampling config"
            ),
            None => tracing::debug!("clearing sampling config"),
        }
        // Compile against the current snapshot so unchanged patterns carry over.
        let installed = config.map(|config| {
            let current = self.installed.load_full();
            let matcher = current
                .as_deref()
                .map_or(self.rules.matcher(), |installed| installed.rules.matcher());
            Arc::new(Installed::new(config, matcher))
        });
        self.installed.store(installed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MatchConfig, SpanRuleConfig};
    use crate::record::Span;

    fn drop_all(_: f64) -> bool {
        false
    }

    fn health_config() -> SamplingConfig {
        SamplingConfig {
            spans: vec![SpanRuleConfig::new(0.0).with_name(MatchConfig::exact("health"))],
            logs: vec![],
        }
    }

    #[test]
    fn default_decider_fast_paths() {
        for _ in 0..1_000 {
            assert!(default_decider(1.0));
            assert!(!default_decider(0.0));
        }
    }

    #[test]
    fn unmatched_records_are_kept_without_annotation() {
        let sampler = CustomSampler::builder().config(health_config()).build();
        assert_eq!(sampler.sample_span(&Span::new("health-check")), SamplingResult::keep());
    }

    #[test]
    fn matched_records_carry_the_ratio() {
        let sampler = CustomSampler::builder().config(health_config()).build();
        let result = sampler.sample_span(&Span::new("health"));
        assert!(!result.sample);
        assert_eq!(
            result.attributes.unwrap()[ATTR_SAMPLING_RATIO],
            AttributeValue::Double(0.0)
        );
    }

    #[test]
    fn ratio_is_clamped_before_deciding() {
        fn record(ratio: f64) -> bool {
            assert!((0.0..=1.0).contains(&ratio));
            true
        }
        let sampler = CustomSampler::builder()
            .config(SamplingConfig {
                spans: vec![SpanRuleConfig::new(4.0)],
                logs: vec![],
            })
            .decider(record)
            .build();
        let result = sampler.sample_span(&Span::new("x"));
        assert_eq!(
            result.attributes.unwrap()[ATTR_SAMPLING_RATIO],
            AttributeValue::Double(1.0)
        );
    }

    #[test]
    fn dropped_records_are_annotated_before_removal() {
        let sampler = CustomSampler::builder()
            .config(SamplingConfig {
                spans: vec![SpanRuleConfig::new(0.5)],
                logs: vec![],
            })
            .decider(drop_all)
            .build();

        let mut span = Span::new("x");
        let result = sampler.sample_span(&span);
        span.merge_attributes(result.attributes.unwrap());
        assert_eq!(span.attributes[ATTR_SAMPLING_RATIO], AttributeValue::Double(0.5));
        assert!(sampler.sample_spans(vec![span]).is_empty());
    }

    #[test]
    fn orphans_follow_their_dropped_parent() {
        let sampler = CustomSampler::builder()
            .config(health_config())
            .drop_orphaned_children(true)
            .build();

        let batch = vec![
            Span::new("root").with_ids("1", None),
            Span::new("health").with_ids("2", Some("1")),
            Span::new("child").with_ids("3", Some("2")),
            Span::new("grandchild").with_ids("4", Some("3")),
            Span::new("sibling").with_ids("5", Some("1")),
        ];
        let kept: Vec<_> = sampler
            .sample_spans(batch)
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(kept, ["root", "sibling"]);
        assert_eq!(sampler.stats().dropped, 3);
    }

    #[test]
    fn orphans_are_kept_by_default() {
        let sampler = CustomSampler::builder().config(health_config()).build();
        let batch = vec![
            Span::new("health").with_ids("2", None),
            Span::new("child").with_ids("3", Some("2")),
        ];
        let kept: Vec<_> = sampler
            .sample_spans(batch)
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(kept, ["child"]);
    }

    #[test]
    fn stats_count_evaluations() {
        let sampler = CustomSampler::builder().config(health_config()).build();
        sampler.sample_spans(vec![Span::new("health"), Span::new("a"), Span::new("b")]);
        assert_eq!(
            sampler.stats(),
            Stats {
                evaluated: 3,
                matched: 1,
                sampled: 2,
                dropped: 1,
            }
        );

        sampler.set_enabled(false);
        sampler.sample_spans(vec![Span::new("health")]);
        assert_eq!(sampler.stats().evaluated, 3);
    }
}
