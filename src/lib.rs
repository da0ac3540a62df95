//! Rule-based sampling of spans and log records, applied right before export.
//!
//! A [`SamplingConfig`] holds ordered span and log rules. For each record the
//! first matching rule wins and the record is kept with that rule's ratio;
//! records no rule matches are always kept. Configs can be replaced at any
//! time from another thread without blocking exporters, and every batch is
//! sampled against a single config snapshot.
//!
//! # Example
//!
//! ```
//! use export_sampler::{
//!     CustomSampler, ExportSampler, MatchConfig, SamplingConfig, Span, SpanRuleConfig,
//! };
//!
//! let sampler = CustomSampler::builder().build();
//! sampler.set_config(Some(SamplingConfig {
//!     spans: vec![SpanRuleConfig::new(0.0).with_name(MatchConfig::exact("health"))],
//!     logs: vec![],
//! }));
//!
//! let kept = sampler.sample_spans(vec![Span::new("health"), Span::new("GET /users")]);
//! assert_eq!(kept.len(), 1);
//! assert_eq!(kept[0].name, "GET /users");
//! ```

mod attributes;
mod builder;
mod cache;
mod config;
pub mod fake;
mod matcher;
pub mod provider;
mod record;
mod rule;
mod sampler;

pub use attributes::AttributeEvaluator;
pub use builder::SamplerBuilder;
pub use cache::BoundedCache;
pub use config::{
    AttributeConfig, EventConfig, LogRuleConfig, MatchConfig, Pattern, SamplingConfig,
    SpanRuleConfig,
};
pub use matcher::{DEFAULT_REGEX_CACHE_CAPACITY, Matcher};
pub use provider::{ConfigError, ConfigProvider};
pub use record::{AttributeValue, Attributes, Log, LogRecord, Span, SpanEvent, SpanRecord};
pub use rule::RuleEvaluator;
pub use sampler::{
    ATTR_SAMPLING_RATIO, CustomSampler, Decider, ExportSampler, SamplingResult, Stats,
    default_decider,
};

#[cfg(test)]
mod tests {
    use std::io::{self, Write};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, mpsc};
    use std::time::Duration;

    use statrs::distribution::{Binomial, DiscreteCDF};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::Registry;
    use tracing_subscriber::fmt::MakeWriter;
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    use crate::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for SharedBuf {
        type Writer = SharedBuf;
        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    impl SharedBuf {
        fn lines(&self) -> Vec<String> {
            let raw = self.0.lock().unwrap();
            let s = String::from_utf8_lossy(&raw);
            s.lines().map(String::from).collect()
        }
    }

    /// Exports every event through the sampler it is reporting on, the way a
    /// tracing-to-OpenTelemetry log bridge with a synchronous exporter does.
    struct Bridge {
        sampler: Arc<CustomSampler>,
        warnings: Arc<AtomicUsize>,
    }

    impl<S: Subscriber> Layer<S> for Bridge {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::WARN {
                self.warnings.fetch_add(1, Ordering::Relaxed);
            }
            self.sampler.sample_logs(vec![Log::new("WARN", "bridged")]);
            self.sampler
                .rules()
                .matcher()
                .matches(&MatchConfig::regex("(unclosed"), "bridged");
        }
    }

    fn warning_lines(buf: &SharedBuf) -> usize {
        buf.lines()
            .into_iter()
            .filter(|l| l.contains("invalid regex"))
            .count()
    }

    fn span_config(rules: Vec<SpanRuleConfig>) -> SamplingConfig {
        SamplingConfig {
            spans: rules,
            logs: vec![],
        }
    }

    fn spans(names: &[&str]) -> Vec<Span> {
        names.iter().map(|name| Span::new(*name)).collect()
    }

    fn names(spans: &[Span]) -> Vec<&str> {
        spans.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn disabled_sampler_is_a_pass_through() {
        let sampler = CustomSampler::builder()
            .config(span_config(vec![SpanRuleConfig::new(0.0)]))
            .enabled(false)
            .build();
        assert!(!sampler.is_sampling_enabled());

        let input = spans(&["a", "b", "c"]);
        assert_eq!(sampler.sample_spans(input.clone()), input);

        let logs = vec![Log::new("INFO", "hello")];
        assert_eq!(sampler.sample_logs(logs.clone()), logs);
    }

    #[test]
    fn unconfigured_sampler_is_a_pass_through() {
        let sampler = CustomSampler::default();
        assert!(sampler.is_sampling_enabled());
        assert!(sampler.config().is_none());

        let input = spans(&["a", "b"]);
        assert_eq!(sampler.sample_spans(input.clone()), input);
    }

    #[test]
    fn clearing_config_restores_pass_through() {
        let sampler = CustomSampler::builder()
            .config(span_config(vec![SpanRuleConfig::new(0.0)]))
            .build();
        assert!(sampler.sample_spans(spans(&["a"])).is_empty());

        sampler.set_config(None);
        assert_eq!(sampler.sample_spans(spans(&["a"])), spans(&["a"]));

        sampler.set_enabled(false);
        sampler.set_config(Some(span_config(vec![SpanRuleConfig::new(0.0)])));
        assert_eq!(sampler.sample_spans(spans(&["a"])).len(), 1);
        sampler.set_enabled(true);
        assert!(sampler.sample_spans(spans(&["a"])).is_empty());
    }

    #[test]
    fn ratio_one_keeps_everything_and_zero_drops_everything() {
        let keep = CustomSampler::builder()
            .config(span_config(vec![SpanRuleConfig::new(1.0)]))
            .build();
        let drop = CustomSampler::builder()
            .config(span_config(vec![SpanRuleConfig::new(0.0)]))
            .build();

        for _ in 0..100 {
            let batch: Vec<_> = (0..100).map(|i| Span::new(format!("span-{i}"))).collect();
            assert_eq!(keep.sample_spans(batch.clone()).len(), 100);
            assert!(drop.sample_spans(batch).is_empty());
        }
    }

    #[test]
    fn exact_rule_is_full_string() {
        let sampler = CustomSampler::builder()
            .config(span_config(vec![
                SpanRuleConfig::new(0.0).with_name(MatchConfig::exact("health")),
            ]))
            .build();

        for _ in 0..100 {
            let kept = sampler.sample_spans(spans(&["health", "health-check", "health"]));
            assert_eq!(names(&kept), ["health-check"]);
            assert!(!kept[0].attributes.contains_key(ATTR_SAMPLING_RATIO));
        }
    }

    #[test]
    fn output_preserves_relative_order() {
        let sampler = CustomSampler::builder()
            .config(span_config(vec![
                SpanRuleConfig::new(0.0).with_name(MatchConfig::regex("^drop")),
            ]))
            .build();

        let kept = sampler.sample_spans(spans(&["a", "drop-1", "b", "c", "drop-2", "d"]));
        assert_eq!(names(&kept), ["a", "b", "c", "d"]);
    }

    #[test]
    fn kept_matches_are_annotated() {
        let sampler = CustomSampler::builder()
            .config(span_config(vec![
                SpanRuleConfig::new(1.0).with_name(MatchConfig::exact("db.query")),
            ]))
            .build();

        let kept = sampler.sample_spans(spans(&["db.query", "other"]));
        assert_eq!(kept[0].attributes[ATTR_SAMPLING_RATIO], AttributeValue::Double(1.0));
        assert!(kept[1].attributes.is_empty());
    }

    #[test]
    fn regex_ratio_converges() {
        const N: u64 = 10_000;
        let sampler = CustomSampler::builder()
            .config(span_config(vec![
                SpanRuleConfig::new(0.5).with_name(MatchConfig::regex("^GET /api/.*")),
            ]))
            .build();

        let batch: Vec<_> = (0..N).map(|i| Span::new(format!("GET /api/items/{i}"))).collect();
        let kept = sampler.sample_spans(batch).len() as u64;

        let dist = Binomial::new(0.5, N).unwrap();
        let lo = dist.inverse_cdf(1e-6);
        let hi = dist.inverse_cdf(1.0 - 1e-6);
        assert!(
            (lo..=hi).contains(&kept),
            "kept {kept} of {N}, expected within [{lo}, {hi}]"
        );
    }

    #[test]
    fn logs_first_match_wins() {
        let sampler = CustomSampler::builder()
            .config(SamplingConfig {
                spans: vec![],
                logs: vec![
                    LogRuleConfig::new(1.0).with_message(MatchConfig::regex("important")),
                    LogRuleConfig::new(0.0).with_severity_text(MatchConfig::exact("DEBUG")),
                    LogRuleConfig::new(0.0).with_attribute(AttributeConfig::new(
                        MatchConfig::exact("noisy"),
                        MatchConfig::exact("true"),
                    )),
                ],
            })
            .build();

        let logs = vec![
            Log::new("DEBUG", "important debug detail"),
            Log::new("DEBUG", "chatter"),
            Log::new("INFO", "request done").with_attribute("noisy", true),
            Log::new("INFO", "request done").with_attribute("noisy", false),
        ];
        let kept = sampler.sample_logs(logs);
        let messages: Vec<_> = kept.iter().filter_map(|l| l.message.as_deref()).collect();
        assert_eq!(messages, ["important debug detail", "request done"]);
        assert_eq!(kept[1].attributes["noisy"], AttributeValue::Bool(false));
    }

    #[test]
    fn invalid_regex_warns_once_and_fails_open() {
        let buf = SharedBuf::default();
        let subscriber = Registry::default().with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(buf.clone()),
        );

        tracing::subscriber::with_default(subscriber, || {
            let sampler = CustomSampler::builder()
                .config(span_config(vec![
                    SpanRuleConfig::new(0.0).with_name(MatchConfig::regex("(unclosed")),
                    SpanRuleConfig::new(0.0).with_name(MatchConfig::exact("drop-me")),
                ]))
                .build();

            for _ in 0..10 {
                let kept = sampler.sample_spans(spans(&["(unclosed", "drop-me", "other"]));
                assert_eq!(names(&kept), ["(unclosed", "other"]);
            }
        });

        let warnings = warning_lines(&buf);
        assert_eq!(warnings, 1, "expected a single warning, got {warnings}");
    }

    #[test]
    fn invalid_regex_warns_once_with_a_tiny_regex_cache() {
        let buf = SharedBuf::default();
        let subscriber = Registry::default().with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(buf.clone()),
        );

        tracing::subscriber::with_default(subscriber, || {
            let config = span_config(vec![
                SpanRuleConfig::new(0.0).with_name(MatchConfig::regex("(unclosed")),
                SpanRuleConfig::new(0.0).with_name(MatchConfig::regex("^x")),
            ]);
            let sampler = CustomSampler::builder()
                .regex_cache_capacity(1)
                .config(config.clone())
                .build();

            for _ in 0..10 {
                let kept = sampler.sample_spans(spans(&["x1", "y", "x2"]));
                assert_eq!(names(&kept), ["y"]);
            }
            for _ in 0..5 {
                sampler.set_config(Some(config.clone()));
                assert!(sampler.sample_spans(spans(&["x"])).is_empty());
            }
        });

        let warnings = warning_lines(&buf);
        assert_eq!(warnings, 1, "expected a single warning, got {warnings}");
    }

    #[test]
    fn sampler_may_be_reentered_from_its_own_warnings() {
        let sampler = Arc::new(CustomSampler::default());
        let warnings = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        let bridge = Bridge {
            sampler: Arc::clone(&sampler),
            warnings: Arc::clone(&warnings),
        };
        let s = Arc::clone(&sampler);
        std::thread::spawn(move || {
            tracing::subscriber::with_default(Registry::default().with(bridge), || {
                s.set_config(Some(SamplingConfig {
                    spans: vec![SpanRuleConfig::new(0.0).with_name(MatchConfig::regex("(unclosed"))],
                    logs: vec![
                        LogRuleConfig::new(0.0).with_message(MatchConfig::regex("(also unclosed")),
                        LogRuleConfig::new(0.0).with_severity_text(MatchConfig::exact("DEBUG")),
                    ],
                }));
                for _ in 0..10 {
                    let kept = s.sample_spans(spans(&["(unclosed", "other"]));
                    assert_eq!(kept.len(), 2);
                    let logs = s.sample_logs(vec![Log::new("DEBUG", "x"), Log::new("INFO", "y")]);
                    assert_eq!(logs.len(), 1);
                }
                tx.send(()).ok();
            });
        });

        rx.recv_timeout(Duration::from_secs(5))
            .expect("sampler blocked while its warning was being exported");
        assert_eq!(warnings.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn numeric_wire_predicate_matches_the_value_it_names() {
        let config = SamplingConfig::from_json(
            r#"{ "spans": [{
                "attributes": [{
                    "key": { "matchValue": "retries" },
                    "attribute": { "matchValue": 2.0 }
                }],
                "samplingRatio": 0
            }] }"#,
        )
        .unwrap();
        let sampler = CustomSampler::builder().config(config).build();

        let kept = sampler.sample_spans(vec![
            Span::new("double").with_attribute("retries", 2.0f64),
            Span::new("int").with_attribute("retries", 2i64),
            Span::new("string").with_attribute("retries", "2"),
            Span::new("other").with_attribute("retries", 3.0f64),
        ]);
        assert_eq!(names(&kept), ["other"]);
    }

    #[test]
    fn config_swaps_are_never_torn() {
        fn keep(_: f64) -> bool {
            true
        }

        let low = span_config(vec![
            SpanRuleConfig::new(0.25).with_name(MatchConfig::regex("^even")),
            SpanRuleConfig::new(0.25),
        ]);
        let high = span_config(vec![
            SpanRuleConfig::new(0.75).with_name(MatchConfig::regex("^odd")),
            SpanRuleConfig::new(0.75),
        ]);

        let sampler = CustomSampler::builder()
            .config(low.clone())
            .decider(keep)
            .build();
        let done = AtomicBool::new(false);

        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..2_000 {
                    let next = if i % 2 == 0 { high.clone() } else { low.clone() };
                    sampler.set_config(Some(next));
                }
                done.store(true, Ordering::Release);
            });

            for _ in 0..4 {
                s.spawn(|| {
                    while !done.load(Ordering::Acquire) {
                        let batch: Vec<_> = (0..50)
                            .map(|i| {
                                let parity = if i % 2 == 0 { "even" } else { "odd" };
                                Span::new(format!("{parity}-{i}"))
                            })
                            .collect();
                        let kept = sampler.sample_spans(batch);
                        assert_eq!(kept.len(), 50);

                        let first = &kept[0].attributes[ATTR_SAMPLING_RATIO];
                        assert!(
                            kept.iter()
                                .all(|s| &s.attributes[ATTR_SAMPLING_RATIO] == first),
                            "batch saw rules from two configs"
                        );
                    }
                });
            }
        });
    }

    #[test]
    fn installed_config_is_visible_to_the_next_call() {
        let sampler = CustomSampler::default();
        for i in 0..100 {
            let ratio = if i % 2 == 0 { 0.0 } else { 1.0 };
            sampler.set_config(Some(span_config(vec![SpanRuleConfig::new(ratio)])));
            let kept = sampler.sample_spans(spans(&["x"]));
            assert_eq!(kept.len(), i % 2);
        }
    }
}
