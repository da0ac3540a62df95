use crate::attributes::AttributeEvaluator;
use crate::config::{EventConfig, LogRuleConfig, SpanRuleConfig};
use crate::matcher::Matcher;
use crate::record::{LogRecord, SpanEvent, SpanRecord};

/// Decides whether a single rule matches a span or log record.
///
/// Absent predicates are wildcards and empty predicate lists are satisfied.
#[derive(Default)]
pub struct RuleEvaluator {
    matcher: Matcher,
}

impl RuleEvaluator {
    pub fn new(matcher: Matcher) -> Self {
        Self { matcher }
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    fn attributes(&self) -> AttributeEvaluator<'_> {
        AttributeEvaluator::new(&self.matcher)
    }

    pub fn span_matches<S: SpanRecord + ?Sized>(&self, rule: &SpanRuleConfig, span: &S) -> bool {
        self.matcher.matches(&rule.name, span.name())
            && self.attributes().matches_all(&rule.attributes, span.attributes())
            && rule
                .events
                .iter()
                .all(|config| span.events().iter().any(|event| self.event_matches(config, event)))
    }

    pub fn event_matches(&self, config: &EventConfig, event: &SpanEvent) -> bool {
        self.matcher.matches(&config.name, &event.name)
            && self.attributes().matches_all(&config.attributes, &event.attributes)
    }

    /// A record without a string message or severity skips that predicate.
    pub fn log_matches<L: LogRecord + ?Sized>(&self, rule: &LogRuleConfig, log: &L) -> bool {
        log.message()
            .is_none_or(|message| self.matcher.matches(&rule.message, message))
            && log
                .severity_text()
                .is_none_or(|severity| self.matcher.matches(&rule.severity_text, severity))
            && self.attributes().matches_all(&rule.attributes, log.attributes())
    }

    /// The first rule, in configured order, that matches `span`.
    pub fn first_span_rule<'c, S: SpanRecord + ?Sized>(
        &self,
        rules: &'c [SpanRuleConfig],
        span: &S,
    ) -> Option<&'c SpanRuleConfig> {
        rules.iter().find(|rule| self.span_matches(rule, span))
    }

    /// The first rule, in configured order, that matches `log`.
    pub fn first_log_rule<'c, L: LogRecord + ?Sized>(
        &self,
        rules: &'c [LogRuleConfig],
        log: &L,
    ) -> Option<&'c LogRuleConfig> {
        rules.iter().find(|rule| self.log_matches(rule, log))
    }
}
