use crate::config::AttributeConfig;
use crate::matcher::Matcher;
use crate::record::Attributes;

/// Matches attribute predicates against an attribute set.
#[derive(Clone, Copy)]
pub struct AttributeEvaluator<'a> {
    matcher: &'a Matcher,
}

impl<'a> AttributeEvaluator<'a> {
    pub fn new(matcher: &'a Matcher) -> Self {
        Self { matcher }
    }

    /// True if a single attribute satisfies both the key and the value predicate.
    pub fn matches_any(&self, config: &AttributeConfig, attributes: &Attributes) -> bool {
        attributes.iter().any(|(key, value)| {
            self.matcher.matches(&config.key, key) && self.matcher.matches_value(&config.value, value)
        })
    }

    /// True if every entry of `configs` is satisfied by some attribute.
    ///
    /// An empty list is satisfied by any attribute set.
    pub fn matches_all(&self, configs: &[AttributeConfig], attributes: &Attributes) -> bool {
        configs
            .iter()
            .all(|config| self.matches_any(config, attributes))
    }
}
