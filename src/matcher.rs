use std::cell::Cell;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use regex::Regex;
use thread_local::ThreadLocal;

use crate::cache::BoundedCache;
use crate::config::{MatchConfig, Pattern, SamplingConfig};
use crate::record::AttributeValue;

/// Default number of distinct regex patterns kept compiled.
pub const DEFAULT_REGEX_CACHE_CAPACITY: usize = 1024;

type Compiled = Result<Regex, regex::Error>;

/// Evaluates [`MatchConfig`] predicates against field values.
///
/// A matcher made with [`pinned_to`](Self::pinned_to) holds every regex of
/// one config, compiled when the config is installed. Any other pattern is
/// compiled on first use and kept in a bounded cache shared by all matchers
/// derived from the same root. Patterns that fail to compile never match and
/// are reported through `tracing`, after any cache lock is released.
pub struct Matcher {
    pinned: HashMap<Pattern, Compiled>,
    regexes: Arc<BoundedCache<String, Compiled>>,
    scratch: Arc<ThreadLocal<Cell<String>>>,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(DEFAULT_REGEX_CACHE_CAPACITY)
    }
}

impl Matcher {
    pub fn new(regex_cache_capacity: usize) -> Self {
        Self {
            pinned: HashMap::new(),
            regexes: Arc::new(BoundedCache::new(regex_cache_capacity)),
            scratch: Arc::new(ThreadLocal::new()),
        }
    }

    /// A matcher with every regex referenced by `config` compiled up front.
    ///
    /// Patterns already pinned in `self` are reused as is, so installing the
    /// same rules again neither recompiles nor warns. The result shares the
    /// fallback cache of `self`.
    pub fn pinned_to(&self, config: &SamplingConfig) -> Self {
        let mut pinned = HashMap::new();
        for pattern in config.patterns() {
            if pinned.contains_key(pattern) {
                continue;
            }
            let compiled = match self.pinned.get(pattern) {
                Some(compiled) => compiled.clone(),
                None => self.cached(pattern),
            };
            pinned.insert(pattern.clone(), compiled);
        }

        Self {
            pinned,
            regexes: Arc::clone(&self.regexes),
            scratch: Arc::clone(&self.scratch),
        }
    }

    pub fn matches(&self, predicate: &MatchConfig, value: &str) -> bool {
        match predicate {
            MatchConfig::Wildcard => true,
            MatchConfig::Exact(expected) => expected == value,
            MatchConfig::Regex(pattern) => match self.pinned.get(pattern) {
                Some(compiled) => compiled.as_ref().is_ok_and(|regex| regex.is_match(value)),
                None => self
                    .cached(pattern)
                    .is_ok_and(|regex| regex.is_match(value)),
            },
        }
    }

    /// Match an attribute value by its string form.
    pub fn matches_value(&self, predicate: &MatchConfig, value: &AttributeValue) -> bool {
        if let Some(s) = value.as_str() {
            return self.matches(predicate, s);
        }
        if predicate.is_wildcard() {
            return true;
        }

        let cell = self.scratch.get_or_default();
        let mut buf = cell.take();
        buf.clear();
        // Formatting into a String cannot fail.
        let _ = write!(buf, "{value}");
        let matched = self.matches(predicate, &buf);
        cell.set(buf);
        matched
    }

    /// Number of patterns in the fallback cache, valid or not.
    pub fn cached_patterns(&self) -> usize {
        self.regexes.len()
    }

    /// Number of patterns compiled for the config this matcher is pinned to.
    pub fn pinned_patterns(&self) -> usize {
        self.pinned.len()
    }

    fn cached(&self, pattern: &Pattern) -> Compiled {
        let (compiled, inserted) = self
            .regexes
            .get_or_insert_with(pattern.as_str(), || Regex::new(pattern.as_str()));
        if let (Err(error), true) = (&compiled, inserted) {
            tracing::warn!(
                pattern = pattern.as_str(),
                %error,
                "invalid regex in sampling rule, treating as non-matching"
            );
        }
        compiled
    }
}
