//! Reserved header keys and carry-over matching.

use std::collections::BTreeMap;

/// Header bag carried on tasks, messages and the execution context.
pub type Headers = BTreeMap<String, String>;

/// Retry loop counter. Lives on the task so it survives requeue and restart.
pub const LOOP_COUNTER: &str = "geoflow.loop-counter";

/// Correlation id of the run. Carried on message attributes.
pub const CORRELATION_ID: &str = "geoflow.correlation-id";

/// Default carry-over prefix.
pub const DEFAULT_CARRY_PREFIX: &str = "geoflow.";

/// Decides which context headers are always propagated to the next iteration.
#[derive(Debug, Clone)]
pub struct CarryOver {
    prefixes: Vec<String>,
}

impl CarryOver {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `key` is carried regardless of follow-up production.
    ///
    /// The loop counter is per-task state and is never carried.
    pub fn matches(&self, key: &str) -> bool {
        key != LOOP_COUNTER && self.prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }

    /// Select the carried subset of `headers`.
    pub fn select(&self, headers: &Headers) -> Headers {
        headers
            .iter()
            .filter(|(k, _)| self.matches(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl Default for CarryOver {
    fn default() -> Self {
        Self::new([DEFAULT_CARRY_PREFIX])
    }
}
