//! Compliance rules
//!
//! Each rule is a stateless predicate over a [`Workload`] snapshot. The
//! evaluation instant is passed in so that every rule in a cycle sees the
//! same clock. Malformed workload data makes a rule fail, never error.

use crate::models::Workload;
use chrono::{DateTime, Duration, Utc};

/// Names of the built-in rules
pub mod names {
    pub const IMAGE_PREFIX: &str = "image_prefix";
    pub const TEAM_LABEL_PRESENT: &str = "team_label_present";
    pub const RECENT_START_TIME: &str = "recent_start_time";
}

/// Default age cutoff for `recent_start_time` (7 days)
pub const DEFAULT_RECENCY_THRESHOLD_HOURS: i64 = 7 * 24;

/// A named deterministic predicate over a workload
pub trait Rule: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, workload: &Workload, now: DateTime<Utc>) -> bool;
}

/// Every image must live under the configured organization.
///
/// The organization is the first `/`-delimited segment of the reference, so
/// `org/app:1` belongs to `org` while `app:1` belongs to nobody.
#[derive(Debug, Clone)]
pub struct ImagePrefixRule {
    prefix: String,
}

impl ImagePrefixRule {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Rule for ImagePrefixRule {
    fn name(&self) -> &str {
        names::IMAGE_PREFIX
    }

    fn evaluate(&self, workload: &Workload, _now: DateTime<Utc>) -> bool {
        workload.images.iter().all(|image| {
            image
                .split_once('/')
                .map(|(org, _)| org == self.prefix)
                .unwrap_or(false)
        })
    }
}

/// The label mapping must contain a key, whatever its value
#[derive(Debug, Clone)]
pub struct LabelPresentRule {
    key: String,
}

impl LabelPresentRule {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Rule for LabelPresentRule {
    fn name(&self) -> &str {
        names::TEAM_LABEL_PRESENT
    }

    fn evaluate(&self, workload: &Workload, _now: DateTime<Utc>) -> bool {
        workload.labels.contains_key(&self.key)
    }
}

/// The workload was created no longer than `threshold` ago (inclusive)
#[derive(Debug, Clone)]
pub struct RecentStartRule {
    threshold: Duration,
}

impl RecentStartRule {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }
}

impl Rule for RecentStartRule {
    fn name(&self) -> &str {
        names::RECENT_START_TIME
    }

    fn evaluate(&self, workload: &Workload, now: DateTime<Utc>) -> bool {
        match workload.created_at {
            Some(created) => now.signed_duration_since(created) <= self.threshold,
            None => false,
        }
    }
}

/// Settings for the built-in rules
#[derive(Debug, Clone)]
pub struct RuleConfig {
    pub image_prefix: String,
    pub required_label_key: String,
    pub recency_threshold: Duration,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            image_prefix: "org".to_string(),
            required_label_key: "team".to_string(),
            recency_threshold: Duration::hours(DEFAULT_RECENCY_THRESHOLD_HOURS),
        }
    }
}

/// Ordered list of rules applied to every workload
#[derive(Default)]
pub struct RuleSet {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in rules, in reporting order
    pub fn standard(config: &RuleConfig) -> Self {
        Self::new()
            .with_rule(ImagePrefixRule::new(config.image_prefix.clone()))
            .with_rule(LabelPresentRule::new(config.required_label_key.clone()))
            .with_rule(RecentStartRule::new(config.recency_threshold))
    }

    pub fn with_rule(mut self, rule: impl Rule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Rule> {
        self.rules.iter().map(|r| r.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.iter().map(|r| r.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl std::fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleSet")
            .field("rules", &self.names())
            .finish()
    }
}
