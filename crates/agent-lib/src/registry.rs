//! Concurrency-safe gauge store
//!
//! The registry holds an immutable [`MetricSnapshot`] behind an atomically
//! swapped pointer. Writers build a new snapshot and swap it in, so a reader
//! always sees either every series of an update or none of them.

use arc_swap::ArcSwap;
use prometheus::core::{Collector, Desc};
use prometheus::proto::{Gauge, LabelPair, Metric, MetricFamily, MetricType};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

/// Service healthcheck gauge
pub const UP: &str = "up";
/// Default name of the recency partition gauge
pub const PODS_RECENT_COUNT: &str = "pods_recent_count";
/// Per-rule pass/fail counts of the last cycle
pub const WORKLOAD_RULE_RESULTS: &str = "workload_rule_results";

/// Whether `name` matches the exposition format's `[a-zA-Z_:][a-zA-Z0-9_:]*`
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// One gauge family: help text, label names and the current series
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeFamily {
    pub help: String,
    pub label_names: Vec<String>,
    /// Label values (in `label_names` order) to gauge value
    pub series: BTreeMap<Vec<String>, f64>,
}

/// Point-in-time copy of every gauge family
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSnapshot {
    families: BTreeMap<String, GaugeFamily>,
}

impl MetricSnapshot {
    pub fn family(&self, name: &str) -> Option<&GaugeFamily> {
        self.families.get(name)
    }

    pub fn families(&self) -> impl Iterator<Item = (&str, &GaugeFamily)> {
        self.families.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Value of one series, `None` if it was never set
    pub fn get(&self, name: &str, label_values: &[&str]) -> Option<f64> {
        let key: Vec<String> = label_values.iter().map(|v| v.to_string()).collect();
        self.families.get(name)?.series.get(&key).copied()
    }
}

/// Full replacement of one family's series
#[derive(Debug, Clone)]
pub struct FamilyUpdate {
    pub name: String,
    pub series: Vec<(Vec<String>, f64)>,
}

impl FamilyUpdate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            series: Vec::new(),
        }
    }

    pub fn with_series(mut self, label_values: &[&str], value: f64) -> Self {
        self.series
            .push((label_values.iter().map(|v| v.to_string()).collect(), value));
        self
    }
}

/// Store of named, labelled gauges with overwrite-on-set semantics
#[derive(Debug, Default)]
pub struct MetricRegistry {
    current: ArcSwap<MetricSnapshot>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a gauge family. Re-describing keeps existing series when the
    /// label names are unchanged and drops them otherwise.
    pub fn describe(&self, name: &str, help: &str, label_names: &[&str]) {
        let label_names: Vec<String> = label_names.iter().map(|l| l.to_string()).collect();
        self.current.rcu(|current| {
            let mut next = MetricSnapshot::clone(current);
            let series = match next.families.get(name) {
                Some(existing) if existing.label_names == label_names => existing.series.clone(),
                _ => BTreeMap::new(),
            };
            next.families.insert(
                name.to_string(),
                GaugeFamily {
                    help: help.to_string(),
                    label_names: label_names.clone(),
                    series,
                },
            );
            next
        });
    }

    pub fn is_described(&self, name: &str) -> bool {
        self.read().family(name).is_some()
    }

    /// Overwrite a single series
    pub fn set(&self, name: &str, label_values: &[&str], value: f64) {
        let key: Vec<String> = label_values.iter().map(|v| v.to_string()).collect();
        if !self.accepts(&self.read(), name, &key) {
            return;
        }
        self.current.rcu(|current| {
            let mut next = MetricSnapshot::clone(current);
            if let Some(family) = next.families.get_mut(name) {
                family.series.insert(key.clone(), value);
            }
            next
        });
    }

    /// Replace every series of one family
    pub fn replace(&self, update: FamilyUpdate) {
        self.replace_all(vec![update]);
    }

    /// Replace several families in one atomic step.
    ///
    /// Series not present in an update disappear. If any update is rejected
    /// the whole batch is dropped and the snapshot stays as it was.
    pub fn replace_all(&self, updates: Vec<FamilyUpdate>) {
        let snapshot = self.read();
        let valid = updates
            .iter()
            .all(|u| u.series.iter().all(|(key, _)| self.accepts(&snapshot, &u.name, key)));
        if !valid {
            return;
        }

        self.current.rcu(|current| {
            let mut next = MetricSnapshot::clone(current);
            for update in &updates {
                if let Some(family) = next.families.get_mut(&update.name) {
                    family.series = update.series.iter().cloned().collect();
                }
            }
            next
        });
    }

    /// Current values; the returned snapshot never changes afterwards
    pub fn read(&self) -> Arc<MetricSnapshot> {
        self.current.load_full()
    }

    fn accepts(&self, snapshot: &MetricSnapshot, name: &str, label_values: &[String]) -> bool {
        match snapshot.family(name) {
            None => {
                warn!(metric = %name, "Dropping write to undescribed gauge");
                false
            }
            Some(family) if family.label_names.len() != label_values.len() => {
                warn!(
                    metric = %name,
                    expected = family.label_names.len(),
                    got = label_values.len(),
                    "Dropping write with wrong label count"
                );
                false
            }
            Some(_) => true,
        }
    }
}

/// Exposes a [`MetricRegistry`] through a `prometheus::Registry`
pub struct SnapshotCollector {
    registry: Arc<MetricRegistry>,
    descs: Vec<Desc>,
}

impl SnapshotCollector {
    /// Descriptors are taken from the families described so far
    pub fn new(registry: Arc<MetricRegistry>) -> prometheus::Result<Self> {
        let snapshot = registry.read();
        let descs = snapshot
            .families()
            .map(|(name, family)| {
                Desc::new(
                    name.to_string(),
                    family.help.clone(),
                    family.label_names.clone(),
                    HashMap::new(),
                )
            })
            .collect::<prometheus::Result<Vec<_>>>()?;

        Ok(Self { registry, descs })
    }
}

impl Collector for SnapshotCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let snapshot = self.registry.read();

        snapshot
            .families()
            .filter(|(_, family)| !family.series.is_empty())
            .map(|(name, family)| {
                let mut mf = MetricFamily::default();
                mf.set_name(name.to_string());
                mf.set_help(family.help.clone());
                mf.set_field_type(MetricType::GAUGE);

                for (label_values, value) in &family.series {
                    let mut metric = Metric::default();
                    for (label, value) in family.label_names.iter().zip(label_values) {
                        let mut pair = LabelPair::default();
                        pair.set_name(label.clone());
                        pair.set_value(value.clone());
                        metric.mut_label().push(pair);
                    }
                    let mut gauge = Gauge::default();
                    gauge.set_value(*value);
                    metric.set_gauge(gauge);
                    mf.mut_metric().push(metric);
                }
                mf
            })
            .collect()
    }
}
