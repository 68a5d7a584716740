//! Runs a rule set against a single workload

use crate::models::{EvaluationResult, RuleOutcome, Workload};
use crate::rules::{names, RuleSet};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Pure transform from a workload to its [`EvaluationResult`]
#[derive(Debug, Clone)]
pub struct Evaluator {
    rules: Arc<RuleSet>,
}

impl Evaluator {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self { rules }
    }

    /// Evaluate every rule against `workload` at the fixed instant `now`.
    ///
    /// The recency partition comes from the `recent_start_time` outcome and
    /// is `false` when the rule set does not contain it.
    pub fn evaluate(&self, workload: &Workload, now: DateTime<Utc>) -> EvaluationResult {
        let outcomes: Vec<RuleOutcome> = self
            .rules
            .iter()
            .map(|rule| RuleOutcome {
                rule: rule.name().to_string(),
                passed: rule.evaluate(workload, now),
            })
            .collect();

        let recent = outcomes
            .iter()
            .find(|o| o.rule == names::RECENT_START_TIME)
            .map(|o| o.passed)
            .unwrap_or(false);

        EvaluationResult {
            workload: workload.key(),
            outcomes,
            recent,
        }
    }
}
