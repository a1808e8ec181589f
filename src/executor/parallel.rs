//! Parallel suite execution
//!
//! Independent top-level suites run concurrently on tokio tasks, bounded by a
//! semaphore. Aggregation across rounds lives here as well.

use anyhow::{Context, Result};
use futures::future::join_all;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::runner::{RunReport, TestRunner};
use crate::models::TestStatus;
use crate::suites::Suite;
use crate::utils::timer::Timer;

/// Runs suites concurrently with at most `max_concurrent` in flight
pub struct ParallelExecutor {
    runner: TestRunner,
    max_concurrent: usize,
}

impl ParallelExecutor {
    pub fn new(runner: TestRunner, max_concurrent: usize) -> Self {
        Self {
            runner,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run every suite once; reports come back in submission order
    pub async fn run_suites(&self, suites: &[Suite], round: u32) -> Result<Vec<RunReport>> {
        info!(
            "Running {} suites in parallel (max {} concurrent)",
            suites.len(),
            self.max_concurrent
        );

        let timer = Timer::start("parallel round");
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(suites.len());

        for suite in suites {
            let semaphore = semaphore.clone();
            let runner = self.runner.clone();
            let suite = suite.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .context("Semaphore closed")?;
                debug!("Starting parallel execution of {}", suite.name());
                runner.run_suite(&suite, round).await
            }));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (joined, suite) in join_all(handles).await.into_iter().zip(suites) {
            let report = joined
                .with_context(|| format!("Suite task {} did not complete", suite.name()))??;
            reports.push(report);
        }

        info!(
            "Parallel execution completed in {}ms",
            timer.elapsed_ms()
        );
        Ok(reports)
    }

    /// Run all suites for `rounds` rounds
    pub async fn run_rounds(&self, suites: &[Suite], rounds: u32) -> Result<Vec<RunReport>> {
        let mut reports = Vec::new();

        for round in 1..=rounds {
            info!("=== Round {}/{} ===", round, rounds);
            let round_reports = self.run_suites(suites, round).await?;

            let passed: usize = round_reports.iter().map(RunReport::passed).sum();
            let total: usize = round_reports.iter().map(RunReport::total).sum();
            info!("Round {} completed: {}/{} passed", round, passed, total);
            reports.extend(round_reports);

            if self.runner.cancel_token().is_cancelled() {
                break;
            }
        }

        Ok(reports)
    }
}

/// Per-test statistics across rounds
#[derive(Clone, Debug, Default, Serialize)]
pub struct TestStats {
    pub passes: u32,
    pub errors: u32,
    pub ignored: u32,
    pub canceled: u32,
    pub total_duration_ms: u64,
}

impl TestStats {
    fn runs(&self) -> u32 {
        self.passes + self.errors + self.canceled
    }

    pub fn avg_duration_ms(&self) -> u64 {
        match self.runs() {
            0 => 0,
            runs => self.total_duration_ms / runs as u64,
        }
    }

    pub fn pass_rate(&self) -> f64 {
        match self.runs() {
            0 => 0.0,
            runs => (self.passes as f64 / runs as f64) * 100.0,
        }
    }
}

/// Leaf statistics over several rounds, keyed by full test name
#[derive(Clone, Debug, Default, Serialize)]
pub struct AggregateResult {
    pub total_rounds: u32,
    pub test_stats: BTreeMap<String, TestStats>,
    pub test_pass_rates: BTreeMap<String, f64>,
    pub overall_pass_rate: f64,
}

impl AggregateResult {
    /// Tests that both passed and failed, lowest pass rate first
    pub fn flaky_tests(&self) -> Vec<(String, f64)> {
        let mut tests: Vec<_> = self
            .test_pass_rates
            .iter()
            .filter(|(_, rate)| **rate > 0.0 && **rate < 100.0)
            .map(|(name, rate)| (name.clone(), *rate))
            .collect();
        tests.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        tests
    }

    /// Tests that passed in every round they ran
    pub fn stable_tests(&self) -> Vec<String> {
        self.test_pass_rates
            .iter()
            .filter(|(_, rate)| **rate >= 100.0)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Tests that never passed
    pub fn failing_tests(&self) -> Vec<String> {
        self.test_stats
            .iter()
            .filter(|(_, stats)| stats.runs() > 0 && stats.passes == 0)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Aggregate the leaves of every report
pub fn aggregate_rounds(reports: &[RunReport]) -> AggregateResult {
    let rounds: BTreeSet<u32> = reports.iter().map(|r| r.round).collect();
    let mut test_stats: BTreeMap<String, TestStats> = BTreeMap::new();

    for report in reports {
        report.result.walk(&mut |node, _| {
            if node.has_children() {
                return;
            }
            let stats = test_stats.entry(node.name.to_string()).or_default();
            match node.status() {
                TestStatus::Success => stats.passes += 1,
                TestStatus::Error => stats.errors += 1,
                TestStatus::Ignored => stats.ignored += 1,
                TestStatus::Canceled => stats.canceled += 1,
                TestStatus::None => {}
            }
            stats.total_duration_ms += node.duration_ms;
        });
    }

    let test_pass_rates = test_stats
        .iter()
        .filter(|(_, stats)| stats.runs() > 0)
        .map(|(name, stats)| (name.clone(), stats.pass_rate()))
        .collect();

    let overall_pass_rate = if reports.is_empty() {
        0.0
    } else {
        reports.iter().map(RunReport::pass_rate).sum::<f64>() / reports.len() as f64
    };

    AggregateResult {
        total_rounds: rounds.len() as u32,
        test_stats,
        test_pass_rates,
        overall_pass_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TestName, TestResult};
    use crate::suites::SuiteRegistry;
    use chrono::Utc;

    fn report(round: u32, leaves: &[(&str, TestStatus)]) -> RunReport {
        let mut result = TestResult::new(TestName::new("Suite"));
        for (name, status) in leaves {
            result.add_child(TestResult::with_status(
                TestName::new("Suite").child(*name),
                *status,
            ));
        }
        RunReport {
            suite: "Suite".to_string(),
            round,
            started_at: Utc::now(),
            duration_ms: 0,
            timed_out: false,
            result,
        }
    }

    #[tokio::test]
    async fn test_reports_in_submission_order() {
        let suites = SuiteRegistry::with_builtins();
        let runner = TestRunner::new(Arc::new(suites.registry().clone()));
        let executor = ParallelExecutor::new(runner, 2);

        let selected = suites
            .resolve(&["forked".to_string(), "parameters".to_string(), "repeat".to_string()])
            .unwrap();
        let reports = executor.run_suites(&selected, 1).await.unwrap();

        let names: Vec<_> = reports.iter().map(|r| r.suite.as_str()).collect();
        assert_eq!(names, vec!["forked", "parameters", "repeat"]);
        assert!(reports.iter().all(RunReport::is_success));
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let runner = TestRunner::new(Arc::new(Default::default()));
        assert_eq!(ParallelExecutor::new(runner, 0).max_concurrent(), 1);
    }

    #[test]
    fn test_aggregate_rounds() {
        let reports = vec![
            report(1, &[("Stable", TestStatus::Success), ("Flaky", TestStatus::Error)]),
            report(2, &[("Stable", TestStatus::Success), ("Flaky", TestStatus::Success)]),
            report(3, &[("Stable", TestStatus::Success), ("Flaky", TestStatus::Success)]),
        ];

        let aggregate = aggregate_rounds(&reports);
        assert_eq!(aggregate.total_rounds, 3);
        assert_eq!(aggregate.test_pass_rates.get("Suite.Stable"), Some(&100.0));
        assert_eq!(aggregate.stable_tests(), vec!["Suite.Stable".to_string()]);

        let flaky = aggregate.flaky_tests();
        assert_eq!(flaky.len(), 1);
        assert_eq!(flaky[0].0, "Suite.Flaky");
        assert!((flaky[0].1 - 66.666).abs() < 0.01);
        assert!(aggregate.failing_tests().is_empty());
    }

    #[test]
    fn test_aggregate_ignores_skipped_leaves() {
        let reports = vec![report(1, &[("Skipped", TestStatus::Ignored)])];
        let aggregate = aggregate_rounds(&reports);

        assert_eq!(aggregate.test_stats["Suite.Skipped"].ignored, 1);
        assert!(aggregate.test_pass_rates.is_empty());
        assert_eq!(aggregate.overall_pass_rate, 0.0);
    }
}
