//! Suite runner
//!
//! Runs a top-level invoker with a fresh context and wraps the result tree
//! in a [`RunReport`].

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::framework::{ContextSettings, Registry, TestContext, TestInvoker};
use crate::models::{TestResult, TestStatus};
use crate::suites::Suite;
use crate::utils::timer::Timer;

/// Outcome of one run of one suite
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub suite: String,
    pub round: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub result: TestResult,
}

impl RunReport {
    pub fn passed(&self) -> usize {
        self.result.count_leaves(TestStatus::Success)
    }

    pub fn failed(&self) -> usize {
        self.result.count_leaves(TestStatus::Error)
    }

    pub fn ignored(&self) -> usize {
        self.result.count_leaves(TestStatus::Ignored)
    }

    pub fn canceled(&self) -> usize {
        self.result.count_leaves(TestStatus::Canceled)
    }

    pub fn total(&self) -> usize {
        self.result.leaf_count()
    }

    /// Pass rate over the leaves that actually ran
    pub fn pass_rate(&self) -> f64 {
        let ran = self.passed() + self.failed() + self.canceled();
        if ran == 0 {
            return 0.0;
        }
        (self.passed() as f64 / ran as f64) * 100.0
    }

    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }
}

/// Runs suites against a shared registry and settings
#[derive(Clone)]
pub struct TestRunner {
    registry: Arc<Registry>,
    settings: ContextSettings,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl TestRunner {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            settings: ContextSettings::default(),
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_settings(mut self, settings: ContextSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Cancel each run that exceeds `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    /// Use `cancel` as the parent of every run's token
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    /// Run one invoker tree.
    ///
    /// Fails only on an engine fault; test failures are reported in the tree.
    pub async fn run(
        &self,
        suite: &str,
        invoker: Arc<dyn TestInvoker>,
        round: u32,
    ) -> Result<RunReport> {
        let token = self.cancel.child_token();
        let timed_out = Arc::new(AtomicBool::new(false));

        let watchdog = self.timeout.map(|timeout| {
            let token = token.clone();
            let timed_out = timed_out.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        timed_out.store(true, Ordering::SeqCst);
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            })
        });

        let started_at = Utc::now();
        let timer = Timer::start(suite);
        let mut ctx = TestContext::new(self.settings.clone(), self.registry.clone());

        let invoked = invoker.invoke(&mut ctx, &token).await;
        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }
        let result = invoked.with_context(|| format!("Engine fault while running {suite}"))?;

        let timed_out = timed_out.load(Ordering::SeqCst);
        if timed_out {
            warn!(suite, timeout = ?self.timeout, "Run timed out and was canceled");
        }

        Ok(RunReport {
            suite: suite.to_string(),
            round,
            started_at,
            duration_ms: timer.elapsed_ms(),
            timed_out,
            result,
        })
    }

    pub async fn run_suite(&self, suite: &Suite, round: u32) -> Result<RunReport> {
        info!("Running suite {}", suite.name());
        let report = self.run(suite.name(), suite.build(), round).await?;
        info!(
            "  {} {}: {}/{} passed in {}ms",
            report.result.status().symbol(),
            report.suite,
            report.passed(),
            report.total(),
            report.duration_ms
        );
        Ok(report)
    }

    /// Run a suite `rounds` times, stopping early once canceled
    pub async fn run_rounds(&self, suite: &Suite, rounds: u32) -> Result<Vec<RunReport>> {
        info!("Running {} rounds of {}", rounds, suite.name());

        let mut reports = Vec::new();
        for round in 1..=rounds {
            info!("=== Round {}/{} ===", round, rounds);

            let report = self.run_suite(suite, round).await?;
            info!(
                "Round {} completed: {}/{} passed ({:.1}%)",
                round,
                report.passed(),
                report.total(),
                report.pass_rate()
            );
            reports.push(report);

            if self.cancel.is_cancelled() {
                warn!("Run canceled after round {round}");
                break;
            }
        }

        Ok(reports)
    }
}
