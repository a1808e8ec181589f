//! Output formatters for run reports
//!
//! Renders result trees as an indented table, JSON, or one-line summaries.

use anyhow::Context;
use serde::Serialize;
use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use crate::executor::{AggregateResult, RunReport};
use crate::models::{TestName, TestResult, TestStatus};

const RULE: &str = "══════════════════════════════════════════════════════════════";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    JsonPretty,
    Summary,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Ok(OutputFormat::JsonPretty),
            "summary" => Ok(OutputFormat::Summary),
            _ => anyhow::bail!("Unknown output format: {s} (table, json, json-pretty, summary)"),
        }
    }
}

pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
    show_messages: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
            show_messages: false,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Include logged messages under each node in table output
    pub fn with_messages(mut self, show: bool) -> Self {
        self.show_messages = show;
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn format_report(&self, report: &RunReport) -> String {
        match self.format {
            OutputFormat::Table => self.format_report_table(report),
            OutputFormat::Json | OutputFormat::JsonPretty => self.to_json(report),
            OutputFormat::Summary => self.format_report_brief(report),
        }
    }

    /// Several reports; JSON formats emit one array document
    pub fn format_reports(&self, reports: &[RunReport]) -> String {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => self.to_json(&reports),
            _ => reports
                .iter()
                .map(|report| self.format_report(report))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Indented result tree without the report frame
    pub fn format_tree(&self, result: &TestResult) -> String {
        let mut output = String::new();
        self.render_node(result, None, 0, &mut output);
        output
    }

    fn to_json<T: Serialize + ?Sized>(&self, value: &T) -> String {
        let rendered = if self.format == OutputFormat::JsonPretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_default()
    }

    fn render_node(
        &self,
        node: &TestResult,
        parent: Option<&TestName>,
        depth: usize,
        output: &mut String,
    ) {
        let indent = "  ".repeat(depth);
        let name = match parent {
            Some(parent) => node.name.relative_to(parent),
            None => node.name.clone(),
        };

        let _ = writeln!(
            output,
            "{indent}{} {name} [{}ms]",
            self.status_label(node.status()),
            node.duration_ms
        );
        for error in node.errors() {
            let _ = writeln!(output, "{indent}    {}", self.paint("31", &format!("! {error}")));
        }
        if self.show_messages {
            for message in node.messages() {
                let _ = writeln!(output, "{indent}    | {message}");
            }
        }

        for child in node.children() {
            self.render_node(child, Some(&node.name), depth + 1, output);
        }
    }

    fn format_report_table(&self, report: &RunReport) -> String {
        let mut output = String::new();

        let _ = writeln!(output, "\n╔{RULE}╗");
        let _ = writeln!(
            output,
            "║  Round {:3} - {:46} ║",
            report.round, report.suite
        );
        let _ = writeln!(output, "╚{RULE}╝");

        output.push_str(&self.format_tree(&report.result));

        let passed = self.paint("32", &report.passed().to_string());
        let failed = if report.failed() > 0 {
            self.paint("31", &report.failed().to_string())
        } else {
            report.failed().to_string()
        };

        let _ = writeln!(output, "{}", "─".repeat(RULE.chars().count() + 2));
        let _ = writeln!(
            output,
            "  Total: {} | Pass: {} | Fail: {} | Ignored: {} | Canceled: {}",
            report.total(),
            passed,
            failed,
            report.ignored(),
            report.canceled()
        );
        let _ = writeln!(
            output,
            "  Pass Rate: {:5.1}% | Duration: {}ms | Started: {}",
            report.pass_rate(),
            report.duration_ms,
            report.started_at.format("%Y-%m-%d %H:%M:%S")
        );
        if report.timed_out {
            let _ = writeln!(output, "  {}", self.paint("33", "Run timed out"));
        }

        output
    }

    fn format_report_brief(&self, report: &RunReport) -> String {
        format!(
            "{} {} - Round {}: {}/{} passed ({:.1}%) in {}ms{}",
            self.status_label(report.result.status()),
            report.suite,
            report.round,
            report.passed(),
            report.total(),
            report.pass_rate(),
            report.duration_ms,
            if report.timed_out { " (timed out)" } else { "" }
        )
    }

    pub fn format_aggregate(&self, aggregate: &AggregateResult) -> String {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => self.to_json(aggregate),
            OutputFormat::Summary => format!(
                "{} rounds, {:.1}% overall, {} flaky, {} failing",
                aggregate.total_rounds,
                aggregate.overall_pass_rate,
                aggregate.flaky_tests().len(),
                aggregate.failing_tests().len()
            ),
            OutputFormat::Table => self.format_aggregate_table(aggregate),
        }
    }

    fn format_aggregate_table(&self, aggregate: &AggregateResult) -> String {
        let mut output = String::new();

        let _ = writeln!(output, "\n{RULE}");
        let _ = writeln!(output, " Aggregate Results ({} rounds)", aggregate.total_rounds);
        let _ = writeln!(output, "{RULE}");
        let _ = writeln!(
            output,
            " Overall Pass Rate: {:.1}%\n",
            aggregate.overall_pass_rate
        );

        let _ = writeln!(output, " Test Pass Rates:");
        for (name, rate) in &aggregate.test_pass_rates {
            let bar_len = ((*rate / 5.0) as usize).min(20);
            let _ = writeln!(
                output,
                " {} {} {}  {name}",
                "█".repeat(bar_len),
                "░".repeat(20 - bar_len),
                self.paint_rate(*rate)
            );
        }

        let flaky = aggregate.flaky_tests();
        if !flaky.is_empty() {
            let _ = writeln!(output, "\n Flaky Tests:");
            for (name, rate) in flaky.iter().take(10) {
                let _ = writeln!(output, "   - {name} ({rate:.1}%)");
            }
        }

        let failing = aggregate.failing_tests();
        if !failing.is_empty() {
            let _ = writeln!(output, "\n Always Failing:");
            for name in &failing {
                let _ = writeln!(output, "   - {name}");
            }
        }

        output
    }

    fn status_label(&self, status: TestStatus) -> String {
        let label = format!("{} {status}", status.symbol());
        let code = match status {
            TestStatus::Success => "32",
            TestStatus::Error => "31",
            TestStatus::Ignored => "33",
            TestStatus::Canceled => "35",
            TestStatus::None => "90",
        };
        self.paint(code, &label)
    }

    fn paint_rate(&self, rate: f64) -> String {
        let text = format!("{rate:5.1}%");
        let code = if rate >= 90.0 {
            "32"
        } else if rate >= 50.0 {
            "33"
        } else {
            "31"
        };
        self.paint(code, &text)
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.colorize {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

/// Write reports to `path` without colors
pub fn write_reports_to_file(
    path: &Path,
    reports: &[RunReport],
    format: OutputFormat,
) -> anyhow::Result<()> {
    let formatter = ResultFormatter::new(format).no_color().with_messages(true);
    let content = formatter.format_reports(reports);

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TestError;
    use chrono::Utc;

    fn sample_report() -> RunReport {
        let root_name = TestName::new("Suite");
        let mut group = TestResult::new({
            let mut name = root_name.clone();
            name.push_parameter("flag", "true");
            name
        });
        group.add_child(TestResult::success(group.name.child("Check")));

        let mut failing = TestResult::new(root_name.child("Broken"));
        failing.add_error(TestError::new("expected 200"));

        let mut root = TestResult::new(root_name);
        root.add_child(group);
        root.add_child(failing);

        RunReport {
            suite: "sample".to_string(),
            round: 1,
            started_at: Utc::now(),
            duration_ms: 12,
            timed_out: false,
            result: root,
        }
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("TABLE".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert!("csv".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_tree_uses_relative_names() {
        let formatter = ResultFormatter::new(OutputFormat::Table).no_color();
        let tree = formatter.format_tree(&sample_report().result);
        let lines: Vec<_> = tree.lines().collect();

        assert_eq!(lines[0], "✗ ERROR Suite [0ms]");
        assert_eq!(lines[1], "  ✓ PASS (flag=true) [0ms]");
        assert_eq!(lines[2], "    ✓ PASS Check [0ms]");
        assert_eq!(lines[3], "  ✗ ERROR Broken [0ms]");
        assert!(lines[4].contains("! expected 200"));
    }

    #[test]
    fn test_json_report() {
        let formatter = ResultFormatter::new(OutputFormat::Json);
        let json: serde_json::Value =
            serde_json::from_str(&formatter.format_report(&sample_report())).unwrap();

        assert_eq!(json["suite"], "sample");
        assert_eq!(json["result"]["status"], "error");
    }

    #[test]
    fn test_summary_line() {
        let formatter = ResultFormatter::new(OutputFormat::Summary).no_color();
        let line = formatter.format_report(&sample_report());
        assert!(line.starts_with("✗ ERROR sample - Round 1: 1/2 passed"));
    }

    #[test]
    fn test_write_reports_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.json");

        write_reports_to_file(&path, &[sample_report()], OutputFormat::Json).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(json.as_array().map(Vec::len), Some(1));
    }
}
