//! async-test - run parameterized async test suites
//!
//! ## Usage
//!
//! ```bash
//! # Run every visible suite once
//! async-test run
//!
//! # Run selected suites for several rounds, in parallel
//! async-test run parameters fixtures --rounds 5 --parallel
//!
//! # Restrict a parameter to some of its values
//! async-test run parameters --filter encoding=identity
//!
//! # Skip tests tagged with a category
//! async-test run --exclude-category stress
//!
//! # List suites and parameter sources
//! async-test list --detailed
//!
//! # Write an example configuration
//! async-test config init
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use async_test_engine::cli::{self, Args, Command};
use async_test_engine::config::{self, expand_path, AppConfig, EnvConfig};
use async_test_engine::executor::{aggregate_rounds, ParallelExecutor, RunReport, TestRunner};
use async_test_engine::framework::CancellationToken;
use async_test_engine::models::TestStatus;
use async_test_engine::output::{write_reports_to_file, OutputFormat, ResultFormatter};
use async_test_engine::suites::SuiteRegistry;
use async_test_engine::utils::init_logger;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env = EnvConfig::load();
    let mut config = load_config(args.config.as_deref(), &env)?;
    env.apply_to(&mut config);

    init_logger(config.log_level()?.raised(args.verbose));

    match args.command {
        Command::Run(run_args) => {
            if !run_suites(run_args, config).await? {
                std::process::exit(1);
            }
        }
        Command::List(list_args) => {
            list_suites(list_args);
        }
        Command::Config(config_args) => {
            manage_config(config_args, &config, &env)?;
        }
    }

    Ok(())
}

fn load_config(explicit: Option<&Path>, env: &EnvConfig) -> Result<AppConfig> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| env.config_file.as_deref().map(expand_path));

    match path {
        Some(path) => AppConfig::load(path),
        None => AppConfig::load_default(),
    }
}

fn apply_run_args(config: &mut AppConfig, args: &cli::RunArgs) {
    if !args.suites.is_empty() {
        config.suites = args.suites.clone();
    }
    if let Some(rounds) = args.rounds {
        config.rounds = rounds;
    }
    if args.parallel {
        config.parallel = true;
    }
    if let Some(concurrent) = args.concurrent {
        config.max_concurrent = concurrent;
    }
    if let Some(format) = &args.format {
        config.format = format.clone();
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(debug_level) = args.debug_level {
        config.debug_level = debug_level;
    }
    if !args.categories.is_empty() {
        config.categories = args.categories.clone();
    }
    if !args.exclude_categories.is_empty() {
        config.exclude_categories = args.exclude_categories.clone();
    }
    for (parameter, filter) in &args.filters {
        config.filters.insert(parameter.clone(), filter.clone());
    }
}

/// Returns whether every report passed
async fn run_suites(args: cli::RunArgs, mut config: AppConfig) -> Result<bool> {
    apply_run_args(&mut config, &args);
    config.validate()?;

    let suites = SuiteRegistry::with_builtins();
    let selected = suites.resolve(&config.suites)?;
    let format = config.output_format()?;
    let formatter = ResultFormatter::new(format).with_messages(args.messages);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, canceling the run");
            interrupt.cancel();
        }
    });

    let runner = TestRunner::new(Arc::new(suites.registry().clone()))
        .with_settings(config.context_settings())
        .with_timeout(config.timeout())
        .with_cancel(cancel.clone());

    info!(
        "Running {} suite(s) for {} round(s){}",
        selected.len(),
        config.rounds,
        if config.parallel { " in parallel" } else { "" }
    );

    let reports = if config.parallel {
        ParallelExecutor::new(runner, config.max_concurrent)
            .run_rounds(&selected, config.rounds)
            .await?
    } else {
        let mut reports = Vec::new();
        for suite in &selected {
            reports.extend(runner.run_rounds(suite, config.rounds).await?);
            if cancel.is_cancelled() {
                break;
            }
        }
        reports
    };

    println!("{}", formatter.format_reports(&reports));

    if config.rounds > 1 && matches!(format, OutputFormat::Table | OutputFormat::Summary) {
        println!("{}", formatter.format_aggregate(&aggregate_rounds(&reports)));
    }

    if let Some(path) = &args.output {
        write_reports_to_file(path, &reports, format)?;
        info!("Reports written to {}", path.display());
    }

    Ok(reports.iter().all(report_passed))
}

fn report_passed(report: &RunReport) -> bool {
    !report.timed_out
        && !matches!(
            report.result.status(),
            TestStatus::Error | TestStatus::Canceled
        )
}

fn list_suites(args: cli::ListArgs) {
    let suites = SuiteRegistry::with_builtins();

    println!("\nRegistered Suites\n");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for suite in suites.list(args.all) {
        let hidden = if suite.is_hidden() { " (hidden)" } else { "" };
        if args.detailed {
            println!("  {:12} {}{}", suite.name(), suite.description(), hidden);
        } else {
            println!("  {}{}", suite.name(), hidden);
        }
    }

    if args.detailed {
        println!("\nParameter Sources:");
        println!("──────────────────────────────────────────────────────────────────────");
        for id in suites.registry().source_ids() {
            println!("  {id}");
        }
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
}

fn manage_config(args: cli::ConfigArgs, effective: &AppConfig, env: &EnvConfig) -> Result<()> {
    match args.action {
        cli::ConfigAction::Show => {
            println!("{}", serde_yaml::to_string(effective)?);
        }

        cli::ConfigAction::Init { path, force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    path.display()
                );
            }

            AppConfig::example().save(&path)?;
            println!("✓ Configuration file created: {}", path.display());
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Validate { file } => {
            let path = file
                .or_else(config::file::find)
                .unwrap_or_else(|| PathBuf::from(config::CONFIG_LOCATIONS[0]));

            match AppConfig::load(&path) {
                Ok(_) => println!("✓ Configuration file is valid: {}", path.display()),
                Err(e) => {
                    println!("✗ Configuration file is invalid: {}", path.display());
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }

        cli::ConfigAction::Env => {
            config::env::print_env_help();
            if env.has_any() {
                println!();
                env.print_summary();
            }
        }
    }

    Ok(())
}
