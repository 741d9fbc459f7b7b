//! gatebench CLI: benchmark and validate inference decision gates.

use clap::{Parser, Subcommand};
use gatebench_core::config::{HarnessConfig, PacingMode, RunMode};
use gatebench_core::engine::{Harness, RunResult, RunStatus};
use gatebench_core::report;
use gatebench_core::scheduler::CancelToken;
use gatebench_core::workload::{self, SyntheticSpec};
use gatebench_core::{metrics, HarnessError};
use std::path::PathBuf;
use std::process;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "gatebench",
    about = "Benchmark and validate inference decision gates",
    version
)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a workload and write a run result.
    Run {
        /// Path to TOML configuration file.
        #[arg(short, long)]
        config: PathBuf,
        /// Path to the workload (.jsonl).
        #[arg(short, long)]
        workload: PathBuf,
        /// Where to write the run result JSON.
        #[arg(short, long)]
        output: PathBuf,
        /// Override run.mode (transformer_only, gated).
        #[arg(short, long)]
        mode: Option<String>,
        /// Override run.pacing (as_fast_as_possible, respect_timestamps).
        #[arg(short, long)]
        pacing: Option<String>,
        /// Override run.workers.
        #[arg(long)]
        workers: Option<usize>,
        /// Override gate.kind (stub, remote).
        #[arg(short, long)]
        gate: Option<String>,
        /// Reference run whose RENDER outputs are checked for exact match.
        #[arg(short, long)]
        reference: Option<PathBuf>,
    },
    /// Compare a baseline run against a gated run.
    Report {
        /// Baseline (transformer_only) run result.
        #[arg(short, long)]
        baseline: PathBuf,
        /// Gated run result.
        #[arg(short, long)]
        gated: PathBuf,
        /// Pricing TOML with gpu_hour and token_1m.
        #[arg(short, long)]
        pricing: PathBuf,
        /// Write the machine-readable report to this file.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print JSON instead of the table.
        #[arg(long)]
        json: bool,
    },
    /// Load and validate a workload without running it.
    Validate {
        /// Path to the workload (.jsonl).
        #[arg(short, long)]
        workload: PathBuf,
    },
    /// Generate a synthetic workload.
    GenWorkload {
        /// Number of requests.
        #[arg(short = 'n', long, default_value = "1000")]
        count: usize,
        /// Mean request rate (requests/sec).
        #[arg(long, default_value = "10")]
        rate: f64,
        /// RNG seed.
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Timestamp of the first request (seconds since epoch).
        #[arg(long, default_value = "1700000000")]
        start: f64,
        /// Output file path.
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Check that a persisted run's summary matches its outcomes.
    Verify {
        /// Run result JSON.
        #[arg(short, long)]
        run: PathBuf,
    },
    /// List available gate adapters.
    ListGates,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("Failed to initialize logging: {}", e);
    }
}

fn fail(context: &str, error: impl std::fmt::Display, code: i32) -> ! {
    eprintln!("{}: {}", context, error);
    process::exit(code);
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            workload: workload_path,
            output,
            mode,
            pacing,
            workers,
            gate,
            reference,
        } => {
            let mut harness_config = HarnessConfig::from_file(&config)
                .unwrap_or_else(|e| {
                    let code = e.exit_code();
                    fail("Error loading config", e, code)
                });
            apply_overrides(&mut harness_config, mode, pacing, workers, gate);

            let workload = workload::load_workload(&workload_path).unwrap_or_else(|e| {
                let err = HarnessError::from(e);
                let code = err.exit_code();
                fail("Error loading workload", err, code)
            });

            let cancel = CancelToken::new();
            let handler_token = cancel.clone();
            if let Err(e) = ctrlc::set_handler(move || {
                eprintln!("\nCancelling run, flushing completed requests...");
                handler_token.cancel();
            }) {
                warn!(error = %e, "could not install Ctrl-C handler");
            }

            let mut harness = Harness::new(harness_config)
                .unwrap_or_else(|e| {
                    let code = e.exit_code();
                    fail("Invalid configuration", e, code)
                })
                .with_cancel_token(cancel);
            if let Some(reference_path) = reference {
                let reference_run = RunResult::load(&reference_path)
                    .unwrap_or_else(|e| fail("Error loading reference run", e, 1));
                harness = harness.with_reference(&reference_run);
            }

            let result = harness.run(&workload).unwrap_or_else(|e| {
                let code = e.exit_code();
                fail("Run failed", e, code)
            });
            println!(
                "{}",
                metrics::format_table(&result.metadata.name, &result.summary)
            );
            if result.metadata.status == RunStatus::Partial {
                println!(
                    "Run is PARTIAL: {} of {} requests completed",
                    result.metadata.completed_requests, result.metadata.total_requests
                );
            }

            result
                .save(&output)
                .unwrap_or_else(|e| fail("Error writing run result", e, 1));
            println!("Run result written to {}", output.display());
        }
        Commands::Report {
            baseline,
            gated,
            pricing,
            output,
            json,
        } => {
            let report = report::compare_files(&baseline, &gated, &pricing).unwrap_or_else(|e| {
                let code = e.exit_code();
                fail("Report failed", e, code)
            });
            let report_json = serde_json::to_string_pretty(&report)
                .unwrap_or_else(|e| fail("Error serializing report", e, 1));

            if json {
                println!("{}", report_json);
            } else {
                println!("{}", report::format_report(&report));
            }

            if let Some(output_path) = output {
                std::fs::write(&output_path, &report_json)
                    .unwrap_or_else(|e| fail("Error writing report", e, 1));
                println!("Report written to {}", output_path.display());
            }
        }
        Commands::Validate { workload: path } => {
            let loaded = workload::load_workload(&path).unwrap_or_else(|e| {
                let err = HarnessError::from(e);
                let code = err.exit_code();
                fail("Invalid workload", err, code)
            });
            println!("Workload '{}': {} requests", loaded.id, loaded.len());
            for (modality, count) in loaded.modality_distribution() {
                println!("  {:<12} {}", modality.as_str(), count);
            }
            for w in &loaded.warnings {
                println!("  warning: {}", w);
            }
        }
        Commands::GenWorkload {
            count,
            rate,
            seed,
            start,
            output,
        } => {
            if rate <= 0.0 || !rate.is_finite() {
                fail("Invalid --rate", rate, 4);
            }
            let requests = workload::generate_workload(&SyntheticSpec {
                count,
                rate,
                seed,
                start_timestamp: start,
            });
            workload::write_workload(&requests, &output)
                .unwrap_or_else(|e| fail("Error writing workload", e, 1));
            println!(
                "Generated {} requests to {}",
                requests.len(),
                output.display()
            );
        }
        Commands::Verify { run } => {
            let result = RunResult::load(&run).unwrap_or_else(|e| {
                let code = e.exit_code();
                fail("Error loading run result", e, code)
            });
            if result.verify_summary() {
                info!(run = %run.display(), "summary verified");
                println!(
                    "OK: summary of {} outcomes reproduces exactly",
                    result.outcomes.len()
                );
            } else {
                fail("Summary mismatch", run.display(), 1);
            }
        }
        Commands::ListGates => {
            println!("Available gate adapters:");
            for name in gatebench_gate::available_gates() {
                println!("  - {}", name);
            }
        }
    }
}

fn apply_overrides(
    config: &mut HarnessConfig,
    mode: Option<String>,
    pacing: Option<String>,
    workers: Option<usize>,
    gate: Option<String>,
) {
    if let Some(name) = mode {
        config.run.mode = RunMode::from_name(&name)
            .unwrap_or_else(|| fail("Unknown mode", name, 4));
    }
    if let Some(name) = pacing {
        config.run.pacing = PacingMode::from_name(&name)
            .unwrap_or_else(|| fail("Unknown pacing mode", name, 4));
    }
    if let Some(n) = workers {
        config.run.workers = n;
    }
    if let Some(name) = gate {
        config.gate.kind = gatebench_gate::gate_kind_by_name(&name).unwrap_or_else(|| {
            fail(
                "Unknown gate",
                format!("{} (available: {:?})", name, gatebench_gate::available_gates()),
                4,
            )
        });
    }
    if let Err(e) = config.validate() {
        fail("Invalid configuration", e, 4);
    }
}
