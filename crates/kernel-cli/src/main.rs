//! workforce: command-line driver for deterministic multi-year workforce simulations.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use contracts::{PolicyParameters, PopulationRecord, Scenario, WorkforceConfig};
use kernel_api::{SqliteRunStore, WorkforceApi};
use kernel_core::store::{FsRunStore, RunStore};
use kernel_core::{solve, CancelSignal};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "workforce")]
#[command(about = "Deterministic year-over-year workforce transitions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every year of a scenario, resuming from stored checkpoints
    Simulate {
        /// Scenario JSON (config, baseline, policies)
        #[arg(long)]
        scenario: PathBuf,

        #[command(flatten)]
        store: StoreArgs,

        /// Override the scenario's worker thread count
        #[arg(long)]
        worker_threads: Option<u16>,
    },

    /// Solve the growth equation for one year and print the plan as JSON
    Plan {
        #[arg(long)]
        starting_count: u64,

        #[arg(long, allow_hyphen_values = true)]
        growth: f64,

        #[arg(long)]
        term: f64,

        #[arg(long)]
        new_hire_term: f64,
    },

    /// List stored checkpoints for a run
    Status {
        #[command(flatten)]
        store: StoreArgs,

        /// Run id to inspect in a SQLite store
        #[arg(long, default_value = "run_local_001")]
        run_id: String,
    },

    /// Print a synthetic scenario with the default level ladder
    Template {
        #[arg(long, default_value_t = 1_000)]
        baseline_size: usize,

        #[arg(long, default_value_t = 2025)]
        baseline_year: u32,

        #[arg(long, default_value_t = 5)]
        years: u32,

        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[derive(Args)]
struct StoreArgs {
    /// SQLite database for run state
    #[arg(long, env = "WORKFORCE_SQLITE_PATH", conflicts_with = "checkpoint_dir")]
    sqlite: Option<PathBuf>,

    /// Directory for JSON checkpoints, snapshots, and events
    #[arg(long, env = "WORKFORCE_CHECKPOINT_DIR")]
    checkpoint_dir: Option<PathBuf>,
}

impl StoreArgs {
    fn sqlite_or_default(&self) -> PathBuf {
        self.sqlite
            .clone()
            .filter(|path| !path.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("workforce_runs.sqlite"))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(default_log_filter()?)
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Simulate {
            scenario,
            store,
            worker_threads,
        } => simulate(&scenario, &store, worker_threads),
        Command::Plan {
            starting_count,
            growth,
            term,
            new_hire_term,
        } => {
            let plan = solve(starting_count, growth, term, new_hire_term)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(())
        }
        Command::Status { store, run_id } => status(&store, &run_id),
        Command::Template {
            baseline_size,
            baseline_year,
            years,
            seed,
        } => {
            let scenario = template(baseline_size, baseline_year, years, seed)?;
            println!("{}", serde_json::to_string_pretty(&scenario)?);
            Ok(())
        }
    }
}

/// `RUST_LOG` plus info-level output from the binary and both engine crates.
fn default_log_filter() -> anyhow::Result<EnvFilter> {
    let mut filter = EnvFilter::from_default_env();
    for directive in ["workforce=info", "kernel_core=info", "kernel_api=info"] {
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

fn simulate(
    scenario_path: &Path,
    store: &StoreArgs,
    worker_threads: Option<u16>,
) -> anyhow::Result<()> {
    let raw = fs::read_to_string(scenario_path)
        .with_context(|| format!("reading scenario {}", scenario_path.display()))?;
    let mut scenario: Scenario = serde_json::from_str(&raw)
        .with_context(|| format!("parsing scenario {}", scenario_path.display()))?;
    if let Some(threads) = worker_threads {
        scenario.config.worker_threads = threads;
    }

    let mut api = WorkforceApi::from_scenario(scenario)?;
    match &store.checkpoint_dir {
        Some(dir) => api
            .attach_fs_store(dir)
            .with_context(|| format!("opening checkpoint dir {}", dir.display()))?,
        None => {
            let path = store.sqlite_or_default();
            api.attach_sqlite_store(&path)
                .with_context(|| format!("opening sqlite store {}", path.display()))?;
        }
    }

    info!(run_id = api.run_id(), "simulating scenario");
    let report = api.run(&CancelSignal::new())?;
    for year in &report.years {
        println!(
            "year={} {:?} start={} hires={} exp_terms={} nh_terms={} promotions={} end={}",
            year.year,
            year.disposition,
            year.record_counts.starting_active,
            year.record_counts.hires,
            year.record_counts.experienced_terminations,
            year.record_counts.new_hire_terminations,
            year.record_counts.promotions,
            year.record_counts.ending_active
        );
    }
    println!("{report}");
    Ok(())
}

fn status(store: &StoreArgs, run_id: &str) -> anyhow::Result<()> {
    let checkpoints = match &store.checkpoint_dir {
        Some(dir) => {
            if !dir.is_dir() {
                bail!("checkpoint dir {} does not exist", dir.display());
            }
            FsRunStore::open(dir)?.list_checkpoints()?
        }
        None => {
            let path = store.sqlite_or_default();
            if !path.exists() {
                bail!("sqlite store {} does not exist", path.display());
            }
            SqliteRunStore::open(&path, run_id)?.list_checkpoints()?
        }
    };

    if checkpoints.is_empty() {
        println!("no checkpoints");
    }
    for checkpoint in &checkpoints {
        println!("{checkpoint}");
        if let Some(failure) = &checkpoint.failure {
            println!("  failure: {failure}");
        }
    }
    Ok(())
}

fn template(
    baseline_size: usize,
    baseline_year: u32,
    years: u32,
    seed: u64,
) -> anyhow::Result<Scenario> {
    let config = WorkforceConfig::default();
    let levels = config.group_profiles.iter().collect::<Vec<_>>();
    if levels.is_empty() {
        bail!("default config has no group profiles");
    }

    let baseline = (0..baseline_size)
        .map(|index| {
            let (group, profile) = levels[index % levels.len()];
            let tenure = (index % 12) as u32;
            let span = profile.age_max.saturating_sub(profile.age_min).max(1);
            PopulationRecord::active(
                format!("E{:06}", index + 1),
                *group,
                profile.age_min + (index as u32 % span),
                tenure,
                profile.compensation_min,
                baseline_year.saturating_sub(tenure),
            )
        })
        .collect();

    let policies = (1..=years)
        .map(|offset| {
            PolicyParameters::new(baseline_year + offset, 0.03, 0.12, 0.25, seed)
                .and_then(|policy| policy.with_promotion_rate(1, 0.08))
                .and_then(|policy| policy.with_promotion_rate(2, 0.05))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let scenario = Scenario {
        config,
        baseline_year,
        baseline,
        policies,
    };
    scenario.validate()?;
    Ok(scenario)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_enables_every_workspace_crate() {
        let filter = default_log_filter().expect("filter").to_string();
        for target in ["workforce=info", "kernel_core=info", "kernel_api=info"] {
            assert!(filter.contains(target), "{target} missing from {filter}");
        }
    }

    #[test]
    fn template_scenario_validates() {
        let scenario = template(40, 2025, 3, 7).expect("template");
        assert_eq!(scenario.baseline.len(), 40);
        assert_eq!(
            scenario.policies.iter().map(|policy| policy.year).collect::<Vec<_>>(),
            vec![2026, 2027, 2028]
        );
    }
}
