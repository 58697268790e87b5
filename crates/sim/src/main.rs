//! Run the planner against a built-in problem.
//!
//! Steps a hidden true state forward with the recommended actions,
//! feeding the resulting observations back into the solver, and writes
//! a JSON summary of the run.

use abtree_core::{Model, PlannerRng};
use abtree_solver::heuristic::ModelHeuristic;
use abtree_solver::problems::{LineExplore, Tiger};
use abtree_solver::{SearchBudget, Solver, SolverConfig};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rand::SeedableRng;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Instant;

/// Online POMDP planning demo.
#[derive(Parser)]
#[command(name = "abtree-sim")]
#[command(about = "Run the belief-tree planner on a built-in problem")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Problem {
    Tiger,
    Line,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan and act for a number of environment steps.
    Run {
        /// Which built-in problem to run.
        #[arg(short, long, value_enum, default_value = "tiger")]
        problem: Problem,

        /// Number of environment steps.
        #[arg(long, default_value = "20")]
        steps: usize,

        /// Simulations per planning call.
        #[arg(short, long, default_value = "2000")]
        simulations: u64,

        /// Plan against a wall-clock deadline (milliseconds) instead of
        /// a simulation count.
        #[arg(long)]
        time_ms: Option<u64>,

        /// Particles in the root belief.
        #[arg(long, default_value = "1000")]
        particles: usize,

        /// Maximum descent depth per simulation.
        #[arg(long, default_value = "30")]
        horizon: usize,

        /// UCB exploration coefficient.
        #[arg(long, default_value = "2.0")]
        ucb: f64,

        /// Random seed for reproducibility.
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Write a JSON run summary here.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// One executed environment step.
#[derive(Serialize, Debug)]
struct StepRecord {
    step: usize,
    action: String,
    observation: String,
    reward: f64,
    simulations: u64,
    tree_beliefs: usize,
}

/// Whole-run summary written as JSON.
#[derive(Serialize, Debug)]
struct RunSummary {
    problem: String,
    seed: u64,
    steps: Vec<StepRecord>,
    total_reward: f64,
    discounted_return: f64,
    elapsed_ms: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            problem,
            steps,
            simulations,
            time_ms,
            particles,
            horizon,
            ucb,
            seed,
            output,
        } => {
            let mut config = SolverConfig::with_simulations(simulations)
                .seeded(seed)
                .particles(particles)
                .horizon(horizon)
                .ucb(ucb);
            if let Some(ms) = time_ms {
                config.search_budget = SearchBudget::Millis(ms);
            }

            let summary = match problem {
                Problem::Tiger => run(Tiger::default(), "tiger", config, steps, seed)?,
                Problem::Line => run(LineExplore::default(), "line", config, steps, seed)?,
            };

            println!(
                "{}: total reward {:.2}, discounted return {:.2} over {} steps",
                summary.problem,
                summary.total_reward,
                summary.discounted_return,
                summary.steps.len()
            );

            if let Some(path) = output {
                let file = File::create(&path)
                    .with_context(|| format!("creating {}", path.display()))?;
                serde_json::to_writer_pretty(BufWriter::new(file), &summary)
                    .context("writing run summary")?;
                println!("summary written to {}", path.display());
            }
            Ok(())
        }
    }
}

fn run<M: Model + Clone>(
    model: M,
    name: &str,
    config: SolverConfig,
    steps: usize,
    seed: u64,
) -> Result<RunSummary> {
    let started = Instant::now();
    let discount = config.discount_factor.unwrap_or(model.discount_factor());

    // The environment draws the hidden true state from its own stream
    // so the planner's randomness stays independent of the world's.
    let mut env_rng = PlannerRng::seed_from_u64(seed ^ 0x9e37_79b9_7f4a_7c15);
    let mut true_state = model.sample_initial_state(&mut env_rng);

    let mut solver = Solver::new(model.clone(), ModelHeuristic, config)?;

    let mut records = Vec::new();
    let mut total_reward = 0.0;
    let mut discounted_return = 0.0;
    let mut weight = 1.0;

    for step_index in 0..steps {
        if model.is_terminal(&true_state) {
            tracing::info!(step = step_index, "environment reached a terminal state");
            break;
        }

        let stats = solver.improve_policy()?;
        let Some(action) = solver.recommend_action() else {
            tracing::warn!(step = step_index, "no action recommendation, stopping");
            break;
        };

        let outcome = model.step(&mut env_rng, &true_state, &action);
        total_reward += outcome.reward;
        discounted_return += weight * outcome.reward;
        weight *= discount;

        tracing::info!(
            step = step_index,
            action = %model.format_action(&action),
            observation = %model.format_observation(&outcome.observation),
            reward = outcome.reward,
            "executed"
        );

        records.push(StepRecord {
            step: step_index,
            action: model.format_action(&action),
            observation: model.format_observation(&outcome.observation),
            reward: outcome.reward,
            simulations: stats.simulations,
            tree_beliefs: solver.tree().n_beliefs(),
        });

        solver.step(&action, &outcome.observation)?;
        true_state = outcome.next_state;
    }

    Ok(RunSummary {
        problem: name.to_string(),
        seed,
        steps: records,
        total_reward,
        discounted_return,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}
