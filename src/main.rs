use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::{Path, PathBuf};

use deploy_rl::api::config_dto::HarnessConfigDto;
use deploy_rl::domain::config::HarnessConfig;
use deploy_rl::domain::environment::allocation_env::AllocationEnv;
use deploy_rl::domain::policy::actor_critic::ModelShape;
use deploy_rl::domain::policy::backend::InferenceBackend;
use deploy_rl::domain::policy::model::ActionSelection;
use deploy_rl::domain::runner::checkpoint::Checkpoint;
use deploy_rl::domain::runner::evaluation::evaluate;
use deploy_rl::domain::runner::training_run::TrainingRun;
use deploy_rl::domain::utils::statistics::{StatParameter, StatsCollector};
use deploy_rl::loader::parser::parse_json_file;
use deploy_rl::logger;

/// PPO training harness for service-to-node allocation.
#[derive(Parser, Debug)]
#[command(name = "deploy-rl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file; built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for logs, checkpoints and statistics
    #[arg(short, long, global = true, default_value = "runs")]
    output_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a policy with PPO
    Train {
        #[arg(long)]
        seed: Option<u64>,

        #[arg(long)]
        total_steps: Option<i64>,

        #[arg(long)]
        num_nodes: Option<i64>,

        #[arg(long)]
        learning_rate: Option<f32>,

        /// Continue from a saved checkpoint
        #[arg(long)]
        resume: Option<PathBuf>,

        /// Skip writing the statistics CSV
        #[arg(long)]
        no_stats: bool,
    },

    /// Evaluate a saved checkpoint
    Evaluate {
        /// Checkpoint file to load
        #[arg(long)]
        checkpoint: PathBuf,

        #[arg(short, long, default_value_t = 10)]
        episodes: usize,

        /// Pick the most likely action instead of sampling
        #[arg(long)]
        greedy: bool,

        /// Log the environment state after every step
        #[arg(long)]
        render: bool,

        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

fn read_config_dto(path: Option<&Path>) -> Result<HarnessConfigDto> {
    match path {
        Some(p) => parse_json_file::<HarnessConfigDto>(p).with_context(|| format!("Failed to load configuration '{}'", p.display())),
        None => {
            log::info!("No configuration file given, using defaults.");
            Ok(HarnessConfigDto::default())
        }
    }
}

fn run_train(cli: &Cli, seed: Option<u64>, total_steps: Option<i64>, num_nodes: Option<i64>, learning_rate: Option<f32>, resume: Option<&Path>, no_stats: bool) -> Result<()> {
    let mut dto = read_config_dto(cli.config.as_deref())?;
    if let Some(seed) = seed {
        dto.training.seed = seed;
    }
    if let Some(total_steps) = total_steps {
        dto.training.total_steps = total_steps;
    }
    if let Some(num_nodes) = num_nodes {
        dto.environment.num_nodes = num_nodes;
    }
    if let Some(learning_rate) = learning_rate {
        dto.ppo.learning_rate = learning_rate;
    }
    let config = HarnessConfig::try_from(dto).context("Invalid configuration")?;

    let mut run = TrainingRun::new(config)?.with_checkpoint_dir(cli.output_dir.join("checkpoints"));
    if !no_stats {
        let stats_path = cli.output_dir.join("statistics.csv");
        let stats = StatsCollector::init(Some(&stats_path)).with_context(|| format!("Failed to create '{}'", stats_path.display()))?;
        run = run.with_statistics(stats);
    }
    if let Some(path) = resume {
        let checkpoint = Checkpoint::load(path).with_context(|| format!("Failed to load checkpoint '{}'", path.display()))?;
        run.resume_from(&checkpoint)?;
    }

    let summary = run.run()?;
    run.finish();

    println!("{}", "Training complete".green().bold());
    println!("  Run id:                {}", summary.run_id);
    println!("  Episodes:              {}", summary.episodes);
    println!("  Steps:                 {}", summary.total_steps);
    println!("  Updates:               {}", summary.updates);
    println!("  Mean reward (last 100): {:.2}", summary.mean_recent_reward);
    if summary.skipped_minibatches > 0 {
        println!("  {}", format!("Skipped mini-batches:  {}", summary.skipped_minibatches).yellow());
    }
    if let Some(path) = summary.final_checkpoint {
        println!("  Checkpoint:            {}", path.display());
    }
    Ok(())
}

fn run_evaluate(cli: &Cli, checkpoint_path: &Path, episodes: usize, greedy: bool, render: bool, seed: u64) -> Result<()> {
    let config = HarnessConfig::try_from(read_config_dto(cli.config.as_deref())?).context("Invalid configuration")?;
    let checkpoint = Checkpoint::load(checkpoint_path).with_context(|| format!("Failed to load checkpoint '{}'", checkpoint_path.display()))?;

    let mut env = AllocationEnv::new(config.env, seed)?;
    checkpoint.check_shape(ModelShape::new(env.observation_dim(), env.num_actions(), checkpoint.shape.hidden_dim))?;
    log::info!("Loaded checkpoint of run {} (step {})", checkpoint.run_id, checkpoint.global_step);
    let model = checkpoint.model::<InferenceBackend>(&Default::default())?;

    let selection = if greedy { ActionSelection::Greedy } else { ActionSelection::Stochastic };
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    let report = evaluate(&mut env, &model, episodes, selection, &mut rng, render)?;

    std::fs::create_dir_all(&cli.output_dir).with_context(|| format!("Failed to create '{}'", cli.output_dir.display()))?;
    let stats_path = cli.output_dir.join("evaluation.csv");
    let stats = StatsCollector::init(Some(&stats_path)).with_context(|| format!("Failed to create '{}'", stats_path.display()))?;
    let mut event = report.to_statistic_event();
    event.set(StatParameter::GlobalStep, checkpoint.global_step as usize);
    stats.add_event(event);
    stats.shutdown();

    println!("{}", format!("Evaluation ({:?})", selection).green().bold());
    println!("{}", report);
    println!("  Statistics:      {}", stats_path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init(&cli.output_dir.join("logs"));

    match &cli.command {
        Commands::Train { seed, total_steps, num_nodes, learning_rate, resume, no_stats } => {
            run_train(&cli, *seed, *total_steps, *num_nodes, *learning_rate, resume.as_deref(), *no_stats)
        }
        Commands::Evaluate { checkpoint, episodes, greedy, render, seed } => run_evaluate(&cli, checkpoint, *episodes, *greedy, *render, *seed),
    }
}
