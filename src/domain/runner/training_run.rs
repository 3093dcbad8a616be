use burn::module::AutodiffModule;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::VecDeque;
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::buffer::rollout_buffer::RolloutBuffer;
use crate::domain::config::HarnessConfig;
use crate::domain::environment::allocation_env::AllocationEnv;
use crate::domain::policy::actor_critic::{ActorCritic, ModelShape};
use crate::domain::policy::backend::TrainBackend;
use crate::domain::policy::model::PolicyValueModel;
use crate::domain::runner::checkpoint::{self, Checkpoint};
use crate::domain::trainer::ppo_trainer::{PpoTrainer, UpdateMetrics};
use crate::domain::utils::statistics::{ANALYTICS_TARGET, StatParameter, StatisticEvent, StatsCollector};
use crate::error::Result;

/// Episodes kept for the moving average in the summary and progress logs.
const RECENT_EPISODES: usize = 100;

/// Consecutive updates with skipped mini-batches before the run warns.
const SKIP_WARNING_THRESHOLD: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub run_id: Uuid,
    pub episodes: usize,
    pub total_steps: usize,
    /// Mean return of the last 100 finished episodes.
    pub mean_recent_reward: f32,
    pub updates: usize,
    pub skipped_minibatches: usize,
    pub final_checkpoint: Option<PathBuf>,
}

/// One training run: owns the environment, model, buffer and trainer and
/// drives them through collect/optimize cycles until the step budget is spent.
pub struct TrainingRun {
    config: HarnessConfig,
    run_id: Uuid,
    env: AllocationEnv,
    model: ActorCritic<TrainBackend>,
    buffer: RolloutBuffer,
    trainer: PpoTrainer<TrainBackend, ActorCritic<TrainBackend>>,
    rng: StdRng,
    stats: Option<StatsCollector>,
    checkpoint_dir: Option<PathBuf>,

    global_step: usize,
    episodes: usize,
    updates: usize,
    skipped_minibatches: usize,
    updates_with_skips: usize,
    recent_rewards: VecDeque<f32>,
}

impl TrainingRun {
    pub fn new(config: HarnessConfig) -> Result<Self> {
        let seed = config.training.seed;
        let env = AllocationEnv::new(config.env.clone(), seed)?;
        let shape = ModelShape::new(env.observation_dim(), env.num_actions(), config.model.hidden_dim);
        let model = ActorCritic::new(shape, seed.wrapping_add(1), &Default::default());
        let buffer = RolloutBuffer::new(config.training.rollout_length);
        let trainer = PpoTrainer::new(config.ppo.clone(), seed.wrapping_add(2));

        Ok(Self {
            run_id: Uuid::new_v4(),
            env,
            model,
            buffer,
            trainer,
            rng: StdRng::seed_from_u64(seed.wrapping_add(3)),
            stats: None,
            checkpoint_dir: None,
            global_step: 0,
            episodes: 0,
            updates: 0,
            skipped_minibatches: 0,
            updates_with_skips: 0,
            recent_rewards: VecDeque::with_capacity(RECENT_EPISODES),
            config,
        })
    }

    pub fn with_statistics(mut self, stats: StatsCollector) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_checkpoint_dir(mut self, dir: PathBuf) -> Self {
        self.checkpoint_dir = Some(dir);
        self
    }

    /// Continues from a saved state: parameters, optimizer moments and step count.
    ///
    /// The run is left unchanged if the network or the optimizer state does not fit.
    /// The environment is reseeded from the step count so a resumed run does not
    /// replay the event stream of the first rollout.
    pub fn resume_from(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        checkpoint.check_shape(self.shape())?;
        let model = checkpoint.model::<TrainBackend>(&self.model.device())?;
        if let Some(snapshot) = &checkpoint.optimizer {
            self.trainer.optimizer_mut().restore(snapshot, &model)?;
        }

        log::info!("Resuming run {} from step {}", checkpoint.run_id, checkpoint.global_step);
        self.run_id = checkpoint.run_id;
        self.global_step = checkpoint.global_step as usize;
        self.model = model;
        self.env.reset_with_seed(self.config.training.seed.wrapping_add(checkpoint.global_step));
        Ok(())
    }

    pub fn shape(&self) -> ModelShape {
        ModelShape::new(self.env.observation_dim(), self.env.num_actions(), self.config.model.hidden_dim)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn model(&self) -> &ActorCritic<TrainBackend> {
        &self.model
    }

    pub fn global_step(&self) -> usize {
        self.global_step
    }

    pub fn checkpoint(&self) -> Result<Checkpoint> {
        Checkpoint::new(self.run_id, self.global_step as u64, &self.model, Some(self.trainer.optimizer().snapshot()?))
    }

    /// Collects fixed-length rollouts and optimizes on each until another full
    /// rollout would exceed `total_steps`.
    pub fn run(&mut self) -> Result<TrainingSummary> {
        let training = self.config.training.clone();
        log::info!(
            "Starting run {}: {} steps, rollout {}, {} nodes, {} actions",
            self.run_id,
            training.total_steps,
            training.rollout_length,
            self.config.env.num_nodes,
            self.env.num_actions()
        );

        let mut obs = self.env.reset();
        let mut episode_reward = 0.0;
        let mut episode_length = 0;

        while self.global_step + training.rollout_length <= training.total_steps {
            self.buffer.clear();
            let policy = self.model.valid();

            while !self.buffer.is_full() {
                let act = policy.act(&obs, &mut self.rng)?;
                let result = self.env.step(act.action);

                episode_reward += result.reward;
                episode_length += 1;
                self.global_step += 1;

                let next_obs = if result.done {
                    self.finish_episode(episode_reward, episode_length);
                    episode_reward = 0.0;
                    episode_length = 0;
                    self.env.reset()
                } else {
                    result.observation
                };

                let observation = std::mem::replace(&mut obs, next_obs);
                self.buffer.add(observation, act.action, result.reward, act.log_prob, act.value, result.done)?;

                if self.global_step % training.save_interval == 0 {
                    self.save_periodic_checkpoint();
                }
            }

            let ended_episode = self.buffer.transitions().last().is_none_or(|t| t.done);
            let last_value = if ended_episode { 0.0 } else { policy.value(&obs)? };

            let advantages = self.buffer.compute_advantages(last_value, self.config.ppo.gamma, self.config.ppo.gae_lambda)?;
            let metrics = self.trainer.update(&mut self.model, &self.buffer, &advantages)?;
            self.record_update(&metrics);
        }

        let final_checkpoint = self.save_final_checkpoint()?;
        if let Some(stats) = &self.stats {
            stats.flush();
        }

        let summary = TrainingSummary {
            run_id: self.run_id,
            episodes: self.episodes,
            total_steps: self.global_step,
            mean_recent_reward: self.mean_recent_reward(),
            updates: self.updates,
            skipped_minibatches: self.skipped_minibatches,
            final_checkpoint,
        };
        log::info!(
            "Training finished: {} episodes, {} steps, {} updates, mean reward (last {}) {:.2}",
            summary.episodes,
            summary.total_steps,
            summary.updates,
            RECENT_EPISODES,
            summary.mean_recent_reward
        );
        Ok(summary)
    }

    /// Joins the statistics writer, if any.
    pub fn finish(mut self) {
        if let Some(stats) = self.stats.take() {
            stats.shutdown();
        }
    }

    fn mean_recent_reward(&self) -> f32 {
        if self.recent_rewards.is_empty() {
            return 0.0;
        }
        self.recent_rewards.iter().sum::<f32>() / self.recent_rewards.len() as f32
    }

    fn finish_episode(&mut self, reward: f32, length: usize) {
        self.episodes += 1;
        if self.recent_rewards.len() == RECENT_EPISODES {
            self.recent_rewards.pop_front();
        }
        self.recent_rewards.push_back(reward);

        tracing::info!(
            target: ANALYTICS_TARGET,
            GlobalStep = self.global_step,
            Kind = "episode",
            EpisodeReward = reward,
            EpisodeLength = length,
        );

        if let Some(stats) = &self.stats {
            let mut event = StatisticEvent::new();
            event
                .set(StatParameter::GlobalStep, self.global_step)
                .set(StatParameter::Kind, "episode")
                .set(StatParameter::EpisodeReward, reward)
                .set(StatParameter::EpisodeLength, length);
            stats.add_event(event);
        }

        if self.episodes % self.config.training.log_interval == 0 {
            log::info!(
                "Episode {} | step {} | reward {:.2} | mean({}) {:.2} | length {}",
                self.episodes,
                self.global_step,
                reward,
                self.recent_rewards.len(),
                self.mean_recent_reward(),
                length
            );
        }
    }

    fn record_update(&mut self, metrics: &UpdateMetrics) {
        self.updates += 1;
        self.skipped_minibatches += metrics.skipped_minibatches;

        tracing::info!(
            target: ANALYTICS_TARGET,
            GlobalStep = self.global_step,
            Kind = "update",
            PolicyLoss = metrics.policy_loss,
            ValueLoss = metrics.value_loss,
            Entropy = metrics.entropy,
            ApproxKl = metrics.approx_kl,
            ClipFraction = metrics.clip_fraction,
            SkippedBatches = metrics.skipped_minibatches,
        );
        log::debug!(
            "Update {} | policy {:.4} | value {:.4} | entropy {:.4} | kl {:.5} | clip {:.3} | epochs {}{}",
            self.updates,
            metrics.policy_loss,
            metrics.value_loss,
            metrics.entropy,
            metrics.approx_kl,
            metrics.clip_fraction,
            metrics.epochs,
            if metrics.early_stopped { " (early stop)" } else { "" }
        );

        if let Some(stats) = &self.stats {
            let mut event = StatisticEvent::new();
            event
                .set(StatParameter::GlobalStep, self.global_step)
                .set(StatParameter::Kind, "update")
                .set(StatParameter::PolicyLoss, metrics.policy_loss)
                .set(StatParameter::ValueLoss, metrics.value_loss)
                .set(StatParameter::Entropy, metrics.entropy)
                .set(StatParameter::ApproxKl, metrics.approx_kl)
                .set(StatParameter::ClipFraction, metrics.clip_fraction)
                .set(StatParameter::SkippedBatches, metrics.skipped_minibatches);
            stats.add_event(event);
        }

        if metrics.skipped_minibatches == 0 {
            self.updates_with_skips = 0;
            return;
        }
        self.updates_with_skips += 1;
        if self.updates_with_skips >= SKIP_WARNING_THRESHOLD {
            tracing::warn!(
                target: ANALYTICS_TARGET,
                GlobalStep = self.global_step,
                Kind = "instability",
                ConsecutiveUpdates = self.updates_with_skips,
                SkippedBatches = self.skipped_minibatches,
            );
            log::warn!(
                "{} consecutive updates skipped mini-batches on non-finite losses ({} skipped in total); consider lowering the learning rate",
                self.updates_with_skips,
                self.skipped_minibatches
            );
        }
    }

    /// Periodic saves are best effort; a failed write only costs that snapshot.
    fn save_periodic_checkpoint(&self) {
        let Some(dir) = &self.checkpoint_dir else {
            return;
        };
        let path = checkpoint::step_path(dir, self.global_step);
        match self.checkpoint().and_then(|checkpoint| checkpoint.save(&path)) {
            Ok(()) => log::info!("Saved checkpoint {}", path.display()),
            Err(e) => log::error!("Failed to save checkpoint {}: {}", path.display(), e),
        }
    }

    fn save_final_checkpoint(&self) -> Result<Option<PathBuf>> {
        let Some(dir) = &self.checkpoint_dir else {
            return Ok(None);
        };
        let path = checkpoint::final_path(dir);
        self.checkpoint()?.save(&path)?;
        log::info!("Saved final checkpoint {}", path.display());
        Ok(Some(path))
    }
}
