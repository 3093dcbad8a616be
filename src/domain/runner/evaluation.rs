use rand::RngCore;
use std::fmt;

use crate::domain::environment::allocation_env::{AllocationEnv, DeploymentOutcome};
use crate::domain::policy::model::{ActionSelection, PolicyValueModel};
use crate::domain::utils::statistics::{StatParameter, StatisticEvent};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutcomeCounts {
    pub deployed: usize,
    pub rejected: usize,
    pub failed: usize,
    pub not_applicable: usize,
    /// Deployments lost to node failures.
    pub evicted: usize,
}

impl OutcomeCounts {
    fn record(&mut self, outcome: &DeploymentOutcome, evicted: usize) {
        match outcome {
            DeploymentOutcome::Deployed { .. } => self.deployed += 1,
            DeploymentOutcome::Rejected => self.rejected += 1,
            DeploymentOutcome::Failed { .. } => self.failed += 1,
            DeploymentOutcome::NotApplicable => self.not_applicable += 1,
        }
        self.evicted += evicted;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    pub episode_rewards: Vec<f32>,
    pub episode_lengths: Vec<usize>,
    pub outcomes: OutcomeCounts,
}

impl EvaluationReport {
    pub fn episodes(&self) -> usize {
        self.episode_rewards.len()
    }

    pub fn mean_reward(&self) -> f32 {
        self.episode_rewards.iter().sum::<f32>() / self.episodes().max(1) as f32
    }

    /// Population standard deviation of episode returns.
    pub fn std_reward(&self) -> f32 {
        let mean = self.mean_reward();
        let variance = self.episode_rewards.iter().map(|r| (r - mean).powi(2)).sum::<f32>() / self.episodes().max(1) as f32;
        variance.sqrt()
    }

    pub fn min_reward(&self) -> f32 {
        self.episode_rewards.iter().copied().fold(f32::INFINITY, f32::min)
    }

    pub fn max_reward(&self) -> f32 {
        self.episode_rewards.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    pub fn mean_length(&self) -> f32 {
        self.episode_lengths.iter().sum::<usize>() as f32 / self.episodes().max(1) as f32
    }

    pub fn to_statistic_event(&self) -> StatisticEvent {
        let mut event = StatisticEvent::new();
        event
            .set(StatParameter::Kind, "evaluation")
            .set(StatParameter::EpisodeReward, self.mean_reward())
            .set(StatParameter::EpisodeLength, self.mean_length());
        event
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Episodes:        {}", self.episodes())?;
        writeln!(f, "Mean reward:     {:.2} ± {:.2}", self.mean_reward(), self.std_reward())?;
        writeln!(f, "Min/Max reward:  {:.2} / {:.2}", self.min_reward(), self.max_reward())?;
        writeln!(f, "Mean length:     {:.1}", self.mean_length())?;
        write!(
            f,
            "Outcomes:        deployed {} | rejected {} | failed {} | evicted {}",
            self.outcomes.deployed, self.outcomes.rejected, self.outcomes.failed, self.outcomes.evicted
        )
    }
}

/// Plays `episodes` full episodes without touching the model's parameters.
///
/// With `render` the environment state is logged after every step.
pub fn evaluate<M: PolicyValueModel>(
    env: &mut AllocationEnv,
    model: &M,
    episodes: usize,
    selection: ActionSelection,
    rng: &mut dyn RngCore,
    render: bool,
) -> Result<EvaluationReport> {
    if episodes == 0 {
        return Err(Error::InvalidConfig("evaluation needs at least one episode".to_string()));
    }

    let mut report = EvaluationReport { episode_rewards: Vec::with_capacity(episodes), episode_lengths: Vec::with_capacity(episodes), outcomes: OutcomeCounts::default() };

    for episode in 0..episodes {
        let mut obs = env.reset();
        let mut total = 0.0;
        let mut length = 0;

        loop {
            let act = model.select(&obs, selection, rng)?;
            let result = env.step(act.action);

            total += result.reward;
            length += 1;
            report.outcomes.record(&result.info.outcome, result.info.evicted.len());

            if render {
                log::info!("Episode {} | action {} | reward {:+.1}\n{}", episode + 1, act.action, result.reward, env);
            }

            if result.done {
                break;
            }
            obs = result.observation;
        }

        log::debug!("Evaluation episode {}: reward {:.2}, length {}", episode + 1, total, length);
        report.episode_rewards.push(total);
        report.episode_lengths.push(length);
    }

    Ok(report)
}
