use crate::api::config_dto::{EnvironmentDto, HarnessConfigDto, ModelDto, PpoDto, TrainingDto};
use crate::domain::environment::event::EventKind;
use crate::domain::environment::observation;
use crate::error::{Error, Result};

const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Settings of the allocation environment and its event generator.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvConfig {
    pub num_nodes: usize,
    pub num_services: usize,
    pub max_agents: usize,
    pub node_capacity: f32,
    pub demand_min: f32,
    pub demand_max: f32,
    /// Indexed by [`EventKind::index`].
    pub event_probabilities: [f64; EventKind::COUNT],
    pub max_episode_steps: usize,
    /// Terminates an episode once this many nodes are down at the same time.
    pub max_concurrent_failures: Option<usize>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        // The DTO defaults are valid by construction.
        match EnvConfig::try_from(EnvironmentDto::default()) {
            Ok(config) => config,
            Err(e) => unreachable!("default environment config is invalid: {}", e),
        }
    }
}

impl EnvConfig {
    pub fn num_actions(&self) -> usize {
        self.num_nodes + 1
    }

    pub fn reject_action(&self) -> usize {
        self.num_nodes
    }

    pub fn observation_dim(&self) -> usize {
        observation::dim(self.num_nodes)
    }
}

impl TryFrom<EnvironmentDto> for EnvConfig {
    type Error = Error;

    fn try_from(dto: EnvironmentDto) -> Result<Self> {
        let num_nodes = positive_count("environment.numNodes", dto.num_nodes)?;
        let num_services = positive_count("environment.numServices", dto.num_services)?;
        let max_agents = positive_count("environment.maxAgents", dto.max_agents)?;
        let max_episode_steps = positive_count("environment.maxEpisodeSteps", dto.max_episode_steps)?;

        positive_finite("environment.nodeCapacity", dto.node_capacity)?;
        positive_finite("environment.demandMin", dto.demand_min)?;
        positive_finite("environment.demandMax", dto.demand_max)?;
        if dto.demand_min > dto.demand_max {
            return Err(Error::InvalidConfig(format!(
                "environment.demandMin ({}) must not exceed environment.demandMax ({})",
                dto.demand_min, dto.demand_max
            )));
        }
        if dto.demand_max > dto.node_capacity {
            return Err(Error::InvalidConfig(format!(
                "environment.demandMax ({}) exceeds environment.nodeCapacity ({}); no agent could ever be deployed",
                dto.demand_max, dto.node_capacity
            )));
        }

        let event_probabilities = validate_probabilities(&dto.event_probabilities)?;

        let max_concurrent_failures = match dto.max_concurrent_failures {
            Some(limit) => {
                let limit = positive_count("environment.maxConcurrentFailures", limit)?;
                if limit > num_nodes {
                    return Err(Error::InvalidConfig(format!(
                        "environment.maxConcurrentFailures ({}) exceeds environment.numNodes ({})",
                        limit, num_nodes
                    )));
                }
                Some(limit)
            }
            None => None,
        };

        Ok(EnvConfig {
            num_nodes,
            num_services,
            max_agents,
            node_capacity: dto.node_capacity,
            demand_min: dto.demand_min,
            demand_max: dto.demand_max,
            event_probabilities,
            max_episode_steps,
            max_concurrent_failures,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub hidden_dim: usize,
}

impl TryFrom<ModelDto> for ModelConfig {
    type Error = Error;

    fn try_from(dto: ModelDto) -> Result<Self> {
        Ok(ModelConfig { hidden_dim: positive_count("model.hiddenDim", dto.hidden_dim)? })
    }
}

/// Hyperparameters of the PPO optimization phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PpoConfig {
    pub learning_rate: f32,
    /// Discount factor γ.
    pub gamma: f32,
    /// GAE λ.
    pub gae_lambda: f32,
    /// Clip ε for the probability ratio (and the value clip when enabled).
    pub clip_epsilon: f32,
    pub value_coef: f32,
    pub entropy_coef: f32,
    pub max_grad_norm: f32,
    pub update_epochs: usize,
    pub mini_batch_size: usize,
    pub clip_value_loss: bool,
    pub target_kl: Option<f32>,
}

impl Default for PpoConfig {
    fn default() -> Self {
        match PpoConfig::try_from(PpoDto::default()) {
            Ok(config) => config,
            Err(e) => unreachable!("default PPO config is invalid: {}", e),
        }
    }
}

impl TryFrom<PpoDto> for PpoConfig {
    type Error = Error;

    fn try_from(dto: PpoDto) -> Result<Self> {
        positive_finite("ppo.learningRate", dto.learning_rate)?;
        unit_interval("ppo.gamma", dto.gamma)?;
        unit_interval("ppo.gaeLambda", dto.gae_lambda)?;
        positive_finite("ppo.clipEpsilon", dto.clip_epsilon)?;
        non_negative_finite("ppo.valueCoef", dto.value_coef)?;
        non_negative_finite("ppo.entropyCoef", dto.entropy_coef)?;
        positive_finite("ppo.maxGradNorm", dto.max_grad_norm)?;
        if let Some(target_kl) = dto.target_kl {
            positive_finite("ppo.targetKl", target_kl)?;
        }

        Ok(PpoConfig {
            learning_rate: dto.learning_rate,
            gamma: dto.gamma,
            gae_lambda: dto.gae_lambda,
            clip_epsilon: dto.clip_epsilon,
            value_coef: dto.value_coef,
            entropy_coef: dto.entropy_coef,
            max_grad_norm: dto.max_grad_norm,
            update_epochs: positive_count("ppo.updateEpochs", dto.update_epochs)?,
            mini_batch_size: positive_count("ppo.miniBatchSize", dto.mini_batch_size)?,
            clip_value_loss: dto.clip_value_loss,
            target_kl: dto.target_kl,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    /// Transitions collected before each optimization phase.
    pub rollout_length: usize,
    pub total_steps: usize,
    pub save_interval: usize,
    /// Episodes between progress log lines.
    pub log_interval: usize,
    pub seed: u64,
}

impl TryFrom<TrainingDto> for TrainingConfig {
    type Error = Error;

    fn try_from(dto: TrainingDto) -> Result<Self> {
        let rollout_length = positive_count("training.rolloutLength", dto.rollout_length)?;
        let total_steps = positive_count("training.totalSteps", dto.total_steps)?;
        if rollout_length > total_steps {
            return Err(Error::InvalidConfig(format!(
                "training.rolloutLength ({}) exceeds training.totalSteps ({}); no update would ever run",
                rollout_length, total_steps
            )));
        }

        Ok(TrainingConfig {
            rollout_length,
            total_steps,
            save_interval: positive_count("training.saveInterval", dto.save_interval)?,
            log_interval: positive_count("training.logInterval", dto.log_interval)?,
            seed: dto.seed,
        })
    }
}

/// The complete, validated configuration of one training or evaluation run.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub env: EnvConfig,
    pub model: ModelConfig,
    pub ppo: PpoConfig,
    pub training: TrainingConfig,
}

impl TryFrom<HarnessConfigDto> for HarnessConfig {
    type Error = Error;

    fn try_from(dto: HarnessConfigDto) -> Result<Self> {
        let env = EnvConfig::try_from(dto.environment)?;
        let model = ModelConfig::try_from(dto.model)?;
        let ppo = PpoConfig::try_from(dto.ppo)?;
        let training = TrainingConfig::try_from(dto.training)?;

        if ppo.mini_batch_size > training.rollout_length {
            return Err(Error::InvalidConfig(format!(
                "ppo.miniBatchSize ({}) exceeds training.rolloutLength ({})",
                ppo.mini_batch_size, training.rollout_length
            )));
        }

        Ok(HarnessConfig { env, model, ppo, training })
    }
}

fn positive_count(name: &str, value: i64) -> Result<usize> {
    if value <= 0 {
        return Err(Error::InvalidConfig(format!("{} must be positive, got {}", name, value)));
    }
    Ok(value as usize)
}

fn positive_finite(name: &str, value: f32) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(Error::InvalidConfig(format!("{} must be a positive finite number, got {}", name, value)));
    }
    Ok(())
}

fn non_negative_finite(name: &str, value: f32) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::InvalidConfig(format!("{} must be a non-negative finite number, got {}", name, value)));
    }
    Ok(())
}

fn unit_interval(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(Error::InvalidConfig(format!("{} must lie in [0, 1], got {}", name, value)));
    }
    Ok(())
}

fn validate_probabilities(probabilities: &[f64]) -> Result<[f64; EventKind::COUNT]> {
    if probabilities.len() != EventKind::COUNT {
        return Err(Error::InvalidConfig(format!(
            "environment.eventProbabilities needs {} entries (arrival, departure, failure, recovery, no event), got {}",
            EventKind::COUNT,
            probabilities.len()
        )));
    }

    if let Some(p) = probabilities.iter().find(|p| !p.is_finite() || **p < 0.0) {
        return Err(Error::InvalidConfig(format!("environment.eventProbabilities contains an invalid entry {}", p)));
    }

    let total: f64 = probabilities.iter().sum();
    if (total - 1.0).abs() > PROBABILITY_TOLERANCE {
        return Err(Error::InvalidConfig(format!("environment.eventProbabilities must sum to 1, got {}", total)));
    }

    let mut out = [0.0; EventKind::COUNT];
    out.copy_from_slice(probabilities);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_dto_is_valid() {
        let config = HarnessConfig::try_from(HarnessConfigDto::default()).unwrap();
        assert_eq!(config.env.num_nodes, 3);
        assert_eq!(config.env.num_actions(), 4);
        assert_eq!(config.env.observation_dim(), 5 + 3 + 3 + 1);
        assert_eq!(config.training.rollout_length, 2048);
    }

    #[test]
    fn probabilities_must_sum_to_one() {
        let mut dto = EnvironmentDto::default();
        dto.event_probabilities = vec![0.5, 0.2, 0.1, 0.1, 0.3];
        assert!(matches!(EnvConfig::try_from(dto), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn probabilities_need_five_entries() {
        let mut dto = EnvironmentDto::default();
        dto.event_probabilities = vec![0.5, 0.5];
        assert!(matches!(EnvConfig::try_from(dto), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn non_positive_counts_are_rejected() {
        let mut dto = EnvironmentDto::default();
        dto.num_nodes = 0;
        assert!(matches!(EnvConfig::try_from(dto), Err(Error::InvalidConfig(_))));

        let mut dto = EnvironmentDto::default();
        dto.num_services = -2;
        assert!(matches!(EnvConfig::try_from(dto), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn mini_batch_larger_than_rollout_is_rejected() {
        let mut dto = HarnessConfigDto::default();
        dto.training.rollout_length = 32;
        dto.training.total_steps = 64;
        dto.ppo.mini_batch_size = 64;
        assert!(matches!(HarnessConfig::try_from(dto), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn gamma_outside_unit_interval_is_rejected() {
        let mut dto = PpoDto::default();
        dto.gamma = 1.5;
        assert!(matches!(PpoConfig::try_from(dto), Err(Error::InvalidConfig(_))));
    }
}
