use serde::{Deserialize, Serialize};

/// Raw harness configuration as read from JSON.
///
/// Every key is optional; missing keys fall back to the defaults of the
/// reference training setup. Validation happens when converting into
/// [`crate::domain::config::HarnessConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HarnessConfigDto {
    pub environment: EnvironmentDto,
    pub model: ModelDto,
    pub ppo: PpoDto,
    pub training: TrainingDto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentDto {
    pub num_nodes: i64,
    pub num_services: i64,
    pub max_agents: i64,
    pub node_capacity: f32,
    pub demand_min: f32,
    pub demand_max: f32,
    /// Order: arrival, departure, failure, recovery, no event.
    pub event_probabilities: Vec<f64>,
    pub max_episode_steps: i64,
    pub max_concurrent_failures: Option<i64>,
}

impl Default for EnvironmentDto {
    fn default() -> Self {
        Self {
            num_nodes: 3,
            num_services: 5,
            max_agents: 10,
            node_capacity: 5.0,
            demand_min: 1.0,
            demand_max: 1.0,
            event_probabilities: vec![0.3, 0.2, 0.1, 0.1, 0.3],
            max_episode_steps: 100,
            max_concurrent_failures: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelDto {
    pub hidden_dim: i64,
}

impl Default for ModelDto {
    fn default() -> Self {
        Self { hidden_dim: 64 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PpoDto {
    pub learning_rate: f32,
    pub gamma: f32,
    pub gae_lambda: f32,
    pub clip_epsilon: f32,
    pub value_coef: f32,
    pub entropy_coef: f32,
    pub max_grad_norm: f32,
    pub update_epochs: i64,
    pub mini_batch_size: i64,
    pub clip_value_loss: bool,
    pub target_kl: Option<f32>,
}

impl Default for PpoDto {
    fn default() -> Self {
        Self {
            learning_rate: 3e-4,
            gamma: 0.99,
            gae_lambda: 0.95,
            clip_epsilon: 0.2,
            value_coef: 0.5,
            entropy_coef: 0.01,
            max_grad_norm: 0.5,
            update_epochs: 4,
            mini_batch_size: 64,
            clip_value_loss: true,
            target_kl: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrainingDto {
    pub rollout_length: i64,
    pub total_steps: i64,
    pub save_interval: i64,
    pub log_interval: i64,
    pub seed: u64,
}

impl Default for TrainingDto {
    fn default() -> Self {
        Self { rollout_length: 2048, total_steps: 100_000, save_interval: 10_000, log_interval: 10, seed: 42 }
    }
}
