use burn::optim::GradientsParams;
use burn::tensor::activation::{log_softmax, softmax};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Int, Tensor};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::domain::buffer::rollout_buffer::{Advantages, RolloutBuffer, Transition};
use crate::domain::config::PpoConfig;
use crate::domain::policy::backend::{index_column, matrix, to_scalar, to_vec, vector};
use crate::domain::policy::model::{TrainableModel, clip_global_norm};
use crate::domain::trainer::optimizer::PolicyOptimizer;
use crate::error::{Error, Result};

/// Aggregates over all applied mini-batches of one `update` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateMetrics {
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
    pub approx_kl: f32,
    /// Share of samples whose ratio left `[1 - ε, 1 + ε]`.
    pub clip_fraction: f32,
    /// Mean gradient norm before clipping.
    pub grad_norm: f32,
    pub epochs: usize,
    pub applied_minibatches: usize,
    pub skipped_minibatches: usize,
    pub early_stopped: bool,
}

/// Scalar loss terms of one mini-batch, read before the optimizer step.
#[derive(Debug, Clone, Copy)]
struct LossValues {
    policy_loss: f32,
    value_loss: f32,
    entropy: f32,
    approx_kl: f32,
    clip_fraction: f32,
}

impl LossValues {
    fn is_finite(&self) -> bool {
        self.policy_loss.is_finite() && self.value_loss.is_finite() && self.entropy.is_finite()
    }
}

#[derive(Debug, Default)]
struct Totals {
    policy_loss: f32,
    value_loss: f32,
    entropy: f32,
    approx_kl: f32,
    clip_fraction: f32,
    grad_norm: f32,
    count: usize,
}

impl Totals {
    fn add(&mut self, values: &LossValues, grad_norm: f32) {
        self.policy_loss += values.policy_loss;
        self.value_loss += values.value_loss;
        self.entropy += values.entropy;
        self.approx_kl += values.approx_kl;
        self.clip_fraction += values.clip_fraction;
        self.grad_norm += grad_norm;
        self.count += 1;
    }

    fn mean(value: f32, count: usize) -> f32 {
        if count == 0 { 0.0 } else { value / count as f32 }
    }
}

/// Tensors of one shuffled mini-batch.
struct MiniBatch<B: Backend> {
    observations: Tensor<B, 2>,
    actions: Tensor<B, 2, Int>,
    old_log_probs: Tensor<B, 1>,
    old_values: Tensor<B, 1>,
    advantages: Tensor<B, 1>,
    returns: Tensor<B, 1>,
}

impl<B: Backend> MiniBatch<B> {
    fn gather(transitions: &[Transition], advantages: &[f32], returns: &[f32], batch: &[usize], observation_dim: usize, device: &B::Device) -> Result<Self> {
        let mut observations = Vec::with_capacity(batch.len() * observation_dim);
        for &i in batch {
            let observation = &transitions[i].observation;
            if observation.len() != observation_dim {
                return Err(Error::ObservationShape { expected: observation_dim, found: observation.len() });
            }
            observations.extend_from_slice(observation);
        }
        let actions: Vec<usize> = batch.iter().map(|&i| transitions[i].action).collect();

        Ok(Self {
            observations: matrix(observations, batch.len(), observation_dim, device),
            actions: index_column(&actions, device),
            old_log_probs: vector(batch.iter().map(|&i| transitions[i].log_prob).collect(), device),
            old_values: vector(batch.iter().map(|&i| transitions[i].value).collect(), device),
            advantages: vector(batch.iter().map(|&i| advantages[i]).collect(), device),
            returns: vector(batch.iter().map(|&i| returns[i]).collect(), device),
        })
    }
}

/// Proximal policy optimization over one filled rollout buffer.
pub struct PpoTrainer<B: AutodiffBackend, M: TrainableModel<B>> {
    config: PpoConfig,
    optimizer: PolicyOptimizer<B, M>,
    rng: StdRng,
}

impl<B: AutodiffBackend, M: TrainableModel<B>> PpoTrainer<B, M> {
    pub fn new(config: PpoConfig, seed: u64) -> Self {
        let optimizer = PolicyOptimizer::new(config.learning_rate, config.max_grad_norm);
        Self { config, optimizer, rng: StdRng::seed_from_u64(seed) }
    }

    pub fn config(&self) -> &PpoConfig {
        &self.config
    }

    pub fn optimizer(&self) -> &PolicyOptimizer<B, M> {
        &self.optimizer
    }

    pub fn optimizer_mut(&mut self) -> &mut PolicyOptimizer<B, M> {
        &mut self.optimizer
    }

    /// Runs `update_epochs` passes of shuffled mini-batch PPO over `buffer`.
    ///
    /// Mini-batches with a non-finite loss or gradient are skipped and counted
    /// instead of being applied.
    pub fn update(&mut self, model: &mut M, buffer: &RolloutBuffer, advantages: &Advantages) -> Result<UpdateMetrics> {
        let transitions = buffer.transitions();
        if transitions.is_empty() {
            return Err(Error::EmptyBuffer);
        }
        if advantages.advantages.len() != transitions.len() || advantages.returns.len() != transitions.len() {
            return Err(Error::BatchShape { expected: transitions.len(), found: advantages.advantages.len().min(advantages.returns.len()) });
        }

        let device = model.device();
        let observation_dim = model.observation_dim();
        let params = model.parameters();
        let normalized = normalize(&advantages.advantages);
        let mut indices: Vec<usize> = (0..transitions.len()).collect();
        let mut totals = Totals::default();
        let mut metrics = UpdateMetrics::default();

        for epoch in 0..self.config.update_epochs {
            indices.shuffle(&mut self.rng);
            let mut epoch_kl = 0.0;
            let mut epoch_batches = 0;

            for chunk in indices.chunks(self.config.mini_batch_size) {
                let batch = MiniBatch::gather(transitions, &normalized, &advantages.returns, chunk, observation_dim, &device)?;
                let (loss, values) = self.losses(model, batch)?;

                if !values.is_finite() {
                    metrics.skipped_minibatches += 1;
                    log::warn!(
                        "Skipping mini-batch in epoch {}: non-finite loss (policy {}, value {}, entropy {})",
                        epoch,
                        values.policy_loss,
                        values.value_loss,
                        values.entropy
                    );
                    continue;
                }

                let grads = GradientsParams::from_grads(loss.backward(), &*model);
                let (grads, grad_norm) = clip_global_norm::<B::InnerBackend>(grads, &params, self.config.max_grad_norm)?;
                if !grad_norm.is_finite() {
                    metrics.skipped_minibatches += 1;
                    log::warn!("Skipping mini-batch in epoch {}: non-finite gradient norm {}", epoch, grad_norm);
                    continue;
                }

                *model = self.optimizer.step(model.clone(), grads);

                totals.add(&values, grad_norm);
                epoch_kl += values.approx_kl;
                epoch_batches += 1;
            }

            metrics.epochs = epoch + 1;

            if let Some(target_kl) = self.config.target_kl {
                let mean_kl = Totals::mean(epoch_kl, epoch_batches);
                if mean_kl > target_kl {
                    log::debug!("Stopping update after epoch {}: approx KL {:.5} exceeds target {:.5}", epoch, mean_kl, target_kl);
                    metrics.early_stopped = true;
                    break;
                }
            }
        }

        metrics.applied_minibatches = totals.count;
        metrics.policy_loss = Totals::mean(totals.policy_loss, totals.count);
        metrics.value_loss = Totals::mean(totals.value_loss, totals.count);
        metrics.entropy = Totals::mean(totals.entropy, totals.count);
        metrics.approx_kl = Totals::mean(totals.approx_kl, totals.count);
        metrics.clip_fraction = Totals::mean(totals.clip_fraction, totals.count);
        metrics.grad_norm = Totals::mean(totals.grad_norm, totals.count);

        Ok(metrics)
    }

    /// `policy_loss + value_coef * value_loss - entropy_coef * entropy`, plus its terms.
    fn losses(&self, model: &M, batch: MiniBatch<B>) -> Result<(Tensor<B, 1>, LossValues)> {
        let cfg = &self.config;
        let (logits, values) = model.forward_batch(batch.observations);

        let log_probs = log_softmax(logits.clone(), 1);
        let action_log_probs = log_probs.clone().gather(1, batch.actions).squeeze::<1>(1);
        let log_ratio = action_log_probs - batch.old_log_probs;
        let log_ratios = to_vec(log_ratio.clone())?;

        let policy_loss = clipped_surrogate(log_ratio.exp(), batch.advantages, cfg.clip_epsilon).mean().neg();
        let critic_loss = value_loss(values, batch.old_values, batch.returns, cfg.clip_epsilon, cfg.clip_value_loss);
        let entropy = (softmax(logits, 1) * log_probs).sum_dim(1).neg().mean();

        let n = log_ratios.len().max(1) as f32;
        let loss_values = LossValues {
            policy_loss: to_scalar(policy_loss.clone())?,
            value_loss: to_scalar(critic_loss.clone())?,
            entropy: to_scalar(entropy.clone())?,
            approx_kl: log_ratios.iter().map(|lr| lr.exp_m1() - lr).sum::<f32>() / n,
            clip_fraction: log_ratios.iter().filter(|lr| lr.exp_m1().abs() > cfg.clip_epsilon).count() as f32 / n,
        };

        let total = policy_loss + critic_loss.mul_scalar(cfg.value_coef) - entropy.mul_scalar(cfg.entropy_coef);
        Ok((total, loss_values))
    }
}

/// Element-wise `min(r * A, clip(r, 1 - ε, 1 + ε) * A)`, the PPO objective to maximize.
///
/// Gradient reaches `ratio` only where the unclipped term is the minimum.
pub fn clipped_surrogate<B: Backend>(ratio: Tensor<B, 1>, advantages: Tensor<B, 1>, clip_epsilon: f32) -> Tensor<B, 1> {
    let clipped = ratio.clone().clamp(1.0 - clip_epsilon, 1.0 + clip_epsilon) * advantages.clone();
    (ratio * advantages).min_pair(clipped)
}

/// Mean squared value error.
///
/// With clipping the per-sample loss is `max((v - R)^2, (v_clip - R)^2)` where
/// `v_clip` stays within `ε` of the value stored at collection time.
pub fn value_loss<B: Backend>(values: Tensor<B, 1>, old_values: Tensor<B, 1>, returns: Tensor<B, 1>, clip_epsilon: f32, clip: bool) -> Tensor<B, 1> {
    let unclipped = (values.clone() - returns.clone()).powf_scalar(2.0);
    if !clip {
        return unclipped.mean();
    }

    let clipped_values = old_values.clone() + (values - old_values).clamp(-clip_epsilon, clip_epsilon);
    unclipped.max_pair((clipped_values - returns).powf_scalar(2.0)).mean()
}

/// Zero-mean, unit-variance copy of `values`.
pub fn normalize(values: &[f32]) -> Vec<f32> {
    if values.is_empty() {
        return Vec::new();
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    let std = variance.sqrt();
    values.iter().map(|v| (v - mean) / (std + 1e-8)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::policy::backend::TrainBackend;

    #[test]
    fn normalized_values_have_zero_mean_unit_std() {
        let out = normalize(&[1.0, 2.0, 3.0, 4.0]);
        let mean: f32 = out.iter().sum::<f32>() / 4.0;
        let var: f32 = out.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-6);
        assert!((var - 1.0).abs() < 1e-4);
    }

    #[test]
    fn constant_values_normalize_to_zero() {
        let out = normalize(&[2.0, 2.0, 2.0]);
        assert!(out.iter().all(|v| v.abs() < 1e-6 && v.is_finite()));
    }

    fn value_and_grad(prediction: f32, old_value: f32, target: f32, clip: bool) -> (f32, f32) {
        let device = Default::default();
        let values = vector::<TrainBackend>(vec![prediction], &device).require_grad();
        let loss = value_loss(values.clone(), vector(vec![old_value], &device), vector(vec![target], &device), 0.2, clip);
        let loss_value = to_scalar(loss.clone()).unwrap();
        let grads = loss.backward();
        let grad = values.grad(&grads).map(|g| to_scalar(g).unwrap()).unwrap_or(0.0);
        (loss_value, grad)
    }

    #[test]
    fn clipped_value_loss_has_no_gradient_past_the_clip() {
        // Prediction moved far from the stored value, clipped error is larger.
        let (loss, grad) = value_and_grad(-0.9, 0.5, -1.0, true);
        assert!((loss - 1.69).abs() < 1e-5, "loss {}", loss);
        assert_eq!(grad, 0.0);

        let (loss, grad) = value_and_grad(-0.9, 0.5, -1.0, false);
        assert!((loss - 0.01).abs() < 1e-5, "loss {}", loss);
        assert!((grad - 0.2).abs() < 1e-5, "grad {}", grad);
    }

    #[test]
    fn surrogate_gradient_stops_once_the_ratio_is_clipped() {
        let device = Default::default();
        let ratio = vector::<TrainBackend>(vec![1.5, 1.1, 0.5], &device).require_grad();
        let advantages = vector(vec![1.0, 1.0, -1.0], &device);

        let surrogate = clipped_surrogate(ratio.clone(), advantages, 0.2);
        let grads = surrogate.sum().backward();
        let grad = to_vec(ratio.grad(&grads).unwrap()).unwrap();

        assert_eq!(grad[0], 0.0, "ratio above 1 + eps with positive advantage is clipped");
        assert!((grad[1] - 1.0).abs() < 1e-6, "inside the clip range the gradient is A");
        assert_eq!(grad[2], 0.0, "ratio below 1 - eps with negative advantage is clipped");
    }
}
