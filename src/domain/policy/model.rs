use burn::module::{AutodiffModule, ParamId};
use burn::optim::GradientsParams;
use burn::tensor::Tensor;
use burn::tensor::backend::{AutodiffBackend, Backend};
use rand::RngCore;

use crate::domain::policy::backend::to_scalar;
use crate::domain::policy::distribution::Categorical;
use crate::error::{Error, Result};

/// Result of sampling an action during rollout collection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActOutput {
    pub action: usize,
    pub log_prob: f32,
    pub value: f32,
}

/// Re-evaluation of a (possibly historical) action under the current policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub log_prob: f32,
    pub value: f32,
    pub entropy: f32,
}

/// How an action is picked from the policy distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionSelection {
    Stochastic,
    Greedy,
}

/// Maps an observation to an action distribution and a value estimate.
///
/// Any function approximator with this I/O shape can drive the rollout and
/// evaluation loops; parameters are the only mutable state.
pub trait PolicyValueModel {
    fn observation_dim(&self) -> usize;

    fn num_actions(&self) -> usize;

    fn forward(&self, obs: &[f32]) -> Result<(Categorical, f32)>;

    fn act(&self, obs: &[f32], rng: &mut dyn RngCore) -> Result<ActOutput> {
        self.select(obs, ActionSelection::Stochastic, rng)
    }

    fn select(&self, obs: &[f32], selection: ActionSelection, rng: &mut dyn RngCore) -> Result<ActOutput> {
        let (dist, value) = self.forward(obs)?;
        let action = match selection {
            ActionSelection::Stochastic => dist.sample(rng),
            ActionSelection::Greedy => dist.mode(),
        };
        Ok(ActOutput { action, log_prob: dist.log_prob(action), value })
    }

    fn evaluate(&self, obs: &[f32], action: usize) -> Result<Evaluation> {
        let (dist, value) = self.forward(obs)?;
        Ok(Evaluation { log_prob: dist.log_prob(action), value, entropy: dist.entropy() })
    }

    fn value(&self, obs: &[f32]) -> Result<f32> {
        Ok(self.forward(obs)?.1)
    }

    fn check_observation(&self, obs: &[f32]) -> Result<()> {
        if obs.len() != self.observation_dim() {
            return Err(Error::ObservationShape { expected: self.observation_dim(), found: obs.len() });
        }
        Ok(())
    }
}

/// A parameter of a trainable model, with the rank needed to look up its gradient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSlot {
    Vector(ParamId),
    Matrix(ParamId),
}

impl ParamSlot {
    pub fn id(&self) -> ParamId {
        match self {
            ParamSlot::Vector(id) | ParamSlot::Matrix(id) => *id,
        }
    }
}

/// A model the trainer can differentiate and update.
pub trait TrainableModel<B: AutodiffBackend>: PolicyValueModel + AutodiffModule<B> {
    /// `[batch, observation_dim]` observations to `[batch, num_actions]` logits
    /// and `[batch]` value estimates.
    fn forward_batch(&self, observations: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 1>);

    fn device(&self) -> B::Device;

    /// Every parameter the optimizer updates.
    fn parameters(&self) -> Vec<ParamSlot>;
}

/// Global L2 norm of `grads` over the listed parameters.
pub fn gradient_norm<B: Backend>(grads: &GradientsParams, params: &[ParamSlot]) -> Result<f32> {
    let mut sum = 0.0;
    for slot in params {
        let squares = match *slot {
            ParamSlot::Vector(id) => grads.get::<B, 1>(id).map(|g| to_scalar(g.powf_scalar(2.0).sum())),
            ParamSlot::Matrix(id) => grads.get::<B, 2>(id).map(|g| to_scalar(g.powf_scalar(2.0).sum())),
        };
        sum += squares.transpose()?.unwrap_or(0.0);
    }
    Ok(sum.sqrt())
}

/// Rescales `grads` so their global norm is at most `max_norm`; returns the norm before clipping.
pub fn clip_global_norm<B: Backend>(mut grads: GradientsParams, params: &[ParamSlot], max_norm: f32) -> Result<(GradientsParams, f32)> {
    let norm = gradient_norm::<B>(&grads, params)?;
    if norm <= max_norm || !norm.is_finite() {
        return Ok((grads, norm));
    }

    let factor = max_norm / (norm + 1e-6);
    for slot in params {
        match *slot {
            ParamSlot::Vector(id) => {
                if let Some(g) = grads.remove::<B, 1>(id) {
                    grads.register(id, g.mul_scalar(factor));
                }
            }
            ParamSlot::Matrix(id) => {
                if let Some(g) = grads.remove::<B, 2>(id) {
                    grads.register(id, g.mul_scalar(factor));
                }
            }
        }
    }
    Ok((grads, norm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::policy::backend::{InferenceBackend, to_vec, vector};

    type B = InferenceBackend;

    fn grads_of(values: &[(ParamId, Vec<f32>)]) -> GradientsParams {
        let device = Default::default();
        let mut grads = GradientsParams::new();
        for (id, v) in values {
            grads.register::<B, 1>(*id, vector(v.clone(), &device));
        }
        grads
    }

    #[test]
    fn clipping_bounds_the_global_norm() {
        let (a, b) = (ParamId::new(), ParamId::new());
        let slots = [ParamSlot::Vector(a), ParamSlot::Vector(b)];
        let grads = grads_of(&[(a, vec![3.0, 0.0]), (b, vec![4.0])]);

        let (clipped, before) = clip_global_norm::<B>(grads, &slots, 1.0).unwrap();

        assert!((before - 5.0).abs() < 1e-5, "norm before clipping {}", before);
        let after = gradient_norm::<B>(&clipped, &slots).unwrap();
        assert!(after <= 1.0 + 1e-4, "norm after clipping {}", after);
        let a_grad = to_vec(clipped.get::<B, 1>(a).unwrap()).unwrap();
        assert!((a_grad[0] - 0.6).abs() < 1e-4, "direction must be kept, got {:?}", a_grad);
    }

    #[test]
    fn small_gradients_are_left_alone() {
        let a = ParamId::new();
        let slots = [ParamSlot::Vector(a)];
        let (grads, norm) = clip_global_norm::<B>(grads_of(&[(a, vec![0.1, 0.1])]), &slots, 1.0).unwrap();
        assert!(norm < 1.0);
        let values = to_vec(grads.get::<B, 1>(a).unwrap()).unwrap();
        assert_eq!(values, vec![0.1, 0.1]);
    }
}
