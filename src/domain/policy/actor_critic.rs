use burn::module::{Module, Param};
use burn::nn::{Linear, LinearConfig};
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::Tensor;
use burn::tensor::backend::{AutodiffBackend, Backend};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::policy::backend::{matrix, to_scalar, to_vec, vector};
use crate::domain::policy::distribution::Categorical;
use crate::domain::policy::model::{ParamSlot, PolicyValueModel, TrainableModel};
use crate::error::{Error, Result};

/// Initial weight scale of the policy head; keeps the first policy close to uniform.
const POLICY_HEAD_GAIN: f32 = 0.01;

type RecordCodec = BinBytesRecorder<FullPrecisionSettings>;

/// Layer sizes of an [`ActorCritic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelShape {
    pub observation_dim: usize,
    pub num_actions: usize,
    pub hidden_dim: usize,
}

impl ModelShape {
    pub const fn new(observation_dim: usize, num_actions: usize, hidden_dim: usize) -> Self {
        Self { observation_dim, num_actions, hidden_dim }
    }
}

impl fmt::Display for ModelShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obs {} / actions {} / hidden {}", self.observation_dim, self.num_actions, self.hidden_dim)
    }
}

/// Actor-critic MLP: a shared two-layer tanh trunk feeding a softmax policy
/// head and a scalar value head.
#[derive(Module, Debug)]
pub struct ActorCritic<B: Backend> {
    trunk_in: Linear<B>,
    trunk_hidden: Linear<B>,
    policy_head: Linear<B>,
    value_head: Linear<B>,
}

/// Glorot-uniform weights drawn from `rng`, zero bias.
fn glorot<B: Backend>(in_dim: usize, out_dim: usize, gain: f32, rng: &mut StdRng, device: &B::Device) -> Linear<B> {
    let limit = gain * (6.0 / (in_dim + out_dim) as f32).sqrt();
    let weights = (0..in_dim * out_dim).map(|_| rng.random_range(-limit..=limit)).collect();

    let mut linear = LinearConfig::new(in_dim, out_dim).init(device);
    linear.weight = Param::from_tensor(matrix(weights, in_dim, out_dim, device));
    linear.bias = Some(Param::from_tensor(vector(vec![0.0; out_dim], device)));
    linear
}

impl<B: Backend> ActorCritic<B> {
    /// Weights are drawn from a `StdRng` seeded with `seed`, so equal seeds give equal networks.
    pub fn new(shape: ModelShape, seed: u64, device: &B::Device) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let ModelShape { observation_dim, num_actions, hidden_dim } = shape;
        Self {
            trunk_in: glorot(observation_dim, hidden_dim, 1.0, &mut rng, device),
            trunk_hidden: glorot(hidden_dim, hidden_dim, 1.0, &mut rng, device),
            policy_head: glorot(hidden_dim, num_actions, POLICY_HEAD_GAIN, &mut rng, device),
            value_head: glorot(hidden_dim, 1, 1.0, &mut rng, device),
        }
    }

    pub fn shape(&self) -> ModelShape {
        let [observation_dim, hidden_dim] = self.trunk_in.weight.dims();
        let [_, num_actions] = self.policy_head.weight.dims();
        ModelShape { observation_dim, num_actions, hidden_dim }
    }

    fn layers(&self) -> [(&'static str, &Linear<B>); 4] {
        [("trunk_in", &self.trunk_in), ("trunk_hidden", &self.trunk_hidden), ("policy_head", &self.policy_head), ("value_head", &self.value_head)]
    }

    /// Checks every layer against `expected`, including that consecutive layers chain.
    pub fn validate(&self, expected: ModelShape) -> Result<()> {
        let ModelShape { observation_dim, num_actions, hidden_dim } = expected;
        let expected_dims = [[observation_dim, hidden_dim], [hidden_dim, hidden_dim], [hidden_dim, num_actions], [hidden_dim, 1]];

        for ((name, layer), dims) in self.layers().into_iter().zip(expected_dims) {
            let weight = layer.weight.dims();
            let bias = layer.bias.as_ref().map(|b| b.dims()[0]);
            if weight != dims || bias != Some(dims[1]) {
                return Err(Error::CheckpointMismatch {
                    expected: format!("{} weight {:?} bias [{}] ({})", name, dims, dims[1], expected),
                    found: format!("{} weight {:?} bias {:?}", name, weight, bias),
                });
            }
        }
        Ok(())
    }

    /// Logits `[batch, actions]` and values `[batch]`.
    pub fn forward_tensors(&self, observations: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 1>) {
        let hidden = self.trunk_in.forward(observations).tanh();
        let hidden = self.trunk_hidden.forward(hidden).tanh();
        let logits = self.policy_head.forward(hidden.clone());
        let values = self.value_head.forward(hidden).squeeze::<1>(1);
        (logits, values)
    }

    pub fn device(&self) -> B::Device {
        self.trunk_in.weight.device()
    }

    /// All weights and biases, layer by layer.
    pub fn flat_parameters(&self) -> Result<Vec<f32>> {
        let mut values = Vec::new();
        for (_, layer) in self.layers() {
            values.extend(to_vec(layer.weight.val())?);
            if let Some(bias) = &layer.bias {
                values.extend(to_vec(bias.val())?);
            }
        }
        Ok(values)
    }

    /// Encodes the parameters with burn's binary recorder.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        <RecordCodec as Recorder<B>>::record(&RecordCodec::default(), self.clone().into_record(), ()).map_err(|e| Error::RecordError(format!("{:?}", e)))
    }

    /// Decodes parameters written by [`ActorCritic::to_bytes`] and checks them against `shape`.
    pub fn from_bytes(bytes: &[u8], shape: ModelShape, device: &B::Device) -> Result<Self> {
        let record: <Self as Module<B>>::Record =
            <RecordCodec as Recorder<B>>::load(&RecordCodec::default(), bytes.to_vec(), device).map_err(|e| Error::RecordError(format!("{:?}", e)))?;
        let model = Self::new(shape, 0, device).load_record(record);
        model.validate(shape)?;
        Ok(model)
    }
}

impl<B: Backend> PolicyValueModel for ActorCritic<B> {
    fn observation_dim(&self) -> usize {
        self.shape().observation_dim
    }

    fn num_actions(&self) -> usize {
        self.shape().num_actions
    }

    fn forward(&self, obs: &[f32]) -> Result<(Categorical, f32)> {
        self.check_observation(obs)?;
        let input = matrix::<B>(obs.to_vec(), 1, obs.len(), &self.device());
        let (logits, values) = self.forward_tensors(input);
        Ok((Categorical::from_logits(&to_vec(logits)?), to_scalar(values)?))
    }
}

impl<B: AutodiffBackend> TrainableModel<B> for ActorCritic<B> {
    fn forward_batch(&self, observations: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 1>) {
        self.forward_tensors(observations)
    }

    fn device(&self) -> B::Device {
        ActorCritic::device(self)
    }

    fn parameters(&self) -> Vec<ParamSlot> {
        self.layers()
            .into_iter()
            .flat_map(|(_, layer)| {
                let mut slots = vec![ParamSlot::Matrix(layer.weight.id)];
                slots.extend(layer.bias.as_ref().map(|b| ParamSlot::Vector(b.id)));
                slots
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::policy::backend::{InferenceBackend, TrainBackend};
    use crate::domain::policy::model::gradient_norm;
    use burn::optim::GradientsParams;

    const SHAPE: ModelShape = ModelShape::new(12, 4, 16);

    fn obs() -> Vec<f32> {
        vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.3, 0.5, 0.0, 0.2]
    }

    #[test]
    fn initial_policy_is_near_uniform() {
        let model = ActorCritic::<InferenceBackend>::new(SHAPE, 0, &Default::default());
        let (dist, value) = model.forward(&obs()).unwrap();
        for p in dist.probs() {
            assert!((p - 0.25).abs() < 0.05, "probability {} far from uniform", p);
        }
        assert!(value.is_finite());
        assert_eq!(model.shape(), SHAPE);
    }

    #[test]
    fn equal_seeds_give_equal_networks() {
        let device = Default::default();
        let a = ActorCritic::<InferenceBackend>::new(SHAPE, 5, &device);
        let b = ActorCritic::<InferenceBackend>::new(SHAPE, 5, &device);
        let c = ActorCritic::<InferenceBackend>::new(SHAPE, 6, &device);
        assert_eq!(a.flat_parameters().unwrap(), b.flat_parameters().unwrap());
        assert_ne!(a.flat_parameters().unwrap(), c.flat_parameters().unwrap());
    }

    #[test]
    fn wrong_observation_width_is_an_error() {
        let model = ActorCritic::<InferenceBackend>::new(SHAPE, 0, &Default::default());
        assert!(matches!(model.forward(&[0.0; 3]), Err(Error::ObservationShape { expected: 12, found: 3 })));
    }

    #[test]
    fn record_bytes_must_match_every_layer() {
        let device = Default::default();
        let narrow = ActorCritic::<InferenceBackend>::new(ModelShape::new(12, 4, 8), 1, &device);
        let bytes = narrow.to_bytes().unwrap();

        assert!(ActorCritic::<InferenceBackend>::from_bytes(&bytes, ModelShape::new(12, 4, 8), &device).is_ok());
        assert!(matches!(ActorCritic::<InferenceBackend>::from_bytes(&bytes, SHAPE, &device), Err(Error::CheckpointMismatch { .. })));
        assert!(matches!(ActorCritic::<InferenceBackend>::from_bytes(b"garbage", SHAPE, &device), Err(Error::RecordError(_))));
    }

    #[test]
    fn every_parameter_receives_a_gradient() {
        let device = Default::default();
        let model = ActorCritic::<TrainBackend>::new(SHAPE, 3, &device);

        let (logits, values) = model.forward_batch(matrix(obs(), 1, 12, &device));
        let pick_first = matrix::<TrainBackend>(vec![1.0, 0.0, 0.0, 0.0], 1, 4, &device);
        let loss = (logits * pick_first).sum() + values.powf_scalar(2.0).sum();
        let grads = GradientsParams::from_grads(loss.backward(), &model);

        let slots = model.parameters();
        assert_eq!(slots.len(), 8, "four layers with weight and bias");
        for slot in &slots {
            let present = match *slot {
                ParamSlot::Matrix(id) => grads.get::<InferenceBackend, 2>(id).is_some(),
                ParamSlot::Vector(id) => grads.get::<InferenceBackend, 1>(id).is_some(),
            };
            assert!(present, "no gradient for {:?}", slot);
        }
        assert!(gradient_norm::<InferenceBackend>(&grads, &slots).unwrap() > 0.0);
    }
}
