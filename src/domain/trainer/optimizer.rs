use burn::grad_clipping::GradientClippingConfig;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::domain::policy::model::TrainableModel;
use crate::error::{Error, Result};

const ADAM_EPSILON: f32 = 1e-8;

type RecordCodec = BinBytesRecorder<FullPrecisionSettings>;
type AdamRecord<B, M> = <OptimizerAdaptor<Adam, M, B> as Optimizer<M, B>>::Record;

/// Persistent part of [`PolicyOptimizer`], saved alongside model parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSnapshot {
    pub steps: u64,
    /// Adam moments keyed by parameter id, encoded with burn's binary recorder.
    pub record: Vec<u8>,
}

/// burn's Adam with norm clipping, plus a step counter and (de)serialization of its moments.
pub struct PolicyOptimizer<B: AutodiffBackend, M: TrainableModel<B>> {
    adam: OptimizerAdaptor<Adam, M, B>,
    learning_rate: f64,
    max_grad_norm: f32,
    steps: u64,
}

fn adam<B: AutodiffBackend, M: TrainableModel<B>>(max_grad_norm: f32) -> OptimizerAdaptor<Adam, M, B> {
    AdamConfig::new().with_epsilon(ADAM_EPSILON).with_grad_clipping(Some(GradientClippingConfig::Norm(max_grad_norm))).init()
}

impl<B: AutodiffBackend, M: TrainableModel<B>> PolicyOptimizer<B, M> {
    pub fn new(learning_rate: f32, max_grad_norm: f32) -> Self {
        Self { adam: adam(max_grad_norm), learning_rate: learning_rate as f64, max_grad_norm, steps: 0 }
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Applies one Adam update and returns the updated model.
    pub fn step(&mut self, model: M, grads: GradientsParams) -> M {
        self.steps += 1;
        self.adam.step(self.learning_rate, model, grads)
    }

    pub fn snapshot(&self) -> Result<OptimizerSnapshot> {
        let record = <RecordCodec as Recorder<B>>::record(&RecordCodec::default(), self.adam.to_record(), ()).map_err(|e| Error::RecordError(format!("{:?}", e)))?;
        Ok(OptimizerSnapshot { steps: self.steps, record })
    }

    /// Loads saved moments for `model`'s parameters.
    ///
    /// Nothing changes unless every saved moment belongs to one of `model`'s parameters.
    pub fn restore(&mut self, snapshot: &OptimizerSnapshot, model: &M) -> Result<()> {
        let record: AdamRecord<B, M> =
            <RecordCodec as Recorder<B>>::load(&RecordCodec::default(), snapshot.record.clone(), &model.device()).map_err(|e| Error::RecordError(format!("{:?}", e)))?;

        let known: Vec<_> = model.parameters().iter().map(|slot| slot.id()).collect();
        if let Some(unknown) = record.keys().find(|id| !known.contains(id)) {
            return Err(Error::CheckpointMismatch {
                expected: format!("optimizer state for the {} model parameters", known.len()),
                found: format!("moments for unknown parameter {:?}", unknown),
            });
        }

        self.adam = adam::<B, M>(self.max_grad_norm).load_record(record);
        self.steps = snapshot.steps;
        Ok(())
    }
}
