use burn::backend::{Autodiff, NdArray};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};

use crate::error::{Error, Result};

/// CPU backend used for rollouts and evaluation.
pub type InferenceBackend = NdArray<f32>;

/// Backend the trainer differentiates through.
pub type TrainBackend = Autodiff<InferenceBackend>;

/// `[rows, cols]` float tensor from row-major values.
pub fn matrix<B: Backend>(values: Vec<f32>, rows: usize, cols: usize, device: &B::Device) -> Tensor<B, 2> {
    Tensor::from_data(TensorData::new(values, [rows, cols]).convert::<B::FloatElem>(), device)
}

pub fn vector<B: Backend>(values: Vec<f32>, device: &B::Device) -> Tensor<B, 1> {
    let len = values.len();
    Tensor::from_data(TensorData::new(values, [len]).convert::<B::FloatElem>(), device)
}

/// `[len, 1]` index column, the layout `gather` expects along dim 1.
pub fn index_column<B: Backend>(indices: &[usize], device: &B::Device) -> Tensor<B, 2, Int> {
    let values: Vec<i64> = indices.iter().map(|&i| i as i64).collect();
    Tensor::from_data(TensorData::new(values, [indices.len(), 1]).convert::<B::IntElem>(), device)
}

pub fn to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor.into_data().convert::<f32>().to_vec::<f32>().map_err(|e| Error::TensorData(format!("{:?}", e)))
}

pub fn to_scalar<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<f32> {
    to_vec(tensor)?.first().copied().ok_or_else(|| Error::TensorData("empty tensor".to_string()))
}
