use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::domain::policy::actor_critic::{ActorCritic, ModelShape};
use crate::domain::policy::backend::InferenceBackend;
use crate::domain::trainer::optimizer::OptimizerSnapshot;
use crate::error::{Error, Result};

const FORMAT_VERSION: u32 = 2;

/// Persisted training state: model parameters plus optimizer moments.
///
/// `model` and `optimizer.record` hold burn records; the surrounding struct is
/// bincode-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    pub run_id: Uuid,
    pub global_step: u64,
    pub shape: ModelShape,
    pub model: Vec<u8>,
    pub optimizer: Option<OptimizerSnapshot>,
}

impl Checkpoint {
    pub fn new<B: Backend>(run_id: Uuid, global_step: u64, model: &ActorCritic<B>, optimizer: Option<OptimizerSnapshot>) -> Result<Self> {
        Ok(Self { format_version: FORMAT_VERSION, run_id, global_step, shape: model.shape(), model: model.to_bytes()?, optimizer })
    }

    /// Encodes into `writer` and flushes it, so a failed final write is reported.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = BufWriter::new(writer);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Writes to a sibling temp file and renames it over `path`; an existing
    /// checkpoint stays intact if the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = path.with_extension("bin.tmp");
        let written = File::create(&tmp_path).map_err(Error::from).and_then(|file| {
            self.write_to(&file)?;
            file.sync_all()?;
            Ok(())
        });
        if let Err(e) = written.and_then(|()| fs::rename(&tmp_path, path).map_err(Error::from)) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        log::debug!("Saved checkpoint of run {} at step {} to {}", self.run_id, self.global_step, path.display());
        Ok(())
    }

    /// Reads a checkpoint and verifies that its model record matches the stored shape layer by layer.
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let checkpoint: Checkpoint = bincode::deserialize_from(reader)?;

        if checkpoint.format_version != FORMAT_VERSION {
            return Err(Error::CheckpointMismatch {
                expected: format!("format version {}", FORMAT_VERSION),
                found: format!("format version {}", checkpoint.format_version),
            });
        }
        checkpoint.model::<InferenceBackend>(&Default::default())?;
        Ok(checkpoint)
    }

    /// Fails unless the stored network has exactly the requested layer sizes.
    pub fn check_shape(&self, expected: ModelShape) -> Result<()> {
        if self.shape != expected {
            return Err(Error::CheckpointMismatch { expected: expected.to_string(), found: self.shape.to_string() });
        }
        Ok(())
    }

    /// Rebuilds the stored network on `device`.
    pub fn model<B: Backend>(&self, device: &B::Device) -> Result<ActorCritic<B>> {
        ActorCritic::from_bytes(&self.model, self.shape, device)
    }
}

/// `<dir>/checkpoint_<step>.bin`
pub fn step_path(dir: &Path, global_step: usize) -> PathBuf {
    dir.join(format!("checkpoint_{}.bin", global_step))
}

pub fn final_path(dir: &Path) -> PathBuf {
    dir.join("checkpoint_final.bin")
}
