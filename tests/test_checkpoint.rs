use deploy_rl::domain::policy::actor_critic::{ActorCritic, ModelShape};
use deploy_rl::domain::policy::backend::InferenceBackend;
use deploy_rl::domain::policy::model::PolicyValueModel;
use deploy_rl::domain::runner::checkpoint::{self, Checkpoint};
use deploy_rl::domain::trainer::optimizer::OptimizerSnapshot;
use deploy_rl::error::Error;
use std::io::{self, Write};
use uuid::Uuid;

const SHAPE: ModelShape = ModelShape::new(12, 4, 16);

fn observation() -> Vec<f32> {
    vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.25, 0.75, 0.0, 0.3]
}

fn network(shape: ModelShape, seed: u64) -> ActorCritic<InferenceBackend> {
    ActorCritic::new(shape, seed, &Default::default())
}

/// Accepts every write but fails to flush, like a full disk.
struct FullDisk;

impl Write for FullDisk {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::other("no space left on device"))
    }
}

#[test]
fn test_round_trip_reproduces_distribution() {
    let dir = tempfile::tempdir().unwrap();
    let model = network(SHAPE, 77);
    let optimizer = OptimizerSnapshot { steps: 3, record: vec![1, 2, 3] };
    let run_id = Uuid::new_v4();

    let path = checkpoint::step_path(dir.path(), 500);
    Checkpoint::new(run_id, 500, &model, Some(optimizer.clone())).unwrap().save(&path).unwrap();
    let loaded = Checkpoint::load(&path).unwrap();

    assert_eq!(loaded.run_id, run_id);
    assert_eq!(loaded.global_step, 500);
    assert_eq!(loaded.shape, SHAPE);
    assert_eq!(loaded.optimizer.as_ref(), Some(&optimizer));

    let restored = loaded.model::<InferenceBackend>(&Default::default()).unwrap();
    let (original_dist, original_value) = model.forward(&observation()).unwrap();
    let (restored_dist, restored_value) = restored.forward(&observation()).unwrap();
    assert_eq!(original_dist.probs(), restored_dist.probs(), "Loaded parameters must give identical action probabilities");
    assert_eq!(original_value, restored_value);
}

#[test]
fn test_shape_mismatch_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = checkpoint::final_path(dir.path());
    Checkpoint::new(Uuid::new_v4(), 0, &network(SHAPE, 0), None).unwrap().save(&path).unwrap();

    let loaded = Checkpoint::load(&path).unwrap();
    assert!(loaded.check_shape(SHAPE).is_ok());
    assert!(matches!(loaded.check_shape(ModelShape::new(14, 5, 16)), Err(Error::CheckpointMismatch { .. })));
}

#[test]
fn test_header_disagreeing_with_layers_is_rejected_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tampered.bin");

    let mut tampered = Checkpoint::new(Uuid::new_v4(), 0, &network(SHAPE, 1), None).unwrap();
    tampered.shape = ModelShape::new(12, 4, 8);
    tampered.write_to(std::fs::File::create(&path).unwrap()).unwrap();

    assert!(matches!(Checkpoint::load(&path), Err(Error::CheckpointMismatch { .. })), "Layer sizes must match the stored shape");

    let mut truncated = Checkpoint::new(Uuid::new_v4(), 0, &network(SHAPE, 1), None).unwrap();
    truncated.model.truncate(truncated.model.len() / 2);
    truncated.write_to(std::fs::File::create(&path).unwrap()).unwrap();
    assert!(Checkpoint::load(&path).is_err());
}

#[test]
fn test_flush_failure_is_reported() {
    let checkpoint = Checkpoint::new(Uuid::new_v4(), 9, &network(SHAPE, 2), None).unwrap();
    assert!(matches!(checkpoint.write_to(FullDisk), Err(Error::IoError(_))));
}

#[test]
fn test_save_replaces_without_leftovers() {
    let dir = tempfile::tempdir().unwrap();
    let path = checkpoint::final_path(dir.path());

    Checkpoint::new(Uuid::new_v4(), 1, &network(SHAPE, 3), None).unwrap().save(&path).unwrap();
    Checkpoint::new(Uuid::new_v4(), 2, &network(SHAPE, 4), None).unwrap().save(&path).unwrap();

    assert_eq!(Checkpoint::load(&path).unwrap().global_step, 2);
    let names: Vec<_> = std::fs::read_dir(dir.path()).unwrap().map(|entry| entry.unwrap().file_name()).collect();
    assert_eq!(names, vec![std::ffi::OsString::from("checkpoint_final.bin")], "Temp file must be renamed into place");
}

#[test]
fn test_missing_or_corrupt_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(Checkpoint::load(&dir.path().join("absent.bin")), Err(Error::IoError(_))));

    let garbage = dir.path().join("garbage.bin");
    std::fs::write(&garbage, b"not a checkpoint").unwrap();
    assert!(Checkpoint::load(&garbage).is_err());
}
