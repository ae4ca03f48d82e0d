mod test_helpers;

use deep_watermark::error::WatermarkError;
use deep_watermark::network::WatermarkModel;
use deep_watermark::nn::Module;
use deep_watermark::training::{resume, restore, Checkpoint, CheckpointManager, CheckpointSlot};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;
use test_helpers::{assert_err, assert_ok, tiny_config};

fn model(seed: u64) -> WatermarkModel {
    let mut rng = StdRng::seed_from_u64(seed);
    assert_ok(WatermarkModel::new(&tiny_config(8, 16, 2), &mut rng), "building model")
}

#[test]
fn test_save_and_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let manager = CheckpointManager::new(dir.path(), "run");
    let original = model(1);

    let handle = assert_ok(manager.save(3, &original), "saving checkpoint");
    assert_eq!(handle.epoch, 3);
    assert_eq!(handle.path, dir.path().join("run--epoch-0003.wmc"));
    assert!(manager.path(CheckpointSlot::Last).exists());

    let loaded = assert_ok(CheckpointManager::load(&handle.path), "loading checkpoint");
    assert_eq!(loaded, Checkpoint::capture(3, &original));
}

#[test]
fn test_restore_reproduces_parameters() {
    let dir = TempDir::new().unwrap();
    let manager = CheckpointManager::new(dir.path(), "run");
    let original = model(1);
    manager.save(1, &original).unwrap();

    let mut other = model(2);
    assert_ne!(other.encoder.parameter_values(), original.encoder.parameter_values());

    let (next_epoch, handle) = assert_ok(resume(&mut other, dir.path()), "resuming");
    assert_eq!(next_epoch, 2);
    assert_eq!(handle.epoch, 1);
    assert_eq!(other.encoder.parameter_values(), original.encoder.parameter_values());
    assert_eq!(other.decoder.parameter_values(), original.decoder.parameter_values());
    assert_eq!(other.discriminator.parameter_values(), original.discriminator.parameter_values());
}

#[test]
fn test_latest_valid_checkpoint_wins() {
    let dir = TempDir::new().unwrap();
    let manager = CheckpointManager::new(dir.path(), "run");
    let original = model(1);
    for epoch in 1..=3 {
        manager.save(epoch, &original).unwrap();
    }
    // A truncated newer file must not hide the valid ones.
    std::fs::write(dir.path().join("run--epoch-0009.wmc"), b"WMCK\0\0\0\x01garbage").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"not a checkpoint").unwrap();

    let (checkpoint, handle) = assert_ok(CheckpointManager::load_latest(dir.path()), "loading latest");
    assert_eq!(checkpoint.epoch, 3);
    assert_eq!(handle.epoch, 3);
}

#[test]
fn test_missing_checkpoints() {
    let dir = TempDir::new().unwrap();
    let err = assert_err(CheckpointManager::load_latest(dir.path()), "empty folder");
    assert!(matches!(err, WatermarkError::CheckpointNotFound(_)));

    let err = assert_err(CheckpointManager::load_latest(dir.path().join("missing")), "missing folder");
    assert!(matches!(err, WatermarkError::CheckpointNotFound(_)));
}

#[test]
fn test_architecture_mismatch_is_rejected() {
    let checkpoint = Checkpoint::capture(1, &model(1));

    let mut rng = StdRng::seed_from_u64(1);
    let mut wider = WatermarkModel::new(&tiny_config(12, 16, 2), &mut rng).unwrap();
    let err = assert_err(restore(&mut wider, &checkpoint), "restoring into another architecture");
    assert!(matches!(err, WatermarkError::CheckpointVersionMismatch(_)));
}

#[test]
fn test_unknown_format_version() {
    let mut bytes = Checkpoint::capture(1, &model(1)).to_bytes().unwrap();
    bytes[7] = bytes[7].wrapping_add(1);
    let err = assert_err(Checkpoint::from_bytes(&bytes), "decoding a newer format");
    assert!(matches!(err, WatermarkError::CheckpointVersionMismatch(_)));
}

#[test]
fn test_unwritable_folder_is_recoverable() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("checkpoints");
    std::fs::write(&blocker, b"a file where the folder should be").unwrap();

    let manager = CheckpointManager::new(&blocker, "run");
    let err = assert_err(manager.save(1, &model(1)), "saving into a file");
    assert!(matches!(err, WatermarkError::CheckpointIo { .. }));
    assert!(err.is_recoverable());
}
