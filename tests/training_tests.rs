mod test_helpers;

use std::path::Path;

use deep_watermark::config::{Architecture, UnetShape};
use deep_watermark::error::{Result, WatermarkError};
use deep_watermark::message::bit_error_rate;
use deep_watermark::training::metrics::METRIC_NAMES;
use deep_watermark::training::{
    resume, CheckpointManager, CheckpointSlot, CoverSource, Cropping, CsvMetricsLog, EpochMetrics, FitPlan,
    ImageFolderSource, MetricsSink, Phase, SyntheticSource, Trainer,
};
use ndarray::Array4;
use rand::RngCore;
use tempfile::TempDir;
use test_helpers::{assert_err, assert_ok, quiet_plan, tiny_config, write_images};

/// Yields valid batches until `poison_after` batches have been drawn, NaN images afterwards.
struct PoisonedSource {
    inner: SyntheticSource,
    drawn: usize,
    poison_after: usize,
}

impl CoverSource for PoisonedSource {
    fn batches_per_epoch(&self) -> usize {
        self.inner.batches_per_epoch()
    }

    fn next_batch(&mut self, rng: &mut dyn RngCore) -> Result<Array4<f32>> {
        let batch = self.inner.next_batch(rng)?;
        self.drawn += 1;
        if self.drawn > self.poison_after {
            Ok(batch.mapv(|_| f32::NAN))
        } else {
            Ok(batch)
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    records: Vec<EpochMetrics>,
    partial: Vec<EpochMetrics>,
}

impl MetricsSink for RecordingSink {
    fn record(&mut self, metrics: &EpochMetrics) -> Result<()> {
        self.records.push(metrics.clone());
        Ok(())
    }

    fn flush_partial(&mut self, metrics: &EpochMetrics) -> Result<()> {
        self.partial.push(metrics.clone());
        Ok(())
    }
}

fn csv_epochs(path: &Path) -> Vec<usize> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .skip(1)
        .map(|line| line.split(',').next().unwrap().parse().unwrap())
        .collect()
}

#[test]
fn test_default_message_length_round_trips_shapes() {
    let mut trainer = Trainer::from_config(&tiny_config(30, 128, 4)).unwrap();
    let mut source = SyntheticSource::new(128, 4, 1);
    let mut rng = rand::thread_rng();
    let cover = source.next_batch(&mut rng).unwrap();
    let message = trainer.sample_messages(4);

    let output = assert_ok(trainer.generator_step(&cover, &message), "generator step");
    assert_eq!(output.watermarked.shape(), &[4, 3, 128, 128]);
    assert_eq!(output.noised.shape(), &[4, 3, 128, 128]);
    assert_eq!(output.decoded.shape(), &[4, 30]);

    let ber = bit_error_rate(output.decoded.view(), message.view()).unwrap();
    assert!((0.0..=1.0).contains(&ber));
}

#[test]
fn test_batch_reports_every_metric() {
    let mut config = tiny_config(8, 16, 2);
    config.noise = "cropout(0.4,0.6)+jpeg()".to_string();
    let mut trainer = Trainer::from_config(&config).unwrap();
    let mut source = SyntheticSource::new(16, 2, 1);
    let mut rng = rand::thread_rng();
    let cover = source.next_batch(&mut rng).unwrap();
    let message = trainer.sample_messages(2);

    let metrics = assert_ok(trainer.train_on_batch(&cover, &message), "training batch");
    for name in METRIC_NAMES {
        let value = metrics.get(*name).unwrap_or_else(|| panic!("missing {}", name));
        assert!(value.is_finite(), "{} = {}", name, value);
    }
    assert!((0.0..=1.0).contains(&metrics["bitwise-error"]));
}

#[test]
fn test_wrong_message_shape_is_rejected() {
    let mut trainer = Trainer::from_config(&tiny_config(8, 16, 2)).unwrap();
    let cover = Array4::zeros((2, 3, 16, 16));
    let message = trainer.sample_messages(3);
    let err = assert_err(trainer.train_on_batch(&cover, &message), "mismatched batch");
    assert!(matches!(err, WatermarkError::ShapeMismatch(_)));
}

#[test]
fn test_unet_encoder_trains() {
    let mut config = tiny_config(8, 32, 2);
    config.architecture = Architecture::UnetConv;
    config.unet = UnetShape {
        filters: 4,
        down_blocks: 5,
    };
    let mut trainer = Trainer::from_config(&config).unwrap();
    let mut rng = rand::thread_rng();
    let cover = SyntheticSource::new(32, 2, 1).next_batch(&mut rng).unwrap();
    let message = trainer.sample_messages(2);
    let metrics = assert_ok(trainer.train_on_batch(&cover, &message), "U-Net batch");
    assert!(metrics["loss"].is_finite());
}

#[test]
fn test_unet_rejects_indivisible_image_size() {
    let mut config = tiny_config(8, 48, 2);
    config.architecture = Architecture::UnetConv;
    config.unet = UnetShape {
        filters: 4,
        down_blocks: 5,
    };
    assert!(matches!(Trainer::from_config(&config), Err(WatermarkError::ShapeMismatch(_))));
}

#[test]
fn test_divergence_stops_without_checkpoint() {
    let dir = TempDir::new().unwrap();
    let checkpoints = CheckpointManager::new(dir.path(), "run");
    let mut trainer = Trainer::from_config(&tiny_config(8, 16, 2)).unwrap();
    let mut source = PoisonedSource {
        inner: SyntheticSource::new(16, 2, 2),
        drawn: 0,
        poison_after: 3,
    };
    let mut sink = RecordingSink::default();

    let err = assert_err(
        trainer.fit(&quiet_plan(1, 3, 2), &mut source, None, &checkpoints, &mut sink),
        "training on NaN covers",
    );
    assert!(matches!(err, WatermarkError::NumericDivergence { .. }));

    // Epoch 1 completed, epoch 2 diverged on its second batch.
    assert!(checkpoints.path(CheckpointSlot::Epoch(1)).exists());
    assert!(!checkpoints.path(CheckpointSlot::Epoch(2)).exists());
    assert_eq!(sink.records.iter().map(|m| m.epoch).collect::<Vec<_>>(), vec![1]);
    assert_eq!(sink.partial.len(), 1);
    assert_eq!(sink.partial[0].epoch, 2);
    assert_eq!(sink.partial[0].phase, Phase::Train);
}

#[test]
fn test_nan_from_the_first_batch_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let folder = dir.path().join("checkpoints");
    let checkpoints = CheckpointManager::new(&folder, "run");
    let mut trainer = Trainer::from_config(&tiny_config(8, 16, 2)).unwrap();
    let mut source = PoisonedSource {
        inner: SyntheticSource::new(16, 2, 1),
        drawn: 0,
        poison_after: 0,
    };
    let mut sink = CsvMetricsLog::new(dir.path());

    let result = trainer.fit(&quiet_plan(1, 2, 1), &mut source, None, &checkpoints, &mut sink);
    assert!(matches!(result, Err(WatermarkError::NumericDivergence { .. })));
    assert!(!folder.exists() || std::fs::read_dir(&folder).unwrap().next().is_none());
    assert!(!dir.path().join("train.csv").exists());
}

#[test]
fn test_resume_continues_after_last_checkpoint() {
    let dir = TempDir::new().unwrap();
    let config = tiny_config(8, 16, 2);
    let checkpoints = CheckpointManager::new(dir.path().join("checkpoints"), "run");
    let mut csv = CsvMetricsLog::new(dir.path());

    let mut trainer = Trainer::from_config(&config).unwrap();
    let mut source = SyntheticSource::new(16, 2, 1);
    let first = assert_ok(
        trainer.fit(&quiet_plan(1, 5, 1), &mut source, None, &checkpoints, &mut csv),
        "first run",
    );
    assert_eq!(first.completed_epochs, vec![1, 2, 3, 4, 5]);
    let trained = trainer.into_model();

    let mut restarted = Trainer::from_config(&config).unwrap();
    let (start, handle) = assert_ok(resume(restarted.model_mut(), checkpoints.folder()), "resume");
    assert_eq!(start, 6);
    assert_eq!(handle.epoch, 5);
    assert_eq!(
        deep_watermark::nn::Module::parameter_values(&restarted.model().decoder),
        deep_watermark::nn::Module::parameter_values(&trained.decoder)
    );

    let second = assert_ok(
        restarted.fit(&quiet_plan(start, 7, 1), &mut source, None, &checkpoints, &mut csv),
        "resumed run",
    );
    assert_eq!(second.completed_epochs, vec![6, 7]);
    assert_eq!(csv_epochs(&csv.path(Phase::Train)), vec![1, 2, 3, 4, 5, 6, 7]);
    assert!(checkpoints.path(CheckpointSlot::Epoch(7)).exists());
}

#[test]
fn test_diverged_validation_is_not_recorded_twice_after_resume() {
    let dir = TempDir::new().unwrap();
    let config = tiny_config(8, 16, 2);
    let checkpoints = CheckpointManager::new(dir.path().join("checkpoints"), "run");
    let mut csv = CsvMetricsLog::new(dir.path());

    let mut trainer = Trainer::from_config(&config).unwrap();
    let mut train = SyntheticSource::new(16, 2, 1);
    let mut validation = PoisonedSource {
        inner: SyntheticSource::new(16, 2, 1),
        drawn: 0,
        poison_after: 1,
    };
    let err = assert_err(
        trainer.fit(&quiet_plan(1, 3, 1), &mut train, Some(&mut validation), &checkpoints, &mut csv),
        "training with NaN validation covers from epoch 2",
    );
    assert!(matches!(err, WatermarkError::NumericDivergence { .. }));
    assert_eq!(csv_epochs(&csv.path(Phase::Train)), vec![1]);
    assert_eq!(csv_epochs(&csv.path(Phase::Validation)), vec![1]);

    let mut restarted = Trainer::from_config(&config).unwrap();
    let (start, _) = assert_ok(resume(restarted.model_mut(), checkpoints.folder()), "resume");
    assert_eq!(start, 2);
    assert_ok(csv.truncate_from(start), "truncate metrics");
    let mut validation = SyntheticSource::new(16, 2, 1);
    assert_ok(
        restarted.fit(&quiet_plan(start, 3, 1), &mut train, Some(&mut validation), &checkpoints, &mut csv),
        "resumed run",
    );
    assert_eq!(csv_epochs(&csv.path(Phase::Train)), vec![1, 2, 3]);
    assert_eq!(csv_epochs(&csv.path(Phase::Validation)), vec![1, 2, 3]);
}

#[test]
fn test_epochs_after_the_last_checkpoint_are_replaced_on_resume() {
    let dir = TempDir::new().unwrap();
    let config = tiny_config(8, 16, 2);
    let checkpoints = CheckpointManager::new(dir.path().join("checkpoints"), "run");
    let mut csv = CsvMetricsLog::new(dir.path());

    let mut trainer = Trainer::from_config(&config).unwrap();
    let mut source = SyntheticSource::new(16, 2, 1);
    assert_ok(
        trainer.fit(&quiet_plan(1, 3, 1), &mut source, None, &checkpoints, &mut csv),
        "first run",
    );
    // Epoch 3 was recorded but its checkpoint never reached the disk.
    std::fs::remove_file(checkpoints.path(CheckpointSlot::Epoch(3))).unwrap();
    std::fs::remove_file(checkpoints.path(CheckpointSlot::Last)).unwrap();

    let mut restarted = Trainer::from_config(&config).unwrap();
    let (start, handle) = assert_ok(resume(restarted.model_mut(), checkpoints.folder()), "resume");
    assert_eq!((start, handle.epoch), (3, 2));
    assert_ok(csv.truncate_from(start), "truncate metrics");
    assert_eq!(csv_epochs(&csv.path(Phase::Train)), vec![1, 2]);
    assert_ok(
        restarted.fit(&quiet_plan(start, 4, 1), &mut source, None, &checkpoints, &mut csv),
        "resumed run",
    );
    assert_eq!(csv_epochs(&csv.path(Phase::Train)), vec![1, 2, 3, 4]);
}

#[test]
fn test_unwritable_checkpoints_do_not_stop_training() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("checkpoints");
    std::fs::write(&blocker, b"occupied").unwrap();
    let checkpoints = CheckpointManager::new(&blocker, "run");

    let mut trainer = Trainer::from_config(&tiny_config(8, 16, 2)).unwrap();
    let mut source = SyntheticSource::new(16, 2, 1);
    let mut sink = RecordingSink::default();
    let summary = assert_ok(
        trainer.fit(&quiet_plan(1, 2, 1), &mut source, None, &checkpoints, &mut sink),
        "training with a blocked checkpoint folder",
    );
    assert_eq!(summary.completed_epochs, vec![1, 2]);
    assert_eq!(summary.failed_checkpoints, vec![1, 2]);
    assert!(summary.last_checkpoint.is_none());
    assert_eq!(sink.records.len(), 2);
}

#[test]
fn test_best_checkpoint_tracks_lowest_metric() {
    let dir = TempDir::new().unwrap();
    let checkpoints = CheckpointManager::new(dir.path(), "run");
    let mut trainer = Trainer::from_config(&tiny_config(8, 16, 2)).unwrap();
    let mut source = SyntheticSource::new(16, 2, 1);
    let mut sink = RecordingSink::default();
    let plan = FitPlan {
        best_metric: Some("loss".to_string()),
        ..quiet_plan(1, 3, 1)
    };

    let summary = trainer.fit(&plan, &mut source, None, &checkpoints, &mut sink).unwrap();
    let (best_epoch, best_value) = summary.best.expect("a best epoch");
    let lowest = sink
        .records
        .iter()
        .map(|m| m.get("loss").unwrap())
        .fold(f64::INFINITY, f64::min);
    assert_eq!(best_value, lowest);

    let best = CheckpointManager::load(checkpoints.path(CheckpointSlot::Best)).unwrap();
    assert_eq!(best.epoch, best_epoch);
    let last = CheckpointManager::load(checkpoints.path(CheckpointSlot::Last)).unwrap();
    assert_eq!(last.epoch, 3);
}

#[test]
fn test_image_folders_with_validation_and_samples() {
    let dir = TempDir::new().unwrap();
    write_images(&dir.path().join("train"), 3, 24);
    write_images(&dir.path().join("val").join("nested"), 2, 12);
    let job = dir.path().join("job");

    let mut train = ImageFolderSource::new(dir.path().join("train"), 16, 2, Cropping::Random).unwrap();
    let mut validation = ImageFolderSource::new(dir.path().join("val"), 16, 2, Cropping::Centre).unwrap();
    assert_eq!(train.len(), 3);
    assert_eq!(validation.len(), 2);

    let checkpoints = CheckpointManager::new(job.join("checkpoints"), "run");
    let mut csv = CsvMetricsLog::new(&job);
    let plan = FitPlan {
        images_folder: Some(job.join("images")),
        ..quiet_plan(1, 1, 1)
    };
    let mut trainer = Trainer::from_config(&tiny_config(8, 16, 2)).unwrap();
    let summary = trainer
        .fit(&plan, &mut train, Some(&mut validation), &checkpoints, &mut csv)
        .unwrap();

    assert_eq!(summary.completed_epochs, vec![1]);
    assert_eq!(csv_epochs(&csv.path(Phase::Validation)), vec![1]);
    assert!(job.join("images").join("epoch-0001.png").exists());
    let header = std::fs::read_to_string(csv.path(Phase::Train)).unwrap();
    assert!(header.starts_with("epoch,loss,encoder_mse,decoder_mse,bitwise-error"));
}

#[test]
fn test_validation_leaves_parameters_untouched() {
    let mut trainer = Trainer::from_config(&tiny_config(8, 16, 2)).unwrap();
    let before = deep_watermark::training::Checkpoint::capture(0, trainer.model());
    let mut rng = rand::thread_rng();
    let cover = SyntheticSource::new(16, 2, 1).next_batch(&mut rng).unwrap();
    let message = trainer.sample_messages(2);
    trainer.validate_on_batch(&cover, &message).unwrap();
    let after = deep_watermark::training::Checkpoint::capture(0, trainer.model());
    assert_eq!(before, after);
}
