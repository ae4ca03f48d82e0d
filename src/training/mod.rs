pub mod checkpoint;
pub mod data_loader;
pub mod metrics;
pub mod trainer;

pub use self::checkpoint::{restore, resume, Checkpoint, CheckpointHandle, CheckpointManager, CheckpointSlot};
pub use self::data_loader::{CoverSource, Cropping, ImageFolderSource, SyntheticSource};
pub use self::metrics::{CsvMetricsLog, EpochMetrics, GaugeSink, MetricsAccumulator, MetricsSink, Phase, SinkSet, TracingSink};
pub use self::trainer::{BatchMetrics, FitPlan, FitSummary, GeneratorOutput, Trainer};
