use deep_watermark::error::WatermarkError;
use std::io;
use std::path::PathBuf;

#[test]
fn test_io_error_conversion() {
    let io_err = io::Error::new(io::ErrorKind::NotFound, "test error");
    let err: WatermarkError = io_err.into();

    match err {
        WatermarkError::Io(_) => (),
        _ => panic!("Expected Io error variant"),
    }
}

#[test]
fn test_error_display() {
    let err = WatermarkError::Configuration("bad noise".to_string());
    assert_eq!(format!("{}", err), "Configuration error: bad noise");

    let err = WatermarkError::NumericDivergence {
        metric: "loss".to_string(),
        value: f32::NAN,
    };
    assert_eq!(format!("{}", err), "Numeric divergence: loss = NaN");

    let err = WatermarkError::CheckpointNotFound(PathBuf::from("/jobs/run/checkpoints"));
    assert_eq!(format!("{}", err), "No valid checkpoint found in /jobs/run/checkpoints");
}

#[test]
fn test_checkpoint_io_display_names_path() {
    let err = WatermarkError::checkpoint_io("/jobs/run/checkpoints/run--last.wmc", "disk full");
    let display = format!("{}", err);
    assert!(display.contains("run--last.wmc"));
    assert!(display.contains("disk full"));
}

#[test]
fn test_only_checkpoint_writes_are_recoverable() {
    assert!(WatermarkError::checkpoint_io("/x", "denied").is_recoverable());
    assert!(!WatermarkError::NumericDivergence {
        metric: "loss".to_string(),
        value: f32::INFINITY
    }
    .is_recoverable());
    assert!(!WatermarkError::ShapeMismatch("x".to_string()).is_recoverable());
    assert!(!WatermarkError::CheckpointVersionMismatch("x".to_string()).is_recoverable());
}

#[test]
fn test_shape_error_conversion() {
    let shape_err = ndarray::Array2::<f32>::zeros((2, 3)).into_shape((4, 4)).unwrap_err();
    let err: WatermarkError = shape_err.into();
    assert!(matches!(err, WatermarkError::ShapeMismatch(_)));
}
