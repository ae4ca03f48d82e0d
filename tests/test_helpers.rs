//! Shared helpers for the integration tests.
//!
//! Included with `mod test_helpers;`, so every test binary gets its own copy.
#![allow(dead_code)]

use std::fmt::Debug;
use std::path::Path;

use deep_watermark::config::{NetworkShape, WatermarkConfig};
use deep_watermark::training::FitPlan;

/// Assert that a Result is Ok and return the unwrapped value.
pub fn assert_ok<T, E: Debug>(result: Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("Expected Ok result for {}, but got error: {:?}", context, err),
    }
}

/// Assert that a Result is Err and return the error.
pub fn assert_err<T: Debug, E>(result: Result<T, E>, context: &str) -> E {
    match result {
        Err(err) => err,
        Ok(val) => panic!("Expected Err result for {}, but got Ok: {:?}", context, val),
    }
}

/// Assert that a string contains a substring, with helpful error message.
pub fn assert_contains(haystack: &str, needle: &str, context: &str) {
    assert!(
        haystack.contains(needle),
        "{}: Expected to find '{}' in output, but got: '{}'",
        context,
        needle,
        haystack
    );
}

/// A seeded configuration with narrow networks, small enough to train a few batches per test.
pub fn tiny_config(message_length: usize, image_size: usize, batch_size: usize) -> WatermarkConfig {
    WatermarkConfig::builder()
        .message_length(message_length)
        .image_size(image_size)
        .batch_size(batch_size)
        .encoder(NetworkShape::new(2, 8))
        .decoder(NetworkShape::new(2, 8))
        .discriminator(NetworkShape::new(2, 8))
        .seed(7)
        .show_progress(false)
        .build()
}

/// Trains epochs `start..=end` with no sample images and no best checkpoint.
pub fn quiet_plan(start: usize, end: usize, batches: usize) -> FitPlan {
    FitPlan {
        start_epoch: start,
        epochs: end,
        batches_per_epoch: Some(batches),
        best_metric: None,
        show_progress: false,
        images_folder: None,
    }
}

/// Writes `count` small gradient images into `folder`.
pub fn write_images(folder: &Path, count: usize, size: u32) {
    std::fs::create_dir_all(folder).unwrap();
    for i in 0..count {
        let image = image::RgbImage::from_fn(size, size, |x, y| {
            image::Rgb([(x * 7 + i as u32) as u8, (y * 5) as u8, ((x + y) * 3) as u8])
        });
        image.save(folder.join(format!("img_{:02}.png", i))).unwrap();
    }
}
