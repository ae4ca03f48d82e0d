use crate::error::{Result, WatermarkError};
use std::path::{Path, PathBuf};

/// Validates that a directory exists
pub fn validate_directory(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Err(WatermarkError::Configuration(format!(
            "{} does not exist",
            path.display()
        )));
    }

    if !path.is_dir() {
        return Err(WatermarkError::Configuration(format!(
            "{} is not a directory",
            path.display()
        )));
    }

    Ok(path.to_path_buf())
}

/// Validates that a job folder can be created: it must not exist yet, and nothing along its
/// ancestry may be a regular file.
pub fn validate_new_job_folder(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Err(WatermarkError::Configuration(format!(
            "Job folder {} already exists",
            path.display()
        )));
    }

    if let Some(blocking) = path.ancestors().skip(1).find(|a| a.is_file()) {
        return Err(WatermarkError::Configuration(format!(
            "{} is a file, cannot create job folder {}",
            blocking.display(),
            path.display()
        )));
    }

    Ok(path.to_path_buf())
}

/// Validates a positive integer parameter
pub fn validate_positive_int(value: &str, param_name: &str) -> Result<usize> {
    let parsed = value
        .parse::<usize>()
        .map_err(|_| WatermarkError::Parse(format!("{} must be a positive integer", param_name)))?;

    if parsed == 0 {
        return Err(WatermarkError::Configuration(format!(
            "{} must be greater than 0",
            param_name
        )));
    }

    Ok(parsed)
}

/// Validates a non-negative, finite float parameter
pub fn validate_non_negative_float(value: &str, param_name: &str) -> Result<f32> {
    let parsed = value
        .parse::<f32>()
        .map_err(|_| WatermarkError::Parse(format!("{} must be a valid number", param_name)))?;

    if !parsed.is_finite() || parsed < 0.0 {
        return Err(WatermarkError::Configuration(format!(
            "{} must be a finite, non-negative number",
            param_name
        )));
    }

    Ok(parsed)
}

/// Validates a positive float parameter
pub fn validate_positive_float(value: &str, param_name: &str) -> Result<f32> {
    let parsed = validate_non_negative_float(value, param_name)?;

    if parsed == 0.0 {
        return Err(WatermarkError::Configuration(format!(
            "{} must be greater than 0",
            param_name
        )));
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_positive_int() {
        assert_eq!(validate_positive_int("10", "test").unwrap(), 10);
        assert!(matches!(validate_positive_int("0", "test"), Err(WatermarkError::Configuration(_))));
        assert!(matches!(validate_positive_int("-5", "test"), Err(WatermarkError::Parse(_))));
        assert!(matches!(validate_positive_int("abc", "test"), Err(WatermarkError::Parse(_))));
    }

    #[test]
    fn test_validate_floats() {
        assert_eq!(validate_positive_float("0.001", "lr").unwrap(), 0.001);
        assert!(validate_positive_float("0", "lr").is_err());
        assert_eq!(validate_non_negative_float("0", "weight").unwrap(), 0.0);
        assert!(validate_non_negative_float("inf", "weight").is_err());
        assert!(validate_non_negative_float("-1", "weight").is_err());
    }

    #[test]
    fn test_validate_new_job_folder() {
        let dir = TempDir::new().unwrap();
        assert!(validate_new_job_folder(&dir.path().join("jobs").join("run")).is_ok());
        assert!(validate_new_job_folder(dir.path()).is_err());

        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        assert!(validate_new_job_folder(&file.join("run")).is_err());
    }

    #[test]
    fn test_validate_directory() {
        let dir = TempDir::new().unwrap();
        assert!(validate_directory(dir.path()).is_ok());
        assert!(validate_directory(&dir.path().join("missing")).is_err());
    }
}
