//! Integration tests for configuration handling

use pocket_player::config::{ConfigError, Settings};
use std::error::Error;
use std::fs;
use tempfile::tempdir;

#[cfg(test)]
mod config_integration_tests {
    use super::*;

    #[test]
    fn test_config_file_drives_pipeline_settings() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "output_device": "null",
                "pipeline": { "pool_size": 6, "prefill_chunks": 2, "free_poll_ms": 10 }
            }"#,
        )?;

        let settings = Settings::load(&path)?;
        settings.validate()?;
        assert!(settings.uses_null_device());
        assert_eq!(settings.pipeline.pool_size, 6);
        assert_eq!(settings.pipeline.prefill_chunks, 2);
        assert_eq!(settings.pipeline.free_poll_ms, 10);
        assert_eq!(settings.pipeline.teardown_wait_ms, 500);
        Ok(())
    }

    #[test]
    fn test_saved_config_round_trips() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("deep").join("dir").join("config.json");

        let mut settings = Settings::default();
        settings.pipeline.max_in_flight = 4;
        settings.save(&path)?;

        assert_eq!(Settings::load(&path)?, settings);
        Ok(())
    }

    #[test]
    fn test_invalid_pipeline_in_file_fails_validation() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "pipeline": { "pool_size": 2, "prefill_chunks": 5 } }"#)?;

        let settings = Settings::load(&path)?;
        match settings.validate() {
            Err(ConfigError::ValidationError(message)) => assert!(message.contains("prefill_chunks")),
            other => panic!("expected a validation error, got {:?}", other),
        }
        Ok(())
    }
}
