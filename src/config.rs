// src/config.rs

use crate::error::EngineError;
use crate::types::{Config, UnknownClassPolicy};
use anyhow::Result;
use std::fs;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Lowercase class labels on both sides of the map so lookups match the
    /// normalization applied to raw detector output.
    fn normalize(&mut self) {
        let map = std::mem::take(&mut self.classes.map);
        self.classes.map = map
            .into_iter()
            .map(|(k, v)| {
                (
                    k.trim().to_lowercase(),
                    v.trim().to_lowercase(),
                )
            })
            .collect();
        self.classes.other_class = self.classes.other_class.trim().to_lowercase();
    }

    /// Eager validation: every rule checked here before any event is
    /// processed, so ConfigurationError cannot surface mid-run.
    pub fn validate(&self) -> std::result::Result<(), EngineError> {
        if self.bucket_seconds == 0 {
            return Err(EngineError::Configuration(
                "bucket_seconds must be > 0".to_string(),
            ));
        }
        if self.classes.map.is_empty() {
            return Err(EngineError::Configuration(
                "classes.map must not be empty".to_string(),
            ));
        }
        if self.classes.other_class.is_empty() {
            return Err(EngineError::Configuration(
                "classes.other_class must not be empty".to_string(),
            ));
        }

        if self.density.default_reference_max < 1 {
            return Err(EngineError::Configuration(
                "density.default_reference_max must be >= 1".to_string(),
            ));
        }
        for (camera_id, max) in &self.density.reference_max_by_camera {
            if *max < 1 {
                return Err(EngineError::Configuration(format!(
                    "density.reference_max_by_camera[{camera_id}] must be >= 1"
                )));
            }
        }
        let s = self.emissions.sensitivity;
        if !s.is_finite() || !(0.0..1.0).contains(&s) {
            return Err(EngineError::Configuration(format!(
                "emissions.sensitivity must be in [0, 1), got {s}"
            )));
        }
        for (class, factor) in &self.emissions.factors {
            if !factor.is_finite() || *factor < 0.0 {
                return Err(EngineError::Configuration(format!(
                    "emissions.factors[{class}] must be >= 0, got {factor}"
                )));
            }
        }
        // Fail closed at load time: every class that can appear in a
        // CountRecord needs an explicit factor, zero included.
        for target in self.classes.map.values() {
            if !self.emissions.factors.contains_key(target) {
                return Err(EngineError::Configuration(format!(
                    "emissions.factors missing entry for mapped class '{target}'"
                )));
            }
        }
        if self.classes.unknown_policy == UnknownClassPolicy::RouteToOther
            && !self.emissions.factors.contains_key(&self.classes.other_class)
        {
            return Err(EngineError::Configuration(format!(
                "emissions.factors missing entry for other class '{}'",
                self.classes.other_class
            )));
        }

        match self.detector.name.as_str() {
            "dummy" => {
                let dummy = &self.detector.dummy;
                if !matches!(dummy.mode.as_str(), "none" | "random") {
                    return Err(EngineError::Configuration(format!(
                        "detector.dummy.mode must be 'none' or 'random', got '{}'",
                        dummy.mode
                    )));
                }
                if !(dummy.sampling_fps > 0.0) {
                    return Err(EngineError::Configuration(
                        "detector.dummy.sampling_fps must be > 0".to_string(),
                    ));
                }
                if dummy.duration_seconds < 0.0 {
                    return Err(EngineError::Configuration(
                        "detector.dummy.duration_seconds must be >= 0".to_string(),
                    ));
                }
            }
            "jsonl" => {}
            other => {
                return Err(EngineError::Configuration(format!(
                    "detector.name must be 'jsonl' or 'dummy', got '{other}'"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::types::{Config, DensityMode, UnknownClassPolicy};

    fn base_yaml() -> String {
        r#"
bucket_seconds: 60
classes:
  map:
    Car: car
    bus: bus
    motorbike: motorcycle
  unknown_policy: route_to_other
  other_class: other
detector:
  name: jsonl
density:
  mode: rolling
  default_reference_max: 30
emissions:
  factors:
    car: 0.25
    bus: 1.2
    motorcycle: 0.1
    other: 0.0
  sensitivity: 0.1
storage:
  db_path: data/traffic.db
  input_dir: data/events
logging:
  level: info
"#
        .to_string()
    }

    fn parse(yaml: &str) -> Result<Config, String> {
        let mut config: Config = serde_yaml::from_str(yaml).map_err(|e| e.to_string())?;
        // Mirror Config::load without touching the filesystem.
        let map = std::mem::take(&mut config.classes.map);
        config.classes.map = map
            .into_iter()
            .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_lowercase()))
            .collect();
        config.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }

    #[test]
    fn test_valid_config_parses_and_normalizes() {
        let config = parse(&base_yaml()).unwrap();
        assert_eq!(config.bucket_seconds, 60);
        assert_eq!(config.density.mode, DensityMode::Rolling);
        assert_eq!(config.classes.unknown_policy, UnknownClassPolicy::RouteToOther);
        // "Car" key lowercased by normalization
        assert_eq!(config.classes.map.get("car").map(String::as_str), Some("car"));
        assert_eq!(
            config.classes.map.get("motorbike").map(String::as_str),
            Some("motorcycle")
        );
    }

    #[test]
    fn test_zero_bucket_seconds_rejected() {
        let yaml = base_yaml().replace("bucket_seconds: 60", "bucket_seconds: 0");
        let err = parse(&yaml).unwrap_err();
        assert!(err.contains("bucket_seconds"), "{err}");
    }

    #[test]
    fn test_sensitivity_out_of_range_rejected() {
        let yaml = base_yaml().replace("sensitivity: 0.1", "sensitivity: 1.0");
        let err = parse(&yaml).unwrap_err();
        assert!(err.contains("sensitivity"), "{err}");
    }

    #[test]
    fn test_missing_factor_for_mapped_class_rejected() {
        let yaml = base_yaml().replace("    motorcycle: 0.1\n", "");
        let err = parse(&yaml).unwrap_err();
        assert!(err.contains("motorcycle"), "{err}");
    }

    #[test]
    fn test_missing_factor_for_other_class_rejected() {
        let yaml = base_yaml().replace("    other: 0.0\n", "");
        let err = parse(&yaml).unwrap_err();
        assert!(err.contains("other"), "{err}");
    }

    #[test]
    fn test_zero_reference_max_rejected() {
        let yaml = base_yaml().replace("default_reference_max: 30", "default_reference_max: 0");
        let err = parse(&yaml).unwrap_err();
        assert!(err.contains("default_reference_max"), "{err}");
    }

    #[test]
    fn test_negative_factor_rejected() {
        let yaml = base_yaml().replace("car: 0.25", "car: -0.25");
        let err = parse(&yaml).unwrap_err();
        assert!(err.contains("factors[car]"), "{err}");
    }
}
