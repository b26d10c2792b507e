//! Cache configuration: read-ahead/behind window, per-tier budgets, workers
//!
//! Video and audio get independent LRU budgets because a 4K RGBA frame is
//! tens of megabytes while a frame's worth of audio is a few kilobytes.
//!
//! Budgets can be given in bytes or derived from free system memory
//! (`MemoryBudget::from_system`), the same way the player sizes its frame cache.

use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};
use sysinfo::System;
use thiserror::Error;

/// Hard ceiling for an explicit worker override
pub const MAX_WORKERS: usize = 16;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Options load/save/validation errors
#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid options json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid option {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Recognized cache options.
///
/// Fields read as snake_case; the camelCase names other tools write are
/// accepted too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Seconds to keep ahead of the playhead (in play direction)
    #[serde(alias = "readAhead")]
    pub read_ahead: f64,
    /// Seconds to keep behind the playhead
    #[serde(alias = "readBehind")]
    pub read_behind: f64,
    /// Weight budget for decoded video frames (bytes)
    #[serde(alias = "videoBudgetBytes")]
    pub video_budget_bytes: usize,
    /// Weight budget for decoded audio (bytes)
    #[serde(alias = "audioBudgetBytes")]
    pub audio_budget_bytes: usize,
    /// Decode threads, 0 = auto
    #[serde(alias = "workerCount")]
    pub worker_count: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            read_ahead: 4.0,
            read_behind: 0.5,
            video_budget_bytes: 4 * 1024 * 1024 * 1024,
            audio_budget_bytes: 256 * 1024 * 1024,
            worker_count: 0,
        }
    }
}

impl CacheOptions {
    /// Reject values the cache can't work with
    pub fn validate(&self) -> Result<(), OptionsError> {
        for (field, value) in [("read_ahead", self.read_ahead), ("read_behind", self.read_behind)] {
            if !value.is_finite() || value < 0.0 {
                return Err(OptionsError::Invalid {
                    field,
                    reason: format!("expected seconds >= 0, got {}", value),
                });
            }
        }
        Ok(())
    }

    /// Worker threads to spawn.
    ///
    /// Auto: `num_cpus * 3 / 4` (leave room for UI/playback), clamped to 1..=8.
    /// Explicit values are clamped to 1..=MAX_WORKERS.
    pub fn resolved_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            (num_cpus::get() * 3 / 4).clamp(1, 8)
        } else {
            self.worker_count.clamp(1, MAX_WORKERS)
        }
    }

    /// Replace the video budget with a share of free system memory
    pub fn with_system_budget(mut self, mem_fraction: f64, reserve_gb: f64) -> Self {
        self.video_budget_bytes = MemoryBudget::from_system(mem_fraction, reserve_gb).bytes;
        self
    }

    /// Load options from a JSON file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, OptionsError> {
        let text = std::fs::read_to_string(path).map_err(|source| OptionsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let options: CacheOptions = serde_json::from_str(&text)?;
        options.validate()?;
        Ok(options)
    }

    /// Write options as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), OptionsError> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|source| OptionsError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Memory budget derived from available RAM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBudget {
    pub available: usize,
    pub bytes: usize,
}

impl MemoryBudget {
    /// Budget = (available - reserve) * fraction
    ///
    /// # Arguments
    ///
    /// * `mem_fraction` - Fraction of available memory (0.0-1.0, e.g. 0.75 = 75%)
    /// * `reserve_gb` - Reserve memory for system (GB, e.g. 2.0 = 2GB)
    pub fn from_system(mem_fraction: f64, reserve_gb: f64) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        let budget = Self::compute(sys.available_memory() as usize, mem_fraction, reserve_gb);

        info!(
            "Cache budget: available={} MB, reserve={} MB, limit={} MB ({}%)",
            budget.available / 1024 / 1024,
            (reserve_gb.max(0.0) * GIB) as usize / 1024 / 1024,
            budget.bytes / 1024 / 1024,
            (mem_fraction.clamp(0.0, 1.0) * 100.0) as u32
        );
        budget
    }

    /// Pure part of `from_system`, testable without touching the OS
    pub fn compute(available: usize, mem_fraction: f64, reserve_gb: f64) -> Self {
        let reserve = (reserve_gb.max(0.0) * GIB) as usize;
        let usable = available.saturating_sub(reserve);
        let bytes = (usable as f64 * mem_fraction.clamp(0.0, 1.0)) as usize;
        Self { available, bytes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let options = CacheOptions::default();
        assert!(options.validate().is_ok());
        assert!(options.resolved_worker_count() >= 1);
        assert!(options.resolved_worker_count() <= 8);
    }

    #[test]
    fn test_worker_override_clamped() {
        let options = CacheOptions {
            worker_count: 500,
            ..Default::default()
        };
        assert_eq!(options.resolved_worker_count(), MAX_WORKERS);
    }

    #[test]
    fn test_validate_rejects_negative() {
        let options = CacheOptions {
            read_behind: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(OptionsError::Invalid { field: "read_behind", .. })
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let options: CacheOptions = serde_json::from_str(r#"{"read_ahead": 2.5}"#).unwrap();
        assert_eq!(options.read_ahead, 2.5);
        assert_eq!(options.read_behind, CacheOptions::default().read_behind);
        assert_eq!(options.worker_count, 0);
    }

    #[test]
    fn test_camel_case_fields_accepted() {
        let json = r#"{
            "readAhead": 1.5,
            "readBehind": 0.25,
            "videoBudgetBytes": 1048576,
            "audioBudgetBytes": 4096,
            "workerCount": 2
        }"#;
        let options: CacheOptions = serde_json::from_str(json).unwrap();
        assert_eq!(
            options,
            CacheOptions {
                read_ahead: 1.5,
                read_behind: 0.25,
                video_budget_bytes: 1 << 20,
                audio_budget_bytes: 4096,
                worker_count: 2,
            }
        );
    }

    #[test]
    fn test_save_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tlcache.json");
        let options = CacheOptions {
            read_ahead: 2.0,
            read_behind: 1.0,
            video_budget_bytes: 1 << 20,
            audio_budget_bytes: 1 << 10,
            worker_count: 3,
        };
        options.save(&path).unwrap();
        assert_eq!(CacheOptions::load(&path).unwrap(), options);
    }

    #[test]
    fn test_load_missing_file() {
        let err = CacheOptions::load(Path::new("/no/such/tlcache.json")).unwrap_err();
        assert!(matches!(err, OptionsError::Io { .. }));
    }

    #[test]
    fn test_budget_compute() {
        let gib = 1024 * 1024 * 1024;
        let budget = MemoryBudget::compute(10 * gib, 0.5, 2.0);
        assert_eq!(budget.bytes, 4 * gib);

        // Reserve larger than available
        assert_eq!(MemoryBudget::compute(gib, 0.75, 2.0).bytes, 0);
    }
}
