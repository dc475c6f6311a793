use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    /// Pause between two ticks of a stream; caps outbound and store write rate.
    pub tick_interval_ms: u64,
    /// How long a tick waits for a fresh frame before treating the tick as idle.
    pub frame_wait_ms: u64,
    pub activity_ttl_secs: u64,
    /// Frames whose perceptual hash is within this distance of the last
    /// estimated frame reuse its estimate.
    pub reuse_hash_distance: u32,
    pub reuse_cooldown_secs: u64,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            frame_wait_ms: 1000,
            activity_ttl_secs: 30,
            reuse_hash_distance: 2,
            reuse_cooldown_secs: 5,
        }
    }
}

impl TrackingSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn frame_wait(&self) -> Duration {
        Duration::from_millis(self.frame_wait_ms)
    }

    pub fn activity_ttl(&self) -> Duration {
        Duration::from_secs(self.activity_ttl_secs)
    }

    pub fn reuse_cooldown(&self) -> Duration {
        Duration::from_secs(self.reuse_cooldown_secs)
    }
}

/// Gaze bounds inside which a user counts as focused on the screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionThresholds {
    pub max_abs_horizontal: f64,
    pub min_vertical: f64,
    pub max_vertical: f64,
}

impl Default for AttentionThresholds {
    fn default() -> Self {
        Self {
            max_abs_horizontal: 0.35,
            min_vertical: 0.2,
            max_vertical: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Luma below which a pixel inside an eye socket counts as iris.
    pub dark_luma_threshold: u8,
    /// Minimum share of the frame covered by skin pixels to report a face.
    pub min_face_fraction: f64,
    /// Minimum share of the face box that must be skin.
    pub min_face_fill: f64,
    /// Projection bins below this fraction of the peak are trimmed.
    pub projection_trim: f64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            dark_luma_threshold: 70,
            min_face_fraction: 0.02,
            min_face_fill: 0.35,
            projection_trim: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: String,
    pub database_path: PathBuf,
    pub purge_interval_secs: u64,
    pub debug: bool,
    pub tracking: TrackingSettings,
    pub attention: AttentionThresholds,
    pub detector: DetectorSettings,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".into(),
            database_path: PathBuf::from("lefocus-server.sqlite3"),
            purge_interval_secs: 60,
            debug: false,
            tracking: TrackingSettings::default(),
            attention: AttentionThresholds::default(),
            detector: DetectorSettings::default(),
        }
    }
}

impl ServerSettings {
    /// Reads the JSON file named by `LEFOCUS_CONFIG` (if any), then applies
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let mut settings = match std::env::var_os("LEFOCUS_CONFIG") {
            Some(path) => Self::from_file(PathBuf::from(path))?,
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: PathBuf) -> Result<Self> {
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("LEFOCUS_BIND") {
            self.bind_addr = bind;
        }
        if let Some(path) = lookup("LEFOCUS_DB_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(value) = lookup("LEFOCUS_TICK_MS") {
            self.tracking.tick_interval_ms = value
                .parse()
                .with_context(|| format!("LEFOCUS_TICK_MS is not a number: {value}"))?;
        }
        if let Some(value) = lookup("LEFOCUS_ACTIVITY_TTL_SECS") {
            self.tracking.activity_ttl_secs = value
                .parse()
                .with_context(|| format!("LEFOCUS_ACTIVITY_TTL_SECS is not a number: {value}"))?;
        }
        if let Some(value) = lookup("LEFOCUS_DEBUG") {
            self.debug = value == "1" || value.eq_ignore_ascii_case("true");
        }
        Ok(())
    }
}
