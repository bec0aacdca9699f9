// config.rs - Capture Configuration
//
// Timing and gesture tuning for the capture subsystem, persisted as JSON
// next to the rest of the application's settings. Missing fields fall back
// to the defaults in constants.rs.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::constants::{magnifier, registry, selection, session};
use crate::error::CaptureResult;
use crate::magnifier::MagnifierLayout;
use crate::selection::SelectionTuning;
use crate::session::SessionTuning;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub resize_debounce_ms: u64,
    pub aspect_tolerance: f64,
    pub minimized_poll_ms: u64,
    pub double_activation_ms: u64,
    pub min_selection_size: f64,
    pub magnifier_side: u32,
    pub magnifier_zoom: u32,
    pub add_dedup_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            resize_debounce_ms: session::RESIZE_DEBOUNCE_MS,
            aspect_tolerance: session::ASPECT_TOLERANCE,
            minimized_poll_ms: session::MINIMIZED_POLL_MS,
            double_activation_ms: selection::DOUBLE_ACTIVATION_MS,
            min_selection_size: selection::MIN_SIZE,
            magnifier_side: magnifier::DEFAULT_SIDE,
            magnifier_zoom: magnifier::DEFAULT_ZOOM,
            add_dedup_ms: registry::ADD_DEDUP_MS,
        }
    }
}

impl CaptureConfig {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ChromaFrame")
            .join("capture.json")
    }

    /// Load from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load from `path`, falling back to defaults on any error
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    info!("Capture config loaded from {:?}", path);
                    return config;
                }
                Err(e) => error!("Failed to parse capture config: {}", e),
            },
            Err(e) => error!("Failed to read capture config: {}", e),
        }
        Self::default()
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("creating {:?}", dir))?;
        }
        let json = serde_json::to_string_pretty(self).context("serializing capture config")?;
        fs::write(path, json).with_context(|| format!("writing {:?}", path))?;
        info!("Capture config saved to {:?}", path);
        Ok(())
    }

    pub fn session_tuning(&self) -> SessionTuning {
        SessionTuning {
            resize_debounce: Duration::from_millis(self.resize_debounce_ms),
            aspect_tolerance: self.aspect_tolerance,
            minimized_poll: Duration::from_millis(self.minimized_poll_ms.max(1)),
        }
    }

    pub fn selection_tuning(&self) -> SelectionTuning {
        SelectionTuning {
            min_size: self.min_selection_size,
            double_activation: Duration::from_millis(self.double_activation_ms),
            ..SelectionTuning::default()
        }
    }

    pub fn magnifier_layout(&self) -> CaptureResult<MagnifierLayout> {
        MagnifierLayout::new(self.magnifier_side, self.magnifier_zoom)
    }

    pub fn add_dedup_window(&self) -> Duration {
        Duration::from_millis(self.add_dedup_ms)
    }
}
