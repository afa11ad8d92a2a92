// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Runtime tuning knobs.
//!
//! The configuration is plain data; the runtime copies it at construction
//! and exposes setters for the values that may change while running.

use crate::utils::timer::secs_to_duration;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Render rates above this are treated as uncapped.
pub const MAX_CAPPED_FPS: u32 = 1000;

/// An error raised while loading a [`RuntimeConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read runtime config: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration text is not valid JSON for [`RuntimeConfig`].
    #[error("invalid runtime config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Timing configuration of a runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Render-phase cap in frames per second. `None` (or anything above
    /// [`MAX_CAPPED_FPS`]) renders on every tick.
    pub fps_limit: Option<u32>,
    /// Frequency of the fixed logic step (UPDATE_PRE / UPDATE_POST). A
    /// non-positive rate runs the step on every tick.
    pub logic_rate_hz: f64,
    /// Wall-clock budget of the context-thread processor per tick.
    pub processor_budget_ms: f64,
    /// Interval between two PROFILE passes.
    pub profile_interval_secs: f64,
    /// How far the logic delta may drift from the logic interval, in
    /// multiples of that interval, before the render phase is skipped.
    pub drift_tolerance: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            fps_limit: None,
            logic_rate_hz: 60.0,
            processor_budget_ms: 8.0,
            profile_interval_secs: 0.5,
            drift_tolerance: 10.0,
        }
    }
}

impl RuntimeConfig {
    /// Loads a configuration from a JSON string. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Serializes the configuration to pretty JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Interval of the fixed logic step.
    pub fn logic_interval(&self) -> Duration {
        rate_to_interval(self.logic_rate_hz)
    }

    /// Interval of the render phase, or `None` when rendering is uncapped.
    pub fn render_interval(&self) -> Option<Duration> {
        match self.fps_limit {
            Some(fps) if fps > 0 && fps <= MAX_CAPPED_FPS => Some(rate_to_interval(f64::from(fps))),
            _ => None,
        }
    }

    /// Per-tick budget of the context-thread processor.
    pub fn processor_budget(&self) -> Duration {
        secs_to_duration(self.processor_budget_ms / 1000.0)
    }

    /// Interval between two PROFILE passes.
    pub fn profile_interval(&self) -> Duration {
        secs_to_duration(self.profile_interval_secs)
    }
}

fn rate_to_interval(rate_hz: f64) -> Duration {
    if rate_hz.is_finite() && rate_hz > 0.0 {
        secs_to_duration(1.0 / rate_hz)
    } else {
        Duration::ZERO
    }
}
