//! Configuration for submitters and the daemon.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $NRVNA_CONFIG (explicit override)
//!   2. none — the file is optional; most deployments run on env vars alone.
//!
//! Every `NRVNA_*` variable from the environment table below overrides the
//! corresponding field after the file (if any) is loaded.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub sampling: SamplingConfig,
    pub limits: LimitsConfig,
    pub engine: EngineConfig,
}

/// Sampling parameters resolved per inference request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Max generation tokens per request.
    pub n_predict: usize,
    /// Cap on the context window; clamped to the model's trained context.
    pub max_ctx: usize,
    /// Prompt batch size.
    pub n_batch: usize,
    pub temp: f32,
    pub top_k: i32,
    pub top_p: f32,
    pub min_p: f32,
    pub repeat_penalty: f32,
    pub repeat_last_n: i32,
    /// Sampler RNG seed. 0 = nondeterministic.
    pub seed: u32,
    /// Temperature override for vision jobs.
    pub vision_temp: f32,
}

/// Payload size limits enforced at submission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Max prompt bytes.
    pub max_prompt_bytes: u64,
    /// Max bytes per attached image.
    pub max_image_bytes: u64,
}

/// Engine/backend knobs the daemon passes through at model load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Layers to offload to the accelerator.
    pub gpu_layers: u32,
    /// Root directory for model auto-discovery.
    pub models_dir: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            sampling: SamplingConfig::default(),
            limits: LimitsConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            n_predict: 2048,
            max_ctx: 8192,
            n_batch: 2048,
            temp: 0.8,
            top_k: 40,
            top_p: 0.9,
            min_p: 0.05,
            repeat_penalty: 1.1,
            repeat_last_n: 64,
            seed: 0,
            vision_temp: 0.3,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_prompt_bytes: 10_000_000,           // 10 MB
            max_image_bytes: 50 * 1024 * 1024,      // 50 MB
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            // Apple unified memory makes full offload the sane default;
            // everywhere else the backend decides nothing without opt-in.
            gpu_layers: if cfg!(target_os = "macos") { 99 } else { 0 },
            models_dir: PathBuf::from("./models"),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, #[source] std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, #[source] toml::de::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl RuntimeConfig {
    /// Load config: env vars → file ($NRVNA_CONFIG) → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("NRVNA_CONFIG").map(PathBuf::from) {
            Ok(path) if path.exists() => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
                toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
            }
            _ => RuntimeConfig::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply NRVNA_* env var overrides.
    fn apply_env_overrides(&mut self) {
        let s = &mut self.sampling;
        override_parsed("NRVNA_PREDICT", &mut s.n_predict);
        override_parsed("NRVNA_MAX_CTX", &mut s.max_ctx);
        override_parsed("NRVNA_BATCH", &mut s.n_batch);
        override_parsed("NRVNA_TEMP", &mut s.temp);
        override_parsed("NRVNA_TOP_K", &mut s.top_k);
        override_parsed("NRVNA_TOP_P", &mut s.top_p);
        override_parsed("NRVNA_MIN_P", &mut s.min_p);
        override_parsed("NRVNA_REPEAT_PENALTY", &mut s.repeat_penalty);
        override_parsed("NRVNA_REPEAT_LAST_N", &mut s.repeat_last_n);
        override_parsed("NRVNA_SEED", &mut s.seed);
        override_parsed("NRVNA_VISION_TEMP", &mut s.vision_temp);

        override_parsed("NRVNA_MAX_SIZE", &mut self.limits.max_prompt_bytes);
        override_parsed("NRVNA_MAX_IMAGE_SIZE", &mut self.limits.max_image_bytes);

        override_parsed("NRVNA_GPU_LAYERS", &mut self.engine.gpu_layers);
        if let Ok(v) = std::env::var("NRVNA_MODELS_DIR") {
            if !v.is_empty() {
                self.engine.models_dir = PathBuf::from(v);
            }
        }
    }
}

/// Replace `slot` with the parsed value of the env var, when set and valid.
/// Invalid or empty values keep the existing value rather than erroring:
/// a typo in an env var must never take the daemon down.
fn override_parsed<T: std::str::FromStr>(name: &str, slot: &mut T) {
    if let Ok(v) = std::env::var(name) {
        if let Ok(parsed) = v.trim().parse() {
            *slot = parsed;
        }
    }
}
