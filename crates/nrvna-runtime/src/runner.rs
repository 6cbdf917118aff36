//! Per-worker inference runner.
//!
//! Lifetime rules:
//!
//! - The model is loaded once per process per distinct path and shared
//!   read-only between runners through a single ref-counted slot. The slot's
//!   mutex is held only during load/replace, never across inference.
//! - Each worker owns its runner, and each runner owns its multimodal
//!   projector. Projectors are not safe to share across threads.
//! - Multimodal encoding is additionally serialized process-wide: the
//!   accelerator compute graph holds shared state that corrupts under
//!   concurrent vision encoding even with per-worker projectors. Text
//!   generation after the protected section runs in parallel.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::sync::Arc;
use std::time::Instant;

use nrvna_core::config::{RuntimeConfig, SamplingConfig};
use regex::Regex;

use crate::engine::{
    Engine, EngineError, Model, ModelOptions, Projector, SamplerOptions, Session, SessionOptions,
};

/// Headroom tokens reserved beyond prompt + prediction when sizing a context.
const CTX_MARGIN: usize = 64;

struct SharedModel {
    path: PathBuf,
    model: Arc<dyn Model>,
}

/// One slot per process: {path, handle}. First load wins; a different path
/// replaces the slot (the old model stays alive while runners reference it).
static MODEL_SLOT: Mutex<Option<SharedModel>> = Mutex::new(None);

/// Serializes `Projector::encode` across every worker in the process.
static VISION_ENCODING: Mutex<()> = Mutex::new(());

fn shared_model(
    engine: &dyn Engine,
    path: &Path,
    options: &ModelOptions,
) -> Result<Arc<dyn Model>, EngineError> {
    let mut slot = MODEL_SLOT.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(shared) = slot.as_ref() {
        if shared.path == path {
            return Ok(shared.model.clone());
        }
    }
    tracing::info!(model = %path.display(), "loading model");
    let model = engine.load_model(path, options)?;
    *slot = Some(SharedModel {
        path: path.to_path_buf(),
        model: model.clone(),
    });
    tracing::info!(model = %path.display(), "model loaded");
    Ok(model)
}

/// Sampling parameters resolved for one request.
#[derive(Debug, Clone)]
pub struct SamplingPlan {
    pub max_ctx: usize,
    pub n_predict: usize,
    pub n_batch: usize,
    pub sampler: SamplerOptions,
}

impl SamplingPlan {
    pub fn resolve(config: &SamplingConfig, n_ctx_train: usize, vision: bool) -> Self {
        Self {
            max_ctx: n_ctx_train.min(config.max_ctx),
            n_predict: config.n_predict,
            n_batch: config.n_batch,
            sampler: SamplerOptions {
                temp: if vision { config.vision_temp } else { config.temp },
                top_k: config.top_k,
                top_p: config.top_p,
                min_p: config.min_p,
                repeat_penalty: config.repeat_penalty,
                repeat_last_n: config.repeat_last_n,
                seed: config.seed,
            },
        }
    }

    /// Prediction budget once the prompt occupies `n_prompt` tokens:
    /// `prompt + predict + margin` must fit inside `max_ctx`.
    pub fn clamped_predict(&self, n_prompt: usize) -> usize {
        self.n_predict
            .min(self.max_ctx.saturating_sub(n_prompt + CTX_MARGIN))
    }

    fn session_options(&self, n_prompt: usize, n_predict: usize) -> SessionOptions {
        SessionOptions {
            n_ctx: (n_prompt + n_predict + CTX_MARGIN).min(self.max_ctx),
            n_batch: self.n_batch,
            embeddings: false,
            sampler: self.sampler.clone(),
        }
    }
}

/// A worker's inference engine: the shared model plus this worker's private
/// projector. One runner per worker, created before the worker threads start.
pub struct Runner {
    model: Arc<dyn Model>,
    projector: Option<Box<dyn Projector>>,
    sampling: SamplingConfig,
}

impl Runner {
    /// Build a runner. The model load is shared; the projector (when
    /// `mmproj` is given) is private to this runner, with its generation
    /// threads divided evenly among workers to prevent oversubscription.
    pub fn new(
        engine: &dyn Engine,
        model_path: &Path,
        mmproj_path: Option<&Path>,
        workers: usize,
        config: &RuntimeConfig,
    ) -> Result<Self, EngineError> {
        let model = shared_model(
            engine,
            model_path,
            &ModelOptions {
                gpu_layers: config.engine.gpu_layers,
            },
        )?;

        let projector = match mmproj_path {
            Some(path) => {
                let total = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4);
                let threads = (total / workers.max(1)).max(1);
                tracing::info!(
                    mmproj = %path.display(),
                    threads,
                    workers,
                    "loading multimodal projector"
                );
                match model.open_projector(path, threads) {
                    Ok(projector) => Some(projector),
                    Err(e) => {
                        tracing::warn!(
                            mmproj = %path.display(),
                            error = %e,
                            "failed to load mmproj, running in text-only mode"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        Ok(Self {
            model,
            projector,
            sampling: config.sampling.clone(),
        })
    }

    pub fn is_multimodal(&self) -> bool {
        self.projector.is_some()
    }

    /// Text generation: template-wrap, size a context for prompt + predict,
    /// decode the prompt, then pull pieces until end-of-generation or the
    /// clamped budget runs out.
    pub fn run_text(&mut self, prompt: &str) -> Result<String, EngineError> {
        let plan = SamplingPlan::resolve(&self.sampling, self.model.n_ctx_train(), false);
        let formatted = self
            .model
            .apply_chat_template(prompt)
            .unwrap_or_else(|| prompt.to_string());

        let n_prompt = self.model.count_tokens(&formatted)?;
        let n_predict = plan.clamped_predict(n_prompt);

        let mut session = self
            .model
            .open_session(&plan.session_options(n_prompt, n_predict))?;
        session.decode_prompt(&formatted)?;

        let output = generate(session.as_mut(), n_predict)?;
        tracing::debug!(bytes = output.len(), "generation complete");
        Ok(strip_think_blocks(&output))
    }

    /// Vision generation: prepend one media marker per image unless the
    /// prompt already carries markers, template-wrap the composite, encode
    /// chunks under the global vision mutex, then generate as usual.
    pub fn run_vision(
        &mut self,
        prompt: &str,
        images: &[PathBuf],
    ) -> Result<String, EngineError> {
        if images.is_empty() {
            return self.run_text(prompt);
        }
        let Some(projector) = self.projector.as_mut() else {
            return Err(EngineError::Projector(
                "Vision job requires --mmproj".into(),
            ));
        };

        let plan = SamplingPlan::resolve(&self.sampling, self.model.n_ctx_train(), true);
        tracing::info!(images = images.len(), temp = plan.sampler.temp, "vision job");

        let marker = projector.marker().to_string();
        let composite = if prompt.contains(&marker) {
            prompt.to_string()
        } else {
            format!("{}{}", marker.repeat(images.len()), prompt)
        };
        let formatted = self
            .model
            .apply_chat_template(&composite)
            .unwrap_or(composite);

        // Vision sessions are sized to the full window up front: the chunk
        // token count is only known after encoding.
        let mut session = self.model.open_session(&SessionOptions {
            n_ctx: plan.max_ctx,
            n_batch: plan.n_batch,
            embeddings: false,
            sampler: plan.sampler.clone(),
        })?;

        let encode_started = Instant::now();
        let n_past = {
            let _serialized = VISION_ENCODING
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            projector.encode(session.as_mut(), &formatted, images)?
        };
        tracing::info!(
            tokens = n_past,
            elapsed_ms = encode_started.elapsed().as_millis() as u64,
            "vision encoding complete"
        );

        let n_predict = plan.clamped_predict(n_past);
        let output = generate(session.as_mut(), n_predict)?;
        Ok(strip_think_blocks(&output))
    }

    /// Embedding: fresh context in embedding mode (mean pooling), decode,
    /// read the sequence vector. The session is dropped on every exit path.
    pub fn embed(&mut self, text: &str) -> Result<Vec<f32>, EngineError> {
        let n_tokens = self.model.count_tokens(text)?;
        let mut session = self.model.open_session(&SessionOptions {
            n_ctx: n_tokens + 1,
            n_batch: n_tokens.max(1),
            embeddings: true,
            sampler: SamplerOptions::default(),
        })?;
        session.decode_prompt(text)?;
        let vector = session.embedding()?;
        tracing::info!(dims = vector.len(), "embedding generated");
        Ok(vector)
    }
}

/// The token loop: pull pieces until end-of-generation or `n_predict`.
fn generate(session: &mut dyn Session, n_predict: usize) -> Result<String, EngineError> {
    let mut output = String::new();
    for _ in 0..n_predict {
        match session.next_piece()? {
            Some(piece) => output.push_str(&piece),
            None => break,
        }
    }
    Ok(output)
}

/// Hide chain-of-thought spans emitted by reasoning models.
pub fn strip_think_blocks(text: &str) -> String {
    static THINK: OnceLock<Regex> = OnceLock::new();
    let re = THINK.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>\s*").expect("valid regex"));
    re.replace_all(text, "").trim_start().to_string()
}
