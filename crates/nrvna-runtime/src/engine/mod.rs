//! The inference-engine seam.
//!
//! The daemon treats the model library as an opaque engine: load a model,
//! encode a prompt, sample tokens, encode images, produce an embedding.
//! These traits are that contract. The runner owns every lifetime rule
//! (shared model, per-worker contexts, vision serialization); backends only
//! implement mechanics.
//!
//! Thread-safety contract:
//! - [`Engine`] and [`Model`] are shared across workers and must be
//!   `Send + Sync`. A loaded model is immutable.
//! - A [`Session`] is a per-request generation context, created and dropped
//!   on one worker thread.
//! - A [`Projector`] is a per-worker multimodal context. It is `Send` (it
//!   lives inside a worker's runner) but deliberately not `Sync`: callers
//!   must serialize [`Projector::encode`] themselves.

mod echo;

pub use echo::EchoEngine;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

/// Backend failure, as written into `failed/<id>/error.txt`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Failed to tokenize input: {0}")]
    Tokenize(String),
    #[error("Failed to create context: {0}")]
    Session(String),
    #[error("Failed to decode: {0}")]
    Decode(String),
    #[error("{0}")]
    Projector(String),
    #[error("Failed to get embeddings: {0}")]
    Embedding(String),
}

/// Knobs passed through at model load.
#[derive(Debug, Clone)]
pub struct ModelOptions {
    /// Layers offloaded to the accelerator.
    pub gpu_layers: u32,
}

/// Sampler parameters, applied by the backend in the fixed chain order
/// penalties → top-k → top-p → min-p → temperature → distribution sample.
#[derive(Debug, Clone)]
pub struct SamplerOptions {
    pub temp: f32,
    pub top_k: i32,
    pub top_p: f32,
    pub min_p: f32,
    pub repeat_penalty: f32,
    pub repeat_last_n: i32,
    /// 0 = nondeterministic.
    pub seed: u32,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            temp: 0.8,
            top_k: 40,
            top_p: 0.9,
            min_p: 0.05,
            repeat_penalty: 1.1,
            repeat_last_n: 64,
            seed: 0,
        }
    }
}

/// Per-session context sizing and mode.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Context window for this request (already clamped by the runner).
    pub n_ctx: usize,
    /// Prompt batch size.
    pub n_batch: usize,
    /// Open the context in embedding mode (mean pooling).
    pub embeddings: bool,
    pub sampler: SamplerOptions,
}

/// Entry point a backend implements: one-time backend initialization plus
/// model loading. `load_model` may have process-global side effects; the
/// runner guarantees it is first called serially on the main thread.
pub trait Engine: Send + Sync {
    fn load_model(&self, path: &Path, options: &ModelOptions)
        -> Result<Arc<dyn Model>, EngineError>;
}

/// An immutable loaded model: weights plus tokenizer metadata.
pub trait Model: Send + Sync + std::fmt::Debug {
    /// Context length the model was trained with.
    fn n_ctx_train(&self) -> usize;

    /// Embedding dimensionality.
    fn n_embd(&self) -> usize;

    /// Wrap a raw prompt as a single user message using the model's chat
    /// template. `None` when the model carries no template (base models);
    /// the caller then passes the prompt through verbatim.
    fn apply_chat_template(&self, user_message: &str) -> Option<String>;

    /// Token count of `text`, for context sizing and predict clamping.
    fn count_tokens(&self, text: &str) -> Result<usize, EngineError>;

    /// Open a fresh generation (or embedding) context.
    fn open_session(&self, options: &SessionOptions) -> Result<Box<dyn Session>, EngineError>;

    /// Load the multimodal projection model. One projector per worker; the
    /// backend may cap its own threads to `n_threads`.
    fn open_projector(
        &self,
        mmproj_path: &Path,
        n_threads: usize,
    ) -> Result<Box<dyn Projector>, EngineError>;
}

/// A single request's context. Created, driven, and dropped on one worker
/// thread; all accelerator resources are released on drop.
pub trait Session {
    /// Tokenize and decode the full prompt. Returns the prompt token count.
    fn decode_prompt(&mut self, text: &str) -> Result<usize, EngineError>;

    /// Sample one token, accept it into the sampler chain, decode it, and
    /// return its text piece. `None` at end-of-generation.
    fn next_piece(&mut self) -> Result<Option<String>, EngineError>;

    /// Sequence-level embedding of everything decoded so far. Only valid on
    /// sessions opened with `embeddings = true`; backends fall back to the
    /// last-token embedding when no pooled vector is available.
    fn embedding(&mut self) -> Result<Vec<f32>, EngineError>;
}

/// Per-worker multimodal encoder. `encode` seeds a session with image and
/// text chunks and returns the seeded token position. Callers MUST serialize
/// `encode` across all projectors — the accelerator compute graph is shared
/// process state.
pub trait Projector: Send {
    /// The media marker the backend expects inside the prompt text.
    fn marker(&self) -> &str;

    fn encode(
        &mut self,
        session: &mut dyn Session,
        text: &str,
        images: &[PathBuf],
    ) -> Result<usize, EngineError>;
}
