//! The bundled echo backend.
//!
//! A deterministic engine with no model weights: the completion for a prompt
//! is the prompt itself, tokenized by whitespace and re-emitted one piece at
//! a time. It exists so the full daemon — scanner, pool, claim, runner
//! lifecycle, finalization — can be exercised end to end without an
//! accelerator, and it is the engine behind the integration suite.
//!
//! Prompts may carry inline directives, which the engine strips from its
//! output:
//!
//! - `<<fail>>` — decoding reports a synthetic failure
//! - `<<sleep:N>>` — decoding blocks for N milliseconds
//!
//! The projector counts concurrent `encode` calls; a peak above one means a
//! caller violated the vision serialization contract.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{
    Engine, EngineError, Model, ModelOptions, Projector, Session, SessionOptions,
};

const N_CTX_TRAIN: usize = 4096;
const N_EMBD: usize = 64;
const MARKER: &str = "<__media__>";

#[derive(Debug, Default)]
struct EncodeStats {
    active: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicUsize,
}

/// Deterministic echo engine. Cloning shares the projector statistics.
#[derive(Clone, Default)]
pub struct EchoEngine {
    chat_template: bool,
    encode_delay: Duration,
    stats: Arc<EncodeStats>,
}

impl EchoEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give loaded models a canned chat template, so template wrapping is
    /// observable in the output.
    pub fn with_chat_template(mut self) -> Self {
        self.chat_template = true;
        self
    }

    /// Make each projector encode take at least `delay`, so overlap between
    /// concurrent encodes is observable.
    pub fn with_encode_delay(mut self, delay: Duration) -> Self {
        self.encode_delay = delay;
        self
    }

    /// Highest number of simultaneously running projector encodes seen.
    pub fn peak_concurrent_encodes(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }

    /// Total projector encodes performed.
    pub fn total_encodes(&self) -> usize {
        self.stats.total.load(Ordering::SeqCst)
    }
}

impl Engine for EchoEngine {
    fn load_model(
        &self,
        path: &Path,
        _options: &ModelOptions,
    ) -> Result<Arc<dyn Model>, EngineError> {
        if !path.is_file() {
            return Err(EngineError::ModelLoad(path.display().to_string()));
        }
        Ok(Arc::new(EchoModel {
            chat_template: self.chat_template,
            encode_delay: self.encode_delay,
            stats: self.stats.clone(),
        }))
    }
}

#[derive(Debug)]
struct EchoModel {
    chat_template: bool,
    encode_delay: Duration,
    stats: Arc<EncodeStats>,
}

impl Model for EchoModel {
    fn n_ctx_train(&self) -> usize {
        N_CTX_TRAIN
    }

    fn n_embd(&self) -> usize {
        N_EMBD
    }

    fn apply_chat_template(&self, user_message: &str) -> Option<String> {
        if self.chat_template {
            Some(format!("<|user|>\n{user_message}\n<|assistant|>\n"))
        } else {
            None
        }
    }

    fn count_tokens(&self, text: &str) -> Result<usize, EngineError> {
        Ok(strip_directives(text).split_whitespace().count().max(1))
    }

    fn open_session(&self, options: &SessionOptions) -> Result<Box<dyn Session>, EngineError> {
        Ok(Box::new(EchoSession {
            embeddings: options.embeddings,
            seeded: String::new(),
            queue: Vec::new(),
            emitted: false,
        }))
    }

    fn open_projector(
        &self,
        mmproj_path: &Path,
        _n_threads: usize,
    ) -> Result<Box<dyn Projector>, EngineError> {
        if !mmproj_path.is_file() {
            return Err(EngineError::Projector(format!(
                "Failed to load mmproj: {}",
                mmproj_path.display()
            )));
        }
        Ok(Box::new(EchoProjector {
            stats: self.stats.clone(),
            delay: self.encode_delay,
        }))
    }
}

struct EchoSession {
    embeddings: bool,
    seeded: String,
    queue: Vec<String>,
    emitted: bool,
}

impl Session for EchoSession {
    fn decode_prompt(&mut self, text: &str) -> Result<usize, EngineError> {
        if text.contains("<<fail>>") {
            return Err(EngineError::Decode("synthetic failure directive".into()));
        }
        if let Some(ms) = sleep_directive(text) {
            std::thread::sleep(Duration::from_millis(ms));
        }

        let cleaned = strip_directives(text);
        if !self.seeded.is_empty() {
            self.seeded.push(' ');
        }
        self.seeded.push_str(cleaned.trim());

        self.queue = self.seeded.split_whitespace().map(str::to_string).collect();
        self.emitted = false;
        Ok(self.queue.len().max(1))
    }

    fn next_piece(&mut self) -> Result<Option<String>, EngineError> {
        if self.queue.is_empty() {
            return Ok(None);
        }
        let word = self.queue.remove(0);
        let piece = if self.emitted {
            format!(" {word}")
        } else {
            word
        };
        self.emitted = true;
        Ok(Some(piece))
    }

    fn embedding(&mut self) -> Result<Vec<f32>, EngineError> {
        if !self.embeddings {
            return Err(EngineError::Embedding(
                "context not opened in embedding mode".into(),
            ));
        }
        // Deterministic pseudo-embedding: same text, same vector.
        let mut state = fnv1a(self.seeded.as_bytes()).max(1);
        let mut vector = Vec::with_capacity(N_EMBD);
        for _ in 0..N_EMBD {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            vector.push(((state % 2000) as f32 / 1000.0) - 1.0);
        }
        Ok(vector)
    }
}

struct EchoProjector {
    stats: Arc<EncodeStats>,
    delay: Duration,
}

impl Projector for EchoProjector {
    fn marker(&self) -> &str {
        MARKER
    }

    fn encode(
        &mut self,
        session: &mut dyn Session,
        text: &str,
        images: &[PathBuf],
    ) -> Result<usize, EngineError> {
        let active = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(active, Ordering::SeqCst);
        self.stats.total.fetch_add(1, Ordering::SeqCst);

        let result = self.encode_inner(session, text, images);

        self.stats.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl EchoProjector {
    fn encode_inner(
        &self,
        session: &mut dyn Session,
        text: &str,
        images: &[PathBuf],
    ) -> Result<usize, EngineError> {
        let mut description = String::new();
        for (idx, image) in images.iter().enumerate() {
            let bytes = fs::metadata(image)
                .map_err(|e| {
                    EngineError::Projector(format!(
                        "Failed to load image(s): {}: {e}",
                        image.display()
                    ))
                })?
                .len();
            description.push_str(&format!("[image_{idx}:{bytes}b] "));
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let text = text.replace(MARKER, "");
        session.decode_prompt(&format!("{description}{text}"))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn sleep_directive(text: &str) -> Option<u64> {
    let start = text.find("<<sleep:")?;
    let rest = &text[start + "<<sleep:".len()..];
    let end = rest.find(">>")?;
    rest[..end].parse().ok()
}

fn strip_directives(text: &str) -> String {
    let mut out = text.replace("<<fail>>", "");
    while let Some(start) = out.find("<<sleep:") {
        let Some(end) = out[start..].find(">>") else {
            break;
        };
        out.replace_range(start..start + end + 2, "");
    }
    out
}
