//! Speech synthesis: text → f32 samples.
//!
//! Kokoro pipeline:
//! 1. Text → sentences (split on .!?)
//! 2. Sentence → phonemes (misaki-rs G2P)
//! 3. Phonemes → token IDs (tokenizer.json vocabulary)
//! 4. Token IDs + voice style + speed → ONNX inference → f32 audio (24kHz)
//! 5. Sentences joined with a short pause
//!
//! Playback is not done here; the pipeline stores the samples as an
//! [`AudioClip`](crate::audio::AudioClip) and the player stage plays it.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use ndarray::{Array2, Array3};
use ndarray_npy::NpzReader;
use ort::value::Tensor;
use tracing::{debug, info, warn};

use crate::config::TtsConfig;
use crate::error::{Result, SpeakerError};

pub const SAMPLE_RATE: u32 = 24000;
const MAX_TOKENS: usize = 510; // Voice style array first dimension
const SENTENCE_GAP_SECS: f32 = 0.15;

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text`. An empty vector means nothing was speakable.
    async fn synthesize(&self, text: &str) -> Result<Vec<f32>>;

    fn sample_rate(&self) -> u32;
}

/// Loaded voice style data: shape (510, 1, 256) f32.
struct VoiceData {
    /// Style vectors indexed by token count. shape: (510, 256)
    styles: Array2<f32>,
}

/// Native Kokoro TTS engine.
///
/// Cheap to share: the loaded model sits behind an `Arc` so inference can
/// move onto the blocking pool.
pub struct KokoroTtsEngine {
    model: Arc<KokoroModel>,
}

struct KokoroModel {
    // ONNX model (Mutex because ort 2.0 Session::run needs &mut)
    session: Mutex<ort::session::Session>,
    phonemizer: misaki_rs::G2P,
    vocab: HashMap<char, i64>,
    voices: HashMap<String, VoiceData>,
    voice: String,
    speed: f32,
}

impl KokoroTtsEngine {
    /// Load the ONNX model, tokenizer, voices, and phonemizer.
    /// Blocking; call from `spawn_blocking` at startup.
    pub fn load(config: &TtsConfig) -> Result<Self> {
        let t0 = Instant::now();
        let base_dir = std::env::current_dir().unwrap_or_default();
        let model_path = resolve(&config.model_path, &base_dir, "kokoro-v1.0.onnx");
        let voices_path = resolve(&config.voices_path, &base_dir, "voices-v1.0.bin");
        let tokenizer_path = resolve(&config.tokenizer_path, &base_dir, "tokenizer.json");

        info!("Loading tokenizer from {}", tokenizer_path.display());
        let vocab = load_tokenizer(&tokenizer_path)?;
        info!("Tokenizer loaded: {} tokens", vocab.len());

        info!("Loading voices from {}", voices_path.display());
        let voices = load_voices(&voices_path)?;
        info!("Loaded {} voices", voices.len());

        if !voices.contains_key(&config.voice) {
            return Err(SpeakerError::Config(format!(
                "unknown voice '{}' (available: {})",
                config.voice,
                sorted_names(&voices).join(", ")
            )));
        }

        info!("Loading ONNX model from {}", model_path.display());
        let session = ort::session::Session::builder()
            .map_err(|e| model_error("create ONNX session builder", e))?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(|e| model_error("set optimization level", e))?
            .with_intra_threads(4)
            .map_err(|e| model_error("set thread count", e))?
            .commit_from_file(&model_path)
            .map_err(|e| model_error("load ONNX model", e))?;

        info!("Initializing misaki-rs phonemizer...");
        let phonemizer = misaki_rs::G2P::new(misaki_rs::Language::EnglishUS);

        info!("Kokoro TTS loaded in {}ms", t0.elapsed().as_millis());

        Ok(Self {
            model: Arc::new(KokoroModel {
                session: Mutex::new(session),
                phonemizer,
                vocab,
                voices,
                voice: config.voice.clone(),
                speed: config.speed,
            }),
        })
    }

    pub fn voice(&self) -> &str {
        &self.model.voice
    }

    pub fn list_voices(&self) -> Vec<String> {
        sorted_names(&self.model.voices)
    }
}

impl KokoroModel {
    /// Synthesize all sentences of `text` into one buffer.
    fn synthesize(&self, text: &str) -> Result<Vec<f32>> {
        let sentences = split_sentences(text.trim());
        let gap = vec![0.0_f32; (SAMPLE_RATE as f32 * SENTENCE_GAP_SECS) as usize];
        let mut audio = Vec::new();

        for (i, sentence) in sentences.iter().enumerate() {
            let t_gen = Instant::now();
            let samples = match self.generate_audio(sentence) {
                Ok(s) => s,
                Err(e) => {
                    warn!("TTS generation failed for sentence {}: {e}", i + 1);
                    continue;
                }
            };
            debug!(
                "Sentence {}/{}: gen={:.0}ms",
                i + 1,
                sentences.len(),
                t_gen.elapsed().as_secs_f64() * 1000.0
            );

            if samples.is_empty() {
                continue;
            }
            if !audio.is_empty() {
                audio.extend_from_slice(&gap);
            }
            audio.extend(samples);
        }

        Ok(audio)
    }

    /// Generate audio samples for a single sentence.
    fn generate_audio(&self, text: &str) -> Result<Vec<f32>> {
        // 1. Text → phonemes via misaki-rs G2P
        let (phonemes, _tokens) = self
            .phonemizer
            .g2p(text)
            .map_err(|e| SpeakerError::Synthesis(format!("Phonemization failed: {e}")))?;

        if phonemes.is_empty() {
            return Ok(Vec::new());
        }

        // 2. Phonemes → token IDs, unknown characters skipped
        let mut token_ids: Vec<i64> = Vec::with_capacity(phonemes.len() + 2);
        token_ids.push(0); // Start padding
        token_ids.extend(phonemes.chars().filter_map(|ch| self.vocab.get(&ch).copied()));
        token_ids.push(0); // End padding

        let n_tokens = token_ids.len().min(MAX_TOKENS);
        token_ids.truncate(n_tokens);

        // 3. Voice style vector for this token count
        let voice_data = self
            .voices
            .get(&self.voice)
            .ok_or_else(|| SpeakerError::Synthesis(format!("Voice not found: {}", self.voice)))?;
        let style_idx = style_index(n_tokens, voice_data.styles.nrows());
        let style_vec: Vec<f32> = voice_data.styles.row(style_idx).to_vec();

        // 4. ONNX input tensors
        let tokens_array = Array2::from_shape_vec((1, n_tokens), token_ids)
            .map_err(|e| synth_error("tokens tensor", e))?;
        let tokens_tensor =
            Tensor::from_array(tokens_array).map_err(|e| synth_error("tokens ort tensor", e))?;

        let style_array = Array2::from_shape_vec((1, 256), style_vec)
            .map_err(|e| synth_error("style tensor", e))?;
        let style_tensor =
            Tensor::from_array(style_array).map_err(|e| synth_error("style ort tensor", e))?;

        let speed_array = ndarray::Array1::from_vec(vec![self.speed]);
        let speed_tensor =
            Tensor::from_array(speed_array).map_err(|e| synth_error("speed ort tensor", e))?;

        // 5. Inference
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = session
            .run(ort::inputs![
                "tokens" => tokens_tensor,
                "style" => style_tensor,
                "speed" => speed_tensor
            ])
            .map_err(|e| synth_error("ONNX inference", e))?;

        // 6. First output tensor holds the audio
        let first_output = outputs
            .iter()
            .next()
            .ok_or_else(|| SpeakerError::Synthesis("No output tensor from model".into()))?;
        let (_shape, audio_slice) = first_output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| synth_error("extract audio tensor", e))?;

        let samples: Vec<f32> = audio_slice.to_vec();
        debug!(
            "Generated {} samples ({:.1}s)",
            samples.len(),
            samples.len() as f32 / SAMPLE_RATE as f32
        );
        Ok(samples)
    }
}

#[async_trait]
impl Synthesizer for KokoroTtsEngine {
    async fn synthesize(&self, text: &str) -> Result<Vec<f32>> {
        // Inference is CPU-bound; keep it off the async worker threads.
        let model = self.model.clone();
        let text = text.to_owned();
        tokio::task::spawn_blocking(move || model.synthesize(&text))
            .await
            .map_err(|e| synth_error("inference task", e))?
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

// --- Helper functions ---

fn resolve(configured: &str, base_dir: &Path, default_name: &str) -> PathBuf {
    if configured.is_empty() {
        base_dir.join(default_name)
    } else {
        PathBuf::from(configured)
    }
}

fn model_error(what: &str, e: impl std::fmt::Display) -> SpeakerError {
    SpeakerError::Synthesis(format!("Failed to {what}: {e}"))
}

fn synth_error(what: &str, e: impl std::fmt::Display) -> SpeakerError {
    SpeakerError::Synthesis(format!("{what}: {e}"))
}

/// Style row for a sequence of `n_tokens` (padding included).
fn style_index(n_tokens: usize, rows: usize) -> usize {
    n_tokens.saturating_sub(2).min(rows.saturating_sub(1))
}

fn sorted_names(voices: &HashMap<String, VoiceData>) -> Vec<String> {
    let mut names: Vec<String> = voices.keys().cloned().collect();
    names.sort();
    names
}

/// Load tokenizer vocabulary from tokenizer.json.
fn load_tokenizer(path: &Path) -> Result<HashMap<char, i64>> {
    let contents = fs::read_to_string(path)?;
    parse_vocab(&contents)
}

fn parse_vocab(contents: &str) -> Result<HashMap<char, i64>> {
    let data: serde_json::Value = serde_json::from_str(contents)
        .map_err(|e| SpeakerError::Synthesis(format!("Failed to parse tokenizer JSON: {e}")))?;

    let vocab = data["model"]["vocab"]
        .as_object()
        .ok_or_else(|| SpeakerError::Synthesis("Missing model.vocab in tokenizer.json".into()))?;

    let mut map = HashMap::new();
    for (token, id) in vocab {
        let id = id
            .as_i64()
            .ok_or_else(|| SpeakerError::Synthesis(format!("Token ID for {token:?} is not an integer")))?;
        // Each token should be a single character
        if let Some(ch) = token.chars().next() {
            map.insert(ch, id);
        }
    }

    Ok(map)
}

/// Load all voice styles from an NPZ file.
fn load_voices(path: &Path) -> Result<HashMap<String, VoiceData>> {
    let file = fs::File::open(path)?;
    let mut npz = NpzReader::new(file).map_err(|e| model_error("read NPZ voices file", e))?;

    let names: Vec<String> = npz
        .names()
        .map_err(|e| model_error("list NPZ entries", e))?
        .into_iter()
        .map(|n| n.trim_end_matches(".npy").to_string())
        .collect();

    let mut voices = HashMap::new();
    for name in names {
        let arr: Array3<f32> = npz
            .by_name(&format!("{name}.npy"))
            .map_err(|e| model_error(&format!("read voice '{name}'"), e))?;

        // Shape is (510, 1, 256). Squeeze the middle dimension to (510, 256).
        let dim0 = arr.shape()[0];
        let dim2 = arr.shape()[2];
        if dim0 == 0 {
            warn!("Skipping voice '{name}': no style vectors");
            continue;
        }
        let styles = arr
            .into_shape_with_order((dim0, dim2))
            .map_err(|e| model_error(&format!("reshape voice '{name}'"), e))?;

        voices.insert(name, VoiceData { styles });
    }

    Ok(voices)
}

/// Split text into sentences at .!? boundaries.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();

    for (i, &b) in bytes.iter().enumerate() {
        if (b == b'.' || b == b'!' || b == b'?')
            && i + 1 < bytes.len()
            && bytes[i + 1].is_ascii_whitespace()
        {
            let end = i + 1;
            let s = text[start..end].trim();
            if !s.is_empty() {
                sentences.push(s);
            }
            start = end;
        }
    }

    let s = text[start..].trim();
    if !s.is_empty() {
        sentences.push(s);
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_terminal_punctuation() {
        let s = split_sentences("Done. Tests pass! Ready? yes");
        assert_eq!(s, vec!["Done.", "Tests pass!", "Ready?", "yes"]);
    }

    #[test]
    fn keeps_decimals_together() {
        assert_eq!(split_sentences("Version 2.5 shipped."), vec!["Version 2.5 shipped."]);
    }

    #[test]
    fn empty_text_has_no_sentences() {
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn parses_single_char_vocab() {
        let vocab = parse_vocab(r#"{"model": {"vocab": {"a": 43, "ə": 83}}}"#).unwrap();
        assert_eq!(vocab.get(&'a'), Some(&43));
        assert_eq!(vocab.get(&'ə'), Some(&83));
    }

    #[test]
    fn rejects_tokenizer_without_vocab() {
        assert!(parse_vocab(r#"{"model": {}}"#).is_err());
    }

    #[test]
    fn style_index_clamps_to_available_rows() {
        assert_eq!(style_index(2, 510), 0);
        assert_eq!(style_index(12, 510), 10);
        assert_eq!(style_index(600, 510), 509);
        assert_eq!(style_index(12, 0), 0);
    }

    #[test]
    fn resolve_prefers_configured_path() {
        let base = Path::new("/models");
        assert_eq!(resolve("", base, "a.onnx"), PathBuf::from("/models/a.onnx"));
        assert_eq!(resolve("/x/b.onnx", base, "a.onnx"), PathBuf::from("/x/b.onnx"));
    }
}
