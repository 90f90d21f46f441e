//! code-speaker-rs: spoken notifications for Claude Code.
//!
//! Hook events arrive over HTTP and flow through a three-stage pipeline:
//! - `summarizer`: condense agent output with Ollama or Groq
//! - `tts`: Kokoro ONNX speech synthesis
//! - `player`: rodio playback, interrupting stale speech with a chime
//!
//! The queues, workers and playback scheduler live in [`pipeline`];
//! [`api`] exposes them to the `tts-hook` client.

pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod player;
pub mod sounds;
pub mod summarizer;
pub mod transcript;
pub mod tts;

pub use error::{Result, SpeakerError};
pub use pipeline::AudioPipeline;
