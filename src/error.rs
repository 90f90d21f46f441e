//! Error types for the speaker service.

/// Errors raised by collaborators (summarizer, synthesizer, audio output)
/// and by configuration loading.
///
/// Stage workers never propagate these: a failed item is logged and dropped.
#[derive(Debug, thiserror::Error)]
pub enum SpeakerError {
    /// Summarization back end failed or returned nothing usable.
    #[error("Summarization failed: {0}")]
    Summarize(String),

    /// Speech synthesis failed.
    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    /// Speech synthesis succeeded but produced no samples.
    #[error("Synthesis produced no audio")]
    EmptyAudio,

    /// Audio output device or playback failure.
    #[error("Audio output error: {0}")]
    Audio(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// HTTP transport error talking to a remote back end.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// WAV encode/decode failure.
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// IO error (audio files, model files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SpeakerError>;
