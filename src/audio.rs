//! Audio clips: synthesized speech stored as temporary WAV files.
//!
//! An [`AudioClip`] owns its file. Dropping the clip deletes the file, so a
//! clip that moves from the ready queue to the player and is finally dropped
//! is released exactly once, whichever path it took.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{trace, warn};

use crate::error::Result;

/// A mono WAV file on disk, deleted when dropped.
#[derive(Debug)]
pub struct AudioClip {
    path: PathBuf,
    sample_rate: u32,
    duration: Duration,
    // Decoded samples for clips played over and over (cues).
    cached: Option<Arc<[f32]>>,
}

impl AudioClip {
    /// Write `samples` (f32 in [-1, 1]) as a 16-bit mono WAV in `dir`.
    pub fn write(samples: &[f32], sample_rate: u32, dir: &Path) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix("code-speaker-")
            .suffix(".wav")
            .tempfile_in(dir)?;
        let (_, path) = file.keep().map_err(|e| e.error)?;

        // From here on the clip owns the file; an early return removes it.
        let clip = Self {
            path,
            sample_rate,
            duration: Duration::from_secs_f64(samples.len() as f64 / f64::from(sample_rate)),
            cached: None,
        };

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&clip.path, spec)?;
        for &sample in samples {
            // f32 [-1, 1] → i16
            let s = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(s)?;
        }
        writer.finalize()?;

        trace!(path = %clip.path.display(), "Audio clip written");
        Ok(clip)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Decode the file once and serve later reads from memory.
    pub fn cached(mut self) -> Result<Self> {
        self.cached = Some(self.read_samples()?.into());
        Ok(self)
    }

    /// Decode the file back into f32 samples.
    pub fn read_samples(&self) -> Result<Vec<f32>> {
        if let Some(cached) = &self.cached {
            return Ok(cached.to_vec());
        }
        let mut reader = hound::WavReader::open(&self.path)?;
        let samples = reader
            .samples::<i16>()
            .map(|s| s.map(|v| f32::from(v) / 32768.0))
            .collect::<std::result::Result<Vec<f32>, _>>()?;
        Ok(samples)
    }
}

impl Drop for AudioClip {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => trace!(path = %self.path.display(), "Audio clip released"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove audio file {}: {e}", self.path.display()),
        }
    }
}
