//! Sound cues: a chime before an interruption and a soft pluck when a
//! queued notification is dropped.

use std::f32::consts::TAU;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::audio::AudioClip;
use crate::error::Result;

/// Two-note chime (G5 → C6) played before interrupting speech.
pub fn generate_chime(sample_rate: u32) -> Vec<f32> {
    let rate = sample_rate as f32;
    let make_note = |freq: f32, duration: f32, amplitude: f32| -> Vec<f32> {
        let n = (rate * duration).round() as usize;
        let attack = (n as f32 * 0.05) as usize;
        (0..n)
            .map(|i| {
                let t = i as f32 / rate;
                // Fundamental + harmonics
                let mut s = amplitude * (TAU * freq * t).sin();
                s += amplitude * 0.3 * (TAU * freq * 2.0 * t).sin();
                s += amplitude * 0.1 * (TAU * freq * 3.0 * t).sin();
                let mut envelope = (-t * 8.0).exp();
                if i < attack {
                    envelope *= i as f32 / attack as f32;
                }
                s * envelope
            })
            .collect()
    };

    let mut chime = make_note(784.0, 0.08, 0.25);
    chime.extend(std::iter::repeat(0.0).take((rate * 0.03).round() as usize));
    chime.extend(make_note(1047.0, 0.08, 0.25));

    fade_out(&mut chime, (rate * 0.02).round() as usize);
    chime
}

/// Kalimba-like pluck (E5) played when a notification is dropped.
pub fn generate_drop_tone(sample_rate: u32) -> Vec<f32> {
    let rate = sample_rate as f32;
    let freq = 659.0;
    let n = (rate * 0.15).round() as usize;
    let attack = (rate * 0.005).round() as usize;

    let mut pluck: Vec<f32> = (0..n)
        .map(|i| {
            let t = i as f32 / rate;
            // Fundamental with decaying harmonics
            let mut tone = (TAU * freq * t).sin();
            tone += 0.5 * (TAU * freq * 2.0 * t).sin() * (-t * 20.0).exp();
            tone += 0.25 * (TAU * freq * 3.0 * t).sin() * (-t * 30.0).exp();
            tone += 0.1 * (TAU * freq * 4.0 * t).sin() * (-t * 40.0).exp();
            let envelope = if i < attack {
                i as f32 / attack as f32
            } else {
                (-t * 10.0).exp()
            };
            tone * envelope * 0.18
        })
        .collect();

    fade_out(&mut pluck, (rate * 0.03).round() as usize);
    pluck
}

fn fade_out(samples: &mut [f32], len: usize) {
    let len = len.min(samples.len());
    if len == 0 {
        return;
    }
    let start = samples.len() - len;
    for (i, s) in samples[start..].iter_mut().enumerate() {
        *s *= 1.0 - i as f32 / len as f32;
    }
}

/// Cue clips written to disk for the lifetime of a running pipeline.
#[derive(Debug)]
pub struct SoundEffects {
    pub interrupt: AudioClip,
    pub drop: AudioClip,
}

impl SoundEffects {
    pub fn generate(sample_rate: u32, dir: &Path) -> Result<Self> {
        let effects = Self {
            interrupt: AudioClip::write(&generate_chime(sample_rate), sample_rate, dir)?.cached()?,
            drop: AudioClip::write(&generate_drop_tone(sample_rate), sample_rate, dir)?.cached()?,
        };
        debug!("Sound effects generated");
        Ok(effects)
    }
}

/// Shared slot holding the current [`SoundEffects`], if any.
///
/// Emptying the slot releases the cue files once the last in-flight user
/// (a cue being played) lets go of them.
#[derive(Clone, Default)]
pub struct CueBank {
    slot: Arc<Mutex<Option<Arc<SoundEffects>>>>,
}

impl CueBank {
    pub fn install(&self, effects: SoundEffects) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(effects));
    }

    pub fn get(&self) -> Option<Arc<SoundEffects>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Empty the slot, returning whether cues were installed.
    pub fn release(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }
}
