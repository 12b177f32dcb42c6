//! Audio alert channel.
//!
//! This module provides the beep sequence played when a meeting is about
//! to start:
//!
//! - System sound discovery with a synthesized tone fallback
//! - Blocking playback on the caller's (worker) thread
//! - A mock cue for tests
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │     AudioCue     │ ← Called from the audio worker thread
//! └────────┬─────────┘
//!          │ creates per sequence
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ RodioSoundPlayer │────▶│  System Sounds   │
//! │                  │     ├──────────────────┤
//! │                  │────▶│   Sine tone      │
//! └──────────────────┘     │  (fallback)      │
//!                          └──────────────────┘
//! ```

mod error;
mod player;
mod source;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

pub use error::SoundError;
pub use player::RodioSoundPlayer;
pub use source::{default_beep, discover_system_sounds, find_system_sound, SoundSource};

/// Plays a sequence of beeps.
///
/// Implementations block the calling thread until the sequence ends, so the
/// caller must be a dedicated worker thread.
pub trait AudioCue: Send + Sync {
    /// Plays `count` beeps with `spacing` between consecutive beeps.
    ///
    /// # Errors
    ///
    /// Returns an error if the audio device cannot be used at all.
    /// Individual beep failures are logged and skipped.
    fn play_sequence(&self, count: u32, spacing: Duration) -> Result<(), SoundError>;
}

/// `AudioCue` backed by rodio.
///
/// The output device is opened per sequence on the calling thread.
#[derive(Debug)]
pub struct RodioAudioCue {
    source: SoundSource,
}

impl RodioAudioCue {
    /// Creates a cue that plays the given source.
    #[must_use]
    pub fn new(source: SoundSource) -> Self {
        Self { source }
    }

    /// Creates a cue using the best available system beep.
    #[must_use]
    pub fn with_default_beep() -> Self {
        Self::new(default_beep())
    }

    /// Returns the configured source.
    #[must_use]
    pub fn source(&self) -> &SoundSource {
        &self.source
    }
}

impl AudioCue for RodioAudioCue {
    fn play_sequence(&self, count: u32, spacing: Duration) -> Result<(), SoundError> {
        if count == 0 {
            debug!("Beep sequence skipped");
            return Ok(());
        }

        let player = RodioSoundPlayer::new()?;
        for i in 0..count {
            match player.play_blocking(&self.source) {
                Ok(()) => {}
                Err(e) if e.is_device_error() => return Err(e),
                Err(e) => warn!("Beep {} of {} failed: {}", i + 1, count, e),
            }
            if i + 1 < count {
                std::thread::sleep(spacing);
            }
        }
        Ok(())
    }
}

/// Mock audio cue for testing.
#[derive(Debug, Default)]
pub struct MockAudioCue {
    sequences: Mutex<Vec<(u32, Instant)>>,
    should_fail: AtomicBool,
    should_panic: AtomicBool,
}

impl MockAudioCue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::SeqCst);
    }

    pub fn set_should_panic(&self, should_panic: bool) {
        self.should_panic.store(should_panic, Ordering::SeqCst);
    }

    /// Number of sequences played.
    #[must_use]
    pub fn sequence_count(&self) -> usize {
        self.sequences.lock().unwrap().len()
    }

    /// Beep counts of every sequence played, in order.
    #[must_use]
    pub fn beep_counts(&self) -> Vec<u32> {
        self.sequences
            .lock()
            .unwrap()
            .iter()
            .map(|(count, _)| *count)
            .collect()
    }

    /// Start instants of every sequence played, in order.
    #[must_use]
    pub fn started_at(&self) -> Vec<Instant> {
        self.sequences
            .lock()
            .unwrap()
            .iter()
            .map(|(_, at)| *at)
            .collect()
    }
}

impl AudioCue for MockAudioCue {
    fn play_sequence(&self, count: u32, _spacing: Duration) -> Result<(), SoundError> {
        if self.should_panic.load(Ordering::SeqCst) {
            panic!("mock audio panic");
        }
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(SoundError::DeviceNotAvailable("Mock failure".to_string()));
        }
        self.sequences.lock().unwrap().push((count, Instant::now()));
        Ok(())
    }
}
