//! Beep playback using rodio.
//!
//! `OutputStream` is not `Send`, so a `RodioSoundPlayer` lives and dies on
//! the audio worker thread that created it.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use tracing::{debug, warn};

use super::error::SoundError;
use super::source::SoundSource;

/// Volume applied to synthesized tones.
const TONE_AMPLITUDE: f32 = 0.25;

/// A blocking player for one beep at a time.
pub struct RodioSoundPlayer {
    /// The audio output stream (must be kept alive for playback).
    _stream: OutputStream,
    /// Handle to the output stream for creating sinks.
    stream_handle: OutputStreamHandle,
}

impl RodioSoundPlayer {
    /// Opens the default output device.
    ///
    /// # Errors
    ///
    /// Returns `SoundError::DeviceNotAvailable` if no audio output device
    /// is available.
    pub fn new() -> Result<Self, SoundError> {
        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| SoundError::DeviceNotAvailable(e.to_string()))?;

        debug!("Audio output stream initialized");

        Ok(Self {
            _stream: stream,
            stream_handle,
        })
    }

    /// Plays one beep and returns when it has finished.
    ///
    /// A system sound that cannot be opened or decoded falls back to the
    /// built-in tone.
    ///
    /// # Errors
    ///
    /// Returns an error if no sink can be created or the fallback tone
    /// also fails.
    pub fn play_blocking(&self, source: &SoundSource) -> Result<(), SoundError> {
        match source {
            SoundSource::System { name, path } => match self.play_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.should_fallback_to_tone() => {
                    warn!("Failed to play system sound '{}': {}, falling back to tone", name, e);
                    self.play_blocking(&SoundSource::default_tone())
                }
                Err(e) => Err(e),
            },
            SoundSource::Tone {
                frequency_hz,
                duration_ms,
            } => self.play_tone(*frequency_hz, *duration_ms),
        }
    }

    fn play_file(&self, path: &Path) -> Result<(), SoundError> {
        let file = File::open(path)
            .map_err(|e| SoundError::FileNotFound(format!("{}: {}", path.display(), e)))?;
        let decoder =
            Decoder::new(BufReader::new(file)).map_err(|e| SoundError::DecodeError(e.to_string()))?;

        let sink = self.new_sink()?;
        sink.append(decoder);
        sink.sleep_until_end();
        Ok(())
    }

    fn play_tone(&self, frequency_hz: f32, duration_ms: u64) -> Result<(), SoundError> {
        let sink = self.new_sink()?;
        sink.append(
            rodio::source::SineWave::new(frequency_hz)
                .take_duration(Duration::from_millis(duration_ms))
                .amplify(TONE_AMPLITUDE),
        );
        sink.sleep_until_end();
        Ok(())
    }

    fn new_sink(&self) -> Result<Sink, SoundError> {
        Sink::try_new(&self.stream_handle).map_err(|e| SoundError::StreamError(e.to_string()))
    }
}

impl std::fmt::Debug for RodioSoundPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RodioSoundPlayer").finish_non_exhaustive()
    }
}
