//! Alert sound selection.
//!
//! The beep is either a sound file shipped with the OS or a synthesized
//! sine tone when no usable file exists.

use std::path::PathBuf;

use super::error::SoundError;

/// Represents the source of the alert beep.
#[derive(Debug, Clone, PartialEq)]
pub enum SoundSource {
    /// A sound file installed with the operating system.
    System {
        /// The name of the sound (e.g., "Ping").
        name: String,
        /// The full path to the sound file.
        path: PathBuf,
    },
    /// A synthesized sine tone.
    Tone {
        /// Frequency in hertz.
        frequency_hz: f32,
        /// Length of one beep in milliseconds.
        duration_ms: u64,
    },
}

impl SoundSource {
    /// Creates a new system sound source.
    #[must_use]
    pub fn system(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::System {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Creates a new tone source.
    #[must_use]
    pub fn tone(frequency_hz: f32, duration_ms: u64) -> Self {
        Self::Tone {
            frequency_hz,
            duration_ms,
        }
    }

    /// The built-in beep used when no system sound is found.
    #[must_use]
    pub fn default_tone() -> Self {
        Self::tone(DEFAULT_TONE_HZ, DEFAULT_TONE_MS)
    }

    /// Returns a display name for logging.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::System { name, .. } => name,
            Self::Tone { .. } => "tone",
        }
    }

    /// Returns true if this is a system sound.
    #[must_use]
    pub fn is_system(&self) -> bool {
        matches!(self, Self::System { .. })
    }

    /// Returns true if this is a synthesized tone.
    #[must_use]
    pub fn is_tone(&self) -> bool {
        matches!(self, Self::Tone { .. })
    }
}

const DEFAULT_TONE_HZ: f32 = 880.0;
const DEFAULT_TONE_MS: u64 = 180;

/// Directories to search for system sounds, in order of priority.
const SYSTEM_SOUND_DIRS: &[&str] = &[
    "/System/Library/Sounds",
    "/Library/Sounds",
    "/usr/share/sounds/freedesktop/stereo",
];

/// Supported audio file extensions.
const SUPPORTED_EXTENSIONS: &[&str] = &["aiff", "wav", "oga", "ogg", "mp3", "flac"];

/// Short, sharp sounds that work as a repeated beep.
const PREFERRED_BEEP_NAMES: &[&str] = &["Ping", "Tink", "Glass", "bell", "message"];

/// Discovers available system sounds, sorted by name.
#[must_use]
pub fn discover_system_sounds() -> Vec<SoundSource> {
    let mut sounds: Vec<SoundSource> = SYSTEM_SOUND_DIRS
        .iter()
        .filter_map(|dir| std::fs::read_dir(dir).ok())
        .flat_map(|entries| entries.flatten())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
                .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        })
        .filter_map(|path| {
            let name = path.file_stem()?.to_string_lossy().into_owned();
            Some(SoundSource::System { name, path })
        })
        .collect();

    sounds.sort_by(|a, b| a.name().cmp(b.name()));
    sounds
}

/// Picks the beep for meeting alerts.
///
/// Prefers a short system sound, then any system sound, then the built-in
/// tone.
#[must_use]
pub fn default_beep() -> SoundSource {
    let system_sounds = discover_system_sounds();

    for preferred in PREFERRED_BEEP_NAMES {
        if let Some(sound) = system_sounds.iter().find(|s| s.name() == *preferred) {
            return sound.clone();
        }
    }

    system_sounds
        .into_iter()
        .next()
        .unwrap_or_else(SoundSource::default_tone)
}

/// Finds a system sound by name (case-insensitive).
///
/// # Errors
///
/// Returns `SoundError::FileNotFound` if no sound with the given name exists.
pub fn find_system_sound(name: &str) -> Result<SoundSource, SoundError> {
    discover_system_sounds()
        .into_iter()
        .find(|s| s.name().eq_ignore_ascii_case(name))
        .ok_or_else(|| SoundError::FileNotFound(format!("System sound '{}' not found", name)))
}
