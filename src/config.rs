//! Configuration types for decode sessions.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

/// Maximum number of logical outputs a session can request from the backend.
pub const MAX_OUTPUTS: usize = 3;

/// Upper bound for the channel count of a single logical output.
pub const MAX_OUTPUT_CHANNELS: u8 = 8;

/// Library path of the Dolby MS12 wrapper (AC3, E-AC3, AAC).
pub const DOLBY_MS12_LIBRARY: &str = "/usr/lib64/libdolby_ms12_wrapper.so";

/// Library name of the DTS M8 wrapper.
pub const DTS_M8_LIBRARY: &str = "libdts_m8_wrapper.so";

/// Library name served by the built-in [`LoopbackLoader`](crate::backend::LoopbackLoader).
pub const LOOPBACK_LIBRARY: &str = "libstream_decode_loopback.so";

/// Identifier of a logical output produced by the backend.
///
/// Output ids are small integers starting at [`OutputId::PRIMARY`]; the
/// n-th configured output is `PRIMARY + n`.
///
/// # Example
///
/// ```
/// use stream_decode::OutputId;
///
/// assert_eq!(OutputId::nth(0), OutputId::PRIMARY);
/// assert_eq!(OutputId::nth(2).to_string(), "0x102");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(pub u32);

impl OutputId {
    /// The primary output, the one muxed to the container sink by default.
    pub const PRIMARY: OutputId = OutputId(0x100);

    /// Returns the id of the `index`-th configured output.
    pub const fn nth(index: usize) -> Self {
        Self(Self::PRIMARY.0 + index as u32)
    }

    /// Returns `true` for the primary output.
    pub fn is_primary(&self) -> bool {
        *self == Self::PRIMARY
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u32> for OutputId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Compressed formats the session knows how to hand to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionFormat {
    /// Dolby Digital.
    Ac3,
    /// Dolby Digital Plus.
    Eac3,
    /// AAC in ADTS framing (also used for LATM sources).
    AacAdts,
    /// DTS core.
    Dts,
    /// Raw interleaved PCM, handled by the loopback backend.
    Pcm,
}

impl CompressionFormat {
    /// Returns the backend library that decodes this format.
    #[must_use]
    pub fn library_name(&self) -> &'static str {
        match self {
            Self::Ac3 | Self::Eac3 | Self::AacAdts => DOLBY_MS12_LIBRARY,
            Self::Dts => DTS_M8_LIBRARY,
            Self::Pcm => LOOPBACK_LIBRARY,
        }
    }
}

impl fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ac3 => "AC3",
            Self::Eac3 => "EAC3",
            Self::AacAdts => "AAC_ADTS",
            Self::Dts => "DTS",
            Self::Pcm => "PCM",
        };
        f.write_str(name)
    }
}

/// Kind of backend session to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionKind {
    /// Broadcast decode + post-processing session.
    #[default]
    Broadcast,
    /// Plain decode session.
    Decode,
}

/// Requested logical output: its id and the most channels it may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputConfig {
    /// Output id announced to the backend.
    pub id: OutputId,
    /// Maximum channel count for this output.
    pub max_channels: u8,
}

impl OutputConfig {
    /// Creates an output request.
    pub fn new(id: OutputId, max_channels: u8) -> Self {
        Self { id, max_channels }
    }
}

/// Configuration for a decode session.
///
/// Use [`DecodeConfig::default()`] for a single 8-channel primary output.
///
/// # Example
///
/// ```
/// use stream_decode::DecodeConfig;
///
/// let config = DecodeConfig::with_channel_limits(&[6, 2]);
/// assert_eq!(config.outputs.len(), 2);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct DecodeConfig {
    /// Kind of backend session.
    pub session_kind: SessionKind,

    /// Logical outputs to configure on the backend session.
    ///
    /// Default: one primary output with 8 channels.
    pub outputs: Vec<OutputConfig>,

    /// Free-form backend key/value string, passed through untouched.
    pub kv_pairs: Option<String>,

    /// Overrides the library picked from the compression format.
    pub library: Option<String>,

    /// Bound on the final end-of-stream wait.
    ///
    /// Default: `None` (wait until the backend confirms the drain or the
    /// session is cancelled).
    pub drain_timeout: Option<Duration>,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            session_kind: SessionKind::default(),
            outputs: vec![OutputConfig::new(OutputId::PRIMARY, MAX_OUTPUT_CHANNELS)],
            kv_pairs: None,
            library: None,
            drain_timeout: None,
        }
    }
}

impl DecodeConfig {
    /// Builds a config with one output per entry of `limits`, numbered from
    /// the primary id. An empty slice yields the default single output.
    pub fn with_channel_limits(limits: &[u8]) -> Self {
        if limits.is_empty() {
            return Self::default();
        }
        Self {
            outputs: limits
                .iter()
                .enumerate()
                .map(|(i, &channels)| OutputConfig::new(OutputId::nth(i), channels))
                .collect(),
            ..Self::default()
        }
    }

    /// Returns the library to load for `format`, honoring the override.
    pub fn library_for(&self, format: CompressionFormat) -> &str {
        self.library
            .as_deref()
            .unwrap_or_else(|| format.library_name())
    }

    /// Checks output limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outputs.is_empty() {
            return Err(ConfigError::NoOutputs);
        }
        if self.outputs.len() > MAX_OUTPUTS {
            return Err(ConfigError::TooManyOutputs {
                count: self.outputs.len(),
                max: MAX_OUTPUTS,
            });
        }

        let mut seen = HashSet::new();
        for output in &self.outputs {
            if output.max_channels == 0 || output.max_channels > MAX_OUTPUT_CHANNELS {
                return Err(ConfigError::InvalidChannelCount {
                    output: output.id,
                    channels: output.max_channels,
                });
            }
            if !seen.insert(output.id) {
                return Err(ConfigError::DuplicateOutput { output: output.id });
            }
        }

        Ok(())
    }

    /// Returns `true` if `id` is one of the configured outputs.
    pub fn has_output(&self, id: OutputId) -> bool {
        self.outputs.iter().any(|o| o.id == id)
    }
}
