//! Backend channel positions and their mapping onto the WAV speaker layout.
//!
//! The backend describes each output with an ordered list of channel
//! positions (physical sample order). WAV files instead carry channels in a
//! fixed speaker order announced by a channel mask. [`remap`] computes which
//! source channels survive, where they sit in a source frame, and the mask.

use std::fmt;

use crate::error::FormatError;

/// WAV speaker position bits (`dwChannelMask`).
#[allow(missing_docs)]
pub mod speaker {
    pub const FRONT_LEFT: u32 = 0x1;
    pub const FRONT_RIGHT: u32 = 0x2;
    pub const FRONT_CENTER: u32 = 0x4;
    pub const LOW_FREQUENCY: u32 = 0x8;
    pub const BACK_LEFT: u32 = 0x10;
    pub const BACK_RIGHT: u32 = 0x20;
    pub const FRONT_LEFT_OF_CENTER: u32 = 0x40;
    pub const FRONT_RIGHT_OF_CENTER: u32 = 0x80;
    pub const BACK_CENTER: u32 = 0x100;
    pub const SIDE_LEFT: u32 = 0x200;
    pub const SIDE_RIGHT: u32 = 0x400;
    pub const TOP_CENTER: u32 = 0x800;
    pub const TOP_FRONT_LEFT: u32 = 0x1000;
    pub const TOP_FRONT_CENTER: u32 = 0x2000;
    pub const TOP_FRONT_RIGHT: u32 = 0x4000;
    pub const TOP_BACK_LEFT: u32 = 0x8000;
    pub const TOP_BACK_CENTER: u32 = 0x10000;
    pub const TOP_BACK_RIGHT: u32 = 0x20000;
}

/// A channel position as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ChannelPosition {
    L,
    R,
    C,
    Ls,
    Rs,
    Lfe,
    Cs,
    Lb,
    Rb,
    Ts,
    Cvh,
    Ms,
    Flc,
    Frc,
    Rlc,
    Rrc,
    Lfe2,
    Sl,
    Sr,
    Tfl,
    Tfr,
    Tc,
    Tbl,
    Tbr,
    Tsl,
    Tsr,
    Tbc,
    Bfc,
    Bfl,
    Bfr,
    Lw,
    Rw,
    Lsd,
    Rsd,
    Tfc,
}

impl ChannelPosition {
    const ALL: [ChannelPosition; 35] = [
        Self::L,
        Self::R,
        Self::C,
        Self::Ls,
        Self::Rs,
        Self::Lfe,
        Self::Cs,
        Self::Lb,
        Self::Rb,
        Self::Ts,
        Self::Cvh,
        Self::Ms,
        Self::Flc,
        Self::Frc,
        Self::Rlc,
        Self::Rrc,
        Self::Lfe2,
        Self::Sl,
        Self::Sr,
        Self::Tfl,
        Self::Tfr,
        Self::Tc,
        Self::Tbl,
        Self::Tbr,
        Self::Tsl,
        Self::Tsr,
        Self::Tbc,
        Self::Bfc,
        Self::Bfl,
        Self::Bfr,
        Self::Lw,
        Self::Rw,
        Self::Lsd,
        Self::Rsd,
        Self::Tfc,
    ];

    /// Decodes a backend channel code (1-based, `L = 1` … `TFC = 35`).
    pub fn from_code(code: u8) -> Option<Self> {
        let index = usize::from(code).checked_sub(1)?;
        Self::ALL.get(index).copied()
    }

    /// Returns the backend channel code.
    pub fn code(&self) -> u8 {
        *self as u8 + 1
    }

    /// Short label used in logs ("L", "LFE", "TFL", ...).
    pub fn label(&self) -> &'static str {
        match self {
            Self::L => "L",
            Self::R => "R",
            Self::C => "C",
            Self::Ls => "LS",
            Self::Rs => "RS",
            Self::Lfe => "LFE",
            Self::Cs => "CS",
            Self::Lb => "LB",
            Self::Rb => "RB",
            Self::Ts => "TS",
            Self::Cvh => "CVH",
            Self::Ms => "MS",
            Self::Flc => "FLC",
            Self::Frc => "FRC",
            Self::Rlc => "RLC",
            Self::Rrc => "RRC",
            Self::Lfe2 => "LFE2",
            Self::Sl => "SL",
            Self::Sr => "SR",
            Self::Tfl => "TFL",
            Self::Tfr => "TFR",
            Self::Tc => "TC",
            Self::Tbl => "TBL",
            Self::Tbr => "TBR",
            Self::Tsl => "TSL",
            Self::Tsr => "TSR",
            Self::Tbc => "TBC",
            Self::Bfc => "BFC",
            Self::Bfl => "BFL",
            Self::Bfr => "BFR",
            Self::Lw => "LW",
            Self::Rw => "RW",
            Self::Lsd => "LSD",
            Self::Rsd => "RSD",
            Self::Tfc => "TFC",
        }
    }
}

impl fmt::Display for ChannelPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Widest sample the container accepts, in bits.
pub const MAX_BIT_WIDTH: u16 = 32;

/// WAV channel order. Entries are listed in the order channels appear in a
/// WAV frame; rear and back surrounds share the same speaker bit.
pub const WAV_CHANNEL_ORDER: [(u32, ChannelPosition); 20] = [
    (speaker::FRONT_LEFT, ChannelPosition::L),
    (speaker::FRONT_RIGHT, ChannelPosition::R),
    (speaker::FRONT_CENTER, ChannelPosition::C),
    (speaker::LOW_FREQUENCY, ChannelPosition::Lfe),
    (speaker::BACK_LEFT, ChannelPosition::Ls),
    (speaker::BACK_RIGHT, ChannelPosition::Rs),
    (speaker::BACK_LEFT, ChannelPosition::Lb),
    (speaker::BACK_RIGHT, ChannelPosition::Rb),
    (speaker::FRONT_LEFT_OF_CENTER, ChannelPosition::Flc),
    (speaker::FRONT_RIGHT_OF_CENTER, ChannelPosition::Frc),
    (speaker::BACK_CENTER, ChannelPosition::Cs),
    (speaker::SIDE_LEFT, ChannelPosition::Sl),
    (speaker::SIDE_RIGHT, ChannelPosition::Sr),
    (speaker::TOP_CENTER, ChannelPosition::Tc),
    (speaker::TOP_FRONT_LEFT, ChannelPosition::Tfl),
    (speaker::TOP_FRONT_CENTER, ChannelPosition::Tfc),
    (speaker::TOP_FRONT_RIGHT, ChannelPosition::Tfr),
    (speaker::TOP_BACK_LEFT, ChannelPosition::Tbl),
    (speaker::TOP_BACK_CENTER, ChannelPosition::Tbc),
    (speaker::TOP_BACK_RIGHT, ChannelPosition::Tbr),
];

/// Result of mapping a backend channel list onto the WAV layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLayout {
    /// Mapped positions in WAV order.
    positions: Vec<ChannelPosition>,
    /// Source channel index for each mapped position.
    sources: Vec<usize>,
    /// Byte offset inside an interleaved source frame for each mapped position.
    offsets: Vec<usize>,
    mask: u32,
    sample_size: usize,
    source_channels: usize,
}

impl ChannelLayout {
    /// Mapped positions, in WAV order.
    pub fn positions(&self) -> &[ChannelPosition] {
        &self.positions
    }

    /// Source channel index of each mapped position.
    pub fn sources(&self) -> &[usize] {
        &self.sources
    }

    /// Byte offset within an interleaved source frame of each mapped position.
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// WAV channel mask of the mapped positions.
    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Number of channels written to the container.
    pub fn channels(&self) -> usize {
        self.positions.len()
    }

    /// Number of channels in the backend's frames.
    pub fn source_channels(&self) -> usize {
        self.source_channels
    }

    /// Source channels without a WAV position.
    pub fn dropped(&self) -> usize {
        self.source_channels.saturating_sub(self.positions.len())
    }

    /// Bytes per sample.
    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Bytes per output frame (WAV block alignment).
    pub fn stride(&self) -> usize {
        self.channels() * self.sample_size
    }

    /// Bytes per frame as delivered by the backend.
    pub fn source_stride(&self) -> usize {
        self.source_channels * self.sample_size
    }
}

/// Maps a backend channel list onto [`WAV_CHANNEL_ORDER`].
///
/// Output order is driven by the WAV table, never by the source order, so
/// the same list always yields the same layout. Unknown positions are
/// dropped and reported through [`ChannelLayout::dropped`].
///
/// # Errors
///
/// Returns [`FormatError::UnsupportedBitWidth`] unless `bit_width` is a
/// non-zero multiple of 8 no wider than [`MAX_BIT_WIDTH`].
///
/// # Example
///
/// ```
/// use stream_decode::format::{remap, ChannelPosition};
///
/// let layout = remap(&[ChannelPosition::R, ChannelPosition::L, ChannelPosition::C], 16).unwrap();
/// assert_eq!(layout.offsets(), &[2, 0, 4]);
/// assert_eq!(layout.mask(), 0x7);
/// ```
pub fn remap(channel_map: &[ChannelPosition], bit_width: u16) -> Result<ChannelLayout, FormatError> {
    if bit_width == 0 || bit_width % 8 != 0 || bit_width > MAX_BIT_WIDTH {
        return Err(FormatError::UnsupportedBitWidth { bits: bit_width });
    }
    let sample_size = usize::from(bit_width / 8);

    let mut positions = Vec::new();
    let mut sources = Vec::new();
    let mut offsets = Vec::new();
    let mut mask = 0;

    for &(speaker_bit, position) in &WAV_CHANNEL_ORDER {
        for (index, _) in channel_map
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p == position)
        {
            positions.push(position);
            sources.push(index);
            offsets.push(index * sample_size);
            mask |= speaker_bit;
        }
    }

    Ok(ChannelLayout {
        positions,
        sources,
        offsets,
        mask,
        sample_size,
        source_channels: channel_map.len(),
    })
}

/// Formats a channel list as `L,R,C` for logs.
pub fn format_channel_map(channel_map: &[ChannelPosition]) -> String {
    channel_map
        .iter()
        .map(ChannelPosition::label)
        .collect::<Vec<_>>()
        .join(",")
}
