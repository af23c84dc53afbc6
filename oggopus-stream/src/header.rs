// OggOpus Stream
// Copyright (c) 2026 The OggOpus Stream Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! RFC 7845 identification ("OpusHead") and comment ("OpusTags") header parsing.
//!
//! Both entry points are pure functions over a byte slice. Identification
//! header layout (RFC 7845 section 5.1):
//!
//! ```text
//! "OpusHead"(8) | version(1) | channel_count(1) | pre_skip(2, LE)
//! | input_sample_rate(4, LE) | output_gain(2, LE, signed) | mapping_family(1)
//! [ | stream_count(1) | coupled_count(1) | mapping_table(channel_count) ]
//! ```
//!
//! The trailing mapping block is present exactly when `mapping_family != 0`.

use thiserror::Error;

/// Magic signature of the identification header.
const OPUS_HEAD_MAGIC: &[u8; 8] = b"OpusHead";

/// Magic signature of the comment header.
const OPUS_TAGS_MAGIC: &[u8; 8] = b"OpusTags";

/// Minimum identification header size for mapping family 0.
const MIN_OPUS_HEAD_SIZE: usize = 19;

/// Minimum identification header size before the mapping table when the
/// mapping family is non-zero (adds stream and coupled counts).
const MIN_OPUS_HEAD_SIZE_WITH_MAPPING: usize = 21;

/// Minimum comment header size: magic(8) + vendor length(4) + comment count(4).
pub const MIN_OPUS_TAGS_SIZE: usize = 16;

/// Maximum comment header size accumulated across continuation pages
/// (RFC 7845 section 5.2, 120 MB). Bounds memory use on hostile streams.
pub const MAX_OPUS_TAGS_SIZE: usize = 125_829_120;

/// Mapping table entry marking a channel as permanently silent.
pub const SILENT_CHANNEL: u8 = 255;

/// Errors produced while parsing an identification header.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("invalid magic signature")]
    InvalidMagic,

    #[error("header truncated")]
    TooShort,

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    #[error("invalid channel count: {0}")]
    InvalidChannelCount(u8),

    #[error("invalid stream count: {0}")]
    InvalidStreamCount(u8),

    #[error("invalid coupled count: {0}")]
    InvalidCoupledCount(u8),

    #[error("invalid channel mapping table")]
    InvalidMapping,
}

/// Channel mapping table carried by non-zero mapping families.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMapping {
    /// Number of independent Opus streams in each audio packet.
    pub stream_count: u8,
    /// Number of those streams that are two-channel coupled.
    pub coupled_count: u8,
    /// One entry per output channel: a stream-channel index, or
    /// [`SILENT_CHANNEL`].
    pub table: Vec<u8>,
}

/// Parsed identification header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusHead {
    pub version: u8,
    pub channel_count: u8,
    /// Samples (at 48 kHz) to discard from the start of the decoded stream.
    pub pre_skip: u16,
    /// Sample rate of the original audio. Informational only; never used to
    /// reject a stream (RFC 7845 section 5.1).
    pub input_sample_rate: u32,
    /// Output gain in Q7.8 dB, applied by the decode backend.
    pub output_gain: i16,
    /// Channel mapping family: 0 mono/stereo, 1 Vorbis surround, >= 2 reserved.
    pub mapping_family: u8,
    /// Mapping block, present iff `mapping_family != 0`.
    pub mapping: Option<ChannelMapping>,
}

impl OpusHead {
    /// Number of independent Opus streams per packet. Family 0 always carries
    /// exactly one.
    pub fn stream_count(&self) -> u8 {
        match &self.mapping {
            Some(mapping) => mapping.stream_count,
            None => 1,
        }
    }

    /// Number of coupled streams per packet. Family 0 couples its single
    /// stream iff the file is stereo.
    pub fn coupled_count(&self) -> u8 {
        match &self.mapping {
            Some(mapping) => mapping.coupled_count,
            None => {
                if self.channel_count == 2 {
                    1
                }
                else {
                    0
                }
            }
        }
    }
}

/// Returns `true` if the packet begins with the "OpusHead" signature.
pub fn is_opus_head(packet: &[u8]) -> bool {
    packet.len() >= OPUS_HEAD_MAGIC.len() && packet[..8] == OPUS_HEAD_MAGIC[..]
}

/// Returns `true` if the packet begins with the "OpusTags" signature.
pub fn is_opus_tags(packet: &[u8]) -> bool {
    packet.len() >= OPUS_TAGS_MAGIC.len() && packet[..8] == OPUS_TAGS_MAGIC[..]
}

/// Returns `true` if the packet is a structurally plausible comment header:
/// correct signature and at least the fixed-size framing. Comment contents are
/// opaque at this layer.
pub fn is_valid_opus_tags(packet: &[u8]) -> bool {
    is_opus_tags(packet) && packet.len() >= MIN_OPUS_TAGS_SIZE
}

/// Parses and validates an identification header packet.
pub fn parse_opus_head(packet: &[u8]) -> Result<OpusHead, HeaderError> {
    if !is_opus_head(packet) {
        return Err(HeaderError::InvalidMagic);
    }

    if packet.len() < MIN_OPUS_HEAD_SIZE {
        return Err(HeaderError::TooShort);
    }

    let version = packet[8];

    // The encapsulation is not forward-compatible at this level.
    if version != 1 {
        return Err(HeaderError::UnsupportedVersion(version));
    }

    let channel_count = packet[9];

    if channel_count == 0 {
        return Err(HeaderError::InvalidChannelCount(channel_count));
    }

    let pre_skip = u16::from_le_bytes([packet[10], packet[11]]);
    let input_sample_rate = u32::from_le_bytes([packet[12], packet[13], packet[14], packet[15]]);
    let output_gain = i16::from_le_bytes([packet[16], packet[17]]);
    let mapping_family = packet[18];

    let mapping = if mapping_family != 0 {
        Some(parse_channel_mapping(packet, channel_count)?)
    }
    else {
        None
    };

    // Family-specific channel ceilings (RFC 7845 section 5.1.1). Reserved
    // families (>= 2) get no ceiling: RFC 7845 asks demuxers to treat them as
    // family 255 and stay permissive.
    match mapping_family {
        0 if channel_count > 2 => {
            return Err(HeaderError::InvalidChannelCount(channel_count));
        }
        1 if channel_count > 8 => {
            return Err(HeaderError::InvalidChannelCount(channel_count));
        }
        _ => (),
    }

    Ok(OpusHead {
        version,
        channel_count,
        pre_skip,
        input_sample_rate,
        output_gain,
        mapping_family,
        mapping,
    })
}

fn parse_channel_mapping(packet: &[u8], channel_count: u8) -> Result<ChannelMapping, HeaderError> {
    let table_end = MIN_OPUS_HEAD_SIZE_WITH_MAPPING + usize::from(channel_count);

    if packet.len() < table_end {
        return Err(HeaderError::TooShort);
    }

    let stream_count = packet[19];

    if stream_count == 0 {
        return Err(HeaderError::InvalidStreamCount(stream_count));
    }

    let coupled_count = packet[20];

    if coupled_count > stream_count {
        return Err(HeaderError::InvalidCoupledCount(coupled_count));
    }

    let table = packet[MIN_OPUS_HEAD_SIZE_WITH_MAPPING..table_end].to_vec();

    // Every entry addresses a decoded stream channel, except the silent
    // channel sentinel. Sum in u16: both counts can be up to 255.
    let total = u16::from(stream_count) + u16::from(coupled_count);

    for &entry in &table {
        if entry != SILENT_CHANNEL && u16::from(entry) >= total {
            return Err(HeaderError::InvalidMapping);
        }
    }

    Ok(ChannelMapping { stream_count, coupled_count, table })
}
