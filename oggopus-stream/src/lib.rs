// OggOpus Stream
// Copyright (c) 2026 The OggOpus Stream Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Incremental Ogg Opus streaming decoder.
//!
//! [`OggOpusDecoder`] accepts arbitrarily small, arbitrarily chunked byte
//! ranges of an Ogg Opus stream and emits interleaved 16-bit PCM, enforcing
//! the RFC 7845 binary-compatibility rules along the way. The caller owns all
//! buffers; the steady-state decode path performs no allocation.
//!
//! Two collaborators are consumed through trait boundaries and are not
//! implemented here: an Ogg [`PacketDemuxer`] and an Opus [`OpusBackend`]
//! sample decoder.
//!
//! ```no_run
//! # use oggopus_stream::*;
//! # fn demo<D: PacketDemuxer, B: OpusBackend>(stream: &[u8]) -> Result<()> {
//! let mut decoder = OggOpusDecoder::<D, B>::new(DecoderConfig::default());
//! let mut pcm = vec![0i16; 960 * 2];
//! let mut cursor = 0;
//!
//! while cursor < stream.len() {
//!     let progress = decoder.decode(&stream[cursor..], &mut pcm)?;
//!     // progress.samples_decoded samples per channel are now in `pcm`.
//!     cursor += progress.bytes_consumed;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! A decoder instance is not safe for concurrent use; run one instance per
//! logical stream per thread. Distinct instances share nothing.

mod backend;
mod decoder;
mod demux;
mod error;
mod header;

pub use backend::{BackendError, MultistreamParams, OpusBackend, StreamDecoder, StreamParams};
pub use decoder::{OggOpusDecoder, Progress};
pub use demux::{
    DemuxError, DemuxPoll, DemuxerConfig, OggPacket, PacketDemuxer, INVALID_GRANULE_POSITION,
};
pub use error::{Error, Result};
pub use header::{
    is_opus_head, is_opus_tags, is_valid_opus_tags, parse_opus_head, ChannelMapping, HeaderError,
    OpusHead, MAX_OPUS_TAGS_SIZE, MIN_OPUS_TAGS_SIZE, SILENT_CHANNEL,
};

/// Native Opus sample rate; pre-skip and granule positions count at this rate.
pub const NATIVE_SAMPLE_RATE: u32 = 48_000;

/// Audio packets above this size are malformed (RFC 7845 section 3).
pub const MAX_AUDIO_PACKET_SIZE: usize = 61_440;

/// Initial demuxer staging capacity; typical packets are a few hundred bytes.
pub const MIN_PACKET_BUFFER_SIZE: usize = 1024;

/// Output sample rates Opus can decode at (RFC 6716 section 2).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SampleRate {
    Hz8000,
    Hz12000,
    Hz16000,
    Hz24000,
    #[default]
    Hz48000,
}

impl SampleRate {
    /// The rate in Hertz.
    pub fn as_hz(self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8_000,
            SampleRate::Hz12000 => 12_000,
            SampleRate::Hz16000 => 16_000,
            SampleRate::Hz24000 => 24_000,
            SampleRate::Hz48000 => 48_000,
        }
    }
}

/// Per-instance decoder configuration. Construction never fails and never
/// allocates; all resources are acquired on the first
/// [`decode`](OggOpusDecoder::decode) call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Validate the CRC32 of every Ogg page. Off by default: a worthwhile
    /// saving for trusted local sources, keep it on for network input.
    pub validate_crc: bool,

    /// Output sample rate.
    pub sample_rate: SampleRate,

    /// Output channel count; `0` uses the stream's own channel count. The
    /// backend handles any up/downmixing.
    pub channels: u8,
}
