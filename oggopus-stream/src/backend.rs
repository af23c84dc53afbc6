// OggOpus Stream
// Copyright (c) 2026 The OggOpus Stream Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Opus decode backend boundary.
//!
//! The core never looks inside an audio packet. Turning one encoded packet
//! plus a channel topology into PCM, and answering how many samples a packet
//! will produce, are the backend's job.

use thiserror::Error;

/// Errors reported by a decode backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Decoder state could not be allocated.
    #[error("backend allocation failed")]
    AllocationFailed,

    /// The packet payload is corrupt or otherwise undecodable.
    #[error("corrupt packet")]
    CorruptPacket,
}

/// Parameters for a single-stream (mapping family 0) decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u8,
    /// Output gain in Q7.8 dB from the identification header; the backend
    /// applies it to every decoded sample.
    pub gain_q8: i16,
}

/// Parameters for a multistream decoder (non-zero mapping families).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultistreamParams<'a> {
    pub sample_rate: u32,
    pub channels: u8,
    pub streams: u8,
    pub coupled: u8,
    /// One entry per output channel: stream-channel index or the silent
    /// channel sentinel.
    pub mapping: &'a [u8],
    pub gain_q8: i16,
}

/// A live decode handle: one packet in, interleaved PCM out.
pub trait StreamDecoder {
    /// Decodes `packet` into `output`, writing at most `max_samples` samples
    /// per channel, and returns the number of samples per channel produced.
    fn decode(
        &mut self,
        packet: &[u8],
        output: &mut [i16],
        max_samples: usize,
    ) -> Result<usize, BackendError>;
}

/// Factory and packet-introspection capability of an Opus implementation.
pub trait OpusBackend {
    type Stream: StreamDecoder;
    type Multistream: StreamDecoder;

    fn create_stream(params: &StreamParams) -> Result<Self::Stream, BackendError>;

    fn create_multistream(params: &MultistreamParams<'_>) -> Result<Self::Multistream, BackendError>;

    /// Number of samples per channel `packet` will decode to at `sample_rate`,
    /// or `None` if the packet's framing cannot be read.
    fn packet_sample_count(packet: &[u8], sample_rate: u32) -> Option<usize>;
}

/// Exactly one backend handle is live per session: single-stream or
/// multistream, never both, never neither while decoding.
pub(crate) enum BackendHandle<B: OpusBackend> {
    Stream(B::Stream),
    Multistream(B::Multistream),
}

impl<B: OpusBackend> BackendHandle<B> {
    pub(crate) fn decode(
        &mut self,
        packet: &[u8],
        output: &mut [i16],
        max_samples: usize,
    ) -> Result<usize, BackendError> {
        match self {
            BackendHandle::Stream(handle) => handle.decode(packet, output, max_samples),
            BackendHandle::Multistream(handle) => handle.decode(packet, output, max_samples),
        }
    }
}
