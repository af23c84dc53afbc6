// OggOpus Stream
// Copyright (c) 2026 The OggOpus Stream Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Packet demuxer boundary.
//!
//! The decoder core does not parse Ogg pages itself. It consumes complete
//! packets from a [`PacketDemuxer`], which owns page synchronization, segment
//! tables, CRC validation and the staging buffer used when a packet spans
//! several input chunks or pages.

use thiserror::Error;

/// Granule position marking "no timestamp for this page" (RFC 3533).
pub const INVALID_GRANULE_POSITION: i64 = -1;

/// Errors reported by a packet demuxer. The decoder maps
/// [`DemuxError::AllocationFailed`] to a retryable allocation error and every
/// other variant to invalid input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DemuxError {
    #[error("missing ogg capture pattern")]
    InvalidCapture,

    #[error("unsupported ogg version")]
    InvalidVersion,

    #[error("page crc mismatch")]
    CrcMismatch,

    #[error("page sequence number gap")]
    PageSequence,

    #[error("misplaced beginning-of-stream flag")]
    BosViolation,

    #[error("misplaced end-of-stream flag")]
    EosViolation,

    #[error("page from a different logical stream")]
    SerialMismatch,

    #[error("staging buffer allocation failed")]
    AllocationFailed,
}

/// Demuxer construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemuxerConfig {
    /// Initial staging buffer capacity in bytes.
    pub min_buffer_size: usize,
    /// Upper bound on the staging buffer; packets growing beyond it may be
    /// skipped rather than assembled.
    pub max_buffer_size: usize,
    /// Validate the CRC32 of every page before serving its packets.
    pub validate_crc: bool,
}

/// One complete Ogg packet together with the page metadata the Opus mapping
/// cares about.
///
/// The data is a borrowed view — over the caller's input when served
/// zero-copy, or over the demuxer's staging buffer otherwise — and must not be
/// retained past the call that produced it.
#[derive(Debug, Clone, Copy)]
pub struct OggPacket<'a> {
    pub data: &'a [u8],
    /// Granule position of the page this packet completes on.
    pub granule_position: i64,
    /// The page carries the beginning-of-stream flag.
    pub is_bos: bool,
    /// The page carries the end-of-stream flag.
    pub is_eos: bool,
    /// This is the last complete packet on its page.
    pub is_last_on_page: bool,
    /// The page carries the continued-packet flag, i.e. its first segment
    /// continues a packet started on the previous page.
    pub page_is_continuation: bool,
    /// The page's final lacing value is 255: its last packet is incomplete
    /// and continues on the next page.
    pub page_ends_open: bool,
    /// Served from the staging buffer rather than zero-copy from input.
    pub staged: bool,
}

/// Outcome of one [`PacketDemuxer::next_packet`] call.
#[derive(Debug)]
pub enum DemuxPoll<'a> {
    /// All `consumed` input bytes were ingested; no complete packet yet.
    NeedMoreData { consumed: usize },

    /// A complete packet. `consumed` counts the input bytes this delivery
    /// accounts for; they become final only once the packet is consumed.
    Packet { consumed: usize, packet: OggPacket<'a> },

    /// A packet too large to stage was dropped in its entirety.
    Skipped { consumed: usize },
}

/// Incremental pull-style Ogg packet source.
///
/// A packet returned by [`next_packet`](Self::next_packet) stays *pending*
/// until [`consume_packet`](Self::consume_packet) is called: a repeated
/// `next_packet` call with the same input must deliver the identical packet
/// and consumed count without ingesting anything. This makes the decoder's
/// grow-buffer-and-retry protocol non-destructive.
pub trait PacketDemuxer: Sized {
    /// Creates the demuxer, allocating its staging buffer.
    fn try_new(config: &DemuxerConfig) -> Result<Self, DemuxError>;

    /// Feeds `input` and attempts to produce the next complete packet.
    fn next_packet<'a>(&'a mut self, input: &'a [u8]) -> Result<DemuxPoll<'a>, DemuxError>;

    /// Commits the packet most recently returned by `next_packet`.
    fn consume_packet(&mut self);

    /// Returns to the initial parse state, keeping allocated buffers.
    fn reset(&mut self);
}
