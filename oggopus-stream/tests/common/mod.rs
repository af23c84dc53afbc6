// OggOpus Stream
// Copyright (c) 2026 The OggOpus Stream Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared integration-test support: an Ogg page muxer, a reference
//! incremental packet demuxer and a fake Opus backend with a transparent
//! packet format.

#![allow(dead_code)]

use oggopus_stream::{
    BackendError, DecoderConfig, DemuxError, DemuxPoll, DemuxerConfig, Error, MultistreamParams,
    OggOpusDecoder, OggPacket, OpusBackend, PacketDemuxer, StreamDecoder, StreamParams,
};

pub type TestDecoder = OggOpusDecoder<TestDemuxer, FakeOpus>;

pub const SERIAL: u32 = 0x0D15_EA5E;

pub const CONTINUED: u8 = 0x01;
pub const BOS: u8 = 0x02;
pub const EOS: u8 = 0x04;

// ---------------------------------------------------------------------------
// Ogg page muxer
// ---------------------------------------------------------------------------

/// Ogg CRC32: polynomial 0x04C11DB7, zero initial value, not reflected,
/// computed with the page's CRC field zeroed (RFC 3533 section 6).
pub fn ogg_crc(data: &[u8]) -> u32 {
    let mut crc: u32 = 0;

    for &byte in data {
        crc ^= u32::from(byte) << 24;

        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 { (crc << 1) ^ 0x04C1_1DB7 } else { crc << 1 };
        }
    }

    crc
}

/// Builds one complete Ogg page. Every entry of `packets` terminates on this
/// page; `open_tail`, if given, is a leading fragment of a packet that
/// continues on the next page and must be a non-empty multiple of 255 bytes
/// so that every one of its lacing values is 255.
pub fn build_page(
    flags: u8,
    granule: i64,
    serial: u32,
    sequence: u32,
    packets: &[&[u8]],
    open_tail: Option<&[u8]>,
) -> Vec<u8> {
    let mut lacing = Vec::new();
    let mut payload = Vec::new();

    for packet in packets {
        let mut remaining = packet.len();

        loop {
            if remaining >= 255 {
                lacing.push(255);
                remaining -= 255;

                if remaining == 0 {
                    lacing.push(0);
                    break;
                }
            }
            else {
                lacing.push(remaining as u8);
                break;
            }
        }

        payload.extend_from_slice(packet);
    }

    if let Some(tail) = open_tail {
        assert!(!tail.is_empty() && tail.len() % 255 == 0, "open tail must be a multiple of 255");

        for _ in 0..tail.len() / 255 {
            lacing.push(255);
        }

        payload.extend_from_slice(tail);
    }

    assert!(lacing.len() <= 255, "too many segments for one page");

    let mut page = Vec::with_capacity(27 + lacing.len() + payload.len());
    page.extend_from_slice(b"OggS");
    page.push(0);
    page.push(flags);
    page.extend_from_slice(&granule.to_le_bytes());
    page.extend_from_slice(&serial.to_le_bytes());
    page.extend_from_slice(&sequence.to_le_bytes());
    page.extend_from_slice(&0u32.to_le_bytes());
    page.push(lacing.len() as u8);
    page.extend_from_slice(&lacing);
    page.extend_from_slice(&payload);

    let crc = ogg_crc(&page);
    page[22..26].copy_from_slice(&crc.to_le_bytes());

    page
}

// ---------------------------------------------------------------------------
// Stream and packet builders
// ---------------------------------------------------------------------------

/// Family-0 identification header.
pub fn opus_head(channels: u8, pre_skip: u16) -> Vec<u8> {
    let mut head = b"OpusHead".to_vec();
    head.push(1);
    head.push(channels);
    head.extend_from_slice(&pre_skip.to_le_bytes());
    head.extend_from_slice(&48_000u32.to_le_bytes());
    head.extend_from_slice(&0i16.to_le_bytes());
    head.push(0);
    head
}

/// Family-1 identification header with an explicit channel mapping table.
pub fn opus_head_family1(
    channels: u8,
    pre_skip: u16,
    streams: u8,
    coupled: u8,
    table: &[u8],
) -> Vec<u8> {
    let mut head = opus_head(channels, pre_skip);
    head[18] = 1;
    head.push(streams);
    head.push(coupled);
    head.extend_from_slice(table);
    head
}

/// Minimal valid comment header.
pub fn opus_tags() -> Vec<u8> {
    let mut tags = b"OpusTags".to_vec();
    tags.extend_from_slice(&4u32.to_le_bytes());
    tags.extend_from_slice(b"test");
    tags.extend_from_slice(&0u32.to_le_bytes());
    tags
}

/// Audio packet in the fake backend's format: a 48 kHz per-channel sample
/// count, a fill value, and a padding byte.
pub fn audio_packet(samples_48k: u16, fill: u8) -> Vec<u8> {
    let mut packet = samples_48k.to_le_bytes().to_vec();
    packet.push(fill);
    packet.push(0);
    packet
}

/// A full stream: header pages followed by one audio page per packet, the
/// last page flagged end-of-stream. Granule positions accumulate the packets'
/// 48 kHz sample counts.
pub fn standard_stream(head: &[u8], audio: &[(u16, u8)]) -> Vec<u8> {
    let mut stream = build_page(BOS, 0, SERIAL, 0, &[head], None);
    stream.extend(build_page(0, 0, SERIAL, 1, &[&opus_tags()], None));

    let mut granule: i64 = 0;

    for (i, &(samples, fill)) in audio.iter().enumerate() {
        granule += i64::from(samples);
        let flags = if i == audio.len() - 1 { EOS } else { 0 };
        let packet = audio_packet(samples, fill);
        stream.extend(build_page(flags, granule, SERIAL, 2 + i as u32, &[&packet], None));
    }

    stream
}

// ---------------------------------------------------------------------------
// Reference incremental demuxer
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct PacketMeta {
    granule_position: i64,
    is_bos: bool,
    is_eos: bool,
    is_last_on_page: bool,
    page_is_continuation: bool,
    page_ends_open: bool,
    staged: bool,
}

impl PacketMeta {
    fn as_packet<'a>(&self, data: &'a [u8]) -> OggPacket<'a> {
        OggPacket {
            data,
            granule_position: self.granule_position,
            is_bos: self.is_bos,
            is_eos: self.is_eos,
            is_last_on_page: self.is_last_on_page,
            page_is_continuation: self.page_is_continuation,
            page_ends_open: self.page_ends_open,
            staged: self.staged,
        }
    }
}

#[derive(Clone)]
struct PageState {
    flags: u8,
    granule: i64,
    lacing: Vec<u8>,
    seg_index: usize,
    payload_pos: usize,
}

enum Served {
    Packet { data: Vec<u8>, meta: PacketMeta },
    Skipped,
}

/// Parse state that advances as packets are produced. Cloned before each
/// speculative parse so an unconsumed delivery can be replayed.
#[derive(Clone, Default)]
struct Machine {
    acc: Vec<u8>,
    pos: usize,
    stage: Vec<u8>,
    skipping: bool,
    spans: bool,
    page: Option<PageState>,
    serial: Option<u32>,
    next_sequence: u32,
    first_page_seen: bool,
    saw_eos: bool,
}

impl Machine {
    fn next(&mut self, validate_crc: bool, max_stage: usize) -> Result<Option<Served>, DemuxError> {
        loop {
            if self.page.is_none() && !self.load_page(validate_crc)? {
                return Ok(None);
            }

            let (len, seg_start, flags, granule, terminator, is_last, ends_open);
            {
                let page = self.page.as_mut().unwrap();

                if page.seg_index == page.lacing.len() {
                    self.page = None;
                    continue;
                }

                len = page.lacing[page.seg_index] as usize;
                seg_start = page.payload_pos;
                page.payload_pos += len;
                page.seg_index += 1;

                flags = page.flags;
                granule = page.granule;
                terminator = len < 255;
                is_last = !page.lacing[page.seg_index..].iter().any(|&v| v < 255);
                ends_open = page.lacing.last() == Some(&255);
            }

            let segment = &self.acc[seg_start..seg_start + len];

            if self.skipping {
                // Discarding an oversized packet.
            }
            else if self.stage.len() + len > max_stage {
                self.skipping = true;
                self.stage.clear();
            }
            else {
                self.stage.extend_from_slice(segment);
            }

            if !terminator {
                continue;
            }

            if self.skipping {
                self.skipping = false;
                self.spans = false;
                return Ok(Some(Served::Skipped));
            }

            let meta = PacketMeta {
                granule_position: granule,
                is_bos: flags & BOS != 0,
                is_eos: flags & EOS != 0 && is_last,
                is_last_on_page: is_last,
                page_is_continuation: flags & CONTINUED != 0,
                page_ends_open: ends_open,
                staged: self.spans,
            };

            self.spans = false;
            let data = std::mem::take(&mut self.stage);

            return Ok(Some(Served::Packet { data, meta }));
        }
    }

    /// Parses the next page header from `acc`, returning `false` when more
    /// input is needed. Advances `pos` past the entire page on success.
    fn load_page(&mut self, validate_crc: bool) -> Result<bool, DemuxError> {
        let rem = &self.acc[self.pos..];

        if rem.len() < 27 {
            return Ok(false);
        }

        if &rem[..4] != b"OggS" {
            return Err(DemuxError::InvalidCapture);
        }

        if rem[4] != 0 {
            return Err(DemuxError::InvalidVersion);
        }

        let nsegs = usize::from(rem[26]);

        if rem.len() < 27 + nsegs {
            return Ok(false);
        }

        let lacing = rem[27..27 + nsegs].to_vec();
        let payload_len: usize = lacing.iter().map(|&v| usize::from(v)).sum();

        if rem.len() < 27 + nsegs + payload_len {
            return Ok(false);
        }

        let flags = rem[5];
        let granule = i64::from_le_bytes(rem[6..14].try_into().unwrap());
        let serial = u32::from_le_bytes(rem[14..18].try_into().unwrap());
        let sequence = u32::from_le_bytes(rem[18..22].try_into().unwrap());
        let crc = u32::from_le_bytes(rem[22..26].try_into().unwrap());

        if validate_crc {
            let mut copy = rem[..27 + nsegs + payload_len].to_vec();
            copy[22..26].fill(0);

            if ogg_crc(&copy) != crc {
                return Err(DemuxError::CrcMismatch);
            }
        }

        if self.saw_eos {
            return Err(DemuxError::EosViolation);
        }

        match self.serial {
            None => self.serial = Some(serial),
            Some(expected) if serial != expected => return Err(DemuxError::SerialMismatch),
            _ => (),
        }

        if self.first_page_seen {
            if flags & BOS != 0 {
                return Err(DemuxError::BosViolation);
            }

            if sequence != self.next_sequence {
                return Err(DemuxError::PageSequence);
            }
        }

        self.first_page_seen = true;
        self.next_sequence = sequence.wrapping_add(1);

        if flags & EOS != 0 {
            self.saw_eos = true;
        }

        if !self.stage.is_empty() || self.skipping {
            if flags & CONTINUED != 0 {
                self.spans = true;
            }
            else {
                // The continuation never arrived; drop the partial packet.
                self.stage.clear();
                self.skipping = false;
                self.spans = false;
            }
        }

        self.page = Some(PageState {
            flags,
            granule,
            lacing,
            seg_index: 0,
            payload_pos: self.pos + 27 + nsegs,
        });
        self.pos += 27 + nsegs + payload_len;

        Ok(true)
    }
}

struct Pending {
    machine: Machine,
    data: Vec<u8>,
    meta: PacketMeta,
    consumed: usize,
}

/// Reference [`PacketDemuxer`]: ingests all offered input, serves packets
/// from an internal accumulator, and keeps a delivered packet pending until
/// it is consumed so a rejected delivery replays byte-for-byte.
pub struct TestDemuxer {
    validate_crc: bool,
    max_stage: usize,
    committed: Machine,
    pending: Option<Pending>,
}

impl PacketDemuxer for TestDemuxer {
    fn try_new(config: &DemuxerConfig) -> Result<Self, DemuxError> {
        Ok(TestDemuxer {
            validate_crc: config.validate_crc,
            max_stage: config.max_buffer_size,
            committed: Machine::default(),
            pending: None,
        })
    }

    fn next_packet<'a>(&'a mut self, input: &'a [u8]) -> Result<DemuxPoll<'a>, DemuxError> {
        if self.pending.is_none() {
            let mut working = self.committed.clone();
            working.acc.extend_from_slice(input);
            let consumed = input.len();

            match working.next(self.validate_crc, self.max_stage)? {
                None => {
                    self.committed = working;
                    return Ok(DemuxPoll::NeedMoreData { consumed });
                }
                Some(Served::Skipped) => {
                    self.committed = working;
                    return Ok(DemuxPoll::Skipped { consumed });
                }
                Some(Served::Packet { data, meta }) => {
                    self.pending = Some(Pending { machine: working, data, meta, consumed });
                }
            }
        }

        let pending = self.pending.as_ref().unwrap();

        Ok(DemuxPoll::Packet {
            consumed: pending.consumed,
            packet: pending.meta.as_packet(&pending.data),
        })
    }

    fn consume_packet(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.committed = pending.machine;
        }
    }

    fn reset(&mut self) {
        self.committed = Machine::default();
        self.pending = None;
    }
}

/// Demuxer whose construction always fails, for exercising the lazy
/// allocation path.
pub struct FailingDemuxer;

impl PacketDemuxer for FailingDemuxer {
    fn try_new(_config: &DemuxerConfig) -> Result<Self, DemuxError> {
        Err(DemuxError::AllocationFailed)
    }

    fn next_packet<'a>(&'a mut self, _input: &'a [u8]) -> Result<DemuxPoll<'a>, DemuxError> {
        Ok(DemuxPoll::NeedMoreData { consumed: 0 })
    }

    fn consume_packet(&mut self) {}

    fn reset(&mut self) {}
}

// ---------------------------------------------------------------------------
// Fake Opus backend
// ---------------------------------------------------------------------------

/// Backend with a transparent packet format: bytes 0..2 hold the 48 kHz
/// per-channel sample count (little endian), byte 2 the PCM fill value. A
/// fill value of 0xFF decodes with an error.
pub struct FakeOpus;

fn fake_decode(
    packet: &[u8],
    output: &mut [i16],
    max_samples: usize,
    channels: u8,
    sample_rate: u32,
    mapping: Option<&[u8]>,
) -> Result<usize, BackendError> {
    if packet.len() < 3 {
        return Err(BackendError::CorruptPacket);
    }

    let fill = packet[2];

    if fill == 0xFF {
        return Err(BackendError::CorruptPacket);
    }

    let samples_48k = usize::from(u16::from_le_bytes([packet[0], packet[1]]));
    let samples = samples_48k * sample_rate as usize / 48_000;

    if samples > max_samples {
        return Err(BackendError::CorruptPacket);
    }

    let channels = usize::from(channels);

    for frame in output[..samples * channels].chunks_mut(channels) {
        for (channel, sample) in frame.iter_mut().enumerate() {
            let silent = mapping.map(|m| m.get(channel) == Some(&255)).unwrap_or(false);
            *sample = if silent { 0 } else { i16::from(fill) };
        }
    }

    Ok(samples)
}

pub struct FakeStream {
    channels: u8,
    sample_rate: u32,
}

impl StreamDecoder for FakeStream {
    fn decode(
        &mut self,
        packet: &[u8],
        output: &mut [i16],
        max_samples: usize,
    ) -> Result<usize, BackendError> {
        fake_decode(packet, output, max_samples, self.channels, self.sample_rate, None)
    }
}

pub struct FakeMultistream {
    channels: u8,
    sample_rate: u32,
    mapping: Vec<u8>,
}

impl StreamDecoder for FakeMultistream {
    fn decode(
        &mut self,
        packet: &[u8],
        output: &mut [i16],
        max_samples: usize,
    ) -> Result<usize, BackendError> {
        fake_decode(packet, output, max_samples, self.channels, self.sample_rate, Some(&self.mapping))
    }
}

impl OpusBackend for FakeOpus {
    type Stream = FakeStream;
    type Multistream = FakeMultistream;

    fn create_stream(params: &StreamParams) -> Result<Self::Stream, BackendError> {
        Ok(FakeStream { channels: params.channels, sample_rate: params.sample_rate })
    }

    fn create_multistream(params: &MultistreamParams<'_>) -> Result<Self::Multistream, BackendError> {
        Ok(FakeMultistream {
            channels: params.channels,
            sample_rate: params.sample_rate,
            mapping: params.mapping.to_vec(),
        })
    }

    fn packet_sample_count(packet: &[u8], sample_rate: u32) -> Option<usize> {
        if packet.len() < 3 {
            return None;
        }

        let samples_48k = usize::from(u16::from_le_bytes([packet[0], packet[1]]));
        Some(samples_48k * sample_rate as usize / 48_000)
    }
}

/// Backend whose decoder state can never be allocated.
pub struct FailingBackend;

impl OpusBackend for FailingBackend {
    type Stream = FakeStream;
    type Multistream = FakeMultistream;

    fn create_stream(_params: &StreamParams) -> Result<Self::Stream, BackendError> {
        Err(BackendError::AllocationFailed)
    }

    fn create_multistream(
        _params: &MultistreamParams<'_>,
    ) -> Result<Self::Multistream, BackendError> {
        Err(BackendError::AllocationFailed)
    }

    fn packet_sample_count(packet: &[u8], sample_rate: u32) -> Option<usize> {
        FakeOpus::packet_sample_count(packet, sample_rate)
    }
}

// ---------------------------------------------------------------------------
// Drive loops
// ---------------------------------------------------------------------------

pub fn new_decoder(config: DecoderConfig) -> TestDecoder {
    OggOpusDecoder::new(config)
}

/// Feeds `stream` to the decoder in windows of at most `chunk` bytes and
/// collects all interleaved PCM. Stops at end of stream, or once the input is
/// exhausted and a call makes no progress.
pub fn run_decoder(
    decoder: &mut TestDecoder,
    stream: &[u8],
    chunk: usize,
) -> Result<Vec<i16>, Error> {
    let mut pcm = vec![0i16; 16 * 1024];
    let mut collected = Vec::new();
    let mut cursor: usize = 0;
    let mut no_progress_calls: usize = 0;

    while !decoder.end_of_stream() {
        let end = cursor.saturating_add(chunk.max(1)).min(stream.len());
        let progress = decoder.decode(&stream[cursor..end], &mut pcm)?;
        cursor += progress.bytes_consumed;

        if progress.samples_decoded > 0 {
            let written = progress.samples_decoded * usize::from(decoder.channel_count());
            collected.extend_from_slice(&pcm[..written]);
        }

        // A call reporting neither bytes nor samples may still have processed
        // a packet the demuxer had buffered (a header, or a frame swallowed
        // whole by pre-skip). The buffer cannot hold more packets than the
        // stream has bytes, so only that many consecutive silent calls prove
        // a genuine stall.
        if progress.bytes_consumed == 0 && progress.samples_decoded == 0 && cursor >= stream.len() {
            no_progress_calls += 1;

            if no_progress_calls > stream.len() {
                break;
            }
        }
        else {
            no_progress_calls = 0;
        }
    }

    Ok(collected)
}

/// Decodes the whole stream in one window.
pub fn run_decoder_whole(decoder: &mut TestDecoder, stream: &[u8]) -> Result<Vec<i16>, Error> {
    run_decoder(decoder, stream, usize::MAX)
}
