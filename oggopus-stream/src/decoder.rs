// OggOpus Stream
// Copyright (c) 2026 The OggOpus Stream Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The streaming decoder core: packet state machine, RFC 7845 stream
//! validation, buffer sizing, pre-skip trimming and granule-position checks.

use log::{debug, warn};

use crate::backend::{BackendHandle, MultistreamParams, OpusBackend, StreamParams};
use crate::demux::{DemuxError, DemuxPoll, DemuxerConfig, OggPacket, PacketDemuxer};
use crate::error::{Error, Result};
use crate::header::{self, OpusHead, MAX_OPUS_TAGS_SIZE, MIN_OPUS_TAGS_SIZE};
use crate::{DecoderConfig, MAX_AUDIO_PACKET_SIZE, MIN_PACKET_BUFFER_SIZE, NATIVE_SAMPLE_RATE};

const BYTES_PER_SAMPLE: usize = 2;

/// Byte and sample counts reported by one [`OggOpusDecoder::decode`] call.
///
/// `samples_decoded` counts samples per channel; the interleaved PCM written
/// to the output buffer is `samples_decoded * channel_count()` values. An
/// error return implies both counts are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Input bytes ingested by this call. The caller advances its cursor by
    /// this amount before the next call.
    pub bytes_consumed: usize,
    /// Samples per channel written to the output buffer.
    pub samples_decoded: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ExpectOpusHead,
    ExpectOpusTags,
    Decoding,
}

/// Mutable state of one logical stream decode.
struct Session<B: OpusBackend> {
    state: State,
    head: Option<OpusHead>,
    backend: Option<BackendHandle<B>>,
    output_channels: u8,
    samples_decoded_total: u64,
    pre_skip_applied: bool,
    last_granule_position: i64,
    /// Decoded-sample accumulator for the first page carrying a granule
    /// position; `None` once that page has been validated.
    first_page_samples: Option<u64>,
    tags_size_accumulated: usize,
    required_buffer_bytes: usize,
    packets_on_page: u8,
    expect_continued_packet: bool,
    seen_opus_head: bool,
    seen_opus_tags: bool,
    eos_seen: bool,
}

impl<B: OpusBackend> Default for Session<B> {
    fn default() -> Self {
        Session {
            state: State::ExpectOpusHead,
            head: None,
            backend: None,
            output_channels: 0,
            samples_decoded_total: 0,
            pre_skip_applied: false,
            last_granule_position: 0,
            first_page_samples: None,
            tags_size_accumulated: 0,
            required_buffer_bytes: 0,
            packets_on_page: 0,
            expect_continued_packet: false,
            seen_opus_head: false,
            seen_opus_tags: false,
            eos_seen: false,
        }
    }
}

/// Incremental Ogg Opus decoder.
///
/// Generic over its two collaborators: `D` supplies complete Ogg packets from
/// chunked input, `B` turns packets into PCM. Construction never fails and
/// never allocates; the demuxer and the backend handle are created lazily on
/// the first [`decode`](Self::decode) call and on header parsing respectively.
pub struct OggOpusDecoder<D: PacketDemuxer, B: OpusBackend> {
    config: DecoderConfig,
    demuxer: Option<D>,
    session: Session<B>,
}

impl<D: PacketDemuxer, B: OpusBackend> OggOpusDecoder<D, B> {
    pub fn new(config: DecoderConfig) -> Self {
        OggOpusDecoder { config, demuxer: None, session: Session::default() }
    }

    /// Decodes the next packet available in `input`, writing interleaved PCM
    /// into `output`.
    ///
    /// At most one packet is processed per call. The caller advances its
    /// input cursor by [`Progress::bytes_consumed`] and repeats until the
    /// input is exhausted and a call makes no progress.
    ///
    /// While parsing headers the output buffer is ignored and may be empty.
    /// Once decoding, [`Error::OutputBufferTooSmall`] reports the required
    /// size; the caller grows its buffer and replays the same input — no
    /// bytes were consumed.
    pub fn decode(&mut self, input: &[u8], output: &mut [i16]) -> Result<Progress> {
        if self.session.state == State::Decoding && output.is_empty() {
            return Err(Error::OutputBufferTooSmall {
                required: self.session.required_buffer_bytes,
            });
        }

        // No pages may follow a page marked end-of-stream (RFC 7845
        // section 3). This binds the whole session, not just the next packet.
        if self.session.eos_seen {
            return Err(Error::InputInvalid("page after end of stream"));
        }

        if self.demuxer.is_none() {
            let demuxer_config = DemuxerConfig {
                min_buffer_size: MIN_PACKET_BUFFER_SIZE,
                max_buffer_size: MAX_AUDIO_PACKET_SIZE,
                validate_crc: self.config.validate_crc,
            };

            match D::try_new(&demuxer_config) {
                Ok(demuxer) => self.demuxer = Some(demuxer),
                Err(err) => {
                    warn!("oggopus: demuxer allocation failed: {}", err);
                    return Err(Error::AllocationFailed);
                }
            }
        }

        let demuxer = match &mut self.demuxer {
            Some(demuxer) => demuxer,
            None => return Err(Error::NotInitialized),
        };

        let poll = match demuxer.next_packet(input) {
            Ok(poll) => poll,
            Err(DemuxError::AllocationFailed) => return Err(Error::AllocationFailed),
            Err(err) => {
                warn!("oggopus: demuxer error: {}", err);
                return Err(Error::InputInvalid(demux_reason(&err)));
            }
        };

        match poll {
            DemuxPoll::NeedMoreData { consumed } => {
                Ok(Progress { bytes_consumed: consumed, samples_decoded: 0 })
            }
            DemuxPoll::Skipped { consumed } => {
                if self.session.state == State::ExpectOpusTags {
                    // The comment packet was too large to stage (embedded
                    // cover art). Its contents are opaque here anyway.
                    debug!("oggopus: oversized comment header skipped");
                    self.session.seen_opus_tags = true;
                    self.session.state = State::Decoding;
                }
                Ok(Progress { bytes_consumed: consumed, samples_decoded: 0 })
            }
            DemuxPoll::Packet { consumed, packet } => {
                let handled = self.session.process_packet(&self.config, &packet, output);

                match handled {
                    Ok(samples_decoded) => {
                        demuxer.consume_packet();
                        Ok(Progress { bytes_consumed: consumed, samples_decoded })
                    }
                    // The packet stays pending in the demuxer so the caller
                    // can retry with the same input.
                    Err(err @ (Error::OutputBufferTooSmall { .. } | Error::AllocationFailed)) => {
                        Err(err)
                    }
                    Err(err) => {
                        demuxer.consume_packet();
                        Err(err)
                    }
                }
            }
        }
    }

    /// Returns the session to its initial state for a new logical stream,
    /// keeping allocated scratch buffers. Configuration is preserved.
    pub fn reset(&mut self) {
        if let Some(demuxer) = &mut self.demuxer {
            demuxer.reset();
        }
        self.session = Session::default();
    }

    /// Output sample rate in Hz, or 0 until the headers are parsed.
    pub fn sample_rate(&self) -> u32 {
        if self.session.state == State::Decoding {
            self.config.sample_rate.as_hz()
        }
        else {
            0
        }
    }

    /// Output channel count, or 0 until the identification header is parsed.
    pub fn channel_count(&self) -> u8 {
        self.session.output_channels
    }

    /// Pre-skip from the identification header (48 kHz samples), or 0 until
    /// the headers are parsed.
    pub fn pre_skip(&self) -> u16 {
        match (&self.session.head, self.session.state) {
            (Some(head), State::Decoding) => head.pre_skip,
            _ => 0,
        }
    }

    /// Output gain in Q7.8 dB from the identification header, or 0 until the
    /// headers are parsed.
    pub fn output_gain(&self) -> i16 {
        match (&self.session.head, self.session.state) {
            (Some(head), State::Decoding) => head.output_gain,
            _ => 0,
        }
    }

    /// Output buffer size in bytes needed for the most recently processed
    /// audio packet, updated regardless of that packet's outcome. Drives the
    /// [`Error::OutputBufferTooSmall`] retry protocol.
    pub fn required_output_buffer_size(&self) -> usize {
        self.session.required_buffer_bytes
    }

    /// `true` once both headers are parsed and a backend handle is live.
    pub fn is_initialized(&self) -> bool {
        self.session.state == State::Decoding
    }

    /// `true` once the packet ending the logical stream has been decoded.
    /// Further [`decode`](Self::decode) calls fail until [`reset`](Self::reset).
    pub fn end_of_stream(&self) -> bool {
        self.session.eos_seen
    }

    /// Bit depth of the output samples.
    pub fn bit_depth(&self) -> u8 {
        16
    }

    /// Size of one output sample in bytes.
    pub fn bytes_per_sample(&self) -> u8 {
        BYTES_PER_SAMPLE as u8
    }
}

impl<B: OpusBackend> Session<B> {
    fn process_packet(
        &mut self,
        config: &DecoderConfig,
        packet: &OggPacket<'_>,
        output: &mut [i16],
    ) -> Result<usize> {
        // Container-level assertion, ahead of any state handling: a page that
        // ended mid-packet must be continued, one that did not must not be
        // (RFC 7845 section 4.1). Checked on the first packet of each page. A
        // staged packet was already assembled across pages by the demuxer, so
        // its completing page is a continuation by construction.
        if self.packets_on_page == 0
            && !packet.staged
            && packet.page_is_continuation != self.expect_continued_packet
        {
            warn!("oggopus: continued-packet flag mismatch at page boundary");
            return Err(Error::InputInvalid("continued-packet flag mismatch"));
        }

        match self.state {
            State::ExpectOpusHead => self.handle_opus_head(config, packet).map(|_| 0),
            State::ExpectOpusTags => self.handle_opus_tags(packet).map(|_| 0),
            State::Decoding => self.handle_audio(config, packet, output),
        }
    }

    fn handle_opus_head(&mut self, config: &DecoderConfig, packet: &OggPacket<'_>) -> Result<()> {
        if !packet.is_bos || !header::is_opus_head(packet.data) {
            return Err(Error::InputInvalid("first packet is not a beginning-of-stream OpusHead"));
        }

        if self.seen_opus_head {
            return Err(Error::InputInvalid("duplicate OpusHead"));
        }

        // The identification header must be alone on the first page, with an
        // explicit granule position of zero (RFC 7845 section 4).
        if packet.is_last_on_page && self.packets_on_page != 0 {
            return Err(Error::InputInvalid("OpusHead shares its page"));
        }

        if packet.granule_position != 0 {
            return Err(Error::InputInvalid("OpusHead page carries a granule position"));
        }

        let head = match header::parse_opus_head(packet.data) {
            Ok(head) => head,
            Err(err) => {
                warn!("oggopus: rejected identification header: {}", err);
                return Err(Error::InputInvalid("malformed OpusHead"));
            }
        };

        let output_channels =
            if config.channels != 0 { config.channels } else { head.channel_count };

        // The only fallible step; everything before leaves the session
        // untouched, so a failed allocation retries with the same packet.
        let backend = create_backend::<B>(&head, output_channels, config.sample_rate.as_hz())?;

        debug!(
            "oggopus: stream: channels={} pre_skip={} gain_q8={} family={} streams={} coupled={}",
            head.channel_count,
            head.pre_skip,
            head.output_gain,
            head.mapping_family,
            head.stream_count(),
            head.coupled_count(),
        );

        self.seen_opus_head = true;
        self.update_page_tracking(packet);
        self.head = Some(head);
        self.backend = Some(backend);
        self.output_channels = output_channels;
        self.state = State::ExpectOpusTags;

        Ok(())
    }

    fn handle_opus_tags(&mut self, packet: &OggPacket<'_>) -> Result<()> {
        if !header::is_opus_tags(packet.data) {
            return Err(Error::InputInvalid("second packet is not OpusTags"));
        }

        if self.seen_opus_tags {
            return Err(Error::InputInvalid("duplicate OpusTags"));
        }

        // Total size across all continuation pages is bounded (RFC 7845
        // section 5.2).
        self.tags_size_accumulated += packet.data.len();

        if self.tags_size_accumulated > MAX_OPUS_TAGS_SIZE {
            return Err(Error::InputInvalid("comment header too large"));
        }

        if packet.data.len() < MIN_OPUS_TAGS_SIZE {
            return Err(Error::InputInvalid("comment header truncated"));
        }

        // The comment header must be alone on the page where it completes,
        // with an explicit granule position of zero.
        if packet.is_last_on_page {
            if self.packets_on_page != 0 {
                return Err(Error::InputInvalid("OpusTags shares its final page"));
            }

            if packet.granule_position != 0 {
                return Err(Error::InputInvalid("OpusTags page carries a granule position"));
            }
        }

        self.seen_opus_tags = true;
        self.update_page_tracking(packet);
        self.state = State::Decoding;

        debug!("oggopus: headers complete, decoding");

        Ok(())
    }

    fn handle_audio(
        &mut self,
        config: &DecoderConfig,
        packet: &OggPacket<'_>,
        output: &mut [i16],
    ) -> Result<usize> {
        // Zero-length audio packets are malformed (RFC 7845 section 4.1) and
        // oversized ones are treated as invalid (section 3), independent of
        // content.
        if packet.data.is_empty() {
            return Err(Error::InputInvalid("zero-length audio packet"));
        }

        if packet.data.len() > MAX_AUDIO_PACKET_SIZE {
            return Err(Error::InputInvalid("oversized audio packet"));
        }

        let channels = usize::from(self.output_channels);

        if let Some(expected) = B::packet_sample_count(packet.data, config.sample_rate.as_hz()) {
            if expected > 0 {
                let required = expected * channels * BYTES_PER_SAMPLE;
                self.required_buffer_bytes = required;

                if output.len() * BYTES_PER_SAMPLE < required {
                    return Err(Error::OutputBufferTooSmall { required });
                }
            }
        }

        // The terminal flag binds only once the packet is accepted;
        // flipping it before the size check would poison the grow-buffer
        // retry on a final packet.
        if packet.is_eos {
            self.eos_seen = true;
        }

        let max_samples = output.len() / channels;

        let decoded = match self.backend.as_mut() {
            None => return Err(Error::NotInitialized),
            Some(handle) => match handle.decode(packet.data, output, max_samples) {
                Ok(count) => count,
                Err(err) => {
                    warn!("oggopus: backend rejected audio packet: {}", err);
                    return Err(Error::DecodeFailed);
                }
            },
        };

        self.update_page_tracking(packet);
        self.validate_granule_position(packet, decoded as u64)?;
        self.apply_pre_skip(config.sample_rate.as_hz(), output, decoded)
    }

    fn update_page_tracking(&mut self, packet: &OggPacket<'_>) {
        self.packets_on_page = self.packets_on_page.saturating_add(1);

        if packet.is_last_on_page {
            self.packets_on_page = 0;
            self.expect_continued_packet = packet.page_ends_open;
        }
    }

    /// RFC 7845 section 4: the granule position of the first audio data page
    /// must not undercount the samples that complete on it (unless the page
    /// is also the last), and granule positions never decrease.
    fn validate_granule_position(&mut self, packet: &OggPacket<'_>, decoded: u64) -> Result<()> {
        let granule = packet.granule_position;

        // Zero and the -1 sentinel carry no timing information.
        if granule <= 0 {
            return Ok(());
        }

        if self.first_page_samples.is_none() && self.last_granule_position == 0 {
            self.first_page_samples = Some(0);
        }

        if let Some(accumulated) = &mut self.first_page_samples {
            *accumulated += decoded;

            if packet.is_last_on_page {
                let total = *accumulated;
                self.first_page_samples = None;

                if !packet.is_eos && (granule as u64) < total {
                    warn!(
                        "oggopus: first audio page granule {} below {} decoded samples",
                        granule, total
                    );
                    return Err(Error::InputInvalid("granule position short of decoded samples"));
                }
            }
        }

        if self.last_granule_position > 0 && granule < self.last_granule_position {
            warn!(
                "oggopus: granule position went backwards: {} after {}",
                granule, self.last_granule_position
            );
            return Err(Error::InputInvalid("granule position went backwards"));
        }

        self.last_granule_position = granule;

        Ok(())
    }

    /// Suppresses the first `pre_skip` samples of the stream, converted from
    /// 48 kHz to the output rate. A frame straddling the threshold keeps only
    /// its tail, shifted to the front of the output buffer.
    fn apply_pre_skip(
        &mut self,
        sample_rate: u32,
        output: &mut [i16],
        decoded: usize,
    ) -> Result<usize> {
        let pre_skip = match &self.head {
            Some(head) => head.pre_skip,
            None => 0,
        };

        let decoded64 = decoded as u64;

        if !self.pre_skip_applied && pre_skip > 0 {
            let threshold =
                u64::from(pre_skip) * u64::from(sample_rate) / u64::from(NATIVE_SAMPLE_RATE);

            if self.samples_decoded_total + decoded64 <= threshold {
                // The whole frame falls inside the skip range.
                self.samples_decoded_total += decoded64;
                return Ok(0);
            }

            if self.samples_decoded_total < threshold {
                let skip = (threshold - self.samples_decoded_total) as usize;

                if skip > decoded {
                    return Err(Error::InputInvalid("pre-skip exceeds decoded samples"));
                }

                let keep = decoded - skip;
                let channels = usize::from(self.output_channels);

                output.copy_within(skip * channels..(skip + keep) * channels, 0);

                self.samples_decoded_total += decoded64;
                self.pre_skip_applied = true;
                return Ok(keep);
            }

            self.pre_skip_applied = true;
        }

        self.samples_decoded_total += decoded64;

        Ok(decoded)
    }
}

fn create_backend<B: OpusBackend>(
    head: &OpusHead,
    output_channels: u8,
    sample_rate: u32,
) -> Result<BackendHandle<B>> {
    let handle = match &head.mapping {
        None => {
            let params = StreamParams {
                sample_rate,
                channels: output_channels,
                gain_q8: head.output_gain,
            };

            BackendHandle::Stream(
                B::create_stream(&params).map_err(|_| Error::AllocationFailed)?,
            )
        }
        Some(mapping) => {
            let params = MultistreamParams {
                sample_rate,
                channels: output_channels,
                streams: mapping.stream_count,
                coupled: mapping.coupled_count,
                mapping: &mapping.table,
                gain_q8: head.output_gain,
            };

            BackendHandle::Multistream(
                B::create_multistream(&params).map_err(|_| Error::AllocationFailed)?,
            )
        }
    };

    Ok(handle)
}

fn demux_reason(err: &DemuxError) -> &'static str {
    match err {
        DemuxError::InvalidCapture => "ogg: missing capture pattern",
        DemuxError::InvalidVersion => "ogg: unsupported version",
        DemuxError::CrcMismatch => "ogg: page crc mismatch",
        DemuxError::PageSequence => "ogg: page sequence gap",
        DemuxError::BosViolation => "ogg: misplaced beginning-of-stream flag",
        DemuxError::EosViolation => "ogg: misplaced end-of-stream flag",
        DemuxError::SerialMismatch => "ogg: foreign logical stream",
        DemuxError::AllocationFailed => "ogg: allocation failed",
    }
}
