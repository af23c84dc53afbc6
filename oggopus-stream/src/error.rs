// OggOpus Stream
// Copyright (c) 2026 The OggOpus Stream Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error taxonomy for the streaming decoder.

use thiserror::Error;

/// Errors returned by [`OggOpusDecoder::decode`](crate::OggOpusDecoder::decode).
///
/// Only two variants are recoverable for the current stream:
/// [`Error::OutputBufferTooSmall`] (grow the output buffer and replay the same
/// input, nothing was consumed) and [`Error::AllocationFailed`] (call `decode`
/// again, the session is unchanged). Every other variant is terminal for the
/// logical stream: call [`reset`](crate::OggOpusDecoder::reset) to decode a new
/// stream with the same instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The stream violates the Ogg container or the RFC 7845 Opus mapping.
    #[error("invalid stream: {0}")]
    InputInvalid(&'static str),

    /// An audio packet arrived while no backend decode handle is live.
    #[error("decoder not initialized")]
    NotInitialized,

    /// Lazy resource acquisition failed. Retryable.
    #[error("allocation failed")]
    AllocationFailed,

    /// The caller's output buffer cannot hold the decoded packet. Retryable
    /// with a buffer of at least `required` bytes; no input was consumed.
    #[error("output buffer too small ({required} bytes required)")]
    OutputBufferTooSmall {
        /// Required output buffer size in bytes, when known.
        required: usize,
    },

    /// The backend rejected a structurally valid-looking audio packet.
    #[error("opus decode failed")]
    DecodeFailed,
}

pub type Result<T> = core::result::Result<T, Error>;
