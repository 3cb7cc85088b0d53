//! Voice frame codec capability.
//!
//! Noise can only be mixed into linear samples, so the router needs a way to
//! decode a frame and encode it back. When the host transport exposes no
//! codec the router runs in passthrough mode and delivers frames clean.

use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame length {0} is not a whole number of samples")]
    TruncatedFrame(usize),
    #[error("empty frame")]
    EmptyFrame,
}

/// Converts between wire frames and 16-bit linear samples.
pub trait VoiceCodec: Send + Sync {
    fn decode(&self, frame: &[u8]) -> Result<Vec<i16>, CodecError>;
    fn encode(&self, samples: &[i16]) -> Result<Vec<u8>, CodecError>;
}

/// Raw little-endian 16-bit PCM frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct Pcm16Codec;

impl VoiceCodec for Pcm16Codec {
    fn decode(&self, frame: &[u8]) -> Result<Vec<i16>, CodecError> {
        if frame.is_empty() {
            return Err(CodecError::EmptyFrame);
        }
        if frame.len() % 2 != 0 {
            return Err(CodecError::TruncatedFrame(frame.len()));
        }
        Ok(frame.chunks_exact(2).map(|pair| i16::from_le_bytes([pair[0], pair[1]])).collect())
    }

    fn encode(&self, samples: &[i16]) -> Result<Vec<u8>, CodecError> {
        if samples.is_empty() {
            return Err(CodecError::EmptyFrame);
        }
        Ok(samples.iter().flat_map(|s| s.to_le_bytes()).collect())
    }
}

/// Whether the router can decode frames for noise mixing.
#[derive(Clone)]
pub enum CodecSupport {
    Available(Arc<dyn VoiceCodec>),
    /// No codec: frames are routed, delayed and dropped but never noised.
    Passthrough,
}

impl CodecSupport {
    pub fn pcm16() -> Self {
        CodecSupport::Available(Arc::new(Pcm16Codec))
    }

    pub fn codec(&self) -> Option<&dyn VoiceCodec> {
        match self {
            CodecSupport::Available(codec) => Some(codec.as_ref()),
            CodecSupport::Passthrough => None,
        }
    }
}

impl std::fmt::Debug for CodecSupport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecSupport::Available(_) => f.write_str("Available"),
            CodecSupport::Passthrough => f.write_str("Passthrough"),
        }
    }
}
