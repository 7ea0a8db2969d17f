//! `tokio_util::codec` adapter for use with `Framed`.

use std::collections::VecDeque;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{encode_frame, Frame};
use crate::config::FrameConfig;
use crate::error::{FrameError, Result};
use crate::splitter::FrameSplitter;

/// Frame codec over any tokio byte stream.
#[derive(Debug)]
pub struct LlpCodec {
    splitter: FrameSplitter,
    ready: VecDeque<Frame>,
    config: FrameConfig,
}

impl LlpCodec {
    pub fn new(config: FrameConfig) -> Result<Self> {
        Ok(Self {
            splitter: FrameSplitter::new(&config)?,
            ready: VecDeque::new(),
            config,
        })
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Decoder for LlpCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if !src.is_empty() {
            let chunk = src.split().freeze();
            self.ready.extend(self.splitter.push(chunk)?);
        }
        Ok(self.ready.pop_front())
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if self.splitter.has_partial() {
            return Err(FrameError::ConnectionClosed);
        }
        Ok(None)
    }
}

impl Encoder<Frame> for LlpCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        if item.payload.len() > self.config.max_frame_length {
            return Err(FrameError::PayloadTooLarge {
                size: item.payload.len(),
                max: self.config.max_frame_length,
            });
        }
        encode_frame(&item.header, &item.payload, &self.config.frame_delimiter, dst);
        Ok(())
    }
}
