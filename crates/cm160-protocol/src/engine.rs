//! Per-device protocol pipeline.
//!
//! [`FrameEngine`] ties the frame buffer, the decoder and the handshake
//! together. The caller feeds it whatever the transport returned and then
//! drains events until none are left:
//!
//! ```rust
//! use cm160_protocol::{EngineEvent, FrameEngine, ID_FRAME, ID_REPLY};
//!
//! let mut engine = FrameEngine::new();
//! engine.feed(&ID_FRAME)?;
//!
//! let events: Vec<_> = engine.events().collect();
//! assert!(matches!(events[..], [EngineEvent::Reply(ID_REPLY)]));
//! # Ok::<(), cm160_protocol::ProtocolError>(())
//! ```
//!
//! No event is produced until at least a full frame window is buffered.

use crate::constants::FRAME_LEN;
use crate::decode::{decode_frame, DataFrame, Frame};
use crate::error::ProtocolError;
use crate::frame::FrameBuffer;
use crate::handshake::Handshake;

/// Something the owner of an engine has to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Write this byte back to the device.
    Reply(u8),
    /// A reading to forward.
    Reading(DataFrame),
    /// A valid data frame held back by the handshake gate.
    Suppressed(DataFrame),
    /// A window that failed to decode.
    Discarded {
        /// Why it failed.
        error: ProtocolError,
        /// The window as it was in the buffer.
        window: [u8; FRAME_LEN],
        /// Bytes dropped from the buffer.
        skipped: usize,
    },
    /// The device keeps sending ID frames. Further draining yields this again
    /// until the engine is reset.
    Stuck {
        /// Consecutive ID frames seen.
        id_count: u32,
    },
}

/// Frame buffer, decoder and handshake for one device.
#[derive(Debug, Default)]
pub struct FrameEngine {
    buffer: FrameBuffer,
    handshake: Handshake,
}

impl FrameEngine {
    /// Create an engine with standard buffer capacity and stuck threshold.
    pub fn new() -> Self {
        FrameEngine {
            buffer: FrameBuffer::new(),
            handshake: Handshake::new(),
        }
    }

    /// Create an engine from preconfigured parts.
    pub fn with_parts(buffer: FrameBuffer, handshake: Handshake) -> Self {
        FrameEngine { buffer, handshake }
    }

    /// Append bytes read from the device.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.buffer.push(data)
    }

    /// Process buffered bytes up to the next event.
    ///
    /// Returns `None` once fewer than [`FRAME_LEN`] bytes remain.
    pub fn next_event(&mut self) -> Option<EngineEvent> {
        loop {
            if self.handshake.is_stuck() {
                return Some(EngineEvent::Stuck {
                    id_count: self.handshake.id_count(),
                });
            }

            let window = self.buffer.peek_frame()?;
            match decode_frame(&window) {
                Ok(frame) => {
                    self.buffer.consume(frame.consumed());
                    if let Some(event) = self.apply(frame) {
                        return Some(event);
                    }
                }
                Err(error) => {
                    let skipped = self.buffer.consume(error.consumed());
                    log::debug!("data error: {} window={} skipped={}", error, hex::encode(window), skipped);
                    return Some(EngineEvent::Discarded {
                        error,
                        window,
                        skipped,
                    });
                }
            }
        }
    }

    /// Drain events from the buffered bytes.
    pub fn events(&mut self) -> Events<'_> {
        Events {
            engine: self,
            stuck: false,
        }
    }

    fn apply(&mut self, frame: Frame) -> Option<EngineEvent> {
        let reply = self.handshake.on_frame(&frame);
        match frame {
            Frame::Id => {
                log::debug!("received ID frame (count {})", self.handshake.id_count());
                reply.map(EngineEvent::Reply)
            }
            Frame::Wait => {
                log::debug!("received WAIT frame");
                reply.map(EngineEvent::Reply)
            }
            Frame::Data(data) => {
                log::debug!(
                    "received {} frame: amps={:.2} fresh={}",
                    data.kind,
                    data.amps(),
                    data.is_fresh()
                );
                if self.handshake.should_publish(&data) {
                    Some(EngineEvent::Reading(data))
                } else {
                    Some(EngineEvent::Suppressed(data))
                }
            }
        }
    }

    /// Handshake counters.
    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// Receive buffer.
    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    /// Room left in the receive buffer.
    pub fn remaining(&self) -> usize {
        self.buffer.remaining()
    }

    /// Drop buffered bytes and handshake progress.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.handshake.reset();
    }
}

/// Iterator over the events of a [`FrameEngine`].
///
/// Ends after the first [`EngineEvent::Stuck`], since a stuck engine would
/// otherwise report it forever.
pub struct Events<'a> {
    engine: &'a mut FrameEngine,
    stuck: bool,
}

impl Iterator for Events<'_> {
    type Item = EngineEvent;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stuck {
            return None;
        }
        let event = self.engine.next_event()?;
        self.stuck = matches!(event, EngineEvent::Stuck { .. });
        Some(event)
    }
}
