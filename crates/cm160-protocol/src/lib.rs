//! OWL CM160 Frame Protocol
//!
//! This crate implements the byte-level protocol spoken by the OWL CM160
//! energy monitor over its CP210x USB serial bridge. It does no I/O: the
//! caller reads bytes from the device, feeds them to a [`FrameEngine`] and
//! acts on the resulting [`EngineEvent`]s.
//!
//! # Protocol Overview
//!
//! The device sends a stream of 11 byte frames with no delimiter:
//!
//! - **ID** control frame, repeated until the host replies `0x5A`
//! - **WAIT** control frame, answered with `0xA5`
//! - **LIVE** (`0x51`) and **HISTORY** (`0x59`) data frames holding a date,
//!   a tariff field and the mean current for one minute, followed by an
//!   8-bit checksum
//!
//! Alignment is recovered by dropping one byte whenever a window does not
//! decode. HISTORY frames sometimes arrive with their minute byte missing;
//! those fail the checksum and are skipped as 10 byte records.
//!
//! # Example
//!
//! ```rust
//! use cm160_protocol::{seal_frame, EngineEvent, FrameEngine, FRAME_ID_LIVE};
//!
//! let mut engine = FrameEngine::new();
//! engine.feed(&seal_frame([FRAME_ID_LIVE, 24, 6, 1, 9, 30, 0, 0, 0x09, 0x44]))?;
//!
//! if let Some(EngineEvent::Reading(frame)) = engine.next_event() {
//!     assert_eq!(frame.watts(230.0) as i64, 280_413);
//! }
//! # Ok::<(), cm160_protocol::ProtocolError>(())
//! ```

mod constants;
mod decode;
mod engine;
mod error;
mod frame;
mod handshake;

pub use constants::*;
pub use decode::*;
pub use engine::*;
pub use error::*;
pub use frame::*;
pub use handshake::*;
