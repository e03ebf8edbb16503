//! Control handshake tracking.
//!
//! After power-up the device repeats the ID frame until the host answers each
//! one with [`ID_REPLY`]. It then sends WAIT, which the host answers with
//! [`WAIT_REPLY`], and starts streaming data frames:
//!
//! ```text
//!            ID / 0x5A          WAIT / 0xA5
//!   Idle ─────────────▶ Handshaking ─────────────▶ Live
//!   Live ─────────────▶ Handshaking
//! ```
//!
//! The state is derived from two counters rather than stored. A device that
//! keeps sending ID frames has stopped hearing the replies; once
//! [`STUCK_ID_THRESHOLD`] of them arrive in a row the session has to be
//! dropped and the serial line reset.

use crate::constants::{ID_REPLY, STUCK_ID_THRESHOLD, WAIT_REPLY};
use crate::decode::{DataFrame, DataKind, Frame};

/// Where a device is in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing exchanged yet.
    Idle,
    /// ID frames are being answered.
    Handshaking,
    /// WAIT or live data seen.
    Live,
}

/// Per-device handshake counters.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Consecutive ID frames with no WAIT or data frame in between.
    id_count: u32,
    /// Set by WAIT or by a decoded LIVE frame.
    seen_live_data: bool,
    /// ID frame count at which the device is stuck.
    stuck_threshold: u32,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    /// Create a handshake tracker with the standard stuck threshold.
    pub fn new() -> Self {
        Self::with_threshold(STUCK_ID_THRESHOLD)
    }

    /// Create a handshake tracker with a custom stuck threshold.
    pub fn with_threshold(stuck_threshold: u32) -> Self {
        Handshake {
            id_count: 0,
            seen_live_data: false,
            stuck_threshold,
        }
    }

    /// Update the counters for a decoded frame.
    ///
    /// Returns the byte that must be written back to the device, if any.
    pub fn on_frame(&mut self, frame: &Frame) -> Option<u8> {
        match frame {
            Frame::Id => {
                self.id_count = self.id_count.saturating_add(1);
                Some(ID_REPLY)
            }
            Frame::Wait => {
                self.id_count = 0;
                self.seen_live_data = true;
                Some(WAIT_REPLY)
            }
            Frame::Data(data) => {
                self.id_count = 0;
                if data.kind == DataKind::Live {
                    self.seen_live_data = true;
                }
                None
            }
        }
    }

    /// Whether a decoded data frame should be forwarded.
    ///
    /// HISTORY frames arriving before the handshake completed are replays of
    /// old data and are held back. Once live data has been seen every HISTORY
    /// frame is forwarded whether or not its fresh flag is set, so readings
    /// the device replays after a handshake are published again under the
    /// time they are received.
    pub fn should_publish(&self, frame: &DataFrame) -> bool {
        match frame.kind {
            DataKind::Live => true,
            DataKind::History => self.seen_live_data,
        }
    }

    /// Whether the device has stopped acknowledging replies.
    pub fn is_stuck(&self) -> bool {
        self.id_count >= self.stuck_threshold
    }

    /// Consecutive ID frames seen.
    pub fn id_count(&self) -> u32 {
        self.id_count
    }

    /// Whether WAIT or a LIVE frame has been seen.
    pub fn seen_live_data(&self) -> bool {
        self.seen_live_data
    }

    /// Current handshake state.
    pub fn state(&self) -> HandshakeState {
        if self.id_count > 0 {
            HandshakeState::Handshaking
        } else if self.seen_live_data {
            HandshakeState::Live
        } else {
            HandshakeState::Idle
        }
    }

    /// Forget all progress.
    pub fn reset(&mut self) {
        self.id_count = 0;
        self.seen_live_data = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{FRAME_ID_HISTORY, FRAME_ID_LIVE};
    use crate::decode::{decode_frame, seal_frame};

    fn data(marker: u8) -> Frame {
        decode_frame(&seal_frame([marker, 24, 1, 1, 0, 0, 0, 0, 10, 0])).unwrap()
    }

    #[test]
    fn test_id_frame_replies_and_counts() {
        let mut hs = Handshake::new();
        assert_eq!(hs.state(), HandshakeState::Idle);

        assert_eq!(hs.on_frame(&Frame::Id), Some(ID_REPLY));
        assert_eq!(hs.id_count(), 1);
        assert_eq!(hs.state(), HandshakeState::Handshaking);
    }

    #[test]
    fn test_wait_completes_handshake() {
        let mut hs = Handshake::new();
        hs.on_frame(&Frame::Id);
        hs.on_frame(&Frame::Id);

        assert_eq!(hs.on_frame(&Frame::Wait), Some(WAIT_REPLY));
        assert_eq!(hs.id_count(), 0);
        assert!(hs.seen_live_data());
        assert_eq!(hs.state(), HandshakeState::Live);

        // A fresh ID frame restarts the handshake
        hs.on_frame(&Frame::Id);
        assert_eq!(hs.state(), HandshakeState::Handshaking);
    }

    #[test]
    fn test_stuck_after_threshold() {
        let mut hs = Handshake::new();
        for _ in 0..7 {
            hs.on_frame(&Frame::Id);
        }
        assert!(!hs.is_stuck());

        hs.on_frame(&Frame::Id);
        assert!(hs.is_stuck());
        assert_eq!(hs.id_count(), STUCK_ID_THRESHOLD);
    }

    #[test]
    fn test_data_frame_resets_id_count() {
        let mut hs = Handshake::new();
        for _ in 0..7 {
            hs.on_frame(&Frame::Id);
        }
        assert_eq!(hs.on_frame(&data(FRAME_ID_HISTORY)), None);
        assert_eq!(hs.id_count(), 0);
        assert!(!hs.seen_live_data());

        for _ in 0..7 {
            hs.on_frame(&Frame::Id);
        }
        assert!(!hs.is_stuck());
    }

    #[test]
    fn test_history_gated_until_live() {
        let mut hs = Handshake::new();
        let Frame::Data(history) = data(FRAME_ID_HISTORY) else {
            unreachable!()
        };
        let Frame::Data(live) = data(FRAME_ID_LIVE) else {
            unreachable!()
        };

        assert!(!history.is_fresh());
        assert!(!hs.should_publish(&history));
        assert!(hs.should_publish(&live));

        // A stale replay goes out once live data has been seen.
        hs.on_frame(&Frame::Data(live));
        assert!(hs.should_publish(&history));
    }

    #[test]
    fn test_reset() {
        let mut hs = Handshake::with_threshold(2);
        hs.on_frame(&Frame::Wait);
        hs.on_frame(&Frame::Id);
        hs.on_frame(&Frame::Id);
        assert!(hs.is_stuck());

        hs.reset();
        assert!(!hs.is_stuck());
        assert_eq!(hs.state(), HandshakeState::Idle);
    }
}
