//! Frame classification and decoding.
//!
//! Every window is one of:
//!
//! - the ID or WAIT control frame, matched byte for byte
//! - a LIVE (`0x51`) or HISTORY (`0x59`) data frame, checked by an 8-bit sum
//! - anything else, which the caller resyncs past
//!
//! Data frame layout:
//!
//! ```text
//! +------+------+-------+-----+------+--------+---------+---------+-----+
//! | 0    | 1    | 2     | 3   | 4    | 5      | 6..8    | 8..10   | 10  |
//! | type | year | month | day | hour | minute | cost LE | amps LE | sum |
//! +------+------+-------+-----+------+--------+---------+---------+-----+
//! ```

use std::fmt;

use crate::constants::*;
use crate::error::ProtocolError;

/// Type of a data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    /// Reading for the current minute.
    Live,
    /// Reading replayed from the device's memory.
    History,
}

impl DataKind {
    /// Classify a frame marker.
    pub fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            FRAME_ID_LIVE => Some(DataKind::Live),
            FRAME_ID_HISTORY => Some(DataKind::History),
            _ => None,
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataKind::Live => f.write_str("LIVE"),
            DataKind::History => f.write_str("HISTORY"),
        }
    }
}

/// A checksum-valid data frame.
///
/// Date fields come from the device clock, which is not trusted for
/// timestamping readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFrame {
    /// LIVE or HISTORY.
    pub kind: DataKind,
    /// Full year.
    pub year: u16,
    /// Month with the flag bits masked off.
    pub month: u8,
    /// Flag bits of the month byte.
    pub flags: u8,
    /// Day of month.
    pub day: u8,
    /// Hour of day.
    pub hour: u8,
    /// Minute of hour.
    pub minute: u8,
    /// Raw tariff/cost field.
    pub cost_raw: u16,
    /// Raw mean current field.
    pub amps_raw: u16,
}

impl DataFrame {
    /// Decode the fields of a frame whose checksum has been verified.
    fn from_window(kind: DataKind, window: &[u8; FRAME_LEN]) -> Self {
        DataFrame {
            kind,
            year: YEAR_BASE + u16::from(window[1]),
            month: window[2] & MONTH_MASK,
            flags: window[2] & !MONTH_MASK,
            day: window[3],
            hour: window[4],
            minute: window[5],
            cost_raw: u16::from_le_bytes([window[6], window[7]]),
            amps_raw: u16::from_le_bytes([window[8], window[9]]),
        }
    }

    /// Mean current over the minute.
    pub fn amps(&self) -> f64 {
        f64::from(self.amps_raw) * AMPS_PER_UNIT
    }

    /// Mean power over the minute at the given line voltage.
    pub fn watts(&self, voltage: f64) -> f64 {
        self.amps() * voltage
    }

    /// Tariff/cost field.
    pub fn cost(&self) -> f64 {
        f64::from(self.cost_raw) / COST_DIVISOR
    }

    /// Whether the frame carries a new reading. LIVE frames always do.
    pub fn is_fresh(&self) -> bool {
        match self.kind {
            DataKind::Live => true,
            DataKind::History => self.flags & MONTH_FLAG_FRESH != 0,
        }
    }

    /// Whether the month field is a calendar month.
    pub fn has_valid_month(&self) -> bool {
        (1..=12).contains(&self.month)
    }
}

/// A recognised frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// Identification control frame.
    Id,
    /// Wait control frame.
    Wait,
    /// Data frame with a valid checksum.
    Data(DataFrame),
}

impl Frame {
    /// Bytes taken from the buffer by this frame.
    pub fn consumed(&self) -> usize {
        FRAME_LEN
    }
}

/// 8-bit sum of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// Append the checksum byte to a ten byte data payload.
pub fn seal_frame(payload: [u8; CHECKSUM_LEN]) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[..CHECKSUM_LEN].copy_from_slice(&payload);
    frame[CHECKSUM_LEN] = checksum(&payload);
    frame
}

/// Classify and decode one frame window.
pub fn decode_frame(window: &[u8; FRAME_LEN]) -> Result<Frame, ProtocolError> {
    if *window == ID_FRAME {
        return Ok(Frame::Id);
    }
    if *window == WAIT_FRAME {
        return Ok(Frame::Wait);
    }

    let kind = DataKind::from_marker(window[0])
        .ok_or(ProtocolError::UnrecognizedFrame { marker: window[0] })?;

    let actual = checksum(&window[..CHECKSUM_LEN]);
    let expected = window[CHECKSUM_LEN];
    if actual != expected {
        return Err(ProtocolError::ChecksumMismatch {
            kind,
            expected,
            actual,
        });
    }

    Ok(Frame::Data(DataFrame::from_window(kind, window)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live_frame(amps_lo: u8, amps_hi: u8) -> [u8; FRAME_LEN] {
        seal_frame([FRAME_ID_LIVE, 24, 3, 15, 10, 42, 0x2C, 0x01, amps_lo, amps_hi])
    }

    #[test]
    fn test_control_frames() {
        assert_eq!(decode_frame(&ID_FRAME), Ok(Frame::Id));
        assert_eq!(decode_frame(&WAIT_FRAME), Ok(Frame::Wait));
    }

    #[test]
    fn test_near_control_frame_is_unrecognized() {
        let mut window = ID_FRAME;
        window[10] = 0x02;
        assert_eq!(
            decode_frame(&window),
            Err(ProtocolError::UnrecognizedFrame { marker: FRAME_ID_CONTROL })
        );
    }

    #[test]
    fn test_decode_live_fields() {
        let frame = match decode_frame(&live_frame(0x09, 0x44)) {
            Ok(Frame::Data(data)) => data,
            other => panic!("expected data frame, got {:?}", other),
        };

        assert_eq!(frame.kind, DataKind::Live);
        assert_eq!(frame.year, 2024);
        assert_eq!(frame.month, 3);
        assert_eq!(frame.day, 15);
        assert_eq!(frame.hour, 10);
        assert_eq!(frame.minute, 42);
        assert_eq!(frame.cost_raw, 300);
        assert!((frame.cost() - 3.0).abs() < 1e-9);
        assert_eq!(frame.amps_raw, 17417);
        assert!(frame.is_fresh());
    }

    #[test]
    fn test_unit_conversion() {
        let frame = match decode_frame(&live_frame(0x09, 0x44)) {
            Ok(Frame::Data(data)) => data,
            other => panic!("expected data frame, got {:?}", other),
        };
        assert!((frame.amps() - 1219.19).abs() < 1e-9);
        assert_eq!(frame.watts(230.0) as i64, 280_413);
    }

    #[test]
    fn test_decode_is_repeatable() {
        let window = live_frame(0x10, 0x02);
        let first = decode_frame(&window).unwrap();
        let second = decode_frame(&window).unwrap();
        assert_eq!(first, second);
        if let (Frame::Data(a), Frame::Data(b)) = (first, second) {
            assert_eq!(a.amps().to_bits(), b.amps().to_bits());
            assert_eq!(a.watts(240.0).to_bits(), b.watts(240.0).to_bits());
        }
    }

    #[test]
    fn test_history_fresh_flag() {
        let stale = seal_frame([FRAME_ID_HISTORY, 24, 0x03, 1, 2, 3, 0, 0, 5, 0]);
        let fresh = seal_frame([FRAME_ID_HISTORY, 24, 0x43, 1, 2, 3, 0, 0, 5, 0]);

        let Ok(Frame::Data(stale)) = decode_frame(&stale) else {
            panic!("stale history should decode");
        };
        let Ok(Frame::Data(fresh)) = decode_frame(&fresh) else {
            panic!("fresh history should decode");
        };

        assert!(!stale.is_fresh());
        assert!(fresh.is_fresh());
        assert_eq!(fresh.month, 3);
        assert_eq!(fresh.flags, MONTH_FLAG_FRESH);
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut window = live_frame(0x01, 0x00);
        window[10] = window[10].wrapping_add(1);
        let err = decode_frame(&window).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ChecksumMismatch {
                kind: DataKind::Live,
                ..
            }
        ));
        assert_eq!(err.consumed(), 0);

        window[0] = FRAME_ID_HISTORY;
        let err = decode_frame(&window).unwrap_err();
        assert_eq!(err.consumed(), SHORT_HISTORY_LEN);
    }

    #[test]
    fn test_unknown_marker() {
        let window = [FRAME_ID_UNKNOWN, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            decode_frame(&window),
            Err(ProtocolError::UnrecognizedFrame { marker: FRAME_ID_UNKNOWN })
        );
    }

    #[test]
    fn test_month_validity() {
        let window = seal_frame([FRAME_ID_LIVE, 24, 0x0E, 1, 0, 0, 0, 0, 0, 0]);
        let Ok(Frame::Data(frame)) = decode_frame(&window) else {
            panic!("frame should decode");
        };
        assert_eq!(frame.month, 14);
        assert!(!frame.has_valid_month());
    }

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(checksum(&[0xFF, 0x02]), 0x01);
        assert_eq!(checksum(&[]), 0);
    }
}
