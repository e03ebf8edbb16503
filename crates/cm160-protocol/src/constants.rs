//! Protocol constants
//!
//! Device identity, control frame patterns, frame markers and the numeric
//! constants used when decoding CM160 readings.

// ============================================================================
// USB Identity
// ============================================================================

/// OWL vendor id.
pub const VENDOR_ID: u16 = 0x0fde;
/// CM160 product id.
pub const PRODUCT_ID: u16 = 0xca05;

/// Line rate of the CP210x bridge inside the CM160.
pub const BAUD_RATE: u32 = 250_000;

// ============================================================================
// Framing
// ============================================================================

/// Size of a regular frame.
pub const FRAME_LEN: usize = 11;
/// Size of a history record that lost its minute byte.
pub const SHORT_HISTORY_LEN: usize = 10;
/// Number of bytes covered by the data frame checksum.
pub const CHECKSUM_LEN: usize = 10;

/// Capacity of a session's receive buffer.
pub const BUFFER_CAPACITY: usize = 4096;

// ============================================================================
// Frame Markers
// ============================================================================

/// First byte of both control frames.
pub const FRAME_ID_CONTROL: u8 = 0xA9;
/// First byte of a live reading.
pub const FRAME_ID_LIVE: u8 = 0x51;
/// First byte of a history reading.
pub const FRAME_ID_HISTORY: u8 = 0x59;
/// Marker seen on the wire with no known meaning.
pub const FRAME_ID_UNKNOWN: u8 = 0x1D;

/// Identification frame sent by the device until the host acknowledges it.
pub const ID_FRAME: [u8; FRAME_LEN] = [
    0xA9, 0x49, 0x44, 0x54, 0x43, 0x4D, 0x56, 0x30, 0x30, 0x31, 0x01,
];

/// Frame sent by the device once it is waiting for the host to begin.
pub const WAIT_FRAME: [u8; FRAME_LEN] = [
    0xA9, 0x49, 0x44, 0x54, 0x57, 0x41, 0x49, 0x54, 0x50, 0x43, 0x52,
];

// ============================================================================
// Handshake
// ============================================================================

/// Host reply to an ID frame.
pub const ID_REPLY: u8 = 0x5A;
/// Host reply to a WAIT frame.
pub const WAIT_REPLY: u8 = 0xA5;

/// Consecutive ID frames after which the device is considered stuck.
pub const STUCK_ID_THRESHOLD: u32 = 8;

// ============================================================================
// Data Frame Fields
// ============================================================================

/// Year byte is an offset from this year.
pub const YEAR_BASE: u16 = 2000;
/// Set in the month byte of a history frame carrying a new reading.
pub const MONTH_FLAG_FRESH: u8 = 0x40;
/// Second flag bit carried in the month byte.
pub const MONTH_FLAG_RESERVED: u8 = 0x80;
/// Bits of the month byte holding the month itself.
pub const MONTH_MASK: u8 = !(MONTH_FLAG_FRESH | MONTH_FLAG_RESERVED);

/// Amps per unit of the raw current field.
pub const AMPS_PER_UNIT: f64 = 0.07;
/// Divisor turning the raw cost field into currency units.
pub const COST_DIVISOR: f64 = 100.0;
