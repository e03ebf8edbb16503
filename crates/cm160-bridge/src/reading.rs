//! Decoded readings and the JSON payloads sent to the broker.
//!
//! ```text
//! {"type":"cm160","amps":1219.19,"watts":280413,"when":1718000000,"who":"cm160","where":"pantry"}
//! ```

use std::path::Path;

use chrono::{DateTime, Utc};
use cm160_protocol::DataFrame;
use serde::{Serialize, Serializer};

/// One minute of consumption.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Mean current.
    pub amps: f64,
    /// Mean power, truncated to whole watts.
    pub watts: i64,
    /// Wall clock time the frame was decoded, in Unix seconds.
    pub when: i64,
}

impl Reading {
    /// Build a reading from a decoded frame.
    ///
    /// The device clock drifts, so the timestamp is taken from `now`.
    pub fn from_frame(frame: &DataFrame, voltage: f64, now: DateTime<Utc>) -> Self {
        Reading {
            amps: frame.amps(),
            watts: frame.watts(voltage) as i64,
            when: now.timestamp(),
        }
    }
}

/// Who is publishing and from where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// Program name.
    pub who: String,
    /// Host name.
    pub location: String,
}

impl Origin {
    /// Create an origin.
    pub fn new(who: impl Into<String>, location: impl Into<String>) -> Self {
        Origin {
            who: who.into(),
            location: location.into(),
        }
    }

    /// Program name from `argv[0]` and the machine's host name.
    pub fn detect() -> Self {
        let who = std::env::args()
            .next()
            .as_deref()
            .and_then(|arg| Path::new(arg).file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cm160".to_string());
        let location = gethostname::gethostname().to_string_lossy().into_owned();
        Origin { who, location }
    }
}

/// Payload published for each reading.
#[derive(Debug, Serialize)]
pub struct ReadingMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(serialize_with = "two_places")]
    amps: f64,
    watts: i64,
    when: i64,
    who: &'a str,
    #[serde(rename = "where")]
    location: &'a str,
}

impl<'a> ReadingMessage<'a> {
    /// Wrap a reading for publishing.
    pub fn new(reading: &Reading, origin: &'a Origin) -> Self {
        ReadingMessage {
            kind: "cm160",
            amps: reading.amps,
            watts: reading.watts,
            when: reading.when,
            who: &origin.who,
            location: &origin.location,
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Presence message on the announce topic.
#[derive(Debug, Serialize)]
pub struct AnnounceMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    connect: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    when: Option<i64>,
    who: &'a str,
    #[serde(rename = "where")]
    location: &'a str,
}

impl<'a> AnnounceMessage<'a> {
    /// Sent once connected.
    pub fn online(origin: &'a Origin, now: DateTime<Utc>) -> Self {
        AnnounceMessage {
            kind: "announce",
            connect: true,
            when: Some(now.timestamp()),
            who: &origin.who,
            location: &origin.location,
        }
    }

    /// Registered as the last will, and sent on clean shutdown.
    pub fn offline(origin: &'a Origin) -> Self {
        AnnounceMessage {
            kind: "announce",
            connect: false,
            when: None,
            who: &origin.who,
            location: &origin.location,
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

fn two_places<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64((value * 100.0).round() / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use cm160_protocol::{decode_frame, seal_frame, Frame, FRAME_ID_LIVE};

    fn frame(lo: u8, hi: u8) -> DataFrame {
        match decode_frame(&seal_frame([FRAME_ID_LIVE, 24, 1, 1, 0, 0, 0, 0, lo, hi])) {
            Ok(Frame::Data(data)) => data,
            other => panic!("expected data frame, got {:?}", other),
        }
    }

    #[test]
    fn test_reading_uses_wall_clock() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let reading = Reading::from_frame(&frame(0x09, 0x44), 230.0, now);
        assert_eq!(reading.watts, 280_413);
        assert_eq!(reading.when, now.timestamp());
    }

    #[test]
    fn test_reading_payload() {
        let origin = Origin::new("cm160", "pantry");
        let reading = Reading {
            amps: 17417.0 * 0.07,
            watts: 280_413,
            when: 1_700_000_000,
        };
        let json = String::from_utf8(ReadingMessage::new(&reading, &origin).to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"type":"cm160","amps":1219.19,"watts":280413,"when":1700000000,"who":"cm160","where":"pantry"}"#
        );
    }

    #[test]
    fn test_amps_rounded_to_cents() {
        let origin = Origin::new("a", "b");
        let reading = Reading::from_frame(&frame(1, 0), 240.0, Utc::now());
        let value: serde_json::Value =
            serde_json::from_slice(&ReadingMessage::new(&reading, &origin).to_json().unwrap()).unwrap();
        assert_eq!(value["amps"], serde_json::json!(0.07));
        assert_eq!(value["watts"], serde_json::json!(16));
    }

    #[test]
    fn test_announce_payloads() {
        let origin = Origin::new("cm160", "pantry");
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        let online = String::from_utf8(AnnounceMessage::online(&origin, now).to_json().unwrap()).unwrap();
        assert_eq!(
            online,
            format!(
                r#"{{"type":"announce","connect":true,"when":{},"who":"cm160","where":"pantry"}}"#,
                now.timestamp()
            )
        );

        let offline = String::from_utf8(AnnounceMessage::offline(&origin).to_json().unwrap()).unwrap();
        assert_eq!(
            offline,
            r#"{"type":"announce","connect":false,"who":"cm160","where":"pantry"}"#
        );
    }
}
