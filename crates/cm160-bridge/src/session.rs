//! One attached device: transport, frame engine and publishing.

use std::time::Duration;

use chrono::Utc;
use cm160_protocol::{DataFrame, EngineEvent, FrameEngine};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::metrics::metric_defs;
use crate::reading::{Origin, Reading, ReadingMessage};
use crate::sink::ReadingSink;
use crate::transport::{DeviceInfo, Transport};

/// Largest single bulk read.
pub const READ_CHUNK: usize = 64;

/// Timeout for handshake reply writes.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Where and how readings are published.
#[derive(Debug, Clone)]
pub struct Publisher {
    /// Topic readings go to.
    pub topic: String,
    /// Line voltage in volts.
    pub voltage: f64,
    /// Identity included in every payload.
    pub origin: Origin,
}

impl Publisher {
    /// Create a publisher.
    pub fn new(topic: impl Into<String>, voltage: f64, origin: Origin) -> Self {
        Publisher {
            topic: topic.into(),
            voltage,
            origin,
        }
    }
}

/// Per-session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Bytes read from the device.
    pub bytes_read: u64,
    /// Handshake replies written.
    pub replies: u64,
    /// Readings handed to the sink.
    pub published: u64,
    /// Data frames held back.
    pub suppressed: u64,
    /// Windows that failed to decode.
    pub discarded: u64,
}

/// A live device session.
pub struct DeviceSession<T: Transport> {
    device: DeviceInfo,
    transport: T,
    engine: FrameEngine,
    last_valid_month: Option<u8>,
    read_buf: [u8; READ_CHUNK],
    stats: SessionStats,
}

impl<T: Transport> DeviceSession<T> {
    /// Start a session on an opened transport.
    pub fn new(device: DeviceInfo, transport: T) -> Self {
        Self::with_engine(device, transport, FrameEngine::new())
    }

    /// Start a session with a preconfigured engine.
    pub fn with_engine(device: DeviceInfo, transport: T, engine: FrameEngine) -> Self {
        DeviceSession {
            device,
            transport,
            engine,
            last_valid_month: None,
            read_buf: [0; READ_CHUNK],
            stats: SessionStats::default(),
        }
    }

    /// Do one bounded read and handle every complete frame it yields.
    ///
    /// Returns the number of bytes read. An error ends the session; partially
    /// buffered bytes are not processed after a failed read.
    pub fn poll<S: ReadingSink>(
        &mut self,
        publisher: &Publisher,
        sink: &mut S,
        timeout: Duration,
    ) -> Result<usize, SessionError> {
        let want = self.engine.remaining().min(READ_CHUNK);
        let n = if want == 0 {
            0
        } else {
            self.transport.read(&mut self.read_buf[..want], timeout)?
        };

        if n > 0 {
            self.stats.bytes_read += n as u64;
            self.engine
                .feed(&self.read_buf[..n])
                .map_err(SessionError::BufferOverflow)?;
        }

        let events: Vec<EngineEvent> = self.engine.events().collect();
        for event in events {
            self.handle(event, publisher, sink)?;
        }

        Ok(n)
    }

    fn handle<S: ReadingSink>(
        &mut self,
        event: EngineEvent,
        publisher: &Publisher,
        sink: &mut S,
    ) -> Result<(), SessionError> {
        match event {
            EngineEvent::Reply(byte) => {
                metrics::counter!(metric_defs::FRAMES_CONTROL.name).increment(1);
                match self.transport.write(byte, REPLY_TIMEOUT) {
                    Ok(()) => self.stats.replies += 1,
                    Err(e) => warn!("{}: failed to send reply {:#04x}: {}", self.device.id, byte, e),
                }
            }
            EngineEvent::Reading(frame) => {
                metrics::counter!(metric_defs::FRAMES_DATA.name).increment(1);
                self.publish(&frame, publisher, sink);
            }
            EngineEvent::Suppressed(frame) => {
                metrics::counter!(metric_defs::FRAMES_DATA.name).increment(1);
                metrics::counter!(metric_defs::READINGS_SUPPRESSED.name).increment(1);
                self.stats.suppressed += 1;
                let month = self.sanitize_month(&frame);
                debug!(
                    "{}: holding back {} frame for {:04}-{:02}-{:02} {:02}:{:02} until live data",
                    self.device.id, frame.kind, frame.year, month, frame.day, frame.hour, frame.minute
                );
            }
            EngineEvent::Discarded { error, .. } => {
                metrics::counter!(metric_defs::FRAMES_DISCARDED.name, "reason" => error.reason())
                    .increment(1);
                self.stats.discarded += 1;
            }
            EngineEvent::Stuck { id_count } => {
                return Err(SessionError::StuckHandshake { id_count });
            }
        }
        Ok(())
    }

    fn publish<S: ReadingSink>(&mut self, frame: &DataFrame, publisher: &Publisher, sink: &mut S) {
        let month = self.sanitize_month(frame);
        debug!(
            "{}: {} {:04}-{:02}-{:02} {:02}:{:02} cost={:.2}",
            self.device.id,
            frame.kind,
            frame.year,
            month,
            frame.day,
            frame.hour,
            frame.minute,
            frame.cost()
        );

        let reading = Reading::from_frame(frame, publisher.voltage, Utc::now());
        let payload = match ReadingMessage::new(&reading, &publisher.origin).to_json() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("{}: cannot encode reading: {}", self.device.id, e);
                return;
            }
        };
        info!("{}", String::from_utf8_lossy(&payload));

        match sink.publish(&publisher.topic, payload) {
            Ok(()) => {
                metrics::counter!(metric_defs::READINGS_PUBLISHED.name).increment(1);
                self.stats.published += 1;
            }
            Err(e) => warn!("{}: publish failed: {}", self.device.id, e),
        }
    }

    /// Month from the frame, or the last good one if the device sent garbage.
    fn sanitize_month(&mut self, frame: &DataFrame) -> u8 {
        if frame.has_valid_month() {
            self.last_valid_month = Some(frame.month);
            frame.month
        } else {
            self.last_valid_month.unwrap_or(frame.month)
        }
    }

    /// Release the device.
    pub fn close(&mut self) -> Result<(), SessionError> {
        self.transport.close()?;
        Ok(())
    }

    /// The device this session owns.
    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    /// Whether the native driver was detached on open.
    pub fn kernel_driver_detached(&self) -> bool {
        self.transport.kernel_driver_detached()
    }

    /// Frame engine state.
    pub fn engine(&self) -> &FrameEngine {
        &self.engine
    }

    /// Session counters.
    pub fn stats(&self) -> SessionStats {
        self.stats
    }
}
