//! Discovery, polling and teardown of device sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::metrics::metric_defs;
use crate::session::{DeviceSession, Publisher};
use crate::sink::ReadingSink;
use crate::transport::{DeviceId, UsbBus};

/// Granularity of idle sleeps, so shutdown is noticed promptly.
const IDLE_STEP: Duration = Duration::from_millis(100);

/// Timing of the manager loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Timeout of each bulk read.
    pub read_timeout: Duration,
    /// Pause before rescanning when no device is attached.
    pub idle_delay: Duration,
    /// How often to look for more devices while some are attached.
    pub discovery_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            read_timeout: Duration::from_millis(2000),
            idle_delay: Duration::from_secs(2),
            discovery_interval: Duration::from_secs(5),
        }
    }
}

/// Owns every device session and drives them from one loop.
pub struct SessionManager<B: UsbBus, S: ReadingSink> {
    bus: B,
    sink: S,
    publisher: Publisher,
    sessions: HashMap<DeviceId, DeviceSession<B::Transport>>,
    config: ManagerConfig,
    running: Arc<AtomicBool>,
    last_discovery: Option<Instant>,
}

impl<B: UsbBus, S: ReadingSink> SessionManager<B, S> {
    /// Create a manager with no sessions.
    pub fn new(bus: B, sink: S, publisher: Publisher, config: ManagerConfig) -> Self {
        SessionManager {
            bus,
            sink,
            publisher,
            sessions: HashMap::new(),
            config,
            running: Arc::new(AtomicBool::new(true)),
            last_discovery: None,
        }
    }

    /// Flag that keeps [`run`](Self::run) going. Clear it to stop.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Poll devices until the running flag is cleared, then close them all.
    pub fn run(&mut self) {
        info!("looking for CM160 devices");
        while self.is_running() {
            if self.sessions.is_empty() || self.discovery_due() {
                self.discover();
            }
            if self.sessions.is_empty() {
                self.idle();
                continue;
            }
            self.poll_once();
        }
        self.shutdown();
    }

    fn discovery_due(&self) -> bool {
        self.last_discovery
            .map_or(true, |at| at.elapsed() >= self.config.discovery_interval)
    }

    fn idle(&self) {
        let deadline = Instant::now() + self.config.idle_delay;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(IDLE_STEP.min(deadline - now));
        }
    }

    /// Open a session on every matching device not already owned.
    ///
    /// Returns the number of sessions opened.
    pub fn discover(&mut self) -> usize {
        self.last_discovery = Some(Instant::now());
        let devices = match self.bus.scan() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("device scan failed: {}", e);
                return 0;
            }
        };

        let mut opened = 0;
        for device in devices {
            if !self.is_running() {
                break;
            }
            if self.sessions.contains_key(&device.id) {
                continue;
            }
            match self.bus.open(&device) {
                Ok(transport) => {
                    info!("{}: CM160 attached", device.id);
                    metrics::counter!(metric_defs::SESSIONS_OPENED.name).increment(1);
                    self.sessions
                        .insert(device.id, DeviceSession::new(device, transport));
                    opened += 1;
                }
                Err(e) => warn!("{}: cannot open device: {}", device.id, e),
            }
        }
        self.update_active();
        opened
    }

    /// Give every session one bounded read, tearing down those that fail.
    pub fn poll_once(&mut self) {
        let mut ids: Vec<DeviceId> = self.sessions.keys().copied().collect();
        ids.sort();

        for id in ids {
            if !self.is_running() {
                break;
            }
            let result = match self.sessions.get_mut(&id) {
                Some(session) => session.poll(&self.publisher, &mut self.sink, self.config.read_timeout),
                None => continue,
            };
            if let Err(error) = result {
                if let Some(session) = self.sessions.remove(&id) {
                    self.teardown(session, error);
                }
            }
        }
    }

    fn teardown(&mut self, mut session: DeviceSession<B::Transport>, error: SessionError) {
        let device = session.device().clone();
        warn!("{}: closing session: {}", device.id, error);
        if let Err(e) = session.close() {
            warn!("{}: error during close: {}", device.id, e);
        }
        drop(session);

        if error.needs_line_reset() {
            if let Err(e) = self.bus.reset_line(&device) {
                warn!("{}: serial line reset failed: {}", device.id, e);
            }
        }

        metrics::counter!(metric_defs::SESSIONS_CLOSED.name, "reason" => error.reason()).increment(1);
        self.update_active();
    }

    /// Close every remaining session.
    pub fn shutdown(&mut self) {
        for (id, mut session) in self.sessions.drain() {
            debug!("{}: shutting down", id);
            if let Err(e) = session.close() {
                warn!("{}: error during close: {}", id, e);
            }
            metrics::counter!(metric_defs::SESSIONS_CLOSED.name, "reason" => "shutdown").increment(1);
        }
        self.update_active();
    }

    fn update_active(&self) {
        metrics::gauge!(metric_defs::SESSIONS_ACTIVE.name).set(self.sessions.len() as f64);
    }

    /// Number of attached devices.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether a session owns the device.
    pub fn is_attached(&self, id: DeviceId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Session for a device.
    pub fn session(&self, id: DeviceId) -> Option<&DeviceSession<B::Transport>> {
        self.sessions.get(&id)
    }

    /// The reading sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// The reading sink, mutably.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// The device bus.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Close all sessions and hand back the sink.
    pub fn into_sink(mut self) -> S {
        self.shutdown();
        self.sink
    }
}
