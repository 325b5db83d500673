//! Background acquisition of readings.
//!
//! The [`Poller`] owns one tokio task that repeatedly sends the data-read
//! command through a [`Session`], decodes the response and publishes the
//! resulting [`Reading`]. Per-read timeouts are expected and simply skipped;
//! any other fault stops the loop in [`PollerState::Errored`] until the
//! caller starts it again.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::ble::session::Session;
use crate::data::Reading;
use crate::error::{Error, Result};
use crate::protocol::{decode, CommandFrame};

/// How often `stop` checks whether the loop has finished.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Sink for decoded values: `(value, unit, mode)`.
pub type DataCallback = Arc<dyn Fn(f64, &str, &str) + Send + Sync>;

/// Lifecycle of the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PollerState {
    /// Never started.
    #[default]
    Idle,
    /// The loop is acquiring readings.
    Running,
    /// A stop was requested and the loop has not noticed yet.
    Stopping,
    /// The loop ended normally.
    Stopped,
    /// The loop hit an unexpected fault and ended.
    Errored,
}

impl PollerState {
    /// Whether the loop task is alive.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Stopping)
    }
}

impl std::fmt::Display for PollerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Errored => write!(f, "Errored"),
        }
    }
}

/// The most recent reading with a value, and when it arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestReading {
    /// The decoded reading.
    pub reading: Reading,
    /// When it was received.
    pub received_at: DateTime<Utc>,
}

/// Poll timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Pause between iterations.
    pub interval: Duration,
    /// Time to wait for each read response.
    pub request_timeout: Duration,
}

/// State shared between the handle and the loop task.
struct PollerShared {
    state: RwLock<PollerState>,
    stop_requested: AtomicBool,
    wake: Notify,
    latest: RwLock<Option<LatestReading>>,
    callback: RwLock<Option<DataCallback>>,
    reading_tx: broadcast::Sender<Reading>,
    last_fault: RwLock<Option<String>>,
}

impl PollerShared {
    fn set_state(&self, new_state: PollerState) {
        let old_state = std::mem::replace(&mut *self.state.write(), new_state);
        if old_state != new_state {
            debug!("Poller state changed: {} -> {}", old_state, new_state);
        }
    }

    /// Store and publish a reading that carries a value.
    fn publish(&self, reading: Reading) -> Result<()> {
        let Some(value) = reading.value else {
            return Ok(());
        };

        *self.latest.write() = Some(LatestReading {
            reading: reading.clone(),
            received_at: Utc::now(),
        });

        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            catch_unwind(AssertUnwindSafe(|| {
                (*callback)(value, &reading.unit, &reading.mode)
            }))
            .map_err(|_| Error::PollerFaulted {
                reason: "data callback panicked".to_string(),
            })?;
        }

        let _ = self.reading_tx.send(reading);
        Ok(())
    }

    fn fault(&self, err: Error) {
        error!("Poll loop faulted: {}", err);
        *self.last_fault.write() = Some(err.to_string());
        self.set_state(PollerState::Errored);
    }
}

/// Periodically reads the meter through a [`Session`].
pub struct Poller {
    session: Arc<Session>,
    config: PollerConfig,
    shared: Arc<PollerShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    /// Create an idle poller.
    pub fn new(session: Arc<Session>, config: PollerConfig) -> Self {
        let (reading_tx, _) = broadcast::channel(64);

        Self {
            session,
            config,
            shared: Arc::new(PollerShared {
                state: RwLock::new(PollerState::Idle),
                stop_requested: AtomicBool::new(false),
                wake: Notify::new(),
                latest: RwLock::new(None),
                callback: RwLock::new(None),
                reading_tx,
                last_fault: RwLock::new(None),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Current loop state.
    pub fn state(&self) -> PollerState {
        *self.shared.state.read()
    }

    /// Whether the loop is acquiring readings.
    pub fn is_running(&self) -> bool {
        self.state() == PollerState::Running
    }

    /// Description of the fault that last stopped the loop, if any.
    pub fn last_fault(&self) -> Option<String> {
        self.shared.last_fault.read().clone()
    }

    /// The last reading with a value. Never blocks.
    pub fn latest(&self) -> Option<LatestReading> {
        self.shared.latest.read().clone()
    }

    /// Register the sink invoked with every reading that has a value.
    pub fn set_callback(&self, callback: DataCallback) {
        *self.shared.callback.write() = Some(callback);
    }

    /// Remove the registered sink.
    pub fn clear_callback(&self) {
        *self.shared.callback.write() = None;
    }

    /// Subscribe to readings.
    pub fn subscribe(&self) -> broadcast::Receiver<Reading> {
        self.shared.reading_tx.subscribe()
    }

    /// Start the loop.
    ///
    /// Does nothing if it is already running. A poller that stopped or
    /// faulted can be started again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the session is not connected.
    pub fn start(&self) -> Result<()> {
        let mut handle = self.handle.lock();

        if self.state().is_active() {
            debug!("Poller already running");
            return Ok(());
        }

        if !self.session.is_connected() {
            return Err(Error::NotConnected);
        }

        self.shared.stop_requested.store(false, Ordering::SeqCst);
        *self.shared.last_fault.write() = None;
        self.shared.set_state(PollerState::Running);

        info!(
            "Starting poller: interval={:?} timeout={:?}",
            self.config.interval, self.config.request_timeout
        );

        let session = self.session.clone();
        let shared = self.shared.clone();
        let config = self.config;

        *handle = Some(tokio::spawn(Self::run(session, shared, config)));

        Ok(())
    }

    /// The poll loop.
    async fn run(session: Arc<Session>, shared: Arc<PollerShared>, config: PollerConfig) {
        let frame = CommandFrame::read_data();

        loop {
            if shared.stop_requested.load(Ordering::SeqCst) {
                break;
            }

            if !session.is_connected() {
                warn!("Connection lost, stopping poller");
                break;
            }

            match session.request(&frame, config.request_timeout).await {
                Ok(Some(response)) => {
                    let reading = decode(response.as_bytes());
                    if reading.is_present() {
                        trace!("Poll: {}", reading);
                    } else {
                        debug!("Undecodable response: {}", response);
                    }
                    if let Err(e) = shared.publish(reading) {
                        shared.fault(e);
                        return;
                    }
                }
                Ok(None) => {
                    trace!("Poll timed out");
                }
                Err(Error::RequestInFlight) => {
                    debug!("Meter busy with another request, skipping poll");
                }
                Err(e) if e.is_disconnect() => {
                    warn!("Connection lost, stopping poller");
                    break;
                }
                Err(e) => {
                    shared.fault(e);
                    return;
                }
            }

            // Register for the wake-up before checking the flag so a stop
            // issued in between is not missed.
            let wake = shared.wake.notified();
            tokio::pin!(wake);
            wake.as_mut().enable();

            if shared.stop_requested.load(Ordering::SeqCst) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(config.interval) => {}
                _ = wake => {}
            }
        }

        shared.set_state(PollerState::Stopped);
        debug!("Poll loop ended");
    }

    /// Stop the loop and disconnect the session.
    ///
    /// Waits until the loop notices the request, which takes at most one
    /// poll interval plus one request timeout. Returns the final state:
    /// `Stopped`, or `Errored` if the loop had already faulted.
    pub async fn stop(&self) -> PollerState {
        let handle = self.handle.lock().take();

        self.shared.stop_requested.store(true, Ordering::SeqCst);
        {
            let mut state = self.shared.state.write();
            if *state == PollerState::Running {
                *state = PollerState::Stopping;
            }
        }
        self.shared.wake.notify_waiters();

        while self.state().is_active() {
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Poll task ended abnormally: {}", e);
            }
        }

        self.session.disconnect().await;

        let state = self.state();
        info!("Poller stopped ({})", state);
        state
    }
}

/// Dropping a poller ends the loop at its next iteration but leaves the
/// session connected.
impl Drop for Poller {
    fn drop(&mut self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        self.shared.wake.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::connection::ConnectionState;
    use crate::ble::link::DeviceAddress;
    use crate::ble::session::SessionConfig;
    use crate::ble::testing::{FakeConnector, FakeLink};
    use pretty_assertions::assert_eq;

    /// DC voltage, scale 0.1, magnitude 1234.
    fn sample_response() -> Vec<u8> {
        vec![
            0xDF, 0x05, 0x03, 0x09, 0x00, 0x30, 0x00, 0x18, 0x00, 0x00, 0x00, 0x00, 0xD2, 0x04,
            0x00,
        ]
    }

    const CONFIG: PollerConfig = PollerConfig {
        interval: Duration::from_millis(200),
        request_timeout: Duration::from_millis(100),
    };

    async fn connected(link: Arc<FakeLink>) -> Arc<Session> {
        let session = Arc::new(Session::new(
            Arc::new(FakeConnector::new(link)),
            DeviceAddress::new("AA:BB:CC:DD:EE:FF"),
            SessionConfig::default(),
        ));
        session.connect(1).await.unwrap();
        session
    }

    async fn wait_for_state(poller: &Poller, state: PollerState) {
        for _ in 0..100 {
            if poller.state() == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("poller never reached {state}, still {}", poller.state());
    }

    #[test]
    fn test_poller_state_display() {
        assert_eq!(PollerState::default(), PollerState::Idle);
        assert_eq!(PollerState::Errored.to_string(), "Errored");
        assert!(PollerState::Stopping.is_active());
        assert!(!PollerState::Stopped.is_active());
    }

    #[tokio::test]
    async fn test_start_requires_connection() {
        let link = Arc::new(FakeLink::meter());
        let session = Arc::new(Session::new(
            Arc::new(FakeConnector::new(link)),
            DeviceAddress::new("AA:BB:CC:DD:EE:FF"),
            SessionConfig::default(),
        ));
        let poller = Poller::new(session, CONFIG);

        assert!(matches!(poller.start(), Err(Error::NotConnected)));
        assert_eq!(poller.state(), PollerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_publishes_readings() {
        let link = Arc::new(FakeLink::answering(sample_response()));
        let session = connected(link.clone()).await;
        let poller = Poller::new(session, CONFIG);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        poller.set_callback(Arc::new(move |value: f64, unit: &str, mode: &str| {
            sink.lock().push((value, unit.to_string(), mode.to_string()));
        }));
        let mut readings = poller.subscribe();

        poller.start().unwrap();
        assert!(poller.is_running());

        let reading = readings.recv().await.unwrap();
        assert_eq!(reading, Reading::new(123.4, "mV", "DC Voltage"));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(seen.lock().len() >= 2);
        assert_eq!(
            seen.lock()[0],
            (123.4, "mV".to_string(), "DC Voltage".to_string())
        );

        let latest = poller.latest().expect("latest reading");
        assert_eq!(latest.reading.value, Some(123.4));

        for write in link.writes() {
            assert_eq!(write, CommandFrame::read_data().as_bytes());
        }

        assert_eq!(poller.stop().await, PollerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_do_not_stop_polling() {
        let link = Arc::new(FakeLink::meter());
        let session = connected(link.clone()).await;
        let poller = Poller::new(session, CONFIG);

        poller.start().unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(poller.state(), PollerState::Running);
        assert!(link.writes().len() >= 3);
        assert!(poller.latest().is_none());

        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_responses_are_skipped() {
        let link = Arc::new(FakeLink::answering(vec![0xDF, 0x05]));
        let session = connected(link.clone()).await;
        let poller = Poller::new(session, CONFIG);

        let calls = Arc::new(Mutex::new(0u32));
        let counter = calls.clone();
        poller.set_callback(Arc::new(move |_: f64, _: &str, _: &str| *counter.lock() += 1));

        poller.start().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(poller.state(), PollerState::Running);
        assert_eq!(*calls.lock(), 0);
        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_bounded_and_disconnects() {
        let link = Arc::new(FakeLink::meter());
        let session = connected(link.clone()).await;
        let poller = Poller::new(session.clone(), CONFIG);

        poller.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = tokio::time::Instant::now();
        let state = poller.stop().await;
        let elapsed = started.elapsed();

        assert_eq!(state, PollerState::Stopped);
        assert!(
            elapsed <= CONFIG.interval + CONFIG.request_timeout + STOP_POLL_INTERVAL,
            "stop took {elapsed:?}"
        );
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!link.is_link_up());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_fault_is_fail_stop() {
        let link = Arc::new(FakeLink::answering(sample_response()));
        let session = connected(link.clone()).await;
        let poller = Poller::new(session.clone(), CONFIG);

        link.fail_writes(true);
        poller.start().unwrap();
        wait_for_state(&poller, PollerState::Errored).await;

        let writes_at_fault = link.writes().len();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(poller.state(), PollerState::Errored);
        assert_eq!(link.writes().len(), writes_at_fault);
        assert!(poller.last_fault().is_some());

        // Explicit restart recovers.
        link.fail_writes(false);
        poller.start().unwrap();
        assert_eq!(poller.state(), PollerState::Running);
        let mut readings = poller.subscribe();
        assert!(readings.recv().await.is_ok());
        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_callback_faults_poller() {
        let link = Arc::new(FakeLink::answering(sample_response()));
        let session = connected(link).await;
        let poller = Poller::new(session, CONFIG);

        poller.set_callback(Arc::new(|_: f64, _: &str, _: &str| panic!("consumer bug")));
        poller.start().unwrap();
        wait_for_state(&poller, PollerState::Errored).await;

        assert!(poller.last_fault().unwrap().contains("callback"));
        assert_eq!(poller.stop().await, PollerState::Errored);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stops_poller() {
        let link = Arc::new(FakeLink::meter());
        let session = connected(link.clone()).await;
        let poller = Poller::new(session, CONFIG);

        poller.start().unwrap();
        link.drop_link();
        wait_for_state(&poller, PollerState::Stopped).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_session_does_not_fault_poller() {
        let link = Arc::new(FakeLink::meter());
        let session = connected(link.clone()).await;
        let poller = Poller::new(session.clone(), CONFIG);

        poller.start().unwrap();
        // First poll times out at 100 ms; the loop then sleeps until 300 ms.
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Hold the session with a long request across several poll iterations.
        let busy = {
            let session = session.clone();
            tokio::spawn(async move {
                session
                    .request(
                        &CommandFrame::set_mode(crate::MeasurementMode::DcVoltage),
                        Duration::from_millis(700),
                    )
                    .await
            })
        };
        assert!(busy.await.unwrap().is_ok());

        assert_eq!(poller.state(), PollerState::Running);
        assert!(poller.last_fault().is_none());
        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_waits_full_interval() {
        let link = Arc::new(FakeLink::meter());
        let session = connected(link.clone()).await;
        let poller = Poller::new(session.clone(), CONFIG);

        // Stop while the loop is inside a request rather than sleeping.
        poller.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        poller.stop().await;

        session.connect(1).await.unwrap();
        let before = link.writes().len();
        poller.start().unwrap();

        // One request times out after 100 ms, the next is due at 300 ms.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(link.writes().len() - before, 1);
        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_noop() {
        let link = Arc::new(FakeLink::meter());
        let session = connected(link).await;
        let poller = Poller::new(session, CONFIG);

        poller.start().unwrap();
        poller.start().unwrap();
        assert_eq!(poller.state(), PollerState::Running);
        poller.stop().await;
    }
}
