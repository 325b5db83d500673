//! Request/response session over a connected meter.
//!
//! A [`Session`] owns the link to one meter, the bound write/notify
//! characteristics and the response buffer that notifications are collected
//! into. Only one request may wait for a response at a time.

use bytes::BytesMut;
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::ble::connection::{ConnectionEvent, ConnectionState};
use crate::ble::link::{Connector, DeviceAddress, Link};
use crate::ble::uuids::{NOTIFY_CHARACTERISTIC_UUID, WRITE_CHARACTERISTIC_UUID};
use crate::error::{Error, Result};
use crate::protocol::{CommandFrame, ResponseFrame};

/// Default time to wait for a response to a request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Default delay between connection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Default time to look for the device on each connection attempt.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// The characteristics bound for the lifetime of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicHandles {
    /// Characteristic commands are written to.
    pub write: uuid::Uuid,
    /// Characteristic responses arrive on.
    pub notify: uuid::Uuid,
}

impl CharacteristicHandles {
    /// Bind the meter's handles from a discovered characteristic list.
    ///
    /// Fails with [`Error::MissingCharacteristics`] naming whichever of the
    /// two is absent.
    pub fn bind(discovered: &[uuid::Uuid]) -> Result<Self> {
        let missing: Vec<String> = [WRITE_CHARACTERISTIC_UUID, NOTIFY_CHARACTERISTIC_UUID]
            .iter()
            .filter(|uuid| !discovered.contains(uuid))
            .map(|uuid| uuid.to_string())
            .collect();

        if !missing.is_empty() {
            return Err(Error::MissingCharacteristics {
                missing: missing.join(", "),
            });
        }

        Ok(Self {
            write: WRITE_CHARACTERISTIC_UUID,
            notify: NOTIFY_CHARACTERISTIC_UUID,
        })
    }
}

/// Retry and timing parameters for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Delay between connection attempts.
    pub retry_delay: Duration,
    /// How long each attempt looks for the device.
    pub lookup_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }
}

/// Everything that only exists while connected.
struct ActiveLink {
    link: Arc<dyn Link>,
    handles: CharacteristicHandles,
    listener: JoinHandle<()>,
    epoch: u64,
}

/// Connection state and the active link, kept together so that the handles
/// exist exactly while the state is `Connected`.
struct Inner {
    state: ConnectionState,
    active: Option<ActiveLink>,
}

/// Buffer notifications are collected into while a request waits.
#[derive(Default)]
struct ResponseSlot {
    /// Set while a request is waiting; chunks arriving otherwise are dropped.
    armed: bool,
    /// Sequence number of the waiting request.
    request_id: u64,
    data: BytesMut,
}

/// State shared with the notification listener task.
struct Shared {
    inner: RwLock<Inner>,
    slot: Mutex<ResponseSlot>,
    signal: Notify,
    event_tx: broadcast::Sender<ConnectionEvent>,
    address: DeviceAddress,
}

impl Shared {
    /// Update the connection state and emit an event.
    fn set_state(&self, new_state: ConnectionState) {
        let old_state = std::mem::replace(&mut self.inner.write().state, new_state);
        self.emit(old_state, new_state);
    }

    fn emit(&self, old_state: ConnectionState, new_state: ConnectionState) {
        if old_state != new_state {
            debug!("Connection state changed: {} -> {}", old_state, new_state);

            let _ = self.event_tx.send(ConnectionEvent {
                identifier: self.address.to_string(),
                state: new_state,
            });
        }
    }

    /// Append a notification chunk if a request is waiting for it.
    fn deliver(&self, chunk: &[u8]) {
        {
            let mut slot = self.slot.lock();
            if !slot.armed {
                debug!(
                    "Dropping {} byte notification with no request waiting: {:02X?}",
                    chunk.len(),
                    chunk
                );
                return;
            }
            trace!(
                "Notification for request #{}: {} bytes {:02X?}",
                slot.request_id,
                chunk.len(),
                chunk
            );
            slot.data.extend_from_slice(chunk);
        }
        self.signal.notify_waiters();
    }

    /// The notification stream of connection `epoch` ended.
    fn link_lost(&self, epoch: u64) {
        let old_state = {
            let mut inner = self.inner.write();
            match &inner.active {
                Some(active) if active.epoch == epoch => {}
                _ => return,
            }
            inner.active = None;
            std::mem::replace(&mut inner.state, ConnectionState::Disconnected)
        };

        warn!("Notification stream from {} ended, link lost", self.address);
        self.emit(old_state, ConnectionState::Disconnected);
        self.signal.notify_waiters();
    }
}

/// Clears the in-flight flag and disarms the response slot when a request
/// finishes or is cancelled.
struct InFlight<'a> {
    flag: &'a AtomicBool,
    slot: &'a Mutex<ResponseSlot>,
}

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool, slot: &'a Mutex<ResponseSlot>) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::RequestInFlight)?;
        Ok(Self { flag, slot })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.slot.lock().armed = false;
        self.flag.store(false, Ordering::Release);
    }
}

/// Resets a `Connecting` state left behind by a cancelled `connect`.
struct ConnectAttempt<'a> {
    shared: &'a Shared,
    settled: bool,
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let old_state = {
            let mut inner = self.shared.inner.write();
            if inner.state != ConnectionState::Connecting {
                return;
            }
            std::mem::replace(&mut inner.state, ConnectionState::Disconnected)
        };
        debug!("Connect to {} cancelled", self.shared.address);
        self.shared.emit(old_state, ConnectionState::Disconnected);
    }
}

/// Closes a link that never made it into the session.
///
/// Disarmed once the attempt either succeeds or has closed the link itself.
struct PendingLink {
    link: Option<Arc<dyn Link>>,
}

impl PendingLink {
    fn new(link: Arc<dyn Link>) -> Self {
        Self { link: Some(link) }
    }

    fn disarm(mut self) {
        self.link = None;
    }
}

impl Drop for PendingLink {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            close_in_background(link);
        }
    }
}

/// Close `link` if it is still up.
async fn close_link(link: &dyn Link) {
    if link.is_connected().await {
        if let Err(e) = link.disconnect().await {
            warn!("Failed to disconnect: {}", e);
        }
    }
}

/// Close `link` from a synchronous context. Needs a running tokio runtime.
fn close_in_background(link: Arc<dyn Link>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { close_link(link.as_ref()).await });
        }
        Err(_) => warn!("No runtime to close abandoned link on"),
    }
}

/// A request/response session with one meter.
pub struct Session {
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    shared: Arc<Shared>,
    in_flight: AtomicBool,
    request_counter: AtomicU64,
    epoch_counter: AtomicU64,
}

impl Session {
    /// Create a disconnected session for the meter at `address`.
    pub fn new(connector: Arc<dyn Connector>, address: DeviceAddress, config: SessionConfig) -> Self {
        let (event_tx, _) = broadcast::channel(16);

        Self {
            connector,
            config,
            shared: Arc::new(Shared {
                inner: RwLock::new(Inner {
                    state: ConnectionState::Disconnected,
                    active: None,
                }),
                slot: Mutex::new(ResponseSlot::default()),
                signal: Notify::new(),
                event_tx,
                address,
            }),
            in_flight: AtomicBool::new(false),
            request_counter: AtomicU64::new(0),
            epoch_counter: AtomicU64::new(0),
        }
    }

    /// The address this session connects to.
    pub fn address(&self) -> &DeviceAddress {
        &self.shared.address
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.read().state
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// The bound characteristics, present only while connected.
    pub fn handles(&self) -> Option<CharacteristicHandles> {
        self.shared.inner.read().active.as_ref().map(|a| a.handles)
    }

    /// Subscribe to connection state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Connect, making up to `max_retries` attempts.
    ///
    /// Each attempt looks the device up, connects, binds the characteristics
    /// and subscribes to notifications. Attempts are separated by
    /// [`SessionConfig::retry_delay`]. When every attempt fails the session
    /// is left in [`ConnectionState::Failed`].
    pub async fn connect(&self, max_retries: u32) -> Result<()> {
        let current_state = self.state();

        if current_state.is_connected() {
            debug!("Already connected");
            return Ok(());
        }

        if current_state.is_transitioning() {
            return Err(Error::ConnectionFailed {
                reason: "Connection already in progress".to_string(),
            });
        }

        self.shared.set_state(ConnectionState::Connecting);
        let mut attempt = ConnectAttempt {
            shared: &self.shared,
            settled: false,
        };

        let max_attempts = max_retries.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!("Connection attempt {} of {}", attempts, max_attempts);

            match self.try_connect().await {
                Ok(active) => {
                    let old_state = {
                        let mut inner = self.shared.inner.write();
                        inner.active = Some(active);
                        std::mem::replace(&mut inner.state, ConnectionState::Connected)
                    };
                    attempt.settled = true;
                    self.shared.emit(old_state, ConnectionState::Connected);

                    info!("Connected to {}", self.shared.address);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Connection attempt {}/{} failed: {}",
                        attempts, max_attempts, e
                    );

                    if attempts >= max_attempts {
                        self.shared.set_state(ConnectionState::Failed);
                        attempt.settled = true;
                        return Err(Error::RetriesExhausted {
                            attempts,
                            last: Box::new(e),
                        });
                    }

                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    /// One connection attempt.
    ///
    /// A link that was located but not fully set up is closed again, both
    /// when a step fails and when the attempt is cancelled.
    async fn try_connect(&self) -> Result<ActiveLink> {
        let link = self
            .connector
            .locate(&self.shared.address, self.config.lookup_timeout)
            .await?;

        let pending = PendingLink::new(link.clone());
        match self.establish(link.clone()).await {
            Ok(active) => {
                pending.disarm();
                Ok(active)
            }
            Err(e) => {
                close_link(link.as_ref()).await;
                pending.disarm();
                Err(e)
            }
        }
    }

    /// Connect, bind and subscribe on a located link.
    async fn establish(&self, link: Arc<dyn Link>) -> Result<ActiveLink> {
        link.connect().await?;

        let discovered = link.characteristics().await?;
        let handles = CharacteristicHandles::bind(&discovered)?;

        debug!("Subscribing to {}", handles.notify);
        link.subscribe(handles.notify).await?;
        let mut notifications = link.notifications(handles.notify).await?;

        // No await past this point, so the listener is never orphaned.
        let epoch = self.epoch_counter.fetch_add(1, Ordering::SeqCst);
        let shared = self.shared.clone();

        let listener = tokio::spawn(async move {
            debug!("Notification listener started");
            while let Some(chunk) = notifications.next().await {
                shared.deliver(&chunk);
            }
            shared.link_lost(epoch);
        });

        Ok(ActiveLink {
            link,
            handles,
            listener,
            epoch,
        })
    }

    /// Write `frame` and wait up to `timeout` for a response.
    ///
    /// Returns `Ok(None)` when nothing arrives in time. The device-side
    /// operation is not cancelled, only the wait.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] when there is no active link.
    /// - [`Error::RequestInFlight`] when another request is still waiting.
    /// - Transport errors from the write itself.
    pub async fn request(
        &self,
        frame: &CommandFrame,
        timeout: Duration,
    ) -> Result<Option<ResponseFrame>> {
        let _in_flight = InFlight::acquire(&self.in_flight, &self.shared.slot)?;

        let (link, handles) = {
            let inner = self.shared.inner.read();
            let active = inner.active.as_ref().ok_or(Error::NotConnected)?;
            (active.link.clone(), active.handles)
        };

        let request_id = self.request_counter.fetch_add(1, Ordering::Relaxed);

        {
            let mut slot = self.shared.slot.lock();
            slot.armed = true;
            slot.request_id = request_id;
            slot.data.clear();
        }

        let notified = self.shared.signal.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        trace!("Request #{}: {:02X?}", request_id, frame.as_bytes());
        link.write(handles.write, frame.as_bytes()).await?;

        let outcome = tokio::time::timeout(timeout, notified).await;

        let data = {
            let mut slot = self.shared.slot.lock();
            slot.armed = false;
            slot.data.split().freeze()
        };

        if outcome.is_err() {
            debug!("Request #{} timed out after {:?}", request_id, timeout);
            return Ok(None);
        }

        if data.is_empty() && !self.is_connected() {
            return Err(Error::NotConnected);
        }

        Ok(Some(ResponseFrame::new(data)))
    }

    /// Close the connection.
    ///
    /// Best-effort: failures to unsubscribe or disconnect are logged, not
    /// returned. Does nothing when there is no active link, so a `Failed`
    /// state stays visible.
    pub async fn disconnect(&self) {
        let (active, old_state) = {
            let mut inner = self.shared.inner.write();
            let Some(active) = inner.active.take() else {
                return;
            };
            let old_state = std::mem::replace(&mut inner.state, ConnectionState::Disconnecting);
            (active, old_state)
        };

        self.shared.emit(old_state, ConnectionState::Disconnecting);

        if let Err(e) = active.link.unsubscribe(active.handles.notify).await {
            warn!("Failed to unsubscribe from {}: {}", active.handles.notify, e);
        }

        active.listener.abort();
        close_link(active.link.as_ref()).await;

        self.shared.set_state(ConnectionState::Disconnected);
        info!("Disconnected from {}", self.shared.address);
    }
}

/// Dropping a connected session stops the listener and closes the link in
/// the background. Call [`Session::disconnect`] to wait for the close.
impl Drop for Session {
    fn drop(&mut self) {
        if let Some(active) = self.shared.inner.write().active.take() {
            active.listener.abort();
            close_in_background(active.link);
        }
    }
}
