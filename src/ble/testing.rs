//! In-memory link used by the unit tests.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::ble::link::{Connector, DeviceAddress, Link, NotificationStream};
use crate::ble::uuids::{NOTIFY_CHARACTERISTIC_UUID, WRITE_CHARACTERISTIC_UUID};
use crate::error::{Error, Result};

/// Route library logs to the test harness. Filter with `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

#[derive(Default)]
struct FakeState {
    link_up: bool,
    subscribed: bool,
    connect_failures: u32,
    connects: u32,
    disconnects: u32,
    fail_writes: bool,
    fail_subscribe: bool,
    connect_delay: Option<Duration>,
    writes: Vec<Vec<u8>>,
    notify_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    responder: Option<Responder>,
}

/// A scripted peripheral. Writes are recorded and answered by the responder.
pub(crate) struct FakeLink {
    characteristics: Vec<Uuid>,
    state: Mutex<FakeState>,
}

impl FakeLink {
    /// A peripheral exposing both meter characteristics and never answering.
    pub(crate) fn meter() -> Self {
        Self::with_characteristics(vec![WRITE_CHARACTERISTIC_UUID, NOTIFY_CHARACTERISTIC_UUID])
    }

    /// A peripheral that answers every write with `response`.
    pub(crate) fn answering(response: Vec<u8>) -> Self {
        let link = Self::meter();
        link.respond_with(move |_| vec![response.clone()]);
        link
    }

    pub(crate) fn with_characteristics(characteristics: Vec<Uuid>) -> Self {
        Self {
            characteristics,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub(crate) fn respond_with<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        self.state.lock().responder = Some(Box::new(responder));
    }

    pub(crate) fn fail_next_connects(&self, count: u32) {
        self.state.lock().connect_failures = count;
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    pub(crate) fn fail_subscribe(&self, fail: bool) {
        self.state.lock().fail_subscribe = fail;
    }

    /// Make `connect` bring the link up and then take `delay` to finish,
    /// like a slow service discovery.
    pub(crate) fn slow_connect(&self, delay: Option<Duration>) {
        self.state.lock().connect_delay = delay;
    }

    /// Deliver an unsolicited notification.
    pub(crate) fn push_notification(&self, chunk: Vec<u8>) {
        if let Some(tx) = &self.state.lock().notify_tx {
            let _ = tx.unbounded_send(chunk);
        }
    }

    /// Simulate the peripheral going away.
    pub(crate) fn drop_link(&self) {
        let mut state = self.state.lock();
        state.link_up = false;
        state.notify_tx = None;
    }

    pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    pub(crate) fn is_subscribed(&self) -> bool {
        self.state.lock().subscribed
    }

    pub(crate) fn is_link_up(&self) -> bool {
        self.state.lock().link_up
    }

    pub(crate) fn connect_count(&self) -> u32 {
        self.state.lock().connects
    }

    pub(crate) fn disconnect_count(&self) -> u32 {
        self.state.lock().disconnects
    }
}

#[async_trait]
impl Link for FakeLink {
    async fn connect(&self) -> Result<()> {
        let delay = {
            let mut state = self.state.lock();
            state.connects += 1;
            if state.connect_failures > 0 {
                state.connect_failures -= 1;
                return Err(Error::ConnectionFailed {
                    reason: "scripted failure".to_string(),
                });
            }
            state.link_up = true;
            state.connect_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn characteristics(&self) -> Result<Vec<Uuid>> {
        Ok(self.characteristics.clone())
    }

    async fn subscribe(&self, _characteristic: Uuid) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_subscribe {
            return Err(Error::Internal("scripted subscribe failure".to_string()));
        }
        state.subscribed = true;
        Ok(())
    }

    async fn unsubscribe(&self, _characteristic: Uuid) -> Result<()> {
        self.state.lock().subscribed = false;
        Ok(())
    }

    async fn notifications(&self, _characteristic: Uuid) -> Result<NotificationStream> {
        let (tx, rx) = mpsc::unbounded();
        self.state.lock().notify_tx = Some(tx);
        Ok(rx.boxed())
    }

    async fn write(&self, _characteristic: Uuid, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if !state.link_up {
            return Err(Error::NotConnected);
        }
        if state.fail_writes {
            return Err(Error::Internal("scripted write failure".to_string()));
        }
        state.writes.push(data.to_vec());

        let chunks = match state.responder.as_mut() {
            Some(responder) => responder(data),
            None => Vec::new(),
        };
        if let Some(tx) = &state.notify_tx {
            for chunk in chunks {
                let _ = tx.unbounded_send(chunk);
            }
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().link_up
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.link_up = false;
        state.disconnects += 1;
        state.notify_tx = None;
        Ok(())
    }
}

/// Hands out the same [`FakeLink`] on every lookup.
pub(crate) struct FakeConnector {
    link: Arc<FakeLink>,
    lookups: AtomicU32,
}

impl FakeConnector {
    pub(crate) fn new(link: Arc<FakeLink>) -> Self {
        init_tracing();
        Self {
            link,
            lookups: AtomicU32::new(0),
        }
    }

    pub(crate) fn lookups(&self) -> u32 {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn locate(&self, _address: &DeviceAddress, _timeout: Duration) -> Result<Arc<dyn Link>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.link.clone())
    }
}
