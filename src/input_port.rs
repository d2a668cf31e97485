//! Subscriber endpoint of a signal.
//!
//! An input port is attached to at most one signal at a time. The signal
//! asks the port whether it accepts the connection, then hands it a fresh
//! [`Connection`]. On every send the port notifies its listener according to
//! its [`NotificationMode`].

use crate::config::PortConfig;
use crate::connection::Connection;
use crate::error::{DaqError, Result};
use crate::scheduler::Scheduler;
use crate::signal::Signal;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_PORT_ID: AtomicU64 = AtomicU64::new(1);

/// How `packet_received` reaches the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NotificationMode {
    /// Synchronously on the sender's thread, after the enqueue
    #[default]
    SameThread,
    /// Posted to the port's [`Scheduler`], sequential per port
    Scheduler,
    /// Not notified; the owner polls the connection
    None,
}

impl std::fmt::Display for NotificationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationMode::SameThread => write!(f, "Same thread"),
            NotificationMode::Scheduler => write!(f, "Scheduler"),
            NotificationMode::None => write!(f, "None (poll)"),
        }
    }
}

/// Callbacks from an input port to its owner.
#[cfg_attr(test, mockall::automock)]
pub trait InputPortListener: Send + Sync {
    /// Veto a connection attempt
    fn accepts_signal(&self, _port: &InputPort, _signal: &Signal) -> bool {
        true
    }

    fn connected(&self, _port: &InputPort) {}

    fn disconnected(&self, _port: &InputPort) {}

    /// One or more packets were enqueued on the port's connection
    fn packet_received(&self, port: &InputPort);
}

type AcceptFilter = Box<dyn Fn(&Signal) -> bool + Send + Sync>;

#[derive(Default)]
struct PortState {
    signal: Option<Signal>,
    connection: Option<Arc<Connection>>,
}

pub(crate) struct PortInner {
    id: u64,
    name: String,
    mode: NotificationMode,
    gap_checking: bool,
    removed: AtomicBool,
    state: Mutex<PortState>,
    listener: RwLock<Option<Arc<dyn InputPortListener>>>,
    scheduler: RwLock<Option<Arc<dyn Scheduler>>>,
    accept_filter: RwLock<Option<AcceptFilter>>,
}

/// Shared handle to an input port.
#[derive(Clone)]
pub struct InputPort {
    inner: Arc<PortInner>,
}

/// Non-owning handle held by signals.
#[derive(Clone)]
pub(crate) struct WeakInputPort(Weak<PortInner>);

impl WeakInputPort {
    pub(crate) fn upgrade(&self) -> Option<InputPort> {
        self.0.upgrade().map(|inner| InputPort { inner })
    }
}

impl InputPort {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, &PortConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: &PortConfig) -> Self {
        Self {
            inner: Arc::new(PortInner {
                id: NEXT_PORT_ID.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                mode: config.notification_mode,
                gap_checking: config.gap_checking,
                removed: AtomicBool::new(false),
                state: Mutex::new(PortState::default()),
                listener: RwLock::new(None),
                scheduler: RwLock::new(None),
                accept_filter: RwLock::new(None),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn notification_mode(&self) -> NotificationMode {
        self.inner.mode
    }

    pub fn gap_checking(&self) -> bool {
        self.inner.gap_checking
    }

    pub fn set_listener(&self, listener: Arc<dyn InputPortListener>) {
        *self.inner.listener.write() = Some(listener);
    }

    pub fn clear_listener(&self) {
        *self.inner.listener.write() = None;
    }

    /// Scheduler used in [`NotificationMode::Scheduler`]
    pub fn set_scheduler(&self, scheduler: Arc<dyn Scheduler>) {
        *self.inner.scheduler.write() = Some(scheduler);
    }

    /// Extra acceptance predicate checked alongside the listener's
    pub fn set_accept_filter(&self, filter: impl Fn(&Signal) -> bool + Send + Sync + 'static) {
        *self.inner.accept_filter.write() = Some(Box::new(filter));
    }

    /// Whether this port takes `signal`; called by the signal before connecting.
    pub fn accepts_signal(&self, signal: &Signal) -> bool {
        if self.is_removed() {
            return false;
        }
        if let Some(filter) = self.inner.accept_filter.read().as_ref() {
            if !filter(signal) {
                return false;
            }
        }
        let listener = self.inner.listener.read().clone();
        listener.map_or(true, |l| l.accepts_signal(self, signal))
    }

    /// Connect to `signal`, replacing any current connection.
    pub fn connect(&self, signal: &Signal) -> Result<()> {
        signal.connect(self)
    }

    /// Detach from the current signal.
    ///
    /// Closes the connection, which drops its queued packets and wakes any
    /// reader blocked on it with a disconnected status. The port can be
    /// connected again afterwards.
    pub fn disconnect(&self) -> Result<()> {
        let (signal, connection) = {
            let mut state = self.inner.state.lock();
            match (state.signal.take(), state.connection.take()) {
                (Some(signal), Some(connection)) => (signal, connection),
                _ => {
                    return Err(DaqError::NotConnected(self.inner.name.clone()));
                }
            }
        };

        connection.close();
        signal.detach_connection(connection.id());
        tracing::debug!(
            "Port '{}' disconnected from signal '{}'",
            self.inner.name,
            signal.name()
        );
        self.notify_disconnected();
        Ok(())
    }

    /// Permanently remove the port: disconnects it and refuses new signals.
    pub fn remove(&self) {
        if self.inner.removed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.disconnect();
        tracing::debug!("Port '{}' removed", self.inner.name);
    }

    pub fn is_removed(&self) -> bool {
        self.inner.removed.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().connection.is_some()
    }

    pub fn signal(&self) -> Option<Signal> {
        self.inner.state.lock().signal.clone()
    }

    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.inner.state.lock().connection.clone()
    }

    pub(crate) fn downgrade(&self) -> WeakInputPort {
        WeakInputPort(Arc::downgrade(&self.inner))
    }

    /// Install a connection created by `signal`. Returns the connection it
    /// replaced, if any, so the caller can close it outside the signal lock.
    pub(crate) fn attach(
        &self,
        signal: Signal,
        connection: Arc<Connection>,
    ) -> Option<(Signal, Arc<Connection>)> {
        let mut state = self.inner.state.lock();
        let previous = match (state.signal.take(), state.connection.take()) {
            (Some(s), Some(c)) => Some((s, c)),
            _ => None,
        };
        state.signal = Some(signal);
        state.connection = Some(connection);
        previous
    }

    /// Called by a signal that is being removed.
    pub(crate) fn detach_from_signal(&self, connection_id: u64) {
        let connection = {
            let mut state = self.inner.state.lock();
            match &state.connection {
                Some(c) if c.id() == connection_id => {
                    state.signal = None;
                    state.connection.take()
                }
                _ => None,
            }
        };
        if let Some(connection) = connection {
            connection.close();
            self.notify_disconnected();
        }
    }

    pub(crate) fn notify_connected(&self) {
        let listener = self.inner.listener.read().clone();
        if let Some(listener) = listener {
            listener.connected(self);
        }
    }

    fn notify_disconnected(&self) {
        let listener = self.inner.listener.read().clone();
        if let Some(listener) = listener {
            listener.disconnected(self);
        }
    }

    /// Deliver a packet notification per the port's mode.
    pub(crate) fn notify_packet_received(&self) {
        let Some(listener) = self.inner.listener.read().clone() else {
            return;
        };

        match self.inner.mode {
            NotificationMode::None => {}
            NotificationMode::SameThread => listener.packet_received(self),
            NotificationMode::Scheduler => {
                let scheduler = self.inner.scheduler.read().clone();
                match scheduler {
                    Some(scheduler) => {
                        let port = self.clone();
                        scheduler.post(
                            self.inner.id,
                            Box::new(move || listener.packet_received(&port)),
                        );
                    }
                    None => {
                        tracing::trace!(
                            "Port '{}' has no scheduler, notifying inline",
                            self.inner.name
                        );
                        listener.packet_received(self);
                    }
                }
            }
        }
    }
}

impl PartialEq for InputPort {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for InputPort {}

impl std::fmt::Debug for InputPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputPort")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("mode", &self.inner.mode)
            .field("connected", &self.is_connected())
            .field("removed", &self.is_removed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DataDescriptor;
    use crate::packet::DataPacket;
    use crate::scheduler::MockScheduler;
    use crate::sample::SampleType;
    use std::time::Duration;

    fn signal() -> Signal {
        Signal::new("sig", DataDescriptor::explicit(SampleType::Float64))
    }

    fn implicit_packet() -> DataPacket {
        DataPacket::implicit(
            Arc::new(DataDescriptor::constant(SampleType::Float64, 1.0)),
            1,
            0.0,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_listener_veto() {
        let port = InputPort::new("in");
        let mut listener = MockInputPortListener::new();
        listener.expect_accepts_signal().return_const(false);
        listener.expect_connected().never();
        port.set_listener(Arc::new(listener));

        let sig = signal();
        assert!(matches!(
            sig.connect(&port),
            Err(DaqError::SignalNotAccepted { .. })
        ));
        assert!(!port.is_connected());
    }

    #[test]
    fn test_accept_filter() {
        let port = InputPort::new("in");
        port.set_accept_filter(|s| s.name() == "wanted");
        assert!(signal().connect(&port).is_err());

        let wanted = Signal::new("wanted", DataDescriptor::explicit(SampleType::Float64));
        assert!(wanted.connect(&port).is_ok());
    }

    #[test]
    fn test_same_thread_notification() {
        let port = InputPort::new("in");
        let caller = std::thread::current().id();
        let mut listener = MockInputPortListener::new();
        listener.expect_accepts_signal().return_const(true);
        listener.expect_connected().times(1).return_const(());
        listener
            .expect_packet_received()
            .times(1)
            .returning(move |_| assert_eq!(std::thread::current().id(), caller));
        port.set_listener(Arc::new(listener));

        let sig = signal();
        sig.connect(&port).unwrap();
        sig.send_packet(implicit_packet()).unwrap();
    }

    #[test]
    fn test_scheduler_notification_posts_with_port_key() {
        let port = InputPort::with_config(
            "in",
            &PortConfig {
                notification_mode: NotificationMode::Scheduler,
                gap_checking: false,
            },
        );
        let port_id = port.id();

        let mut scheduler = MockScheduler::new();
        scheduler
            .expect_post()
            .withf(move |key, _| *key == port_id)
            .times(1)
            .returning(|_, job| job());
        port.set_scheduler(Arc::new(scheduler));

        let mut listener = MockInputPortListener::new();
        listener.expect_accepts_signal().return_const(true);
        listener.expect_connected().return_const(());
        listener.expect_packet_received().times(1).return_const(());
        port.set_listener(Arc::new(listener));

        let sig = signal();
        sig.connect(&port).unwrap();
        sig.send_packet(implicit_packet()).unwrap();
    }

    #[test]
    fn test_poll_mode_never_notifies() {
        let port = InputPort::with_config(
            "in",
            &PortConfig {
                notification_mode: NotificationMode::None,
                gap_checking: false,
            },
        );
        let mut listener = MockInputPortListener::new();
        listener.expect_accepts_signal().return_const(true);
        listener.expect_connected().return_const(());
        listener.expect_packet_received().never();
        port.set_listener(Arc::new(listener));

        let sig = signal();
        sig.connect(&port).unwrap();
        sig.send_packet(implicit_packet()).unwrap();
        // descriptor event + data packet
        assert_eq!(port.connection().unwrap().len(), 2);
    }

    #[test]
    fn test_disconnect_closes_connection() {
        let port = InputPort::new("in");
        let sig = signal();
        sig.connect(&port).unwrap();
        let connection = port.connection().unwrap();

        port.disconnect().unwrap();
        assert!(connection.is_closed());
        assert!(!port.is_connected());
        assert_eq!(sig.connection_count(), 0);
        assert_eq!(
            connection.wait(Duration::from_secs(60)),
            crate::connection::WaitStatus::Disconnected
        );
        assert!(matches!(port.disconnect(), Err(DaqError::NotConnected(_))));
    }

    #[test]
    fn test_removed_port_rejects_signals() {
        let port = InputPort::new("in");
        port.remove();
        assert!(port.is_removed());
        assert!(signal().connect(&port).is_err());
    }

    #[test]
    fn test_reconnect_replaces_connection() {
        let port = InputPort::new("in");
        let first = signal();
        let second = signal();

        first.connect(&port).unwrap();
        let old = port.connection().unwrap();
        second.connect(&port).unwrap();

        assert!(old.is_closed());
        assert_eq!(first.connection_count(), 0);
        assert_eq!(second.connection_count(), 1);
        assert_eq!(port.signal().unwrap(), second);
    }
}
