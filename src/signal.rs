//! Publisher endpoint.
//!
//! A signal owns one [`Connection`] per connected input port. Sends, descriptor
//! changes and connects all go through the signal's state lock, so a
//! descriptor-changed event is always queued ahead of any packet sent after it,
//! and a new connection always starts with the current descriptors.
//!
//! Lock order is signal, then port, then connection. Listener callbacks run
//! after the signal lock is released.

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::descriptor::DataDescriptor;
use crate::error::{DaqError, Result};
use crate::input_port::{InputPort, WeakInputPort};
use crate::packet::{EventPacket, Packet};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SIGNAL_ID: AtomicU64 = AtomicU64::new(1);

struct PortLink {
    port: WeakInputPort,
    connection: Arc<Connection>,
}

struct SignalState {
    descriptor: Arc<DataDescriptor>,
    domain_signal: Option<Signal>,
    links: Vec<PortLink>,
    removed: bool,
}

struct SignalInner {
    id: u64,
    name: String,
    connection_config: ConnectionConfig,
    state: Mutex<SignalState>,
}

/// Shared handle to a signal.
#[derive(Clone)]
pub struct Signal {
    inner: Arc<SignalInner>,
}

impl Signal {
    pub fn new(name: impl Into<String>, descriptor: DataDescriptor) -> Self {
        Self::with_config(name, descriptor, &ConnectionConfig::default())
    }

    /// Signal whose connections use `config`
    pub fn with_config(
        name: impl Into<String>,
        descriptor: DataDescriptor,
        config: &ConnectionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                id: NEXT_SIGNAL_ID.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                connection_config: config.clone(),
                state: Mutex::new(SignalState {
                    descriptor: Arc::new(descriptor),
                    domain_signal: None,
                    links: Vec::new(),
                    removed: false,
                }),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn descriptor(&self) -> Arc<DataDescriptor> {
        Arc::clone(&self.inner.state.lock().descriptor)
    }

    pub fn domain_signal(&self) -> Option<Signal> {
        self.inner.state.lock().domain_signal.clone()
    }

    pub fn is_removed(&self) -> bool {
        self.inner.state.lock().removed
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.inner.state.lock().links.len()
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.inner
            .state
            .lock()
            .links
            .iter()
            .map(|l| Arc::clone(&l.connection))
            .collect()
    }

    /// Connect `port` to this signal.
    ///
    /// The port is asked first; on acceptance a new connection is created and
    /// a descriptor-changed event with the current value and domain
    /// descriptors is queued on it before it becomes visible to senders. A
    /// port attached elsewhere is moved over.
    pub fn connect(&self, port: &InputPort) -> Result<()> {
        if port.is_removed() {
            return Err(DaqError::Removed(format!("input port '{}'", port.name())));
        }
        if port.signal().is_some_and(|s| s == *self) {
            return Err(DaqError::AlreadyConnected(format!(
                "port '{}' to signal '{}'",
                port.name(),
                self.inner.name
            )));
        }
        if !port.accepts_signal(self) {
            return Err(DaqError::SignalNotAccepted {
                signal: self.inner.name.clone(),
                port: port.name().to_string(),
            });
        }

        // Read the domain descriptor before taking our own lock.
        let domain_descriptor = self.domain_signal().map(|d| d.descriptor());
        let connection = Arc::new(Connection::with_config(&self.inner.connection_config));

        let previous = {
            let mut state = self.inner.state.lock();
            if state.removed {
                return Err(DaqError::Removed(format!("signal '{}'", self.inner.name)));
            }
            connection.enqueue(
                EventPacket::data_descriptor_changed(
                    Some(Arc::clone(&state.descriptor)),
                    domain_descriptor,
                )
                .into(),
            );
            state.links.push(PortLink {
                port: port.downgrade(),
                connection: Arc::clone(&connection),
            });
            port.attach(self.clone(), connection)
        };

        if let Some((old_signal, old_connection)) = previous {
            old_connection.close();
            old_signal.detach_connection(old_connection.id());
        }

        tracing::debug!(
            "Signal '{}' connected to port '{}'",
            self.inner.name,
            port.name()
        );
        port.notify_connected();
        Ok(())
    }

    /// Send one packet to every connected port.
    ///
    /// Packets sent to a removed signal are dropped.
    pub fn send_packet(&self, packet: impl Into<Packet>) -> Result<()> {
        let packet = packet.into();
        let ports = {
            let mut state = self.inner.state.lock();
            if state.removed {
                tracing::debug!(
                    "Signal '{}' removed, dropping packet {}",
                    self.inner.name,
                    packet.id()
                );
                return Ok(());
            }
            Self::enqueue_locked(&mut state, |conn| conn.enqueue(packet.clone()))
        };
        Self::notify(ports);
        Ok(())
    }

    /// Send packets in order; consumers see them as one batch.
    pub fn send_packets(&self, packets: impl IntoIterator<Item = Packet>) -> Result<()> {
        let packets: Vec<Packet> = packets.into_iter().collect();
        if packets.is_empty() {
            return Ok(());
        }
        let ports = {
            let mut state = self.inner.state.lock();
            if state.removed {
                tracing::debug!(
                    "Signal '{}' removed, dropping {} packets",
                    self.inner.name,
                    packets.len()
                );
                return Ok(());
            }
            Self::enqueue_locked(&mut state, |conn| {
                conn.enqueue_multiple(packets.iter().cloned())
            })
        };
        Self::notify(ports);
        Ok(())
    }

    /// Replace the value descriptor and queue a descriptor-changed event on
    /// every connection.
    pub fn set_descriptor(&self, descriptor: DataDescriptor) -> Result<()> {
        let descriptor = Arc::new(descriptor);
        let ports = {
            let mut state = self.inner.state.lock();
            if state.removed {
                return Err(DaqError::Removed(format!("signal '{}'", self.inner.name)));
            }
            state.descriptor = Arc::clone(&descriptor);
            let event: Packet =
                EventPacket::data_descriptor_changed(Some(Arc::clone(&descriptor)), None).into();
            Self::enqueue_locked(&mut state, |conn| conn.enqueue(event.clone()))
        };
        tracing::debug!(
            "Signal '{}' descriptor changed to {}",
            self.inner.name,
            descriptor
        );
        Self::notify(ports);
        Ok(())
    }

    /// Set (or clear) the domain signal.
    ///
    /// Setting a domain queues a descriptor-changed event carrying only the
    /// domain descriptor. Clearing it queues nothing.
    pub fn set_domain_signal(&self, domain: Option<&Signal>) -> Result<()> {
        if domain.is_some_and(|d| d == self) {
            return Err(DaqError::InvalidParameter(format!(
                "signal '{}' cannot be its own domain",
                self.inner.name
            )));
        }
        let domain_descriptor = domain.map(Signal::descriptor);
        let ports = {
            let mut state = self.inner.state.lock();
            if state.removed {
                return Err(DaqError::Removed(format!("signal '{}'", self.inner.name)));
            }
            state.domain_signal = domain.cloned();
            match domain_descriptor {
                Some(descriptor) => {
                    let event: Packet =
                        EventPacket::data_descriptor_changed(None, Some(descriptor)).into();
                    Self::enqueue_locked(&mut state, |conn| conn.enqueue(event.clone()))
                }
                None => Vec::new(),
            }
        };
        Self::notify(ports);
        Ok(())
    }

    /// Tear the signal down: every port is disconnected (readers observe a
    /// disconnect) and later sends are dropped.
    pub fn remove(&self) {
        let links = {
            let mut state = self.inner.state.lock();
            if state.removed {
                return;
            }
            state.removed = true;
            state.domain_signal = None;
            std::mem::take(&mut state.links)
        };

        tracing::debug!(
            "Signal '{}' removed, disconnecting {} ports",
            self.inner.name,
            links.len()
        );
        for link in links {
            match link.port.upgrade() {
                Some(port) => port.detach_from_signal(link.connection.id()),
                None => link.connection.close(),
            }
        }
    }

    /// Forget the connection with `connection_id`; called by a disconnecting port.
    pub(crate) fn detach_connection(&self, connection_id: u64) {
        self.inner
            .state
            .lock()
            .links
            .retain(|l| l.connection.id() != connection_id);
    }

    /// Run `enqueue` on each link, pruning closed connections and dead ports.
    /// Returns the ports to notify once the lock is released.
    fn enqueue_locked(
        state: &mut SignalState,
        mut enqueue: impl FnMut(&Connection) -> bool,
    ) -> Vec<InputPort> {
        let mut ports = Vec::with_capacity(state.links.len());
        state.links.retain(|link| {
            let Some(port) = link.port.upgrade() else {
                link.connection.close();
                return false;
            };
            if !enqueue(&link.connection) {
                return false;
            }
            ports.push(port);
            true
        });
        ports
    }

    fn notify(ports: Vec<InputPort>) {
        for port in ports {
            port.notify_packet_received();
        }
    }
}

impl PartialEq for Signal {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Signal {}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("descriptor", &state.descriptor.to_string())
            .field("connections", &state.links.len())
            .field("removed", &state.removed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::DataPacket;
    use crate::sample::SampleType;

    fn value_descriptor() -> DataDescriptor {
        DataDescriptor::explicit(SampleType::Float64)
    }

    fn data(signal: &Signal, values: &[f64]) -> DataPacket {
        let mut packet = DataPacket::with_heap(signal.descriptor(), values.len(), 0.0, None).unwrap();
        packet.write_samples(values).unwrap();
        packet
    }

    #[test]
    fn test_connect_enqueues_descriptor_first() {
        let signal = Signal::new("sig", value_descriptor());
        let port = InputPort::new("in");
        signal.connect(&port).unwrap();
        signal.send_packet(data(&signal, &[1.0])).unwrap();

        let conn = port.connection().unwrap();
        let first = conn.dequeue().unwrap();
        let event = first.as_event().unwrap();
        assert!(event.is_descriptor_changed());
        assert_eq!(**event.value_descriptor().unwrap(), value_descriptor());
        assert!(conn.dequeue().unwrap().is_data());
    }

    #[test]
    fn test_connect_includes_domain_descriptor() {
        let domain = Signal::new("time", DataDescriptor::linear(SampleType::Int64, 1.0, 0.0));
        let signal = Signal::new("sig", value_descriptor());
        signal.set_domain_signal(Some(&domain)).unwrap();

        let port = InputPort::new("in");
        signal.connect(&port).unwrap();
        let event = port.connection().unwrap().dequeue().unwrap();
        let event = event.as_event().unwrap();
        assert_eq!(event.domain_descriptor().unwrap().rule(), domain.descriptor().rule());
    }

    #[test]
    fn test_connect_twice_rejected() {
        let signal = Signal::new("sig", value_descriptor());
        let port = InputPort::new("in");
        signal.connect(&port).unwrap();
        assert!(matches!(
            signal.connect(&port),
            Err(DaqError::AlreadyConnected(_))
        ));
        assert_eq!(signal.connection_count(), 1);
    }

    #[test]
    fn test_send_reaches_every_port() {
        let signal = Signal::new("sig", value_descriptor());
        let ports: Vec<InputPort> = (0..3).map(|i| InputPort::new(format!("in{}", i))).collect();
        for port in &ports {
            signal.connect(port).unwrap();
        }
        signal.send_packet(data(&signal, &[1.0, 2.0])).unwrap();

        for port in &ports {
            assert_eq!(port.connection().unwrap().len(), 2);
        }
    }

    #[test]
    fn test_set_descriptor_orders_event_before_next_packet() {
        let signal = Signal::new("sig", value_descriptor());
        let port = InputPort::new("in");
        signal.connect(&port).unwrap();
        let conn = port.connection().unwrap();
        conn.dequeue();

        signal.send_packet(data(&signal, &[1.0])).unwrap();
        signal
            .set_descriptor(DataDescriptor::explicit(SampleType::Int32))
            .unwrap();
        let mut packet = DataPacket::with_heap(signal.descriptor(), 1, 0.0, None).unwrap();
        packet.write_samples(&[5i32]).unwrap();
        signal.send_packet(packet).unwrap();

        let kinds: Vec<bool> = conn.dequeue_all().iter().map(Packet::is_event).collect();
        assert_eq!(kinds, vec![false, true, false]);
        assert_eq!(signal.descriptor().sample_type(), SampleType::Int32);
    }

    #[test]
    fn test_dropped_port_is_pruned() {
        let signal = Signal::new("sig", value_descriptor());
        let port = InputPort::new("in");
        signal.connect(&port).unwrap();
        let conn = port.connection().unwrap();
        drop(port);

        signal.send_packet(data(&signal, &[1.0])).unwrap();
        assert_eq!(signal.connection_count(), 0);
        assert!(conn.is_closed());
    }

    #[test]
    fn test_remove_disconnects_ports() {
        let signal = Signal::new("sig", value_descriptor());
        let port = InputPort::new("in");
        signal.connect(&port).unwrap();
        let conn = port.connection().unwrap();

        signal.remove();
        assert!(signal.is_removed());
        assert!(conn.is_closed());
        assert!(!port.is_connected());

        // Sends after removal are dropped silently.
        signal.send_packet(data(&signal, &[1.0])).unwrap();
        assert!(signal.set_descriptor(value_descriptor()).is_err());
        assert!(signal.connect(&InputPort::new("late")).is_err());
    }

    #[test]
    fn test_own_domain_rejected() {
        let signal = Signal::new("sig", value_descriptor());
        assert!(signal.set_domain_signal(Some(&signal)).is_err());
    }
}
