//! Observability and Metrics
//!
//! Atomic counters for connections, registrations, traffic and failures.
//! `devices_connected` is the parent-level count of currently authorized
//! devices.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use once_cell::sync::Lazy;
use tracing::info;

/// Engine-wide metrics collector
#[derive(Debug)]
pub struct Metrics {
    /// Total connections accepted
    pub connections_total: AtomicU64,
    /// Currently open connections
    pub connections_active: AtomicU64,
    /// Connections refused because the cap was reached
    pub connections_refused: AtomicU64,
    /// Currently authorized devices
    pub devices_connected: AtomicU64,
    /// Registrations accepted
    pub registrations_accepted: AtomicU64,
    /// Registrations rejected by the authenticator or a bad payload
    pub registrations_rejected: AtomicU64,
    /// Total frames sent
    pub messages_sent: AtomicU64,
    /// Total frames received
    pub messages_received: AtomicU64,
    /// Total bytes sent
    pub bytes_sent: AtomicU64,
    /// Total bytes received
    pub bytes_received: AtomicU64,
    /// Dropped or malformed messages
    pub protocol_errors: AtomicU64,
    /// Sessions closed by the liveness supervisor
    pub liveness_breaches: AtomicU64,
    /// Gateway events without a live sub-device
    pub unrouted_events: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connections_refused: AtomicU64::new(0),
            devices_connected: AtomicU64::new(0),
            registrations_accepted: AtomicU64::new(0),
            registrations_rejected: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            liveness_breaches: AtomicU64::new(0),
            unrouted_events: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_refused(&self) {
        self.connections_refused.fetch_add(1, Ordering::Relaxed);
    }

    /// A device passed authorization
    pub fn device_connected(&self) {
        self.registrations_accepted.fetch_add(1, Ordering::Relaxed);
        self.devices_connected.fetch_add(1, Ordering::Relaxed);
    }

    /// An authorized device went away
    pub fn device_disconnected(&self) {
        self.devices_connected.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn registration_rejected(&self) {
        self.registrations_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self, byte_count: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn message_received(&self, byte_count: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn liveness_breach(&self) {
        self.liveness_breaches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unrouted_event(&self) {
        self.unrouted_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_refused: self.connections_refused.load(Ordering::Relaxed),
            devices_connected: self.devices_connected.load(Ordering::Relaxed),
            registrations_accepted: self.registrations_accepted.load(Ordering::Relaxed),
            registrations_rejected: self.registrations_rejected.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            liveness_breaches: self.liveness_breaches.load(Ordering::Relaxed),
            unrouted_events: self.unrouted_events.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let s = self.snapshot();
        info!(
            connections_total = s.connections_total,
            connections_active = s.connections_active,
            connections_refused = s.connections_refused,
            devices_connected = s.devices_connected,
            registrations_accepted = s.registrations_accepted,
            registrations_rejected = s.registrations_rejected,
            messages_sent = s.messages_sent,
            messages_received = s.messages_received,
            bytes_sent = s.bytes_sent,
            bytes_received = s.bytes_received,
            protocol_errors = s.protocol_errors,
            liveness_breaches = s.liveness_breaches,
            unrouted_events = s.unrouted_events,
            uptime_seconds = s.uptime_seconds,
            "Engine metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_refused: u64,
    pub devices_connected: u64,
    pub registrations_accepted: u64,
    pub registrations_rejected: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub protocol_errors: u64,
    pub liveness_breaches: u64,
    pub unrouted_events: u64,
    pub uptime_seconds: u64,
}

static METRICS: Lazy<std::sync::Arc<Metrics>> = Lazy::new(|| std::sync::Arc::new(Metrics::new()));

/// Process-wide collector used when the host does not supply one
pub fn global_metrics() -> std::sync::Arc<Metrics> {
    METRICS.clone()
}
