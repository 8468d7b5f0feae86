//! Engine-wide shared state handed to every session.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::info;

use crate::config::EngineConfig;
use crate::host::{DiscoveryListener, NoDiscovery};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::message::GUID_SIZE;
use crate::protocol::registration::guid_hex;
use crate::session::authenticator::Authenticator;
use crate::session::gateway::SubDeviceRegistry;
use crate::session::Session;
use crate::utils::metrics::Metrics;

pub struct EngineContext {
    pub config: Arc<EngineConfig>,
    pub dispatcher: Dispatcher,
    pub authenticator: Authenticator,
    pub metrics: Arc<Metrics>,
    pub sub_devices: Arc<SubDeviceRegistry>,
    pub discovery: Arc<dyn DiscoveryListener>,
    sessions: DashMap<[u8; GUID_SIZE], Weak<Session>>,
}

impl EngineContext {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: Arc::new(config),
            dispatcher: Dispatcher::new(),
            authenticator: Authenticator::new(),
            metrics: Arc::new(Metrics::new()),
            sub_devices: Arc::new(SubDeviceRegistry::new()),
            discovery: Arc::new(NoDiscovery),
            sessions: DashMap::new(),
        }
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn DiscoveryListener>) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Live session for a registered device.
    pub fn session(&self, guid: &[u8; GUID_SIZE]) -> Option<Arc<Session>> {
        self.sessions.get(guid).and_then(|entry| entry.value().upgrade())
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    /// Returns the session this one replaces, if the device reconnected.
    pub(crate) fn register_session(
        &self,
        guid: [u8; GUID_SIZE],
        session: &Arc<Session>,
    ) -> Option<Arc<Session>> {
        let previous = self
            .sessions
            .insert(guid, Arc::downgrade(session))
            .and_then(|weak| weak.upgrade())
            .filter(|old| !Arc::ptr_eq(old, session));
        if previous.is_some() {
            info!(guid = %guid_hex(&guid), "Device reconnected; replacing previous session");
        }
        previous
    }

    pub(crate) fn remove_session(&self, guid: &[u8; GUID_SIZE], session: &Session) {
        self.sessions.remove_if(guid, |_, weak| {
            std::ptr::eq(weak.as_ptr(), session as *const Session)
        });
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
