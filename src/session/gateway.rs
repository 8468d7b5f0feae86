//! Gateway Router
//!
//! A gateway multiplexes several sub-devices over one connection. Its channel
//! list tags each channel with a sub-device id; the router keeps the
//! `channel -> sub-device` map and forwards per-channel events to whichever
//! listener is attached for that sub-device in the shared
//! [`SubDeviceRegistry`].
//!
//! Sub-devices are addressed by `(gateway guid, sub-device id)` keys, never by
//! direct references, so gateway and sub-device lifecycles stay independent.
//! Events for sub-devices nobody is attached to are cached and dropped.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::host::{
    DeviceListener, DeviceRegistration, DeviceStatus, DiscoveredSubDevice, DiscoveryListener,
    OfflineReason,
};
use crate::protocol::channel_value::ChannelValue;
use crate::protocol::message::{ChannelNewValueResult, ChannelState, GUID_SIZE};
use crate::protocol::registration::{guid_hex, ChannelDescriptor};
use crate::utils::metrics::Metrics;

type Guid = [u8; GUID_SIZE];

/// Shared `(gateway, sub-device) -> listener` map.
#[derive(Default)]
pub struct SubDeviceRegistry {
    sessions: DashMap<(Guid, u8), Arc<dyn DeviceListener>>,
    routers: DashMap<Guid, Weak<GatewayRouter>>,
}

impl SubDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a listener to a sub-device. If its gateway is connected, the
    /// router immediately replays the sub-device's channels and values.
    pub fn attach(&self, gateway_guid: Guid, sub_device_id: u8, listener: Arc<dyn DeviceListener>) {
        self.sessions
            .insert((gateway_guid, sub_device_id), listener.clone());
        info!(
            gateway = %guid_hex(&gateway_guid),
            sub_device = sub_device_id,
            "Sub-device attached"
        );

        let router = self
            .routers
            .get(&gateway_guid)
            .and_then(|entry| entry.value().upgrade());
        if let Some(router) = router {
            router.on_attached(sub_device_id, listener);
        }
    }

    pub fn detach(&self, gateway_guid: &Guid, sub_device_id: u8) -> Option<Arc<dyn DeviceListener>> {
        self.sessions
            .remove(&(*gateway_guid, sub_device_id))
            .map(|(_, listener)| listener)
    }

    pub fn get(&self, gateway_guid: &Guid, sub_device_id: u8) -> Option<Arc<dyn DeviceListener>> {
        self.sessions
            .get(&(*gateway_guid, sub_device_id))
            .map(|entry| entry.value().clone())
    }

    pub fn is_attached(&self, gateway_guid: &Guid, sub_device_id: u8) -> bool {
        self.sessions.contains_key(&(*gateway_guid, sub_device_id))
    }

    pub fn router(&self, gateway_guid: &Guid) -> Option<Arc<GatewayRouter>> {
        self.routers
            .get(gateway_guid)
            .and_then(|entry| entry.value().upgrade())
    }

    fn register_router(&self, router: &Arc<GatewayRouter>) {
        self.routers
            .insert(router.gateway_guid, Arc::downgrade(router));
    }

    fn unregister_router(&self, router: &GatewayRouter) {
        self.routers.remove_if(&router.gateway_guid, |_, weak| {
            std::ptr::eq(weak.as_ptr(), router as *const GatewayRouter)
        });
    }
}

#[derive(Debug, Default)]
struct SubDeviceCache {
    channels: Vec<ChannelDescriptor>,
    values: BTreeMap<u8, ChannelValue>,
    name: Option<String>,
}

#[derive(Default)]
struct RouterState {
    template: Option<DeviceRegistration>,
    channel_map: HashMap<u8, u8>,
    sub_devices: BTreeMap<u8, SubDeviceCache>,
    pending: HashMap<u8, JoinHandle<()>>,
    reported: BTreeSet<u8>,
}

pub struct GatewayRouter {
    gateway_guid: Guid,
    registry: Arc<SubDeviceRegistry>,
    discovery: Arc<dyn DiscoveryListener>,
    discovery_delay: Duration,
    metrics: Arc<Metrics>,
    state: Mutex<RouterState>,
}

impl GatewayRouter {
    pub fn new(
        gateway_guid: Guid,
        registry: Arc<SubDeviceRegistry>,
        discovery: Arc<dyn DiscoveryListener>,
        discovery_delay: Duration,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let router = Arc::new(Self {
            gateway_guid,
            registry,
            discovery,
            discovery_delay,
            metrics,
            state: Mutex::new(RouterState::default()),
        });
        router.registry.register_router(&router);
        router
    }

    pub fn gateway_guid(&self) -> &Guid {
        &self.gateway_guid
    }

    /// Rebuild the channel map from a fresh registration. Attached
    /// sub-devices get their channel subset; the rest are scheduled for
    /// discovery.
    pub fn rebuild(self: &Arc<Self>, registration: &DeviceRegistration) {
        let mut attached = Vec::new();
        {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            state.channel_map.clear();
            for cache in state.sub_devices.values_mut() {
                cache.channels.clear();
            }

            for channel in &registration.channels {
                let Some(sub_id) = channel.sub_device_id else {
                    warn!(
                        gateway = %guid_hex(&self.gateway_guid),
                        channel = channel.number,
                        "Gateway channel has no sub-device id; ignoring"
                    );
                    continue;
                };
                state.channel_map.insert(channel.number, sub_id);
                state
                    .sub_devices
                    .entry(sub_id)
                    .or_default()
                    .channels
                    .push(channel.clone());
            }
            state.sub_devices.retain(|_, cache| !cache.channels.is_empty());
            state.template = Some(registration.clone());

            let ids: Vec<u8> = state.sub_devices.keys().copied().collect();
            for sub_id in ids {
                match self.registry.get(&self.gateway_guid, sub_id) {
                    Some(listener) => attached.push((sub_id, listener)),
                    None => self.schedule_discovery(&mut state, sub_id),
                }
            }
            debug!(
                gateway = %guid_hex(&self.gateway_guid),
                channels = state.channel_map.len(),
                sub_devices = state.sub_devices.len(),
                "Gateway channel map rebuilt"
            );
        }

        for (sub_id, listener) in attached {
            self.deliver_registration(sub_id, listener.as_ref());
        }
    }

    pub fn sub_device_for(&self, channel: u8) -> Option<u8> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.channel_map.get(&channel).copied())
    }

    pub fn route_value(&self, channel: u8, value: &ChannelValue) -> bool {
        if let Ok(mut state) = self.state.lock() {
            if let Some(sub_id) = state.channel_map.get(&channel).copied() {
                if let Some(cache) = state.sub_devices.get_mut(&sub_id) {
                    cache.values.insert(channel, value.clone());
                }
            }
        }
        self.route(channel, "value", |listener| {
            listener.on_channel_value(channel, value)
        })
    }

    pub fn route_extended_value(&self, channel: u8, value: &ChannelValue) -> bool {
        self.route(channel, "extended value", |listener| {
            listener.on_extended_value(channel, value)
        })
    }

    pub fn route_caption(&self, channel: u8, caption: &str) -> bool {
        self.route(channel, "caption", |listener| {
            listener.on_caption(channel, caption)
        })
    }

    pub fn route_new_value_result(&self, result: &ChannelNewValueResult) -> bool {
        self.route(result.channel_number, "new value result", |listener| {
            listener.on_new_value_result(result)
        })
    }

    pub fn route_channel_state(&self, state: &ChannelState) -> bool {
        let Ok(channel) = u8::try_from(state.channel_number) else {
            debug!(channel = state.channel_number, "Channel state for out-of-range channel dropped");
            self.metrics.unrouted_event();
            return false;
        };
        self.route(channel, "channel state", |listener| {
            listener.on_channel_state(state)
        })
    }

    pub fn route_action_trigger(&self, channel: u8, action: u32) -> bool {
        self.route(channel, "action trigger", |listener| {
            listener.on_action_trigger(channel, action)
        })
    }

    /// Remember a sub-device's self-reported name for discovery.
    pub fn set_sub_device_name(&self, sub_device_id: u8, name: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.sub_devices.entry(sub_device_id).or_default().name = Some(name.to_owned());
        }
    }

    /// Called by the registry when a listener binds to one of our sub-devices.
    pub fn on_attached(&self, sub_device_id: u8, listener: Arc<dyn DeviceListener>) {
        let retract = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if let Some(task) = state.pending.remove(&sub_device_id) {
                task.abort();
            }
            if !state.sub_devices.contains_key(&sub_device_id) {
                return;
            }
            state.reported.remove(&sub_device_id)
        };
        if retract {
            self.discovery.retract(&self.gateway_guid, sub_device_id);
        }
        self.deliver_registration(sub_device_id, listener.as_ref());
    }

    /// Gateway connection ended: cancel discovery and take sub-devices offline.
    pub fn shutdown(&self) {
        let (ids, reported) = match self.state.lock() {
            Ok(mut state) => {
                for (_, task) in state.pending.drain() {
                    task.abort();
                }
                let ids: Vec<u8> = state.sub_devices.keys().copied().collect();
                let reported = std::mem::take(&mut state.reported);
                state.channel_map.clear();
                state.sub_devices.clear();
                (ids, reported)
            }
            Err(_) => (Vec::new(), BTreeSet::new()),
        };

        for sub_id in reported {
            self.discovery.retract(&self.gateway_guid, sub_id);
        }
        let status = DeviceStatus::offline(
            OfflineReason::GatewayDisconnected,
            "Gateway connection closed",
        );
        for sub_id in ids {
            if let Some(listener) = self.registry.get(&self.gateway_guid, sub_id) {
                listener.on_status(&status);
            }
        }
        self.registry.unregister_router(self);
        debug!(gateway = %guid_hex(&self.gateway_guid), "Gateway router shut down");
    }

    fn route(&self, channel: u8, what: &'static str, deliver: impl FnOnce(&dyn DeviceListener)) -> bool {
        let Some(sub_id) = self.sub_device_for(channel) else {
            debug!(
                gateway = %guid_hex(&self.gateway_guid),
                channel,
                what,
                "No sub-device mapped for channel; dropped"
            );
            self.metrics.unrouted_event();
            return false;
        };
        match self.registry.get(&self.gateway_guid, sub_id) {
            Some(listener) => {
                deliver(listener.as_ref());
                true
            }
            None => {
                debug!(
                    gateway = %guid_hex(&self.gateway_guid),
                    channel,
                    sub_device = sub_id,
                    what,
                    "Sub-device not attached; dropped"
                );
                self.metrics.unrouted_event();
                false
            }
        }
    }

    fn deliver_registration(&self, sub_device_id: u8, listener: &dyn DeviceListener) {
        let snapshot = self.state.lock().ok().and_then(|state| {
            let template = state.template.as_ref()?;
            let cache = state.sub_devices.get(&sub_device_id)?;
            let registration = DeviceRegistration {
                guid: template.guid,
                sub_device_id: Some(sub_device_id),
                name: cache
                    .name
                    .clone()
                    .unwrap_or_else(|| default_sub_device_name(sub_device_id)),
                soft_ver: template.soft_ver.clone(),
                variant: template.variant,
                manufacturer_id: template.manufacturer_id,
                product_id: template.product_id,
                sleep_mode: template.sleep_mode,
                channels: cache.channels.clone(),
            };
            let values: Vec<(u8, ChannelValue)> = cache
                .values
                .iter()
                .map(|(channel, value)| (*channel, value.clone()))
                .collect();
            Some((registration, values))
        });

        let Some((registration, values)) = snapshot else {
            return;
        };
        debug!(
            gateway = %guid_hex(&self.gateway_guid),
            sub_device = sub_device_id,
            channels = registration.channels.len(),
            values = values.len(),
            "Delivering sub-device channels"
        );
        listener.on_registered(&registration);
        for (channel, value) in &values {
            listener.on_channel_value(*channel, value);
        }
        listener.on_status(&DeviceStatus::Online);
    }

    fn schedule_discovery(self: &Arc<Self>, state: &mut RouterState, sub_device_id: u8) {
        if state.reported.contains(&sub_device_id) {
            return;
        }
        if let Some(task) = state.pending.get(&sub_device_id) {
            if !task.is_finished() {
                return;
            }
        }
        let weak = Arc::downgrade(self);
        let delay = self.discovery_delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(router) = weak.upgrade() {
                router.report_discovery(sub_device_id);
            }
        });
        state.pending.insert(sub_device_id, task);
    }

    fn report_discovery(&self, sub_device_id: u8) {
        if self.registry.is_attached(&self.gateway_guid, sub_device_id) {
            return;
        }
        let found = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            state.pending.remove(&sub_device_id);
            let Some(cache) = state.sub_devices.get(&sub_device_id) else {
                return;
            };
            let found = DiscoveredSubDevice {
                gateway_guid: self.gateway_guid,
                sub_device_id,
                suggested_name: cache
                    .name
                    .clone()
                    .unwrap_or_else(|| default_sub_device_name(sub_device_id)),
                channels: cache.channels.clone(),
            };
            state.reported.insert(sub_device_id);
            found
        };
        info!(
            gateway = %guid_hex(&self.gateway_guid),
            sub_device = sub_device_id,
            name = %found.suggested_name,
            "Reporting unattached sub-device"
        );
        self.discovery.report(found);
    }
}

impl Drop for GatewayRouter {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            for task in state.pending.values() {
                task.abort();
            }
        }
    }
}

fn default_sub_device_name(sub_device_id: u8) -> String {
    format!("Sub-device {sub_device_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::registration::RegistrationVariant;

    #[derive(Default)]
    struct Recorder {
        values: Mutex<Vec<(u8, ChannelValue)>>,
        registrations: Mutex<Vec<DeviceRegistration>>,
    }

    impl DeviceListener for Recorder {
        fn on_registered(&self, registration: &DeviceRegistration) {
            self.registrations.lock().unwrap().push(registration.clone());
        }
        fn on_channel_value(&self, channel: u8, value: &ChannelValue) {
            self.values.lock().unwrap().push((channel, value.clone()));
        }
        fn on_status(&self, _status: &DeviceStatus) {}
    }

    #[derive(Default)]
    struct Discovered(Mutex<Vec<u8>>);

    impl DiscoveryListener for Discovered {
        fn report(&self, device: DiscoveredSubDevice) {
            self.0.lock().unwrap().push(device.sub_device_id);
        }
        fn retract(&self, _gateway_guid: &Guid, sub_device_id: u8) {
            self.0.lock().unwrap().retain(|id| *id != sub_device_id);
        }
    }

    fn gateway_registration(guid: Guid) -> DeviceRegistration {
        let mut relay = ChannelDescriptor::new(5, 2900);
        relay.sub_device_id = Some(2);
        let loose = ChannelDescriptor::new(6, 2900);
        DeviceRegistration {
            guid,
            sub_device_id: None,
            name: "Gateway".into(),
            soft_ver: "1.0".into(),
            variant: RegistrationVariant::G,
            manufacturer_id: None,
            product_id: None,
            sleep_mode: false,
            channels: vec![relay, loose],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unattached_sub_device_is_reported_then_replayed() {
        let guid = [7u8; GUID_SIZE];
        let registry = Arc::new(SubDeviceRegistry::new());
        let discovery = Arc::new(Discovered::default());
        let router = GatewayRouter::new(
            guid,
            registry.clone(),
            discovery.clone(),
            Duration::from_secs(30),
            Arc::new(Metrics::new()),
        );
        router.rebuild(&gateway_registration(guid));
        assert_eq!(router.sub_device_for(5), Some(2));
        assert_eq!(router.sub_device_for(6), None);

        assert!(!router.route_value(5, &ChannelValue::OnOff(true)));
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(discovery.0.lock().unwrap().is_empty());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(*discovery.0.lock().unwrap(), vec![2]);

        let recorder = Arc::new(Recorder::default());
        registry.attach(guid, 2, recorder.clone());
        assert!(discovery.0.lock().unwrap().is_empty());
        let regs = recorder.registrations.lock().unwrap();
        assert_eq!(regs.len(), 1);
        assert_eq!(regs[0].sub_device_id, Some(2));
        assert_eq!(regs[0].channels.len(), 1);
        assert_eq!(
            *recorder.values.lock().unwrap(),
            vec![(5, ChannelValue::OnOff(true))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn attach_before_delay_cancels_discovery() {
        let guid = [8u8; GUID_SIZE];
        let registry = Arc::new(SubDeviceRegistry::new());
        let discovery = Arc::new(Discovered::default());
        let router = GatewayRouter::new(
            guid,
            registry.clone(),
            discovery.clone(),
            Duration::from_secs(30),
            Arc::new(Metrics::new()),
        );
        router.rebuild(&gateway_registration(guid));
        registry.attach(guid, 2, Arc::new(Recorder::default()));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(discovery.0.lock().unwrap().is_empty());
        assert!(router.route_value(5, &ChannelValue::OnOff(false)));
    }

    #[tokio::test]
    async fn shutdown_unregisters_router() {
        let guid = [9u8; GUID_SIZE];
        let registry = Arc::new(SubDeviceRegistry::new());
        let router = GatewayRouter::new(
            guid,
            registry.clone(),
            Arc::new(Discovered::default()),
            Duration::from_secs(30),
            Arc::new(Metrics::new()),
        );
        assert!(registry.router(&guid).is_some());
        router.shutdown();
        assert!(registry.router(&guid).is_none());
    }
}
