//! Device Session
//!
//! One [`Session`] per device connection. The read loop decodes frames,
//! drives the registration state machine, answers protocol requests and
//! forwards device events to the host's [`DeviceListener`]. Host commands go
//! out through the same serialized [`FrameWriter`].
//!
//! Failures while processing a single message are turned into a
//! `CommunicationError` and dispose only this session.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, trace, warn, Span};

use crate::config::{ActivityTimeout, PROTO_VERSION, PROTO_VERSION_MIN, SERVER_SOFT_VERSION};
use crate::core::codec::FrameCodec;
use crate::core::frame::Frame;
use crate::core::wire::truncate_to_width;
use crate::error::{constants, ProtocolError, Result};
use crate::host::{DeviceListener, DeviceRegistration, DeviceStatus, OfflineReason};
use crate::protocol::call_type::CallType;
use crate::protocol::channel_value::{self, ChannelValue};
use crate::protocol::device_config::{self, DeviceConfigField};
use crate::protocol::message::*;
use crate::protocol::registration::{guid_hex, ChannelDescriptor, RegisterDevice};
use crate::session::context::EngineContext;
use crate::session::gateway::GatewayRouter;
use crate::session::liveness::LivenessSupervisor;
use crate::session::state::SessionState;
use crate::session::writer::{FrameSink, FrameWriter};
use crate::utils::time::unix_timestamp_i32;

type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

struct SessionInner {
    state: SessionState,
    registration: Option<DeviceRegistration>,
    timeout: ActivityTimeout,
    channels: BTreeMap<u8, ChannelDescriptor>,
    values: BTreeMap<u8, ChannelValue>,
    proto_version: u8,
}

pub struct Session {
    id: u64,
    peer: String,
    ctx: Arc<EngineContext>,
    listener: Arc<dyn DeviceListener>,
    writer: FrameWriter,
    inner: Mutex<SessionInner>,
    rr_counter: AtomicU32,
    disposed: AtomicBool,
    closed: watch::Sender<bool>,
    liveness: LivenessSupervisor,
    router: Mutex<Option<Arc<GatewayRouter>>>,
}

impl Session {
    /// Run a session over `stream` on the current task until it closes.
    pub async fn serve<S>(
        stream: S,
        peer: impl Into<String>,
        ctx: Arc<EngineContext>,
        listener: Arc<dyn DeviceListener>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (session, frames) = Self::open(stream, peer.into(), ctx, listener);
        session.run(frames).await
    }

    /// Start a session on its own task and return a handle to it.
    pub fn spawn<S>(
        stream: S,
        peer: impl Into<String>,
        ctx: Arc<EngineContext>,
        listener: Arc<dyn DeviceListener>,
    ) -> (Arc<Self>, JoinHandle<Result<()>>)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (session, frames) = Self::open(stream, peer.into(), ctx, listener);
        let task = tokio::spawn(session.clone().run(frames));
        (session, task)
    }

    fn open<S>(
        stream: S,
        peer: String,
        ctx: Arc<EngineContext>,
        listener: Arc<dyn DeviceListener>,
    ) -> (Arc<Self>, FrameStream)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let codec = FrameCodec::new(ctx.config.server.max_frame_payload);
        let (sink, frames) = Framed::new(stream, codec).split();
        let sink: FrameSink = Box::pin(sink);
        let (closed, _) = watch::channel(false);

        let session = Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            writer: FrameWriter::new(sink, ctx.metrics.clone()),
            inner: Mutex::new(SessionInner {
                state: SessionState::Unauthenticated,
                registration: None,
                timeout: ctx.config.activity_timeout,
                channels: BTreeMap::new(),
                values: BTreeMap::new(),
                proto_version: PROTO_VERSION,
            }),
            ctx,
            listener,
            rr_counter: AtomicU32::new(1),
            disposed: AtomicBool::new(false),
            closed,
            liveness: LivenessSupervisor::new(),
            router: Mutex::new(None),
        });
        (session, Box::pin(frames))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> SessionState {
        self.with_inner(|inner| inner.state)
            .unwrap_or(SessionState::Disposed)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn registration(&self) -> Option<DeviceRegistration> {
        self.with_inner(|inner| inner.registration.clone()).flatten()
    }

    pub fn guid(&self) -> Option<[u8; GUID_SIZE]> {
        self.with_inner(|inner| inner.registration.as_ref().map(|r| r.guid))
            .flatten()
    }

    pub fn activity_timeout(&self) -> ActivityTimeout {
        self.with_inner(|inner| inner.timeout)
            .unwrap_or(self.ctx.config.activity_timeout)
    }

    /// Last decoded value of a channel.
    pub fn last_value(&self, channel: u8) -> Option<ChannelValue> {
        self.with_inner(|inner| inner.values.get(&channel).cloned())
            .flatten()
    }

    pub fn router(&self) -> Option<Arc<GatewayRouter>> {
        self.router.lock().ok().and_then(|router| router.clone())
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut SessionInner) -> R) -> Option<R> {
        self.inner.lock().ok().map(|mut inner| f(&mut inner))
    }

    fn transition(&self, next: SessionState) {
        self.with_inner(|inner| {
            if inner.state.can_transition_to(next) {
                trace!(from = %inner.state, to = %next, "Session state change");
                inner.state = next;
            } else {
                debug!(from = %inner.state, to = %next, "Ignored invalid state change");
            }
        });
    }

    fn next_rr_id(&self) -> u32 {
        self.rr_counter.fetch_add(1, Ordering::Relaxed)
    }

    #[instrument(
        name = "session",
        skip_all,
        fields(id = self.id, peer = %self.peer, guid = tracing::field::Empty)
    )]
    async fn run(self: Arc<Self>, mut frames: FrameStream) -> Result<()> {
        self.ctx.metrics.connection_established();
        debug!("Session started");
        let mut closed = self.closed.subscribe();
        let registration_timeout = self.ctx.config.server.registration_timeout;
        let registration_deadline = tokio::time::sleep(registration_timeout);
        tokio::pin!(registration_deadline);
        let outcome = loop {
            if *closed.borrow() || self.is_disposed() {
                break Ok(());
            }
            let unregistered = matches!(
                self.state(),
                SessionState::Unauthenticated | SessionState::Authorizing
            );
            tokio::select! {
                _ = closed.changed() => break Ok(()),
                _ = &mut registration_deadline, if unregistered => {
                    warn!(timeout = ?registration_timeout, "No registration received; closing connection");
                    self.dispose(
                        OfflineReason::LivenessTimeout,
                        format!("No registration within {}s", registration_timeout.as_secs()),
                    )
                    .await;
                    break Ok(());
                }
                next = frames.next() => match next {
                    Some(Ok(frame)) => {
                        if let Err(e) = self.handle_frame(frame).await {
                            self.ctx.metrics.protocol_error();
                            warn!(error = %e, "Message processing failed; disposing session");
                            self.dispose(OfflineReason::CommunicationError, e.to_string()).await;
                            break Err(e);
                        }
                    }
                    Some(Err(e)) => {
                        self.ctx.metrics.protocol_error();
                        warn!(error = %e, "Unreadable frame; closing connection");
                        self.dispose(OfflineReason::CommunicationError, e.to_string()).await;
                        break Err(e);
                    }
                    None => {
                        debug!("Peer closed the connection");
                        self.dispose(OfflineReason::CommunicationError, constants::ERR_CONNECTION_CLOSED)
                            .await;
                        break Ok(());
                    }
                },
            }
        };
        self.ctx.metrics.connection_closed();
        debug!("Session ended");
        outcome
    }

    async fn handle_frame(self: &Arc<Self>, frame: Frame) -> Result<()> {
        self.liveness.touch();
        self.ctx.metrics.message_received(frame.encoded_len());

        if frame.version < PROTO_VERSION_MIN {
            warn!(version = frame.version, minimum = PROTO_VERSION_MIN, "Unsupported protocol version");
            let reply = Message::VersionError(VersionError {
                server_version_min: PROTO_VERSION_MIN,
                server_version: PROTO_VERSION,
            });
            if let Err(e) = self.send(&reply, frame.rr_id).await {
                debug!(error = %e, "Could not deliver version error");
            }
            self.dispose(
                OfflineReason::UnsupportedVersion,
                ProtocolError::UnsupportedVersion(frame.version).to_string(),
            )
            .await;
            return Ok(());
        }
        self.with_inner(|inner| inner.proto_version = frame.version.min(PROTO_VERSION));

        let message = match self.ctx.dispatcher.decode_frame(&frame) {
            Ok(message) => message,
            Err(ProtocolError::UnknownCallType(id)) => {
                self.ctx.metrics.protocol_error();
                warn!(call_type = id, "Unknown call type; message dropped");
                return Ok(());
            }
            Err(e) => {
                self.ctx.metrics.protocol_error();
                let registering = self
                    .ctx
                    .dispatcher
                    .lookup(frame.call_type)
                    .is_some_and(CallType::is_registration);
                if registering && self.state() == SessionState::Unauthenticated {
                    warn!(error = %e, "Malformed registration; rejecting device");
                    self.reject(OfflineReason::CommunicationError, e.to_string())
                        .await;
                } else {
                    warn!(error = %e, call_type = frame.call_type, "Malformed message dropped");
                }
                return Ok(());
            }
        };

        let call_type = message.call_type();
        if !call_type.allowed_before_registration() && !self.state().is_registered() {
            warn!(%call_type, state = %self.state(), "Message before registration dropped");
            return Ok(());
        }
        trace!(%call_type, rr_id = frame.rr_id, "Dispatching message");
        self.dispatch(message, frame.rr_id).await
    }

    async fn dispatch(self: &Arc<Self>, message: Message, rr_id: u32) -> Result<()> {
        match message {
            Message::GetVersion => {
                let reply = Message::GetVersionResult(GetVersionResult {
                    proto_version_min: PROTO_VERSION_MIN,
                    proto_version: PROTO_VERSION,
                    soft_ver: SERVER_SOFT_VERSION.to_string(),
                });
                self.send(&reply, rr_id).await
            }
            Message::PingServer(_) => {
                let reply = Message::PingServerResult(PingServer {
                    now: Timeval::now(),
                });
                self.send(&reply, rr_id).await
            }
            Message::GetRegistrationEnabled => {
                let reply = Message::GetRegistrationEnabledResult(RegistrationEnabled {
                    client_timestamp: 0,
                    iodevice_timestamp: 0,
                });
                self.send(&reply, rr_id).await
            }
            Message::RegisterDevice(request) => self.register(request, rr_id).await,
            Message::SetActivityTimeout(request) => self.negotiate_timeout(request, rr_id).await,

            Message::ChannelValueChanged(v) => {
                self.on_raw_value(v.channel_number, &v.value, false);
                Ok(())
            }
            Message::ChannelValueChangedB(v) => {
                self.on_raw_value(v.channel_number, &v.value, v.offline);
                Ok(())
            }
            Message::ChannelValueChangedC(v) => {
                self.on_raw_value(v.channel_number, &v.value, v.offline);
                Ok(())
            }
            Message::ChannelExtendedValueChanged(ev) => {
                self.on_extended_value(ev.channel_number, &ev.value);
                Ok(())
            }
            Message::ChannelNewValueResult(result) => {
                match self.router() {
                    Some(router) => {
                        router.route_new_value_result(&result);
                    }
                    None => self.listener.on_new_value_result(&result),
                }
                Ok(())
            }
            Message::ChannelStateResult(state) => {
                match self.router() {
                    Some(router) => {
                        router.route_channel_state(&state);
                    }
                    None => self.listener.on_channel_state(&state),
                }
                Ok(())
            }
            Message::ActionTrigger(trigger) => {
                match self.router() {
                    Some(router) => {
                        router.route_action_trigger(trigger.channel_number, trigger.action_trigger);
                    }
                    None => self
                        .listener
                        .on_action_trigger(trigger.channel_number, trigger.action_trigger),
                }
                Ok(())
            }
            Message::DeviceCalCfgResult(result) => {
                debug!(channel = result.channel_number, command = result.command, result = result.result, "CalCfg result");
                self.listener.on_calcfg_result(&result);
                Ok(())
            }

            Message::GetFirmwareUpdateUrl(params) => {
                debug!(platform = params.platform, "Firmware update check; none offered");
                let reply = Message::GetFirmwareUpdateUrlResult(FirmwareUpdateUrlResult::none());
                self.send(&reply, rr_id).await
            }
            Message::GetUserLocaltime => {
                let reply = Message::GetUserLocaltimeResult(UserLocaltimeResult::now());
                self.send(&reply, rr_id).await
            }
            Message::GetChannelFunctions => {
                let functions = self
                    .with_inner(|inner| {
                        inner
                            .channels
                            .values()
                            .map(|c| c.default_function.unwrap_or(0))
                            .collect()
                    })
                    .unwrap_or_default();
                let reply = Message::GetChannelFunctionsResult(ChannelFunctionsResult { functions });
                self.send(&reply, rr_id).await
            }
            Message::SetChannelCaption(caption) => {
                match u8::try_from(caption.channel_number) {
                    Ok(channel) => match self.router() {
                        Some(router) => {
                            router.route_caption(channel, &caption.caption);
                        }
                        None => self.listener.on_caption(channel, &caption.caption),
                    },
                    Err(_) => warn!(channel = caption.channel_number, "Caption for invalid channel"),
                }
                let reply = Message::SetChannelCaptionResult(ChannelCaptionResult {
                    channel_number: caption.channel_number,
                    result_code: result_byte(ResultCode::True),
                    // Room for the NUL the length prefix counts.
                    caption: truncate_to_width(&caption.caption, CAPTION_MAXSIZE - 1).to_string(),
                });
                self.send(&reply, rr_id).await
            }
            Message::GetChannelConfig(request) => {
                let func = self
                    .with_inner(|inner| {
                        inner
                            .channels
                            .get(&request.channel_number)
                            .and_then(|c| c.default_function)
                    })
                    .flatten()
                    .unwrap_or(0);
                let reply = Message::GetChannelConfigResult(ChannelConfig {
                    channel_number: request.channel_number,
                    func,
                    config_type: request.config_type,
                    config: Vec::new(),
                });
                self.send(&reply, rr_id).await
            }
            Message::SetChannelConfig(config) => {
                debug!(channel = config.channel_number, config_type = config.config_type, size = config.config.len(), "Channel config from device");
                let reply = Message::SetChannelConfigResult(SetChannelConfigResult {
                    result: result_byte(ResultCode::True),
                    config_type: config.config_type,
                    channel_number: config.channel_number,
                });
                self.send(&reply, rr_id).await
            }
            Message::SetDeviceConfig(payload) => {
                let result = match device_config::decode_payload(&payload) {
                    Ok(decoded) => {
                        self.listener.on_device_config(&decoded);
                        ResultCode::True
                    }
                    Err(ProtocolError::UnsupportedConfigField { bit, partial }) => {
                        warn!(bit, decoded = partial.fields.len(), "Device config has an unsupported field; keeping partial result");
                        self.listener.on_device_config(&partial);
                        ResultCode::True
                    }
                    Err(e) => {
                        warn!(error = %e, "Device config could not be decoded");
                        ResultCode::False
                    }
                };
                let reply = Message::SetDeviceConfigResult(SetDeviceConfigResult {
                    result: result_byte(result),
                });
                self.send(&reply, rr_id).await
            }
            Message::SetDeviceConfigRequestResult(result) => {
                debug!(result = result.result, "Device config write acknowledged");
                Ok(())
            }
            Message::SetChannelConfigRequestResult(result) => {
                debug!(channel = result.channel_number, result = result.result, "Channel config write acknowledged");
                Ok(())
            }
            Message::SetSubdeviceDetails(details) => {
                match self.router() {
                    Some(router) => router.set_sub_device_name(details.sub_device_id, &details.name),
                    None => debug!(sub_device = details.sub_device_id, "Sub-device details from a non-gateway device"),
                }
                Ok(())
            }

            Message::GetVersionResult(_)
            | Message::VersionError(_)
            | Message::PingServerResult(_)
            | Message::RegisterDeviceResult(_)
            | Message::RegisterDeviceResultB(_)
            | Message::ChannelNewValue(_)
            | Message::ChannelGroupNewValue(_)
            | Message::SetActivityTimeoutResult(_)
            | Message::GetFirmwareUpdateUrlResult(_)
            | Message::GetRegistrationEnabledResult(_)
            | Message::DeviceCalCfgRequest(_)
            | Message::GetUserLocaltimeResult(_)
            | Message::ChannelStateRequest(_)
            | Message::GetChannelFunctionsResult(_)
            | Message::SetChannelCaptionResult(_)
            | Message::GetChannelConfigResult(_)
            | Message::SetDeviceConfigResult(_)
            | Message::SetDeviceConfigRequest(_)
            | Message::SetChannelConfigResult(_)
            | Message::SetChannelConfigRequest(_)
            | Message::ChannelConfigFinished(_) => {
                let call_type = message.call_type();
                warn!(%call_type, "Server-bound only message received from device; dropped");
                Ok(())
            }
        }
    }

    async fn register(self: &Arc<Self>, request: RegisterDevice, rr_id: u32) -> Result<()> {
        if self.state() != SessionState::Unauthenticated {
            warn!(state = %self.state(), "Duplicate registration ignored");
            return Ok(());
        }
        self.transition(SessionState::Authorizing);
        Span::current().record("guid", request.guid_hex().as_str());
        debug!(variant = ?request.variant, credential = request.credential.kind(), "Registration received");

        let auth = self.ctx.config.auth_for(&request.guid);
        if let Err(e) = self.ctx.authenticator.authorize(auth, &request.credential) {
            self.reject(OfflineReason::AuthorizationFailed, e.to_string())
                .await;
            return Ok(());
        }

        let timeout = self.ctx.config.activity_timeout_for(&request.guid);
        let registration = DeviceRegistration::from_request(&request);
        self.with_inner(|inner| {
            inner.timeout = timeout;
            inner.channels = request
                .channels
                .iter()
                .map(|c| (c.number, c.clone()))
                .collect();
            inner.registration = Some(registration.clone());
        });
        // Counted under the state lock so a concurrent dispose sees a
        // consistent registered/connected pair.
        let registered = self
            .with_inner(|inner| {
                if !inner.state.can_transition_to(SessionState::Registered) {
                    return false;
                }
                trace!(from = %inner.state, to = %SessionState::Registered, "Session state change");
                inner.state = SessionState::Registered;
                self.ctx.metrics.device_connected();
                true
            })
            .unwrap_or(false);
        if !registered {
            debug!("Session disposed during registration");
            return Ok(());
        }

        if let Some(previous) = self.ctx.register_session(request.guid, self) {
            previous
                .dispose(OfflineReason::Disposed, "Replaced by a new connection")
                .await;
        }
        if self.is_disposed() {
            self.ctx.remove_session(&request.guid, self);
            return Ok(());
        }

        let reply = if request.variant.wants_result_b() {
            Message::RegisterDeviceResultB(RegisterDeviceResultB {
                result_code: ResultCode::True,
                activity_timeout: timeout.timeout,
                version: PROTO_VERSION,
                version_min: PROTO_VERSION_MIN,
                server_unix_timestamp: unix_timestamp_i32(),
            })
        } else {
            Message::RegisterDeviceResult(RegisterDeviceResult {
                result_code: ResultCode::True,
                activity_timeout: timeout.timeout,
                version: PROTO_VERSION,
                version_min: PROTO_VERSION_MIN,
            })
        };
        self.send(&reply, rr_id).await?;
        info!(
            guid = %registration.guid_hex(),
            name = %registration.name,
            channels = registration.channels.len(),
            "Device registered"
        );

        self.arm_liveness(timeout, registration.sleep_mode);
        self.listener.on_registered(&registration);

        if registration.channels.iter().any(|c| c.sub_device_id.is_some()) {
            let router = GatewayRouter::new(
                registration.guid,
                self.ctx.sub_devices.clone(),
                self.ctx.discovery.clone(),
                self.ctx.config.gateway.discovery_delay,
                self.ctx.metrics.clone(),
            );
            if let Ok(mut slot) = self.router.lock() {
                *slot = Some(router.clone());
            }
            router.rebuild(&registration);
        }

        for channel in &registration.channels {
            self.on_raw_value(channel.number, &channel.value, channel.offline.unwrap_or(false));
        }
        self.listener.on_status(&DeviceStatus::Online);
        Ok(())
    }

    async fn negotiate_timeout(self: &Arc<Self>, request: SetActivityTimeout, rr_id: u32) -> Result<()> {
        let Some(registration) = self.registration() else {
            return Ok(());
        };
        let window = self.ctx.config.activity_timeout_for(&registration.guid);
        debug!(
            requested = request.activity_timeout,
            granted = window.timeout,
            "Activity timeout negotiated"
        );
        self.with_inner(|inner| inner.timeout = window);

        let reply = Message::SetActivityTimeoutResult(SetActivityTimeoutResult {
            activity_timeout: window.timeout,
            min: window.min,
            max: window.max,
        });
        self.send(&reply, rr_id).await?;
        self.transition(SessionState::Active);

        self.liveness.stop();
        self.arm_liveness(window, registration.sleep_mode);
        Ok(())
    }

    fn arm_liveness(self: &Arc<Self>, window: ActivityTimeout, sleep_mode: bool) {
        let weak = Arc::downgrade(self);
        self.liveness.start(
            window,
            sleep_mode,
            Box::new(move |reason| {
                if let Some(session) = weak.upgrade() {
                    session.ctx.metrics.liveness_breach();
                    tokio::spawn(async move {
                        session.dispose(OfflineReason::LivenessTimeout, reason).await;
                    });
                }
            }),
        );
    }

    /// Authorization or registration decoding failed. Nothing is sent back.
    async fn reject(&self, reason: OfflineReason, message: String) {
        if self.state() == SessionState::Unauthenticated {
            self.transition(SessionState::Authorizing);
        }
        self.transition(SessionState::Rejected);
        self.ctx.metrics.registration_rejected();
        self.dispose(reason, message).await;
    }

    fn channel_of(&self, channel: u8) -> Option<ChannelDescriptor> {
        self.with_inner(|inner| inner.channels.get(&channel).cloned())
            .flatten()
    }

    fn on_raw_value(&self, channel: u8, raw: &ChannelValueBytes, offline: bool) {
        let Some(descriptor) = self.channel_of(channel) else {
            debug!(channel, "Value for unregistered channel dropped");
            return;
        };
        let value = match channel_value::decode(descriptor.channel_type, descriptor.default_function, raw) {
            Ok(value) => value,
            Err(e) => {
                debug!(channel, error = %e, "Channel value not decodable");
                return;
            }
        };
        if offline {
            debug!(channel, "Device reports channel offline");
        }
        self.with_inner(|inner| inner.values.insert(channel, value.clone()));
        match self.router() {
            Some(router) => {
                router.route_value(channel, &value);
            }
            None => self.listener.on_channel_value(channel, &value),
        }
    }

    fn on_extended_value(&self, channel: u8, ev: &ExtendedValue) {
        let Some(descriptor) = self.channel_of(channel) else {
            debug!(channel, "Extended value for unregistered channel dropped");
            return;
        };
        let value = match channel_value::decode_extended(descriptor.channel_type, ev) {
            Ok(value) => value,
            Err(e) => {
                debug!(channel, ev_type = ev.ev_type, error = %e, "Extended value not decodable");
                return;
            }
        };
        match self.router() {
            Some(router) => {
                router.route_extended_value(channel, &value);
            }
            None => self.listener.on_extended_value(channel, &value),
        }
    }

    async fn send(&self, message: &Message, rr_id: u32) -> Result<()> {
        let version = self
            .with_inner(|inner| inner.proto_version)
            .unwrap_or(PROTO_VERSION);
        let frame = self
            .ctx
            .dispatcher
            .encode_frame_with_version(message, rr_id, version)?;
        trace!(call_type = %message.call_type(), rr_id, "Sending message");
        self.writer.send(frame).await
    }

    /// Resolve a channel for an outbound command; fails before registration.
    fn command_channel(&self, channel: u8) -> Result<ChannelDescriptor> {
        self.ensure_registered()?;
        self.channel_of(channel).ok_or_else(|| {
            ProtocolError::EncodeError(format!("channel {channel} is not registered"))
        })
    }

    fn ensure_registered(&self) -> Result<()> {
        let state = self.state();
        if state.is_registered() {
            Ok(())
        } else {
            warn!(session = self.id, %state, "Command rejected; device not registered");
            Err(ProtocolError::NotAuthorized(
                constants::ERR_NOT_REGISTERED.to_string(),
            ))
        }
    }

    async fn send_command(&self, message: &Message) -> Result<()> {
        self.ensure_registered()?;
        let rr_id = self.next_rr_id();
        let outcome = self.send(message, rr_id).await;
        if let Err(e) = &outcome {
            if e.is_fatal() {
                self.dispose(OfflineReason::CommunicationError, e.to_string())
                    .await;
            }
        }
        outcome
    }

    /// Command a channel to a new value.
    #[instrument(skip(self, value), fields(session = self.id), level = "debug")]
    pub async fn set_value(&self, channel: u8, value: &ChannelValue) -> Result<()> {
        let descriptor = self.command_channel(channel)?;
        let raw = channel_value::encode(descriptor.channel_type, descriptor.default_function, value)?;
        let message = Message::ChannelNewValue(ChannelNewValue {
            sender_id: 0,
            channel_number: channel,
            duration_ms: 0,
            value: raw,
        });
        self.send_command(&message).await
    }

    /// Command several channels as one group; the last one carries the end marker.
    #[instrument(skip(self, values), fields(session = self.id, count = values.len()), level = "debug")]
    pub async fn set_group_value(&self, group_id: i32, values: &[(u8, ChannelValue)]) -> Result<()> {
        let mut frames = Vec::with_capacity(values.len());
        for (index, (channel, value)) in values.iter().enumerate() {
            let descriptor = self.command_channel(*channel)?;
            let raw = channel_value::encode(descriptor.channel_type, descriptor.default_function, value)?;
            frames.push(Message::ChannelGroupNewValue(ChannelGroupNewValue {
                sender_id: 0,
                group_id,
                eol: index + 1 == values.len(),
                channel_number: *channel,
                duration_ms: 0,
                value: raw,
            }));
        }
        for message in &frames {
            self.send_command(message).await?;
        }
        Ok(())
    }

    pub async fn request_channel_state(&self, channel: u8) -> Result<()> {
        self.command_channel(channel)?;
        let message = Message::ChannelStateRequest(ChannelStateRequest {
            sender_id: 0,
            channel_number: i32::from(channel),
        });
        self.send_command(&message).await
    }

    /// Push configuration fields to the device.
    pub async fn write_device_config(&self, fields: &[DeviceConfigField]) -> Result<()> {
        self.ensure_registered()?;
        let payload = device_config::to_payload(fields)?;
        self.send_command(&Message::SetDeviceConfigRequest(payload))
            .await
    }

    /// Push one channel's configuration, followed by the end-of-config marker.
    pub async fn write_channel_config(&self, config: ChannelConfig) -> Result<()> {
        self.command_channel(config.channel_number)?;
        let channel_number = config.channel_number;
        self.send_command(&Message::SetChannelConfigRequest(config))
            .await?;
        self.send_command(&Message::ChannelConfigFinished(ChannelConfigFinished {
            channel_number,
        }))
        .await
    }

    pub async fn send_calcfg_request(&self, request: DeviceCalCfgRequest) -> Result<()> {
        self.send_command(&Message::DeviceCalCfgRequest(request))
            .await
    }

    /// Tear the session down. Only the first call has any effect.
    pub async fn dispose(&self, reason: OfflineReason, message: impl Into<String>) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let message = message.into();
        self.liveness.stop();
        self.closed.send_replace(true);

        let (was_registered, guid) = self
            .with_inner(|inner| {
                let was_registered = inner.state.is_registered();
                inner.state = SessionState::Disposed;
                inner.channels.clear();
                inner.values.clear();
                (was_registered, inner.registration.as_ref().map(|r| r.guid))
            })
            .unwrap_or((false, None));

        if was_registered {
            self.ctx.metrics.device_disconnected();
        }
        let router = self.router.lock().ok().and_then(|mut slot| slot.take());
        if let Some(router) = router {
            router.shutdown();
        }
        self.writer.release().await;
        if let Some(guid) = guid {
            self.ctx.remove_session(&guid, self);
        }

        info!(
            session = self.id,
            guid = %guid.map(|g| guid_hex(&g)).unwrap_or_default(),
            %reason,
            %message,
            "Session disposed"
        );
        self.listener
            .on_status(&DeviceStatus::offline(reason, message));
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.liveness.stop();
    }
}

fn result_byte(code: ResultCode) -> u8 {
    u8::try_from(code.to_i32()).unwrap_or(0)
}
