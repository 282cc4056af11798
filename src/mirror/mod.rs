//! Mirror Profile
//!
//! Coordinates mirroring of the handset links onto the second earbud: the
//! mirror ACL, and on top of it either the mirror eSCO of a call or the mirror
//! A2DP media channel.
//!
//! ## Architecture
//!
//! [`MirrorProfile`] is a sans-IO state machine. It is driven by:
//!
//! 1. [`MirrorProfile::handle_event`] for everything coming from the link
//!    request service, L2CAP, the peer link, peer signalling, the handset
//!    profiles and the audio sources
//! 2. [`MirrorProfile::handle_timers`] once [`MirrorProfile::next_deadline`]
//!    has passed
//! 3. The public operations (`connect`, `set_role`, ...)
//!
//! Each call appends [`Action`]s to an outbox, which the owner drains with
//! [`MirrorProfile::poll_action`]. [`crate::processor::run`] does all of this
//! for you.
//!
//! ## Roles
//!
//! Only the Primary decides what to mirror and creates or destroys mirror
//! links. The Secondary follows the link indications it receives and the
//! context the Primary sends over peer signalling.
//!
//! ## Transition lock
//!
//! While the state machine is between steady states, audio sync messages are
//! parked and handled once a steady state is reached again. An activate
//! response is likewise held until mirrored media has started.

pub mod audio;
pub mod handover;
pub mod link_events;
pub mod signalling;
pub mod sm;
pub mod state;

pub use handover::HandoverInterface;
pub use state::MirrorState;

use crate::action::{Action, Notification, ProtocolViolation};
use crate::audio_sync::{AudioSourceId, AudioSyncMessage, AudioSyncResponse, AudioSyncState, StreamEndpointId};
use crate::constants::{
    CHANNEL_ID_INVALID, CONNECTION_HANDLE_INVALID, MAX_ACTIONS, MAX_AUDIO_SOURCES, MAX_CLIENTS,
    MAX_DEFERRED_SYNC_MESSAGES, MAX_PENDING_SYNC_RESPONSES,
};
use crate::event::{
    A2dpStreamParams, Event, HfpCodecMode, PeerLinkEvent, PeerSignallingEvent, VoiceParameters,
};
use crate::l2cap::channel::AudioSyncChannel;
use crate::l2cap::L2capSink;
use crate::l2cap::L2capRequest;
use crate::peer::PeerLinkPolicyMode;
use crate::peer::mode::PeerMode;
use crate::timer::{TimerId, Timers};
use crate::{BluetoothAddress, ClientId, MirrorError, MirrorProfileOptions, Role};
use embassy_time::Instant;
use heapless::{Deque, Vec};

/// A2DP start lock bit held until the audio subsystem started audio or
/// audio synchronisation
pub(crate) const AUDIO_START: u8 = 1 << 0;

/// A2DP start lock bit held while the mirror A2DP channel is being created
pub(crate) const MIRROR_START: u8 = 1 << 1;

/// How the A2DP audio chain should start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum A2dpStartMode {
    /// Primary starts in sync with the Secondary
    PrimarySynchronised,
    /// Primary starts alone
    PrimaryUnsynchronised,
    /// Secondary starts in sync with the Primary
    SecondarySynchronised,
    /// Secondary joins audio the Primary already plays
    SecondaryJoinsSynchronised,
    /// Q2Q mode
    Q2qMode,
}

/// The mirror ACL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AclMirror {
    /// Mirror ACL handle, [`CONNECTION_HANDLE_INVALID`] when down
    pub conn_handle: u16,
    /// Address of the mirrored handset
    pub bd_addr: BluetoothAddress,
}

impl Default for AclMirror {
    fn default() -> Self {
        Self {
            conn_handle: CONNECTION_HANDLE_INVALID,
            bd_addr: BluetoothAddress::ZERO,
        }
    }
}

/// The mirror eSCO
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EscoMirror {
    /// Mirror eSCO handle, [`CONNECTION_HANDLE_INVALID`] when down
    pub conn_handle: u16,
    /// Codec of the call
    pub codec_mode: HfpCodecMode,
    /// Retransmission window in slots
    pub wesco: u8,
    /// Voice volume
    pub volume: u8,
}

impl Default for EscoMirror {
    fn default() -> Self {
        Self {
            conn_handle: CONNECTION_HANDLE_INVALID,
            codec_mode: HfpCodecMode::None,
            wesco: 0,
            volume: 0,
        }
    }
}

/// Context of the mirrored media stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct A2dpMirror {
    /// L2CAP channel of the media stream
    pub cid: u16,
    /// Media packet size
    pub mtu: u16,
    /// Stream endpoint
    pub seid: StreamEndpointId,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// SCMS-T content protection enabled
    pub content_protection: bool,
    /// Media volume
    pub volume: u8,
    /// Audio sync state of the source
    pub state: AudioSyncState,
    /// Q2Q mode
    pub q2q_mode: bool,
}

impl Default for A2dpMirror {
    fn default() -> Self {
        Self {
            cid: CHANNEL_ID_INVALID,
            mtu: 0,
            seid: 0,
            sample_rate: 0,
            content_protection: false,
            volume: 0,
            state: AudioSyncState::Disconnected,
            q2q_mode: false,
        }
    }
}

impl A2dpMirror {
    fn store(&mut self, params: &A2dpStreamParams) {
        self.cid = params.cid;
        self.mtu = params.mtu;
        self.seid = params.seid;
        self.sample_rate = params.sample_rate;
        self.content_protection = params.content_protection;
        self.q2q_mode = params.q2q_mode;
    }

    /// Stream parameters for starting the mirrored media chain
    #[must_use]
    pub fn stream_params(&self) -> A2dpStreamParams {
        A2dpStreamParams {
            cid: self.cid,
            mtu: self.mtu,
            seid: self.seid,
            sample_rate: self.sample_rate,
            content_protection: self.content_protection,
            q2q_mode: self.q2q_mode,
        }
    }
}

/// What the local handset profiles report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HandsetStatus {
    /// Address of the handset
    pub addr: BluetoothAddress,
    /// HFP connected
    pub hfp_connected: bool,
    /// A2DP connected
    pub a2dp_connected: bool,
    /// AVRCP connected
    pub avrcp_connected: bool,
    /// Parameters of the handset voice link while it is up
    pub voice: Option<VoiceParameters>,
    /// Current HFP volume
    pub hfp_volume: u8,
}

impl HandsetStatus {
    /// Any handset profile connected
    #[must_use]
    pub const fn is_any_profile_connected(&self) -> bool {
        self.hfp_connected || self.a2dp_connected || self.avrcp_connected
    }

    /// The handset voice link is up
    #[must_use]
    pub const fn is_sco_active(&self) -> bool {
        self.voice.is_some()
    }
}

/// The ACL to the peer earbud
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerLink {
    /// The peer ACL is up
    pub connected: bool,
    /// Address of the peer earbud
    pub addr: BluetoothAddress,
}

/// The mirror profile of one earbud
#[derive(Debug)]
pub struct MirrorProfile {
    pub(crate) options: MirrorProfileOptions,
    pub(crate) role: Role,

    pub(crate) state: MirrorState,
    pub(crate) target_state: MirrorState,
    pub(crate) delay_kick: bool,
    pub(crate) transition_lock: bool,
    pub(crate) a2dp_start_lock: u8,

    pub(crate) acl: AclMirror,
    pub(crate) esco: EscoMirror,
    pub(crate) a2dp: A2dpMirror,
    pub(crate) audio_sources: Vec<(AudioSourceId, A2dpStreamParams), MAX_AUDIO_SOURCES>,
    pub(crate) handset: HandsetStatus,
    pub(crate) hfp_voice_source_routed: bool,

    pub(crate) peer_mode: PeerMode,
    pub(crate) link_policy: PeerLinkPolicyMode,
    pub(crate) peer_link: PeerLink,
    pub(crate) peer_sig_connected: bool,
    pub(crate) channel: AudioSyncChannel,
    pub(crate) qhs_ready: bool,

    pub(crate) init_task: Option<ClientId>,
    pub(crate) clients: Vec<ClientId, MAX_CLIENTS>,

    pub(crate) deferred_sync: Deque<AudioSyncMessage, MAX_DEFERRED_SYNC_MESSAGES>,
    pub(crate) held_responses: Deque<AudioSyncResponse, MAX_PENDING_SYNC_RESPONSES>,

    pub(crate) timers: Timers,
    pub(crate) actions: Deque<Action, MAX_ACTIONS>,
    pub(crate) violation: Option<ProtocolViolation>,
    pub(crate) now: Instant,
}

impl MirrorProfile {
    /// Create a mirror profile in the Secondary role with nothing connected
    #[must_use]
    pub fn new(options: MirrorProfileOptions) -> Self {
        Self {
            options,
            role: Role::Secondary,
            state: MirrorState::Disconnected,
            target_state: MirrorState::Disconnected,
            delay_kick: false,
            transition_lock: false,
            a2dp_start_lock: 0,
            acl: AclMirror::default(),
            esco: EscoMirror::default(),
            a2dp: A2dpMirror::default(),
            audio_sources: Vec::new(),
            handset: HandsetStatus::default(),
            hfp_voice_source_routed: false,
            peer_mode: PeerMode::default(),
            link_policy: PeerLinkPolicyMode::default(),
            peer_link: PeerLink::default(),
            peer_sig_connected: false,
            channel: AudioSyncChannel::default(),
            qhs_ready: false,
            init_task: None,
            clients: Vec::new(),
            deferred_sync: Deque::new(),
            held_responses: Deque::new(),
            timers: Timers::new(),
            actions: Deque::new(),
            violation: None,
            now: Instant::from_ticks(0),
        }
    }

    pub(crate) fn push(&mut self, action: Action) {
        if self.actions.push_back(action).is_err() {
            error!("[MIRROR] action queue full, dropping action");
        }
    }

    /// Take the next action to execute
    pub fn poll_action(&mut self) -> Option<Action> {
        self.actions.pop_front()
    }

    /// When [`Self::handle_timers`] has to be called next
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// The protocol violation that stopped the profile, if any
    #[must_use]
    pub fn violation(&self) -> Option<ProtocolViolation> {
        self.violation
    }

    /// Finish a top-level operation: run work that was waiting for the
    /// transition lock or the A2DP start lock, and report a violation.
    pub(crate) fn finish(&mut self, result: Result<(), ProtocolViolation>) {
        let result = result.and_then(|()| self.process_deferred());
        if let Err(violation) = result {
            error!("[MIRROR] protocol violation {:?} in {:?}", violation, self.state);
            self.violation = Some(violation);
            if self.actions.is_full() {
                self.actions.pop_back();
            }
            self.push(Action::Fatal(violation));
        }
    }

    fn process_deferred(&mut self) -> Result<(), ProtocolViolation> {
        while !self.transition_lock {
            let Some(message) = self.deferred_sync.pop_front() else {
                break;
            };
            self.handle_sync_message(message)?;
        }
        if self.a2dp_start_lock == 0 {
            while let Some(response) = self.held_responses.pop_front() {
                debug!("[MIRROR] A2DP start lock clear, sending {:?}", response.kind);
                self.push(Action::AudioSyncResponse(response));
            }
        }
        Ok(())
    }

    /// Start the profile: register the audio sync PSM. `task` receives
    /// [`Action::InitCfm`] once the PSM, the SDP record and the link request
    /// service are registered.
    pub fn init(&mut self, task: ClientId, now: Instant) {
        self.now = now;
        info!("[MIRROR] init");
        self.init_task = Some(task);
        self.push(Action::L2cap(L2capRequest::RegisterPsm));
    }

    /// Handle one input event
    pub fn handle_event(&mut self, event: Event, now: Instant) {
        self.now = now;
        let result = match event {
            Event::Link(event) => self.handle_link_event(event),
            Event::L2cap(event) => self.handle_l2cap_event(event),
            Event::PeerLink(event) => self.handle_peer_link_event(event),
            Event::PeerSignalling(event) => self.handle_peer_signalling_event(event),
            Event::Handset(event) => self.handle_handset_event(event),
            Event::AudioSync(message) => self.defer_sync_message(message),
            Event::AudioSourceParameters { source_id, params } => {
                self.update_audio_source_parameters(source_id, params);
                Ok(())
            }
            Event::AudioStarted => {
                self.clear_audio_start_lock();
                Ok(())
            }
        };
        self.finish(result);
    }

    /// Deliver every internal message whose deadline is at or before `now`
    pub fn handle_timers(&mut self, now: Instant) {
        self.now = now;
        while let Some(id) = self.timers.take_expired(now) {
            debug!("[TIMER] {:?} expired", id);
            let result = match id {
                TimerId::DelayedKick => self.sm_kick(),
                TimerId::PeerLinkPolicyIdleTimeout => {
                    self.handle_link_policy_idle_timeout();
                    Ok(())
                }
                TimerId::QhsStartTimeout => {
                    info!("[MIRROR] QHS did not start in time");
                    self.handle_qhs_ready()
                }
                TimerId::IdlePeerEnterSniff => self.handle_idle_peer_enter_sniff(),
            };
            self.finish(result);
        }
    }

    fn handle_peer_link_event(&mut self, event: PeerLinkEvent) -> Result<(), ProtocolViolation> {
        match event {
            PeerLinkEvent::Connected(addr) => {
                self.handle_peer_link_connected(addr);
                Ok(())
            }
            PeerLinkEvent::Disconnected => self.handle_peer_link_disconnected(),
            PeerLinkEvent::ModeChanged(mode) => self.handle_peer_mode_changed(mode),
            PeerLinkEvent::QhsConnected => {
                info!("[MIRROR] QHS connected");
                self.handle_qhs_ready()
            }
        }
    }

    fn handle_peer_signalling_event(
        &mut self,
        event: PeerSignallingEvent,
    ) -> Result<(), ProtocolViolation> {
        match event {
            PeerSignallingEvent::Connected => {
                info!("[MIRROR] peer signalling connected");
                self.peer_sig_connected = true;
                self.set_target_state_from_profile_state()
            }
            PeerSignallingEvent::Disconnected => {
                info!("[MIRROR] peer signalling disconnected");
                self.peer_sig_connected = false;
                self.set_target_state_from_profile_state()
            }
            PeerSignallingEvent::Message(message) => self.handle_peer_message(message),
        }
    }

    pub(crate) fn notify_clients(&mut self, notification: Notification) {
        for index in 0..self.clients.len() {
            let client = self.clients[index];
            self.push(Action::Notify {
                client,
                notification,
            });
        }
    }

    /// Register a client for [`Notification`]s
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::QueueFull`] if the client table is full.
    pub fn register_client(&mut self, client: ClientId) -> Result<(), MirrorError> {
        if !self.clients.contains(&client) {
            self.clients.push(client).map_err(|_| MirrorError::QueueFull)?;
        }
        Ok(())
    }

    /// Stop sending notifications to a client
    pub fn unregister_client(&mut self, client: ClientId) {
        self.clients.retain(|c| *c != client);
    }

    /// Apply the role decided by the application
    ///
    /// Becoming Secondary cancels a pending delayed kick, since the Secondary
    /// never drives the state machine.
    pub fn set_role(&mut self, role: Role, now: Instant) {
        self.now = now;
        if role == Role::Secondary {
            self.timers.cancel(TimerId::DelayedKick);
        }
        self.role = role;
        info!("[MIRROR] role {:?}", role);
    }

    /// Become Primary and connect the audio sync channel to the peer.
    /// `task` receives [`Action::ConnectCfm`].
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::NoPeerAddress`] for the all-zero address.
    pub fn connect(
        &mut self,
        task: ClientId,
        peer_addr: BluetoothAddress,
        now: Instant,
    ) -> Result<(), MirrorError> {
        if peer_addr.is_zero() {
            warn!("[MIRROR] connect without peer address");
            return Err(MirrorError::NoPeerAddress);
        }
        self.now = now;
        self.role = Role::Primary;
        let result = self.create_audio_sync_channel(task, peer_addr);
        self.finish(result);
        Ok(())
    }

    /// Close the audio sync channel. `task` receives [`Action::DisconnectCfm`].
    pub fn disconnect(&mut self, task: ClientId, now: Instant) {
        self.now = now;
        let result = self.close_audio_sync_channel(task);
        self.finish(result);
    }

    /// Enable or disable eSCO mirroring
    pub fn set_esco_mirroring(&mut self, enabled: bool, now: Instant) {
        self.now = now;
        info!("[MIRROR] eSCO mirroring {} in {:?}", enabled, self.state);
        self.options.enable_esco_mirroring = enabled;
        let result = self.set_target_state_from_profile_state();
        self.finish(result);
    }

    /// Enable or disable A2DP mirroring
    pub fn set_a2dp_mirroring(&mut self, enabled: bool, now: Instant) {
        self.now = now;
        info!("[MIRROR] A2DP mirroring {} in {:?}", enabled, self.state);
        self.options.enable_a2dp_mirroring = enabled;
        let result = self.set_target_state_from_profile_state();
        self.finish(result);
    }

    /// The local earbud's role
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current mirror connection state
    #[must_use]
    pub fn state(&self) -> MirrorState {
        self.state
    }

    /// Steady state the Primary is working towards
    #[must_use]
    pub fn target_state(&self) -> MirrorState {
        self.target_state
    }

    /// Whether the state machine is between steady states
    #[must_use]
    pub fn is_transition_locked(&self) -> bool {
        self.transition_lock
    }

    /// A mirror link is up
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.is_acl_connected() || self.state.is_esco_connected()
    }

    /// A mirror eSCO handle is held
    #[must_use]
    pub fn is_esco_active(&self) -> bool {
        self.esco.conn_handle != CONNECTION_HANDLE_INVALID
    }

    /// The mirror A2DP channel is up
    #[must_use]
    pub fn is_a2dp_active(&self) -> bool {
        self.state.is_a2dp_connected()
    }

    /// Handle of the mirror ACL, [`CONNECTION_HANDLE_INVALID`] when down
    #[must_use]
    pub fn mirror_acl_handle(&self) -> u16 {
        self.acl.conn_handle
    }

    /// The audio sync channel, used as transport for audio synchronisation
    #[must_use]
    pub fn audio_sync_transport(&self) -> Option<L2capSink> {
        self.channel.link_sink
    }

    /// Whether a Secondary can play mirrored media
    #[must_use]
    pub fn is_audio_available(&self) -> bool {
        !self.role.is_primary()
            && matches!(
                self.state,
                MirrorState::A2dpConnecting | MirrorState::A2dpConnected
            )
    }

    /// How the local A2DP audio chain should start
    #[must_use]
    pub fn a2dp_start_mode(&self) -> A2dpStartMode {
        if self.a2dp.q2q_mode {
            return A2dpStartMode::Q2qMode;
        }
        let sync_start = matches!(
            self.state,
            MirrorState::A2dpConnecting | MirrorState::A2dpConnected
        );
        if self.role.is_primary() {
            if sync_start {
                A2dpStartMode::PrimarySynchronised
            } else {
                A2dpStartMode::PrimaryUnsynchronised
            }
        } else {
            match self.a2dp.state {
                AudioSyncState::Connected if sync_start => A2dpStartMode::SecondarySynchronised,
                AudioSyncState::Connected | AudioSyncState::Active => {
                    A2dpStartMode::SecondaryJoinsSynchronised
                }
                AudioSyncState::Disconnected => {
                    warn!("[MIRROR] A2DP start mode asked while A2DP is disconnected");
                    A2dpStartMode::PrimaryUnsynchronised
                }
            }
        }
    }
}
