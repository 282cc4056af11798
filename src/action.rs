//! Output Actions
//!
//! The mirror profile never talks to the radio, the audio subsystem or other
//! tasks directly. Every handler appends [`Action`]s to an outbox which the
//! owner drains with [`crate::MirrorProfile::poll_action`] and executes in
//! order. [`crate::processor`] executes them against the traits in
//! [`crate::service`].

use crate::audio_sync::{AudioSyncResponse, StreamEndpointId};
use crate::event::{A2dpStreamParams, HfpCodecMode, LinkType};
use crate::l2cap::{L2capRequest, L2capSink};
use crate::mirror::MirrorState;
use crate::mirror::signalling::MirrorMessage;
use crate::peer::PeerLinkMode;
use crate::l2cap::AudioSyncL2capState;
use crate::{BluetoothAddress, ClientId, HciStatus};

/// Requests to the link request service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkRequest {
    /// Register to receive mirror link traffic
    Register,
    /// Create a mirror link of the handset link to the peer
    CreateLink {
        /// Type of link to mirror
        link_type: LinkType,
        /// Handset being mirrored
        mirror_addr: BluetoothAddress,
        /// Peer earbud receiving the mirror
        secondary_addr: BluetoothAddress,
    },
    /// Destroy a mirror link
    DestroyLink {
        /// Link to destroy
        conn_handle: u16,
        /// Reason sent to the peer
        reason: HciStatus,
    },
    /// Mirror an L2CAP channel of the handset
    CreateChannel {
        /// Mirror ACL carrying the channel
        conn_handle: u16,
        /// Channel to mirror
        cid: u16,
    },
    /// Accept a mirror L2CAP channel created by the Primary
    CreateChannelResponse {
        /// Mirror ACL carrying the channel
        conn_handle: u16,
        /// Mirrored channel
        cid: u16,
    },
    /// Stop mirroring an L2CAP channel
    DestroyChannel {
        /// Mirrored channel
        cid: u16,
    },
    /// Acknowledge the end of a mirrored L2CAP channel
    DestroyChannelResponse {
        /// Mirrored channel
        cid: u16,
    },
}

/// Sniff mode parameters for the peer link, in baseband slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SniffParameters {
    /// Maximum sniff interval
    pub max_interval: u16,
    /// Minimum sniff interval
    pub min_interval: u16,
    /// Sniff attempt
    pub attempt: u16,
    /// Sniff timeout
    pub timeout: u16,
}

/// Sniff subrating parameters for the peer link, in baseband slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SniffSubrateParameters {
    /// Maximum latency the peer may add
    pub max_remote_latency: u16,
    /// Minimum timeout the peer must stay unsubrated
    pub min_remote_timeout: u16,
    /// Minimum timeout this device must stay unsubrated
    pub min_local_timeout: u16,
}

/// Requests to control the peer link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeerLinkRequest {
    /// Put the peer link into sniff mode
    EnterSniff {
        /// Peer earbud
        addr: BluetoothAddress,
        /// Sniff parameters
        params: SniffParameters,
    },
    /// Take the peer link out of sniff mode
    ExitSniff {
        /// Peer earbud
        addr: BluetoothAddress,
    },
    /// Apply sniff subrating to the peer link
    SniffSubrate {
        /// Peer earbud
        addr: BluetoothAddress,
        /// Subrating parameters
        params: SniffSubrateParameters,
    },
}

/// Requests to the audio subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AudioRequest {
    /// Start the mirrored voice chain (Secondary)
    StartScoAudio {
        /// Mirror eSCO link
        conn_handle: u16,
        /// Negotiated codec
        codec_mode: HfpCodecMode,
        /// Retransmission window in slots
        wesco: u8,
        /// Voice volume
        volume: u8,
    },
    /// Stop the mirrored voice chain (Secondary)
    StopScoAudio,
    /// Start the mirrored media chain (Secondary). Clears the audio start lock
    /// with [`crate::event::Event::AudioStarted`] when done.
    StartA2dpAudio {
        /// Stream parameters from the Primary
        params: A2dpStreamParams,
        /// Media volume
        volume: u8,
    },
    /// Stop the mirrored media chain (Secondary)
    StopA2dpAudio {
        /// Mirrored media channel
        cid: u16,
        /// Stream endpoint
        seid: StreamEndpointId,
    },
    /// Start forwarding audio synchronisation over the audio sync channel.
    /// Clears the audio start lock with [`crate::event::Event::AudioStarted`]
    /// when done.
    StartAudioSynchronisation {
        /// Audio sync channel
        sink: Option<L2capSink>,
    },
    /// Stop forwarding audio synchronisation
    StopAudioSynchronisation {
        /// Audio sync channel
        sink: Option<L2capSink>,
    },
    /// Power the DSP now, audio is likely to start soon
    ProspectiveDspPowerOn,
    /// Raise the CPU performance level while media mirroring starts
    PerformanceRequest,
    /// Drop the raised CPU performance level
    PerformanceRelinquish,
    /// The call audio path is up; the telephony service may start it
    NotifyCallAudioConnected,
    /// Apply a voice volume received from the peer
    SetVoiceVolume(u8),
    /// Apply a media volume received from the peer
    SetA2dpVolume(u8),
    /// Pass a data synchronisation point to the media chain
    A2dpDataSync {
        /// Mirrored media channel
        cid: u16,
        /// Bluetooth clock of the synchronisation point
        clock: u32,
    },
    /// Register the mirror profile as audio sync sink of the A2DP source
    RegisterSyncSink,
    /// Unregister the mirror profile from the A2DP source
    UnregisterSyncSink,
}

/// Notifications sent to every registered client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Notification {
    /// The mirror ACL connected
    ConnectInd(BluetoothAddress),
    /// The mirror ACL disconnected
    DisconnectInd {
        /// Mirrored device
        addr: BluetoothAddress,
        /// Disconnect reason
        reason: HciStatus,
    },
    /// The mirror eSCO connected
    EscoConnectInd(BluetoothAddress),
    /// The mirror eSCO disconnected
    EscoDisconnectInd {
        /// Mirrored device
        addr: BluetoothAddress,
        /// Disconnect reason
        reason: HciStatus,
    },
    /// A2DP mirroring started
    A2dpStreamActiveInd,
    /// A2DP mirroring stopped
    A2dpStreamInactiveInd,
}

/// Result of a connect or disconnect request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MirrorStatus {
    /// Connected to the peer
    PeerConnected,
    /// Connecting to the peer failed
    PeerConnectFailed,
    /// Disconnected from the peer
    PeerDisconnected,
}

/// A broken invariant the mirror profile cannot recover from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolViolation {
    /// A state was entered while already in it
    ReenteredState(MirrorState),
    /// A target that is not a steady state
    UnsteadyTarget(MirrorState),
    /// An event that cannot happen in the current state
    UnexpectedInState {
        /// What happened
        event: &'static str,
        /// Mirror state at the time
        state: MirrorState,
    },
    /// An event that cannot happen in the current audio sync channel state
    UnexpectedInChannelState {
        /// What happened
        event: &'static str,
        /// Channel state at the time
        state: AudioSyncL2capState,
    },
    /// An operation only the Primary may perform, attempted on the Secondary,
    /// or the other way round
    WrongRole(&'static str),
    /// A link or channel did not match the one being tracked
    Mismatch(&'static str),
    /// Registration with a lower layer failed
    RegistrationFailed(&'static str),
    /// A peer connected to a PSM other than the registered one
    PsmMismatch {
        /// Registered PSM
        expected: u16,
        /// PSM of the request
        received: u16,
    },
    /// A peer link mode transition not allowed in the current state
    InvalidPeerModeTransition(PeerLinkMode),
}

/// An output of the mirror profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send to the link request service
    Link(LinkRequest),
    /// Send to the L2CAP and SDP layers
    L2cap(L2capRequest),
    /// Control the peer link
    PeerLink(PeerLinkRequest),
    /// Send to the audio subsystem
    Audio(AudioRequest),
    /// Send to the peer over peer signalling
    PeerSignal(MirrorMessage),
    /// Notify a registered client
    Notify {
        /// Recipient
        client: ClientId,
        /// What happened
        notification: Notification,
    },
    /// Answer the audio source
    AudioSyncResponse(AudioSyncResponse),
    /// Confirm initialisation
    InitCfm(ClientId),
    /// Confirm a connect request
    ConnectCfm {
        /// Task that asked
        client: ClientId,
        /// Result
        status: MirrorStatus,
    },
    /// Confirm a disconnect request
    DisconnectCfm {
        /// Task that asked
        client: ClientId,
        /// Result
        status: MirrorStatus,
    },
    /// An invariant broke; the owner must reset the device
    Fatal(ProtocolViolation),
}
