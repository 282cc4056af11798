//! Input Events
//!
//! Everything the mirror profile reacts to arrives as an [`Event`]: link
//! service confirmations and indications, L2CAP and SDP results, peer link
//! mode changes, peer signalling traffic, handset profile activity and audio
//! sync messages. Timers are delivered separately through
//! [`crate::MirrorProfile::handle_timers`].

use crate::audio_sync::{AudioSourceId, AudioSyncMessage, StreamEndpointId};
use crate::l2cap::L2capEvent;
use crate::mirror::signalling::MirrorMessage;
use crate::peer::PeerLinkMode;
use crate::{BluetoothAddress, HciStatus, Role};

/// Type of a mirror link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkType {
    /// Mirror ACL
    Acl,
    /// Mirror eSCO
    Esco,
}

/// HFP codec negotiated with the handset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HfpCodecMode {
    /// No codec known yet
    #[default]
    None,
    /// CVSD, 8 kHz
    Narrowband,
    /// mSBC, 16 kHz
    Wideband,
    /// LC3-SWB, 32 kHz
    SuperWideband,
}

/// Parameters of the handset voice link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VoiceParameters {
    /// Negotiated codec
    pub codec_mode: HfpCodecMode,
    /// Retransmission window in slots
    pub wesco: u8,
    /// Interval between eSCO instants in slots. 0 for SCO.
    pub tesco: u8,
}

/// Stream parameters of the handset A2DP source, as negotiated by the local
/// A2DP instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct A2dpStreamParams {
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
    /// Q2Q mode
    pub q2q_mode: bool,
}

/// Confirmations and indications from the link request service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkEvent {
    /// Registration with the link request service completed
    RegisterCfm {
        /// Whether registration succeeded
        success: bool,
    },
    /// Result of a mirror ACL create request (Primary)
    AclCreateCfm {
        /// Link creation status
        status: HciStatus,
        /// Handle of the new link
        conn_handle: u16,
        /// Address of the mirrored device
        mirror_addr: BluetoothAddress,
        /// Role the firmware assigned to this device
        role: Role,
    },
    /// The Primary created a mirror ACL (Secondary)
    AclCreateInd {
        /// Link creation status
        status: HciStatus,
        /// Handle of the new link
        conn_handle: u16,
        /// Address of the mirrored device
        mirror_addr: BluetoothAddress,
        /// Role the firmware assigned to this device
        role: Role,
    },
    /// Result of a mirror eSCO create request (Primary)
    EscoCreateCfm {
        /// Link creation status
        status: HciStatus,
        /// Handle of the new link
        conn_handle: u16,
        /// Role the firmware assigned to this device
        role: Role,
    },
    /// The Primary created a mirror eSCO (Secondary)
    EscoCreateInd {
        /// Link creation status
        status: HciStatus,
        /// Handle of the new link
        conn_handle: u16,
        /// Retransmission window in slots
        wesco: u8,
        /// Role the firmware assigned to this device
        role: Role,
    },
    /// The mirror eSCO parameters changed
    EscoRenegotiatedInd {
        /// Handle of the link
        conn_handle: u16,
        /// New retransmission window in slots
        wesco: u8,
    },
    /// Result of a mirror link destroy request
    LinkDisconnectCfm {
        /// Handle of the link
        conn_handle: u16,
        /// Destroy status
        status: HciStatus,
        /// Type of the link
        link_type: LinkType,
    },
    /// A mirror link went down
    LinkDisconnectInd {
        /// Handle of the link
        conn_handle: u16,
        /// Disconnect reason
        reason: HciStatus,
        /// Type of the link
        link_type: LinkType,
    },
    /// The Primary created a mirror L2CAP channel (Secondary)
    ChannelCreateInd {
        /// Handle of the mirror ACL carrying the channel
        conn_handle: u16,
        /// Mirrored channel
        cid: u16,
    },
    /// Result of a mirror L2CAP channel create request or response
    ChannelCreateCfm {
        /// Handle of the mirror ACL carrying the channel
        conn_handle: u16,
        /// Mirrored channel
        cid: u16,
        /// Whether the channel was created
        success: bool,
    },
    /// The mirror L2CAP channel went down
    ChannelDisconnectInd {
        /// Mirrored channel
        cid: u16,
    },
    /// Result of a mirror L2CAP channel destroy request (Primary)
    ChannelDisconnectCfm {
        /// Mirrored channel
        cid: u16,
    },
    /// Data synchronisation point on the mirrored media channel
    DataSyncInd {
        /// Mirrored channel
        cid: u16,
        /// Bluetooth clock of the synchronisation point
        clock: u32,
    },
}

/// Transport-level events about the link to the peer earbud
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeerLinkEvent {
    /// The peer ACL connected
    Connected(BluetoothAddress),
    /// The peer ACL disconnected
    Disconnected,
    /// The peer ACL changed between active and sniff mode
    ModeChanged(PeerLinkMode),
    /// The low-latency QHS transport to the peer is up
    QhsConnected,
}

/// Events from the peer signalling channel
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeerSignallingEvent {
    /// Peer signalling connected
    Connected,
    /// Peer signalling disconnected or lost
    Disconnected,
    /// A mirror profile message from the peer
    Message(MirrorMessage),
}

/// Handset profiles tracked for deciding what to mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HandsetProfile {
    /// Hands-Free Profile
    Hfp,
    /// Advanced Audio Distribution Profile
    A2dp,
    /// Audio/Video Remote Control Profile
    Avrcp,
}

/// Activity on the handset side, reported by the local profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HandsetEvent {
    /// A handset profile connected
    ProfileConnected {
        /// The handset
        addr: BluetoothAddress,
        /// The profile
        profile: HandsetProfile,
    },
    /// A handset profile disconnected
    ProfileDisconnected {
        /// The profile
        profile: HandsetProfile,
    },
    /// The handset voice link connected
    ScoConnected(VoiceParameters),
    /// The handset voice link disconnected
    ScoDisconnected,
    /// The HFP volume changed
    HfpVolume(u8),
    /// The A2DP volume changed
    A2dpVolume(u8),
    /// A call is incoming
    IncomingCall,
    /// An outgoing call is being set up
    OutgoingCall,
    /// The call ended
    CallEnded,
}

/// An input to [`crate::MirrorProfile::handle_event`]
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Link request service traffic
    Link(LinkEvent),
    /// Audio sync L2CAP channel and SDP traffic
    L2cap(L2capEvent),
    /// Peer link transport events
    PeerLink(PeerLinkEvent),
    /// Peer signalling traffic
    PeerSignalling(PeerSignallingEvent),
    /// Handset profile activity
    Handset(HandsetEvent),
    /// An audio sync message addressed to the mirror profile
    AudioSync(AudioSyncMessage),
    /// Current stream parameters of an audio source. `None` if the source has
    /// no valid parameters.
    AudioSourceParameters {
        /// The source
        source_id: AudioSourceId,
        /// Its parameters
        params: Option<A2dpStreamParams>,
    },
    /// The audio subsystem finished starting audio or audio synchronisation
    AudioStarted,
}
