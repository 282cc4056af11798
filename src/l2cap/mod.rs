//! Audio Sync L2CAP Channel
//!
//! A dedicated L2CAP connection to the peer earbud, found through SDP, that
//! carries audio synchronisation data and must be up before any mirror link is
//! created. The channel state machine lives in [`channel`]; this module holds
//! the types shared with the rest of the crate.

pub mod channel;

use crate::BluetoothAddress;
use crate::constants::{AUDIO_SYNC_L2CAP_MIN_REMOTE_MTU, AUDIO_SYNC_L2CAP_MTU, SDP_ATTRIBUTE_BUFFER_SIZE};
use crate::sdp::{SERVICE_RECORD_SIZE, SdpSearchStatus};
use heapless::Vec;

pub use channel::AudioSyncL2capState;

/// L2CAP Protocol Service Multiplexer (PSM)
pub type ProtocolServiceMultiplexer = u16;

/// An open L2CAP connection, identified by its local channel id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct L2capSink(pub u16);

/// Outcome of an L2CAP connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum L2capConnectStatus {
    /// Connected
    Success,
    /// Still in progress; another confirmation follows
    Pending,
    /// Failed with the given result code
    Failed(u16),
}

/// Flow control mode of the audio sync channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum FlowControlMode {
    /// Basic L2CAP mode (no flow control)
    BasicMode = 0x00,
}

/// Configuration requested when connecting or accepting the audio sync channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelConfig {
    /// Exact incoming MTU
    pub mtu: u16,
    /// Smallest outgoing MTU accepted from the peer
    pub min_remote_mtu: u16,
    /// Flow control mode, with no fallback
    pub flow_control_mode: FlowControlMode,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            mtu: AUDIO_SYNC_L2CAP_MTU,
            min_remote_mtu: AUDIO_SYNC_L2CAP_MIN_REMOTE_MTU,
            flow_control_mode: FlowControlMode::BasicMode,
        }
    }
}

/// Requests to the L2CAP and SDP layers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum L2capRequest {
    /// Register a dynamically allocated PSM for the audio sync channel
    RegisterPsm,
    /// Register the mirror service record
    RegisterServiceRecord([u8; SERVICE_RECORD_SIZE]),
    /// Search the peer for the mirror service
    SdpSearch {
        /// Peer earbud
        addr: BluetoothAddress,
        /// Service search pattern
        search_pattern: &'static [u8],
        /// Attribute ID list
        attribute_list: &'static [u8],
    },
    /// Abort the running SDP search
    TerminateSdpSearch,
    /// Connect the audio sync channel
    Connect {
        /// Peer earbud
        addr: BluetoothAddress,
        /// Local PSM
        local_psm: ProtocolServiceMultiplexer,
        /// Peer PSM learned through SDP
        remote_psm: ProtocolServiceMultiplexer,
        /// Channel configuration
        config: ChannelConfig,
    },
    /// Answer a connection request from the peer
    ConnectResponse {
        /// Accept or reject
        accept: bool,
        /// Local PSM the request was addressed to
        psm: ProtocolServiceMultiplexer,
        /// L2CAP connection id from the request
        connection_id: u16,
        /// L2CAP signal identifier from the request
        identifier: u8,
    },
    /// Disconnect the audio sync channel
    Disconnect(L2capSink),
    /// Answer a disconnect request from the peer
    DisconnectResponse {
        /// L2CAP signal identifier from the request
        identifier: u8,
        /// Connection being disconnected
        sink: L2capSink,
    },
}

/// Confirmations and indications from the L2CAP and SDP layers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum L2capEvent {
    /// PSM registration completed
    RegisterCfm {
        /// Whether registration succeeded
        success: bool,
        /// The allocated PSM
        psm: ProtocolServiceMultiplexer,
    },
    /// Service record registration completed
    ServiceRecordRegisterCfm {
        /// Whether registration succeeded
        success: bool,
    },
    /// Result of an SDP search
    SdpSearchCfm {
        /// Search status
        status: SdpSearchStatus,
        /// Returned attribute list
        attributes: Vec<u8, SDP_ATTRIBUTE_BUFFER_SIZE>,
    },
    /// The peer wants to connect
    ConnectInd {
        /// Remote device
        addr: BluetoothAddress,
        /// Local PSM being connected to
        psm: ProtocolServiceMultiplexer,
        /// L2CAP connection id
        connection_id: u16,
        /// L2CAP signal identifier
        identifier: u8,
    },
    /// Result of a local or remote connection
    ConnectCfm {
        /// Connection status
        status: L2capConnectStatus,
        /// The connection, valid on success
        sink: Option<L2capSink>,
    },
    /// The peer disconnected
    DisconnectInd {
        /// L2CAP signal identifier
        identifier: u8,
        /// Connection being disconnected
        sink: L2capSink,
    },
    /// A disconnect completed
    DisconnectCfm {
        /// Connection that was disconnected
        sink: L2capSink,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_config_default() {
        let config = ChannelConfig::default();
        assert_eq!(config.mtu, 672);
        assert_eq!(config.min_remote_mtu, 48);
        assert_eq!(config.flow_control_mode, FlowControlMode::BasicMode);
    }
}
