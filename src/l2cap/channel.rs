//! Audio Sync Channel State Machine
//!
//! The channel is opened by the Primary: it searches the peer's SDP database
//! for the mirror service, learns the peer PSM and connects. The Secondary
//! accepts the incoming connection from its peer.
//!
//! ```text
//!  None ──create──► SdpSearch ──PSM found──► LocalConnecting ──┐
//!   ▲ │                                                        ▼
//!   │ └──peer connects──► RemoteConnecting ───────────────► Connected
//!   │                                                          │
//!   └──────────────────────── Disconnecting ◄────close─────────┘
//! ```

use super::{ChannelConfig, L2capConnectStatus, L2capEvent, L2capRequest, L2capSink};
use crate::action::{Action, LinkRequest, MirrorStatus, ProtocolViolation};
use crate::mirror::MirrorProfile;
use crate::sdp::{PROTOCOL_ATTRIBUTE_LIST, SERVICE_SEARCH_PATTERN, SdpSearchStatus, find_l2cap_psm, service_record};
use crate::timer::TimerId;
use crate::{BluetoothAddress, ClientId};

/// Audio sync channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AudioSyncL2capState {
    /// No channel
    #[default]
    None,
    /// Looking up the peer PSM
    SdpSearch,
    /// Connecting to the peer
    LocalConnecting,
    /// The peer is connecting to us
    RemoteConnecting,
    /// Disconnecting
    Disconnecting,
    /// Channel open
    Connected,
}

/// Context of the audio sync channel
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioSyncChannel {
    /// Channel state
    pub state: AudioSyncL2capState,
    /// Peer earbud the channel is (to be) connected to
    pub peer_addr: BluetoothAddress,
    /// PSM registered locally
    pub local_psm: u16,
    /// PSM of the peer, from SDP
    pub remote_psm: u16,
    /// SDP searches made for the current connection attempt
    pub sdp_search_attempts: u8,
    /// The open connection
    pub link_sink: Option<L2capSink>,
    /// Waiting for [`Action::ConnectCfm`]
    pub connect_task: Option<ClientId>,
    /// Waiting for [`Action::DisconnectCfm`]
    pub disconnect_task: Option<ClientId>,
}

impl AudioSyncChannel {
    /// The channel is open
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self.state, AudioSyncL2capState::Connected)
    }
}

impl MirrorProfile {
    pub(crate) fn handle_l2cap_event(&mut self, event: L2capEvent) -> Result<(), ProtocolViolation> {
        match event {
            L2capEvent::RegisterCfm { success, psm } => {
                if !success {
                    return Err(ProtocolViolation::RegistrationFailed("audio sync PSM"));
                }
                info!("[AUDIO_SYNC_L2CAP] registered PSM 0x{:x}", psm);
                self.channel.local_psm = psm;
                self.push(Action::L2cap(L2capRequest::RegisterServiceRecord(
                    service_record(psm),
                )));
                Ok(())
            }
            L2capEvent::ServiceRecordRegisterCfm { success } => {
                if !success {
                    return Err(ProtocolViolation::RegistrationFailed("mirror service record"));
                }
                debug!("[AUDIO_SYNC_L2CAP] service record registered");
                self.push(Action::Link(LinkRequest::Register));
                Ok(())
            }
            L2capEvent::SdpSearchCfm { status, attributes } => {
                self.handle_sdp_search_cfm(status, &attributes)
            }
            L2capEvent::ConnectInd {
                addr,
                psm,
                connection_id,
                identifier,
            } => self.handle_connect_ind(addr, psm, connection_id, identifier),
            L2capEvent::ConnectCfm { status, sink } => self.handle_connect_cfm(status, sink),
            L2capEvent::DisconnectInd { identifier, sink } => {
                info!("[AUDIO_SYNC_L2CAP] disconnect ind, sink 0x{:x}", sink.0);
                self.push(Action::L2cap(L2capRequest::DisconnectResponse { identifier, sink }));
                if self.channel.link_sink == Some(sink) {
                    self.channel_set_state(AudioSyncL2capState::None)?;
                }
                Ok(())
            }
            L2capEvent::DisconnectCfm { sink } => {
                debug!(
                    "[AUDIO_SYNC_L2CAP] disconnect cfm, sink 0x{:x} in {:?}",
                    sink.0, self.channel.state
                );
                if self.channel.state == AudioSyncL2capState::Disconnecting
                    && self.channel.link_sink == Some(sink)
                {
                    self.channel_set_state(AudioSyncL2capState::None)?;
                }
                Ok(())
            }
        }
    }

    fn handle_sdp_search_cfm(
        &mut self,
        status: SdpSearchStatus,
        attributes: &[u8],
    ) -> Result<(), ProtocolViolation> {
        if self.channel.state != AudioSyncL2capState::SdpSearch {
            return Err(ProtocolViolation::UnexpectedInChannelState {
                event: "SDP search cfm",
                state: self.channel.state,
            });
        }
        match status {
            SdpSearchStatus::Success => match find_l2cap_psm(attributes) {
                Some(psm) => {
                    info!("[AUDIO_SYNC_L2CAP] peer PSM 0x{:x}", psm);
                    self.channel.remote_psm = psm;
                    self.channel_set_state(AudioSyncL2capState::LocalConnecting)
                }
                None => {
                    warn!("[AUDIO_SYNC_L2CAP] malformed SDP record");
                    self.channel_set_state(AudioSyncL2capState::None)
                }
            },
            SdpSearchStatus::NoResponseData => {
                info!("[AUDIO_SYNC_L2CAP] peer has no mirror service");
                self.channel_set_state(AudioSyncL2capState::None)
            }
            SdpSearchStatus::Error(code) => {
                if self.peer_link.connected
                    && self.channel.sdp_search_attempts < self.options.sdp_search_attempts
                {
                    debug!("[AUDIO_SYNC_L2CAP] SDP search error 0x{:x}, retry", code);
                    self.channel_set_state(AudioSyncL2capState::SdpSearch)
                } else {
                    warn!(
                        "[AUDIO_SYNC_L2CAP] SDP search error 0x{:x}, giving up after {} attempts",
                        code, self.channel.sdp_search_attempts
                    );
                    self.channel_set_state(AudioSyncL2capState::None)
                }
            }
        }
    }

    fn handle_connect_ind(
        &mut self,
        addr: BluetoothAddress,
        psm: u16,
        connection_id: u16,
        identifier: u8,
    ) -> Result<(), ProtocolViolation> {
        if psm != self.channel.local_psm {
            return Err(ProtocolViolation::PsmMismatch {
                expected: self.channel.local_psm,
                received: psm,
            });
        }
        let accept = self.channel.state == AudioSyncL2capState::None
            && self.peer_link.connected
            && addr == self.peer_link.addr;
        info!(
            "[AUDIO_SYNC_L2CAP] connect ind from {:?} in {:?}, accept {}",
            addr, self.channel.state, accept
        );
        if accept {
            self.channel.peer_addr = addr;
            self.channel_set_state(AudioSyncL2capState::RemoteConnecting)?;
        }
        self.push(Action::L2cap(L2capRequest::ConnectResponse {
            accept,
            psm,
            connection_id,
            identifier,
        }));
        Ok(())
    }

    fn handle_connect_cfm(
        &mut self,
        status: L2capConnectStatus,
        sink: Option<L2capSink>,
    ) -> Result<(), ProtocolViolation> {
        debug!(
            "[AUDIO_SYNC_L2CAP] connect cfm {:?} in {:?}",
            status, self.channel.state
        );
        let success = match status {
            L2capConnectStatus::Pending => return Ok(()),
            L2capConnectStatus::Success => true,
            L2capConnectStatus::Failed(_) => false,
        };
        match self.channel.state {
            AudioSyncL2capState::LocalConnecting | AudioSyncL2capState::RemoteConnecting => {
                if success {
                    self.channel.link_sink = sink;
                    self.channel_set_state(AudioSyncL2capState::Connected)
                } else {
                    self.channel_set_state(AudioSyncL2capState::None)
                }
            }
            // Closed while connecting: now there is something to disconnect
            AudioSyncL2capState::Disconnecting => {
                if success {
                    self.channel.link_sink = sink;
                    self.channel_set_state(AudioSyncL2capState::Disconnecting)
                } else {
                    self.channel_set_state(AudioSyncL2capState::None)
                }
            }
            state if success => Err(ProtocolViolation::UnexpectedInChannelState {
                event: "L2CAP connect cfm",
                state,
            }),
            _ => Ok(()),
        }
    }

    /// Connect the audio sync channel to `addr` if the peer ACL is up.
    /// `task` receives [`Action::ConnectCfm`].
    pub(crate) fn create_audio_sync_channel(
        &mut self,
        task: ClientId,
        addr: BluetoothAddress,
    ) -> Result<(), ProtocolViolation> {
        info!(
            "[AUDIO_SYNC_L2CAP] create to {:?}, mirror state {:?}",
            addr, self.state
        );
        self.channel.connect_task = Some(task);
        self.channel.peer_addr = addr;
        if self.peer_link.connected {
            self.channel_set_state(AudioSyncL2capState::SdpSearch)
        } else {
            self.send_connect_cfm(MirrorStatus::PeerConnectFailed);
            Ok(())
        }
    }

    /// Close the audio sync channel. `task` receives [`Action::DisconnectCfm`].
    pub(crate) fn close_audio_sync_channel(&mut self, task: ClientId) -> Result<(), ProtocolViolation> {
        info!("[AUDIO_SYNC_L2CAP] close in {:?}", self.channel.state);
        self.channel.disconnect_task = Some(task);
        match self.channel.state {
            AudioSyncL2capState::SdpSearch => {
                self.push(Action::L2cap(L2capRequest::TerminateSdpSearch));
                self.channel_set_state(AudioSyncL2capState::None)
            }
            AudioSyncL2capState::LocalConnecting | AudioSyncL2capState::Connected => {
                self.channel_set_state(AudioSyncL2capState::Disconnecting)
            }
            AudioSyncL2capState::None => {
                self.send_disconnect_cfm(MirrorStatus::PeerDisconnected);
                Ok(())
            }
            AudioSyncL2capState::RemoteConnecting | AudioSyncL2capState::Disconnecting => Ok(()),
        }
    }

    fn send_connect_cfm(&mut self, status: MirrorStatus) {
        if let Some(client) = self.channel.connect_task.take() {
            self.push(Action::ConnectCfm { client, status });
        }
    }

    fn send_disconnect_cfm(&mut self, status: MirrorStatus) {
        if let Some(client) = self.channel.disconnect_task.take() {
            self.push(Action::DisconnectCfm { client, status });
        }
    }

    fn channel_set_state(&mut self, state: AudioSyncL2capState) -> Result<(), ProtocolViolation> {
        info!(
            "[AUDIO_SYNC_L2CAP] {:?} -> {:?}",
            self.channel.state, state
        );
        self.channel.state = state;

        match state {
            AudioSyncL2capState::None => {
                self.set_target_state_from_profile_state()?;
                self.send_connect_cfm(MirrorStatus::PeerConnectFailed);
                self.send_disconnect_cfm(MirrorStatus::PeerDisconnected);
                self.channel.sdp_search_attempts = 0;
                self.channel.link_sink = None;
                self.timers.cancel(TimerId::QhsStartTimeout);
                self.qhs_ready = false;
            }
            AudioSyncL2capState::SdpSearch => {
                self.channel.sdp_search_attempts = self.channel.sdp_search_attempts.saturating_add(1);
                self.push(Action::L2cap(L2capRequest::SdpSearch {
                    addr: self.channel.peer_addr,
                    search_pattern: &SERVICE_SEARCH_PATTERN,
                    attribute_list: &PROTOCOL_ATTRIBUTE_LIST,
                }));
            }
            AudioSyncL2capState::LocalConnecting => {
                self.channel.sdp_search_attempts = 0;
                self.push(Action::L2cap(L2capRequest::Connect {
                    addr: self.channel.peer_addr,
                    local_psm: self.channel.local_psm,
                    remote_psm: self.channel.remote_psm,
                    config: ChannelConfig::default(),
                }));
            }
            AudioSyncL2capState::RemoteConnecting => {}
            AudioSyncL2capState::Disconnecting => match self.channel.link_sink {
                Some(sink) => self.push(Action::L2cap(L2capRequest::Disconnect(sink))),
                None => debug!("[AUDIO_SYNC_L2CAP] no sink yet, waiting for connect cfm"),
            },
            AudioSyncL2capState::Connected => {
                if self.qhs_ready {
                    self.set_target_state_from_profile_state()?;
                } else {
                    let deadline = self.now + self.options.qhs_start_timeout;
                    self.timers.schedule(TimerId::QhsStartTimeout, deadline);
                }
                self.send_connect_cfm(MirrorStatus::PeerConnected);
            }
        }
        Ok(())
    }
}
