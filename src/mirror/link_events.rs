//! Link request service events
//!
//! Confirmations and indications for the mirror ACL, the mirror eSCO and the
//! mirrored A2DP media channel. Each handler checks the event against the
//! current state; anything the state machine cannot be in is a protocol
//! violation.

use super::{MirrorProfile, MirrorState};
use crate::action::{Action, AudioRequest, LinkRequest, ProtocolViolation};
use crate::constants::CONNECTION_HANDLE_INVALID;
use crate::event::{HfpCodecMode, LinkEvent, LinkType};
use crate::{BluetoothAddress, HciStatus, Role};

const fn unexpected(event: &'static str, state: MirrorState) -> ProtocolViolation {
    ProtocolViolation::UnexpectedInState { event, state }
}

impl MirrorProfile {
    pub(crate) fn handle_link_event(&mut self, event: LinkEvent) -> Result<(), ProtocolViolation> {
        match event {
            LinkEvent::RegisterCfm { success } => self.handle_link_register_cfm(success),
            LinkEvent::AclCreateCfm {
                status,
                conn_handle,
                mirror_addr,
                role,
            } => self.handle_acl_create_cfm(status, conn_handle, mirror_addr, role),
            LinkEvent::AclCreateInd {
                status,
                conn_handle,
                mirror_addr,
                role,
            } => self.handle_acl_create_ind(status, conn_handle, mirror_addr, role),
            LinkEvent::EscoCreateCfm {
                status,
                conn_handle,
                ..
            } => self.handle_esco_create_cfm(status, conn_handle),
            LinkEvent::EscoCreateInd {
                status,
                conn_handle,
                wesco,
                ..
            } => self.handle_esco_create_ind(status, conn_handle, wesco),
            LinkEvent::EscoRenegotiatedInd { conn_handle, wesco } => {
                info!("[MIRROR] eSCO 0x{:x} renegotiated, wesco {}", conn_handle, wesco);
                Ok(())
            }
            LinkEvent::LinkDisconnectCfm {
                conn_handle,
                status,
                link_type,
            } => self.handle_link_disconnect_cfm(conn_handle, status, link_type),
            LinkEvent::LinkDisconnectInd {
                conn_handle,
                reason,
                link_type,
            } => self.handle_link_disconnect_ind(conn_handle, reason, link_type),
            LinkEvent::ChannelCreateInd { conn_handle, cid } => {
                self.handle_channel_create_ind(conn_handle, cid)
            }
            LinkEvent::ChannelCreateCfm {
                conn_handle,
                cid,
                success,
            } => self.handle_channel_create_cfm(conn_handle, cid, success),
            LinkEvent::ChannelDisconnectInd { cid } => self.handle_channel_disconnect_ind(cid),
            LinkEvent::ChannelDisconnectCfm { cid } => self.handle_channel_disconnect_cfm(cid),
            LinkEvent::DataSyncInd { cid, clock } => {
                if cid == self.a2dp.cid {
                    self.push(Action::Audio(AudioRequest::A2dpDataSync { cid, clock }));
                } else {
                    debug!("[MIRROR] data sync for unknown cid 0x{:x}", cid);
                }
                Ok(())
            }
        }
    }

    fn handle_link_register_cfm(&mut self, success: bool) -> Result<(), ProtocolViolation> {
        if !success {
            return Err(ProtocolViolation::RegistrationFailed("link request service"));
        }
        info!("[MIRROR] init complete");
        if let Some(task) = self.init_task {
            self.push(Action::InitCfm(task));
        }
        Ok(())
    }

    fn handle_acl_create_cfm(
        &mut self,
        status: HciStatus,
        conn_handle: u16,
        mirror_addr: BluetoothAddress,
        role: Role,
    ) -> Result<(), ProtocolViolation> {
        info!(
            "[MIRROR] ACL create cfm status 0x{:x} handle 0x{:x} in {:?}",
            status.0, conn_handle, self.state
        );
        if !self.role.is_primary() {
            return Err(ProtocolViolation::WrongRole("ACL create cfm"));
        }

        match self.state {
            MirrorState::AclConnecting => {
                if status.is_success() {
                    if role != Role::Primary {
                        return Err(ProtocolViolation::WrongRole("mirror ACL created as Secondary"));
                    }
                    self.acl.conn_handle = conn_handle;
                    self.acl.bd_addr = mirror_addr;
                    self.set_state(MirrorState::AclConnected)
                } else {
                    self.delay_kick = true;
                    self.set_state(MirrorState::Disconnected)
                }
            }
            state => Err(unexpected("ACL create cfm", state)),
        }
    }

    fn handle_acl_create_ind(
        &mut self,
        status: HciStatus,
        conn_handle: u16,
        mirror_addr: BluetoothAddress,
        role: Role,
    ) -> Result<(), ProtocolViolation> {
        info!(
            "[MIRROR] ACL create ind status 0x{:x} handle 0x{:x} addr {:?} in {:?}",
            status.0, conn_handle, mirror_addr, self.state
        );
        if self.role.is_primary() || role == Role::Primary {
            return Err(ProtocolViolation::WrongRole("ACL create ind"));
        }

        match self.state {
            MirrorState::Disconnected => {
                if status.is_success() {
                    self.acl.conn_handle = conn_handle;
                    self.acl.bd_addr = mirror_addr;
                    self.set_state(MirrorState::AclConnected)?;
                }
                Ok(())
            }
            state => Err(unexpected("ACL create ind", state)),
        }
    }

    fn handle_esco_create_cfm(
        &mut self,
        status: HciStatus,
        conn_handle: u16,
    ) -> Result<(), ProtocolViolation> {
        info!(
            "[MIRROR] eSCO create cfm status 0x{:x} handle 0x{:x} in {:?}",
            status.0, conn_handle, self.state
        );
        match self.state {
            MirrorState::EscoConnecting => {
                if status.is_success() {
                    self.esco.conn_handle = conn_handle;
                    self.set_state(MirrorState::EscoConnected)
                } else {
                    self.delay_kick = true;
                    self.set_state(MirrorState::AclConnected)
                }
            }
            // The ACL went down while the eSCO was being created
            MirrorState::Disconnected => Ok(()),
            MirrorState::AclConnecting if !status.is_success() => Ok(()),
            state => Err(unexpected("eSCO create cfm", state)),
        }
    }

    fn handle_esco_create_ind(
        &mut self,
        status: HciStatus,
        conn_handle: u16,
        wesco: u8,
    ) -> Result<(), ProtocolViolation> {
        info!(
            "[MIRROR] eSCO create ind status 0x{:x} handle 0x{:x} wesco {} in {:?}",
            status.0, conn_handle, wesco, self.state
        );
        match self.state {
            MirrorState::AclConnected => {
                if status.is_success() {
                    self.esco.conn_handle = conn_handle;
                    self.esco.wesco = wesco;
                    self.set_state(MirrorState::EscoConnected)?;
                }
                Ok(())
            }
            state => Err(unexpected("eSCO create ind", state)),
        }
    }

    fn reset_esco(&mut self) {
        self.esco.conn_handle = CONNECTION_HANDLE_INVALID;
        self.esco.codec_mode = HfpCodecMode::None;
        self.esco.wesco = 0;
        self.esco.volume = self.handset.hfp_volume;
    }

    fn reset_acl(&mut self) {
        self.acl.conn_handle = CONNECTION_HANDLE_INVALID;
        self.acl.bd_addr = BluetoothAddress::ZERO;
    }

    fn handle_link_disconnect_cfm(
        &mut self,
        conn_handle: u16,
        status: HciStatus,
        link_type: LinkType,
    ) -> Result<(), ProtocolViolation> {
        info!(
            "[MIRROR] disconnect cfm {:?} handle 0x{:x} status 0x{:x} in {:?}",
            link_type, conn_handle, status.0, self.state
        );
        match self.state {
            MirrorState::AclDisconnecting => {
                if link_type == LinkType::Acl
                    && conn_handle == self.acl.conn_handle
                    && status.is_link_terminated()
                {
                    self.set_state(MirrorState::Disconnected)?;
                    self.reset_acl();
                } else {
                    // A disconnect indication follows
                    debug!("[MIRROR] ignoring disconnect cfm");
                }
                Ok(())
            }
            MirrorState::EscoDisconnecting => {
                if link_type == LinkType::Esco
                    && conn_handle == self.esco.conn_handle
                    && status.is_link_terminated()
                {
                    self.set_state(MirrorState::AclConnected)?;
                    self.reset_esco();
                } else {
                    // A disconnect indication follows
                    debug!("[MIRROR] ignoring disconnect cfm");
                }
                Ok(())
            }
            MirrorState::Disconnected | MirrorState::AclConnected => {
                debug!("[MIRROR] disconnect cfm for a link already gone");
                Ok(())
            }
            state => Err(unexpected("link disconnect cfm", state)),
        }
    }

    fn handle_link_disconnect_ind(
        &mut self,
        conn_handle: u16,
        reason: HciStatus,
        link_type: LinkType,
    ) -> Result<(), ProtocolViolation> {
        info!(
            "[MIRROR] disconnect ind {:?} handle 0x{:x} reason 0x{:x} in {:?}",
            link_type, conn_handle, reason.0, self.state
        );
        match self.state {
            MirrorState::Disconnected
            | MirrorState::AclConnecting
            | MirrorState::AclConnected
            | MirrorState::AclDisconnecting
            | MirrorState::EscoConnecting
            | MirrorState::A2dpConnecting
            | MirrorState::A2dpConnected
            | MirrorState::A2dpDisconnecting => {
                if link_type == LinkType::Acl && conn_handle == self.acl.conn_handle {
                    self.reset_acl();
                    if self.role.is_primary() {
                        self.delay_kick = true;
                    }
                    if self.state != MirrorState::Disconnected {
                        self.set_state(MirrorState::Disconnected)?;
                    }
                }
                Ok(())
            }
            MirrorState::EscoConnected | MirrorState::EscoDisconnecting => {
                if link_type == LinkType::Esco && conn_handle == self.esco.conn_handle {
                    self.reset_esco();
                    self.delay_kick = true;
                    self.set_state(MirrorState::AclConnected)?;
                }
                Ok(())
            }
        }
    }

    fn handle_channel_create_ind(
        &mut self,
        conn_handle: u16,
        cid: u16,
    ) -> Result<(), ProtocolViolation> {
        info!(
            "[MIRROR] channel create ind handle 0x{:x} cid 0x{:x} in {:?}",
            conn_handle, cid, self.state
        );
        match self.state {
            MirrorState::AclConnected => {
                if conn_handle != self.acl.conn_handle {
                    return Err(ProtocolViolation::Mismatch("channel create ind handle"));
                }
                self.a2dp.cid = cid;
                self.push(Action::Link(LinkRequest::CreateChannelResponse {
                    conn_handle,
                    cid,
                }));
                self.set_state(MirrorState::A2dpConnecting)
            }
            state => Err(unexpected("channel create ind", state)),
        }
    }

    fn handle_channel_create_cfm(
        &mut self,
        conn_handle: u16,
        cid: u16,
        success: bool,
    ) -> Result<(), ProtocolViolation> {
        info!(
            "[MIRROR] channel create cfm handle 0x{:x} cid 0x{:x} success {} in {:?}",
            conn_handle, cid, success, self.state
        );
        match self.state {
            MirrorState::A2dpConnecting => {
                if success {
                    if cid != self.a2dp.cid || conn_handle != self.acl.conn_handle {
                        return Err(ProtocolViolation::Mismatch("channel create cfm"));
                    }
                    self.set_state(MirrorState::A2dpConnected)
                } else {
                    self.delay_kick = true;
                    self.set_state(MirrorState::AclConnected)
                }
            }
            MirrorState::Disconnected | MirrorState::AclConnecting => {
                debug!("[MIRROR] channel create cfm after the ACL went down");
                Ok(())
            }
            state => Err(unexpected("channel create cfm", state)),
        }
    }

    fn handle_channel_disconnect_ind(&mut self, cid: u16) -> Result<(), ProtocolViolation> {
        info!(
            "[MIRROR] channel disconnect ind cid 0x{:x} in {:?}",
            cid, self.state
        );
        match self.state {
            MirrorState::Disconnected
            | MirrorState::AclConnecting
            | MirrorState::AclConnected
            | MirrorState::AclDisconnecting
            | MirrorState::A2dpDisconnecting => {
                self.push(Action::Link(LinkRequest::DestroyChannelResponse { cid }));
                Ok(())
            }
            MirrorState::A2dpConnecting | MirrorState::A2dpConnected => {
                self.push(Action::Link(LinkRequest::DestroyChannelResponse { cid }));
                self.delay_kick = true;
                self.set_state(MirrorState::AclConnected)
            }
            state => Err(unexpected("channel disconnect ind", state)),
        }
    }

    fn handle_channel_disconnect_cfm(&mut self, cid: u16) -> Result<(), ProtocolViolation> {
        info!(
            "[MIRROR] channel disconnect cfm cid 0x{:x} in {:?}",
            cid, self.state
        );
        if !self.role.is_primary() {
            return Err(ProtocolViolation::WrongRole("channel disconnect cfm"));
        }
        match self.state {
            MirrorState::Disconnected => Ok(()),
            MirrorState::A2dpConnecting
            | MirrorState::A2dpConnected
            | MirrorState::A2dpDisconnecting => {
                if cid != self.a2dp.cid {
                    return Err(ProtocolViolation::Mismatch("channel disconnect cfm"));
                }
                self.set_state(MirrorState::AclConnected)
            }
            MirrorState::AclDisconnecting => {
                debug!("[MIRROR] channel disconnect cfm while the ACL goes down");
                Ok(())
            }
            state => Err(unexpected("channel disconnect cfm", state)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::mirror::tests::{
        ACL_HANDLE, ESCO_HANDLE, MEDIA_CID, connected_primary, connected_secondary, drain,
        handset_addr, primary_with_mirror_acl, voice_params,
    };
    use crate::peer::PeerLinkMode;
    use crate::timer::TimerId;
    use crate::{ClientId, MirrorProfileOptions};
    use embassy_time::Instant;

    fn acl_ind(profile: &mut MirrorProfile) {
        profile
            .handle_link_event(LinkEvent::AclCreateInd {
                status: HciStatus::SUCCESS,
                conn_handle: ACL_HANDLE,
                mirror_addr: handset_addr(),
                role: Role::Secondary,
            })
            .unwrap();
    }

    #[test]
    fn test_register_cfm_confirms_init() {
        let mut profile = connected_primary(MirrorProfileOptions::default());
        profile.init_task = Some(ClientId(9));
        profile
            .handle_link_event(LinkEvent::RegisterCfm { success: true })
            .unwrap();
        assert_eq!(drain(&mut profile).as_slice(), &[Action::InitCfm(ClientId(9))]);

        assert_eq!(
            profile.handle_link_event(LinkEvent::RegisterCfm { success: false }),
            Err(ProtocolViolation::RegistrationFailed("link request service"))
        );
    }

    #[test]
    fn test_acl_create_cfm_outside_connecting_is_fatal() {
        let mut profile = connected_primary(MirrorProfileOptions::default());
        profile.handle_event(
            Event::Link(LinkEvent::AclCreateCfm {
                status: HciStatus::SUCCESS,
                conn_handle: ACL_HANDLE,
                mirror_addr: handset_addr(),
                role: Role::Primary,
            }),
            Instant::from_millis(0),
        );
        let violation = unexpected("ACL create cfm", MirrorState::Disconnected);
        assert_eq!(profile.violation(), Some(violation));
        assert_eq!(drain(&mut profile).last(), Some(&Action::Fatal(violation)));
    }

    #[test]
    fn test_secondary_follows_esco() {
        let mut profile = connected_secondary();
        acl_ind(&mut profile);
        profile.esco.codec_mode = HfpCodecMode::Wideband;
        profile.esco.volume = 10;
        drain(&mut profile);

        profile
            .handle_link_event(LinkEvent::EscoCreateInd {
                status: HciStatus::SUCCESS,
                conn_handle: ESCO_HANDLE,
                wesco: 4,
                role: Role::Secondary,
            })
            .unwrap();
        assert_eq!(profile.state(), MirrorState::EscoConnected);
        assert!(profile.hfp_voice_source_routed);
        assert_eq!(
            drain(&mut profile).first(),
            Some(&Action::Audio(AudioRequest::StartScoAudio {
                conn_handle: ESCO_HANDLE,
                codec_mode: HfpCodecMode::Wideband,
                wesco: 4,
                volume: 10,
            }))
        );

        // The Primary's handset dropped the call
        profile.handset.hfp_volume = 7;
        profile
            .handle_link_event(LinkEvent::LinkDisconnectInd {
                conn_handle: ESCO_HANDLE,
                reason: HciStatus::REMOTE_USER_TERMINATED,
                link_type: LinkType::Esco,
            })
            .unwrap();
        assert_eq!(profile.state(), MirrorState::AclConnected);
        assert!(!profile.is_esco_active());
        assert_eq!(profile.esco.codec_mode, HfpCodecMode::None);
        assert_eq!(profile.esco.volume, 7);
        assert!(drain(&mut profile).contains(&Action::Audio(AudioRequest::StopScoAudio)));
    }

    #[test]
    fn test_secondary_follows_media_channel() {
        let mut profile = connected_secondary();
        acl_ind(&mut profile);
        drain(&mut profile);

        profile
            .handle_link_event(LinkEvent::ChannelCreateInd {
                conn_handle: ACL_HANDLE,
                cid: MEDIA_CID,
            })
            .unwrap();
        assert_eq!(profile.state(), MirrorState::A2dpConnecting);
        assert_eq!(
            drain(&mut profile).first(),
            Some(&Action::Link(LinkRequest::CreateChannelResponse {
                conn_handle: ACL_HANDLE,
                cid: MEDIA_CID,
            }))
        );
        assert!(profile.is_audio_available());

        profile
            .handle_link_event(LinkEvent::ChannelCreateCfm {
                conn_handle: ACL_HANDLE,
                cid: MEDIA_CID,
                success: true,
            })
            .unwrap();
        assert_eq!(profile.state(), MirrorState::A2dpConnected);

        profile
            .handle_link_event(LinkEvent::DataSyncInd {
                cid: MEDIA_CID,
                clock: 0x1234,
            })
            .unwrap();
        assert_eq!(
            drain(&mut profile).last(),
            Some(&Action::Audio(AudioRequest::A2dpDataSync {
                cid: MEDIA_CID,
                clock: 0x1234,
            }))
        );

        profile
            .handle_link_event(LinkEvent::ChannelDisconnectInd { cid: MEDIA_CID })
            .unwrap();
        assert_eq!(profile.state(), MirrorState::AclConnected);
        assert_eq!(
            drain(&mut profile).first(),
            Some(&Action::Link(LinkRequest::DestroyChannelResponse { cid: MEDIA_CID }))
        );
    }

    #[test]
    fn test_channel_create_ind_on_wrong_acl_is_fatal() {
        let mut profile = connected_secondary();
        acl_ind(&mut profile);
        assert_eq!(
            profile.handle_link_event(LinkEvent::ChannelCreateInd {
                conn_handle: ACL_HANDLE + 1,
                cid: MEDIA_CID,
            }),
            Err(ProtocolViolation::Mismatch("channel create ind handle"))
        );
    }

    #[test]
    fn test_acl_loss_on_primary_retries() {
        let mut profile = primary_with_mirror_acl();
        profile.now = Instant::from_millis(50);
        drain(&mut profile);

        profile
            .handle_link_event(LinkEvent::LinkDisconnectInd {
                conn_handle: ACL_HANDLE,
                reason: HciStatus::CONNECTION_TIMEOUT,
                link_type: LinkType::Acl,
            })
            .unwrap();
        assert_eq!(profile.state(), MirrorState::Disconnected);
        assert_eq!(profile.mirror_acl_handle(), CONNECTION_HANDLE_INVALID);
        assert_eq!(
            profile.timers.deadline(TimerId::DelayedKick),
            Some(Instant::from_millis(1_050))
        );
    }

    #[test]
    fn test_acl_disconnect_cfm() {
        let mut profile = primary_with_mirror_acl();
        profile.set_target_state(MirrorState::Disconnected).unwrap();
        assert_eq!(profile.state(), MirrorState::AclDisconnecting);
        assert!(drain(&mut profile).contains(&Action::Link(LinkRequest::DestroyLink {
            conn_handle: ACL_HANDLE,
            reason: HciStatus::SUCCESS,
        })));

        // Not terminated: wait for the indication
        profile
            .handle_link_event(LinkEvent::LinkDisconnectCfm {
                conn_handle: ACL_HANDLE,
                status: HciStatus(0x0C),
                link_type: LinkType::Acl,
            })
            .unwrap();
        assert_eq!(profile.state(), MirrorState::AclDisconnecting);

        profile
            .handle_link_event(LinkEvent::LinkDisconnectCfm {
                conn_handle: ACL_HANDLE,
                status: HciStatus::TERMINATED_BY_LOCAL_HOST,
                link_type: LinkType::Acl,
            })
            .unwrap();
        assert_eq!(profile.state(), MirrorState::Disconnected);
        assert_eq!(profile.acl.bd_addr, BluetoothAddress::ZERO);
        assert!(!profile.is_connected());
    }

    /// Bring a Primary with a mirrored call to `EscoDisconnecting`
    fn primary_destroying_esco() -> MirrorProfile {
        let mut profile = primary_with_mirror_acl();
        profile.now = Instant::from_millis(100);
        profile.handset.voice = Some(voice_params());
        profile.peer_mode.state = PeerLinkMode::Active;
        profile.set_target_state(MirrorState::EscoConnected).unwrap();
        profile
            .handle_link_event(LinkEvent::EscoCreateCfm {
                status: HciStatus::SUCCESS,
                conn_handle: ESCO_HANDLE,
                role: Role::Primary,
            })
            .unwrap();
        assert_eq!(profile.state(), MirrorState::EscoConnected);

        profile.peer_mode.state = PeerLinkMode::Sniff;
        profile.peer_mode.target = PeerLinkMode::Sniff;
        drain(&mut profile);
        profile.set_target_state(MirrorState::AclConnected).unwrap();
        assert_eq!(profile.state(), MirrorState::EscoDisconnecting);
        assert!(drain(&mut profile).contains(&Action::Link(LinkRequest::DestroyLink {
            conn_handle: ESCO_HANDLE,
            reason: HciStatus::SUCCESS,
        })));
        profile
    }

    #[test]
    fn test_esco_disconnect_cfm_not_terminated_waits_for_ind() {
        let mut profile = primary_destroying_esco();

        profile
            .handle_link_event(LinkEvent::LinkDisconnectCfm {
                conn_handle: ESCO_HANDLE,
                status: HciStatus(0x0C),
                link_type: LinkType::Esco,
            })
            .unwrap();
        assert_eq!(profile.state(), MirrorState::EscoDisconnecting);
        assert!(profile.is_esco_active());

        // The call comes back while the old eSCO is still going down
        profile.set_target_state(MirrorState::EscoConnected).unwrap();
        assert_eq!(profile.state(), MirrorState::EscoDisconnecting);

        profile.handle_event(
            Event::Link(LinkEvent::LinkDisconnectInd {
                conn_handle: ESCO_HANDLE,
                reason: HciStatus::TERMINATED_BY_LOCAL_HOST,
                link_type: LinkType::Esco,
            }),
            Instant::from_millis(300),
        );
        let actions = drain(&mut profile);
        assert_eq!(profile.state(), MirrorState::AclConnected);
        assert!(!profile.is_esco_active());
        assert!(!actions
            .iter()
            .any(|a| matches!(a, Action::Link(LinkRequest::CreateLink { .. }))));
        assert_eq!(
            profile.timers.deadline(TimerId::DelayedKick),
            Some(Instant::from_millis(1_300))
        );
        assert_eq!(profile.violation(), None);
    }

    #[test]
    fn test_esco_disconnect_cfm_terminated_completes() {
        let mut profile = primary_destroying_esco();

        profile
            .handle_link_event(LinkEvent::LinkDisconnectCfm {
                conn_handle: ESCO_HANDLE,
                status: HciStatus::TERMINATED_BY_LOCAL_HOST,
                link_type: LinkType::Esco,
            })
            .unwrap();
        assert_eq!(profile.state(), MirrorState::AclConnected);
        assert!(!profile.is_esco_active());
        assert!(!profile.timers.is_pending(TimerId::DelayedKick));
    }

    #[test]
    fn test_channel_disconnect_cfm_on_secondary_is_fatal() {
        let mut profile = connected_secondary();
        assert_eq!(
            profile.handle_link_event(LinkEvent::ChannelDisconnectCfm { cid: MEDIA_CID }),
            Err(ProtocolViolation::WrongRole("channel disconnect cfm"))
        );
    }
}
