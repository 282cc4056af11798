//! Mirror connection state machine
//!
//! The Primary derives a steady target state from what the handset is doing
//! and walks towards it one transitional state at a time. Entering a
//! transitional state issues the request that will eventually complete it;
//! the confirmation moves the machine to the next steady state, which kicks
//! it again.
//!
//! Entry and exit actions of the ACL, eSCO and A2DP "parent" groups run only
//! when the transition crosses the group boundary.

use super::{AUDIO_START, MIRROR_START, MirrorProfile, MirrorState};
use crate::action::{Action, AudioRequest, LinkRequest, Notification, ProtocolViolation};
use crate::audio_sync::AudioSyncState;
use crate::constants::UNMIRRORABLE_TESCO_MAX;
use crate::event::{HfpCodecMode, LinkType};
use crate::timer::TimerId;
use crate::{HciStatus, Role};

impl MirrorProfile {
    /// The handset voice link can be mirrored. SCO and HV3 cannot.
    pub(crate) fn is_voice_source_supported(&self) -> bool {
        self.handset
            .voice
            .is_none_or(|voice| voice.tesco > UNMIRRORABLE_TESCO_MAX)
    }

    fn exit_a2dp_connecting(&mut self, new: MirrorState) {
        self.a2dp_start_lock &= !MIRROR_START;
        self.push(Action::Audio(AudioRequest::PerformanceRelinquish));
        if new != MirrorState::A2dpConnected {
            self.push(Action::Audio(AudioRequest::StopAudioSynchronisation {
                sink: self.channel.link_sink,
            }));
            if !self.role.is_primary() {
                self.push(Action::Audio(AudioRequest::StopA2dpAudio {
                    cid: self.a2dp.cid,
                    seid: self.a2dp.seid,
                }));
            }
        }
    }

    fn exit_acl_connected(&mut self) {
        self.notify_clients(Notification::DisconnectInd {
            addr: self.acl.bd_addr,
            reason: HciStatus::UNSPECIFIED,
        });
        self.a2dp_start_lock &= !MIRROR_START;
    }

    fn exit_esco_connected(&mut self) {
        if !self.role.is_primary() {
            self.push(Action::Audio(AudioRequest::StopScoAudio));
        }
        self.notify_clients(Notification::EscoDisconnectInd {
            addr: self.acl.bd_addr,
            reason: HciStatus::UNSPECIFIED,
        });
        self.link_policy_set_idle();
    }

    fn exit_a2dp_connected(&mut self) {
        self.a2dp_start_lock &= !AUDIO_START;
        self.notify_clients(Notification::A2dpStreamInactiveInd);
        self.push(Action::Audio(AudioRequest::StopAudioSynchronisation {
            sink: self.channel.link_sink,
        }));
        if !self.role.is_primary() {
            self.push(Action::Audio(AudioRequest::StopA2dpAudio {
                cid: self.a2dp.cid,
                seid: self.a2dp.seid,
            }));
        }
        self.link_policy_set_idle();
    }

    fn enter_acl_connected(&mut self) {
        if self.role.is_primary() {
            self.send_a2dp_stream_context_to_secondary();
        }
        self.link_policy_init();
        self.notify_clients(Notification::ConnectInd(self.acl.bd_addr));
    }

    fn enter_esco_connected(&mut self) {
        if self.role.is_primary() {
            if !self.hfp_voice_source_routed {
                self.push(Action::Audio(AudioRequest::NotifyCallAudioConnected));
                self.hfp_voice_source_routed = true;
            }
        } else if self.esco.codec_mode != HfpCodecMode::None {
            self.start_sco_audio();
            self.hfp_voice_source_routed = true;
        }
        self.notify_clients(Notification::EscoConnectInd(self.acl.bd_addr));
        self.link_policy_set_esco_active();
    }

    fn enter_a2dp_connected(&mut self) {
        self.notify_clients(Notification::A2dpStreamActiveInd);
        self.link_policy_set_a2dp_active();
    }

    fn require_primary(&self, operation: &'static str) -> Result<(), ProtocolViolation> {
        if self.role.is_primary() {
            Ok(())
        } else {
            Err(ProtocolViolation::WrongRole(operation))
        }
    }

    fn enter_acl_connecting(&mut self) -> Result<(), ProtocolViolation> {
        self.require_primary("create mirror ACL")?;
        self.push(Action::Link(LinkRequest::CreateLink {
            link_type: LinkType::Acl,
            mirror_addr: self.handset.addr,
            secondary_addr: self.peer_link.addr,
        }));
        Ok(())
    }

    fn enter_esco_connecting(&mut self) -> Result<(), ProtocolViolation> {
        self.require_primary("create mirror eSCO")?;
        if let Some(voice) = self.handset.voice {
            self.send_hfp_codec_and_volume_to_secondary(voice.codec_mode, self.handset.hfp_volume);
            self.esco.codec_mode = voice.codec_mode;
            self.esco.wesco = voice.wesco;
        }
        self.push(Action::Link(LinkRequest::CreateLink {
            link_type: LinkType::Esco,
            mirror_addr: self.handset.addr,
            secondary_addr: self.peer_link.addr,
        }));
        Ok(())
    }

    fn enter_a2dp_connecting(&mut self) {
        self.push(Action::Audio(AudioRequest::PerformanceRequest));
        match self.role {
            Role::Primary => {
                self.push(Action::Link(LinkRequest::CreateChannel {
                    conn_handle: self.acl.conn_handle,
                    cid: self.a2dp.cid,
                }));
                self.a2dp_start_lock |= MIRROR_START;
            }
            Role::Secondary => {
                self.push(Action::Audio(AudioRequest::StartA2dpAudio {
                    params: self.a2dp.stream_params(),
                    volume: self.a2dp.volume,
                }));
            }
        }
        self.a2dp_start_lock |= AUDIO_START;
        self.push(Action::Audio(AudioRequest::StartAudioSynchronisation {
            sink: self.channel.link_sink,
        }));
    }

    /// Move to `new`, running the exit actions of the old state and the entry
    /// actions of the new one
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolViolation`] when `new` is the current state or the
    /// new state cannot be entered in the local role.
    pub(crate) fn set_state(&mut self, new: MirrorState) -> Result<(), ProtocolViolation> {
        let old = self.state;
        info!("[MIRROR] state {:?} -> {:?}", old, new);
        if old == new {
            return Err(ProtocolViolation::ReenteredState(new));
        }

        if old == MirrorState::A2dpConnecting {
            self.exit_a2dp_connecting(new);
        }
        if old.is_esco_connected() && !new.is_esco_connected() {
            self.exit_esco_connected();
        }
        if old.is_a2dp_connected() && !new.is_a2dp_connected() {
            self.exit_a2dp_connected();
        }
        if old.is_acl_connected() && !new.is_acl_connected() {
            self.exit_acl_connected();
        }

        if old.is_steady() && !new.is_steady() {
            self.transition_lock = true;
        }
        self.state = new;

        if new.is_acl_connected() && !old.is_acl_connected() {
            self.enter_acl_connected();
        }
        if new.is_esco_connected() && !old.is_esco_connected() {
            self.enter_esco_connected();
        }
        if new.is_a2dp_connected() && !old.is_a2dp_connected() {
            self.enter_a2dp_connected();
        }

        if !old.is_steady() && new.is_steady() {
            self.transition_lock = false;
        }

        match new {
            MirrorState::AclConnecting => self.enter_acl_connecting()?,
            MirrorState::AclDisconnecting => {
                self.push(Action::Link(LinkRequest::DestroyLink {
                    conn_handle: self.acl.conn_handle,
                    reason: HciStatus::SUCCESS,
                }));
            }
            MirrorState::EscoConnecting => self.enter_esco_connecting()?,
            MirrorState::EscoDisconnecting => {
                self.require_primary("destroy mirror eSCO")?;
                self.push(Action::Link(LinkRequest::DestroyLink {
                    conn_handle: self.esco.conn_handle,
                    reason: HciStatus::SUCCESS,
                }));
            }
            MirrorState::A2dpConnecting => self.enter_a2dp_connecting(),
            MirrorState::A2dpDisconnecting => {
                if self.role.is_primary() {
                    self.push(Action::Link(LinkRequest::DestroyChannel { cid: self.a2dp.cid }));
                }
            }
            MirrorState::Disconnected
            | MirrorState::AclConnected
            | MirrorState::EscoConnected
            | MirrorState::A2dpConnected => {}
        }

        if self.role.is_primary() {
            self.peer_mode_set_target(new.peer_mode_requirement())?;
            self.sm_kick()?;
        }
        Ok(())
    }

    fn do_sm_transition(&mut self) -> Result<(), ProtocolViolation> {
        let next = self.state.next_step(self.target_state)?;
        if next == self.state {
            return Ok(());
        }
        let ready = match next.entry_peer_mode() {
            Some(mode) => self.peer_mode_set_target(mode)?,
            None => true,
        };
        if ready {
            self.set_state(next)?;
        } else {
            debug!("[MIRROR] {:?} waits for peer link {:?}", next, self.peer_mode.target);
        }
        Ok(())
    }

    /// Move towards the target state if nothing is in progress
    ///
    /// A kick after a failed link creation is deferred by the configured
    /// backoff instead.
    pub(crate) fn sm_kick(&mut self) -> Result<(), ProtocolViolation> {
        if !self.role.is_primary() {
            debug!("[MIRROR] kick ignored, not Primary");
            return Ok(());
        }

        if self.delay_kick {
            self.delay_kick = false;
            if self.target_state != self.state {
                debug!("[MIRROR] kick delayed");
                self.timers
                    .schedule(TimerId::DelayedKick, self.now + self.options.kick_backoff);
            }
            return Ok(());
        }

        if self.state.is_steady() && self.peer_mode.state.is_steady() {
            if self.channel.is_connected() {
                self.do_sm_transition()?;
                self.timers.cancel(TimerId::DelayedKick);
            } else {
                debug!("[MIRROR] kick ignored, audio sync channel disconnected");
            }
        }
        Ok(())
    }

    /// Set a new target state and kick the state machine
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation::UnsteadyTarget`] for a transitional
    /// target.
    pub(crate) fn set_target_state(&mut self, target: MirrorState) -> Result<(), ProtocolViolation> {
        if !target.is_steady() {
            return Err(ProtocolViolation::UnsteadyTarget(target));
        }
        if self.target_state != target {
            info!("[MIRROR] target {:?} -> {:?}", self.target_state, target);
        }
        self.target_state = target;
        self.sm_kick()
    }

    /// Derive the target state from the handset and peer state (Primary only)
    pub(crate) fn set_target_state_from_profile_state(&mut self) -> Result<(), ProtocolViolation> {
        if !self.role.is_primary() {
            return Ok(());
        }

        let mut target = MirrorState::Disconnected;
        if self.peer_sig_connected
            && self.channel.is_connected()
            && self.handset.is_any_profile_connected()
            && self.qhs_ready
        {
            target = MirrorState::AclConnected;
            if self.handset.is_sco_active()
                && self.options.enable_esco_mirroring
                && self.is_voice_source_supported()
            {
                target = MirrorState::EscoConnected;
            } else if self.a2dp.state == AudioSyncState::Active
                && self.options.enable_a2dp_mirroring
            {
                target = MirrorState::A2dpConnected;
            }
        }
        self.set_target_state(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MirrorProfileOptions;
    use crate::event::VoiceParameters;
    use crate::mirror::tests::{
        ACL_HANDLE, MEDIA_CID, connected_primary, connected_secondary, drain, voice_params,
    };
    use crate::peer::PeerLinkMode;
    use crate::l2cap::L2capSink;

    #[test]
    fn test_reentering_a_state_is_fatal() {
        let mut profile = connected_primary(MirrorProfileOptions::default());
        assert_eq!(
            profile.set_state(MirrorState::Disconnected),
            Err(ProtocolViolation::ReenteredState(MirrorState::Disconnected))
        );
    }

    #[test]
    fn test_secondary_cannot_create_links() {
        let mut profile = connected_secondary();
        assert_eq!(
            profile.set_state(MirrorState::AclConnecting),
            Err(ProtocolViolation::WrongRole("create mirror ACL"))
        );
    }

    #[test]
    fn test_target_derivation() {
        let mut profile = connected_primary(MirrorProfileOptions::default());
        profile.peer_mode.state = PeerLinkMode::Sniff;
        profile.set_target_state_from_profile_state().unwrap();
        assert_eq!(profile.target_state(), MirrorState::Disconnected);

        profile.handset.avrcp_connected = true;
        profile.qhs_ready = false;
        profile.set_target_state_from_profile_state().unwrap();
        assert_eq!(profile.target_state(), MirrorState::Disconnected);

        profile.qhs_ready = true;
        profile.a2dp.state = AudioSyncState::Active;
        profile.set_target_state_from_profile_state().unwrap();
        assert_eq!(profile.target_state(), MirrorState::A2dpConnected);

        // A mirrorable call wins over media
        profile.handset.voice = Some(voice_params());
        profile.set_target_state_from_profile_state().unwrap();
        assert_eq!(profile.target_state(), MirrorState::EscoConnected);

        // SCO cannot be mirrored
        profile.handset.voice = Some(VoiceParameters {
            codec_mode: HfpCodecMode::Narrowband,
            wesco: 0,
            tesco: 6,
        });
        profile.set_target_state_from_profile_state().unwrap();
        assert_eq!(profile.target_state(), MirrorState::A2dpConnected);

        profile.options.enable_a2dp_mirroring = false;
        profile.set_target_state_from_profile_state().unwrap();
        assert_eq!(profile.target_state(), MirrorState::AclConnected);
    }

    #[test]
    fn test_secondary_keeps_its_target() {
        let mut profile = connected_secondary();
        profile.handset.hfp_connected = true;
        profile.set_target_state_from_profile_state().unwrap();
        assert_eq!(profile.target_state(), MirrorState::Disconnected);
    }

    #[test]
    fn test_kick_waits_for_steady_peer_mode() {
        let mut profile = connected_primary(MirrorProfileOptions::default());
        profile.peer_mode.state = PeerLinkMode::EnteringSniff;
        profile.set_target_state(MirrorState::AclConnected).unwrap();
        assert_eq!(profile.state(), MirrorState::Disconnected);
        assert!(drain(&mut profile).is_empty());
    }

    #[test]
    fn test_unsteady_target_is_rejected() {
        let mut profile = connected_primary(MirrorProfileOptions::default());
        assert_eq!(
            profile.set_target_state(MirrorState::EscoConnecting),
            Err(ProtocolViolation::UnsteadyTarget(MirrorState::EscoConnecting))
        );
    }

    #[test]
    fn test_secondary_media_start_and_stop() {
        let mut profile = connected_secondary();
        profile.state = MirrorState::AclConnected;
        profile.acl.conn_handle = ACL_HANDLE;
        profile.a2dp.cid = MEDIA_CID;
        profile.a2dp.seid = 2;
        profile.a2dp.volume = 64;

        profile.set_state(MirrorState::A2dpConnecting).unwrap();
        assert!(profile.is_transition_locked());
        assert_eq!(profile.a2dp_start_lock, AUDIO_START);
        let actions = drain(&mut profile);
        assert_eq!(
            actions.as_slice(),
            &[
                Action::Audio(AudioRequest::PerformanceRequest),
                Action::Audio(AudioRequest::StartA2dpAudio {
                    params: profile.a2dp.stream_params(),
                    volume: 64,
                }),
                Action::Audio(AudioRequest::StartAudioSynchronisation {
                    sink: Some(L2capSink(0x0050)),
                }),
            ]
        );

        // The channel fails to come up: audio is stopped again
        profile.set_state(MirrorState::AclConnected).unwrap();
        assert!(!profile.is_transition_locked());
        assert_eq!(profile.a2dp_start_lock, AUDIO_START);
        assert_eq!(
            drain(&mut profile).as_slice(),
            &[
                Action::Audio(AudioRequest::PerformanceRelinquish),
                Action::Audio(AudioRequest::StopAudioSynchronisation {
                    sink: Some(L2capSink(0x0050)),
                }),
                Action::Audio(AudioRequest::StopA2dpAudio {
                    cid: MEDIA_CID,
                    seid: 2,
                }),
            ]
        );
    }

    #[test]
    fn test_leaving_acl_notifies_disconnect() {
        let mut profile = connected_secondary();
        profile.register_client(crate::ClientId(3)).unwrap();
        profile.state = MirrorState::AclConnected;
        profile.acl.bd_addr = crate::mirror::tests::handset_addr();

        profile.set_state(MirrorState::Disconnected).unwrap();
        assert_eq!(
            drain(&mut profile).as_slice(),
            &[Action::Notify {
                client: crate::ClientId(3),
                notification: Notification::DisconnectInd {
                    addr: crate::mirror::tests::handset_addr(),
                    reason: HciStatus::UNSPECIFIED,
                },
            }]
        );
    }
}
