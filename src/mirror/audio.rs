//! Handset audio tracking and the audio sync sink
//!
//! The mirror profile registers as audio sync sink of the handset A2DP source.
//! Sync messages are parked while the state machine is in transition and
//! handled in order once it is steady again; at most one message of each kind
//! is parked.

use super::{AUDIO_START, MIRROR_START, MirrorProfile};
use crate::action::{Action, AudioRequest, ProtocolViolation};
use crate::audio_sync::{
    AudioSourceId, AudioSyncMessage, AudioSyncMessageKind, AudioSyncResponse,
    AudioSyncResponseKind, AudioSyncSink, AudioSyncState, SinkId,
};
use crate::constants::MIRROR_PROFILE_SYNC_SINK_ID;
use crate::event::{A2dpStreamParams, HandsetEvent, HandsetProfile};
use crate::peer::PeerLinkMode;
use crate::timer::TimerId;
use embassy_time::Instant;

impl MirrorProfile {
    pub(crate) fn handle_handset_event(
        &mut self,
        event: HandsetEvent,
    ) -> Result<(), ProtocolViolation> {
        match event {
            HandsetEvent::ProfileConnected { addr, profile } => {
                info!("[MIRROR] handset {:?} connected {:?}", profile, addr);
                self.handset.addr = addr;
                match profile {
                    HandsetProfile::Hfp => self.handset.hfp_connected = true,
                    HandsetProfile::Avrcp => self.handset.avrcp_connected = true,
                    HandsetProfile::A2dp => {
                        self.handset.a2dp_connected = true;
                        // The target follows once the source reports its state
                        if self.role.is_primary() {
                            self.push(Action::Audio(AudioRequest::RegisterSyncSink));
                        }
                        return Ok(());
                    }
                }
                self.set_target_state_from_profile_state()
            }
            HandsetEvent::ProfileDisconnected { profile } => {
                info!("[MIRROR] handset {:?} disconnected", profile);
                match profile {
                    HandsetProfile::Hfp => self.handset.hfp_connected = false,
                    HandsetProfile::Avrcp => self.handset.avrcp_connected = false,
                    HandsetProfile::A2dp => {
                        self.handset.a2dp_connected = false;
                        self.push(Action::Audio(AudioRequest::UnregisterSyncSink));
                        self.a2dp.state = AudioSyncState::Disconnected;
                    }
                }
                self.set_target_state_from_profile_state()
            }
            HandsetEvent::ScoConnected(voice) => {
                info!(
                    "[MIRROR] SCO connected codec {:?} tesco {}",
                    voice.codec_mode, voice.tesco
                );
                self.handset.voice = Some(voice);
                self.set_target_state_from_profile_state()
            }
            HandsetEvent::ScoDisconnected => {
                info!("[MIRROR] SCO disconnected");
                self.handset.voice = None;
                self.set_target_state_from_profile_state()
            }
            HandsetEvent::HfpVolume(volume) => {
                if self.role.is_primary() {
                    self.esco.volume = volume;
                    self.handset.hfp_volume = volume;
                    self.send_hfp_volume_to_secondary(volume);
                }
                Ok(())
            }
            HandsetEvent::A2dpVolume(volume) => {
                if self.role.is_primary() {
                    self.a2dp.volume = volume;
                    self.send_a2dp_volume_to_secondary(volume);
                }
                Ok(())
            }
            HandsetEvent::IncomingCall => {
                self.push(Action::Audio(AudioRequest::ProspectiveDspPowerOn));
                Ok(())
            }
            HandsetEvent::OutgoingCall => {
                // Get the peer link out of sniff before the call audio starts
                if self.role.is_primary() {
                    self.peer_mode_set_target(PeerLinkMode::Active)?;
                }
                Ok(())
            }
            HandsetEvent::CallEnded => Ok(()),
        }
    }

    pub(crate) fn handle_qhs_ready(&mut self) -> Result<(), ProtocolViolation> {
        self.qhs_ready = true;
        self.timers.cancel(TimerId::QhsStartTimeout);
        self.set_target_state_from_profile_state()
    }

    /// Decide who starts the call audio once the local HFP audio connected.
    ///
    /// When the call will be mirrored the notification waits for the mirror
    /// eSCO, so both earbuds start together.
    pub fn handle_hfp_audio_connect_confirmation(&mut self, now: Instant) {
        self.now = now;
        if self.is_connected()
            && self.options.enable_esco_mirroring
            && self.is_voice_source_supported()
        {
            debug!("[MIRROR] call audio waits for the mirror eSCO");
            self.hfp_voice_source_routed = false;
        } else {
            self.push(Action::Audio(AudioRequest::NotifyCallAudioConnected));
            self.hfp_voice_source_routed = true;
        }
    }

    /// Start the mirrored voice chain with the current eSCO context
    pub(crate) fn start_sco_audio(&mut self) {
        info!(
            "[MIRROR] start SCO audio codec {:?} wesco {} volume {}",
            self.esco.codec_mode, self.esco.wesco, self.esco.volume
        );
        self.push(Action::Audio(AudioRequest::StartScoAudio {
            conn_handle: self.esco.conn_handle,
            codec_mode: self.esco.codec_mode,
            wesco: self.esco.wesco,
            volume: self.esco.volume,
        }));
    }

    /// Apply a voice volume from the Primary
    pub(crate) fn set_sco_volume(&mut self, volume: u8) -> Result<(), ProtocolViolation> {
        if self.role.is_primary() {
            return Err(ProtocolViolation::WrongRole("set SCO volume"));
        }
        if self.esco.volume != volume {
            self.esco.volume = volume;
            self.push(Action::Audio(AudioRequest::SetVoiceVolume(volume)));
        }
        Ok(())
    }

    pub(crate) fn clear_audio_start_lock(&mut self) {
        debug!("[MIRROR] audio started, start lock 0x{:x}", self.a2dp_start_lock);
        self.a2dp_start_lock &= !AUDIO_START;
    }

    pub(crate) fn update_audio_source_parameters(
        &mut self,
        source_id: AudioSourceId,
        params: Option<A2dpStreamParams>,
    ) {
        let index = self.audio_sources.iter().position(|(id, _)| *id == source_id);
        match (params, index) {
            (Some(params), Some(index)) => self.audio_sources[index].1 = params,
            (Some(params), None) => {
                if self.audio_sources.push((source_id, params)).is_err() {
                    warn!("[MIRROR] no room for audio source {}", source_id);
                }
            }
            (None, Some(index)) => {
                self.audio_sources.swap_remove(index);
            }
            (None, None) => {}
        }
    }

    /// Copy the stream parameters of `source_id` into the A2DP context.
    /// Returns `false` if the source has no valid parameters.
    fn store_audio_source_parameters(&mut self, source_id: AudioSourceId) -> bool {
        let params = self
            .audio_sources
            .iter()
            .find(|(id, _)| *id == source_id)
            .map(|(_, params)| *params);
        match params {
            Some(params) => {
                self.a2dp.store(&params);
                true
            }
            None => false,
        }
    }

    fn remove_deferred(&mut self, kind: AudioSyncMessageKind) -> usize {
        let mut removed = 0;
        for _ in 0..self.deferred_sync.len() {
            if let Some(message) = self.deferred_sync.pop_front() {
                if message.kind() == kind {
                    removed += 1;
                } else if self.deferred_sync.push_back(message).is_err() {
                    error!("[MIRROR] deferred sync queue full");
                }
            }
        }
        removed
    }

    pub(crate) fn defer_sync_message(
        &mut self,
        message: AudioSyncMessage,
    ) -> Result<(), ProtocolViolation> {
        // Latest of each kind wins
        self.remove_deferred(message.kind());
        if self.deferred_sync.push_back(message).is_err() {
            error!("[MIRROR] deferred sync queue full, dropping {:?}", message.kind());
        }
        Ok(())
    }

    pub(crate) fn handle_sync_message(
        &mut self,
        message: AudioSyncMessage,
    ) -> Result<(), ProtocolViolation> {
        match message {
            AudioSyncMessage::ConnectInd(ind) => {
                if !self.store_audio_source_parameters(ind.source_id) {
                    warn!("[MIRROR] connect ind, invalid audio source parameters");
                    return Ok(());
                }
                info!("[MIRROR] audio sync connect ind sync id {}", ind.sync_id);
                self.a2dp.state = AudioSyncState::Connected;
                self.send_a2dp_stream_context_to_secondary();
                self.push(Action::AudioSyncResponse(AudioSyncResponse {
                    kind: AudioSyncResponseKind::Connect,
                    sync_id: ind.sync_id,
                }));
                self.set_target_state_from_profile_state()
            }
            AudioSyncMessage::ActivateInd(ind) => {
                if !self.store_audio_source_parameters(ind.source_id) {
                    warn!("[MIRROR] activate ind, invalid audio source parameters");
                    return Ok(());
                }
                info!("[MIRROR] audio sync activate ind sync id {}", ind.sync_id);
                // The Secondary picks its start mode from a Connected context
                self.a2dp.state = AudioSyncState::Connected;
                self.send_a2dp_stream_context_to_secondary();
                self.a2dp.state = AudioSyncState::Active;
                self.set_target_state_from_profile_state()?;

                if self.state.is_acl_connected() {
                    self.a2dp_start_lock |= MIRROR_START;
                }
                let response = AudioSyncResponse {
                    kind: AudioSyncResponseKind::Activate,
                    sync_id: ind.sync_id,
                };
                if self.held_responses.push_back(response).is_err() {
                    error!("[MIRROR] too many held responses, dropping {}", ind.sync_id);
                }
                Ok(())
            }
            AudioSyncMessage::StateInd(ind) => {
                info!("[MIRROR] audio sync state ind {:?}", ind.state);
                if ind.state == AudioSyncState::Connected {
                    self.store_audio_source_parameters(ind.source_id);
                }
                self.a2dp.state = ind.state;
                self.send_a2dp_stream_context_to_secondary();
                self.set_target_state_from_profile_state()
            }
            AudioSyncMessage::CodecReconfiguredInd(ind) => {
                if self.store_audio_source_parameters(ind.source_id) {
                    self.send_a2dp_stream_context_to_secondary();
                } else {
                    warn!("[MIRROR] codec reconfigured ind, invalid audio source parameters");
                }
                Ok(())
            }
        }
    }
}

impl AudioSyncSink for MirrorProfile {
    fn sink_id(&self) -> SinkId {
        MIRROR_PROFILE_SYNC_SINK_ID
    }

    fn send_sync_message(&mut self, message: AudioSyncMessage) {
        let result = self.defer_sync_message(message);
        self.finish(result);
    }

    fn cancel_sync_messages(&mut self, kind: AudioSyncMessageKind) -> usize {
        self.remove_deferred(kind)
    }
}
