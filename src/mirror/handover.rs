//! Handover hooks
//!
//! An external orchestrator swaps the Primary and Secondary roles of the two
//! earbuds while links stay up. It asks every profile whether a swap is safe
//! right now, commits the new role everywhere, and finally completes or
//! aborts the swap.

use super::MirrorProfile;
use crate::timer::TimerId;
use crate::Role;

/// Role-swap lifecycle implemented by profiles taking part in handover
pub trait HandoverInterface {
    /// Return `true` to refuse the handover at this moment
    fn veto(&self) -> bool;

    /// Apply the new role
    fn commit(&mut self, is_primary: bool);

    /// The handover finished on both earbuds
    fn complete(&mut self, is_primary: bool);

    /// The handover was abandoned before commit
    fn abort(&mut self);
}

impl HandoverInterface for MirrorProfile {
    fn veto(&self) -> bool {
        if !self.state.is_steady() {
            info!("[HANDOVER] veto, mirror state {:?}", self.state);
            return true;
        }
        if !self.peer_mode.state.is_steady() {
            info!("[HANDOVER] veto, peer mode {:?}", self.peer_mode.state);
            return true;
        }
        if self.timers.is_pending(TimerId::DelayedKick)
            || !self.deferred_sync.is_empty()
            || !self.held_responses.is_empty()
        {
            info!("[HANDOVER] veto, pending messages");
            return true;
        }
        if self.hfp_voice_source_routed && !self.state.is_esco_connected() {
            info!("[HANDOVER] veto, voice routed locally without mirror eSCO");
            return true;
        }
        false
    }

    fn commit(&mut self, is_primary: bool) {
        let role = Role::from_is_primary(is_primary);
        info!("[HANDOVER] commit {:?}", role);
        self.set_role(role, self.now);
    }

    fn complete(&mut self, is_primary: bool) {
        info!("[HANDOVER] complete, primary {}", is_primary);
        if is_primary {
            let result = self.set_target_state_from_profile_state();
            self.finish(result);
        }
    }

    fn abort(&mut self) {
        debug!("[HANDOVER] abort");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MirrorProfileOptions;
    use crate::audio_sync::{AudioSyncMessage, AudioSyncState, StateIndication};
    use crate::mirror::MirrorState;
    use crate::mirror::tests::{connected_primary, connected_secondary, drain, primary_with_mirror_acl};
    use crate::peer::PeerLinkMode;
    use embassy_time::Instant;

    #[test]
    fn test_veto_in_steady_idle_state() {
        let profile = connected_primary(MirrorProfileOptions::default());
        assert!(!profile.veto());
    }

    #[test]
    fn test_veto_reasons() {
        let mut profile = connected_primary(MirrorProfileOptions::default());
        profile.state = MirrorState::AclConnecting;
        assert!(profile.veto());
        profile.state = MirrorState::Disconnected;

        profile.peer_mode.state = PeerLinkMode::EnteringSniff;
        assert!(profile.veto());
        profile.peer_mode.state = PeerLinkMode::Sniff;

        profile
            .timers
            .schedule(TimerId::DelayedKick, Instant::from_millis(1_000));
        assert!(profile.veto());
        profile.timers.cancel(TimerId::DelayedKick);

        profile
            .deferred_sync
            .push_back(AudioSyncMessage::StateInd(StateIndication {
                source_id: 0,
                state: AudioSyncState::Connected,
                seid: 1,
            }))
            .unwrap();
        assert!(profile.veto());
        profile.deferred_sync.clear();

        profile.hfp_voice_source_routed = true;
        assert!(profile.veto());
        profile.state = MirrorState::EscoConnected;
        assert!(!profile.veto());
    }

    #[test]
    fn test_commit_swaps_role() {
        let mut profile = primary_with_mirror_acl();
        profile.commit(false);
        assert_eq!(profile.role(), Role::Secondary);

        // The new Secondary never drives links
        profile.target_state = MirrorState::Disconnected;
        profile.sm_kick().unwrap();
        assert_eq!(profile.state(), MirrorState::AclConnected);
        profile.abort();
        assert_eq!(profile.state(), MirrorState::AclConnected);
    }

    #[test]
    fn test_complete_retargets_new_primary() {
        let mut profile = connected_secondary();
        profile.state = MirrorState::AclConnected;
        profile.handset.hfp_connected = true;
        profile.peer_mode.state = PeerLinkMode::Sniff;

        profile.commit(true);
        profile.complete(true);
        assert_eq!(profile.target_state(), MirrorState::AclConnected);
        assert_eq!(profile.state(), MirrorState::AclConnected);
        assert!(drain(&mut profile).is_empty());
        assert_eq!(profile.violation(), None);
    }
}
