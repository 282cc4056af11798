//! Peer link mode state machine
//!
//! Moves the peer link between active and sniff mode. Only the Primary drives
//! transitions; the Secondary follows the mode changes the Primary causes.

use super::PeerLinkMode;
use crate::BluetoothAddress;
use crate::action::{Action, AudioRequest, PeerLinkRequest, ProtocolViolation, SniffParameters};
use crate::mirror::{MirrorProfile, MirrorState};
use crate::timer::TimerId;

/// Current and wanted mode of the peer link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerMode {
    /// Current mode
    pub state: PeerLinkMode,
    /// Mode the Primary is working towards
    pub target: PeerLinkMode,
}

impl PeerMode {
    /// The transitional mode leading from the current mode to the target, or
    /// the current mode if nothing needs to change
    #[must_use]
    pub const fn next_step(&self) -> PeerLinkMode {
        match (self.target, self.state) {
            (PeerLinkMode::Sniff, PeerLinkMode::Active) => PeerLinkMode::EnteringSniff,
            (PeerLinkMode::Active, PeerLinkMode::Sniff) => PeerLinkMode::ExitingSniff,
            _ => self.state,
        }
    }
}

impl MirrorProfile {
    /// Current peer link mode
    #[must_use]
    pub fn peer_mode(&self) -> PeerLinkMode {
        self.peer_mode.state
    }

    fn sniff_parameters(&self) -> SniffParameters {
        SniffParameters {
            max_interval: self.options.sniff_interval_slots,
            min_interval: self.options.sniff_interval_slots,
            attempt: self.options.sniff_attempt,
            timeout: self.options.sniff_timeout,
        }
    }

    fn peer_addr(&self) -> BluetoothAddress {
        self.peer_link.addr
    }

    pub(crate) fn peer_mode_set_state(&mut self, mode: PeerLinkMode) -> Result<(), ProtocolViolation> {
        debug!("[PEER_MODE] {:?} -> {:?}", self.peer_mode.state, mode);
        self.peer_mode.state = mode;

        match mode {
            PeerLinkMode::EnteringSniff => {
                let params = self.sniff_parameters();
                debug!(
                    "[PEER_MODE] enter sniff interval {} attempt {} timeout {}",
                    params.min_interval, params.attempt, params.timeout
                );
                self.push(Action::PeerLink(PeerLinkRequest::EnterSniff {
                    addr: self.peer_addr(),
                    params,
                }));
                self.timers.cancel(TimerId::IdlePeerEnterSniff);
            }
            PeerLinkMode::ExitingSniff => {
                self.push(Action::PeerLink(PeerLinkRequest::ExitSniff {
                    addr: self.peer_addr(),
                }));
                self.timers.cancel(TimerId::IdlePeerEnterSniff);
            }
            PeerLinkMode::Active | PeerLinkMode::Sniff => {}
        }

        if self.role.is_primary() {
            self.peer_mode_kick()?;
            self.sm_kick()?;
        }
        Ok(())
    }

    pub(crate) fn peer_mode_kick(&mut self) -> Result<(), ProtocolViolation> {
        if !self.peer_mode.state.is_steady() || !self.channel.is_connected() {
            return Ok(());
        }

        let next = self.peer_mode.next_step();
        if next == PeerLinkMode::ExitingSniff && self.state != MirrorState::AclConnected {
            // Active mode is only requested from the base ACL state
            return Ok(());
        }
        if next != self.peer_mode.state {
            self.peer_mode_set_state(next)?;
        }
        Ok(())
    }

    /// Ask for a peer link mode. Returns whether the link is already in it;
    /// otherwise the caller has to wait for the mode change.
    pub(crate) fn peer_mode_set_target(
        &mut self,
        target: PeerLinkMode,
    ) -> Result<bool, ProtocolViolation> {
        if !target.is_steady() {
            return Err(ProtocolViolation::InvalidPeerModeTransition(target));
        }
        debug!("[PEER_MODE] target {:?}", target);
        self.peer_mode.target = target;
        if self.peer_mode.state != target {
            self.peer_mode_kick()?;
            return Ok(false);
        }
        Ok(true)
    }

    pub(crate) fn handle_peer_mode_changed(
        &mut self,
        mode: PeerLinkMode,
    ) -> Result<(), ProtocolViolation> {
        if !mode.is_steady() {
            return Err(ProtocolViolation::InvalidPeerModeTransition(mode));
        }
        info!(
            "[PEER_MODE] mode changed to {:?} in {:?}/{:?}",
            mode, self.state, self.peer_mode.state
        );
        self.peer_mode_set_state(mode)?;
        if self.role.is_primary() {
            self.peer_mode_kick()?;
        } else {
            // Track the mode the Primary chose
            self.peer_mode.target = mode;
        }

        if mode == PeerLinkMode::Active {
            // Leaving sniff means audio is about to start
            self.push(Action::Audio(AudioRequest::ProspectiveDspPowerOn));
        }
        self.timers.cancel(TimerId::IdlePeerEnterSniff);
        Ok(())
    }

    pub(crate) fn handle_peer_link_connected(&mut self, addr: BluetoothAddress) {
        info!("[PEER_MODE] peer link connected {:?}", addr);
        self.peer_link.connected = true;
        self.peer_link.addr = addr;
        self.timers.schedule(
            TimerId::IdlePeerEnterSniff,
            self.now + self.options.idle_peer_enter_sniff_timeout,
        );
    }

    pub(crate) fn handle_peer_link_disconnected(&mut self) -> Result<(), ProtocolViolation> {
        info!("[PEER_MODE] peer link disconnected");
        self.peer_link.connected = false;
        self.peer_mode_set_state(PeerLinkMode::Active)?;
        self.peer_mode.target = PeerLinkMode::Active;
        Ok(())
    }

    pub(crate) fn handle_idle_peer_enter_sniff(&mut self) -> Result<(), ProtocolViolation> {
        debug!("[PEER_MODE] idle peer link, enter sniff");
        self.link_policy_init();
        self.peer_mode_set_target(PeerLinkMode::Sniff)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::l2cap::AudioSyncL2capState;
    use crate::mirror::tests::{connected_primary, drain, peer_addr};
    use crate::{MirrorProfileOptions, Role};
    use embassy_time::Instant;

    #[test]
    fn test_next_step() {
        let mut mode = PeerMode::default();
        assert_eq!(mode.next_step(), PeerLinkMode::Active);
        mode.target = PeerLinkMode::Sniff;
        assert_eq!(mode.next_step(), PeerLinkMode::EnteringSniff);
        mode.state = PeerLinkMode::EnteringSniff;
        assert_eq!(mode.next_step(), PeerLinkMode::EnteringSniff);
        mode.state = PeerLinkMode::Sniff;
        mode.target = PeerLinkMode::Active;
        assert_eq!(mode.next_step(), PeerLinkMode::ExitingSniff);
    }

    #[test]
    fn test_set_target_requires_connected_channel() {
        let mut profile = MirrorProfile::new(MirrorProfileOptions::default());
        profile.role = Role::Primary;
        assert_eq!(profile.peer_mode_set_target(PeerLinkMode::Sniff), Ok(false));
        assert_eq!(profile.peer_mode(), PeerLinkMode::Active);
        assert!(drain(&mut profile).is_empty());
        assert_eq!(profile.peer_mode_set_target(PeerLinkMode::Active), Ok(true));
    }

    #[test]
    fn test_enter_sniff_uses_configured_parameters() {
        let mut profile = connected_primary(MirrorProfileOptions {
            sniff_interval_slots: 80,
            ..MirrorProfileOptions::default()
        });

        assert_eq!(profile.peer_mode_set_target(PeerLinkMode::Sniff), Ok(false));
        assert_eq!(profile.peer_mode(), PeerLinkMode::EnteringSniff);
        assert_eq!(
            drain(&mut profile).as_slice(),
            &[Action::PeerLink(PeerLinkRequest::EnterSniff {
                addr: peer_addr(),
                params: SniffParameters {
                    max_interval: 80,
                    min_interval: 80,
                    attempt: 2,
                    timeout: 2,
                },
            })]
        );
    }

    #[test]
    fn test_exit_sniff_only_from_acl_connected() {
        let mut profile = connected_primary(MirrorProfileOptions::default());
        profile.peer_mode.state = PeerLinkMode::Sniff;

        assert_eq!(profile.peer_mode_set_target(PeerLinkMode::Active), Ok(false));
        assert_eq!(profile.peer_mode(), PeerLinkMode::Sniff);
        assert!(drain(&mut profile).is_empty());

        profile.state = MirrorState::AclConnected;
        profile.target_state = MirrorState::AclConnected;
        profile.peer_mode_kick().unwrap();
        assert_eq!(profile.peer_mode(), PeerLinkMode::ExitingSniff);
        assert_eq!(
            drain(&mut profile).as_slice(),
            &[Action::PeerLink(PeerLinkRequest::ExitSniff { addr: peer_addr() })]
        );
    }

    #[test]
    fn test_secondary_follows_mode_changes() {
        let mut profile = MirrorProfile::new(MirrorProfileOptions::default());
        profile.handle_peer_mode_changed(PeerLinkMode::Sniff).unwrap();
        assert_eq!(profile.peer_mode.state, PeerLinkMode::Sniff);
        assert_eq!(profile.peer_mode.target, PeerLinkMode::Sniff);
        assert!(drain(&mut profile).is_empty());

        profile.handle_peer_mode_changed(PeerLinkMode::Active).unwrap();
        assert_eq!(profile.peer_mode.target, PeerLinkMode::Active);
        assert_eq!(
            drain(&mut profile).as_slice(),
            &[Action::Audio(AudioRequest::ProspectiveDspPowerOn)]
        );
    }

    #[test]
    fn test_transitional_mode_change_is_rejected() {
        let mut profile = MirrorProfile::new(MirrorProfileOptions::default());
        assert_eq!(
            profile.handle_peer_mode_changed(PeerLinkMode::EnteringSniff),
            Err(ProtocolViolation::InvalidPeerModeTransition(
                PeerLinkMode::EnteringSniff
            ))
        );
    }

    #[test]
    fn test_idle_peer_link_enters_sniff() {
        let mut profile = connected_primary(MirrorProfileOptions::default());
        profile.now = Instant::from_millis(0);
        profile.handle_peer_link_connected(peer_addr());
        assert_eq!(
            profile.timers.deadline(TimerId::IdlePeerEnterSniff),
            Some(Instant::from_secs(10))
        );

        profile.handle_idle_peer_enter_sniff().unwrap();
        assert_eq!(profile.peer_mode(), PeerLinkMode::EnteringSniff);
        assert!(!profile.timers.is_pending(TimerId::IdlePeerEnterSniff));
        assert!(profile.timers.is_pending(TimerId::PeerLinkPolicyIdleTimeout));
    }

    #[test]
    fn test_peer_link_disconnect_resets_mode() {
        let mut profile = connected_primary(MirrorProfileOptions::default());
        profile.peer_mode.state = PeerLinkMode::Sniff;
        profile.peer_mode.target = PeerLinkMode::Sniff;
        profile.channel.state = AudioSyncL2capState::None;

        profile.handle_peer_link_disconnected().unwrap();
        assert_eq!(profile.peer_mode, PeerMode::default());
        assert!(!profile.peer_link.connected);
    }
}
