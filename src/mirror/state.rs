//! Mirror connection states
//!
//! The eSCO and A2DP states are nested inside the ACL connected state. The
//! nesting is expressed with predicates instead of bit patterns:
//!
//! ```text
//! Disconnected
//! AclConnecting
//! AclConnected ─┬─ EscoConnecting / EscoConnected / EscoDisconnecting
//!               └─ A2dpConnecting / A2dpConnected / A2dpDisconnecting
//! AclDisconnecting
//! ```

use crate::action::ProtocolViolation;
use crate::peer::PeerLinkMode;

/// State of the mirror connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MirrorState {
    /// No mirror link
    #[default]
    Disconnected,
    /// Mirror ACL being created (Primary)
    AclConnecting,
    /// Mirror ACL connected
    AclConnected,
    /// Mirror ACL being destroyed
    AclDisconnecting,
    /// Mirror eSCO being created
    EscoConnecting,
    /// Mirror eSCO connected
    EscoConnected,
    /// Mirror eSCO being destroyed
    EscoDisconnecting,
    /// Mirror A2DP channel being created
    A2dpConnecting,
    /// Mirror A2DP channel connected
    A2dpConnected,
    /// Mirror A2DP channel being destroyed
    A2dpDisconnecting,
}

impl MirrorState {
    /// A state the machine does not leave on its own
    #[must_use]
    pub const fn is_steady(self) -> bool {
        matches!(
            self,
            MirrorState::Disconnected
                | MirrorState::AclConnected
                | MirrorState::EscoConnected
                | MirrorState::A2dpConnected
        )
    }

    /// The mirror ACL is up; true for every eSCO and A2DP state
    #[must_use]
    pub const fn is_acl_connected(self) -> bool {
        matches!(
            self,
            MirrorState::AclConnected
                | MirrorState::EscoConnecting
                | MirrorState::EscoConnected
                | MirrorState::EscoDisconnecting
                | MirrorState::A2dpConnecting
                | MirrorState::A2dpConnected
                | MirrorState::A2dpDisconnecting
        )
    }

    /// The mirror eSCO is up
    #[must_use]
    pub const fn is_esco_connected(self) -> bool {
        matches!(self, MirrorState::EscoConnected)
    }

    /// The mirror A2DP channel is up
    #[must_use]
    pub const fn is_a2dp_connected(self) -> bool {
        matches!(self, MirrorState::A2dpConnected)
    }

    /// Peer link mode needed before this state may be entered
    #[must_use]
    pub const fn peer_mode_requirement(self) -> PeerLinkMode {
        match self {
            MirrorState::EscoConnecting => PeerLinkMode::Active,
            _ => PeerLinkMode::Sniff,
        }
    }

    /// Peer link mode needed before this state may be entered, for the states
    /// that have a prerequisite
    #[must_use]
    pub const fn entry_peer_mode(self) -> Option<PeerLinkMode> {
        match self {
            MirrorState::AclConnecting => Some(PeerLinkMode::Sniff),
            MirrorState::EscoConnecting => Some(PeerLinkMode::Active),
            _ => None,
        }
    }

    /// The one transitional state that moves from this steady state towards
    /// `target`. Returns `self` when no step is needed.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation::UnsteadyTarget`] if `target` is not a
    /// steady state.
    pub const fn next_step(self, target: MirrorState) -> Result<MirrorState, ProtocolViolation> {
        use MirrorState::{
            A2dpConnected, A2dpConnecting, A2dpDisconnecting, AclConnected, AclConnecting,
            AclDisconnecting, Disconnected, EscoConnected, EscoConnecting, EscoDisconnecting,
        };

        let next = match (target, self) {
            (Disconnected, AclConnected) => AclDisconnecting,
            (Disconnected | AclConnected | A2dpConnected, EscoConnected) => EscoDisconnecting,
            (Disconnected | AclConnected | EscoConnected, A2dpConnected) => A2dpDisconnecting,
            (AclConnected | EscoConnected | A2dpConnected, Disconnected) => AclConnecting,
            (EscoConnected, AclConnected) => EscoConnecting,
            (A2dpConnected, AclConnected) => A2dpConnecting,
            (Disconnected | AclConnected | EscoConnected | A2dpConnected, _) => self,
            _ => return Err(ProtocolViolation::UnsteadyTarget(target)),
        };
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MirrorState::*;

    const ALL: [MirrorState; 10] = [
        Disconnected,
        AclConnecting,
        AclConnected,
        AclDisconnecting,
        EscoConnecting,
        EscoConnected,
        EscoDisconnecting,
        A2dpConnecting,
        A2dpConnected,
        A2dpDisconnecting,
    ];

    #[test]
    fn test_membership() {
        for state in ALL {
            assert!(!(state.is_esco_connected() && state.is_a2dp_connected()));
            if state != Disconnected && state != AclConnecting && state != AclDisconnecting {
                assert!(state.is_acl_connected(), "{state:?}");
            }
        }
        assert!(!Disconnected.is_acl_connected());
        assert!(!AclConnecting.is_acl_connected());
        assert!(!AclDisconnecting.is_acl_connected());
        assert!(EscoDisconnecting.is_acl_connected());
        assert!(!EscoConnecting.is_esco_connected());
        assert!(!A2dpDisconnecting.is_a2dp_connected());
    }

    #[test]
    fn test_steady_states() {
        let steady: heapless::Vec<MirrorState, 10> =
            ALL.iter().copied().filter(|s| s.is_steady()).collect();
        assert_eq!(
            steady.as_slice(),
            &[Disconnected, AclConnected, EscoConnected, A2dpConnected]
        );
    }

    #[test]
    fn test_transition_table() {
        let table = [
            (Disconnected, AclConnected, AclDisconnecting),
            (Disconnected, EscoConnected, EscoDisconnecting),
            (Disconnected, A2dpConnected, A2dpDisconnecting),
            (AclConnected, Disconnected, AclConnecting),
            (AclConnected, EscoConnected, EscoDisconnecting),
            (AclConnected, A2dpConnected, A2dpDisconnecting),
            (EscoConnected, Disconnected, AclConnecting),
            (EscoConnected, AclConnected, EscoConnecting),
            (EscoConnected, A2dpConnected, A2dpDisconnecting),
            (A2dpConnected, Disconnected, AclConnecting),
            (A2dpConnected, AclConnected, A2dpConnecting),
            (A2dpConnected, EscoConnected, EscoDisconnecting),
        ];
        for (target, current, next) in table {
            assert_eq!(current.next_step(target), Ok(next), "{current:?} -> {target:?}");
        }
        for state in ALL {
            if state.is_steady() {
                assert_eq!(state.next_step(state), Ok(state));
            }
        }
        assert_eq!(AclConnecting.next_step(A2dpConnected), Ok(AclConnecting));
    }

    #[test]
    fn test_unsteady_target() {
        assert_eq!(
            Disconnected.next_step(AclConnecting),
            Err(ProtocolViolation::UnsteadyTarget(AclConnecting))
        );
    }

    #[test]
    fn test_peer_mode_requirement() {
        assert_eq!(EscoConnecting.peer_mode_requirement(), PeerLinkMode::Active);
        assert_eq!(A2dpConnected.peer_mode_requirement(), PeerLinkMode::Sniff);
        assert_eq!(AclConnecting.entry_peer_mode(), Some(PeerLinkMode::Sniff));
        assert_eq!(A2dpConnecting.entry_peer_mode(), None);
    }
}
