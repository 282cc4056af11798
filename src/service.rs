//! Collaborator Interfaces
//!
//! The layers the mirror profile drives: the link request service that
//! creates mirror links, the L2CAP and SDP layers, peer link power control,
//! the audio subsystem, peer signalling and the clients of the profile.
//! A platform implements all of them and [`dispatch`] routes each [`Action`]
//! to the right one.

use crate::ClientId;
use crate::action::{
    Action, AudioRequest, LinkRequest, MirrorStatus, Notification, PeerLinkRequest,
    ProtocolViolation,
};
use crate::audio_sync::AudioSyncResponse;
use crate::constants::PEER_SIG_MSG_CHANNEL_MIRROR_PROFILE;
use crate::l2cap::L2capRequest;

/// Creates and destroys mirror links and mirror L2CAP channels
pub trait LinkRequestService {
    /// Issue a request; the result arrives as a [`crate::event::LinkEvent`]
    fn link_request(&mut self, request: LinkRequest);
}

/// The L2CAP and SDP layers used by the audio sync channel
pub trait L2capService {
    /// Issue a request; the result arrives as a [`crate::l2cap::L2capEvent`]
    fn l2cap_request(&mut self, request: L2capRequest);
}

/// Power mode control of the peer link
pub trait PeerLinkControl {
    /// Issue a request; mode changes arrive as
    /// [`crate::event::PeerLinkEvent::ModeChanged`]
    fn peer_link_request(&mut self, request: PeerLinkRequest);
}

/// The audio subsystem and the audio sources the profile mirrors
pub trait AudioControl {
    /// Issue a request
    fn audio_request(&mut self, request: AudioRequest);

    /// Answer a connect or activate indication from the audio source
    fn audio_sync_response(&mut self, response: AudioSyncResponse);
}

/// Reliable message channel to the mirror profile on the peer earbud
pub trait PeerSignalling {
    /// Send an encoded mirror profile message on the given logical channel
    fn send(&mut self, channel: u8, payload: &[u8]);
}

/// Tasks waiting for confirmations and notifications
pub trait ClientNotifier {
    /// Deliver a notification to a registered client
    fn notify(&mut self, client: ClientId, notification: Notification);

    /// Initialisation finished
    fn init_cfm(&mut self, client: ClientId);

    /// A connect request finished
    fn connect_cfm(&mut self, client: ClientId, status: MirrorStatus);

    /// A disconnect request finished
    fn disconnect_cfm(&mut self, client: ClientId, status: MirrorStatus);
}

/// Everything the mirror profile needs from its platform
pub trait MirrorPlatform:
    LinkRequestService + L2capService + PeerLinkControl + AudioControl + PeerSignalling + ClientNotifier
{
}

impl<T> MirrorPlatform for T where
    T: LinkRequestService
        + L2capService
        + PeerLinkControl
        + AudioControl
        + PeerSignalling
        + ClientNotifier
{
}

/// Execute one action against the platform
///
/// # Errors
///
/// Returns the [`ProtocolViolation`] carried by [`Action::Fatal`]. The caller
/// must not continue running the profile after that.
pub fn dispatch<P: MirrorPlatform>(platform: &mut P, action: Action) -> Result<(), ProtocolViolation> {
    match action {
        Action::Link(request) => platform.link_request(request),
        Action::L2cap(request) => platform.l2cap_request(request),
        Action::PeerLink(request) => platform.peer_link_request(request),
        Action::Audio(request) => platform.audio_request(request),
        Action::PeerSignal(message) => match message.to_bytes() {
            Ok(bytes) => platform.send(PEER_SIG_MSG_CHANNEL_MIRROR_PROFILE, &bytes),
            Err(e) => error!("[MIRROR] failed to encode {:?}: {:?}", message, e),
        },
        Action::Notify {
            client,
            notification,
        } => platform.notify(client, notification),
        Action::AudioSyncResponse(response) => platform.audio_sync_response(response),
        Action::InitCfm(client) => platform.init_cfm(client),
        Action::ConnectCfm { client, status } => platform.connect_cfm(client, status),
        Action::DisconnectCfm { client, status } => platform.disconnect_cfm(client, status),
        Action::Fatal(violation) => return Err(violation),
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use heapless::Vec;

    /// Platform that records every call
    #[derive(Debug, Default)]
    pub(crate) struct RecordingPlatform {
        pub links: Vec<LinkRequest, 16>,
        pub l2cap: Vec<L2capRequest, 16>,
        pub peer_link: Vec<PeerLinkRequest, 16>,
        pub audio: Vec<AudioRequest, 16>,
        pub peer_messages: Vec<Vec<u8, 32>, 16>,
        pub notifications: Vec<(ClientId, Notification), 16>,
        pub sync_responses: Vec<AudioSyncResponse, 16>,
        pub confirmations: Vec<(ClientId, Option<MirrorStatus>), 16>,
    }

    impl LinkRequestService for RecordingPlatform {
        fn link_request(&mut self, request: LinkRequest) {
            self.links.push(request).unwrap();
        }
    }

    impl L2capService for RecordingPlatform {
        fn l2cap_request(&mut self, request: L2capRequest) {
            self.l2cap.push(request).unwrap();
        }
    }

    impl PeerLinkControl for RecordingPlatform {
        fn peer_link_request(&mut self, request: PeerLinkRequest) {
            self.peer_link.push(request).unwrap();
        }
    }

    impl AudioControl for RecordingPlatform {
        fn audio_request(&mut self, request: AudioRequest) {
            self.audio.push(request).unwrap();
        }

        fn audio_sync_response(&mut self, response: AudioSyncResponse) {
            self.sync_responses.push(response).unwrap();
        }
    }

    impl PeerSignalling for RecordingPlatform {
        fn send(&mut self, channel: u8, payload: &[u8]) {
            assert_eq!(channel, PEER_SIG_MSG_CHANNEL_MIRROR_PROFILE);
            self.peer_messages
                .push(Vec::from_slice(payload).unwrap())
                .unwrap();
        }
    }

    impl ClientNotifier for RecordingPlatform {
        fn notify(&mut self, client: ClientId, notification: Notification) {
            self.notifications.push((client, notification)).unwrap();
        }

        fn init_cfm(&mut self, client: ClientId) {
            self.confirmations.push((client, None)).unwrap();
        }

        fn connect_cfm(&mut self, client: ClientId, status: MirrorStatus) {
            self.confirmations.push((client, Some(status))).unwrap();
        }

        fn disconnect_cfm(&mut self, client: ClientId, status: MirrorStatus) {
            self.confirmations.push((client, Some(status))).unwrap();
        }
    }

    #[test]
    fn test_dispatch_routes_actions() {
        let mut platform = RecordingPlatform::default();
        dispatch(&mut platform, Action::Link(LinkRequest::Register)).unwrap();
        dispatch(&mut platform, Action::L2cap(L2capRequest::RegisterPsm)).unwrap();
        dispatch(
            &mut platform,
            Action::Audio(AudioRequest::ProspectiveDspPowerOn),
        )
        .unwrap();
        dispatch(&mut platform, Action::InitCfm(ClientId(1))).unwrap();

        assert_eq!(platform.links.as_slice(), &[LinkRequest::Register]);
        assert_eq!(platform.l2cap.as_slice(), &[L2capRequest::RegisterPsm]);
        assert_eq!(
            platform.audio.as_slice(),
            &[AudioRequest::ProspectiveDspPowerOn]
        );
        assert_eq!(platform.confirmations.as_slice(), &[(ClientId(1), None)]);
    }

    #[test]
    fn test_dispatch_encodes_peer_messages() {
        use crate::mirror::signalling::MirrorMessage;

        let mut platform = RecordingPlatform::default();
        dispatch(
            &mut platform,
            Action::PeerSignal(MirrorMessage::HfpVolume { volume: 9 }),
        )
        .unwrap();

        assert_eq!(platform.peer_messages.len(), 1);
        assert_eq!(
            MirrorMessage::from_bytes(&platform.peer_messages[0]),
            Ok(MirrorMessage::HfpVolume { volume: 9 })
        );
    }

    #[test]
    fn test_dispatch_reports_fatal() {
        let mut platform = RecordingPlatform::default();
        let violation = ProtocolViolation::WrongRole("test");
        assert_eq!(
            dispatch(&mut platform, Action::Fatal(violation)),
            Err(violation)
        );
    }
}
