//! Processor Task
//!
//! Runs the global [`MirrorProfile`]: it waits for input events, API
//! requests and the next internal deadline, feeds whichever arrives first to
//! the profile and executes the resulting actions against the platform.
//!
//! # Usage
//!
//! ```rust,no_run
//! use mirrorbird::{processor, ClientId, MirrorProfileOptions};
//!
//! # async fn example<P: mirrorbird::service::MirrorPlatform>(platform: &mut P) {
//! // Returns only when the profile hits a protocol violation
//! let violation = processor::run(MirrorProfileOptions::default(), platform, ClientId(0)).await;
//! // Reset the device
//! # let _ = violation;
//! # }
//! ```
//!
//! Events from the lower layers are posted with [`crate::api::send_event`],
//! requests go through the other functions of [`crate::api`].

use crate::action::ProtocolViolation;
use crate::service::{MirrorPlatform, dispatch};
use crate::{
    ClientId, EVENT_CHANNEL, MirrorProfile, MirrorProfileOptions, REQUEST_CHANNEL,
    RESPONSE_CHANNEL, Request, Response, init_mirror_profile, mirror_profile,
};
use embassy_futures::select::{Either3, select3};
use embassy_time::{Instant, Timer};

/// Execute every queued action. Stops at the first fatal one.
fn execute_actions<P: MirrorPlatform>(
    profile: &mut MirrorProfile,
    platform: &mut P,
) -> Result<(), ProtocolViolation> {
    while let Some(action) = profile.poll_action() {
        dispatch(platform, action)?;
    }
    Ok(())
}

/// Apply one API request to the profile
pub(crate) fn process_request(
    profile: &mut MirrorProfile,
    request: Request,
    task: ClientId,
    now: Instant,
) -> Response {
    match request {
        Request::Connect(addr) => match profile.connect(task, addr, now) {
            Ok(()) => Response::Ok,
            Err(e) => Response::Error(e),
        },
        Request::Disconnect => {
            profile.disconnect(task, now);
            Response::Ok
        }
        Request::SetRole(role) => {
            profile.set_role(role, now);
            Response::Ok
        }
        Request::SetEscoMirroring(enabled) => {
            profile.set_esco_mirroring(enabled, now);
            Response::Ok
        }
        Request::SetA2dpMirroring(enabled) => {
            profile.set_a2dp_mirroring(enabled, now);
            Response::Ok
        }
        Request::HfpAudioConnectConfirmation => {
            profile.handle_hfp_audio_connect_confirmation(now);
            Response::Ok
        }
        Request::GetState => Response::State(profile.state()),
        Request::GetA2dpStartMode => Response::A2dpStartMode(profile.a2dp_start_mode()),
        Request::IsConnected => Response::Connected(profile.is_connected()),
        Request::GetExpectedTransmissionTime => {
            Response::TransmissionTime(profile.expected_peer_link_transmission_time())
        }
    }
}

/// Run the mirror profile until it reports a protocol violation
///
/// `task` receives the initialisation, connect and disconnect confirmations
/// and is registered for notifications. The returned violation means the
/// device must be reset.
pub async fn run<P: MirrorPlatform>(
    options: MirrorProfileOptions,
    platform: &mut P,
    task: ClientId,
) -> ProtocolViolation {
    if let Err(e) = init_mirror_profile(options).await {
        warn!("[PROCESSOR] {}", e);
    }

    let mut next_deadline = match mirror_profile().await {
        Ok(mut profile) => {
            if profile.register_client(task).is_err() {
                warn!("[PROCESSOR] client table full");
            }
            profile.init(task, Instant::now());
            if let Err(violation) = execute_actions(&mut profile, platform) {
                return violation;
            }
            profile.next_deadline()
        }
        Err(e) => {
            error!("[PROCESSOR] {}", e);
            None
        }
    };

    let event_receiver = EVENT_CHANNEL.receiver();
    let request_receiver = REQUEST_CHANNEL.receiver();
    let response_sender = RESPONSE_CHANNEL.sender();

    loop {
        let timer = async move {
            match next_deadline {
                Some(deadline) => Timer::at(deadline).await,
                None => core::future::pending::<()>().await,
            }
        };
        let input = select3(event_receiver.receive(), request_receiver.receive(), timer).await;

        let mut response = None;
        let result = match mirror_profile().await {
            Ok(mut profile) => {
                let now = Instant::now();
                match input {
                    Either3::First(event) => {
                        profile.handle_event(event, now);
                    }
                    Either3::Second(request) => {
                        debug!("[PROCESSOR] API request {:?}", request);
                        response = Some(process_request(&mut profile, request, task, now));
                    }
                    Either3::Third(()) => profile.handle_timers(now),
                }
                let result = execute_actions(&mut profile, platform);
                next_deadline = profile.next_deadline();
                result
            }
            Err(e) => {
                error!("[PROCESSOR] {}", e);
                if let Either3::Second(_) = input {
                    response = Some(Response::Error(crate::MirrorError::NotInitialized));
                }
                Ok(())
            }
        };

        if let Some(response) = response {
            debug!("[PROCESSOR] API response {:?}", response);
            response_sender.send(response).await;
        }
        if let Err(violation) = result {
            error!("[PROCESSOR] stopping on {:?}", violation);
            return violation;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, MirrorStatus};
    use crate::mirror::tests::{connected_primary, peer_addr};
    use crate::service::tests::RecordingPlatform;
    use crate::{MirrorError, MirrorState, Role};

    #[test]
    fn test_queries() {
        let mut profile = connected_primary(MirrorProfileOptions::default());
        let now = Instant::from_millis(0);
        assert!(matches!(
            process_request(&mut profile, Request::GetState, ClientId(0), now),
            Response::State(MirrorState::Disconnected)
        ));
        assert!(matches!(
            process_request(&mut profile, Request::IsConnected, ClientId(0), now),
            Response::Connected(false)
        ));
        assert!(matches!(
            process_request(&mut profile, Request::GetExpectedTransmissionTime, ClientId(0), now),
            Response::TransmissionTime(_)
        ));
    }

    #[test]
    fn test_requests_change_the_profile() {
        let mut profile = MirrorProfile::new(MirrorProfileOptions::default());
        let now = Instant::from_millis(0);
        assert!(matches!(
            process_request(&mut profile, Request::SetRole(Role::Primary), ClientId(0), now),
            Response::Ok
        ));
        assert_eq!(profile.role(), Role::Primary);

        process_request(&mut profile, Request::SetA2dpMirroring(false), ClientId(0), now);
        assert!(!profile.options.enable_a2dp_mirroring);

        assert!(matches!(
            process_request(
                &mut profile,
                Request::Connect(crate::BluetoothAddress::ZERO),
                ClientId(0),
                now
            ),
            Response::Error(MirrorError::NoPeerAddress)
        ));
    }

    #[test]
    fn test_execute_actions() {
        let mut platform = RecordingPlatform::default();
        let mut profile = MirrorProfile::new(MirrorProfileOptions::default());
        profile
            .connect(ClientId(3), peer_addr(), Instant::from_millis(0))
            .unwrap();
        assert_eq!(execute_actions(&mut profile, &mut platform), Ok(()));
        assert_eq!(
            platform.confirmations.as_slice(),
            &[(ClientId(3), Some(MirrorStatus::PeerConnectFailed))]
        );

        profile.push(Action::Fatal(ProtocolViolation::ReenteredState(
            MirrorState::Disconnected,
        )));
        profile.push(Action::InitCfm(ClientId(3)));
        assert_eq!(
            execute_actions(&mut profile, &mut platform),
            Err(ProtocolViolation::ReenteredState(MirrorState::Disconnected))
        );
        assert!(profile.poll_action().is_some());
    }
}
