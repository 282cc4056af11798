//! `Mirrorbird` API Functions
//!
//! Public functions for talking to the processor task started with
//! [`crate::processor::run`]. They use static channels, so they can be called
//! from any task of the application.
//!
//! # Usage
//!
//! ```rust,no_run
//! use mirrorbird::api::{connect, get_state, send_event};
//! use mirrorbird::event::{Event, PeerLinkEvent};
//! use mirrorbird::BluetoothAddress;
//!
//! # async fn example() -> Result<(), mirrorbird::MirrorError> {
//! let peer = BluetoothAddress::from_hex("00:02:5B:00:EB:07")?;
//!
//! // The connection manager reports the peer ACL
//! send_event(Event::PeerLink(PeerLinkEvent::Connected(peer))).await;
//!
//! // Become Primary and open the audio sync channel
//! connect(peer).await?;
//!
//! let state = get_state().await?;
//! # let _ = state;
//! # Ok(())
//! # }
//! ```

use crate::event::Event;
use crate::{
    A2dpStartMode, BluetoothAddress, EVENT_CHANNEL, MirrorError, MirrorState, REQUEST_CHANNEL,
    RESPONSE_CHANNEL, Request, Response, Role,
};

async fn request(request: Request) -> Response {
    REQUEST_CHANNEL.sender().send(request).await;
    RESPONSE_CHANNEL.receiver().receive().await
}

async fn request_ok(req: Request) -> Result<(), MirrorError> {
    match request(req).await {
        Response::Ok => Ok(()),
        Response::Error(e) => Err(e),
        _ => Err(MirrorError::InvalidState),
    }
}

/// Post an event from a lower layer to the mirror profile
pub async fn send_event(event: Event) {
    EVENT_CHANNEL.sender().send(event).await;
}

/// Become Primary and connect the audio sync channel to the peer earbud.
///
/// The outcome arrives later as a connect confirmation to the processor's
/// task.
///
/// # Errors
///
/// Returns an error for the all-zero address or if the response is unexpected.
pub async fn connect(peer_addr: BluetoothAddress) -> Result<(), MirrorError> {
    request_ok(Request::Connect(peer_addr)).await
}

/// Close the audio sync channel.
///
/// # Errors
///
/// Returns an error if the response is unexpected.
pub async fn disconnect() -> Result<(), MirrorError> {
    request_ok(Request::Disconnect).await
}

/// Apply the role decided by the application.
///
/// # Errors
///
/// Returns an error if the response is unexpected.
pub async fn set_role(role: Role) -> Result<(), MirrorError> {
    request_ok(Request::SetRole(role)).await
}

/// Enable or disable eSCO mirroring.
///
/// # Errors
///
/// Returns an error if the response is unexpected.
pub async fn set_esco_mirroring(enabled: bool) -> Result<(), MirrorError> {
    request_ok(Request::SetEscoMirroring(enabled)).await
}

/// Enable or disable A2DP mirroring.
///
/// # Errors
///
/// Returns an error if the response is unexpected.
pub async fn set_a2dp_mirroring(enabled: bool) -> Result<(), MirrorError> {
    request_ok(Request::SetA2dpMirroring(enabled)).await
}

/// Report that the local HFP audio connected.
///
/// # Errors
///
/// Returns an error if the response is unexpected.
pub async fn hfp_audio_connect_confirmation() -> Result<(), MirrorError> {
    request_ok(Request::HfpAudioConnectConfirmation).await
}

/// Get the mirror connection state.
///
/// # Errors
///
/// Returns an error if the profile is not initialized or the response is unexpected.
pub async fn get_state() -> Result<MirrorState, MirrorError> {
    match request(Request::GetState).await {
        Response::State(state) => Ok(state),
        Response::Error(e) => Err(e),
        _ => Err(MirrorError::InvalidState),
    }
}

/// Get how the local A2DP audio chain should start.
///
/// # Errors
///
/// Returns an error if the profile is not initialized or the response is unexpected.
pub async fn get_a2dp_start_mode() -> Result<A2dpStartMode, MirrorError> {
    match request(Request::GetA2dpStartMode).await {
        Response::A2dpStartMode(mode) => Ok(mode),
        Response::Error(e) => Err(e),
        _ => Err(MirrorError::InvalidState),
    }
}

/// Check whether a mirror link is up.
///
/// # Errors
///
/// Returns an error if the profile is not initialized or the response is unexpected.
pub async fn is_connected() -> Result<bool, MirrorError> {
    match request(Request::IsConnected).await {
        Response::Connected(connected) => Ok(connected),
        Response::Error(e) => Err(e),
        _ => Err(MirrorError::InvalidState),
    }
}

/// Get the expected transmission time on the peer link in microseconds.
///
/// # Errors
///
/// Returns an error if the profile is not initialized or the response is unexpected.
pub async fn get_expected_transmission_time() -> Result<u32, MirrorError> {
    match request(Request::GetExpectedTransmissionTime).await {
        Response::TransmissionTime(us) => Ok(us),
        Response::Error(e) => Err(e),
        _ => Err(MirrorError::InvalidState),
    }
}
