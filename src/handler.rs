use async_trait::async_trait;

use crate::request::Request;
use crate::session::ClientSession;

/// The callback surface a host program implements to drive the server.
///
/// `socket-flow` itself hands the host an `Event` stream to match against;
/// here the host instead implements one trait object shared across every
/// connection, the shape `wstunnel` and `salvo` both use for their
/// request-handling seams. Every method has a default so a handler only
/// needs to override what it cares about.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Called once the listener is bound and the event loop is about to
    /// start running.
    async fn on_server_start(&self) {}

    /// Called after the event loop has returned, before the process exits.
    async fn on_server_stop(&self) {}

    /// A server-level failure that does not belong to any one session
    /// (e.g. `accept` failing).
    async fn on_server_error(&self, message: &str) {
        log::error!("server error: {message}");
    }

    /// A session-level failure worth surfacing to the host even though the
    /// session itself already knows how to recover or disconnect.
    async fn on_socket_error(&self, code: u16, message: &str) {
        log::warn!("socket error {code}: {message}");
    }

    /// Called once the upgrade request has been parsed and validated, but
    /// before the handshake response is written. Returning `false` rejects
    /// the connection with a 400 and closes the socket without ever
    /// reaching `Handshaken`.
    async fn on_client_connect(&self, _session: &mut ClientSession, _request: &Request) -> bool {
        true
    }

    /// Called once an accepted session has transitioned to `Closed`,
    /// whether the peer closed cleanly or timed out. Not called for a
    /// connection `on_client_connect` rejected or whose request never
    /// validated — those never reach `acceptRequest`, so there is nothing
    /// for the host to tear down.
    async fn on_client_disconnect(&self, _session_id: uuid::Uuid) {}

    /// Called once a full message has been reassembled off the wire.
    /// Returning `false` disconnects the session after this call returns.
    async fn on_data_receive(&self, _session: &mut ClientSession, _payload: Vec<u8>) -> bool {
        true
    }
}
