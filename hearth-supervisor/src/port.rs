//! Local TCP port availability probe

use tokio::net::TcpListener;
use tracing::debug;

/// Whether `port` can be bound on all interfaces right now.
///
/// The probe listener is dropped immediately, so the answer is only a
/// snapshot; the server may still lose a race for the port.
pub async fn is_port_free(port: u16) -> bool {
    match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(e) => {
            debug!(port, error = %e, "Port probe failed");
            false
        }
    }
}
