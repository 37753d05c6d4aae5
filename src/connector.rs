use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

use crate::config::Target;

/// Connects to the target's Unix socket and sends the `CONNECT` request line.
///
/// The connect is non-blocking: an in-progress connection is completed by the reactor
/// when the socket becomes writable.
pub async fn connect(target: &Target) -> anyhow::Result<UnixStream> {
    let mut socket = UnixStream::connect(target.socket_path())
        .await
        .with_context(|| {
            format!(
                "Failed to connect to socket {}",
                target.socket_path().display()
            )
        })?;

    let request = target.request_line();
    debug!("Sending handshake request {:?}", request);
    socket
        .write_all(request.as_bytes())
        .await
        .with_context(|| format!("Failed to send handshake request to {}", target))?;

    Ok(socket)
}
