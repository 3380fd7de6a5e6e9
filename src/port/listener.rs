use tokio::{io::AsyncWriteExt, net::TcpListener, sync::oneshot};
use tracing::{debug, trace};

use super::{codec, CommunicationPort, PortError, PortResult, Replier};

/// Body of a network-receive port's listener: serves exactly one request.
///
/// Accepts one connection, reads the request, hands it to the port's handler with a
/// [`Replier`] and waits for the reply. The acknowledgement handler sees the reply
/// before it is written back. The connection and the listening socket are closed on
/// return, so nothing can reach this port afterwards.
pub(super) async fn serve_once(port: CommunicationPort, listener: TcpListener) -> PortResult<()> {
    let max_frame_size = port.transport().max_frame_size;
    let (mut stream, peer) = listener.accept().await?;
    drop(listener);
    debug!("{}: accepted connection from {}", port.name(), peer);

    let request = codec::read_frame(&mut stream, max_frame_size).await?;
    port.record_request(&request);

    let (reply_tx, reply_rx) = oneshot::channel();
    let replier = Replier::new(move |reply| {
        // The listener may already have given up waiting.
        let _ = reply_tx.send(reply);
    });
    port.receive(request, Some(replier))?;

    let no_reply = || PortError::NoReply { port: port.name() };
    let reply = match port.transport().reply_timeout {
        Some(limit) => tokio::time::timeout(limit, reply_rx)
            .await
            .map_err(|_| PortError::Timeout {
                port: port.name(),
                timeout: limit,
            })?
            .map_err(|_| no_reply())?,
        None => reply_rx.await.map_err(|_| no_reply())?,
    };

    if let Some(ack) = port.ack_handler() {
        ack(&reply);
    }
    codec::write_frame(&mut stream, &reply, max_frame_size).await?;
    stream.shutdown().await?;
    trace!("{}: round trip complete", port.name());
    Ok(())
}
