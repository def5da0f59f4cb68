//! Connection adapter
//!
//! Bridges one WebSocket to a document server: sends the initial snapshot,
//! drains the client's outbox onto the socket and feeds decoded requests into
//! the submit pipe until either side ends the session.

use crate::client::{client_channel, ClientHandle, ClientOutbox};
use crate::error::{TransportError, TransportResult};
use crate::registry::Registry;
use crate::session::{Connected, SubmitPipe};
use cowrite_core::{ClientId, DocumentId, Error};
use cowrite_protocol::{decode_operation, ClientRequest, CloseReason, ServerMessage};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

fn close_frame(reason: CloseReason) -> CloseFrame<'static> {
    let code = match reason {
        CloseReason::Terminating => CloseCode::Normal,
        CloseReason::Locked => CloseCode::Policy,
        CloseReason::Error => CloseCode::Protocol,
    };
    CloseFrame {
        code,
        reason: reason.as_str().into(),
    }
}

/// Serve one client of document `id` until the session ends.
pub async fn serve_connection<S>(
    mut ws: WebSocketStream<S>,
    registry: Arc<Registry>,
    id: DocumentId,
) -> TransportResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (handle, outbox) = client_channel(registry.config().outbound_capacity);

    let connected = match registry.attach(&id, handle.clone()).await {
        Ok(connected) => connected,
        Err(TransportError::Core(Error::DocumentLocked(_))) => {
            info!(doc_id = %id, "refusing client, document is locked");
            ws.close(Some(close_frame(CloseReason::Locked))).await?;
            return Ok(());
        }
        Err(e) => {
            let _ = ws.close(Some(close_frame(CloseReason::Error))).await;
            return Err(e);
        }
    };

    run_session(ws, connected, handle, outbox, registry.config().idle_timeout()).await
}

async fn run_session<S>(
    ws: WebSocketStream<S>,
    connected: Connected,
    handle: ClientHandle,
    outbox: ClientOutbox,
    idle_timeout: Option<Duration>,
) -> TransportResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let Connected {
        client_id,
        pipe,
        leave,
        snapshot,
    } = connected;
    let (mut sink, mut stream) = ws.split();

    let init = ServerMessage::init(snapshot.contents, snapshot.history_index).encode()?;
    if let Err(e) = sink.send(Message::Text(init)).await {
        let _ = leave.leave();
        handle.terminate(CloseReason::Error);
        return Err(e.into());
    }

    let writer = tokio::spawn(write_loop(sink, outbox, client_id));

    let reason = read_loop(&mut stream, &pipe, &handle, idle_timeout, client_id).await;

    if leave.leave().is_err() {
        debug!(client = %client_id, "session already removed by the server");
    }
    handle.terminate(reason);

    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(client = %client_id, error = %e, "WebSocket write error"),
        Err(e) => warn!(client = %client_id, error = %e, "WebSocket writer task failed"),
    }
    Ok(())
}

/// Read requests until the client leaves, misbehaves, idles out or the
/// server terminates the session. Returns the close reason to report.
async fn read_loop<S>(
    stream: &mut SplitStream<WebSocketStream<S>>,
    pipe: &SubmitPipe,
    handle: &ClientHandle,
    idle_timeout: Option<Duration>,
    client_id: ClientId,
) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let next = tokio::select! {
            // reason already recorded by whoever terminated us
            _ = handle.terminated() => return CloseReason::Terminating,
            next = next_frame(stream, idle_timeout) => next,
        };

        let msg = match next {
            Err(_) => {
                info!(client = %client_id, "closing idle session");
                return CloseReason::Terminating;
            }
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => {
                info!(client = %client_id, "WebSocket client disconnected");
                return CloseReason::Terminating;
            }
            Ok(Some(Err(e))) => {
                warn!(client = %client_id, error = %e, "WebSocket read error");
                return CloseReason::Error;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        let text = match msg {
            Message::Text(text) => text,
            Message::Binary(_) => {
                warn!(client = %client_id, "binary frames are not part of the protocol");
                return CloseReason::Error;
            }
            // ping, pong and raw frames
            _ => continue,
        };

        let op = match ClientRequest::decode(&text).and_then(|request| decode_operation(&request)) {
            Ok(op) => op,
            Err(e) => {
                warn!(client = %client_id, error = %e, "undecodable request");
                return CloseReason::Error;
            }
        };

        if let Err(e) = pipe.submit(op) {
            warn!(client = %client_id, error = %e, "submit refused");
            return CloseReason::Error;
        }
    }
}

async fn next_frame<S>(
    stream: &mut SplitStream<WebSocketStream<S>>,
    idle_timeout: Option<Duration>,
) -> Result<Option<Result<Message, tokio_tungstenite::tungstenite::Error>>, tokio::time::error::Elapsed>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, stream.next()).await,
        None => Ok(stream.next().await),
    }
}

async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbox: ClientOutbox,
    client_id: ClientId,
) -> TransportResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg) = outbox.next().await {
        sink.send(Message::Text(msg.encode()?)).await?;
    }

    let reason = outbox.close_reason();
    debug!(client = %client_id, reason = %reason, "closing WebSocket");
    if let Err(e) = sink.send(Message::Close(Some(close_frame(reason)))).await {
        // the peer may have closed first
        debug!(client = %client_id, error = %e, "close frame not sent");
    }
    let _ = sink.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_frame_reasons() {
        let frame = close_frame(CloseReason::Locked);
        assert_eq!(frame.reason, "locked");
        assert_eq!(frame.code, CloseCode::Policy);

        assert_eq!(close_frame(CloseReason::Terminating).reason, "terminating");
        assert_eq!(close_frame(CloseReason::Error).code, CloseCode::Protocol);
    }
}
