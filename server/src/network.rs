//! Websocket accept loop and per-connection protocol handling for the
//! mock coordination server.

use crate::session::MockSession;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{
    decode_client_frames, encode_frame, ClientMessage, ConnectionRefused, InvalidPacket,
    ServerMessage,
};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

type ConnectionResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type Sink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Accepts relay connections and serves one scripted session to each.
pub struct MockServer {
    listener: TcpListener,
    session: Arc<MockSession>,
}

impl MockServer {
    pub async fn bind(addr: &str, session: MockSession) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("mock server listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            session: Arc::new(session),
        })
    }

    /// The bound address; useful when binding to port 0 in tests.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. Each connection runs in its own task until the peer
    /// disconnects or shutdown is signalled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let session = Arc::clone(&self.session);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            info!("accepted connection from {peer}");
                            if let Err(e) = handle_connection(stream, session, shutdown).await {
                                warn!("connection from {peer} ended: {e}");
                            }
                        });
                    }
                    Err(e) => error!("accept failed: {e}"),
                },
            }
        }
    }
}

/// One connection: greet with RoomInfo, then answer the client until the
/// socket closes.
async fn handle_connection(
    stream: TcpStream,
    session: Arc<MockSession>,
    mut shutdown: watch::Receiver<bool>,
) -> ConnectionResult {
    let socket = accept_async(stream).await?;
    let (mut sink, mut stream) = socket.split();

    send_message(&mut sink, &ServerMessage::RoomInfo(session.room_info())).await?;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = sink.close().await;
                return Ok(());
            }
            incoming = stream.next() => match incoming {
                None => return Ok(()),
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&text, &mut sink, &session).await?;
                }
                Some(Ok(Message::Close(_))) => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}

async fn handle_frame(text: &str, sink: &mut Sink, session: &MockSession) -> ConnectionResult {
    debug!("received frame: {text}");

    let messages = match decode_client_frames(text) {
        Ok(messages) => messages,
        Err(e) => {
            // The real server reports malformed traffic instead of
            // silently dropping it.
            warn!("unable to decode client frame: {e}");
            return send_message(
                sink,
                &ServerMessage::InvalidPacket(InvalidPacket {
                    text: e.to_string(),
                    original_cmd: None,
                }),
            )
            .await;
        }
    };

    for message in messages {
        match message {
            ClientMessage::GetDataPackage(request) => {
                info!("serving metadata for {:?}", request.games);
                send_message(
                    sink,
                    &ServerMessage::DataPackage(session.data_package_for(&request.games)),
                )
                .await?;
            }
            ClientMessage::Connect(join) => {
                if let Some(errors) = &session.refusal {
                    info!("refusing join from {}", join.name);
                    send_message(
                        sink,
                        &ServerMessage::ConnectionRefused(ConnectionRefused {
                            errors: errors.clone(),
                        }),
                    )
                    .await?;
                    continue;
                }

                info!(
                    "player {} joined, playing back {} send(s)",
                    join.name,
                    session.sends.len()
                );
                send_message(sink, &ServerMessage::Connected(session.connected())).await?;
                for send in &session.sends {
                    send_message(sink, &ServerMessage::PrintJson(send.to_print_json())).await?;
                }
            }
        }
    }

    Ok(())
}

async fn send_message(sink: &mut Sink, message: &ServerMessage) -> ConnectionResult {
    let frame = encode_frame(message)?;
    debug!("sending frame: {frame}");
    sink.send(Message::Text(frame)).await?;
    Ok(())
}
