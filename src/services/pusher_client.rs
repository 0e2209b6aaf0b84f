use std::{
    fmt::Display,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use futures::{Sink, SinkExt, StreamExt};
use rand::Rng;
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
    time::sleep,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::{
    config::PusherSettings,
    dto::{
        events::ChannelMessage,
        pusher::{InboundFrame, PusherFrame},
    },
    services::channels::{
        ChannelRegistry, ConnectionState, DEFAULT_CHANNEL_CAPACITY, PushTransport,
    },
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const MAX_JITTER_MS: u64 = 250;
const PROTOCOL_VERSION: u8 = 7;
const CLIENT_NAME: &str = "jam-setlist";

/// WebSocket endpoint for the configured Pusher app.
pub fn socket_url(settings: &PusherSettings) -> String {
    let scheme = if settings.use_tls { "wss" } else { "ws" };
    let host = settings
        .host
        .clone()
        .unwrap_or_else(|| format!("ws-{}.pusher.com", settings.cluster));
    format!(
        "{scheme}://{host}/app/{key}?protocol={PROTOCOL_VERSION}&client={CLIENT_NAME}&version={version}",
        key = settings.key,
        version = env!("CARGO_PKG_VERSION"),
    )
}

enum Command {
    Subscribe(String),
    Unsubscribe(String),
    Shutdown,
}

enum SessionEnd {
    Lost { established: bool },
    Shutdown,
}

/// Pusher-protocol client keeping one WebSocket alive and fanning events out per channel.
pub struct PusherClient {
    registry: Arc<ChannelRegistry>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PusherClient {
    /// Spawn the connection loop. Must be called from within a tokio runtime.
    pub fn connect(settings: &PusherSettings) -> Self {
        let registry = Arc::new(ChannelRegistry::new(DEFAULT_CHANNEL_CAPACITY));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Initialized);
        let url = socket_url(settings);
        let task = tokio::spawn(run(url, Arc::clone(&registry), command_rx, state_tx));

        Self {
            registry,
            commands,
            state,
            task: Mutex::new(Some(task)),
        }
    }

    /// Close the socket and stop reconnecting.
    pub async fn disconnect(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "push connection task ended abnormally");
            }
        }
    }
}

impl PushTransport for PusherClient {
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<ChannelMessage> {
        let (receiver, created) = self.registry.join(channel);
        if created {
            let _ = self.commands.send(Command::Subscribe(channel.to_owned()));
        }
        receiver
    }

    fn unsubscribe(&self, channel: &str) {
        if self.registry.leave(channel) {
            let _ = self.commands.send(Command::Unsubscribe(channel.to_owned()));
        }
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

async fn run(
    url: String,
    registry: Arc<ChannelRegistry>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
) {
    let mut delay = INITIAL_DELAY;

    loop {
        state.send_replace(ConnectionState::Connecting);
        match connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                debug!(%url, "push socket opened");
                match session(socket, &registry, &mut commands, &state).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Lost { established } => {
                        if established {
                            delay = INITIAL_DELAY;
                        }
                        warn!("push connection lost; reconnecting");
                    }
                }
            }
            Err(err) => warn!(error = %err, "push connection attempt failed"),
        }

        state.send_replace(ConnectionState::Unavailable);
        let jitter = Duration::from_millis(rand::rng().random_range(0..=MAX_JITTER_MS));
        if wait_or_shutdown(&mut commands, delay + jitter).await {
            break;
        }
        delay = (delay * 2).min(MAX_DELAY);
    }

    state.send_replace(ConnectionState::Disconnected);
    info!("push connection closed");
}

/// Sleep for `wait`; returns true if a shutdown arrived meanwhile.
async fn wait_or_shutdown(commands: &mut mpsc::UnboundedReceiver<Command>, wait: Duration) -> bool {
    let deadline = sleep(wait);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => return false,
            command = commands.recv() => match command {
                Some(Command::Shutdown) | None => return true,
                // channels are resubscribed from the registry on reconnect
                Some(Command::Subscribe(_)) | Some(Command::Unsubscribe(_)) => continue,
            },
        }
    }
}

async fn session<S>(
    socket: S,
    registry: &ChannelRegistry,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    state: &watch::Sender<ConnectionState>,
) -> SessionEnd
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut sink, mut stream) = socket.split();
    let mut established = false;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Subscribe(channel)) => {
                    if established && !send_frame(&mut sink, &PusherFrame::subscribe(&channel)).await {
                        return SessionEnd::Lost { established };
                    }
                }
                Some(Command::Unsubscribe(channel)) => {
                    if established && !send_frame(&mut sink, &PusherFrame::unsubscribe(&channel)).await {
                        return SessionEnd::Lost { established };
                    }
                }
                Some(Command::Shutdown) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            },
            message = stream.next() => {
                let message = match message {
                    Some(Ok(message)) => message,
                    Some(Err(err)) => {
                        warn!(error = %err, "push socket error");
                        return SessionEnd::Lost { established };
                    }
                    None => return SessionEnd::Lost { established },
                };

                match message {
                    Message::Text(text) => {
                        let frame = match serde_json::from_str::<PusherFrame>(text.as_str())
                            .and_then(PusherFrame::into_inbound)
                        {
                            Ok(frame) => frame,
                            Err(err) => {
                                warn!(error = %err, "failed to parse push frame");
                                continue;
                            }
                        };

                        match frame {
                            InboundFrame::Established(payload) => {
                                established = true;
                                state.send_replace(ConnectionState::Connected);
                                info!(socket_id = %payload.socket_id, "push connection established");
                                for channel in registry.active() {
                                    if !send_frame(&mut sink, &PusherFrame::subscribe(&channel)).await {
                                        return SessionEnd::Lost { established };
                                    }
                                }
                            }
                            InboundFrame::Ping => {
                                if !send_frame(&mut sink, &PusherFrame::pong()).await {
                                    return SessionEnd::Lost { established };
                                }
                            }
                            InboundFrame::Error(payload) => {
                                warn!(code = ?payload.code, message = %payload.message, "push service error");
                            }
                            InboundFrame::SubscriptionSucceeded { channel } => {
                                debug!(%channel, "channel subscription confirmed");
                            }
                            InboundFrame::Channel { channel, message } => {
                                registry.deliver(&channel, message);
                            }
                            InboundFrame::Other { event } => {
                                debug!(%event, "ignoring push frame");
                            }
                        }
                    }
                    Message::Ping(payload) => {
                        if let Err(err) = sink.send(Message::Pong(payload)).await {
                            warn!(error = %err, "failed to answer socket ping");
                            return SessionEnd::Lost { established };
                        }
                    }
                    Message::Close(frame) => {
                        info!(?frame, "push socket closed by server");
                        return SessionEnd::Lost { established };
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn send_frame<S>(sink: &mut S, frame: &PusherFrame) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(err) => {
            warn!(event = %frame.event, error = %err, "failed to serialize push frame");
            return true;
        }
    };
    match sink.send(Message::text(text)).await {
        Ok(()) => true,
        Err(err) => {
            warn!(event = %frame.event, error = %err, "failed to send push frame");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn settings(host: Option<String>) -> PusherSettings {
        PusherSettings {
            key: "app-key".into(),
            cluster: "eu".into(),
            host,
            use_tls: false,
        }
    }

    #[test]
    fn default_host_is_derived_from_cluster() {
        let mut config = settings(None);
        config.use_tls = true;
        let url = socket_url(&config);
        assert!(url.starts_with("wss://ws-eu.pusher.com/app/app-key?protocol=7&client=jam-setlist&version="));
    }

    #[tokio::test]
    async fn subscribes_after_handshake_and_routes_channel_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("binds");
        let addr = listener.local_addr().expect("has address");

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accepts");
            let mut socket = accept_async(tcp).await.expect("handshake");
            socket
                .send(Message::text(
                    r#"{"event":"pusher:connection_established","data":"{\"socket_id\":\"1.2\",\"activity_timeout\":120}"}"#,
                ))
                .await
                .expect("sends established");

            let subscribe = loop {
                match socket.next().await.expect("frame").expect("valid frame") {
                    Message::Text(text) => break text.as_str().to_owned(),
                    _ => continue,
                }
            };
            socket
                .send(Message::text(
                    r#"{"event":"vote","channel":"jam-42","data":"{\"songId\":\"js-1\",\"votes\":3}"}"#,
                ))
                .await
                .expect("sends event");
            (subscribe, socket)
        });

        let client = PusherClient::connect(&settings(Some(addr.to_string())));
        let mut receiver = client.subscribe("jam-42");

        let message = tokio::time::timeout(Duration::from_secs(5), receiver.recv())
            .await
            .expect("event in time")
            .expect("channel open");
        assert_eq!(message.event, "vote");
        assert_eq!(message.data, r#"{"songId":"js-1","votes":3}"#);

        let (subscribe, _socket) = server.await.expect("server task");
        let subscribe: serde_json::Value = serde_json::from_str(&subscribe).expect("json frame");
        assert_eq!(subscribe["event"], "pusher:subscribe");
        assert_eq!(subscribe["data"]["channel"], "jam-42");
        assert_eq!(*client.connection_state().borrow(), ConnectionState::Connected);

        client.disconnect().await;
        assert_eq!(*client.connection_state().borrow(), ConnectionState::Disconnected);
    }
}
