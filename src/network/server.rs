use crate::config::Config;
use crate::error::AppError;
use crate::message::Outbound;
use crate::network::message::{encode_line, ClientMessage, ServerMessage};
use crate::network::rate_limiter::RateLimiter;
use crate::session::ConnectionLink;
use crate::session_registry::SessionRegistry;
use crate::types::ProfileId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const MAX_FAILED_PARSES: u32 = 3;

pub struct PresenceServer {
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    rate_limits: HashMap<String, (Duration, u32)>,
    connection_slots: Arc<Semaphore>,
}

impl PresenceServer {
    pub async fn bind(
        bind_addr: &str,
        registry: Arc<SessionRegistry>,
        config: &Config,
    ) -> Result<Self, AppError> {
        let listener = TcpListener::bind(bind_addr).await?;
        Ok(Self {
            listener,
            registry,
            rate_limits: config.rate_limits.windows(),
            connection_slots: Arc::new(Semaphore::new(config.server.max_connections)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, AppError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` fires, then wait for every
    /// connection task to log its session out.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), AppError> {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("🛑 Listener stopping, {} connections open", connections.len());
                    break;
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!("❌ Accept failed: {}", e);
                            continue;
                        }
                    };

                    let Ok(permit) = self.connection_slots.clone().try_acquire_owned() else {
                        tracing::warn!("🚫 Rejecting {}: connection limit reached", addr);
                        continue;
                    };

                    let registry = self.registry.clone();
                    let limiter = RateLimiter::new(self.rate_limits.clone());
                    let shutdown = shutdown.clone();
                    connections.spawn(async move {
                        handle_connection(stream, addr, registry, limiter, shutdown).await;
                        drop(permit);
                    });
                }
            }
        }

        while connections.join_next().await.is_some() {}
        Ok(())
    }
}

enum Flow {
    Continue,
    Disconnect,
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    limiter: RateLimiter,
    shutdown: CancellationToken,
) {
    tracing::info!("🔌 New connection from {}", addr);
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut writer = BufWriter::new(writer);

    let (link, rx) = ConnectionLink::channel();
    let profile_id = match login(&mut reader, &mut writer, addr, &registry, link, &shutdown).await {
        Ok(Some(profile_id)) => profile_id,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!("❌ Login from {} failed: {}", addr, e);
            return;
        }
    };

    let mut connection = Connection {
        profile_id,
        addr,
        registry: &registry,
        limiter,
        writer,
    };
    if let Err(e) = connection.serve(&mut reader, rx, &shutdown).await {
        tracing::warn!("❌ Connection {} ({}) failed: {}", addr, profile_id, e);
    }

    registry.logout(profile_id);
    tracing::info!("🔌 Connection from {} ended", addr);
}

/// Wait for the login line. Anything other than a valid login closes the
/// connection.
async fn login<W: AsyncWrite + Unpin>(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut W,
    addr: SocketAddr,
    registry: &SessionRegistry,
    link: ConnectionLink,
    shutdown: &CancellationToken,
) -> Result<Option<ProfileId>, AppError> {
    let mut line = String::new();
    let read = tokio::select! {
        _ = shutdown.cancelled() => return Ok(None),
        read = reader.read_line(&mut line) => read?,
    };
    if read == 0 {
        return Ok(None);
    }

    let info = match serde_json::from_str::<ClientMessage>(line.trim()) {
        Ok(ClientMessage::Login(info)) => info,
        Ok(_) => {
            tracing::warn!("🚫 Rejecting {}: first message must be login", addr);
            return Ok(None);
        }
        Err(e) => {
            tracing::warn!("🚫 Rejecting {}: unreadable login ({})", addr, e);
            return Ok(None);
        }
    };

    let profile_id = info.profile_id;
    if let Err(e) = registry.login(info, Some(link)) {
        tracing::warn!("🚫 Login of {} from {} refused: {}", profile_id, addr, e);
        write_message(writer, &ServerMessage::from(&e)).await?;
        return Ok(None);
    }

    write_message(writer, &ServerMessage::LoggedIn { profile_id }).await?;
    Ok(Some(profile_id))
}

struct Connection<'a, W> {
    profile_id: ProfileId,
    addr: SocketAddr,
    registry: &'a SessionRegistry,
    limiter: RateLimiter,
    writer: W,
}

impl<W: AsyncWrite + Unpin> Connection<'_, W> {
    async fn serve(
        &mut self,
        reader: &mut BufReader<OwnedReadHalf>,
        mut rx: UnboundedReceiver<Outbound>,
        shutdown: &CancellationToken,
    ) -> Result<(), AppError> {
        let mut line = String::new();
        let mut failed_parse_count = 0;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Closing {} for shutdown", self.addr);
                    return Ok(());
                }
                result = reader.read_line(&mut line) => {
                    if result? == 0 {
                        tracing::info!("🔌 {} disconnected (EOF)", self.profile_id);
                        return Ok(());
                    }

                    match serde_json::from_str::<ClientMessage>(line.trim()) {
                        Ok(message) => {
                            failed_parse_count = 0;
                            if let Flow::Disconnect = self.on_client_message(message).await? {
                                return Ok(());
                            }
                        }
                        Err(e) => {
                            failed_parse_count += 1;
                            tracing::warn!(
                                "❌ Failed to parse message {} from {}: {}",
                                failed_parse_count, self.profile_id, e
                            );
                            if failed_parse_count >= MAX_FAILED_PARSES {
                                tracing::warn!(
                                    "🚫 Disconnecting {} after {} failed parse attempts",
                                    self.profile_id, failed_parse_count
                                );
                                return Ok(());
                            }
                        }
                    }
                    line.clear();
                }
                outbound = rx.recv() => {
                    match outbound {
                        Some(Outbound::Message(message)) => {
                            write_message(&mut self.writer, &message.into()).await?;
                        }
                        Some(Outbound::Flush) => self.flush_buffered().await?,
                        Some(Outbound::Kick(reason)) => {
                            tracing::info!("🚫 {} kicked ({})", self.profile_id, reason);
                            write_message(&mut self.writer, &ServerMessage::Kicked { reason }).await?;
                            return Ok(());
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    async fn on_client_message(&mut self, message: ClientMessage) -> Result<Flow, AppError> {
        match message {
            ClientMessage::Login(_) => {
                tracing::warn!("{} sent a second login, ignoring", self.profile_id);
            }
            ClientMessage::Command(raw) => {
                if !self.limiter.check(&raw.command) {
                    tracing::warn!("⚠️ Rate limit hit by {} for {}", self.profile_id, raw.command);
                    return Ok(Flow::Continue);
                }
                if let Err(e) = self.registry.handle_raw(self.profile_id, &raw) {
                    tracing::debug!("Command {} from {} failed: {}", raw.command, self.profile_id, e);
                    write_message(&mut self.writer, &ServerMessage::from(&e)).await?;
                }
            }
            ClientMessage::OpenHost { enabled } => {
                if !self.limiter.check("open_host") {
                    tracing::warn!("⚠️ Rate limit hit by {} for open_host", self.profile_id);
                    return Ok(Flow::Continue);
                }
                if let Err(e) = self.registry.set_open_host(self.profile_id, enabled) {
                    write_message(&mut self.writer, &ServerMessage::from(&e)).await?;
                }
            }
            ClientMessage::Logout => return Ok(Flow::Disconnect),
        }
        Ok(Flow::Continue)
    }

    async fn flush_buffered(&mut self) -> Result<(), AppError> {
        let buffered = self.registry.take_write_buffer(self.profile_id);
        if buffered.is_empty() {
            return Ok(());
        }
        tracing::debug!("📤 Flushing {} messages to {}", buffered.len(), self.profile_id);
        for message in buffered {
            self.writer
                .write_all(encode_line(&message.into())?.as_bytes())
                .await?;
        }
        self.writer.flush().await?;
        Ok(())
    }
}

async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &ServerMessage,
) -> Result<(), AppError> {
    writer.write_all(encode_line(message)?.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
