// Sender listener (SSH)
// (c) 2024 Ross Younger

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context as _;
use async_trait::async_trait;
use russh::{
    server::{Auth, Handle, Handler, Msg, Session},
    Channel, ChannelId, CryptoVec, MethodSet,
};
use russh_keys::key::{KeyPair, PublicKey};
use tokio::{
    io::Interest,
    net::{TcpListener, TcpStream},
};
use tokio_util::{
    sync::{CancellationToken, DropGuard},
    task::TaskTracker,
};
use tracing::{debug, info, info_span, trace, warn, Instrument as _};

use super::stdin::{self, StdinWriter};
use crate::{auth::Authorizer, console::Console, sender::Sender};

/// Everything a sender connection needs, shared by all of them
#[derive(Clone)]
pub(crate) struct SshContext {
    pub(crate) authorizer: Arc<dyn Authorizer>,
    pub(crate) sender: Sender,
    pub(crate) config: Arc<russh::server::Config>,
    /// How long a connection may linger after shutdown starts
    pub(crate) grace: Duration,
}

/// Loads the host key, or generates an ephemeral one if `path` is empty
pub(crate) fn load_host_key(path: &str) -> anyhow::Result<KeyPair> {
    if path.is_empty() {
        warn!("no host key configured; generating an ephemeral one. Senders will see a new host key on every restart.");
        return KeyPair::generate_ed25519().context("generating ephemeral host key");
    }
    russh_keys::load_secret_key(path, None).with_context(|| format!("loading host key {path}"))
}

/// Protocol settings for the sender listener
pub(crate) fn protocol_config(host_key: KeyPair) -> russh::server::Config {
    russh::server::Config {
        methods: MethodSet::PUBLICKEY,
        keys: vec![host_key],
        auth_rejection_time: Duration::from_secs(1),
        auth_rejection_time_initial: Some(Duration::ZERO),
        // A sender may legitimately wait a long time for a receiver
        inactivity_timeout: None,
        ..Default::default()
    }
}

/// Accepts sender connections until `shutdown` fires
pub(crate) async fn serve(
    listener: TcpListener,
    ctx: SshContext,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = tokio::select! {
            r = listener.accept() => match r {
                Ok(x) => x,
                Err(e) => {
                    warn!("ssh accept failed: {e}");
                    continue;
                }
            },
            () = shutdown.cancelled() => break,
        };
        let (stream, socket) = match with_twin(stream) {
            Ok(x) => x,
            Err(e) => {
                warn!("cannot watch connection from {peer}: {e}");
                continue;
            }
        };
        let connection = shutdown.child_token();
        let _ = tracker.spawn(watch_for_hangup(socket, connection.clone()));
        let handler = SenderSession::new(&ctx, peer, connection.clone(), tracker.clone());
        let config = ctx.config.clone();
        let grace = ctx.grace;
        let _ = tracker.spawn(
            async move {
                trace!("connected");
                let session = match russh::server::run_stream(config, stream, handler).await {
                    Ok(s) => s,
                    Err(e) => {
                        debug!("handshake failed: {e}");
                        return;
                    }
                };
                let lingering = async {
                    connection.cancelled().await;
                    tokio::time::sleep(grace).await;
                };
                tokio::select! {
                    r = session => match r {
                        Ok(()) => trace!("disconnected"),
                        Err(e) => debug!("session ended: {e}"),
                    },
                    () = lingering => debug!("dropping session at shutdown"),
                }
            }
            .instrument(info_span!("ssh", %peer)),
        );
    }
    debug!("ssh listener stopped");
    Ok(())
}

/// How often a busy connection is checked for a hangup
const HANGUP_POLL: Duration = Duration::from_millis(250);

/// Returns the stream plus a second handle onto the same socket, for [`watch_for_hangup`]
fn with_twin(stream: TcpStream) -> std::io::Result<(TcpStream, TcpStream)> {
    let stream = stream.into_std()?;
    let twin = stream.try_clone()?;
    Ok((TcpStream::from_std(stream)?, TcpStream::from_std(twin)?))
}

/// Cancels `connection` as soon as the peer closes the socket.
///
/// The protocol session stops reading while the relay is behind, so it cannot be relied on to
/// see a hangup. The kernel reports one even when unread data is still queued.
async fn watch_for_hangup(socket: TcpStream, connection: CancellationToken) {
    loop {
        let ready = tokio::select! {
            r = socket.ready(Interest::READABLE) => r,
            () = connection.cancelled() => return,
        };
        match ready {
            Ok(r) if r.is_read_closed() => {
                debug!("peer hung up");
                connection.cancel();
                return;
            }
            Ok(_) => (),
            Err(e) => {
                debug!("connection failed: {e}");
                connection.cancel();
                return;
            }
        }
        // Readable but still open. The session drains the socket, not us.
        tokio::select! {
            () = tokio::time::sleep(HANGUP_POLL) => (),
            () = connection.cancelled() => return,
        }
    }
}

/// The content type token in an exec request, if there is exactly one word
fn declared_token(command: &str) -> Option<&str> {
    let mut words = command.split_whitespace();
    match (words.next(), words.next()) {
        (Some(word), None) => Some(word),
        _ => None,
    }
}

/// One sender connection.
///
/// A connection carries at most one transfer, on its first session channel.
struct SenderSession {
    peer: SocketAddr,
    user: String,
    authorizer: Arc<dyn Authorizer>,
    sender: Sender,
    tracker: TaskTracker,
    /// Fires when the connection goes away (or at shutdown)
    cancel: CancellationToken,
    _watcher: DropGuard,
    channel: Option<ChannelId>,
    stdin: Option<StdinWriter>,
    started: bool,
}

impl SenderSession {
    fn new(
        ctx: &SshContext,
        peer: SocketAddr,
        cancel: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            peer,
            user: String::new(),
            authorizer: ctx.authorizer.clone(),
            sender: ctx.sender.clone(),
            tracker,
            _watcher: cancel.clone().drop_guard(),
            cancel,
            channel: None,
            stdin: None,
            started: false,
        }
    }

    /// Handles an exec or shell request, which is what starts a transfer
    fn start(&mut self, channel: ChannelId, declared: Option<&str>, session: &mut Session) {
        if self.started || self.channel != Some(channel) {
            let _ = session.channel_failure(channel);
            return;
        }
        self.started = true;
        let _ = session.channel_success(channel);

        let (console, mut lines) = Console::new(true);
        let pending = self.sender.open(&self.user, declared, &console);
        // Whatever open() had to say goes out now, ahead of any input
        while let Ok(line) = lines.try_recv() {
            let _ = session.data(channel, CryptoVec::from_slice(line.as_bytes()));
        }
        let Ok(pending) = pending else {
            let _ = session.exit_status_request(channel, 1);
            let _ = session.eof(channel);
            let _ = session.close(channel);
            return;
        };

        let (writer, reader) = stdin::pipe();
        self.stdin = Some(writer);
        let handle = session.handle();
        let cancel = self.cancel.clone();
        let span = info_span!("transfer", id = %pending.id(), user = %self.user);
        let _ = self.tracker.spawn(
            async move {
                let pump = pump(handle.clone(), channel, lines);
                let transfer = async move {
                    let result = pending.run(reader, &console, &cancel).await;
                    drop(console);
                    result
                };
                let (result, ()) = tokio::join!(transfer, pump);
                let status = u32::from(result.is_err());
                let _ = handle.exit_status_request(channel, status).await;
                let _ = handle.eof(channel).await;
                let _ = handle.close(channel).await;
            }
            .instrument(span),
        );
    }
}

/// Forwards console lines to the sender until the console is dropped
async fn pump(
    handle: Handle,
    channel: ChannelId,
    mut lines: tokio::sync::mpsc::UnboundedReceiver<String>,
) {
    while let Some(line) = lines.recv().await {
        if handle
            .data(channel, CryptoVec::from_slice(line.as_bytes()))
            .await
            .is_err()
        {
            break;
        }
    }
}

#[async_trait]
impl Handler for SenderSession {
    type Error = anyhow::Error;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        if self.authorizer.authorize(user, public_key) {
            info!("{user} authenticated from {}", self.peer);
            self.user = user.to_string();
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if self.channel.is_some() {
            debug!("refusing a second session channel");
            return Ok(false);
        }
        self.channel = Some(channel.id());
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data);
        let declared = declared_token(&command);
        if declared.is_none() && !command.trim().is_empty() {
            debug!("ignoring command {command:?}; content will be sniffed");
        }
        self.start(channel, declared, session);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.start(channel, None, session);
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.channel != Some(channel) {
            return Ok(());
        }
        let Some(stdin) = &self.stdin else {
            return Ok(());
        };
        // Waits while the relay is behind; that stalls this connection, which is the backpressure.
        let delivered = tokio::select! {
            ok = stdin.send(data) => ok,
            () = self.cancel.cancelled() => false,
        };
        if !delivered {
            trace!("discarding {} bytes of input", data.len());
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.channel == Some(channel) {
            if let Some(stdin) = &mut self.stdin {
                stdin.finish();
            }
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.channel == Some(channel) {
            // Input that was not finished is now abandoned
            self.stdin = None;
            self.cancel.cancel();
        }
        Ok(())
    }
}
