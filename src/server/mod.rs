//! sshpipe server: the sender (SSH) and receiver (HTTP) listeners
// (c) 2024 Ross Younger

mod http;
mod ssh;
mod stdin;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context as _;
use russh_keys::key::KeyPair;
use tokio::{net::TcpListener, task::JoinSet};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, warn};

use crate::{
    auth::{AuthorizedKeys, Authorizer},
    config::Configuration,
    sender::Sender,
    tunnel::Registry,
};

/// Both listeners, bound and ready to run
pub struct Server {
    config: Arc<Configuration>,
    registry: Arc<Registry>,
    authorizer: Arc<dyn Authorizer>,
    protocol: Arc<russh::server::Config>,
    ssh: TcpListener,
    http: TcpListener,
}

impl Server {
    /// Binds both listeners. Fails if either cannot be bound.
    pub async fn bind(
        config: Configuration,
        authorizer: Arc<dyn Authorizer>,
        host_key: KeyPair,
    ) -> anyhow::Result<Self> {
        let ssh = TcpListener::bind(config.ssh_endpoint())
            .await
            .with_context(|| format!("binding ssh listener to {:?}", config.ssh_endpoint()))?;
        let http = TcpListener::bind(config.http_endpoint())
            .await
            .with_context(|| format!("binding http listener to {:?}", config.http_endpoint()))?;
        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(Registry::new()),
            authorizer,
            protocol: Arc::new(ssh::protocol_config(host_key)),
            ssh,
            http,
        })
    }

    /// Where senders connect
    pub fn ssh_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.ssh.local_addr()?)
    }

    /// Where receivers connect
    pub fn http_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.http.local_addr()?)
    }

    /// Runs until `shutdown` fires or a listener fails.
    ///
    /// In-flight transfers are cancelled at shutdown; listeners then get the configured
    /// grace period to finish before they are abandoned.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let grace = self.config.grace_period_duration();
        info!(
            "listening for senders on {}, receivers on {}",
            self.ssh_addr()?,
            self.http_addr()?
        );
        let tracker = TaskTracker::new();

        let ssh_ctx = ssh::SshContext {
            authorizer: self.authorizer,
            sender: Sender::new(self.registry.clone(), self.config.clone()),
            config: self.protocol,
            grace,
        };
        let http_state = http::HttpState {
            registry: self.registry,
            receiver_timeout: self.config.receiver_timeout_duration(),
            shutdown: shutdown.clone(),
            landing: http::landing_text(self.config.ssh_port).into(),
        };

        let mut listeners = JoinSet::new();
        let _ = listeners.spawn(ssh::serve(
            self.ssh,
            ssh_ctx,
            shutdown.clone(),
            tracker.clone(),
        ));
        let _ = listeners.spawn(http::serve(self.http, http_state, shutdown.clone()));

        let mut failure = None;
        tokio::select! {
            () = shutdown.cancelled() => (),
            Some(r) = listeners.join_next() => {
                if let Err(e) = r.context("listener task failed").and_then(|r| r) {
                    error!("{e:#}");
                    failure = Some(e);
                }
                shutdown.cancel();
            }
        }
        info!("shutting down");

        let _ = tracker.close();
        let drain = async {
            while let Some(r) = listeners.join_next().await {
                if let Err(e) = r.context("listener task failed").and_then(|r| r) {
                    warn!("{e:#}");
                }
            }
            tracker.wait().await;
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("grace period expired; abandoning remaining connections");
            listeners.abort_all();
        }
        failure.map_or(Ok(()), Err)
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                let _ = s.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            if let Err(e) = r {
                warn!("cannot listen for interrupts: {e}");
                std::future::pending::<()>().await;
            }
        }
        () = terminate => (),
    }
}

/// Server main loop: loads credentials, binds the listeners and runs until signalled
#[allow(clippy::module_name_repetitions)]
pub async fn server_main(config: Configuration) -> anyhow::Result<()> {
    config.validate()?;
    let authorizer = AuthorizedKeys::load(&config.authorized_keys)?;
    info!("{} authorized key(s) loaded", authorizer.len());
    let host_key = ssh::load_host_key(&config.host_key)?;
    let server = Server::bind(config, Arc::new(authorizer), host_key).await?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    let _ = tokio::spawn(async move {
        shutdown_signal().await;
        info!("signal received");
        trigger.cancel();
    });
    server.run(shutdown).await
}
