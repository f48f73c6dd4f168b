// Sender-side session flow
// (c) 2024 Ross Younger

use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::Configuration,
    console::Console,
    relay::{stream_delivery, DeclaredType, TransferReport},
    tunnel::{Registry, RelayError, Rendezvous, TransferId},
};

/// Starts transfers on behalf of connected senders
#[derive(Debug, Clone)]
pub struct Sender {
    registry: Arc<Registry>,
    config: Arc<Configuration>,
}

impl Sender {
    #[must_use]
    pub fn new(registry: Arc<Registry>, config: Arc<Configuration>) -> Self {
        Self { registry, config }
    }

    /// Registers a transfer and tells the sender where to point their receiver.
    ///
    /// `declared` is the optional content type token the sender gave.
    /// This does not wait, so it is safe to call from inside a protocol callback.
    pub fn open(
        &self,
        user: &str,
        declared: Option<&str>,
        console: &Console,
    ) -> Result<PendingTransfer, RelayError> {
        let result = self.try_open(user, declared, console);
        if let Err(e) = &result {
            console.error(e);
            if matches!(e, RelayError::InvalidContentType(_)) {
                console.usage();
            }
        }
        result
    }

    fn try_open(
        &self,
        user: &str,
        declared: Option<&str>,
        console: &Console,
    ) -> Result<PendingTransfer, RelayError> {
        let declared = declared.map(DeclaredType::parse).transpose()?;
        let rendezvous = Rendezvous::open(&self.registry)?;
        info!("transfer {} opened by {user}", rendezvous.id());
        console.welcome(user);
        console.share_url(&self.config.share_url(rendezvous.id().as_str()));
        Ok(PendingTransfer {
            rendezvous,
            declared,
            config: self.config.clone(),
        })
    }

    /// Convenience wrapper: [`Sender::open`] then [`PendingTransfer::run`]
    pub async fn run<R>(
        &self,
        user: &str,
        declared: Option<&str>,
        reader: R,
        console: &Console,
        cancel: &CancellationToken,
    ) -> Result<TransferReport, RelayError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.open(user, declared, console)?
            .run(reader, console, cancel)
            .await
    }
}

/// A registered transfer waiting for its receiver.
/// Dropping this withdraws the transfer.
#[derive(Debug)]
pub struct PendingTransfer {
    rendezvous: Rendezvous,
    declared: Option<DeclaredType>,
    config: Arc<Configuration>,
}

impl PendingTransfer {
    #[must_use]
    pub fn id(&self) -> &TransferId {
        self.rendezvous.id()
    }

    /// Waits (with no timeout) for a receiver, then relays `reader` to it.
    ///
    /// If `cancel` fires at any point the slot is withdrawn and the transfer fails.
    /// The outcome is reported on `console` as well as returned.
    pub async fn run<R>(
        self,
        reader: R,
        console: &Console,
        cancel: &CancellationToken,
    ) -> Result<TransferReport, RelayError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let id = self.id().clone();
        let result = self.transfer(reader, cancel).await;
        match &result {
            Ok(report) => {
                info!(
                    "transfer {id} complete: {} bytes as {}, {}",
                    report.bytes,
                    report.metadata.content_type,
                    report.rate()
                );
                console.transfer_done(report);
            }
            Err(e) => {
                warn!("transfer {id} failed: {e}");
                console.error(e);
            }
        }
        result
    }

    async fn transfer<R>(
        self,
        reader: R,
        cancel: &CancellationToken,
    ) -> Result<TransferReport, RelayError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let Self {
            rendezvous,
            declared,
            config,
        } = self;
        let delivery = tokio::select! {
            d = rendezvous.wait() => d.ok_or(RelayError::Cancelled)?,
            () = cancel.cancelled() => return Err(RelayError::Cancelled),
        };
        info!("transfer picked up");
        stream_delivery(
            reader,
            delivery,
            declared.as_ref(),
            &config.file_name,
            cancel,
        )
        .await
    }
}
