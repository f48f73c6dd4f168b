// Receiver listener (HTTP)
// (c) 2024 Ross Younger

use std::{sync::Arc, time::Duration};

use anyhow::Context as _;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument as _};

use crate::tunnel::{Delivery, FileMetadata, Pickup, Registry, RelayError, TransferId};

/// Shared state for receiver requests
#[derive(Debug, Clone)]
pub(crate) struct HttpState {
    pub(crate) registry: Arc<Registry>,
    /// How long a receiver waits for the sender to produce response headers
    pub(crate) receiver_timeout: Duration,
    pub(crate) shutdown: CancellationToken,
    /// Shown at `/` without an identifier
    pub(crate) landing: Arc<str>,
}

/// Text for the landing page
pub(crate) fn landing_text(ssh_port: u16) -> String {
    format!(
        "sshpipe: stream a file over ssh, collect it over http. Nothing is stored.\n\
         \n\
         Sender:    ssh -p {ssh_port} <this host> [MEDIA-TYPE | EXTENSION] < file\n\
         Receiver:  open the share link the sender was given\n"
    )
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    id: Option<String>,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match self {
            RelayError::NotFound => StatusCode::NOT_FOUND,
            RelayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            RelayError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::Read(_) | RelayError::Aborted(_) => StatusCode::BAD_GATEWAY,
            RelayError::Collision(_)
            | RelayError::InvalidContentType(_)
            | RelayError::ReceiverGone
            | RelayError::Undeclared => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let reason = status.canonical_reason().unwrap_or("Error");
        (status, format!("{reason}\n")).into_response()
    }
}

pub(crate) fn router(state: HttpState) -> Router {
    Router::new().route("/", get(download)).with_state(state)
}

/// Serves receivers until `shutdown` fires, then waits for in-flight responses
pub(crate) async fn serve(
    listener: TcpListener,
    state: HttpState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("http listener failed")?;
    debug!("http listener stopped");
    Ok(())
}

async fn download(
    State(state): State<HttpState>,
    Query(query): Query<DownloadQuery>,
) -> Response {
    let Some(id) = query.id.filter(|id| !id.is_empty()) else {
        return state.landing.to_string().into_response();
    };
    let id = TransferId::from(id);
    let span = info_span!("http", %id);
    match fetch(&state, &id).instrument(span).await {
        Ok((metadata, pickup)) => (
            [
                (header::CONTENT_TYPE, metadata.content_type.clone()),
                (header::CONTENT_DISPOSITION, metadata.content_disposition()),
            ],
            Body::from_stream(pickup.into_stream()),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Hands a delivery to the waiting sender and waits for it to declare the file
async fn fetch(
    state: &HttpState,
    id: &TransferId,
) -> Result<(FileMetadata, Pickup), RelayError> {
    let Some(slot) = state.registry.resolve(id) else {
        debug!("no such transfer");
        return Err(RelayError::NotFound);
    };
    let (delivery, mut pickup) = Delivery::new();
    let handshake = async {
        slot.deliver(delivery).await?;
        pickup.metadata().await
    };
    let result = tokio::select! {
        r = tokio::time::timeout(state.receiver_timeout, handshake) => {
            r.unwrap_or(Err(RelayError::Timeout))
        }
        () = state.shutdown.cancelled() => Err(RelayError::Cancelled),
    };
    match result {
        Ok(metadata) => {
            info!(
                "sending {} as {}",
                metadata.file_name, metadata.content_type
            );
            Ok((metadata, pickup))
        }
        Err(RelayError::NotFound) => {
            debug!("transfer went away");
            Err(RelayError::NotFound)
        }
        Err(e) => {
            warn!("receiver request failed: {e}");
            Err(e)
        }
    }
}

#[cfg(test)]
mod test {
    use super::{landing_text, serve, HttpState};
    use crate::{
        relay::stream_delivery,
        tunnel::{Registry, Rendezvous, TransferId},
    };
    use std::{net::SocketAddr, sync::Arc, time::Duration};
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    const PNG_INPUT: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0";

    async fn start(registry: Arc<Registry>, receiver_timeout: Duration) -> (SocketAddr, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let state = HttpState {
            registry,
            receiver_timeout,
            shutdown: shutdown.clone(),
            landing: landing_text(2222).into(),
        };
        let _ = tokio::spawn(serve(listener, state, shutdown.clone()));
        (addr, shutdown)
    }

    #[tokio::test]
    async fn landing() {
        let (addr, _s) = start(Arc::new(Registry::new()), Duration::from_secs(1)).await;
        let resp = reqwest::get(format!("http://{addr}/")).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert!(resp.text().await.unwrap().contains("ssh -p 2222"));
    }

    #[tokio::test]
    async fn unknown_id() {
        let (addr, _s) = start(Arc::new(Registry::new()), Duration::from_secs(1)).await;
        let resp = reqwest::get(format!("http://{addr}/?id=nope")).await.unwrap();
        assert_eq!(resp.status(), 404);
        assert_eq!(resp.text().await.unwrap(), "Not Found\n");
    }

    #[tokio::test]
    async fn png_download() {
        let registry = Arc::new(Registry::new());
        let (addr, _s) = start(registry.clone(), Duration::from_secs(5)).await;
        let rv = Rendezvous::open_with_id(&registry, TransferId::from("abc123")).unwrap();
        let sender = tokio::spawn(async move {
            let delivery = rv.wait().await.unwrap();
            stream_delivery(PNG_INPUT, delivery, None, "sshpipe", &CancellationToken::new()).await
        });

        let resp = reqwest::get(format!("http://{addr}/?id=abc123")).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["content-type"], "image/png");
        assert_eq!(
            resp.headers()["content-disposition"],
            "attachment; filename=sshpipe.png"
        );
        let body = resp.bytes().await.unwrap();
        assert_eq!(body.as_ref(), PNG_INPUT);
        assert_eq!(sender.await.unwrap().unwrap().bytes, 18);

        // Consumed
        let again = reqwest::get(format!("http://{addr}/?id=abc123")).await.unwrap();
        assert_eq!(again.status(), 404);
    }

    #[tokio::test]
    async fn sender_disconnect_is_not_found() {
        let registry = Arc::new(Registry::new());
        let (addr, _s) = start(registry.clone(), Duration::from_secs(5)).await;
        let rv = Rendezvous::open(&registry).unwrap();
        let id = rv.id().clone();
        drop(rv);
        let resp = reqwest::get(format!("http://{addr}/?id={id}")).await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn slow_sender_times_out() {
        let registry = Arc::new(Registry::new());
        let (addr, _s) = start(registry.clone(), Duration::from_millis(100)).await;
        let rv = Rendezvous::open_with_id(&registry, TransferId::from("slow")).unwrap();
        let sender = tokio::spawn(async move {
            // Takes the delivery but never declares anything
            let delivery = rv.wait().await;
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(delivery);
        });
        let resp = reqwest::get(format!("http://{addr}/?id=slow")).await.unwrap();
        assert_eq!(resp.status(), 504);
        sender.abort();
    }

    #[tokio::test]
    async fn failed_sender_is_bad_gateway() {
        let registry = Arc::new(Registry::new());
        let (addr, _s) = start(registry.clone(), Duration::from_secs(5)).await;
        let rv = Rendezvous::open_with_id(&registry, TransferId::from("broken")).unwrap();
        let _sender = tokio::spawn(async move {
            let delivery = rv.wait().await.unwrap();
            delivery
                .done
                .fail(&crate::tunnel::RelayError::Read(std::io::Error::other("gone")));
        });
        let resp = reqwest::get(format!("http://{addr}/?id=broken")).await.unwrap();
        assert_eq!(resp.status(), 502);
    }

    #[tokio::test]
    async fn shutdown_while_waiting() {
        let registry = Arc::new(Registry::new());
        let (addr, shutdown) = start(registry.clone(), Duration::from_secs(30)).await;
        let rv = Rendezvous::open_with_id(&registry, TransferId::from("idle")).unwrap();
        let _sender = tokio::spawn(async move {
            let delivery = rv.wait().await;
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(delivery);
        });
        let request = tokio::spawn(reqwest::get(format!("http://{addr}/?id=idle")));
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        let resp = request.await.unwrap().unwrap();
        assert_eq!(resp.status(), 503);
    }
}
