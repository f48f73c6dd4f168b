//! Copies one sender's byte stream into a receiver's [`Delivery`]
// (c) 2024 Ross Younger
//!
//! Content type and filename are settled before the first byte goes out: either the
//! sender declared them, or we peek at up to [`SNIFF_LEN`] bytes and sniff. The peeked
//! prefix is then written ahead of the remainder, so the receiver sees the stream
//! unaltered.

mod content;
pub mod sniff;

pub use content::{sniffed_metadata, DeclaredType};
pub use sniff::SNIFF_LEN;

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt as _};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    tunnel::{Delivery, FileMetadata, RelayError, ResponseSink},
    util::{stats::DataRate, time::Stopwatch},
};

/// Size of each body chunk copied after the sniffed prefix
pub const CHUNK_SIZE: usize = 32 * 1024;

/// What happened in a successful relay
#[derive(Debug, Clone)]
pub struct TransferReport {
    /// Bytes delivered, including the sniffed prefix
    pub bytes: u64,
    /// Wall clock time from the start of reading to the final write
    pub elapsed: Option<Duration>,
    /// Content type and filename the receiver was given
    pub metadata: FileMetadata,
}

impl TransferReport {
    #[must_use]
    pub fn rate(&self) -> DataRate {
        DataRate::new(self.bytes, self.elapsed)
    }
}

/// Streams `reader` to the receiver behind `delivery`.
///
/// The completion signal fires on every path: success if every byte was written,
/// failure otherwise.
pub async fn stream_delivery<R>(
    reader: R,
    delivery: Delivery,
    declared: Option<&DeclaredType>,
    stem: &str,
    cancel: &CancellationToken,
) -> Result<TransferReport, RelayError>
where
    R: AsyncRead + Unpin + Send,
{
    let Delivery { mut sink, done } = delivery;
    let mut stopwatch = Stopwatch::new();
    let result = tokio::select! {
        r = copy(reader, &mut sink, declared, stem) => r,
        () = cancel.cancelled() => Err(RelayError::Cancelled),
    };
    let elapsed = stopwatch.stop();
    match result {
        Ok((bytes, metadata)) => {
            done.complete(bytes);
            drop(sink);
            debug!("relayed {bytes} bytes as {}", metadata.content_type);
            Ok(TransferReport {
                bytes,
                elapsed,
                metadata,
            })
        }
        Err(e) => {
            done.fail(&e);
            drop(sink);
            debug!("relay failed: {e}");
            Err(e)
        }
    }
}

/// Reads up to `limit` bytes, stopping early only at end of stream
async fn read_prefix<R>(reader: &mut R, limit: usize) -> Result<BytesMut, RelayError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(limit);
    while buf.len() < limit {
        let mut limited = (&mut *reader).take((limit - buf.len()) as u64);
        let n = limited.read_buf(&mut buf).await.map_err(RelayError::Read)?;
        if n == 0 {
            break;
        }
    }
    Ok(buf)
}

async fn copy<R>(
    mut reader: R,
    sink: &mut ResponseSink,
    declared: Option<&DeclaredType>,
    stem: &str,
) -> Result<(u64, FileMetadata), RelayError>
where
    R: AsyncRead + Unpin + Send,
{
    let (metadata, prefix) = match declared {
        Some(d) => (d.metadata(stem), Bytes::new()),
        None => {
            let prefix = read_prefix(&mut reader, SNIFF_LEN).await?.freeze();
            let media_type = sniff::detect_content_type(&prefix);
            trace!("sniffed {media_type} from {} bytes", prefix.len());
            (sniffed_metadata(media_type, stem), prefix)
        }
    };
    sink.declare(metadata.clone())?;

    let mut total = prefix.len() as u64;
    sink.write(prefix).await?;

    loop {
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        let n = reader.read_buf(&mut buf).await.map_err(RelayError::Read)?;
        if n == 0 {
            break;
        }
        total += n as u64;
        sink.write(buf.freeze()).await?;
    }
    Ok((total, metadata))
}

#[cfg(test)]
mod test {
    use super::{stream_delivery, DeclaredType, TransferReport};
    use crate::tunnel::{Delivery, FileMetadata, Outcome, Pickup, RelayError};
    use futures_util::StreamExt as _;
    use std::{io, pin::Pin, task::Poll, time::Duration};
    use tokio::io::{AsyncRead, ReadBuf};
    use tokio_util::sync::CancellationToken;

    const PNG_INPUT: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0";

    fn pattern(len: usize) -> Vec<u8> {
        let mut v = vec![0u8; len];
        v.fill_with(|| fastrand::u8(..));
        v
    }

    /// Runs a relay against an in-process receiver, returning what both sides saw
    async fn relay(
        input: Vec<u8>,
        declared: Option<DeclaredType>,
    ) -> (
        Result<TransferReport, RelayError>,
        Result<FileMetadata, RelayError>,
        Vec<u8>,
        Outcome,
    ) {
        let (delivery, mut pickup) = Delivery::new();
        let cancel = CancellationToken::new();
        let sender = tokio::spawn(async move {
            stream_delivery(
                input.as_slice(),
                delivery,
                declared.as_ref(),
                "sshpipe",
                &cancel,
            )
            .await
        });
        let meta = pickup.metadata().await;
        let (body, outcome) = drain(pickup).await;
        (sender.await.unwrap(), meta, body, outcome)
    }

    async fn drain(mut pickup: Pickup) -> (Vec<u8>, Outcome) {
        let mut body = Vec::new();
        while let Some(c) = pickup.chunk().await {
            body.extend_from_slice(&c);
        }
        (body, pickup.outcome().await)
    }

    #[tokio::test]
    async fn byte_fidelity() {
        for len in [0, 1, 511, 512, 513, 10 * 1024 * 1024] {
            let input = pattern(len);
            let (report, meta, body, outcome) = relay(input.clone(), None).await;
            let report = report.unwrap();
            assert!(meta.is_ok());
            assert_eq!(report.bytes, len as u64);
            assert_eq!(body.len(), len, "length mismatch for {len}");
            assert!(body == input, "content mismatch for {len}");
            assert_eq!(
                outcome,
                Outcome::Completed {
                    bytes: len as u64
                }
            );
        }
    }

    #[tokio::test]
    async fn png_is_sniffed() {
        let (report, meta, body, outcome) = relay(PNG_INPUT.to_vec(), None).await;
        let meta = meta.unwrap();
        assert_eq!(meta.content_type, "image/png");
        assert_eq!(meta.file_name, "sshpipe.png");
        assert_eq!(
            meta.content_disposition(),
            "attachment; filename=sshpipe.png"
        );
        assert_eq!(body.len(), 18);
        assert_eq!(body, PNG_INPUT);
        assert_eq!(outcome, Outcome::Completed { bytes: 18 });
        assert_eq!(report.unwrap().metadata, meta);
    }

    #[tokio::test]
    async fn empty_input() {
        let (_, meta, body, _) = relay(Vec::new(), None).await;
        let meta = meta.unwrap();
        assert_eq!(meta.content_type, "text/plain; charset=utf-8");
        assert_eq!(meta.file_name, "sshpipe.txt");
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn declared_type_wins() {
        let declared = DeclaredType::parse("text/csv").unwrap();
        let (_, meta, body, _) = relay(PNG_INPUT.to_vec(), Some(declared)).await;
        let meta = meta.unwrap();
        assert_eq!(meta.content_type, "text/csv");
        assert_eq!(meta.file_name, "sshpipe.csv");
        assert_eq!(body, PNG_INPUT);
    }

    #[tokio::test]
    async fn receiver_gone() {
        let (delivery, mut pickup) = Delivery::new();
        let sender = tokio::spawn(async move {
            let input = pattern(1024 * 1024);
            stream_delivery(
                input.as_slice(),
                delivery,
                None,
                "sshpipe",
                &CancellationToken::new(),
            )
            .await
        });
        let _ = pickup.metadata().await.unwrap();
        drop(pickup);
        let r = sender.await.unwrap();
        assert!(matches!(r, Err(RelayError::ReceiverGone)));
    }

    /// Produces some bytes, then never again
    struct Stalls(Option<Vec<u8>>);
    impl AsyncRead for Stalls {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.0.take() {
                Some(data) => {
                    buf.put_slice(&data);
                    Poll::Ready(Ok(()))
                }
                None => Poll::Pending,
            }
        }
    }

    /// Produces some bytes, then fails
    struct Breaks(Option<Vec<u8>>);
    impl AsyncRead for Breaks {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.0.take() {
                Some(data) => {
                    buf.put_slice(&data);
                    Poll::Ready(Ok(()))
                }
                None => Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection lost",
                ))),
            }
        }
    }

    #[tokio::test]
    async fn cancelled_mid_copy() {
        let (delivery, mut pickup) = Delivery::new();
        let cancel = CancellationToken::new();
        let declared = DeclaredType::parse("bin").unwrap();
        let token = cancel.clone();
        let sender = tokio::spawn(async move {
            stream_delivery(
                Stalls(Some(b"partial".to_vec())),
                delivery,
                Some(&declared),
                "sshpipe",
                &token,
            )
            .await
        });
        let _ = pickup.metadata().await.unwrap();
        assert_eq!(pickup.chunk().await.unwrap().as_ref(), b"partial");
        cancel.cancel();

        let r = tokio::time::timeout(Duration::from_secs(5), sender)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(r, Err(RelayError::Cancelled)));

        let items: Vec<_> = pickup.into_stream().collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(RelayError::Aborted(_))));
    }

    #[tokio::test]
    async fn read_error_before_declare() {
        let (delivery, mut pickup) = Delivery::new();
        let sender = tokio::spawn(async move {
            stream_delivery(
                Breaks(Some(b"abc".to_vec())),
                delivery,
                None,
                "sshpipe",
                &CancellationToken::new(),
            )
            .await
        });
        let err = pickup.metadata().await.unwrap_err();
        assert!(matches!(err, RelayError::Aborted(ref r) if r.contains("connection lost")));
        assert!(matches!(sender.await.unwrap(), Err(RelayError::Read(_))));
    }

    #[tokio::test]
    async fn read_error_after_declare() {
        let (delivery, mut pickup) = Delivery::new();
        let declared = DeclaredType::parse("txt").unwrap();
        let sender = tokio::spawn(async move {
            stream_delivery(
                Breaks(Some(b"abc".to_vec())),
                delivery,
                Some(&declared),
                "sshpipe",
                &CancellationToken::new(),
            )
            .await
        });
        let meta = pickup.metadata().await.unwrap();
        assert_eq!(meta.file_name, "sshpipe.txt");
        let (body, outcome) = drain(pickup).await;
        assert_eq!(body, b"abc");
        assert!(matches!(outcome, Outcome::Failed(_)));
        assert!(matches!(sender.await.unwrap(), Err(RelayError::Read(_))));
    }
}
