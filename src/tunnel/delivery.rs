// Receiver-to-sender handoff
// (c) 2024 Ross Younger

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::{mpsc, oneshot};

use super::RelayError;

/// Number of in-flight body chunks between the sender's copy loop and the receiver.
/// Together with the relay's chunk size this bounds per-transfer memory.
pub const BODY_QUEUE_DEPTH: usize = 4;

/// What the receiver needs to know about the file before the first byte arrives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Media type, possibly with parameters (e.g. `text/plain; charset=utf-8`)
    pub content_type: String,
    /// Suggested filename for the download
    pub file_name: String,
}

impl FileMetadata {
    /// Value for a `Content-Disposition` header
    #[must_use]
    pub fn content_disposition(&self) -> String {
        format!("attachment; filename={}", self.file_name)
    }
}

/// How a transfer ended, as reported by the sender side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every byte was written to the sink
    Completed {
        /// Bytes written
        bytes: u64,
    },
    /// The relay gave up
    Failed(String),
}

/// The byte sink a receiver hands to the sender.
///
/// Metadata must be declared exactly once, before any data is written.
#[derive(Debug)]
pub struct ResponseSink {
    head: Option<oneshot::Sender<FileMetadata>>,
    body: mpsc::Sender<Bytes>,
}

impl ResponseSink {
    /// Sets the content type and filename the receiver will see.
    pub fn declare(&mut self, metadata: FileMetadata) -> Result<(), RelayError> {
        let head = self.head.take().ok_or(RelayError::Undeclared)?;
        head.send(metadata).map_err(|_| RelayError::ReceiverGone)
    }

    /// Writes a chunk. Waits if the receiver is not keeping up.
    pub async fn write(&mut self, chunk: Bytes) -> Result<(), RelayError> {
        if self.head.is_some() {
            return Err(RelayError::Undeclared);
        }
        if chunk.is_empty() {
            return Ok(());
        }
        self.body
            .send(chunk)
            .await
            .map_err(|_| RelayError::ReceiverGone)
    }
}

/// One-shot, sender-to-receiver notification that the transfer is over.
///
/// Firing consumes the signal, so it can fire at most once.
/// Dropping it unfired reads as a failure on the receiving end.
#[derive(Debug)]
pub struct CompletionSignal(oneshot::Sender<Outcome>);

impl CompletionSignal {
    /// Reports success
    pub fn complete(self, bytes: u64) {
        let _ = self.0.send(Outcome::Completed { bytes });
    }

    /// Reports failure
    pub fn fail(self, reason: &RelayError) {
        let _ = self.0.send(Outcome::Failed(reason.to_string()));
    }
}

/// What a receiver sends to a waiting sender: a place to write, and a way to say "done".
#[derive(Debug)]
pub struct Delivery {
    /// Where the file goes
    pub sink: ResponseSink,
    /// Fired exactly once when the sender is finished with the sink
    pub done: CompletionSignal,
}

impl Delivery {
    /// Creates a delivery and the receiver's handle on it
    #[must_use]
    pub fn new() -> (Self, Pickup) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(BODY_QUEUE_DEPTH);
        let (done_tx, done_rx) = oneshot::channel();
        (
            Self {
                sink: ResponseSink {
                    head: Some(head_tx),
                    body: body_tx,
                },
                done: CompletionSignal(done_tx),
            },
            Pickup {
                head: head_rx,
                body: body_rx,
                done: done_rx,
            },
        )
    }
}

/// The receiver's half of a [`Delivery`]
#[derive(Debug)]
pub struct Pickup {
    head: oneshot::Receiver<FileMetadata>,
    body: mpsc::Receiver<Bytes>,
    done: oneshot::Receiver<Outcome>,
}

impl Pickup {
    /// Waits for the sender to declare the file metadata.
    ///
    /// If the delivery was dropped without being taken up (for example, another receiver
    /// won the race) this is [`RelayError::NotFound`]; if the sender failed first, the
    /// failure is passed on.
    pub async fn metadata(&mut self) -> Result<FileMetadata, RelayError> {
        match (&mut self.head).await {
            Ok(m) => Ok(m),
            Err(_) => match (&mut self.done).await {
                Ok(Outcome::Failed(reason)) => Err(RelayError::Aborted(reason)),
                Ok(Outcome::Completed { .. }) | Err(_) => Err(RelayError::NotFound),
            },
        }
    }

    /// Receives the next body chunk, or None once the sender has stopped writing
    pub async fn chunk(&mut self) -> Option<Bytes> {
        self.body.recv().await
    }

    /// Waits for the completion signal. An unfired signal reads as failure.
    pub async fn outcome(self) -> Outcome {
        self.done
            .await
            .unwrap_or_else(|_| Outcome::Failed("the sender went away".into()))
    }

    /// Converts the body into a stream of chunks.
    ///
    /// The stream ends cleanly only if the sender reports success; otherwise its final
    /// item is an error, so a consumer never mistakes a truncated file for a whole one.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, RelayError>> + Send + 'static {
        futures_util::stream::unfold(Some(self), |state| async move {
            let mut pickup = state?;
            if let Some(chunk) = pickup.chunk().await {
                return Some((Ok(chunk), Some(pickup)));
            }
            match pickup.outcome().await {
                Outcome::Completed { .. } => None,
                Outcome::Failed(reason) => Some((Err(RelayError::Aborted(reason)), None)),
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::{Delivery, FileMetadata, Outcome};
    use crate::tunnel::RelayError;
    use bytes::Bytes;
    use futures_util::StreamExt as _;

    fn meta() -> FileMetadata {
        FileMetadata {
            content_type: "text/plain; charset=utf-8".into(),
            file_name: "sshpipe.txt".into(),
        }
    }

    #[test]
    fn disposition() {
        assert_eq!(meta().content_disposition(), "attachment; filename=sshpipe.txt");
    }

    #[tokio::test]
    async fn write_before_declare_is_refused() {
        let (mut d, _p) = Delivery::new();
        let r = d.sink.write(Bytes::from_static(b"x")).await;
        assert!(matches!(r, Err(RelayError::Undeclared)));
    }

    #[tokio::test]
    async fn declare_twice_is_refused() {
        let (mut d, _p) = Delivery::new();
        d.sink.declare(meta()).unwrap();
        assert!(matches!(d.sink.declare(meta()), Err(RelayError::Undeclared)));
    }

    #[tokio::test]
    async fn happy_path() {
        let (mut d, mut p) = Delivery::new();
        let sender = tokio::spawn(async move {
            d.sink.declare(meta()).unwrap();
            d.sink.write(Bytes::from_static(b"hello ")).await.unwrap();
            d.sink.write(Bytes::from_static(b"world")).await.unwrap();
            d.done.complete(11);
        });
        assert_eq!(p.metadata().await.unwrap(), meta());
        let chunks: Vec<_> = p.into_stream().collect().await;
        sender.await.unwrap();
        let body: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect();
        assert_eq!(body, b"hello world");
    }

    #[tokio::test]
    async fn failure_ends_stream_with_error() {
        let (mut d, mut p) = Delivery::new();
        d.sink.declare(meta()).unwrap();
        d.sink.write(Bytes::from_static(b"partial")).await.unwrap();
        d.done.fail(&RelayError::Cancelled);
        drop(d.sink);

        let _ = p.metadata().await.unwrap();
        let items: Vec<_> = p.into_stream().collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(RelayError::Aborted(_))));
    }

    #[tokio::test]
    async fn unfired_signal_reads_as_failure() {
        let (d, p) = Delivery::new();
        drop(d);
        assert!(matches!(p.outcome().await, Outcome::Failed(_)));
    }

    #[tokio::test]
    async fn dropped_delivery_is_not_found() {
        let (d, mut p) = Delivery::new();
        drop(d);
        assert!(matches!(p.metadata().await, Err(RelayError::NotFound)));
    }

    #[tokio::test]
    async fn early_failure_is_passed_on() {
        let (d, mut p) = Delivery::new();
        let Delivery { sink, done } = d;
        done.fail(&RelayError::Read(std::io::Error::other("boom")));
        drop(sink);
        let err = p.metadata().await.unwrap_err();
        assert!(matches!(err, RelayError::Aborted(ref r) if r.contains("boom")));
    }

    #[tokio::test]
    async fn receiver_gone() {
        let (mut d, p) = Delivery::new();
        d.sink.declare(meta()).unwrap();
        drop(p);
        let r = d.sink.write(Bytes::from_static(b"x")).await;
        assert!(matches!(r, Err(RelayError::ReceiverGone)));
    }
}
