// Channel data to AsyncRead adapter
// (c) 2024 Ross Younger

use std::{
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;

/// Number of channel data packets buffered between the SSH session and the relay
const STDIN_QUEUE_DEPTH: usize = 8;

type PipeStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// What the relay reads the sender's input from
pub(crate) type StdinReader = StreamReader<PipeStream, Bytes>;

/// The SSH session's end of the pipe
#[derive(Debug)]
pub(crate) struct StdinWriter {
    tx: Option<mpsc::Sender<Bytes>>,
    eof: Arc<AtomicBool>,
}

/// Creates a bounded pipe.
///
/// The reader ends cleanly only if [`StdinWriter::finish`] was called. If the writer is
/// dropped without finishing, the reader fails with `UnexpectedEof`.
pub(crate) fn pipe() -> (StdinWriter, StdinReader) {
    let (tx, rx) = mpsc::channel::<Bytes>(STDIN_QUEUE_DEPTH);
    let eof = Arc::new(AtomicBool::new(false));
    let stream = futures_util::stream::unfold(Some((rx, eof.clone())), |state| async move {
        let (mut rx, eof) = state?;
        match rx.recv().await {
            Some(data) => Some((Ok(data), Some((rx, eof)))),
            None if eof.load(Ordering::Acquire) => None,
            None => Some((
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "sender disconnected before end of input",
                )),
                None,
            )),
        }
    });
    let stream: PipeStream = Box::pin(stream);
    (
        StdinWriter { tx: Some(tx), eof },
        StreamReader::new(stream),
    )
}

impl StdinWriter {
    /// Queues data for the reader, waiting for space.
    /// Returns false if the reader has gone away or the pipe was already finished.
    pub(crate) async fn send(&self, data: &[u8]) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        if data.is_empty() {
            return true;
        }
        tx.send(Bytes::copy_from_slice(data)).await.is_ok()
    }

    /// Marks a clean end of input
    pub(crate) fn finish(&mut self) {
        self.eof.store(true, Ordering::Release);
        self.tx = None;
    }
}
