//! Test helpers shared by the tokio-side tests.

use std::cell::RefCell;
use std::io;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::oneshot;

/// One completed operation on a `RecordingStream`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoOp {
    Read(Vec<u8>),
    Write(Vec<u8>),
    Shutdown,
}

/// Wraps a stream and logs every completed read, write and shutdown.
pub struct RecordingStream<S> {
    inner: S,
    ops: Rc<RefCell<Vec<IoOp>>>,
    dropped: Option<oneshot::Sender<()>>,
}

/// Observer side of a `RecordingStream`.
pub struct Recording {
    ops: Rc<RefCell<Vec<IoOp>>>,
    /// Resolves once the stream has been dropped by its owner.
    pub dropped: oneshot::Receiver<()>,
}

impl Recording {
    pub fn ops(&self) -> Vec<IoOp> {
        self.ops.borrow().clone()
    }
}

impl<S> RecordingStream<S> {
    pub fn new(inner: S) -> (Self, Recording) {
        let ops = Rc::new(RefCell::new(Vec::new()));
        let (tx, rx) = oneshot::channel();
        let stream = Self {
            inner,
            ops: Rc::clone(&ops),
            dropped: Some(tx),
        };
        (stream, Recording { ops, dropped: rx })
    }
}

impl<S> Drop for RecordingStream<S> {
    fn drop(&mut self) {
        if let Some(tx) = self.dropped.take() {
            let _ = tx.send(());
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for RecordingStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = result {
            let data = buf.filled()[before..].to_vec();
            this.ops.borrow_mut().push(IoOp::Read(data));
        }
        result
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for RecordingStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = result {
            this.ops.borrow_mut().push(IoOp::Write(buf[..n].to_vec()));
        }
        result
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_shutdown(cx);
        if let Poll::Ready(Ok(())) = result {
            this.ops.borrow_mut().push(IoOp::Shutdown);
        }
        result
    }
}
