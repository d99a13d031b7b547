//! Size bounding for declared and streamed object lengths.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;

use crate::error::{IngestError, IngestResult};

/// Default largest accepted object, in bytes.
pub const DEFAULT_MAX_OBJECT_SIZE: u64 = 4_000_000_000;

/// Upper bound on object size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeGuard {
    max: u64,
}

impl SizeGuard {
    pub fn new(max: u64) -> Self {
        Self { max }
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    /// Check a length the client declared, before any body byte is read.
    pub fn check_declared(&self, length: u64) -> IngestResult<()> {
        self.check(length)
    }

    /// Check the running count of bytes received so far.
    pub fn check_observed(&self, length: u64) -> IngestResult<()> {
        self.check(length)
    }

    fn check(&self, length: u64) -> IngestResult<()> {
        if length > self.max {
            return Err(IngestError::SizeExceeded {
                limit: self.max,
                length,
            });
        }
        Ok(())
    }
}

impl Default for SizeGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OBJECT_SIZE)
    }
}

/// A byte stream that stops at the first chunk crossing a size bound.
///
/// Each chunk is counted as it arrives. Once the running total exceeds the
/// guard's maximum or the declared length, the stream yields one
/// [`IngestError::SizeExceeded`], drops the wrapped stream, and then ends.
/// A stream that ends short of the declared length yields
/// [`IngestError::BadRequest`]. Transport errors surface as
/// [`IngestError::Cancelled`].
pub struct BoundedStream<S> {
    inner: Option<S>,
    guard: SizeGuard,
    declared: u64,
    observed: u64,
}

impl<S> BoundedStream<S> {
    pub fn new(inner: S, guard: SizeGuard, declared: u64) -> Self {
        Self {
            inner: Some(inner),
            guard,
            declared,
            observed: 0,
        }
    }

    /// Bytes passed through so far, including a rejected chunk.
    pub fn observed(&self) -> u64 {
        self.observed
    }

    /// `true` once the wrapped stream has been dropped.
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    fn abort(&mut self, err: IngestError) -> Poll<Option<IngestResult<Bytes>>> {
        self.inner = None;
        Poll::Ready(Some(Err(err)))
    }
}

impl<S> Stream for BoundedStream<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = IngestResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match Pin::new(inner).poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => {
                this.observed += chunk.len() as u64;
                if let Err(err) = this.guard.check_observed(this.observed) {
                    return this.abort(err);
                }
                if this.observed > this.declared {
                    let length = this.observed;
                    return this.abort(IngestError::SizeExceeded {
                        limit: this.declared,
                        length,
                    });
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.abort(IngestError::Cancelled(format!("body stream failed: {e}")))
            }
            Poll::Ready(None) => {
                this.inner = None;
                if this.observed < this.declared {
                    return Poll::Ready(Some(Err(IngestError::BadRequest(format!(
                        "body ended after {} of {} declared bytes",
                        this.observed, this.declared
                    )))));
                }
                Poll::Ready(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{self, StreamExt};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = io::Result<Bytes>> + Unpin {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn declared_boundary() {
        let guard = SizeGuard::new(100);
        assert!(guard.check_declared(100).is_ok());
        assert!(matches!(
            guard.check_declared(101),
            Err(IngestError::SizeExceeded { limit: 100, length: 101 })
        ));
        assert!(guard.check_observed(0).is_ok());
    }

    #[test]
    fn default_limit() {
        let guard = SizeGuard::default();
        assert!(guard.check_declared(4_000_000_000).is_ok());
        assert!(guard.check_declared(5_000_000_001).is_err());
    }

    #[tokio::test]
    async fn exact_length_passes() {
        let mut s = BoundedStream::new(chunks(&[b"hel", b"lo"]), SizeGuard::new(5), 5);
        let mut total = Vec::new();
        while let Some(chunk) = s.next().await {
            total.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(total, b"hello");
        assert_eq!(s.observed(), 5);
    }

    #[tokio::test]
    async fn overflow_stops_pulling_from_source() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulled);
        let source = stream::iter(0..100).map(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, io::Error>(Bytes::from_static(b"0123456789"))
        });
        let mut s = BoundedStream::new(Box::pin(source), SizeGuard::new(25), 25);

        assert!(s.next().await.unwrap().is_ok());
        assert!(s.next().await.unwrap().is_ok());
        let err = s.next().await.unwrap().unwrap_err();
        assert!(matches!(err, IngestError::SizeExceeded { limit: 25, length: 30 }));
        assert!(s.is_closed());
        assert!(s.next().await.is_none());
        assert_eq!(pulled.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn more_than_declared_is_size_exceeded() {
        let mut s = BoundedStream::new(chunks(&[b"abcdef"]), SizeGuard::new(1000), 4);
        let err = s.next().await.unwrap().unwrap_err();
        assert!(matches!(err, IngestError::SizeExceeded { limit: 4, length: 6 }));
    }

    #[tokio::test]
    async fn short_body_is_bad_request() {
        let mut s = BoundedStream::new(chunks(&[b"ab"]), SizeGuard::new(1000), 4);
        assert!(s.next().await.unwrap().is_ok());
        let err = s.next().await.unwrap().unwrap_err();
        assert!(matches!(err, IngestError::BadRequest(_)));
        assert!(s.next().await.is_none());
    }

    #[tokio::test]
    async fn transport_error_is_cancelled() {
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer gone")),
        ]);
        let mut s = BoundedStream::new(source, SizeGuard::new(1000), 4);
        s.next().await.unwrap().unwrap();
        assert!(matches!(
            s.next().await.unwrap(),
            Err(IngestError::Cancelled(_))
        ));
        assert!(s.is_closed());
    }
}
