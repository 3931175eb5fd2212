//! Driving a reassembler from a fragment source.
//!
//! The fragment source is a finite, non-restartable `Stream` of UTF-8
//! chunks. Suspension only happens while waiting on that source; each
//! fragment is classified synchronously once it arrives.

use std::fmt::Display;
use std::pin::{Pin, pin};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use pin_project_lite::pin_project;

use super::reassembler::{FragmentDelta, Reassembled, StreamReassembler};

/// Feed every fragment of `fragments` into `reassembler` and finish it.
///
/// An upstream error is recorded (with a buffer snapshot) and ends the
/// stream; whatever was accumulated up to that point is still returned.
pub async fn reassemble<S, T, E>(reassembler: &mut StreamReassembler, fragments: S) -> Reassembled
where
    S: Stream<Item = Result<T, E>>,
    T: AsRef<str>,
    E: Display,
{
    let mut fragments = pin!(fragments);
    while let Some(item) = fragments.next().await {
        match item {
            Ok(fragment) => {
                if let Err(e) = reassembler.feed(fragment.as_ref()) {
                    reassembler.record_error(e, "feed");
                    break;
                }
            }
            Err(e) => {
                reassembler.record_error(e, "upstream");
                break;
            }
        }
    }
    reassembler.finish()
}

/// End a fragment source with an error once `idle` passes without a fragment.
///
/// Errors from the source are stringified so both failure kinds share one
/// item type; [`reassemble`] records either and stops.
pub fn with_idle_timeout<S, T, E>(
    fragments: S,
    idle: Duration,
) -> impl Stream<Item = Result<T, String>>
where
    S: Stream<Item = Result<T, E>>,
    E: Display,
{
    tokio_stream::StreamExt::timeout(fragments, idle).map(move |item| match item {
        Ok(Ok(fragment)) => Ok(fragment),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("no fragment within {}ms", idle.as_millis())),
    })
}

pin_project! {
    /// Stream adapter yielding one [`FragmentDelta`] per upstream fragment.
    ///
    /// Upstream errors are recorded on the inner reassembler and end the
    /// stream instead of being propagated. Held-back marker text is
    /// emitted as a final delta when the source ends.
    pub struct ReassemblingStream<S> {
        #[pin]
        inner: S,
        reassembler: StreamReassembler,
        done: bool,
    }
}

impl<S> ReassemblingStream<S> {
    pub fn new(inner: S) -> Self {
        Self::with_reassembler(inner, StreamReassembler::new())
    }

    /// Use a pooled reassembler. It is reset before use.
    pub fn with_reassembler(inner: S, mut reassembler: StreamReassembler) -> Self {
        reassembler.reset();
        Self {
            inner,
            reassembler,
            done: false,
        }
    }

    pub fn reassembler(&self) -> &StreamReassembler {
        &self.reassembler
    }

    /// Finish the reassembler and hand it back with the final buffers.
    pub fn into_parts(self) -> (Reassembled, StreamReassembler) {
        let mut reassembler = self.reassembler;
        let out = reassembler.finish();
        (out, reassembler)
    }
}

impl<S, T, E> Stream for ReassemblingStream<S>
where
    S: Stream<Item = Result<T, E>>,
    T: AsRef<str>,
    E: Display,
{
    type Item = FragmentDelta;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }

        let item = ready!(this.inner.poll_next(cx));
        match item {
            Some(Ok(fragment)) => match this.reassembler.feed_delta(fragment.as_ref()) {
                Ok(delta) => Poll::Ready(Some(delta)),
                Err(e) => {
                    this.reassembler.record_error(e, "feed");
                    *this.done = true;
                    Poll::Ready(None)
                }
            },
            Some(Err(e)) => {
                this.reassembler.record_error(e, "upstream");
                *this.done = true;
                let tail = this.reassembler.flush_carryover();
                Poll::Ready((!tail.is_empty()).then_some(tail))
            }
            None => {
                *this.done = true;
                let tail = this.reassembler.flush_carryover();
                Poll::Ready((!tail.is_empty()).then_some(tail))
            }
        }
    }
}
