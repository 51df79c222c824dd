//! Stream throttling utilities

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Interval, interval};

/// Extension trait to add throttling to any Stream
pub trait ThrottleExt: Stream {
    /// Throttle the stream to emit at most once per interval
    ///
    /// Uses "latest-wins" semantics - if multiple items arrive
    /// during an interval, only the latest is emitted. This is the
    /// right behavior for frame snapshots, where a stale screen
    /// image has no value once a newer one exists.
    fn throttle(self, duration: Duration) -> Throttle<Self>
    where
        Self: Sized,
    {
        Throttle::new(self, duration)
    }
}

impl<T: Stream> ThrottleExt for T {}

pin_project! {
    /// A stream combinator that throttles emission rate
    pub struct Throttle<S: Stream> {
        #[pin]
        stream: S,
        interval: Interval,
        pending: Option<S::Item>,
    }
}

impl<S: Stream> Throttle<S> {
    /// Create a new throttled stream
    pub fn new(stream: S, duration: Duration) -> Self {
        let mut interval = interval(duration);
        // Set missed tick behavior to delay (don't burst)
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        Self { stream, interval, pending: None }
    }
}

impl<S: Stream> Stream for Throttle<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        // Wait for interval tick
        ready!(this.interval.poll_tick(cx));

        // Drain all available items, keeping only the latest
        loop {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => {
                    *this.pending = Some(item);
                    // Continue draining
                }
                Poll::Ready(None) => {
                    // Stream ended
                    return Poll::Ready(this.pending.take());
                }
                Poll::Pending => {
                    // No more items available right now. An idle source is
                    // not an ended one: without a buffered item we stay
                    // pending until the source wakes us.
                    return match this.pending.take() {
                        Some(item) => Poll::Ready(Some(item)),
                        None => Poll::Pending,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn throttle_keeps_only_the_latest_item() {
        let items = futures::stream::iter(0..50);
        let mut throttled = items.throttle(Duration::from_millis(1));

        // All 50 items are immediately available, so the first poll after
        // the tick drains them all and yields only the last one.
        let first = throttled.next().await;
        assert_eq!(first, Some(49));
        assert_eq!(throttled.next().await, None);
    }

    #[tokio::test]
    async fn throttle_passes_single_items_through() {
        let items = futures::stream::iter(std::iter::once(7));
        let mut throttled = items.throttle(Duration::from_millis(1));
        assert_eq!(throttled.next().await, Some(7));
        assert_eq!(throttled.next().await, None);
    }

    #[tokio::test]
    async fn idle_source_does_not_end_the_stream() {
        let items = futures::stream::iter(std::iter::once(1)).chain(futures::stream::pending());
        let mut throttled = items.throttle(Duration::from_millis(1));
        assert_eq!(throttled.next().await, Some(1));

        // The source is quiet but alive; several intervals must pass
        // without the throttled stream terminating.
        let quiet = tokio::time::timeout(Duration::from_millis(50), throttled.next()).await;
        assert!(quiet.is_err(), "idle intervals must not yield end-of-stream");
    }
}
