use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use pin_project_lite::pin_project;

type ReleaseHook = Box<dyn FnOnce() + Send + 'static>;

pin_project! {
    /// A response body that runs a release hook exactly once when dropped,
    /// whichever path drops it (clean end, error, or cancellation).
    pub struct TrackedBody<S> {
        #[pin]
        inner: S,
        on_release: Option<ReleaseHook>,
    }

    impl<S> PinnedDrop for TrackedBody<S> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(release) = this.on_release.take() {
                release();
            }
        }
    }
}

impl<S> TrackedBody<S> {
    pub fn new(inner: S, on_release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner,
            on_release: Some(Box::new(on_release)),
        }
    }
}

impl<S: Stream> Stream for TrackedBody<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
