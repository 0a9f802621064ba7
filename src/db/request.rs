//! Single-shot request adapter.
//!
//! Every open, read and write settles exactly once, with a value or an
//! [`Error`]. A [`Request`] is the awaitable side of that settlement; the
//! completing side ([`Completer`]) never leaves the crate.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{Error, Result};

#[must_use = "requests do nothing observable unless awaited"]
pub struct Request<T> {
    state: State<T>,
}

enum State<T> {
    Pending(oneshot::Receiver<Result<T>>),
    Failed(Option<Error>),
}

pub(crate) struct Completer<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T> Completer<T> {
    pub(crate) fn settle(self, outcome: Result<T>) {
        // the caller may have stopped awaiting; the work already ran either way
        let _ = self.tx.send(outcome);
    }
}

impl<T: Send + 'static> Request<T> {
    pub(crate) fn channel() -> (Completer<T>, Request<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Completer { tx },
            Request {
                state: State::Pending(rx),
            },
        )
    }

    /// Runs blocking storage work on the runtime's blocking pool.
    pub(crate) fn spawn<F>(op: F) -> Request<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (completer, request) = Request::channel();
        tokio::task::spawn_blocking(move || completer.settle(op()));
        request
    }

    pub(crate) fn failed(err: Error) -> Request<T> {
        Request {
            state: State::Failed(Some(err)),
        }
    }
}

impl<T> Future for Request<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            State::Pending(rx) => Pin::new(rx).poll(cx).map(|outcome| match outcome {
                Ok(result) => result,
                Err(_) => Err(Error::Request(
                    "request was dropped before it settled".into(),
                )),
            }),
            State::Failed(err) => Poll::Ready(Err(err.take().unwrap_or_else(|| {
                Error::InvalidState("request polled after it settled".into())
            }))),
        }
    }
}

/// Awaits `request` and applies `extract` to its successful result.
pub async fn adapt<T, U>(request: Request<T>, extract: impl FnOnce(T) -> U) -> Result<U> {
    request.await.map(extract)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn success_goes_through_extract() {
        let request = Request::spawn(|| Ok(vec![1, 2, 3]));
        let len = adapt(request, |v: Vec<i32>| v.len()).await.unwrap();
        assert_eq!(len, 3);
    }

    #[tokio::test]
    async fn failure_skips_extract() {
        let request: Request<u32> = Request::spawn(|| Err(Error::Request("disk full".into())));
        let err = adapt(request, |n| n + 1).await.unwrap_err();
        assert!(matches!(err, Error::Request(msg) if msg == "disk full"));
    }

    #[tokio::test]
    async fn dropped_completer_is_a_request_error() {
        let (completer, request) = Request::<u32>::channel();
        drop(completer);
        assert!(matches!(request.await, Err(Error::Request(_))));
    }

    #[tokio::test]
    async fn failed_request_settles_immediately() {
        let request: Request<()> = Request::failed(Error::ReadOnly);
        assert!(matches!(request.await, Err(Error::ReadOnly)));
    }
}
