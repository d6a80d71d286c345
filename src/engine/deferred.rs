//! Handles to results produced by queued or in-flight operations.

use crate::error::BuildError;
use futures::future::BoxFuture;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

enum State<T> {
    /// Filled in by an operation the engine runs.
    Queued(oneshot::Receiver<Result<T, BuildError>>),
    /// Driven by whoever awaits the handle.
    Running(BoxFuture<'static, Result<T, BuildError>>),
    Ready(Option<Result<T, BuildError>>),
}

/// The eventual result of a deferred entity call.
///
/// A handle for a queued call resolves once the commit wave that owns the call has run it.
/// Awaiting it from inside that same wave never resolves; return the handle and let
/// `commit` drive it instead.
pub struct Deferred<T> {
    state: State<T>,
}

// The value is only ever moved out, never pinned in place.
impl<T> Unpin for Deferred<T> {}

impl<T: Send + 'static> Deferred<T> {
    pub(crate) fn queued(rx: oneshot::Receiver<Result<T, BuildError>>) -> Self {
        Self {
            state: State::Queued(rx),
        }
    }

    pub(crate) fn running(fut: BoxFuture<'static, Result<T, BuildError>>) -> Self {
        Self {
            state: State::Running(fut),
        }
    }

    pub fn ready(value: T) -> Self {
        Self {
            state: State::Ready(Some(Ok(value))),
        }
    }

    pub fn failed(err: BuildError) -> Self {
        Self {
            state: State::Ready(Some(Err(err))),
        }
    }

    pub fn map<U, F>(self, f: F) -> Deferred<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        Deferred::running(Box::pin(async move { self.await.map(f) }))
    }

    pub fn and_then<U, F>(self, f: F) -> Deferred<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U, BuildError> + Send + 'static,
    {
        Deferred::running(Box::pin(async move { self.await.and_then(f) }))
    }
}

impl<T> Future for Deferred<T> {
    type Output = Result<T, BuildError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            State::Queued(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(_)) => Poll::Ready(Err(BuildError::Abandoned)),
                Poll::Pending => Poll::Pending,
            },
            State::Running(fut) => fut.as_mut().poll(cx),
            State::Ready(value) => Poll::Ready(value.take().unwrap_or(Err(BuildError::Abandoned))),
        }
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            State::Queued(_) => "queued",
            State::Running(_) => "running",
            State::Ready(_) => "ready",
        };
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}
