use std::{
    any::Any,
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    task::{Context, Poll},
};

use futures::FutureExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{NetError, NetResult};

/// Abort side of an [`Operation`], detachable from the result.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    cancel: CancellationToken,
    settled: CancellationToken,
}

impl AbortHandle {
    fn new() -> Self {
        Self::sharing(CancellationToken::new())
    }

    fn sharing(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            settled: CancellationToken::new(),
        }
    }

    /// Requests cancellation and waits until the operation's teardown has run.
    ///
    /// Idempotent, never fails. Work already done is not rolled back.
    pub async fn abort(&self) {
        self.cancel.cancel();
        self.settled.cancelled().await;
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_settled(&self) -> bool {
        self.settled.is_cancelled()
    }

    /// Resolves once the operation has produced its outcome and released
    /// everything it held.
    pub async fn settled(&self) {
        self.settled.cancelled().await;
    }
}

/// Eager, abortable unit of async work producing a [`NetResult`].
///
/// Constructing an operation spawns its work on the current Tokio runtime;
/// awaiting it only observes the outcome. Dropping an `Operation` does not
/// cancel it, call [`Operation::abort`] for that.
///
/// Chained operations share the cancellation token of the root, so aborting
/// any node of a chain aborts the whole chain.
pub struct Operation<T> {
    rx: oneshot::Receiver<NetResult<T>>,
    handle: AbortHandle,
}

impl<T: Send + 'static> Operation<T> {
    /// Runs `fut`, dropping it as soon as the operation is aborted.
    pub fn new<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = NetResult<T>> + Send + 'static,
    {
        Self::cooperative(|token| async move {
            tokio::select! {
                biased;
                () = token.cancelled() => Err(NetError::aborted()),
                result = fut => result,
            }
        })
    }

    /// Runs a body that watches the abort token itself.
    ///
    /// The operation settles only when the body returns, so the body can
    /// finish its own teardown before reporting the abort.
    pub fn cooperative<F, Fut>(body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = NetResult<T>> + Send + 'static,
    {
        let handle = AbortHandle::new();
        let fut = body(handle.cancel.clone());
        Self::spawn(handle, fut)
    }

    /// Wraps work that cannot be interrupted. Aborting is a no-op that still
    /// resolves once `fut` has finished.
    pub fn not_abortable<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = NetResult<T>> + Send + 'static,
    {
        Self::spawn(AbortHandle::new(), fut)
    }

    pub fn completed(value: T) -> Self {
        Self::settled_with(Ok(value), CancellationToken::new())
    }

    pub fn failed(error: NetError) -> Self {
        Self::settled_with(Err(error), CancellationToken::new())
    }

    pub fn aborted() -> Self {
        let cancel = CancellationToken::new();
        cancel.cancel();
        Self::settled_with(Err(NetError::aborted()), cancel)
    }

    fn settled_with(result: NetResult<T>, cancel: CancellationToken) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        let handle = AbortHandle::sharing(cancel);
        handle.settled.cancel();
        Self { rx, handle }
    }

    fn spawn<Fut>(handle: AbortHandle, fut: Fut) -> Self
    where
        Fut: Future<Output = NetResult<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let settled = handle.settled.clone().drop_guard();
        tokio::spawn(async move {
            let _settled = settled;
            let result = AssertUnwindSafe(fut).catch_unwind().await.unwrap_or_else(|panic| {
                let message = panic_message(&*panic);
                warn!(message, "operation task panicked");
                Err(NetError::task_failed(message))
            });
            let _ = tx.send(result);
        });
        Self { rx, handle }
    }

    /// Continues with `on_success` once this operation succeeds; failures
    /// propagate untouched.
    pub fn chain<U, S, RS>(self, on_success: S) -> Operation<U>
    where
        U: Send + 'static,
        S: FnOnce(T) -> RS + Send + 'static,
        RS: IntoOperation<Output = U>,
    {
        self.then(on_success, None::<fn(NetError) -> NetResult<U>>)
    }

    /// Continues with `on_success` or `on_error` depending on the outcome.
    ///
    /// Neither callback runs once the chain has been aborted.
    pub fn chain_with<U, S, RS, E, RE>(self, on_success: S, on_error: E) -> Operation<U>
    where
        U: Send + 'static,
        S: FnOnce(T) -> RS + Send + 'static,
        RS: IntoOperation<Output = U>,
        E: FnOnce(NetError) -> RE + Send + 'static,
        RE: IntoOperation<Output = U>,
    {
        self.then(on_success, Some(on_error))
    }

    /// Handles a failure, passing successes through.
    pub fn or_else<E, RE>(self, on_error: E) -> Self
    where
        E: FnOnce(NetError) -> RE + Send + 'static,
        RE: IntoOperation<Output = T>,
    {
        self.then(Ok::<T, NetError>, Some(on_error))
    }

    fn then<U, S, RS, E, RE>(self, on_success: S, on_error: Option<E>) -> Operation<U>
    where
        U: Send + 'static,
        S: FnOnce(T) -> RS + Send + 'static,
        RS: IntoOperation<Output = U>,
        E: FnOnce(NetError) -> RE + Send + 'static,
        RE: IntoOperation<Output = U>,
    {
        let cancel = self.handle.cancel.clone();
        let upstream = self.handle.clone();
        Operation::spawn(AbortHandle::sharing(cancel.clone()), async move {
            let result = self.await;
            if cancel.is_cancelled() {
                upstream.settled().await;
                return Err(NetError::aborted());
            }

            let next = match (result, on_error) {
                (Ok(value), _) => on_success(value).into_operation(),
                (Err(error), Some(on_error)) => on_error(error).into_operation(),
                (Err(error), None) => return Err(error),
            };
            next.linked(&cancel).await
        })
    }

    /// Runs `cb` exactly once after this operation settles, whatever the
    /// outcome, without altering it.
    pub fn finally<F>(self, cb: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let upstream = self.handle.clone();
        let handle = AbortHandle::sharing(self.handle.cancel.clone());
        Self::spawn(handle, async move {
            let finalizer = OnDrop(Some(cb));
            let result = self.await;
            upstream.settled().await;
            drop(finalizer);
            result
        })
    }

    /// Awaits the outcome unless `token` fires first, in which case the
    /// operation is aborted and its teardown awaited.
    pub async fn linked(mut self, token: &CancellationToken) -> NetResult<T> {
        tokio::select! {
            biased;
            () = token.cancelled() => {
                self.abort().await;
                Err(NetError::aborted())
            }
            result = &mut self => result,
        }
    }
}

impl<T> Operation<T> {
    pub async fn abort(&self) {
        self.handle.abort().await;
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.clone()
    }
}

impl<T> Future for Operation<T> {
    type Output = NetResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the runtime tore the task down.
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| Err(NetError::task_failed("task dropped before settling")))
        })
    }
}

impl<T> fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("aborted", &self.handle.is_aborted())
            .field("settled", &self.handle.is_settled())
            .finish()
    }
}

/// Values a continuation may return: a plain result or another operation.
pub trait IntoOperation {
    type Output;

    fn into_operation(self) -> Operation<Self::Output>;
}

impl<T> IntoOperation for Operation<T> {
    type Output = T;

    fn into_operation(self) -> Operation<T> {
        self
    }
}

impl<T: Send + 'static> IntoOperation for NetResult<T> {
    type Output = T;

    fn into_operation(self) -> Operation<T> {
        match self {
            Ok(value) => Operation::completed(value),
            Err(error) => Operation::failed(error),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct OnDrop<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for OnDrop<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}
