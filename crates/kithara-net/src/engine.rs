use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{sync::broadcast, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    backoff::Backoff,
    error::{NetError, NetResult},
    events::{EventBus, NetEvent},
    manager::OperationManager,
    operation::{AbortHandle, Operation},
    options::{EngineOptions, ProgressCallback},
    scheme::{SchemeRegistry, uri_scheme},
    traits::{OnProgress, RequestFilter, ResponseFilter, Transport},
    types::{Request, RequestType, Response},
};

/// Turns logical requests into responses: runs filters, routes each attempt
/// to the transport registered for the URI's scheme, retries recoverable
/// failures with backoff while failing over across mirrors.
///
/// Cheap to clone; clones drive the same engine.
#[derive(Clone)]
pub struct NetworkEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    destroyed: AtomicBool,
    operations: OperationManager,
    request_filters: Mutex<Vec<Arc<dyn RequestFilter>>>,
    response_filters: Mutex<Vec<Arc<dyn ResponseFilter>>>,
    on_progress: Option<ProgressCallback>,
    registry: SchemeRegistry,
    events: EventBus,
    default_scheme: String,
}

/// Outcome of the send loop.
struct Attempt {
    response: Response,
    got_progress: bool,
}

impl NetworkEngine {
    pub fn new(options: EngineOptions) -> Self {
        let EngineOptions {
            default_scheme,
            events_channel_capacity,
            on_progress,
            registry,
        } = options;

        Self {
            inner: Arc::new(EngineInner {
                destroyed: AtomicBool::new(false),
                operations: OperationManager::new(),
                request_filters: Mutex::new(Vec::new()),
                response_filters: Mutex::new(Vec::new()),
                on_progress,
                registry: registry.unwrap_or_else(SchemeRegistry::global),
                events: EventBus::new(events_channel_capacity),
                default_scheme,
            }),
        }
    }

    /// Adds a request filter. Filters run in registration order; registering
    /// the same filter again keeps its original position.
    pub fn register_request_filter(&self, filter: Arc<dyn RequestFilter>) {
        let mut filters = self.inner.request_filters.lock();
        if !filters.iter().any(|f| Arc::ptr_eq(f, &filter)) {
            filters.push(filter);
        }
    }

    pub fn unregister_request_filter(&self, filter: &Arc<dyn RequestFilter>) -> bool {
        let mut filters = self.inner.request_filters.lock();
        let before = filters.len();
        filters.retain(|f| !Arc::ptr_eq(f, filter));
        filters.len() != before
    }

    pub fn clear_all_request_filters(&self) {
        self.inner.request_filters.lock().clear();
    }

    /// Adds a response filter, with the same ordering rules as request
    /// filters.
    pub fn register_response_filter(&self, filter: Arc<dyn ResponseFilter>) {
        let mut filters = self.inner.response_filters.lock();
        if !filters.iter().any(|f| Arc::ptr_eq(f, &filter)) {
            filters.push(filter);
        }
    }

    pub fn unregister_response_filter(&self, filter: &Arc<dyn ResponseFilter>) -> bool {
        let mut filters = self.inner.response_filters.lock();
        let before = filters.len();
        filters.retain(|f| !Arc::ptr_eq(f, filter));
        filters.len() != before
    }

    pub fn clear_all_response_filters(&self) {
        self.inner.response_filters.lock().clear();
    }

    /// Retry notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<NetEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    /// Number of requests still in flight.
    pub fn outstanding(&self) -> usize {
        self.inner.operations.len()
    }

    /// Rejects all future requests, drops every filter, then aborts all
    /// in-flight requests and waits for their teardown.
    pub async fn destroy(&self) {
        self.inner.destroyed.store(true, Ordering::SeqCst);
        self.clear_all_request_filters();
        self.clear_all_response_filters();
        debug!(outstanding = self.outstanding(), "destroying network engine");
        self.inner.operations.destroy_all().await;
    }

    /// Starts `request`. The engine works on its own copy: filters never
    /// touch the caller's value.
    pub fn request(&self, request_type: RequestType, request: Request) -> PendingRequest {
        let bytes_remaining = Arc::new(AtomicU64::new(0));

        if self.is_destroyed() {
            return PendingRequest {
                operation: Operation::aborted(),
                bytes_remaining,
            };
        }
        if request.uris.is_empty() {
            return PendingRequest {
                operation: Operation::failed(NetError::missing_uris()),
                bytes_remaining,
            };
        }

        let inner = self.inner.clone();
        let filtered =
            Operation::new(async move { inner.filter_request(request_type, request).await });

        let inner = self.inner.clone();
        let remaining = bytes_remaining.clone();
        let sent = filtered.chain(move |(request, filter_time): (Request, Duration)| {
            send_with_retry(inner, request_type, request, remaining).chain(
                move |attempt| -> NetResult<(Attempt, Duration)> { Ok((attempt, filter_time)) },
            )
        });

        let inner = self.inner.clone();
        let received = sent.chain(move |(attempt, filter_time): (Attempt, Duration)| {
            Operation::new(async move {
                inner
                    .filter_response(request_type, attempt, filter_time)
                    .await
            })
        });

        let on_progress = self.inner.on_progress.clone();
        let finished = received.chain_with(
            move |(response, got_progress): (Response, bool)| -> NetResult<Response> {
                let synthetic =
                    !got_progress && !response.from_cache && request_type == RequestType::Segment;
                if let Some(on_progress) = on_progress.filter(|_| synthetic) {
                    on_progress(
                        response.time.unwrap_or_default(),
                        response.data.len() as u64,
                    );
                }
                Ok(response)
            },
            // Retries are spent by now, nothing downstream can recover.
            |error: NetError| -> NetResult<Response> { Err(error.into_critical()) },
        );

        PendingRequest {
            operation: self.inner.operations.manage(finished),
            bytes_remaining,
        }
    }
}

impl Default for NetworkEngine {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

impl fmt::Debug for NetworkEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkEngine")
            .field("destroyed", &self.is_destroyed())
            .field("outstanding", &self.outstanding())
            .field("default_scheme", &self.inner.default_scheme)
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

impl EngineInner {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    async fn filter_request(
        &self,
        request_type: RequestType,
        mut request: Request,
    ) -> NetResult<(Request, Duration)> {
        let started = Instant::now();
        let filters = self.request_filters.lock().clone();
        for filter in filters {
            filter
                .filter(request_type, &mut request)
                .await
                .map_err(|error| {
                    if error.is_aborted() {
                        error
                    } else {
                        NetError::request_filter(error)
                    }
                })?;
        }
        Ok((request, started.elapsed()))
    }

    async fn filter_response(
        &self,
        request_type: RequestType,
        attempt: Attempt,
        request_filter_time: Duration,
    ) -> NetResult<(Response, bool)> {
        let Attempt {
            mut response,
            got_progress,
        } = attempt;

        let started = Instant::now();
        let filters = self.response_filters.lock().clone();
        for filter in filters {
            filter
                .filter(request_type, &mut response)
                .await
                .map_err(|error| {
                    if error.is_aborted() {
                        error
                    } else {
                        NetError::response_filter(error)
                    }
                })?;
        }

        let filter_time = request_filter_time + started.elapsed();
        response.time = Some(response.time.unwrap_or_default() + filter_time);
        Ok((response, got_progress))
    }

    /// Finds the transport for `request.uris[index]`, first making a
    /// schemeless URI explicit with the default scheme.
    fn resolve_transport(
        &self,
        request: &mut Request,
        index: usize,
    ) -> NetResult<Arc<dyn Transport>> {
        let uri = &mut request.uris[index];
        let scheme = match uri_scheme(uri) {
            Some(scheme) => scheme.to_ascii_lowercase(),
            None => {
                let explicit = format!("{}:{uri}", self.default_scheme);
                *uri = explicit;
                self.default_scheme.to_ascii_lowercase()
            }
        };

        self.registry.resolve(&scheme).ok_or_else(|| {
            warn!(scheme, uri = %uri, "no transport registered for scheme");
            NetError::unsupported_scheme(scheme, uri.clone())
        })
    }

    fn progress_sink(
        &self,
        request_type: RequestType,
        got_progress: &Arc<AtomicBool>,
        bytes_remaining: &Arc<AtomicU64>,
    ) -> OnProgress {
        let forward = self
            .on_progress
            .clone()
            .filter(|_| request_type == RequestType::Segment);
        let got_progress = got_progress.clone();
        let bytes_remaining = bytes_remaining.clone();

        Arc::new(move |elapsed, loaded, remaining| {
            bytes_remaining.store(remaining, Ordering::Relaxed);
            if let Some(on_progress) = &forward {
                on_progress(elapsed, loaded);
                got_progress.store(true, Ordering::Relaxed);
            }
        })
    }
}

/// Attempts `request` until it succeeds, fails critically or runs out of
/// attempts, moving to the next mirror after every recoverable failure.
fn send_with_retry(
    inner: Arc<EngineInner>,
    request_type: RequestType,
    mut request: Request,
    bytes_remaining: Arc<AtomicU64>,
) -> Operation<Attempt> {
    Operation::cooperative(move |cancel| async move {
        // Request filters may have emptied the mirror list.
        if request.uris.is_empty() {
            return Err(NetError::missing_uris());
        }

        let mut backoff = Backoff::new(&request.retry_parameters);
        let got_progress = Arc::new(AtomicBool::new(false));
        let mut index = 0;
        let mut last_error: Option<NetError> = None;

        loop {
            let transport = inner.resolve_transport(&mut request, index)?;

            let granted = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(NetError::aborted()),
                granted = backoff.attempt() => granted,
            };
            if inner.is_destroyed() {
                return Err(NetError::aborted());
            }

            let result = match granted {
                Ok(()) => {
                    let uri = request.uris[index].clone();
                    debug!(
                        uri,
                        %request_type,
                        attempt = backoff.attempts(),
                        "dispatching request"
                    );
                    let on_progress =
                        inner.progress_sink(request_type, &got_progress, &bytes_remaining);
                    dispatch(&*transport, &uri, &request, request_type, on_progress, &cancel)
                        .await
                }
                Err(exhausted) => Err(exhausted),
            };

            let error = match result {
                Ok(response) => {
                    return Ok(Attempt {
                        response,
                        got_progress: got_progress.load(Ordering::Relaxed),
                    });
                }
                Err(error) => error,
            };

            if inner.is_destroyed() {
                return Err(NetError::aborted());
            }
            if error.is_aborted() {
                return Err(error);
            }
            if error.is_attempts_exhausted() {
                return Err(last_error.unwrap_or(error));
            }
            if !error.is_recoverable() {
                return Err(error);
            }

            warn!(
                uri = error.uri().unwrap_or_default(),
                %request_type,
                attempt = backoff.attempts(),
                %error,
                "recoverable failure, retrying"
            );
            inner.events.publish(NetEvent::Retry {
                error: (!error.is_foreign()).then(|| error.clone()),
            });
            index = (index + 1) % request.uris.len();
            last_error = Some(error);
        }
    })
}

async fn dispatch(
    transport: &dyn Transport,
    uri: &str,
    request: &Request,
    request_type: RequestType,
    on_progress: OnProgress,
    cancel: &CancellationToken,
) -> NetResult<Response> {
    let started = Instant::now();
    let mut response = transport
        .fetch(uri, request, request_type, on_progress)
        .linked(cancel)
        .await?;
    if response.time.is_none() {
        response.time = Some(started.elapsed());
    }
    Ok(response)
}

/// Caller-facing handle for an in-flight request.
///
/// Await it for the response; dropping it does not cancel the request.
pub struct PendingRequest {
    operation: Operation<Response>,
    bytes_remaining: Arc<AtomicU64>,
}

impl PendingRequest {
    /// Bytes the transport still expects to receive, as of its last progress
    /// report.
    ///
    /// Tracked for every request type, whether or not the engine has a
    /// progress callback. Stays 0 for transports that never report progress.
    pub fn bytes_remaining(&self) -> u64 {
        self.bytes_remaining.load(Ordering::Relaxed)
    }

    /// Aborts the request and waits for its teardown.
    pub async fn abort(&self) {
        self.operation.abort().await;
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.operation.abort_handle()
    }

    pub fn into_operation(self) -> Operation<Response> {
        self.operation
    }
}

impl Future for PendingRequest {
    type Output = NetResult<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.operation).poll(cx)
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("operation", &self.operation)
            .field("bytes_remaining", &self.bytes_remaining())
            .finish()
    }
}
