#![allow(dead_code)]

use std::{
    future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use kithara_net::{
    EngineOptions, Headers, NetError, NetResult, NetworkEngine, OnProgress, Operation, Request,
    RequestFilter, RequestType, Response, ResponseFilter, RetryPolicy, SchemeRegistry, Transport,
};
use parking_lot::Mutex;

pub const SCHEME: &str = "test";

/// What a [`ScriptedTransport`] does for one call.
pub enum Reply {
    Ok(&'static [u8]),
    Fail(NetError),
    /// Reports each `(bytes, remaining)` pair, then succeeds.
    Progress(Vec<(u64, u64)>, &'static [u8]),
    /// Reports once, then never settles.
    ProgressThenHang(u64, u64),
    Hang,
}

type Script = Box<dyn Fn(usize, &str) -> Reply + Send + Sync>;

/// Transport that answers from a script and records every call.
pub struct ScriptedTransport {
    script: Script,
    calls: Mutex<Vec<(String, Request)>>,
    hang_dropped: Arc<AtomicBool>,
}

impl ScriptedTransport {
    /// `script` gets the zero-based call index and the URI.
    pub fn new<F>(script: F) -> Arc<Self>
    where
        F: Fn(usize, &str) -> Reply + Send + Sync + 'static,
    {
        Arc::new(Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
            hang_dropped: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn always_ok(body: &'static [u8]) -> Arc<Self> {
        Self::new(move |_, _| Reply::Ok(body))
    }

    pub fn hanging() -> Arc<Self> {
        Self::new(|_, _| Reply::Hang)
    }

    pub fn uris(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(uri, _)| uri.clone()).collect()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.calls
            .lock()
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Whether a hanging call was torn down.
    pub fn hang_dropped(&self) -> bool {
        self.hang_dropped.load(Ordering::SeqCst)
    }
}

async fn hang(guard: SetOnDrop) -> NetResult<Response> {
    let _guard = guard;
    future::pending().await
}

impl Transport for ScriptedTransport {
    fn fetch(
        &self,
        uri: &str,
        request: &Request,
        _request_type: RequestType,
        on_progress: OnProgress,
    ) -> Operation<Response> {
        let index = {
            let mut calls = self.calls.lock();
            calls.push((uri.to_string(), request.clone()));
            calls.len() - 1
        };

        match (self.script)(index, uri) {
            Reply::Ok(body) => Operation::completed(ok_response(uri, body)),
            Reply::Fail(error) => Operation::failed(error),
            Reply::Progress(reports, body) => {
                let response = ok_response(uri, body);
                Operation::new(async move {
                    for (bytes, remaining) in reports {
                        on_progress(Duration::from_millis(5), bytes, remaining);
                    }
                    Ok(response)
                })
            }
            Reply::ProgressThenHang(bytes, remaining) => {
                let guard = SetOnDrop(self.hang_dropped.clone());
                Operation::new(async move {
                    on_progress(Duration::from_millis(5), bytes, remaining);
                    hang(guard).await
                })
            }
            Reply::Hang => Operation::new(hang(SetOnDrop(self.hang_dropped.clone()))),
        }
    }
}

struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub fn ok_response(uri: &str, body: &'static [u8]) -> Response {
    Response {
        uri: uri.to_string(),
        original_uri: uri.to_string(),
        data: Bytes::from_static(body),
        headers: Headers::new(),
        from_cache: false,
        time: None,
    }
}

/// Recoverable bad-status failure.
pub fn unavailable(uri: &str, status: u16) -> NetError {
    NetError::bad_status(
        uri,
        status,
        Some("unavailable".to_string()),
        Headers::new(),
        RequestType::Segment,
    )
}

/// Retries quickly and deterministically.
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(max_attempts)
        .with_base_delay(Duration::from_millis(5))
        .with_fuzz_factor(0.0)
}

pub fn request(uris: &[&str], max_attempts: u32) -> Request {
    Request::new(uris.iter().copied(), fast_policy(max_attempts))
}

/// Engine whose isolated registry maps `test:` to `transport`.
pub fn engine_with(transport: Arc<dyn Transport>, options: EngineOptions) -> NetworkEngine {
    let registry = SchemeRegistry::new();
    registry.register(SCHEME, transport);
    NetworkEngine::new(options.with_registry(registry))
}

pub async fn wait_for_calls(transport: &ScriptedTransport, count: usize) {
    while transport.call_count() < count {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

pub fn request_filter<F>(filter: F) -> Arc<dyn RequestFilter>
where
    F: Fn(RequestType, &mut Request) -> NetResult<()> + Send + Sync + 'static,
{
    Arc::new(filter)
}

pub fn response_filter<F>(filter: F) -> Arc<dyn ResponseFilter>
where
    F: Fn(RequestType, &mut Response) -> NetResult<()> + Send + Sync + 'static,
{
    Arc::new(filter)
}
