use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, header::HeaderMap};
use tokio::time::Instant;
use tracing::{debug, trace};
use url::Url;

use crate::{
    error::{NetError, NetResult},
    operation::Operation,
    options::HttpOptions,
    traits::{OnProgress, Transport},
    types::{Headers, Request, RequestType, Response},
};

/// Response header marking a response served from a local cache.
pub const FROM_CACHE_HEADER: &str = "x-kithara-from-cache";

/// HTTP(S) transport backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpClient {
    inner: Client,
    options: HttpOptions,
}

impl HttpClient {
    /// # Errors
    ///
    /// Returns [`NetError`] if the underlying `reqwest::Client` cannot be
    /// built (e.g. the TLS backend fails to initialise).
    pub fn new(options: HttpOptions) -> NetResult<Self> {
        let mut builder = Client::builder().pool_max_idle_per_host(options.pool_max_idle_per_host);
        if let Some(timeout) = options.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let inner = builder.build().map_err(NetError::foreign)?;
        Ok(Self { inner, options })
    }

    fn build_request(&self, url: Url, request: &Request) -> RequestBuilder {
        let mut builder = self.inner.request(request.method.clone(), url);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name.to_ascii_lowercase(), value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = request.retry_parameters.timeout() {
            builder = builder.timeout(timeout);
        }
        builder
    }
}

impl Transport for HttpClient {
    fn fetch(
        &self,
        uri: &str,
        request: &Request,
        request_type: RequestType,
        on_progress: OnProgress,
    ) -> Operation<Response> {
        let Ok(url) = Url::parse(uri) else {
            return Operation::failed(NetError::malformed_uri(uri));
        };

        let builder = self.build_request(url, request);
        Operation::new(execute(
            builder,
            uri.to_string(),
            request_type,
            on_progress,
            self.options.progress_interval,
        ))
    }
}

async fn execute(
    builder: RequestBuilder,
    uri: String,
    request_type: RequestType,
    on_progress: OnProgress,
    progress_interval: Duration,
) -> NetResult<Response> {
    debug!(uri, %request_type, "sending HTTP request");
    let to_error = |error: reqwest::Error| NetError::from_reqwest(&uri, request_type, &error);

    let response = builder.send().await.map_err(to_error)?;
    let status = response.status().as_u16();
    let final_uri = response.url().to_string();
    let headers = collect_headers(response.headers());
    let total = response.content_length();

    let mut body = BytesMut::new();
    let mut stream = response.bytes_stream();
    let mut last_report = Instant::now();
    let mut since_last = 0u64;
    let mut loaded = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(to_error)?;
        let len = chunk.len() as u64;
        since_last += len;
        loaded += len;
        body.extend_from_slice(&chunk);

        let elapsed = last_report.elapsed();
        if elapsed > progress_interval {
            let remaining = total.map_or(0, |total| total.saturating_sub(loaded));
            trace!(uri, bytes = since_last, remaining, "download progress");
            on_progress(elapsed, since_last, remaining);
            last_report = Instant::now();
            since_last = 0;
        }
    }
    on_progress(last_report.elapsed(), since_last, 0);

    make_response(headers, body.freeze(), status, &uri, &final_uri, request_type)
}

fn collect_headers(map: &HeaderMap) -> Headers {
    // Multi-valued headers are joined the way browsers expose them.
    let mut headers = Headers::new();
    for (name, value) in map {
        let Ok(value) = value.to_str() else {
            continue;
        };
        let name = name.as_str();
        let joined = match headers.get(name) {
            Some(existing) => format!("{existing}, {value}"),
            None => value.to_string(),
        };
        headers.insert(name, joined);
    }
    headers
}

/// Classifies a finished HTTP exchange.
///
/// Status 200–299 other than 202 yields a [`Response`]; anything else fails
/// with a bad-status error carrying the body text for diagnostics.
///
/// # Errors
///
/// Returns a `BadHttpStatus` [`NetError`], critical for 401/403 and
/// recoverable otherwise.
pub fn make_response(
    headers: Headers,
    data: Bytes,
    status: u16,
    uri: &str,
    final_uri: &str,
    request_type: RequestType,
) -> NetResult<Response> {
    if (200..=299).contains(&status) && status != 202 {
        let from_cache = headers.contains_key(FROM_CACHE_HEADER);
        return Ok(Response {
            uri: if final_uri.is_empty() { uri } else { final_uri }.to_string(),
            original_uri: uri.to_string(),
            data,
            headers,
            from_cache,
            time: None,
        });
    }

    let body = String::from_utf8_lossy(&data).into_owned();
    debug!(uri, status, body, "HTTP error");
    Err(NetError::bad_status(
        uri,
        status,
        Some(body),
        headers,
        request_type,
    ))
}
