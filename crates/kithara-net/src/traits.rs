use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    error::NetResult,
    operation::Operation,
    types::{Request, RequestType, Response},
};

/// Transport progress callback: `(elapsed since last report, bytes since last
/// report, bytes remaining)`.
pub type OnProgress = Arc<dyn Fn(Duration, u64, u64) + Send + Sync>;

/// Performs the actual I/O for one URI scheme.
///
/// Implementations honour `request.retry_parameters.timeout`, report
/// streaming progress through `on_progress`, and fail with a typed
/// [`NetError`](crate::NetError) for every unsuccessful outcome.
pub trait Transport: Send + Sync {
    fn fetch(
        &self,
        uri: &str,
        request: &Request,
        request_type: RequestType,
        on_progress: OnProgress,
    ) -> Operation<Response>;
}

impl<F> Transport for F
where
    F: Fn(&str, &Request, RequestType, OnProgress) -> Operation<Response> + Send + Sync,
{
    fn fetch(
        &self,
        uri: &str,
        request: &Request,
        request_type: RequestType,
        on_progress: OnProgress,
    ) -> Operation<Response> {
        self(uri, request, request_type, on_progress)
    }
}

/// Runs before the first attempt of every request; may mutate the request.
#[async_trait]
pub trait RequestFilter: Send + Sync {
    async fn filter(&self, request_type: RequestType, request: &mut Request) -> NetResult<()>;
}

#[async_trait]
impl<F> RequestFilter for F
where
    F: Fn(RequestType, &mut Request) -> NetResult<()> + Send + Sync,
{
    async fn filter(&self, request_type: RequestType, request: &mut Request) -> NetResult<()> {
        self(request_type, request)
    }
}

/// Runs after a successful send; may mutate the response.
#[async_trait]
pub trait ResponseFilter: Send + Sync {
    async fn filter(&self, request_type: RequestType, response: &mut Response) -> NetResult<()>;
}

#[async_trait]
impl<F> ResponseFilter for F
where
    F: Fn(RequestType, &mut Response) -> NetResult<()> + Send + Sync,
{
    async fn filter(&self, request_type: RequestType, response: &mut Response) -> NetResult<()> {
        self(request_type, response)
    }
}
