#![forbid(unsafe_code)]

mod backoff;
mod client;
mod data_uri;
mod engine;
mod error;
mod events;
mod manager;
mod operation;
mod options;
mod scheme;
mod traits;
mod types;

pub use crate::{
    backoff::{Backoff, fuzz},
    client::{FROM_CACHE_HEADER, HttpClient, make_response},
    data_uri::{DataUri, DataUriTransport, parse_data_uri},
    engine::{NetworkEngine, PendingRequest},
    error::{Category, ErrorKind, NetError, NetResult, Severity},
    events::{EventBus, NetEvent},
    manager::OperationManager,
    operation::{AbortHandle, IntoOperation, Operation},
    options::{EngineOptions, HttpOptions, ProgressCallback},
    scheme::{Priority, SchemeRegistry, register_scheme, unregister_scheme, uri_scheme},
    traits::{OnProgress, RequestFilter, ResponseFilter, Transport},
    types::{Headers, Method, Request, RequestType, Response, RetryPolicy},
};
