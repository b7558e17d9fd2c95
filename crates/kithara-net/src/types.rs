use std::{collections::HashMap, fmt, time::Duration};

use bytes::Bytes;
pub use reqwest::Method;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    inner: HashMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.inner.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.inner.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<HashMap<String, String>> for Headers {
    fn from(map: HashMap<String, String>) -> Self {
        Self { inner: map }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            inner: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// What a request is for. Filters and progress reporting branch on it; it
/// carries no other meaning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestType {
    Manifest,
    Segment,
    License,
    App,
    Timing,
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Manifest => "manifest",
            Self::Segment => "segment",
            Self::License => "license",
            Self::App => "app",
            Self::Timing => "timing",
        };
        f.write_str(name)
    }
}

/// Retry parameters for one logical request.
///
/// `max_attempts` counts the first attempt. A `timeout` of zero means the
/// transport applies no timeout.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub fuzz_factor: f64,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
            fuzz_factor: 0.5,
            timeout: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    #[must_use]
    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    #[must_use]
    pub fn with_fuzz_factor(mut self, fuzz_factor: f64) -> Self {
        self.fuzz_factor = fuzz_factor;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Timeout the transport should apply, `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }
}

/// A logical request: candidate mirror URIs plus everything needed to send it.
///
/// The engine takes the request by value, so filters mutate the engine's copy
/// and never the caller's.
#[derive(Clone, Debug)]
pub struct Request {
    /// Candidate URIs, tried round-robin on recoverable failures.
    pub uris: Vec<String>,
    pub method: Method,
    pub headers: Headers,
    pub body: Option<Bytes>,
    /// Honoured by transports that distinguish credentialed cross-site
    /// requests; the native HTTP client has no such notion.
    pub allow_cross_site_credentials: bool,
    pub retry_parameters: RetryPolicy,
    pub license_request_type: Option<String>,
}

impl Request {
    /// A GET request with no body and empty headers.
    pub fn new<I, S>(uris: I, retry_parameters: RetryPolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            uris: uris.into_iter().map(Into::into).collect(),
            method: Method::GET,
            headers: Headers::new(),
            body: None,
            allow_cross_site_credentials: false,
            retry_parameters,
            license_request_type: None,
        }
    }

    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.insert(key, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Response {
    /// Final URI, after redirects.
    pub uri: String,
    /// URI the transport was asked to fetch.
    pub original_uri: String,
    pub data: Bytes,
    pub headers: Headers,
    pub from_cache: bool,
    /// Wall time spent on the request, including filters once the engine
    /// hands the response back. Transports may leave it unset.
    pub time: Option<Duration>,
}
