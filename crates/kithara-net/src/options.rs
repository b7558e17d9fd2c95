use std::{fmt, sync::Arc, time::Duration};

use crate::scheme::SchemeRegistry;

/// Engine-level progress callback: `(elapsed, bytes since last report)`.
/// Only segment requests report progress.
pub type ProgressCallback = Arc<dyn Fn(Duration, u64) + Send + Sync>;

#[derive(Clone)]
pub struct EngineOptions {
    /// Scheme used to make schemeless URIs explicit.
    pub default_scheme: String,
    pub events_channel_capacity: usize,
    pub on_progress: Option<ProgressCallback>,
    /// Registry to resolve transports from; `None` uses the process-wide one.
    pub registry: Option<SchemeRegistry>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            default_scheme: "https".to_string(),
            events_channel_capacity: 32,
            on_progress: None,
            registry: None,
        }
    }
}

impl EngineOptions {
    #[must_use]
    pub fn with_default_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.default_scheme = scheme.into();
        self
    }

    #[must_use]
    pub fn with_events_channel_capacity(mut self, capacity: usize) -> Self {
        self.events_channel_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_progress<F>(mut self, on_progress: F) -> Self
    where
        F: Fn(Duration, u64) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }

    #[must_use]
    pub fn with_registry(mut self, registry: SchemeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }
}

impl fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOptions")
            .field("default_scheme", &self.default_scheme)
            .field("events_channel_capacity", &self.events_channel_capacity)
            .field("on_progress", &self.on_progress.is_some())
            .field("registry", &self.registry)
            .finish()
    }
}

/// Settings for the built-in HTTP transport.
#[derive(Clone, Debug)]
pub struct HttpOptions {
    pub pool_max_idle_per_host: usize,
    pub connect_timeout: Option<Duration>,
    /// Minimum spacing between progress reports while a body streams in.
    pub progress_interval: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            pool_max_idle_per_host: 0,
            connect_timeout: None,
            progress_interval: Duration::from_millis(100),
        }
    }
}

impl HttpOptions {
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;

    #[rstest]
    fn test_engine_options_default() {
        let options = EngineOptions::default();

        assert_eq!(options.default_scheme, "https");
        assert_eq!(options.events_channel_capacity, 32);
        assert!(options.on_progress.is_none());
        assert!(options.registry.is_none());
    }

    #[rstest]
    fn test_http_options_default() {
        let options = HttpOptions::default();

        assert_eq!(options.pool_max_idle_per_host, 0);
        assert_eq!(options.connect_timeout, None);
        assert_eq!(options.progress_interval, Duration::from_millis(100));
    }

    #[rstest]
    fn test_engine_options_debug_hides_callback() {
        let options = EngineOptions::default().with_progress(|_, _| {});
        let debug = format!("{options:?}");
        assert!(debug.contains("on_progress: true"));
    }
}
