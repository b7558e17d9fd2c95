use std::{
    collections::HashMap,
    fmt,
    num::NonZeroU32,
    sync::{Arc, LazyLock},
};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::{
    client::HttpClient, data_uri::DataUriTransport, options::HttpOptions, traits::Transport,
};

/// Registration priority of a transport. Higher wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(NonZeroU32);

impl Priority {
    /// Built-in transports that anything else may replace.
    pub const FALLBACK: Self = Self::from_const(1);
    /// Built-in transports preferred over the fallback ones.
    pub const PREFERRED: Self = Self::from_const(2);
    /// Transports installed by the embedding application.
    pub const APPLICATION: Self = Self::from_const(3);

    const fn from_const(value: u32) -> Self {
        match NonZeroU32::new(value) {
            Some(value) => Self(value),
            None => panic!("priority must be positive"),
        }
    }

    /// `None` for zero.
    pub fn new(value: u32) -> Option<Self> {
        NonZeroU32::new(value).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::APPLICATION
    }
}

#[derive(Clone)]
struct Registration {
    transport: Arc<dyn Transport>,
    priority: Priority,
}

/// Scheme → transport mapping.
///
/// Cheap to clone; clones share the same table. Scheme names are matched
/// case-insensitively.
#[derive(Clone, Default)]
pub struct SchemeRegistry {
    inner: Arc<RwLock<HashMap<String, Registration>>>,
}

static GLOBAL: LazyLock<SchemeRegistry> = LazyLock::new(SchemeRegistry::with_defaults);

impl SchemeRegistry {
    /// Empty registry, isolated from every other one.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in transports: `data` at application priority,
    /// `http`/`https` as fallbacks.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(DataUriTransport::SCHEME, Arc::new(DataUriTransport));

        match HttpClient::new(HttpOptions::default()) {
            Ok(client) => {
                let client: Arc<dyn Transport> = Arc::new(client);
                registry.register_with_priority("http", client.clone(), Priority::FALLBACK);
                registry.register_with_priority("https", client, Priority::FALLBACK);
            }
            Err(error) => warn!(%error, "HTTP transport unavailable"),
        }

        registry
    }

    /// The process-wide registry shared by every engine that was not given
    /// its own.
    pub fn global() -> Self {
        GLOBAL.clone()
    }

    /// Registers `transport` at [`Priority::APPLICATION`].
    pub fn register(&self, scheme: &str, transport: Arc<dyn Transport>) -> bool {
        self.register_with_priority(scheme, transport, Priority::APPLICATION)
    }

    /// Installs `transport` unless a higher-priority one already serves
    /// `scheme`. Returns whether it was installed.
    pub fn register_with_priority(
        &self,
        scheme: &str,
        transport: Arc<dyn Transport>,
        priority: Priority,
    ) -> bool {
        let scheme = scheme.to_ascii_lowercase();
        let mut table = self.inner.write();

        if let Some(existing) = table
            .get(&scheme)
            .filter(|existing| existing.priority > priority)
        {
            debug!(
                scheme,
                priority = priority.get(),
                existing = existing.priority.get(),
                "keeping higher-priority transport"
            );
            return false;
        }

        debug!(scheme, priority = priority.get(), "transport registered");
        table.insert(
            scheme,
            Registration {
                transport,
                priority,
            },
        );
        true
    }

    /// Removes the mapping for `scheme`, whatever its priority.
    pub fn unregister(&self, scheme: &str) -> bool {
        let scheme = scheme.to_ascii_lowercase();
        let removed = self.inner.write().remove(&scheme).is_some();
        if removed {
            debug!(scheme, "transport unregistered");
        }
        removed
    }

    pub fn resolve(&self, scheme: &str) -> Option<Arc<dyn Transport>> {
        self.inner
            .read()
            .get(&scheme.to_ascii_lowercase())
            .map(|registration| registration.transport.clone())
    }

    pub fn priority(&self, scheme: &str) -> Option<Priority> {
        self.inner
            .read()
            .get(&scheme.to_ascii_lowercase())
            .map(|registration| registration.priority)
    }
}

impl fmt::Debug for SchemeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.inner.read();
        let mut schemes: Vec<_> = table
            .iter()
            .map(|(scheme, registration)| (scheme.as_str(), registration.priority.get()))
            .collect();
        schemes.sort_unstable();
        f.debug_struct("SchemeRegistry")
            .field("schemes", &schemes)
            .finish()
    }
}

/// Registers `transport` for `scheme` in the process-wide registry.
/// `priority` defaults to [`Priority::APPLICATION`].
pub fn register_scheme(
    scheme: &str,
    transport: Arc<dyn Transport>,
    priority: Option<Priority>,
) -> bool {
    SchemeRegistry::global().register_with_priority(scheme, transport, priority.unwrap_or_default())
}

/// Removes `scheme` from the process-wide registry.
pub fn unregister_scheme(scheme: &str) -> bool {
    SchemeRegistry::global().unregister(scheme)
}

/// Scheme of `uri` (`ALPHA *( ALPHA / DIGIT / "+" / "-" / "." )` before the
/// first `:`), if it has one.
pub fn uri_scheme(uri: &str) -> Option<&str> {
    let (scheme, _) = uri.split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    let valid = first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(scheme)
}
