use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::key_store::KeyStore;

/// Reports whether StrongBox isolation exists on the device and whether the
/// application opted in to use it.
pub trait StrongBoxSupport: Send + Sync {
    /// Hardware capability; constant for the device lifetime.
    fn is_strongbox_supported(&self) -> bool;

    /// Capability AND opt-in.
    fn is_strongbox_enabled(&self) -> bool;
}

/// Probes the key store once and caches the answer until [`reset`](Self::reset).
pub struct DefaultStrongBoxSupport {
    key_store: Arc<dyn KeyStore>,
    enabled: bool,
    supported: Mutex<Option<bool>>,
}

impl DefaultStrongBoxSupport {
    pub fn new(key_store: Arc<dyn KeyStore>, enabled: bool) -> Self {
        Self {
            key_store,
            enabled,
            supported: Mutex::new(None),
        }
    }

    /// Forget the cached probe result.
    pub fn reset(&self) {
        if let Ok(mut cached) = self.supported.lock() {
            *cached = None;
        }
    }
}

impl StrongBoxSupport for DefaultStrongBoxSupport {
    fn is_strongbox_supported(&self) -> bool {
        let Ok(mut cached) = self.supported.lock() else {
            return self.key_store.supports_strongbox();
        };
        *cached.get_or_insert_with(|| {
            let supported = self.key_store.supports_strongbox();
            debug!(supported, "probed strongbox support");
            supported
        })
    }

    fn is_strongbox_enabled(&self) -> bool {
        self.enabled && self.is_strongbox_supported()
    }
}

/// Support oracle with fixed answers, used for tests and runtime overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedStrongBoxSupport {
    supported: bool,
    enabled: bool,
}

impl FixedStrongBoxSupport {
    pub fn new(supported: bool, enabled: bool) -> Self {
        Self { supported, enabled }
    }
}

impl StrongBoxSupport for FixedStrongBoxSupport {
    fn is_strongbox_supported(&self) -> bool {
        self.supported
    }

    fn is_strongbox_enabled(&self) -> bool {
        self.supported && self.enabled
    }
}
