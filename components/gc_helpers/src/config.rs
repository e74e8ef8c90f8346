//! Runtime configuration for the helper layer.
//!
//! Mirrors the plain-struct-with-`Default` configuration style used by the
//! collector: every knob has a sensible default and a `with_*` setter, and
//! [`GcConfig::from_env`] layers environment overrides on top.

use tracing::warn;

/// Default size of the region handed to an exhausted allocation context.
pub const DEFAULT_ALLOCATION_QUANTUM: usize = 8 * 1024;

/// Objects at least this large bypass allocation contexts entirely.
pub const DEFAULT_LARGE_OBJECT_THRESHOLD: usize = 85_000;

/// Default capacity of the reference region heap.
pub const DEFAULT_HEAP_CAPACITY: usize = 16 * 1024 * 1024;

/// Who guarantees that freshly carved object memory reads as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ZeroInit {
    /// The collector only hands out pre-zeroed regions; the fast path writes
    /// nothing.
    #[default]
    Collector,
    /// The allocation helper zero-fills every object it returns.
    Helper,
}

/// Configuration for allocation helpers and the reference heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcConfig {
    /// Zero-initialization policy for new objects
    pub zero_init: ZeroInit,
    /// Route every allocation through the slow path unless the thread
    /// suppresses GC stress
    pub gc_stress: bool,
    /// A concurrent collector mode is active; new objects must be published
    /// before they are returned
    pub concurrent: bool,
    /// Allow finalizable objects on the fast path (registration then happens
    /// inline)
    pub finalizable_fast_path: bool,
    /// Size of the region used to refill an allocation context
    pub allocation_quantum: usize,
    /// Size at and above which objects are allocated outside contexts
    pub large_object_threshold: usize,
    /// Total bytes reserved by the reference heap
    pub heap_capacity: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig {
            zero_init: ZeroInit::Collector,
            gc_stress: false,
            concurrent: false,
            finalizable_fast_path: false,
            allocation_quantum: DEFAULT_ALLOCATION_QUANTUM,
            large_object_threshold: DEFAULT_LARGE_OBJECT_THRESHOLD,
            heap_capacity: DEFAULT_HEAP_CAPACITY,
        }
    }
}

impl GcConfig {
    /// Sets the zero-initialization policy.
    pub fn with_zero_init(mut self, zero_init: ZeroInit) -> Self {
        self.zero_init = zero_init;
        self
    }

    /// Enables or disables GC stress.
    pub fn with_gc_stress(mut self, enabled: bool) -> Self {
        self.gc_stress = enabled;
        self
    }

    /// Enables or disables concurrent-mode publication.
    pub fn with_concurrent(mut self, enabled: bool) -> Self {
        self.concurrent = enabled;
        self
    }

    /// Allows or forbids finalizable objects on the fast path.
    pub fn with_finalizable_fast_path(mut self, enabled: bool) -> Self {
        self.finalizable_fast_path = enabled;
        self
    }

    /// Sets the allocation quantum. Values are rounded up to 16 bytes.
    pub fn with_allocation_quantum(mut self, bytes: usize) -> Self {
        self.allocation_quantum = round_quantum(bytes);
        self
    }

    /// Sets the large object threshold.
    pub fn with_large_object_threshold(mut self, bytes: usize) -> Self {
        self.large_object_threshold = bytes;
        self
    }

    /// Sets the reference heap capacity.
    pub fn with_heap_capacity(mut self, bytes: usize) -> Self {
        self.heap_capacity = bytes;
        self
    }

    /// Builds a configuration from the process environment.
    ///
    /// Recognised variables: `GCHELPERS_GCSTRESS`, `GCHELPERS_CONCURRENT`,
    /// `GCHELPERS_ZERO_INIT` (`collector` or `helper`) and
    /// `GCHELPERS_ALLOC_QUANTUM`. Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = GcConfig::default();

        if let Some(raw) = lookup("GCHELPERS_GCSTRESS") {
            match parse_bool(&raw) {
                Some(v) => config.gc_stress = v,
                None => warn!(value = %raw, "ignoring invalid GCHELPERS_GCSTRESS"),
            }
        }
        if let Some(raw) = lookup("GCHELPERS_CONCURRENT") {
            match parse_bool(&raw) {
                Some(v) => config.concurrent = v,
                None => warn!(value = %raw, "ignoring invalid GCHELPERS_CONCURRENT"),
            }
        }
        if let Some(raw) = lookup("GCHELPERS_ZERO_INIT") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "collector" => config.zero_init = ZeroInit::Collector,
                "helper" => config.zero_init = ZeroInit::Helper,
                _ => warn!(value = %raw, "ignoring invalid GCHELPERS_ZERO_INIT"),
            }
        }
        if let Some(raw) = lookup("GCHELPERS_ALLOC_QUANTUM") {
            match raw.trim().parse::<usize>() {
                Ok(bytes) if bytes > 0 => config.allocation_quantum = round_quantum(bytes),
                _ => warn!(value = %raw, "ignoring invalid GCHELPERS_ALLOC_QUANTUM"),
            }
        }

        config
    }
}

fn round_quantum(bytes: usize) -> usize {
    bytes.max(16).saturating_add(15) & !15
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
