//! Process-wide port registry.
//!
//! Every logical sub-device that talks through a physical port obtains the
//! port's [`PortState`] here. Entries are created lazily on first use and live
//! for the rest of the process, so two wheels and a shutter configured on
//! "COM3" always serialize through one lock.

use crate::port::PortId;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Answer timeout used for ports nobody has configured (per wait phase).
pub const DEFAULT_ANSWER_TIMEOUT: Duration = Duration::from_millis(500);

/// Shared handle to the state of one port.
pub type PortStateHandle = Arc<PortState>;

static GLOBAL: Lazy<Arc<PortRegistry>> = Lazy::new(|| Arc::new(PortRegistry::new()));

/// Lock, busy flag and default timeout of one physical port.
#[derive(Debug)]
pub struct PortState {
    id: PortId,
    lock: Mutex<()>,
    busy: AtomicBool,
    default_timeout_us: AtomicU64,
}

impl PortState {
    fn new(id: PortId, default_timeout: Duration) -> Self {
        Self {
            id,
            lock: Mutex::new(()),
            busy: AtomicBool::new(false),
            default_timeout_us: AtomicU64::new(duration_to_us(default_timeout)),
        }
    }

    /// The port this state belongs to.
    pub fn id(&self) -> &PortId {
        &self.id
    }

    /// Block until the port is free, then hold it until the guard is dropped.
    ///
    /// The busy flag is raised while the guard lives and cleared before the
    /// lock is released, on every exit path.
    pub fn acquire(&self) -> PortGuard<'_> {
        let guard = self.lock.lock();
        self.busy.store(true, Ordering::Release);
        PortGuard {
            state: self,
            _guard: guard,
        }
    }

    /// Whether a command is currently in flight. Diagnostic only.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Per-phase timeout used when a caller does not supply one.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_micros(self.default_timeout_us.load(Ordering::Relaxed))
    }

    /// Change the per-phase default timeout.
    pub fn set_default_timeout(&self, timeout: Duration) {
        self.default_timeout_us
            .store(duration_to_us(timeout), Ordering::Relaxed);
    }

    /// Address of the lock, for checking that two handles share one port.
    pub fn lock_addr(&self) -> *const () {
        &self.lock as *const Mutex<()> as *const ()
    }
}

/// Exclusive access to one port; releases the busy flag and the lock on drop.
#[derive(Debug)]
pub struct PortGuard<'a> {
    state: &'a PortState,
    _guard: MutexGuard<'a, ()>,
}

impl PortGuard<'_> {
    /// The port held by this guard.
    pub fn port(&self) -> &PortId {
        &self.state.id
    }
}

impl Drop for PortGuard<'_> {
    fn drop(&mut self) {
        // Runs before `_guard` is dropped, so the flag is clear once the lock is free.
        self.state.busy.store(false, Ordering::Release);
    }
}

/// Table mapping port identifiers to their shared state.
#[derive(Debug)]
pub struct PortRegistry {
    ports: RwLock<HashMap<PortId, PortStateHandle>>,
    default_timeout: Duration,
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PortRegistry {
    /// Create an empty registry using [`DEFAULT_ANSWER_TIMEOUT`] for new ports.
    pub fn new() -> Self {
        Self::with_default_timeout(DEFAULT_ANSWER_TIMEOUT)
    }

    /// Create an empty registry whose new ports start with `timeout`.
    pub fn with_default_timeout(timeout: Duration) -> Self {
        Self {
            ports: RwLock::new(HashMap::new()),
            default_timeout: timeout,
        }
    }

    /// The process-wide registry.
    pub fn global() -> Arc<PortRegistry> {
        Arc::clone(&GLOBAL)
    }

    /// Return the state for `port`, creating it on first use.
    ///
    /// Idempotent and thread-safe: concurrent callers for the same id all
    /// receive the same `PortState`.
    pub fn get_or_create(&self, port: &PortId) -> PortStateHandle {
        if let Some(state) = self.ports.read().get(port) {
            return Arc::clone(state);
        }

        let mut ports = self.ports.write();
        let state = ports.entry(port.clone()).or_insert_with(|| {
            tracing::debug!(port = %port, "registering port");
            Arc::new(PortState::new(port.clone(), self.default_timeout))
        });
        Arc::clone(state)
    }

    /// The state for `port`, if it has been registered.
    pub fn get(&self, port: &PortId) -> Option<PortStateHandle> {
        self.ports.read().get(port).cloned()
    }

    /// Change the default timeout of `port`, registering it if needed.
    pub fn set_default_timeout(&self, port: &PortId, timeout: Duration) {
        self.get_or_create(port).set_default_timeout(timeout);
    }

    /// Identifiers of every registered port, sorted.
    pub fn port_ids(&self) -> Vec<PortId> {
        let mut ids: Vec<PortId> = self.ports.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered ports.
    pub fn len(&self) -> usize {
        self.ports.read().len()
    }

    /// Whether no port has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.ports.read().is_empty()
    }
}

fn duration_to_us(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}
