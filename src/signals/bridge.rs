use super::os;
use super::{Delivery, HandlerMode, SignalHandler};
use crate::scheduler::SimTime;
use log::{debug, error, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("Signal number {0} is out of range")]
    OutOfRange(i32),
    #[error("Failed to install handler for {name} ({signal}): {source}")]
    Install {
        signal: i32,
        name: &'static str,
        source: std::io::Error,
    },
}

#[derive(Default)]
struct Inner {
    handlers: Mutex<BTreeMap<i32, Vec<Arc<dyn SignalHandler>>>>,
    pending: Mutex<BTreeSet<i32>>,
    installed: Mutex<BTreeSet<i32>>,
    active: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inner {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn collect_os_deliveries(&self) {
        if !self.is_active() {
            return;
        }
        let installed = lock(&self.installed).clone();
        let mut pending = lock(&self.pending);
        for signal in installed {
            if os::take_delivered(signal) {
                pending.insert(signal);
            }
        }
    }

    fn dispatch(&self, signal: i32, sim_time: Option<SimTime>) -> bool {
        let handler = {
            let handlers = lock(&self.handlers);
            match handlers.get(&signal).map(Vec::as_slice) {
                Some([only]) => Arc::clone(only),
                bound => {
                    error!(
                        "{} ({}) delivered with {} handlers bound, not dispatching",
                        os::signal_name(signal),
                        signal,
                        bound.map_or(0, <[_]>::len)
                    );
                    return false;
                }
            }
        };
        debug!("Dispatching {} ({})", os::signal_name(signal), signal);
        handler.handle(&Delivery { signal, sim_time });
        true
    }

    fn dispatch_pending(&self, sim_time: Option<SimTime>) -> usize {
        self.collect_os_deliveries();
        let pending = std::mem::take(&mut *lock(&self.pending));
        pending
            .into_iter()
            .filter(|signal| self.dispatch(*signal, sim_time))
            .count()
    }
}

/// Maps signal numbers to exactly one handler each.
///
/// Handlers can be registered before or after [`install`](Self::install).
/// Dropping the bridge restores the default disposition of every signal it
/// installed.
pub struct SignalBridge {
    inner: Arc<Inner>,
}

impl Default for SignalBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalBridge {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::default()),
        }
    }

    /// Bind `handler` to `signal`, replacing any earlier binding.
    pub fn register(&self, signal: i32, handler: Arc<dyn SignalHandler>) -> Result<(), SignalError> {
        if !os::in_range(signal) {
            return Err(SignalError::OutOfRange(signal));
        }
        let previous = lock(&self.inner.handlers).insert(signal, vec![Arc::clone(&handler)]);
        if previous.is_some() {
            warn!(
                "Replacing handler for {} ({})",
                os::signal_name(signal),
                signal
            );
        }
        if self.inner.is_active() {
            self.install_one(signal, handler)?;
        }
        Ok(())
    }

    /// Drop the binding for `signal` and restore its default disposition.
    pub fn unregister(&self, signal: i32) {
        lock(&self.inner.handlers).remove(&signal);
        lock(&self.inner.pending).remove(&signal);
        if lock(&self.inner.installed).remove(&signal) {
            restore(signal);
        }
    }

    pub fn is_registered(&self, signal: i32) -> bool {
        lock(&self.inner.handlers).contains_key(&signal)
    }

    pub fn registered_signals(&self) -> Vec<i32> {
        lock(&self.inner.handlers).keys().copied().collect()
    }

    /// Route every registered signal to this bridge.
    pub fn install(&self) -> Result<(), SignalError> {
        self.inner.active.store(true, Ordering::Release);
        let handlers: Vec<(i32, Arc<dyn SignalHandler>)> = lock(&self.inner.handlers)
            .iter()
            .filter_map(|(signal, bound)| bound.first().map(|h| (*signal, Arc::clone(h))))
            .collect();
        for (signal, handler) in handlers {
            self.install_one(signal, handler)?;
        }
        Ok(())
    }

    fn install_one(&self, signal: i32, handler: Arc<dyn SignalHandler>) -> Result<(), SignalError> {
        let immediate = handler.mode() == HandlerMode::Immediate;
        os::set_immediate(signal, immediate.then_some(handler));
        os::install(signal).map_err(|source| SignalError::Install {
            signal,
            name: os::signal_name(signal),
            source,
        })?;
        lock(&self.inner.installed).insert(signal);
        debug!(
            "Installed {} handler for {} ({})",
            if immediate { "immediate" } else { "deferred" },
            os::signal_name(signal),
            signal
        );
        Ok(())
    }

    /// Restore the default disposition of every installed signal. Bindings
    /// are kept.
    pub fn uninstall(&self) {
        self.inner.active.store(false, Ordering::Release);
        let installed = std::mem::take(&mut *lock(&self.inner.installed));
        for signal in installed {
            restore(signal);
        }
    }

    pub fn is_installed(&self) -> bool {
        self.inner.is_active()
    }

    /// Mark `signal` as delivered without involving the OS.
    pub fn notify(&self, signal: i32) {
        lock(&self.inner.pending).insert(signal);
    }

    /// Run the handlers of every signal delivered since the last call.
    /// Returns how many were dispatched.
    pub fn dispatch_pending(&self, sim_time: Option<SimTime>) -> usize {
        self.inner.dispatch_pending(sim_time)
    }

    /// Handle for dispatching from a scheduler safe point.
    pub fn dispatcher(&self) -> SignalDispatcher {
        SignalDispatcher {
            inner: Arc::clone(&self.inner),
        }
    }

    #[cfg(test)]
    pub(crate) fn bind_extra(&self, signal: i32, handler: Arc<dyn SignalHandler>) {
        lock(&self.inner.handlers).entry(signal).or_default().push(handler);
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        if self.is_installed() {
            self.uninstall();
        }
    }
}

fn restore(signal: i32) {
    match os::restore_default(signal) {
        Ok(()) => debug!("Restored default disposition for {} ({})", os::signal_name(signal), signal),
        Err(e) => warn!("Failed to restore {} ({}): {}", os::signal_name(signal), signal, e),
    }
}

/// Cloneable dispatch handle onto a [`SignalBridge`].
#[derive(Clone)]
pub struct SignalDispatcher {
    inner: Arc<Inner>,
}

impl SignalDispatcher {
    pub fn dispatch_pending(&self, sim_time: Option<SimTime>) -> usize {
        self.inner.dispatch_pending(sim_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        last_time: Mutex<Option<SimTime>>,
    }

    impl SignalHandler for Counting {
        fn handle(&self, delivery: &Delivery) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *lock(&self.last_time) = delivery.sim_time;
        }
    }

    impl Counting {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_dispatch_reaches_the_single_handler() {
        let bridge = SignalBridge::new();
        let handler = Arc::new(Counting::default());
        bridge.register(libc::SIGUSR1, handler.clone()).unwrap();

        bridge.notify(libc::SIGUSR1);
        assert_eq!(bridge.dispatch_pending(Some(4.5)), 1);
        assert_eq!(handler.calls(), 1);
        assert_eq!(*lock(&handler.last_time), Some(4.5));

        // Nothing new delivered.
        assert_eq!(bridge.dispatch_pending(Some(5.0)), 0);
        assert_eq!(handler.calls(), 1);
    }

    #[test]
    fn test_repeated_deliveries_collapse_until_dispatch() {
        let bridge = SignalBridge::new();
        let handler = Arc::new(Counting::default());
        bridge.register(libc::SIGUSR2, handler.clone()).unwrap();
        bridge.notify(libc::SIGUSR2);
        bridge.notify(libc::SIGUSR2);
        bridge.dispatcher().dispatch_pending(None);
        assert_eq!(handler.calls(), 1);
    }

    #[test]
    fn test_last_registration_wins() {
        let bridge = SignalBridge::new();
        let first = Arc::new(Counting::default());
        let second = Arc::new(Counting::default());
        bridge.register(libc::SIGUSR1, first.clone()).unwrap();
        bridge.register(libc::SIGUSR1, second.clone()).unwrap();

        bridge.notify(libc::SIGUSR1);
        bridge.dispatch_pending(None);
        assert_eq!(first.calls(), 0);
        assert_eq!(second.calls(), 1);
    }

    #[test]
    fn test_unbound_signal_is_not_dispatched() {
        let bridge = SignalBridge::new();
        bridge.notify(libc::SIGUSR1);
        assert_eq!(bridge.dispatch_pending(None), 0);
    }

    #[test]
    fn test_multiple_bindings_are_not_dispatched() {
        let bridge = SignalBridge::new();
        let first = Arc::new(Counting::default());
        let second = Arc::new(Counting::default());
        bridge.register(libc::SIGXCPU, first.clone()).unwrap();
        bridge.bind_extra(libc::SIGXCPU, second.clone());

        bridge.notify(libc::SIGXCPU);
        assert_eq!(bridge.dispatch_pending(None), 0);
        assert_eq!(first.calls() + second.calls(), 0);
    }

    #[test]
    fn test_unregister_forgets_pending() {
        let bridge = SignalBridge::new();
        let handler = Arc::new(Counting::default());
        bridge.register(libc::SIGUSR1, handler.clone()).unwrap();
        bridge.notify(libc::SIGUSR1);
        bridge.unregister(libc::SIGUSR1);
        assert!(!bridge.is_registered(libc::SIGUSR1));
        assert_eq!(bridge.dispatch_pending(None), 0);
        assert_eq!(handler.calls(), 0);
    }

    #[test]
    fn test_out_of_range_signal_rejected() {
        let bridge = SignalBridge::new();
        let handler = Arc::new(Counting::default());
        assert!(matches!(
            bridge.register(0, handler.clone()),
            Err(SignalError::OutOfRange(0))
        ));
        assert!(matches!(
            bridge.register(4096, handler),
            Err(SignalError::OutOfRange(4096))
        ));
    }
}
