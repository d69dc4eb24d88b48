//! Process-level signal dispositions.
//!
//! The installed trampoline does one of two things: run the immediate handler
//! stored for the signal (terminal diagnostics, which end the process), or
//! record the delivery in a flag that the owning thread collects at its next
//! safe point.

use super::SignalHandler;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;

/// Signal numbers are valid in `1..SLOTS`.
pub const SLOTS: usize = 65;

type Slot = Arc<dyn SignalHandler>;

static DELIVERED: [AtomicBool; SLOTS] = [const { AtomicBool::new(false) }; SLOTS];
static IMMEDIATE: [AtomicPtr<Slot>; SLOTS] = [const { AtomicPtr::new(ptr::null_mut()) }; SLOTS];

pub fn in_range(signal: i32) -> bool {
    signal > 0 && (signal as usize) < SLOTS
}

extern "C" fn on_signal(signal: libc::c_int) {
    if !in_range(signal) {
        return;
    }
    let slot = IMMEDIATE[signal as usize].load(Ordering::Acquire);
    if slot.is_null() {
        DELIVERED[signal as usize].store(true, Ordering::Release);
        return;
    }
    // SAFETY: a non-null slot points at a boxed handler that is never freed,
    // even after being replaced, so a pointer loaded here stays valid.
    let handler = unsafe { &*slot };
    handler.handle(&super::Delivery {
        signal,
        sim_time: None,
    });
}

/// Route `signal` to the trampoline.
pub fn install(signal: i32) -> io::Result<()> {
    // SAFETY: the action struct is fully initialised before use and the
    // trampoline only touches atomics unless an immediate handler is set.
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        action.sa_flags = libc::SA_RESTART | libc::SA_ONSTACK;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(signal, &action, ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Put `signal` back to its default disposition and forget any pending
/// delivery.
pub fn restore_default(signal: i32) -> io::Result<()> {
    set_immediate(signal, None);
    // SAFETY: SIG_DFL is always a valid disposition.
    let previous = unsafe { libc::signal(signal, libc::SIG_DFL) };
    if previous == libc::SIG_ERR {
        return Err(io::Error::last_os_error());
    }
    if in_range(signal) {
        DELIVERED[signal as usize].store(false, Ordering::Release);
    }
    Ok(())
}

/// Store (or clear) the handler the trampoline runs in signal context.
///
/// A replaced handler is leaked, not freed: the trampoline may be running on
/// another thread with the old pointer already loaded.
pub fn set_immediate(signal: i32, handler: Option<Slot>) {
    if !in_range(signal) {
        return;
    }
    let new = handler.map_or(ptr::null_mut(), |h| Box::into_raw(Box::new(h)));
    IMMEDIATE[signal as usize].store(new, Ordering::Release);
}

/// Consume the delivery flag of `signal`.
pub fn take_delivered(signal: i32) -> bool {
    in_range(signal) && DELIVERED[signal as usize].swap(false, Ordering::AcqRel)
}

/// Send `signal` to the calling thread.
pub fn raise(signal: i32) -> io::Result<()> {
    // SAFETY: raise has no memory-safety preconditions.
    if unsafe { libc::raise(signal) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub fn signal_name(signal: i32) -> &'static str {
    match signal {
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGABRT => "SIGABRT",
        libc::SIGINT => "SIGINT",
        libc::SIGUSR1 => "SIGUSR1",
        libc::SIGUSR2 => "SIGUSR2",
        libc::SIGXCPU => "SIGXCPU",
        libc::SIGTERM => "SIGTERM",
        libc::SIGTRAP => "SIGTRAP",
        libc::SIGHUP => "SIGHUP",
        _ => "signal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::Delivery;

    struct Noop;

    impl SignalHandler for Noop {
        fn handle(&self, _delivery: &Delivery) {}
    }

    #[test]
    fn test_replaced_immediate_handler_stays_alive() {
        // Slot 63 is never installed, only the table entry is touched.
        let signal = 63;
        let handler: Slot = Arc::new(Noop);
        set_immediate(signal, Some(Arc::clone(&handler)));
        set_immediate(signal, None);
        assert!(IMMEDIATE[signal as usize].load(Ordering::Acquire).is_null());
        assert_eq!(Arc::strong_count(&handler), 2);

        set_immediate(signal, Some(Arc::clone(&handler)));
        set_immediate(signal, Some(Arc::new(Noop)));
        assert_eq!(Arc::strong_count(&handler), 3);
        set_immediate(signal, None);
    }

    #[test]
    fn test_out_of_range_signals_are_ignored() {
        assert!(!in_range(0));
        assert!(!in_range(SLOTS as i32));
        set_immediate(SLOTS as i32, Some(Arc::new(Noop)));
        assert!(!take_delivered(-1));
    }
}
