//! Discrete event scheduler and simulated clock.
//!
//! The lifecycle only relies on the [`EventScheduler`] surface: start, stop,
//! process exactly one event, service safe points, and read the clock.
//! Commands are the one thing other contexts may hand to the scheduler; they
//! travel through a [`CommandQueue`] and execute on the owning thread at the
//! next safe point.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Arc, Mutex};

/// Simulated time in seconds.
pub type SimTime = f64;

/// A scheduled unit of work. Runs on the thread owning the scheduler.
pub type Event = Box<dyn FnOnce(&mut Scheduler)>;

/// Work injected from outside the event stream (e.g. by a signal handler or a
/// control thread).
pub type Command = Box<dyn FnOnce(&mut Scheduler) + Send>;

/// Called at every safe point, before pending commands are drained.
pub type SafePointHook = Box<dyn FnMut(&Scheduler)>;

/// Scheduler operations the lifecycle and the stepping loop depend on.
pub trait EventScheduler {
    fn now(&self) -> SimTime;

    fn is_running(&self) -> bool;

    fn start(&mut self);

    fn stop(&mut self);

    /// Run safe-point hooks and pending commands without consuming an event.
    fn service(&mut self);

    /// Process exactly one pending event. Returns `false` when the scheduler
    /// is stopped or has nothing left to process.
    fn process_one_event(&mut self) -> bool;

    fn has_pending_events(&self) -> bool;

    /// Free-running loop: process events until stopped or drained.
    fn run(&mut self) {
        self.start();
        while self.process_one_event() {}
    }
}

/// Thread-safe handle for queueing commands into a scheduler.
#[derive(Clone, Default)]
pub struct CommandQueue {
    inner: Arc<Mutex<VecDeque<Command>>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, command: Command) {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(command);
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pop(&self) -> Option<Command> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }
}

struct Scheduled {
    time: SimTime,
    seq: u64,
    event: Event,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed so the max-heap pops the earliest (time, seq) first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Single-threaded event scheduler. Events at equal times run in the order
/// they were scheduled.
pub struct Scheduler {
    queue: BinaryHeap<Scheduled>,
    now: SimTime,
    next_seq: u64,
    running: bool,
    processed: u64,
    commands: CommandQueue,
    hooks: Vec<SafePointHook>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            now: 0.0,
            next_seq: 0,
            running: false,
            processed: 0,
            commands: CommandQueue::new(),
            hooks: Vec::new(),
        }
    }

    /// Schedule `event` at absolute time `time`. Times in the past are
    /// clamped to now.
    pub fn schedule_at(&mut self, time: SimTime, event: impl FnOnce(&mut Scheduler) + 'static) {
        let time = if time < self.now { self.now } else { time };
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Scheduled {
            time,
            seq,
            event: Box::new(event),
        });
    }

    pub fn schedule_in(&mut self, delay: SimTime, event: impl FnOnce(&mut Scheduler) + 'static) {
        self.schedule_at(self.now + delay.max(0.0), event);
    }

    /// Handle for queueing commands from other contexts.
    pub fn command_queue(&self) -> CommandQueue {
        self.commands.clone()
    }

    pub fn queue_command(&self, command: Command) {
        self.commands.push(command);
    }

    pub fn add_safe_point_hook(&mut self, hook: SafePointHook) {
        self.hooks.push(hook);
    }

    pub fn clear_safe_point_hooks(&mut self) {
        self.hooks.clear();
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    pub fn processed_events(&self) -> u64 {
        self.processed
    }

    fn run_hooks(&mut self) {
        let mut hooks = std::mem::take(&mut self.hooks);
        for hook in hooks.iter_mut() {
            hook(self);
        }
        // Hooks registered by a hook land after the existing ones.
        hooks.append(&mut self.hooks);
        self.hooks = hooks;
    }

    fn drain_commands(&mut self) {
        while let Some(command) = self.commands.pop() {
            command(self);
        }
    }
}

impl EventScheduler for Scheduler {
    fn now(&self) -> SimTime {
        self.now
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn start(&mut self) {
        self.running = true;
    }

    fn stop(&mut self) {
        if self.running {
            log::debug!("Scheduler stopped at t={}", self.now);
        }
        self.running = false;
    }

    fn service(&mut self) {
        self.run_hooks();
        self.drain_commands();
    }

    fn has_pending_events(&self) -> bool {
        !self.queue.is_empty()
    }

    fn process_one_event(&mut self) -> bool {
        self.service();
        if !self.running {
            return false;
        }
        let Some(next) = self.queue.pop() else {
            return false;
        };
        self.now = next.time;
        (next.event)(self);
        self.processed += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_events_run_in_time_then_insertion_order() {
        let trace = Rc::new(RefCell::new(Vec::new()));
        let mut sched = Scheduler::new();
        for (time, label) in [(2.0, "c"), (1.0, "a"), (1.0, "b"), (0.5, "first")] {
            let trace = trace.clone();
            sched.schedule_at(time, move |_| trace.borrow_mut().push(label));
        }

        sched.run();

        assert_eq!(*trace.borrow(), vec!["first", "a", "b", "c"]);
        assert_eq!(sched.now(), 2.0);
        assert_eq!(sched.processed_events(), 4);
    }

    #[test]
    fn test_events_can_schedule_followups() {
        let count = Rc::new(RefCell::new(0));
        let mut sched = Scheduler::new();
        fn tick(sched: &mut Scheduler, count: Rc<RefCell<u32>>) {
            *count.borrow_mut() += 1;
            if *count.borrow() < 5 {
                sched.schedule_in(1.0, move |s| tick(s, count));
            }
        }
        let c = count.clone();
        sched.schedule_at(0.0, move |s| tick(s, c));
        sched.run();
        assert_eq!(*count.borrow(), 5);
        assert_eq!(sched.now(), 4.0);
    }

    #[test]
    fn test_command_stops_before_next_event() {
        let mut sched = Scheduler::new();
        let ran = Rc::new(RefCell::new(0));
        for t in 0..3 {
            let ran = ran.clone();
            sched.schedule_at(t as f64, move |_| *ran.borrow_mut() += 1);
        }
        sched.start();
        assert!(sched.process_one_event());
        sched.queue_command(Box::new(|s: &mut Scheduler| s.stop()));
        assert!(!sched.process_one_event());
        assert_eq!(*ran.borrow(), 1);
        assert_eq!(sched.pending_events(), 2);
    }

    #[test]
    fn test_not_started_processes_nothing() {
        let mut sched = Scheduler::new();
        sched.schedule_at(1.0, |_| panic!("must not run"));
        assert!(!sched.process_one_event());
    }

    #[test]
    fn test_safe_point_hooks_see_clock() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut sched = Scheduler::new();
        let s = seen.clone();
        sched.add_safe_point_hook(Box::new(move |sched: &Scheduler| s.borrow_mut().push(sched.now())));
        sched.schedule_at(3.0, |_| {});
        sched.run();
        // One safe point before the event, one before discovering the queue is empty.
        assert_eq!(*seen.borrow(), vec![0.0, 3.0]);
    }

    #[test]
    fn test_past_times_are_clamped() {
        let mut sched = Scheduler::new();
        sched.schedule_at(5.0, |s| s.schedule_at(1.0, |_| {}));
        sched.run();
        assert_eq!(sched.now(), 5.0);
        assert_eq!(sched.processed_events(), 2);
    }
}
