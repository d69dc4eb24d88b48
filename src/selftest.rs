//! Test-execution mode: run module and host self-tests instead of a
//! simulation.

use crate::config::ConfigView;
use crate::lifecycle::sim_control::{AbortLatch, SimControl};
use crate::module::{DependencyConstraint, SelfTest, Version};
use crate::scheduler::{EventScheduler, Scheduler};
use log::{error, info};
use std::cell::RefCell;
use std::rc::Rc;

/// Outcome of one test-execution run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TestReport {
    pub passed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl TestReport {
    pub fn all_passed(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.passed.len() + self.failed.len()
    }
}

/// Checks on the host's own building blocks.
pub fn host_self_tests() -> Vec<SelfTest> {
    vec![
        SelfTest::new("host.scheduler_order", || {
            let order = Rc::new(RefCell::new(Vec::new()));
            let mut scheduler = Scheduler::new();
            for (time, tag) in [(2.0, 'c'), (1.0, 'a'), (1.0, 'b')] {
                let order = Rc::clone(&order);
                scheduler.schedule_at(time, move |_| order.borrow_mut().push(tag));
            }
            scheduler.run();
            let order = order.borrow();
            if *order == ['a', 'b', 'c'] {
                Ok(())
            } else {
                Err(format!("events ran as {:?}", order))
            }
        }),
        SelfTest::new("host.version_constraints", || {
            let constraint: DependencyConstraint = "x >=1.2.0".parse().map_err(|e| format!("{}", e))?;
            if constraint.is_satisfied_by(Version::new(1, 2, 0)) && !constraint.is_satisfied_by(Version::new(1, 1, 9)) {
                Ok(())
            } else {
                Err("constraint matching is off".to_string())
            }
        }),
        SelfTest::new("host.config_lookup", || {
            let root: serde_yaml::Value = serde_yaml::from_str("a: {b: [10, 20]}").map_err(|e| e.to_string())?;
            let view = ConfigView::new(root);
            match (view.get::<u32>("a.b.1"), view.len("a.b")) {
                (Ok(20), Ok(2)) => Ok(()),
                other => Err(format!("unexpected lookup result {:?}", other)),
            }
        }),
        SelfTest::new("host.abort_latch", || {
            let latch = AbortLatch::new();
            if latch.trip() && !latch.trip() {
                Ok(())
            } else {
                Err("latch tripped twice".to_string())
            }
        }),
        SelfTest::new("host.premature_abort", || {
            let mut scheduler = Scheduler::new();
            let control = SimControl::new(&scheduler, 10.0);
            control.schedule(&mut scheduler, None);
            let abort = control.abort_handle();
            scheduler.schedule_at(1.0, move |_| {
                abort.request();
                abort.request();
            });
            scheduler.run();
            if control.was_aborted() && control.shutdown_count() == 1 && scheduler.now() == 1.0 {
                Ok(())
            } else {
                Err(format!("abort ended at t={} with {} shutdowns", scheduler.now(), control.shutdown_count()))
            }
        }),
    ]
}

/// Run `tests`, restricted to `selected` names when any are given. A selected
/// name matching no test counts as a failure.
pub fn run_self_tests(tests: Vec<SelfTest>, selected: &[String], verbose: bool) -> TestReport {
    let mut report = TestReport::default();

    for name in selected {
        if !tests.iter().any(|t| &t.name == name) {
            error!("No self-test named '{}'", name);
            report.failed.push((name.clone(), "no such test".to_string()));
        }
    }

    for test in tests
        .iter()
        .filter(|t| selected.is_empty() || selected.contains(&t.name))
    {
        if verbose {
            print!("[TST] {} ... ", test.name);
        }
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (test.check)()))
            .unwrap_or_else(|_| Err("panicked".to_string()));
        match result {
            Ok(()) => {
                if verbose {
                    println!("[OK]");
                }
                report.passed.push(test.name.clone());
            }
            Err(reason) => {
                if verbose {
                    println!("[FAILED]");
                }
                error!("Self-test {} failed: {}", test.name, reason);
                report.failed.push((test.name.clone(), reason));
            }
        }
    }

    info!(
        "Self-tests: {} run, {} passed, {} failed",
        report.total(),
        report.passed.len(),
        report.failed.len()
    );
    report
}
