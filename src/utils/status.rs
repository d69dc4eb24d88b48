//! Human-readable run status and progress files.
//!
//! The status file is a snapshot of the run: status text, wall-clock start and
//! now, elapsed duration, current against maximum simulated time, and the
//! process memory report from `/proc/self/status`. The progress file holds a
//! single number in `[0, 1]`: current over maximum simulated time.

use crate::scheduler::SimTime;
use crate::utils::probes::Probes;
use chrono::{DateTime, Local};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const PROGRESS_FILE_NAME: &str = "progress";
pub const MEMORY_PROBE: &str = "host.memory_kb";

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("Couldn't write to file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// What the status file says about the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Aborted,
}

impl RunStatus {
    pub fn text(self) -> &'static str {
        match self {
            RunStatus::Running => "Simulation is still running",
            RunStatus::Completed => "Simulation terminated successfully",
            RunStatus::Aborted => "Simulation aborted prematurely",
        }
    }
}

pub struct StatusReport {
    status_path: PathBuf,
    progress_path: PathBuf,
    max_sim_time: SimTime,
    interval: Duration,
    started: DateTime<Local>,
    last_write: Option<Instant>,
    probes: Option<Probes>,
}

impl StatusReport {
    pub fn new(output_dir: &Path, status_file_name: &str, max_sim_time: SimTime, interval: Duration) -> Self {
        Self {
            status_path: output_dir.join(status_file_name),
            progress_path: output_dir.join(PROGRESS_FILE_NAME),
            max_sim_time,
            interval,
            started: Local::now(),
            last_write: None,
            probes: None,
        }
    }

    /// Memory samples go into `probes` on every write.
    pub fn with_probes(mut self, probes: Probes) -> Self {
        self.probes = Some(probes);
        self
    }

    pub fn status_path(&self) -> &Path {
        &self.status_path
    }

    pub fn progress_path(&self) -> &Path {
        &self.progress_path
    }

    /// First write. Failing to create either file is fatal for the run.
    pub fn start(&mut self, sim_time: SimTime) -> Result<(), StatusError> {
        self.started = Local::now();
        self.write(RunStatus::Running, sim_time)
    }

    /// Write if the real-time interval elapsed since the last write. Errors
    /// are logged, the run continues.
    pub fn periodically(&mut self, sim_time: SimTime) {
        let due = self
            .last_write
            .map_or(true, |last| last.elapsed() >= self.interval);
        if !due {
            return;
        }
        if let Err(e) = self.write(RunStatus::Running, sim_time) {
            warn!("{}", e);
        }
    }

    pub fn progress(&self, sim_time: SimTime) -> f64 {
        if self.max_sim_time > 0.0 {
            (sim_time / self.max_sim_time).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn write(&mut self, status: RunStatus, sim_time: SimTime) -> Result<(), StatusError> {
        let report = self.render(status, sim_time);
        write_file(&self.status_path, &report)?;
        write_file(&self.progress_path, &self.progress(sim_time).to_string())?;
        self.last_write = Some(Instant::now());

        if let (Some(probes), Some(kb)) = (&self.probes, memory_usage_kb()) {
            probes.put(MEMORY_PROBE, kb as f64);
        }
        debug!("Status written at t={} ({})", sim_time, status.text());
        Ok(())
    }

    fn render(&self, status: RunStatus, sim_time: SimTime) -> String {
        let now = Local::now();
        let elapsed = (now - self.started).num_seconds().max(0);
        let (hours, minutes, seconds) = (elapsed / 3600, (elapsed % 3600) / 60, elapsed % 60);

        const TIMESTAMP: &str = "%a %b %e %H:%M:%S %Y";
        let lines = [
            "        simhost".to_string(),
            "       =========".to_string(),
            format!("                 Status: {}", status.text()),
            format!("                  Start: {}", self.started.format(TIMESTAMP)),
            format!("                    Now: {}", now.format(TIMESTAMP)),
            format!("               Duration: {:>4}:{:02}:{:02}", hours, minutes, seconds),
            String::new(),
            format!("        Simulation time: {}", sim_time),
            format!("   Max. simulation time: {}", self.max_sim_time),
            format!("               Progress: {:.4}", self.progress(sim_time)),
            String::new(),
            "The following output is read from /proc/self/status".to_string(),
            "-".repeat(58),
        ];
        let mut out = lines.join("\n");
        out.push('\n');
        match std::fs::read_to_string("/proc/self/status") {
            Ok(proc_status) => out.push_str(&proc_status),
            Err(_) => out.push_str("(not available on this platform)\n"),
        }
        out
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), StatusError> {
    std::fs::write(path, contents).map_err(|source| StatusError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Virtual memory size of this process in kB, from `/proc/self/statm`.
pub fn memory_usage_kb() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().next()?.parse().ok()?;
    // SAFETY: sysconf has no memory-safety preconditions.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let page_size = u64::try_from(page_size).ok().filter(|size| *size > 0)?;
    Some(pages * page_size / 1024)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_start_creates_both_files() {
        let dir = TempDir::new().unwrap();
        let mut report = StatusReport::new(dir.path(), "status.txt", 100.0, Duration::from_secs(30));
        report.start(0.0).unwrap();

        assert!(read(report.status_path()).contains("Simulation is still running"));
        assert_eq!(read(report.progress_path()), "0");
    }

    #[test]
    fn test_progress_reflects_sim_time() {
        let dir = TempDir::new().unwrap();
        let mut report = StatusReport::new(dir.path(), "status.txt", 20.0, Duration::from_secs(30));
        report.write(RunStatus::Aborted, 5.0).unwrap();

        assert_eq!(read(report.progress_path()).parse::<f64>().unwrap(), 0.25);
        let status = read(report.status_path());
        assert!(status.contains("Simulation aborted prematurely"));
        assert!(status.contains("Simulation time: 5"));
        assert!(status.contains("Max. simulation time: 20"));
    }

    #[test]
    fn test_report_layout() {
        let dir = TempDir::new().unwrap();
        let mut report = StatusReport::new(dir.path(), "status.txt", 8.0, Duration::from_secs(30));
        report.write(RunStatus::Completed, 2.0).unwrap();

        let status = read(report.status_path());
        let lines: Vec<&str> = status.lines().collect();
        assert_eq!(lines[0].trim(), "simhost");
        assert_eq!(lines[2].trim(), "Status: Simulation terminated successfully");
        assert!(lines[5].trim().starts_with("Duration:"));
        assert_eq!(lines[6], "");
        assert_eq!(lines[9].trim(), "Progress: 0.2500");
        assert_eq!(lines[12], "-".repeat(58));
        assert!(lines.len() > 13);
    }

    #[test]
    fn test_progress_is_clamped() {
        let dir = TempDir::new().unwrap();
        let report = StatusReport::new(dir.path(), "s", 10.0, Duration::from_secs(1));
        assert_eq!(report.progress(25.0), 1.0);
        assert_eq!(report.progress(-1.0), 0.0);
        let zero = StatusReport::new(dir.path(), "s", 0.0, Duration::from_secs(1));
        assert_eq!(zero.progress(3.0), 0.0);
    }

    #[test]
    fn test_periodic_write_respects_interval() {
        let dir = TempDir::new().unwrap();
        let mut report = StatusReport::new(dir.path(), "status.txt", 10.0, Duration::from_secs(3600));
        report.start(0.0).unwrap();
        report.periodically(5.0);
        // Interval not elapsed: progress still shows the first write.
        assert_eq!(read(report.progress_path()), "0");
    }

    #[test]
    fn test_unwritable_directory_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does-not-exist");
        let mut report = StatusReport::new(&missing, "status.txt", 10.0, Duration::from_secs(1));
        assert!(matches!(report.start(0.0), Err(StatusError::Write { .. })));
    }

    #[test]
    fn test_memory_probe_sampled_on_write() {
        let dir = TempDir::new().unwrap();
        let probes = Probes::new();
        let mut report =
            StatusReport::new(dir.path(), "status.txt", 10.0, Duration::from_secs(1)).with_probes(probes.clone());
        report.start(0.0).unwrap();
        if memory_usage_kb().is_some() {
            assert_eq!(probes.get(MEMORY_PROBE).unwrap().count, 1);
        }
    }
}
