#[cfg(test)]
mod cli_exit_codes {
    use std::path::{Path, PathBuf};
    use std::process::{Child, Command, Stdio};
    use std::thread::sleep;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    const DEADLINE: Duration = Duration::from_secs(30);

    fn simhost() -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_simhost"));
        command.env("RUST_LOG", "warn");
        command
    }

    /// Write a config whose run ends at `max_sim_time`, with a generator
    /// feeding a sink every millisecond of simulated time.
    fn write_config(dir: &Path, max_sim_time: &str) -> (PathBuf, PathBuf) {
        let output = dir.join("output");
        let config = dir.join("config.yaml");
        let yaml = format!(
            "simulation:\n  max_sim_time: {}\n  output_dir: {}\n\
             modules:\n  - {{library: traffic, plugin: traffic}}\n  - {{library: channel, plugin: channel}}\n\
             nodes:\n  - {{name: sink0, module: channel, kind: sink}}\n  \
             - {{name: gen0, module: traffic, kind: generator, params: {{target: sink0, interval: 0.001}}}}\n",
            max_sim_time,
            output.display()
        );
        std::fs::write(&config, yaml).unwrap();
        (config, output)
    }

    /// Start a run that would not end on its own and wait until it is
    /// Running (its status file exists).
    fn spawn_endless(dir: &Path) -> (Child, PathBuf) {
        let (config, output) = write_config(dir, "1000000000000.0");
        let mut child = simhost()
            .arg("-f")
            .arg(&config)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();

        let status_file = output.join("status.txt");
        let started = Instant::now();
        while !status_file.exists() {
            if started.elapsed() > DEADLINE {
                let _ = child.kill();
                panic!("simulation never reached Running");
            }
            sleep(Duration::from_millis(20));
        }
        (child, output)
    }

    fn send(child: &Child, signal: i32) {
        // SAFETY: kill has no memory-safety preconditions.
        assert_eq!(unsafe { libc::kill(child.id() as libc::pid_t, signal) }, 0);
    }

    fn exit_code(mut child: Child) -> Option<i32> {
        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait().unwrap() {
                return status.code();
            }
            if started.elapsed() > DEADLINE {
                let _ = child.kill();
                panic!("simulation did not exit");
            }
            sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_print_search_path_exits_zero() {
        let output = simhost().arg("-P").output().unwrap();
        assert_eq!(output.status.code(), Some(0));
        let stdout = String::from_utf8(output.stdout).unwrap();
        assert_eq!(stdout.lines().last(), Some("."));
    }

    #[test]
    fn test_show_modules_exits_zero() {
        let output = simhost().arg("-M").output().unwrap();
        assert_eq!(output.status.code(), Some(0));
        let stdout = String::from_utf8(output.stdout).unwrap();
        assert!(stdout.contains("channel"));
        assert!(stdout.contains("traffic"));
    }

    #[test]
    fn test_help_exits_zero() {
        let output = simhost().arg("-?").output().unwrap();
        assert_eq!(output.status.code(), Some(0));
        assert!(String::from_utf8(output.stdout).unwrap().contains("--single-step-mode"));
    }

    #[test]
    fn test_usage_error_exits_one() {
        let output = simhost().arg("-w").output().unwrap();
        assert_eq!(output.status.code(), Some(1));
    }

    #[test]
    fn test_missing_config_exits_one() {
        let temp = TempDir::new().unwrap();
        let status = simhost()
            .arg("-f")
            .arg(temp.path().join("absent.yaml"))
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert_eq!(status.code(), Some(1));
    }

    #[test]
    fn test_completed_run_exits_zero() {
        let temp = TempDir::new().unwrap();
        let (config, output) = write_config(temp.path(), "2.0");
        let status = simhost().arg("-f").arg(&config).stderr(Stdio::null()).status().unwrap();

        assert_eq!(status.code(), Some(0));
        let progress: f64 = std::fs::read_to_string(output.join("progress"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert_eq!(progress, 1.0);
    }

    #[test]
    fn test_self_tests_exit_codes() {
        let temp = TempDir::new().unwrap();
        let (config, _) = write_config(temp.path(), "2.0");
        let passed = simhost().arg("-f").arg(&config).arg("-t").stderr(Stdio::null()).status().unwrap();
        assert_eq!(passed.code(), Some(0));

        let unknown = simhost()
            .arg("-f")
            .arg(&config)
            .args(["-T", "no.such.test"])
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert_eq!(unknown.code(), Some(1));
    }

    #[test]
    fn test_resource_limit_signal_exits_two() {
        let temp = TempDir::new().unwrap();
        let (child, output) = spawn_endless(temp.path());
        send(&child, libc::SIGUSR2);

        assert_eq!(exit_code(child), Some(2));
        let status = std::fs::read_to_string(output.join("status.txt")).unwrap();
        assert!(status.contains("Simulation aborted prematurely"));
    }

    #[test]
    fn test_cpu_limit_signal_exits_two() {
        let temp = TempDir::new().unwrap();
        let (child, _) = spawn_endless(temp.path());
        send(&child, libc::SIGXCPU);
        assert_eq!(exit_code(child), Some(2));
    }

    #[test]
    fn test_snapshot_signal_does_not_end_the_run() {
        let temp = TempDir::new().unwrap();
        let (child, _) = spawn_endless(temp.path());
        send(&child, libc::SIGUSR1);
        sleep(Duration::from_millis(200));
        send(&child, libc::SIGUSR2);
        assert_eq!(exit_code(child), Some(2));
    }

    #[test]
    fn test_interrupt_exits_one() {
        let temp = TempDir::new().unwrap();
        let (child, _) = spawn_endless(temp.path());
        send(&child, libc::SIGINT);
        assert_eq!(exit_code(child), Some(1));
    }

    #[test]
    fn test_segfault_signal_exits_one() {
        let temp = TempDir::new().unwrap();
        let (child, _) = spawn_endless(temp.path());
        send(&child, libc::SIGSEGV);
        assert_eq!(exit_code(child), Some(1));
    }
}
