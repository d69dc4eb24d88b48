//! Line-oriented TCP control server feeding the step budget.
//!
//! Commands, one per line:
//!
//! ```text
//! step [k]   add k credits (default 1)   -> ok <credits>
//! credits    report the balance          -> credits <credits>
//! ```

use super::StepBudget;
use log::{debug, info, warn};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 7320;

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Reply to one command line.
pub fn handle_command(line: &str, budget: &StepBudget) -> String {
    let mut words = line.split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some("step"), count, None) => {
            let count = match count.map(str::parse::<u64>) {
                None => 1,
                Some(Ok(count)) => count,
                Some(Err(_)) => return format!("error invalid step count '{}'", count.unwrap_or_default()),
            };
            format!("ok {}", budget.add(count))
        }
        (Some("credits"), None, None) => format!("credits {}", budget.credits()),
        (Some(other), ..) => format!("error unknown command '{}'", other),
        (None, ..) => "error empty command".to_string(),
    }
}

/// Accepts control connections on a background thread until dropped.
pub struct StepServer {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl StepServer {
    /// Listen on `127.0.0.1:port`. Port 0 picks a free port.
    pub fn spawn(port: u16, budget: StepBudget) -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        info!("Step control server listening on {}", addr);

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("step-server".to_string())
            .spawn(move || accept_loop(listener, budget, thread_stop))?;

        Ok(Self {
            addr,
            stop,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for StepServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Step control server thread panicked");
            }
        }
    }
}

fn accept_loop(listener: TcpListener, budget: StepBudget, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("Step control connection from {}", peer);
                let budget = budget.clone();
                // Connections are detached; they end with the client.
                let spawned = std::thread::Builder::new()
                    .name("step-client".to_string())
                    .spawn(move || {
                        if let Err(e) = serve(stream, &budget) {
                            debug!("Step control connection from {} closed: {}", peer, e);
                        }
                    });
                if let Err(e) = spawned {
                    warn!("Cannot serve step control connection: {}", e);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!("Step control server accept failed: {}", e);
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
    debug!("Step control server stopped");
}

fn serve(stream: TcpStream, budget: &StepBudget) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    let mut writer = stream.try_clone()?;
    for line in BufReader::new(stream).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = handle_command(&line, budget);
        writeln!(writer, "{}", reply)?;
    }
    Ok(())
}
