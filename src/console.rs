//! Console channel between a supervisor and its child.
//!
//! The child sees one end of a Unix socket pair as its stdin, stdout and
//! stderr. The supervisor writes commands line by line and a reader thread
//! drains whatever the child prints into a bounded backlog.

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Write};
use std::net::Shutdown;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

/// Standard streams for the child, all backed by the same socket
pub struct ChildStdio {
    pub stdin: Stdio,
    pub stdout: Stdio,
    pub stderr: Stdio,
}

pub struct Console {
    writer: Mutex<UnixStream>,
    backlog: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl Console {
    /// Create the channel. The returned stdio must be handed to the child
    /// and dropped by the parent once the child is spawned.
    pub fn open(capacity: usize, write_timeout: Duration) -> io::Result<(Self, ChildStdio)> {
        let (parent, child) = UnixStream::pair()?;
        parent.set_write_timeout(Some(write_timeout))?;

        let stdin: OwnedFd = child.try_clone()?.into();
        let stdout: OwnedFd = child.try_clone()?.into();
        let stderr: OwnedFd = child.into();

        let console = Self {
            writer: Mutex::new(parent),
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity,
        };
        let stdio = ChildStdio {
            stdin: Stdio::from(stdin),
            stdout: Stdio::from(stdout),
            stderr: Stdio::from(stderr),
        };
        Ok((console, stdio))
    }

    /// Write one command followed by a newline.
    pub fn send_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        writer.write_all(&buf)?;
        writer.flush()
    }

    /// Start draining child output into the backlog.
    pub fn spawn_reader(&self, label: String) -> io::Result<JoinHandle<()>> {
        let stream = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_clone()?;
        let backlog = Arc::clone(&self.backlog);
        let capacity = self.capacity;

        thread::Builder::new()
            .name(format!("fleetd-console-{label}"))
            .spawn(move || {
                let mut reader = BufReader::new(stream);
                let mut raw = Vec::new();
                loop {
                    raw.clear();
                    match reader.read_until(b'\n', &mut raw) {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                    let line = String::from_utf8_lossy(&raw).trim_end().to_string();
                    debug!(server = %label, "console: {line}");
                    if capacity == 0 {
                        continue;
                    }
                    let mut backlog = backlog.lock().unwrap_or_else(PoisonError::into_inner);
                    if backlog.len() == capacity {
                        backlog.pop_front();
                    }
                    backlog.push_back(line);
                }
            })
    }

    /// Last lines printed by the child, oldest first
    pub fn tail(&self) -> Vec<String> {
        let backlog = self.backlog.lock().unwrap_or_else(PoisonError::into_inner);
        backlog.iter().cloned().collect()
    }

    /// Shut the channel down in both directions, unblocking the reader.
    pub fn close(&self) {
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = writer.shutdown(Shutdown::Both);
    }
}
