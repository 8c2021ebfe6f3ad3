use log::{debug, warn};
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Result of a child process run to completion.
#[derive(Debug)]
pub(crate) struct Finished {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Read `reader` to the end on its own thread and send the text back.
fn drain<R: Read + Send + 'static>(reader: Option<R>) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut buf);
        }
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

/// Write `input` to the child's stdin on its own thread, then close it.
fn feed(program: &str, stdin: Option<ChildStdin>, input: Option<&[u8]>) {
    let (Some(mut stdin), Some(input)) = (stdin, input) else {
        return;
    };
    let program = program.to_string();
    let input = input.to_vec();
    thread::spawn(move || {
        // A worker that exits early closes the pipe; the exit status says why.
        if let Err(e) = stdin.write_all(&input) {
            debug!("Failed to write request to {}: {}", program, e);
        }
    });
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!("Failed to kill tool process: {}", e);
    }
    let _ = child.wait();
}

fn collect(rx: &Receiver<String>, deadline: Instant) -> Option<String> {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(text) => Some(text),
        Err(RecvTimeoutError::Disconnected) => Some(String::new()),
        Err(RecvTimeoutError::Timeout) => None,
    }
}

/// Run `command`, feeding it `input` on stdin, and wait at most `timeout`.
///
/// The deadline covers writing the request, the run itself and reading the
/// output. A child still running at the deadline is killed and reported as
/// [`Error::ExternalToolTimeout`], as is output that is still open at the
/// deadline. A command that cannot start is [`Error::ExternalToolUnavailable`].
pub(crate) fn run_with_timeout(
    mut command: Command,
    input: Option<&[u8]>,
    timeout: Duration,
) -> Result<Finished> {
    let program = command.get_program().to_string_lossy().into_owned();
    command
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let deadline = Instant::now() + timeout;
    let mut child = command
        .spawn()
        .map_err(|e| Error::ExternalToolUnavailable(format!("{}: {}", program, e)))?;
    debug!("Started {} (pid {})", program, child.id());

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    feed(&program, child.stdin.take(), input);

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                warn!("{} did not finish within {:?}, killing it", program, timeout);
                kill(&mut child);
                return Err(Error::ExternalToolTimeout { timeout });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                kill(&mut child);
                return Err(e.into());
            }
        }
    };

    let (Some(stdout), Some(stderr)) = (collect(&stdout, deadline), collect(&stderr, deadline))
    else {
        warn!("{} exited but its output stayed open past {:?}", program, timeout);
        return Err(Error::ExternalToolTimeout { timeout });
    };

    Ok(Finished {
        status: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}
