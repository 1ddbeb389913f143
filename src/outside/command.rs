use std::{
    io::Read,
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use bitflags::bitflags;
use thiserror::Error;
use tracing::{debug, trace};

pub const FFMPEG: &str = "ffmpeg";
pub const FFPROBE: &str = "ffprobe";
pub const FFXXX_DEFAULT_ARGS: [&str; 3] = ["-hide_banner", "-loglevel", "error"];

/// Interval between two checks of a running process
const POLL_INTERVAL: Duration = Duration::from_millis(100);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capture: u8 {
        const STDOUT = 0b0000010;
        const STDERR = 0b0000100;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("could not run {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} did not finish within {}s and was killed", timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },

    #[error("{program} did run but was not successful ({status}). Here is its stderr: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

#[derive(Debug)]
pub struct Output {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Run a command, returning its raw output.
///
/// IO handles will be captured only if the caller required it or if the log level is Debug.
/// In that last case, `stdout` and `stderr` will be logged.
///
/// The process is killed once `timeout` is elapsed.
/// If the program runs but returns a non-0 status code, it will not trigger an error.
pub fn run_command<F: FnOnce(&mut Command) -> &mut Command>(
    program: &str,
    f: F,
    capture: Capture,
    timeout: Duration,
) -> Result<Output, CommandError> {
    let is_debug = tracing::enabled!(tracing::Level::DEBUG);
    let get_io = |capture| {
        if capture {
            Stdio::piped()
        } else {
            Stdio::null()
        }
    };

    let mut cmd = Command::new(program);
    let cmd = f(&mut cmd)
        .stdin(Stdio::null())
        .stdout(get_io(is_debug || capture.contains(Capture::STDOUT)))
        .stderr(get_io(is_debug || capture.contains(Capture::STDERR)));

    debug!("Executing command: {cmd:?}");
    let mut child = cmd.spawn().map_err(|err| CommandError::Spawn {
        program: program.to_owned(),
        reason: err.to_string(),
    })?;

    // Drain the pipes while waiting or a chatty process would block on a full pipe
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = wait_with_timeout(&mut child, timeout).ok_or_else(|| {
        CommandError::TimedOut {
            program: program.to_owned(),
            timeout,
        }
    });

    let collect = |handle: Option<thread::JoinHandle<Vec<u8>>>| {
        handle
            .map(|h| h.join().unwrap_or_default())
            .unwrap_or_default()
    };
    let stdout = collect(stdout);
    let stderr = collect(stderr);
    let status = status?;

    if is_debug {
        debug!("status: {status}");
        debug!("stdout: {} bytes long", stdout.len());
        trace!("stdout: {:?}", String::from_utf8_lossy(&stdout));
        debug!("stderr: {} bytes long", stderr.len());
        trace!("stderr: {:?}", String::from_utf8_lossy(&stderr));
    }

    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

/// Run the command and verify that it has returned a success status code.
pub fn assert_success_command<F: FnOnce(&mut Command) -> &mut Command>(
    program: &str,
    f: F,
    capture: Capture,
    timeout: Duration,
) -> Result<Output, CommandError> {
    let res = run_command(program, f, capture | Capture::STDERR, timeout)?;
    if res.status.success() {
        Ok(res)
    } else {
        Err(CommandError::Failed {
            program: program.to_owned(),
            status: res.status.to_string(),
            stderr: String::from_utf8_lossy(&res.stderr).trim().to_owned(),
        })
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

/// Wait for the child to exit, killing it once the timeout is reached.
/// Return None if the child had to be killed.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout() {
        let out = assert_success_command(
            "sh",
            |cmd| cmd.args(["-c", "echo hello"]),
            Capture::STDOUT,
            Duration::from_secs(10),
        )
        .unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "hello");
    }

    #[test]
    fn reports_failure_with_stderr() {
        let err = assert_success_command(
            "sh",
            |cmd| cmd.args(["-c", "echo broken >&2; exit 3"]),
            Capture::empty(),
            Duration::from_secs(10),
        )
        .unwrap_err();
        match err {
            CommandError::Failed { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn kills_on_timeout() {
        let err = run_command(
            "sh",
            |cmd| cmd.args(["-c", "sleep 5"]),
            Capture::empty(),
            Duration::from_millis(200),
        )
        .unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { .. }));
    }
}
