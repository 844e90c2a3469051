//! Worker Process Supervision
//!
//! Spawns one worker process per batch and streams outcomes back over
//! a pair of pipes on fds 3 and 4. Isolation is the point: a benchmark
//! that segfaults or hangs takes down the worker, not the pass, and
//! the outcomes already streamed are kept.

use std::env;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use velobench_ipc::{
    BatchOptions, BenchOutcome, BenchSpec, FrameError, FrameReader, FrameWriter, RunnerCommand,
    WorkerReply, IPC_FD_ENV, PROTOCOL_VERSION,
};

use crate::executor::{BatchExecutor, ExecutorError};

/// Result of polling a pipe for data.
#[derive(Debug)]
enum PollResult {
    DataAvailable,
    Timeout,
    PipeClosed,
    Error(std::io::Error),
}

/// Wait for readable data on `fd` with a millisecond timeout.
fn wait_for_data(fd: RawFd, timeout_ms: i32) -> PollResult {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    if result < 0 {
        PollResult::Error(std::io::Error::last_os_error())
    } else if result == 0 {
        PollResult::Timeout
    } else if pollfd.revents & libc::POLLIN != 0 {
        // Data may still be readable even while the pipe is closing.
        PollResult::DataAvailable
    } else if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        PollResult::PipeClosed
    } else {
        PollResult::Timeout
    }
}

/// Create a pipe pair, returning (read_fd, write_fd), both CLOEXEC.
fn create_pipe() -> Result<(RawFd, RawFd), std::io::Error> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // CLOEXEC everywhere; the child clears it on the two fds it keeps.
    for &fd in &fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    Ok((fds[0], fds[1]))
}

fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

fn send_sigterm(pid: u32) -> Result<(), std::io::Error> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Handle to a spawned worker process.
struct WorkerHandle {
    child: Child,
    reader: FrameReader<std::fs::File>,
    writer: FrameWriter<std::fs::File>,
    msg_read_fd: RawFd,
}

impl WorkerHandle {
    /// Spawn a worker, wiring the command pipe to fd 3 and the reply
    /// pipe to fd 4 in the child.
    fn spawn(program: &Path, args: &[String]) -> Result<Self, ExecutorError> {
        // cmd pipe: orchestrator writes, worker reads via fd 3
        let (cmd_read, cmd_write) = create_pipe()?;
        // msg pipe: worker writes via fd 4, orchestrator reads
        let (msg_read, msg_write) = match create_pipe() {
            Ok(fds) => fds,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                return Err(ExecutorError::SpawnFailed(e));
            }
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .env(IPC_FD_ENV, "3,4")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        unsafe {
            command.pre_exec(move || {
                if cmd_read != 3 {
                    libc::dup2(cmd_read, 3);
                    libc::close(cmd_read);
                }
                let flags = libc::fcntl(3, libc::F_GETFD);
                libc::fcntl(3, libc::F_SETFD, flags & !libc::FD_CLOEXEC);

                if msg_write != 4 {
                    libc::dup2(msg_write, 4);
                    libc::close(msg_write);
                }
                let flags = libc::fcntl(4, libc::F_GETFD);
                libc::fcntl(4, libc::F_SETFD, flags & !libc::FD_CLOEXEC);

                libc::close(cmd_write);
                libc::close(msg_read);
                Ok(())
            });
        }

        let child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                close_fd(msg_read);
                close_fd(msg_write);
                return Err(ExecutorError::SpawnFailed(e));
            }
        };

        close_fd(cmd_read);
        close_fd(msg_write);

        let writer_file = unsafe { std::fs::File::from_raw_fd(cmd_write) };
        let reader_file = unsafe { std::fs::File::from_raw_fd(msg_read) };

        let mut handle = Self {
            child,
            reader: FrameReader::new(reader_file),
            writer: FrameWriter::new(writer_file),
            msg_read_fd: msg_read,
        };
        handle.wait_for_hello()?;
        Ok(handle)
    }

    fn wait_for_hello(&mut self) -> Result<(), ExecutorError> {
        let reply: WorkerReply = self.reader.read()?;
        match reply {
            WorkerReply::Hello { protocol_version } if protocol_version == PROTOCOL_VERSION => {
                Ok(())
            }
            WorkerReply::Hello { protocol_version } => Err(ExecutorError::Protocol {
                expected: format!("protocol version {PROTOCOL_VERSION}"),
                got: format!("protocol version {protocol_version}"),
            }),
            other => Err(ExecutorError::Protocol {
                expected: "Hello".to_string(),
                got: format!("{other:?}"),
            }),
        }
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Stream outcomes for one batch until BatchComplete or the budget
    /// runs out.
    fn run_batch(
        &mut self,
        specs: &[BenchSpec],
        options: &BatchOptions,
        timeout: Duration,
    ) -> Result<Vec<BenchOutcome>, ExecutorError> {
        self.writer.write(&RunnerCommand::RunBatch {
            specs: specs.to_vec(),
            options: *options,
        })?;

        let mut outcomes = Vec::with_capacity(specs.len());
        let start = Instant::now();

        loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                self.terminate_and_drain(&mut outcomes);
                // Keep what was streamed before the budget ran out; the
                // missing remainder reads as failures to the caller.
                if outcomes.is_empty() {
                    return Err(ExecutorError::Timeout);
                }
                tracing::warn!(
                    completed = outcomes.len(),
                    total = specs.len(),
                    "batch timed out, keeping partial outcomes"
                );
                return Ok(outcomes);
            }

            // Buffered bytes may be a partial frame from a dead worker,
            // so liveness is checked either way.
            if self.reader.has_buffered_data() {
                if !self.is_alive() {
                    return Err(ExecutorError::WorkerCrashed(
                        "worker exited with partial data buffered".to_string(),
                    ));
                }
            } else {
                let poll_timeout = remaining.min(Duration::from_millis(100));
                match wait_for_data(self.msg_read_fd, poll_timeout.as_millis() as i32) {
                    PollResult::DataAvailable => {}
                    PollResult::Timeout => {
                        if !self.is_alive() {
                            return Err(ExecutorError::WorkerCrashed(
                                "worker exited unexpectedly".to_string(),
                            ));
                        }
                        continue;
                    }
                    PollResult::PipeClosed => {
                        return Err(ExecutorError::WorkerCrashed(
                            "worker pipe closed unexpectedly".to_string(),
                        ));
                    }
                    PollResult::Error(e) => {
                        return Err(ExecutorError::WorkerCrashed(format!("pipe error: {e}")));
                    }
                }
            }

            let reply: WorkerReply = match self.reader.read() {
                Ok(reply) => reply,
                Err(FrameError::EndOfStream) => {
                    return Err(ExecutorError::WorkerCrashed(
                        "worker closed the channel mid-batch".to_string(),
                    ));
                }
                Err(e) => {
                    if !self.is_alive() {
                        return Err(ExecutorError::WorkerCrashed(
                            "worker crashed during read".to_string(),
                        ));
                    }
                    return Err(ExecutorError::Ipc(e.to_string()));
                }
            };

            match reply {
                WorkerReply::Outcome(outcome) => outcomes.push(outcome),
                WorkerReply::BatchComplete { errors } => {
                    if errors > 0 {
                        tracing::debug!(errors, "worker batch finished with failures");
                    }
                    return Ok(outcomes);
                }
                WorkerReply::Hello { .. } => {
                    return Err(ExecutorError::Protocol {
                        expected: "Outcome or BatchComplete".to_string(),
                        got: "Hello".to_string(),
                    });
                }
            }
        }
    }

    /// SIGTERM, drain replies for 500ms, then SIGKILL.
    fn terminate_and_drain(&mut self, outcomes: &mut Vec<BenchOutcome>) {
        let _ = send_sigterm(self.child.id());

        let drain_deadline = Instant::now() + Duration::from_millis(500);
        loop {
            let remaining = drain_deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match wait_for_data(self.msg_read_fd, remaining.as_millis() as i32) {
                PollResult::DataAvailable => match self.reader.read::<WorkerReply>() {
                    Ok(WorkerReply::Outcome(outcome)) => outcomes.push(outcome),
                    Ok(WorkerReply::BatchComplete { .. }) => break,
                    _ => break,
                },
                _ => break,
            }
        }

        if self.is_alive() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }

    fn shutdown(mut self) {
        let _ = self.writer.write(&RunnerCommand::Shutdown);
        let _ = self.child.wait();
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.is_alive() {
            let _ = send_sigterm(self.child.id());
            std::thread::sleep(Duration::from_millis(50));
            if self.is_alive() {
                let _ = self.child.kill();
            }
            let _ = self.child.wait();
        }
    }
}

/// Executes each batch in a freshly spawned worker process.
pub struct ProcessExecutor {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessExecutor {
    /// Run batches through `program`, which must enter worker mode
    /// when invoked with `args`.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Run batches through the current executable in worker mode.
    pub fn current_exe(timeout: Duration) -> Result<Self, ExecutorError> {
        let program = env::current_exe().map_err(ExecutorError::SpawnFailed)?;
        Ok(Self::new(program, vec!["--velo-worker".to_string()], timeout))
    }
}

impl BatchExecutor for ProcessExecutor {
    fn run_batch(
        &mut self,
        specs: &[BenchSpec],
        options: &BatchOptions,
    ) -> Result<Vec<BenchOutcome>, ExecutorError> {
        if specs.is_empty() {
            return Ok(Vec::new());
        }

        let mut worker = WorkerHandle::spawn(&self.program, &self.args)?;
        let outcome = worker.run_batch(specs, options, self.timeout);
        if outcome.is_ok() {
            worker.shutdown();
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_reports_timeout_on_quiet_pipe() {
        let (read_fd, write_fd) = create_pipe().unwrap();
        assert!(matches!(wait_for_data(read_fd, 10), PollResult::Timeout));
        close_fd(write_fd);
        // Writer closed: poll reports the hangup rather than data.
        assert!(!matches!(
            wait_for_data(read_fd, 10),
            PollResult::Timeout | PollResult::Error(_)
        ));
        close_fd(read_fd);
    }

    #[test]
    fn poll_sees_written_data() {
        let (read_fd, write_fd) = create_pipe().unwrap();
        let written = unsafe { libc::write(write_fd, b"x".as_ptr() as *const _, 1) };
        assert_eq!(written, 1);
        assert!(matches!(
            wait_for_data(read_fd, 100),
            PollResult::DataAvailable
        ));
        close_fd(read_fd);
        close_fd(write_fd);
    }
}
