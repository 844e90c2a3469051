#![warn(missing_docs)]
//! VeloBench IPC Protocol
//!
//! Binary protocol between the orchestrator and the isolated benchmark
//! worker: length-prefixed frames carrying rkyv-serialized messages.
//! The worker receives a batch of serialized benchmark definitions and
//! streams back one structured outcome per benchmark, so a crash midway
//! through a batch loses only the unfinished remainder.

mod framing;
mod messages;

pub use framing::{FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE};
pub use messages::{
    BatchOptions, BenchOutcome, BenchSpec, ExecResult, FailStage, RunnerCommand, WorkerReply,
};

/// Protocol version, checked during the worker handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable naming the read/write fds inherited by the
/// worker ("3,4"). Absent, the worker falls back to stdin/stdout.
pub const IPC_FD_ENV: &str = "VELOBENCH_IPC_FD";
