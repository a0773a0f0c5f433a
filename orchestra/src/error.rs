use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type used across the orchestration core.
pub type Result<T> = std::result::Result<T, OrchestraErr>;

/// Unreadable or malformed training data.
///
/// Always fatal: training cannot proceed on bad data, so nothing retries it.
#[derive(Debug)]
pub enum DataErr {
    /// The underlying storage could not be read.
    Io(io::Error),
    /// The storage was read but its contents are malformed.
    Corrupted(String),
}

impl Display for DataErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataErr::Io(e) => write!(f, "io error: {e}"),
            DataErr::Corrupted(detail) => write!(f, "corrupted data: {detail}"),
        }
    }
}

impl Error for DataErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DataErr::Io(e) => Some(e),
            DataErr::Corrupted(_) => None,
        }
    }
}

impl From<io::Error> for DataErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// A numerical or backend fault raised while a slot processed a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ComputeErr {
    /// A loss, gradient or parameter stopped being finite (overflow or NaN).
    NonFinite { what: &'static str },
    /// A buffer or array did not have the expected length.
    ShapeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    /// The backend reported a failure of its own.
    Backend(String),
    /// The backend panicked mid-batch; its state can't be trusted anymore.
    Panicked(String),
}

impl Display for ComputeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeErr::NonFinite { what } => write!(f, "non-finite {what}"),
            ComputeErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(f, "shape mismatch for {what}: got {got}, expected {expected}"),
            ComputeErr::Backend(detail) => write!(f, "backend failure: {detail}"),
            ComputeErr::Panicked(detail) => write!(f, "backend panicked: {detail}"),
        }
    }
}

impl Error for ComputeErr {}

/// Returned to a producer or consumer of a prefetch buffer that was shut down.
///
/// This is the expected way for a buffer to end, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferClosed;

impl Display for BufferClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("prefetch buffer closed")
    }
}

impl Error for BufferClosed {}

/// The orchestration core's error type.
#[derive(Debug)]
pub enum OrchestraErr {
    /// The configuration was rejected before anything started.
    InvalidConfig(String),
    /// The batch source failed; see [`DataErr`].
    DataCorruption(DataErr),
    /// A slot failed to process a batch.
    WorkerCompute { slot: usize, source: ComputeErr },
    /// Merging or broadcasting the consensus state failed.
    AveragingTransport(String),
    /// A prefetch buffer was closed under a blocked caller.
    BufferClosed,
    /// Every slot of the pool is degraded.
    NoHealthyWorkers,
    /// Inference over a held-out source failed.
    Inference(ComputeErr),
    /// The async runtime lost a background task.
    Runtime(String),
    /// The orchestrator's token was cancelled by an earlier run.
    Cancelled,
    /// A fatal error interrupted training at the given position.
    Aborted {
        epoch: usize,
        batch: usize,
        cause: Box<OrchestraErr>,
    },
}

impl OrchestraErr {
    /// Returns a stable identifier for the error kind.
    ///
    /// # Returns
    /// A static string naming the kind, unwrapping `Aborted` down to its cause.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestraErr::InvalidConfig(_) => "invalid_config",
            OrchestraErr::DataCorruption(_) => "data_corruption",
            OrchestraErr::WorkerCompute { .. } => "worker_compute",
            OrchestraErr::AveragingTransport(_) => "averaging_transport",
            OrchestraErr::BufferClosed => "buffer_closed",
            OrchestraErr::NoHealthyWorkers => "no_healthy_workers",
            OrchestraErr::Inference(_) => "inference",
            OrchestraErr::Runtime(_) => "runtime",
            OrchestraErr::Cancelled => "cancelled",
            OrchestraErr::Aborted { cause, .. } => cause.kind(),
        }
    }

    /// Returns the innermost error, skipping any `Aborted` wrappers.
    pub fn root_cause(&self) -> &OrchestraErr {
        match self {
            OrchestraErr::Aborted { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

impl Display for OrchestraErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestraErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            OrchestraErr::DataCorruption(e) => write!(f, "data corruption: {e}"),
            OrchestraErr::WorkerCompute { slot, source } => {
                write!(f, "slot {slot} compute error: {source}")
            }
            OrchestraErr::AveragingTransport(msg) => write!(f, "averaging transport error: {msg}"),
            OrchestraErr::BufferClosed => f.write_str("prefetch buffer closed"),
            OrchestraErr::NoHealthyWorkers => f.write_str("every worker slot is degraded"),
            OrchestraErr::Inference(e) => write!(f, "inference error: {e}"),
            OrchestraErr::Runtime(msg) => write!(f, "runtime error: {msg}"),
            OrchestraErr::Cancelled => f.write_str("orchestrator already cancelled"),
            OrchestraErr::Aborted {
                epoch,
                batch,
                cause,
            } => write!(
                f,
                "training aborted at epoch {epoch}, batch {batch} ({}): {cause}",
                cause.kind()
            ),
        }
    }
}

impl Error for OrchestraErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            OrchestraErr::DataCorruption(e) => Some(e),
            OrchestraErr::WorkerCompute { source, .. } => Some(source),
            OrchestraErr::Inference(e) => Some(e),
            OrchestraErr::Aborted { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

impl From<DataErr> for OrchestraErr {
    fn from(value: DataErr) -> Self {
        Self::DataCorruption(value)
    }
}

impl From<BufferClosed> for OrchestraErr {
    fn from(_: BufferClosed) -> Self {
        Self::BufferClosed
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<OrchestraErr> for io::Error {
    fn from(value: OrchestraErr) -> Self {
        match value {
            OrchestraErr::DataCorruption(DataErr::Io(e)) => e,
            OrchestraErr::InvalidConfig(_) => io::Error::new(io::ErrorKind::InvalidInput, value),
            other => io::Error::other(other),
        }
    }
}
