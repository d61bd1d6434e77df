use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The one failure a request surfaces. Collaborator errors are mapped into
/// this taxonomy at the boundary, see [`ToolchainErr`].
#[derive(Debug, Error)]
pub enum ProofError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InputErr),
    #[error("setup failed for circuit {circuit_id}: {source}")]
    SetupFailure {
        circuit_id: String,
        #[source]
        source: SetupErr,
    },
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("prover unavailable: {0}")]
    ProverUnavailable(String),
    #[error("prover exceeded deadline of {0:?}")]
    ProverTimeout(Duration),
    #[error("encoding failure: {0}")]
    EncodingFailure(String),
}

impl ProofError {
    pub fn setup(circuit_id: &str, source: impl Into<SetupErr>) -> Self {
        ProofError::SetupFailure {
            circuit_id: circuit_id.to_string(),
            source: source.into(),
        }
    }

    /// `true` for failures that may succeed when retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProofError::ProverUnavailable(_) | ProofError::ProverTimeout(_)
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputErr {
    #[error("unknown circuit {0}")]
    UnknownCircuit(String),
    #[error("preimage has {got} elements, circuit expects {expected}")]
    WrongArity { expected: usize, got: usize },
    #[error("preimage element {index} does not fit in {width} bits")]
    TooWide { index: usize, width: u32 },
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("invalid circuit: {0}")]
    InvalidCircuit(String),
}

#[derive(Debug, Error)]
pub enum SetupErr {
    #[error("compile {0}")]
    Compile(String),
    #[error("parameter generation {0}")]
    Setup(String),
    #[error("key export {0}")]
    Export(String),
    #[error("missing ceremony file {0}")]
    MissingCeremony(PathBuf),
    #[error("artifacts are inconsistent: {0}")]
    Inconsistent(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("no artifacts at {0}, run setup first")]
    NotReady(PathBuf),
    #[error("lock {0} still held after {1:?}")]
    LockHeld(PathBuf, Duration),
    #[error("IO {0}")]
    IO(#[from] std::io::Error),
    #[error("manifest {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Raised by [`crate::toolchain::Toolchain`] implementations.
#[derive(Debug, Error)]
pub enum ToolchainErr {
    #[error("synthesis {0}")]
    Synthesis(#[from] bellman::SynthesisError),
    #[error("unsatisfied constraint {0}")]
    Unsatisfied(String),
    #[error("public inputs do not match the witness")]
    PublicMismatch,
    #[error("IO {0}")]
    IO(#[from] std::io::Error),
    #[error("crashed {0}")]
    Crashed(String),
}

impl ToolchainErr {
    /// Maps a failure raised while computing the trace or the proof.
    pub fn into_prove_error(self) -> ProofError {
        match self {
            ToolchainErr::Unsatisfied(path) => ProofError::ConstraintViolation(path),
            ToolchainErr::PublicMismatch => {
                ProofError::ConstraintViolation("public input mismatch".to_string())
            }
            ToolchainErr::Synthesis(bellman::SynthesisError::Unsatisfiable) => {
                ProofError::ConstraintViolation("unsatisfiable".to_string())
            }
            ToolchainErr::Synthesis(bellman::SynthesisError::AssignmentMissing) => {
                ProofError::ConstraintViolation("assignment missing".to_string())
            }
            other => ProofError::ProverUnavailable(other.to_string()),
        }
    }
}

/// Raised while reading an encoded result back.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeErr {
    #[error("abi {0}")]
    Abi(String),
    #[error("unknown protocol tag {0}")]
    Protocol(String),
    #[error("point {0} is malformed")]
    Point(&'static str),
    #[error("non canonical field element")]
    Scalar,
    #[error("proof carries no public inputs")]
    NoPublicInputs,
}

impl From<alloy_sol_types::Error> for DecodeErr {
    fn from(e: alloy_sol_types::Error) -> Self {
        DecodeErr::Abi(e.to_string())
    }
}
