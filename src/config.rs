use std::path::PathBuf;
use std::time::Duration;

/// a stuck prover must not hang the caller
pub const DEFAULT_PROVE_TIMEOUT: Duration = Duration::from_secs(120);
/// compile + parameter generation + export
pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Clone, Debug)]
pub struct ProverConfig {
    pub artifact_dir: PathBuf,
    /// seeds parameter generation when set; must exist
    pub ceremony: Option<PathBuf>,
    pub prove_timeout: Duration,
    pub setup_timeout: Duration,
    /// deterministic blinding, tests only
    pub proving_seed: Option<u64>,
    /// check every proof against the verification key before returning it
    pub verify_after_prove: bool,
    /// serialize setup across processes sharing `artifact_dir`
    pub lock_file: bool,
}

impl ProverConfig {
    pub fn new(artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
            ceremony: None,
            prove_timeout: DEFAULT_PROVE_TIMEOUT,
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
            proving_seed: None,
            verify_after_prove: true,
            lock_file: true,
        }
    }
    pub fn ceremony(mut self, path: impl Into<PathBuf>) -> Self {
        self.ceremony = Some(path.into());
        self
    }
    pub fn prove_timeout(mut self, t: Duration) -> Self {
        self.prove_timeout = t;
        self
    }
    pub fn setup_timeout(mut self, t: Duration) -> Self {
        self.setup_timeout = t;
        self
    }
    pub fn proving_seed(mut self, seed: u64) -> Self {
        self.proving_seed = Some(seed);
        self
    }
    pub fn verify_after_prove(mut self, on: bool) -> Self {
        self.verify_after_prove = on;
        self
    }
    pub fn lock_file(mut self, on: bool) -> Self {
        self.lock_file = on;
        self
    }
}
