//! Compiled circuits and their keys on disk, one directory per circuit id:
//!
//! ```text
//! <root>/<circuit_id>/circuit.json            compiled shape
//! <root>/<circuit_id>/proving_key.bin
//! <root>/<circuit_id>/verification_key.bin
//! <root>/<circuit_id>/verification_key.json   contract constructor form
//! <root>/<circuit_id>/manifest.json           ready marker, written last
//! <root>/<circuit_id>.lock                    cross-process setup lock
//! ```
//!
//! Setup builds everything in `<root>/.<circuit_id>.tmp-<nonce>` and renames
//! the directory into place, so a directory under its final name is always
//! complete. Keys are generated once per id; regenerating them invalidates
//! every proof issued under that id.

use crate::config::ProverConfig;
use crate::encode::{ResultEncoder, VerificationKeyJson};
use crate::error::{DecodeErr, ProofError, SetupErr};
use crate::hash::HashFunction;
use crate::registry::CircuitSpec;
use crate::toolchain::{CircuitShape, Toolchain};
use bellman::groth16::{self, Parameters, PreparedVerifyingKey, VerifyingKey};
use blake2::{Blake2s256, Digest};
use bls12_381::Bls12;
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const CIRCUIT_FILE: &str = "circuit.json";
pub const PK_FILE: &str = "proving_key.bin";
pub const VK_FILE: &str = "verification_key.bin";
pub const VK_JSON_FILE: &str = "verification_key.json";
pub const MANIFEST_FILE: &str = "manifest.json";

const LOCK_POLL: Duration = Duration::from_millis(50);

/// Read only once loaded, shared by every request for the circuit.
pub struct CircuitArtifacts {
    pub spec: CircuitSpec,
    pub shape: CircuitShape,
    pub params: Parameters<Bls12>,
    pub pvk: PreparedVerifyingKey<Bls12>,
    pub dir: PathBuf,
}

impl CircuitArtifacts {
    pub fn vk(&self) -> &VerifyingKey<Bls12> {
        &self.params.vk
    }

    /// Checks an encoded result the way the verifier contract does.
    pub fn verify(&self, encoded: &[u8]) -> Result<bool, DecodeErr> {
        ResultEncoder::verify(&self.pvk, encoded)
    }
}

impl fmt::Debug for CircuitArtifacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitArtifacts")
            .field("spec", &self.spec)
            .field("shape", &self.shape)
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub circuit_id: String,
    pub hash_id: String,
    pub num_constraints: usize,
    /// blake2s of the proving key file
    pub proving_key: String,
    /// blake2s of the verification key file
    pub verification_key: String,
}

/// What a job may do, weakest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Mode {
    /// load, never generate keys
    Open,
    /// load, generate if missing
    Ensure,
    /// generate even if present
    Replace,
}

struct Job {
    mode: Mode,
    handle: JoinHandle<Result<CircuitArtifacts, SetupErr>>,
}

/// Per circuit id. A job outlives the caller that started it: a caller that
/// gives up at its deadline leaves the job here for the next one to join.
#[derive(Default)]
struct Slot {
    ready: Mutex<Option<Arc<CircuitArtifacts>>>,
    job: tokio::sync::Mutex<Option<Job>>,
}

pub struct ArtifactStore<T, H> {
    root: PathBuf,
    toolchain: Arc<T>,
    hasher: H,
    ceremony: Option<PathBuf>,
    setup_timeout: Duration,
    lock_file: bool,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl<T: Toolchain, H: HashFunction> ArtifactStore<T, H> {
    pub fn new(config: &ProverConfig, toolchain: Arc<T>, hasher: H) -> Self {
        Self {
            root: config.artifact_dir.clone(),
            toolchain,
            hasher,
            ceremony: config.ceremony.clone(),
            setup_timeout: config.setup_timeout,
            lock_file: config.lock_file,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, circuit_id: &str) -> PathBuf {
        self.root.join(circuit_id)
    }

    /// setup has completed at some point, by this or another process
    pub fn is_ready(&self, circuit_id: &str) -> bool {
        self.dir(circuit_id).join(MANIFEST_FILE).is_file()
    }

    /// Returns the artifacts for `spec`, running setup first if they do not
    /// exist yet. Concurrent callers share a single setup, also across
    /// deadlines: a caller that times out leaves the setup running and later
    /// callers join it. A failed setup leaves nothing behind and the next
    /// caller tries again.
    pub async fn ensure_ready(
        &self,
        spec: &CircuitSpec,
    ) -> Result<Arc<CircuitArtifacts>, ProofError> {
        self.get(spec, Mode::Ensure).await
    }

    /// Loads the artifacts a previous setup produced. Never generates keys,
    /// `SetupErr::NotReady` when there are none.
    pub async fn open(&self, spec: &CircuitSpec) -> Result<Arc<CircuitArtifacts>, ProofError> {
        self.get(spec, Mode::Open).await
    }

    /// Runs setup again even though artifacts exist. Every proof issued so far
    /// under this circuit id stops verifying against the new keys.
    pub async fn regenerate(
        &self,
        spec: &CircuitSpec,
    ) -> Result<Arc<CircuitArtifacts>, ProofError> {
        warn!(
            circuit = %spec.id,
            "regenerating keys: proofs issued under this circuit id will no longer verify, bump the id instead if any are live"
        );
        self.get(spec, Mode::Replace).await
    }

    async fn get(
        &self,
        spec: &CircuitSpec,
        mode: Mode,
    ) -> Result<Arc<CircuitArtifacts>, ProofError> {
        let slot = self.slots.lock().entry(spec.id.clone()).or_default().clone();
        if mode != Mode::Replace {
            if let Some(a) = slot.ready.lock().clone() {
                return Ok(a);
            }
        }
        match tokio::time::timeout(self.setup_timeout, self.drive(&slot, spec, mode)).await {
            Ok(r) => r.map_err(|e| ProofError::setup(&spec.id, e)),
            Err(_) => Err(ProofError::setup(
                &spec.id,
                SetupErr::Timeout(self.setup_timeout),
            )),
        }
    }

    /// Joins the job in flight or starts one. The job is awaited in place so
    /// dropping this future at the deadline leaves it in the slot.
    async fn drive(
        &self,
        slot: &Slot,
        spec: &CircuitSpec,
        mode: Mode,
    ) -> Result<Arc<CircuitArtifacts>, SetupErr> {
        let mut job = slot.job.lock().await;
        loop {
            // finished while we queued
            if mode != Mode::Replace {
                if let Some(a) = slot.ready.lock().clone() {
                    return Ok(a);
                }
            }
            let stale = job.as_ref().is_some_and(|j| j.handle.is_finished());
            let current = match job.take() {
                Some(j) => j,
                None => self.start(spec, mode)?,
            };
            let current = job.insert(current);
            let r = match (&mut current.handle).await {
                Ok(r) => r.map(Arc::new),
                Err(join) => Err(SetupErr::Setup(join.to_string())),
            };
            let ran = current.mode;
            *job = None;

            match r {
                Ok(a) => {
                    *slot.ready.lock() = Some(a.clone());
                    // a load does not answer a regenerate
                    if ran >= mode {
                        return Ok(a);
                    }
                }
                // nobody was waiting when it failed, retry instead of replaying it
                Err(e) if stale => {
                    warn!(circuit = %spec.id, err = %e, "earlier setup failed, retrying");
                }
                Err(e) if ran >= mode => return Err(e),
                Err(_) => {}
            }
        }
    }

    /// Spawns the blocking work for `mode`. Setup takes the cross-process lock
    /// inside the job, so the lock is held exactly as long as the work runs.
    fn start(&self, spec: &CircuitSpec, mode: Mode) -> Result<Job, SetupErr> {
        let (toolchain, hasher, spec_c, root, dir) = (
            self.toolchain.clone(),
            self.hasher.clone(),
            spec.clone(),
            self.root.clone(),
            self.dir(&spec.id),
        );
        if mode != Mode::Replace && self.is_ready(&spec.id) {
            let handle = tokio::task::spawn_blocking(move || {
                load_blocking(&*toolchain, &hasher, &spec_c, &dir)
            });
            return Ok(Job { mode, handle });
        }
        if mode == Mode::Open {
            return Err(SetupErr::NotReady(dir));
        }

        fs::create_dir_all(&self.root)?;
        let entropy = match &self.ceremony {
            Some(path) => Some(ceremony_entropy(path)?),
            None => None,
        };
        let lock = self
            .lock_file
            .then(|| self.root.join(format!("{}.lock", spec.id)));
        let deadline = self.setup_timeout;
        info!(circuit = %spec.id, ?mode, "running setup");
        let handle = tokio::task::spawn_blocking(move || {
            let _lock = match &lock {
                Some(path) => Some(LockFile::acquire(path, deadline)?),
                None => None,
            };
            // another process may have finished while we waited
            if mode == Mode::Ensure && dir.join(MANIFEST_FILE).is_file() {
                return load_blocking(&*toolchain, &hasher, &spec_c, &dir);
            }
            setup_blocking(
                &*toolchain,
                &hasher,
                &spec_c,
                &root,
                entropy,
                mode == Mode::Replace,
            )
        });
        Ok(Job { mode, handle })
    }
}

fn setup_blocking<T: Toolchain, H: HashFunction>(
    toolchain: &T,
    hasher: &H,
    spec: &CircuitSpec,
    root: &Path,
    entropy: Option<[u8; 32]>,
    replace: bool,
) -> Result<CircuitArtifacts, SetupErr> {
    let start = Instant::now();
    let shape = toolchain
        .compile(spec, hasher)
        .map_err(|e| SetupErr::Compile(e.to_string()))?;
    debug!(circuit = %spec.id, constraints = shape.num_constraints, "compiled");

    let params = toolchain
        .setup(spec, hasher, entropy)
        .map_err(|e| SetupErr::Setup(e.to_string()))?;
    let vk = toolchain
        .export_key(&params)
        .map_err(|e| SetupErr::Export(e.to_string()))?;
    if vk.ic.len() != shape.num_inputs || vk != params.vk {
        return Err(SetupErr::Inconsistent(
            "exported verification key does not match the proving key".to_string(),
        ));
    }

    let mut pk_bytes = vec![];
    params.write(&mut pk_bytes)?;
    let mut vk_bytes = vec![];
    vk.write(&mut vk_bytes)?;
    let manifest = Manifest {
        circuit_id: spec.id.clone(),
        hash_id: shape.hash_id.clone(),
        num_constraints: shape.num_constraints,
        proving_key: digest(&pk_bytes),
        verification_key: digest(&vk_bytes),
    };

    let tmp = root.join(format!(".{}.tmp-{:016x}", spec.id, rand::random::<u64>()));
    let written = write_dir(&tmp, &shape, &pk_bytes, &vk_bytes, &vk, &manifest);
    if let Err(e) = written {
        let _ = fs::remove_dir_all(&tmp);
        return Err(e);
    }

    let dir = root.join(&spec.id);
    let old = replace.then(|| {
        root.join(format!(".{}.old-{:016x}", spec.id, rand::random::<u64>()))
    });
    if !promote(&tmp, &dir, old.as_deref())? {
        warn!(circuit = %spec.id, "lost setup race, loading the promoted artifacts");
        return load_blocking(toolchain, hasher, spec, &dir);
    }
    info!(circuit = %spec.id, elapsed = ?start.elapsed(), "setup complete");

    Ok(CircuitArtifacts {
        spec: spec.clone(),
        shape,
        pvk: groth16::prepare_verifying_key(&vk),
        params,
        dir,
    })
}

fn write_dir(
    tmp: &Path,
    shape: &CircuitShape,
    pk_bytes: &[u8],
    vk_bytes: &[u8],
    vk: &VerifyingKey<Bls12>,
    manifest: &Manifest,
) -> Result<(), SetupErr> {
    fs::create_dir_all(tmp)?;
    write_synced(&tmp.join(CIRCUIT_FILE), &serde_json::to_vec_pretty(shape)?)?;
    write_synced(&tmp.join(PK_FILE), pk_bytes)?;
    write_synced(&tmp.join(VK_FILE), vk_bytes)?;
    let vk_json = VerificationKeyJson::from_vk(vk);
    write_synced(&tmp.join(VK_JSON_FILE), &serde_json::to_vec_pretty(&vk_json)?)?;
    // last: its presence marks the directory complete
    write_synced(&tmp.join(MANIFEST_FILE), &serde_json::to_vec_pretty(manifest)?)?;
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), SetupErr> {
    let mut f = fs::File::create(path)?;
    f.write_all(bytes)?;
    f.sync_all()?;
    Ok(())
}

/// Moves a finished temp directory under its final name. With `old` set an
/// existing directory is swapped out first and deleted afterwards.
///
/// `Ok(false)` when another setup promoted its directory first.
fn promote(tmp: &Path, dir: &Path, old: Option<&Path>) -> Result<bool, SetupErr> {
    let swapped = match old {
        Some(old) if dir.exists() => {
            fs::rename(dir, old)?;
            true
        }
        _ => false,
    };
    if let Err(e) = fs::rename(tmp, dir) {
        let _ = fs::remove_dir_all(tmp);
        if let (true, Some(old)) = (swapped, old) {
            let _ = fs::rename(old, dir);
        }
        if dir.join(MANIFEST_FILE).is_file() {
            return Ok(false);
        }
        return Err(e.into());
    }
    if let (true, Some(old)) = (swapped, old) {
        let _ = fs::remove_dir_all(old);
    }
    Ok(true)
}

fn load_blocking<T: Toolchain, H: HashFunction>(
    toolchain: &T,
    hasher: &H,
    spec: &CircuitSpec,
    dir: &Path,
) -> Result<CircuitArtifacts, SetupErr> {
    let manifest: Manifest = serde_json::from_slice(&fs::read(dir.join(MANIFEST_FILE))?)?;
    let stored: CircuitShape = serde_json::from_slice(&fs::read(dir.join(CIRCUIT_FILE))?)?;
    let shape = toolchain
        .compile(spec, hasher)
        .map_err(|e| SetupErr::Compile(e.to_string()))?;
    if stored != shape || manifest.hash_id != shape.hash_id {
        return Err(SetupErr::Inconsistent(format!(
            "circuit {} changed since its keys were generated, register it under a new id",
            spec.id
        )));
    }

    let pk_bytes = fs::read(dir.join(PK_FILE))?;
    let vk_bytes = fs::read(dir.join(VK_FILE))?;
    if digest(&pk_bytes) != manifest.proving_key || digest(&vk_bytes) != manifest.verification_key
    {
        return Err(SetupErr::Inconsistent("key digest mismatch".to_string()));
    }
    // digests already vouch for the points
    let params = Parameters::<Bls12>::read(&pk_bytes[..], false)?;
    let vk = VerifyingKey::<Bls12>::read(&vk_bytes[..])?;
    if vk != params.vk {
        return Err(SetupErr::Inconsistent(
            "verification key does not belong to the proving key".to_string(),
        ));
    }
    debug!(circuit = %spec.id, "artifacts loaded");
    Ok(CircuitArtifacts {
        spec: spec.clone(),
        shape,
        pvk: groth16::prepare_verifying_key(&vk),
        params,
        dir: dir.to_path_buf(),
    })
}

/// Setup randomness derived from a ceremony file. Stand-in for a real
/// multi-party ceremony, whoever holds the file can forge proofs.
fn ceremony_entropy(path: &Path) -> Result<[u8; 32], SetupErr> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(SetupErr::MissingCeremony(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&Blake2s256::digest(&bytes));
    Ok(seed)
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Blake2s256::digest(bytes))
}

/// Cross-process setup lock: an advisory lock on `<root>/<circuit_id>.lock`.
/// The file stays behind, the lock does not: the kernel drops it with the
/// holder, also when the holder is killed.
struct LockFile(fs::File);

impl LockFile {
    fn acquire(path: &Path, deadline: Duration) -> Result<Self, SetupErr> {
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let contended = fs2::lock_contended_error().raw_os_error();
        let start = Instant::now();
        loop {
            match f.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if e.raw_os_error() == contended => {
                    if start.elapsed() >= deadline {
                        return Err(SetupErr::LockHeld(path.to_path_buf(), deadline));
                    }
                    std::thread::sleep(LOCK_POLL);
                }
                Err(e) => return Err(e.into()),
            }
        }
        // holder pid, for whoever inspects a stuck setup
        let _ = f
            .set_len(0)
            .and_then(|_| writeln!(&f, "{}", std::process::id()));
        Ok(LockFile(f))
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}
