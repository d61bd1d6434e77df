use crate::error::{ProofError, ToolchainErr};
use crate::hash::HashFunction;
use crate::store::CircuitArtifacts;
use crate::toolchain::Toolchain;
use crate::witness::Witness;
use bellman::groth16::{self, Proof};
use bls12_381::{Bls12, Scalar};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// A proof plus the public inputs it was made for, in circuit order.
#[derive(Clone, Debug)]
pub struct ProofObject {
    pub proof: Proof<Bls12>,
    pub public_inputs: Vec<Scalar>,
}

/// Runs the two proving stages against loaded artifacts:
/// 1. the full trace, which catches an unsatisfiable witness before any
///    expensive work and names the failing constraint
/// 2. groth16 proving over the proving key
pub struct ProofEngine<T, H> {
    toolchain: Arc<T>,
    hasher: H,
    timeout: Duration,
    seed: Option<u64>,
    verify: bool,
}

impl<T: Toolchain, H: HashFunction> ProofEngine<T, H> {
    pub fn new(toolchain: Arc<T>, hasher: H, timeout: Duration) -> Self {
        Self {
            toolchain,
            hasher,
            timeout,
            seed: None,
            verify: true,
        }
    }
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }
    pub fn verify_after_prove(mut self, on: bool) -> Self {
        self.verify = on;
        self
    }

    /// Consumes the witness; it does not outlive the call.
    pub async fn prove(
        &self,
        artifacts: Arc<CircuitArtifacts>,
        witness: Witness,
    ) -> Result<ProofObject, ProofError> {
        let toolchain = self.toolchain.clone();
        let hasher = self.hasher.clone();
        let (seed, verify) = (self.seed, self.verify);
        let circuit_id = artifacts.spec.id.clone();

        let job = tokio::task::spawn_blocking(move || {
            prove_blocking(&*toolchain, &hasher, &artifacts, witness, seed, verify)
        });
        match tokio::time::timeout(self.timeout, job).await {
            Err(_) => {
                // the blocking thread cannot be interrupted, its result is dropped
                Err(ProofError::ProverTimeout(self.timeout))
            }
            Ok(Err(join)) => Err(ProofError::ProverUnavailable(format!(
                "prover task for {} failed: {}",
                circuit_id, join
            ))),
            Ok(Ok(r)) => r,
        }
    }
}

fn prove_blocking<T: Toolchain, H: HashFunction>(
    toolchain: &T,
    hasher: &H,
    artifacts: &CircuitArtifacts,
    witness: Witness,
    seed: Option<u64>,
    verify: bool,
) -> Result<ProofObject, ProofError> {
    let spec = &artifacts.spec;
    let start = Instant::now();
    let trace = toolchain
        .compute_witness(spec, hasher, &witness)
        .map_err(ToolchainErr::into_prove_error)?;
    debug!(
        circuit = %spec.id,
        aux = trace.aux.len(),
        constraints = trace.num_constraints,
        "trace computed"
    );
    let public_inputs = trace.public_inputs().to_vec();
    drop(trace);

    let proof = toolchain
        .prove(&artifacts.params, spec, hasher, &witness, seed)
        .map_err(ToolchainErr::into_prove_error)?;
    drop(witness);

    if verify && groth16::verify_proof(&artifacts.pvk, &proof, &public_inputs).is_err() {
        // trace was satisfied, so the keys do not belong to this circuit
        return Err(ProofError::ConstraintViolation(format!(
            "proof does not verify against the {} verification key",
            spec.id
        )));
    }
    info!(circuit = %spec.id, elapsed = ?start.elapsed(), "proof generated");
    Ok(ProofObject {
        proof,
        public_inputs,
    })
}
