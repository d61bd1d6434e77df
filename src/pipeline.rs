use crate::config::ProverConfig;
use crate::encode::{EncodedResult, ResultEncoder};
use crate::engine::ProofEngine;
use crate::error::{InputErr, ProofError};
use crate::hash::{HashFunction, Mimc};
use crate::registry::CircuitRegistry;
use crate::store::{ArtifactStore, CircuitArtifacts};
use crate::toolchain::{Groth16Toolchain, Toolchain};
use crate::witness::{Preimage, WitnessBuilder};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

/// Entry point: preimage in, encoded `(bytes32, bytes)` out.
///
/// Holds no per-request state. Many `run` calls may be in flight at once, only
/// the first one for a circuit id waits on setup.
pub struct Pipeline<T, H = Mimc> {
    registry: CircuitRegistry,
    hasher: H,
    store: ArtifactStore<T, H>,
    engine: ProofEngine<T, H>,
}

impl Pipeline<Groth16Toolchain, Mimc> {
    pub fn groth16(config: &ProverConfig) -> Self {
        Self::new(
            config,
            CircuitRegistry::default(),
            Arc::new(Groth16Toolchain),
            Mimc::default(),
        )
    }
}

impl<T: Toolchain, H: HashFunction> Pipeline<T, H> {
    pub fn new(
        config: &ProverConfig,
        registry: CircuitRegistry,
        toolchain: Arc<T>,
        hasher: H,
    ) -> Self {
        let store = ArtifactStore::new(config, toolchain.clone(), hasher.clone());
        let engine = ProofEngine::new(toolchain, hasher.clone(), config.prove_timeout)
            .seed(config.proving_seed)
            .verify_after_prove(config.verify_after_prove);
        Self {
            registry,
            hasher,
            store,
            engine,
        }
    }

    pub fn store(&self) -> &ArtifactStore<T, H> {
        &self.store
    }

    pub fn registry(&self) -> &CircuitRegistry {
        &self.registry
    }

    /// validate → ensure artifacts → prove → encode, first failure wins.
    ///
    /// The input is validated before anything else so a malformed request
    /// never triggers setup or proving.
    #[instrument(skip(self, preimage))]
    pub async fn run(
        &self,
        circuit_id: &str,
        preimage: impl Into<Preimage>,
    ) -> Result<EncodedResult, ProofError> {
        let start = Instant::now();
        let spec = self.registry.get(circuit_id)?;
        let witness = WitnessBuilder::new(spec, &self.hasher).build(preimage.into())?;
        let hash = witness.public;

        let artifacts = self.store.ensure_ready(spec).await?;
        let proof = self.engine.prove(artifacts, witness).await?;
        let out = ResultEncoder::encode(&hash, &proof)?;
        info!(bytes = out.as_bytes().len(), elapsed = ?start.elapsed(), "request done");
        Ok(out)
    }

    /// Makes sure artifacts exist; `force` regenerates them.
    pub async fn setup(
        &self,
        circuit_id: &str,
        force: bool,
    ) -> Result<Arc<CircuitArtifacts>, ProofError> {
        let spec = self.registry.get(circuit_id)?;
        match force {
            true => self.store.regenerate(spec).await,
            false => self.store.ensure_ready(spec).await,
        }
    }

    /// Artifacts of an earlier setup. Never generates keys: a verifier must
    /// not end up trusting keys it minted itself.
    pub async fn artifacts(
        &self,
        circuit_id: &str,
    ) -> Result<Arc<CircuitArtifacts>, ProofError> {
        let spec = self.registry.get(circuit_id)?;
        self.store.open(spec).await
    }

    /// Verifies an encoded result against the circuit's verification key.
    pub async fn verify(&self, circuit_id: &str, encoded: &[u8]) -> Result<bool, ProofError> {
        let artifacts = self.artifacts(circuit_id).await?;
        artifacts
            .verify(encoded)
            .map_err(|e| InputErr::Malformed(e.to_string()).into())
    }
}
