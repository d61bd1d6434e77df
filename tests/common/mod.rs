#![allow(dead_code)]

use bellman::groth16::{Parameters, Proof, VerifyingKey};
use bls12_381::Bls12;
use hashproof::cs::TraceAssembly;
use hashproof::toolchain::CircuitShape;
use hashproof::{
    CircuitRegistry, CircuitSpec, Groth16Toolchain, HashFunction, Mimc, Pipeline, ProverConfig,
    Toolchain, ToolchainErr, Witness,
};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const SMALL: &str = "small_v1";

pub fn spec() -> CircuitSpec {
    CircuitSpec::new(SMALL, 2, 16).unwrap()
}

pub fn hasher() -> Mimc {
    Mimc::with_rounds(4)
}

/// What `prove` does besides proving.
#[derive(Clone, Copy, Debug)]
pub enum Fault {
    None,
    Slow(Duration),
    Crash,
    Panic,
}

/// Real groth16 underneath, with call counters and injected failures.
pub struct CountingToolchain {
    inner: Groth16Toolchain,
    pub compiles: AtomicUsize,
    pub setups: AtomicUsize,
    pub witnesses: AtomicUsize,
    pub proves: AtomicUsize,
    /// this many setup calls fail before one succeeds
    failing_setups: AtomicUsize,
    fault: Fault,
}

impl CountingToolchain {
    pub fn new() -> Self {
        Self::with_fault(Fault::None)
    }

    pub fn with_fault(fault: Fault) -> Self {
        Self {
            inner: Groth16Toolchain,
            compiles: AtomicUsize::new(0),
            setups: AtomicUsize::new(0),
            witnesses: AtomicUsize::new(0),
            proves: AtomicUsize::new(0),
            failing_setups: AtomicUsize::new(0),
            fault,
        }
    }

    pub fn failing_setups(self, n: usize) -> Self {
        self.failing_setups.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> (usize, usize, usize, usize) {
        (
            self.compiles.load(Ordering::SeqCst),
            self.setups.load(Ordering::SeqCst),
            self.witnesses.load(Ordering::SeqCst),
            self.proves.load(Ordering::SeqCst),
        )
    }
}

impl Toolchain for CountingToolchain {
    fn compile<H: HashFunction>(
        &self,
        spec: &CircuitSpec,
        hasher: &H,
    ) -> Result<CircuitShape, ToolchainErr> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        self.inner.compile(spec, hasher)
    }

    fn setup<H: HashFunction>(
        &self,
        spec: &CircuitSpec,
        hasher: &H,
        entropy: Option<[u8; 32]>,
    ) -> Result<Parameters<Bls12>, ToolchainErr> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_setups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ToolchainErr::Crashed("injected setup failure".to_string()));
        }
        self.inner.setup(spec, hasher, entropy)
    }

    fn export_key(&self, pk: &Parameters<Bls12>) -> Result<VerifyingKey<Bls12>, ToolchainErr> {
        self.inner.export_key(pk)
    }

    fn compute_witness<H: HashFunction>(
        &self,
        spec: &CircuitSpec,
        hasher: &H,
        witness: &Witness,
    ) -> Result<TraceAssembly, ToolchainErr> {
        self.witnesses.fetch_add(1, Ordering::SeqCst);
        self.inner.compute_witness(spec, hasher, witness)
    }

    fn prove<H: HashFunction>(
        &self,
        pk: &Parameters<Bls12>,
        spec: &CircuitSpec,
        hasher: &H,
        witness: &Witness,
        seed: Option<u64>,
    ) -> Result<Proof<Bls12>, ToolchainErr> {
        self.proves.fetch_add(1, Ordering::SeqCst);
        match self.fault {
            Fault::None => {}
            Fault::Slow(d) => std::thread::sleep(d),
            Fault::Crash => return Err(ToolchainErr::Crashed("prover exited".to_string())),
            Fault::Panic => panic!("prover panicked"),
        }
        self.inner.prove(pk, spec, hasher, witness, seed)
    }
}

pub fn pipeline(
    config: &ProverConfig,
    toolchain: Arc<CountingToolchain>,
) -> Pipeline<CountingToolchain> {
    Pipeline::new(
        config,
        CircuitRegistry::empty().with(spec()),
        toolchain,
        hasher(),
    )
}

pub fn config(root: &Path) -> ProverConfig {
    ProverConfig::new(root)
}
