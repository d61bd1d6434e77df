use crate::PreimageCircuit;
use crate::cs::{ShapeCounter, TraceAssembly};
use crate::error::ToolchainErr;
use crate::hash::HashFunction;
use crate::registry::CircuitSpec;
use crate::witness::Witness;
use bellman::groth16::{self, Parameters, Proof, VerifyingKey};
use bls12_381::Bls12;
use rand::SeedableRng;
use rand::rngs::{OsRng, StdRng};
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};

/// What compiling a circuit yields: enough to tell whether stored keys still
/// belong to the circuit the code would build today.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitShape {
    pub circuit_id: String,
    pub hash_id: String,
    pub arity: usize,
    pub width: u32,
    /// includes the constant one
    pub num_inputs: usize,
    pub num_aux: usize,
    pub num_constraints: usize,
}

/// The proving-system collaborators. Every call is blocking and CPU heavy;
/// callers run them off the async runtime and under a deadline.
pub trait Toolchain: Send + Sync + 'static {
    fn compile<H: HashFunction>(
        &self,
        spec: &CircuitSpec,
        hasher: &H,
    ) -> Result<CircuitShape, ToolchainErr>;

    /// `entropy` replaces OS randomness, e.g. for a reproducible dev ceremony.
    fn setup<H: HashFunction>(
        &self,
        spec: &CircuitSpec,
        hasher: &H,
        entropy: Option<[u8; 32]>,
    ) -> Result<Parameters<Bls12>, ToolchainErr>;

    fn export_key(&self, pk: &Parameters<Bls12>) -> Result<VerifyingKey<Bls12>, ToolchainErr>;

    /// Full assignment; fails when any constraint is unsatisfied or the
    /// public inputs differ from `[witness.public]`.
    fn compute_witness<H: HashFunction>(
        &self,
        spec: &CircuitSpec,
        hasher: &H,
        witness: &Witness,
    ) -> Result<TraceAssembly, ToolchainErr>;

    /// `seed` makes blinding deterministic. Never use it outside of tests:
    /// predictable blinding leaks the witness.
    fn prove<H: HashFunction>(
        &self,
        pk: &Parameters<Bls12>,
        spec: &CircuitSpec,
        hasher: &H,
        witness: &Witness,
        seed: Option<u64>,
    ) -> Result<Proof<Bls12>, ToolchainErr>;
}

/// bellman groth16 over BLS12-381.
#[derive(Clone, Copy, Debug, Default)]
pub struct Groth16Toolchain;

impl Toolchain for Groth16Toolchain {
    fn compile<H: HashFunction>(
        &self,
        spec: &CircuitSpec,
        hasher: &H,
    ) -> Result<CircuitShape, ToolchainErr> {
        let shape = ShapeCounter::run(PreimageCircuit::shape(hasher.clone(), spec))?;
        Ok(CircuitShape {
            circuit_id: spec.id.clone(),
            hash_id: hasher.id(),
            arity: spec.arity,
            width: spec.width,
            num_inputs: shape.num_inputs,
            num_aux: shape.num_aux,
            num_constraints: shape.num_constraints,
        })
    }

    fn setup<H: HashFunction>(
        &self,
        spec: &CircuitSpec,
        hasher: &H,
        entropy: Option<[u8; 32]>,
    ) -> Result<Parameters<Bls12>, ToolchainErr> {
        let c = PreimageCircuit::shape(hasher.clone(), spec);
        let params = match entropy {
            Some(seed) => {
                let mut rng = StdRng::from_seed(seed);
                groth16::generate_random_parameters::<Bls12, _, _>(c, &mut rng)?
            }
            None => groth16::generate_random_parameters::<Bls12, _, _>(c, &mut OsRng)?,
        };
        Ok(params)
    }

    fn export_key(&self, pk: &Parameters<Bls12>) -> Result<VerifyingKey<Bls12>, ToolchainErr> {
        Ok(pk.vk.clone())
    }

    fn compute_witness<H: HashFunction>(
        &self,
        spec: &CircuitSpec,
        hasher: &H,
        witness: &Witness,
    ) -> Result<TraceAssembly, ToolchainErr> {
        let trace =
            TraceAssembly::run(PreimageCircuit::with_witness(hasher.clone(), spec, witness))?;
        if let Some(path) = &trace.unsatisfied {
            return Err(ToolchainErr::Unsatisfied(path.clone()));
        }
        if trace.public_inputs() != [witness.public].as_slice() {
            return Err(ToolchainErr::PublicMismatch);
        }
        Ok(trace)
    }

    fn prove<H: HashFunction>(
        &self,
        pk: &Parameters<Bls12>,
        spec: &CircuitSpec,
        hasher: &H,
        witness: &Witness,
        seed: Option<u64>,
    ) -> Result<Proof<Bls12>, ToolchainErr> {
        let c = PreimageCircuit::with_witness(hasher.clone(), spec, witness);
        let proof = match seed {
            Some(seed) => {
                let mut rng = XorShiftRng::seed_from_u64(seed);
                groth16::create_random_proof(c, pk, &mut rng)?
            }
            None => groth16::create_random_proof(c, pk, &mut OsRng)?,
        };
        Ok(proof)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hash::Mimc;
    use crate::witness::{Preimage, WitnessBuilder};
    use assert_matches::assert_matches;
    use bls12_381::Scalar;

    fn small() -> (CircuitSpec, Mimc) {
        (CircuitSpec::new("small", 2, 16).unwrap(), Mimc::with_rounds(4))
    }

    #[test]
    fn test_compile_shape() {
        let (spec, m) = small();
        let shape = Groth16Toolchain.compile(&spec, &m).unwrap();
        assert_eq!(shape.num_inputs, 2);
        assert_eq!(shape.hash_id, "mimc-feistel-x3-r4");
        assert_eq!(shape.num_constraints, 2 * (16 + 1 + 2 * 4) + 1);
    }

    #[test]
    fn test_setup_prove_verify() {
        let (spec, m) = small();
        let t = Groth16Toolchain;
        let pk = t.setup(&spec, &m, Some([7; 32])).unwrap();
        let vk = t.export_key(&pk).unwrap();
        assert_eq!(vk.ic.len(), 2);
        let pvk = groth16::prepare_verifying_key(&vk);

        let w = WitnessBuilder::new(&spec, &m).build(vec![3u64, 7].into()).unwrap();
        let trace = t.compute_witness(&spec, &m, &w).unwrap();
        assert_eq!(trace.public_inputs(), &[w.public]);

        let proof = t.prove(&pk, &spec, &m, &w, None).unwrap();
        assert!(groth16::verify_proof(&pvk, &proof, &[w.public]).is_ok());
        // public input integrity
        let tampered = w.public + Scalar::from(1);
        assert!(groth16::verify_proof(&pvk, &proof, &[tampered]).is_err());
    }

    #[test]
    fn test_seeded_proving_is_deterministic() {
        let (spec, m) = small();
        let t = Groth16Toolchain;
        let pk = t.setup(&spec, &m, Some([1; 32])).unwrap();
        let w = WitnessBuilder::new(&spec, &m).build(vec![1u64, 2].into()).unwrap();
        let a = t.prove(&pk, &spec, &m, &w, Some(42)).unwrap();
        let b = t.prove(&pk, &spec, &m, &w, Some(42)).unwrap();
        assert!(a == b);
    }

    #[test]
    fn test_compute_witness_rejects_forged_hash() {
        let (spec, m) = small();
        let w = Witness {
            private: Preimage::new(vec![3, 7]),
            public: Scalar::from(99),
        };
        assert_matches!(
            Groth16Toolchain.compute_witness(&spec, &m, &w),
            Err(ToolchainErr::Unsatisfied(p)) if p == "hash matches"
        );
    }
}
