pub mod config;
pub mod cs;
pub mod encode;
pub mod engine;
pub mod error;
pub mod hash;
pub mod pipeline;
pub mod registry;
pub mod store;
pub mod toolchain;
pub mod witness;

pub use config::ProverConfig;
pub use encode::{DecodedResult, EncodedResult, ResultEncoder};
pub use engine::{ProofEngine, ProofObject};
pub use error::{DecodeErr, InputErr, ProofError, SetupErr, ToolchainErr};
pub use hash::{HashFunction, Mimc};
pub use pipeline::Pipeline;
pub use registry::{CircuitRegistry, CircuitSpec};
pub use store::{ArtifactStore, CircuitArtifacts};
pub use toolchain::{Groth16Toolchain, Toolchain};
pub use witness::{Preimage, Witness, WitnessBuilder};

use bellman::{
    Circuit, ConstraintSystem, LinearCombination, SynthesisError,
    gadgets::{boolean::AllocatedBit, num::AllocatedNum},
};
use bls12_381::Scalar;
use ff::Field;

/// Proves knowledge of `preimage` such that `H(preimage) == hash`.
///
/// Public inputs, in order: `[hash]`. A circuit without values (both `None`)
/// is the shape used for compilation and parameter generation.
#[derive(Clone)]
pub struct PreimageCircuit<H> {
    pub hasher: H,
    /// number of preimage elements
    pub arity: usize,
    /// bit width every preimage element is range checked to
    pub width: u32,
    /// private, wiped with the circuit
    pub preimage: Option<Preimage>,
    /// public
    pub hash: Option<Scalar>,
}

impl<H: HashFunction> PreimageCircuit<H> {
    pub fn shape(hasher: H, spec: &CircuitSpec) -> Self {
        Self {
            hasher,
            arity: spec.arity,
            width: spec.width,
            preimage: None,
            hash: None,
        }
    }

    pub fn with_witness(hasher: H, spec: &CircuitSpec, w: &Witness) -> Self {
        Self {
            hasher,
            arity: spec.arity,
            width: spec.width,
            preimage: Some(w.private.clone()),
            hash: Some(w.public),
        }
    }
}

impl<H: HashFunction> Circuit<Scalar> for PreimageCircuit<H> {
    fn synthesize<CS: ConstraintSystem<Scalar>>(self, cs: &mut CS) -> Result<(), SynthesisError> {
        // --------------------
        // 1. PUBLIC input first, its index is part of the on-chain contract
        // --------------------
        let hash = cs.alloc_input(
            || "hash",
            || self.hash.ok_or(SynthesisError::AssignmentMissing),
        )?;

        // --------------------
        // 2. private preimage, each element range checked
        // --------------------
        let mut elements = Vec::with_capacity(self.arity);
        for i in 0..self.arity {
            let value = self.preimage.as_ref().map(|p| p.values().get(i).copied());
            let value = match value {
                Some(Some(v)) => Some(v),
                Some(None) => return Err(SynthesisError::Unsatisfiable),
                None => None,
            };
            let x = AllocatedNum::alloc(cs.namespace(|| format!("preimage {}", i)), || {
                value
                    .map(Scalar::from)
                    .ok_or(SynthesisError::AssignmentMissing)
            })?;
            enforce_width(
                cs.namespace(|| format!("preimage {} width", i)),
                &x,
                value,
                self.width,
            )?;
            elements.push(x);
        }

        // --------------------
        // 3. H(preimage) == hash
        // --------------------
        let out = self.hasher.synthesize(cs.namespace(|| "hash"), &elements)?;
        cs.enforce(
            || "hash matches",
            |lc| lc + out.get_variable(),
            |lc| lc + CS::one(),
            |lc| lc + hash,
        );
        Ok(())
    }
}

/// x == sum(bit_i * 2^i) for `width` boolean bits
fn enforce_width<CS: ConstraintSystem<Scalar>>(
    mut cs: CS,
    x: &AllocatedNum<Scalar>,
    value: Option<u64>,
    width: u32,
) -> Result<(), SynthesisError> {
    let mut packed = LinearCombination::<Scalar>::zero();
    let mut coeff = Scalar::ONE;
    for i in 0..width {
        let bit = AllocatedBit::alloc(
            cs.namespace(|| format!("bit {}", i)),
            value.map(|v| (v >> i) & 1 == 1),
        )?;
        packed = packed + (coeff, bit.get_variable());
        coeff = coeff.double();
    }
    cs.enforce(
        || "packing",
        |_| packed,
        |lc| lc + CS::one(),
        |lc| lc + x.get_variable(),
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cs::{ShapeCounter, TraceAssembly};

    fn spec(arity: usize, width: u32) -> CircuitSpec {
        CircuitSpec::new("test", arity, width).unwrap()
    }

    fn circuit(preimage: Vec<u64>, hash: Scalar, width: u32) -> PreimageCircuit<Mimc> {
        PreimageCircuit {
            hasher: Mimc::with_rounds(4),
            arity: preimage.len(),
            width,
            preimage: Some(Preimage::new(preimage)),
            hash: Some(hash),
        }
    }

    #[test]
    fn test_public_input_layout() {
        let m = Mimc::with_rounds(4);
        let h = m.hash(&[Scalar::from(3), Scalar::from(7)]);
        let t = TraceAssembly::run(circuit(vec![3, 7], h, 64)).unwrap();
        assert_eq!(t.unsatisfied, None);
        assert_eq!(t.public_inputs(), &[h]);
    }

    #[test]
    fn test_shape_counts() {
        let s = ShapeCounter::run(PreimageCircuit::shape(Mimc::with_rounds(4), &spec(2, 8)))
            .unwrap();
        assert_eq!(s.num_inputs, 2);
        // per element: 8 booleanity + 1 packing + 2 per round; plus the final equality
        assert_eq!(s.num_constraints, 2 * (8 + 1 + 2 * 4) + 1);
    }

    #[test]
    fn test_wrong_hash_unsatisfied() {
        let t = TraceAssembly::run(circuit(vec![3, 7], Scalar::from(1), 64)).unwrap();
        assert_eq!(t.unsatisfied.as_deref(), Some("hash matches"));
    }

    #[test]
    fn test_too_wide_unsatisfied() {
        let m = Mimc::with_rounds(4);
        let h = m.hash(&[Scalar::from(300), Scalar::from(7)]);
        let t = TraceAssembly::run(circuit(vec![300, 7], h, 8)).unwrap();
        assert_eq!(t.unsatisfied.as_deref(), Some("preimage 0 width/packing"));
    }

    #[test]
    fn test_short_preimage_unsatisfiable() {
        let mut c = circuit(vec![3], Scalar::from(1), 64);
        c.arity = 2;
        assert!(matches!(
            TraceAssembly::run(c),
            Err(SynthesisError::Unsatisfiable)
        ));
    }
}
