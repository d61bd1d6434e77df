use bellman::{ConstraintSystem, LinearCombination, SynthesisError, gadgets::num::AllocatedNum};
use blake2::{Blake2b512, Digest};
use bls12_381::Scalar;
use ff::Field;
use std::sync::Arc;

/// Rounds of the Feistel permutation, as in the MiMC paper for a ~255 bit field.
pub const MIMC_ROUNDS: usize = 322;
/// Domain tag the round constants are derived from. Changing it changes the hash.
pub const MIMC_DOMAIN: &[u8] = b"hashproof/mimc-feistel/v1";

/// Maps a preimage to the public field element bound into the proof.
///
/// `hash` and `synthesize` must agree bit for bit: the verifier only ever sees
/// the circuit's output, the caller only ever sees the native one.
pub trait HashFunction: Clone + Send + Sync + 'static {
    /// stable identifier, recorded next to the compiled circuit
    fn id(&self) -> String;
    fn hash(&self, preimage: &[Scalar]) -> Scalar;
    fn synthesize<CS: ConstraintSystem<Scalar>>(
        &self,
        cs: CS,
        preimage: &[AllocatedNum<Scalar>],
    ) -> Result<AllocatedNum<Scalar>, SynthesisError>;
}

/// MiMC in Feistel mode with exponent 3.
///
/// round i: `(xL, xR) <- ((xL + c_i)^3 + xR, xL)`, output `xL`.
///
/// The preimage is absorbed one element at a time:
/// `acc = 0; for x in preimage { acc = feistel(x, acc) }`.
///
/// `c_i` is the Blake2b-512 digest of `MIMC_DOMAIN || le32(i)` read as a
/// little endian integer and reduced into the scalar field.
#[derive(Clone, Debug)]
pub struct Mimc {
    constants: Arc<[Scalar]>,
}

impl Default for Mimc {
    fn default() -> Self {
        Self::with_rounds(MIMC_ROUNDS)
    }
}

impl Mimc {
    /// Anything other than [`MIMC_ROUNDS`] is a different hash, only useful for fast tests.
    pub fn with_rounds(rounds: usize) -> Self {
        let constants = (0..rounds as u32).map(round_constant).collect();
        Self { constants }
    }

    pub fn rounds(&self) -> usize {
        self.constants.len()
    }

    fn feistel(&self, mut xl: Scalar, mut xr: Scalar) -> Scalar {
        for c in self.constants.iter() {
            let t = xl + c;
            let next = t.square() * t + xr;
            xr = xl;
            xl = next;
        }
        xl
    }

    fn feistel_gadget<CS: ConstraintSystem<Scalar>>(
        &self,
        mut cs: CS,
        xl: &AllocatedNum<Scalar>,
        mut xr: LinearCombination<Scalar>,
        mut xr_value: Option<Scalar>,
    ) -> Result<AllocatedNum<Scalar>, SynthesisError> {
        let mut xl_lc = LinearCombination::zero() + xl.get_variable();
        let mut xl_value = xl.get_value();
        let mut out = None;

        for (i, c) in self.constants.iter().enumerate() {
            let cs = &mut cs.namespace(|| format!("round {}", i));

            // tmp = (xL + c)^2
            let tmp_value = xl_value.map(|x| (x + c).square());
            let tmp = cs.alloc(
                || "tmp",
                || tmp_value.ok_or(SynthesisError::AssignmentMissing),
            )?;
            cs.enforce(
                || "tmp = (xL + c)^2",
                |lc| lc + &xl_lc + (*c, CS::one()),
                |lc| lc + &xl_lc + (*c, CS::one()),
                |lc| lc + tmp,
            );

            // new_xL = tmp * (xL + c) + xR
            let new_value = match (xl_value, tmp_value, xr_value) {
                (Some(x), Some(t), Some(r)) => Some(t * (x + c) + r),
                _ => None,
            };
            let new_xl = AllocatedNum::alloc(cs.namespace(|| "new xL"), || {
                new_value.ok_or(SynthesisError::AssignmentMissing)
            })?;
            cs.enforce(
                || "new_xL = tmp * (xL + c) + xR",
                |lc| lc + tmp,
                |lc| lc + &xl_lc + (*c, CS::one()),
                |lc| lc + new_xl.get_variable() - &xr,
            );

            xr = xl_lc;
            xr_value = xl_value;
            xl_lc = LinearCombination::zero() + new_xl.get_variable();
            xl_value = new_value;
            out = Some(new_xl);
        }

        // zero rounds would make the hash the identity on xL
        out.ok_or(SynthesisError::Unsatisfiable)
    }
}

impl HashFunction for Mimc {
    fn id(&self) -> String {
        format!("mimc-feistel-x3-r{}", self.rounds())
    }

    fn hash(&self, preimage: &[Scalar]) -> Scalar {
        preimage
            .iter()
            .fold(Scalar::ZERO, |acc, x| self.feistel(*x, acc))
    }

    fn synthesize<CS: ConstraintSystem<Scalar>>(
        &self,
        mut cs: CS,
        preimage: &[AllocatedNum<Scalar>],
    ) -> Result<AllocatedNum<Scalar>, SynthesisError> {
        let mut acc_lc = LinearCombination::zero();
        let mut acc_value = Some(Scalar::ZERO);
        let mut out = None;
        for (i, x) in preimage.iter().enumerate() {
            let h = self.feistel_gadget(
                cs.namespace(|| format!("absorb {}", i)),
                x,
                acc_lc,
                acc_value,
            )?;
            acc_lc = LinearCombination::zero() + h.get_variable();
            acc_value = h.get_value();
            out = Some(h);
        }
        out.ok_or(SynthesisError::Unsatisfiable)
    }
}

fn round_constant(i: u32) -> Scalar {
    let mut hasher = Blake2b512::new();
    hasher.update(MIMC_DOMAIN);
    hasher.update(i.to_le_bytes());
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    Scalar::from_bytes_wide(&wide)
}

/// Big endian bytes32 of a field element, the form a contract reads as `uint256`.
pub fn to_bytes32(s: &Scalar) -> [u8; 32] {
    let mut be = s.to_bytes();
    be.reverse();
    be
}

/// Inverse of [`to_bytes32`]; `None` when the value is not below the modulus.
pub fn from_bytes32(be: &[u8; 32]) -> Option<Scalar> {
    let mut le = *be;
    le.reverse();
    Scalar::from_bytes(&le).into()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cs::TraceAssembly;
    use bellman::Circuit;

    fn fr(x: u64) -> Scalar {
        Scalar::from(x)
    }

    #[test]
    fn test_conformance_vector() {
        let h = Mimc::default().hash(&[fr(3), fr(7)]);
        assert_eq!(
            hex::encode(to_bytes32(&h)),
            "28fd3eb06f7a97a1a22de35780a064b589b56492850942780f976da3f391af7d"
        );
        let h = Mimc::default().hash(&[fr(123), fr(456)]);
        assert_eq!(
            hex::encode(to_bytes32(&h)),
            "54afd7c198339f95b9ef6b67b167768ec0ab88db6d9e4cdbe21037b90fdf18ef"
        );
    }

    #[test]
    fn test_first_round_constant() {
        assert_eq!(
            hex::encode(to_bytes32(&round_constant(0))),
            "3f5ef311d811286a6496cae540a791acd58d793715506683eab2a8c134475687"
        );
    }

    #[test]
    fn test_reduced_rounds_vector() {
        let h = Mimc::with_rounds(8).hash(&[fr(3), fr(7)]);
        assert_eq!(
            hex::encode(to_bytes32(&h)),
            "202c51dd6abb75524fd7ff9a82c35e5da7cc4bd0916ceae6a89cf5e2319643ad"
        );
    }

    #[test]
    fn test_deterministic_and_order_sensitive() {
        let m = Mimc::default();
        let a = m.hash(&[fr(3), fr(7)]);
        assert_eq!(a, Mimc::default().hash(&[fr(3), fr(7)]));
        assert_ne!(a, m.hash(&[fr(7), fr(3)]));
        assert_ne!(m.id(), Mimc::with_rounds(8).id());
    }

    struct HashOnly {
        m: Mimc,
        preimage: Vec<Scalar>,
    }

    impl Circuit<Scalar> for HashOnly {
        fn synthesize<CS: ConstraintSystem<Scalar>>(
            self,
            cs: &mut CS,
        ) -> Result<(), SynthesisError> {
            let mut nums = vec![];
            for (i, x) in self.preimage.iter().enumerate() {
                nums.push(AllocatedNum::alloc(cs.namespace(|| format!("x{}", i)), || {
                    Ok(*x)
                })?);
            }
            let h = self.m.synthesize(cs.namespace(|| "hash"), &nums)?;
            h.inputize(cs.namespace(|| "out"))
        }
    }

    #[test]
    fn test_gadget_matches_native() {
        let m = Mimc::with_rounds(16);
        let preimage = vec![fr(3), fr(7), fr(11)];
        let expected = m.hash(&preimage);

        let trace = TraceAssembly::run(HashOnly { m, preimage }).unwrap();
        assert_eq!(trace.unsatisfied, None);
        // index 0 is the constant one
        assert_eq!(trace.inputs, vec![Scalar::ONE, expected]);
        // two constraints per round plus the inputize equality
        assert_eq!(trace.num_constraints, 3 * 16 * 2 + 1);
    }

    #[test]
    fn test_bytes32_roundtrip_rejects_modulus() {
        let h = Mimc::default().hash(&[fr(1), fr(2)]);
        assert_eq!(from_bytes32(&to_bytes32(&h)), Some(h));
        assert_eq!(from_bytes32(&[0xff; 32]), None);
    }
}
