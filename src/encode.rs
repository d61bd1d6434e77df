//! Byte layout shared with the verifier contract. Every offset and width here
//! is part of that contract; none of it is free to change.
//!
//! outer:   `abi.encode(bytes32 publicHash, bytes proof)`
//! `proof`: `abi.encode(ProofPayload)`
//!
//! Curve points use the EIP-2537 layout: every base field element takes 64
//! bytes, 16 zero bytes then 48 big endian bytes. G1 is `x | y` (128 bytes),
//! G2 is `x.c0 | x.c1 | y.c0 | y.c1` (256 bytes), the identity is all zeros.
//! Scalars are big endian `uint256`.

use crate::engine::ProofObject;
use crate::error::{DecodeErr, ProofError};
use crate::hash::{from_bytes32, to_bytes32};
use alloy_primitives::{Bytes, FixedBytes, U256};
use alloy_sol_types::{SolType, sol, sol_data};
use bellman::groth16::{self, PreparedVerifyingKey, Proof, VerifyingKey};
use bls12_381::{Bls12, G1Affine, G2Affine, Scalar};
use serde::{Deserialize, Serialize};

pub const PROTOCOL: &[u8] = b"groth16";
pub const G1_LEN: usize = 128;
pub const G2_LEN: usize = 256;

const FP_LEN: usize = 48;
const FP_PAD: usize = 16;
/// zcash serialization flags live in the top three bits of the first byte
const FLAGS: u8 = 0xe0;
const INFINITY: u8 = 0x40;

sol! {
    #[derive(Debug)]
    struct ProofPayload {
        bytes32 protocol;
        bytes a;
        bytes b;
        bytes c;
        uint256[] publicInputs;
    }
}

/// `(bytes32, bytes)` as a parameter list, no leading offset word
type ResultAbi = (sol_data::FixedBytes<32>, sol_data::Bytes);

fn protocol_tag() -> FixedBytes<32> {
    let mut tag = [0u8; 32];
    tag[..PROTOCOL.len()].copy_from_slice(PROTOCOL);
    FixedBytes(tag)
}

/// the only externally visible output
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedResult(Vec<u8>);

impl EncodedResult {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
    /// the leading bytes32
    pub fn public_hash(&self) -> [u8; 32] {
        let mut h = [0u8; 32];
        h.copy_from_slice(&self.0[..32]);
        h
    }
}

impl AsRef<[u8]> for EncodedResult {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug)]
pub struct DecodedResult {
    pub public_hash: Scalar,
    pub proof: Proof<Bls12>,
    pub public_inputs: Vec<Scalar>,
}

pub struct ResultEncoder;

impl ResultEncoder {
    pub fn encode(hash: &Scalar, proof: &ProofObject) -> Result<EncodedResult, ProofError> {
        if proof.public_inputs.first() != Some(hash) {
            return Err(ProofError::EncodingFailure(
                "public input 0 is not the public hash".to_string(),
            ));
        }
        let payload = ProofPayload {
            protocol: protocol_tag(),
            a: Bytes::from(g1_to_bytes(&proof.proof.a).to_vec()),
            b: Bytes::from(g2_to_bytes(&proof.proof.b).to_vec()),
            c: Bytes::from(g1_to_bytes(&proof.proof.c).to_vec()),
            publicInputs: proof
                .public_inputs
                .iter()
                .map(|s| U256::from_be_bytes(to_bytes32(s)))
                .collect(),
        };
        let payload = ProofPayload::abi_encode(&payload);
        let out = ResultAbi::abi_encode_params(&(
            FixedBytes(to_bytes32(hash)),
            Bytes::from(payload),
        ));
        Ok(EncodedResult(out))
    }

    pub fn decode(bytes: &[u8]) -> Result<DecodedResult, DecodeErr> {
        let (hash, payload) = ResultAbi::abi_decode_params(bytes)?;
        let public_hash = from_bytes32(&hash.0).ok_or(DecodeErr::Scalar)?;

        let p = ProofPayload::abi_decode(&payload)?;
        if p.protocol != protocol_tag() {
            return Err(DecodeErr::Protocol(hex::encode(p.protocol.0)));
        }
        let proof = Proof {
            a: g1_from_bytes(&p.a).ok_or(DecodeErr::Point("a"))?,
            b: g2_from_bytes(&p.b).ok_or(DecodeErr::Point("b"))?,
            c: g1_from_bytes(&p.c).ok_or(DecodeErr::Point("c"))?,
        };
        let public_inputs = p
            .publicInputs
            .iter()
            .map(|x| from_bytes32(&x.to_be_bytes::<32>()).ok_or(DecodeErr::Scalar))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DecodedResult {
            public_hash,
            proof,
            public_inputs,
        })
    }

    /// What the contract does with a submitted result: the proof has to carry
    /// exactly `[publicHash]` and verify under `pvk`.
    pub fn verify(pvk: &PreparedVerifyingKey<Bls12>, bytes: &[u8]) -> Result<bool, DecodeErr> {
        let d = Self::decode(bytes)?;
        if d.public_inputs.is_empty() {
            return Err(DecodeErr::NoPublicInputs);
        }
        if d.public_inputs != [d.public_hash] {
            return Ok(false);
        }
        Ok(groth16::verify_proof(pvk, &d.proof, &d.public_inputs).is_ok())
    }
}

pub fn g1_to_bytes(p: &G1Affine) -> [u8; G1_LEN] {
    let mut raw = p.to_uncompressed();
    raw[0] &= !FLAGS;
    let mut out = [0u8; G1_LEN];
    out[FP_PAD..64].copy_from_slice(&raw[..FP_LEN]);
    out[64 + FP_PAD..].copy_from_slice(&raw[FP_LEN..]);
    out
}

pub fn g1_from_bytes(b: &[u8]) -> Option<G1Affine> {
    if b.len() != G1_LEN || !padding_ok(b) {
        return None;
    }
    let mut raw = [0u8; 2 * FP_LEN];
    raw[..FP_LEN].copy_from_slice(&b[FP_PAD..64]);
    raw[FP_LEN..].copy_from_slice(&b[64 + FP_PAD..]);
    set_flags(&mut raw)?;
    G1Affine::from_uncompressed(&raw).into()
}

/// (eip-2537 slot, offset in the zcash encoding which is `x.c1 | x.c0 | y.c1 | y.c0`)
const G2_SLOTS: [(usize, usize); 4] = [(0, 48), (1, 0), (2, 144), (3, 96)];

pub fn g2_to_bytes(p: &G2Affine) -> [u8; G2_LEN] {
    let mut raw = p.to_uncompressed();
    raw[0] &= !FLAGS;
    let mut out = [0u8; G2_LEN];
    for (slot, off) in G2_SLOTS {
        out[slot * 64 + FP_PAD..(slot + 1) * 64].copy_from_slice(&raw[off..off + FP_LEN]);
    }
    out
}

pub fn g2_from_bytes(b: &[u8]) -> Option<G2Affine> {
    if b.len() != G2_LEN || !padding_ok(b) {
        return None;
    }
    let mut raw = [0u8; 4 * FP_LEN];
    for (slot, off) in G2_SLOTS {
        raw[off..off + FP_LEN].copy_from_slice(&b[slot * 64 + FP_PAD..(slot + 1) * 64]);
    }
    set_flags(&mut raw)?;
    G2Affine::from_uncompressed(&raw).into()
}

fn padding_ok(b: &[u8]) -> bool {
    b.chunks(64).all(|w| w[..FP_PAD].iter().all(|x| *x == 0))
}

/// all zeros is the identity; anything else must not carry flag bits
fn set_flags(raw: &mut [u8]) -> Option<()> {
    if raw.iter().all(|x| *x == 0) {
        raw[0] = INFINITY;
        return Some(());
    }
    (raw[0] & FLAGS == 0).then_some(())
}

/// Verification key in the form the verifier contract's constructor takes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationKeyJson {
    pub protocol: String,
    pub curve: String,
    pub alpha1: String,
    pub beta2: String,
    pub gamma2: String,
    pub delta2: String,
    #[serde(rename = "IC")]
    pub ic: Vec<String>,
}

impl VerificationKeyJson {
    pub fn from_vk(vk: &VerifyingKey<Bls12>) -> Self {
        let g1 = |p: &G1Affine| format!("0x{}", hex::encode(g1_to_bytes(p)));
        let g2 = |p: &G2Affine| format!("0x{}", hex::encode(g2_to_bytes(p)));
        Self {
            protocol: "groth16".to_string(),
            curve: "bls12381".to_string(),
            alpha1: g1(&vk.alpha_g1),
            beta2: g2(&vk.beta_g2),
            gamma2: g2(&vk.gamma_g2),
            delta2: g2(&vk.delta_g2),
            ic: vk.ic.iter().map(g1).collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use bls12_381::{G1Projective, G2Projective};

    fn fake_proof(hash: Scalar) -> ProofObject {
        let k = Scalar::from(5);
        ProofObject {
            proof: Proof {
                a: G1Affine::from(G1Projective::generator() * k),
                b: G2Affine::from(G2Projective::generator() * k),
                c: G1Affine::identity(),
            },
            public_inputs: vec![hash],
        }
    }

    #[test]
    fn test_point_codec() {
        let g = G1Affine::generator();
        let b = g1_to_bytes(&g);
        assert_eq!(&b[..FP_PAD], &[0u8; FP_PAD]);
        assert_eq!(g1_from_bytes(&b), Some(g));
        assert_eq!(g1_to_bytes(&G1Affine::identity()), [0u8; G1_LEN]);
        assert_eq!(g1_from_bytes(&[0u8; G1_LEN]), Some(G1Affine::identity()));

        let h = G2Affine::generator();
        assert_eq!(g2_from_bytes(&g2_to_bytes(&h)), Some(h));
        assert_eq!(g2_from_bytes(&[0u8; G2_LEN]), Some(G2Affine::identity()));
    }

    #[test]
    fn test_g2_coordinate_order() {
        // x.c0 of the generator, the first coordinate in eip-2537 order
        let b = g2_to_bytes(&G2Affine::generator());
        assert_eq!(
            hex::encode(&b[FP_PAD..64]),
            "024aa2b2f08f0a91260805272dc51051c6e47ad4fa403b02b4510b647ae3d1770bac0326a805bbefd48056c8c121bdb8"
        );
    }

    #[test]
    fn test_point_codec_rejects() {
        let mut b = g1_to_bytes(&G1Affine::generator());
        b[0] = 1;
        assert_eq!(g1_from_bytes(&b), None);
        let mut b = g1_to_bytes(&G1Affine::generator());
        b[127] ^= 1;
        assert_eq!(g1_from_bytes(&b), None);
        assert_eq!(g1_from_bytes(&[0u8; 96]), None);
    }

    #[test]
    fn test_nonzero_padding_rejected() {
        // the last pad byte of every 64 byte word, x and y alike
        for word in 0..2 {
            let mut b = g1_to_bytes(&G1Affine::generator());
            b[word * 64 + FP_PAD - 1] = 0x80;
            assert_eq!(g1_from_bytes(&b), None, "g1 word {}", word);
        }
        for word in 0..4 {
            let mut b = g2_to_bytes(&G2Affine::generator());
            b[word * 64 + FP_PAD - 1] = 1;
            assert_eq!(g2_from_bytes(&b), None, "g2 word {}", word);
        }
        // padding alone does not make the identity
        let mut b = [0u8; G1_LEN];
        b[64] = 1;
        assert_eq!(g1_from_bytes(&b), None);
    }

    #[test]
    fn test_outer_layout() {
        let hash = Scalar::from(0xabcd);
        let enc = ResultEncoder::encode(&hash, &fake_proof(hash)).unwrap();
        let b = enc.as_bytes();
        assert_eq!(enc.public_hash(), to_bytes32(&hash));
        // offset of the dynamic `bytes` argument
        assert_eq!(U256::from_be_slice(&b[32..64]), U256::from(64u64));
        let len = U256::from_be_slice(&b[64..96]).to::<usize>();
        assert_eq!(b.len(), 96 + len.div_ceil(32) * 32);

        let payload = &b[96..96 + len];
        // abi.encode of a dynamic struct starts with its offset
        assert_eq!(U256::from_be_slice(&payload[..32]), U256::from(32u64));
        assert_eq!(&payload[32..32 + PROTOCOL.len()], PROTOCOL);
    }

    #[test]
    fn test_decode_inverse() {
        let hash = Scalar::from(77);
        let p = fake_proof(hash);
        let enc = ResultEncoder::encode(&hash, &p).unwrap();
        let d = ResultEncoder::decode(enc.as_bytes()).unwrap();
        assert_eq!(d.public_hash, hash);
        assert_eq!(d.public_inputs, vec![hash]);
        assert!(d.proof == p.proof);
    }

    #[test]
    fn test_encode_rejects_mismatched_inputs() {
        let p = fake_proof(Scalar::from(1));
        assert_matches!(
            ResultEncoder::encode(&Scalar::from(2), &p),
            Err(ProofError::EncodingFailure(_))
        );
    }

    #[test]
    fn test_decode_rejects() {
        assert_matches!(ResultEncoder::decode(&[0u8; 10]), Err(DecodeErr::Abi(_)));

        let hash = Scalar::from(3);
        let mut b = ResultEncoder::encode(&hash, &fake_proof(hash))
            .unwrap()
            .into_vec();
        // public hash above the modulus
        b[..32].copy_from_slice(&[0xff; 32]);
        assert_matches!(ResultEncoder::decode(&b), Err(DecodeErr::Scalar));

        let mut b = ResultEncoder::encode(&hash, &fake_proof(hash))
            .unwrap()
            .into_vec();
        // protocol tag, after outer head (96) and the payload offset word (32)
        b[128] = b'x';
        assert_matches!(ResultEncoder::decode(&b), Err(DecodeErr::Protocol(_)));
    }
}
