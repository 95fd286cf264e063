//! Accumulators for computed-value fields (checksums, CRCs, hashes).
//!
//! Each accumulator is fed the serialized octets of the range it covers
//! while the write walk emits them, then finalized into the value written
//! to the bound target field.

use crate::{schema::ComputedFunction, value::Value};
use sha2::Digest;

pub enum Accumulator {
    Checksum(u64),
    Xor(u8),
    Crc16(crc16::State<crc16::CCITT_FALSE>),
    Crc32(crc32fast::Hasher),
    Sha256(sha2::Sha256),
}

impl Accumulator {
    pub fn new(function: ComputedFunction) -> Self {
        match function {
            ComputedFunction::Checksum => Accumulator::Checksum(0),
            ComputedFunction::Xor => Accumulator::Xor(0),
            ComputedFunction::Crc16 => Accumulator::Crc16(crc16::State::new()),
            ComputedFunction::Crc32 => Accumulator::Crc32(crc32fast::Hasher::new()),
            ComputedFunction::Sha256 => Accumulator::Sha256(sha2::Sha256::new()),
        }
    }

    pub fn function(&self) -> ComputedFunction {
        match self {
            Accumulator::Checksum(_) => ComputedFunction::Checksum,
            Accumulator::Xor(_) => ComputedFunction::Xor,
            Accumulator::Crc16(_) => ComputedFunction::Crc16,
            Accumulator::Crc32(_) => ComputedFunction::Crc32,
            Accumulator::Sha256(_) => ComputedFunction::Sha256,
        }
    }

    pub fn reset(&mut self) {
        *self = Accumulator::new(self.function());
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            Accumulator::Checksum(sum) => {
                for b in bytes {
                    *sum = sum.wrapping_add(u64::from(*b));
                }
            }
            Accumulator::Xor(acc) => {
                for b in bytes {
                    *acc ^= *b;
                }
            }
            Accumulator::Crc16(state) => state.update(bytes),
            Accumulator::Crc32(hasher) => hasher.update(bytes),
            Accumulator::Sha256(hasher) => hasher.update(bytes),
        }
    }

    pub fn finalize(&self) -> Value {
        match self {
            Accumulator::Checksum(sum) => Value::UInt(*sum),
            Accumulator::Xor(acc) => Value::UInt(u64::from(*acc)),
            Accumulator::Crc16(state) => Value::UInt(u64::from(state.get())),
            Accumulator::Crc32(hasher) => Value::UInt(u64::from(hasher.clone().finalize())),
            Accumulator::Sha256(hasher) => Value::Bytes(hasher.clone().finalize().to_vec()),
        }
    }
}

impl std::fmt::Debug for Accumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Accumulator({:?})", self.function())
    }
}
