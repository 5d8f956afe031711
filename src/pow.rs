//! Proof-of-work hashing seam
//!
//! The engine treats the hash function as an opaque one-way function behind
//! [`PowHasher`]. This module also prepares work buffers from job templates
//! and provides the integer difficulty comparator.

use crate::types::{
    Difficulty, JobTemplate, PowHash, PrecomputedHash, Work, MINIBLOCK_SIZE, RANDOM_TAIL_SIZE,
};
use crate::{Error, Result};
use blake2::{Blake2s256, Digest};
use num_bigint::BigUint;
use num_traits::One;
use rand::RngCore;

/// Work buffer version understood by this client
pub const WORK_VERSION: u8 = 1;

/// Proof-of-work hash function and target comparator
pub trait PowHasher: Send + Sync {
    /// Compute the proof-of-work hash of a work buffer
    fn hash(&self, work: &Work) -> PowHash;

    /// Check a hash against an integer difficulty
    fn meets_difficulty(&self, hash: &PowHash, difficulty: &Difficulty) -> bool {
        meets_difficulty(hash, difficulty)
    }
}

/// Blake2s-256 hasher
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake2sPow;

impl PowHasher for Blake2sPow {
    fn hash(&self, work: &Work) -> PowHash {
        let digest = Blake2s256::digest(work.as_bytes());
        PowHash(digest.into())
    }
}

/// Check whether `hash`, read as a little-endian integer, is at or below
/// `2^256 / difficulty`. A zero difficulty never passes.
pub fn meets_difficulty(hash: &PowHash, difficulty: &Difficulty) -> bool {
    if difficulty.is_zero() {
        return false;
    }

    let target = (BigUint::one() << 256usize) / difficulty.value();
    BigUint::from_bytes_le(hash.as_bytes()) <= target
}

/// Decode a job's hashing blob into a fresh work buffer
///
/// The tail of the buffer is overwritten with random bytes so concurrent
/// attempts against the same template hash different inputs.
pub fn prepare_work(job: &JobTemplate) -> Result<(Work, Difficulty)> {
    let mut work = Work::from_hex(&job.blockhashing_blob)?;

    if work.as_bytes()[0] & 0x0f != WORK_VERSION {
        return Err(Error::work(format!(
            "unknown version, please check for updates {}",
            work.version()
        )));
    }

    let difficulty: Difficulty = job.difficulty.parse()?;

    let mut random = [0u8; RANDOM_TAIL_SIZE];
    rand::rng().fill_bytes(&mut random);

    let bytes = work.as_bytes_mut();
    bytes[MINIBLOCK_SIZE - RANDOM_TAIL_SIZE..].copy_from_slice(&random);
    bytes[MINIBLOCK_SIZE - 1] = 1;

    Ok((work, difficulty))
}

/// Run one hash attempt against `job`
pub fn compute(job: JobTemplate, hasher: &dyn PowHasher) -> Result<PrecomputedHash> {
    let (work, difficulty) = prepare_work(&job)?;
    let pow_hash = hasher.hash(&work);

    Ok(PrecomputedHash {
        job,
        pow_hash,
        work,
        difficulty,
    })
}
