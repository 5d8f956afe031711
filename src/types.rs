//! Core types for EPOCH work distribution
//!
//! Wire records exchanged with the GetWork server, the fixed-size work buffer
//! and hash types, and the result records handed back to callers.

use crate::{Error, Result};
use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Size in bytes of a miniblock hashing blob
pub const MINIBLOCK_SIZE: usize = 48;

/// Size in bytes of a proof-of-work hash
pub const POW_HASH_SIZE: usize = 32;

/// Number of trailing work bytes overwritten with fresh randomness per attempt
pub const RANDOM_TAIL_SIZE: usize = 12;

/// Block template pushed by the GetWork server
///
/// Replaced wholesale every time the server sends a new one. An empty
/// `job_id` means no job has been received yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobTemplate {
    #[serde(rename = "jobid")]
    pub job_id: String,
    #[serde(rename = "blocktemplate_blob", skip_serializing_if = "String::is_empty")]
    pub blocktemplate_blob: String,
    #[serde(rename = "blockhashing_blob", skip_serializing_if = "String::is_empty")]
    pub blockhashing_blob: String,
    pub difficulty: String,
    #[serde(rename = "difficultyuint64")]
    pub difficulty_u64: u64,
    pub height: u64,
    pub prev_hash: String,
    #[serde(rename = "epochmilli")]
    pub epoch_milli: u64,
    pub blocks: u64,
    pub miniblocks: u64,
    pub rejected: u64,
    #[serde(rename = "lasterror")]
    pub last_error: String,
    pub status: String,
}

impl JobTemplate {
    /// Whether a real job has been received
    pub fn is_ready(&self) -> bool {
        !self.job_id.is_empty()
    }
}

/// Miniblock submission written to the GetWork server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitParams {
    #[serde(rename = "jobid")]
    pub job_id: String,
    #[serde(rename = "miniblockhashing_blob")]
    pub miniblock_blob: String,
}

/// Fixed-size miniblock work buffer
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Work([u8; MINIBLOCK_SIZE]);

impl Work {
    /// Wrap raw work bytes
    pub fn new(bytes: [u8; MINIBLOCK_SIZE]) -> Self {
        Self(bytes)
    }

    /// Decode a hex hashing blob, rejecting anything that is not exactly
    /// `MINIBLOCK_SIZE` bytes
    pub fn from_hex(blob: &str) -> Result<Self> {
        let bytes = hex::decode(blob)
            .map_err(|e| Error::work(format!("block hashing blob could not be decoded: {}", e)))?;

        let bytes: [u8; MINIBLOCK_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            Error::work(format!(
                "block hashing blob has {} bytes, expected {}",
                bytes.len(),
                MINIBLOCK_SIZE
            ))
        })?;

        Ok(Self(bytes))
    }

    /// Lower-case hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Version marker carried in the low bits of the first byte
    pub fn version(&self) -> u8 {
        self.0[0] & 0x1f
    }

    pub fn as_bytes(&self) -> &[u8; MINIBLOCK_SIZE] {
        &self.0
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; MINIBLOCK_SIZE] {
        &mut self.0
    }
}

impl Default for Work {
    fn default() -> Self {
        Self([0u8; MINIBLOCK_SIZE])
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Work({})", self.to_hex())
    }
}

impl Serialize for Work {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Work {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match WireBytes::deserialize(deserializer)? {
            WireBytes::Hex(blob) => Work::from_hex(&blob).map_err(serde::de::Error::custom),
            bytes => bytes.into_array("epoch work").map(Self),
        }
    }
}

/// Byte field written either as a hex string or as an array of numbers
#[derive(Deserialize)]
#[serde(untagged)]
enum WireBytes {
    Hex(String),
    Array(Vec<u8>),
}

impl WireBytes {
    fn into_array<const N: usize, E: serde::de::Error>(
        self,
        field: &str,
    ) -> std::result::Result<[u8; N], E> {
        let bytes = match self {
            WireBytes::Hex(encoded) => hex::decode(&encoded).map_err(E::custom)?,
            WireBytes::Array(bytes) => bytes,
        };
        let len = bytes.len();
        bytes
            .try_into()
            .map_err(|_| E::custom(format!("{} has {} bytes, expected {}", field, len, N)))
    }
}

/// Proof-of-work hash of a work buffer
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PowHash(pub [u8; POW_HASH_SIZE]);

impl PowHash {
    pub fn as_bytes(&self) -> &[u8; POW_HASH_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PowHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PowHash({})", self.to_hex())
    }
}

impl Serialize for PowHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PowHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        WireBytes::deserialize(deserializer)?
            .into_array("pow hash")
            .map(Self)
    }
}

/// Integer block difficulty
///
/// Written as a decimal string; read from a string or a JSON number.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Difficulty(BigUint);

impl Difficulty {
    pub fn new(value: BigUint) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &BigUint {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<u64> for Difficulty {
    fn from(value: u64) -> Self {
        Self(BigUint::from(value))
    }
}

impl FromStr for Difficulty {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        BigUint::parse_bytes(s.trim().as_bytes(), 10)
            .map(Self)
            .ok_or_else(|| Error::work(format!("invalid difficulty {:?}", s)))
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Difficulty {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_str_radix(10))
    }
}

impl<'de> Deserialize<'de> for Difficulty {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Number(u64),
            Text(String),
        }

        match Wire::deserialize(deserializer)? {
            Wire::Number(value) => Ok(Self::from(value)),
            Wire::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// A hash computed ahead of time, ready for the submit step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecomputedHash {
    #[serde(rename = "jobTemplate")]
    pub job: JobTemplate,
    #[serde(rename = "powHash")]
    pub pow_hash: PowHash,
    #[serde(rename = "epochWork")]
    pub work: Work,
    #[serde(rename = "epochDifficulty")]
    pub difficulty: Difficulty,
}

/// Aggregate outcome of one attempt or submit call
///
/// Counts reflect work that actually ran, so they stay meaningful when
/// `error` is set and the batch stopped launching early.
#[derive(Debug, Default, Serialize)]
pub struct BatchResult {
    #[serde(rename = "epochHashes")]
    pub hashes: u64,
    #[serde(rename = "epochSubmitted")]
    pub submitted: u64,
    /// Elapsed wall time in milliseconds
    #[serde(rename = "epochDuration")]
    pub duration_ms: u64,
    #[serde(rename = "epochHashPerSecond", skip_serializing_if = "is_zero_rate")]
    pub hash_per_sec: f64,
    #[serde(
        rename = "epochError",
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub error: Option<Error>,
}

impl BatchResult {
    /// True when no task in the batch reported an error
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

fn is_zero_rate(rate: &f64) -> bool {
    *rate == 0.0
}

fn serialize_error<S: Serializer>(
    error: &Option<Error>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.serialize_some(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Running totals for the current connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(rename = "sessionHashes")]
    pub hashes: u64,
    #[serde(rename = "sessionMinis")]
    pub miniblocks: u64,
    #[serde(rename = "sessionVersion")]
    pub version: String,
}
