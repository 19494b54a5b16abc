//! Portable hash contract behind every "random" choice the engine makes.
//!
//! All ranking and sampling is derived from the functions below, specified
//! bit-exactly over wrapping `u64` arithmetic so any implementation in any
//! language reproduces the same selections. Changing any constant or step is a
//! contract change and must bump [`HASH_CONTRACT_VERSION`].
//!
//! ```text
//! mix64(x):        x = (x ^ (x >> 30)) * 0xBF58_476D_1CE4_E5B9
//!                  x = (x ^ (x >> 27)) * 0x94D0_49BB_1331_11EB
//!                  x ^ (x >> 31)
//! fnv1a64(bytes):  h = 0xCBF2_9CE4_8422_2325; for b in bytes { h = (h ^ b) * 0x100_0000_01B3 }
//! year_seed(s, y)          = mix64(s ^ GOLDEN * (y + 1))
//! rank_key(s, y, id)       = mix64(year_seed(s, y) ^ fnv1a64(utf8(id)))
//! sequence_key(s, y, n)    = mix64(year_seed(s, y) ^ mix64(n ^ COHORT_SALT))
//! stream_key(k, stream)    = mix64(k ^ GOLDEN * (stream + 1))
//! ```

use contracts::{GroupKey, PopulationRecord, RecordStatus};

pub const HASH_CONTRACT_VERSION: u32 = 1;

pub const GOLDEN: u64 = 0x9E37_79B9_7F4A_7C15;
pub const COHORT_SALT: u64 = 0xC0FF_EE0D_DBA1_1A5E;

/// Seed stream for promotion ranking, kept apart from termination ranking.
pub const PROMOTION_STREAM: u64 = 0x5052_4F4D;

const STREAM_AGE: u64 = 1;
const STREAM_COMPENSATION: u64 = 2;

const FNV_OFFSET: u64 = 0xCBF2_9CE4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

pub fn mix64(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

pub fn year_seed(seed: u64, year: u32) -> u64 {
    mix64(seed ^ GOLDEN.wrapping_mul(u64::from(year).wrapping_add(1)))
}

pub fn rank_key(seed: u64, year: u32, record_id: &str) -> u64 {
    mix64(year_seed(seed, year) ^ fnv1a64(record_id.as_bytes()))
}

pub fn sequence_key(seed: u64, year: u32, sequence: u64) -> u64 {
    mix64(year_seed(seed, year) ^ mix64(sequence ^ COHORT_SALT))
}

pub fn stream_key(key: u64, stream: u64) -> u64 {
    mix64(key ^ GOLDEN.wrapping_mul(stream.wrapping_add(1)))
}

/// Uniform draw in `[0, 1)` built from the top 53 bits of the stream key.
pub fn sample_unit(key: u64, stream: u64) -> f64 {
    (stream_key(key, stream) >> 11) as f64 / (1_u64 << 53) as f64
}

/// Uniform integer in `[min, max]` (inclusive).
pub fn sample_range_u32(key: u64, stream: u64, min: u32, max: u32) -> u32 {
    if max <= min {
        return min;
    }
    let span = u64::from(max - min) + 1;
    min + (stream_key(key, stream) % span) as u32
}

pub fn sample_age(key: u64, min: u32, max: u32) -> u32 {
    sample_range_u32(key, STREAM_AGE, min, max)
}

/// Compensation in `[min, max]`, rounded to cents.
pub fn sample_compensation(key: u64, min: f64, max: f64) -> f64 {
    let raw = min + sample_unit(key, STREAM_COMPENSATION) * (max - min);
    ((raw * 100.0).round() / 100.0).clamp(min, max)
}

pub fn hash_hex(value: u64) -> String {
    format!("{value:016x}")
}

pub fn is_hash_hex(value: &str) -> bool {
    value.len() == 16 && value.bytes().all(|byte| matches!(byte, b'0'..=b'9' | b'a'..=b'f'))
}

/// Incremental fnv1a64 over typed fields; used for snapshot and input fingerprints.
#[derive(Debug, Clone, Copy)]
pub struct Fingerprint(u64);

impl Default for Fingerprint {
    fn default() -> Self {
        Self(FNV_OFFSET)
    }
}

impl Fingerprint {
    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        for byte in bytes {
            self.0 ^= u64::from(*byte);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
        self
    }

    pub fn str(self, value: &str) -> Self {
        self.u64(value.len() as u64).bytes(value.as_bytes())
    }

    pub fn u64(self, value: u64) -> Self {
        self.bytes(&value.to_le_bytes())
    }

    pub fn u32(self, value: u32) -> Self {
        self.bytes(&value.to_le_bytes())
    }

    pub fn f64(self, value: f64) -> Self {
        self.u64(value.to_bits())
    }

    pub fn group(self, group: GroupKey) -> Self {
        self.bytes(&group.to_le_bytes())
    }

    pub fn record(self, record: &PopulationRecord) -> Self {
        let status = match record.status {
            RecordStatus::Active => 0_u32,
            RecordStatus::Terminated => 1_u32,
        };
        self.str(&record.record_id)
            .group(record.group_key)
            .u32(record.age)
            .u32(record.tenure_years)
            .f64(record.compensation)
            .u32(status)
            .u32(record.hire_year)
            .u64(record.termination_year.map(u64::from).unwrap_or(u64::MAX))
    }

    pub fn finish(self) -> u64 {
        mix64(self.0)
    }
}

pub fn records_fingerprint(records: &[PopulationRecord]) -> u64 {
    records
        .iter()
        .fold(Fingerprint::default().u64(records.len() as u64), |fp, record| {
            fp.record(record)
        })
        .finish()
}
