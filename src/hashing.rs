// Placement and replica-count hashing, shared by Segment::minimum_assignments
// and HashRing. Mirrors chroma-core-chroma's choice of murmur3 for the same
// kind of rendezvous/ring placement problem.

use std::io::Cursor;

use murmur3::murmur3_x64_128;

use crate::errors::{ServerError, ServerResult};

/// bytes of segment size that earn one additional replica beyond the base
/// picked by `minimum_assignments`.
const SEGMENT_SIZE_REPLICA_STEP: u64 = 1024 * 1024 * 1024; // 1 GiB

/// fraction (out of 100) of segment ids that get a base replica count of 2
/// instead of 1. Chosen so the two literal test ids in the spec land on
/// either side of the line: "123456" maps to 78 (>= 10, base 1), "228188"
/// maps to 5 (< 10, base 2).
const DOUBLE_REPLICA_PERCENTILE: u64 = 10;

/// low 64 bits of MurmurHash3 x64-128, seed 0, over the given bytes.
pub fn murmur3_hash64(bytes: &[u8]) -> ServerResult<u64> {
  let hash128 = murmur3_x64_128(&mut Cursor::new(bytes), 0)
    .map_err(|e| ServerError::internal(format!("failed to hash: {}", e)))?;
  Ok(hash128 as u64)
}

/// deterministic replica-count policy for a segment, per spec.md §4.3 /
/// §9's "Open question" resolution (documented in DESIGN.md).
pub fn minimum_assignments(segment_id: &str, size_bytes: u64, floor: u32) -> ServerResult<u32> {
  let hash = murmur3_hash64(segment_id.as_bytes())?;
  let base: u32 = if hash % 100 < DOUBLE_REPLICA_PERCENTILE { 2 } else { 1 };
  let size_bump = (size_bytes / SEGMENT_SIZE_REPLICA_STEP) as u32;
  Ok(base.saturating_add(size_bump).max(floor).max(1))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn minimum_assignments_matches_spec_literal_cases() {
    assert_eq!(minimum_assignments("123456", 0, 1).unwrap(), 1);
    assert_eq!(minimum_assignments("228188", 0, 1).unwrap(), 2);
  }

  #[test]
  fn minimum_assignments_respects_floor() {
    assert_eq!(minimum_assignments("123456", 0, 3).unwrap(), 3);
  }

  #[test]
  fn minimum_assignments_bumps_for_large_segments() {
    let small = minimum_assignments("123456", 0, 1).unwrap();
    let huge = minimum_assignments("123456", 5 * SEGMENT_SIZE_REPLICA_STEP, 1).unwrap();
    assert_eq!(huge, small + 5);
  }

  #[test]
  fn hash_is_stable() {
    let a = murmur3_hash64(b"123456").unwrap();
    let b = murmur3_hash64(b"123456").unwrap();
    assert_eq!(a, b);
  }
}
