//! Read plan model and its payload codec.
//!
//! Payload layout (little-endian u64 fields):
//!
//! ```text
//! file_size | covered_size | range_count
//! range_count x { object_path\0 | object_offset | size }
//! ```
//!
//! Logical offsets are not on the wire. Record `i` starts where record
//! `i - 1` ended, beginning at the offset the plan was requested for.

use crate::{IpcError, Result};

/// Smallest possible encoded range record: empty path + NUL + two u64.
const MIN_RECORD_SIZE: usize = 1 + 8 + 8;

/// One logical range of a file mapped onto a backend object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeMapping {
    /// Backend object path; empty for a hole
    pub object_path: String,
    /// Offset of this range inside the object
    pub object_offset: u64,
    /// Offset of this range inside the file
    pub logical_offset: u64,
    pub size: u64,
}

impl RangeMapping {
    #[inline]
    pub fn is_hole(&self) -> bool {
        self.object_path.is_empty()
    }

    #[inline]
    pub fn logical_end(&self) -> u64 {
        self.logical_offset + self.size
    }
}

/// Mapping from a logical byte window of a file onto backend objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPlan {
    pub inode: u64,
    pub file_size: u64,
    /// Bytes of the requested window the ranges cover
    pub covered_size: u64,
    /// Ascending by `logical_offset`
    pub ranges: Vec<RangeMapping>,
}

impl ReadPlan {
    /// Decode a plan payload requested at `offset`.
    pub fn decode(payload: &[u8], inode: u64, offset: u64) -> Result<Self> {
        let mut cur = PlanCursor::new(payload);

        let file_size = cur.u64()?;
        let covered_size = cur.u64()?;
        let range_count = cur.u64()?;

        // Reject counts the payload cannot hold before allocating for them.
        if range_count > (cur.remaining() / MIN_RECORD_SIZE) as u64 {
            return Err(IpcError::Truncated {
                needed: (range_count as usize).saturating_mul(MIN_RECORD_SIZE),
                available: cur.remaining(),
            });
        }

        let mut ranges = Vec::with_capacity(range_count as usize);
        let mut logical_offset = offset;
        for _ in 0..range_count {
            let object_path = cur.c_str()?.to_string();
            let object_offset = cur.u64()?;
            let size = cur.u64()?;
            if object_offset.checked_add(size).is_none() {
                return Err(IpcError::Malformed("object range overflows u64"));
            }

            ranges.push(RangeMapping {
                object_path,
                object_offset,
                logical_offset,
                size,
            });
            logical_offset = logical_offset
                .checked_add(size)
                .ok_or(IpcError::Malformed("logical offset overflows u64"))?;
        }

        if cur.remaining() != 0 {
            return Err(IpcError::TrailingBytes(cur.remaining()));
        }

        Ok(Self {
            inode,
            file_size,
            covered_size,
            ranges,
        })
    }

    /// Encode this plan as a metadata service would send it.
    pub fn encode(&self) -> Vec<u8> {
        let paths: usize = self.ranges.iter().map(|r| r.object_path.len()).sum();
        let mut buf = Vec::with_capacity(24 + paths + self.ranges.len() * MIN_RECORD_SIZE);

        buf.extend_from_slice(&self.file_size.to_le_bytes());
        buf.extend_from_slice(&self.covered_size.to_le_bytes());
        buf.extend_from_slice(&(self.ranges.len() as u64).to_le_bytes());
        for r in &self.ranges {
            buf.extend_from_slice(r.object_path.as_bytes());
            buf.push(0);
            buf.extend_from_slice(&r.object_offset.to_le_bytes());
            buf.extend_from_slice(&r.size.to_le_bytes());
        }
        buf
    }

    /// Logical end of the last range, or `None` for an empty plan.
    pub fn logical_end(&self) -> Option<u64> {
        self.ranges.last().map(RangeMapping::logical_end)
    }
}

/// Bounds-checked reader over a plan payload.
struct PlanCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PlanCursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(IpcError::Truncated {
                needed: n,
                available: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    /// NUL-terminated UTF-8 string; the terminator is consumed.
    fn c_str(&mut self) -> Result<&'a str> {
        let rest = &self.buf[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(IpcError::UnterminatedPath)?;
        let s = std::str::from_utf8(&rest[..len]).map_err(|_| IpcError::InvalidPath)?;
        self.pos += len + 1;
        Ok(s)
    }
}
