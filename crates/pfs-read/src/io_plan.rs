//! IO plan: a read plan projected onto the caller's buffer.
//!
//! Every overlapping mapping becomes one [`IoRange`] whose destination is a
//! disjoint slice of the buffer. Ranges are grouped per backend object so the
//! fetcher can issue one batched GET per object.

use pfs_blob::{ByteRange, RangeSink};
use pfs_ipc::{IpcError, ReadPlan};

use crate::{ReadError, Result};

/// One range of an object and where its bytes go.
pub type IoRange<'a> = RangeSink<'a>;

/// All ranges of one backend object (or of all holes).
#[derive(Debug)]
pub struct IoPlanObject<'a> {
    /// Empty for the hole object
    pub object_path: String,
    /// Numeric id parsed from the last path segment
    pub object_id: u64,
    pub ranges: Vec<IoRange<'a>>,
}

impl IoPlanObject<'_> {
    #[inline]
    pub fn is_hole(&self) -> bool {
        self.object_path.is_empty()
    }

    pub fn len(&self) -> u64 {
        self.ranges.iter().map(|r| r.range.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[derive(Debug)]
pub struct IoPlan<'a> {
    /// Bytes of the request inside the file
    pub total_len: u64,
    /// In first-seen order
    pub objects: Vec<IoPlanObject<'a>>,
}

impl<'a> IoPlan<'a> {
    /// Project `plan` onto `dest` for the window `[offset, offset + length)`.
    ///
    /// The window is clamped to the file size. Holes get a range like any
    /// other mapping but their destination bytes are never written.
    pub fn build(plan: &ReadPlan, dest: &'a mut [u8], offset: u64, length: u64) -> Result<Self> {
        let total_len = if offset >= plan.file_size {
            0
        } else {
            length.min(plan.file_size - offset)
        };
        if (dest.len() as u64) < total_len {
            return Err(ReadError::InvalidArgument(
                "destination buffer shorter than the read window",
            ));
        }

        let end = offset + total_len;
        let mut rest: &'a mut [u8] = &mut dest[..total_len as usize];
        let mut objects: Vec<IoPlanObject<'a>> = Vec::new();
        let mut cursor = offset;

        for mapping in &plan.ranges {
            if cursor >= end {
                break;
            }
            if mapping.logical_end() <= cursor {
                continue;
            }
            if mapping.logical_offset > cursor {
                return Err(ReadError::PlanGap { offset: cursor });
            }

            let n = (mapping.logical_end() - cursor).min(end - cursor);
            let start = mapping
                .object_offset
                .checked_add(cursor - mapping.logical_offset)
                .filter(|start| start.checked_add(n).is_some())
                .ok_or(IpcError::Malformed("object range overflows u64"))?;
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(n as usize);
            rest = tail;
            let range = IoRange::new(ByteRange::new(start, n), head);

            match objects
                .iter_mut()
                .find(|o| o.object_path == mapping.object_path)
            {
                Some(object) => object.ranges.push(range),
                None => objects.push(IoPlanObject {
                    object_path: mapping.object_path.clone(),
                    object_id: parse_object_id(&mapping.object_path),
                    ranges: vec![range],
                }),
            }
            cursor += n;
        }

        if cursor < end {
            return Err(ReadError::IncompletePlan {
                covered: cursor - offset,
                wanted: total_len,
            });
        }

        Ok(Self { total_len, objects })
    }

    /// Bytes mapped to holes.
    pub fn hole_bytes(&self) -> u64 {
        self.objects
            .iter()
            .filter(|o| o.is_hole())
            .map(IoPlanObject::len)
            .sum()
    }

    /// Objects that need a backend fetch.
    pub fn backed_objects(&self) -> impl Iterator<Item = &IoPlanObject<'a>> {
        self.objects.iter().filter(|o| !o.is_hole())
    }
}

/// Leading hex digits of the last path segment.
///
/// No digits gives 0; values past `u64::MAX` saturate.
pub fn parse_object_id(object_path: &str) -> u64 {
    let name = object_path.rsplit('/').next().unwrap_or("");
    let digits = name
        .strip_prefix("0x")
        .or_else(|| name.strip_prefix("0X"))
        .unwrap_or(name);

    let mut id: u64 = 0;
    for digit in digits.chars().map_while(|c| c.to_digit(16)) {
        id = match id.checked_mul(16).and_then(|v| v.checked_add(u64::from(digit))) {
            Some(v) => v,
            None => return u64::MAX,
        };
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use pfs_ipc::RangeMapping;

    const A: &str = "/v1/AUTH_test/c/0000000000000a2f";
    const B: &str = "/v1/AUTH_test/c/0000000000000b00";

    fn mapping(path: &str, object_offset: u64, logical_offset: u64, size: u64) -> RangeMapping {
        RangeMapping {
            object_path: path.to_string(),
            object_offset,
            logical_offset,
            size,
        }
    }

    fn plan(file_size: u64, ranges: Vec<RangeMapping>) -> ReadPlan {
        let covered_size = ranges.iter().map(|r| r.size).sum();
        ReadPlan {
            inode: 1,
            file_size,
            covered_size,
            ranges,
        }
    }

    #[test]
    fn test_groups_by_object_in_first_seen_order() {
        let p = plan(
            30,
            vec![
                mapping(A, 0, 0, 10),
                mapping(B, 100, 10, 10),
                mapping(A, 50, 20, 10),
            ],
        );
        let mut buf = [0u8; 30];
        let io = IoPlan::build(&p, &mut buf, 0, 30).unwrap();

        assert_eq!(io.total_len, 30);
        assert_eq!(io.objects.len(), 2);
        assert_eq!(io.objects[0].object_path, A);
        assert_eq!(io.objects[0].object_id, 0xa2f);
        assert_eq!(io.objects[0].ranges.len(), 2);
        assert_eq!(io.objects[0].ranges[1].range, ByteRange::new(50, 10));
        assert_eq!(io.objects[1].object_path, B);
    }

    #[test]
    fn test_window_inside_mapping() {
        let p = plan(100, vec![mapping(A, 1000, 0, 100)]);
        let mut buf = [0u8; 20];
        let io = IoPlan::build(&p, &mut buf, 30, 20).unwrap();

        assert_eq!(io.objects.len(), 1);
        assert_eq!(io.objects[0].ranges[0].range, ByteRange::new(1030, 20));
    }

    #[test]
    fn test_mapping_ending_at_window_start_is_skipped() {
        let p = plan(20, vec![mapping(A, 0, 0, 10), mapping(B, 0, 10, 10)]);
        let mut buf = [0u8; 10];
        let io = IoPlan::build(&p, &mut buf, 10, 10).unwrap();

        assert_eq!(io.objects.len(), 1);
        assert_eq!(io.objects[0].object_path, B);
    }

    #[test]
    fn test_clamps_to_file_size() {
        let p = plan(100, vec![mapping(A, 0, 0, 100)]);
        let mut buf = [0u8; 50];
        let io = IoPlan::build(&p, &mut buf, 90, 50).unwrap();
        assert_eq!(io.total_len, 10);
        assert_eq!(io.objects[0].ranges[0].dest.len(), 10);
    }

    #[test]
    fn test_offset_past_end_is_empty() {
        let p = plan(100, vec![mapping(A, 0, 0, 100)]);
        let mut buf = [0u8; 10];
        let io = IoPlan::build(&p, &mut buf, 150, 10).unwrap();
        assert_eq!(io.total_len, 0);
        assert!(io.objects.is_empty());
    }

    #[test]
    fn test_holes_are_grouped() {
        let p = plan(
            30,
            vec![mapping(A, 0, 0, 10), mapping("", 0, 10, 10), mapping(A, 10, 20, 10)],
        );
        let mut buf = [0u8; 30];
        let io = IoPlan::build(&p, &mut buf, 0, 30).unwrap();

        assert_eq!(io.hole_bytes(), 10);
        assert_eq!(io.backed_objects().count(), 1);
        assert!(io.objects[1].is_hole());
    }

    #[test]
    fn test_gap_is_rejected() {
        let p = plan(30, vec![mapping(A, 0, 0, 10), mapping(B, 0, 20, 10)]);
        let mut buf = [0u8; 30];
        assert!(matches!(
            IoPlan::build(&p, &mut buf, 0, 30),
            Err(ReadError::PlanGap { offset: 10 })
        ));
    }

    #[test]
    fn test_short_plan_is_incomplete() {
        let p = plan(30, vec![mapping(A, 0, 0, 10)]);
        let mut buf = [0u8; 30];
        assert!(matches!(
            IoPlan::build(&p, &mut buf, 0, 30),
            Err(ReadError::IncompletePlan {
                covered: 10,
                wanted: 30
            })
        ));
    }

    #[test]
    fn test_object_range_overflow_is_rejected() {
        let p = plan(16, vec![mapping(A, u64::MAX - 4, 0, 16)]);
        let mut buf = [0u8; 16];
        assert!(matches!(
            IoPlan::build(&p, &mut buf, 0, 16),
            Err(ReadError::Metadata(IpcError::Malformed(_)))
        ));
    }

    #[test]
    fn test_short_destination() {
        let p = plan(30, vec![mapping(A, 0, 0, 30)]);
        let mut buf = [0u8; 5];
        assert!(matches!(
            IoPlan::build(&p, &mut buf, 0, 30),
            Err(ReadError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_parse_object_id() {
        assert_eq!(parse_object_id(A), 0xa2f);
        assert_eq!(parse_object_id("/c/ff.data"), 0xff);
        assert_eq!(parse_object_id("/c/0x10"), 0x10);
        assert_eq!(parse_object_id("/c/object"), 0);
        assert_eq!(parse_object_id(""), 0);
        assert_eq!(parse_object_id("/c/fffffffffffffffffff"), u64::MAX);
    }
}
