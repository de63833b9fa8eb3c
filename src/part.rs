use crate::error::{Result, TransferError};
use std::cmp;

// Field order makes the derived order part-number order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Part {
    pub part_number: u32,
    /// Offset of this range within the logical object.
    pub offset: u64,
    pub size: u64,
    pub checksum: Option<String>,
    /// Previously reported as transferred; verified before being skipped.
    pub completed: bool,
}

impl Part {
    pub fn new(part_number: u32, offset: u64, size: u64) -> Self {
        Self {
            part_number,
            offset,
            size,
            checksum: None,
            completed: false,
        }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub object_id: String,
    pub upload_id: String,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadProgress {
    pub object_id: String,
    pub upload_id: String,
    pub parts: Vec<Part>,
    pub completed_parts: Vec<CompletedPart>,
}

pub fn total_size(parts: &[Part]) -> u64 {
    parts.iter().map(|part| part.size).sum()
}

pub fn is_ordered(parts: &[Part]) -> bool {
    parts.windows(2).all(|w| w[0] <= w[1])
}

/// Plans contiguous parts of at most `part_size` bytes covering `[0, total)`.
///
/// Part numbers start at 1. An empty object yields no parts.
pub fn split(total: u64, part_size: u64) -> Result<Vec<Part>> {
    if part_size == 0 {
        return Err(TransferError::InvalidPartPlan(
            "part size must be positive".to_owned(),
        ));
    }
    let count = total / part_size + u64::from(total % part_size != 0);
    u32::try_from(count).map_err(|_| {
        TransferError::InvalidPartPlan(format!("{} parts exceed the part number range", count))
    })?;

    let mut parts = Vec::new();
    let mut offset = 0;
    let mut part_number = 0;
    while offset < total {
        let size = cmp::min(part_size, total - offset);
        part_number += 1;
        parts.push(Part::new(part_number, offset, size));
        offset += size;
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::{is_ordered, split, total_size, Part};
    use crate::TransferError;
    use std::cmp::Ordering;

    #[test]
    fn test_split() {
        let parts = split(10, 4).unwrap();
        assert_eq!(
            parts,
            vec![Part::new(1, 0, 4), Part::new(2, 4, 4), Part::new(3, 8, 2)]
        );
        assert_eq!(total_size(&parts), 10);
        assert!(parts.windows(2).all(|w| w[0].end() == w[1].offset));

        assert_eq!(split(8, 4).unwrap().len(), 2);
        assert!(split(0, 4).unwrap().is_empty());
    }

    #[test]
    fn test_split_rejects_bad_plans() {
        assert!(matches!(split(10, 0), Err(TransferError::InvalidPartPlan(_))));
        assert!(matches!(
            split(u64::MAX, 1),
            Err(TransferError::InvalidPartPlan(_))
        ));
        assert_eq!(split(u64::from(u32::MAX), 1 << 20).unwrap().len(), 4096);
    }

    #[test]
    fn test_natural_order() {
        let mut parts = split(12, 4).unwrap();
        assert!(is_ordered(&parts));

        parts.reverse();
        assert!(!is_ordered(&parts));

        parts.sort();
        assert_eq!(
            parts.iter().map(|part| part.part_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_order_agrees_with_equality() {
        let a = Part::new(1, 0, 4);
        let mut b = a.clone();
        b.checksum = Some("1B2M2Y8AsgTpgAmY7PhCfg==".to_owned());
        b.completed = true;

        assert_ne!(a, b);
        assert_ne!(a.cmp(&b), Ordering::Equal);
        assert_eq!(a.cmp(&a.clone()), Ordering::Equal);
        assert!(Part::new(1, 100, 4) < Part::new(2, 0, 4));
    }
}
