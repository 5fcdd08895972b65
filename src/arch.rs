use std::convert::TryFrom;

use crate::result::*;

/// A checked cast from a ZIP record's integer field to usize
///
/// Every field we read is at most 32 bits wide, so this only fails
/// on targets with 16-bit pointers.
pub fn usize<I: Into<u64>>(i: I) -> ExportResult<usize> {
    usize::try_from(i.into()).map_err(|_| ExportError::InsufficientAddressSpace)
}
