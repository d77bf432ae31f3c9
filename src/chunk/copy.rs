//! Raw value copies between chunks of the same variant.

use super::DataChunk;
use crate::{RasterFlowError, Result};

/// Copy the raw value at `src_index` into `dst` at `dst_index`.
///
/// Both chunks must use the same storage variant; the raw
/// representation moves untouched, so any codec metadata travels with
/// the destination chunk.
pub fn copy_value(
    src: &DataChunk,
    src_index: usize,
    dst: &mut DataChunk,
    dst_index: usize,
) -> Result<()> {
    match (src, dst) {
        (DataChunk::Byte(s), DataChunk::Byte(d)) => d.data_mut()[dst_index] = s.data()[src_index],
        (DataChunk::Short(s), DataChunk::Short(d)) => d.data_mut()[dst_index] = s.data()[src_index],
        (DataChunk::Int(s), DataChunk::Int(d)) => d.data_mut()[dst_index] = s.data()[src_index],
        (DataChunk::Long(s), DataChunk::Long(d)) => d.data_mut()[dst_index] = s.data()[src_index],
        (DataChunk::Float(s), DataChunk::Float(d)) => d.data_mut()[dst_index] = s.data()[src_index],
        (DataChunk::Double(s), DataChunk::Double(d)) => {
            d.data_mut()[dst_index] = s.data()[src_index]
        }
        _ => {
            return Err(RasterFlowError::IncompatibleChunk(
                "raw copies require the same storage variant".into(),
            ))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ByteChunk, ShortChunk};

    #[test]
    fn values_move_in_raw_representation() {
        let src = DataChunk::Short(ShortChunk::new(vec![5, 6, 7], None, None, false));
        let mut dst = DataChunk::Short(ShortChunk::new(vec![0; 2], None, None, false));
        copy_value(&src, 2, &mut dst, 0).unwrap();
        match &dst {
            DataChunk::Short(c) => assert_eq!(c.data(), &[7, 0]),
            _ => unreachable!(),
        }
    }

    #[test]
    fn variant_mismatch_is_rejected() {
        let src = DataChunk::Short(ShortChunk::new(vec![5], None, None, false));
        let mut dst = DataChunk::Byte(ByteChunk::new(vec![0], None, None, false));
        assert!(copy_value(&src, 0, &mut dst, 0).is_err());
    }
}
