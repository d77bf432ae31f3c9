//! Uniform element reads over all chunk variants.

use std::borrow::Cow;

use super::{DataChunk, ExternalType, UnpackedValues};
use crate::{RasterFlowError, Result};

/// Reads chunk elements in the chunk's external type.
///
/// Construction resolves the external representation once: packed
/// integer chunks unpack into a fresh float buffer, unsigned integer
/// chunks widen into the next larger signed type, scaled float chunks
/// produce a scaled buffer with the sentinel converted to NaN, and
/// everything else borrows the raw buffer.
pub struct ChunkDataAccessor<'a> {
    values: AccessorValues<'a>,
}

enum AccessorValues<'a> {
    Byte {
        data: Cow<'a, [i8]>,
        missing: Option<i8>,
    },
    Short {
        data: Cow<'a, [i16]>,
        missing: Option<i16>,
    },
    Int {
        data: Cow<'a, [i32]>,
        missing: Option<i32>,
    },
    Long {
        data: Cow<'a, [i64]>,
        missing: Option<i64>,
    },
    Float {
        data: Cow<'a, [f32]>,
        missing: Option<f32>,
    },
    Double {
        data: Cow<'a, [f64]>,
        missing: Option<f64>,
    },
}

fn unpacked<'a>(values: UnpackedValues) -> AccessorValues<'a> {
    match values {
        UnpackedValues::Float(data) => AccessorValues::Float {
            data: Cow::Owned(data),
            missing: None,
        },
        UnpackedValues::Double(data) => AccessorValues::Double {
            data: Cow::Owned(data),
            missing: None,
        },
    }
}

macro_rules! casting_getter {
    ($(#[$meta:meta])* $name:ident, $t:ty) => {
        $(#[$meta])*
        pub fn $name(&self, i: usize) -> $t {
            match &self.values {
                AccessorValues::Byte { data, .. } => data[i] as $t,
                AccessorValues::Short { data, .. } => data[i] as $t,
                AccessorValues::Int { data, .. } => data[i] as $t,
                AccessorValues::Long { data, .. } => data[i] as $t,
                AccessorValues::Float { data, .. } => data[i] as $t,
                AccessorValues::Double { data, .. } => data[i] as $t,
            }
        }
    };
}

macro_rules! slice_getter {
    ($(#[$meta:meta])* $name:ident, $variant:ident, $t:ty) => {
        $(#[$meta])*
        pub fn $name(&self) -> Result<&[$t]> {
            match &self.values {
                AccessorValues::$variant { data, .. } => Ok(data.as_ref()),
                _ => Err(RasterFlowError::TypeMismatch),
            }
        }
    };
}

impl<'a> ChunkDataAccessor<'a> {
    pub fn new(chunk: &'a DataChunk) -> Result<Self> {
        let values = match chunk {
            DataChunk::Byte(c) => match c.packing() {
                Some(p) => unpacked(p.unpack_bytes(c.data(), c.missing(), c.is_unsigned())?),
                None if c.is_unsigned() => AccessorValues::Short {
                    data: Cow::Owned(c.data().iter().map(|&v| (v as u8) as i16).collect()),
                    missing: c.missing().map(|m| (m as u8) as i16),
                },
                None => AccessorValues::Byte {
                    data: Cow::Borrowed(c.data()),
                    missing: c.missing(),
                },
            },
            DataChunk::Short(c) => match c.packing() {
                Some(p) => unpacked(p.unpack_shorts(c.data(), c.missing(), c.is_unsigned())?),
                None if c.is_unsigned() => AccessorValues::Int {
                    data: Cow::Owned(c.data().iter().map(|&v| (v as u16) as i32).collect()),
                    missing: c.missing().map(|m| (m as u16) as i32),
                },
                None => AccessorValues::Short {
                    data: Cow::Borrowed(c.data()),
                    missing: c.missing(),
                },
            },
            DataChunk::Int(c) => match c.packing() {
                Some(p) => unpacked(p.unpack_ints(c.data(), c.missing(), c.is_unsigned())?),
                None if c.is_unsigned() => AccessorValues::Long {
                    data: Cow::Owned(c.data().iter().map(|&v| (v as u32) as i64).collect()),
                    missing: c.missing().map(|m| (m as u32) as i64),
                },
                None => AccessorValues::Int {
                    data: Cow::Borrowed(c.data()),
                    missing: c.missing(),
                },
            },
            DataChunk::Long(c) => match c.packing() {
                Some(p) => unpacked(p.unpack_longs(c.data(), c.missing(), c.is_unsigned())?),
                // Unsigned long storage reads as signed.
                None => AccessorValues::Long {
                    data: Cow::Borrowed(c.data()),
                    missing: c.missing(),
                },
            },
            DataChunk::Float(c) => match c.scaling() {
                Some(s) => {
                    let (scale, offset) = s.float_params().ok_or_else(|| {
                        RasterFlowError::InvalidChunkConfig(
                            "scaling width does not match the chunk's float width".into(),
                        )
                    })?;
                    let missing = c.missing();
                    AccessorValues::Float {
                        data: Cow::Owned(
                            c.data()
                                .iter()
                                .map(|&v| {
                                    if v.is_nan() || missing.map_or(false, |m| v == m) {
                                        f32::NAN
                                    } else {
                                        (v - offset) * scale
                                    }
                                })
                                .collect(),
                        ),
                        missing: None,
                    }
                }
                None => AccessorValues::Float {
                    data: Cow::Borrowed(c.data()),
                    missing: c.missing(),
                },
            },
            DataChunk::Double(c) => match c.scaling() {
                Some(s) => {
                    let (scale, offset) = s.double_params().ok_or_else(|| {
                        RasterFlowError::InvalidChunkConfig(
                            "scaling width does not match the chunk's float width".into(),
                        )
                    })?;
                    let missing = c.missing();
                    AccessorValues::Double {
                        data: Cow::Owned(
                            c.data()
                                .iter()
                                .map(|&v| {
                                    if v.is_nan() || missing.map_or(false, |m| v == m) {
                                        f64::NAN
                                    } else {
                                        (v - offset) * scale
                                    }
                                })
                                .collect(),
                        ),
                        missing: None,
                    }
                }
                None => AccessorValues::Double {
                    data: Cow::Borrowed(c.data()),
                    missing: c.missing(),
                },
            },
        };
        Ok(Self { values })
    }

    /// The type of the active buffer.
    pub fn external_type(&self) -> ExternalType {
        match &self.values {
            AccessorValues::Byte { .. } => ExternalType::Byte,
            AccessorValues::Short { .. } => ExternalType::Short,
            AccessorValues::Int { .. } => ExternalType::Int,
            AccessorValues::Long { .. } => ExternalType::Long,
            AccessorValues::Float { .. } => ExternalType::Float,
            AccessorValues::Double { .. } => ExternalType::Double,
        }
    }

    pub fn len(&self) -> usize {
        match &self.values {
            AccessorValues::Byte { data, .. } => data.len(),
            AccessorValues::Short { data, .. } => data.len(),
            AccessorValues::Int { data, .. } => data.len(),
            AccessorValues::Long { data, .. } => data.len(),
            AccessorValues::Float { data, .. } => data.len(),
            AccessorValues::Double { data, .. } => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when element `i` holds no data: it matches the sentinel,
    /// or is NaN in a float representation.
    pub fn is_missing(&self, i: usize) -> bool {
        match &self.values {
            AccessorValues::Byte { data, missing } => Some(data[i]) == *missing,
            AccessorValues::Short { data, missing } => Some(data[i]) == *missing,
            AccessorValues::Int { data, missing } => Some(data[i]) == *missing,
            AccessorValues::Long { data, missing } => Some(data[i]) == *missing,
            AccessorValues::Float { data, missing } => {
                data[i].is_nan() || missing.map_or(false, |m| data[i] == m)
            }
            AccessorValues::Double { data, missing } => {
                data[i].is_nan() || missing.map_or(false, |m| data[i] == m)
            }
        }
    }

    slice_getter!(
        /// The active buffer when the external type is Byte.
        bytes, Byte, i8
    );
    slice_getter!(
        /// The active buffer when the external type is Short.
        shorts, Short, i16
    );
    slice_getter!(
        /// The active buffer when the external type is Int.
        ints, Int, i32
    );
    slice_getter!(
        /// The active buffer when the external type is Long.
        longs, Long, i64
    );
    slice_getter!(
        /// The active buffer when the external type is Float.
        floats, Float, f32
    );
    slice_getter!(
        /// The active buffer when the external type is Double.
        doubles, Double, f64
    );

    casting_getter!(
        /// Element `i` narrowed or widened to i8.
        get_byte, i8
    );
    casting_getter!(
        /// Element `i` narrowed or widened to i16.
        get_short, i16
    );
    casting_getter!(
        /// Element `i` narrowed or widened to i32.
        get_int, i32
    );
    casting_getter!(
        /// Element `i` narrowed or widened to i64.
        get_long, i64
    );
    casting_getter!(
        /// Element `i` as f32. For missing elements the raw sentinel
        /// comes back; check [`is_missing`](Self::is_missing) first.
        get_float, f32
    );
    casting_getter!(
        /// Element `i` as f64. For missing elements the raw sentinel
        /// comes back; check [`is_missing`](Self::is_missing) first.
        get_double, f64
    );
}
