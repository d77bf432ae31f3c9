//! Codecs between raw chunk storage and external values.
//!
//! A [`PackingScheme`] crosses a type boundary: narrow integer storage
//! holds values that externally read as f32 or f64. A [`ScalingScheme`]
//! stays within one float width and applies the same affine transform.
//! Both directions use `(raw - offset) * scale` outward and
//! `value / scale + offset` (rounded half away from zero) inward.

use serde_derive::{Deserialize, Serialize};

use super::ExternalType;
use crate::{RasterFlowError, Result};

/// Bidirectional codec between integer storage and a float target.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum PackingScheme {
    Float { scale: f32, offset: f32 },
    Double { scale: f64, offset: f64 },
}

/// Affine transform between stored and external values of one float width.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ScalingScheme {
    Float { scale: f32, offset: f32 },
    Double { scale: f64, offset: f64 },
}

/// The at-most-one codec a chunk may carry.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Codec {
    Pack(PackingScheme),
    Scale(ScalingScheme),
}

/// Values produced by unpacking a raw integer buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum UnpackedValues {
    Float(Vec<f32>),
    Double(Vec<f64>),
}

/// Typed input handed to the pack direction.
#[derive(Clone, Copy, Debug)]
pub enum PackSource<'a> {
    Float(&'a [f32]),
    Double(&'a [f64]),
}

impl PackingScheme {
    /// The external type this scheme unpacks to.
    pub fn target_type(&self) -> ExternalType {
        match self {
            PackingScheme::Float { .. } => ExternalType::Float,
            PackingScheme::Double { .. } => ExternalType::Double,
        }
    }

    /// Conversion paths that exist in neither direction.
    fn check_supported(&self, bits: u32, unsigned: bool) -> Result<()> {
        let unsupported = match (self, bits, unsigned) {
            (PackingScheme::Float { .. }, 64, _) => Some("long values do not pack as float"),
            (PackingScheme::Float { .. }, 32, true) => {
                Some("unsigned int values do not pack as float")
            }
            (PackingScheme::Double { .. }, 64, true) => {
                Some("unsigned long values do not pack as double")
            }
            _ => None,
        };
        match unsupported {
            Some(path) => Err(RasterFlowError::UnsupportedConversion(path)),
            None => Ok(()),
        }
    }
}

macro_rules! packing_paths {
    ($unpack:ident, $pack:ident, $raw:ty, $uns:ty, $bits:expr) => {
        impl PackingScheme {
            /// Unpack a raw buffer into the target float type. Missing raw
            /// values unpack to NaN.
            pub fn $unpack(
                &self,
                raw: &[$raw],
                missing: Option<$raw>,
                unsigned: bool,
            ) -> Result<UnpackedValues> {
                self.check_supported($bits, unsigned)?;
                Ok(match *self {
                    PackingScheme::Float { scale, offset } => UnpackedValues::Float(
                        raw.iter()
                            .map(|&r| {
                                if Some(r) == missing {
                                    f32::NAN
                                } else if unsigned {
                                    ((r as $uns) as f32 - offset) * scale
                                } else {
                                    (r as f32 - offset) * scale
                                }
                            })
                            .collect(),
                    ),
                    PackingScheme::Double { scale, offset } => UnpackedValues::Double(
                        raw.iter()
                            .map(|&r| {
                                if Some(r) == missing {
                                    f64::NAN
                                } else if unsigned {
                                    ((r as $uns) as f64 - offset) * scale
                                } else {
                                    (r as f64 - offset) * scale
                                }
                            })
                            .collect(),
                    ),
                })
            }

            /// Pack external float values into a raw buffer. Non-finite
            /// values encode as the missing sentinel, which must exist.
            pub fn $pack(
                &self,
                values: PackSource<'_>,
                missing: Option<$raw>,
                unsigned: bool,
                out: &mut [$raw],
            ) -> Result<()> {
                self.check_supported($bits, unsigned)?;
                match (*self, values) {
                    (PackingScheme::Float { scale, offset }, PackSource::Float(vals)) => {
                        for (o, &v) in out.iter_mut().zip(vals) {
                            *o = if !v.is_finite() {
                                sentinel(missing)?
                            } else {
                                truncate::<$raw>((v / scale + offset).round() as i64, $bits, unsigned)
                            };
                        }
                        Ok(())
                    }
                    (PackingScheme::Double { scale, offset }, PackSource::Double(vals)) => {
                        for (o, &v) in out.iter_mut().zip(vals) {
                            *o = if !v.is_finite() {
                                sentinel(missing)?
                            } else {
                                truncate::<$raw>((v / scale + offset).round() as i64, $bits, unsigned)
                            };
                        }
                        Ok(())
                    }
                    _ => Err(RasterFlowError::TypeMismatch),
                }
            }
        }
    };
}

packing_paths!(unpack_bytes, pack_bytes, i8, u8, 8);
packing_paths!(unpack_shorts, pack_shorts, i16, u16, 16);
packing_paths!(unpack_ints, pack_ints, i32, u32, 32);
packing_paths!(unpack_longs, pack_longs, i64, u64, 64);

fn sentinel<T: Copy>(missing: Option<T>) -> Result<T> {
    missing.ok_or_else(|| {
        RasterFlowError::InvalidChunkConfig(
            "a missing sentinel is required to pack non-finite values".into(),
        )
    })
}

/// Keep the low bits for unsigned targets, then narrow two's-complement.
fn truncate<T: TruncateFrom>(p: i64, bits: u32, unsigned: bool) -> T {
    let p = if unsigned {
        p & (((1u128 << bits) - 1) as i64)
    } else {
        p
    };
    T::truncate_from(p)
}

trait TruncateFrom {
    fn truncate_from(p: i64) -> Self;
}

macro_rules! truncate_from {
    ($($t:ty),*) => {
        $(impl TruncateFrom for $t {
            fn truncate_from(p: i64) -> Self {
                p as $t
            }
        })*
    };
}

truncate_from!(i8, i16, i32, i64);

impl ScalingScheme {
    /// The external type this scheme produces.
    pub fn target_type(&self) -> ExternalType {
        match self {
            ScalingScheme::Float { .. } => ExternalType::Float,
            ScalingScheme::Double { .. } => ExternalType::Double,
        }
    }

    /// Scale and offset when this is the f32-width variant.
    pub fn float_params(&self) -> Option<(f32, f32)> {
        match *self {
            ScalingScheme::Float { scale, offset } => Some((scale, offset)),
            ScalingScheme::Double { .. } => None,
        }
    }

    /// Scale and offset when this is the f64-width variant.
    pub fn double_params(&self) -> Option<(f64, f64)> {
        match *self {
            ScalingScheme::Double { scale, offset } => Some((scale, offset)),
            ScalingScheme::Float { .. } => None,
        }
    }
}

impl Codec {
    /// The external type a chunk carrying this codec advertises.
    pub fn target_type(&self) -> ExternalType {
        match self {
            Codec::Pack(p) => p.target_type(),
            Codec::Scale(s) => s.target_type(),
        }
    }
}
