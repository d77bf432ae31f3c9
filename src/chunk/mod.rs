//! Typed chunks of gridded data.
//!
//! A chunk owns a contiguous buffer of one primitive type plus the
//! metadata needed to interpret it: an optional missing sentinel, an
//! optional [codec](Codec) and, for integer storage, an unsigned flag.
//! The *external* type, what callers read and write through the
//! [accessor](ChunkDataAccessor) and [modifier](ChunkDataModifier), is
//! the codec target if present, the widened integer type for unsigned
//! storage, and the raw type otherwise.

mod access;
mod cast;
mod copy;
mod flag;
mod modify;
mod packing;

pub use access::ChunkDataAccessor;
pub use cast::ChunkCaster;
pub use copy::copy_value;
pub use flag::flag_missing;
pub use modify::ChunkDataModifier;
pub use packing::{Codec, PackSource, PackingScheme, ScalingScheme, UnpackedValues};

use serde_derive::{Deserialize, Serialize};

use crate::{RasterFlowError, Result};

/// The primitive type a chunk's values represent after any packing,
/// scaling or widening is applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExternalType {
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl ExternalType {
    /// Width of one value in bytes.
    pub fn value_bytes(&self) -> usize {
        match self {
            ExternalType::Byte => 1,
            ExternalType::Short => 2,
            ExternalType::Int => 4,
            ExternalType::Long | ExternalType::Double => 8,
            ExternalType::Float => 4,
        }
    }

    pub fn is_integer(&self) -> bool {
        !self.is_float()
    }

    pub fn is_float(&self) -> bool {
        matches!(self, ExternalType::Float | ExternalType::Double)
    }
}

/// One value of any primitive width.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PrimitiveValue {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
}

impl PrimitiveValue {
    pub fn class(&self) -> ExternalType {
        match self {
            PrimitiveValue::Byte(_) => ExternalType::Byte,
            PrimitiveValue::Short(_) => ExternalType::Short,
            PrimitiveValue::Int(_) => ExternalType::Int,
            PrimitiveValue::Long(_) => ExternalType::Long,
            PrimitiveValue::Float(_) => ExternalType::Float,
            PrimitiveValue::Double(_) => ExternalType::Double,
        }
    }
}

/// An owned buffer of one primitive width.
#[derive(Clone, Debug, PartialEq)]
pub enum PrimitiveBuffer {
    Byte(Vec<i8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl PrimitiveBuffer {
    pub fn class(&self) -> ExternalType {
        match self {
            PrimitiveBuffer::Byte(_) => ExternalType::Byte,
            PrimitiveBuffer::Short(_) => ExternalType::Short,
            PrimitiveBuffer::Int(_) => ExternalType::Int,
            PrimitiveBuffer::Long(_) => ExternalType::Long,
            PrimitiveBuffer::Float(_) => ExternalType::Float,
            PrimitiveBuffer::Double(_) => ExternalType::Double,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PrimitiveBuffer::Byte(d) => d.len(),
            PrimitiveBuffer::Short(d) => d.len(),
            PrimitiveBuffer::Int(d) => d.len(),
            PrimitiveBuffer::Long(d) => d.len(),
            PrimitiveBuffer::Float(d) => d.len(),
            PrimitiveBuffer::Double(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A borrowed view of a chunk's raw buffer, for I/O pass-through.
#[derive(Clone, Copy, Debug)]
pub enum PrimitiveData<'a> {
    Byte(&'a [i8]),
    Short(&'a [i16]),
    Int(&'a [i32]),
    Long(&'a [i64]),
    Float(&'a [f32]),
    Double(&'a [f64]),
}

impl PrimitiveData<'_> {
    pub fn len(&self) -> usize {
        match self {
            PrimitiveData::Byte(d) => d.len(),
            PrimitiveData::Short(d) => d.len(),
            PrimitiveData::Int(d) => d.len(),
            PrimitiveData::Long(d) => d.len(),
            PrimitiveData::Float(d) => d.len(),
            PrimitiveData::Double(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_buffer(&self) -> PrimitiveBuffer {
        match *self {
            PrimitiveData::Byte(d) => PrimitiveBuffer::Byte(d.to_vec()),
            PrimitiveData::Short(d) => PrimitiveBuffer::Short(d.to_vec()),
            PrimitiveData::Int(d) => PrimitiveBuffer::Int(d.to_vec()),
            PrimitiveData::Long(d) => PrimitiveBuffer::Long(d.to_vec()),
            PrimitiveData::Float(d) => PrimitiveBuffer::Float(d.to_vec()),
            PrimitiveData::Double(d) => PrimitiveBuffer::Double(d.to_vec()),
        }
    }
}

macro_rules! integer_chunk {
    ($(#[$meta:meta])* $name:ident, $prim:ty, $raw_ext:ident, $wid_ext:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        pub struct $name {
            data: Vec<$prim>,
            missing: Option<$prim>,
            packing: Option<PackingScheme>,
            unsigned: bool,
        }

        impl $name {
            pub fn new(
                data: Vec<$prim>,
                missing: Option<$prim>,
                packing: Option<PackingScheme>,
                unsigned: bool,
            ) -> Self {
                Self {
                    data,
                    missing,
                    packing,
                    unsigned,
                }
            }

            pub fn data(&self) -> &[$prim] {
                &self.data
            }

            pub fn data_mut(&mut self) -> &mut [$prim] {
                &mut self.data
            }

            pub fn missing(&self) -> Option<$prim> {
                self.missing
            }

            pub fn packing(&self) -> Option<&PackingScheme> {
                self.packing.as_ref()
            }

            pub fn is_unsigned(&self) -> bool {
                self.unsigned
            }

            pub fn values(&self) -> usize {
                self.data.len()
            }

            pub fn external_type(&self) -> ExternalType {
                match (&self.packing, self.unsigned) {
                    (Some(p), _) => p.target_type(),
                    (None, true) => ExternalType::$wid_ext,
                    (None, false) => ExternalType::$raw_ext,
                }
            }

            fn blank_with_values(&self, n: usize) -> Self {
                Self {
                    data: vec![0; n],
                    missing: self.missing,
                    packing: self.packing,
                    unsigned: self.unsigned,
                }
            }

            fn compatible(&self, other: &Self) -> bool {
                self.missing == other.missing
                    && self.packing == other.packing
                    && self.unsigned == other.unsigned
            }
        }
    };
}

integer_chunk!(
    /// Chunk of i8 storage.
    ByteChunk, i8, Byte, Short
);
integer_chunk!(
    /// Chunk of i16 storage.
    ShortChunk, i16, Short, Int
);
integer_chunk!(
    /// Chunk of i32 storage.
    IntChunk, i32, Int, Long
);
integer_chunk!(
    /// Chunk of i64 storage. The unsigned flag participates in
    /// compatibility checks but the values always read as signed.
    LongChunk, i64, Long, Long
);

macro_rules! float_chunk {
    ($(#[$meta:meta])* $name:ident, $prim:ty, $ext:ident, $params:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        pub struct $name {
            data: Vec<$prim>,
            missing: Option<$prim>,
            scaling: Option<ScalingScheme>,
        }

        impl $name {
            pub fn new(
                data: Vec<$prim>,
                missing: Option<$prim>,
                scaling: Option<ScalingScheme>,
            ) -> Result<Self> {
                if let Some(s) = &scaling {
                    if s.$params().is_none() {
                        return Err(RasterFlowError::InvalidChunkConfig(
                            "scaling width does not match the chunk's float width".into(),
                        ));
                    }
                }
                Ok(Self {
                    data,
                    missing,
                    scaling,
                })
            }

            pub fn data(&self) -> &[$prim] {
                &self.data
            }

            pub fn data_mut(&mut self) -> &mut [$prim] {
                &mut self.data
            }

            pub fn missing(&self) -> Option<$prim> {
                self.missing
            }

            pub fn scaling(&self) -> Option<&ScalingScheme> {
                self.scaling.as_ref()
            }

            pub fn values(&self) -> usize {
                self.data.len()
            }

            pub fn external_type(&self) -> ExternalType {
                ExternalType::$ext
            }

            fn blank_with_values(&self, n: usize) -> Self {
                Self {
                    data: vec![0.0; n],
                    missing: self.missing,
                    scaling: self.scaling,
                }
            }

            fn compatible(&self, other: &Self) -> bool {
                // Bitwise so a NaN sentinel still compares equal.
                self.missing.map(<$prim>::to_bits) == other.missing.map(<$prim>::to_bits)
                    && self.scaling == other.scaling
            }
        }
    };
}

float_chunk!(
    /// Chunk of f32 storage.
    FloatChunk, f32, Float, float_params
);
float_chunk!(
    /// Chunk of f64 storage.
    DoubleChunk, f64, Double, double_params
);

/// A chunk of one of the six primitive storage widths.
#[derive(Clone, Debug)]
pub enum DataChunk {
    Byte(ByteChunk),
    Short(ShortChunk),
    Int(IntChunk),
    Long(LongChunk),
    Float(FloatChunk),
    Double(DoubleChunk),
}

macro_rules! each_variant {
    ($self:expr, $c:ident => $body:expr) => {
        match $self {
            DataChunk::Byte($c) => $body,
            DataChunk::Short($c) => $body,
            DataChunk::Int($c) => $body,
            DataChunk::Long($c) => $body,
            DataChunk::Float($c) => $body,
            DataChunk::Double($c) => $body,
        }
    };
}

macro_rules! map_variant {
    ($self:expr, $c:ident => $body:expr) => {
        match $self {
            DataChunk::Byte($c) => DataChunk::Byte($body),
            DataChunk::Short($c) => DataChunk::Short($body),
            DataChunk::Int($c) => DataChunk::Int($body),
            DataChunk::Long($c) => DataChunk::Long($body),
            DataChunk::Float($c) => DataChunk::Float($body),
            DataChunk::Double($c) => DataChunk::Double($body),
        }
    };
}

impl DataChunk {
    /// The type accessors hand out for this chunk.
    pub fn external_type(&self) -> ExternalType {
        each_variant!(self, c => c.external_type())
    }

    /// Number of primitive elements.
    pub fn values(&self) -> usize {
        each_variant!(self, c => c.values())
    }

    /// Width of one raw element in bytes.
    pub fn value_bytes(&self) -> usize {
        match self {
            DataChunk::Byte(_) => 1,
            DataChunk::Short(_) => 2,
            DataChunk::Int(_) => 4,
            DataChunk::Long(_) | DataChunk::Double(_) => 8,
            DataChunk::Float(_) => 4,
        }
    }

    /// Borrow the raw buffer, for I/O pass-through only.
    pub fn primitive_data(&self) -> PrimitiveData<'_> {
        match self {
            DataChunk::Byte(c) => PrimitiveData::Byte(c.data()),
            DataChunk::Short(c) => PrimitiveData::Short(c.data()),
            DataChunk::Int(c) => PrimitiveData::Int(c.data()),
            DataChunk::Long(c) => PrimitiveData::Long(c.data()),
            DataChunk::Float(c) => PrimitiveData::Float(c.data()),
            DataChunk::Double(c) => PrimitiveData::Double(c.data()),
        }
    }

    /// A chunk with the same metadata and a zeroed buffer of the same
    /// length.
    pub fn blank_copy(&self) -> DataChunk {
        self.blank_copy_with_values(self.values())
    }

    /// A chunk with the same metadata and a zeroed buffer of `n`
    /// elements. `n = 0` produces a prototype chunk.
    pub fn blank_copy_with_values(&self, n: usize) -> DataChunk {
        map_variant!(self, c => c.blank_with_values(n))
    }

    /// A zero-length chunk carrying only this chunk's metadata.
    pub fn prototype(&self) -> DataChunk {
        self.blank_copy_with_values(0)
    }

    /// A chunk with this chunk's metadata and the given raw buffer.
    pub fn with_data(&self, data: PrimitiveBuffer) -> Result<DataChunk> {
        let chunk = match (self, data) {
            (DataChunk::Byte(c), PrimitiveBuffer::Byte(d)) => {
                DataChunk::Byte(ByteChunk::new(d, c.missing, c.packing, c.unsigned))
            }
            (DataChunk::Short(c), PrimitiveBuffer::Short(d)) => {
                DataChunk::Short(ShortChunk::new(d, c.missing, c.packing, c.unsigned))
            }
            (DataChunk::Int(c), PrimitiveBuffer::Int(d)) => {
                DataChunk::Int(IntChunk::new(d, c.missing, c.packing, c.unsigned))
            }
            (DataChunk::Long(c), PrimitiveBuffer::Long(d)) => {
                DataChunk::Long(LongChunk::new(d, c.missing, c.packing, c.unsigned))
            }
            (DataChunk::Float(c), PrimitiveBuffer::Float(d)) => {
                DataChunk::Float(FloatChunk::new(d, c.missing, c.scaling)?)
            }
            (DataChunk::Double(c), PrimitiveBuffer::Double(d)) => {
                DataChunk::Double(DoubleChunk::new(d, c.missing, c.scaling)?)
            }
            _ => {
                return Err(RasterFlowError::InvalidChunkConfig(
                    "buffer class does not match the chunk's storage".into(),
                ))
            }
        };
        Ok(chunk)
    }

    /// Same variant, same missing sentinel, same codec and, for
    /// integer variants, the same unsigned flag.
    pub fn is_compatible(&self, other: &DataChunk) -> bool {
        match (self, other) {
            (DataChunk::Byte(a), DataChunk::Byte(b)) => a.compatible(b),
            (DataChunk::Short(a), DataChunk::Short(b)) => a.compatible(b),
            (DataChunk::Int(a), DataChunk::Int(b)) => a.compatible(b),
            (DataChunk::Long(a), DataChunk::Long(b)) => a.compatible(b),
            (DataChunk::Float(a), DataChunk::Float(b)) => a.compatible(b),
            (DataChunk::Double(a), DataChunk::Double(b)) => a.compatible(b),
            _ => false,
        }
    }

    /// True when at least one element is not missing.
    pub fn is_valid(&self) -> Result<bool> {
        let accessor = ChunkDataAccessor::new(self)?;
        Ok((0..accessor.len()).any(|i| !accessor.is_missing(i)))
    }
}

macro_rules! typed_missing {
    ($missing:expr, $variant:ident, $class:literal) => {
        match $missing {
            None => None,
            Some(PrimitiveValue::$variant(m)) => Some(m),
            Some(_) => {
                return Err(RasterFlowError::InvalidChunkConfig(concat!(
                    "missing sentinel class does not match ",
                    $class,
                    " storage"
                )
                .into()))
            }
        }
    };
}

/// Create a chunk for a raw buffer, validating the metadata combination.
pub fn new_chunk(
    data: PrimitiveBuffer,
    missing: Option<PrimitiveValue>,
    codec: Option<Codec>,
    unsigned: bool,
) -> Result<DataChunk> {
    match data {
        PrimitiveBuffer::Byte(d) => {
            let missing = typed_missing!(missing, Byte, "byte");
            let packing = integer_codec(codec)?;
            Ok(DataChunk::Byte(ByteChunk::new(d, missing, packing, unsigned)))
        }
        PrimitiveBuffer::Short(d) => {
            let missing = typed_missing!(missing, Short, "short");
            let packing = integer_codec(codec)?;
            Ok(DataChunk::Short(ShortChunk::new(d, missing, packing, unsigned)))
        }
        PrimitiveBuffer::Int(d) => {
            let missing = typed_missing!(missing, Int, "int");
            let packing = integer_codec(codec)?;
            Ok(DataChunk::Int(IntChunk::new(d, missing, packing, unsigned)))
        }
        PrimitiveBuffer::Long(d) => {
            let missing = typed_missing!(missing, Long, "long");
            let packing = integer_codec(codec)?;
            Ok(DataChunk::Long(LongChunk::new(d, missing, packing, unsigned)))
        }
        PrimitiveBuffer::Float(d) => {
            let missing = typed_missing!(missing, Float, "float");
            let scaling = float_codec(codec, unsigned)?;
            Ok(DataChunk::Float(FloatChunk::new(d, missing, scaling)?))
        }
        PrimitiveBuffer::Double(d) => {
            let missing = typed_missing!(missing, Double, "double");
            let scaling = float_codec(codec, unsigned)?;
            Ok(DataChunk::Double(DoubleChunk::new(d, missing, scaling)?))
        }
    }
}

fn integer_codec(codec: Option<Codec>) -> Result<Option<PackingScheme>> {
    match codec {
        None => Ok(None),
        Some(Codec::Pack(p)) => Ok(Some(p)),
        Some(Codec::Scale(_)) => Err(RasterFlowError::InvalidChunkConfig(
            "scaling applies to float storage only".into(),
        )),
    }
}

fn float_codec(codec: Option<Codec>, unsigned: bool) -> Result<Option<ScalingScheme>> {
    if unsigned {
        return Err(RasterFlowError::InvalidChunkConfig(
            "float storage cannot be unsigned".into(),
        ));
    }
    match codec {
        None => Ok(None),
        Some(Codec::Scale(s)) => Ok(Some(s)),
        Some(Codec::Pack(_)) => Err(RasterFlowError::InvalidChunkConfig(
            "packing applies to integer storage only".into(),
        )),
    }
}
