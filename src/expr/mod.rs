//! Evaluate parsed arithmetic expressions over chunk elements.
//!
//! The parser itself is an external collaborator: this module defines
//! the narrow interface it must expose and walks it across every
//! element of a position, one accessor-backed variable source at a
//! time.

use std::sync::Arc;

use crate::chunk::{
    ChunkDataAccessor, ChunkDataModifier, DataChunk, ExternalType, PrimitiveBuffer,
};
use crate::chunking::ChunkPosition;
use crate::flow::ChunkFunction;
use crate::{RasterFlowError, Result};

/// Errors surfaced by a parser during evaluation.
pub type EvalError = Box<dyn std::error::Error + Send + Sync>;

/// Result type of a parsed expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpressionType {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl ExpressionType {
    /// The chunk external type results are stored in. Booleans store
    /// as bytes holding 0 or 1.
    pub fn storage_type(&self) -> ExternalType {
        match self {
            ExpressionType::Boolean | ExpressionType::Byte => ExternalType::Byte,
            ExpressionType::Short => ExternalType::Short,
            ExpressionType::Int => ExternalType::Int,
            ExpressionType::Long => ExternalType::Long,
            ExpressionType::Float => ExternalType::Float,
            ExpressionType::Double => ExternalType::Double,
        }
    }
}

/// Per-element variable reads handed to the parser during evaluation.
pub trait ValueSource {
    fn get_byte_property(&self, var: usize) -> i8;
    fn get_short_property(&self, var: usize) -> i16;
    fn get_int_property(&self, var: usize) -> i32;
    fn get_long_property(&self, var: usize) -> i64;
    fn get_float_property(&self, var: usize) -> f32;
    fn get_double_property(&self, var: usize) -> f64;
}

/// A parsed arithmetic expression.
///
/// Variables bind positionally: input chunk `k` serves the variable at
/// `variables()[k]`. Only the `evaluate_*` method matching
/// [`result_type`](Self::result_type) is ever called; the rest default
/// to an error.
pub trait ExpressionParser: Send + Sync {
    /// Declared variables, in binding order.
    fn variables(&self) -> &[String];

    /// The primitive class of one variable.
    fn variable_type(&self, name: &str) -> ExternalType;

    fn result_type(&self) -> ExpressionType;

    fn evaluate_boolean(&self, _source: &dyn ValueSource) -> std::result::Result<bool, EvalError> {
        Err("expression does not evaluate to boolean".into())
    }

    fn evaluate_byte(&self, _source: &dyn ValueSource) -> std::result::Result<i8, EvalError> {
        Err("expression does not evaluate to byte".into())
    }

    fn evaluate_short(&self, _source: &dyn ValueSource) -> std::result::Result<i16, EvalError> {
        Err("expression does not evaluate to short".into())
    }

    fn evaluate_int(&self, _source: &dyn ValueSource) -> std::result::Result<i32, EvalError> {
        Err("expression does not evaluate to int".into())
    }

    fn evaluate_long(&self, _source: &dyn ValueSource) -> std::result::Result<i64, EvalError> {
        Err("expression does not evaluate to long".into())
    }

    fn evaluate_float(&self, _source: &dyn ValueSource) -> std::result::Result<f32, EvalError> {
        Err("expression does not evaluate to float".into())
    }

    fn evaluate_double(&self, _source: &dyn ValueSource) -> std::result::Result<f64, EvalError> {
        Err("expression does not evaluate to double".into())
    }
}

struct ElementSource<'a, 'c> {
    accessors: &'a [ChunkDataAccessor<'c>],
    index: usize,
}

impl ValueSource for ElementSource<'_, '_> {
    fn get_byte_property(&self, var: usize) -> i8 {
        self.accessors[var].get_byte(self.index)
    }

    fn get_short_property(&self, var: usize) -> i16 {
        self.accessors[var].get_short(self.index)
    }

    fn get_int_property(&self, var: usize) -> i32 {
        self.accessors[var].get_int(self.index)
    }

    fn get_long_property(&self, var: usize) -> i64 {
        self.accessors[var].get_long(self.index)
    }

    fn get_float_property(&self, var: usize) -> f32 {
        self.accessors[var].get_float(self.index)
    }

    fn get_double_property(&self, var: usize) -> f64 {
        self.accessors[var].get_double(self.index)
    }
}

macro_rules! eval_loop {
    ($self:expr, $accessors:expr, $mask:expr, $n:expr, $method:ident, $t:ty, $variant:ident) => {{
        let mut out: Vec<$t> = vec![Default::default(); $n];
        for e in 0..$n {
            if $self.skip_missing && $accessors.iter().any(|a| a.is_missing(e)) {
                $mask[e] = true;
                continue;
            }
            let source = ElementSource {
                accessors: $accessors,
                index: e,
            };
            out[e] = $self
                .parser
                .$method(&source)
                .map_err(RasterFlowError::EvaluationFailure)?;
        }
        PrimitiveBuffer::$variant(out)
    }};
}

/// Evaluates a parsed expression over N input chunks, producing one
/// chunk per position.
pub struct ExpressionFunction {
    parser: Arc<dyn ExpressionParser>,
    prototype: DataChunk,
    skip_missing: bool,
}

impl ExpressionFunction {
    /// The prototype defines the output chunk metadata; its external
    /// type must match the parser's result type.
    pub fn new(
        parser: Arc<dyn ExpressionParser>,
        prototype: DataChunk,
        skip_missing: bool,
    ) -> Result<Self> {
        let storage = parser.result_type().storage_type();
        if prototype.external_type() != storage {
            return Err(RasterFlowError::InvalidChunkConfig(format!(
                "expression results are {:?} but the prototype reads as {:?}",
                storage,
                prototype.external_type()
            )));
        }
        Ok(Self {
            parser,
            prototype: prototype.prototype(),
            skip_missing,
        })
    }
}

impl ChunkFunction for ExpressionFunction {
    fn apply(
        &self,
        pos: &ChunkPosition,
        inputs: &[Option<DataChunk>],
    ) -> Result<Option<DataChunk>> {
        let expected = self.parser.variables().len();
        let found = inputs.iter().flatten().count();
        if inputs.len() != expected || found != expected {
            return Err(RasterFlowError::ChunkCountMismatch { expected, found });
        }
        let accessors = inputs
            .iter()
            .flatten()
            .map(ChunkDataAccessor::new)
            .collect::<Result<Vec<_>>>()?;

        let n = pos.values();
        let mut mask = vec![false; n];
        let accessors = &accessors[..];
        let output = match self.parser.result_type() {
            ExpressionType::Boolean => {
                let mut out = vec![0_i8; n];
                for e in 0..n {
                    if self.skip_missing && accessors.iter().any(|a| a.is_missing(e)) {
                        mask[e] = true;
                        continue;
                    }
                    let source = ElementSource {
                        accessors,
                        index: e,
                    };
                    out[e] = self
                        .parser
                        .evaluate_boolean(&source)
                        .map_err(RasterFlowError::EvaluationFailure)? as i8;
                }
                PrimitiveBuffer::Byte(out)
            }
            ExpressionType::Byte => eval_loop!(self, accessors, mask, n, evaluate_byte, i8, Byte),
            ExpressionType::Short => {
                eval_loop!(self, accessors, mask, n, evaluate_short, i16, Short)
            }
            ExpressionType::Int => eval_loop!(self, accessors, mask, n, evaluate_int, i32, Int),
            ExpressionType::Long => eval_loop!(self, accessors, mask, n, evaluate_long, i64, Long),
            ExpressionType::Float => {
                eval_loop!(self, accessors, mask, n, evaluate_float, f32, Float)
            }
            ExpressionType::Double => {
                eval_loop!(self, accessors, mask, n, evaluate_double, f64, Double)
            }
        };

        let mut chunk = self.prototype.blank_copy_with_values(n);
        ChunkDataModifier::new(output)
            .with_missing_mask(mask)
            .apply(&mut chunk)?;
        Ok(Some(chunk))
    }

    fn memory(&self, pos: &ChunkPosition, _input_count: usize) -> usize {
        let values = pos.values();
        let mut total: usize = self
            .parser
            .variables()
            .iter()
            .map(|name| self.parser.variable_type(name).value_bytes() * values)
            .sum();
        total += values;
        if !self.parser.result_type().storage_type().is_float() {
            total += values;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{FloatChunk, ShortChunk};

    struct AddParser {
        vars: Vec<String>,
    }

    impl AddParser {
        fn new() -> Self {
            Self {
                vars: vec!["a".into(), "b".into()],
            }
        }
    }

    impl ExpressionParser for AddParser {
        fn variables(&self) -> &[String] {
            &self.vars
        }

        fn variable_type(&self, _name: &str) -> ExternalType {
            ExternalType::Short
        }

        fn result_type(&self) -> ExpressionType {
            ExpressionType::Float
        }

        fn evaluate_float(&self, source: &dyn ValueSource) -> std::result::Result<f32, EvalError> {
            Ok((source.get_short_property(0) + source.get_short_property(1)) as f32)
        }
    }

    fn short_chunk(data: Vec<i16>) -> Option<DataChunk> {
        Some(DataChunk::Short(ShortChunk::new(data, Some(-1), None, false)))
    }

    fn float_prototype() -> DataChunk {
        DataChunk::Float(FloatChunk::new(Vec::new(), None, None).unwrap())
    }

    #[test]
    fn missing_inputs_skip_evaluation() {
        let function =
            ExpressionFunction::new(Arc::new(AddParser::new()), float_prototype(), true).unwrap();
        let pos = ChunkPosition::new(vec![0], vec![4]);
        let inputs = vec![
            short_chunk(vec![1, 2, -1, 4]),
            short_chunk(vec![10, -1, 30, 40]),
        ];
        let out = function.apply(&pos, &inputs).unwrap().unwrap();
        match &out {
            DataChunk::Float(c) => {
                assert_eq!(c.data()[0], 11.0);
                assert!(c.data()[1].is_nan());
                assert!(c.data()[2].is_nan());
                assert_eq!(c.data()[3], 44.0);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn input_count_must_match_the_variables() {
        let function =
            ExpressionFunction::new(Arc::new(AddParser::new()), float_prototype(), true).unwrap();
        let pos = ChunkPosition::new(vec![0], vec![1]);
        let err = function.apply(&pos, &[short_chunk(vec![1])]);
        assert!(matches!(
            err,
            Err(RasterFlowError::ChunkCountMismatch {
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn prototype_must_match_the_result_type() {
        let prototype = DataChunk::Short(ShortChunk::new(Vec::new(), None, None, false));
        assert!(ExpressionFunction::new(Arc::new(AddParser::new()), prototype, true).is_err());
    }

    struct IsPositive {
        vars: Vec<String>,
    }

    impl ExpressionParser for IsPositive {
        fn variables(&self) -> &[String] {
            &self.vars
        }

        fn variable_type(&self, _name: &str) -> ExternalType {
            ExternalType::Int
        }

        fn result_type(&self) -> ExpressionType {
            ExpressionType::Boolean
        }

        fn evaluate_boolean(
            &self,
            source: &dyn ValueSource,
        ) -> std::result::Result<bool, EvalError> {
            Ok(source.get_int_property(0) > 0)
        }
    }

    #[test]
    fn booleans_store_as_bytes() {
        use crate::chunk::ByteChunk;
        let parser = IsPositive {
            vars: vec!["x".into()],
        };
        let prototype = DataChunk::Byte(ByteChunk::new(Vec::new(), None, None, false));
        let function = ExpressionFunction::new(Arc::new(parser), prototype, false).unwrap();
        let pos = ChunkPosition::new(vec![0], vec![3]);
        let input = vec![Some(DataChunk::Int(crate::chunk::IntChunk::new(
            vec![-5, 0, 9],
            None,
            None,
            false,
        )))];
        let out = function.apply(&pos, &input).unwrap().unwrap();
        match &out {
            DataChunk::Byte(c) => assert_eq!(c.data(), &[0, 0, 1]),
            _ => unreachable!(),
        }
    }

    struct FailingParser {
        vars: Vec<String>,
    }

    impl ExpressionParser for FailingParser {
        fn variables(&self) -> &[String] {
            &self.vars
        }

        fn variable_type(&self, _name: &str) -> ExternalType {
            ExternalType::Short
        }

        fn result_type(&self) -> ExpressionType {
            ExpressionType::Float
        }

        fn evaluate_float(&self, _source: &dyn ValueSource) -> std::result::Result<f32, EvalError> {
            Err("division by zero".into())
        }
    }

    #[test]
    fn parser_errors_surface_as_evaluation_failures() {
        let parser = FailingParser {
            vars: vec!["a".into()],
        };
        let function = ExpressionFunction::new(Arc::new(parser), float_prototype(), false).unwrap();
        let pos = ChunkPosition::new(vec![0], vec![1]);
        let err = function.apply(&pos, &[short_chunk(vec![1])]);
        assert!(matches!(err, Err(RasterFlowError::EvaluationFailure(_))));
    }
}
