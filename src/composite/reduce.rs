//! Stock reduction operators.

use super::ReductionOperator;

/// Smallest value in the slice.
pub struct Minimum;

/// Largest value in the slice.
pub struct Maximum;

/// Arithmetic mean, narrowed back to the slice's type.
pub struct Mean;

/// Median; even-length slices average the two central values.
pub struct Median;

macro_rules! extremum_impl {
    ($method:ident, $t:ty, $keep:tt) => {
        fn $method(&self, values: &[$t]) -> $t {
            values
                .iter()
                .copied()
                .reduce(|a, b| if b $keep a { b } else { a })
                .unwrap_or_default()
        }
    };
}

impl ReductionOperator for Minimum {
    extremum_impl!(reduce_bytes, i8, <);
    extremum_impl!(reduce_shorts, i16, <);
    extremum_impl!(reduce_ints, i32, <);
    extremum_impl!(reduce_longs, i64, <);
    extremum_impl!(reduce_floats, f32, <);
    extremum_impl!(reduce_doubles, f64, <);
}

impl ReductionOperator for Maximum {
    extremum_impl!(reduce_bytes, i8, >);
    extremum_impl!(reduce_shorts, i16, >);
    extremum_impl!(reduce_ints, i32, >);
    extremum_impl!(reduce_longs, i64, >);
    extremum_impl!(reduce_floats, f32, >);
    extremum_impl!(reduce_doubles, f64, >);
}

macro_rules! mean_int_impl {
    ($method:ident, $t:ty) => {
        fn $method(&self, values: &[$t]) -> $t {
            if values.is_empty() {
                return Default::default();
            }
            let sum: i64 = values.iter().map(|&v| v as i64).sum();
            (sum / values.len() as i64) as $t
        }
    };
}

macro_rules! mean_float_impl {
    ($method:ident, $t:ty) => {
        fn $method(&self, values: &[$t]) -> $t {
            if values.is_empty() {
                return Default::default();
            }
            let sum: f64 = values.iter().map(|&v| v as f64).sum();
            (sum / values.len() as f64) as $t
        }
    };
}

impl ReductionOperator for Mean {
    mean_int_impl!(reduce_bytes, i8);
    mean_int_impl!(reduce_shorts, i16);
    mean_int_impl!(reduce_ints, i32);
    mean_int_impl!(reduce_longs, i64);
    mean_float_impl!(reduce_floats, f32);
    mean_float_impl!(reduce_doubles, f64);
}

macro_rules! median_int_impl {
    ($method:ident, $t:ty) => {
        fn $method(&self, values: &[$t]) -> $t {
            if values.is_empty() {
                return Default::default();
            }
            let mut sorted = values.to_vec();
            sorted.sort_unstable();
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 1 {
                sorted[mid]
            } else {
                (((sorted[mid - 1] as i64) + (sorted[mid] as i64)) / 2) as $t
            }
        }
    };
}

macro_rules! median_float_impl {
    ($method:ident, $t:ty) => {
        fn $method(&self, values: &[$t]) -> $t {
            if values.is_empty() {
                return Default::default();
            }
            let mut sorted = values.to_vec();
            sorted.sort_unstable_by(<$t>::total_cmp);
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 1 {
                sorted[mid]
            } else {
                (sorted[mid - 1] + sorted[mid]) / 2.0
            }
        }
    };
}

impl ReductionOperator for Median {
    median_int_impl!(reduce_bytes, i8);
    median_int_impl!(reduce_shorts, i16);
    median_int_impl!(reduce_ints, i32);
    median_int_impl!(reduce_longs, i64);
    median_float_impl!(reduce_floats, f32);
    median_float_impl!(reduce_doubles, f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extrema_pick_the_endpoints() {
        assert_eq!(Minimum.reduce_shorts(&[4, -2, 9]), -2);
        assert_eq!(Maximum.reduce_shorts(&[4, -2, 9]), 9);
        assert_eq!(Maximum.reduce_doubles(&[0.5, 0.25]), 0.5);
    }

    #[test]
    fn mean_narrows_to_the_input_type() {
        assert_eq!(Mean.reduce_bytes(&[1, 2, 4]), 2);
        assert_eq!(Mean.reduce_floats(&[1.0, 2.0]), 1.5);
    }

    #[test]
    fn median_handles_odd_and_even_lengths() {
        assert_eq!(Median.reduce_ints(&[9, 1, 5]), 5);
        assert_eq!(Median.reduce_ints(&[4, 1, 9, 5]), 4);
        assert_eq!(Median.reduce_floats(&[1.0, 2.0, 3.0, 10.0]), 2.5);
    }
}
