use std::fmt;
use std::str::FromStr;

use crate::error::Error;

// DType — Supported element types
//
// A graph never mixes element types: every tensor of a computation shares one
// Rust type T, fixed at compile time. The DType enum is the runtime mirror of
// that choice, used for diagnostics and by callers that pick an element type
// from a string at runtime.
//
//   I32 — signed 32-bit integer, arithmetic and reductions only
//   F32 — 32-bit float, the default workhorse
//   F64 — 64-bit float, used by gradient checks

/// Enum of all supported element data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    I32,
    F32,
    F64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::I32 | DType::F32 => 4,
            DType::F64 => 8,
        }
    }

    /// Whether this dtype supports transcendental ops (exp, log, tanh, ...).
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::I32 => "int32",
            DType::F32 => "float32",
            DType::F64 => "float64",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for DType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int32" | "i32" => Ok(DType::I32),
            "float32" | "f32" => Ok(DType::F32),
            "float64" | "f64" => Ok(DType::F64),
            other => Err(Error::msg(format!(
                "unknown dtype '{other}', expected one of int32, float32, float64"
            ))),
        }
    }
}

// WithDType — Trait that connects Rust types to the DType enum
//
// The tensor, the graph and the backward pass are all generic over
// T: WithDType. The arithmetic bounds come from num_traits so the same kernel
// code serves integers and floats; conversions through f64 cover the few
// places (mean, finite differences) that need a common numeric type.

/// Trait implemented by Rust types that can be stored in a tensor.
pub trait WithDType:
    Copy
    + Send
    + Sync
    + 'static
    + num_traits::Num
    + std::ops::Neg<Output = Self>
    + std::ops::AddAssign
    + PartialOrd
    + fmt::Debug
    + fmt::Display
{
    /// The corresponding DType enum variant.
    const DTYPE: DType;

    /// Convert this value to f64.
    fn to_f64(self) -> f64;

    /// Create a value of this type from f64 (truncating for integers).
    fn from_f64(v: f64) -> Self;

    /// Build a value from an element count (used as a divisor by mean and the losses).
    fn from_usize(n: usize) -> Self {
        Self::from_f64(n as f64)
    }

    // Checked element arithmetic. Kernels go through these so that integer
    // overflow surfaces as Error::Overflow rather than a panic or a silently
    // wrapped value. Floats never fail (they saturate to ±inf).

    fn try_add(self, rhs: Self) -> Option<Self> {
        Some(self + rhs)
    }

    fn try_sub(self, rhs: Self) -> Option<Self> {
        Some(self - rhs)
    }

    fn try_mul(self, rhs: Self) -> Option<Self> {
        Some(self * rhs)
    }

    /// Callers reject zero divisors first; `None` means the quotient overflowed.
    fn try_div(self, rhs: Self) -> Option<Self> {
        Some(self / rhs)
    }

    fn try_neg(self) -> Option<Self> {
        Some(-self)
    }
}

/// Floating-point element types; required by transcendental ops.
pub trait FloatDType: WithDType + num_traits::Float {}

impl WithDType for i32 {
    const DTYPE: DType = DType::I32;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as i32
    }
    fn try_add(self, rhs: Self) -> Option<Self> {
        self.checked_add(rhs)
    }
    fn try_sub(self, rhs: Self) -> Option<Self> {
        self.checked_sub(rhs)
    }
    fn try_mul(self, rhs: Self) -> Option<Self> {
        self.checked_mul(rhs)
    }
    fn try_div(self, rhs: Self) -> Option<Self> {
        self.checked_div(rhs)
    }
    fn try_neg(self) -> Option<Self> {
        self.checked_neg()
    }
}

impl WithDType for f32 {
    const DTYPE: DType = DType::F32;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

impl WithDType for f64 {
    const DTYPE: DType = DType::F64;
    fn to_f64(self) -> f64 {
        self
    }
    fn from_f64(v: f64) -> Self {
        v
    }
}

impl FloatDType for f32 {}
impl FloatDType for f64 {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_size() {
        assert_eq!(DType::I32.size_in_bytes(), 4);
        assert_eq!(DType::F32.size_in_bytes(), 4);
        assert_eq!(DType::F64.size_in_bytes(), 8);
    }

    #[test]
    fn test_dtype_parse() {
        assert_eq!("float32".parse::<DType>().unwrap(), DType::F32);
        assert_eq!("i32".parse::<DType>().unwrap(), DType::I32);
        assert_eq!("f64".parse::<DType>().unwrap(), DType::F64);
        assert!("bf16".parse::<DType>().is_err());
        assert_eq!(DType::F64.to_string(), "float64");
    }

    #[test]
    fn test_with_dtype_f32() {
        assert_eq!(f32::DTYPE, DType::F32);
        assert_eq!(f32::from_f64(3.14).to_f64(), 3.140000104904175); // f32 precision
    }

    #[test]
    fn test_with_dtype_roundtrip() {
        let v: f64 = 42.0;
        assert_eq!(f64::from_f64(v).to_f64(), v);
        assert_eq!(i32::from_f64(v).to_f64(), v);
        assert_eq!(i32::from_f64(2.9), 2);
        assert_eq!(i32::from_usize(7), 7);
    }

    #[test]
    fn test_checked_arithmetic() {
        assert_eq!(WithDType::try_add(2i32, 3), Some(5));
        assert_eq!(WithDType::try_add(i32::MAX, 1), None);
        assert_eq!(WithDType::try_sub(i32::MIN, 1), None);
        assert_eq!(WithDType::try_mul(i32::MAX, 2), None);
        assert_eq!(WithDType::try_div(i32::MIN, -1), None);
        assert_eq!(WithDType::try_neg(i32::MIN), None);
        assert_eq!(WithDType::try_neg(-4i32), Some(4));
        // Floats go to infinity instead of failing.
        assert_eq!(f32::MAX.try_mul(2.0), Some(f32::INFINITY));
        assert_eq!(1.0f64.try_div(4.0), Some(0.25));
    }
}
