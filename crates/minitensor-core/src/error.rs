use crate::shape::Shape;

/// All errors that can occur within minitensor.
///
/// Every operation validates its inputs before building any output, so an
/// `Err` always means "nothing was computed and no tensor was touched".
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A shape with no dimensions or a zero-sized dimension.
    #[error("invalid shape {dims:?}: tensors need at least one dimension and every dimension must be positive")]
    InvalidShape { dims: Vec<usize> },

    /// Shape mismatch between two tensors where broadcasting does not apply.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Operation requires a specific rank (number of dimensions).
    #[error("rank mismatch in {op}: expected rank {expected}, got {got}")]
    RankMismatch {
        op: &'static str,
        expected: usize,
        got: usize,
    },

    /// Element count mismatch when creating from a vec.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Matrix multiplication dimension mismatch.
    #[error("matmul shape mismatch: [{m}x{k1}] @ [{k2}x{n}], inner dims must match")]
    MatmulShapeMismatch {
        m: usize,
        k1: usize,
        k2: usize,
        n: usize,
    },

    /// Cannot reshape because element counts differ.
    #[error(
        "cannot reshape: source has {src} elements, target shape {dst_shape} has {dst} elements"
    )]
    ReshapeElementMismatch {
        src: usize,
        dst: usize,
        dst_shape: Shape,
    },

    /// Two shapes are not broadcast-compatible.
    #[error("shapes {lhs} and {rhs} are not broadcast-compatible")]
    Broadcast { lhs: Shape, rhs: Shape },

    /// Reduction or softmax requested along an axis that is not supported.
    #[error("{op}: unsupported axis {axis} for tensor of rank {rank}")]
    UnsupportedAxis {
        op: &'static str,
        axis: String,
        rank: usize,
    },

    /// A zero divisor was observed in a forward or backward division.
    #[error("{op}: division by zero")]
    DivideByZero { op: &'static str },

    /// An input value lies outside the domain of a math function.
    #[error("{op}: value {value} is outside the domain")]
    Domain { op: &'static str, value: f64 },

    /// An integer result does not fit the element type.
    #[error("{op}: integer overflow")]
    Overflow { op: &'static str },

    /// Backing storage for a tensor could not be reserved.
    #[error("failed to allocate storage for {elements} elements")]
    Allocation { elements: usize },

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

/// Coarse classification of [`Error`], used by callers that translate errors
/// into another error model (exception classes, status codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Shape,
    Broadcast,
    UnsupportedAxis,
    DivideByZero,
    Domain,
    Allocation,
    Other,
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidShape { .. }
            | Error::ShapeMismatch { .. }
            | Error::RankMismatch { .. }
            | Error::ElementCountMismatch { .. }
            | Error::MatmulShapeMismatch { .. }
            | Error::ReshapeElementMismatch { .. } => ErrorKind::Shape,
            Error::Broadcast { .. } => ErrorKind::Broadcast,
            Error::UnsupportedAxis { .. } => ErrorKind::UnsupportedAxis,
            Error::DivideByZero { .. } => ErrorKind::DivideByZero,
            Error::Domain { .. } | Error::Overflow { .. } => ErrorKind::Domain,
            Error::Allocation { .. } => ErrorKind::Allocation,
            Error::Msg(_) => ErrorKind::Other,
        }
    }
}

/// Convenience Result type used throughout minitensor.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let e = Error::InvalidShape { dims: vec![0, 2] };
        assert_eq!(e.kind(), ErrorKind::Shape);
        let e = Error::Broadcast {
            lhs: Shape::from((3, 2)),
            rhs: Shape::from((4, 2)),
        };
        assert_eq!(e.kind(), ErrorKind::Broadcast);
        assert_eq!(e.to_string(), "shapes [3, 2] and [4, 2] are not broadcast-compatible");
        assert_eq!(Error::DivideByZero { op: "div" }.kind(), ErrorKind::DivideByZero);
        assert_eq!(Error::Overflow { op: "add" }.kind(), ErrorKind::Domain);
        assert_eq!(Error::msg("boom").kind(), ErrorKind::Other);
    }
}
