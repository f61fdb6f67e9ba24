//! Error types for the formexpr crate.
//!
//! This module defines the error types raised while building and rewriting
//! expressions. The main error types are:
//!
//! - `BuildError`: Invalid node construction (arity, shape or free index inconsistencies)
//! - `TransformError`: Failures inside a pass over the expression DAG
//! - `LoweringError`: Compound tensor operators that cannot be lowered for a given shape
//! - `EvalError`: Numeric evaluation of an expanded expression
//! - `FormError`: Umbrella error wrapping all of the above
//!
//! All failures are deterministic and raised at the point of violation. Messages
//! carry the offending node in its printed form so they can be acted on.

use thiserror::Error;

use crate::expr::{Expr, Kind};
use crate::types::{Index, Shape};

/// Errors raised by the validating constructors of the builder.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    /// Error when a node receives the wrong number of operands
    #[error("{kind:?} expects {expected} operands, got {got}")]
    Arity {
        kind: Kind,
        expected: usize,
        got: usize,
    },
    /// Error when two operands that must agree in shape do not
    #[error("shape mismatch in {op}: {left:?} vs {right:?}")]
    ShapeMismatch {
        op: &'static str,
        left: Shape,
        right: Shape,
    },
    /// Error when two operands that must agree in free indices do not
    #[error("free index mismatch in {op}: {left} vs {right}")]
    FreeIndexMismatch {
        op: &'static str,
        left: String,
        right: String,
    },
    /// Error when an operand must be scalar but is not
    #[error("{op} expects a scalar operand, got shape {shape:?} in {expr}")]
    ExpectedScalar {
        op: &'static str,
        shape: Shape,
        expr: String,
    },
    /// Error when an index is used with two different dimensions
    #[error("index {index} used with dimensions {first} and {second}")]
    IndexDimensionConflict {
        index: Index,
        first: usize,
        second: usize,
    },
    /// Error when a multi-index does not match the rank it subscripts
    #[error("multi-index of length {got} cannot subscript rank {expected} expression {expr}")]
    RankMismatch {
        expected: usize,
        got: usize,
        expr: String,
    },
    /// Error when a fixed index exceeds its dimension
    #[error("fixed index {value} out of range for dimension {dim} in {expr}")]
    ComponentOutOfRange {
        value: usize,
        dim: usize,
        expr: String,
    },
    /// Error when an index is expected to be free in an expression but is not
    #[error("index {index} is not a free index of {expr}")]
    NotFree { index: Index, expr: String },
    /// Error when a fixed index is given where only free indices are valid
    #[error("{op} expects free indices only")]
    ExpectedFreeIndex { op: &'static str },
    /// Error when an index appears more than twice in a product
    #[error("index {index} repeated more than twice in {expr}")]
    IndexRepeatedTooOften { index: Index, expr: String },
    /// Error when the geometric dimension cannot be determined for a derivative
    #[error("cannot determine the geometric dimension of {expr}")]
    NoGeometricDimension { expr: String },
    /// Error when an operand has an unsupported kind or shape for an operator
    #[error("invalid operand for {op}: {reason}")]
    InvalidOperand { op: &'static str, reason: String },
}

/// Errors raised by a pass walking the expression DAG.
#[derive(Error, Debug, Clone)]
pub enum TransformError {
    /// Error when a handler table lacks an entry for an encountered kind
    #[error("no handler for {kind:?} while transforming {expr}")]
    MissingHandler { kind: Kind, expr: String },
    /// Error when a component tuple does not match the rank of the node it selects from
    #[error("component size mismatch: expected {expected}, got {got} at {expr}")]
    ShapeMismatch {
        expected: usize,
        got: usize,
        expr: String,
    },
    /// Error when a free index has no value assigned in the current scope
    #[error("free index set mismatch, these indices have no value assigned: {indices} at {expr}")]
    UnassignedIndex { indices: String, expr: String },
    /// Error when a structural precondition of a pass does not hold
    #[error("not implemented: {reason} at {expr}")]
    Unsupported { reason: &'static str, expr: String },
    /// The expression is not multilinear in its arguments
    #[error("expression is not multilinear in its arguments: {0}")]
    NotMultilinear(Expr),
    /// Error when rebuilding a node fails
    #[error("failed to rebuild node")]
    Build(#[from] BuildError),
    /// Error when lowering a compound operator fails
    #[error("failed to lower compound operator")]
    Lowering(#[from] LoweringError),
}

impl TransformError {
    /// Whether this is the nonlinearity condition rather than a fatal failure.
    pub fn is_not_multilinear(&self) -> bool {
        matches!(self, TransformError::NotMultilinear(_))
    }
}

/// Errors raised by the compound operator lowering library.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoweringError {
    /// Error when a square matrix is required
    #[error("expecting square matrix, got shape {0:?}")]
    NotSquare(Shape),
    /// Error when no closed form exists for the requested dimension
    #[error("{op} not implemented for dimension {dim}")]
    DimensionNotImplemented { op: &'static str, dim: usize },
    /// Error when the operand is neither a scalar nor a matrix
    #[error("{op} not implemented for shape {shape:?}")]
    UnsupportedShape { op: &'static str, shape: Shape },
    /// Error when the operand carries free indices
    #[error("{op} expects an operand without free indices, got {expr}")]
    FreeIndices { op: &'static str, expr: String },
    /// Error when building the lowered expression fails
    #[error("failed to build lowered expression")]
    Build(#[from] BuildError),
}

/// Errors raised while evaluating an expression numerically.
#[derive(Error, Debug, Clone)]
pub enum EvalError {
    /// Error when a terminal has no bound value
    #[error("no value bound for {0}")]
    Unbound(String),
    /// Error when the expression is not a scalar
    #[error("can only evaluate scalar expressions, got shape {shape:?} for {expr}")]
    NonScalar { shape: Shape, expr: String },
    /// Error when a node cannot be evaluated after index expansion
    #[error("cannot evaluate {0}")]
    Unsupported(String),
    /// Error when a bound value does not provide the requested component
    #[error("component {component:?} out of range for {expr}")]
    ComponentOutOfRange { component: Vec<usize>, expr: String },
    /// Error when index expansion fails before evaluation
    #[error("failed to expand indices")]
    Transform(#[from] TransformError),
}

/// High-level error wrapping the stage specific errors.
#[derive(Error, Debug, Clone)]
pub enum FormError {
    #[error("failed to build expression")]
    Build(#[from] BuildError),
    #[error("failed to transform expression")]
    Transform(#[from] TransformError),
    #[error("failed to lower compound expression")]
    Lowering(#[from] LoweringError),
    #[error("failed to evaluate expression")]
    Eval(#[from] EvalError),
}
