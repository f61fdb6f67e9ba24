//! Symbolic core of a finite element form language.
//!
//! This crate represents integrands of variational forms as immutable,
//! hash-consed expression DAGs and provides the passes a form compiler runs
//! on them before code generation.
//!
//! # Features
//!
//! - Tensor expressions with Einstein index notation and free index tracking
//! - A generic post-order transformation engine driven by per-kind handler tables
//! - Index expansion down to scalar components (`expand_indices`)
//! - Detection of repeated subexpressions and binding to named variables
//! - Multilinearity analysis over the test and trial functions of a form
//! - Closed form lowering of determinants, inverses, adjugates, cofactors,
//!   deviatoric parts and pseudo-inverses
//! - Numeric evaluation against bound `f64`, `Vec`, `nalgebra` or `ndarray` values
//!
//! # Example
//!
//! ```rust
//! use formexpr::prelude::*;
//!
//! let a = Expr::coefficient(FunctionSpace::tensor(vec![2, 2], 2));
//! let det = Expr::determinant(&a).unwrap();
//!
//! // Replace det(A) by A[0, 0] * A[1, 1] - A[0, 1] * A[1, 0]
//! let lowered = apply_algebra_lowering(&det).unwrap();
//! let expanded = expand_indices(&lowered).unwrap();
//!
//! let bindings = Bindings::new().bind(&a, vec![vec![2.0, 1.0], vec![1.0, 3.0]]);
//! assert_eq!(evaluate(&expanded, &bindings).unwrap(), 5.0);
//! ```

pub use analysis::{
    extract_arguments, extract_basisfunction_dependencies, extract_coefficients,
    extract_indices, extract_terminals, extract_type, is_multilinear, DependencySet,
    IntegrandSummary,
};
pub use expand::{expand_indices, purge_list_tensors};
pub use expr::Expr;
pub use lowering::apply_algebra_lowering;
pub use variables::{extract_duplications, extract_variables, mark_duplications, strip_variables};

pub mod prelude {
    pub use crate::analysis::{
        extract_arguments, extract_basisfunction_dependencies, extract_coefficients,
        is_multilinear, IntegrandSummary,
    };
    pub use crate::backends::value::TensorValue;
    pub use crate::builder::indices;
    pub use crate::compound::{
        adj_expr, cofactor_expr, cross_expr, determinant_expr, deviatoric_expr, inverse_expr,
        pseudo_determinant_expr, pseudo_inverse_expr,
    };
    pub use crate::eval::{evaluate, Bindings};
    pub use crate::expand::expand_indices;
    pub use crate::expr::{Comparison, Expr, Kind, Side};
    pub use crate::lowering::apply_algebra_lowering;
    pub use crate::transform::{reuse_if_possible, transform, HandlerTable};
    pub use crate::types::{FunctionSpace, Index, IndexItem};
    pub use crate::variables::{mark_duplications, strip_variables};
}

/// Queries and the multilinearity analysis
pub mod analysis;
/// Numeric values bound to terminals
pub mod backends {
    pub mod matrix;
    pub mod value;
    pub mod vector;
}
/// Data-parallel application of the passes
pub mod batch;
/// Validating node constructors and arithmetic operators
pub mod builder;
/// Closed form expansions of compound tensor operators
pub mod compound;
/// Error types for the various failure modes
pub mod errors;
/// Numeric evaluation of scalar expressions
pub mod eval;
/// Index expansion
pub mod expand;
/// Expression DAG representation
pub mod expr;
/// Lowering of compound operators into index notation
pub mod lowering;
/// Generic transformation engine
pub mod transform;
/// Indices, labels and function spaces
pub mod types;
/// Duplicated subexpressions and variables
pub mod variables;
