//! Rewriting of compound tensor algebra into index notation.
//!
//! [`apply_algebra_lowering`] replaces every `Transposed`, `Inner`, `Outer`,
//! `Dot`, `Cross`, `Trace`, `Skew`, `Determinant`, `Inverse`, `Cofactor`,
//! `Deviatoric`, `Div`, `Curl` and `Rot` node by an expression made of
//! indexing, arithmetic, tensor constructors and spatial derivatives of
//! components. The result is accepted by [`crate::expand::expand_indices`].

use log::debug;

use crate::builder::{contract, indices};
use crate::compound::{
    cofactor_expr, cross_expr, determinant_expr, deviatoric_expr, inverse_expr,
};
use crate::errors::{BuildError, TransformError};
use crate::expr::{Expr, Kind};
use crate::transform::{transform, HandlerTable};
use crate::types::{Index, IndexItem};

/// Kinds rewritten by [`apply_algebra_lowering`].
pub const COMPOUND_KINDS: &[Kind] = &[
    Kind::Transposed,
    Kind::Inner,
    Kind::Outer,
    Kind::Dot,
    Kind::Cross,
    Kind::Trace,
    Kind::Skew,
    Kind::Determinant,
    Kind::Inverse,
    Kind::Cofactor,
    Kind::Deviatoric,
    Kind::Div,
    Kind::Curl,
    Kind::Rot,
];

/// Lowers all compound operators in `expr`.
///
/// Operands are lowered before their parents, so a compound formula always
/// receives operands that are free of compound nodes.
///
/// # Errors
/// Fails with `TransformError::Lowering` when a compound operator has no
/// closed form for its operand, e.g. the adjugate of a 5x5 matrix.
pub fn apply_algebra_lowering(expr: &Expr) -> Result<Expr, TransformError> {
    debug!("lowering compound operators in {} nodes", expr.node_count());
    let table = HandlerTable::reusing()
        .on(Kind::Transposed, |_, ops| Ok(transposed(&ops[0])?))
        .on(Kind::Inner, |_, ops| Ok(inner(&ops[0], &ops[1])?))
        .on(Kind::Outer, |_, ops| Ok(outer(&ops[0], &ops[1])?))
        .on(Kind::Dot, |_, ops| Ok(contract(&ops[0], &ops[1])?))
        .on(Kind::Cross, |_, ops| Ok(cross_expr(&ops[0], &ops[1])?))
        .on(Kind::Trace, |_, ops| Ok(trace(&ops[0])?))
        .on(Kind::Skew, |_, ops| Ok(skew(&ops[0])?))
        .on(Kind::Determinant, |_, ops| Ok(determinant_expr(&ops[0])?))
        .on(Kind::Inverse, |_, ops| Ok(inverse_expr(&ops[0])?))
        .on(Kind::Cofactor, |_, ops| Ok(cofactor_expr(&ops[0])?))
        .on(Kind::Deviatoric, |_, ops| Ok(deviatoric_expr(&ops[0])?))
        .on(Kind::Div, |_, ops| Ok(divergence(&ops[0])?))
        .on_each(&[Kind::Curl, Kind::Rot], |_, ops| Ok(curl(&ops[0])?));
    transform(expr, &table)
}

/// `as_tensor(A[i, j], (j, i))`.
fn transposed(a: &Expr) -> Result<Expr, BuildError> {
    let (i, j) = (Index::new(), Index::new());
    Expr::as_tensor(&a.at(&[i, j])?, &[j, i])
}

/// `a[ii] * b[ii]`, summed over `ii`.
fn inner(a: &Expr, b: &Expr) -> Result<Expr, BuildError> {
    let ii = indices(a.rank());
    a.at(&ii)?.try_mul(&b.at(&ii)?)
}

/// `as_tensor(a[ii] * b[jj], ii + jj)`.
fn outer(a: &Expr, b: &Expr) -> Result<Expr, BuildError> {
    let ii = indices(a.rank());
    let jj = indices(b.rank());
    let product = a.at(&ii)?.try_mul(&b.at(&jj)?)?;
    Expr::as_tensor(&product, &[ii, jj].concat())
}

fn trace(a: &Expr) -> Result<Expr, BuildError> {
    let i = Index::new();
    a.at(&[i, i])
}

/// `as_tensor((A[i, j] - A[j, i]) / 2, (i, j))`.
fn skew(a: &Expr) -> Result<Expr, BuildError> {
    let (i, j) = (Index::new(), Index::new());
    let difference = a.at(&[i, j])?.try_sub(&a.at(&[j, i])?)?;
    Expr::as_tensor(&difference.try_div(&Expr::int(2))?, &[i, j])
}

/// `f.dx(index)`, summing `index` when `f` already carries it.
fn dx(f: &Expr, item: IndexItem) -> Result<Expr, BuildError> {
    let derivative = Expr::spatial_derivative(f, &[item])?;
    match item {
        IndexItem::Free(index) if f.free_indices().contains(index) => {
            Expr::index_sum(&derivative, index)
        }
        _ => Ok(derivative),
    }
}

/// `as_tensor(a[ii, i].dx(i), ii)`.
fn divergence(a: &Expr) -> Result<Expr, BuildError> {
    let ii = indices(a.rank().saturating_sub(1));
    let i = Index::new();
    let component = a.at(&[ii.as_slice(), &[i][..]].concat())?;
    Expr::as_tensor(&dx(&component, IndexItem::Free(i))?, &ii)
}

fn curl(a: &Expr) -> Result<Expr, BuildError> {
    let d = |f: &Expr, k: usize| dx(f, IndexItem::Fixed(k));
    match a.shape() {
        [] => Expr::as_vector(vec![d(a, 1)?, d(a, 0)?.try_neg()?]),
        [2] => d(&a.component(&[1])?, 0)?.try_sub(&d(&a.component(&[0])?, 1)?),
        [3] => {
            let c = |i: usize, j: usize| -> Result<Expr, BuildError> {
                d(&a.component(&[j])?, i)?.try_sub(&d(&a.component(&[i])?, j)?)
            };
            Expr::as_vector(vec![c(1, 2)?, c(2, 0)?, c(0, 1)?])
        }
        shape => Err(BuildError::InvalidOperand {
            op: "curl",
            reason: format!("expecting a scalar, 2-vector or 3-vector, got shape {shape:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::extract_type;
    use crate::errors::LoweringError;
    use crate::expand::expand_indices;
    use crate::types::FunctionSpace;

    fn matrix(n: usize) -> Expr {
        Expr::coefficient(FunctionSpace::tensor(vec![n, n], n))
    }

    fn has_compound(e: &Expr) -> bool {
        e.unique_pre_traversal().any(|n| COMPOUND_KINDS.contains(&n.kind()))
    }

    #[test]
    fn test_lowered_tree_has_no_compound_nodes() {
        let a = matrix(3);
        let b = matrix(3);
        let e = Expr::inner(
            &Expr::dot(&Expr::transposed(&a).unwrap(), &b).unwrap(),
            &Expr::skew(&Expr::inverse(&a).unwrap()).unwrap(),
        )
        .unwrap()
            + Expr::trace(&Expr::cofactor(&b).unwrap()).unwrap()
            + Expr::determinant(&Expr::deviatoric(&a).unwrap()).unwrap();
        assert!(has_compound(&e));
        let lowered = apply_algebra_lowering(&e).unwrap();
        assert!(!has_compound(&lowered));
        assert_eq!(lowered.shape(), e.shape());
        assert!(expand_indices(&lowered).is_ok());
    }

    #[test]
    fn test_tree_without_compounds_is_reused() {
        let f = Expr::coefficient(FunctionSpace::scalar(2));
        let e = &f * &f + Expr::int(1);
        assert!(apply_algebra_lowering(&e).unwrap().ptr_eq(&e));
    }

    #[test]
    fn test_trace_lowers_to_repeated_index() {
        let a = matrix(2);
        let lowered = apply_algebra_lowering(&Expr::trace(&a).unwrap()).unwrap();
        assert_eq!(lowered.kind(), Kind::IndexSum);
        let expanded = expand_indices(&lowered).unwrap();
        let expected = a.component(&[0, 0]).unwrap() + a.component(&[1, 1]).unwrap();
        assert_eq!(expanded, expected);
    }

    #[test]
    fn test_outer_and_cross_shapes() {
        let u = Expr::coefficient(FunctionSpace::vector(3, 3));
        let v = Expr::coefficient(FunctionSpace::vector(3, 3));
        let outer = apply_algebra_lowering(&Expr::outer(&u, &v).unwrap()).unwrap();
        assert_eq!(outer.shape(), &[3, 3]);
        let cross = apply_algebra_lowering(&Expr::cross(&u, &v).unwrap()).unwrap();
        assert_eq!(cross.kind(), Kind::ListTensor);
        assert_eq!(cross, cross_expr(&u, &v).unwrap());
    }

    #[test]
    fn test_div_and_curl_use_spatial_derivatives() {
        let u = Expr::coefficient(FunctionSpace::vector(3, 3));
        let div = apply_algebra_lowering(&Expr::div(&u).unwrap()).unwrap();
        assert!(div.is_scalar());
        assert!(div.free_indices().is_empty());
        assert_eq!(div.kind(), Kind::IndexSum);

        let curl = apply_algebra_lowering(&Expr::curl(&u).unwrap()).unwrap();
        assert_eq!(curl.shape(), &[3]);
        assert_eq!(extract_type(&curl, Kind::SpatialDerivative).len(), 6);

        let w = Expr::coefficient(FunctionSpace::vector(2, 2));
        let rot = apply_algebra_lowering(&Expr::rot(&w).unwrap()).unwrap();
        assert!(rot.is_scalar());
        let s = Expr::coefficient(FunctionSpace::scalar(2));
        let rot = apply_algebra_lowering(&Expr::rot(&s).unwrap()).unwrap();
        assert_eq!(rot.shape(), &[2]);
    }

    #[test]
    fn test_unsupported_dimension_is_reported() {
        let a = matrix(5);
        let err = apply_algebra_lowering(&Expr::cofactor(&a).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            TransformError::Lowering(LoweringError::DimensionNotImplemented { dim: 5, .. })
        ));
    }
}
