//! Closed form expansions of compound tensor operators.
//!
//! Each function maps a compound operator applied to `A` to an expression
//! built only from indexing, scalar arithmetic and the `as_vector`,
//! `as_matrix` and `as_tensor` constructors. Dimension dispatch is exact:
//! an operator without a formula for the given dimension fails with
//! `LoweringError::DimensionNotImplemented`.
//!
//! The matrix operands must not carry free indices. Their components are then
//! plain scalars, for which the arithmetic operators used below cannot fail.

use log::trace;

use crate::errors::LoweringError;
use crate::expr::Expr;
use crate::types::{Index, IndexItem};

type Entries = Vec<Vec<Expr>>;

fn expect_index_free(op: &'static str, a: &Expr) -> Result<(), LoweringError> {
    if a.free_indices().is_empty() {
        Ok(())
    } else {
        Err(LoweringError::FreeIndices {
            op,
            expr: a.to_string(),
        })
    }
}

fn matrix_shape(op: &'static str, a: &Expr) -> Result<(usize, usize), LoweringError> {
    match a.shape() {
        [m, n] => Ok((*m, *n)),
        shape => Err(LoweringError::UnsupportedShape {
            op,
            shape: shape.to_vec(),
        }),
    }
}

fn square_dim(op: &'static str, a: &Expr) -> Result<usize, LoweringError> {
    let (m, n) = matrix_shape(op, a)?;
    if m != n {
        return Err(LoweringError::NotSquare(a.shape().to_vec()));
    }
    expect_index_free(op, a)?;
    Ok(m)
}

/// All scalar components `A[i, j]` of an index-free matrix.
fn entries(a: &Expr) -> Result<Entries, LoweringError> {
    let (m, n) = matrix_shape("entries", a)?;
    let mut rows = Vec::with_capacity(m);
    for i in 0..m {
        let row = (0..n)
            .map(|j| a.component(&[i, j]))
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(row);
    }
    Ok(rows)
}

fn frac(numerator: f64, denominator: f64) -> Expr {
    Expr::float(numerator / denominator)
}

/// Symbolic cross product of two 3-vectors.
pub fn cross_expr(a: &Expr, b: &Expr) -> Result<Expr, LoweringError> {
    for v in [a, b] {
        if v.shape() != [3] {
            return Err(LoweringError::UnsupportedShape {
                op: "cross_expr",
                shape: v.shape().to_vec(),
            });
        }
        expect_index_free("cross_expr", v)?;
    }
    let c = |i: usize, j: usize| -> Result<Expr, LoweringError> {
        Ok(a.component(&[i])? * b.component(&[j])? - a.component(&[j])? * b.component(&[i])?)
    };
    Ok(Expr::as_vector(vec![c(1, 2)?, c(2, 0)?, c(0, 1)?])?)
}

/// Determinant, falling back to the pseudo-determinant for non-square matrices.
///
/// # Arguments
/// * `a` - Scalar or matrix expression
///
/// # Returns
/// `a` itself for a scalar, a closed form cofactor expansion for square
/// matrices (Laplace expansion along the first row for `n > 3`).
pub fn determinant_expr(a: &Expr) -> Result<Expr, LoweringError> {
    if a.is_zero() {
        return Ok(Expr::zero());
    }
    match a.shape() {
        [] => Ok(a.clone()),
        [m, n] if m == n => {
            let n = *n;
            expect_index_free("determinant_expr", a)?;
            trace!("lowering determinant of {n}x{n} matrix");
            let b = entries(a)?;
            Ok(match n {
                1 => b[0][0].clone(),
                2 => det_2x2(&b, 0, 1, 0, 1),
                _ => {
                    let range = (0..n).collect::<Vec<_>>();
                    codeterminant(&b, &range, &range)
                }
            })
        }
        [_, _] => pseudo_determinant_expr(a),
        shape => Err(LoweringError::UnsupportedShape {
            op: "determinant_expr",
            shape: shape.to_vec(),
        }),
    }
}

fn det_2x2(b: &Entries, i: usize, j: usize, k: usize, l: usize) -> Expr {
    &b[i][k] * &b[j][l] - &b[i][l] * &b[j][k]
}

/// Determinant of the submatrix selected by `rows` and `cols`.
fn codeterminant(b: &Entries, rows: &[usize], cols: &[usize]) -> Expr {
    if rows.len() == 2 {
        return det_2x2(b, rows[0], rows[1], cols[0], cols[1]);
    }
    let mut codet = Expr::zero();
    let r = rows[0];
    let subrows = &rows[1..];
    for (i, &c) in cols.iter().enumerate() {
        let subcols = cols[..i]
            .iter()
            .chain(&cols[i + 1..])
            .copied()
            .collect::<Vec<_>>();
        let sign = if i % 2 == 0 { 1 } else { -1 };
        codet = codet + Expr::int(sign) * &b[r][c] * codeterminant(b, subrows, &subcols);
    }
    codet
}

/// Pseudo-determinant `sqrt(det(A^T A))` of a non-square matrix.
pub fn pseudo_determinant_expr(a: &Expr) -> Result<Expr, LoweringError> {
    let (m, n) = matrix_shape("pseudo_determinant_expr", a)?;
    expect_index_free("pseudo_determinant_expr", a)?;
    if n == 1 {
        let i = Index::new();
        let column = a.index(&[IndexItem::Free(i), IndexItem::Fixed(0)])?;
        return Ok(column.try_mul(&column)?.try_sqrt()?);
    }
    if n == 2 && m == 3 {
        let column = |j: usize| -> Result<Expr, LoweringError> {
            let i = Index::new();
            Ok(Expr::as_tensor(
                &a.index(&[IndexItem::Free(i), IndexItem::Fixed(j)])?,
                &[i],
            )?)
        };
        let c = cross_expr(&column(0)?, &column(1)?)?;
        let i = Index::new();
        let ci = c.at(&[i])?;
        return Ok(ci.try_mul(&ci)?.try_sqrt()?);
    }
    Ok(determinant_expr(&gram_matrix(a)?)?.try_sqrt()?)
}

/// `as_tensor(A[k, i] * A[k, j], (i, j))`.
fn gram_matrix(a: &Expr) -> Result<Expr, LoweringError> {
    let (i, j, k) = (Index::new(), Index::new(), Index::new());
    let product = a.at(&[k, i])?.try_mul(&a.at(&[k, j])?)?;
    Ok(Expr::as_tensor(&product, &[i, j])?)
}

/// Moore-Penrose pseudo-inverse `(A^T A)^-1 A^T` of a non-square matrix.
pub fn pseudo_inverse_expr(a: &Expr) -> Result<Expr, LoweringError> {
    let (_, n) = matrix_shape("pseudo_inverse_expr", a)?;
    expect_index_free("pseudo_inverse_expr", a)?;
    if n == 1 {
        let (i, j, k) = (Index::new(), Index::new(), Index::new());
        let transposed = Expr::as_tensor(&a.at(&[i, j])?, &[j, i])?;
        let column = a.index(&[IndexItem::Free(k), IndexItem::Fixed(0)])?;
        return Ok(transposed.try_div(&column.try_mul(&column)?)?);
    }
    let gram_inverse = inverse_expr(&gram_matrix(a)?)?;
    let (q, r, s) = (Index::new(), Index::new(), Index::new());
    let product = gram_inverse.at(&[r, q])?.try_mul(&a.at(&[s, q])?)?;
    Ok(Expr::as_tensor(&product, &[r, s])?)
}

/// Inverse, falling back to the pseudo-inverse for non-square matrices.
pub fn inverse_expr(a: &Expr) -> Result<Expr, LoweringError> {
    match a.shape() {
        [] => Ok(Expr::float(1.0).try_div(a)?),
        [m, n] if m == n => {
            expect_index_free("inverse_expr", a)?;
            if *m == 1 {
                let entry = Expr::float(1.0).try_div(&a.component(&[0, 0])?)?;
                return Ok(Expr::as_matrix(vec![vec![entry]])?);
            }
            Ok(adj_expr(a)?.try_div(&determinant_expr(a)?)?)
        }
        [_, _] => pseudo_inverse_expr(a),
        shape => Err(LoweringError::UnsupportedShape {
            op: "inverse_expr",
            shape: shape.to_vec(),
        }),
    }
}

/// Adjugate of a 2x2, 3x3 or 4x4 matrix.
pub fn adj_expr(a: &Expr) -> Result<Expr, LoweringError> {
    let dim = square_dim("adj_expr", a)?;
    let a = entries(a)?;
    let rows = match dim {
        2 => adj_2x2(&a),
        3 => adj_3x3(&a),
        4 => adj_4x4(&a),
        dim => return Err(LoweringError::DimensionNotImplemented { op: "adj_expr", dim }),
    };
    Ok(Expr::as_matrix(rows)?)
}

fn adj_2x2(a: &Entries) -> Entries {
    vec![
        vec![a[1][1].clone(), -&a[0][1]],
        vec![-&a[1][0], a[0][0].clone()],
    ]
}

#[rustfmt::skip]
fn adj_3x3(a: &Entries) -> Entries {
    vec![
        vec![
            &a[2][2] * &a[1][1] - &a[1][2] * &a[2][1],
            -&a[0][1] * &a[2][2] + &a[0][2] * &a[2][1],
            &a[0][1] * &a[1][2] - &a[0][2] * &a[1][1],
        ],
        vec![
            -&a[2][2] * &a[1][0] + &a[1][2] * &a[2][0],
            -&a[0][2] * &a[2][0] + &a[2][2] * &a[0][0],
            &a[0][2] * &a[1][0] - &a[1][2] * &a[0][0],
        ],
        vec![
            &a[1][0] * &a[2][1] - &a[2][0] * &a[1][1],
            &a[0][1] * &a[2][0] - &a[0][0] * &a[2][1],
            &a[0][0] * &a[1][1] - &a[0][1] * &a[1][0],
        ],
    ]
}

#[rustfmt::skip]
fn adj_4x4(a: &Entries) -> Entries {
    vec![
        vec![
            -&a[3][3] * &a[2][1] * &a[1][2] + &a[1][2] * &a[3][1] * &a[2][3] + &a[1][1] * &a[3][3] * &a[2][2] - &a[3][1] * &a[2][2] * &a[1][3] + &a[2][1] * &a[1][3] * &a[3][2] - &a[1][1] * &a[3][2] * &a[2][3],
            -&a[3][1] * &a[0][2] * &a[2][3] + &a[0][1] * &a[3][2] * &a[2][3] - &a[0][3] * &a[2][1] * &a[3][2] + &a[3][3] * &a[2][1] * &a[0][2] - &a[3][3] * &a[0][1] * &a[2][2] + &a[0][3] * &a[3][1] * &a[2][2],
            &a[3][1] * &a[1][3] * &a[0][2] + &a[1][1] * &a[0][3] * &a[3][2] - &a[0][3] * &a[1][2] * &a[3][1] - &a[0][1] * &a[1][3] * &a[3][2] + &a[3][3] * &a[1][2] * &a[0][1] - &a[1][1] * &a[3][3] * &a[0][2],
            &a[1][1] * &a[0][2] * &a[2][3] - &a[2][1] * &a[1][3] * &a[0][2] + &a[0][3] * &a[2][1] * &a[1][2] - &a[1][2] * &a[0][1] * &a[2][3] - &a[1][1] * &a[0][3] * &a[2][2] + &a[0][1] * &a[2][2] * &a[1][3],
        ],
        vec![
            &a[3][3] * &a[1][2] * &a[2][0] - &a[3][0] * &a[1][2] * &a[2][3] + &a[1][0] * &a[3][2] * &a[2][3] - &a[3][3] * &a[1][0] * &a[2][2] - &a[1][3] * &a[3][2] * &a[2][0] + &a[3][0] * &a[2][2] * &a[1][3],
            &a[0][3] * &a[3][2] * &a[2][0] - &a[0][3] * &a[3][0] * &a[2][2] + &a[3][3] * &a[0][0] * &a[2][2] + &a[3][0] * &a[0][2] * &a[2][3] - &a[0][0] * &a[3][2] * &a[2][3] - &a[3][3] * &a[0][2] * &a[2][0],
            -&a[3][3] * &a[0][0] * &a[1][2] + &a[0][0] * &a[1][3] * &a[3][2] - &a[3][0] * &a[1][3] * &a[0][2] + &a[3][3] * &a[1][0] * &a[0][2] + &a[0][3] * &a[3][0] * &a[1][2] - &a[0][3] * &a[1][0] * &a[3][2],
            &a[0][3] * &a[1][0] * &a[2][2] + &a[1][3] * &a[0][2] * &a[2][0] - &a[0][0] * &a[2][2] * &a[1][3] - &a[0][3] * &a[1][2] * &a[2][0] + &a[0][0] * &a[1][2] * &a[2][3] - &a[1][0] * &a[0][2] * &a[2][3],
        ],
        vec![
            &a[3][1] * &a[1][3] * &a[2][0] + &a[3][3] * &a[2][1] * &a[1][0] + &a[1][1] * &a[3][0] * &a[2][3] - &a[1][0] * &a[3][1] * &a[2][3] - &a[3][0] * &a[2][1] * &a[1][3] - &a[1][1] * &a[3][3] * &a[2][0],
            &a[3][3] * &a[0][1] * &a[2][0] - &a[3][3] * &a[0][0] * &a[2][1] - &a[0][3] * &a[3][1] * &a[2][0] - &a[3][0] * &a[0][1] * &a[2][3] + &a[0][0] * &a[3][1] * &a[2][3] + &a[0][3] * &a[3][0] * &a[2][1],
            -&a[0][0] * &a[3][1] * &a[1][3] + &a[0][3] * &a[1][0] * &a[3][1] - &a[3][3] * &a[1][0] * &a[0][1] + &a[1][1] * &a[3][3] * &a[0][0] - &a[1][1] * &a[0][3] * &a[3][0] + &a[3][0] * &a[0][1] * &a[1][3],
            &a[0][0] * &a[2][1] * &a[1][3] + &a[1][0] * &a[0][1] * &a[2][3] - &a[0][3] * &a[2][1] * &a[1][0] + &a[1][1] * &a[0][3] * &a[2][0] - &a[1][1] * &a[0][0] * &a[2][3] - &a[0][1] * &a[1][3] * &a[2][0],
        ],
        vec![
            -&a[1][2] * &a[3][1] * &a[2][0] - &a[2][1] * &a[1][0] * &a[3][2] + &a[3][0] * &a[2][1] * &a[1][2] - &a[1][1] * &a[3][0] * &a[2][2] + &a[1][0] * &a[3][1] * &a[2][2] + &a[1][1] * &a[3][2] * &a[2][0],
            -&a[3][0] * &a[2][1] * &a[0][2] - &a[0][1] * &a[3][2] * &a[2][0] + &a[3][1] * &a[0][2] * &a[2][0] - &a[0][0] * &a[3][1] * &a[2][2] + &a[3][0] * &a[0][1] * &a[2][2] + &a[0][0] * &a[2][1] * &a[3][2],
            &a[0][0] * &a[1][2] * &a[3][1] - &a[1][0] * &a[3][1] * &a[0][2] + &a[1][1] * &a[3][0] * &a[0][2] + &a[1][0] * &a[0][1] * &a[3][2] - &a[3][0] * &a[1][2] * &a[0][1] - &a[1][1] * &a[0][0] * &a[3][2],
            -&a[1][1] * &a[0][2] * &a[2][0] + &a[2][1] * &a[1][0] * &a[0][2] + &a[1][2] * &a[0][1] * &a[2][0] + &a[1][1] * &a[0][0] * &a[2][2] - &a[1][0] * &a[0][1] * &a[2][2] - &a[0][0] * &a[2][1] * &a[1][2],
        ],
    ]
}

/// Cofactor matrix of a 2x2, 3x3 or 4x4 matrix.
pub fn cofactor_expr(a: &Expr) -> Result<Expr, LoweringError> {
    let dim = square_dim("cofactor_expr", a)?;
    let a = entries(a)?;
    let rows = match dim {
        2 => cofactor_2x2(&a),
        3 => cofactor_3x3(&a),
        4 => cofactor_4x4(&a),
        dim => {
            return Err(LoweringError::DimensionNotImplemented {
                op: "cofactor_expr",
                dim,
            })
        }
    };
    Ok(Expr::as_matrix(rows)?)
}

fn cofactor_2x2(a: &Entries) -> Entries {
    vec![
        vec![a[1][1].clone(), -&a[1][0]],
        vec![-&a[0][1], a[0][0].clone()],
    ]
}

#[rustfmt::skip]
fn cofactor_3x3(a: &Entries) -> Entries {
    vec![
        vec![
            &a[1][1] * &a[2][2] - &a[2][1] * &a[1][2],
            &a[2][0] * &a[1][2] - &a[1][0] * &a[2][2],
            -&a[2][0] * &a[1][1] + &a[1][0] * &a[2][1],
        ],
        vec![
            &a[2][1] * &a[0][2] - &a[0][1] * &a[2][2],
            &a[0][0] * &a[2][2] - &a[2][0] * &a[0][2],
            -&a[0][0] * &a[2][1] + &a[2][0] * &a[0][1],
        ],
        vec![
            &a[0][1] * &a[1][2] - &a[1][1] * &a[0][2],
            &a[1][0] * &a[0][2] - &a[0][0] * &a[1][2],
            -&a[1][0] * &a[0][1] + &a[0][0] * &a[1][1],
        ],
    ]
}

#[rustfmt::skip]
fn cofactor_4x4(a: &Entries) -> Entries {
    vec![
        vec![
            -&a[3][1] * &a[2][2] * &a[1][3] - &a[3][2] * &a[2][3] * &a[1][1] + &a[1][3] * &a[3][2] * &a[2][1] + &a[3][1] * &a[2][3] * &a[1][2] + &a[2][2] * &a[1][1] * &a[3][3] - &a[3][3] * &a[2][1] * &a[1][2],
            -&a[1][0] * &a[2][2] * &a[3][3] + &a[2][0] * &a[3][3] * &a[1][2] + &a[2][2] * &a[1][3] * &a[3][0] - &a[2][3] * &a[3][0] * &a[1][2] + &a[1][0] * &a[3][2] * &a[2][3] - &a[1][3] * &a[3][2] * &a[2][0],
            &a[1][0] * &a[3][3] * &a[2][1] + &a[2][3] * &a[1][1] * &a[3][0] - &a[2][0] * &a[1][1] * &a[3][3] - &a[1][3] * &a[3][0] * &a[2][1] - &a[1][0] * &a[3][1] * &a[2][3] + &a[3][1] * &a[1][3] * &a[2][0],
            &a[3][0] * &a[2][1] * &a[1][2] + &a[1][0] * &a[3][1] * &a[2][2] + &a[3][2] * &a[2][0] * &a[1][1] - &a[2][2] * &a[1][1] * &a[3][0] - &a[3][1] * &a[2][0] * &a[1][2] - &a[1][0] * &a[3][2] * &a[2][1],
        ],
        vec![
            &a[3][1] * &a[2][2] * &a[0][3] + &a[0][2] * &a[3][3] * &a[2][1] + &a[0][1] * &a[3][2] * &a[2][3] - &a[3][1] * &a[0][2] * &a[2][3] - &a[0][1] * &a[2][2] * &a[3][3] - &a[3][2] * &a[0][3] * &a[2][1],
            -&a[2][2] * &a[0][3] * &a[3][0] - &a[0][2] * &a[2][0] * &a[3][3] - &a[3][2] * &a[2][3] * &a[0][0] + &a[2][2] * &a[3][3] * &a[0][0] + &a[0][2] * &a[2][3] * &a[3][0] + &a[3][2] * &a[2][0] * &a[0][3],
            &a[3][1] * &a[2][3] * &a[0][0] - &a[0][1] * &a[2][3] * &a[3][0] - &a[3][1] * &a[2][0] * &a[0][3] - &a[3][3] * &a[0][0] * &a[2][1] + &a[0][3] * &a[3][0] * &a[2][1] + &a[0][1] * &a[2][0] * &a[3][3],
            &a[3][2] * &a[0][0] * &a[2][1] - &a[0][2] * &a[3][0] * &a[2][1] + &a[0][1] * &a[2][2] * &a[3][0] + &a[3][1] * &a[0][2] * &a[2][0] - &a[0][1] * &a[3][2] * &a[2][0] - &a[3][1] * &a[2][2] * &a[0][0],
        ],
        vec![
            &a[3][1] * &a[1][3] * &a[0][2] - &a[0][2] * &a[1][1] * &a[3][3] - &a[3][1] * &a[0][3] * &a[1][2] + &a[3][2] * &a[1][1] * &a[0][3] + &a[0][1] * &a[3][3] * &a[1][2] - &a[0][1] * &a[1][3] * &a[3][2],
            &a[1][3] * &a[3][2] * &a[0][0] - &a[1][0] * &a[3][2] * &a[0][3] - &a[1][3] * &a[0][2] * &a[3][0] + &a[0][3] * &a[3][0] * &a[1][2] + &a[1][0] * &a[0][2] * &a[3][3] - &a[3][3] * &a[0][0] * &a[1][2],
            -&a[1][0] * &a[0][1] * &a[3][3] + &a[0][1] * &a[1][3] * &a[3][0] - &a[3][1] * &a[1][3] * &a[0][0] - &a[1][1] * &a[0][3] * &a[3][0] + &a[1][0] * &a[3][1] * &a[0][3] + &a[1][1] * &a[3][3] * &a[0][0],
            &a[0][2] * &a[1][1] * &a[3][0] - &a[3][2] * &a[1][1] * &a[0][0] - &a[0][1] * &a[3][0] * &a[1][2] - &a[1][0] * &a[3][1] * &a[0][2] + &a[3][1] * &a[0][0] * &a[1][2] + &a[1][0] * &a[0][1] * &a[3][2],
        ],
        vec![
            &a[0][3] * &a[2][1] * &a[1][2] + &a[0][2] * &a[2][3] * &a[1][1] + &a[0][1] * &a[2][2] * &a[1][3] - &a[2][2] * &a[1][1] * &a[0][3] - &a[1][3] * &a[0][2] * &a[2][1] - &a[0][1] * &a[2][3] * &a[1][2],
            &a[1][0] * &a[2][2] * &a[0][3] + &a[1][3] * &a[0][2] * &a[2][0] - &a[1][0] * &a[0][2] * &a[2][3] - &a[2][0] * &a[0][3] * &a[1][2] - &a[2][2] * &a[1][3] * &a[0][0] + &a[2][3] * &a[0][0] * &a[1][2],
            -&a[0][1] * &a[1][3] * &a[2][0] + &a[2][0] * &a[1][1] * &a[0][3] + &a[1][3] * &a[0][0] * &a[2][1] - &a[1][0] * &a[0][3] * &a[2][1] + &a[1][0] * &a[0][1] * &a[2][3] - &a[2][3] * &a[1][1] * &a[0][0],
            &a[1][0] * &a[0][2] * &a[2][1] - &a[0][2] * &a[2][0] * &a[1][1] + &a[0][1] * &a[2][0] * &a[1][2] + &a[2][2] * &a[1][1] * &a[0][0] - &a[1][0] * &a[0][1] * &a[2][2] - &a[0][0] * &a[2][1] * &a[1][2],
        ],
    ]
}

/// Deviatoric part `A - tr(A) I / n` of a 2x2 or 3x3 matrix.
pub fn deviatoric_expr(a: &Expr) -> Result<Expr, LoweringError> {
    let dim = square_dim("deviatoric_expr", a)?;
    let a = entries(a)?;
    let rows = match dim {
        2 => vec![
            vec![
                frac(-1.0, 2.0) * &a[1][1] + frac(1.0, 2.0) * &a[0][0],
                a[0][1].clone(),
            ],
            vec![
                a[1][0].clone(),
                frac(1.0, 2.0) * &a[1][1] - frac(1.0, 2.0) * &a[0][0],
            ],
        ],
        3 => vec![
            vec![
                frac(-1.0, 3.0) * &a[1][1] - frac(1.0, 3.0) * &a[2][2] + frac(2.0, 3.0) * &a[0][0],
                a[0][1].clone(),
                a[0][2].clone(),
            ],
            vec![
                a[1][0].clone(),
                frac(2.0, 3.0) * &a[1][1] - frac(1.0, 3.0) * &a[2][2] - frac(1.0, 3.0) * &a[0][0],
                a[1][2].clone(),
            ],
            vec![
                a[2][0].clone(),
                a[2][1].clone(),
                frac(-1.0, 3.0) * &a[1][1] + frac(2.0, 3.0) * &a[2][2] - frac(1.0, 3.0) * &a[0][0],
            ],
        ],
        dim => {
            return Err(LoweringError::DimensionNotImplemented {
                op: "deviatoric_expr",
                dim,
            })
        }
    };
    Ok(Expr::as_matrix(rows)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Kind;
    use crate::types::FunctionSpace;

    fn matrix(m: usize, n: usize) -> Expr {
        Expr::coefficient(FunctionSpace::tensor(vec![m, n], m))
    }

    #[test]
    fn test_determinant_2x2_formula() {
        let a = matrix(2, 2);
        let c = |i, j| a.component(&[i, j]).unwrap();
        let expected = c(0, 0) * c(1, 1) - c(0, 1) * c(1, 0);
        assert_eq!(determinant_expr(&a).unwrap(), expected);
    }

    #[test]
    fn test_determinant_of_scalar_and_zero() {
        let f = Expr::coefficient(FunctionSpace::scalar(2));
        assert!(determinant_expr(&f).unwrap().ptr_eq(&f));
        let zero = Expr::zero_tensor(vec![3, 3], Default::default());
        assert!(determinant_expr(&zero).unwrap().is_zero());
        let a = matrix(1, 1);
        assert_eq!(determinant_expr(&a).unwrap(), a.component(&[0, 0]).unwrap());
    }

    #[test]
    fn test_determinant_3x3_expansion_along_first_row() {
        let a = matrix(3, 3);
        let b = entries(&a).unwrap();
        let minor = |j, l| det_2x2(&b, 1, 2, j, l);
        let expected = Expr::zero()
            + &b[0][0] * minor(1, 2)
            + -&b[0][1] * minor(0, 2)
            + &b[0][2] * minor(0, 1);
        assert_eq!(determinant_expr(&a).unwrap(), expected);
    }

    #[test]
    fn test_non_square_determinant_is_pseudo_determinant() {
        let a = matrix(3, 2);
        let det = determinant_expr(&a).unwrap();
        assert_eq!(det.kind(), Kind::Sqrt);
        let bindings = crate::eval::Bindings::new()
            .bind(&a, vec![vec![1.0, 2.0], vec![0.0, 1.0], vec![3.0, -1.0]]);
        let pseudo = pseudo_determinant_expr(&a).unwrap();
        assert_eq!(
            crate::eval::evaluate(&det, &bindings).unwrap(),
            crate::eval::evaluate(&pseudo, &bindings).unwrap()
        );
        let column = matrix(3, 1);
        assert_eq!(determinant_expr(&column).unwrap().kind(), Kind::Sqrt);
        let wide = matrix(2, 4);
        assert_eq!(determinant_expr(&wide).unwrap().kind(), Kind::Sqrt);
    }

    #[test]
    fn test_inverse_shapes() {
        let f = Expr::coefficient(FunctionSpace::scalar(2));
        assert_eq!(inverse_expr(&f).unwrap().kind(), Kind::Division);
        assert_eq!(inverse_expr(&matrix(1, 1)).unwrap().shape(), &[1, 1]);
        assert_eq!(inverse_expr(&matrix(3, 3)).unwrap().shape(), &[3, 3]);
        assert_eq!(inverse_expr(&matrix(3, 2)).unwrap().shape(), &[2, 3]);
        assert_eq!(inverse_expr(&matrix(3, 1)).unwrap().shape(), &[1, 3]);
    }

    #[test]
    fn test_adjugate_2x2() {
        let a = matrix(2, 2);
        let c = |i, j| a.component(&[i, j]).unwrap();
        let expected =
            Expr::as_matrix(vec![vec![c(1, 1), -c(0, 1)], vec![-c(1, 0), c(0, 0)]]).unwrap();
        assert_eq!(adj_expr(&a).unwrap(), expected);
    }

    #[test]
    fn test_cofactor_2x2() {
        let a = matrix(2, 2);
        let c = |i, j| a.component(&[i, j]).unwrap();
        let expected =
            Expr::as_matrix(vec![vec![c(1, 1), -c(1, 0)], vec![-c(0, 1), c(0, 0)]]).unwrap();
        assert_eq!(cofactor_expr(&a).unwrap(), expected);
        assert_eq!(cofactor_expr(&matrix(4, 4)).unwrap().shape(), &[4, 4]);
    }

    #[test]
    fn test_dimension_dispatch_errors() {
        assert!(matches!(
            adj_expr(&matrix(5, 5)),
            Err(LoweringError::DimensionNotImplemented { dim: 5, .. })
        ));
        assert!(matches!(
            cofactor_expr(&matrix(2, 3)),
            Err(LoweringError::NotSquare(_))
        ));
        assert!(matches!(
            deviatoric_expr(&matrix(4, 4)),
            Err(LoweringError::DimensionNotImplemented { dim: 4, .. })
        ));
        let v = Expr::coefficient(FunctionSpace::vector(3, 3));
        assert!(matches!(
            determinant_expr(&v),
            Err(LoweringError::UnsupportedShape { .. })
        ));
    }

    #[test]
    fn test_free_indices_are_rejected() {
        let t = Expr::coefficient(FunctionSpace::tensor(vec![2, 2, 2], 2));
        let (i, j, k) = (Index::new(), Index::new(), Index::new());
        let a = Expr::as_tensor(&t.at(&[i, j, k]).unwrap(), &[i, j]).unwrap();
        assert_eq!(a.shape(), &[2, 2]);
        assert!(matches!(
            determinant_expr(&a),
            Err(LoweringError::FreeIndices { .. })
        ));
        assert!(matches!(
            adj_expr(&a),
            Err(LoweringError::FreeIndices { .. })
        ));
    }

    #[test]
    fn test_cross_expr() {
        let a = Expr::coefficient(FunctionSpace::vector(3, 3));
        let b = Expr::coefficient(FunctionSpace::vector(3, 3));
        let c = cross_expr(&a, &b).unwrap();
        assert_eq!(c.shape(), &[3]);
        let ai = |i| a.component(&[i]).unwrap();
        let bi = |i| b.component(&[i]).unwrap();
        assert_eq!(c.component(&[0]).unwrap(), ai(1) * bi(2) - ai(2) * bi(1));
    }

    #[test]
    fn test_deviatoric_2x2() {
        let a = matrix(2, 2);
        let dev = deviatoric_expr(&a).unwrap();
        let c = |i, j| a.component(&[i, j]).unwrap();
        assert_eq!(dev.component(&[0, 1]).unwrap(), c(0, 1));
        assert_eq!(
            dev.component(&[1, 1]).unwrap(),
            Expr::float(0.5) * c(1, 1) - Expr::float(0.5) * c(0, 0)
        );
    }
}
