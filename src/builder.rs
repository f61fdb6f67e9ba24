//! Validating constructors for expression nodes.
//!
//! Every node enters the DAG through one of the functions in this module. They
//! check arity, shape and free index consistency and apply the light algebraic
//! simplifications the passes and the lowering formulas rely on:
//!
//! - zero operands vanish from sums and absorb products
//! - two constants fold into one
//! - operands of commutative nodes are sorted into a canonical order
//! - an index shared by both factors of a product is summed (Einstein convention)
//! - tensor valued products and divisions are rewritten component-wise
//!
//! Two layers exist. The user facing constructors (`try_mul`, `index`, ...)
//! apply implicit summation. The raw node constructors used by
//! [`Expr::reconstruct`] rebuild exactly the node they are given, since its
//! summation nodes are already present as parents.

use std::collections::BTreeMap;
use std::ops;

use itertools::Itertools;

use crate::errors::BuildError;
use crate::expr::{Comparison, Expr, Kind, Operator, Real, Side};
use crate::types::{
    next_coefficient_count, FreeIndices, FunctionSpace, Index, IndexItem, Label, Shape,
};

/// Creates `n` fresh free indices.
pub fn indices(n: usize) -> Vec<Index> {
    (0..n).map(|_| Index::new()).collect()
}

/// Wraps free indices as multi-index entries.
pub fn free_items(indices: &[Index]) -> Vec<IndexItem> {
    indices.iter().map(|&i| IndexItem::Free(i)).collect()
}

fn expect_scalar(op: &'static str, expr: &Expr) -> Result<(), BuildError> {
    if expr.is_scalar() {
        Ok(())
    } else {
        Err(BuildError::ExpectedScalar {
            op,
            shape: expr.shape().to_vec(),
            expr: expr.to_string(),
        })
    }
}

fn expect_same_shape(op: &'static str, a: &Expr, b: &Expr) -> Result<(), BuildError> {
    if a.shape() == b.shape() {
        Ok(())
    } else {
        Err(BuildError::ShapeMismatch {
            op,
            left: a.shape().to_vec(),
            right: b.shape().to_vec(),
        })
    }
}

fn expect_same_free(op: &'static str, a: &Expr, b: &Expr) -> Result<(), BuildError> {
    if a.free_indices() == b.free_indices() {
        Ok(())
    } else {
        Err(BuildError::FreeIndexMismatch {
            op,
            left: a.free_indices().to_string(),
            right: b.free_indices().to_string(),
        })
    }
}

fn expect_square(op: &'static str, a: &Expr) -> Result<usize, BuildError> {
    match a.shape() {
        [m, n] if m == n => Ok(*m),
        shape => Err(BuildError::InvalidOperand {
            op,
            reason: format!("expecting a square matrix, got shape {shape:?}"),
        }),
    }
}

/// Union of free indices for operators that do not contract.
fn merge_disjoint(op: &'static str, a: &Expr, b: &Expr) -> Result<FreeIndices, BuildError> {
    let repeated = a.free_indices().repeated(b.free_indices());
    if !repeated.is_empty() {
        return Err(BuildError::InvalidOperand {
            op,
            reason: format!(
                "repeated free indices {} in {a} and {b}",
                repeated.iter().map(|(i, _)| i).join(", ")
            ),
        });
    }
    a.free_indices().union(b.free_indices())
}

fn multi_index_items<'a>(op: &'static str, expr: &'a Expr) -> Result<&'a [IndexItem], BuildError> {
    expr.multi_index().ok_or_else(|| BuildError::InvalidOperand {
        op,
        reason: format!("expecting a multi-index, got {expr}"),
    })
}

fn free_only(op: &'static str, items: &[IndexItem]) -> Result<Vec<Index>, BuildError> {
    items
        .iter()
        .map(|item| item.as_free().ok_or(BuildError::ExpectedFreeIndex { op }))
        .collect()
}

/// Folds two constants, keeping integer arithmetic exact while it fits.
fn fold_constants(
    a: &Expr,
    b: &Expr,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Option<Expr> {
    let (x, y) = (a.scalar_value()?, b.scalar_value()?);
    let exact = match (a.operator(), b.operator()) {
        (Operator::IntValue(p), Operator::IntValue(q)) => int_op(*p, *q),
        (Operator::IntValue(p), Operator::Zero) => int_op(*p, 0),
        (Operator::Zero, Operator::IntValue(q)) => int_op(0, *q),
        _ => None,
    };
    Some(match exact {
        Some(value) => Expr::int(value),
        None => Expr::float(float_op(x, y)),
    })
}

impl Expr {
    /// Scalar zero.
    pub fn zero() -> Expr {
        Expr::zero_tensor(vec![], FreeIndices::new())
    }

    /// Zero of the given shape and free indices.
    pub fn zero_tensor(shape: Shape, free: FreeIndices) -> Expr {
        Expr::from_parts(Operator::Zero, vec![], shape, free)
    }

    /// Integer constant. Zero becomes [`Expr::zero`].
    pub fn int(value: i64) -> Expr {
        if value == 0 {
            return Expr::zero();
        }
        Expr::from_parts(Operator::IntValue(value), vec![], vec![], FreeIndices::new())
    }

    /// Floating point constant. Zero becomes [`Expr::zero`].
    pub fn float(value: f64) -> Expr {
        if value == 0.0 {
            return Expr::zero();
        }
        Expr::from_parts(
            Operator::FloatValue(Real::new(value)),
            vec![],
            vec![],
            FreeIndices::new(),
        )
    }

    /// `dim x dim` identity matrix.
    pub fn identity(dim: usize) -> Expr {
        Expr::from_parts(Operator::Identity(dim), vec![], vec![dim, dim], FreeIndices::new())
    }

    /// Argument number `number` (0 for the test function, 1 for the trial function).
    pub fn argument(number: usize, space: FunctionSpace) -> Expr {
        Expr::argument_part(number, None, space)
    }

    /// Argument restricted to one part of a mixed space.
    pub fn argument_part(number: usize, part: Option<usize>, space: FunctionSpace) -> Expr {
        let shape = space.value_shape.clone();
        Expr::from_parts(
            Operator::Argument {
                number,
                part,
                space,
            },
            vec![],
            shape,
            FreeIndices::new(),
        )
    }

    /// New coefficient with a process-unique count.
    pub fn coefficient(space: FunctionSpace) -> Expr {
        let shape = space.value_shape.clone();
        Expr::from_parts(
            Operator::Coefficient {
                count: next_coefficient_count(),
                space,
            },
            vec![],
            shape,
            FreeIndices::new(),
        )
    }

    pub fn spatial_coordinate(gdim: usize) -> Expr {
        Expr::from_parts(
            Operator::SpatialCoordinate(gdim),
            vec![],
            vec![gdim],
            FreeIndices::new(),
        )
    }

    pub fn label_terminal(label: Label) -> Expr {
        Expr::from_parts(Operator::Label(label), vec![], vec![], FreeIndices::new())
    }

    pub fn multi_index_node(items: Vec<IndexItem>) -> Expr {
        Expr::from_parts(Operator::MultiIndex(items), vec![], vec![], FreeIndices::new())
    }

    fn is_unit(&self) -> bool {
        match self.operator() {
            Operator::IntValue(v) => *v == 1,
            Operator::FloatValue(v) => v.value() == 1.0,
            _ => false,
        }
    }

    /// Sum of two expressions with equal shape and free indices.
    pub fn try_add(&self, other: &Expr) -> Result<Expr, BuildError> {
        expect_same_shape("sum", self, other)?;
        expect_same_free("sum", self, other)?;
        if self.is_zero() {
            return Ok(other.clone());
        }
        if other.is_zero() {
            return Ok(self.clone());
        }
        if let Some(folded) = fold_constants(self, other, i64::checked_add, |x, y| x + y) {
            return Ok(folded);
        }
        let (a, b) = sorted_pair(self, other);
        Ok(Expr::from_parts(
            Operator::Sum,
            vec![a, b],
            self.shape().to_vec(),
            self.free_indices().clone(),
        ))
    }

    pub fn try_sub(&self, other: &Expr) -> Result<Expr, BuildError> {
        self.try_add(&other.try_neg()?)
    }

    /// `-1 * self`.
    pub fn try_neg(&self) -> Result<Expr, BuildError> {
        Expr::int(-1).try_mul(self)
    }

    /// Product following the usual form language conventions.
    ///
    /// - scalar times scalar contracts shared free indices
    /// - scalar times tensor scales every component
    /// - matrix times vector or matrix contracts the inner dimension
    pub fn try_mul(&self, other: &Expr) -> Result<Expr, BuildError> {
        match (self.rank(), other.rank()) {
            (0, 0) => scalar_product(self, other),
            (0, _) => scale(other, self),
            (_, 0) => scale(self, other),
            (2, 1) | (2, 2) => contract(self, other),
            _ => Err(BuildError::InvalidOperand {
                op: "product",
                reason: format!(
                    "cannot multiply shapes {:?} and {:?}",
                    self.shape(),
                    other.shape()
                ),
            }),
        }
    }

    /// Division by a scalar. A tensor numerator is divided component-wise.
    pub fn try_div(&self, other: &Expr) -> Result<Expr, BuildError> {
        expect_scalar("division", other)?;
        if self.is_scalar() {
            return division_node(self, other);
        }
        let ii = indices(self.rank());
        let component = division_node(&self.at(&ii)?, other)?;
        Expr::as_tensor(&component, &ii)
    }

    pub fn try_pow(&self, exponent: &Expr) -> Result<Expr, BuildError> {
        expect_scalar("power", self)?;
        expect_scalar("power", exponent)?;
        if !exponent.free_indices().is_empty() {
            return Err(BuildError::InvalidOperand {
                op: "power",
                reason: format!("exponent {exponent} has free indices"),
            });
        }
        if exponent.is_unit() {
            return Ok(self.clone());
        }
        if let Some(folded) = fold_constants(
            self,
            exponent,
            |x, y| u32::try_from(y).ok().and_then(|y| x.checked_pow(y)),
            f64::powf,
        ) {
            return Ok(folded);
        }
        Ok(Expr::from_parts(
            Operator::Power,
            vec![self.clone(), exponent.clone()],
            vec![],
            self.free_indices().clone(),
        ))
    }

    pub fn try_sqrt(&self) -> Result<Expr, BuildError> {
        expect_scalar("sqrt", self)?;
        if self.is_zero() {
            return Ok(self.clone());
        }
        if let Some(value) = self.scalar_value().filter(|v| *v >= 0.0) {
            return Ok(Expr::float(value.sqrt()));
        }
        Ok(Expr::from_parts(
            Operator::Sqrt,
            vec![self.clone()],
            vec![],
            self.free_indices().clone(),
        ))
    }

    /// Subscripts a tensor by a multi-index.
    ///
    /// An index occurring twice across the multi-index and the free indices of
    /// `self` is summed over.
    ///
    /// # Arguments
    /// * `items` - One entry per axis of `self`, fixed or free
    ///
    /// # Returns
    /// A scalar expression, wrapped in one `IndexSum` per repeated index.
    ///
    /// # Errors
    /// Fails on a rank mismatch, an out of range fixed index, an index used
    /// with two dimensions or occurring more than twice.
    pub fn index(&self, items: &[IndexItem]) -> Result<Expr, BuildError> {
        let mut counts: BTreeMap<Index, usize> = BTreeMap::new();
        for index in items.iter().filter_map(IndexItem::as_free) {
            *counts.entry(index).or_default() += 1;
        }
        let mut repeated = Vec::new();
        for (&index, &count) in counts.iter() {
            let total = count + usize::from(self.free_indices().contains(index));
            if total > 2 {
                return Err(BuildError::IndexRepeatedTooOften {
                    index,
                    expr: self.to_string(),
                });
            }
            if total == 2 {
                repeated.push(index);
            }
        }
        let mut result = indexed_node(self, items)?;
        for index in repeated {
            result = Expr::index_sum(&result, index)?;
        }
        Ok(result)
    }

    /// Subscripts a tensor by free indices only.
    pub fn at(&self, indices: &[Index]) -> Result<Expr, BuildError> {
        self.index(&free_items(indices))
    }

    /// Selects one scalar component.
    pub fn component(&self, component: &[usize]) -> Result<Expr, BuildError> {
        let items: Vec<IndexItem> = component.iter().map(|&c| IndexItem::Fixed(c)).collect();
        indexed_node(self, &items)
    }

    /// Explicit sum of a scalar over one of its free indices.
    pub fn index_sum(summand: &Expr, index: Index) -> Result<Expr, BuildError> {
        expect_scalar("index sum", summand)?;
        let mut free = summand.free_indices().clone();
        if free.remove(index).is_none() {
            return Err(BuildError::NotFree {
                index,
                expr: summand.to_string(),
            });
        }
        if summand.is_zero() {
            return Ok(Expr::zero_tensor(vec![], free));
        }
        Ok(Expr::from_parts(
            Operator::IndexSum,
            vec![summand.clone(), Expr::multi_index_node(vec![IndexItem::Free(index)])],
            vec![],
            free,
        ))
    }

    /// Tensor whose components are `expr` with `indices` bound to the component.
    ///
    /// `as_tensor(A[ii], ii)` simplifies to `A`.
    pub fn as_tensor(expr: &Expr, indices: &[Index]) -> Result<Expr, BuildError> {
        if indices.is_empty() {
            return Ok(expr.clone());
        }
        expect_scalar("as_tensor", expr)?;
        let mut free = expr.free_indices().clone();
        let mut shape = Vec::with_capacity(indices.len());
        for &index in indices {
            let dim = free.remove(index).ok_or_else(|| BuildError::NotFree {
                index,
                expr: expr.to_string(),
            })?;
            shape.push(dim);
        }
        if expr.is_zero() {
            return Ok(Expr::zero_tensor(shape, free));
        }
        let items = free_items(indices);
        if expr.kind() == Kind::Indexed && expr.operands()[1].multi_index() == Some(&items[..]) {
            return Ok(expr.operands()[0].clone());
        }
        Ok(Expr::from_parts(
            Operator::ComponentTensor,
            vec![expr.clone(), Expr::multi_index_node(items)],
            shape,
            free,
        ))
    }

    /// Tensor listing `entries` along a new first axis.
    pub fn list_tensor(entries: Vec<Expr>) -> Result<Expr, BuildError> {
        let first = entries.first().ok_or_else(|| BuildError::InvalidOperand {
            op: "list tensor",
            reason: "no entries".to_string(),
        })?;
        for entry in &entries[1..] {
            expect_same_shape("list tensor", first, entry)?;
            expect_same_free("list tensor", first, entry)?;
        }
        let mut shape = vec![entries.len()];
        shape.extend_from_slice(first.shape());
        let free = first.free_indices().clone();
        if entries.iter().all(Expr::is_zero) {
            return Ok(Expr::zero_tensor(shape, free));
        }
        Ok(Expr::from_parts(Operator::ListTensor, entries, shape, free))
    }

    /// Vector of scalar entries.
    pub fn as_vector(entries: Vec<Expr>) -> Result<Expr, BuildError> {
        for entry in &entries {
            expect_scalar("as_vector", entry)?;
        }
        Expr::list_tensor(entries)
    }

    /// Matrix of scalar entries, given row by row.
    pub fn as_matrix(rows: Vec<Vec<Expr>>) -> Result<Expr, BuildError> {
        let rows = rows
            .into_iter()
            .map(Expr::as_vector)
            .collect::<Result<Vec<_>, _>>()?;
        Expr::list_tensor(rows)
    }

    /// Boolean condition over scalar operands or other conditions.
    pub fn condition(op: Comparison, operands: &[Expr]) -> Result<Expr, BuildError> {
        if operands.len() != op.arity() {
            return Err(BuildError::Arity {
                kind: Kind::Condition,
                expected: op.arity(),
                got: operands.len(),
            });
        }
        let logical = matches!(op, Comparison::And | Comparison::Or | Comparison::Not);
        let mut free = FreeIndices::new();
        for operand in operands {
            if logical && operand.kind() != Kind::Condition {
                return Err(BuildError::InvalidOperand {
                    op: "condition",
                    reason: format!("{} expects conditions, got {operand}", op.symbol()),
                });
            }
            expect_scalar("condition", operand)?;
            free = free.union(operand.free_indices())?;
        }
        Ok(Expr::from_parts(
            Operator::Condition(op),
            operands.to_vec(),
            vec![],
            free,
        ))
    }

    /// `condition ? true_value : false_value`.
    pub fn conditional(
        condition: &Expr,
        true_value: &Expr,
        false_value: &Expr,
    ) -> Result<Expr, BuildError> {
        if condition.kind() != Kind::Condition {
            return Err(BuildError::InvalidOperand {
                op: "conditional",
                reason: format!("expecting a condition, got {condition}"),
            });
        }
        expect_same_shape("conditional", true_value, false_value)?;
        expect_same_free("conditional", true_value, false_value)?;
        let free = condition.free_indices().union(true_value.free_indices())?;
        Ok(Expr::from_parts(
            Operator::Conditional,
            vec![condition.clone(), true_value.clone(), false_value.clone()],
            true_value.shape().to_vec(),
            free,
        ))
    }

    /// Geometric dimension of the domain the terminals of `expr` live on.
    pub fn geometric_dimension(&self) -> Result<usize, BuildError> {
        self.unique_pre_traversal()
            .find_map(|e| match e.operator() {
                Operator::Argument { space, .. } | Operator::Coefficient { space, .. } => {
                    Some(space.gdim)
                }
                Operator::SpatialCoordinate(gdim) => Some(*gdim),
                _ => None,
            })
            .ok_or_else(|| BuildError::NoGeometricDimension {
                expr: self.to_string(),
            })
    }

    /// Spatial gradient, appending one axis of the geometric dimension.
    pub fn grad(f: &Expr) -> Result<Expr, BuildError> {
        let gdim = f.geometric_dimension()?;
        let mut shape = f.shape().to_vec();
        shape.push(gdim);
        if f.is_zero() {
            return Ok(Expr::zero_tensor(shape, f.free_indices().clone()));
        }
        Ok(unary(Operator::Grad, f, shape))
    }

    /// Divergence, contracting the last axis.
    pub fn div(f: &Expr) -> Result<Expr, BuildError> {
        let Some((_, head)) = f.shape().split_last() else {
            return Err(BuildError::InvalidOperand {
                op: "div",
                reason: format!("cannot take the divergence of scalar {f}"),
            });
        };
        let shape = head.to_vec();
        if f.is_zero() {
            return Ok(Expr::zero_tensor(shape, f.free_indices().clone()));
        }
        Ok(unary(Operator::Div, f, shape))
    }

    pub fn curl(f: &Expr) -> Result<Expr, BuildError> {
        Ok(unary(Operator::Curl, f, curl_shape("curl", f)?))
    }

    pub fn rot(f: &Expr) -> Result<Expr, BuildError> {
        Ok(unary(Operator::Rot, f, curl_shape("rot", f)?))
    }

    /// `f.dx(items)`: derivative with respect to the listed coordinate directions.
    pub fn spatial_derivative(f: &Expr, items: &[IndexItem]) -> Result<Expr, BuildError> {
        if items.is_empty() {
            return Ok(f.clone());
        }
        let gdim = f.geometric_dimension()?;
        let mut free = f.free_indices().clone();
        for item in items {
            match *item {
                IndexItem::Fixed(value) if value >= gdim => {
                    return Err(BuildError::ComponentOutOfRange {
                        value,
                        dim: gdim,
                        expr: f.to_string(),
                    })
                }
                IndexItem::Fixed(_) => {}
                IndexItem::Free(index) => free.insert(index, gdim)?,
            }
        }
        Ok(Expr::from_parts(
            Operator::SpatialDerivative,
            vec![f.clone(), Expr::multi_index_node(items.to_vec())],
            f.shape().to_vec(),
            free,
        ))
    }

    /// `diff(f, v)`: derivative with respect to a variable.
    pub fn variable_derivative(f: &Expr, v: &Expr) -> Result<Expr, BuildError> {
        if v.kind() != Kind::Variable {
            return Err(BuildError::InvalidOperand {
                op: "variable derivative",
                reason: format!("expecting a variable, got {v}"),
            });
        }
        if !v.free_indices().is_empty() {
            return Err(BuildError::InvalidOperand {
                op: "variable derivative",
                reason: format!("variable {v} has free indices"),
            });
        }
        let mut shape = f.shape().to_vec();
        shape.extend_from_slice(v.shape());
        Ok(Expr::from_parts(
            Operator::VariableDerivative,
            vec![f.clone(), v.clone()],
            shape,
            f.free_indices().clone(),
        ))
    }

    pub fn restricted(f: &Expr, side: Side) -> Result<Expr, BuildError> {
        Ok(unary(Operator::Restricted(side), f, f.shape().to_vec()))
    }

    pub fn transposed(a: &Expr) -> Result<Expr, BuildError> {
        match a.shape() {
            [m, n] => Ok(unary(Operator::Transposed, a, vec![*n, *m])),
            shape => Err(BuildError::InvalidOperand {
                op: "transpose",
                reason: format!("expecting a matrix, got shape {shape:?}"),
            }),
        }
    }

    /// Full contraction of two tensors of equal shape.
    pub fn inner(a: &Expr, b: &Expr) -> Result<Expr, BuildError> {
        expect_same_shape("inner", a, b)?;
        if a.is_scalar() {
            return a.try_mul(b);
        }
        binary(Operator::Inner, "inner", a, b, vec![])
    }

    pub fn outer(a: &Expr, b: &Expr) -> Result<Expr, BuildError> {
        if a.is_scalar() || b.is_scalar() {
            return a.try_mul(b);
        }
        let shape = [a.shape(), b.shape()].concat();
        binary(Operator::Outer, "outer", a, b, shape)
    }

    /// Contraction of the last axis of `a` with the first axis of `b`.
    pub fn dot(a: &Expr, b: &Expr) -> Result<Expr, BuildError> {
        if a.is_scalar() || b.is_scalar() {
            return a.try_mul(b);
        }
        let (last, head) = a.shape().split_last().map(|(l, h)| (*l, h)).unwrap_or_default();
        if last != b.shape()[0] {
            return Err(BuildError::ShapeMismatch {
                op: "dot",
                left: a.shape().to_vec(),
                right: b.shape().to_vec(),
            });
        }
        let shape = [head, &b.shape()[1..]].concat();
        binary(Operator::Dot, "dot", a, b, shape)
    }

    pub fn cross(a: &Expr, b: &Expr) -> Result<Expr, BuildError> {
        if a.shape() != [3] || b.shape() != [3] {
            return Err(BuildError::ShapeMismatch {
                op: "cross",
                left: a.shape().to_vec(),
                right: b.shape().to_vec(),
            });
        }
        binary(Operator::Cross, "cross", a, b, vec![3])
    }

    pub fn trace(a: &Expr) -> Result<Expr, BuildError> {
        expect_square("trace", a)?;
        Ok(unary(Operator::Trace, a, vec![]))
    }

    pub fn skew(a: &Expr) -> Result<Expr, BuildError> {
        expect_square("skew", a)?;
        Ok(unary(Operator::Skew, a, a.shape().to_vec()))
    }

    /// Determinant of a matrix; a scalar is its own determinant.
    pub fn determinant(a: &Expr) -> Result<Expr, BuildError> {
        match a.rank() {
            0 => Ok(a.clone()),
            2 => Ok(unary(Operator::Determinant, a, vec![])),
            _ => Err(BuildError::InvalidOperand {
                op: "determinant",
                reason: format!("expecting a scalar or matrix, got shape {:?}", a.shape()),
            }),
        }
    }

    /// Inverse of a matrix; a scalar inverts to its reciprocal.
    pub fn inverse(a: &Expr) -> Result<Expr, BuildError> {
        match a.shape() {
            [] => Expr::float(1.0).try_div(a),
            [m, n] => Ok(unary(Operator::Inverse, a, vec![*n, *m])),
            shape => Err(BuildError::InvalidOperand {
                op: "inverse",
                reason: format!("expecting a scalar or matrix, got shape {shape:?}"),
            }),
        }
    }

    pub fn cofactor(a: &Expr) -> Result<Expr, BuildError> {
        expect_square("cofactor", a)?;
        Ok(unary(Operator::Cofactor, a, a.shape().to_vec()))
    }

    pub fn deviatoric(a: &Expr) -> Result<Expr, BuildError> {
        expect_square("deviatoric", a)?;
        Ok(unary(Operator::Deviatoric, a, a.shape().to_vec()))
    }

    /// Wraps `expr` in a variable with a fresh label.
    pub fn variable(expr: &Expr) -> Result<Expr, BuildError> {
        Expr::variable_with_label(expr, Label::new())
    }

    pub fn variable_with_label(expr: &Expr, label: Label) -> Result<Expr, BuildError> {
        if expr.kind() == Kind::MultiIndex {
            return Err(BuildError::InvalidOperand {
                op: "variable",
                reason: "cannot wrap a multi-index".to_string(),
            });
        }
        Ok(Expr::from_parts(
            Operator::Variable(label),
            vec![expr.clone()],
            expr.shape().to_vec(),
            expr.free_indices().clone(),
        ))
    }

    /// Builds a node of the same operator as `self` from new operands.
    ///
    /// Terminals are returned unchanged. Simplifications apply, so the result
    /// may be of a different kind than `self`.
    pub fn reconstruct(&self, operands: Vec<Expr>) -> Result<Expr, BuildError> {
        if operands.len() != self.operands().len() {
            return Err(BuildError::Arity {
                kind: self.kind(),
                expected: self.operands().len(),
                got: operands.len(),
            });
        }
        let o = &operands;
        match self.operator() {
            Operator::Zero
            | Operator::IntValue(_)
            | Operator::FloatValue(_)
            | Operator::Identity(_)
            | Operator::Argument { .. }
            | Operator::Coefficient { .. }
            | Operator::SpatialCoordinate(_)
            | Operator::Label(_)
            | Operator::MultiIndex(_) => Ok(self.clone()),
            Operator::Sum => o[0].try_add(&o[1]),
            Operator::Product => product_node(&o[0], &o[1]),
            Operator::Division => division_node(&o[0], &o[1]),
            Operator::Power => o[0].try_pow(&o[1]),
            Operator::Sqrt => o[0].try_sqrt(),
            Operator::Indexed => indexed_node(&o[0], multi_index_items("indexed", &o[1])?),
            Operator::IndexSum => {
                let index = free_only("index sum", multi_index_items("index sum", &o[1])?)?;
                match index.as_slice() {
                    [index] => Expr::index_sum(&o[0], *index),
                    _ => Err(BuildError::InvalidOperand {
                        op: "index sum",
                        reason: format!("expecting a single index, got {}", o[1]),
                    }),
                }
            }
            Operator::ComponentTensor => {
                let indices = free_only("as_tensor", multi_index_items("as_tensor", &o[1])?)?;
                Expr::as_tensor(&o[0], &indices)
            }
            Operator::ListTensor => Expr::list_tensor(operands),
            Operator::Conditional => Expr::conditional(&o[0], &o[1], &o[2]),
            Operator::Condition(op) => Expr::condition(*op, o),
            Operator::Grad => Expr::grad(&o[0]),
            Operator::Div => Expr::div(&o[0]),
            Operator::Curl => Expr::curl(&o[0]),
            Operator::Rot => Expr::rot(&o[0]),
            Operator::SpatialDerivative => Expr::spatial_derivative(
                &o[0],
                multi_index_items("spatial derivative", &o[1])?,
            ),
            Operator::VariableDerivative => Expr::variable_derivative(&o[0], &o[1]),
            Operator::Restricted(side) => Expr::restricted(&o[0], *side),
            Operator::Transposed => Expr::transposed(&o[0]),
            Operator::Inner => Expr::inner(&o[0], &o[1]),
            Operator::Outer => Expr::outer(&o[0], &o[1]),
            Operator::Dot => Expr::dot(&o[0], &o[1]),
            Operator::Cross => Expr::cross(&o[0], &o[1]),
            Operator::Trace => Expr::trace(&o[0]),
            Operator::Skew => Expr::skew(&o[0]),
            Operator::Determinant => Expr::determinant(&o[0]),
            Operator::Inverse => Expr::inverse(&o[0]),
            Operator::Cofactor => Expr::cofactor(&o[0]),
            Operator::Deviatoric => Expr::deviatoric(&o[0]),
            Operator::Variable(label) => Expr::variable_with_label(&o[0], *label),
        }
    }
}

fn sorted_pair(a: &Expr, b: &Expr) -> (Expr, Expr) {
    if b < a {
        (b.clone(), a.clone())
    } else {
        (a.clone(), b.clone())
    }
}

fn unary(operator: Operator, a: &Expr, shape: Shape) -> Expr {
    Expr::from_parts(operator, vec![a.clone()], shape, a.free_indices().clone())
}

fn binary(
    operator: Operator,
    op: &'static str,
    a: &Expr,
    b: &Expr,
    shape: Shape,
) -> Result<Expr, BuildError> {
    let free = merge_disjoint(op, a, b)?;
    if a.is_zero() || b.is_zero() {
        return Ok(Expr::zero_tensor(shape, free));
    }
    Ok(Expr::from_parts(operator, vec![a.clone(), b.clone()], shape, free))
}

fn curl_shape(op: &'static str, f: &Expr) -> Result<Shape, BuildError> {
    match f.shape() {
        [] => Ok(vec![2]),
        [2] => Ok(vec![]),
        [3] => Ok(vec![3]),
        shape => Err(BuildError::InvalidOperand {
            op,
            reason: format!("expecting a scalar, 2-vector or 3-vector, got shape {shape:?}"),
        }),
    }
}

/// Product node of two scalars, without summing shared indices.
pub(crate) fn product_node(a: &Expr, b: &Expr) -> Result<Expr, BuildError> {
    expect_scalar("product", a)?;
    expect_scalar("product", b)?;
    let free = a.free_indices().union(b.free_indices())?;
    if a.is_zero() || b.is_zero() {
        return Ok(Expr::zero_tensor(vec![], free));
    }
    if let Some(folded) = fold_constants(a, b, i64::checked_mul, |x, y| x * y) {
        return Ok(folded);
    }
    if a.is_unit() {
        return Ok(b.clone());
    }
    if b.is_unit() {
        return Ok(a.clone());
    }
    let (a, b) = sorted_pair(a, b);
    Ok(Expr::from_parts(Operator::Product, vec![a, b], vec![], free))
}

/// Division node of two scalars.
pub(crate) fn division_node(a: &Expr, b: &Expr) -> Result<Expr, BuildError> {
    expect_scalar("division", a)?;
    expect_scalar("division", b)?;
    if b.is_zero() {
        return Err(BuildError::InvalidOperand {
            op: "division",
            reason: format!("division of {a} by zero"),
        });
    }
    let free = a.free_indices().union(b.free_indices())?;
    if a.is_zero() {
        return Ok(Expr::zero_tensor(vec![], free));
    }
    if let Some(folded) = fold_constants(
        a,
        b,
        |x, y| {
            x.checked_rem(y)
                .filter(|r| *r == 0)
                .and_then(|_| x.checked_div(y))
        },
        |x, y| x / y,
    ) {
        return Ok(folded);
    }
    if b.is_unit() {
        return Ok(a.clone());
    }
    Ok(Expr::from_parts(
        Operator::Division,
        vec![a.clone(), b.clone()],
        vec![],
        free,
    ))
}

/// Indexed node without summing repeated indices.
pub(crate) fn indexed_node(a: &Expr, items: &[IndexItem]) -> Result<Expr, BuildError> {
    if items.len() != a.rank() {
        return Err(BuildError::RankMismatch {
            expected: a.rank(),
            got: items.len(),
            expr: a.to_string(),
        });
    }
    if items.is_empty() {
        return Ok(a.clone());
    }
    let mut free = a.free_indices().clone();
    for (item, &dim) in items.iter().zip(a.shape()) {
        match *item {
            IndexItem::Fixed(value) if value >= dim => {
                return Err(BuildError::ComponentOutOfRange {
                    value,
                    dim,
                    expr: a.to_string(),
                })
            }
            IndexItem::Fixed(_) => {}
            IndexItem::Free(index) => free.insert(index, dim)?,
        }
    }
    match (a.operator(), items) {
        (Operator::Zero, _) => return Ok(Expr::zero_tensor(vec![], free)),
        (Operator::Identity(_), [IndexItem::Fixed(i), IndexItem::Fixed(j)]) => {
            return Ok(Expr::int(i64::from(i == j)))
        }
        (Operator::ListTensor, [IndexItem::Fixed(c), rest @ ..]) => {
            return indexed_node(&a.operands()[*c], rest)
        }
        _ => {}
    }
    Ok(Expr::from_parts(
        Operator::Indexed,
        vec![a.clone(), Expr::multi_index_node(items.to_vec())],
        vec![],
        free,
    ))
}

fn scalar_product(a: &Expr, b: &Expr) -> Result<Expr, BuildError> {
    let repeated = a.free_indices().repeated(b.free_indices());
    let mut result = product_node(a, b)?;
    for (index, _) in repeated {
        result = Expr::index_sum(&result, index)?;
    }
    Ok(result)
}

/// `as_tensor(s * t[ii], ii)`.
fn scale(t: &Expr, s: &Expr) -> Result<Expr, BuildError> {
    let ii = indices(t.rank());
    let component = scalar_product(s, &t.at(&ii)?)?;
    Expr::as_tensor(&component, &ii)
}

/// `as_tensor(a[ai + k] * b[k + bi], ai + bi)`.
pub(crate) fn contract(a: &Expr, b: &Expr) -> Result<Expr, BuildError> {
    let last = a.shape().last().copied().unwrap_or_default();
    if b.rank() == 0 || last != b.shape()[0] {
        return Err(BuildError::ShapeMismatch {
            op: "contraction",
            left: a.shape().to_vec(),
            right: b.shape().to_vec(),
        });
    }
    let ai = indices(a.rank() - 1);
    let bi = indices(b.rank() - 1);
    let k = Index::new();
    let left = a.at(&[ai.as_slice(), &[k][..]].concat())?;
    let right = b.at(&[&[k][..], bi.as_slice()].concat())?;
    Expr::as_tensor(&left.try_mul(&right)?, &[ai, bi].concat())
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $try:ident) => {
        impl ops::$trait<Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                self.$try(&rhs).unwrap_or_else(|e| panic!("{e}"))
            }
        }

        impl ops::$trait<&Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                self.$try(rhs).unwrap_or_else(|e| panic!("{e}"))
            }
        }

        impl ops::$trait<Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                self.$try(&rhs).unwrap_or_else(|e| panic!("{e}"))
            }
        }

        impl ops::$trait<&Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                self.$try(rhs).unwrap_or_else(|e| panic!("{e}"))
            }
        }
    };
}

// The operator impls panic on invalid operands. Use the `try_*` methods to
// handle construction errors.
impl_binary_op!(Add, add, try_add);
impl_binary_op!(Sub, sub, try_sub);
impl_binary_op!(Mul, mul, try_mul);
impl_binary_op!(Div, div, try_div);

impl ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        self.try_neg().unwrap_or_else(|e| panic!("{e}"))
    }
}

impl ops::Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        self.try_neg().unwrap_or_else(|e| panic!("{e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(dim: usize) -> Expr {
        Expr::coefficient(FunctionSpace::tensor(vec![dim, dim], dim))
    }

    fn scalar() -> Expr {
        Expr::coefficient(FunctionSpace::scalar(2))
    }

    #[test]
    fn test_zero_constants_collapse() {
        assert!(Expr::int(0).is_zero());
        assert!(Expr::float(0.0).is_zero());
        let f = scalar();
        assert_eq!(&f + &Expr::zero(), f);
        assert!((&f * &Expr::zero()).is_zero());
        assert!((&Expr::zero() / &f).is_zero());
    }

    #[test]
    fn test_constant_folding() {
        assert_eq!(Expr::int(2) + Expr::int(3), Expr::int(5));
        assert_eq!(Expr::int(2) * Expr::int(3), Expr::int(6));
        assert_eq!(Expr::int(6) / Expr::int(3), Expr::int(2));
        assert_eq!(Expr::int(1) / Expr::int(2), Expr::float(0.5));
        assert_eq!(Expr::int(4).try_sqrt().unwrap(), Expr::float(2.0));
        assert_eq!(-Expr::int(3), Expr::int(-3));
    }

    #[test]
    fn test_integer_division_overflow_folds_to_float() {
        let q = Expr::int(i64::MIN).try_div(&Expr::int(-1)).unwrap();
        assert_eq!(q, Expr::float(-(i64::MIN as f64)));
        assert_eq!(
            Expr::int(i64::MIN).try_div(&Expr::int(2)).unwrap(),
            Expr::int(i64::MIN / 2)
        );
    }

    #[test]
    fn test_commutative_operands_are_sorted() {
        let f = scalar();
        let g = scalar();
        assert_eq!(&f + &g, &g + &f);
        assert_eq!(&f * &g, &g * &f);
    }

    #[test]
    fn test_unit_factor_vanishes() {
        let f = scalar();
        assert_eq!(Expr::int(1) * &f, f);
        assert_eq!(&f * Expr::float(1.0), f);
        assert_eq!(&f / Expr::int(1), f);
    }

    #[test]
    fn test_sum_requires_matching_shapes() {
        let f = scalar();
        let a = matrix(2);
        assert!(matches!(
            f.try_add(&a),
            Err(BuildError::ShapeMismatch { op: "sum", .. })
        ));
    }

    #[test]
    fn test_einstein_summation_in_product() {
        let a = Expr::coefficient(FunctionSpace::vector(3, 3));
        let b = Expr::coefficient(FunctionSpace::vector(3, 3));
        let i = Index::new();
        let p = a.at(&[i]).unwrap() * b.at(&[i]).unwrap();
        assert_eq!(p.kind(), Kind::IndexSum);
        assert!(p.free_indices().is_empty());
        assert_eq!(p.operands()[0].kind(), Kind::Product);
        assert!(p.operands()[0].free_indices().contains(i));
    }

    #[test]
    fn test_index_dimension_conflict() {
        let a = Expr::coefficient(FunctionSpace::vector(3, 3));
        let b = Expr::coefficient(FunctionSpace::vector(2, 3));
        let i = Index::new();
        let result = a.at(&[i]).unwrap().try_mul(&b.at(&[i]).unwrap());
        assert!(matches!(
            result,
            Err(BuildError::IndexDimensionConflict { .. })
        ));
    }

    #[test]
    fn test_repeated_index_in_multi_index_is_summed() {
        let a = matrix(3);
        let i = Index::new();
        let tr = a.at(&[i, i]).unwrap();
        assert_eq!(tr.kind(), Kind::IndexSum);
        assert!(tr.free_indices().is_empty());

        let t = Expr::coefficient(FunctionSpace::tensor(vec![2, 2, 2], 2));
        assert!(matches!(
            t.at(&[i, i, i]),
            Err(BuildError::IndexRepeatedTooOften { .. })
        ));
    }

    #[test]
    fn test_indexing_validation() {
        let a = matrix(2);
        assert!(matches!(
            a.component(&[0]),
            Err(BuildError::RankMismatch { .. })
        ));
        assert!(matches!(
            a.component(&[0, 2]),
            Err(BuildError::ComponentOutOfRange { value: 2, .. })
        ));
    }

    #[test]
    fn test_indexing_simplifications() {
        let id = Expr::identity(3);
        assert_eq!(id.component(&[1, 1]).unwrap(), Expr::int(1));
        assert!(id.component(&[0, 1]).unwrap().is_zero());

        let f = scalar();
        let g = scalar();
        let v = Expr::as_vector(vec![f.clone(), g.clone()]).unwrap();
        assert_eq!(v.component(&[1]).unwrap(), g);

        let a = matrix(2);
        let ii = indices(2);
        let roundtrip = Expr::as_tensor(&a.at(&ii).unwrap(), &ii).unwrap();
        assert!(roundtrip.ptr_eq(&a));
    }

    #[test]
    fn test_component_tensor_shape() {
        let a = matrix(3);
        let (i, j) = (Index::new(), Index::new());
        let t = Expr::as_tensor(&a.at(&[i, j]).unwrap(), &[j, i]).unwrap();
        assert_eq!(t.kind(), Kind::ComponentTensor);
        assert_eq!(t.shape(), &[3, 3]);
        assert!(t.free_indices().is_empty());
        assert!(matches!(
            Expr::as_tensor(&a.component(&[0, 0]).unwrap(), &[i]),
            Err(BuildError::NotFree { .. })
        ));
    }

    #[test]
    fn test_scalar_times_tensor() {
        let a = matrix(2);
        let f = scalar();
        let scaled = &f * &a;
        assert_eq!(scaled.shape(), &[2, 2]);
        assert_eq!(scaled.kind(), Kind::ComponentTensor);
        assert_eq!(Expr::int(1) * &a, a);
    }

    #[test]
    fn test_tensor_division_is_componentwise() {
        let a = matrix(2);
        let f = scalar();
        let q = &a / &f;
        assert_eq!(q.shape(), &[2, 2]);
        assert_eq!(q.kind(), Kind::ComponentTensor);
        assert!(matches!(
            f.try_div(&a),
            Err(BuildError::ExpectedScalar { op: "division", .. })
        ));
    }

    #[test]
    fn test_tensor_algebra_shapes() {
        let a = Expr::coefficient(FunctionSpace::tensor(vec![3, 2], 3));
        let v = Expr::coefficient(FunctionSpace::vector(2, 3));
        let w = Expr::coefficient(FunctionSpace::vector(3, 3));
        assert_eq!(Expr::transposed(&a).unwrap().shape(), &[2, 3]);
        assert_eq!(Expr::dot(&a, &v).unwrap().shape(), &[3]);
        assert_eq!(Expr::outer(&w, &v).unwrap().shape(), &[3, 2]);
        assert_eq!(Expr::inner(&w, &w).unwrap().shape(), &[] as &[usize]);
        assert_eq!(Expr::cross(&w, &w).unwrap().shape(), &[3]);
        assert_eq!(Expr::grad(&w).unwrap().shape(), &[3, 3]);
        assert_eq!(Expr::div(&w).unwrap().shape(), &[] as &[usize]);
        assert_eq!(Expr::curl(&w).unwrap().shape(), &[3]);
        assert_eq!(Expr::inverse(&a).unwrap().shape(), &[2, 3]);
        assert!(Expr::trace(&a).is_err());
        assert!(Expr::dot(&v, &w).is_err());
    }

    #[test]
    fn test_matrix_vector_product() {
        let a = matrix(3);
        let w = Expr::coefficient(FunctionSpace::vector(3, 3));
        let p = &a * &w;
        assert_eq!(p.shape(), &[3]);
        assert!(p.free_indices().is_empty());
    }

    #[test]
    fn test_grad_requires_geometric_dimension() {
        assert!(matches!(
            Expr::grad(&Expr::int(2)),
            Err(BuildError::NoGeometricDimension { .. })
        ));
    }

    #[test]
    fn test_conditional() {
        let f = scalar();
        let g = scalar();
        let c = Expr::condition(Comparison::Lt, &[f.clone(), g.clone()]).unwrap();
        let e = Expr::conditional(&c, &f, &g).unwrap();
        assert_eq!(e.kind(), Kind::Conditional);
        assert!(Expr::conditional(&f, &f, &g).is_err());
        assert!(matches!(
            Expr::condition(Comparison::Not, &[f.clone(), g]),
            Err(BuildError::Arity { expected: 1, .. })
        ));
        assert!(Expr::condition(Comparison::Not, &[f]).is_err());
    }

    #[test]
    fn test_reconstruct_preserves_raw_structure() {
        let a = Expr::coefficient(FunctionSpace::vector(3, 3));
        let b = Expr::coefficient(FunctionSpace::vector(3, 3));
        let i = Index::new();
        let s = a.at(&[i]).unwrap() * b.at(&[i]).unwrap();
        let product = &s.operands()[0];
        let rebuilt = product.reconstruct(product.operands().to_vec()).unwrap();
        assert_eq!(&rebuilt, product);
        let rebuilt = s.reconstruct(s.operands().to_vec()).unwrap();
        assert_eq!(rebuilt, s);
        assert!(matches!(
            s.reconstruct(vec![]),
            Err(BuildError::Arity { .. })
        ));
    }

    #[test]
    #[should_panic]
    fn test_operator_panics_on_invalid_operands() {
        let _ = scalar() + matrix(2);
    }
}
