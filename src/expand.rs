//! Expansion of free and summed indices into fixed components.
//!
//! [`expand_indices`] rewrites an expression so that no free index, index sum,
//! component tensor or list tensor remains. Every shaped terminal ends up
//! subscripted by a tuple of fixed indices and every index sum becomes an
//! explicit sum over the range of its index.
//!
//! The walk carries two pieces of context:
//! - a stack of component tuples selected on the enclosing shaped expression
//! - a stack per free index of the values currently assigned to it
//!
//! Both are owned by one expansion and dropped with it, so a failed expansion
//! leaves nothing behind.
//!
//! Results are not memoized: a node shared by several paths is expanded once
//! per path, since its expansion depends on the components and index values in
//! scope at each one.

use std::collections::HashMap;

use itertools::Itertools;
use log::debug;

use crate::errors::TransformError;
use crate::expr::{Expr, Kind, Operator};
use crate::transform::reuse_if_possible;
use crate::types::{Index, IndexItem};

/// Expands all indices of `expr`.
///
/// A scalar expression expands to an index-free scalar. A tensor valued
/// expression expands to nested list tensors of index-free scalars, one per
/// component.
///
/// # Errors
/// - `TransformError::ShapeMismatch` when a component does not fit the rank it selects from
/// - `TransformError::UnassignedIndex` when a free index has no value in scope
/// - `TransformError::Unsupported` for gradients of non-terminals, variable
///   derivatives and compound tensor algebra, which earlier passes must remove
pub fn expand_indices(expr: &Expr) -> Result<Expr, TransformError> {
    debug!(
        "expanding indices of expression with {} distinct nodes",
        expr.node_count()
    );
    let mut expander = IndexExpander::new();
    let mut prefix = Vec::with_capacity(expr.rank());
    expander.expand_components(expr, &mut prefix)
}

/// Expands `expr` if a list tensor is reachable from it, otherwise returns it.
pub fn purge_list_tensors(expr: &Expr) -> Result<Expr, TransformError> {
    if expr
        .unique_pre_traversal()
        .any(|e| e.kind() == Kind::ListTensor)
    {
        debug!("list tensor found, expanding indices");
        expand_indices(expr)
    } else {
        Ok(expr.clone())
    }
}

struct IndexExpander {
    components: Vec<Vec<usize>>,
    index_values: HashMap<Index, Vec<usize>>,
}

impl IndexExpander {
    fn new() -> Self {
        IndexExpander {
            components: vec![vec![]],
            index_values: HashMap::new(),
        }
    }

    fn component(&self) -> &[usize] {
        self.components.last().map(Vec::as_slice).unwrap_or(&[])
    }

    fn bind(&mut self, index: Index, value: usize) {
        self.index_values.entry(index).or_default().push(value);
    }

    fn unbind(&mut self, index: Index) {
        if let Some(values) = self.index_values.get_mut(&index) {
            values.pop();
            if values.is_empty() {
                self.index_values.remove(&index);
            }
        }
    }

    fn value_of(&self, index: Index) -> Option<usize> {
        self.index_values.get(&index).and_then(|v| v.last().copied())
    }

    /// Visits `expr` once per component of its shape and nests the results.
    fn expand_components(
        &mut self,
        expr: &Expr,
        prefix: &mut Vec<usize>,
    ) -> Result<Expr, TransformError> {
        let depth = prefix.len();
        if depth == expr.rank() {
            self.components.push(prefix.clone());
            let result = self.visit(expr);
            self.components.pop();
            return result;
        }
        let mut entries = Vec::with_capacity(expr.shape()[depth]);
        for value in 0..expr.shape()[depth] {
            prefix.push(value);
            entries.push(self.expand_components(expr, prefix)?);
            prefix.pop();
        }
        Ok(Expr::list_tensor(entries)?)
    }

    fn check_component(&self, x: &Expr) -> Result<(), TransformError> {
        if self.component().len() == x.rank() {
            Ok(())
        } else {
            Err(TransformError::ShapeMismatch {
                expected: x.rank(),
                got: self.component().len(),
                expr: x.to_string(),
            })
        }
    }

    /// Subscripts a terminal by the current component.
    fn select(&self, x: &Expr, component: &[usize]) -> Result<Expr, TransformError> {
        self.check_component(x)?;
        if x.is_scalar() {
            return Ok(x.clone());
        }
        Ok(x.component(component)?)
    }

    fn visit(&mut self, x: &Expr) -> Result<Expr, TransformError> {
        match x.operator() {
            Operator::Zero => self.zero(x),
            Operator::IntValue(_)
            | Operator::FloatValue(_)
            | Operator::Identity(_)
            | Operator::SpatialCoordinate(_)
            | Operator::Label(_) => {
                let component = self.component().to_vec();
                self.select(x, &component)
            }
            Operator::Argument { space, .. } | Operator::Coefficient { space, .. } => {
                let component = self.component().to_vec();
                self.select(x, space.canonical_component(&component))
            }
            Operator::MultiIndex(items) => self.multi_index(x, items),
            Operator::Conditional => self.conditional(x),
            Operator::Division => self.division(x),
            Operator::IndexSum => self.index_sum(x),
            Operator::Indexed => self.indexed(x),
            Operator::ComponentTensor => self.component_tensor(x),
            Operator::ListTensor => self.list_tensor(x),
            Operator::Grad => self.grad(x),
            Operator::Variable(_) => self.visit(&x.operands()[0]),
            Operator::VariableDerivative => Err(TransformError::Unsupported {
                reason: "expecting derivatives to be expanded before index expansion",
                expr: x.to_string(),
            }),
            Operator::Transposed
            | Operator::Inner
            | Operator::Outer
            | Operator::Dot
            | Operator::Cross
            | Operator::Trace
            | Operator::Skew
            | Operator::Determinant
            | Operator::Inverse
            | Operator::Cofactor
            | Operator::Deviatoric
            | Operator::Div
            | Operator::Curl
            | Operator::Rot => Err(TransformError::Unsupported {
                reason: "expecting compound tensor algebra to be lowered before index expansion",
                expr: x.to_string(),
            }),
            Operator::Sum
            | Operator::Product
            | Operator::Power
            | Operator::Sqrt
            | Operator::Condition(_)
            | Operator::SpatialDerivative
            | Operator::Restricted(_) => {
                // Operands share the component of their parent
                let operands = x
                    .operands()
                    .iter()
                    .map(|o| self.visit(o))
                    .collect::<Result<Vec<_>, _>>()?;
                reuse_if_possible(x, operands)
            }
        }
    }

    fn zero(&self, x: &Expr) -> Result<Expr, TransformError> {
        self.check_component(x)?;
        let unassigned = x
            .free_indices()
            .indices()
            .filter(|i| self.value_of(*i).is_none())
            .collect::<Vec<_>>();
        if !unassigned.is_empty() {
            return Err(TransformError::UnassignedIndex {
                indices: unassigned.iter().join(", "),
                expr: x.to_string(),
            });
        }
        Ok(Expr::zero())
    }

    fn multi_index(&self, x: &Expr, items: &[IndexItem]) -> Result<Expr, TransformError> {
        let mut fixed = Vec::with_capacity(items.len());
        let mut unassigned = Vec::new();
        for item in items {
            match *item {
                IndexItem::Fixed(value) => fixed.push(IndexItem::Fixed(value)),
                IndexItem::Free(index) => match self.value_of(index) {
                    Some(value) => fixed.push(IndexItem::Fixed(value)),
                    None => unassigned.push(index),
                },
            }
        }
        if !unassigned.is_empty() {
            return Err(TransformError::UnassignedIndex {
                indices: unassigned.iter().join(", "),
                expr: x.to_string(),
            });
        }
        if fixed.as_slice() == items {
            return Ok(x.clone());
        }
        Ok(Expr::multi_index_node(fixed))
    }

    fn conditional(&mut self, x: &Expr) -> Result<Expr, TransformError> {
        let (c, t, f) = (&x.operands()[0], &x.operands()[1], &x.operands()[2]);
        if !c.is_scalar() {
            return Err(TransformError::ShapeMismatch {
                expected: 0,
                got: c.rank(),
                expr: c.to_string(),
            });
        }
        self.components.push(vec![]);
        let c = self.visit(c);
        self.components.pop();
        let c = c?;
        let t = self.visit(t)?;
        let f = self.visit(f)?;
        reuse_if_possible(x, vec![c, t, f])
    }

    fn division(&mut self, x: &Expr) -> Result<Expr, TransformError> {
        if !self.component().is_empty() {
            return Err(TransformError::ShapeMismatch {
                expected: 0,
                got: self.component().len(),
                expr: x.to_string(),
            });
        }
        let a = self.visit(&x.operands()[0])?;
        let b = self.visit(&x.operands()[1])?;
        reuse_if_possible(x, vec![a, b])
    }

    fn index_sum(&mut self, x: &Expr) -> Result<Expr, TransformError> {
        let summand = &x.operands()[0];
        let index = bound_indices(x)?
            .into_iter()
            .next()
            .ok_or_else(|| TransformError::Unsupported {
                reason: "index sum without an index",
                expr: x.to_string(),
            })?;
        let dim = summand
            .free_indices()
            .dim(index)
            .ok_or_else(|| TransformError::Unsupported {
                reason: "summation index is not free in the summand",
                expr: x.to_string(),
            })?;
        let mut total = Expr::zero();
        for value in 0..dim {
            self.bind(index, value);
            let term = self.visit(summand);
            self.unbind(index);
            total = total.try_add(&term?)?;
        }
        Ok(total)
    }

    fn indexed(&mut self, x: &Expr) -> Result<Expr, TransformError> {
        let (tensor, items) = (&x.operands()[0], &x.operands()[1]);
        let fixed = self.visit(items)?;
        let component = fixed
            .multi_index()
            .unwrap_or(&[])
            .iter()
            .filter_map(|item| match item {
                IndexItem::Fixed(value) => Some(*value),
                IndexItem::Free(_) => None,
            })
            .collect::<Vec<_>>();
        self.components.push(component);
        let result = self.visit(tensor);
        self.components.pop();
        result
    }

    fn component_tensor(&mut self, x: &Expr) -> Result<Expr, TransformError> {
        let expression = &x.operands()[0];
        if !expression.is_scalar() {
            return Err(TransformError::ShapeMismatch {
                expected: 0,
                got: expression.rank(),
                expr: expression.to_string(),
            });
        }
        let indices = bound_indices(x)?;
        let component = self.component().to_vec();
        if indices.len() != component.len() {
            return Err(TransformError::ShapeMismatch {
                expected: indices.len(),
                got: component.len(),
                expr: x.to_string(),
            });
        }
        for (&index, &value) in indices.iter().zip(&component) {
            self.bind(index, value);
        }
        self.components.push(vec![]);
        let result = self.visit(expression);
        self.components.pop();
        for &index in &indices {
            self.unbind(index);
        }
        result
    }

    fn list_tensor(&mut self, x: &Expr) -> Result<Expr, TransformError> {
        let component = self.component().to_vec();
        let Some((&c0, rest)) = component.split_first() else {
            return Err(TransformError::ShapeMismatch {
                expected: x.rank(),
                got: 0,
                expr: x.to_string(),
            });
        };
        let entry = x
            .operands()
            .get(c0)
            .ok_or_else(|| TransformError::ShapeMismatch {
                expected: x.operands().len(),
                got: c0,
                expr: x.to_string(),
            })?;
        self.components.push(rest.to_vec());
        let result = self.visit(entry);
        self.components.pop();
        result
    }

    fn grad(&self, x: &Expr) -> Result<Expr, TransformError> {
        let f = &x.operands()[0];
        if !(f.is_terminal() || f.kind() == Kind::Grad) {
            return Err(TransformError::Unsupported {
                reason: "expecting derivatives to be expanded before index expansion",
                expr: x.to_string(),
            });
        }
        let component = self.component().to_vec();
        self.select(x, &component)
    }
}

/// Free indices listed in the multi-index operand of an index sum or component tensor.
fn bound_indices(x: &Expr) -> Result<Vec<Index>, TransformError> {
    let items = x.operands()[1]
        .multi_index()
        .ok_or_else(|| TransformError::Unsupported {
            reason: "expecting a multi-index operand",
            expr: x.to_string(),
        })?;
    Ok(items.iter().filter_map(IndexItem::as_free).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::indices;
    use crate::expr::Comparison;
    use crate::types::{FreeIndices, FunctionSpace, Label};

    fn matrix(dim: usize) -> Expr {
        Expr::coefficient(FunctionSpace::tensor(vec![dim, dim], dim))
    }

    fn vector(dim: usize) -> Expr {
        Expr::coefficient(FunctionSpace::vector(dim, dim))
    }

    fn is_index_free(e: &Expr) -> bool {
        e.unique_pre_traversal().all(|n| {
            n.free_indices().is_empty()
                && !matches!(
                    n.kind(),
                    Kind::IndexSum | Kind::ComponentTensor | Kind::ListTensor
                )
        })
    }

    #[test]
    fn test_trace_via_index_sum() {
        let a = matrix(3);
        let i = Index::new();
        let tr = a.at(&[i, i]).unwrap();
        let expanded = expand_indices(&tr).unwrap();
        let expected = a.component(&[0, 0]).unwrap()
            + a.component(&[1, 1]).unwrap()
            + a.component(&[2, 2]).unwrap();
        assert_eq!(expanded, expected);
        assert!(is_index_free(&expanded));
    }

    #[test]
    fn test_symmetry_remaps_components() {
        let s = Expr::coefficient(FunctionSpace::symmetric_tensor(2, 2));
        let expanded = expand_indices(&s.component(&[1, 0]).unwrap()).unwrap();
        assert_eq!(expanded, s.component(&[0, 1]).unwrap());
    }

    #[test]
    fn test_list_tensor_selection() {
        let f = Expr::coefficient(FunctionSpace::scalar(2));
        let g = Expr::coefficient(FunctionSpace::scalar(2));
        let w = vector(2);
        let i = Index::new();
        let l = Expr::as_vector(vec![f.clone(), g.clone()]).unwrap();
        let e = l.at(&[i]).unwrap() * w.at(&[i]).unwrap();
        let expanded = expand_indices(&e).unwrap();
        let expected = &f * w.component(&[0]).unwrap() + &g * w.component(&[1]).unwrap();
        assert_eq!(expanded, expected);
    }

    #[test]
    fn test_component_tensor_binds_indices() {
        let a = matrix(2);
        let ii = indices(2);
        let t = Expr::as_tensor(&a.at(&ii).unwrap(), &[ii[1], ii[0]]).unwrap();
        let expanded = expand_indices(&t.component(&[0, 1]).unwrap()).unwrap();
        assert_eq!(expanded, a.component(&[1, 0]).unwrap());
    }

    #[test]
    fn test_tensor_expression_expands_to_nested_lists() {
        let a = matrix(2);
        let expanded = expand_indices(&a).unwrap();
        let c = |i, j| a.component(&[i, j]).unwrap();
        let expected = Expr::as_matrix(vec![vec![c(0, 0), c(0, 1)], vec![c(1, 0), c(1, 1)]])
            .unwrap();
        assert_eq!(expanded, expected);
    }

    #[test]
    fn test_unassigned_index() {
        let a = matrix(2);
        let e = a.at(&indices(2)).unwrap();
        assert!(matches!(
            expand_indices(&e),
            Err(TransformError::UnassignedIndex { .. })
        ));
    }

    #[test]
    fn test_zero_with_unassigned_free_index() {
        let i = Index::new();
        let mut free = FreeIndices::new();
        free.insert(i, 3).unwrap();
        let zero = Expr::zero_tensor(vec![], free);
        assert!(matches!(
            expand_indices(&zero),
            Err(TransformError::UnassignedIndex { .. })
        ));

        let bound = Expr::as_tensor(&zero, &[i]).unwrap();
        let expected = Expr::as_vector(vec![Expr::zero(); 3]).unwrap();
        assert_eq!(expand_indices(&bound).unwrap(), expected);
    }

    #[test]
    fn test_variables_sharing_a_label_may_differ() {
        let f = Expr::coefficient(FunctionSpace::scalar(2));
        let g = Expr::coefficient(FunctionSpace::scalar(2));
        let label = Label::new();
        let v1 = Expr::variable_with_label(&f, label).unwrap();
        let v2 = Expr::variable_with_label(&(&g * Expr::int(2)), label).unwrap();
        let e = &v1 * &v2;
        let expanded = expand_indices(&e).unwrap();
        assert_eq!(expanded, &f * (&g * Expr::int(2)));
    }

    #[test]
    fn test_grad_of_non_terminal_is_unsupported() {
        let f = Expr::coefficient(FunctionSpace::scalar(2));
        let g = Expr::grad(&(&f * &f)).unwrap();
        let e = g.component(&[0]).unwrap();
        assert!(matches!(
            expand_indices(&e),
            Err(TransformError::Unsupported { .. })
        ));

        let gg = Expr::grad(&Expr::grad(&f).unwrap()).unwrap();
        let e = gg.component(&[1, 0]).unwrap();
        assert_eq!(expand_indices(&e).unwrap(), e);
    }

    #[test]
    fn test_compound_operators_are_rejected() {
        let v = vector(3);
        let e = Expr::inner(&v, &v).unwrap();
        assert!(matches!(
            expand_indices(&e),
            Err(TransformError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_index_free_input_is_reused() {
        let f = Expr::coefficient(FunctionSpace::scalar(2));
        let g = Expr::coefficient(FunctionSpace::scalar(2));
        let c = Expr::condition(Comparison::Lt, &[f.clone(), g.clone()]).unwrap();
        let e = Expr::conditional(&c, &(&f * &g), &(&f / &g)).unwrap();
        let expanded = expand_indices(&e).unwrap();
        assert!(expanded.ptr_eq(&e));
    }

    #[test]
    fn test_variables_are_stripped() {
        let a = matrix(2);
        let inner = a.component(&[0, 1]).unwrap() * Expr::int(2);
        let v = Expr::variable(&inner).unwrap();
        assert_eq!(expand_indices(&v).unwrap(), inner);
    }

    #[test]
    fn test_purge_list_tensors() {
        let f = Expr::coefficient(FunctionSpace::scalar(2));
        let plain = &f * &f;
        assert!(purge_list_tensors(&plain).unwrap().ptr_eq(&plain));

        let w = vector(2);
        let i = Index::new();
        let l = Expr::as_vector(vec![f.clone(), Expr::int(2)]).unwrap();
        let e = l.at(&[i]).unwrap() * w.at(&[i]).unwrap();
        let once = purge_list_tensors(&e).unwrap();
        let twice = purge_list_tensors(&once).unwrap();
        assert_eq!(once, twice);
        assert!(is_index_free(&once));
    }

    #[test]
    fn test_expansion_is_idempotent_on_tensors() {
        let a = matrix(2);
        let once = expand_indices(&a).unwrap();
        let twice = purge_list_tensors(&once).unwrap();
        assert_eq!(once, twice);
    }
}
