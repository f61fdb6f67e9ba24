//! Numeric evaluation of scalar expressions.
//!
//! Evaluation lowers compound operators, expands all indices and then folds
//! the remaining scalar DAG into an `f64`. Terminals are bound to numeric
//! values through [`Bindings`]; after expansion every terminal occurrence
//! selects a single component of its value.

use std::collections::HashMap;
use std::fmt;

use log::debug;

use crate::backends::value::TensorValue;
use crate::errors::EvalError;
use crate::expand::expand_indices;
use crate::expr::{Comparison, Expr, Operator};
use crate::lowering::apply_algebra_lowering;
use crate::types::IndexItem;

/// Numeric values of the terminals of an expression.
#[derive(Default)]
pub struct Bindings {
    values: HashMap<Expr, Box<dyn TensorValue>>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `value` to `terminal`, replacing any previous value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use formexpr::prelude::*;
    ///
    /// let f = Expr::coefficient(FunctionSpace::scalar(2));
    /// let g = Expr::coefficient(FunctionSpace::vector(2, 2));
    /// let bindings = Bindings::new().bind(&f, 3.0).bind(&g, vec![1.0, 2.0]);
    /// let e = &f * g.component(&[1]).unwrap();
    /// assert_eq!(evaluate(&e, &bindings).unwrap(), 6.0);
    /// ```
    pub fn bind<V: TensorValue + 'static>(mut self, terminal: &Expr, value: V) -> Self {
        self.insert(terminal, value);
        self
    }

    pub fn insert<V: TensorValue + 'static>(&mut self, terminal: &Expr, value: V) {
        self.values.insert(terminal.clone(), Box::new(value));
    }

    pub fn get(&self, terminal: &Expr) -> Option<&dyn TensorValue> {
        self.values.get(terminal).map(|v| v.as_ref())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.values
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.value_shape())),
            )
            .finish()
    }
}

/// Evaluates a scalar expression without free indices.
///
/// # Arguments
/// * `expr` - Scalar expression, possibly containing compound operators and
///   index notation
/// * `bindings` - Values of the arguments, coefficients and spatial
///   coordinates reached by `expr`
///
/// # Errors
/// Returns `EvalError::NonScalar` for tensor valued or indexed expressions,
/// `EvalError::Unbound` for a terminal without a value and
/// `EvalError::Unsupported` for derivatives, which have no numeric meaning
/// here.
pub fn evaluate(expr: &Expr, bindings: &Bindings) -> Result<f64, EvalError> {
    if !expr.is_scalar() || !expr.free_indices().is_empty() {
        return Err(EvalError::NonScalar {
            shape: expr.shape().to_vec(),
            expr: expr.to_string(),
        });
    }
    let expanded = expand_indices(&apply_algebra_lowering(expr)?)?;
    debug!("evaluating {} expanded nodes", expanded.node_count());
    let mut evaluator = Evaluator {
        bindings,
        cache: HashMap::new(),
    };
    evaluator.value(&expanded)
}

struct Evaluator<'b> {
    bindings: &'b Bindings,
    cache: HashMap<Expr, f64>,
}

impl Evaluator<'_> {
    fn value(&mut self, x: &Expr) -> Result<f64, EvalError> {
        if let Some(v) = self.cache.get(x) {
            return Ok(*v);
        }
        let ops = x.operands();
        let v = match x.operator() {
            Operator::Zero => 0.0,
            Operator::IntValue(_) | Operator::FloatValue(_) => {
                x.scalar_value().ok_or_else(|| EvalError::Unsupported(x.to_string()))?
            }
            Operator::Argument { .. }
            | Operator::Coefficient { .. }
            | Operator::SpatialCoordinate(_) => self.component(x, &[])?,
            Operator::Indexed => {
                let component = fixed_component(&ops[1])
                    .ok_or_else(|| EvalError::Unsupported(x.to_string()))?;
                self.component(&ops[0], &component)?
            }
            Operator::Sum => self.value(&ops[0])? + self.value(&ops[1])?,
            Operator::Product => self.value(&ops[0])? * self.value(&ops[1])?,
            Operator::Division => self.value(&ops[0])? / self.value(&ops[1])?,
            Operator::Power => self.value(&ops[0])?.powf(self.value(&ops[1])?),
            Operator::Sqrt => self.value(&ops[0])?.sqrt(),
            Operator::Conditional => {
                if self.condition(&ops[0])? {
                    self.value(&ops[1])?
                } else {
                    self.value(&ops[2])?
                }
            }
            Operator::Variable(_) => self.value(&ops[0])?,
            _ => return Err(EvalError::Unsupported(x.to_string())),
        };
        self.cache.insert(x.clone(), v);
        Ok(v)
    }

    fn condition(&mut self, x: &Expr) -> Result<bool, EvalError> {
        let Operator::Condition(op) = x.operator() else {
            return Err(EvalError::Unsupported(x.to_string()));
        };
        let ops = x.operands();
        Ok(match op {
            Comparison::And => self.condition(&ops[0])? && self.condition(&ops[1])?,
            Comparison::Or => self.condition(&ops[0])? || self.condition(&ops[1])?,
            Comparison::Not => !self.condition(&ops[0])?,
            _ => {
                let (a, b) = (self.value(&ops[0])?, self.value(&ops[1])?);
                match op {
                    Comparison::Eq => a == b,
                    Comparison::Ne => a != b,
                    Comparison::Lt => a < b,
                    Comparison::Gt => a > b,
                    Comparison::Le => a <= b,
                    _ => a >= b,
                }
            }
        })
    }

    fn component(&self, terminal: &Expr, component: &[usize]) -> Result<f64, EvalError> {
        let value = self
            .bindings
            .get(terminal)
            .ok_or_else(|| EvalError::Unbound(terminal.to_string()))?;
        value
            .get(component)
            .ok_or_else(|| EvalError::ComponentOutOfRange {
                component: component.to_vec(),
                expr: terminal.to_string(),
            })
    }
}

fn fixed_component(multi_index: &Expr) -> Option<Vec<usize>> {
    multi_index
        .multi_index()?
        .iter()
        .map(|item| match item {
            IndexItem::Fixed(value) => Some(*value),
            IndexItem::Free(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FunctionSpace, Index};

    fn matrix(n: usize) -> Expr {
        Expr::coefficient(FunctionSpace::tensor(vec![n, n], n))
    }

    #[test]
    fn test_evaluate_arithmetic() {
        let f = Expr::coefficient(FunctionSpace::scalar(2));
        let g = Expr::coefficient(FunctionSpace::scalar(2));
        let bindings = Bindings::new().bind(&f, 2.0).bind(&g, 8.0);
        let e = (&f * &g + Expr::int(1)) / Expr::float(2.0);
        assert_eq!(evaluate(&e, &bindings).unwrap(), 8.5);
        assert_eq!(evaluate(&g.try_sqrt().unwrap(), &bindings).unwrap(), 8f64.sqrt());
        let p = f.try_pow(&Expr::int(3)).unwrap();
        assert_eq!(evaluate(&p, &bindings).unwrap(), 8.0);
    }

    #[test]
    fn test_evaluate_index_notation() {
        let a = matrix(2);
        let bindings = Bindings::new().bind(&a, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let i = Index::new();
        let trace = a.at(&[i, i]).unwrap();
        assert_eq!(evaluate(&trace, &bindings).unwrap(), 5.0);
        let det = Expr::determinant(&a).unwrap();
        assert_eq!(evaluate(&det, &bindings).unwrap(), -2.0);
        let tr = Expr::trace(&Expr::transposed(&a).unwrap()).unwrap();
        assert_eq!(evaluate(&tr, &bindings).unwrap(), 5.0);
    }

    #[test]
    fn test_evaluate_conditional() {
        let f = Expr::coefficient(FunctionSpace::scalar(2));
        let c = Expr::condition(Comparison::Lt, &[f.clone(), Expr::int(1)]).unwrap();
        let e = Expr::conditional(&c, &Expr::int(10), &Expr::int(20)).unwrap();
        let low = Bindings::new().bind(&f, 0.5);
        let high = Bindings::new().bind(&f, 1.5);
        assert_eq!(evaluate(&e, &low).unwrap(), 10.0);
        assert_eq!(evaluate(&e, &high).unwrap(), 20.0);
    }

    #[test]
    fn test_evaluate_errors() {
        let f = Expr::coefficient(FunctionSpace::scalar(2));
        assert!(matches!(
            evaluate(&f, &Bindings::new()),
            Err(EvalError::Unbound(_))
        ));
        let v = Expr::coefficient(FunctionSpace::vector(3, 3));
        assert!(matches!(
            evaluate(&v, &Bindings::new()),
            Err(EvalError::NonScalar { .. })
        ));
        let short = Bindings::new().bind(&v, vec![1.0]);
        assert!(matches!(
            evaluate(&v.component(&[2]).unwrap(), &short),
            Err(EvalError::ComponentOutOfRange { .. })
        ));
        let d = Expr::spatial_derivative(&f, &[IndexItem::Fixed(0)]).unwrap();
        assert!(matches!(
            evaluate(&d, &Bindings::new().bind(&f, 1.0)),
            Err(EvalError::Unsupported(_))
        ));
    }
}
