//! Data-parallel application of the passes to many integrands.
//!
//! The passes keep all of their state local to one invocation, and `Expr` is
//! `Send + Sync`, so independent integrands can be processed on the rayon
//! thread pool. Results keep the order of the input slice.

use log::debug;
use rayon::prelude::*;

use crate::analysis::{extract_basisfunction_dependencies, DependencySet, IntegrandSummary};
use crate::errors::{EvalError, TransformError};
use crate::eval::{evaluate, Bindings};
use crate::expand::expand_indices;
use crate::expr::Expr;
use crate::lowering::apply_algebra_lowering;
use crate::variables::mark_duplications;

fn run_all<T, F>(pass: &str, exprs: &[Expr], f: F) -> Result<Vec<T>, TransformError>
where
    T: Send,
    F: Fn(&Expr) -> Result<T, TransformError> + Sync + Send,
{
    debug!("running {pass} on {} integrands", exprs.len());
    exprs.par_iter().map(f).collect()
}

/// Applies [`apply_algebra_lowering`] to every expression.
pub fn lower_all(exprs: &[Expr]) -> Result<Vec<Expr>, TransformError> {
    run_all("algebra lowering", exprs, apply_algebra_lowering)
}

/// Applies [`expand_indices`] to every expression.
///
/// # Errors
/// Returns the first error in input order if any expansion fails.
pub fn expand_indices_all(exprs: &[Expr]) -> Result<Vec<Expr>, TransformError> {
    run_all("index expansion", exprs, expand_indices)
}

/// Applies [`mark_duplications`] to every expression.
pub fn mark_duplications_all(exprs: &[Expr]) -> Result<Vec<Expr>, TransformError> {
    run_all("duplication marking", exprs, mark_duplications)
}

/// Computes the basis function dependencies of every expression.
///
/// A nonlinear integrand fails the whole batch; use [`summarize_all`] to
/// inspect a mix of linear and nonlinear integrands.
pub fn extract_dependencies_all(exprs: &[Expr]) -> Result<Vec<DependencySet>, TransformError> {
    run_all("dependency extraction", exprs, extract_basisfunction_dependencies)
}

/// Builds an [`IntegrandSummary`] for every expression.
pub fn summarize_all(exprs: &[Expr]) -> Result<Vec<IntegrandSummary>, TransformError> {
    run_all("integrand summary", exprs, IntegrandSummary::new)
}

/// Evaluates every expression against the same bindings.
pub fn evaluate_all(exprs: &[Expr], bindings: &Bindings) -> Result<Vec<f64>, EvalError> {
    debug!("evaluating {} integrands", exprs.len());
    exprs.par_iter().map(|e| evaluate(e, bindings)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FunctionSpace;
    use crate::variables::strip_variables;

    fn integrands() -> (Expr, Expr, Vec<Expr>) {
        let u = Expr::argument(1, FunctionSpace::scalar(2));
        let v = Expr::argument(0, FunctionSpace::scalar(2));
        let f = Expr::coefficient(FunctionSpace::scalar(2));
        let exprs = vec![
            &u * &v,
            &f * &v + &f * &v,
            &u * &u * &v,
            Expr::int(2) * &f * &v,
        ];
        (u, v, exprs)
    }

    #[test]
    fn test_results_keep_input_order() {
        let (_, _, exprs) = integrands();
        let marked = mark_duplications_all(&exprs).unwrap();
        assert_eq!(marked.len(), exprs.len());
        for (m, e) in marked.iter().zip(&exprs) {
            assert_eq!(strip_variables(m).unwrap(), *e);
        }
        let expanded = expand_indices_all(&exprs).unwrap();
        assert_eq!(expanded, exprs);
    }

    #[test]
    fn test_nonlinear_integrand_fails_batch() {
        let (_, _, exprs) = integrands();
        let err = extract_dependencies_all(&exprs).unwrap_err();
        assert!(err.is_not_multilinear());

        let summaries = summarize_all(&exprs).unwrap();
        let linear = summaries.iter().filter(|s| s.is_multilinear()).count();
        assert_eq!(linear, 3);
    }

    #[test]
    fn test_evaluate_all() {
        let (u, v, exprs) = integrands();
        let f = Expr::coefficient(FunctionSpace::scalar(2));
        let bindings = Bindings::new().bind(&u, 2.0).bind(&v, 3.0).bind(&f, 0.5);
        let values = evaluate_all(&exprs[..1], &bindings).unwrap();
        assert_eq!(values, vec![6.0]);
        assert!(evaluate_all(&exprs, &bindings).is_err());
    }
}
