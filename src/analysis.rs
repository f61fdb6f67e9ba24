//! Queries over expressions and the multilinearity analysis.
//!
//! The `extract_*` functions collect nodes of interest from an expression.
//! [`extract_basisfunction_dependencies`] interprets an expression abstractly,
//! mapping every subexpression to the set of argument combinations its terms
//! depend on, and fails with `TransformError::NotMultilinear` as soon as an
//! argument enters nonlinearly.

use std::collections::BTreeSet;
use std::fmt;

use colored::Colorize;
use itertools::Itertools;
use log::debug;

use crate::errors::TransformError;
use crate::expr::{Expr, Kind, Operator};
use crate::transform::{transform, HandlerTable};
use crate::types::{Index, IndexItem};
use crate::variables::extract_variables;

/// Argument combinations of an expression, one per additive term.
///
/// The empty set stands for an expression independent of all arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencySet(BTreeSet<BTreeSet<Expr>>);

impl DependencySet {
    pub fn empty() -> Self {
        DependencySet(BTreeSet::new())
    }

    /// One term depending on `argument` alone.
    pub fn single(argument: Expr) -> Self {
        DependencySet(BTreeSet::from([BTreeSet::from([argument])]))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn terms(&self) -> impl Iterator<Item = &BTreeSet<Expr>> {
        self.0.iter()
    }

    /// Whether one term depends on exactly `arguments`.
    pub fn contains_term(&self, arguments: &[Expr]) -> bool {
        let term: BTreeSet<Expr> = arguments.iter().cloned().collect();
        self.0.contains(&term)
    }

    fn union(mut self, other: DependencySet) -> Self {
        self.0.extend(other.0);
        self
    }

    /// Pairs every term of `self` with every term of `other`.
    ///
    /// A side independent of all arguments leaves the other side unchanged.
    fn combine(self, other: DependencySet, x: &Expr) -> Result<Self, TransformError> {
        if self.is_empty() {
            return Ok(other);
        }
        if other.is_empty() {
            return Ok(self);
        }
        let mut combined = BTreeSet::new();
        for a in &self.0 {
            for b in &other.0 {
                if !a.is_disjoint(b) {
                    return Err(TransformError::NotMultilinear(x.clone()));
                }
                combined.insert(a.union(b).cloned().collect());
            }
        }
        Ok(DependencySet(combined))
    }
}

impl fmt::Display for DependencySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{}}}",
            self.0
                .iter()
                .map(|term| format!("{{{}}}", term.iter().join(", ")))
                .join(", ")
        )
    }
}

/// Operators linear in their first operand whose other operands are bookkeeping.
const LINEAR_KINDS: &[Kind] = &[
    Kind::Grad,
    Kind::Div,
    Kind::Curl,
    Kind::Rot,
    Kind::Transposed,
    Kind::Trace,
    Kind::Skew,
    Kind::Restricted,
    Kind::IndexSum,
    Kind::ComponentTensor,
    Kind::Variable,
];

/// Operators linear in their first operand that must not depend on arguments
/// through the second.
const LINEAR_IN_FIRST_KINDS: &[Kind] = &[
    Kind::Indexed,
    Kind::SpatialDerivative,
    Kind::VariableDerivative,
    Kind::Division,
];

const PRODUCT_KINDS: &[Kind] = &[Kind::Product, Kind::Inner, Kind::Outer, Kind::Dot, Kind::Cross];

fn first(ops: Vec<DependencySet>) -> DependencySet {
    ops.into_iter().next().unwrap_or_default()
}

fn nonlinear(x: &Expr, ops: Vec<DependencySet>) -> Result<DependencySet, TransformError> {
    if ops.iter().any(|d| !d.is_empty()) {
        return Err(TransformError::NotMultilinear(x.clone()));
    }
    Ok(DependencySet::empty())
}

fn linear_in_first(x: &Expr, ops: Vec<DependencySet>) -> Result<DependencySet, TransformError> {
    if ops.iter().skip(1).any(|d| !d.is_empty()) {
        return Err(TransformError::NotMultilinear(x.clone()));
    }
    Ok(first(ops))
}

fn product(x: &Expr, ops: Vec<DependencySet>) -> Result<DependencySet, TransformError> {
    ops.into_iter()
        .try_fold(DependencySet::empty(), |acc, d| acc.combine(d, x))
}

fn list_tensor(x: &Expr, ops: Vec<DependencySet>) -> Result<DependencySet, TransformError> {
    let mut ops = ops.into_iter();
    let head = ops.next().unwrap_or_default();
    if ops.any(|d| d != head) {
        return Err(TransformError::NotMultilinear(x.clone()));
    }
    Ok(head)
}

fn conditional(x: &Expr, ops: Vec<DependencySet>) -> Result<DependencySet, TransformError> {
    match <[DependencySet; 3]>::try_from(ops) {
        Ok([condition, true_value, false_value])
            if condition.is_empty() && true_value == false_value =>
        {
            Ok(true_value)
        }
        _ => Err(TransformError::NotMultilinear(x.clone())),
    }
}

/// Argument dependencies of `expr`, one entry per additive term.
///
/// # Arguments
/// * `expr` - Integrand to analyse
///
/// # Returns
/// The combinations of arguments the terms of `expr` depend on.
///
/// # Errors
/// Returns `TransformError::NotMultilinear` carrying the offending node when
/// an argument appears in a nonlinear position, twice in one product, in a
/// denominator or in a condition.
pub fn extract_basisfunction_dependencies(expr: &Expr) -> Result<DependencySet, TransformError> {
    let table: HandlerTable<'_, DependencySet> = HandlerTable::new()
        .on_each(Kind::TERMINALS, |_, _| Ok(DependencySet::empty()))
        .on(Kind::Argument, |x, _| Ok(DependencySet::single(x.clone())))
        .on_each(Kind::OPERATORS, nonlinear)
        .on_each(LINEAR_KINDS, |_, ops| Ok(first(ops)))
        .on_each(LINEAR_IN_FIRST_KINDS, linear_in_first)
        .on(Kind::Sum, |_, ops| {
            Ok(ops
                .into_iter()
                .fold(DependencySet::empty(), DependencySet::union))
        })
        .on_each(PRODUCT_KINDS, product)
        .on(Kind::ListTensor, list_tensor)
        .on(Kind::Conditional, conditional);
    let dependencies = transform(expr, &table)?;
    debug!("argument dependencies: {dependencies}");
    Ok(dependencies)
}

/// Whether `expr` is multilinear in its arguments.
///
/// Only the nonlinearity condition maps to `false`; other failures propagate.
pub fn is_multilinear(expr: &Expr) -> Result<bool, TransformError> {
    match extract_basisfunction_dependencies(expr) {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_multilinear() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Distinct nodes of one kind, in pre-order.
pub fn extract_type(expr: &Expr, kind: Kind) -> Vec<Expr> {
    expr.unique_pre_traversal()
        .filter(|e| e.kind() == kind)
        .collect()
}

/// Distinct terminals, multi-indices excluded.
pub fn extract_terminals(expr: &Expr) -> Vec<Expr> {
    expr.unique_pre_traversal()
        .filter(|e| e.is_terminal() && e.kind() != Kind::MultiIndex)
        .collect()
}

/// Distinct arguments sorted by number and part.
pub fn extract_arguments(expr: &Expr) -> Vec<Expr> {
    extract_type(expr, Kind::Argument)
        .into_iter()
        .sorted_by_key(|e| match e.operator() {
            Operator::Argument { number, part, .. } => (*number, *part),
            _ => (usize::MAX, None),
        })
        .collect()
}

/// Distinct coefficients sorted by count.
pub fn extract_coefficients(expr: &Expr) -> Vec<Expr> {
    extract_type(expr, Kind::Coefficient)
        .into_iter()
        .sorted_by_key(|e| match e.operator() {
            Operator::Coefficient { count, .. } => *count,
            _ => usize::MAX,
        })
        .collect()
}

/// Free indices used in any multi-index of `expr`.
pub fn extract_indices(expr: &Expr) -> BTreeSet<Index> {
    extract_type(expr, Kind::MultiIndex)
        .iter()
        .flat_map(|mi| mi.multi_index().unwrap_or(&[]).to_vec())
        .filter_map(|item| match item {
            IndexItem::Free(index) => Some(index),
            IndexItem::Fixed(_) => None,
        })
        .collect()
}

/// Overview of one integrand: its terminals, variables and argument structure.
pub struct IntegrandSummary {
    pub integrand: Expr,
    pub arguments: Vec<Expr>,
    pub coefficients: Vec<Expr>,
    pub variables: Vec<Expr>,
    /// `None` when the integrand is not multilinear.
    pub dependencies: Option<DependencySet>,
}

impl IntegrandSummary {
    /// Analyses `integrand`.
    ///
    /// # Errors
    /// Propagates every analysis failure except nonlinearity, which is
    /// recorded as missing dependencies.
    pub fn new(integrand: &Expr) -> Result<Self, TransformError> {
        let dependencies = match extract_basisfunction_dependencies(integrand) {
            Ok(dependencies) => Some(dependencies),
            Err(e) if e.is_not_multilinear() => None,
            Err(e) => return Err(e),
        };
        Ok(IntegrandSummary {
            integrand: integrand.clone(),
            arguments: extract_arguments(integrand),
            coefficients: extract_coefficients(integrand),
            variables: extract_variables(integrand),
            dependencies,
        })
    }

    /// Number of distinct argument numbers: 0 for a functional, 1 for a linear
    /// form, 2 for a bilinear form.
    pub fn rank(&self) -> usize {
        self.arguments
            .iter()
            .filter_map(|a| match a.operator() {
                Operator::Argument { number, .. } => Some(*number),
                _ => None,
            })
            .unique()
            .count()
    }

    pub fn is_multilinear(&self) -> bool {
        self.dependencies.is_some()
    }

    fn write(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{\n")?;
        writeln!(f, "    {}: {}\n", "Integrand".cyan(), self.integrand)?;
        writeln!(
            f,
            "    {}: [{}]\n",
            "Arguments".cyan(),
            self.arguments.iter().join(", ")
        )?;
        writeln!(
            f,
            "    {}: [{}]\n",
            "Coefficients".cyan(),
            self.coefficients.iter().join(", ")
        )?;
        writeln!(
            f,
            "    {}: [{}]\n",
            "Variables".cyan(),
            self.variables.iter().join(", ")
        )?;
        match &self.dependencies {
            Some(dependencies) => {
                writeln!(f, "    {}: {}\n", "Dependencies".cyan(), dependencies)?
            }
            None => writeln!(
                f,
                "    {}: {}\n",
                "Dependencies".cyan(),
                "not multilinear".red()
            )?,
        }
        writeln!(f, "}}")?;
        Ok(())
    }
}

impl fmt::Debug for IntegrandSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f)
    }
}

impl fmt::Display for IntegrandSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f)
    }
}
