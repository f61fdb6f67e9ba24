//! Detection of duplicated subexpressions and variable binding.
//!
//! [`mark_duplications`] wraps every subexpression occurring more than once in
//! a `Variable`, so a code generator can compute it once and refer to it by
//! label. [`strip_variables`] and [`extract_variables`] undo and inspect that
//! naming.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use log::debug;

use crate::errors::TransformError;
use crate::expr::{Expr, Kind, Operator};
use crate::transform::{reuse_if_possible, transform, HandlerTable};
use crate::types::Label;

/// Kinds cheaper to rebuild than to name.
const SKIPPED_KINDS: &[Kind] = &[
    Kind::Zero,
    Kind::IntValue,
    Kind::FloatValue,
    Kind::Identity,
    Kind::MultiIndex,
    Kind::Label,
];

/// Set of subexpressions occurring more than once in the tree unfolding of `expr`.
///
/// Occurrences are counted by structural identity, so equal subexpressions built
/// independently count as the same one. Every descendant of a duplicated node
/// is itself duplicated; those are marked directly instead of walking the
/// repeated subtree again.
pub fn extract_duplications(expr: &Expr) -> HashSet<Expr> {
    let mut seen = HashSet::new();
    let mut duplicated = HashSet::new();
    let mut stack = vec![expr.clone()];
    while let Some(node) = stack.pop() {
        if seen.insert(node.clone()) {
            stack.extend(node.operands().iter().rev().cloned());
        } else if duplicated.insert(node.clone()) {
            duplicated.extend(node.unique_pre_traversal().skip(1));
        }
    }
    duplicated
}

/// Wraps all duplicated subexpressions of `expr` in variables.
///
/// Each duplicated subexpression appears once inside a `Variable` and every
/// occurrence refers to that variable. Bindings made here always get fresh
/// labels; a user variable keeps its own label around the rewritten operand.
pub fn mark_duplications(expr: &Expr) -> Result<Expr, TransformError> {
    let duplications = extract_duplications(expr);
    debug!(
        "found {} duplicated subexpressions in {} distinct nodes",
        duplications.len(),
        expr.node_count()
    );

    let variables: RefCell<HashMap<Expr, Expr>> = RefCell::new(HashMap::new());
    let created = RefCell::new(0usize);

    let bind = |x: &Expr, y: Expr| -> Result<Expr, TransformError> {
        *created.borrow_mut() += 1;
        let v = Expr::variable_with_label(&y, Label::new())?;
        let mut cache = variables.borrow_mut();
        cache.insert(x.clone(), v.clone());
        cache.insert(y, v.clone());
        Ok(v)
    };

    let default = |x: &Expr, ops: Vec<Expr>| {
        mark_default(x, ops, &duplications, &variables, &bind)
    };
    let table: HandlerTable<'_, Expr> = HandlerTable::new()
        .on_each(Kind::TERMINALS, default)
        .on_each(Kind::OPERATORS, default)
        .on_each(SKIPPED_KINDS, |x, _| Ok(x.clone()))
        .on(Kind::Variable, |x, ops| {
            let e = &x.operands()[0];
            let Some(label) = x.label() else {
                return reuse_if_possible(x, ops);
            };
            let mut e2 = ops.into_iter().next().unwrap_or_else(|| e.clone());
            if e.kind() != Kind::Variable && e2.kind() == Kind::Variable {
                if e2.label() == Some(label) {
                    return Ok(e2);
                }
                // Unwrap the binding made for the inner expression
                e2 = e2.operands()[0].clone();
            }
            let v = Expr::variable_with_label(&e2, label)?;
            let mut cache = variables.borrow_mut();
            cache.insert(e.clone(), v.clone());
            cache.insert(e2, v.clone());
            Ok(v)
        });

    let result = transform(expr, &table)?;
    debug!("created {} variables", created.borrow());
    Ok(result)
}

fn mark_default(
    x: &Expr,
    ops: Vec<Expr>,
    duplications: &HashSet<Expr>,
    variables: &RefCell<HashMap<Expr, Expr>>,
    bind: &dyn Fn(&Expr, Expr) -> Result<Expr, TransformError>,
) -> Result<Expr, TransformError> {
    if let Some(v) = variables.borrow().get(x) {
        return Ok(v.clone());
    }
    let mut in_duplications = duplications.contains(x);
    let y = reuse_if_possible(x, ops)?;
    if !y.ptr_eq(x) {
        in_duplications |= duplications.contains(&y);
    }
    if in_duplications && y.kind() != Kind::Variable && !SKIPPED_KINDS.contains(&y.kind()) {
        bind(x, y)
    } else {
        Ok(y)
    }
}

/// Removes every `Variable` wrapper from `expr`.
///
/// Each label is stripped once and the result reused for all of its occurrences.
pub fn strip_variables(expr: &Expr) -> Result<Expr, TransformError> {
    let stripped: RefCell<HashMap<Label, Expr>> = RefCell::new(HashMap::new());
    let table = HandlerTable::reusing().on(Kind::Variable, |x, ops| {
        let label = x.label();
        let inner = ops.into_iter().next().unwrap_or_else(|| x.operands()[0].clone());
        match label {
            Some(label) => Ok(stripped
                .borrow_mut()
                .entry(label)
                .or_insert(inner)
                .clone()),
            None => Ok(inner),
        }
    });
    transform(expr, &table)
}

/// All variables reachable from `expr` in post-order, each label once.
///
/// Variables nested inside another variable come before it.
pub fn extract_variables(expr: &Expr) -> Vec<Expr> {
    let mut handled_labels = HashSet::new();
    let mut visited = HashSet::new();
    let mut variables = Vec::new();
    collect_variables(expr, &mut handled_labels, &mut visited, &mut variables);
    variables
}

fn collect_variables(
    expr: &Expr,
    handled_labels: &mut HashSet<Label>,
    visited: &mut HashSet<Expr>,
    variables: &mut Vec<Expr>,
) {
    match expr.operator() {
        Operator::Variable(label) => {
            if !handled_labels.insert(*label) {
                return;
            }
            collect_variables(&expr.operands()[0], handled_labels, visited, variables);
            variables.push(expr.clone());
        }
        _ => {
            if !visited.insert(expr.clone()) {
                return;
            }
            for operand in expr.operands() {
                collect_variables(operand, handled_labels, visited, variables);
            }
        }
    }
}
