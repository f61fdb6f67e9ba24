//! Generic post-order transformation of expression DAGs.
//!
//! A pass is described by a [`HandlerTable`]: one handler per node kind,
//! taking the node and the already transformed operands and returning the
//! value for the node. The value type is generic, so the same driver runs
//! expression rewrites as well as abstract interpretations.
//!
//! Results are memoized per structurally distinct node within one run, so a
//! shared subexpression is transformed once and its result shared as well.

use std::collections::HashMap;
use std::rc::Rc;

use log::trace;

use crate::errors::TransformError;
use crate::expr::{Expr, Kind};

/// Handler for one node kind.
pub type Handler<'h, T> = Rc<dyn Fn(&Expr, Vec<T>) -> Result<T, TransformError> + 'h>;

/// Mapping from node kind to handler.
///
/// Handlers may borrow pass-local state for the lifetime `'h`.
pub struct HandlerTable<'h, T> {
    handlers: HashMap<Kind, Handler<'h, T>>,
}

impl<'h, T> Default for HandlerTable<'h, T> {
    fn default() -> Self {
        HandlerTable {
            handlers: HashMap::new(),
        }
    }
}

impl<'h, T> HandlerTable<'h, T> {
    /// Creates an empty table. Every kind reached must be registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`, replacing any previous entry.
    pub fn on<F>(mut self, kind: Kind, handler: F) -> Self
    where
        F: Fn(&Expr, Vec<T>) -> Result<T, TransformError> + 'h,
    {
        self.handlers.insert(kind, Rc::new(handler));
        self
    }

    /// Registers one shared handler for several kinds.
    pub fn on_each<F>(mut self, kinds: &[Kind], handler: F) -> Self
    where
        F: Fn(&Expr, Vec<T>) -> Result<T, TransformError> + 'h,
    {
        let handler: Handler<'h, T> = Rc::new(handler);
        for kind in kinds {
            self.handlers.insert(*kind, handler.clone());
        }
        self
    }

    pub fn get(&self, kind: Kind) -> Option<&Handler<'h, T>> {
        self.handlers.get(&kind)
    }

    /// Whether every kind in `kinds` has a handler.
    pub fn covers(&self, kinds: &[Kind]) -> bool {
        kinds.iter().all(|kind| self.handlers.contains_key(kind))
    }
}

impl<'h> HandlerTable<'h, Expr> {
    /// Table returning terminals as they are and rebuilding every other node
    /// through [`reuse_if_possible`]. Passes override the kinds they rewrite.
    pub fn reusing() -> Self {
        HandlerTable::new()
            .on_each(Kind::TERMINALS, |e, _| Ok(e.clone()))
            .on_each(Kind::OPERATORS, reuse_if_possible)
    }
}

/// Transforms `expr` bottom-up with the handlers in `table`.
///
/// # Arguments
/// * `expr` - Root of the DAG to transform
/// * `table` - Handler per reachable node kind
///
/// # Returns
/// The value the root handler produced.
///
/// # Errors
/// Returns `TransformError::MissingHandler` for a kind absent from the table,
/// or the first error raised by a handler. No partial result is returned.
pub fn transform<T: Clone>(expr: &Expr, table: &HandlerTable<'_, T>) -> Result<T, TransformError> {
    let mut memo = HashMap::new();
    let result = visit(expr, table, &mut memo)?;
    trace!("transformed {} distinct nodes", memo.len());
    Ok(result)
}

fn visit<T: Clone>(
    expr: &Expr,
    table: &HandlerTable<'_, T>,
    memo: &mut HashMap<Expr, T>,
) -> Result<T, TransformError> {
    if let Some(value) = memo.get(expr) {
        return Ok(value.clone());
    }
    let operands = expr
        .operands()
        .iter()
        .map(|operand| visit(operand, table, memo))
        .collect::<Result<Vec<_>, _>>()?;
    let handler = table
        .get(expr.kind())
        .ok_or_else(|| TransformError::MissingHandler {
            kind: expr.kind(),
            expr: expr.to_string(),
        })?;
    let value = handler(expr, operands)?;
    memo.insert(expr.clone(), value.clone());
    Ok(value)
}

/// Whether two handles denote the same node for rewriting purposes.
///
/// Stricter than `==` for variables, whose wrapped expression must match too.
pub fn same_node(a: &Expr, b: &Expr) -> bool {
    if a.ptr_eq(b) {
        return true;
    }
    if a != b {
        return false;
    }
    match (a.kind(), b.kind()) {
        (Kind::Variable, Kind::Variable) => same_node(&a.operands()[0], &b.operands()[0]),
        _ => true,
    }
}

/// Returns `expr` itself when `operands` equal its operands, otherwise a new
/// node of the same operator built from `operands`.
pub fn reuse_if_possible(expr: &Expr, operands: Vec<Expr>) -> Result<Expr, TransformError> {
    let unchanged = operands.len() == expr.operands().len()
        && operands
            .iter()
            .zip(expr.operands())
            .all(|(new, old)| same_node(new, old));
    if unchanged {
        Ok(expr.clone())
    } else {
        Ok(expr.reconstruct(operands)?)
    }
}
