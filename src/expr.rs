//! Expression module for representing tensor valued form expressions.
//!
//! This module defines the node model every pass relies on. The main types are:
//!
//! - `Expr`: A cheap to clone, immutable handle to a shared expression node
//! - `Operator`: The tag of a node together with the payload of terminal kinds
//! - `Kind`: The payload free tag, used to key handler tables
//!
//! Expressions form a directed acyclic graph: several parents may hold the same
//! child. Nodes are never mutated after construction; a rewrite either returns
//! the original handle or builds a new node.
//!
//! # Structural identity
//! Two expressions are equal iff they have the same operator, shape and free
//! indices and structurally equal operands. The only exception is `Variable`,
//! whose identity is its label alone. The structural hash is computed once at
//! construction with a deterministic hasher, so equality checks between distinct
//! nodes usually stop at the hash and `Expr` can key hash maps cheaply.
//!
//! Nodes are built through the validating constructors in [`crate::builder`].

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use itertools::Itertools;

use crate::types::{FreeIndices, FunctionSpace, IndexItem, Label, Shape};

/// A floating point constant compared and hashed by its bit pattern.
#[derive(Debug, Clone, Copy)]
pub struct Real(f64);

impl Real {
    pub fn new(value: f64) -> Self {
        Real(value)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl PartialEq for Real {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for Real {}

impl Hash for Real {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl PartialOrd for Real {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Real {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Side of an interior facet a restricted expression is evaluated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
    Positive,
    Negative,
}

/// Boolean valued operators used as the condition of a `Conditional`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    Not,
}

impl Comparison {
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
            Comparison::Lt => "<",
            Comparison::Gt => ">",
            Comparison::Le => "<=",
            Comparison::Ge => ">=",
            Comparison::And => "&&",
            Comparison::Or => "||",
            Comparison::Not => "!",
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Comparison::Not => 1,
            _ => 2,
        }
    }
}

/// The tag of an expression node, carrying the payload of terminal kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operator {
    /// Zero of any shape, with any free indices
    Zero,
    /// Integer constant, never zero
    IntValue(i64),
    /// Floating point constant, never zero
    FloatValue(Real),
    /// Identity matrix of the given dimension
    Identity(usize),
    /// Test or trial function of a form
    Argument {
        number: usize,
        part: Option<usize>,
        space: FunctionSpace,
    },
    /// Known field of a form
    Coefficient { count: usize, space: FunctionSpace },
    /// Physical coordinate of the integration point
    SpatialCoordinate(usize),
    /// Standalone variable label
    Label(Label),
    /// Tuple of fixed and free indices
    MultiIndex(Vec<IndexItem>),

    Sum,
    Product,
    Division,
    Power,
    Sqrt,
    /// `A[ii]`, operands are the tensor and a multi-index
    Indexed,
    /// Sum over one index, operands are the summand and a single-entry multi-index
    IndexSum,
    /// `as_tensor(f, ii)`, operands are the scalar expression and a multi-index of free indices
    ComponentTensor,
    /// Tensor listing its subtensors along the first axis
    ListTensor,
    /// `cond ? true_value : false_value`
    Conditional,
    Condition(Comparison),

    Grad,
    Div,
    Curl,
    Rot,
    /// `f.dx(ii)`, operands are the expression and a multi-index
    SpatialDerivative,
    /// `diff(f, v)`, operands are the expression and a `Variable`
    VariableDerivative,
    Restricted(Side),

    Transposed,
    Inner,
    Outer,
    Dot,
    Cross,
    Trace,
    Skew,
    Determinant,
    Inverse,
    Cofactor,
    Deviatoric,

    /// Named wrapper around exactly one expression
    Variable(Label),
}

/// Payload free node kind. Keys handler tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Zero,
    IntValue,
    FloatValue,
    Identity,
    Argument,
    Coefficient,
    SpatialCoordinate,
    Label,
    MultiIndex,
    Sum,
    Product,
    Division,
    Power,
    Sqrt,
    Indexed,
    IndexSum,
    ComponentTensor,
    ListTensor,
    Conditional,
    Condition,
    Grad,
    Div,
    Curl,
    Rot,
    SpatialDerivative,
    VariableDerivative,
    Restricted,
    Transposed,
    Inner,
    Outer,
    Dot,
    Cross,
    Trace,
    Skew,
    Determinant,
    Inverse,
    Cofactor,
    Deviatoric,
    Variable,
}

impl Kind {
    pub const TERMINALS: &'static [Kind] = &[
        Kind::Zero,
        Kind::IntValue,
        Kind::FloatValue,
        Kind::Identity,
        Kind::Argument,
        Kind::Coefficient,
        Kind::SpatialCoordinate,
        Kind::Label,
        Kind::MultiIndex,
    ];

    pub const OPERATORS: &'static [Kind] = &[
        Kind::Sum,
        Kind::Product,
        Kind::Division,
        Kind::Power,
        Kind::Sqrt,
        Kind::Indexed,
        Kind::IndexSum,
        Kind::ComponentTensor,
        Kind::ListTensor,
        Kind::Conditional,
        Kind::Condition,
        Kind::Grad,
        Kind::Div,
        Kind::Curl,
        Kind::Rot,
        Kind::SpatialDerivative,
        Kind::VariableDerivative,
        Kind::Restricted,
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
        Kind::Variable,
    ];

    pub fn is_terminal(&self) -> bool {
        Kind::TERMINALS.contains(self)
    }

    /// Constant valued terminals that are cheaper to rebuild than to name.
    pub fn is_trivial_constant(&self) -> bool {
        matches!(
            self,
            Kind::Zero | Kind::IntValue | Kind::FloatValue | Kind::Identity | Kind::MultiIndex
        )
    }

    /// Compound tensor algebra operators that a lowering pass rewrites away.
    pub fn is_compound(&self) -> bool {
        matches!(
            self,
            Kind::Transposed
                | Kind::Inner
                | Kind::Outer
                | Kind::Dot
                | Kind::Cross
                | Kind::Trace
                | Kind::Skew
                | Kind::Determinant
                | Kind::Inverse
                | Kind::Cofactor
                | Kind::Deviatoric
                | Kind::Div
                | Kind::Curl
                | Kind::Rot
        )
    }
}

impl Operator {
    pub fn kind(&self) -> Kind {
        match self {
            Operator::Zero => Kind::Zero,
            Operator::IntValue(_) => Kind::IntValue,
            Operator::FloatValue(_) => Kind::FloatValue,
            Operator::Identity(_) => Kind::Identity,
            Operator::Argument { .. } => Kind::Argument,
            Operator::Coefficient { .. } => Kind::Coefficient,
            Operator::SpatialCoordinate(_) => Kind::SpatialCoordinate,
            Operator::Label(_) => Kind::Label,
            Operator::MultiIndex(_) => Kind::MultiIndex,
            Operator::Sum => Kind::Sum,
            Operator::Product => Kind::Product,
            Operator::Division => Kind::Division,
            Operator::Power => Kind::Power,
            Operator::Sqrt => Kind::Sqrt,
            Operator::Indexed => Kind::Indexed,
            Operator::IndexSum => Kind::IndexSum,
            Operator::ComponentTensor => Kind::ComponentTensor,
            Operator::ListTensor => Kind::ListTensor,
            Operator::Conditional => Kind::Conditional,
            Operator::Condition(_) => Kind::Condition,
            Operator::Grad => Kind::Grad,
            Operator::Div => Kind::Div,
            Operator::Curl => Kind::Curl,
            Operator::Rot => Kind::Rot,
            Operator::SpatialDerivative => Kind::SpatialDerivative,
            Operator::VariableDerivative => Kind::VariableDerivative,
            Operator::Restricted(_) => Kind::Restricted,
            Operator::Transposed => Kind::Transposed,
            Operator::Inner => Kind::Inner,
            Operator::Outer => Kind::Outer,
            Operator::Dot => Kind::Dot,
            Operator::Cross => Kind::Cross,
            Operator::Trace => Kind::Trace,
            Operator::Skew => Kind::Skew,
            Operator::Determinant => Kind::Determinant,
            Operator::Inverse => Kind::Inverse,
            Operator::Cofactor => Kind::Cofactor,
            Operator::Deviatoric => Kind::Deviatoric,
            Operator::Variable(_) => Kind::Variable,
        }
    }
}

struct Node {
    operator: Operator,
    operands: Vec<Expr>,
    shape: Shape,
    free_indices: FreeIndices,
    hash: u64,
}

/// Shared handle to an immutable expression node.
#[derive(Clone)]
pub struct Expr(Arc<Node>);

impl Expr {
    /// Assembles a node from already validated parts.
    ///
    /// Only the builder calls this; it is responsible for shape and free index
    /// consistency.
    pub(crate) fn from_parts(
        operator: Operator,
        operands: Vec<Expr>,
        shape: Shape,
        free_indices: FreeIndices,
    ) -> Expr {
        let mut hasher = DefaultHasher::new();
        match &operator {
            Operator::Variable(label) => {
                Kind::Variable.hash(&mut hasher);
                label.hash(&mut hasher);
            }
            _ => {
                operator.hash(&mut hasher);
                shape.hash(&mut hasher);
                free_indices.hash(&mut hasher);
                for operand in &operands {
                    operand.0.hash.hash(&mut hasher);
                }
            }
        }
        let hash = hasher.finish();
        Expr(Arc::new(Node {
            operator,
            operands,
            shape,
            free_indices,
            hash,
        }))
    }

    pub fn operator(&self) -> &Operator {
        &self.0.operator
    }

    pub fn kind(&self) -> Kind {
        self.0.operator.kind()
    }

    pub fn operands(&self) -> &[Expr] {
        &self.0.operands
    }

    pub fn shape(&self) -> &[usize] {
        &self.0.shape
    }

    pub fn rank(&self) -> usize {
        self.0.shape.len()
    }

    pub fn free_indices(&self) -> &FreeIndices {
        &self.0.free_indices
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }

    pub fn is_scalar(&self) -> bool {
        self.0.shape.is_empty()
    }

    pub fn is_zero(&self) -> bool {
        matches!(self.0.operator, Operator::Zero)
    }

    /// Whether both handles point at the very same node.
    pub fn ptr_eq(&self, other: &Expr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn structural_hash(&self) -> u64 {
        self.0.hash
    }

    /// Value of a scalar constant, zero included.
    pub fn scalar_value(&self) -> Option<f64> {
        match &self.0.operator {
            Operator::Zero if self.is_scalar() => Some(0.0),
            Operator::IntValue(v) => Some(*v as f64),
            Operator::FloatValue(v) => Some(v.value()),
            _ => None,
        }
    }

    /// Entries of a multi-index node.
    pub fn multi_index(&self) -> Option<&[IndexItem]> {
        match &self.0.operator {
            Operator::MultiIndex(items) => Some(items),
            _ => None,
        }
    }

    /// Label of a variable node.
    pub fn label(&self) -> Option<Label> {
        match &self.0.operator {
            Operator::Variable(label) | Operator::Label(label) => Some(*label),
            _ => None,
        }
    }

    /// Function space of an argument or coefficient.
    pub fn function_space(&self) -> Option<&FunctionSpace> {
        match &self.0.operator {
            Operator::Argument { space, .. } | Operator::Coefficient { space, .. } => Some(space),
            _ => None,
        }
    }

    /// Every reachable node in pre-order, shared subexpressions once per occurrence.
    pub fn pre_traversal(&self) -> PreTraversal {
        PreTraversal {
            stack: vec![self.clone()],
        }
    }

    /// Every reachable node in post-order, shared subexpressions once per occurrence.
    pub fn post_traversal(&self) -> PostTraversal {
        PostTraversal {
            stack: vec![(self.clone(), 0)],
        }
    }

    /// Structurally distinct reachable nodes in pre-order.
    pub fn unique_pre_traversal(&self) -> UniquePreTraversal {
        let mut visited = HashSet::new();
        visited.insert(self.clone());
        UniquePreTraversal {
            stack: vec![self.clone()],
            visited,
        }
    }

    /// Number of structurally distinct nodes.
    pub fn node_count(&self) -> usize {
        self.unique_pre_traversal().count()
    }
}

/// Pre-order iterator, see [`Expr::pre_traversal`].
pub struct PreTraversal {
    stack: Vec<Expr>,
}

impl Iterator for PreTraversal {
    type Item = Expr;

    fn next(&mut self) -> Option<Expr> {
        let expr = self.stack.pop()?;
        self.stack.extend(expr.operands().iter().rev().cloned());
        Some(expr)
    }
}

/// Post-order iterator, see [`Expr::post_traversal`].
pub struct PostTraversal {
    stack: Vec<(Expr, usize)>,
}

impl Iterator for PostTraversal {
    type Item = Expr;

    fn next(&mut self) -> Option<Expr> {
        loop {
            let (expr, next_child) = self.stack.pop()?;
            if let Some(child) = expr.operands().get(next_child).cloned() {
                self.stack.push((expr, next_child + 1));
                self.stack.push((child, 0));
            } else {
                return Some(expr);
            }
        }
    }
}

/// Pre-order iterator skipping structurally repeated subtrees.
pub struct UniquePreTraversal {
    stack: Vec<Expr>,
    visited: HashSet<Expr>,
}

impl Iterator for UniquePreTraversal {
    type Item = Expr;

    fn next(&mut self) -> Option<Expr> {
        let expr = self.stack.pop()?;
        for operand in expr.operands().iter().rev() {
            if self.visited.insert(operand.clone()) {
                self.stack.push(operand.clone());
            }
        }
        Some(expr)
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if self.0.hash != other.0.hash {
            return false;
        }
        match (&self.0.operator, &other.0.operator) {
            (Operator::Variable(a), Operator::Variable(b)) => a == b,
            (a, b) => {
                a == b
                    && self.0.shape == other.0.shape
                    && self.0.free_indices == other.0.free_indices
                    && self.0.operands == other.0.operands
            }
        }
    }
}

impl Eq for Expr {}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl PartialOrd for Expr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Total order consistent with structural equality.
///
/// Only used for canonical operand ordering and ordered containers, so it
/// compares cheap fields first.
impl Ord for Expr {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.ptr_eq(other) {
            return Ordering::Equal;
        }
        self.kind()
            .cmp(&other.kind())
            .then_with(|| self.0.hash.cmp(&other.0.hash))
            .then_with(|| match (&self.0.operator, &other.0.operator) {
                (Operator::Variable(a), Operator::Variable(b)) => a.cmp(b),
                (a, b) => a
                    .cmp(b)
                    .then_with(|| self.0.shape.cmp(&other.0.shape))
                    .then_with(|| self.0.free_indices.cmp(&other.0.free_indices))
                    .then_with(|| self.0.operands.cmp(&other.0.operands)),
            })
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr({self})")
    }
}

/// Implements string formatting for expressions.
///
/// Binary arithmetic is parenthesised, tensor algebra and derivatives use
/// function call notation and indexing uses brackets:
/// - `(w_0 * v_1)`, `(a + b)`, `(a / b)`
/// - `A[0, i_3]`, `sum_{i_3}(...)`, `as_tensor(..., (i_3, i_4))`
/// - `grad(v_0)`, `inner(a, b)`, `det(A)`
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ops = self.operands();
        match self.operator() {
            Operator::Zero => write!(f, "0"),
            Operator::IntValue(v) => write!(f, "{v}"),
            Operator::FloatValue(v) => write!(f, "{}", v.value()),
            Operator::Identity(dim) => write!(f, "I{dim}"),
            Operator::Argument { number, part, .. } => match part {
                Some(part) => write!(f, "v_{number}^{part}"),
                None => write!(f, "v_{number}"),
            },
            Operator::Coefficient { count, .. } => write!(f, "w_{count}"),
            Operator::SpatialCoordinate(_) => write!(f, "x"),
            Operator::Label(label) => write!(f, "{label}"),
            Operator::MultiIndex(items) => write!(f, "({})", items.iter().join(", ")),
            Operator::Sum => write!(f, "({} + {})", ops[0], ops[1]),
            Operator::Product => write!(f, "({} * {})", ops[0], ops[1]),
            Operator::Division => write!(f, "({} / {})", ops[0], ops[1]),
            Operator::Power => write!(f, "({}^{})", ops[0], ops[1]),
            Operator::Sqrt => write!(f, "sqrt({})", ops[0]),
            Operator::Indexed => {
                let items = ops[1].multi_index().unwrap_or(&[]);
                write!(f, "{}[{}]", ops[0], items.iter().join(", "))
            }
            Operator::IndexSum => write!(f, "sum_{{{}}}({})", ops[1], ops[0]),
            Operator::ComponentTensor => write!(f, "as_tensor({}, {})", ops[0], ops[1]),
            Operator::ListTensor => write!(f, "[{}]", ops.iter().join(", ")),
            Operator::Conditional => write!(f, "({} ? {} : {})", ops[0], ops[1], ops[2]),
            Operator::Condition(Comparison::Not) => write!(f, "!({})", ops[0]),
            Operator::Condition(c) => write!(f, "({} {} {})", ops[0], c.symbol(), ops[1]),
            Operator::Grad => write!(f, "grad({})", ops[0]),
            Operator::Div => write!(f, "div({})", ops[0]),
            Operator::Curl => write!(f, "curl({})", ops[0]),
            Operator::Rot => write!(f, "rot({})", ops[0]),
            Operator::SpatialDerivative => write!(f, "{}.dx{}", ops[0], ops[1]),
            Operator::VariableDerivative => write!(f, "diff({}, {})", ops[0], ops[1]),
            Operator::Restricted(Side::Positive) => write!(f, "({})('+')", ops[0]),
            Operator::Restricted(Side::Negative) => write!(f, "({})('-')", ops[0]),
            Operator::Transposed => write!(f, "transpose({})", ops[0]),
            Operator::Inner => write!(f, "inner({}, {})", ops[0], ops[1]),
            Operator::Outer => write!(f, "outer({}, {})", ops[0], ops[1]),
            Operator::Dot => write!(f, "dot({}, {})", ops[0], ops[1]),
            Operator::Cross => write!(f, "cross({}, {})", ops[0], ops[1]),
            Operator::Trace => write!(f, "tr({})", ops[0]),
            Operator::Skew => write!(f, "skew({})", ops[0]),
            Operator::Determinant => write!(f, "det({})", ops[0]),
            Operator::Inverse => write!(f, "inv({})", ops[0]),
            Operator::Cofactor => write!(f, "cofac({})", ops[0]),
            Operator::Deviatoric => write!(f, "dev({})", ops[0]),
            Operator::Variable(label) => write!(f, "{label}"),
        }
    }
}
