//! Small value types shared by the expression DAG and its passes.
//!
//! - `Shape`: tensor dimensions of an expression, empty for scalars
//! - `Index`: a symbolic free index taking part in Einstein summation
//! - `IndexItem`: one entry of a multi-index, fixed or free
//! - `FreeIndices`: the sorted set of unbound indices of an expression with their dimensions
//! - `Label`: the process-unique handle of a `Variable`
//! - `FunctionSpace`: what an argument or coefficient lives in

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use itertools::Itertools;

use crate::errors::BuildError;

/// Tensor dimensions of an expression. The empty shape is a scalar.
pub type Shape = Vec<usize>;

/// Maps a component tuple to the canonical component it aliases.
pub type SymmetryMap = BTreeMap<Vec<usize>, Vec<usize>>;

static INDEX_COUNT: AtomicUsize = AtomicUsize::new(0);
static LABEL_COUNT: AtomicUsize = AtomicUsize::new(0);
static COEFFICIENT_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Allocates the next process-unique coefficient count.
pub(crate) fn next_coefficient_count() -> usize {
    COEFFICIENT_COUNT.fetch_add(1, Ordering::Relaxed)
}

/// A symbolic free index.
///
/// Two indices are the same index iff their counts match. The dimension of an
/// index is not stored here; it is implied by the position it subscripts and
/// tracked by [`FreeIndices`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Index(usize);

impl Index {
    /// Creates a fresh index distinct from every other index in the process.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Index(INDEX_COUNT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn count(&self) -> usize {
        self.0
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i_{}", self.0)
    }
}

/// One position of a multi-index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexItem {
    /// A concrete component selector
    Fixed(usize),
    /// A symbolic index, summed when repeated
    Free(Index),
}

impl IndexItem {
    pub fn as_free(&self) -> Option<Index> {
        match self {
            IndexItem::Free(i) => Some(*i),
            IndexItem::Fixed(_) => None,
        }
    }
}

impl From<usize> for IndexItem {
    fn from(value: usize) -> Self {
        IndexItem::Fixed(value)
    }
}

impl From<Index> for IndexItem {
    fn from(index: Index) -> Self {
        IndexItem::Free(index)
    }
}

impl fmt::Display for IndexItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexItem::Fixed(v) => write!(f, "{v}"),
            IndexItem::Free(i) => write!(f, "{i}"),
        }
    }
}

/// The handle of a `Variable` node, preserved through rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(usize);

impl Label {
    /// Allocates a fresh label.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Label(LABEL_COUNT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn count(&self) -> usize {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var{}", self.0)
    }
}

/// Sorted set of free indices, each with the dimension it ranges over.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FreeIndices(Vec<(Index, usize)>);

impl FreeIndices {
    pub fn new() -> Self {
        FreeIndices(Vec::new())
    }

    pub fn single(index: Index, dim: usize) -> Self {
        FreeIndices(vec![(index, dim)])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Index, usize)> {
        self.0.iter()
    }

    pub fn indices(&self) -> impl Iterator<Item = Index> + '_ {
        self.0.iter().map(|(i, _)| *i)
    }

    pub fn contains(&self, index: Index) -> bool {
        self.dim(index).is_some()
    }

    pub fn dim(&self, index: Index) -> Option<usize> {
        self.0
            .binary_search_by_key(&index, |(i, _)| *i)
            .ok()
            .map(|pos| self.0[pos].1)
    }

    /// Inserts an index, failing if it is already present with another dimension.
    pub fn insert(&mut self, index: Index, dim: usize) -> Result<(), BuildError> {
        match self.0.binary_search_by_key(&index, |(i, _)| *i) {
            Ok(pos) if self.0[pos].1 != dim => Err(BuildError::IndexDimensionConflict {
                index,
                first: self.0[pos].1,
                second: dim,
            }),
            Ok(_) => Ok(()),
            Err(pos) => {
                self.0.insert(pos, (index, dim));
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, index: Index) -> Option<usize> {
        self.0
            .binary_search_by_key(&index, |(i, _)| *i)
            .ok()
            .map(|pos| self.0.remove(pos).1)
    }

    /// Union of two sets. Shared indices must agree on their dimension.
    pub fn union(&self, other: &FreeIndices) -> Result<FreeIndices, BuildError> {
        let mut merged = self.clone();
        for &(index, dim) in other.iter() {
            merged.insert(index, dim)?;
        }
        Ok(merged)
    }

    /// Indices present in both sets.
    pub fn repeated(&self, other: &FreeIndices) -> Vec<(Index, usize)> {
        self.0
            .iter()
            .filter(|(i, _)| other.contains(*i))
            .copied()
            .collect()
    }
}

impl fmt::Display for FreeIndices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.iter().map(|(i, _)| i).join(", "))
    }
}

/// The space an argument or coefficient is drawn from.
///
/// Only what the symbolic passes need is kept: the value shape of a function
/// in the space, the geometric dimension of the domain (the extent `grad`
/// appends) and an optional component symmetry map, declared by elements
/// whose symmetric tensor components alias each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionSpace {
    pub value_shape: Shape,
    pub gdim: usize,
    pub symmetry: Option<Arc<SymmetryMap>>,
}

impl FunctionSpace {
    pub fn scalar(gdim: usize) -> Self {
        Self::tensor(vec![], gdim)
    }

    pub fn vector(dim: usize, gdim: usize) -> Self {
        Self::tensor(vec![dim], gdim)
    }

    pub fn tensor(value_shape: Shape, gdim: usize) -> Self {
        FunctionSpace {
            value_shape,
            gdim,
            symmetry: None,
        }
    }

    /// Symmetric `dim x dim` tensors: component `(i, j)` with `i > j` aliases `(j, i)`.
    pub fn symmetric_tensor(dim: usize, gdim: usize) -> Self {
        let symmetry = (0..dim)
            .cartesian_product(0..dim)
            .filter(|(i, j)| i > j)
            .map(|(i, j)| (vec![i, j], vec![j, i]))
            .collect();
        FunctionSpace {
            value_shape: vec![dim, dim],
            gdim,
            symmetry: Some(Arc::new(symmetry)),
        }
    }

    /// Maps a component through the symmetry, if any.
    pub fn canonical_component<'a>(&'a self, component: &'a [usize]) -> &'a [usize] {
        self.symmetry
            .as_ref()
            .and_then(|s| s.get(component))
            .map(Vec::as_slice)
            .unwrap_or(component)
    }
}
