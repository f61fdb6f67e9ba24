use super::value::TensorValue;

/// Implementation of TensorValue for nested vectors, a rank two value stored
/// row by row.
///
/// All rows are expected to have the length of the first one; the reported
/// shape uses the first row.
///
/// # Examples
///
/// ```rust
/// use formexpr::prelude::TensorValue;
///
/// let mat = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]];
/// assert_eq!(mat.value_shape(), vec![3, 2]);
/// assert_eq!(mat.get(&[2, 1]), Some(6.0));
/// assert_eq!(mat.get(&[0, 2]), None);
/// ```
impl TensorValue for Vec<Vec<f64>> {
    fn value_shape(&self) -> Vec<usize> {
        vec![self.len(), self.first().map_or(0, Vec::len)]
    }

    fn get(&self, component: &[usize]) -> Option<f64> {
        match component {
            [i, j] => self.as_slice().get(*i)?.as_slice().get(*j).copied(),
            _ => None,
        }
    }
}

/// Implementation of TensorValue for fixed-size nested arrays.
///
/// # Type Parameters
/// * `M` - Number of rows
/// * `N` - Number of columns
impl<const M: usize, const N: usize> TensorValue for [[f64; N]; M] {
    fn value_shape(&self) -> Vec<usize> {
        vec![M, N]
    }

    fn get(&self, component: &[usize]) -> Option<f64> {
        match component {
            [i, j] => self.as_slice().get(*i)?.as_slice().get(*j).copied(),
            _ => None,
        }
    }
}

/// Implementation of TensorValue for nalgebra's DMatrix<f64>.
#[cfg(feature = "nalgebra")]
impl TensorValue for nalgebra::DMatrix<f64> {
    fn value_shape(&self) -> Vec<usize> {
        vec![self.nrows(), self.ncols()]
    }

    fn get(&self, component: &[usize]) -> Option<f64> {
        match component {
            [i, j] => nalgebra::Matrix::get(self, (*i, *j)).copied(),
            _ => None,
        }
    }
}

/// Implementation of TensorValue for ndarray's Array2<f64>.
#[cfg(feature = "ndarray")]
impl TensorValue for ndarray::Array2<f64> {
    fn value_shape(&self) -> Vec<usize> {
        self.shape().to_vec()
    }

    fn get(&self, component: &[usize]) -> Option<f64> {
        match component {
            [i, j] => ndarray::ArrayBase::get(self, (*i, *j)).copied(),
            _ => None,
        }
    }
}

/// Implementation of TensorValue for ndarray's dynamic rank arrays.
#[cfg(feature = "ndarray")]
impl TensorValue for ndarray::ArrayD<f64> {
    fn value_shape(&self) -> Vec<usize> {
        self.shape().to_vec()
    }

    fn get(&self, component: &[usize]) -> Option<f64> {
        if component.len() != self.ndim() {
            return None;
        }
        ndarray::ArrayBase::get(self, component).copied()
    }
}
