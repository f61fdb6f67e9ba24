use super::value::TensorValue;

fn vector_component(data: &[f64], component: &[usize]) -> Option<f64> {
    match component {
        [i] => data.get(*i).copied(),
        _ => None,
    }
}

/// Implementation of TensorValue for standard Vec<f64>, a rank one value.
///
/// # Examples
///
/// ```rust
/// use formexpr::prelude::TensorValue;
///
/// let vec = vec![1.0, 2.0, 3.0];
/// assert_eq!(vec.value_shape(), vec![3]);
/// assert_eq!(vec.get(&[1]), Some(2.0));
/// assert_eq!(vec.get(&[3]), None);
/// ```
impl TensorValue for Vec<f64> {
    fn value_shape(&self) -> Vec<usize> {
        vec![self.len()]
    }

    fn get(&self, component: &[usize]) -> Option<f64> {
        vector_component(self, component)
    }
}

/// Implementation of TensorValue for fixed-size arrays.
///
/// # Type Parameters
/// * `N` - The fixed size of the array
impl<const N: usize> TensorValue for [f64; N] {
    fn value_shape(&self) -> Vec<usize> {
        vec![N]
    }

    fn get(&self, component: &[usize]) -> Option<f64> {
        vector_component(self, component)
    }
}

/// Implementation of TensorValue for ndarray's Array1<f64>.
#[cfg(feature = "ndarray")]
impl TensorValue for ndarray::Array1<f64> {
    fn value_shape(&self) -> Vec<usize> {
        vec![self.len()]
    }

    fn get(&self, component: &[usize]) -> Option<f64> {
        match component {
            [i] => ndarray::ArrayBase::get(self, *i).copied(),
            _ => None,
        }
    }
}

/// Implementation of TensorValue for nalgebra's DVector<f64>.
#[cfg(feature = "nalgebra")]
impl TensorValue for nalgebra::DVector<f64> {
    fn value_shape(&self) -> Vec<usize> {
        vec![self.len()]
    }

    fn get(&self, component: &[usize]) -> Option<f64> {
        vector_component(self.as_slice(), component)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_components() {
        let v = vec![4.0, 5.0];
        assert_eq!(v.get(&[0]), Some(4.0));
        assert_eq!(v.get(&[0, 0]), None);
        assert_eq!(v.get(&[]), None);
    }

    #[test]
    fn test_array_components() {
        let a = [1.0, 2.0, 3.0];
        assert_eq!(a.value_shape(), vec![3]);
        assert_eq!(a.get(&[2]), Some(3.0));
    }

    #[cfg(feature = "nalgebra")]
    #[test]
    fn test_dvector_components() {
        let v = nalgebra::DVector::from_vec(vec![1.0, 2.0]);
        assert_eq!(v.value_shape(), vec![2]);
        assert_eq!(TensorValue::get(&v, &[1]), Some(2.0));
    }

    #[cfg(feature = "ndarray")]
    #[test]
    fn test_array1_components() {
        let v = ndarray::Array1::from(vec![1.0, 2.0]);
        assert_eq!(v.value_shape(), vec![2]);
        assert_eq!(TensorValue::get(&v, &[1]), Some(2.0));
    }
}
