/// A trait for numeric values that can be bound to a terminal for evaluation.
///
/// A bound value is a dense tensor of `f64`. Index expansion reduces every
/// terminal occurrence to a single component, which the evaluator reads
/// through [`TensorValue::get`].
///
/// # Examples
///
/// ```rust
/// use formexpr::prelude::TensorValue;
///
/// let value = 2.5_f64;
/// assert!(value.value_shape().is_empty());
/// assert_eq!(value.get(&[]), Some(2.5));
/// assert_eq!(value.get(&[0]), None);
/// ```
pub trait TensorValue: Send + Sync {
    /// Returns the shape of the value, empty for a scalar.
    fn value_shape(&self) -> Vec<usize>;

    /// Returns one component of the value.
    ///
    /// # Arguments
    /// * `component` - One fixed index per axis
    ///
    /// # Returns
    /// `None` if the component has the wrong length or lies out of range
    fn get(&self, component: &[usize]) -> Option<f64>;
}

impl TensorValue for f64 {
    fn value_shape(&self) -> Vec<usize> {
        Vec::new()
    }

    fn get(&self, component: &[usize]) -> Option<f64> {
        component.is_empty().then_some(*self)
    }
}

impl<T: TensorValue + ?Sized> TensorValue for Box<T> {
    fn value_shape(&self) -> Vec<usize> {
        (**self).value_shape()
    }

    fn get(&self, component: &[usize]) -> Option<f64> {
        (**self).get(component)
    }
}
