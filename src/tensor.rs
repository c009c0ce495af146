//! A Tensor with autograd capabilities.

use crate::autograd::{self, NoGradGuard};
use ndarray::{Array, ArrayD, ArrayView1, Axis, Ix2, IxDyn, Zip};
use rand::distributions::{Distribution, Uniform};
use std::cell::{Ref, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Div;
use std::rc::Rc;

type BackwardOp = Rc<dyn Fn(&Tensor)>;

/// Holds the actual tensor data, its gradient, and graph information.
#[derive(Default)]
pub struct TensorData {
    pub data: ArrayD<f32>,
    pub grad: Option<Tensor>,
    backward: Option<BackwardOp>,
    prev: Vec<Tensor>,
}

impl fmt::Debug for TensorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorData")
            .field("data", &self.data)
            .field("grad", &self.grad)
            .field("backward", &self.backward.as_ref().map(|_| "BackwardOp"))
            .field("prev", &self.prev)
            .finish()
    }
}

/// The public Tensor struct, which is a smart pointer to the underlying data.
/// Cloning a Tensor is cheap as it only copies the Rc pointer.
#[derive(Debug, Clone)]
pub struct Tensor {
    pub inner: Rc<RefCell<TensorData>>,
}

// Tensors are compared by identity so they can live in a HashSet during the topological sort.
impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}
impl Eq for Tensor {}
impl Hash for Tensor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.inner.as_ptr()).hash(state);
    }
}

impl Tensor {
    /// Creates a new tensor from raw data and a shape. This creates a leaf node in the graph.
    ///
    /// Panics if `data.len()` does not match the product of `shape`.
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Self {
        let data = Array::from_shape_vec(IxDyn(&shape), data)
            .unwrap_or_else(|e| panic!("Data size does not match shape {:?}: {}", shape, e));
        Self::from_data(data)
    }

    /// Creates a tensor from an existing ndarray::ArrayD. This creates a leaf node.
    pub fn from_data(data: ArrayD<f32>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(TensorData {
                data,
                ..Default::default()
            })),
        }
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::from_data(Array::zeros(IxDyn(&shape)))
    }

    pub fn ones_like(tensor: &Tensor) -> Self {
        Self::from_data(Array::ones(IxDyn(&tensor.shape())))
    }

    /// Creates a tensor with values drawn uniformly from `[low, high)`.
    pub fn rand(shape: Vec<usize>, low: f32, high: f32) -> Self {
        let num_elements: usize = shape.iter().product();
        let mut rng = rand::thread_rng();
        let dist = Uniform::new(low, high);
        let data_vec: Vec<f32> = (0..num_elements).map(|_| dist.sample(&mut rng)).collect();
        Self::new(data_vec, shape)
    }

    // --- Accessors ---
    pub fn shape(&self) -> Vec<usize> {
        self.inner.borrow().data.shape().to_vec()
    }
    pub fn data(&self) -> Ref<'_, ArrayD<f32>> {
        Ref::map(self.inner.borrow(), |d| &d.data)
    }
    /// Returns the first element. Intended for scalar tensors such as a reduced loss.
    pub fn item(&self) -> f32 {
        self.data().iter().next().copied().unwrap_or(f32::NAN)
    }
    pub fn grad(&self) -> Option<Tensor> {
        self.inner.borrow().grad.clone()
    }
    pub fn set_grad(&self, grad: Tensor) {
        self.inner.borrow_mut().grad = Some(grad);
    }
    fn add_grad(&self, grad: Tensor) {
        let mut inner = self.inner.borrow_mut();
        if let Some(existing_grad) = inner.grad.take() {
            let new_grad_data = &*existing_grad.data() + &*grad.data();
            inner.grad = Some(Tensor::from_data(new_grad_data));
        } else {
            inner.grad = Some(grad);
        }
    }

    /// Whether this tensor was produced by a recorded operation.
    pub fn has_graph(&self) -> bool {
        self.inner.borrow().backward.is_some()
    }

    /// Links `out` to its inputs. Skipped entirely while gradient tracking is off.
    fn record(out: &Tensor, prev: Vec<Tensor>, backward: impl Fn(&Tensor) + 'static) {
        if !autograd::is_grad_enabled() {
            return;
        }
        let mut inner = out.inner.borrow_mut();
        inner.prev = prev;
        inner.backward = Some(Rc::new(backward));
    }

    // --- Autograd ---

    /// Kicks off the backpropagation process from this tensor.
    pub fn backward(&self) {
        let _guard = NoGradGuard::new();

        let mut topo: Vec<Tensor> = Vec::new();
        let mut visited: HashSet<Tensor> = HashSet::new();
        fn build_topo(node: &Tensor, visited: &mut HashSet<Tensor>, topo: &mut Vec<Tensor>) {
            if !visited.contains(node) {
                visited.insert(node.clone());
                for child in &node.inner.borrow().prev {
                    build_topo(child, visited, topo);
                }
                topo.push(node.clone());
            }
        }
        build_topo(self, &mut visited, &mut topo);

        self.set_grad(Tensor::ones_like(self));

        for node in topo.iter().rev() {
            let backward_fn = node.inner.borrow().backward.clone();
            if let Some(backward_fn) = backward_fn {
                if let Some(grad) = node.grad() {
                    backward_fn(&grad);
                }
            }

            // Intermediate nodes drop their edges so Rc cycles cannot leak.
            // Leaf gradients are preserved.
            if node.has_graph() {
                let mut inner = node.inner.borrow_mut();
                inner.prev.clear();
                inner.backward = None;
                inner.grad = None;
            }
        }
    }

    // --- Graph-aware Operations ---

    /// Reshapes the tensor. Copies the data if it is not contiguous.
    pub fn reshape(&self, new_shape: Vec<usize>) -> Tensor {
        let original_shape = self.shape();
        let reshaped_data = self
            .data()
            .as_standard_layout()
            .into_owned()
            .into_shape(IxDyn(&new_shape))
            .unwrap_or_else(|e| {
                panic!(
                    "Failed to reshape tensor from {:?} to {:?}: {}",
                    original_shape, new_shape, e
                )
            });
        let out = Tensor::from_data(reshaped_data);

        let self_clone = self.clone();
        Tensor::record(&out, vec![self.clone()], move |grad: &Tensor| {
            let grad_reshaped_data = grad
                .data()
                .as_standard_layout()
                .into_owned()
                .into_shape(IxDyn(&original_shape))
                .unwrap_or_else(|e| panic!("Failed to reshape gradient: {}", e));
            self_clone.add_grad(Tensor::from_data(grad_reshaped_data));
        });
        out
    }

    /// Sums all elements in the tensor, returning a tensor of shape `[1]`.
    pub fn sum(&self) -> Tensor {
        let out_data = self.data().sum();
        let out = Tensor::new(vec![out_data], vec![1]);

        let self_clone = self.clone();
        let self_shape = self.shape();
        Tensor::record(&out, vec![self.clone()], move |grad: &Tensor| {
            let grad_val = grad.item();
            self_clone.add_grad(Tensor::from_data(ArrayD::from_elem(
                IxDyn(&self_shape),
                grad_val,
            )));
        });
        out
    }

    /// Replaces every element where `mask` is true with `value`.
    ///
    /// Filled positions receive no gradient. Panics if the mask shape differs.
    pub fn masked_fill(&self, mask: &ArrayD<bool>, value: f32) -> Tensor {
        assert_eq!(
            self.data().shape(),
            mask.shape(),
            "masked_fill mask shape must match tensor shape"
        );
        let mut out_data = self.data().to_owned();
        Zip::from(&mut out_data).and(mask).for_each(|x, &m| {
            if m {
                *x = value;
            }
        });
        let out = Tensor::from_data(out_data);

        let self_clone = self.clone();
        let mask = mask.clone();
        Tensor::record(&out, vec![self.clone()], move |grad: &Tensor| {
            let mut grad_data = grad.data().to_owned();
            Zip::from(&mut grad_data).and(&mask).for_each(|g, &m| {
                if m {
                    *g = 0.0;
                }
            });
            self_clone.add_grad(Tensor::from_data(grad_data));
        });
        out
    }

    /// Applies the log_softmax function using the log-sum-exp trick.
    pub fn log_softmax(&self, axis: usize) -> Tensor {
        let ax = Axis(axis);
        let out_data = {
            let self_data = self.data();
            let max_val = self_data.map_axis(ax, |view| {
                view.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b))
            });
            let shifted = &*self_data - &max_val.insert_axis(ax);
            // Subtract from the shifted values so large logits keep their precision.
            let log_sum_exp = shifted.mapv(f32::exp).sum_axis(ax).mapv(f32::ln);
            &shifted - &log_sum_exp.insert_axis(ax)
        };
        let out = Tensor::from_data(out_data);

        let self_clone = self.clone();
        let out_weak = Rc::downgrade(&out.inner);
        Tensor::record(&out, vec![self.clone()], move |grad: &Tensor| {
            if let Some(out_rc) = out_weak.upgrade() {
                // grad_x = grad_y - softmax(x) * sum(grad_y)
                let out_tensor = Tensor { inner: out_rc };
                let grad_to_add = {
                    let grad_data = grad.data();
                    let softmax_out = out_tensor.data().mapv(f32::exp);
                    let sum_grad = grad_data.sum_axis(ax).insert_axis(ax);
                    &*grad_data - &(&softmax_out * &sum_grad)
                };
                self_clone.add_grad(Tensor::from_data(grad_to_add));
            }
        });
        out
    }

    /// Unreduced negative log likelihood.
    ///
    /// `self` holds log-probabilities with shape `[N, C]`, `targets` has length `N`.
    /// Returns `[N]` where `out[i] = -self[i, targets[i]]`. Panics on an
    /// out-of-range target; callers validate indices first.
    pub fn nll(&self, targets: ArrayView1<'_, i64>) -> Tensor {
        let (n, c) = {
            let self_data = self.data();
            assert_eq!(self_data.ndim(), 2, "nll input must be 2D");
            (self_data.shape()[0], self_data.shape()[1])
        };
        assert_eq!(targets.len(), n, "nll targets must match the number of rows");

        let loss_vec: Vec<f32> = {
            let rows = self
                .data()
                .clone()
                .into_dimensionality::<Ix2>()
                .unwrap_or_else(|e| panic!("nll input must be 2D: {}", e));
            targets
                .iter()
                .enumerate()
                .map(|(i, &t)| -rows[[i, t as usize]])
                .collect()
        };
        let out = Tensor::new(loss_vec, vec![n]);

        let self_clone = self.clone();
        let targets = targets.to_owned();
        Tensor::record(&out, vec![self.clone()], move |grad: &Tensor| {
            let mut grad_probs = ArrayD::zeros(IxDyn(&[n, c]));
            {
                let grad_data = grad.data();
                for (i, &t) in targets.iter().enumerate() {
                    grad_probs[[i, t as usize]] = -grad_data[[i]];
                }
            }
            self_clone.add_grad(Tensor::from_data(grad_probs));
        });
        out
    }
}

impl Div<f32> for &Tensor {
    type Output = Tensor;
    fn div(self, rhs: f32) -> Self::Output {
        let out = Tensor::from_data(&*self.data() / rhs);
        let self_clone = self.clone();
        Tensor::record(&out, vec![self.clone()], move |grad: &Tensor| {
            self_clone.add_grad(Tensor::from_data(&*grad.data() / rhs));
        });
        out
    }
}
impl Div<f32> for Tensor {
    type Output = Tensor;
    fn div(self, rhs: f32) -> Tensor {
        &self / rhs
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor(shape: {:?})\n{}", self.shape(), self.data())
    }
}
