use bytemuck::{Pod, Zeroable};

/// First and second order gradient of the loss for one sample and target.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct GradientPair {
    pub grad: f32,
    pub hess: f32,
}

const _: () = assert!(size_of::<GradientPair>() == 2 * size_of::<f32>());

impl GradientPair {
    pub const fn new(grad: f32, hess: f32) -> Self {
        Self { grad, hess }
    }
}

/// A container a collective can overwrite with a result of a different length.
pub trait Resizable {
    type Elem: Pod + Send;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements per row, flat containers have a single column.
    fn width(&self) -> usize {
        1
    }

    /// Resizes to `len` elements laid out in rows of `width`, new elements
    /// are zeroed.
    fn reshape(&mut self, len: usize, width: usize);

    fn as_mut_slice(&mut self) -> &mut [Self::Elem];
}

impl<T: Pod + Send> Resizable for Vec<T> {
    type Elem = T;

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn reshape(&mut self, len: usize, _width: usize) {
        self.resize(len, T::zeroed());
    }

    fn as_mut_slice(&mut self) -> &mut [T] {
        Vec::as_mut_slice(self)
    }
}

/// Row-major `n_samples x n_targets` gradient of a training step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradientMatrix {
    data: Vec<GradientPair>,
    n_targets: usize,
}

impl GradientMatrix {
    /// Creates a zeroed matrix.
    pub fn zeros(n_samples: usize, n_targets: usize) -> Self {
        Self {
            data: vec![GradientPair::default(); n_samples * n_targets],
            n_targets,
        }
    }

    /// Wraps `data` as a matrix with `n_targets` columns.
    ///
    /// # Returns
    /// `None` if `data` doesn't hold a whole number of rows.
    pub fn from_vec(data: Vec<GradientPair>, n_targets: usize) -> Option<Self> {
        if n_targets == 0 || data.len() % n_targets != 0 {
            return None;
        }

        Some(Self { data, n_targets })
    }

    pub fn n_samples(&self) -> usize {
        self.data.len().checked_div(self.n_targets).unwrap_or(0)
    }

    pub fn n_targets(&self) -> usize {
        self.n_targets
    }

    pub fn values(&self) -> &[GradientPair] {
        &self.data
    }

    pub fn values_mut(&mut self) -> &mut [GradientPair] {
        &mut self.data
    }

    /// The gradient as interleaved `(grad, hess)` values.
    pub fn as_flat(&self) -> &[f32] {
        bytemuck::cast_slice(&self.data)
    }

    /// Sets every pair to `(0, 0)`.
    pub fn zero(&mut self) {
        self.data.fill(GradientPair::default());
    }
}

impl Resizable for GradientMatrix {
    type Elem = GradientPair;

    fn len(&self) -> usize {
        self.data.len()
    }

    fn width(&self) -> usize {
        self.n_targets
    }

    /// Takes the row width as the number of targets, whatever this matrix
    /// was allocated with.
    fn reshape(&mut self, len: usize, width: usize) {
        self.data.resize(len, GradientPair::default());
        self.n_targets = width;
    }

    fn as_mut_slice(&mut self) -> &mut [GradientPair] {
        &mut self.data
    }
}
