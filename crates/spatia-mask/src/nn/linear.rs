//! Fully connected layer.

use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};
use rand::Rng;

/// `y = W x + b` applied to every `(stream, frame)` column.
#[derive(derive_more::Debug, Clone)]
pub(crate) struct Linear {
    in_features: usize,
    out_features: usize,
    /// `(out_features, in_features)`.
    #[debug(skip)]
    weight: Array2<f64>,
    #[debug(skip)]
    bias: Option<Array1<f64>>,
}

impl Linear {
    /// Draws weights and bias uniformly from `±1/√in_features`.
    pub(crate) fn init<R: Rng>(
        rng: &mut R,
        in_features: usize,
        out_features: usize,
        bias: bool,
    ) -> Self {
        let bound = 1.0 / (in_features.max(1) as f64).sqrt();
        let weight = Array2::from_shape_simple_fn((out_features, in_features), || {
            rng.random_range(-bound..bound)
        });
        let bias = bias.then(|| {
            Array1::from_shape_simple_fn(out_features, || rng.random_range(-bound..bound))
        });
        Self {
            in_features,
            out_features,
            weight,
            bias,
        }
    }

    pub(crate) fn in_features(&self) -> usize {
        self.in_features
    }

    pub(crate) fn out_features(&self) -> usize {
        self.out_features
    }

    /// Maps `(in_features, frame)` to `(out_features, frame)`.
    pub(crate) fn forward(&self, input: ArrayView2<'_, f64>) -> Array2<f64> {
        debug_assert_eq!(input.nrows(), self.in_features);
        let mut output = self.weight.dot(&input);
        if let Some(bias) = &self.bias {
            output += &bias.view().insert_axis(Axis(1));
        }
        output
    }

    /// Maps `(stream, in_features, frame)` to `(stream, out_features, frame)`.
    pub(crate) fn forward_streams(&self, input: ArrayView3<'_, f64>) -> Array3<f64> {
        let (num_streams, _, num_frames) = input.dim();
        let mut output = Array3::zeros((num_streams, self.out_features, num_frames));
        for (mut out, stream) in output.outer_iter_mut().zip(input.outer_iter()) {
            out.assign(&self.forward(stream));
        }
        output
    }
}
