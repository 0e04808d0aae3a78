use burn::tensor::{backend::Backend, Float, Tensor};

pub trait TensorFloatExtension {
    /// `Y[.., i, ..] = X[.., 0, ..] * .. * X[.., i - 1, ..]` and `Y[.., 0, ..] = 1`
    fn prod_cumulative_exclusive(
        self,
        dim: usize,
    ) -> Self;

    /// Reads the values back to host memory as `f32`.
    fn into_host_vec(self) -> Vec<f32>;
}

impl<B: Backend, const D: usize> TensorFloatExtension for Tensor<B, D, Float> {
    fn prod_cumulative_exclusive(
        self,
        dim: usize,
    ) -> Self {
        assert!(dim < D, "dim should be less than self.dims().len()");

        let count = self.dims()[dim];
        if count == 0 {
            return self;
        }

        let dims_batch = {
            let mut dims = self.dims();
            dims[dim] = 1;
            dims
        };
        let mut state_batch = Tensor::ones(dims_batch, &self.device());
        let mut results = Vec::with_capacity(count);

        for value_batch in self.iter_dim(dim) {
            results.push(state_batch.to_owned());
            state_batch = state_batch * value_batch;
        }

        Tensor::cat(results, dim)
    }

    fn into_host_vec(self) -> Vec<f32> {
        self.into_data()
            .convert::<f32>()
            .to_vec()
            .expect("The data should be converted to f32")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn prod_cumulative_exclusive_rows() {
        let device = &Default::default();

        let input = Tensor::<B, 2>::from_floats(
            [[2.0, 3.0, 4.0, 0.5], [1.0, 0.0, 7.0, 9.0]],
            device,
        );
        let output = input.prod_cumulative_exclusive(1).into_host_vec();

        assert_eq!(output, vec![1.0, 2.0, 6.0, 24.0, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn prod_cumulative_exclusive_leading_dim() {
        let device = &Default::default();

        let input =
            Tensor::<B, 2>::from_floats([[2.0, 3.0], [5.0, 7.0]], device);
        let output = input.prod_cumulative_exclusive(0).into_host_vec();

        assert_eq!(output, vec![1.0, 1.0, 2.0, 3.0]);
    }
}
