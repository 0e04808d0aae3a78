//! Memory-bounded evaluation over sub-slices.

use crate::{
    camera::RayBatch,
    field::{FieldInput, FieldOutput},
};
use burn::tensor::{backend::Backend, BasicOps, Tensor};
use std::{convert::Infallible, ops::Range};

/// A value indexed along a leading item dimension.
///
/// Slicing and concatenation must preserve the item order.
pub trait Batch: Sized {
    /// The item count.
    fn batch_len(&self) -> usize;

    /// The items in the range. The range is non-empty and within bounds.
    fn batch_slice(
        &self,
        range: Range<usize>,
    ) -> Self;

    /// Concatenates non-empty batches in order.
    fn batch_cat(batches: Vec<Self>) -> Self;
}

/// Applies `function` to consecutive slices of at most `chunk_size` items and
/// concatenates the outputs in input order.
///
/// The input is passed whole if `chunk_size` is `None` or not smaller than the
/// item count.
pub fn batchify<I: Batch, O: Batch>(
    input: I,
    chunk_size: Option<usize>,
    mut function: impl FnMut(I) -> O,
) -> O {
    match batchify_try::<I, O, Infallible>(input, chunk_size, |input| {
        Ok(function(input))
    }) {
        Ok(output) => output,
        Err(error) => match error {},
    }
}

/// [`batchify`] with a fallible function. It stops at the first error.
pub fn batchify_try<I: Batch, O: Batch, E>(
    input: I,
    chunk_size: Option<usize>,
    mut function: impl FnMut(I) -> Result<O, E>,
) -> Result<O, E> {
    let item_count = input.batch_len();
    let chunk_size = match chunk_size {
        Some(chunk_size) if chunk_size < item_count => chunk_size.max(1),
        _ => return function(input),
    };

    let outputs = (0..item_count)
        .step_by(chunk_size)
        .map(|start| {
            function(input.batch_slice(start..(start + chunk_size).min(item_count)))
        })
        .collect::<Result<Vec<_>, E>>()?;

    Ok(O::batch_cat(outputs))
}

impl<B: Backend, const D: usize, K: BasicOps<B>> Batch for Tensor<B, D, K> {
    #[inline]
    fn batch_len(&self) -> usize {
        self.dims()[0]
    }

    #[inline]
    fn batch_slice(
        &self,
        range: Range<usize>,
    ) -> Self {
        self.to_owned().narrow(0, range.start, range.len())
    }

    #[inline]
    fn batch_cat(batches: Vec<Self>) -> Self {
        Tensor::cat(batches, 0)
    }
}

impl<T: Batch> Batch for Option<T> {
    #[inline]
    fn batch_len(&self) -> usize {
        self.as_ref().map(T::batch_len).unwrap_or_default()
    }

    #[inline]
    fn batch_slice(
        &self,
        range: Range<usize>,
    ) -> Self {
        self.as_ref().map(|batch| batch.batch_slice(range))
    }

    fn batch_cat(batches: Vec<Self>) -> Self {
        batches.into_iter().collect::<Option<Vec<_>>>().map(T::batch_cat)
    }
}

impl<T: Batch> Batch for [T; 2] {
    #[inline]
    fn batch_len(&self) -> usize {
        self[0].batch_len()
    }

    #[inline]
    fn batch_slice(
        &self,
        range: Range<usize>,
    ) -> Self {
        [
            self[0].batch_slice(range.to_owned()),
            self[1].batch_slice(range),
        ]
    }

    fn batch_cat(batches: Vec<Self>) -> Self {
        let (firsts, seconds) =
            batches.into_iter().map(|[first, second]| (first, second)).unzip();
        [T::batch_cat(firsts), T::batch_cat(seconds)]
    }
}

impl<T: Clone> Batch for Vec<T> {
    #[inline]
    fn batch_len(&self) -> usize {
        self.len()
    }

    #[inline]
    fn batch_slice(
        &self,
        range: Range<usize>,
    ) -> Self {
        self[range].to_vec()
    }

    #[inline]
    fn batch_cat(batches: Vec<Self>) -> Self {
        batches.concat()
    }
}

impl Batch for RayBatch {
    #[inline]
    fn batch_len(&self) -> usize {
        self.len()
    }

    fn batch_slice(
        &self,
        range: Range<usize>,
    ) -> Self {
        Self {
            rays: self.rays.batch_slice(range.to_owned()),
            view_directions: self.view_directions.batch_slice(range),
        }
    }

    fn batch_cat(batches: Vec<Self>) -> Self {
        let (rays, view_directions) = batches
            .into_iter()
            .map(|batch| (batch.rays, batch.view_directions))
            .unzip();
        Self {
            rays: Vec::batch_cat(rays),
            view_directions: Option::batch_cat(view_directions),
        }
    }
}

/// Implements [`Batch`] field by field for a struct generic over the backend.
///
/// The first field gives the item count.
macro_rules! impl_batch_for_fields {
    ($name:ident { $first:ident $(, $field:ident)* $(,)? }) => {
        impl<B: ::burn::tensor::backend::Backend> $crate::render::batch::Batch
            for $name<B>
        {
            #[inline]
            fn batch_len(&self) -> usize {
                $crate::render::batch::Batch::batch_len(&self.$first)
            }

            fn batch_slice(
                &self,
                range: ::std::ops::Range<usize>,
            ) -> Self {
                Self {
                    $first: $crate::render::batch::Batch::batch_slice(
                        &self.$first,
                        range.to_owned(),
                    ),
                    $($field: $crate::render::batch::Batch::batch_slice(
                        &self.$field,
                        range.to_owned(),
                    ),)*
                }
            }

            fn batch_cat(batches: Vec<Self>) -> Self {
                let mut $first = Vec::with_capacity(batches.len());
                $(let mut $field = Vec::with_capacity(batches.len());)*
                for batch in batches {
                    $first.push(batch.$first);
                    $($field.push(batch.$field);)*
                }
                Self {
                    $first: $crate::render::batch::Batch::batch_cat($first),
                    $($field: $crate::render::batch::Batch::batch_cat($field),)*
                }
            }
        }
    };
}

pub(crate) use impl_batch_for_fields;

impl_batch_for_fields!(FieldInput {
    positions_embedded,
    times_embedded,
    positions,
});

impl_batch_for_fields!(FieldOutput {
    raw,
    positions_delta
});

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn batchify_preserves_order() {
        let device = &Default::default();
        let input = Tensor::<B, 2>::from_floats(
            [[0.0, 1.0], [2.0, 3.0], [4.0, 5.0], [6.0, 7.0], [8.0, 9.0]],
            device,
        );
        let target = input.to_owned().mul_scalar(2.0).into_data();

        for chunk_size in [None, Some(1), Some(2), Some(5), Some(64)] {
            let mut call_count = 0;
            let output = batchify(input.to_owned(), chunk_size, |chunk| {
                call_count += 1;
                chunk.mul_scalar(2.0)
            });

            output.into_data().assert_eq(&target, true);
            let call_count_target = match chunk_size {
                Some(1) => 5,
                Some(2) => 3,
                _ => 1,
            };
            assert_eq!(call_count, call_count_target, "{chunk_size:?}");
        }
    }

    #[test]
    fn batchify_try_stops_at_error() {
        let input = (0..10).collect::<Vec<i32>>();
        let mut call_count = 0;
        let result = batchify_try(input, Some(3), |chunk| {
            call_count += 1;
            if chunk.contains(&4) {
                Err("four")
            } else {
                Ok(chunk)
            }
        });

        assert_eq!(result, Err("four"));
        assert_eq!(call_count, 2);
    }

    #[test]
    fn batchify_empty_input_calls_once() {
        let output = batchify(Vec::<i32>::new(), Some(4), |chunk| {
            assert!(chunk.is_empty());
            chunk
        });

        assert!(output.is_empty());
    }

    #[test]
    fn batch_option_pair() {
        let batch = Some([vec![1, 2, 3], vec![4, 5, 6]]);

        assert_eq!(batch.batch_len(), 3);
        assert_eq!(batch.batch_slice(1..3), Some([vec![2, 3], vec![5, 6]]));
        assert_eq!(
            Option::batch_cat(vec![batch.batch_slice(0..1), batch.batch_slice(1..3)]),
            batch
        );
        assert_eq!(Option::<Vec<i32>>::batch_cat(vec![None, None]), None);
    }
}
