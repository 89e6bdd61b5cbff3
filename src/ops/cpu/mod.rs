//! Multi-threaded CPU kernels.
//!
//! Every kernel here is stateless: it validates its operands, allocates the
//! output and fills disjoint regions of it from rayon tasks. They run on
//! whatever rayon pool is current, which is how [`CpuBackend`] pins them to
//! its own threads.
//!
//! [`CpuBackend`]: crate::backend::CpuBackend

pub mod convolution;
pub mod depth;
pub mod matrix;
pub mod pooling;

pub use self::convolution::{
    compress_spatial, convolute_backwards, convolute_forward, convolute_gradient,
    convolution_output_info, rotate180,
};
pub use self::depth::{concatenate_depth, split_depth};
pub use self::matrix::{
    SumMode, activation, activation_in_place, activation_prime_in_place, argmax,
    compress_vertically, hadamard_product, hadamard_product_in_place, multiply,
    multiply_by_transposed, multiply_with_sum, multiply_with_sum_and_activation, subtract, sum,
    sum_in_place, transpose, transpose_and_multiply,
};
pub use self::pooling::{pool2x2, pooled_info, upscale_pool2x2};
