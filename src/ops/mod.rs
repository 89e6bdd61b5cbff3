//! # Tensor operations
//!
//! Numeric kernels grouped by execution target. Only the CPU target exists;
//! networks reach the kernels through the [`Backend`](crate::backend::Backend)
//! trait, so an alternate target implements that trait instead of being
//! selected from global state.
//!
//! ## Submodules
//!
//! - [`cpu`]: rayon data-parallel kernels (dense, convolution, pooling, depth)
//!
//! ## Example
//!
//! ```rust
//! use neural_cpu::ops::cpu;
//! use neural_cpu::tensors::Tensor;
//!
//! let a = Tensor::from_vec(1, 2, vec![1.0, 2.0]).unwrap();
//! let b = Tensor::from_vec(2, 1, vec![3.0, 4.0]).unwrap();
//! let c = cpu::multiply(a.view(), b.view()).unwrap();
//! assert_eq!(c.data(), &[11.0]);
//! ```

pub mod cpu;
