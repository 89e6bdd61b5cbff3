//! Execution backend strategy.
//!
//! The [`Backend`] trait is the full kernel table a network relies on. A
//! network receives its backend at construction as an `Arc<dyn Backend>`,
//! so swapping the execution target (an alternate CPU pool, a GPU
//! implementation, an instrumented test double) never touches global state.
//!
//! # Supported Backends
//!
//! - [`CpuBackend`]: the rayon kernels in [`crate::ops::cpu`], running either
//!   on the global rayon pool or on a private fixed-size pool.
//!
//! # Failure model
//!
//! Kernels join before returning. A worker panicking inside a parallel loop
//! aborts the whole call and is reported as [`NetworkError::Computation`];
//! no partially written tensor escapes.

use crate::error::{NetworkError, Result};
use crate::functions::ActivationType;
use crate::ops::cpu::{self, SumMode};
use crate::tensors::{Tensor, TensorInfo, TensorView};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Every kernel used by layers and networks.
///
/// Shapes are validated by the implementation; see [`crate::ops::cpu`] for
/// the contract of each operation.
#[allow(missing_docs)]
pub trait Backend: Send + Sync + fmt::Debug {
    /// Short name used in log records.
    fn name(&self) -> &'static str;

    fn multiply(&self, a: TensorView<'_>, b: TensorView<'_>) -> Result<Tensor>;
    fn multiply_with_sum(&self, a: TensorView<'_>, b: TensorView<'_>, bias: TensorView<'_>) -> Result<Tensor>;
    fn multiply_with_sum_and_activation(
        &self,
        a: TensorView<'_>,
        b: TensorView<'_>,
        bias: TensorView<'_>,
        activation: ActivationType,
    ) -> Result<Tensor>;
    fn transpose_and_multiply(&self, a: TensorView<'_>, b: TensorView<'_>) -> Result<Tensor>;
    fn multiply_by_transposed(&self, a: TensorView<'_>, b: TensorView<'_>) -> Result<Tensor>;
    fn transpose(&self, m: TensorView<'_>) -> Result<Tensor>;
    fn activation(&self, m: TensorView<'_>, activation: ActivationType) -> Result<Tensor>;
    fn activation_in_place(&self, m: &mut Tensor, activation: ActivationType) -> Result<()>;
    fn activation_prime_in_place(&self, delta: &mut Tensor, z: TensorView<'_>, activation: ActivationType) -> Result<()>;
    fn hadamard_product(&self, a: TensorView<'_>, b: TensorView<'_>) -> Result<Tensor>;
    fn hadamard_product_in_place(&self, a: &mut Tensor, b: TensorView<'_>) -> Result<()>;
    fn subtract(&self, a: TensorView<'_>, b: TensorView<'_>) -> Result<Tensor>;
    fn sum(&self, a: TensorView<'_>, b: TensorView<'_>, mode: SumMode) -> Result<Tensor>;
    fn sum_in_place(&self, a: &mut Tensor, b: TensorView<'_>, mode: SumMode) -> Result<()>;
    fn compress_vertically(&self, m: TensorView<'_>) -> Result<Tensor>;
    fn argmax(&self, values: &[f32]) -> usize;

    fn convolute_forward(
        &self,
        source: TensorView<'_>,
        source_info: TensorInfo,
        kernels: TensorView<'_>,
        kernels_info: TensorInfo,
        biases: TensorView<'_>,
    ) -> Result<Tensor>;
    fn convolute_backwards(
        &self,
        delta: TensorView<'_>,
        delta_info: TensorInfo,
        kernels: TensorView<'_>,
        kernels_info: TensorInfo,
    ) -> Result<Tensor>;
    fn convolute_gradient(
        &self,
        source: TensorView<'_>,
        source_info: TensorInfo,
        delta: TensorView<'_>,
        delta_info: TensorInfo,
    ) -> Result<Tensor>;
    fn compress_spatial(&self, delta: TensorView<'_>, info: TensorInfo) -> Result<Tensor>;
    fn rotate180(&self, source: TensorView<'_>, info: TensorInfo) -> Result<Tensor>;
    fn pool2x2(&self, source: TensorView<'_>, info: TensorInfo) -> Result<Tensor>;
    fn upscale_pool2x2(&self, source: TensorView<'_>, info: TensorInfo, pooled: TensorView<'_>) -> Result<Tensor>;
    fn split_depth(&self, source: TensorView<'_>, info: TensorInfo, depths: &[usize]) -> Result<Vec<Tensor>>;
    fn concatenate_depth(&self, inputs: &[(TensorView<'_>, TensorInfo)]) -> Result<(Tensor, TensorInfo)>;

    /// Runs an arbitrary, possibly parallel, task on the backend threads.
    fn execute(&self, task: &mut (dyn FnMut() + Send)) -> Result<()>;
}

/// The rayon CPU backend.
///
/// Without an explicit thread count the kernels run on the global rayon pool.
#[derive(Default)]
pub struct CpuBackend {
    pool: Option<rayon::ThreadPool>,
}

impl CpuBackend {
    /// Backend using the global rayon pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend owning a private pool of exactly `threads` workers.
    ///
    /// # Errors
    /// Returns [`NetworkError::InvalidArgument`] for zero threads and
    /// [`NetworkError::Computation`] if the pool cannot be spawned.
    pub fn with_threads(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(NetworkError::InvalidArgument(
                "a CPU backend needs at least one thread".into(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("neural-cpu-{i}"))
            .build()
            .map_err(|e| NetworkError::Computation(format!("cannot spawn thread pool: {e}")))?;
        log::debug!("created CPU backend with {threads} threads");
        Ok(Self { pool: Some(pool) })
    }

    /// Number of worker threads the kernels run on.
    pub fn threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    /// Runs `kernel` on the backend pool, turning a worker panic into an error.
    fn run<T, F>(&self, operation: &'static str, kernel: F) -> Result<T>
    where
        T: Send,
        F: FnOnce() -> Result<T> + Send,
    {
        let guarded = move || panic::catch_unwind(AssertUnwindSafe(kernel));
        let outcome = match &self.pool {
            Some(pool) => pool.install(guarded),
            None => guarded(),
        };
        outcome.unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            log::error!("kernel '{operation}' aborted: {message}");
            Err(NetworkError::Computation(format!("'{operation}' aborted: {message}")))
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

impl fmt::Debug for CpuBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuBackend")
            .field("threads", &self.threads())
            .field("private_pool", &self.pool.is_some())
            .finish()
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn multiply(&self, a: TensorView<'_>, b: TensorView<'_>) -> Result<Tensor> {
        self.run("multiply", || cpu::multiply(a, b))
    }

    fn multiply_with_sum(&self, a: TensorView<'_>, b: TensorView<'_>, bias: TensorView<'_>) -> Result<Tensor> {
        self.run("multiply_with_sum", || cpu::multiply_with_sum(a, b, bias))
    }

    fn multiply_with_sum_and_activation(
        &self,
        a: TensorView<'_>,
        b: TensorView<'_>,
        bias: TensorView<'_>,
        activation: ActivationType,
    ) -> Result<Tensor> {
        self.run("multiply_with_sum_and_activation", || {
            cpu::multiply_with_sum_and_activation(a, b, bias, activation)
        })
    }

    fn transpose_and_multiply(&self, a: TensorView<'_>, b: TensorView<'_>) -> Result<Tensor> {
        self.run("transpose_and_multiply", || cpu::transpose_and_multiply(a, b))
    }

    fn multiply_by_transposed(&self, a: TensorView<'_>, b: TensorView<'_>) -> Result<Tensor> {
        self.run("multiply_by_transposed", || cpu::multiply_by_transposed(a, b))
    }

    fn transpose(&self, m: TensorView<'_>) -> Result<Tensor> {
        self.run("transpose", || Ok(cpu::transpose(m)))
    }

    fn activation(&self, m: TensorView<'_>, activation: ActivationType) -> Result<Tensor> {
        self.run("activation", || Ok(cpu::activation(m, activation)))
    }

    fn activation_in_place(&self, m: &mut Tensor, activation: ActivationType) -> Result<()> {
        self.run("activation_in_place", || {
            cpu::activation_in_place(m, activation);
            Ok(())
        })
    }

    fn activation_prime_in_place(&self, delta: &mut Tensor, z: TensorView<'_>, activation: ActivationType) -> Result<()> {
        self.run("activation_prime_in_place", || {
            cpu::activation_prime_in_place(delta, z, activation)
        })
    }

    fn hadamard_product(&self, a: TensorView<'_>, b: TensorView<'_>) -> Result<Tensor> {
        self.run("hadamard_product", || cpu::hadamard_product(a, b))
    }

    fn hadamard_product_in_place(&self, a: &mut Tensor, b: TensorView<'_>) -> Result<()> {
        self.run("hadamard_product_in_place", || cpu::hadamard_product_in_place(a, b))
    }

    fn subtract(&self, a: TensorView<'_>, b: TensorView<'_>) -> Result<Tensor> {
        self.run("subtract", || cpu::subtract(a, b))
    }

    fn sum(&self, a: TensorView<'_>, b: TensorView<'_>, mode: SumMode) -> Result<Tensor> {
        self.run("sum", || cpu::sum(a, b, mode))
    }

    fn sum_in_place(&self, a: &mut Tensor, b: TensorView<'_>, mode: SumMode) -> Result<()> {
        self.run("sum_in_place", || cpu::sum_in_place(a, b, mode))
    }

    fn compress_vertically(&self, m: TensorView<'_>) -> Result<Tensor> {
        self.run("compress_vertically", || Ok(cpu::compress_vertically(m)))
    }

    fn argmax(&self, values: &[f32]) -> usize {
        cpu::argmax(values)
    }

    fn convolute_forward(
        &self,
        source: TensorView<'_>,
        source_info: TensorInfo,
        kernels: TensorView<'_>,
        kernels_info: TensorInfo,
        biases: TensorView<'_>,
    ) -> Result<Tensor> {
        self.run("convolute_forward", || {
            cpu::convolute_forward(source, source_info, kernels, kernels_info, biases)
        })
    }

    fn convolute_backwards(
        &self,
        delta: TensorView<'_>,
        delta_info: TensorInfo,
        kernels: TensorView<'_>,
        kernels_info: TensorInfo,
    ) -> Result<Tensor> {
        self.run("convolute_backwards", || {
            cpu::convolute_backwards(delta, delta_info, kernels, kernels_info)
        })
    }

    fn convolute_gradient(
        &self,
        source: TensorView<'_>,
        source_info: TensorInfo,
        delta: TensorView<'_>,
        delta_info: TensorInfo,
    ) -> Result<Tensor> {
        self.run("convolute_gradient", || {
            cpu::convolute_gradient(source, source_info, delta, delta_info)
        })
    }

    fn compress_spatial(&self, delta: TensorView<'_>, info: TensorInfo) -> Result<Tensor> {
        self.run("compress_spatial", || cpu::compress_spatial(delta, info))
    }

    fn rotate180(&self, source: TensorView<'_>, info: TensorInfo) -> Result<Tensor> {
        self.run("rotate180", || cpu::rotate180(source, info))
    }

    fn pool2x2(&self, source: TensorView<'_>, info: TensorInfo) -> Result<Tensor> {
        self.run("pool2x2", || cpu::pool2x2(source, info))
    }

    fn upscale_pool2x2(&self, source: TensorView<'_>, info: TensorInfo, pooled: TensorView<'_>) -> Result<Tensor> {
        self.run("upscale_pool2x2", || cpu::upscale_pool2x2(source, info, pooled))
    }

    fn split_depth(&self, source: TensorView<'_>, info: TensorInfo, depths: &[usize]) -> Result<Vec<Tensor>> {
        self.run("split_depth", || cpu::split_depth(source, info, depths))
    }

    fn concatenate_depth(&self, inputs: &[(TensorView<'_>, TensorInfo)]) -> Result<(Tensor, TensorInfo)> {
        self.run("concatenate_depth", || cpu::concatenate_depth(inputs))
    }

    fn execute(&self, task: &mut (dyn FnMut() + Send)) -> Result<()> {
        self.run("execute", || {
            task();
            Ok(())
        })
    }
}

/// Shared handle to the default CPU backend.
pub fn default_backend() -> Arc<dyn Backend> {
    Arc::new(CpuBackend::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn zero_threads_are_rejected() {
        assert!(matches!(
            CpuBackend::with_threads(0),
            Err(NetworkError::InvalidArgument(_))
        ));
    }

    #[test]
    fn private_pools_have_the_requested_size() {
        let backend = CpuBackend::with_threads(3).unwrap();
        assert_eq!(backend.threads(), 3);
        assert_eq!(backend.name(), "cpu");
    }

    #[test]
    fn worker_panics_become_computation_errors() {
        let backend = CpuBackend::with_threads(2).unwrap();
        let result: Result<()> = backend.run("test", || {
            (0..64).into_par_iter().for_each(|i| {
                if i == 63 {
                    panic!("boom");
                }
            });
            Ok(())
        });
        match result {
            Err(NetworkError::Computation(message)) => assert!(message.contains("boom")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn results_do_not_depend_on_the_thread_count() {
        let a = Tensor::from_vec(17, 9, (0..153).map(|v| (v as f32 * 0.37).sin()).collect()).unwrap();
        let b = Tensor::from_vec(9, 5, (0..45).map(|v| (v as f32 * 0.11).cos()).collect()).unwrap();
        let bias = Tensor::filled(1, 5, 0.25);
        let one = CpuBackend::with_threads(1).unwrap();
        let many = CpuBackend::with_threads(4).unwrap();
        let x = one
            .multiply_with_sum_and_activation(a.view(), b.view(), bias.view(), ActivationType::Tanh)
            .unwrap();
        let y = many
            .multiply_with_sum_and_activation(a.view(), b.view(), bias.view(), ActivationType::Tanh)
            .unwrap();
        assert_eq!(x, y);
    }
}
