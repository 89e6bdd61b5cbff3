//! Activation and cost function registry.
//!
//! Every function is pure and selected by a type tag, so layers store a
//! `Copy` enum instead of a boxed closure and model streams can persist the
//! choice as a single byte.

mod activation;
mod cost;

pub use self::activation::{ActivationType, softmax_row};
pub use self::cost::CostFunctionType;
