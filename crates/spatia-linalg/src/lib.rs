#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]

mod error;
mod hermitian;
mod lu;

pub use error::LinalgError;
pub use hermitian::{conj_transpose, hermitian_part, quadratic_form, weighted_gram};
pub use lu::{BatchedSolution, CellFailure, Lu, solve, solve_batched};
