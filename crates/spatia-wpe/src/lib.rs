#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]

mod config;
mod dereverb;
mod filter;

pub use config::{DereverbConfig, SolveFailurePolicy, WpeConfig};
pub use dereverb::MaskBasedDereverbWpe;
pub use filter::WpeFilter;
