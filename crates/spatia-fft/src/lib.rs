#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]

mod config;
mod stft;
mod window;

pub use config::StftConfig;
pub use stft::{AudioToSpectrogram, SpectrogramToAudio};
