//! 16-bit stereo PCM output over an I2S unit.
//!
//! [`I2sOut`] installs the platform transmit driver at construction and
//! pushes sample pairs at it through a small backend trait. Backends exist
//! for ESP-IDF (external bus, on-chip DAC, PDM), for the K210's I2S block,
//! and for everything else a host simulator that captures the stream to a
//! WAV file.
//!
//! Writes are non-blocking: a full DMA queue rejects the sample and the
//! caller polls again.

mod backend;
mod config;
mod error;
mod output;
mod sample;

pub use config::{ApllMode, OutputMode, Pinout, StreamConfig};
pub use config::{BLOCK_FRAMES, DEFAULT_SAMPLE_RATE, DMA_BUFFER_FRAMES};
pub use error::OutputError;
pub use output::I2sOut;
