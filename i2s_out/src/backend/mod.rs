//! Platform backends behind one small capability surface.
//!
//! Install is each backend's `install` constructor, uninstall its
//! [`OutputBackend::shutdown`]; everything in between goes through the
//! trait. Exactly one implementation is compiled in per target.

use crate::config::Pinout;
use crate::error::OutputError;

pub(crate) trait OutputBackend {
    /// Re-bind the external signal lines.
    fn bind_pinout(&mut self, pinout: Pinout) -> Result<(), OutputError>;

    /// Program the transmit clock for a new sample rate. The backend applies
    /// its own divider adjustment; the caller keeps the requested rate.
    fn program_rate(&mut self, hz: u32) -> Result<(), OutputError>;

    /// One frame, non-blocking. `false` means the DMA queue is full.
    fn try_write_frame(&mut self, pair: [i16; 2]) -> bool;

    /// One staged block, non-blocking. Returns frames accepted.
    fn write_block(&mut self, pairs: &[[i16; 2]]) -> usize;

    /// Zero out the transmit buffer without tearing the driver down.
    fn quiesce(&mut self);

    /// Uninstall the vendor driver. Idempotent.
    fn shutdown(&mut self);
}

#[cfg(target_os = "espidf")]
mod esp;
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod k210;
#[cfg(not(any(target_os = "espidf", all(target_arch = "riscv64", target_os = "none"))))]
mod host;

#[cfg(target_os = "espidf")]
pub(crate) use esp::EspBackend as DefaultBackend;
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub(crate) use k210::K210Backend as DefaultBackend;
#[cfg(not(any(target_os = "espidf", all(target_arch = "riscv64", target_os = "none"))))]
pub(crate) use host::HostBackend as DefaultBackend;
