//! Fallback board backend: a software stand-in so the driver (and its
//! callers) run on x86.
//!
//! A bounded frame queue models the DMA engine; a side buffer captures
//! everything accepted so the stream can be inspected after the fact. When
//! `I2S_OUT_CAPTURE_DIR` is set, uninstall dumps the capture there as a
//! WAV file.

use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;

use crate::backend::OutputBackend;
use crate::config::{ApllMode, OutputMode, Pinout, DMA_BUFFER_FRAMES};
use crate::error::OutputError;
use crate::sample::{pack_frame, pack_frame_offset_binary};

/// Base clock and bits-per-frame the simulated rate divider works from.
const CLOCK_HZ: u32 = 160_000_000;
const FRAME_BITS: u32 = 64;

/// Nearest rate the integer clock divider can actually produce.
pub(crate) fn adjusted_rate(hz: u32) -> u32 {
    let hz = hz.max(1);
    let div = (CLOCK_HZ / (hz.saturating_mul(FRAME_BITS)).max(1)).clamp(1, 255);
    let lo = CLOCK_HZ / ((div + 1) * FRAME_BITS);
    let hi = CLOCK_HZ / (div * FRAME_BITS);
    if hz.saturating_sub(lo) < hi.saturating_sub(hz) {
        lo
    } else {
        hi
    }
}

pub(crate) struct HostBackend {
    port: u32,
    mode: OutputMode,
    pinout: Pinout,
    queue: VecDeque<u32>,
    capacity: usize,
    capture: Vec<u8>,
    sample_rate: u32,
    effective_rate: u32,
    active: bool,
}

impl HostBackend {
    pub(crate) fn install(
        port: u32,
        mode: OutputMode,
        dma_buf_count: u32,
        _apll: ApllMode,
        rate: u32,
    ) -> Result<Self, OutputError> {
        let capacity = dma_buf_count.max(1) as usize * DMA_BUFFER_FRAMES;
        log::info!("install simulated i2s unit {port}, queue of {capacity} frames");
        Ok(Self {
            port,
            mode,
            pinout: Pinout::default(),
            queue: VecDeque::with_capacity(capacity),
            capacity,
            capture: Vec::new(),
            sample_rate: rate,
            effective_rate: adjusted_rate(rate),
            active: true,
        })
    }

    #[cfg(test)]
    fn effective_rate(&self) -> u32 {
        self.effective_rate
    }

    #[cfg(test)]
    fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    fn captured_bytes(&self) -> &[u8] {
        &self.capture
    }

    fn pack(&self, pair: [i16; 2]) -> u32 {
        match self.mode {
            OutputMode::InternalDac => pack_frame_offset_binary(pair),
            _ => pack_frame(pair),
        }
    }

    fn dump_wav_to_path<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        if self.capture.is_empty() {
            return Ok(());
        }

        let channels: u16 = 2;
        let bits_per_sample: u16 = 16;
        let byte_rate = self.sample_rate * u32::from(channels) * u32::from(bits_per_sample) / 8;
        let block_align = channels * bits_per_sample / 8;
        let subchunk2_size = self.capture.len() as u32;
        let chunk_size = 4 + (8 + 16) + (8 + subchunk2_size);

        let mut f = std::fs::File::create(path)?;

        f.write_all(b"RIFF")?;
        f.write_all(&chunk_size.to_le_bytes())?;
        f.write_all(b"WAVE")?;

        f.write_all(b"fmt ")?;
        f.write_all(&16u32.to_le_bytes())?;
        f.write_all(&1u16.to_le_bytes())?;
        f.write_all(&channels.to_le_bytes())?;
        f.write_all(&self.sample_rate.to_le_bytes())?;
        f.write_all(&byte_rate.to_le_bytes())?;
        f.write_all(&block_align.to_le_bytes())?;
        f.write_all(&bits_per_sample.to_le_bytes())?;

        f.write_all(b"data")?;
        f.write_all(&subchunk2_size.to_le_bytes())?;
        f.write_all(&self.capture)?;

        Ok(())
    }

    fn dump_capture(&self) {
        let Some(dir) = std::env::var_os("I2S_OUT_CAPTURE_DIR") else {
            log::debug!("I2S_OUT_CAPTURE_DIR unset, discarding capture");
            return;
        };

        let name = format!("audio_{:#08x}.wav", rand::random::<u32>());
        let path = Path::new(&dir).join(&name);
        if let Err(e) = self.dump_wav_to_path(&path) {
            log::error!("failed to write {}: {}", path.display(), e);
        } else {
            log::info!(
                "wrote {} ({} bytes of audio)",
                path.display(),
                self.capture.len()
            );
        }
    }
}

impl OutputBackend for HostBackend {
    fn bind_pinout(&mut self, pinout: Pinout) -> Result<(), OutputError> {
        self.pinout = pinout;
        log::debug!(
            "unit {}: pinout bclk={} wclk={} dout={}",
            self.port,
            self.pinout.bclk,
            self.pinout.wclk,
            self.pinout.dout
        );
        Ok(())
    }

    fn program_rate(&mut self, hz: u32) -> Result<(), OutputError> {
        self.sample_rate = hz;
        self.effective_rate = adjusted_rate(hz);
        log::debug!(
            "unit {}: rate {hz} Hz, divider lands on {} Hz",
            self.port,
            self.effective_rate
        );
        Ok(())
    }

    fn try_write_frame(&mut self, pair: [i16; 2]) -> bool {
        if !self.active || self.queue.len() >= self.capacity {
            return false;
        }
        let frame = self.pack(pair);
        self.queue.push_back(frame);
        self.capture.extend_from_slice(&frame.to_le_bytes());
        true
    }

    fn write_block(&mut self, pairs: &[[i16; 2]]) -> usize {
        let mut accepted = 0;
        for &pair in pairs {
            if !self.try_write_frame(pair) {
                break;
            }
            accepted += 1;
        }
        accepted
    }

    fn quiesce(&mut self) {
        self.queue.clear();
    }

    fn shutdown(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.queue.clear();
        self.dump_capture();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divider_lands_on_nearest_achievable_rate() {
        // 160 MHz / (57 * 64) = 43859 is closer to 44100 than 44642.
        assert_eq!(adjusted_rate(44_100), 43_859);
        // An exact divider passes through: 160 MHz / (50 * 64) = 50000.
        assert_eq!(adjusted_rate(50_000), 50_000);
    }

    #[test]
    fn divider_is_clamped_at_the_extremes() {
        // Requests below the smallest producible rate pin to the max divider.
        assert_eq!(adjusted_rate(1_000), CLOCK_HZ / (256 * FRAME_BITS));
        // Requests above the largest producible rate pin to divider 1.
        assert_eq!(adjusted_rate(10_000_000), CLOCK_HZ / FRAME_BITS);
    }

    #[test]
    fn program_rate_tracks_the_divider() {
        let mut b =
            HostBackend::install(0, OutputMode::ExternalI2s, 1, ApllMode::Auto, 44_100).unwrap();
        assert_eq!(b.effective_rate(), 43_859);
        b.program_rate(50_000).unwrap();
        assert_eq!(b.effective_rate(), 50_000);
    }

    #[test]
    fn queue_rejects_when_full() {
        let mut b =
            HostBackend::install(0, OutputMode::ExternalI2s, 1, ApllMode::Auto, 44_100).unwrap();
        for _ in 0..DMA_BUFFER_FRAMES {
            assert!(b.try_write_frame([1, 2]));
        }
        assert!(!b.try_write_frame([1, 2]));
        assert_eq!(b.queued_frames(), DMA_BUFFER_FRAMES);

        b.quiesce();
        assert_eq!(b.queued_frames(), 0);
        assert!(b.try_write_frame([1, 2]));
    }

    #[test]
    fn capture_records_wire_bytes() {
        let mut b =
            HostBackend::install(0, OutputMode::ExternalI2s, 1, ApllMode::Auto, 44_100).unwrap();
        assert!(b.try_write_frame([0x1234, 0x0a0b]));
        // Little-endian word frame is interleaved 16-bit PCM: left, right.
        assert_eq!(b.captured_bytes(), &[0x34, 0x12, 0x0b, 0x0a]);
    }

    #[test]
    fn dac_mode_captures_offset_binary() {
        let mut b =
            HostBackend::install(0, OutputMode::InternalDac, 1, ApllMode::Auto, 44_100).unwrap();
        assert!(b.try_write_frame([0, 0]));
        assert_eq!(b.captured_bytes(), &[0x00, 0x80, 0x00, 0x80]);
    }

    #[test]
    fn shutdown_deactivates_writes() {
        let mut b =
            HostBackend::install(0, OutputMode::ExternalI2s, 1, ApllMode::Auto, 44_100).unwrap();
        b.shutdown();
        assert!(!b.try_write_frame([1, 2]));
        // A second shutdown is a no-op.
        b.shutdown();
    }
}
