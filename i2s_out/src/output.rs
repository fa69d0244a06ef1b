use heapless::Vec as HVec;
use log::{error, info};

use crate::backend::{DefaultBackend, OutputBackend};
use crate::config::{ApllMode, OutputMode, Pinout, StreamConfig, BLOCK_FRAMES};
use crate::config::{GAIN_MAX, GAIN_UNITY_Q26};
use crate::error::OutputError;
use crate::sample;

/// One transmit path on one I2S unit.
///
/// Construction installs the platform driver; drop uninstalls it. One
/// instance per unit, driven from a single control-flow context; the type
/// carries no locking of its own.
pub struct I2sOut {
    port: u32,
    mode: OutputMode,
    config: StreamConfig,
    backend: Option<DefaultBackend>,
}

impl I2sOut {
    /// Install the transmit driver on `port` and apply the default stream
    /// configuration (44.1 kHz, 16-bit, stereo, unity gain).
    ///
    /// Internal DAC/PDM modes bind their fixed signal paths here; external
    /// I2S comes up on the stock pinout and can be re-bound with
    /// [`set_pinout`](Self::set_pinout).
    pub fn new(
        port: u32,
        mode: OutputMode,
        dma_buf_count: u32,
        apll: ApllMode,
    ) -> Result<Self, OutputError> {
        let config = StreamConfig::default();
        let backend = DefaultBackend::install(port, mode, dma_buf_count, apll, config.sample_rate)
            .map_err(|e| {
                error!("unable to install i2s driver on unit {port}: {e}");
                e
            })?;
        info!("i2s unit {port} up, mode {mode:?}");
        Ok(Self {
            port,
            mode,
            config,
            backend: Some(backend),
        })
    }

    pub fn port(&self) -> u32 {
        self.port
    }

    pub fn output_mode(&self) -> OutputMode {
        self.mode
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Placeholder to mirror the rest of the control surface.
    pub fn begin(&mut self) -> bool {
        true
    }

    /// Re-bind the external signal lines. Rejected on the internal DAC/PDM
    /// paths, which route through fixed wiring.
    pub fn set_pinout(&mut self, bclk: i32, wclk: i32, dout: i32) -> bool {
        if !self.mode.has_external_pinout() {
            return false;
        }
        let Some(backend) = self.backend.as_mut() else {
            return false;
        };
        match backend.bind_pinout(Pinout { bclk, wclk, dout }) {
            Ok(()) => true,
            Err(e) => {
                error!("pinout rebind failed: {e}");
                false
            }
        }
    }

    /// Store the requested rate and reprogram the transmit clock. The
    /// backend applies its platform divider adjustment; [`config`](Self::config)
    /// keeps reporting the requested value.
    pub fn set_rate(&mut self, hz: u32) -> bool {
        if hz == 0 {
            return false;
        }
        let Some(backend) = self.backend.as_mut() else {
            return false;
        };
        if let Err(e) = backend.program_rate(hz) {
            error!("rate change to {hz} Hz failed: {e}");
            return false;
        }
        self.config.sample_rate = hz;
        true
    }

    pub fn set_bits_per_sample(&mut self, bits: u8) -> bool {
        if bits != 8 && bits != 16 {
            return false;
        }
        self.config.bits_per_sample = bits;
        true
    }

    pub fn set_channels(&mut self, channels: u8) -> bool {
        if !(1..=2).contains(&channels) {
            return false;
        }
        self.config.channels = channels;
        true
    }

    pub fn set_mono(&mut self, mono: bool) -> bool {
        self.config.mono = mono;
        true
    }

    /// Set the amplification factor, clamped to 0.0..=4.0.
    pub fn set_gain(&mut self, gain: f32) -> bool {
        if !gain.is_finite() {
            return false;
        }
        let clamped = gain.clamp(0.0, GAIN_MAX);
        self.config.gain_q26 = (clamped * f32::from(GAIN_UNITY_Q26)) as u16;
        true
    }

    /// Push one sample pair. `false` means the DMA queue was full; poll
    /// again with the same pair.
    pub fn consume_sample(&mut self, pair: [i16; 2]) -> bool {
        let pair = self.transform(pair);
        let Some(backend) = self.backend.as_mut() else {
            return false;
        };
        backend.try_write_frame(pair)
    }

    /// Push a batch of sample pairs, staged in fixed-size blocks. Returns
    /// the number of frames the transmit queue accepted.
    pub fn consume_samples(&mut self, pairs: &[[i16; 2]]) -> usize {
        let mut accepted = 0;
        let mut staged: HVec<[i16; 2], BLOCK_FRAMES> = HVec::new();
        for chunk in pairs.chunks(BLOCK_FRAMES) {
            staged.clear();
            for &pair in chunk {
                let _ = staged.push(self.transform(pair));
            }
            let Some(backend) = self.backend.as_mut() else {
                break;
            };
            let wrote = backend.write_block(&staged);
            accepted += wrote;
            if wrote < staged.len() {
                break;
            }
        }
        accepted
    }

    /// Best-effort quiesce: zero the transmit buffer, keep the driver up.
    pub fn stop(&mut self) -> bool {
        if let Some(backend) = self.backend.as_mut() {
            backend.quiesce();
        }
        true
    }

    /// Uninstall the driver. Also runs on drop; calling it twice is a no-op.
    pub fn shutdown(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.shutdown();
            info!("uninstall i2s unit {}", self.port);
        }
    }

    fn transform(&self, pair: [i16; 2]) -> [i16; 2] {
        let mut pair =
            sample::make_stereo16(pair, self.config.bits_per_sample, self.config.channels);
        if self.config.mono {
            pair = sample::downmix(pair);
        }
        [
            sample::amplify(pair[sample::LEFT], self.config.gain_q26),
            sample::amplify(pair[sample::RIGHT], self.config.gain_q26),
        ]
    }
}

impl Drop for I2sOut {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DMA_BUFFER_FRAMES;

    fn output() -> I2sOut {
        I2sOut::new(0, OutputMode::ExternalI2s, 1, ApllMode::Auto).unwrap()
    }

    #[test]
    fn construction_applies_defaults() {
        let out = output();
        let cfg = out.config();
        assert_eq!(cfg.sample_rate, 44_100);
        assert_eq!(cfg.bits_per_sample, 16);
        assert_eq!(cfg.channels, 2);
        assert!(!cfg.mono);
        assert_eq!(cfg.gain(), 1.0);
    }

    #[test]
    fn invalid_bit_depth_leaves_state_unchanged() {
        let mut out = output();
        assert!(out.set_bits_per_sample(8));
        assert!(!out.set_bits_per_sample(24));
        assert!(!out.set_bits_per_sample(0));
        assert_eq!(out.config().bits_per_sample, 8);
    }

    #[test]
    fn invalid_channel_count_leaves_state_unchanged() {
        let mut out = output();
        assert!(out.set_channels(1));
        assert!(!out.set_channels(0));
        assert!(!out.set_channels(3));
        assert_eq!(out.config().channels, 1);
    }

    #[test]
    fn gain_is_clamped_and_rejects_non_finite() {
        let mut out = output();
        assert!(out.set_gain(8.0));
        assert_eq!(out.config().gain(), 4.0);
        assert!(out.set_gain(-1.0));
        assert_eq!(out.config().gain(), 0.0);
        assert!(!out.set_gain(f32::NAN));
        assert_eq!(out.config().gain(), 0.0);
    }

    #[test]
    fn pinout_is_rejected_on_internal_paths() {
        let mut dac = I2sOut::new(0, OutputMode::InternalDac, 4, ApllMode::Disable).unwrap();
        assert!(!dac.set_pinout(5, 6, 7));

        let mut pdm = I2sOut::new(0, OutputMode::InternalPdm, 4, ApllMode::Disable).unwrap();
        assert!(!pdm.set_pinout(5, 6, 7));

        let mut ext = output();
        assert!(ext.set_pinout(5, 6, 7));
    }

    #[test]
    fn set_rate_keeps_requested_value() {
        let mut out = output();
        assert!(out.set_rate(22_050));
        assert_eq!(out.config().sample_rate, 22_050);
        assert!(!out.set_rate(0));
        assert_eq!(out.config().sample_rate, 22_050);
    }

    #[test]
    fn full_queue_rejects_sample_and_stop_clears_it() {
        let mut out = output();
        for _ in 0..DMA_BUFFER_FRAMES {
            assert!(out.consume_sample([100, -100]));
        }
        assert!(!out.consume_sample([100, -100]));

        assert!(out.stop());
        assert!(out.consume_sample([100, -100]));
    }

    #[test]
    fn batch_write_reports_frames_accepted() {
        let mut out = output();
        let frames = [[5i16, -5i16]; DMA_BUFFER_FRAMES + 16];
        assert_eq!(out.consume_samples(&frames), DMA_BUFFER_FRAMES);
        out.stop();
        assert_eq!(out.consume_samples(&frames[..8]), 8);
    }

    #[test]
    fn shutdown_is_idempotent_and_disables_the_surface() {
        let mut out = output();
        out.shutdown();
        out.shutdown();
        assert!(!out.consume_sample([1, 1]));
        assert!(!out.set_rate(48_000));
        assert!(!out.set_pinout(1, 2, 3));
    }

    #[test]
    fn begin_is_a_placeholder() {
        assert!(output().begin());
    }
}
