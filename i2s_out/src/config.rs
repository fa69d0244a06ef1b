/// Where the transmitted samples leave the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// External I2S bus on the configured pinout.
    #[default]
    ExternalI2s,
    /// On-chip DAC; fixed internal routing.
    InternalDac,
    /// PDM bitstream on the default clock/data pins.
    InternalPdm,
}

impl OutputMode {
    /// Only the external bus is re-pinnable; the internal paths have fixed
    /// signal routing.
    pub fn has_external_pinout(self) -> bool {
        matches!(self, OutputMode::ExternalI2s)
    }
}

/// Audio PLL selection.
///
/// `Auto` defers to a chip-revision probe on targets that have an APLL;
/// backends without one ignore the setting entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApllMode {
    #[default]
    Auto,
    Enable,
    Disable,
}

/// External I2S signal lines, by GPIO number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pinout {
    pub bclk: i32,
    pub wclk: i32,
    pub dout: i32,
}

impl Default for Pinout {
    fn default() -> Self {
        // Stock wiring for the external bus.
        Self {
            bclk: 26,
            wclk: 25,
            dout: 22,
        }
    }
}

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Frames per DMA buffer; the transmit queue holds `dma_buf_count` of these.
pub const DMA_BUFFER_FRAMES: usize = 64;

/// Frames staged per batch write.
pub const BLOCK_FRAMES: usize = 32;

/// Unity gain in Q2.6 fixed point.
pub(crate) const GAIN_UNITY_Q26: u16 = 1 << 6;
pub(crate) const GAIN_MAX: f32 = 4.0;

/// Mutable per-stream state behind the setter surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub sample_rate: u32,
    pub bits_per_sample: u8,
    pub channels: u8,
    pub mono: bool,
    pub(crate) gain_q26: u16,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            bits_per_sample: 16,
            channels: 2,
            mono: false,
            gain_q26: GAIN_UNITY_Q26,
        }
    }
}

impl StreamConfig {
    pub fn gain(&self) -> f32 {
        f32::from(self.gain_q26) / f32::from(GAIN_UNITY_Q26)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_construction_contract() {
        let cfg = StreamConfig::default();
        assert_eq!(cfg.sample_rate, 44_100);
        assert_eq!(cfg.bits_per_sample, 16);
        assert_eq!(cfg.channels, 2);
        assert!(!cfg.mono);
        assert_eq!(cfg.gain(), 1.0);
    }

    #[test]
    fn internal_paths_are_not_repinnable() {
        assert!(OutputMode::ExternalI2s.has_external_pinout());
        assert!(!OutputMode::InternalDac.has_external_pinout());
        assert!(!OutputMode::InternalPdm.has_external_pinout());
    }
}
