//! ESP-IDF backend.
//!
//! External I2S and PDM go through the `esp-idf-hal` channel drivers; the
//! on-chip DAC path uses the `dac_continuous` SDK surface directly. The
//! IDF 5 drivers fix pins and clocks at channel creation, so reconfiguring
//! drops the driver and builds a fresh one on the same unit.

use esp_idf_hal::gpio::AnyIOPin;
use esp_idf_hal::i2s::config as i2s_config;
use esp_idf_hal::i2s::{I2sDriver, I2sTx, I2S0, I2S1};
use esp_idf_svc::sys::{self as sys, esp, EspError};
use heapless::Vec as HVec;

use crate::backend::OutputBackend;
use crate::config::{ApllMode, OutputMode, Pinout, BLOCK_FRAMES, DMA_BUFFER_FRAMES};
use crate::error::OutputError;
use crate::sample::pack_frame;
#[cfg(any(esp32, esp32s2))]
use crate::sample::{pack_frame_offset_binary, LEFT, RIGHT};

enum Channel {
    Std(I2sDriver<'static, I2sTx>),
    #[cfg(esp_idf_soc_i2s_supports_pdm_tx)]
    Pdm(I2sDriver<'static, I2sTx>),
    #[cfg(any(esp32, esp32s2))]
    Dac(sys::dac_continuous_handle_t),
}

pub(crate) struct EspBackend {
    port: u32,
    mode: OutputMode,
    dma_buf_count: u32,
    use_apll: bool,
    rate: u32,
    pinout: Pinout,
    channel: Option<Channel>,
}

impl EspBackend {
    pub(crate) fn install(
        port: u32,
        mode: OutputMode,
        dma_buf_count: u32,
        apll: ApllMode,
        rate: u32,
    ) -> Result<Self, OutputError> {
        if port > 1 {
            return Err(OutputError::Config("no such i2s unit"));
        }

        let use_apll = match apll {
            ApllMode::Auto => apll_usable(),
            ApllMode::Enable => true,
            ApllMode::Disable => false,
        };

        let mut backend = Self {
            port,
            mode,
            dma_buf_count: dma_buf_count.max(1),
            use_apll,
            rate,
            pinout: Pinout::default(),
            channel: None,
        };
        backend.rebuild().map_err(map_install_err)?;
        Ok(backend)
    }

    fn rebuild(&mut self) -> Result<(), EspError> {
        self.teardown_channel();

        let chan_cfg = i2s_config::Config::default()
            .dma_desc(self.dma_buf_count)
            .frames(DMA_BUFFER_FRAMES as u32)
            .auto_clear(true);

        match self.mode {
            OutputMode::ExternalI2s => {
                let cfg = i2s_config::StdConfig::new(
                    chan_cfg,
                    std_clk_config(self.rate, self.use_apll),
                    i2s_config::StdSlotConfig::philips_slot_default(
                        i2s_config::DataBitWidth::Bits16,
                        i2s_config::SlotMode::Stereo,
                    ),
                    i2s_config::StdGpioConfig::default(),
                );

                // SAFETY: any driver previously claiming this unit was
                // dropped in teardown_channel, and the pin numbers come from
                // the caller-owned pinout.
                let mut tx = unsafe {
                    match self.port {
                        0 => I2sDriver::<I2sTx>::new_std_tx(
                            I2S0::new(),
                            &cfg,
                            AnyIOPin::new(self.pinout.bclk),
                            AnyIOPin::new(self.pinout.dout),
                            Option::<AnyIOPin>::None,
                            AnyIOPin::new(self.pinout.wclk),
                        )?,
                        _ => I2sDriver::<I2sTx>::new_std_tx(
                            I2S1::new(),
                            &cfg,
                            AnyIOPin::new(self.pinout.bclk),
                            AnyIOPin::new(self.pinout.dout),
                            Option::<AnyIOPin>::None,
                            AnyIOPin::new(self.pinout.wclk),
                        )?,
                    }
                };
                tx.tx_enable()?;
                self.channel = Some(Channel::Std(tx));
            }

            #[cfg(not(esp_idf_soc_i2s_supports_pdm_tx))]
            OutputMode::InternalPdm => {
                return Err(EspError::from_infallible::<{ sys::ESP_ERR_NOT_SUPPORTED }>());
            }

            #[cfg(esp_idf_soc_i2s_supports_pdm_tx)]
            OutputMode::InternalPdm => {
                let cfg = i2s_config::PdmTxConfig::new(
                    chan_cfg,
                    i2s_config::PdmTxClkConfig::from_sample_rate_hz(self.rate),
                    i2s_config::PdmTxSlotConfig::from_slot_mode(i2s_config::SlotMode::Stereo),
                    i2s_config::PdmTxGpioConfig::new(false),
                );

                // PDM transmits on the stock clock/data pins; the unit's
                // word clock line carries the PDM clock.
                // SAFETY: as for the external path above.
                let mut tx = unsafe {
                    I2sDriver::<I2sTx>::new_pdm_tx(
                        I2S0::new(),
                        &cfg,
                        AnyIOPin::new(self.pinout.wclk),
                        AnyIOPin::new(self.pinout.dout),
                    )?
                };
                tx.tx_enable()?;
                self.channel = Some(Channel::Pdm(tx));
            }

            #[cfg(not(any(esp32, esp32s2)))]
            OutputMode::InternalDac => {
                return Err(EspError::from_infallible::<{ sys::ESP_ERR_NOT_SUPPORTED }>());
            }

            #[cfg(any(esp32, esp32s2))]
            OutputMode::InternalDac => {
                let cfg = sys::dac_continuous_config_t {
                    chan_mask: sys::dac_channel_mask_t_DAC_CHANNEL_MASK_ALL,
                    desc_num: self.dma_buf_count,
                    buf_size: DMA_BUFFER_FRAMES * 2,
                    freq_hz: self.rate,
                    offset: 0,
                    clk_src: if self.use_apll {
                        sys::soc_periph_dac_digi_clk_src_t_DAC_DIGI_CLK_SRC_APLL
                    } else {
                        sys::soc_periph_dac_digi_clk_src_t_DAC_DIGI_CLK_SRC_DEFAULT
                    },
                    chan_mode: sys::dac_continuous_channel_mode_t_DAC_CHANNEL_MODE_ALTER,
                };
                let mut handle: sys::dac_continuous_handle_t = core::ptr::null_mut();
                esp!(unsafe { sys::dac_continuous_new_channels(&cfg, &mut handle) })?;
                esp!(unsafe { sys::dac_continuous_enable(handle) })?;
                self.channel = Some(Channel::Dac(handle));
            }
        }

        Ok(())
    }

    fn teardown_channel(&mut self) {
        match self.channel.take() {
            #[cfg(any(esp32, esp32s2))]
            Some(Channel::Dac(handle)) => {
                // Teardown-path errors are logged and dropped.
                if let Err(e) = esp!(unsafe { sys::dac_continuous_disable(handle) }) {
                    log::warn!("dac disable failed: {e:?}");
                }
                if let Err(e) = esp!(unsafe { sys::dac_continuous_del_channels(handle) }) {
                    log::warn!("dac teardown failed: {e:?}");
                }
            }
            // The channel drivers uninstall themselves on drop.
            _ => {}
        }
    }
}

impl OutputBackend for EspBackend {
    fn bind_pinout(&mut self, pinout: Pinout) -> Result<(), OutputError> {
        self.pinout = pinout;
        self.rebuild().map_err(map_audio_err)
    }

    fn program_rate(&mut self, hz: u32) -> Result<(), OutputError> {
        self.rate = hz;
        self.rebuild().map_err(map_audio_err)
    }

    fn try_write_frame(&mut self, pair: [i16; 2]) -> bool {
        let Some(channel) = self.channel.as_mut() else {
            return false;
        };
        match channel {
            Channel::Std(tx) => {
                let frame = pack_frame(pair).to_le_bytes();
                // A zero-tick timeout turns a full queue into Err(TIMEOUT).
                matches!(tx.write(&frame, 0), Ok(n) if n == frame.len())
            }
            #[cfg(esp_idf_soc_i2s_supports_pdm_tx)]
            Channel::Pdm(tx) => {
                let frame = pack_frame(pair).to_le_bytes();
                matches!(tx.write(&frame, 0), Ok(n) if n == frame.len())
            }
            #[cfg(any(esp32, esp32s2))]
            Channel::Dac(handle) => {
                // The DAC consumes one byte per channel, high byte of the
                // offset-binary sample, alternating left/right.
                let frame = pack_frame_offset_binary(pair);
                let mut bytes = [(frame >> 8) as u8, (frame >> 24) as u8];
                dac_write(*handle, &mut bytes) == bytes.len()
            }
        }
    }

    fn write_block(&mut self, pairs: &[[i16; 2]]) -> usize {
        let Some(channel) = self.channel.as_mut() else {
            return 0;
        };
        match channel {
            Channel::Std(tx) => block_write_words(tx, pairs),
            #[cfg(esp_idf_soc_i2s_supports_pdm_tx)]
            Channel::Pdm(tx) => block_write_words(tx, pairs),
            #[cfg(any(esp32, esp32s2))]
            Channel::Dac(handle) => {
                let mut staged: HVec<u8, { BLOCK_FRAMES * 2 }> = HVec::new();
                for &pair in pairs.iter().take(BLOCK_FRAMES) {
                    let _ = staged.push(((pair[LEFT] as u16).wrapping_add(0x8000) >> 8) as u8);
                    let _ = staged.push(((pair[RIGHT] as u16).wrapping_add(0x8000) >> 8) as u8);
                }
                dac_write(*handle, &mut staged) / 2
            }
        }
    }

    fn quiesce(&mut self) {
        // Best effort: push a block of silence so the engine drains to zero.
        let _ = self.write_block(&[[0, 0]; BLOCK_FRAMES]);
    }

    fn shutdown(&mut self) {
        self.teardown_channel();
    }
}

/// Stage a block into word frames and hand it to the channel driver in one
/// write. Partial acceptance is reported in whole frames.
fn block_write_words(tx: &mut I2sDriver<'static, I2sTx>, pairs: &[[i16; 2]]) -> usize {
    let mut staged: HVec<u32, BLOCK_FRAMES> = HVec::new();
    for &pair in pairs.iter().take(BLOCK_FRAMES) {
        let _ = staged.push(pack_frame(pair));
    }
    let bytes: &[u8] = bytemuck::cast_slice(&staged);
    match tx.write(bytes, 0) {
        Ok(n) => n / core::mem::size_of::<u32>(),
        Err(_) => 0,
    }
}

#[cfg(any(esp32, esp32s2))]
fn dac_write(handle: sys::dac_continuous_handle_t, bytes: &mut [u8]) -> usize {
    let mut loaded = 0usize;
    let res = unsafe {
        sys::dac_continuous_write(handle, bytes.as_mut_ptr(), bytes.len(), &mut loaded, 0)
    };
    if res == sys::ESP_OK {
        loaded
    } else {
        0
    }
}

/// Rev-0 silicon has a broken audio PLL.
#[cfg(esp32)]
fn apll_usable() -> bool {
    let mut info = sys::esp_chip_info_t::default();
    unsafe { sys::esp_chip_info(&mut info) };
    info.revision > 0
}

#[cfg(not(esp32))]
fn apll_usable() -> bool {
    false
}

#[cfg(any(esp32, esp32s2))]
fn std_clk_config(rate: u32, use_apll: bool) -> i2s_config::StdClkConfig {
    let cfg = i2s_config::StdClkConfig::from_sample_rate_hz(rate);
    if use_apll {
        cfg.clk_src(i2s_config::ClockSource::Apll)
    } else {
        cfg
    }
}

#[cfg(not(any(esp32, esp32s2)))]
fn std_clk_config(rate: u32, _use_apll: bool) -> i2s_config::StdClkConfig {
    i2s_config::StdClkConfig::from_sample_rate_hz(rate)
}

fn map_audio_err(err: EspError) -> OutputError {
    log::error!("audio error: {err:?}");
    OutputError::Audio("audio error")
}

fn map_install_err(err: EspError) -> OutputError {
    log::error!("unable to install i2s driver: {err:?}");
    OutputError::Install("i2s driver install failed")
}
