//! K210 backend.
//!
//! The chip integrates a DesignWare APB I2S block per unit; transmit setup
//! is a handful of register writes (block enable, 16-bit slot on channel 1,
//! FIFO trigger level) and the data path feeds the channel FIFO pair
//! directly. Pin routing goes through the FPIOA crossbar. Runtime sample
//! rate is owned by the clock tree and is not reprogrammed here.

use k210_pac as pac;

use crate::backend::OutputBackend;
use crate::config::{ApllMode, OutputMode, Pinout};
use crate::error::OutputError;
use crate::sample::{LEFT, RIGHT};

// DW_apb_i2s register fields.
const IER_IEN: u32 = 1 << 0;
const ITER_TXEN: u32 = 1 << 0;
const CER_CLKEN: u32 = 1 << 0;
/// CCR.WSS = 32 sclk cycles per word select.
const CCR_WSS_CYCLES_32: u32 = 0b10 << 3;
const TER_TXCHEN: u32 = 1 << 0;
/// TCR.WLEN = 16-bit resolution.
const TCR_WLEN_16BIT: u32 = 0x02;
/// TFCR.TXCHET = trigger when four or fewer frames remain.
const TFCR_TRIGGER_LEVEL_4: u32 = 0x03;
/// ISR.TXFE = transmit FIFO at or below the trigger level.
const ISR_TXFE: u32 = 1 << 4;
const TXFFR_FLUSH: u32 = 1 << 0;

/// Transmit channel within the block; the board routes channel 1.
const TX_CHANNEL: usize = 1;

// FPIOA function-select codes for the I2S0 signals.
const FUNC_I2S0_SCLK: u32 = 85;
const FUNC_I2S0_WS: u32 = 86;
const FUNC_I2S0_OUT_D1: u32 = 92;

// FPIOA output pad config: function select plus max drive and output enable.
const FPIOA_DRIVE_MAX: u32 = 0xf << 8;
const FPIOA_OE_EN: u32 = 1 << 12;

pub(crate) struct K210Backend {
    port: u32,
    active: bool,
}

impl K210Backend {
    pub(crate) fn install(
        port: u32,
        mode: OutputMode,
        _dma_buf_count: u32,
        _apll: ApllMode,
        _rate: u32,
    ) -> Result<Self, OutputError> {
        if port > 2 {
            return Err(OutputError::Config("no such i2s unit"));
        }
        if mode != OutputMode::ExternalI2s {
            // No on-chip DAC or PDM modulator on this part.
            return Err(OutputError::Config("unit only drives the external bus"));
        }

        let r = regs(port);
        r.ier.write(|w| unsafe { w.bits(IER_IEN) });
        r.ccr.write(|w| unsafe { w.bits(CCR_WSS_CYCLES_32) });
        r.txffr.write(|w| unsafe { w.bits(TXFFR_FLUSH) });

        let ch = &r.channel[TX_CHANNEL];
        ch.tcr.write(|w| unsafe { w.bits(TCR_WLEN_16BIT) });
        ch.tfcr.write(|w| unsafe { w.bits(TFCR_TRIGGER_LEVEL_4) });
        ch.ter.write(|w| unsafe { w.bits(TER_TXCHEN) });

        r.iter.write(|w| unsafe { w.bits(ITER_TXEN) });
        r.cer.write(|w| unsafe { w.bits(CER_CLKEN) });

        log::info!("install i2s unit {port}, tx channel {TX_CHANNEL}");
        Ok(Self { port, active: true })
    }
}

fn regs(port: u32) -> &'static pac::i2s0::RegisterBlock {
    // SAFETY: register blocks are static; exclusive use of the unit is the
    // driver's single-owner contract.
    unsafe {
        match port {
            0 => &*pac::I2S0::ptr(),
            1 => &*pac::I2S1::ptr(),
            _ => &*pac::I2S2::ptr(),
        }
    }
}

impl OutputBackend for K210Backend {
    fn bind_pinout(&mut self, pinout: Pinout) -> Result<(), OutputError> {
        if self.port != 0 {
            // Only unit 0 is brought out through the crossbar table here.
            return Err(OutputError::Config("pinout fixed for this unit"));
        }

        // SAFETY: FPIOA pad registers are write-any; the pin numbers select
        // entries of the 48-pad array and are bounds-checked below.
        let fp = unsafe { &*pac::FPIOA::ptr() };
        for (pin, func) in [
            (pinout.bclk, FUNC_I2S0_SCLK),
            (pinout.wclk, FUNC_I2S0_WS),
            (pinout.dout, FUNC_I2S0_OUT_D1),
        ] {
            let Ok(pin) = usize::try_from(pin) else {
                return Err(OutputError::Config("pin out of range"));
            };
            if pin >= fp.io.len() {
                return Err(OutputError::Config("pin out of range"));
            }
            fp.io[pin].write(|w| unsafe { w.bits(func | FPIOA_DRIVE_MAX | FPIOA_OE_EN) });
        }
        Ok(())
    }

    fn program_rate(&mut self, _hz: u32) -> Result<(), OutputError> {
        // The divider lives in the clock tree, programmed at board bring-up;
        // the stored stream rate is the only per-stream state.
        Ok(())
    }

    fn try_write_frame(&mut self, pair: [i16; 2]) -> bool {
        if !self.active {
            return false;
        }
        let ch = &regs(self.port).channel[TX_CHANNEL];
        if ch.isr.read().bits() & ISR_TXFE == 0 {
            return false;
        }
        ch.left_rxtx
            .write(|w| unsafe { w.bits(u32::from(pair[LEFT] as u16)) });
        ch.right_rxtx
            .write(|w| unsafe { w.bits(u32::from(pair[RIGHT] as u16)) });
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
        regs(self.port)
            .txffr
            .write(|w| unsafe { w.bits(TXFFR_FLUSH) });
    }

    fn shutdown(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        let r = regs(self.port);
        r.iter.write(|w| unsafe { w.bits(0) });
        r.cer.write(|w| unsafe { w.bits(0) });
        r.ier.write(|w| unsafe { w.bits(0) });
    }
}
