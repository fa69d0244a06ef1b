//! Tone playback demo: a sine generator pushed through [`i2s_out::I2sOut`]
//! with the polling backpressure contract the driver expects of callers.

use std::f32::consts::PI;

use i2s_out::{ApllMode, I2sOut, OutputError, OutputMode};

const SAMPLE_RATE: u32 = 44_100;
const TONE_HZ: f32 = 447.0;
const TONE_AMPLITUDE: f32 = 8_000.0;
const FRAME_SAMPLES: usize = 441; // 10 ms
const TONE_SECONDS: u32 = 2;

pub fn run() -> Result<(), OutputError> {
    let mut out = I2sOut::new(0, OutputMode::ExternalI2s, 8, ApllMode::Auto)?;
    out.set_rate(SAMPLE_RATE);
    out.set_gain(0.5);

    log::info!("playing {TONE_HZ} Hz for {TONE_SECONDS} s");

    let mut phase = 0.0f32;
    let frames = (SAMPLE_RATE * TONE_SECONDS) as usize / FRAME_SAMPLES;
    for _ in 0..frames {
        let block = gen_tone_frame(&mut phase);
        write_all(&mut out, &block);
    }

    out.stop();
    Ok(())
}

fn write_all(out: &mut I2sOut, mut pairs: &[[i16; 2]]) {
    while !pairs.is_empty() {
        let n = out.consume_samples(pairs);
        pairs = &pairs[n..];
        if pairs.is_empty() {
            break;
        }
        backpressure_pause(out);
    }
}

/// Give the DMA engine a couple of frames' worth of time to drain.
#[cfg(target_os = "espidf")]
fn backpressure_pause(_out: &mut I2sOut) {
    std::thread::sleep(std::time::Duration::from_millis(2));
}

/// The simulated queue has no DMA engine behind it; quiesce stands in for
/// playout.
#[cfg(not(target_os = "espidf"))]
fn backpressure_pause(out: &mut I2sOut) {
    out.stop();
}

fn gen_tone_frame(phase: &mut f32) -> Vec<[i16; 2]> {
    let step = 2.0 * PI * TONE_HZ / SAMPLE_RATE as f32;

    let mut pcm = Vec::with_capacity(FRAME_SAMPLES);
    for _ in 0..FRAME_SAMPLES {
        let s = (phase.sin() * TONE_AMPLITUDE) as i16;
        *phase += step;
        if *phase > 2.0 * PI {
            *phase -= 2.0 * PI;
        }
        pcm.push([s, s]);
    }
    pcm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_frame_stays_within_amplitude() {
        let mut phase = 0.0;
        let frame = gen_tone_frame(&mut phase);
        assert_eq!(frame.len(), FRAME_SAMPLES);
        assert!(frame
            .iter()
            .all(|p| p[0].unsigned_abs() <= TONE_AMPLITUDE as u16 && p[0] == p[1]));
    }

    #[test]
    fn tone_phase_wraps() {
        let mut phase = 0.0;
        for _ in 0..1000 {
            let _ = gen_tone_frame(&mut phase);
        }
        assert!(phase <= 2.0 * PI + f32::EPSILON);
    }
}
