// Band-pass filters for epoch and continuous-signal processing
// Zero-phase windowed-sinc FIR applied by FFT convolution, and a causal
// 4th-order Butterworth cascade for filtering a whole recording

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Invalid pass band [{l_freq}, {h_freq}] Hz for sampling rate {sfreq} Hz")]
    InvalidBand { l_freq: f64, h_freq: f64, sfreq: f64 },

    #[error("Convolver prepared for {expected} samples, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("FFT failed: {0}")]
    Fft(String),
}

/// Where band-pass filtering happens in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMethod {
    /// Zero-phase FIR on each padded epoch, inside feature extraction
    Windowed,

    /// Causal IIR over the continuous recording, before epoching
    Causal,

    /// No band-pass filtering
    Disabled,
}

impl FilterMethod {
    /// Whether feature extraction filters the padded epochs itself
    pub fn filters_epochs(&self) -> bool {
        matches!(self, FilterMethod::Windowed)
    }
}

fn check_band(sfreq: f64, l_freq: f64, h_freq: f64) -> Result<(), FilterError> {
    let nyquist = sfreq / 2.0;
    if !(sfreq > 0.0) || !(l_freq > 0.0) || !(l_freq < h_freq) || !(h_freq < nyquist) {
        return Err(FilterError::InvalidBand {
            l_freq,
            h_freq,
            sfreq,
        });
    }
    Ok(())
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Windowed-sinc band-pass FIR (Hamming window)
#[derive(Debug, Clone)]
pub struct FirBandpass {
    taps: Vec<f64>,
}

impl FirBandpass {
    /// Design a band-pass for `[l_freq, h_freq]`
    ///
    /// Transition bands follow the usual EEG defaults: 25% of the edge
    /// frequency, at least 2 Hz, never past DC or Nyquist. The filter length
    /// is 3.3 / transition seconds, forced odd so the delay is an integer.
    pub fn design(sfreq: f64, l_freq: f64, h_freq: f64) -> Result<Self, FilterError> {
        check_band(sfreq, l_freq, h_freq)?;

        let l_trans = (0.25 * l_freq).max(2.0).min(l_freq);
        let h_trans = (0.25 * h_freq).max(2.0).min(sfreq / 2.0 - h_freq);
        let trans = l_trans.min(h_trans);

        let mut n_taps = (3.3 * sfreq / trans).ceil() as usize;
        if n_taps % 2 == 0 {
            n_taps += 1;
        }
        let center = (n_taps / 2) as f64;

        let f_low = (l_freq - l_trans / 2.0) / sfreq;
        let f_high = (h_freq + h_trans / 2.0) / sfreq;

        let taps = (0..n_taps)
            .map(|i| {
                let m = i as f64 - center;
                let ideal = 2.0 * f_high * sinc(2.0 * f_high * m) - 2.0 * f_low * sinc(2.0 * f_low * m);
                let window = 0.54 - 0.46 * (2.0 * PI * i as f64 / (n_taps - 1) as f64).cos();
                ideal * window
            })
            .collect();

        Ok(FirBandpass { taps })
    }

    /// Filter coefficients, odd length and symmetric
    pub fn taps(&self) -> &[f64] {
        &self.taps
    }

    /// Prepare an FFT convolver for signals of `signal_len` samples
    pub fn convolver(&self, signal_len: usize) -> Result<FftConvolver, FilterError> {
        FftConvolver::new(&self.taps, signal_len)
    }
}

/// Zero-phase FIR convolution for a fixed signal length
/// The output is the centred ("same") part of the linear convolution
pub struct FftConvolver {
    forward: Arc<dyn RealToComplex<f64>>,
    inverse: Arc<dyn ComplexToReal<f64>>,
    taps_spectrum: Vec<Complex<f64>>,
    fft_len: usize,
    signal_len: usize,
    delay: usize,
}

impl FftConvolver {
    fn new(taps: &[f64], signal_len: usize) -> Result<Self, FilterError> {
        let fft_len = (signal_len + taps.len()).next_power_of_two().max(2);

        let mut planner = RealFftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(fft_len);
        let inverse = planner.plan_fft_inverse(fft_len);

        let mut padded = forward.make_input_vec();
        padded[..taps.len()].copy_from_slice(taps);
        let mut taps_spectrum = forward.make_output_vec();
        forward
            .process(&mut padded, &mut taps_spectrum)
            .map_err(|e| FilterError::Fft(e.to_string()))?;

        Ok(FftConvolver {
            forward,
            inverse,
            taps_spectrum,
            fft_len,
            signal_len,
            delay: taps.len() / 2,
        })
    }

    /// Filter `signal` in place; its length must match the convolver's
    pub fn apply(&self, signal: &mut [f64]) -> Result<(), FilterError> {
        if signal.len() != self.signal_len {
            return Err(FilterError::LengthMismatch {
                expected: self.signal_len,
                actual: signal.len(),
            });
        }

        let mut padded = self.forward.make_input_vec();
        padded[..signal.len()].copy_from_slice(signal);

        let mut spectrum = self.forward.make_output_vec();
        self.forward
            .process(&mut padded, &mut spectrum)
            .map_err(|e| FilterError::Fft(e.to_string()))?;

        for (bin, tap) in spectrum.iter_mut().zip(self.taps_spectrum.iter()) {
            *bin = *bin * *tap;
        }
        // DC and Nyquist bins of a real signal carry no imaginary part
        if let Some(first) = spectrum.first_mut() {
            first.im = 0.0;
        }
        if let Some(last) = spectrum.last_mut() {
            last.im = 0.0;
        }

        let mut full = self.inverse.make_output_vec();
        self.inverse
            .process(&mut spectrum, &mut full)
            .map_err(|e| FilterError::Fft(e.to_string()))?;

        let scale = 1.0 / self.fft_len as f64;
        for (i, out) in signal.iter_mut().enumerate() {
            *out = full[i + self.delay] * scale;
        }

        Ok(())
    }
}

/// Second-order section, transposed direct form II
#[derive(Debug, Clone)]
struct Biquad {
    b: [f64; 3],
    a: [f64; 2],
    state: [f64; 2],
}

impl Biquad {
    fn from_coeffs(b: [f64; 3], a0: f64, a1: f64, a2: f64) -> Self {
        Biquad {
            b: [b[0] / a0, b[1] / a0, b[2] / a0],
            a: [a1 / a0, a2 / a0],
            state: [0.0, 0.0],
        }
    }

    fn lowpass(sfreq: f64, cutoff: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * cutoff / sfreq;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        Self::from_coeffs(
            [(1.0 - cos) / 2.0, 1.0 - cos, (1.0 - cos) / 2.0],
            1.0 + alpha,
            -2.0 * cos,
            1.0 - alpha,
        )
    }

    fn highpass(sfreq: f64, cutoff: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * cutoff / sfreq;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        Self::from_coeffs(
            [(1.0 + cos) / 2.0, -(1.0 + cos), (1.0 + cos) / 2.0],
            1.0 + alpha,
            -2.0 * cos,
            1.0 - alpha,
        )
    }

    fn filter(&mut self, input: f64) -> f64 {
        let output = self.b[0] * input + self.state[0];
        self.state[0] = self.b[1] * input - self.a[0] * output + self.state[1];
        self.state[1] = self.b[2] * input - self.a[1] * output;
        output
    }

    fn reset(&mut self) {
        self.state = [0.0, 0.0];
    }
}

/// Pole quality factors of a 4th-order Butterworth prototype
const BUTTERWORTH4_Q: [f64; 2] = [0.541_196_100_146_197, 1.306_562_964_876_376_5];

/// Causal band-pass: 4th-order Butterworth high-pass followed by
/// 4th-order Butterworth low-pass
#[derive(Debug, Clone)]
pub struct CausalBandpass {
    sections: Vec<Biquad>,
}

impl CausalBandpass {
    /// Fourth-order band-pass with zeroed state
    pub fn new(sfreq: f64, l_freq: f64, h_freq: f64) -> Result<Self, FilterError> {
        check_band(sfreq, l_freq, h_freq)?;

        let mut sections = Vec::with_capacity(4);
        for q in BUTTERWORTH4_Q {
            sections.push(Biquad::highpass(sfreq, l_freq, q));
        }
        for q in BUTTERWORTH4_Q {
            sections.push(Biquad::lowpass(sfreq, h_freq, q));
        }

        Ok(CausalBandpass { sections })
    }

    /// Filter a signal in place, carrying state across calls
    pub fn process(&mut self, signal: &mut [f64]) {
        for sample in signal.iter_mut() {
            let mut value = *sample;
            for section in self.sections.iter_mut() {
                value = section.filter(value);
            }
            *sample = value;
        }
    }

    /// Clear filter state
    pub fn reset(&mut self) {
        for section in self.sections.iter_mut() {
            section.reset();
        }
    }
}
