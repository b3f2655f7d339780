//! F0 (pitch) estimation
//!
//! Every predictor emits one value per hop (`len / hop_length` frames) and
//! returns `(f0, uv)`: unvoiced gaps in `f0` are linearly interpolated from
//! their voiced neighbours and `uv` is 1.0 on voiced frames, 0.0 elsewhere.

use anyhow::Result;
use std::fmt;
use std::str::FromStr;

/// Lowest pitch searched, in Hz
pub const F0_MIN: f32 = 50.0;
/// Highest pitch searched, in Hz
pub const F0_MAX: f32 = 1100.0;

/// Frames quieter than this mean square are unvoiced
const SILENCE_POWER: f32 = 1e-6;

/// Selectable pitch estimators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum F0Method {
    /// Normalized autocorrelation peak picking
    Pm,
    /// YIN with a permissive aperiodicity threshold
    #[default]
    Dio,
    /// YIN with a strict threshold and median smoothing
    Harvest,
}

impl F0Method {
    /// CLI name of the method
    pub fn name(self) -> &'static str {
        match self {
            F0Method::Pm => "pm",
            F0Method::Dio => "dio",
            F0Method::Harvest => "harvest",
        }
    }
}

impl FromStr for F0Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pm" => Ok(F0Method::Pm),
            "dio" => Ok(F0Method::Dio),
            "harvest" => Ok(F0Method::Harvest),
            other => Err(format!(
                "unknown f0 predictor '{other}' (expected pm, dio or harvest)"
            )),
        }
    }
}

impl fmt::Display for F0Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Frame-wise pitch estimator
pub trait F0Predictor: Send {
    /// Estimate `(f0, uv)` for mono audio
    fn compute_f0_uv(&self, wav: &[f32]) -> Result<(Vec<f32>, Vec<f32>)>;
}

/// Build the predictor for `method`
pub fn f0_predictor(method: F0Method, sampling_rate: u32, hop_length: usize) -> Box<dyn F0Predictor> {
    let framing = Framing::new(sampling_rate, hop_length);
    match method {
        F0Method::Pm => Box::new(AutocorrelationF0 {
            framing,
            voicing_threshold: 0.45,
        }),
        F0Method::Dio => Box::new(YinF0 {
            framing,
            threshold: 0.15,
            median_window: 1,
        }),
        F0Method::Harvest => Box::new(YinF0 {
            framing,
            threshold: 0.1,
            median_window: 3,
        }),
    }
}

/// Shared lag range and frame slicing
#[derive(Debug, Clone, Copy)]
struct Framing {
    sampling_rate: u32,
    hop_length: usize,
    tau_min: usize,
    tau_max: usize,
}

impl Framing {
    fn new(sampling_rate: u32, hop_length: usize) -> Self {
        let sr = sampling_rate as f32;
        let tau_min = ((sr / F0_MAX).floor() as usize).max(2);
        let tau_max = ((sr / F0_MIN).ceil() as usize).max(tau_min + 1);
        Self {
            sampling_rate,
            hop_length,
            tau_min,
            tau_max,
        }
    }

    fn n_frames(&self, wav: &[f32]) -> Result<usize> {
        if self.hop_length == 0 {
            anyhow::bail!("hop_length must be non-zero");
        }
        Ok(wav.len() / self.hop_length)
    }

    /// `tau_max` samples of analysis window plus `tau_max` of lag headroom,
    /// centered on the frame, zero outside the signal
    fn segment(&self, wav: &[f32], frame: usize) -> Vec<f32> {
        let center = (frame * self.hop_length) as isize;
        let start = center - (self.tau_max / 2) as isize;
        (0..2 * self.tau_max + 1)
            .map(|j| {
                let idx = start + j as isize;
                if idx >= 0 && (idx as usize) < wav.len() {
                    wav[idx as usize]
                } else {
                    0.0
                }
            })
            .collect()
    }

    fn is_silent(&self, segment: &[f32]) -> bool {
        let window = &segment[..self.tau_max];
        window.iter().map(|x| x * x).sum::<f32>() / (window.len() as f32) < SILENCE_POWER
    }
}

struct AutocorrelationF0 {
    framing: Framing,
    voicing_threshold: f32,
}

impl AutocorrelationF0 {
    fn frame_f0(&self, segment: &[f32]) -> f32 {
        let f = &self.framing;
        if f.is_silent(segment) {
            return 0.0;
        }

        let w = f.tau_max;
        let corr = |tau: usize| -> f32 {
            let (mut xy, mut xx, mut yy) = (0.0f32, 0.0f32, 0.0f32);
            for j in 0..w {
                let x = segment[j];
                let y = segment[j + tau];
                xy += x * y;
                xx += x * x;
                yy += y * y;
            }
            let denom = (xx * yy).sqrt();
            if denom > 0.0 { xy / denom } else { 0.0 }
        };

        let scores: Vec<f32> = (f.tau_min..=f.tau_max).map(corr).collect();
        let peak = scores.iter().copied().fold(f32::MIN, f32::max);
        if peak < self.voicing_threshold {
            return 0.0;
        }

        // Shortest lag whose local peak comes close to the global one, so
        // multiples of the period never win
        let is_local_peak = |i: usize| {
            (i == 0 || scores[i] >= scores[i - 1])
                && (i + 1 == scores.len() || scores[i] >= scores[i + 1])
        };
        let Some(best) = (0..scores.len()).find(|&i| scores[i] >= 0.9 * peak && is_local_peak(i))
        else {
            return 0.0;
        };
        let peak = scores[best];

        // Parabolic refinement around the peak; lower correlation is worse here
        let refined = if best > 0 && best + 1 < scores.len() {
            best as f32 + parabolic_offset(-scores[best - 1], -peak, -scores[best + 1])
        } else {
            best as f32
        };
        f.sampling_rate as f32 / (f.tau_min as f32 + refined)
    }
}

impl F0Predictor for AutocorrelationF0 {
    fn compute_f0_uv(&self, wav: &[f32]) -> Result<(Vec<f32>, Vec<f32>)> {
        let n_frames = self.framing.n_frames(wav)?;
        let f0: Vec<f32> = (0..n_frames)
            .map(|i| self.frame_f0(&self.framing.segment(wav, i)))
            .collect();
        Ok(interpolate_f0(&f0))
    }
}

struct YinF0 {
    framing: Framing,
    threshold: f32,
    median_window: usize,
}

impl YinF0 {
    fn frame_f0(&self, segment: &[f32]) -> f32 {
        let f = &self.framing;
        if f.is_silent(segment) {
            return 0.0;
        }

        let w = f.tau_max;
        let mut cmnd = vec![1.0f32; f.tau_max + 1];
        let mut running = 0.0f32;
        for tau in 1..=f.tau_max {
            let d: f32 = (0..w)
                .map(|j| {
                    let diff = segment[j] - segment[j + tau];
                    diff * diff
                })
                .sum();
            running += d;
            cmnd[tau] = if running > 0.0 { d * tau as f32 / running } else { 1.0 };
        }

        let mut tau = f.tau_min;
        while tau <= f.tau_max {
            if cmnd[tau] < self.threshold {
                while tau + 1 <= f.tau_max && cmnd[tau + 1] < cmnd[tau] {
                    tau += 1;
                }
                let refined = if tau > 1 && tau < f.tau_max {
                    tau as f32 + parabolic_offset(cmnd[tau - 1], cmnd[tau], cmnd[tau + 1])
                } else {
                    tau as f32
                };
                return f.sampling_rate as f32 / refined;
            }
            tau += 1;
        }
        0.0
    }
}

impl F0Predictor for YinF0 {
    fn compute_f0_uv(&self, wav: &[f32]) -> Result<(Vec<f32>, Vec<f32>)> {
        let n_frames = self.framing.n_frames(wav)?;
        let mut f0: Vec<f32> = (0..n_frames)
            .map(|i| self.frame_f0(&self.framing.segment(wav, i)))
            .collect();
        if self.median_window > 1 {
            f0 = median_smooth_voiced(&f0, self.median_window);
        }
        Ok(interpolate_f0(&f0))
    }
}

/// Vertex offset of the parabola through three equally spaced points, in [-0.5, 0.5]
fn parabolic_offset(left: f32, center: f32, right: f32) -> f32 {
    let denom = left - 2.0 * center + right;
    if denom.abs() < f32::EPSILON {
        return 0.0;
    }
    (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
}

/// Median filter over voiced frames only; unvoiced frames stay 0
fn median_smooth_voiced(f0: &[f32], window: usize) -> Vec<f32> {
    let half = window / 2;
    (0..f0.len())
        .map(|i| {
            if f0[i] <= 0.0 {
                return 0.0;
            }
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(f0.len());
            let mut voiced: Vec<f32> = f0[lo..hi].iter().copied().filter(|v| *v > 0.0).collect();
            voiced.sort_by(f32::total_cmp);
            voiced[voiced.len() / 2]
        })
        .collect()
}

/// Fill unvoiced frames by linear interpolation and derive the voicing mask
///
/// Leading and trailing gaps hold the nearest voiced value; an entirely
/// unvoiced track stays at zero.
pub fn interpolate_f0(f0: &[f32]) -> (Vec<f32>, Vec<f32>) {
    let uv: Vec<f32> = f0.iter().map(|v| if *v > 0.0 { 1.0 } else { 0.0 }).collect();
    let voiced: Vec<usize> = (0..f0.len()).filter(|&i| f0[i] > 0.0).collect();

    let (Some(&first), Some(&last)) = (voiced.first(), voiced.last()) else {
        return (vec![0.0; f0.len()], uv);
    };

    let mut out = f0.to_vec();
    out[..first].fill(f0[first]);
    out[last + 1..].fill(f0[last]);
    for pair in voiced.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        for i in a + 1..b {
            let t = (i - a) as f32 / (b - a) as f32;
            out[i] = f0[a] + t * (f0[b] - f0[a]);
        }
    }
    (out, uv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, sr: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / sr as f32).sin())
            .collect()
    }

    fn assert_tracks(method: F0Method, freq: f32) {
        let predictor = f0_predictor(method, 16000, 160);
        let (f0, uv) = predictor.compute_f0_uv(&sine(freq, 16000, 8000)).unwrap();
        assert_eq!(f0.len(), 50);
        assert_eq!(uv.len(), 50);
        // Skip edge frames whose window runs off the signal
        for (i, value) in f0.iter().enumerate().take(45).skip(5) {
            assert_eq!(uv[i], 1.0, "{method}: frame {i} unvoiced");
            assert!(
                (value - freq).abs() / freq < 0.03,
                "{method}: frame {i} estimated {value} Hz for {freq} Hz"
            );
        }
    }

    #[test]
    fn test_pm_tracks_sine() {
        assert_tracks(F0Method::Pm, 220.0);
    }

    #[test]
    fn test_dio_tracks_sine() {
        assert_tracks(F0Method::Dio, 220.0);
    }

    #[test]
    fn test_harvest_tracks_sine() {
        assert_tracks(F0Method::Harvest, 330.0);
    }

    #[test]
    fn test_silence_is_unvoiced() {
        for method in [F0Method::Pm, F0Method::Dio, F0Method::Harvest] {
            let (f0, uv) = f0_predictor(method, 16000, 160)
                .compute_f0_uv(&vec![0.0; 3200])
                .unwrap();
            assert_eq!(f0.len(), 20);
            assert!(f0.iter().all(|v| *v == 0.0));
            assert!(uv.iter().all(|v| *v == 0.0));
        }
    }

    #[test]
    fn test_interpolate_f0() {
        let (f0, uv) = interpolate_f0(&[0.0, 100.0, 0.0, 0.0, 160.0, 0.0]);
        assert_eq!(f0, vec![100.0, 100.0, 120.0, 140.0, 160.0, 160.0]);
        assert_eq!(uv, vec![0.0, 1.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_method_names() {
        assert_eq!("Harvest".parse::<F0Method>().unwrap(), F0Method::Harvest);
        assert_eq!(F0Method::default(), F0Method::Dio);
        assert!("crepe".parse::<F0Method>().is_err());
    }
}
