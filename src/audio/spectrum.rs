// 频谱分析：分帧、加窗、FFT 幅度谱、逐帧峰值提取

use std::f32::consts::PI;
use std::sync::Arc;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use crate::config::FingerprintConfig;

/// 单帧中的一个频谱峰值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub bin: u16,
    pub magnitude: f32,
}

/// 可复用的逐帧频谱分析器（FFT 计划与缓冲区只分配一次）
pub struct SpectrumAnalyzer {
    config: FingerprintConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
}

impl SpectrumAnalyzer {
    pub fn new(config: &FingerprintConfig) -> Self {
        let n = config.frame_size;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Self {
            config: config.clone(),
            fft,
            window: hann_window(n),
            buffer: vec![Complex::new(0.0, 0.0); n],
            scratch,
            magnitudes: vec![0.0; n / 2 + 1],
        }
    }

    /// 缓冲区能切出的完整帧数；不足一帧时为 0
    pub fn frame_count(&self, len: usize) -> usize {
        frame_count(len, self.config.frame_size, self.config.hop_size)
    }

    /// 第 index 帧的峰值
    pub fn frame_peaks(&mut self, samples: &[f32], index: usize) -> Vec<Peak> {
        let start = index * self.config.hop_size;
        let frame = &samples[start..start + self.config.frame_size];
        self.compute_magnitudes(frame);
        pick_peaks(&self.magnitudes, &self.config)
    }

    fn compute_magnitudes(&mut self, frame: &[f32]) {
        for ((slot, &sample), &w) in self.buffer.iter_mut().zip(frame).zip(&self.window) {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);
        for (mag, c) in self.magnitudes.iter_mut().zip(&self.buffer) {
            *mag = c.norm();
        }
    }
}

pub fn frame_count(len: usize, frame_size: usize, hop_size: usize) -> usize {
    if len < frame_size {
        0
    } else {
        (len - frame_size) / hop_size + 1
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    let n = size as f32;
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (n - 1.0)).cos()))
        .collect()
}

/// 从幅度谱中选出最强的 peaks_per_frame 个局部极大值，按频点升序返回
///
/// 峰值需满足：幅度 ≥ 本帧最大幅度 × relative_threshold，且在 ±peak_neighborhood
/// 频点内最大（平台取最左侧频点）。门限随帧能量缩放，因此结果与整体增益无关；
/// 最大幅度低于 silence_floor 的帧视为静音。
pub fn pick_peaks(magnitudes: &[f32], config: &FingerprintConfig) -> Vec<Peak> {
    let upper = config.max_bin.min(magnitudes.len());
    if config.min_bin >= upper {
        return Vec::new();
    }

    let loudest = magnitudes[config.min_bin..upper]
        .iter()
        .fold(0.0f32, |m, &v| m.max(v));
    if loudest <= config.silence_floor || loudest <= 0.0 {
        return Vec::new();
    }
    let threshold = loudest * config.relative_threshold;

    let reach = config.peak_neighborhood;
    let mut peaks = Vec::new();

    for bin in config.min_bin..upper {
        let value = magnitudes[bin];
        if value < threshold || value <= 0.0 {
            continue;
        }

        let lo = bin.saturating_sub(reach);
        let hi = (bin + reach).min(magnitudes.len() - 1);
        let left_ok = magnitudes[lo..bin].iter().all(|&m| m < value);
        let right_ok = magnitudes[bin + 1..=hi].iter().all(|&m| m <= value);

        if left_ok && right_ok {
            peaks.push(Peak {
                bin: bin as u16,
                magnitude: value,
            });
        }
    }

    peaks.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude).then(a.bin.cmp(&b.bin)));
    peaks.truncate(config.peaks_per_frame);
    peaks.sort_by_key(|p| p.bin);
    peaks
}
