// 音频指纹模块
//
// 将 PCM 采样转换为有序的指纹令牌序列：逐帧取频谱峰值，锚点峰值与后续
// target_zone 帧内的目标峰值配对，把 (f1, f2, Δt) 打包成 32 位哈希，
// 并标记锚点所在帧号作为偏移量。令牌只编码相对结构，因此与整体增益无关。

use std::collections::VecDeque;
use std::time::Instant;
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Digest};
use tracing::debug;
use crate::audio::spectrum::{Peak, SpectrumAnalyzer};
use crate::config::FingerprintConfig;
use crate::error::{AppError, AppResult};
use crate::utils::deadline_passed;

/// 哈希中每个频点字段的位宽
pub const FREQ_BITS: u32 = 10;
/// 哈希中时间差字段的位宽
pub const DELTA_BITS: u32 = 12;

const FREQ_MASK: u32 = (1 << FREQ_BITS) - 1;
const DELTA_MASK: u32 = (1 << DELTA_BITS) - 1;

/// 每分析这么多帧检查一次截止时间
const DEADLINE_CHECK_FRAMES: usize = 64;

/// 指纹令牌：哈希 + 锚点帧偏移
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FingerprintToken {
    pub hash: u32,
    pub offset: u32,
}

/// 打包 (f1, f2, Δt)：高 10 位 f1，中 10 位 f2，低 12 位 Δt
pub fn pack_hash(f1: u16, f2: u16, delta: u32) -> u32 {
    ((f1 as u32 & FREQ_MASK) << (FREQ_BITS + DELTA_BITS))
        | ((f2 as u32 & FREQ_MASK) << DELTA_BITS)
        | (delta & DELTA_MASK)
}

pub fn unpack_hash(hash: u32) -> (u16, u16, u32) {
    (
        ((hash >> (FREQ_BITS + DELTA_BITS)) & FREQ_MASK) as u16,
        ((hash >> DELTA_BITS) & FREQ_MASK) as u16,
        hash & DELTA_MASK,
    )
}

/// 指纹提取器
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    config: FingerprintConfig,
}

impl Fingerprinter {
    pub fn new(config: FingerprintConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FingerprintConfig {
        &self.config
    }

    /// 惰性令牌序列；每次调用都重新计算
    pub fn fingerprints<'a>(&self, samples: &'a [f32]) -> Fingerprints<'a> {
        let analyzer = SpectrumAnalyzer::new(&self.config);
        let total_frames = analyzer.frame_count(samples.len());
        Fingerprints {
            samples,
            analyzer,
            config: self.config.clone(),
            next_frame: 0,
            total_frames,
            window: VecDeque::with_capacity(self.config.target_zone + 1),
            pending: VecDeque::new(),
            deadline: None,
            timed_out: false,
        }
    }

    /// 提取全部令牌
    pub fn extract(&self, samples: &[f32]) -> Vec<FingerprintToken> {
        let tokens: Vec<FingerprintToken> = self.fingerprints(samples).collect();
        debug!(
            "[FINGERPRINT] 提取完成: 采样={}, 令牌={}",
            samples.len(),
            tokens.len()
        );
        tokens
    }

    /// 提取全部令牌，超过 deadline 时返回 Timeout
    pub fn extract_until(
        &self,
        samples: &[f32],
        deadline: Option<Instant>,
    ) -> AppResult<Vec<FingerprintToken>> {
        let mut iter = self.fingerprints(samples).until(deadline);
        let tokens: Vec<FingerprintToken> = iter.by_ref().collect();
        if iter.timed_out() {
            return Err(AppError::Timeout(format!(
                "指纹提取阶段超过截止时间: 已分析 {}/{} 帧",
                iter.frames_analyzed(),
                iter.total_frames
            )));
        }
        debug!(
            "[FINGERPRINT] 提取完成: 采样={}, 令牌={}",
            samples.len(),
            tokens.len()
        );
        Ok(tokens)
    }
}

/// 惰性令牌迭代器
///
/// 维护一个最多 target_zone + 1 帧的滑动窗口，队首为当前锚点帧；
/// 锚点帧的令牌全部产出后才计算下一帧的频谱。
pub struct Fingerprints<'a> {
    samples: &'a [f32],
    analyzer: SpectrumAnalyzer,
    config: FingerprintConfig,
    next_frame: usize,
    total_frames: usize,
    window: VecDeque<(u32, Vec<Peak>)>,
    pending: VecDeque<FingerprintToken>,
    deadline: Option<Instant>,
    timed_out: bool,
}

impl<'a> Fingerprints<'a> {
    /// 设置截止时间；超时后迭代提前结束，timed_out() 返回 true
    pub fn until(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// 已分析的帧数
    pub fn frames_analyzed(&self) -> usize {
        self.next_frame
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    fn fill_window(&mut self) {
        while self.window.len() <= self.config.target_zone && self.next_frame < self.total_frames {
            if self.next_frame % DEADLINE_CHECK_FRAMES == 0 && deadline_passed(self.deadline) {
                self.timed_out = true;
                self.window.clear();
                self.pending.clear();
                return;
            }
            let peaks = self.analyzer.frame_peaks(self.samples, self.next_frame);
            self.window.push_back((self.next_frame as u32, peaks));
            self.next_frame += 1;
        }
    }

    fn pair_anchor(&mut self, anchor_frame: u32, anchors: &[Peak]) {
        let zone = self.config.target_zone as u32;
        let max_df = self.config.max_freq_delta as i32;

        for anchor in anchors {
            let mut paired = 0;
            'targets: for (frame, targets) in &self.window {
                let delta = frame - anchor_frame;
                if delta > zone {
                    break;
                }
                for target in targets {
                    if (target.bin as i32 - anchor.bin as i32).abs() > max_df {
                        continue;
                    }
                    self.pending.push_back(FingerprintToken {
                        hash: pack_hash(anchor.bin, target.bin, delta),
                        offset: anchor_frame,
                    });
                    paired += 1;
                    if paired == self.config.fan_out {
                        break 'targets;
                    }
                }
            }
        }
    }
}

impl<'a> Iterator for Fingerprints<'a> {
    type Item = FingerprintToken;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.timed_out {
                return None;
            }
            if let Some(token) = self.pending.pop_front() {
                return Some(token);
            }

            self.fill_window();
            let (anchor_frame, anchors) = self.window.pop_front()?;
            // 静音帧没有峰值，也就不产生令牌
            if !anchors.is_empty() {
                self.pair_anchor(anchor_frame, &anchors);
            }
        }
    }
}

/// 计算令牌序列的 SHA256 摘要（用于识别重复入库的相同内容）
pub fn compute_fingerprint_hash(tokens: &[FingerprintToken]) -> String {
    let mut hasher = Sha256::new();
    for token in tokens {
        hasher.update(token.hash.to_le_bytes());
        hasher.update(token.offset.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}
