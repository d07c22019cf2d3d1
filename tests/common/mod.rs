// 集成测试公共工具：合成曲目、写 WAV、构造引擎

#![allow(dead_code)]

use std::f32::consts::PI;
use std::path::{Path, PathBuf};
use audiomatch::config::{AppConfig, IngestConfig, SAMPLE_RATE};
use audiomatch::Engine;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

struct Note {
    start: f32,
    freqs: [f32; 3],
}

/// 由随机音符序列组成的合成曲目，可以按任意采样率、任意起点渲染
pub struct Song {
    notes: Vec<Note>,
    pub seconds: f32,
}

impl Song {
    pub fn random(seed: u64, seconds: f32) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut notes = Vec::new();
        let mut t = 0.0;
        while t < seconds {
            let base = rng.random_range(200.0..1400.0);
            notes.push(Note {
                start: t,
                freqs: [
                    base,
                    base * rng.random_range(1.3..2.1),
                    rng.random_range(1500.0..4500.0),
                ],
            });
            t += rng.random_range(0.12..0.35);
        }
        Self { notes, seconds }
    }

    /// 渲染 [from, from + len) 秒
    pub fn render(&self, rate: u32, from: f32, len: f32) -> Vec<f32> {
        let total = (len * rate as f32) as usize;
        let first = (from * rate as f32).round() as usize;
        (first..first + total)
            .map(|i| {
                let t = i as f32 / rate as f32;
                let idx = self.notes.partition_point(|n| n.start <= t).saturating_sub(1);
                let f = self.notes[idx].freqs;
                0.25 * (2.0 * PI * f[0] * t).sin()
                    + 0.15 * (2.0 * PI * f[1] * t).sin()
                    + 0.10 * (2.0 * PI * f[2] * t).sin()
            })
            .collect()
    }

    pub fn render_all(&self) -> Vec<f32> {
        self.render(SAMPLE_RATE, 0.0, self.seconds)
    }
}

/// 叠加均匀白噪声
pub fn add_noise(samples: &[f32], amplitude: f32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    samples
        .iter()
        .map(|s| s + rng.random_range(-amplitude..amplitude))
        .collect()
}

/// 写 16 位单声道 WAV
pub fn write_wav(path: &Path, samples: &[f32], rate: u32) -> PathBuf {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample((s.clamp(-1.0, 1.0) * 32767.0) as i16).unwrap();
    }
    writer.finalize().unwrap();
    path.to_path_buf()
}

pub fn config(root: &Path, dataset_dir: Option<PathBuf>) -> AppConfig {
    let mut config = AppConfig::default();
    config.storage.data_dir = root.join("data");
    config.storage.dataset_dir = dataset_dir;
    config.ingest = IngestConfig { worker_threads: 2 };
    config
}

pub fn engine(root: &Path) -> Engine {
    Engine::new(&config(root, None)).unwrap()
}
