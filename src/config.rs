// 配置管理模块

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::fs;
use crate::error::{AppError, AppResult};
use tracing::{info, warn};

/// 引擎统一采样率 (Hz)，解码、提取、匹配均以此为准
pub const SAMPLE_RATE: u32 = 11025;

/// 日志级别
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    /// 转换为 tracing 过滤器字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 数据目录（索引数据库、日志）
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// 数据集目录，rebuild 时重新扫描
    #[serde(default)]
    pub dataset_dir: Option<PathBuf>,
    /// 索引数据库文件名
    #[serde(default = "default_index_file")]
    pub index_file: String,
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("audiomatch"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

fn default_index_file() -> String {
    "fingerprints.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            dataset_dir: None,
            index_file: default_index_file(),
        }
    }
}

impl StorageConfig {
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(&self.index_file)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

/// 指纹提取配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FingerprintConfig {
    /// 帧长 (采样点)
    pub frame_size: usize,
    /// 帧移 (采样点)，也是偏移量的时间单位
    pub hop_size: usize,
    /// 每帧保留的最强峰值数
    pub peaks_per_frame: usize,
    /// 峰值至少为本帧最强频点幅度的这一比例（与整体增益无关）
    pub relative_threshold: f32,
    /// 本帧最强频点低于此幅度时视为数字静音，不取峰值
    pub silence_floor: f32,
    /// 峰值必须是 ±peak_neighborhood 个频点内的最大值
    pub peak_neighborhood: usize,
    /// 参与峰值检测的最低频点（含）
    pub min_bin: usize,
    /// 参与峰值检测的最高频点（不含）
    pub max_bin: usize,
    /// 目标区宽度：锚点帧 i 与 i+1..=i+target_zone 帧配对
    pub target_zone: usize,
    /// 每个锚点最多配对的目标数
    pub fan_out: usize,
    /// 锚点与目标允许的最大频点差
    pub max_freq_delta: usize,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            frame_size: 1024,
            hop_size: 512,
            peaks_per_frame: 5,
            relative_threshold: 0.05,
            silence_floor: 1e-3,
            peak_neighborhood: 3,
            min_bin: 2,
            max_bin: 512,
            target_zone: 3,
            fan_out: 8,
            max_freq_delta: 255,
        }
    }
}

impl FingerprintConfig {
    /// 校验参数组合，避免运行时出现无意义的提取结果
    pub fn validate(&self) -> AppResult<()> {
        if self.frame_size < 16 {
            return Err(AppError::Config(format!("frame_size 过小: {}", self.frame_size)));
        }
        if self.hop_size == 0 || self.hop_size > self.frame_size {
            return Err(AppError::Config(format!(
                "hop_size 必须在 1..={} 之间: {}",
                self.frame_size, self.hop_size
            )));
        }
        if self.peaks_per_frame == 0 || self.fan_out == 0 {
            return Err(AppError::Config("peaks_per_frame 与 fan_out 必须大于 0".to_string()));
        }
        if self.min_bin >= self.max_bin || self.max_bin > self.frame_size / 2 {
            return Err(AppError::Config(format!(
                "频点范围无效: [{}, {})，上限 {}",
                self.min_bin,
                self.max_bin,
                self.frame_size / 2
            )));
        }
        // 频点与时间差需要放进哈希的 10/12 位字段
        if self.max_bin > 1 << 10 {
            return Err(AppError::Config(format!("max_bin 超出哈希位宽: {}", self.max_bin)));
        }
        if self.target_zone == 0 || self.target_zone >= 1 << 12 {
            return Err(AppError::Config(format!("target_zone 无效: {}", self.target_zone)));
        }
        if !(0.0..1.0).contains(&self.relative_threshold) {
            return Err(AppError::Config(format!(
                "relative_threshold 必须在 [0, 1) 之间: {}",
                self.relative_threshold
            )));
        }
        if !(self.silence_floor >= 0.0) {
            return Err(AppError::Config("silence_floor 不能为负".to_string()));
        }
        Ok(())
    }

    /// 一个偏移单位对应的秒数
    pub fn seconds_per_offset(&self) -> f64 {
        self.hop_size as f64 / SAMPLE_RATE as f64
    }
}

/// 匹配配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchConfig {
    /// 最小对齐命中数，低于此值的候选被丢弃
    pub min_votes: u32,
    /// 返回的最大候选数
    pub max_results: usize,
    /// 默认查询超时 (毫秒)，None 表示不限
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: Option<u64>,
}

fn default_query_timeout_ms() -> Option<u64> {
    Some(10_000)
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            min_votes: 5,
            max_results: 10,
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

/// 入库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// 并行解码/提取的线程数，0 表示使用 CPU 核数
    pub worker_threads: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { worker_threads: 0 }
    }
}

impl IngestConfig {
    pub fn effective_threads(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get()
        } else {
            self.worker_threads
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 存储配置
    #[serde(default)]
    pub storage: StorageConfig,
    /// 指纹提取配置
    #[serde(default)]
    pub fingerprint: FingerprintConfig,
    /// 匹配配置
    #[serde(default)]
    pub matching: MatchConfig,
    /// 入库配置
    #[serde(default)]
    pub ingest: IngestConfig,
    /// 日志级别
    #[serde(default)]
    pub log_level: LogLevel,
}

impl AppConfig {
    pub fn validate(&self) -> AppResult<()> {
        self.fingerprint.validate()?;
        if self.matching.min_votes == 0 {
            return Err(AppError::Config("min_votes 必须大于 0".to_string()));
        }
        Ok(())
    }
}

/// 加载配置
///
/// 文件不存在时写入默认配置；JSON 解析失败时记录警告并回退到默认配置
pub fn load_config(config_path: &Path) -> AppResult<AppConfig> {
    let config = if config_path.exists() {
        let content = fs::read_to_string(config_path)?;
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("配置文件 JSON 解析失败: {}，使用默认配置", e);
            AppConfig::default()
        })
    } else {
        let config = AppConfig::default();
        save_config(config_path, &config)?;
        config
    };

    config.validate()?;
    info!("[CONFIG] 配置已加载: {}", config_path.display());
    Ok(config)
}

/// 保存配置
pub fn save_config(config_path: &Path, config: &AppConfig) -> AppResult<()> {
    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string_pretty(config)?;
    fs::write(config_path, content)?;
    Ok(())
}
