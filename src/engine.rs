// 引擎模块
//
// 进程启动时构造一次，持有索引句柄、数据集管理器与匹配器，显式传给各个请求处理函数。

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use crate::audio::decoder::{self, DecodedAudio};
use crate::audio::fingerprint::Fingerprinter;
use crate::audio::format::AudioFormat;
use crate::config::AppConfig;
use crate::error::AppResult;
use crate::index::FingerprintIndex;
use crate::library::{DatasetManager, IngestReport, RebuildReport};
use crate::matcher::{MatchReport, Matcher};
use crate::utils::{check_deadline, TrackRecord};

/// 音频识别引擎
pub struct Engine {
    index: Arc<FingerprintIndex>,
    fingerprinter: Fingerprinter,
    matcher: Matcher,
    library: DatasetManager,
    default_timeout: Option<Duration>,
}

impl Engine {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        config.validate()?;

        let index = Arc::new(FingerprintIndex::open(&config.storage.index_path())?);
        let fingerprinter = Fingerprinter::new(config.fingerprint.clone())?;
        let matcher = Matcher::new(
            index.clone(),
            config.matching.clone(),
            config.fingerprint.seconds_per_offset(),
        );
        let library = DatasetManager::new(
            index.clone(),
            fingerprinter.clone(),
            config.ingest.clone(),
            config.storage.dataset_dir.clone(),
        );

        if let Some(reason) = index.corruption() {
            warn!("[ENGINE] 索引处于损坏状态，查询前需要 rebuild: {}", reason);
        }
        info!(
            "[ENGINE] 引擎已启动: 曲目={}, 指纹={}",
            index.track_count(),
            index.len()
        );

        Ok(Self {
            index,
            fingerprinter,
            matcher,
            library,
            default_timeout: config.matching.query_timeout_ms.map(Duration::from_millis),
        })
    }

    pub fn index(&self) -> &Arc<FingerprintIndex> {
        &self.index
    }

    pub fn library(&self) -> &DatasetManager {
        &self.library
    }

    // ==================== 查询 ====================

    /// 查询音频文件；timeout 为 None 时使用配置中的默认超时
    pub fn query_file(&self, path: &Path, timeout: Option<Duration>) -> AppResult<MatchReport> {
        let start = Instant::now();
        let deadline = self.deadline(start, timeout);
        AudioFormat::from_path(path)?;
        let decoded = decoder::decode_file(path)?;
        self.query_decoded(decoded, start, deadline)
    }

    /// 查询内存中的音频数据
    pub fn query_bytes(&self, bytes: Vec<u8>, filename: &str, timeout: Option<Duration>) -> AppResult<MatchReport> {
        let start = Instant::now();
        let deadline = self.deadline(start, timeout);
        let format = AudioFormat::from_path(Path::new(filename))?;
        let decoded = decoder::decode_bytes(bytes, format)?;
        self.query_decoded(decoded, start, deadline)
    }

    /// 查询已解码的单声道 PCM（SAMPLE_RATE）
    pub fn query_samples(&self, samples: &[f32], timeout: Option<Duration>) -> AppResult<MatchReport> {
        let start = Instant::now();
        let deadline = self.deadline(start, timeout);
        self.match_samples(samples, start, deadline)
    }

    fn query_decoded(
        &self,
        decoded: DecodedAudio,
        start: Instant,
        deadline: Option<Instant>,
    ) -> AppResult<MatchReport> {
        debug!("[ENGINE] 查询音频: 时长 {:.2}s", decoded.duration());
        self.match_samples(&decoded.samples, start, deadline)
    }

    fn match_samples(
        &self,
        samples: &[f32],
        start: Instant,
        deadline: Option<Instant>,
    ) -> AppResult<MatchReport> {
        // 解码本身不可中断，结束后立即检查一次
        check_deadline(deadline, "解码")?;
        let tokens = self.fingerprinter.extract_until(samples, deadline)?;

        let mut report = self.matcher.find_matches_until(&tokens, deadline)?;
        // 对外报告整个查询调用的耗时
        report.execution_time = start.elapsed();
        Ok(report)
    }

    fn deadline(&self, start: Instant, timeout: Option<Duration>) -> Option<Instant> {
        timeout.or(self.default_timeout).map(|t| start + t)
    }

    // ==================== 数据集 ====================

    pub fn ingest_file(&self, path: &Path) -> AppResult<TrackRecord> {
        self.library.ingest_file(path)
    }

    pub fn ingest_bytes(&self, bytes: Vec<u8>, filename: &str) -> AppResult<TrackRecord> {
        self.library.ingest_bytes(bytes, filename)
    }

    pub fn ingest_dir(&self, dir: &Path) -> AppResult<IngestReport> {
        self.library.ingest_dir(dir)
    }

    pub fn list(&self) -> Vec<TrackRecord> {
        self.library.list()
    }

    pub fn remove(&self, id: &str) -> AppResult<bool> {
        self.library.remove(id)
    }

    pub fn rebuild(&self) -> AppResult<RebuildReport> {
        self.library.rebuild()
    }

    /// 核对持久化存储与内存索引；发现不一致时索引进入损坏状态
    pub fn verify(&self) -> AppResult<()> {
        self.index.verify()?;
        debug!(
            "[ENGINE] 索引校验通过: 曲目={}, 指纹={}",
            self.index.track_count(),
            self.index.len()
        );
        Ok(())
    }
}
