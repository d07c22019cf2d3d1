// 数据集管理模块
//
// 负责曲目目录与索引写入：解码 → 提取 → 以替换方式写入索引。
// 解码或提取失败时不会登记任何内容；目录入库时解码/提取在线程池中并行，
// 结果经 channel 交给唯一的写入线程依次提交。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use crate::audio::decoder::{self, DecodedAudio};
use crate::audio::fingerprint::{compute_fingerprint_hash, Fingerprinter, FingerprintToken};
use crate::audio::format::AudioFormat;
use crate::config::IngestConfig;
use crate::error::{AppError, AppResult, ErrorKind};
use crate::index::{AddMode, FingerprintIndex};
use crate::utils::{normalize_track_id, now_timestamp, TrackRecord};

/// 单个文件的失败信息
#[derive(Debug, Clone, Serialize)]
pub struct FailedFile {
    pub filename: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl FailedFile {
    pub fn new(filename: impl Into<String>, error: &AppError) -> Self {
        Self {
            filename: filename.into(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// 批量入库结果；每个文件单独成功或失败
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub ingested: Vec<TrackRecord>,
    pub failed: Vec<FailedFile>,
}

/// rebuild 结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildReport {
    /// 成功重新入库的曲目 id
    pub ingested: Vec<String>,
    pub failed: Vec<FailedFile>,
}

/// 解码+提取完成、尚未写入索引的曲目
struct PreparedTrack {
    record: TrackRecord,
    tokens: Vec<FingerprintToken>,
}

/// 数据集管理器，索引的唯一写入方
pub struct DatasetManager {
    index: Arc<FingerprintIndex>,
    fingerprinter: Fingerprinter,
    ingest: IngestConfig,
    dataset_dir: Option<PathBuf>,
}

impl DatasetManager {
    pub fn new(
        index: Arc<FingerprintIndex>,
        fingerprinter: Fingerprinter,
        ingest: IngestConfig,
        dataset_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            index,
            fingerprinter,
            ingest,
            dataset_dir,
        }
    }

    pub fn dataset_dir(&self) -> Option<&Path> {
        self.dataset_dir.as_deref()
    }

    /// 入库单个文件（替换同 id 的旧曲目）
    pub fn ingest_file(&self, path: &Path) -> AppResult<TrackRecord> {
        let prepared = self.prepare_file(path)?;
        self.commit(prepared)
    }

    /// 入库内存中的音频数据，格式取自已校验的文件名
    pub fn ingest_bytes(&self, bytes: Vec<u8>, filename: &str) -> AppResult<TrackRecord> {
        let format = AudioFormat::from_path(Path::new(filename))?;
        let id = normalize_track_id(filename)?;
        let decoded = decoder::decode_bytes(bytes, format)?;
        let prepared = self.prepare(id, display_name(filename), None, decoded);
        self.commit(prepared)
    }

    /// 入库目录下所有白名单内的音频文件
    pub fn ingest_dir(&self, dir: &Path) -> AppResult<IngestReport> {
        let files = collect_audio_files(dir)?;
        info!("[LIBRARY] 目录 {} 中发现 {} 个音频文件", dir.display(), files.len());
        self.ingest_paths(files)
    }

    /// 所有曲目记录
    pub fn list(&self) -> Vec<TrackRecord> {
        self.index.tracks()
    }

    /// 删除曲目；不存在时不是错误，返回 false
    pub fn remove(&self, id: &str) -> AppResult<bool> {
        let removed = self.index.remove(id)?;
        if removed {
            info!("[LIBRARY] 已删除曲目: {}", id);
        } else {
            debug!("[LIBRARY] 删除的曲目不存在: {}", id);
        }
        Ok(removed)
    }

    /// 清空索引并重新扫描全部来源
    ///
    /// 来源为数据集目录（如已配置）以及已知曲目中仍然存在的源文件。
    pub fn rebuild(&self) -> AppResult<RebuildReport> {
        let mut sources = Vec::new();
        if let Some(dir) = &self.dataset_dir {
            if dir.is_dir() {
                sources.extend(collect_audio_files(dir)?);
            } else {
                warn!("[LIBRARY] 数据集目录不存在，跳过: {}", dir.display());
            }
        }
        for path in self.index.known_sources() {
            if path.is_file() {
                sources.push(path);
            } else {
                warn!("[LIBRARY] 源文件已不存在，rebuild 后将不再包含: {}", path.display());
            }
        }

        // 同一文件可能同时来自两处
        let mut seen = HashSet::new();
        sources.retain(|p| seen.insert(p.canonicalize().unwrap_or_else(|_| p.clone())));

        info!("[LIBRARY] 开始重建索引: {} 个来源文件", sources.len());
        self.index.clear()?;
        let report = self.ingest_paths(sources)?;

        info!(
            "[LIBRARY] 重建完成: 成功={}, 失败={}",
            report.ingested.len(),
            report.failed.len()
        );
        Ok(RebuildReport {
            ingested: report.ingested.into_iter().map(|r| r.id).collect(),
            failed: report.failed,
        })
    }

    /// 并行解码/提取，单线程写入
    fn ingest_paths(&self, mut files: Vec<PathBuf>) -> AppResult<IngestReport> {
        let mut report = IngestReport::default();
        if files.is_empty() {
            return Ok(report);
        }

        // 同一批次里规范化后 id 相同的文件只保留第一个
        files.sort();
        let mut ids = HashSet::new();
        files.retain(|path| {
            let name = file_name_of(path);
            match normalize_track_id(&name) {
                Ok(id) if ids.insert(id.clone()) => true,
                Ok(id) => {
                    let error = AppError::DuplicateTrack(id);
                    warn!("[LIBRARY] 跳过 {}: {}", path.display(), error);
                    report.failed.push(FailedFile::new(name, &error));
                    false
                }
                Err(error) => {
                    report.failed.push(FailedFile::new(name, &error));
                    false
                }
            }
        });

        let threads = self.ingest.effective_threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("ingest-{}", i))
            .build()
            .map_err(|e| AppError::Task(format!("创建入库线程池失败: {}", e)))?;

        let (tx, rx) = crossbeam_channel::bounded::<(PathBuf, AppResult<PreparedTrack>)>(threads * 2);

        let committed = std::thread::scope(|scope| {
            let writer = scope.spawn(move || {
                let mut ingested = Vec::new();
                let mut failed = Vec::new();
                for (path, prepared) in rx {
                    match prepared.and_then(|p| self.commit(p)) {
                        Ok(record) => ingested.push(record),
                        Err(e) => {
                            warn!("[LIBRARY] 入库失败 {}: {}", path.display(), e);
                            failed.push(FailedFile::new(file_name_of(&path), &e));
                        }
                    }
                }
                (ingested, failed)
            });

            pool.install(|| {
                use rayon::prelude::*;
                files.par_iter().for_each_with(tx, |tx, path| {
                    let prepared = self.prepare_file(path);
                    if tx.send((path.clone(), prepared)).is_err() {
                        warn!("[LIBRARY] 写入线程已退出，丢弃 {}", path.display());
                    }
                });
            });

            writer.join()
        });

        let (ingested, failed) =
            committed.map_err(|_| AppError::Task("入库写入线程异常退出".to_string()))?;
        report.ingested = ingested;
        report.failed.extend(failed);
        report.ingested.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(report)
    }

    fn prepare_file(&self, path: &Path) -> AppResult<PreparedTrack> {
        AudioFormat::from_path(path)?;
        let name = file_name_of(path);
        let id = normalize_track_id(&name)?;
        let decoded = decoder::decode_file(path)?;
        let source = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf())
            .to_string_lossy()
            .to_string();
        Ok(self.prepare(id, name, Some(source), decoded))
    }

    fn prepare(
        &self,
        id: String,
        filename: String,
        source_path: Option<String>,
        decoded: DecodedAudio,
    ) -> PreparedTrack {
        let tokens = self.fingerprinter.extract(&decoded.samples);
        if tokens.is_empty() {
            warn!("[LIBRARY] {} 没有产生任何指纹（静音或过短），查询将无法命中", filename);
        }

        let record = TrackRecord {
            id,
            filename,
            source_path,
            duration: decoded.duration(),
            fingerprint_count: tokens.len(),
            content_hash: compute_fingerprint_hash(&tokens),
            created_at: now_timestamp(),
        };
        PreparedTrack { record, tokens }
    }

    fn commit(&self, prepared: PreparedTrack) -> AppResult<TrackRecord> {
        let PreparedTrack { record, tokens } = prepared;

        if !tokens.is_empty() {
            if let Some(twin) = self
                .index
                .tracks()
                .into_iter()
                .find(|t| t.content_hash == record.content_hash && t.id != record.id)
            {
                info!("[LIBRARY] {} 与已入库的 {} 内容相同", record.id, twin.id);
            }
        }

        self.index.add(record.clone(), &tokens, AddMode::Replace)?;
        info!(
            "[LIBRARY] 入库完成: {} (时长 {:.1}s, {} 条指纹)",
            record.id, record.duration, record.fingerprint_count
        );
        Ok(record)
    }
}

/// 收集目录下所有白名单内的音频文件（按路径排序）
pub fn collect_audio_files(dir: &Path) -> AppResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(AppError::NotFound(format!("文件夹不存在: {}", dir.display())));
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && AudioFormat::is_supported(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    Ok(files)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// 上传的文件名可能带有客户端目录
fn display_name(filename: &str) -> String {
    file_name_of(Path::new(filename.trim()))
}
