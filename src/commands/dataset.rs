// 数据集命令

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use serde::Serialize;
use tracing::{info, warn};
use crate::commands::run_blocking;
use crate::engine::Engine;
use crate::error::AppResult;
use crate::library::{FailedFile, IngestReport, RebuildReport};

/// 上传的单个文件
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// 批量上传结果
#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub message: String,
    /// 成功入库的文件名
    pub files: Vec<String>,
    pub failed: Vec<FailedFile>,
}

/// 删除结果
#[derive(Debug, Clone, Serialize)]
pub struct RemoveResponse {
    pub track: String,
    pub removed: bool,
}

/// 批量上传数据集文件，逐个入库，单个失败不影响其他文件
///
/// 配置了数据集目录时，入库成功的文件同时保存到该目录，供 rebuild 使用。
pub async fn upload_dataset(engine: Arc<Engine>, files: Vec<UploadFile>) -> AppResult<UploadResponse> {
    run_blocking(move || {
        let mut accepted = Vec::new();
        let mut failed = Vec::new();

        for file in files {
            let UploadFile { filename, bytes } = file;
            let keep = engine.library().dataset_dir().map(|dir| (dir.to_path_buf(), bytes.clone()));

            match engine.ingest_bytes(bytes, &filename) {
                Ok(record) => {
                    if let Some((dir, bytes)) = keep {
                        persist_upload(&dir, &record.filename, &bytes);
                    }
                    accepted.push(record.filename);
                }
                Err(e) => {
                    warn!("[DATASET] 上传文件入库失败 {}: {}", filename, e);
                    failed.push(FailedFile::new(filename, &e));
                }
            }
        }

        let message = if failed.is_empty() {
            format!("已入库 {} 个文件", accepted.len())
        } else {
            format!("已入库 {} 个文件，{} 个失败", accepted.len(), failed.len())
        };
        info!("[DATASET] {}", message);

        Ok(UploadResponse {
            message,
            files: accepted,
            failed,
        })
    })
    .await
}

/// 入库本地文件
pub async fn ingest_files(engine: Arc<Engine>, paths: Vec<String>) -> AppResult<IngestReport> {
    run_blocking(move || {
        let mut report = IngestReport::default();
        for path in paths {
            let path = PathBuf::from(path);
            match engine.ingest_file(&path) {
                Ok(record) => report.ingested.push(record),
                Err(e) => {
                    warn!("[DATASET] 入库失败 {}: {}", path.display(), e);
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| path.to_string_lossy().to_string());
                    report.failed.push(FailedFile::new(name, &e));
                }
            }
        }
        Ok(report)
    })
    .await
}

/// 入库整个目录
pub async fn ingest_directory(engine: Arc<Engine>, dir: String) -> AppResult<IngestReport> {
    run_blocking(move || engine.ingest_dir(Path::new(&dir))).await
}

/// 已入库的文件名（按曲目 id 排序），不包含指纹数据
pub async fn list_dataset(engine: Arc<Engine>) -> AppResult<Vec<String>> {
    Ok(engine.list().into_iter().map(|r| r.filename).collect())
}

/// 删除曲目；不存在时返回 removed = false
pub async fn remove_track(engine: Arc<Engine>, id: String) -> AppResult<RemoveResponse> {
    let track = id.clone();
    let removed = run_blocking(move || engine.remove(&id)).await?;
    Ok(RemoveResponse { track, removed })
}

/// 索引校验结果
#[derive(Debug, Clone, Serialize)]
pub struct VerifyResponse {
    pub ok: bool,
    pub tracks: usize,
    pub fingerprints: usize,
}

/// 校验索引；不一致时返回 IndexCorruption，需要 rebuild 才能恢复
pub async fn verify_index(engine: Arc<Engine>) -> AppResult<VerifyResponse> {
    run_blocking(move || {
        engine.verify()?;
        Ok(VerifyResponse {
            ok: true,
            tracks: engine.index().track_count(),
            fingerprints: engine.index().len(),
        })
    })
    .await
}

/// 重建索引
pub async fn rebuild_dataset(engine: Arc<Engine>) -> AppResult<RebuildReport> {
    run_blocking(move || engine.rebuild()).await
}

fn persist_upload(dir: &Path, filename: &str, bytes: &[u8]) {
    let Some(name) = Path::new(filename).file_name() else {
        return;
    };
    let target = dir.join(name);
    let result = fs::create_dir_all(dir).and_then(|_| fs::write(&target, bytes));
    if let Err(e) = result {
        warn!("[DATASET] 保存上传文件失败 {}: {}", target.display(), e);
    }
}
