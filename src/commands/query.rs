// 查询命令

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use serde::Serialize;
use tracing::info;
use crate::commands::run_blocking;
use crate::engine::Engine;
use crate::error::AppResult;
use crate::matcher::MatchReport;

/// 单个匹配结果
#[derive(Debug, Clone, Serialize)]
pub struct MatchItem {
    pub track: String,
    pub filename: String,
    pub score: u32,
    /// 查询片段在曲目中的起始位置 (秒)
    pub offset: f64,
    pub similarity: f64,
}

/// 查询响应
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub matches: Vec<MatchItem>,
    /// 毫秒
    #[serde(rename = "executionTime")]
    pub execution_time: f64,
}

impl From<MatchReport> for QueryResponse {
    fn from(report: MatchReport) -> Self {
        let matches = report
            .matches
            .into_iter()
            .map(|m| MatchItem {
                track: m.track_id,
                filename: m.filename,
                score: m.score,
                offset: m.offset_secs,
                similarity: m.similarity,
            })
            .collect();

        Self {
            matches,
            execution_time: report.execution_time.as_micros() as f64 / 1000.0,
        }
    }
}

/// 查询已保存的音频文件；临时文件由调用方清理
pub async fn query_audio(
    engine: Arc<Engine>,
    path: String,
    timeout_ms: Option<u64>,
) -> AppResult<QueryResponse> {
    let timeout = timeout_ms.map(Duration::from_millis);
    let report = run_blocking(move || engine.query_file(&PathBuf::from(&path), timeout)).await?;
    let response = QueryResponse::from(report);
    info!(
        "[QUERY] 返回 {} 个匹配，耗时 {:.1} ms",
        response.matches.len(),
        response.execution_time
    );
    Ok(response)
}

/// 查询上传的音频数据
pub async fn query_upload(
    engine: Arc<Engine>,
    bytes: Vec<u8>,
    filename: String,
    timeout_ms: Option<u64>,
) -> AppResult<QueryResponse> {
    let timeout = timeout_ms.map(Duration::from_millis);
    let report = run_blocking(move || engine.query_bytes(bytes, &filename, timeout)).await?;
    Ok(QueryResponse::from(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::error::ErrorKind;
    use crate::matcher::MatchCandidate;

    #[test]
    fn test_response_shape() {
        let report = MatchReport {
            matches: vec![MatchCandidate {
                track_id: "a.wav".to_string(),
                filename: "A.wav".to_string(),
                score: 42,
                offset_frames: 20,
                offset_secs: 0.93,
                similarity: 61.5,
            }],
            execution_time: Duration::from_micros(12_500),
            query_tokens: 70,
        };
        let json = serde_json::to_value(QueryResponse::from(report)).unwrap();
        assert_eq!(json["matches"][0]["track"], "a.wav");
        assert_eq!(json["matches"][0]["score"], 42);
        assert_eq!(json["executionTime"], 12.5);
    }

    #[tokio::test]
    async fn test_unsupported_upload_is_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.data_dir = dir.path().to_path_buf();
        let engine = Arc::new(Engine::new(&config).unwrap());

        let err = query_upload(engine, vec![0; 16], "clip.exe".to_string(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    }
}
