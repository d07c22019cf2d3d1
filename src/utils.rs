// 工具模块

use std::path::Path;
use std::time::Instant;
use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use crate::error::{AppError, AppResult};

/// 非法的 id 字符
static INVALID_ID_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[^a-z0-9._-]+").expect("固定正则表达式")
});

/// 曲目记录
///
/// 入库时创建，从数据集移除时删除；重新入库会整体替换，不做原地修改。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackRecord {
    /// 由文件名规范化得到的稳定 id
    pub id: String,
    pub filename: String,
    /// 入库时的源文件路径，rebuild 时用于重新扫描
    pub source_path: Option<String>,
    /// 时长 (秒)
    pub duration: f64,
    pub fingerprint_count: usize,
    /// 令牌序列的 SHA256 摘要
    pub content_hash: String,
    pub created_at: String,
}

/// 由文件名得到稳定的曲目 id
///
/// 去掉目录部分，转小写，连续的非法字符折叠为 `_`，首尾的 `_` 和 `.` 去掉。
pub fn normalize_track_id(filename: &str) -> AppResult<String> {
    let base = Path::new(filename.trim())
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let lowered = base.to_lowercase();
    let id = INVALID_ID_CHARS.replace_all(&lowered, "_");
    let id = id.trim_matches(|c| c == '_' || c == '.').to_string();

    if id.is_empty() {
        return Err(AppError::InvalidArgument(format!("无法从文件名生成曲目 id: {:?}", filename)));
    }
    Ok(id)
}

/// 当前本地时间字符串
pub fn now_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// 截止时间是否已过；None 表示不限时
pub fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// 查询各阶段共用的截止时间检查
pub fn check_deadline(deadline: Option<Instant>, stage: &str) -> AppResult<()> {
    if deadline_passed(deadline) {
        return Err(AppError::Timeout(format!("{}阶段超过截止时间", stage)));
    }
    Ok(())
}
