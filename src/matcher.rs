// 匹配模块
//
// 对查询令牌逐个查索引，按 (曲目, 对齐差 d - q) 累计投票。真实匹配的命中集中在
// 同一个对齐差上，哈希碰撞带来的误命中则分散在各处，因此每个曲目取票数最多的
// 对齐差作为得分与偏移估计。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use serde::Serialize;
use tracing::{debug, info};
use crate::audio::fingerprint::FingerprintToken;
use crate::config::MatchConfig;
use crate::error::{AppError, AppResult};
use crate::index::FingerprintIndex;
use crate::utils::check_deadline;

/// 每处理这么多查询令牌检查一次截止时间
const DEADLINE_CHECK_INTERVAL: usize = 256;

/// 匹配候选
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MatchCandidate {
    pub track_id: String,
    pub filename: String,
    /// 最大对齐差桶的票数
    pub score: u32,
    /// 对齐差（帧）；查询片段在曲目中的起始位置
    pub offset_frames: i64,
    /// 对齐差（秒）
    pub offset_secs: f64,
    /// 0 - 100
    pub similarity: f64,
}

/// 一次匹配的结果
#[derive(Debug, Clone)]
pub struct MatchReport {
    /// 按得分降序，同分时 id 小的在前
    pub matches: Vec<MatchCandidate>,
    pub execution_time: Duration,
    pub query_tokens: usize,
}

/// 匹配器
pub struct Matcher {
    index: Arc<FingerprintIndex>,
    config: MatchConfig,
    seconds_per_offset: f64,
}

impl Matcher {
    pub fn new(index: Arc<FingerprintIndex>, config: MatchConfig, seconds_per_offset: f64) -> Self {
        Self {
            index,
            config,
            seconds_per_offset,
        }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// 不限时匹配
    pub fn find_matches(&self, tokens: &[FingerprintToken]) -> AppResult<MatchReport> {
        self.find_matches_until(tokens, None)
    }

    /// 匹配；超过 deadline 时返回 Timeout，索引不受影响
    pub fn find_matches_until(
        &self,
        tokens: &[FingerprintToken],
        deadline: Option<Instant>,
    ) -> AppResult<MatchReport> {
        let start = Instant::now();

        if tokens.is_empty() {
            debug!("[MATCHER] 查询没有令牌，返回空结果");
            return Ok(MatchReport {
                matches: Vec::new(),
                execution_time: start.elapsed(),
                query_tokens: 0,
            });
        }

        let reader = self.index.reader()?;

        // 曲目 → (对齐差 → 票数)
        let mut votes: HashMap<Arc<str>, HashMap<i64, u32>> = HashMap::new();
        let mut hits = 0usize;

        for (i, token) in tokens.iter().enumerate() {
            if i % DEADLINE_CHECK_INTERVAL == 0 {
                check_deadline(deadline, "匹配")?;
            }
            for entry in reader.entries(token.hash) {
                let delta = entry.offset as i64 - token.offset as i64;
                *votes
                    .entry(entry.track_id.clone())
                    .or_default()
                    .entry(delta)
                    .or_insert(0) += 1;
                hits += 1;
            }
        }
        check_deadline(deadline, "匹配")?;

        let query_tokens = tokens.len();
        let mut matches = Vec::new();
        for (track_id, histogram) in &votes {
            let Some((offset, score)) = modal_bin(histogram) else {
                continue;
            };
            if score < self.config.min_votes {
                continue;
            }

            // 条目引用了目录中不存在的曲目
            let record = reader.track(track_id).ok_or_else(|| {
                AppError::IndexCorruption(format!("指纹条目引用了不存在的曲目: {}", track_id))
            })?;

            matches.push(MatchCandidate {
                track_id: track_id.to_string(),
                filename: record.filename.clone(),
                score,
                offset_frames: offset,
                offset_secs: offset as f64 * self.seconds_per_offset,
                similarity: similarity(score, query_tokens),
            });
        }
        drop(reader);

        matches.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.track_id.cmp(&b.track_id)));
        matches.truncate(self.config.max_results);

        let execution_time = start.elapsed();
        info!(
            "[MATCHER] 匹配完成: 令牌={}, 命中={}, 候选曲目={}, 结果={}, 耗时={:?}",
            query_tokens,
            hits,
            votes.len(),
            matches.len(),
            execution_time
        );

        Ok(MatchReport {
            matches,
            execution_time,
            query_tokens,
        })
    }
}

/// 票数最多的对齐差；同票时取较小的对齐差，保证结果确定
fn modal_bin(histogram: &HashMap<i64, u32>) -> Option<(i64, u32)> {
    histogram
        .iter()
        .map(|(&delta, &count)| (delta, count))
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
}

fn similarity(score: u32, query_tokens: usize) -> f64 {
    if query_tokens == 0 {
        return 0.0;
    }
    (100.0 * score as f64 / query_tokens as f64).min(100.0)
}
