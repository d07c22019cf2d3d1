// 指纹索引模块
//
// 内存中的 哈希 → 条目 映射加曲目目录，整体由一把读写锁保护：查询共享读锁，
// 入库/删除独占写锁。写操作先在 SQLite 事务中落盘，成功后才一次性更新内存，
// 并发查询只会看到某个曲目写入前或写入后的完整状态。

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, error, info, warn};
use crate::audio::fingerprint::FingerprintToken;
use crate::database::Database;
use crate::error::{AppError, AppResult};
use crate::utils::TrackRecord;

/// 索引中的一条指纹
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintEntry {
    pub hash: u32,
    pub track_id: Arc<str>,
    pub offset: u32,
}

/// 写入方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddMode {
    /// id 已存在时返回 DuplicateTrack
    Insert,
    /// 先删除同 id 的旧条目再写入
    Replace,
}

struct TrackSlot {
    record: TrackRecord,
    /// 该曲目出现过的哈希（去重、有序），删除时只需访问这些桶
    hashes: Vec<u32>,
}

#[derive(Default)]
struct IndexState {
    buckets: HashMap<u32, Vec<FingerprintEntry>>,
    tracks: BTreeMap<String, TrackSlot>,
    entry_count: usize,
    corruption: Option<String>,
}

impl IndexState {
    fn detach(&mut self, id: &str) -> bool {
        let Some(slot) = self.tracks.remove(id) else {
            return false;
        };

        for hash in &slot.hashes {
            if let Some(bucket) = self.buckets.get_mut(hash) {
                let before = bucket.len();
                bucket.retain(|e| &*e.track_id != id);
                self.entry_count -= before - bucket.len();
                if bucket.is_empty() {
                    self.buckets.remove(hash);
                }
            }
        }
        true
    }

    fn attach(&mut self, record: TrackRecord, tokens: &[FingerprintToken]) {
        let key: Arc<str> = Arc::from(record.id.as_str());
        let mut hashes: Vec<u32> = tokens.iter().map(|t| t.hash).collect();
        hashes.sort_unstable();
        hashes.dedup();

        for token in tokens {
            self.buckets.entry(token.hash).or_default().push(FingerprintEntry {
                hash: token.hash,
                track_id: key.clone(),
                offset: token.offset,
            });
        }
        self.entry_count += tokens.len();
        self.tracks.insert(record.id.clone(), TrackSlot { record, hashes });
    }
}

/// 持久化指纹索引
pub struct FingerprintIndex {
    db: Database,
    state: RwLock<IndexState>,
    /// 串行化写操作，保证落盘顺序与内存更新顺序一致
    writer: Mutex<()>,
}

impl FingerprintIndex {
    /// 打开索引并把持久化数据加载到内存
    ///
    /// 数据损坏不会导致打开失败：索引进入损坏状态，查询返回 IndexCorruption，
    /// 直到调用 clear/rebuild。
    pub fn open(path: &Path) -> AppResult<Self> {
        let (db, was_reset) = Database::open_or_reset(path)?;

        let state = if was_reset {
            IndexState {
                corruption: Some("数据库文件损坏，已重新创建空库".to_string()),
                ..Default::default()
            }
        } else {
            match load_state(&db) {
                Ok(state) => state,
                Err(AppError::IndexCorruption(reason)) => {
                    error!("[INDEX] 索引数据损坏，需要重建: {}", reason);
                    IndexState {
                        corruption: Some(reason),
                        ..Default::default()
                    }
                }
                Err(e) => return Err(e),
            }
        };

        info!(
            "[INDEX] 索引已加载: 曲目={}, 指纹={}, 哈希桶={}",
            state.tracks.len(),
            state.entry_count,
            state.buckets.len()
        );

        Ok(Self {
            db,
            state: RwLock::new(state),
            writer: Mutex::new(()),
        })
    }

    /// 写入一个曲目的全部指纹
    ///
    /// record.fingerprint_count 以实际写入的令牌数为准。
    pub fn add(&self, mut record: TrackRecord, tokens: &[FingerprintToken], mode: AddMode) -> AppResult<()> {
        let _writer = self.writer.lock();

        {
            let state = self.state.read();
            if let Some(reason) = &state.corruption {
                return Err(AppError::IndexCorruption(reason.clone()));
            }
            if mode == AddMode::Insert && state.tracks.contains_key(&record.id) {
                return Err(AppError::DuplicateTrack(record.id));
            }
        }

        record.fingerprint_count = tokens.len();
        self.db.replace_track(&record, tokens)?;

        let id = record.id.clone();
        let mut state = self.state.write();
        let replaced = state.detach(&id);
        state.attach(record, tokens);
        debug!(
            "[INDEX] 写入曲目 {}: {} 条指纹{}",
            id,
            tokens.len(),
            if replaced { "（替换旧条目）" } else { "" }
        );
        Ok(())
    }

    /// 删除曲目的全部条目；id 不存在时什么也不做，返回 false
    pub fn remove(&self, id: &str) -> AppResult<bool> {
        let _writer = self.writer.lock();

        let stored = self.db.delete_track(id)?;
        let in_memory = self.state.write().detach(id);
        if stored != in_memory {
            warn!("[INDEX] 删除 {} 时内存与数据库状态不一致: 内存={}, 数据库={}", id, in_memory, stored);
        }
        Ok(stored || in_memory)
    }

    /// 查找共享同一哈希的全部条目
    pub fn lookup(&self, hash: u32) -> AppResult<Vec<FingerprintEntry>> {
        let reader = self.reader()?;
        Ok(reader.entries(hash).to_vec())
    }

    /// 获取一致的只读视图；持有期间写操作会等待
    pub fn reader(&self) -> AppResult<IndexReader<'_>> {
        let state = self.state.read();
        if let Some(reason) = &state.corruption {
            return Err(AppError::IndexCorruption(reason.clone()));
        }
        Ok(IndexReader { state })
    }

    /// 所有曲目记录（按 id 排序）
    pub fn tracks(&self) -> Vec<TrackRecord> {
        self.state
            .read()
            .tracks
            .values()
            .map(|slot| slot.record.clone())
            .collect()
    }

    pub fn track(&self, id: &str) -> Option<TrackRecord> {
        self.state.read().tracks.get(id).map(|slot| slot.record.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().tracks.contains_key(id)
    }

    pub fn track_count(&self) -> usize {
        self.state.read().tracks.len()
    }

    /// 条目总数
    pub fn len(&self) -> usize {
        self.state.read().entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 当前的损坏原因
    pub fn corruption(&self) -> Option<String> {
        self.state.read().corruption.clone()
    }

    /// 已知曲目的源文件路径，供 rebuild 重新扫描
    ///
    /// 索引损坏时内存目录为空，尽量从数据库的 tracks 表读取。
    pub fn known_sources(&self) -> Vec<PathBuf> {
        let records = {
            let state = self.state.read();
            if state.corruption.is_none() {
                state.tracks.values().map(|slot| slot.record.clone()).collect()
            } else {
                self.db.load_tracks().unwrap_or_else(|e| {
                    warn!("[INDEX] 无法从损坏的数据库读取曲目列表: {}", e);
                    Vec::new()
                })
            }
        };

        records
            .into_iter()
            .filter_map(|record| record.source_path.map(PathBuf::from))
            .collect()
    }

    /// 核对数据库与内存是否一致，不一致时把索引标记为损坏
    pub fn verify(&self) -> AppResult<()> {
        let _writer = self.writer.lock();

        let problem = match self.db.integrity_check() {
            Ok(None) => None,
            Ok(Some(problem)) => Some(problem),
            Err(AppError::IndexCorruption(reason)) => Some(reason),
            Err(e) => return Err(e),
        };
        let problem = match problem {
            Some(problem) => Some(problem),
            None => match load_state(&self.db) {
                Ok(stored) => {
                    let state = self.state.read();
                    if stored.entry_count != state.entry_count || stored.tracks.len() != state.tracks.len() {
                        Some(format!(
                            "内存与数据库不一致: 内存 {} 曲目/{} 条目，数据库 {} 曲目/{} 条目",
                            state.tracks.len(),
                            state.entry_count,
                            stored.tracks.len(),
                            stored.entry_count
                        ))
                    } else {
                        None
                    }
                }
                Err(AppError::IndexCorruption(reason)) => Some(reason),
                Err(e) => return Err(e),
            },
        };

        if let Some(reason) = problem {
            error!("[INDEX] 校验失败: {}", reason);
            self.state.write().corruption = Some(reason.clone());
            return Err(AppError::IndexCorruption(reason));
        }
        Ok(())
    }

    /// 清空索引（内存与持久化），同时清除损坏状态
    pub fn clear(&self) -> AppResult<()> {
        let _writer = self.writer.lock();

        let corrupted = self.state.read().corruption.is_some();
        if corrupted {
            self.db.reset()?;
        } else if let Err(e) = self.db.clear_all() {
            warn!("[INDEX] 清空失败，改为重置数据库: {}", e);
            self.db.reset()?;
        }

        *self.state.write() = IndexState::default();
        info!("[INDEX] 索引已清空");
        Ok(())
    }
}

/// 索引的一致只读视图
pub struct IndexReader<'a> {
    state: RwLockReadGuard<'a, IndexState>,
}

impl<'a> IndexReader<'a> {
    pub fn entries(&self, hash: u32) -> &[FingerprintEntry] {
        self.state
            .buckets
            .get(&hash)
            .map(|bucket| bucket.as_slice())
            .unwrap_or(&[])
    }

    pub fn track(&self, id: &str) -> Option<&TrackRecord> {
        self.state.tracks.get(id).map(|slot| &slot.record)
    }
}

/// 从数据库重建内存状态，并校验每个条目都引用存在的曲目
fn load_state(db: &Database) -> AppResult<IndexState> {
    if let Some(problem) = db.integrity_check()? {
        return Err(AppError::IndexCorruption(problem));
    }

    let mut grouped: BTreeMap<String, (TrackRecord, Vec<FingerprintToken>)> = db
        .load_tracks()?
        .into_iter()
        .map(|record| (record.id.clone(), (record, Vec::new())))
        .collect();

    for stored in db.load_fingerprints()? {
        let (_, tokens) = grouped.get_mut(&stored.track_id).ok_or_else(|| {
            AppError::IndexCorruption(format!("指纹引用了不存在的曲目: {}", stored.track_id))
        })?;
        tokens.push(FingerprintToken {
            hash: stored.hash,
            offset: stored.offset,
        });
    }

    let mut state = IndexState::default();
    for (id, (record, tokens)) in grouped {
        if record.fingerprint_count != tokens.len() {
            return Err(AppError::IndexCorruption(format!(
                "曲目 {} 记录 {} 条指纹，实际 {} 条",
                id,
                record.fingerprint_count,
                tokens.len()
            )));
        }
        state.attach(record, &tokens);
    }
    Ok(state)
}
