// 数据库模块
//
// 指纹索引的持久化层：tracks 表保存曲目记录，fingerprints 表按哈希建索引
// 保存 (hash, track_id, frame_offset)。同一曲目的记录与全部指纹在一个事务内
// 写入或删除，进程崩溃时不会留下半写状态。

use rusqlite::{Connection, ErrorCode, params};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{warn, error, info, debug};
use crate::audio::fingerprint::FingerprintToken;
use crate::error::{AppError, AppResult};
use crate::utils::TrackRecord;

/// SQLite 持久化存储
pub struct Database {
    path: PathBuf,
    conn: Mutex<Connection>,
}

/// 从数据库读出的原始指纹行
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFingerprint {
    pub hash: u32,
    pub track_id: String,
    pub offset: u32,
}

/// 初始化表结构
fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // 创建曲目表
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tracks (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            source_path TEXT,
            duration REAL NOT NULL,
            fingerprint_count INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
        )",
        [],
    )?;

    // 创建指纹表
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fingerprints (
            hash INTEGER NOT NULL,
            track_id TEXT NOT NULL,
            frame_offset INTEGER NOT NULL,
            FOREIGN KEY (track_id) REFERENCES tracks(id) ON DELETE CASCADE
        )",
        [],
    )?;

    // 按哈希查找
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fingerprints_hash ON fingerprints(hash)",
        [],
    )?;

    // 按曲目删除
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fingerprints_track ON fingerprints(track_id)",
        [],
    )?;

    Ok(())
}

/// 文件本身不是有效数据库或已损坏
fn is_corruption(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::NotADatabase) | Some(ErrorCode::DatabaseCorrupt)
    )
}

fn map_corruption(e: rusqlite::Error) -> AppError {
    if is_corruption(&e) {
        AppError::IndexCorruption(e.to_string())
    } else {
        AppError::Database(e)
    }
}

impl Database {
    /// 打开（必要时创建）数据库
    ///
    /// 文件不是有效 SQLite 数据库时返回 IndexCorruption，调用方可以 reset 后重建
    pub fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        init_schema(&conn).map_err(map_corruption)?;
        info!("[DATABASE] 已打开索引数据库: {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    /// 打开数据库；文件损坏时删除后重新创建一个空库
    pub fn open_or_reset(path: &Path) -> AppResult<(Self, bool)> {
        match Self::open(path) {
            Ok(db) => Ok((db, false)),
            Err(AppError::IndexCorruption(reason)) => {
                error!("[DATABASE] 数据库文件损坏，将重新创建: {}", reason);
                remove_database_files(path)?;
                Ok((Self::open(path)?, true))
            }
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 获取数据库连接
    fn get_conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // Mutex 被毒化意味着持有锁的线程发生了 panic；
                // SQLite 事务未提交的部分已自动回滚，连接本身仍可用
                warn!("[DATABASE] 数据库 Mutex 被毒化，恢复连接继续使用");
                poisoned.into_inner()
            }
        }
    }

    /// 完整性检查，返回问题描述（无问题时为 None）
    pub fn integrity_check(&self) -> AppResult<Option<String>> {
        let conn = self.get_conn();
        let result: String = conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))
            .map_err(map_corruption)?;
        if result == "ok" {
            return Ok(None);
        }

        Ok(Some(result))
    }

    // ==================== 曲目操作 ====================

    /// 原子地写入曲目及其全部指纹，已存在的同 id 记录连同旧指纹一并替换
    pub fn replace_track(&self, track: &TrackRecord, tokens: &[FingerprintToken]) -> AppResult<()> {
        let mut conn = self.get_conn();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM fingerprints WHERE track_id = ?1", [&track.id])?;
        tx.execute(
            "INSERT OR REPLACE INTO tracks (id, filename, source_path, duration, fingerprint_count, content_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                track.id,
                track.filename,
                track.source_path,
                track.duration,
                track.fingerprint_count as i64,
                track.content_hash,
                track.created_at,
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO fingerprints (hash, track_id, frame_offset) VALUES (?1, ?2, ?3)",
            )?;
            for token in tokens {
                stmt.execute(params![token.hash as i64, track.id, token.offset as i64])?;
            }
        }

        tx.commit()?;
        debug!("[DATABASE] 写入曲目 {}: {} 条指纹", track.id, tokens.len());
        Ok(())
    }

    /// 删除曲目及其指纹，返回是否确实删除了记录
    pub fn delete_track(&self, id: &str) -> AppResult<bool> {
        let mut conn = self.get_conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM fingerprints WHERE track_id = ?1", [id])?;
        let removed = tx.execute("DELETE FROM tracks WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    /// 获取所有曲目
    pub fn load_tracks(&self) -> AppResult<Vec<TrackRecord>> {
        let conn = self.get_conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, filename, source_path, duration, fingerprint_count, content_hash, created_at
                 FROM tracks ORDER BY id",
            )
            .map_err(map_corruption)?;

        let iter = stmt
            .query_map([], |row| {
                let count: i64 = row.get(4)?;
                Ok(TrackRecord {
                    id: row.get(0)?,
                    filename: row.get(1)?,
                    source_path: row.get(2)?,
                    duration: row.get(3)?,
                    fingerprint_count: count.max(0) as usize,
                    content_hash: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })
            .map_err(map_corruption)?;

        let mut tracks = Vec::new();
        for track in iter {
            tracks.push(track.map_err(map_corruption)?);
        }
        Ok(tracks)
    }

    /// 获取所有指纹
    ///
    /// 哈希或偏移超出 u32 范围说明数据被外部改写，按索引损坏处理
    pub fn load_fingerprints(&self) -> AppResult<Vec<StoredFingerprint>> {
        let conn = self.get_conn();
        let mut stmt = conn
            .prepare("SELECT hash, track_id, frame_offset FROM fingerprints")
            .map_err(map_corruption)?;

        let iter = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(map_corruption)?;

        let mut result = Vec::new();
        for item in iter {
            let (hash, track_id, offset) = item.map_err(map_corruption)?;
            let hash = u32::try_from(hash)
                .map_err(|_| AppError::IndexCorruption(format!("无效的指纹哈希: {}", hash)))?;
            let offset = u32::try_from(offset)
                .map_err(|_| AppError::IndexCorruption(format!("无效的指纹偏移: {}", offset)))?;
            result.push(StoredFingerprint { hash, track_id, offset });
        }

        Ok(result)
    }

    /// 清空所有数据
    pub fn clear_all(&self) -> AppResult<()> {
        let mut conn = self.get_conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM fingerprints", [])?;
        tx.execute("DELETE FROM tracks", [])?;
        tx.commit()?;
        Ok(())
    }

    /// 丢弃数据库文件并重新创建空库（用于损坏后的重建）
    pub fn reset(&self) -> AppResult<()> {
        let mut conn = self.get_conn();
        // 先切换到内存连接以释放文件句柄
        let old = std::mem::replace(&mut *conn, Connection::open_in_memory()?);
        if let Err((_, e)) = old.close() {
            warn!("[DATABASE] 关闭旧连接失败: {}", e);
        }

        remove_database_files(&self.path)?;
        let fresh = Connection::open(&self.path)?;
        init_schema(&fresh)?;
        *conn = fresh;
        info!("[DATABASE] 数据库已重置: {}", self.path.display());
        Ok(())
    }
}

/// 删除数据库文件及日志附属文件
fn remove_database_files(path: &Path) -> AppResult<()> {
    for suffix in ["", "-journal", "-wal", "-shm"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        let file = PathBuf::from(name);
        if file.exists() {
            std::fs::remove_file(&file)?;
        }
    }
    Ok(())
}
