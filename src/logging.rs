// 日志模块
//
// 文件日志按天轮转，经非阻塞写线程落盘；debug 构建额外输出到 stderr，
// stdout 只留给命令的 JSON 结果。

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use crate::config::LogLevel;

const LOG_FILE_PREFIX: &str = "audiomatch.log";
const LOG_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// 初始化全局日志；返回的 guard 需要存活到进程结束
///
/// RUST_LOG 优先于配置中的级别。重复调用时保留第一次安装的订阅者。
pub fn init_logging(log_dir: &Path, log_level: &LogLevel) -> WorkerGuard {
    if let Err(e) = fs::create_dir_all(log_dir) {
        eprintln!("创建日志目录失败 {}: {}", log_dir.display(), e);
    }
    let removed = remove_expired_logs(log_dir, SystemTime::now());

    let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    // symphonia 的探测日志很多
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},symphonia=warn", log_level.as_str())));

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let console_layer = cfg!(debug_assertions).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .without_time()
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    if removed > 0 {
        tracing::debug!("[LOG] 已清理 {} 个过期日志文件", removed);
    }
    guard
}

/// 删除修改时间早于保留期的日志文件，返回删除的数量
fn remove_expired_logs(log_dir: &Path, now: SystemTime) -> usize {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return 0;
    };

    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX))
        })
        .filter(|path| {
            fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > LOG_RETENTION)
        })
        .filter(|path| match fs::remove_file(path) {
            Ok(()) => true,
            Err(e) => {
                eprintln!("删除过期日志失败 {}: {}", path.display(), e);
                false
            }
        })
        .count()
}
