// AudioMatch - 音频指纹识别
// 命令行入口：每个进程构造一个引擎实例，执行一条命令并以 JSON 输出结果

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use audiomatch::commands::{dataset, query};
use audiomatch::config;
use audiomatch::engine::Engine;
use audiomatch::error::{AppError, AppResult};
use audiomatch::logging;
use tracing::{error, info};

const USAGE: &str = "用法: audiomatch [--config FILE] <命令>

命令:
  ingest FILE...              入库音频文件
  ingest-dir DIR              入库目录下所有支持的音频文件
  query FILE [--timeout-ms N] 识别音频片段
  list                        列出已入库的文件
  remove ID                   删除曲目
  rebuild                     清空并重新扫描数据集，重建索引
  verify                      校验索引与数据库是否一致";

#[derive(Debug, PartialEq)]
enum Command {
    Ingest(Vec<String>),
    IngestDir(String),
    Query { path: String, timeout_ms: Option<u64> },
    List,
    Remove(String),
    Rebuild,
    Verify,
}

#[derive(Debug, PartialEq)]
struct CliArgs {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_args<I>(args: I) -> AppResult<CliArgs>
where
    I: IntoIterator<Item = String>,
{
    let mut config_path = None;
    let mut positional = Vec::new();
    let mut timeout_ms = None;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| AppError::InvalidArgument("--config 缺少文件路径".to_string()))?;
                config_path = Some(PathBuf::from(value));
            }
            "--timeout-ms" => {
                let value = iter
                    .next()
                    .ok_or_else(|| AppError::InvalidArgument("--timeout-ms 缺少数值".to_string()))?;
                let ms = value
                    .parse::<u64>()
                    .map_err(|_| AppError::InvalidArgument(format!("无效的超时: {}", value)))?;
                timeout_ms = Some(ms);
            }
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let name = positional
        .next()
        .ok_or_else(|| AppError::InvalidArgument("缺少命令".to_string()))?;
    let rest: Vec<String> = positional.collect();

    let single = |rest: Vec<String>, what: &str| -> AppResult<String> {
        match <[String; 1]>::try_from(rest) {
            Ok([value]) => Ok(value),
            Err(_) => Err(AppError::InvalidArgument(format!("{} 需要且只需要一个参数", what))),
        }
    };

    let command = match name.as_str() {
        "ingest" if !rest.is_empty() => Command::Ingest(rest),
        "ingest" => return Err(AppError::InvalidArgument("ingest 需要至少一个文件".to_string())),
        "ingest-dir" => Command::IngestDir(single(rest, "ingest-dir")?),
        "query" => Command::Query {
            path: single(rest, "query")?,
            timeout_ms,
        },
        "list" if rest.is_empty() => Command::List,
        "remove" => Command::Remove(single(rest, "remove")?),
        "rebuild" if rest.is_empty() => Command::Rebuild,
        "verify" if rest.is_empty() => Command::Verify,
        other => return Err(AppError::InvalidArgument(format!("未知命令或多余参数: {}", other))),
    };

    Ok(CliArgs { config_path, command })
}

/// 默认配置目录（可执行文件旁的 data 文件夹）
fn get_app_data_dir() -> PathBuf {
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            // 开发模式下，exe 在 target/debug 或 target/release，需要回到项目根目录
            let in_target = ["debug", "release"]
                .iter()
                .any(|profile| exe_dir.ends_with(PathBuf::from("target").join(profile)));
            let data_dir = if in_target {
                exe_dir
                    .parent()
                    .and_then(|p| p.parent())
                    .map(|p| p.join("data"))
                    .unwrap_or_else(|| exe_dir.join("data"))
            } else {
                exe_dir.join("data")
            };
            return data_dir;
        }
    }

    // 回退到当前工作目录
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("data")
}

async fn run(engine: Arc<Engine>, command: Command) -> AppResult<serde_json::Value> {
    let value = match command {
        Command::Ingest(paths) => serde_json::to_value(dataset::ingest_files(engine, paths).await?)?,
        Command::IngestDir(dir) => serde_json::to_value(dataset::ingest_directory(engine, dir).await?)?,
        Command::Query { path, timeout_ms } => {
            serde_json::to_value(query::query_audio(engine, path, timeout_ms).await?)?
        }
        Command::List => serde_json::to_value(dataset::list_dataset(engine).await?)?,
        Command::Remove(id) => serde_json::to_value(dataset::remove_track(engine, id).await?)?,
        Command::Rebuild => serde_json::to_value(dataset::rebuild_dataset(engine).await?)?,
        Command::Verify => serde_json::to_value(dataset::verify_index(engine).await?)?,
    };
    Ok(value)
}

fn print_error(e: &AppError) {
    let payload = serde_json::json!({
        "error": {
            "kind": e.kind(),
            "message": e.to_string(),
        }
    });
    eprintln!("{}", payload);
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match parse_args(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };

    let config_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| get_app_data_dir().join("config.json"));
    let config = match config::load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            print_error(&e);
            return ExitCode::FAILURE;
        }
    };

    // guard 必须保持存活，否则异步日志线程会退出
    let _log_guard = logging::init_logging(&config.storage.log_dir(), &config.log_level);
    info!("AudioMatch 启动中... 配置: {}", config_path.display());

    let engine = match Engine::new(&config) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!("引擎初始化失败: {}", e);
            print_error(&e);
            return ExitCode::FAILURE;
        }
    };

    match run(engine, cli.command).await {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(text) => {
                println!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                print_error(&AppError::from(e));
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            error!("命令执行失败: {}", e);
            print_error(&e);
            ExitCode::FAILURE
        }
    }
}
