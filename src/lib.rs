// AudioMatch - 音频指纹识别引擎
//
// 解码 → 指纹提取 →（入库：写入索引 / 查询：对齐投票匹配）→ 排序后的候选曲目

pub mod audio;
pub mod commands;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod index;
pub mod library;
pub mod logging;
pub mod matcher;
pub mod utils;

pub use engine::Engine;
pub use error::{AppError, AppResult, ErrorKind};
