// 命令模块
//
// 请求边界的异步处理函数：把阻塞的解码/匹配/入库放到 tokio 的阻塞线程池，
// 并把结果整理为对外的 JSON 结构。

pub mod dataset;
pub mod query;

use crate::error::{AppError, AppResult};

/// 在阻塞线程池中执行 CPU 密集的引擎调用
pub(crate) async fn run_blocking<T, F>(task: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| AppError::Task(format!("后台任务异常: {}", e)))?
}
