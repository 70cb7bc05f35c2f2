use async_trait::async_trait;

use crate::errors::OrchestratorResult;
use crate::models::AnalysisAssignment;

/// 模型执行协作方
///
/// 负责视频解码与推理，编排引擎只负责把子任务交给它以及通知停止。
#[async_trait]
pub trait ModelExecutor: Send + Sync {
    /// 交付一个已进入 RUNNING 的子任务
    async fn start(&self, assignment: &AnalysisAssignment) -> OrchestratorResult<()>;

    /// 通知停止，未知子任务视为成功
    async fn stop(&self, subtask_id: i64) -> OrchestratorResult<()>;

    fn name(&self) -> &str;
}
