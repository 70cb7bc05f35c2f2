//! 存储协作方接口定义
//!
//! 编排引擎本身不持久化数据，所有任务、子任务、节点和回调目标的读写
//! 都通过这里定义的仓储接口完成：
//! - `TaskRepository` - 任务记录
//! - `SubTaskRepository` - 子任务记录，按任务查询时保持插入顺序
//! - `NodeRepository` - 计算节点及其最近一次心跳
//! - `CallbackRepository` - 回调目标配置
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use orchestrator_core::traits::{SubTaskRepository, TaskRepository};
//! use orchestrator_core::models::{SubTask, Task};
//!
//! async fn create_task(
//!     tasks: &dyn TaskRepository,
//!     subtasks: &dyn SubTaskRepository,
//! ) -> OrchestratorResult<()> {
//!     let task = tasks.create(&Task::new("entrance")).await?;
//!     subtasks
//!         .create(&SubTask::new(task.id, "yolo", "rtsp://cam/1"))
//!         .await?;
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;

use crate::errors::OrchestratorResult;
use crate::models::{CallbackTarget, Node, SubTask, Task};

/// 任务仓储
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 创建任务并返回分配了ID的记录
    async fn create(&self, task: &Task) -> OrchestratorResult<Task>;

    async fn get_by_id(&self, id: i64) -> OrchestratorResult<Option<Task>>;

    /// 更新任务，记录不存在时返回 `TaskNotFound`
    async fn update(&self, task: &Task) -> OrchestratorResult<()>;

    async fn list(&self) -> OrchestratorResult<Vec<Task>>;
}

/// 子任务仓储
#[async_trait]
pub trait SubTaskRepository: Send + Sync {
    async fn create(&self, subtask: &SubTask) -> OrchestratorResult<SubTask>;

    async fn get_by_id(&self, id: i64) -> OrchestratorResult<Option<SubTask>>;

    /// 按插入顺序返回某任务的全部子任务
    async fn get_by_task_id(&self, task_id: i64) -> OrchestratorResult<Vec<SubTask>>;

    async fn update(&self, subtask: &SubTask) -> OrchestratorResult<()>;
}

/// 节点仓储
#[async_trait]
pub trait NodeRepository: Send + Sync {
    async fn upsert(&self, node: &Node) -> OrchestratorResult<()>;

    async fn get_by_id(&self, id: &str) -> OrchestratorResult<Option<Node>>;

    async fn list(&self) -> OrchestratorResult<Vec<Node>>;
}

/// 回调目标仓储
#[async_trait]
pub trait CallbackRepository: Send + Sync {
    async fn create(&self, target: &CallbackTarget) -> OrchestratorResult<CallbackTarget>;

    async fn get_by_id(&self, id: i64) -> OrchestratorResult<Option<CallbackTarget>>;
}
