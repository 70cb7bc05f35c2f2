//! 内存存储实现
//!
//! 实现核心库的全部仓储接口，ID 顺序分配。子任务按 ID 排序返回，
//! 与插入顺序一致。进程重启后数据不保留。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use orchestrator_core::models::{CallbackTarget, Node, SubTask, Task};
use orchestrator_core::traits::{
    CallbackRepository, NodeRepository, SubTaskRepository, TaskRepository,
};
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use tokio::sync::RwLock;

#[derive(Debug)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<BTreeMap<i64, Task>>,
    next_id: AtomicI64,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub async fn count(&self) -> usize {
        self.tasks.read().await.len()
    }
}

impl Default for InMemoryTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: &Task) -> OrchestratorResult<Task> {
        let mut created = task.clone();
        created.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.tasks.write().await.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> OrchestratorResult<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn update(&self, task: &Task) -> OrchestratorResult<()> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&task.id) {
            Some(existing) => {
                *existing = task.clone();
                Ok(())
            }
            None => Err(OrchestratorError::TaskNotFound { id: task.id }),
        }
    }

    async fn list(&self) -> OrchestratorResult<Vec<Task>> {
        Ok(self.tasks.read().await.values().cloned().collect())
    }
}

#[derive(Debug)]
pub struct InMemorySubTaskRepository {
    subtasks: RwLock<BTreeMap<i64, SubTask>>,
    next_id: AtomicI64,
}

impl InMemorySubTaskRepository {
    pub fn new() -> Self {
        Self {
            subtasks: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub async fn count(&self) -> usize {
        self.subtasks.read().await.len()
    }
}

impl Default for InMemorySubTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubTaskRepository for InMemorySubTaskRepository {
    async fn create(&self, subtask: &SubTask) -> OrchestratorResult<SubTask> {
        let mut created = subtask.clone();
        created.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subtasks
            .write()
            .await
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> OrchestratorResult<Option<SubTask>> {
        Ok(self.subtasks.read().await.get(&id).cloned())
    }

    async fn get_by_task_id(&self, task_id: i64) -> OrchestratorResult<Vec<SubTask>> {
        Ok(self
            .subtasks
            .read()
            .await
            .values()
            .filter(|s| s.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn update(&self, subtask: &SubTask) -> OrchestratorResult<()> {
        let mut subtasks = self.subtasks.write().await;
        match subtasks.get_mut(&subtask.id) {
            Some(existing) => {
                *existing = subtask.clone();
                Ok(())
            }
            None => Err(OrchestratorError::SubTaskNotFound { id: subtask.id }),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryNodeRepository {
    nodes: RwLock<BTreeMap<String, Node>>,
}

impl InMemoryNodeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeRepository for InMemoryNodeRepository {
    async fn upsert(&self, node: &Node) -> OrchestratorResult<()> {
        self.nodes
            .write()
            .await
            .insert(node.id.clone(), node.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> OrchestratorResult<Option<Node>> {
        Ok(self.nodes.read().await.get(id).cloned())
    }

    async fn list(&self) -> OrchestratorResult<Vec<Node>> {
        Ok(self.nodes.read().await.values().cloned().collect())
    }
}

#[derive(Debug)]
pub struct InMemoryCallbackRepository {
    targets: RwLock<BTreeMap<i64, CallbackTarget>>,
    next_id: AtomicI64,
}

impl InMemoryCallbackRepository {
    pub fn new() -> Self {
        Self {
            targets: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for InMemoryCallbackRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CallbackRepository for InMemoryCallbackRepository {
    async fn create(&self, target: &CallbackTarget) -> OrchestratorResult<CallbackTarget> {
        let mut created = target.clone();
        created.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.targets
            .write()
            .await
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> OrchestratorResult<Option<CallbackTarget>> {
        Ok(self.targets.read().await.get(&id).cloned())
    }
}
