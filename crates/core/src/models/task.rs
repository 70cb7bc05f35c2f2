use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::subtask::{SubTask, SubTaskStatus};

/// 任务聚合状态与子任务共用同一套整数编码
pub type TaskStatus = SubTaskStatus;

/// 分析任务，可跨越多路视频流
///
/// 任务自身不存储状态，状态在读取时由子任务状态实时计算。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub name: String,
    /// 任务级错误信息，优先于子任务错误
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    /// 显式停止时间
    pub stopped_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            error_message: None,
            created_at: Utc::now(),
            stopped_at: None,
        }
    }
}

/// 根据子任务状态计算任务状态
///
/// 任一运行中为 RUNNING；否则任一待调度为 PENDING；全部失败为 FAILED；其余为 STOPPED。
/// 没有子任务的任务视为 PENDING。
pub fn aggregate_status<I>(statuses: I) -> TaskStatus
where
    I: IntoIterator<Item = SubTaskStatus>,
{
    let mut any = false;
    let mut any_pending = false;
    let mut all_failed = true;

    for status in statuses {
        any = true;
        match status {
            SubTaskStatus::Running => return SubTaskStatus::Running,
            SubTaskStatus::Pending => any_pending = true,
            SubTaskStatus::Stopped => all_failed = false,
            SubTaskStatus::Failed => {}
        }
    }

    if !any || any_pending {
        SubTaskStatus::Pending
    } else if all_failed {
        SubTaskStatus::Failed
    } else {
        SubTaskStatus::Stopped
    }
}

/// 任务状态查询结果，包含全部子任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskView {
    pub id: i64,
    pub name: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub sub_tasks: Vec<SubTask>,
}

impl TaskView {
    pub fn from_parts(task: Task, sub_tasks: Vec<SubTask>) -> Self {
        let status = aggregate_status(sub_tasks.iter().map(|s| s.status));
        let started_at = sub_tasks.iter().filter_map(|s| s.started_at).min();

        let all_terminal = !sub_tasks.is_empty() && sub_tasks.iter().all(|s| s.is_terminal());
        let stopped_at = task.stopped_at.or_else(|| {
            if all_terminal {
                sub_tasks.iter().filter_map(|s| s.stopped_at).max()
            } else {
                None
            }
        });

        let error_message = task.error_message.clone().or_else(|| {
            sub_tasks
                .iter()
                .filter(|s| s.status == SubTaskStatus::Failed)
                .find_map(|s| s.error_message.clone())
        });

        Self {
            id: task.id,
            name: task.name,
            status,
            created_at: task.created_at,
            started_at,
            stopped_at,
            error_message,
            sub_tasks,
        }
    }
}
