//! # 数据模型
//!
//! 编排引擎的核心数据结构：任务、子任务、计算节点、回调目标以及提交请求。
//!
//! ## 设计原则
//!
//! - 所有时间字段使用 `DateTime<Utc>`
//! - 状态字段使用封闭枚举，存储边界拒绝未知取值
//! - 子任务配置显式列出全部可识别字段及默认值
//! - 任务状态不落库，读取时由子任务状态计算

pub mod callback;
pub mod node;
pub mod request;
pub mod subtask;
pub mod task;

pub use callback::{BBox, CallbackPayload, CallbackTarget, Detection, DetectionReport, HttpMethod};
pub use node::{normalize_utilization, ComputeType, Node, NodeHeartbeat, ServiceType};
pub use request::{AnalysisAssignment, SubmitRequest, SubmitResponse, SubmittedSubTask};
pub use subtask::{Roi, SubTask, SubTaskConfig, SubTaskStatus};
pub use task::{aggregate_status, Task, TaskStatus, TaskView};
