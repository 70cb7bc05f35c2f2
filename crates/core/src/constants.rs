use std::time::Duration;

/// 等待原生播放结果的最长时间
pub const PROXY_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// 任务级停止的最长等待时间，超时后强制标记剩余子任务
pub const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// 强制停止阶段的上限，之后不再等待仍被占用的子任务
pub const FORCE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_VHOST: &str = "__defaultVhost__";
pub const DEFAULT_APP: &str = "live";

/// 回调请求中携带的投递ID头，同一次投递的所有尝试共用
pub const DELIVERY_ID_HEADER: &str = "X-Delivery-Id";
