use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 优雅关闭管理器
///
/// 所有后台循环持有同一个根令牌的子令牌，`shutdown` 只触发一次。
#[derive(Clone)]
pub struct ShutdownManager {
    token: CancellationToken,
    is_shutdown: Arc<AtomicBool>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            is_shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 订阅关闭信号，关闭之后订阅得到的令牌立即处于取消状态
    pub fn subscribe(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// 触发关闭
    pub fn shutdown(&self) {
        if self.is_shutdown.swap(true, Ordering::AcqRel) {
            debug!("关闭管理器已经触发过关闭");
            return;
        }
        info!("触发系统关闭");
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::Acquire)
    }

    /// 等待关闭被触发
    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 等待 Ctrl+C 或 SIGTERM
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_shutdown_manager_basic() {
        let manager = ShutdownManager::new();
        let token = manager.subscribe();
        assert!(!manager.is_shutdown());
        assert!(!token.is_cancelled());

        manager.shutdown();

        assert!(manager.is_shutdown());
        timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("subscriber should observe shutdown");
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let manager = ShutdownManager::new();
        let first = manager.subscribe();
        let second = manager.subscribe();

        manager.shutdown();

        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
    }

    #[tokio::test]
    async fn test_subscribe_after_shutdown() {
        let manager = ShutdownManager::new();
        manager.shutdown();
        assert!(manager.subscribe().is_cancelled());
    }

    #[tokio::test]
    async fn test_double_shutdown() {
        let manager = ShutdownManager::new();
        manager.shutdown();
        manager.shutdown();
        assert!(manager.is_shutdown());
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_across_clones() {
        let manager = ShutdownManager::new();
        let clone = manager.clone();

        let waiter = tokio::spawn(async move {
            clone.wait_for_shutdown().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.shutdown();

        timeout(Duration::from_millis(200), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }
}
