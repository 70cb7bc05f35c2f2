//! 原生流代理边界
//!
//! 对应媒体服务器SDK的 create / play / release / on-close 四个原语。
//! 播放结果与会话关闭都通过回调异步通知，回调可能在任意线程上触发，
//! 因此回调类型要求 `Send`，且实现方不得在持有自身锁时调用回调。

use crate::errors::OrchestratorResult;

/// 原生会话句柄，只在创建它的实现内部有意义
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(pub u64);

/// 播放结果回调: (错误码, 消息)，错误码为0表示成功
pub type PlayResultCallback = Box<dyn FnOnce(i32, String) + Send + 'static>;

/// 会话关闭回调，参数为关闭原因
pub type CloseCallback = Box<dyn FnOnce(String) + Send + 'static>;

pub trait NativeProxy: Send + Sync {
    /// 创建代理会话
    fn create(
        &self,
        vhost: &str,
        app: &str,
        stream_id: &str,
        rtsp_enabled: bool,
    ) -> OrchestratorResult<NativeHandle>;

    /// 注册远端断开通知
    fn set_on_close(&self, handle: NativeHandle, on_close: CloseCallback);

    /// 开始拉流，结果通过 `on_result` 异步返回
    ///
    /// 返回 `Err` 表示请求未能发出，此时 `on_result` 不会被调用。
    fn play(
        &self,
        handle: NativeHandle,
        url: &str,
        on_result: PlayResultCallback,
    ) -> OrchestratorResult<()>;

    /// 释放会话，每个句柄只应调用一次
    fn release(&self, handle: NativeHandle);
}
