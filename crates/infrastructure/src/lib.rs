pub mod analysis_client;
pub mod callback;
pub mod memory;
pub mod stream_proxy;
pub mod zlm_http;

pub use analysis_client::HttpModelExecutor;
pub use callback::{CallbackDispatcher, DeliveryOutcome};
pub use memory::{
    InMemoryCallbackRepository, InMemoryNodeRepository, InMemorySubTaskRepository,
    InMemoryTaskRepository,
};
pub use stream_proxy::{ProxyClosed, StreamProxyHandle, StreamProxyManager};
pub use zlm_http::ZlmHttpProxy;
