pub mod executor;
pub mod native_proxy;
pub mod repository;

pub use executor::*;
pub use native_proxy::*;
pub use repository::*;
