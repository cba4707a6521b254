pub mod config;
pub mod debug;
pub mod error;
pub mod providers;
pub mod proxy;
pub mod server;
pub mod translate;

pub use config::ProxyConfig;
pub use debug::DebugSink;
pub use error::{ProxyError, Result};
pub use server::{build_router, AppState};
