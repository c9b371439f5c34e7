//! Process-wide orchestration: bootstrap, in-memory state, the proxy engine
//! and the outbound HTTP client used to reach upstream providers.

pub mod bootstrap;
pub mod proxy_engine;
pub mod resolver;
pub mod state;
pub mod upstream_client;
