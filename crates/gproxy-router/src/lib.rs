//! HTTP edge: the public proxy surface and the admin API.

mod admin;
mod proxy;

pub use admin::admin_router;
pub use proxy::proxy_router;
