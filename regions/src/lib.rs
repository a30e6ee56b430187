//! Region data for the storefront: a cache-aside view of the commerce
//! backend's regions with a hardcoded fallback table.

pub mod api;
pub mod backend;
pub mod cache;
pub mod config;
pub mod fallback;
pub mod metrics_defs;
pub mod types;

pub use cache::RegionCache;
pub use types::{Region, RegionSnapshot};
