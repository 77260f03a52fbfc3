//! Common utilities and types shared across miniroute

pub mod config;
pub mod error;
pub mod hash;
pub mod tracing_middleware;
pub mod utils;

pub use config::{
    AdminConfig, Config, MonitorConfig, RegistrarConfig, StoreBackend, StoreConfig,
};
pub use error::{Error, Result};
pub use hash::{default_hash_fn, fnv1a_32, HashFn};
pub use utils::{
    child_path, decode_node_name, encode_node_name, normalize_path, parse_duration,
    timestamp_now_millis,
};
