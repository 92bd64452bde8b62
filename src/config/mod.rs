pub mod models;
pub mod parser;

pub use models::Config;
pub use parser::{ConfigError, DEFAULT_CONFIG_PATH, apply_env, load_config, parse_config, parse_str};
