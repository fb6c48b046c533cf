use config::{Config, ConfigError, Environment, File};
use shiken_core::config::AppConfig;
use std::path::Path;

/// 未指定配置文件时在工作目录查找 `shiken.toml`
const DEFAULT_FILE: &str = "shiken";
const ENV_PREFIX: &str = "SHIKEN";

/// # Summary
/// 加载分层配置。
///
/// # Logic
/// 1. `AppConfig::default()` 作为最底层。
/// 2. 指定的配置文件 (必须存在)，或工作目录下可选的 `shiken.toml`。
/// 3. `SHIKEN__SECTION__KEY` 环境变量，如 `SHIKEN__TERMINAL__EXECUTABLE`。
pub fn load(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let file = match path {
        Some(path) => File::from(path).required(true),
        None => File::with_name(DEFAULT_FILE).required(false),
    };
    Config::builder()
        .add_source(Config::try_from(&AppConfig::default())?)
        .add_source(file)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}
