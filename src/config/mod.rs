/// 统一配置系统
///
/// 提供TOML/JSON配置文件、环境变量和运行时校验
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod batch;
pub mod world;

pub use batch::BatchLimits;
pub use world::{LiquidAlpha, SoftEmu, WorldRenderConfig};

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 渲染器主配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RendererConfig {
    /// 世界渲染选项
    #[serde(default)]
    pub world: WorldRenderConfig,

    /// 批处理容量
    #[serde(default)]
    pub limits: BatchLimits,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RendererConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 保存为JSON文件
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("WORLDBRUSH_NOVIS") {
            self.world.novis = parse_flag(&val).unwrap_or(self.world.novis);
        }
        if let Ok(val) = env::var("WORLDBRUSH_ZFIX") {
            self.world.zfix = parse_flag(&val).unwrap_or(self.world.zfix);
        }
        if let Ok(val) = env::var("WORLDBRUSH_FULLBRIGHTS") {
            self.world.fullbrights = parse_flag(&val).unwrap_or(self.world.fullbrights);
        }
        if let Ok(val) = env::var("WORLDBRUSH_OLDSKYLEAF") {
            self.world.old_sky_leaf = parse_flag(&val).unwrap_or(self.world.old_sky_leaf);
        }
        if let Ok(val) = env::var("WORLDBRUSH_SIMD") {
            self.world.simd_static_link = parse_flag(&val).unwrap_or(self.world.simd_static_link);
        }
        if let Ok(val) = env::var("WORLDBRUSH_SOFTEMU") {
            if let Some(tier) = val.trim().parse::<u8>().ok().and_then(SoftEmu::from_tier) {
                self.world.softemu = tier;
            }
        }
        if let Ok(val) = env::var("WORLDBRUSH_LOG_LEVEL") {
            if let Some(level) = LogLevel::parse(&val) {
                self.logging.level = level;
            }
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        self.world.validate()?;
        self.limits.validate()?;
        Ok(())
    }

    /// 自动查找并加载配置文件
    ///
    /// 按以下顺序查找：
    /// 1. ./worldbrush.toml
    /// 2. ./worldbrush.json
    /// 3. ~/.config/worldbrush/config.toml
    /// 4. 使用默认配置
    ///
    /// 找到的配置文件无法通过校验时同样回退到默认配置。
    pub fn load_or_default() -> Self {
        let mut candidates = vec![
            PathBuf::from("worldbrush.toml"),
            PathBuf::from("worldbrush.json"),
        ];
        if let Some(home) = env::var_os("HOME") {
            candidates.push(
                PathBuf::from(home)
                    .join(".config")
                    .join("worldbrush")
                    .join("config.toml"),
            );
        }

        for path in candidates {
            let loaded = match path.extension().and_then(|e| e.to_str()) {
                Some("json") => Self::from_json_file(&path),
                _ => Self::from_toml_file(&path),
            };
            match loaded.and_then(|config| config.validate().map(|_| config)) {
                Ok(config) => {
                    tracing::info!(target: "worldbrush", path = %path.display(), "Loaded config");
                    return config;
                }
                Err(ConfigError::FileError(_)) => continue,
                Err(err) => {
                    tracing::warn!(target: "worldbrush", path = %path.display(), %err, "Ignoring config file");
                }
            }
        }

        tracing::info!(target: "worldbrush", "Using default configuration");
        Self::default()
    }
}

/// 解析布尔开关，接受 `0/1`、`true/false`、`on/off`
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,

    /// 是否输出到控制台
    pub log_to_console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            log_to_console: true,
        }
    }
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// 跟踪
    Trace,
    /// 调试
    Debug,
    /// 信息
    Info,
    /// 警告
    Warn,
    /// 错误
    Error,
}

impl LogLevel {
    /// 从字符串解析（不区分大小写）
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// `EnvFilter` 指令字符串
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}
