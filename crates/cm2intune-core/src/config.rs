//! 工具配置（cm2intune.json）。
//!
//! 说明：
//! - 客户端密钥可由环境变量 `CM2INTUNE_CLIENT_SECRET` 覆盖，避免明文落盘
//! - 租户 ID、客户端 ID、客户端密钥为启动必需项，缺失时进程直接退出
//!
//! 作者：应用迁移工具项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::MigrationError;

/// 覆盖客户端密钥的环境变量名。
pub const CLIENT_SECRET_ENV: &str = "CM2INTUNE_CLIENT_SECRET";

/// 默认打包工具名（在 PATH 中查找）。
pub const DEFAULT_INTUNEWIN_UTIL: &str = "IntuneWinAppUtil.exe";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件失败: {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件失败: {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Missing(#[from] MigrationError),
}

/// 配置根对象。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    /// 旧系统站点代码（如 `P01`）。
    pub site_code: String,
    #[serde(default)]
    /// 旧系统站点服务器。
    pub site_server: String,
    /// 暂存根目录。
    pub staging_root: PathBuf,
    #[serde(default)]
    /// 备用源根目录（智能路径匹配）。
    pub alternate_source_root: Option<PathBuf>,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    /// 打包工具路径。
    pub intunewin_util: Option<PathBuf>,
    #[serde(default)]
    /// MSI 属性读取辅助工具路径。
    pub msi_info_tool: Option<PathBuf>,
}

impl AppConfig {
    /// 读取并解析配置文件，应用环境变量覆盖。
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg: AppConfig = serde_json::from_str(raw.trim_start_matches('\u{feff}'))
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        cfg.apply_env(std::env::var(CLIENT_SECRET_ENV).ok());
        Ok(cfg)
    }

    /// 环境变量中非空的密钥覆盖配置文件中的值。
    pub fn apply_env(&mut self, secret: Option<String>) {
        if let Some(secret) = secret.filter(|s| !s.trim().is_empty()) {
            self.client_secret = secret;
        }
    }

    /// 检查启动必需项。
    pub fn validate(&self) -> Result<(), ConfigError> {
        let missing: Vec<&'static str> = [
            ("tenant_id", &self.tenant_id),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k)
        .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(MigrationError::ConfigurationMissing(missing).into())
        }
    }

    pub fn intunewin_util(&self) -> PathBuf {
        self.intunewin_util
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_INTUNEWIN_UTIL))
    }
}
