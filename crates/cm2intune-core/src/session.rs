//! 会话上下文落盘模型（session.json）。
//!
//! 目的：
//! - 代替全局可变状态：当前站点、最近一次刷新的应用摘要、最近处理的版本目录
//! - 跨命令调用保留“最近处理目录”，`package`/`publish` 可以默认使用
//!
//! 约定：
//! - 单操作员、单写者，不做并发控制
//! - 文件位于暂存根目录下；读取失败时以新会话继续
//!
//! 作者：应用迁移工具项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::catalog::ApplicationRecord;
use crate::classify::ReadinessStatus;

/// 会话文件名。
pub const SESSION_FILE: &str = "session.json";

/// 会话上下文。
///
/// 字段说明：
/// - `session_id`：会话 ID（新建会话时随机生成）
/// - `site_code`：旧系统站点代码
/// - `started_at`：会话创建时间（UTC）
/// - `applications`：最近一次刷新得到的应用摘要
/// - `last_processed_path`：最近一次落盘的版本目录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub site_code: String,
    pub started_at: OffsetDateTime,
    #[serde(default)]
    pub applications: Vec<ApplicationSummary>,
    #[serde(default)]
    pub last_processed_path: Option<PathBuf>,
}

/// 应用摘要（列表视图）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSummary {
    pub display_name: String,
    pub manufacturer: String,
    pub version: String,
    pub deployment_types: u32,
    pub deployments: u32,
    pub status: ReadinessStatus,
}

impl ApplicationSummary {
    pub fn from_record(record: &ApplicationRecord) -> Self {
        Self {
            display_name: record.display_name.clone(),
            manufacturer: record.manufacturer.clone(),
            version: record.software_version.clone(),
            deployment_types: record.number_of_deployment_types,
            deployments: record.number_of_deployments,
            status: record.readiness(),
        }
    }
}

impl Session {
    pub fn new(site_code: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            site_code: site_code.into(),
            started_at: OffsetDateTime::now_utc(),
            applications: Vec::new(),
            last_processed_path: None,
        }
    }

    /// 会话文件路径。
    pub fn file_in(staging_root: &Path) -> PathBuf {
        staging_root.join(SESSION_FILE)
    }

    /// 读取会话；文件不存在、损坏或站点不一致时返回新会话。
    pub fn load_or_new(staging_root: &Path, site_code: &str) -> Self {
        let path = Self::file_in(staging_root);
        if !path.exists() {
            return Self::new(site_code);
        }
        let loaded = std::fs::read_to_string(&path)
            .context("读取会话文件失败")
            .and_then(|raw| serde_json::from_str::<Session>(&raw).context("解析会话文件失败"));
        match loaded {
            Ok(session) if session.site_code == site_code => session,
            Ok(_) => Self::new(site_code),
            Err(e) => {
                warn!("{}: {:#}", path.display(), e);
                Self::new(site_code)
            }
        }
    }

    pub fn save(&self, staging_root: &Path) -> Result<()> {
        std::fs::create_dir_all(staging_root)
            .with_context(|| format!("创建目录失败: {}", staging_root.display()))?;
        let path = Self::file_in(staging_root);
        let json = serde_json::to_string_pretty(self).context("序列化会话失败")?;
        std::fs::write(&path, json).with_context(|| format!("写入会话文件失败: {}", path.display()))
    }

    /// 用一次刷新结果替换应用摘要。
    pub fn set_applications(&mut self, records: &[ApplicationRecord]) {
        self.applications = records.iter().map(ApplicationSummary::from_record).collect();
    }

    pub fn set_last_processed(&mut self, path: impl Into<PathBuf>) {
        self.last_processed_path = Some(path.into());
    }
}
