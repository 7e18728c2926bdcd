//! 打包清单（PackageManifest.json）模型与构建。
//!
//! 清单是下游打包/发布唯一消费的产物，描述：
//! - 发布者/应用/版本与组合显示名
//! - 安装/卸载命令
//! - 唯一一条检测规则与运行要求（架构、最低系统版本）
//! - 元数据（分类、描述、时间与操作者、源文件统计、图标、来源信息）
//!
//! 约定：
//! - 构建后不再就地修改；操作员复核时以编辑后的完整副本整体替换
//! - 持久化为格式化 JSON，序列化/反序列化不丢失字段
//!
//! 作者：应用迁移工具项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::classify::MigrationCategory;
use crate::detection::DetectionRule;
use crate::naming::NamePair;
use crate::source::SourceFileInfo;
use crate::staging;

/// 默认架构要求。
pub const DEFAULT_ARCHITECTURE: &str = "x64";
/// 默认最低系统版本要求。
pub const DEFAULT_MINIMUM_OS: &str = "W10_1903";

/// 打包清单根对象（对应 `Documents/PackageManifest.json`）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub publisher: String,
    pub application_name: String,
    pub version: String,
    /// `"{publisher} - {app} - {version}"`。
    pub display_name: String,
    pub install_command: String,
    #[serde(default)]
    /// 可能为空（非 MSI 且没有原始卸载命令时不做猜测）。
    pub uninstall_command: String,
    pub detection: DetectionRule,
    #[serde(default)]
    pub requirements: Requirements,
    pub metadata: ManifestMetadata,
}

/// 运行要求。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    pub architecture: String,
    pub minimum_os: String,
}

impl Default for Requirements {
    fn default() -> Self {
        Self {
            architecture: DEFAULT_ARCHITECTURE.to_string(),
            minimum_os: DEFAULT_MINIMUM_OS.to_string(),
        }
    }
}

/// 清单元数据。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub category: MigrationCategory,
    pub description: String,
    /// 日期（`YYYY-MM-DD`）。
    pub created: String,
    pub updated: String,
    pub created_by: String,
    pub updated_by: String,
    pub source_file_name: String,
    #[serde(default)]
    pub source_file_version: Option<String>,
    pub total_files: usize,
    pub total_size: u64,
    #[serde(default)]
    /// 相对版本目录的图标路径，例如 `Icon/app_icon.png`。
    pub icon: Option<String>,
    pub origin: Origin,
}

/// 数据来源类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginKind {
    /// 来自旧系统应用描述。
    Mecm,
    /// 由新发现的安装文件直接生成。
    File,
}

/// 来源信息子块（清单中持久化的部分）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub kind: OriginKind,
    #[serde(default)]
    pub application_name: Option<String>,
    #[serde(default)]
    pub site_code: Option<String>,
    #[serde(default)]
    pub deployment_type: Option<String>,
    #[serde(default)]
    pub content_location: Option<String>,
    /// 安装文件的原始完整路径。
    pub source_path: String,
}

/// 构建清单所需的来源事实（含不持久化的原始命令与图标数据）。
#[derive(Debug, Clone)]
pub struct OriginFacts {
    pub kind: OriginKind,
    pub application_name: Option<String>,
    pub site_code: Option<String>,
    pub deployment_type: Option<String>,
    pub content_location: Option<String>,
    /// 原始描述中的安装命令；`None` 表示没有原始描述，需要合成。
    pub install_command: Option<String>,
    pub uninstall_command: Option<String>,
    /// 分类结论；`None` 时按文件类型推断。
    pub category: Option<MigrationCategory>,
    /// base64 图标数据。
    pub icon_payload: Option<String>,
}

impl OriginFacts {
    /// 新发现文件的来源事实（无原始描述）。
    pub fn discovered_file() -> Self {
        Self {
            kind: OriginKind::File,
            application_name: None,
            site_code: None,
            deployment_type: None,
            content_location: None,
            install_command: None,
            uninstall_command: None,
            category: None,
            icon_payload: None,
        }
    }
}

/// 构建清单。
///
/// 规则：
/// - 安装命令：有原始描述时原样使用，否则按 MSI/非 MSI 合成
/// - 卸载命令：原始描述非空时原样使用；否则 MSI 且有产品代码时合成；其余为空
/// - 描述：文件描述优先，否则 `"{app} installer"`
/// - 文件数/总大小取自定位阶段采集的兄弟文件集合
pub fn build(
    names: &NamePair,
    version: &str,
    source: &SourceFileInfo,
    detection: DetectionRule,
    origin: &OriginFacts,
) -> PackageManifest {
    let install_command = match origin.install_command.as_deref() {
        Some(cmd) => cmd.to_string(),
        None => synthesize_install_command(source),
    };
    let uninstall_command = origin
        .uninstall_command
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| synthesize_uninstall_command(source));

    let version_info = source.version_info.as_ref();
    let description = version_info
        .and_then(|v| v.file_description.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} installer", names.application));

    let category = origin.category.unwrap_or_else(|| file_category(source));
    let icon = origin
        .icon_payload
        .as_deref()
        .and_then(staging::decode_icon)
        .map(|(_, ext)| format!("{}/{}.{}", staging::ICON_DIR, staging::ICON_STEM, ext));

    let today = today();
    let actor = current_actor();

    PackageManifest {
        publisher: names.publisher.clone(),
        application_name: names.application.clone(),
        version: version.to_string(),
        display_name: compose_display_name(&names.publisher, &names.application, version),
        install_command,
        uninstall_command,
        detection,
        requirements: Requirements::default(),
        metadata: ManifestMetadata {
            category,
            description,
            created: today.clone(),
            updated: today,
            created_by: actor.clone(),
            updated_by: actor,
            source_file_name: source.file_name.clone(),
            source_file_version: version_info.and_then(|v| v.best_version()).map(str::to_string),
            total_files: source.total_files(),
            total_size: source.total_size(),
            icon,
            origin: Origin {
                kind: origin.kind,
                application_name: origin.application_name.clone(),
                site_code: origin.site_code.clone(),
                deployment_type: origin.deployment_type.clone(),
                content_location: origin.content_location.clone(),
                source_path: source.path.to_string_lossy().to_string(),
            },
        },
    }
}

/// 组合显示名。
pub fn compose_display_name(publisher: &str, application: &str, version: &str) -> String {
    format!("{publisher} - {application} - {version}")
}

/// 合成安装命令。
pub fn synthesize_install_command(source: &SourceFileInfo) -> String {
    if source.is_msi() {
        format!(r#"msiexec /i "{}" /quiet /norestart"#, source.file_name)
    } else {
        format!(r#""{}" /S"#, source.file_name)
    }
}

/// 合成卸载命令（仅 MSI 且有产品代码时）。
pub fn synthesize_uninstall_command(source: &SourceFileInfo) -> String {
    match source.product_code().filter(|_| source.is_msi()) {
        Some(code) => format!(r#"msiexec /x "{code}" /quiet /norestart"#),
        None => String::new(),
    }
}

fn file_category(source: &SourceFileInfo) -> MigrationCategory {
    if source.is_msi() {
        MigrationCategory::Win32Msi
    } else if crate::source::has_extension(&source.path, "exe") {
        MigrationCategory::Win32Exe
    } else {
        MigrationCategory::Win32
    }
}

fn today() -> String {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .date()
        .to_string()
}

/// 当前操作者标识（`USERNAME`/`USER` 环境变量）。
pub fn current_actor() -> String {
    ["USERNAME", "USER"]
        .iter()
        .filter_map(|k| std::env::var(k).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

impl PackageManifest {
    /// 复核后的副本：刷新组合显示名、更新日期与操作者。
    pub fn reviewed(mut self) -> Self {
        self.display_name = compose_display_name(&self.publisher, &self.application_name, &self.version);
        self.metadata.updated = today();
        self.metadata.updated_by = current_actor();
        self
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("序列化打包清单失败")
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("解析打包清单失败")
    }

    /// 写入清单文件（格式化 JSON）。
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("创建目录失败: {}", parent.display()))?;
        }
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("写入打包清单失败: {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("读取打包清单失败: {}", path.display()))?;
        Self::from_json(&raw)
    }
}

/// 复核阶段可选的检测方式（注册表规则不可由操作员编辑）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDetection {
    Msi,
    File,
}

impl ReviewDetection {
    /// 解析操作员输入（`msi`/`file`，不区分大小写）。
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "msi" => Some(ReviewDetection::Msi),
            "file" => Some(ReviewDetection::File),
            _ => None,
        }
    }

    /// 当前规则对应的可编辑类型；注册表规则返回 `None`。
    pub fn of(rule: &DetectionRule) -> Option<Self> {
        match rule {
            DetectionRule::Msi { .. } => Some(ReviewDetection::Msi),
            DetectionRule::File { .. } => Some(ReviewDetection::File),
            DetectionRule::Registry { .. } => None,
        }
    }

    /// 由操作员填写的字段构造规则。
    ///
    /// 参数：
    /// - `first`：MSI 为产品代码，文件规则为目录
    /// - `second`：文件规则的文件/文件夹名（MSI 忽略）
    pub fn rule(self, first: &str, second: &str) -> DetectionRule {
        match self {
            ReviewDetection::Msi => DetectionRule::Msi { product_code: first.trim().to_string() },
            ReviewDetection::File => DetectionRule::File {
                path: first.trim().to_string(),
                file_or_folder: second.trim().to_string(),
            },
        }
    }
}
