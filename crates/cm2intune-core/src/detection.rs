//! 检测规则选择。
//!
//! 优先级（先命中先用）：
//! 1) MSI 且读取到产品代码 → `Msi`
//! 2) 卸载命令中含花括号 GUID → `Registry`（卸载注册表键 + `DisplayName`）
//! 3) 其余情况 → `File`（文件/文件夹存在检测，永远成功）
//!
//! 每份清单只产生一条规则，不组合多条。
//!
//! 作者：应用迁移工具项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::naming::{application_identifier, strip_trailing_version_tokens, UNKNOWN};
use crate::source::SourceFileInfo;

/// 卸载信息注册表根路径。
pub const UNINSTALL_KEY_ROOT: &str = r"HKEY_LOCAL_MACHINE\SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall";

/// 通用 Program Files 环境变量记号。
pub const PROGRAM_FILES_TOKEN: &str = "%ProgramFiles%";

static BRACED_GUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12}\}").unwrap()
});

static QUOTED_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]+)""#).unwrap());

/// 安装检测规则（目标系统据此判断应用是否已安装）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionRule {
    /// MSI 产品代码检测。
    Msi { product_code: String },
    /// 注册表键值存在检测。
    Registry { key_path: String, value_name: String },
    /// 文件/文件夹存在检测。
    File { path: String, file_or_folder: String },
}

impl DetectionRule {
    /// 规则类型的简短名称（日志/展示用）。
    pub fn kind(&self) -> &'static str {
        match self {
            DetectionRule::Msi { .. } => "MSI",
            DetectionRule::Registry { .. } => "Registry",
            DetectionRule::File { .. } => "File",
        }
    }
}

/// 选择检测规则所需的输入。
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectionInputs<'a> {
    pub source: Option<&'a SourceFileInfo>,
    pub uninstall_command: &'a str,
    /// 发布者提示（旧系统记录中的制造商）。
    pub publisher: &'a str,
    pub install_command: &'a str,
    /// 应用显示名（最后一级回退）。
    pub app_name: &'a str,
}

/// 按固定优先级选出唯一一条检测规则。
pub fn select(inputs: &DetectionInputs) -> DetectionRule {
    if let Some(code) = inputs.source.filter(|s| s.is_msi()).and_then(SourceFileInfo::product_code) {
        return DetectionRule::Msi { product_code: code.to_string() };
    }
    if let Some(guid) = uninstall_guid(inputs.uninstall_command) {
        return DetectionRule::Registry {
            key_path: format!(r"{UNINSTALL_KEY_ROOT}\{guid}"),
            value_name: "DisplayName".to_string(),
        };
    }
    file_rule(inputs)
}

/// 卸载命令中的第一个花括号 GUID。
pub fn uninstall_guid(command: &str) -> Option<&str> {
    BRACED_GUID.find(command).map(|m| m.as_str())
}

/// 文件存在检测（总能得到结果）。
///
/// 文件夹提示来源（按优先级）：
/// - 安装命令中第一个带引号路径的文件名主干
/// - 版本信息中的产品名（去版本后缀）
/// - 应用显示名（宽松去除末尾版本片段）
///
/// 目录为 `%ProgramFiles%\{发布者}`；发布者未知时为 `%ProgramFiles%`。
pub fn file_rule(inputs: &DetectionInputs) -> DetectionRule {
    let version_info = inputs.source.and_then(|s| s.version_info.as_ref());

    let hint = quoted_stem(inputs.install_command)
        .or_else(|| {
            version_info
                .and_then(|v| v.product_name.as_deref())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(application_identifier)
        })
        .or_else(|| {
            let name = inputs.app_name.trim();
            (!name.is_empty()).then(|| strip_trailing_version_tokens(name))
        })
        .unwrap_or_else(|| UNKNOWN.to_string());

    let publisher = [
        version_info.and_then(|v| v.company_name.as_deref()),
        Some(inputs.publisher),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .find(|s| !s.is_empty() && *s != UNKNOWN);

    let path = match publisher {
        Some(p) => format!(r"{PROGRAM_FILES_TOKEN}\{p}"),
        None => PROGRAM_FILES_TOKEN.to_string(),
    };
    DetectionRule::File { path, file_or_folder: hint }
}

fn quoted_stem(command: &str) -> Option<String> {
    let quoted = QUOTED_SEGMENT.captures(command)?.get(1)?.as_str().trim();
    let name = quoted.rsplit(['\\', '/']).next().unwrap_or(quoted);
    let stem = match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    };
    let stem = stem.trim();
    (!stem.is_empty()).then(|| stem.to_string())
}
