//! 发布到 Intune（IntuneWin32App 模块）。
//!
//! 流程：
//! - `Connect-MSIntuneGraph` 以应用凭据认证
//! - 按清单检测规则生成 `New-IntuneWin32AppDetectionRule{MSI,Registry,File}`
//! - `New-IntuneWin32AppRequirementRule` 写入架构与最低系统版本
//! - `Add-IntuneWin32App` 上传打包产物，以单行 JSON 输出 `id`/`displayName`
//!
//! 安全注意：
//! - 客户端密钥只通过子进程环境变量传递，脚本中引用 `$env:` 变量，不出现在命令行或日志中
//!
//! 作者：应用迁移工具项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use cm2intune_core::config::CLIENT_SECRET_ENV;
use cm2intune_core::detection::DetectionRule;
use cm2intune_core::manifest::PackageManifest;
use tracing::info;

use crate::powershell::{quote, run_script};

/// 租户凭据。
#[derive(Debug, Clone)]
pub struct TenantCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

fn detection_line(rule: &DetectionRule) -> String {
    match rule {
        DetectionRule::Msi { product_code } => {
            format!("New-IntuneWin32AppDetectionRuleMSI -ProductCode {}", quote(product_code))
        }
        DetectionRule::Registry { key_path, value_name } => format!(
            "New-IntuneWin32AppDetectionRuleRegistry -Existence -KeyPath {} -ValueName {} -DetectionType exists",
            quote(key_path),
            quote(value_name)
        ),
        DetectionRule::File { path, file_or_folder } => format!(
            "New-IntuneWin32AppDetectionRuleFile -Existence -Path {} -FileOrFolder {} -DetectionType exists",
            quote(path),
            quote(file_or_folder)
        ),
    }
}

/// 由清单生成发布脚本。
///
/// 参数：
/// - `artifact`：`.intunewin` 产物
/// - `icon`：图标文件（可选）
pub fn build_script(
    manifest: &PackageManifest,
    artifact: &Path,
    icon: Option<&Path>,
    creds: &TenantCredentials,
) -> String {
    let mut script = String::new();
    script.push_str("$ErrorActionPreference = 'Stop'\n");
    script.push_str("Import-Module IntuneWin32App\n");
    script.push_str(&format!(
        "Connect-MSIntuneGraph -TenantID {} -ClientID {} -ClientSecret $env:{} | Out-Null\n",
        quote(&creds.tenant_id),
        quote(&creds.client_id),
        CLIENT_SECRET_ENV
    ));
    script.push_str(&format!("$detection = {}\n", detection_line(&manifest.detection)));
    script.push_str(&format!(
        "$requirement = New-IntuneWin32AppRequirementRule -Architecture {} -MinimumSupportedWindowsRelease {}\n",
        quote(&manifest.requirements.architecture),
        quote(&manifest.requirements.minimum_os)
    ));
    script.push_str("$params = @{\n");
    for (key, value) in [
        ("FilePath", artifact.to_string_lossy().to_string()),
        ("DisplayName", manifest.display_name.clone()),
        ("Description", manifest.metadata.description.clone()),
        ("Publisher", manifest.publisher.clone()),
        ("AppVersion", manifest.version.clone()),
        ("InstallExperience", "system".to_string()),
        ("RestartBehavior", "suppress".to_string()),
        ("InstallCommandLine", manifest.install_command.clone()),
        ("UninstallCommandLine", manifest.uninstall_command.clone()),
    ] {
        script.push_str(&format!("    {key} = {}\n", quote(&value)));
    }
    script.push_str("    DetectionRule = $detection\n");
    script.push_str("    RequirementRule = $requirement\n");
    script.push_str("}\n");
    if let Some(icon) = icon {
        script.push_str(&format!(
            "$params.Icon = New-IntuneWin32AppIcon -FilePath {}\n",
            quote(&icon.to_string_lossy())
        ));
    }
    script.push_str("$app = Add-IntuneWin32App @params\n");
    script.push_str("$app | Select-Object id, displayName | ConvertTo-Json -Compress\n");
    script
}

/// 从脚本输出中取应用 ID：最后一个可解析为 JSON 且含 `id` 的行。
///
/// 模块可能向标准输出写入进度文本，因此逐行自后向前查找。
pub fn parse_app_id(output: &str) -> Option<String> {
    output.lines().rev().find_map(|line| {
        let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
        value
            .get("id")
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    })
}

/// 认证并上传，返回发布后的应用 ID。
///
/// 异常处理：
/// - 卸载命令为空时拒绝发布（目标系统要求必填）
/// - 认证/上传失败、输出中没有应用 ID 时返回错误
pub fn publish(
    manifest: &PackageManifest,
    artifact: &Path,
    icon: Option<&Path>,
    creds: &TenantCredentials,
) -> Result<String> {
    if manifest.uninstall_command.trim().is_empty() {
        return Err(anyhow!("卸载命令为空，请先在清单中补充后再发布"));
    }
    if !artifact.is_file() {
        return Err(anyhow!("打包产物不存在: {}", artifact.display()));
    }
    info!("发布应用: {}", manifest.display_name);
    let script = build_script(manifest, artifact, icon, creds);
    let out = run_script(&script, &[(CLIENT_SECRET_ENV, creds.client_secret.as_str())])
        .context("发布到 Intune 失败")?;
    let app_id = parse_app_id(&out).ok_or_else(|| anyhow!("发布脚本没有返回应用 ID"))?;
    info!("发布完成，应用 ID: {}", app_id);
    Ok(app_id)
}
