//! 在本机评估清单中的检测规则。
//!
//! 主要用途：
//! - 在参考机器上安装应用后，确认清单里的检测规则确实能识别出“已安装”
//!
//! 规则：
//! - `Msi`：Windows Installer 产品状态为已安装
//! - `Registry`：键存在且值可读取（同时尝试 64 位与 32 位视图）
//! - `File`：展开 `%变量%` 后的目录下存在该文件或文件夹
//!
//! 作者：应用迁移工具项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::PathBuf;

use anyhow::Result;
use cm2intune_core::detection::DetectionRule;
use tracing::{info, warn};

/// 评估检测规则。
///
/// 返回值：
/// - `Ok(true)`：检测为已安装
/// - `Ok(false)`：未检测到（包括当前平台不支持该规则类型）
pub fn evaluate(rule: &DetectionRule) -> Result<bool> {
    let detected = match rule {
        DetectionRule::Msi { product_code } => msi_product_installed(product_code)?,
        DetectionRule::Registry { key_path, value_name } => registry_value_present(key_path, value_name)?,
        DetectionRule::File { path, file_or_folder } => {
            let target = PathBuf::from(expand_env_vars(path)).join(file_or_folder);
            info!("检查路径: {}", target.display());
            target.exists()
        }
    };
    Ok(detected)
}

/// 展开 `%NAME%` 形式的环境变量；未定义的变量原样保留。
pub fn expand_env_vars(raw: &str) -> String {
    expand_with(raw, |name| std::env::var(name).ok())
}

fn expand_with(raw: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('%') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('%');
                        out.push_str(name);
                        out.push('%');
                    }
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push('%');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// 拆分 `HKEY_LOCAL_MACHINE\...` / `HKLM\...` 形式的完整键路径。
pub fn split_hive(key_path: &str) -> Option<(&'static str, &str)> {
    let (hive, rest) = key_path.split_once('\\')?;
    let hive = match hive.to_ascii_uppercase().as_str() {
        "HKEY_LOCAL_MACHINE" | "HKLM" => "HKLM",
        "HKEY_CURRENT_USER" | "HKCU" => "HKCU",
        _ => return None,
    };
    Some((hive, rest))
}

#[cfg(windows)]
fn registry_value_present(key_path: &str, value_name: &str) -> Result<bool> {
    use winreg::enums::{HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, KEY_READ, KEY_WOW64_32KEY, KEY_WOW64_64KEY};
    use winreg::RegKey;

    let Some((hive, sub)) = split_hive(key_path) else {
        warn!("无法识别的注册表根键: {}", key_path);
        return Ok(false);
    };
    let root = match hive {
        "HKLM" => RegKey::predef(HKEY_LOCAL_MACHINE),
        _ => RegKey::predef(HKEY_CURRENT_USER),
    };
    for view in [KEY_WOW64_64KEY, KEY_WOW64_32KEY] {
        if let Ok(key) = root.open_subkey_with_flags(sub, KEY_READ | view) {
            if key.get_raw_value(value_name).is_ok() {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

#[cfg(not(windows))]
fn registry_value_present(key_path: &str, _value_name: &str) -> Result<bool> {
    warn!("当前平台不支持注册表检测: {}", key_path);
    Ok(false)
}

#[cfg(windows)]
fn msi_product_installed(product_code: &str) -> Result<bool> {
    use windows::core::PCWSTR;
    use windows::Win32::System::ApplicationInstallationAndServicing::{MsiQueryProductStateW, INSTALLSTATE_DEFAULT};

    let wide: Vec<u16> = product_code.trim().encode_utf16().chain(std::iter::once(0)).collect();
    let state = unsafe { MsiQueryProductStateW(PCWSTR(wide.as_ptr())) };
    Ok(state == INSTALLSTATE_DEFAULT)
}

#[cfg(not(windows))]
fn msi_product_installed(product_code: &str) -> Result<bool> {
    warn!("当前平台不支持 MSI 产品检测: {}", product_code);
    Ok(false)
}
