//! 安装文件版本信息读取。
//!
//! 读取策略：
//! - `.exe`：Win32 版本资源（`GetFileVersionInfoW` + `VerQueryValueW`）
//! - `.msi`：优先调用属性读取辅助工具（`msiinfo export <msi> Property` 的制表符分隔输出）；
//!   工具不可用或没有产品代码时，直接打开 Windows Installer 数据库查询 `Property` 表
//!
//! 异常处理：
//! - 任何失败都只记录 WARN 并返回 `None`，不中止迁移流程
//! - 非 Windows 平台只保留辅助工具路径，原生读取一律返回 `None`
//!
//! 作者：应用迁移工具项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use cm2intune_core::source::{VersionInfo, VersionProbe};
use tracing::{debug, warn};

/// MSI `Property` 表中读取的属性名。
pub const MSI_PROPERTIES: [&str; 4] = ["ProductVersion", "ProductName", "Manufacturer", "ProductCode"];

/// 平台版本信息读取实现。
#[derive(Debug, Clone, Default)]
pub struct NativeVersionProbe {
    /// MSI 属性读取辅助工具路径（可选）。
    pub msi_tool: Option<PathBuf>,
}

impl NativeVersionProbe {
    pub fn new(msi_tool: Option<PathBuf>) -> Self {
        Self { msi_tool }
    }

    fn extract_msi(&self, path: &Path) -> Option<VersionInfo> {
        let from_tool = self.msi_tool.as_deref().and_then(|tool| match run_msi_tool(tool, path) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("MSI 辅助工具读取失败，改为直接读取数据库: {:#}", e);
                None
            }
        });
        if let Some(info) = from_tool.filter(|i| i.product_code.is_some()) {
            return Some(info);
        }
        match query_msi_database(path) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("读取 MSI 属性失败: {}: {:#}", path.display(), e);
                None
            }
        }
    }
}

impl VersionProbe for NativeVersionProbe {
    fn extract(&self, path: &Path) -> Option<VersionInfo> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "msi" => self.extract_msi(path),
            "exe" => match read_version_resource(path) {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!("读取版本资源失败: {}: {:#}", path.display(), e);
                    None
                }
            },
            _ => {
                debug!("不支持读取版本信息的文件类型: {}", path.display());
                None
            }
        }
    }
}

/// 调用辅助工具导出 `Property` 表。
pub fn run_msi_tool(tool: &Path, msi: &Path) -> Result<VersionInfo> {
    let out = Command::new(tool)
        .arg("export")
        .arg(msi)
        .arg("Property")
        .output()
        .with_context(|| format!("启动 MSI 辅助工具失败: {}", tool.display()))?;
    if !out.status.success() {
        return Err(anyhow!(
            "MSI 辅助工具退出码 {}: {}",
            out.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&out.stderr).trim()
        ));
    }
    Ok(parse_property_table(&String::from_utf8_lossy(&out.stdout)))
}

/// 解析 `Property` 表导出文本（每行 `名称<TAB>值`，前三行为表头）。
pub fn parse_property_table(output: &str) -> VersionInfo {
    let mut info = VersionInfo::default();
    for line in output.lines() {
        let Some((name, value)) = line.split_once('\t') else {
            continue;
        };
        let value = value.trim_end_matches('\r').trim();
        if value.is_empty() {
            continue;
        }
        let slot = match name.trim() {
            "ProductVersion" => &mut info.product_version,
            "ProductName" => &mut info.product_name,
            "Manufacturer" => &mut info.company_name,
            "ProductCode" => &mut info.product_code,
            _ => continue,
        };
        *slot = Some(value.to_string());
    }
    info
}

#[cfg(windows)]
fn to_wide(s: &std::ffi::OsStr) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt;
    s.encode_wide().chain(std::iter::once(0)).collect()
}

#[cfg(windows)]
fn read_version_resource(path: &Path) -> Result<VersionInfo> {
    use windows::core::PCWSTR;
    use windows::Win32::Storage::FileSystem::{GetFileVersionInfoSizeW, GetFileVersionInfoW, VerQueryValueW};

    let wide = to_wide(path.as_os_str());
    unsafe {
        let size = GetFileVersionInfoSizeW(PCWSTR(wide.as_ptr()), None);
        if size == 0 {
            return Err(anyhow!("文件没有版本资源"));
        }
        let mut block = vec![0u8; size as usize];
        GetFileVersionInfoW(PCWSTR(wide.as_ptr()), 0, size, block.as_mut_ptr().cast())
            .context("GetFileVersionInfoW 失败")?;

        let query = |sub: &str| -> Option<(*mut core::ffi::c_void, u32)> {
            let sub = to_wide(std::ffi::OsStr::new(sub));
            let mut ptr = std::ptr::null_mut();
            let mut len = 0u32;
            VerQueryValueW(block.as_ptr().cast(), PCWSTR(sub.as_ptr()), &mut ptr, &mut len)
                .as_bool()
                .then_some((ptr, len))
                .filter(|(p, l)| !p.is_null() && *l > 0)
        };

        // 取第一个语言/代码页，缺失时用美式英语 + Unicode。
        let translation = query(r"\VarFileInfo\Translation")
            .filter(|(_, len)| *len >= 4)
            .map(|(ptr, _)| {
                let pair = ptr as *const u16;
                format!("{:04x}{:04x}", *pair, *pair.add(1))
            })
            .unwrap_or_else(|| "040904b0".to_string());

        let string_value = |name: &str| -> Option<String> {
            let (ptr, len) = query(&format!(r"\StringFileInfo\{translation}\{name}"))?;
            let chars = std::slice::from_raw_parts(ptr as *const u16, len as usize);
            let end = chars.iter().position(|c| *c == 0).unwrap_or(chars.len());
            let s = String::from_utf16_lossy(&chars[..end]).trim().to_string();
            (!s.is_empty()).then_some(s)
        };

        Ok(VersionInfo {
            file_version: string_value("FileVersion"),
            product_version: string_value("ProductVersion"),
            company_name: string_value("CompanyName"),
            product_name: string_value("ProductName"),
            file_description: string_value("FileDescription"),
            product_code: None,
        })
    }
}

#[cfg(not(windows))]
fn read_version_resource(_path: &Path) -> Result<VersionInfo> {
    Err(anyhow!("当前平台不支持读取 Win32 版本资源"))
}

#[cfg(windows)]
struct MsiHandle(windows::Win32::System::ApplicationInstallationAndServicing::MSIHANDLE);

#[cfg(windows)]
impl Drop for MsiHandle {
    fn drop(&mut self) {
        if self.0 .0 != 0 {
            unsafe {
                let _ = windows::Win32::System::ApplicationInstallationAndServicing::MsiCloseHandle(self.0);
            }
        }
    }
}

#[cfg(windows)]
fn query_msi_database(path: &Path) -> Result<VersionInfo> {
    use windows::core::{PCWSTR, PWSTR};
    use windows::Win32::System::ApplicationInstallationAndServicing::{
        MsiDatabaseOpenViewW, MsiOpenDatabaseW, MsiRecordGetStringW, MsiViewExecute, MsiViewFetch, MSIDBOPEN_READONLY,
        MSIHANDLE,
    };

    const ERROR_SUCCESS: u32 = 0;
    const ERROR_MORE_DATA: u32 = 234;

    let wide = to_wide(path.as_os_str());
    unsafe {
        let mut db = MsiHandle(MSIHANDLE(0));
        let rc = MsiOpenDatabaseW(PCWSTR(wide.as_ptr()), MSIDBOPEN_READONLY, &mut db.0);
        if rc != ERROR_SUCCESS {
            return Err(anyhow!("MsiOpenDatabaseW 返回 {rc}"));
        }

        let mut info = VersionInfo::default();
        for name in MSI_PROPERTIES {
            let sql = to_wide(std::ffi::OsStr::new(&format!(
                "SELECT `Value` FROM `Property` WHERE `Property` = '{name}'"
            )));
            let mut view = MsiHandle(MSIHANDLE(0));
            if MsiDatabaseOpenViewW(db.0, PCWSTR(sql.as_ptr()), &mut view.0) != ERROR_SUCCESS {
                continue;
            }
            if MsiViewExecute(view.0, MSIHANDLE(0)) != ERROR_SUCCESS {
                continue;
            }
            let mut record = MsiHandle(MSIHANDLE(0));
            if MsiViewFetch(view.0, &mut record.0) != ERROR_SUCCESS {
                continue;
            }

            let mut len = 0u32;
            let mut empty = [0u16; 1];
            let rc = MsiRecordGetStringW(record.0, 1, PWSTR(empty.as_mut_ptr()), Some(&mut len as *mut u32));
            if rc != ERROR_MORE_DATA && rc != ERROR_SUCCESS {
                continue;
            }
            len += 1;
            let mut buf = vec![0u16; len as usize];
            if MsiRecordGetStringW(record.0, 1, PWSTR(buf.as_mut_ptr()), Some(&mut len as *mut u32)) != ERROR_SUCCESS {
                continue;
            }
            let value = String::from_utf16_lossy(&buf[..len as usize]).trim().to_string();
            if value.is_empty() {
                continue;
            }
            match name {
                "ProductVersion" => info.product_version = Some(value),
                "ProductName" => info.product_name = Some(value),
                "Manufacturer" => info.company_name = Some(value),
                _ => info.product_code = Some(value),
            }
        }
        if info.is_empty() {
            return Err(anyhow!("Property 表中没有可用属性"));
        }
        Ok(info)
    }
}

#[cfg(not(windows))]
fn query_msi_database(_path: &Path) -> Result<VersionInfo> {
    Err(anyhow!("当前平台不支持直接读取 MSI 数据库"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exported_property_table() {
        let out = "Property\tValue\r\ns72\tl0\r\nProperty\tProperty\r\n\
                   Manufacturer\tContoso Ltd.\r\nProductCode\t{11111111-2222-3333-4444-555555555555}\r\n\
                   ProductName\tContoso Widget\r\nProductVersion\t3.4.1\r\nALLUSERS\t1\r\nARPCOMMENTS\t\r\n";
        let info = parse_property_table(out);
        assert_eq!(info.company_name.as_deref(), Some("Contoso Ltd."));
        assert_eq!(info.product_code.as_deref(), Some("{11111111-2222-3333-4444-555555555555}"));
        assert_eq!(info.product_name.as_deref(), Some("Contoso Widget"));
        assert_eq!(info.product_version.as_deref(), Some("3.4.1"));
        assert!(info.file_version.is_none());
    }

    #[test]
    fn unsupported_extension_yields_none() {
        let probe = NativeVersionProbe::default();
        assert!(probe.extract(Path::new("readme.txt")).is_none());
    }

    #[test]
    /// 缺失文件不会让调用方失败。
    fn missing_msi_yields_none() {
        let probe = NativeVersionProbe::new(Some(PathBuf::from("definitely-not-a-real-msi-tool")));
        assert!(probe.extract(Path::new("missing-package.msi")).is_none());
    }
}
