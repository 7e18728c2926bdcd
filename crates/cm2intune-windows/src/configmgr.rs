//! 基于 ConfigurationManager 模块的旧系统应用查询。
//!
//! 通过 `Get-CMApplication` 读取应用记录，`ConvertTo-Json` 输出交给
//! [`cm2intune_core::catalog::parse_records`] 解析。
//!
//! 权限要求：
//! - 运行账户需要安装管理控制台并具备站点读取权限
//!
//! 作者：应用迁移工具项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use anyhow::{Context, Result};
use cm2intune_core::catalog::{parse_records, ApplicationCatalog, ApplicationRecord};
use tracing::info;

use crate::powershell::{quote, run_script};

/// 站点连接参数。
#[derive(Debug, Clone)]
pub struct ConfigMgrCatalog {
    pub site_code: String,
    pub site_server: String,
}

impl ConfigMgrCatalog {
    pub fn new(site_code: impl Into<String>, site_server: impl Into<String>) -> Self {
        Self { site_code: site_code.into(), site_server: site_server.into() }
    }

    /// 生成查询脚本（名称支持 `*` 通配）。
    pub fn query_script(&self, name: &str) -> String {
        let name = if name.trim().is_empty() { "*" } else { name.trim() };
        let drive = quote(&self.site_code);
        format!(
            r#"$ErrorActionPreference = 'Stop'
Import-Module (Join-Path (Split-Path $env:SMS_ADMIN_UI_PATH -Parent) 'ConfigurationManager.psd1')
if (-not (Get-PSDrive -Name {drive} -PSProvider CMSite -ErrorAction SilentlyContinue)) {{
    New-PSDrive -Name {drive} -PSProvider CMSite -Root {server} | Out-Null
}}
Set-Location ({drive} + ':')
Get-CMApplication -Name {name} |
    Select-Object LocalizedDisplayName, Manufacturer, SoftwareVersion, NumberOfDeploymentTypes, NumberOfDeployments, SDMPackageXML |
    ConvertTo-Json -Depth 3 -Compress
"#,
            drive = drive,
            server = quote(&self.site_server),
            name = quote(name),
        )
    }
}

impl ApplicationCatalog for ConfigMgrCatalog {
    fn find(&self, name: &str) -> Result<Vec<ApplicationRecord>> {
        info!("查询站点 {} 的应用: {}", self.site_code, name);
        let out = run_script(&self.query_script(name), &[])
            .with_context(|| format!("Get-CMApplication 查询失败: {name}"))?;
        parse_records(&out)
    }
}
