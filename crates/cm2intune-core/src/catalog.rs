//! 旧系统应用查询边界。
//!
//! - [`ApplicationRecord`]：一条应用记录（显示名、制造商、版本、部署计数、描述 XML）
//! - [`ApplicationCatalog`]：按名称（精确或 `*` 通配）查询记录
//! - [`parse_records`]：解析 `ConvertTo-Json` 输出（单对象或数组，PascalCase 键）
//! - [`ExportFileCatalog`]：基于导出文件的离线实现
//!
//! 作者：应用迁移工具项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::Path;

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classify::{evaluate_status, ReadinessStatus};
use crate::descriptor;

/// 旧系统中的一条应用记录。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApplicationRecord {
    #[serde(rename = "LocalizedDisplayName", default)]
    pub display_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub manufacturer: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub software_version: String,
    #[serde(default)]
    pub number_of_deployment_types: u32,
    #[serde(default)]
    pub number_of_deployments: u32,
    #[serde(rename = "SDMPackageXML", default, deserialize_with = "null_as_default")]
    pub sdm_package_xml: String,
}

fn null_as_default<'de, D>(d: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

impl ApplicationRecord {
    /// 列表视图用的就绪徽标（只解析描述，不定位安装源）。
    pub fn readiness(&self) -> ReadinessStatus {
        evaluate_status(&descriptor::parse(&self.sdm_package_xml, &self.display_name))
    }
}

/// 旧系统查询能力。
pub trait ApplicationCatalog {
    /// 按名称查询；`name` 含 `*` 时按通配匹配，否则精确匹配（均不区分大小写）。
    fn find(&self, name: &str) -> Result<Vec<ApplicationRecord>>;
}

/// 解析 JSON 记录：单个对象、数组或空输入均可。
pub fn parse_records(raw: &str) -> Result<Vec<ApplicationRecord>> {
    let raw = raw.trim_start_matches('\u{feff}').trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let value: serde_json::Value = serde_json::from_str(raw).context("解析应用记录 JSON 失败")?;
    let records = match value {
        serde_json::Value::Null => Vec::new(),
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<_, _>>()
            .context("应用记录字段不符合预期")?,
        other => vec![serde_json::from_value(other).context("应用记录字段不符合预期")?],
    };
    Ok(records)
}

/// 名称匹配器：`*` 为通配，其余字符按字面量；不区分大小写。
#[derive(Debug, Clone)]
pub struct NamePattern {
    regex: Regex,
}

impl NamePattern {
    pub fn new(pattern: &str) -> Self {
        let body = pattern
            .trim()
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        // 转义后的字面量只会产生合法正则。
        let regex = RegexBuilder::new(&format!("^{body}$"))
            .case_insensitive(true)
            .build()
            .unwrap_or_else(|_| Regex::new("^$").unwrap());
        Self { regex }
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name.trim())
    }
}

/// 基于导出文件的应用目录（离线分析、测试使用）。
#[derive(Debug, Clone, Default)]
pub struct ExportFileCatalog {
    records: Vec<ApplicationRecord>,
}

impl ExportFileCatalog {
    pub fn new(records: Vec<ApplicationRecord>) -> Self {
        Self { records }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("读取应用导出文件失败: {}", path.display()))?;
        let records = parse_records(&raw)?;
        debug!("已加载 {} 条应用记录: {}", records.len(), path.display());
        Ok(Self { records })
    }
}

impl ApplicationCatalog for ExportFileCatalog {
    fn find(&self, name: &str) -> Result<Vec<ApplicationRecord>> {
        let pattern = NamePattern::new(if name.trim().is_empty() { "*" } else { name });
        Ok(self
            .records
            .iter()
            .filter(|r| pattern.matches(&r.display_name))
            .cloned()
            .collect())
    }
}
