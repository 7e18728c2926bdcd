//! 发布者/产品名称规范化。
//!
//! - [`sanitize`]：把路径/显示不安全的字符替换为下划线（幂等）
//! - [`strip_version_suffix`]：去掉产品名末尾的版本号形态，结果永不为空
//! - [`application_identifier`]：两者组合，用于从文件元数据派生应用标识
//!
//! 发布者标识只做 [`sanitize`]，不去版本后缀。
//!
//! 作者：应用迁移工具项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::source::VersionInfo;

/// 无法得到名称时使用的占位文本。
pub const UNKNOWN: &str = "Unknown";

const UNSAFE_CHARS: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

// 顺序即应用顺序，均锚定到结尾。裸数字版本须以空白与名称分隔。
static VERSION_SUFFIXES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"\s+\d+(?:\.\d+)+\s*$").unwrap(),
        Regex::new(r"\s*\b[vV]\d+(?:\.\d+)*\s*$").unwrap(),
        Regex::new(r"\s+\d{4}\s*$").unwrap(),
        Regex::new(r"\s*\(\s*\d+(?:\.\d+)*\s*\)\s*$").unwrap(),
        Regex::new(r"(?i)\s*\b(?:version|ver\.)\s*\d+(?:\.\d+)*\s*$").unwrap(),
    ]
});

static LOOSE_VERSION_TAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:[\s_-]*(?:\(\d+\)|\bv?\d+(?:[._]\d+)*))+\s*$").unwrap()
});

/// 将 `\ / : * ? " < > |` 替换为 `_`。
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// 去掉产品名末尾的版本号。
///
/// 依次移除：点分数字版本、`v` 前缀版本、四位年份、括号内数字版本、`version`/`Ver.` 加数字版本。
///
/// 返回值：
/// - 去除并修剪后非空：清理后的名称
/// - 否则：原始名称经 [`sanitize`] 后的结果
pub fn strip_version_suffix(product_name: &str) -> String {
    let mut cleaned = product_name.to_string();
    for pattern in VERSION_SUFFIXES.iter() {
        cleaned = pattern.replace(&cleaned, "").into_owned();
    }
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        sanitize(product_name)
    } else {
        cleaned.to_string()
    }
}

/// 由产品名派生应用标识：先去版本后缀，再替换不安全字符。
pub fn application_identifier(product_name: &str) -> String {
    sanitize(&strip_version_suffix(product_name))
}

/// 更宽松的末尾版本片段清理（数字序列、`v` 前缀版本、括号计数），用于检测规则的文件夹提示。
///
/// 返回值：
/// - 清理后为空时返回修剪后的原始名称
pub fn strip_trailing_version_tokens(name: &str) -> String {
    let cleaned = LOOSE_VERSION_TAIL.replace(name, "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        name.trim().to_string()
    } else {
        cleaned.to_string()
    }
}

/// 发布者 + 应用名称对（均已规范化，可直接用作目录名）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamePair {
    pub publisher: String,
    pub application: String,
}

impl NamePair {
    /// 由旧系统应用记录派生名称。
    ///
    /// 参数：
    /// - `manufacturer` / `display_name`：旧系统记录中的发布者与显示名
    /// - `version_info`：安装文件中读取的版本信息（记录缺字段时补充）
    pub fn from_record(manufacturer: &str, display_name: &str, version_info: Option<&VersionInfo>) -> Self {
        let publisher = first_non_blank([
            Some(manufacturer),
            version_info.and_then(|v| v.company_name.as_deref()),
        ]);
        let application = first_non_blank([
            Some(display_name),
            version_info.and_then(|v| v.product_name.as_deref()),
        ]);
        Self {
            publisher: publisher.map(sanitize).unwrap_or_else(|| UNKNOWN.to_string()),
            application: application
                .map(application_identifier)
                .unwrap_or_else(|| UNKNOWN.to_string()),
        }
    }

    /// 由新发现的安装文件派生名称（没有旧系统记录）。
    ///
    /// 说明：
    /// - 发布者取公司名，缺失时为 `Unknown`
    /// - 应用名取产品名（去版本后缀），缺失时为文件名主干
    pub fn from_file(version_info: Option<&VersionInfo>, file_stem: &str) -> Self {
        let publisher = first_non_blank([version_info.and_then(|v| v.company_name.as_deref())]);
        let product = first_non_blank([version_info.and_then(|v| v.product_name.as_deref())]);
        let application = match product {
            Some(p) => application_identifier(p),
            None if !file_stem.trim().is_empty() => sanitize(file_stem.trim()),
            None => UNKNOWN.to_string(),
        };
        Self {
            publisher: publisher.map(sanitize).unwrap_or_else(|| UNKNOWN.to_string()),
            application,
        }
    }
}

fn first_non_blank<'a, const N: usize>(candidates: [Option<&'a str>; N]) -> Option<&'a str> {
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
}
