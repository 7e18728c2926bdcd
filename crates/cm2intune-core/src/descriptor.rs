//! 旧系统应用描述（SDM Package XML 摘要）解析。
//!
//! 输入是 MECM 导出的应用描述 XML，结构随版本/部署技术而变化，因此解析只按元素本地名匹配，
//! 不依赖命名空间或固定层级：
//! - 每个含子元素的 `DeploymentType` 生成一条 [`DeploymentTypeFacts`]
//! - 安装/卸载命令取自 `Arg Name="InstallCommandLine"` / `Arg Name="UninstallCommandLine"`
//! - 内容位置取自 `Content/Location`，保持文档顺序
//! - 检测方法只判断 `Arg Name="MethodBody"` 是否存在且非空，不解析其内容
//! - 图标按 [`IconLookup::ORDER`] 依次尝试，每个描述只提取一次
//!
//! 异常处理：
//! - [`try_parse`] 返回带类型的错误；[`parse`] 记录 WARN 后返回空列表，供流程层直接使用
//!
//! 作者：应用迁移工具项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::MigrationError;

/// 单个部署类型中提取出的事实。
///
/// 说明：
/// - `icon_payload` 在同一描述的所有部署类型间共享（同一份 base64 文本）
/// - `technology` 不是封闭集合，下游按区分大小写的字面量比较
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTypeFacts {
    #[serde(default)]
    /// 部署类型标题（仅用于诊断/溯源）。
    pub title: String,
    #[serde(default)]
    /// 安装命令行（可能为空）。
    pub install_command: String,
    #[serde(default)]
    /// 卸载命令行（可能为空）。
    pub uninstall_command: String,
    #[serde(default)]
    /// 内容位置列表（文档顺序）。
    pub content_locations: Vec<String>,
    #[serde(default)]
    /// 是否存在检测方法。
    pub has_detection_method: bool,
    #[serde(default)]
    /// 检测方法的文字描述。
    pub detection_details: String,
    #[serde(default)]
    /// 部署技术（如 `MSI`、`Script`、`MSIX`）。
    pub technology: String,
    #[serde(default)]
    /// 图标数据（base64 文本，已去除空白）。
    pub icon_payload: Option<String>,
}

impl DeploymentTypeFacts {
    pub fn has_install_command(&self) -> bool {
        !self.install_command.trim().is_empty()
    }

    pub fn has_uninstall_command(&self) -> bool {
        !self.uninstall_command.trim().is_empty()
    }

    pub fn has_content_location(&self) -> bool {
        !self.content_locations.is_empty()
    }

    /// 第一个内容位置（后续逻辑只读取第一个）。
    pub fn primary_content_location(&self) -> Option<&str> {
        self.content_locations.first().map(String::as_str)
    }
}

/// 描述解析失败原因。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("应用描述为空")]
    EmptyInput,
    #[error("应用描述不是合法 XML: {0}")]
    MalformedXml(String),
    #[error("应用描述中没有部署类型")]
    NoDeploymentTypes,
}

// 空描述与无部署类型都算输入缺失；只有 XML 本身不合法才是解析失败。
impl From<DescriptorError> for MigrationError {
    fn from(e: DescriptorError) -> Self {
        match e {
            DescriptorError::MalformedXml(_) => MigrationError::ParseFailure(e.to_string()),
            DescriptorError::EmptyInput | DescriptorError::NoDeploymentTypes => {
                MigrationError::InputAbsent(e.to_string())
            }
        }
    }
}

/// 图标提取策略（按 [`IconLookup::ORDER`] 顺序尝试，首个非空结果胜出）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconLookup {
    /// 约定路径：`<root>/Resources/Icon`。
    Resources,
    /// 备选路径：`<root>/Application/DisplayInfo/**/Icon`。
    DisplayInfo,
    /// 全文档搜索任意 `Icon` 元素。
    AnyIconElement,
}

impl IconLookup {
    pub const ORDER: [IconLookup; 3] = [
        IconLookup::Resources,
        IconLookup::DisplayInfo,
        IconLookup::AnyIconElement,
    ];

    /// 按当前策略在文档中查找图标数据。
    ///
    /// 返回值：
    /// - 找到非空数据：去除全部空白后的文本
    /// - 否则 `None`
    pub fn try_extract(self, doc: &Document) -> Option<String> {
        let root = doc.root_element();
        match self {
            IconLookup::Resources => children_named(root, "Resources")
                .flat_map(|r| children_named(r, "Icon"))
                .find_map(icon_text),
            IconLookup::DisplayInfo => children_named(root, "Application")
                .flat_map(|a| children_named(a, "DisplayInfo"))
                .flat_map(|d| d.descendants().filter(|n| is_named(n, "Icon")))
                .find_map(icon_text),
            IconLookup::AnyIconElement => doc
                .descendants()
                .filter(|n| is_named(n, "Icon"))
                .find_map(icon_text),
        }
    }
}

/// 解析应用描述，失败时返回具体原因。
///
/// 参数：
/// - `xml`：SDM Package XML 文本
///
/// 返回值：
/// - 成功：至少包含一条 [`DeploymentTypeFacts`]
///
/// 异常处理：
/// - 空白输入：`EmptyInput`
/// - XML 语法错误：`MalformedXml`
/// - 没有任何含内容的 `DeploymentType` 元素：`NoDeploymentTypes`
pub fn try_parse(xml: &str) -> Result<Vec<DeploymentTypeFacts>, DescriptorError> {
    if xml.trim().is_empty() {
        return Err(DescriptorError::EmptyInput);
    }
    let doc = Document::parse(strip_declaration(xml))
        .map_err(|e| DescriptorError::MalformedXml(e.to_string()))?;

    let icon_payload = extract_icon(&doc);

    // Application/DeploymentTypes 下的同名元素只是引用（无子元素），不计入。
    let facts: Vec<DeploymentTypeFacts> = doc
        .descendants()
        .filter(|n| is_named(n, "DeploymentType") && n.children().any(|c| c.is_element()))
        .map(|dt| parse_deployment_type(dt, icon_payload.clone()))
        .collect();

    if facts.is_empty() {
        return Err(DescriptorError::NoDeploymentTypes);
    }
    Ok(facts)
}

/// 解析应用描述；失败时记录 WARN 并返回空列表。
///
/// 参数：
/// - `xml`：SDM Package XML 文本
/// - `app_name`：应用名（仅用于日志）
pub fn parse(xml: &str, app_name: &str) -> Vec<DeploymentTypeFacts> {
    match try_parse(xml) {
        Ok(facts) => {
            debug!("解析应用描述完成: {} ({} 个部署类型)", app_name, facts.len());
            facts
        }
        Err(e) => {
            warn!("应用描述不可用: {}: {}", app_name, MigrationError::from(e));
            Vec::new()
        }
    }
}

/// 依次尝试各图标策略，返回首个非空结果。
pub fn extract_icon(doc: &Document) -> Option<String> {
    IconLookup::ORDER.iter().find_map(|lookup| {
        let found = lookup.try_extract(doc);
        if found.is_some() {
            debug!("图标来源: {:?}", lookup);
        }
        found
    })
}

fn parse_deployment_type(dt: Node, icon_payload: Option<String>) -> DeploymentTypeFacts {
    let install_command = args_named(dt, "InstallCommandLine")
        .find(|arg| !within(*arg, "UninstallAction"))
        .map(arg_text)
        .unwrap_or_default();

    let uninstall_command = args_named(dt, "UninstallCommandLine")
        .next()
        .or_else(|| args_named(dt, "InstallCommandLine").find(|arg| within(*arg, "UninstallAction")))
        .map(arg_text)
        .unwrap_or_default();

    let content_locations = dt
        .descendants()
        .filter(|n| is_named(n, "Location") && n.parent().is_some_and(|p| is_named(&p, "Content")))
        .map(element_text)
        .filter(|s| !s.is_empty())
        .collect();

    let method_body = args_named(dt, "MethodBody").map(arg_text).find(|s| !s.is_empty());
    let has_detection_method = method_body.is_some();

    let provider = dt
        .descendants()
        .find(|n| is_named(n, "DetectAction"))
        .and_then(|a| children_named(a, "Provider").next())
        .map(element_text)
        .unwrap_or_default();
    let detection_details = match (&method_body, provider.is_empty()) {
        (Some(body), false) => format!("Provider={provider}; MethodBody ({} chars)", body.len()),
        (Some(body), true) => format!("MethodBody ({} chars)", body.len()),
        (None, false) => format!("Provider={provider}; no MethodBody"),
        (None, true) => String::new(),
    };

    let technology = children_named(dt, "Technology")
        .next()
        .map(element_text)
        .filter(|s| !s.is_empty())
        .or_else(|| {
            dt.descendants()
                .find(|n| is_named(n, "Installer"))
                .and_then(|n| n.attribute("Technology"))
                .map(|s| s.trim().to_string())
        })
        .unwrap_or_default();

    let title = children_named(dt, "Title").next().map(element_text).unwrap_or_default();

    DeploymentTypeFacts {
        title,
        install_command,
        uninstall_command,
        content_locations,
        has_detection_method,
        detection_details,
        technology,
        icon_payload,
    }
}

/// MECM 导出的描述常带 `encoding="utf-16"` 声明，而文本此时已是 UTF-8，直接跳过声明。
fn strip_declaration(xml: &str) -> &str {
    let trimmed = xml.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with("<?xml") {
        if let Some(end) = trimmed.find("?>") {
            return &trimmed[end + 2..];
        }
    }
    trimmed
}

fn is_named(node: &Node, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn children_named<'a, 'input>(
    node: Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(move |c| is_named(c, name))
}

fn args_named<'a, 'input>(
    scope: Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    scope
        .descendants()
        .filter(move |n| is_named(n, "Arg") && n.attribute("Name") == Some(name))
}

fn within(node: Node, ancestor: &str) -> bool {
    node.ancestors().any(|a| is_named(&a, ancestor))
}

fn element_text(node: Node) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect::<String>()
        .trim()
        .to_string()
}

fn arg_text(node: Node) -> String {
    element_text(node)
}

fn icon_text(icon: Node) -> Option<String> {
    let data = children_named(icon, "Data").next().unwrap_or(icon);
    let text: String = data
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .flat_map(|t| t.chars())
        .filter(|c| !c.is_whitespace())
        .collect();
    (!text.is_empty()).then_some(text)
}
