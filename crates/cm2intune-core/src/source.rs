//! 安装源定位。
//!
//! 分两步：
//! - [`plan_candidates`]：纯查找/排序，生成候选目录列表（智能路径匹配在前，声明的内容位置在后）
//! - [`resolve`]：按顺序消费候选，必要时请求操作员确认/选择，返回首个被接受的安装文件
//!
//! 智能路径匹配：
//! - 在备用源根目录下按 `{发布者}/{产品}/{版本}`、`{发布者}/{产品}`、`{产品}/{版本}`、`{产品}` 四种形态组合
//! - 版本未知时使用通配：列出子目录，按名称降序逐个尝试（“名称最大即最新”的启发式）
//! - 候选目录必须直接包含 `.exe/.msi/.msix/.appx` 文件才算命中，且需操作员确认
//!
//! 异常处理：
//! - 目录不可访问、元数据读取失败均记录日志并跳到下一个候选，不向上抛错
//!
//! 作者：应用迁移工具项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::interaction::Operator;
use crate::naming::{sanitize, UNKNOWN};

/// 视为安装文件的扩展名（不区分大小写）。
pub const INSTALLER_EXTENSIONS: [&str; 4] = ["exe", "msi", "msix", "appx"];

static VERSION_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[vV]?\d+(?:[._]\d+)+$").unwrap());

/// 从安装文件读取的版本资源/MSI 属性。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(default)]
    pub file_version: Option<String>,
    #[serde(default)]
    pub product_version: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub file_description: Option<String>,
    #[serde(default)]
    /// 仅 MSI 有值。
    pub product_code: Option<String>,
}

impl VersionInfo {
    /// 优先产品版本，其次文件版本。
    pub fn best_version(&self) -> Option<&str> {
        [self.product_version.as_deref(), self.file_version.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
    }

    /// 是否一个字段都没有读到。
    pub fn is_empty(&self) -> bool {
        *self == VersionInfo::default()
    }
}

/// 版本信息读取能力（平台相关实现见 Windows 封装层）。
///
/// 约定：
/// - 任何失败都返回 `None`（记录日志），不得中止调用方
pub trait VersionProbe {
    fn extract(&self, path: &Path) -> Option<VersionInfo>;
}

/// 不读取任何版本信息的实现。
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVersionProbe;

impl VersionProbe for NoVersionProbe {
    fn extract(&self, _path: &Path) -> Option<VersionInfo> {
        None
    }
}

/// 与安装文件同目录（含子目录）的文件。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiblingFile {
    /// 相对 `origin_dir` 的路径。
    pub relative_path: PathBuf,
    pub size: u64,
}

/// 已定位的安装文件及其所在目录的全部文件。
///
/// 生命周期：
/// - 每次迁移尝试由 [`resolve`] 创建一次，之后只读
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFileInfo {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
    #[serde(default)]
    pub version_info: Option<VersionInfo>,
    pub origin_dir: PathBuf,
    #[serde(default)]
    pub siblings: Vec<SiblingFile>,
}

impl SourceFileInfo {
    /// 采集安装文件信息：读取版本信息并枚举所在目录的全部文件。
    ///
    /// 异常处理：
    /// - 安装文件本身不可读时返回错误；单个兄弟文件元数据读取失败只记录 WARN
    pub fn collect(path: &Path, probe: &dyn VersionProbe) -> std::io::Result<Self> {
        let size = std::fs::metadata(path)?.len();
        let origin_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut siblings = Vec::new();
        for entry in WalkDir::new(&origin_dir).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("枚举源目录失败: {}: {}", origin_dir.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let size = match entry.metadata() {
                Ok(m) => m.len(),
                Err(e) => {
                    warn!("读取文件大小失败: {}: {}", entry.path().display(), e);
                    0
                }
            };
            let relative_path = entry
                .path()
                .strip_prefix(&origin_dir)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| entry.path().to_path_buf());
            siblings.push(SiblingFile { relative_path, size });
        }

        let version_info = probe.extract(path).filter(|v| !v.is_empty());
        if version_info.is_none() {
            debug!("未读取到版本信息: {}", path.display());
        }

        Ok(Self {
            path: path.to_path_buf(),
            file_name,
            size,
            version_info,
            origin_dir,
            siblings,
        })
    }

    pub fn is_msi(&self) -> bool {
        has_extension(&self.path, "msi")
    }

    /// MSI 产品代码（非 MSI 或未读取到时为 `None`）。
    pub fn product_code(&self) -> Option<&str> {
        self.version_info
            .as_ref()
            .and_then(|v| v.product_code.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn file_stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn total_files(&self) -> usize {
        self.siblings.len()
    }

    pub fn total_size(&self) -> u64 {
        self.siblings.iter().map(|s| s.size).sum()
    }
}

/// 定位查询参数。
#[derive(Debug, Clone, Default)]
pub struct SourceQuery<'a> {
    /// 描述中声明的内容位置（按声明顺序）。
    pub content_locations: &'a [String],
    pub publisher: &'a str,
    pub product: &'a str,
    pub version: &'a str,
    /// 备用源根目录（配置项；不存在时跳过智能匹配）。
    pub alternate_root: Option<&'a Path>,
}

/// 智能匹配的路径形态。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathPattern {
    /// 具体目录。
    Exact(PathBuf),
    /// 该目录下任意子目录（版本通配）。
    AnyVersionUnder(PathBuf),
}

/// 候选目录来源。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOrigin {
    SmartMatch,
    Declared,
}

/// 已确认存在且直接包含安装文件的候选目录。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateDir {
    pub dir: PathBuf,
    pub origin: CandidateOrigin,
}

impl CandidateDir {
    /// 智能匹配得到的目录需要操作员确认。
    pub fn requires_confirmation(&self) -> bool {
        self.origin == CandidateOrigin::SmartMatch
    }
}

/// 候选目录中的安装文件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerFile {
    pub path: PathBuf,
    pub size: u64,
}

/// 生成智能匹配的路径形态（不访问文件系统）。
///
/// 版本来源：
/// - 声明的版本
/// - 内容位置路径中形如版本号的目录段
/// - 都没有时使用通配
pub fn smart_match_patterns(query: &SourceQuery, root: &Path) -> Vec<PathPattern> {
    let product = sanitize(query.product.trim());
    if product.is_empty() {
        return Vec::new();
    }
    let publisher = sanitize(query.publisher.trim());
    let has_publisher = !publisher.is_empty() && publisher != UNKNOWN;

    let versions = candidate_versions(query);

    let mut patterns = Vec::new();
    if versions.is_empty() {
        if has_publisher {
            patterns.push(PathPattern::AnyVersionUnder(root.join(&publisher).join(&product)));
            patterns.push(PathPattern::Exact(root.join(&publisher).join(&product)));
        }
        patterns.push(PathPattern::AnyVersionUnder(root.join(&product)));
        patterns.push(PathPattern::Exact(root.join(&product)));
    } else {
        for version in &versions {
            if has_publisher {
                patterns.push(PathPattern::Exact(
                    root.join(&publisher).join(&product).join(version),
                ));
                patterns.push(PathPattern::Exact(root.join(&publisher).join(&product)));
            }
            patterns.push(PathPattern::Exact(root.join(&product).join(version)));
            patterns.push(PathPattern::Exact(root.join(&product)));
        }
    }

    let mut seen = HashSet::new();
    patterns.retain(|p| seen.insert(p.clone()));
    patterns
}

fn candidate_versions(query: &SourceQuery) -> Vec<String> {
    let mut versions = Vec::new();
    let declared = sanitize(query.version.trim());
    if !declared.is_empty() {
        versions.push(declared);
    }
    for location in query.content_locations {
        for segment in location.split(['\\', '/']) {
            let segment = segment.trim();
            if VERSION_SEGMENT.is_match(segment) && !versions.iter().any(|v| v == segment) {
                versions.push(segment.to_string());
            }
        }
    }
    versions
}

/// 列出直接位于目录中的安装文件（按文件名排序）。
///
/// 异常处理：
/// - 目录不可读时返回空列表并记录 DEBUG
pub fn installers_in(dir: &Path) -> Vec<InstallerFile> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            debug!("读取目录失败: {}: {}", dir.display(), e);
            return Vec::new();
        }
    };
    let mut files: Vec<InstallerFile> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .filter(|p| INSTALLER_EXTENSIONS.iter().any(|ext| has_extension(p, ext)))
        .map(|path| {
            let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            InstallerFile { path, size }
        })
        .collect();
    files.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
    files
}

/// 生成排好序的候选目录列表。
///
/// 顺序：
/// 1) 备用源根目录存在时的智能匹配结果（通配目录按名称降序展开）
/// 2) 声明的内容位置（跳过空值，按声明顺序）
///
/// 只保留存在且直接包含安装文件的目录；重复目录只保留第一次出现。
pub fn plan_candidates(query: &SourceQuery) -> Vec<CandidateDir> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();

    if let Some(root) = query.alternate_root.filter(|r| r.is_dir()) {
        for pattern in smart_match_patterns(query, root) {
            for dir in expand_pattern(&pattern) {
                if seen.insert(dir.clone()) && !installers_in(&dir).is_empty() {
                    out.push(CandidateDir { dir, origin: CandidateOrigin::SmartMatch });
                }
            }
        }
    } else if let Some(root) = query.alternate_root {
        debug!("备用源根目录不存在，跳过智能匹配: {}", root.display());
    }

    for location in query.content_locations {
        let location = location.trim();
        if location.is_empty() {
            continue;
        }
        let dir = PathBuf::from(location);
        if seen.insert(dir.clone()) && dir.is_dir() && !installers_in(&dir).is_empty() {
            out.push(CandidateDir { dir, origin: CandidateOrigin::Declared });
        }
    }
    out
}

fn expand_pattern(pattern: &PathPattern) -> Vec<PathBuf> {
    match pattern {
        PathPattern::Exact(dir) => {
            if dir.is_dir() {
                vec![dir.clone()]
            } else {
                Vec::new()
            }
        }
        PathPattern::AnyVersionUnder(parent) => {
            let Ok(entries) = std::fs::read_dir(parent) else {
                return Vec::new();
            };
            let mut dirs: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
                .map(|e| e.path())
                .collect();
            dirs.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
            dirs
        }
    }
}

/// 按顺序消费候选目录，返回首个被接受的安装文件信息。
///
/// 交互：
/// - 智能匹配目录需操作员确认；拒绝则继续下一个候选
/// - 目录内只有一个安装文件时自动选中；多个时请操作员选择，取消则继续下一个候选
///
/// 返回值：
/// - 全部候选都未被接受时返回 `None`
pub fn resolve(
    candidates: &[CandidateDir],
    operator: &mut dyn Operator,
    probe: &dyn VersionProbe,
) -> Option<SourceFileInfo> {
    for candidate in candidates {
        let installers = installers_in(&candidate.dir);
        if installers.is_empty() {
            continue;
        }
        if candidate.requires_confirmation() {
            let prompt = format!(
                "在 {} 找到 {} 个安装文件，是否使用该位置？",
                candidate.dir.display(),
                installers.len()
            );
            if !operator.confirm(&prompt) {
                info!("操作员未采用候选目录: {}", candidate.dir.display());
                continue;
            }
        }

        let chosen = if installers.len() == 1 {
            &installers[0]
        } else {
            let items: Vec<String> = installers
                .iter()
                .map(|f| {
                    let name = f.path.file_name().map(|s| s.to_string_lossy()).unwrap_or_default();
                    format!("{} ({})", name, format_size(f.size))
                })
                .collect();
            let title = format!("选择安装文件: {}", candidate.dir.display());
            match operator.select(&title, &items) {
                Some(i) if i < installers.len() => &installers[i],
                _ => {
                    info!("未选择安装文件，跳过: {}", candidate.dir.display());
                    continue;
                }
            }
        };

        match SourceFileInfo::collect(&chosen.path, probe) {
            Ok(info) => {
                info!(
                    "已定位安装文件: {} ({} 个文件, {})",
                    info.path.display(),
                    info.total_files(),
                    format_size(info.total_size())
                );
                return Some(info);
            }
            Err(e) => warn!("读取安装文件失败: {}: {}", chosen.path.display(), e),
        }
    }
    None
}

/// 定位安装源：[`plan_candidates`] + [`resolve`]。
pub fn locate(
    query: &SourceQuery,
    operator: &mut dyn Operator,
    probe: &dyn VersionProbe,
) -> Option<SourceFileInfo> {
    let candidates = plan_candidates(query);
    debug!("候选源目录: {:?}", candidates);
    let found = resolve(&candidates, operator, probe);
    if found.is_none() {
        warn!("未找到安装文件: {} {}", query.product, query.version);
    }
    found
}

/// 以 B/KB/MB/GB 显示字节数。
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub(crate) fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}
