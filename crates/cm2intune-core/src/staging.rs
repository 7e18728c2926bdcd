//! 暂存目录约定与落盘。
//!
//! 目录结构（名称固定）：
//! ```text
//! <base>/<Publisher>/<Application>/<Version>/
//!     _Sourcefiles/                       安装文件及同目录文件
//!     Documents/PackageManifest.json      打包清单
//!     Icon/app_icon.<ext>                 可选，扩展名按文件头判断
//!     intunewin/                          打包产物的带时间戳备份
//! ```
//!
//! 约定：
//! - 版本目录已存在且非空时，除非显式 `force`，否则拒绝覆盖
//! - 批量复制按进度输出 INFO 日志；中途失败会留下部分内容，可用 `force` 重跑覆盖
//!
//! 作者：应用迁移工具项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::manifest::PackageManifest;
use crate::naming::sanitize;
use crate::source::SourceFileInfo;

pub const SOURCE_DIR: &str = "_Sourcefiles";
pub const DOCUMENTS_DIR: &str = "Documents";
pub const MANIFEST_FILE: &str = "PackageManifest.json";
pub const ICON_DIR: &str = "Icon";
pub const ICON_STEM: &str = "app_icon";
pub const CONTAINER_DIR: &str = "intunewin";

/// 暂存阶段的错误。
#[derive(Debug, Error)]
pub enum StagingError {
    /// 目标版本目录已存在且未指定覆盖。
    #[error("暂存目录已存在（可使用 --force 覆盖）: {0}")]
    AlreadyExists(PathBuf),
    #[error("文件操作失败: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("生成时间戳失败: {0}")]
    Timestamp(#[from] time::error::Format),
    #[error(transparent)]
    Manifest(#[from] anyhow::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StagingError + '_ {
    move |source| StagingError::Io { path: path.to_path_buf(), source }
}

/// 单个应用版本的暂存目录布局。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingLayout {
    version_dir: PathBuf,
}

impl StagingLayout {
    /// 由基准目录与名称三元组计算版本目录（各段均做不安全字符替换）。
    pub fn new(base: &Path, publisher: &str, application: &str, version: &str) -> Self {
        Self {
            version_dir: base
                .join(sanitize(publisher.trim()))
                .join(sanitize(application.trim()))
                .join(sanitize(version.trim())),
        }
    }

    /// 由已有版本目录构造（`package`/`publish` 命令使用）。
    pub fn at(version_dir: impl Into<PathBuf>) -> Self {
        Self { version_dir: version_dir.into() }
    }

    pub fn for_manifest(base: &Path, manifest: &PackageManifest) -> Self {
        Self::new(base, &manifest.publisher, &manifest.application_name, &manifest.version)
    }

    pub fn version_dir(&self) -> &Path {
        &self.version_dir
    }

    pub fn source_dir(&self) -> PathBuf {
        self.version_dir.join(SOURCE_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.version_dir.join(DOCUMENTS_DIR).join(MANIFEST_FILE)
    }

    pub fn icon_path(&self, ext: &str) -> PathBuf {
        self.version_dir.join(ICON_DIR).join(format!("{ICON_STEM}.{ext}"))
    }

    pub fn container_dir(&self) -> PathBuf {
        self.version_dir.join(CONTAINER_DIR)
    }

    /// 版本目录存在且非空。
    pub fn is_occupied(&self) -> bool {
        std::fs::read_dir(&self.version_dir)
            .map(|mut it| it.next().is_some())
            .unwrap_or(false)
    }
}

/// 暂存结果摘要。
#[derive(Debug, Clone)]
pub struct StagedPackage {
    pub layout: StagingLayout,
    pub copied_files: usize,
    pub copied_bytes: u64,
    pub icon: Option<PathBuf>,
}

/// 落盘一次迁移的全部产物：复制源文件、写清单、写图标。
///
/// 参数：
/// - `force`：版本目录已存在时是否先清空再写入
pub fn stage(
    layout: &StagingLayout,
    source: &SourceFileInfo,
    manifest: &PackageManifest,
    icon_payload: Option<&str>,
    force: bool,
) -> Result<StagedPackage, StagingError> {
    let version_dir = layout.version_dir();
    if layout.is_occupied() {
        if !force {
            return Err(StagingError::AlreadyExists(version_dir.to_path_buf()));
        }
        warn!("覆盖已有暂存目录: {}", version_dir.display());
        std::fs::remove_dir_all(version_dir).map_err(io_err(version_dir))?;
    }
    ensure_dir(version_dir)?;

    match write_contents(layout, source, manifest, icon_payload) {
        Ok(staged) => Ok(staged),
        Err(e) => {
            // 半成品目录不保留，下次尝试无需 --force。
            if let Err(cleanup) = std::fs::remove_dir_all(version_dir) {
                warn!("清理暂存目录失败: {}: {}", version_dir.display(), cleanup);
            }
            Err(e)
        }
    }
}

fn write_contents(
    layout: &StagingLayout,
    source: &SourceFileInfo,
    manifest: &PackageManifest,
    icon_payload: Option<&str>,
) -> Result<StagedPackage, StagingError> {
    let (copied_files, copied_bytes) = copy_sources(source, &layout.source_dir())?;
    manifest.save(&layout.manifest_path())?;
    info!("已写入打包清单: {}", layout.manifest_path().display());

    let icon = match icon_payload.and_then(decode_icon) {
        Some((bytes, ext)) => {
            let path = layout.icon_path(ext);
            if let Some(parent) = path.parent() {
                ensure_dir(parent)?;
            }
            std::fs::write(&path, bytes).map_err(io_err(&path))?;
            debug!("已写入图标: {}", path.display());
            Some(path)
        }
        None => None,
    };
    ensure_dir(&layout.container_dir())?;

    Ok(StagedPackage { layout: layout.clone(), copied_files, copied_bytes, icon })
}

/// 将安装文件所在目录的全部文件复制到 `dest`，保留相对路径。
///
/// 返回值：
/// - `(文件数, 字节数)`
pub fn copy_sources(source: &SourceFileInfo, dest: &Path) -> Result<(usize, u64), StagingError> {
    ensure_dir(dest)?;
    let total = source.total_files();
    let total_bytes = source.total_size();
    let mut copied_bytes = 0u64;
    let mut last_decile = 0u64;

    for (i, sibling) in source.siblings.iter().enumerate() {
        let from = source.origin_dir.join(&sibling.relative_path);
        let to = dest.join(&sibling.relative_path);
        if let Some(parent) = to.parent() {
            ensure_dir(parent)?;
        }
        copied_bytes += std::fs::copy(&from, &to).map_err(io_err(&from))?;
        debug!("复制 ({}/{}): {}", i + 1, total, sibling.relative_path.display());

        let decile = if total_bytes == 0 { 10 } else { copied_bytes * 10 / total_bytes };
        if decile > last_decile || i + 1 == total {
            last_decile = decile;
            info!(
                "复制进度: {}/{} 个文件, {}%",
                i + 1,
                total,
                (decile * 10).min(100)
            );
        }
    }
    Ok((total, copied_bytes))
}

/// 解码 base64 图标并按文件头判断扩展名。
///
/// 返回值：
/// - 解码失败或为空时返回 `None`
pub fn decode_icon(payload: &str) -> Option<(Vec<u8>, &'static str)> {
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }
    match STANDARD.decode(compact.as_bytes()) {
        Ok(bytes) if !bytes.is_empty() => {
            let ext = icon_extension(&bytes);
            Some((bytes, ext))
        }
        Ok(_) => None,
        Err(e) => {
            warn!("图标数据不是有效的 base64: {}", e);
            None
        }
    }
}

/// 文件头判断图片类型；无法识别时按 png 处理。
pub fn icon_extension(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "jpg"
    } else if bytes.starts_with(b"BM") {
        "bmp"
    } else if bytes.starts_with(&[0x00, 0x00, 0x01, 0x00]) {
        "ico"
    } else {
        "png"
    }
}

/// 将打包产物复制到 `intunewin/` 下，文件名追加 `_yyyyMMdd_HHmmss`。
pub fn backup_container(layout: &StagingLayout, artifact: &Path) -> Result<PathBuf, StagingError> {
    let dir = layout.container_dir();
    ensure_dir(&dir)?;
    let stamp = OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .format(format_description!("[year][month][day]_[hour][minute][second]"))?;
    let stem = artifact
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "package".to_string());
    let dest = dir.join(format!("{stem}_{stamp}.intunewin"));
    std::fs::copy(artifact, &dest).map_err(io_err(artifact))?;
    info!("已备份打包产物: {}", dest.display());
    Ok(dest)
}

/// 确保目录存在（不存在则递归创建）。
pub fn ensure_dir(path: &Path) -> Result<(), StagingError> {
    std::fs::create_dir_all(path).map_err(io_err(path))
}
