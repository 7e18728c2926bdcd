//! 打包工具封装（IntuneWinAppUtil.exe）。
//!
//! 调用方式：`IntuneWinAppUtil.exe -c <源目录> -s <安装文件> -o <输出目录> -q`，
//! 产物为输出目录下的 `<安装文件主干>.intunewin`。
//!
//! 作者：应用迁移工具项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use tracing::info;

/// 打包工具。
#[derive(Debug, Clone)]
pub struct IntuneWinPackager {
    pub util: PathBuf,
}

impl IntuneWinPackager {
    pub fn new(util: impl Into<PathBuf>) -> Self {
        Self { util: util.into() }
    }

    /// 打包并返回产物路径。
    ///
    /// 参数：
    /// - `source_dir`：暂存的 `_Sourcefiles` 目录
    /// - `setup_file`：安装文件名（相对 `source_dir`）
    /// - `out_dir`：输出目录（通常是临时目录）
    ///
    /// 异常处理：
    /// - 工具启动失败、退出码非 0、未找到产物时返回错误
    pub fn package(&self, source_dir: &Path, setup_file: &str, out_dir: &Path) -> Result<PathBuf> {
        if !source_dir.join(setup_file).is_file() {
            return Err(anyhow!("安装文件不存在: {}", source_dir.join(setup_file).display()));
        }
        std::fs::create_dir_all(out_dir).with_context(|| format!("创建目录失败: {}", out_dir.display()))?;

        info!("开始打包: {} ({})", source_dir.display(), setup_file);
        let out = Command::new(&self.util)
            .arg("-c")
            .arg(source_dir)
            .arg("-s")
            .arg(setup_file)
            .arg("-o")
            .arg(out_dir)
            .arg("-q")
            .output()
            .with_context(|| format!("启动打包工具失败: {}", self.util.display()))?;
        if !out.status.success() {
            return Err(anyhow!(
                "打包工具退出码 {}: {}",
                out.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&out.stdout).trim()
            ));
        }
        find_artifact(out_dir, setup_file)
            .ok_or_else(|| anyhow!("未找到打包产物: {}", out_dir.display()))
    }
}

/// 在输出目录中查找产物：优先 `<主干>.intunewin`，否则取任意 `.intunewin`。
pub fn find_artifact(out_dir: &Path, setup_file: &str) -> Option<PathBuf> {
    let stem = Path::new(setup_file).file_stem()?.to_string_lossy().to_string();
    let expected = out_dir.join(format!("{stem}.intunewin"));
    if expected.is_file() {
        return Some(expected);
    }
    let mut found: Vec<PathBuf> = std::fs::read_dir(out_dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("intunewin"))
        })
        .collect();
    found.sort();
    found.into_iter().next()
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn artifact_lookup_prefers_setup_stem() {
        let dir = std::env::temp_dir().join(format!("cm2intune-intunewin-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        assert!(find_artifact(&dir, "setup.exe").is_none());
        std::fs::write(dir.join("other.intunewin"), b"x").unwrap();
        assert_eq!(find_artifact(&dir, "setup.exe"), Some(dir.join("other.intunewin")));
        std::fs::write(dir.join("setup.intunewin"), b"x").unwrap();
        assert_eq!(find_artifact(&dir, "setup.exe"), Some(dir.join("setup.intunewin")));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_setup_file_is_rejected_before_launch() {
        let packager = IntuneWinPackager::new("IntuneWinAppUtil.exe");
        let err = packager
            .package(Path::new("/nonexistent/src"), "setup.exe", Path::new("/nonexistent/out"))
            .unwrap_err();
        assert!(err.to_string().contains("安装文件不存在"));
    }
}
