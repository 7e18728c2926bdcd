//! 控制台交互（确认、选择、清单复核）。
//!
//! 约定：
//! - 标准输入结束（EOF）视为“否/取消”
//! - 复核时直接回车保留原值
//!
//! 作者：应用迁移工具项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::io::{BufRead, Write};

use cm2intune_core::detection::DetectionRule;
use cm2intune_core::interaction::Operator;
use cm2intune_core::manifest::{PackageManifest, ReviewDetection};

/// 读写任意行流的操作员实现（控制台使用 stdin/stdout）。
pub struct ConsoleOperator<R, W> {
    input: R,
    output: W,
}

impl ConsoleOperator<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> ConsoleOperator<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, prompt: &str) -> Option<String> {
        let _ = write!(self.output, "{prompt}");
        let _ = self.output.flush();
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }

    /// 带默认值的字段输入；回车保留原值。`None` 表示输入已结束。
    fn edit(&mut self, label: &str, current: &str) -> Option<String> {
        let answer = self.ask(&format!("{label} [{current}]: "))?;
        let answer = answer.trim();
        Some(if answer.is_empty() { current.to_string() } else { answer.to_string() })
    }

    fn edit_detection(&mut self, current: &DetectionRule) -> Option<DetectionRule> {
        let current_kind = ReviewDetection::of(current);
        let shown = match current_kind {
            Some(ReviewDetection::Msi) => "msi",
            Some(ReviewDetection::File) => "file",
            None => "registry",
        };
        let kind = loop {
            let answer = self.ask(&format!("检测方式 msi/file [{shown}]: "))?;
            if answer.trim().is_empty() {
                break current_kind;
            }
            match ReviewDetection::parse(&answer) {
                Some(k) => break Some(k),
                None => {
                    let _ = writeln!(self.output, "只能选择 msi 或 file");
                }
            }
        };
        let Some(kind) = kind else {
            // 注册表规则只能保留原样。
            return Some(current.clone());
        };
        let (first, second) = match (kind, current) {
            (ReviewDetection::Msi, DetectionRule::Msi { product_code }) => (product_code.clone(), String::new()),
            (ReviewDetection::File, DetectionRule::File { path, file_or_folder }) => {
                (path.clone(), file_or_folder.clone())
            }
            _ => (String::new(), String::new()),
        };
        Some(match kind {
            ReviewDetection::Msi => {
                let code = self.edit("产品代码", &first)?;
                kind.rule(&code, "")
            }
            ReviewDetection::File => {
                let path = self.edit("检测目录", &first)?;
                let name = self.edit("文件/文件夹名", &second)?;
                kind.rule(&path, &name)
            }
        })
    }
}

impl<R: BufRead, W: Write> Operator for ConsoleOperator<R, W> {
    fn confirm(&mut self, prompt: &str) -> bool {
        matches!(
            self.ask(&format!("{prompt} [y/N]: ")).map(|a| a.trim().to_ascii_lowercase()).as_deref(),
            Some("y") | Some("yes")
        )
    }

    fn select(&mut self, title: &str, items: &[String]) -> Option<usize> {
        if items.is_empty() {
            return None;
        }
        let _ = writeln!(self.output, "{title}");
        for (i, item) in items.iter().enumerate() {
            let _ = writeln!(self.output, "  {}) {}", i + 1, item);
        }
        loop {
            let answer = self.ask("请输入序号（回车取消）: ")?;
            let answer = answer.trim();
            if answer.is_empty() {
                return None;
            }
            match answer.parse::<usize>() {
                Ok(n) if (1..=items.len()).contains(&n) => return Some(n - 1),
                _ => {
                    let _ = writeln!(self.output, "无效序号: {answer}");
                }
            }
        }
    }

    fn review(&mut self, manifest: PackageManifest) -> Option<PackageManifest> {
        let _ = writeln!(self.output, "复核打包清单（回车保留原值）:");
        let mut m = manifest;
        m.publisher = self.edit("发布者", &m.publisher)?;
        m.application_name = self.edit("应用名称", &m.application_name)?;
        m.version = self.edit("版本", &m.version)?;
        m.install_command = self.edit("安装命令", &m.install_command)?;
        m.uninstall_command = self.edit("卸载命令", &m.uninstall_command)?;
        m.detection = self.edit_detection(&m.detection)?;
        m.requirements.architecture = self.edit("架构", &m.requirements.architecture)?;
        m.requirements.minimum_os = self.edit("最低系统版本", &m.requirements.minimum_os)?;
        m.metadata.description = self.edit("描述", &m.metadata.description)?;
        self.confirm("保存该清单？").then(|| m.reviewed())
    }
}

#[cfg(test)]
mod tests {
    use cm2intune_core::manifest::PackageManifest;

    use super::*;

    fn operator(input: &str) -> ConsoleOperator<&[u8], Vec<u8>> {
        ConsoleOperator::new(input.as_bytes(), Vec::new())
    }

    #[test]
    fn confirm_and_select() {
        assert!(operator("y\n").confirm("继续？"));
        assert!(!operator("\n").confirm("继续？"));
        assert!(!operator("").confirm("继续？"));
        let items = vec!["a.msi (1 KB)".to_string(), "b.exe (2 KB)".to_string()];
        assert_eq!(operator("9\n2\n").select("选择", &items), Some(1));
        assert_eq!(operator("\n").select("选择", &items), None);
    }

    #[test]
    /// 注册表规则在复核中保持不变；其余字段回车保留。
    fn review_keeps_registry_and_applies_edits() {
        let manifest = PackageManifest::from_json(
            r#"{
            "publisher": "Contoso", "application_name": "Widget", "version": "1.0",
            "display_name": "Contoso - Widget - 1.0",
            "install_command": "setup.exe /S", "uninstall_command": "",
            "detection": { "registry": { "key_path": "HKEY_LOCAL_MACHINE\\X", "value_name": "DisplayName" } },
            "metadata": { "category": "Win32 (EXE)", "description": "d", "created": "2026-10-19",
              "updated": "2026-10-19", "created_by": "a", "updated_by": "a",
              "source_file_name": "setup.exe", "total_files": 1, "total_size": 1,
              "origin": { "kind": "file", "source_path": "setup.exe" } }
        }"#,
        )
        .unwrap();
        let input = "\n\n2.0\n\nuninst.exe /S\n\n\n\n\ny\n";
        let reviewed = operator(input).review(manifest.clone()).unwrap();
        assert_eq!(reviewed.version, "2.0");
        assert_eq!(reviewed.display_name, "Contoso - Widget - 2.0");
        assert_eq!(reviewed.uninstall_command, "uninst.exe /S");
        assert_eq!(reviewed.detection, manifest.detection);

        let switched = operator("\n\n\n\n\nfile\n%ProgramFiles%\\Contoso\nWidget\n\n\n\ny\n")
            .review(manifest.clone())
            .unwrap();
        assert_eq!(
            switched.detection,
            DetectionRule::File { path: r"%ProgramFiles%\Contoso".into(), file_or_folder: "Widget".into() }
        );

        assert!(operator("\n\n\n\n\n\n\n\n\nn\n").review(manifest).is_none());
    }
}
