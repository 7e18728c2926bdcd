//! 可迁移性判定与就绪状态评估。
//!
//! 两个入口：
//! - [`classify`]：完整判定，选出首个满足条件的部署类型并确定迁移类别
//! - [`evaluate_status`]：列表展示用的粗粒度三态徽标，只看第一个部署类型
//!
//! 约定：
//! - 判定只采用“首个满足条件的部署类型”，不跨部署类型聚合
//! - 不可迁移是策略结论而不是错误；操作员可以选择强制继续
//!
//! 作者：应用迁移工具项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::descriptor::DeploymentTypeFacts;

/// 迁移类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationCategory {
    #[serde(rename = "Win32")]
    Win32,
    #[serde(rename = "Win32 (MSI)")]
    Win32Msi,
    #[serde(rename = "Win32 (Script)")]
    Win32Script,
    #[serde(rename = "Win32 (EXE)")]
    Win32Exe,
    #[serde(rename = "Not Suitable")]
    NotSuitable,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl MigrationCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            MigrationCategory::Win32 => "Win32",
            MigrationCategory::Win32Msi => "Win32 (MSI)",
            MigrationCategory::Win32Script => "Win32 (Script)",
            MigrationCategory::Win32Exe => "Win32 (EXE)",
            MigrationCategory::NotSuitable => "Not Suitable",
            MigrationCategory::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for MigrationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 可迁移性判定结果。
///
/// 字段说明：
/// - `category` 仅在 `is_migratable == true` 时有意义；`NotSuitable`/`Unknown` 表示不可迁移
/// - `selected` 为胜出部署类型在 `facts` 中的下标
/// - `facts` 保留全部被检查过的部署类型，便于诊断
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigratabilityVerdict {
    pub is_migratable: bool,
    pub reason: String,
    pub category: MigrationCategory,
    #[serde(default)]
    pub selected: Option<usize>,
    #[serde(default)]
    pub facts: Vec<DeploymentTypeFacts>,
}

impl MigratabilityVerdict {
    /// 胜出的部署类型（不可迁移时为 `None`）。
    pub fn selected_facts(&self) -> Option<&DeploymentTypeFacts> {
        self.selected.and_then(|i| self.facts.get(i))
    }
}

pub const REASON_NO_DATA: &str = "No deployment type data";
pub const REASON_NO_INSTALL: &str = "No install command";
pub const REASON_NO_UNINSTALL: &str = "No uninstall command";
pub const REASON_NO_CONTENT: &str = "No content location";
pub const REASON_NO_DETECTION: &str = "No detection method";
pub const REASON_NO_SINGLE_MATCH: &str = "No single deployment type meets all requirements";

/// 判定一组部署类型是否可以迁移。
///
/// 规则：
/// 1) 按顺序找第一个同时具备安装命令、内容位置、检测方法的部署类型
/// 2) 对该部署类型按优先级确定类别（见 [`category_for`]）
/// 3) 若都不满足：逐项检查“是否有任一部署类型具备”，缺失项以 `"; "` 拼接为原因
///
/// 特殊情况：
/// - 空输入：不可迁移，原因 `No deployment type data`，类别 `Unknown`
pub fn classify(facts: &[DeploymentTypeFacts]) -> MigratabilityVerdict {
    if facts.is_empty() {
        return MigratabilityVerdict {
            is_migratable: false,
            reason: REASON_NO_DATA.to_string(),
            category: MigrationCategory::Unknown,
            selected: None,
            facts: Vec::new(),
        };
    }

    let winner = facts
        .iter()
        .position(|f| f.has_install_command() && f.has_content_location() && f.has_detection_method);

    if let Some(index) = winner {
        let category = category_for(&facts[index]);
        return MigratabilityVerdict {
            is_migratable: true,
            reason: format!("Deployment type {} is suitable ({})", index + 1, category),
            category,
            selected: Some(index),
            facts: facts.to_vec(),
        };
    }

    let checks = [
        (facts.iter().any(DeploymentTypeFacts::has_install_command), REASON_NO_INSTALL),
        (facts.iter().any(DeploymentTypeFacts::has_uninstall_command), REASON_NO_UNINSTALL),
        (facts.iter().any(DeploymentTypeFacts::has_content_location), REASON_NO_CONTENT),
        (facts.iter().any(|f| f.has_detection_method), REASON_NO_DETECTION),
    ];
    let missing: Vec<&str> = checks
        .iter()
        .filter(|(present, _)| !present)
        .map(|(_, reason)| *reason)
        .collect();
    let reason = if missing.is_empty() {
        REASON_NO_SINGLE_MATCH.to_string()
    } else {
        missing.join("; ")
    };

    MigratabilityVerdict {
        is_migratable: false,
        reason,
        category: MigrationCategory::NotSuitable,
        selected: None,
        facts: facts.to_vec(),
    }
}

/// 为胜出的部署类型确定迁移类别。
///
/// 优先级：
/// 1) Technology 字面等于 `MSI`
/// 2) 安装命令包含 `.msi` 或 `msiexec`（不区分大小写）
/// 3) Technology 字面等于 `Script`
/// 4) 安装命令包含 `.exe`（不区分大小写）
/// 5) 其余为通用 `Win32`
pub fn category_for(facts: &DeploymentTypeFacts) -> MigrationCategory {
    let command = facts.install_command.to_ascii_lowercase();
    if facts.technology == "MSI" || command.contains(".msi") || command.contains("msiexec") {
        MigrationCategory::Win32Msi
    } else if facts.technology == "Script" {
        MigrationCategory::Win32Script
    } else if command.contains(".exe") {
        MigrationCategory::Win32Exe
    } else {
        MigrationCategory::Win32
    }
}

/// 列表视图的就绪徽标。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessStatus {
    Ready,
    Check,
    NotReady,
}

impl fmt::Display for ReadinessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReadinessStatus::Ready => "Ready",
            ReadinessStatus::Check => "Check",
            ReadinessStatus::NotReady => "Not Ready",
        })
    }
}

/// 粗粒度评估应用的迁移就绪状态（只看第一个部署类型）。
///
/// 规则：
/// - Technology 包含 `MSIX`（不区分大小写）：无条件 `NotReady`
/// - 否则统计 {安装命令, 内容位置, 检测方法} 中具备的项数：3 → `Ready`，1~2 → `Check`，0 → `NotReady`
/// - 空输入：`NotReady`
pub fn evaluate_status(facts: &[DeploymentTypeFacts]) -> ReadinessStatus {
    let Some(first) = facts.first() else {
        return ReadinessStatus::NotReady;
    };
    if first.technology.to_ascii_lowercase().contains("msix") {
        return ReadinessStatus::NotReady;
    }
    let present = [
        first.has_install_command(),
        first.has_content_location(),
        first.has_detection_method,
    ]
    .iter()
    .filter(|b| **b)
    .count();
    match present {
        3 => ReadinessStatus::Ready,
        0 => ReadinessStatus::NotReady,
        _ => ReadinessStatus::Check,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(technology: &str, install: &str, content: &[&str], detection: bool) -> DeploymentTypeFacts {
        DeploymentTypeFacts {
            technology: technology.to_string(),
            install_command: install.to_string(),
            uninstall_command: "uninstall.exe /S".to_string(),
            content_locations: content.iter().map(|s| s.to_string()).collect(),
            has_detection_method: detection,
            ..Default::default()
        }
    }

    #[test]
    fn empty_input_is_unknown() {
        let v = classify(&[]);
        assert!(!v.is_migratable);
        assert_eq!(v.category, MigrationCategory::Unknown);
        assert_eq!(v.reason, "No deployment type data");
    }

    #[test]
    /// 场景 A：MSI 技术 + 完整信息 → Win32 (MSI)。
    fn msi_deployment_type_is_migratable() {
        let dt = facts("MSI", r#"msiexec /i "app.msi" /quiet"#, &[r"\\srv\share\app"], true);
        let v = classify(&[dt]);
        assert!(v.is_migratable);
        assert_eq!(v.category, MigrationCategory::Win32Msi);
        assert_eq!(v.category.to_string(), "Win32 (MSI)");
        assert_eq!(v.selected, Some(0));
    }

    #[test]
    /// Technology == "MSI" 时不看安装命令内容。
    fn msi_technology_wins_over_command_text() {
        let dt = facts("MSI", "setup.exe /S", &["x"], true);
        assert_eq!(classify(&[dt]).category, MigrationCategory::Win32Msi);
    }

    #[test]
    fn category_priority() {
        assert_eq!(category_for(&facts("Other", "MsiExec.exe /i x", &[], false)), MigrationCategory::Win32Msi);
        assert_eq!(category_for(&facts("Script", "install.cmd", &[], false)), MigrationCategory::Win32Script);
        assert_eq!(category_for(&facts("Script", "setup.MSI", &[], false)), MigrationCategory::Win32Msi);
        assert_eq!(category_for(&facts("Exe", "Setup.EXE /q", &[], false)), MigrationCategory::Win32Exe);
        assert_eq!(category_for(&facts("msi", "install.cmd", &[], false)), MigrationCategory::Win32);
    }

    #[test]
    /// 场景 B：安装命令、内容位置、检测方法都缺失。
    fn missing_requirements_are_listed() {
        let dt = facts("Script", "", &[], false);
        let v = classify(&[dt]);
        assert!(!v.is_migratable);
        assert_eq!(v.category, MigrationCategory::NotSuitable);
        assert_eq!(v.reason, "No install command; No content location; No detection method");
    }

    #[test]
    /// 缺失项按“任一部署类型具备”检查；若各项分散在不同部署类型，则给出统一原因。
    fn requirements_split_across_deployment_types() {
        let a = facts("Script", "install.cmd", &[], false);
        let b = facts("Script", "", &["x"], true);
        let v = classify(&[a, b]);
        assert!(!v.is_migratable);
        assert_eq!(v.reason, REASON_NO_SINGLE_MATCH);

        let mut c = facts("Script", "", &[], false);
        c.uninstall_command.clear();
        let v = classify(&[c]);
        assert_eq!(
            v.reason,
            "No install command; No uninstall command; No content location; No detection method"
        );
    }

    #[test]
    /// 只采用首个满足条件的部署类型，后续部署类型即使类别不同也被忽略。
    fn first_qualifying_deployment_type_wins() {
        let incomplete = facts("MSI", "msiexec /i a.msi", &[], true);
        let exe = facts("Other", "setup.exe /S", &["x"], true);
        let msi = facts("MSI", "msiexec /i b.msi", &["y"], true);
        let v = classify(&[incomplete, exe, msi]);
        assert!(v.is_migratable);
        assert_eq!(v.selected, Some(1));
        assert_eq!(v.category, MigrationCategory::Win32Exe);
        assert_eq!(v.facts.len(), 3);
        assert_eq!(v.selected_facts().map(|f| f.install_command.as_str()), Some("setup.exe /S"));
    }

    #[test]
    /// 场景 E：MSIX 无条件 NotReady。
    fn msix_is_never_ready() {
        let dt = facts("AppX-MSIX", "Add-AppxPackage x.msix", &["x"], true);
        assert_eq!(evaluate_status(&[dt]), ReadinessStatus::NotReady);
        let dt = facts("MSIX", "x", &["x"], true);
        assert_eq!(evaluate_status(&[dt]), ReadinessStatus::NotReady);
    }

    #[test]
    fn status_counts_signals_on_first_deployment_type() {
        assert_eq!(evaluate_status(&[facts("MSI", "x", &["y"], true)]), ReadinessStatus::Ready);
        assert_eq!(evaluate_status(&[facts("MSI", "x", &[], true)]), ReadinessStatus::Check);
        assert_eq!(evaluate_status(&[facts("MSI", "", &[], false)]), ReadinessStatus::NotReady);
        assert_eq!(
            evaluate_status(&[facts("MSI", "", &[], false), facts("MSI", "x", &["y"], true)]),
            ReadinessStatus::NotReady
        );
        assert_eq!(evaluate_status(&[]), ReadinessStatus::NotReady);
    }

    #[test]
    fn category_serializes_as_display_text() {
        let json = serde_json::to_string(&MigrationCategory::Win32Script).unwrap();
        assert_eq!(json, r#""Win32 (Script)""#);
    }
}
