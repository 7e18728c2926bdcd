//! 操作员交互边界。
//!
//! 核心逻辑只通过 [`Operator`] 请求确认、单项选择与清单复核，
//! 具体呈现方式（控制台、GUI、测试脚本）由调用方提供。
//!
//! 作者：应用迁移工具项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use crate::manifest::PackageManifest;

/// 操作员交互能力。
pub trait Operator {
    /// 是/否确认。返回 `true` 表示“是”。
    fn confirm(&mut self, prompt: &str) -> bool;

    /// 从列表中选择一项。返回所选下标；`None` 表示取消。
    fn select(&mut self, title: &str, items: &[String]) -> Option<usize>;

    /// 复核清单。返回编辑后的完整清单；`None` 表示取消本次迁移。
    fn review(&mut self, manifest: PackageManifest) -> Option<PackageManifest>;
}

/// 无人值守模式：确认全部通过、选择第一项、清单原样接受。
#[derive(Debug, Clone, Copy, Default)]
pub struct Unattended;

impl Operator for Unattended {
    fn confirm(&mut self, _prompt: &str) -> bool {
        true
    }

    fn select(&mut self, _title: &str, items: &[String]) -> Option<usize> {
        (!items.is_empty()).then_some(0)
    }

    fn review(&mut self, manifest: PackageManifest) -> Option<PackageManifest> {
        Some(manifest)
    }
}
