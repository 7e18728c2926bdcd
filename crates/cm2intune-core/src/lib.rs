//! MECM → Intune 应用迁移核心库（跨平台）。
//!
//! 功能：
//! - 解析旧系统应用描述，判定可迁移性与迁移类别，计算就绪徽标
//! - 定位安装源、规范化发布者/产品名称、选择检测规则
//! - 构建打包清单并按固定目录结构落盘
//! - 定义旧系统查询与操作员交互的边界、会话上下文与配置
//!
//! 作者：应用迁移工具项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

pub mod catalog;
pub mod classify;
pub mod config;
pub mod descriptor;
pub mod detection;
pub mod error;
pub mod interaction;
pub mod manifest;
pub mod naming;
pub mod session;
pub mod source;
pub mod staging;
