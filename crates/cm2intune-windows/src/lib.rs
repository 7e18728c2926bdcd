//! 平台协作方封装（版本资源/MSI 数据库、PowerShell、ConfigMgr 查询、打包、发布、本机检测）。
//!
//! 目标：
//! - 将 Windows 专有 API 与外部工具调用集中封装，核心库只依赖 trait 边界
//! - 统一错误处理风格（以 `anyhow::Result` 形式向上返回）
//!
//! 说明：
//! - 非 Windows 平台可以编译，原生能力返回“未读取到/未检测到”
//!
//! 作者：应用迁移工具项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

pub mod configmgr;
pub mod intunewin;
pub mod local_detect;
pub mod powershell;
pub mod publish;
pub mod version;
