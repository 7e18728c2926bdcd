//! PowerShell 脚本执行。
//!
//! 约定：
//! - 脚本经标准输入传入（`-Command -`），不拼接到命令行，避免转义与长度问题
//! - 敏感值只通过子进程环境变量传递
//!
//! 作者：应用迁移工具项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{anyhow, Context, Result};
use tracing::debug;

#[cfg(windows)]
const POWERSHELL_EXE: &str = "powershell.exe";
#[cfg(not(windows))]
const POWERSHELL_EXE: &str = "pwsh";

/// 以单引号字面量形式引用字符串（内部单引号加倍）。
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// 执行脚本并返回标准输出。
///
/// 参数：
/// - `envs`：额外的环境变量（例如客户端密钥）
///
/// 异常处理：
/// - 进程无法启动或退出码非 0 时返回错误，错误信息包含标准错误输出
pub fn run_script(script: &str, envs: &[(&str, &str)]) -> Result<String> {
    let mut cmd = Command::new(POWERSHELL_EXE);
    cmd.args(["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-Command", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (k, v) in envs {
        cmd.env(k, v);
    }
    let mut child = cmd.spawn().with_context(|| format!("启动 {POWERSHELL_EXE} 失败"))?;
    {
        let stdin = child.stdin.as_mut().ok_or_else(|| anyhow!("无法写入 PowerShell 标准输入"))?;
        stdin.write_all(script.as_bytes()).context("写入脚本失败")?;
    }
    let out = child.wait_with_output().context("等待 PowerShell 结束失败")?;
    let stdout = String::from_utf8_lossy(&out.stdout).to_string();
    debug!("PowerShell 输出 {} 字节", stdout.len());
    if !out.status.success() {
        return Err(anyhow!(
            "PowerShell 退出码 {}: {}",
            out.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&out.stderr).trim()
        ));
    }
    Ok(stdout)
}
