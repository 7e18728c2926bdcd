//! MECM → Intune 应用迁移命令行工具。
//!
//! 职责：
//! - 从旧系统（或导出文件）查询应用，展示就绪徽标与可迁移性判定
//! - 编排单个应用的迁移：解析 → 判定 → 定位安装源 → 命名 → 检测规则 → 清单 → 复核 → 落盘
//! - 调用打包工具生成 `.intunewin`，并通过 IntuneWin32App 模块发布
//! - 在参考机器上验证清单的检测规则
//!
//! 约定：
//! - 单操作员、顺序执行；每条命令只处理一次迁移尝试
//! - 缺少必需配置时在进入流程前直接退出；单次尝试失败只记录 ERROR 并返回非零退出码
//!
//! 作者：应用迁移工具项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

mod console;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use cm2intune_core::catalog::{ApplicationCatalog, ApplicationRecord, ExportFileCatalog};
use cm2intune_core::classify::{classify, MigratabilityVerdict};
use cm2intune_core::config::AppConfig;
use cm2intune_core::descriptor::{self, DeploymentTypeFacts};
use cm2intune_core::detection::{self, DetectionInputs};
use cm2intune_core::error::MigrationError;
use cm2intune_core::interaction::{Operator, Unattended};
use cm2intune_core::manifest::{self, OriginFacts, OriginKind, PackageManifest};
use cm2intune_core::naming::{strip_version_suffix, NamePair, UNKNOWN};
use cm2intune_core::session::{ApplicationSummary, Session};
use cm2intune_core::source::{self, SourceFileInfo, SourceQuery};
use cm2intune_core::staging::{self, StagingLayout};
use cm2intune_windows::configmgr::ConfigMgrCatalog;
use cm2intune_windows::intunewin::IntuneWinPackager;
use cm2intune_windows::local_detect;
use cm2intune_windows::publish::{self, TenantCredentials};
use cm2intune_windows::version::NativeVersionProbe;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::console::ConsoleOperator;

/// 命令行参数。
///
/// 说明：
/// - `config` 指向工具配置文件（默认 `cm2intune.json`）
/// - `catalog_file` 使用导出的应用记录代替在线站点查询
/// - `yes` 为无人值守模式：确认全部通过、选择第一项、清单原样接受
#[derive(Debug, Parser)]
#[command(name = "cm2intune-migrator", version)]
struct Cli {
    #[arg(long, default_value = "cm2intune.json")]
    config: PathBuf,

    #[arg(long)]
    catalog_file: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// 刷新应用列表并显示就绪徽标。
    List {
        #[arg(long, default_value = "*")]
        name: String,
    },
    /// 解析并判定应用的可迁移性。
    Analyze {
        #[arg(long)]
        name: String,
    },
    /// 迁移单个应用到暂存目录。
    Migrate {
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = false)]
        force: bool,
        /// 落盘后立即打包。
        #[arg(long, default_value_t = false)]
        package: bool,
    },
    /// 由新发现的安装文件直接生成清单并落盘。
    Import {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// 为暂存目录生成 `.intunewin`（默认最近处理的目录）。
    Package {
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// 发布暂存目录中的应用（默认最近处理的目录）。
    Publish {
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// 在本机评估清单中的检测规则。
    Detect {
        #[arg(long)]
        manifest: PathBuf,
    },
}

/// 一次命令执行的上下文。
struct RunContext {
    cfg: AppConfig,
    session: Session,
    catalog: Box<dyn ApplicationCatalog>,
    probe: NativeVersionProbe,
    operator: Box<dyn Operator>,
}

/// 程序入口：初始化日志、加载配置、分发子命令。
///
/// 异常处理：
/// - 配置读取失败或缺少必需项：返回 `Err`，进程以非零码退出
/// - 单次迁移尝试失败：输入缺失/解析失败/未找到记录 WARN，其余记录 ERROR，返回失败退出码
/// - 非尝试级错误（缺少配置）：原样返回 `Err`
fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = AppConfig::load(&cli.config)?;
    cfg.validate()?;

    let catalog: Box<dyn ApplicationCatalog> = match &cli.catalog_file {
        Some(path) => Box::new(ExportFileCatalog::load(path)?),
        None => Box::new(ConfigMgrCatalog::new(&cfg.site_code, &cfg.site_server)),
    };
    let operator: Box<dyn Operator> = if cli.yes {
        Box::new(Unattended)
    } else {
        Box::new(ConsoleOperator::stdio())
    };
    let mut ctx = RunContext {
        session: Session::load_or_new(&cfg.staging_root, &cfg.site_code),
        probe: NativeVersionProbe::new(cfg.msi_info_tool.clone()),
        cfg,
        catalog,
        operator,
    };

    let outcome = match &cli.command {
        Commands::List { name } => list(&mut ctx, name),
        Commands::Analyze { name } => analyze(&mut ctx, name),
        Commands::Migrate { name, force, package } => migrate(&mut ctx, name, *force, *package),
        Commands::Import { file, force } => import(&mut ctx, file, *force),
        Commands::Package { path } => package(&mut ctx, path.as_deref()).map(|_| ()),
        Commands::Publish { path } => publish_app(&mut ctx, path.as_deref()),
        Commands::Detect { manifest } => detect(manifest),
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            match e.downcast_ref::<MigrationError>() {
                Some(m) if !m.is_attempt_scoped() => return Err(e),
                Some(MigrationError::NotFound(_) | MigrationError::InputAbsent(_) | MigrationError::ParseFailure(_)) => {
                    warn!("{:#}", e)
                }
                _ => error!("{:#}", e),
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

/// 刷新应用列表并输出就绪徽标，摘要写入会话。
fn list(ctx: &mut RunContext, name: &str) -> Result<()> {
    let records = ctx.catalog.find(name)?;
    info!("共找到 {} 个应用", records.len());
    for record in &records {
        let s = ApplicationSummary::from_record(record);
        println!(
            "{:<9} | {} | {} | {} | DT={} | Deployments={}",
            s.status.to_string(),
            s.display_name,
            s.manufacturer,
            s.version,
            s.deployment_types,
            s.deployments
        );
    }
    ctx.session.set_applications(&records);
    ctx.session.save(&ctx.cfg.staging_root)
}

/// 输出每个匹配应用的判定结果与部署类型明细。
fn analyze(ctx: &mut RunContext, name: &str) -> Result<()> {
    let records = ctx.catalog.find(name)?;
    if records.is_empty() {
        return Err(MigrationError::NotFound(format!("旧系统中没有匹配的应用: {name}")).into());
    }
    for record in &records {
        let facts = descriptor::parse(&record.sdm_package_xml, &record.display_name);
        let verdict = classify(&facts);
        print_verdict(record, &verdict);
    }
    Ok(())
}

fn print_verdict(record: &ApplicationRecord, verdict: &MigratabilityVerdict) {
    println!(
        "{}: {} | {} | {}",
        record.display_name,
        if verdict.is_migratable { "Migratable" } else { "Not migratable" },
        verdict.category,
        verdict.reason
    );
    for (i, f) in verdict.facts.iter().enumerate() {
        println!("  [{}] {} ({})", i + 1, f.title, f.technology);
        println!("      Install:   {}", f.install_command);
        println!("      Uninstall: {}", f.uninstall_command);
        println!("      Content:   {}", f.content_locations.join("; "));
        println!("      Detection: {}", f.detection_details);
    }
}

/// 从查询结果中确定唯一的应用记录（多个时请操作员选择）。
fn pick_record(ctx: &mut RunContext, name: &str) -> Result<Option<ApplicationRecord>> {
    let mut records = ctx.catalog.find(name)?;
    if records.is_empty() {
        return Err(MigrationError::NotFound(format!("旧系统中没有匹配的应用: {name}")).into());
    }
    if records.len() == 1 {
        return Ok(records.pop());
    }
    let items: Vec<String> = records
        .iter()
        .map(|r| format!("{} ({}, {})", r.display_name, r.manufacturer, r.software_version))
        .collect();
    Ok(ctx
        .operator
        .select("找到多个应用，请选择", &items)
        .map(|i| records.swap_remove(i)))
}

/// 迁移单个旧系统应用。
///
/// 主要步骤：
/// 1) 查询记录并解析描述（XML 不合法时中止本次尝试）
/// 2) 判定可迁移性（不可迁移时请操作员确认是否强制继续）
/// 3) 定位安装源并派生名称、版本、检测规则
/// 4) 构建清单 → 复核 → 落盘
/// 5) 可选：立即打包
fn migrate(ctx: &mut RunContext, name: &str, force: bool, package_now: bool) -> Result<()> {
    let Some(record) = pick_record(ctx, name)? else {
        info!("已取消");
        return Ok(());
    };
    let facts = match descriptor::try_parse(&record.sdm_package_xml).map_err(MigrationError::from) {
        Ok(facts) => facts,
        Err(MigrationError::ParseFailure(reason)) => {
            return Err(MigrationError::ParseFailure(format!("{}: {reason}", record.display_name)).into());
        }
        Err(e) => {
            warn!("{}: {}", record.display_name, e);
            Vec::new()
        }
    };
    let verdict = classify(&facts);
    print_verdict(&record, &verdict);
    if !verdict.is_migratable {
        warn!("{} 不满足迁移条件: {}", record.display_name, verdict.reason);
        if !ctx.operator.confirm("该应用不满足迁移条件，仍要继续？") {
            info!("已取消");
            return Ok(());
        }
    }
    let chosen: DeploymentTypeFacts = verdict
        .selected_facts()
        .or_else(|| facts.first())
        .cloned()
        .ok_or_else(|| MigrationError::InputAbsent(format!("{} 没有部署类型数据", record.display_name)))?;

    let product = strip_version_suffix(&record.display_name);
    let query = SourceQuery {
        content_locations: &chosen.content_locations,
        publisher: &record.manufacturer,
        product: &product,
        version: &record.software_version,
        alternate_root: ctx.cfg.alternate_source_root.as_deref(),
    };
    let source = source::locate(&query, ctx.operator.as_mut(), &ctx.probe)
        .ok_or_else(|| MigrationError::NotFound(format!("未找到 {} 的安装文件", record.display_name)))?;

    let names = NamePair::from_record(&record.manufacturer, &record.display_name, source.version_info.as_ref());
    let version = resolve_version(&record.software_version, &source);
    let rule = detection::select(&DetectionInputs {
        source: Some(&source),
        uninstall_command: &chosen.uninstall_command,
        publisher: &record.manufacturer,
        install_command: &chosen.install_command,
        app_name: &record.display_name,
    });
    info!("检测规则: {}", rule.kind());

    let origin = OriginFacts {
        kind: OriginKind::Mecm,
        application_name: Some(record.display_name.clone()),
        site_code: Some(ctx.cfg.site_code.clone()),
        deployment_type: Some(chosen.title.clone()).filter(|t| !t.is_empty()),
        content_location: chosen.primary_content_location().map(str::to_string),
        install_command: Some(chosen.install_command.clone()),
        uninstall_command: Some(chosen.uninstall_command.clone()),
        category: Some(verdict.category).filter(|_| verdict.is_migratable),
        icon_payload: chosen.icon_payload.clone(),
    };
    let built = manifest::build(&names, &version, &source, rule, &origin);
    let Some(version_dir) = review_and_stage(ctx, built, &source, origin.icon_payload.as_deref(), force)? else {
        return Ok(());
    };
    if package_now {
        package(ctx, Some(&version_dir))?;
    }
    Ok(())
}

/// 由新发现的安装文件生成清单。
fn import(ctx: &mut RunContext, file: &Path, force: bool) -> Result<()> {
    if !file.is_file() {
        return Err(MigrationError::NotFound(format!("安装文件不存在: {}", file.display())).into());
    }
    let source = SourceFileInfo::collect(file, &ctx.probe)
        .with_context(|| format!("读取安装文件失败: {}", file.display()))?;
    let names = NamePair::from_file(source.version_info.as_ref(), &source.file_stem());
    let version = resolve_version("", &source);
    let rule = detection::select(&DetectionInputs {
        source: Some(&source),
        publisher: &names.publisher,
        app_name: &names.application,
        ..Default::default()
    });
    let built = manifest::build(&names, &version, &source, rule, &OriginFacts::discovered_file());
    review_and_stage(ctx, built, &source, None, force)?;
    Ok(())
}

/// 记录版本优先；否则取安装文件版本；都没有时为 `Unknown`。
fn resolve_version(declared: &str, source: &SourceFileInfo) -> String {
    let declared = declared.trim();
    if !declared.is_empty() {
        return declared.to_string();
    }
    source
        .version_info
        .as_ref()
        .and_then(|v| v.best_version())
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// 复核并落盘；返回版本目录（复核取消时为 `None`）。
fn review_and_stage(
    ctx: &mut RunContext,
    built: PackageManifest,
    source: &SourceFileInfo,
    icon_payload: Option<&str>,
    force: bool,
) -> Result<Option<PathBuf>> {
    let Some(reviewed) = ctx.operator.review(built) else {
        info!("清单复核已取消");
        return Ok(None);
    };
    let layout = StagingLayout::for_manifest(&ctx.cfg.staging_root, &reviewed);
    let staged = staging::stage(&layout, source, &reviewed, icon_payload, force)?;
    info!(
        "已落盘: {} ({} 个文件, {})",
        staged.layout.version_dir().display(),
        staged.copied_files,
        source::format_size(staged.copied_bytes)
    );
    println!("{}", staged.layout.version_dir().display());

    let version_dir = staged.layout.version_dir().to_path_buf();
    ctx.session.set_last_processed(version_dir.clone());
    ctx.session.save(&ctx.cfg.staging_root)?;
    Ok(Some(version_dir))
}

fn target_dir(ctx: &RunContext, path: Option<&Path>) -> Result<PathBuf> {
    path.map(Path::to_path_buf)
        .or_else(|| ctx.session.last_processed_path.clone())
        .ok_or_else(|| anyhow!("未指定 --path，且会话中没有最近处理的目录"))
}

/// 删除临时目录（打包输出等）。
struct TempDirGuard(PathBuf);

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// 为暂存目录生成 `.intunewin`，备份到 `intunewin/` 并返回备份路径。
fn package(ctx: &mut RunContext, path: Option<&Path>) -> Result<PathBuf> {
    let layout = StagingLayout::at(target_dir(ctx, path)?);
    let manifest = PackageManifest::load(&layout.manifest_path())?;
    let out_dir = std::env::temp_dir().join(format!("cm2intune-{}", Uuid::new_v4()));
    let _guard = TempDirGuard(out_dir.clone());

    let artifact = IntuneWinPackager::new(ctx.cfg.intunewin_util())
        .package(&layout.source_dir(), &manifest.metadata.source_file_name, &out_dir)
        .map_err(|e| MigrationError::ExternalService(format!("{e:#}")))?;
    let backup = staging::backup_container(&layout, &artifact)?;
    println!("{}", backup.display());

    ctx.session.set_last_processed(layout.version_dir());
    ctx.session.save(&ctx.cfg.staging_root)?;
    Ok(backup)
}

/// 最新的打包产物（文件名带时间戳，按名称取最大）。
fn latest_artifact(layout: &StagingLayout) -> Option<PathBuf> {
    let mut found: Vec<PathBuf> = std::fs::read_dir(layout.container_dir())
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|e| e.eq_ignore_ascii_case("intunewin")))
        .collect();
    found.sort();
    found.pop()
}

fn icon_file(layout: &StagingLayout) -> Option<PathBuf> {
    ["png", "jpg", "bmp", "ico"]
        .into_iter()
        .map(|ext| layout.icon_path(ext))
        .find(|p| p.is_file())
}

/// 认证并上传暂存目录中的应用。
fn publish_app(ctx: &mut RunContext, path: Option<&Path>) -> Result<()> {
    let layout = StagingLayout::at(target_dir(ctx, path)?);
    let manifest = PackageManifest::load(&layout.manifest_path())?;
    let artifact = latest_artifact(&layout)
        .ok_or_else(|| MigrationError::NotFound(format!("{} 中没有打包产物，请先运行 package", layout.container_dir().display())))?;
    let creds = TenantCredentials {
        tenant_id: ctx.cfg.tenant_id.clone(),
        client_id: ctx.cfg.client_id.clone(),
        client_secret: ctx.cfg.client_secret.clone(),
    };
    let app_id = publish::publish(&manifest, &artifact, icon_file(&layout).as_deref(), &creds)
        .map_err(|e| MigrationError::ExternalService(format!("{e:#}")))?;
    println!("{app_id}");
    Ok(())
}

/// 在本机评估清单中的检测规则。
fn detect(path: &Path) -> Result<()> {
    let manifest = PackageManifest::load(path)?;
    let detected = local_detect::evaluate(&manifest.detection)?;
    println!("{} ({}) = {}", manifest.display_name, manifest.detection.kind(), detected);
    Ok(())
}
