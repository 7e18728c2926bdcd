use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::{json, Value};
use uuid::Uuid;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{prefix}-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn write_file(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().expect("parent"))
        .unwrap_or_else(|e| panic!("create parent for {} failed: {e}", path.display()));
    std::fs::write(path, content).unwrap_or_else(|e| panic!("write {} failed: {e}", path.display()));
}

fn descriptor(location: &Path) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-16"?>
<AppMgmtDigest xmlns="http://schemas.microsoft.com/SystemCenterConfigurationManager/2009/AppMgmtDigest">
  <DeploymentType AuthoringScopeId="ScopeId_1" LogicalName="DeploymentType_1" Version="1">
    <Title>Widget Setup</Title>
    <Technology>Script</Technology>
    <Installer Technology="Script">
      <DetectAction>
        <Provider>Script</Provider>
        <Args><Arg Name="MethodBody" Type="String">if (Test-Path 'C:\Widget') {{ 'ok' }}</Arg></Args>
      </DetectAction>
      <InstallAction>
        <Args><Arg Name="InstallCommandLine" Type="String">"setup.exe" /S</Arg></Args>
      </InstallAction>
      <UninstallAction>
        <Args><Arg Name="InstallCommandLine" Type="String">"setup.exe" /uninstall /S</Arg></Args>
      </UninstallAction>
      <Contents>
        <Content ContentId="Content_1" Version="1">
          <Location>{}</Location>
        </Content>
      </Contents>
    </Installer>
  </DeploymentType>
</AppMgmtDigest>"#,
        location.display()
    )
}

struct Sandbox {
    root: PathBuf,
    config: PathBuf,
    catalog: PathBuf,
    staging: PathBuf,
    share: PathBuf,
    _cleanup: CleanupDir,
}

fn sandbox() -> Sandbox {
    let root = unique_temp_dir("cm2intune-migrator-e2e");
    let share = root.join("share").join("widget");
    write_file(&share.join("setup.exe"), "MZ-not-a-real-binary");
    write_file(&share.join("lang").join("en-US.dat"), "strings");

    let staging = root.join("staging");
    let config = root.join("cm2intune.json");
    let cfg = json!({
        "site_code": "P01",
        "site_server": "cm01.contoso.local",
        "staging_root": staging,
        "tenant_id": "00000000-0000-0000-0000-000000000001",
        "client_id": "00000000-0000-0000-0000-000000000002",
        "client_secret": "test-secret"
    });
    write_file(&config, &cfg.to_string());

    let catalog = root.join("applications.json");
    let records = json!([
        {
            "LocalizedDisplayName": "Contoso Widget 3.4.1",
            "Manufacturer": "Contoso",
            "SoftwareVersion": "3.4.1",
            "NumberOfDeploymentTypes": 1,
            "NumberOfDeployments": 3,
            "SDMPackageXML": descriptor(&share)
        },
        {
            "LocalizedDisplayName": "Fabrikam Viewer",
            "Manufacturer": "Fabrikam",
            "SoftwareVersion": "1.0",
            "NumberOfDeploymentTypes": 0,
            "NumberOfDeployments": 0,
            "SDMPackageXML": ""
        }
    ]);
    write_file(&catalog, &records.to_string());

    Sandbox { _cleanup: CleanupDir(root.clone()), root, config, catalog, staging, share }
}

fn run(sb: &Sandbox, args: &[&str]) -> Output {
    let exe = env!("CARGO_BIN_EXE_cm2intune-migrator");
    Command::new(exe)
        .arg("--config")
        .arg(&sb.config)
        .arg("--catalog-file")
        .arg(&sb.catalog)
        .args(args)
        .env_remove("CM2INTUNE_CLIENT_SECRET")
        .output()
        .expect("run cm2intune-migrator")
}

fn assert_success(out: &Output) {
    assert!(
        out.status.success(),
        "command failed: status={:?}, stdout={}, stderr={}",
        out.status.code(),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
}

#[test]
fn e2e_list_shows_readiness_and_records_session() {
    let sb = sandbox();
    let out = run(&sb, &["list"]);
    assert_success(&out);

    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Ready     | Contoso Widget 3.4.1 | Contoso | 3.4.1"), "stdout: {stdout}");
    assert!(stdout.contains("Not Ready | Fabrikam Viewer"), "stdout: {stdout}");

    let session: Value =
        serde_json::from_str(&std::fs::read_to_string(sb.staging.join("session.json")).expect("read session"))
            .expect("parse session");
    assert_eq!(session["site_code"], "P01");
    assert_eq!(session["applications"].as_array().map(Vec::len), Some(2));
}

#[test]
fn e2e_analyze_reports_verdicts() {
    let sb = sandbox();
    let out = run(&sb, &["analyze", "--name", "*"]);
    assert_success(&out);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(
        stdout.contains("Contoso Widget 3.4.1: Migratable | Win32 (Script)"),
        "stdout: {stdout}"
    );
    assert!(
        stdout.contains("Fabrikam Viewer: Not migratable | Unknown | No deployment type data"),
        "stdout: {stdout}"
    );
}

#[test]
fn e2e_migrate_stages_manifest_and_sources() {
    let sb = sandbox();
    let out = run(&sb, &["--yes", "migrate", "--name", "contoso widget*"]);
    assert_success(&out);

    let version_dir = sb.staging.join("Contoso").join("Contoso Widget").join("3.4.1");
    assert!(version_dir.join("_Sourcefiles").join("setup.exe").is_file());
    assert!(version_dir.join("_Sourcefiles").join("lang").join("en-US.dat").is_file());
    assert!(version_dir.join("intunewin").is_dir());

    let manifest: Value = serde_json::from_str(
        &std::fs::read_to_string(version_dir.join("Documents").join("PackageManifest.json")).expect("read manifest"),
    )
    .expect("parse manifest");
    assert_eq!(manifest["display_name"], "Contoso - Contoso Widget - 3.4.1");
    assert_eq!(manifest["install_command"], "\"setup.exe\" /S");
    assert_eq!(manifest["uninstall_command"], "\"setup.exe\" /uninstall /S");
    assert_eq!(manifest["detection"]["file"]["path"], "%ProgramFiles%\\Contoso");
    assert_eq!(manifest["detection"]["file"]["file_or_folder"], "setup");
    assert_eq!(manifest["requirements"]["architecture"], "x64");
    assert_eq!(manifest["metadata"]["category"], "Win32 (Script)");
    assert_eq!(manifest["metadata"]["total_files"], 2);
    assert_eq!(manifest["metadata"]["origin"]["kind"], "mecm");
    assert_eq!(manifest["metadata"]["origin"]["site_code"], "P01");
    assert_eq!(
        manifest["metadata"]["origin"]["content_location"],
        Value::String(sb.share.display().to_string())
    );

    let session: Value =
        serde_json::from_str(&std::fs::read_to_string(sb.staging.join("session.json")).expect("read session"))
            .expect("parse session");
    assert_eq!(session["last_processed_path"], Value::String(version_dir.display().to_string()));

    // 已存在的暂存目录需要 --force。
    let again = run(&sb, &["--yes", "migrate", "--name", "Contoso Widget 3.4.1"]);
    assert!(!again.status.success());
    let forced = run(&sb, &["--yes", "migrate", "--name", "Contoso Widget 3.4.1", "--force"]);
    assert_success(&forced);

    let detect = run(
        &sb,
        &["detect", "--manifest", &version_dir.join("Documents").join("PackageManifest.json").display().to_string()],
    );
    assert_success(&detect);
    assert!(String::from_utf8_lossy(&detect.stdout).contains("(File) = "));
}

#[test]
fn e2e_import_builds_manifest_from_file() {
    let sb = sandbox();
    let installer = sb.root.join("incoming").join("ToolSetup.exe");
    write_file(&installer, "MZ");
    let out = run(&sb, &["--yes", "import", "--file", &installer.display().to_string()]);
    assert_success(&out);

    let manifest_path = sb
        .staging
        .join("Unknown")
        .join("ToolSetup")
        .join("Unknown")
        .join("Documents")
        .join("PackageManifest.json");
    let manifest: Value =
        serde_json::from_str(&std::fs::read_to_string(&manifest_path).expect("read manifest")).expect("parse manifest");
    assert_eq!(manifest["install_command"], "\"ToolSetup.exe\" /S");
    assert_eq!(manifest["uninstall_command"], "");
    assert_eq!(manifest["metadata"]["description"], "ToolSetup installer");
    assert_eq!(manifest["metadata"]["origin"]["kind"], "file");
    assert_eq!(manifest["detection"]["file"]["path"], "%ProgramFiles%");
}

#[test]
fn e2e_missing_application_and_missing_credentials_fail() {
    let sb = sandbox();
    let out = run(&sb, &["--yes", "migrate", "--name", "Northwind*"]);
    assert!(!out.status.success());

    let out = run(&sb, &["package"]);
    assert!(!out.status.success());

    write_file(&sb.config, &json!({ "staging_root": sb.staging, "tenant_id": "t" }).to_string());
    let out = run(&sb, &["list"]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("client_id, client_secret"), "stderr: {stderr}");
}

#[test]
fn e2e_malformed_descriptor_aborts_attempt_without_staging() {
    let sb = sandbox();
    let records = json!([
        {
            "LocalizedDisplayName": "Northwind Broken 1.0",
            "Manufacturer": "Northwind",
            "SoftwareVersion": "1.0",
            "NumberOfDeploymentTypes": 1,
            "NumberOfDeployments": 0,
            "SDMPackageXML": "<AppMgmtDigest><DeploymentType>"
        }
    ]);
    write_file(&sb.catalog, &records.to_string());

    let out = run(&sb, &["--yes", "migrate", "--name", "Northwind*"]);
    assert!(!out.status.success());
    let combined = format!("{}{}", String::from_utf8_lossy(&out.stdout), String::from_utf8_lossy(&out.stderr));
    assert!(combined.contains("解析失败: Northwind Broken 1.0"), "output: {combined}");
    assert!(!sb.staging.join("Northwind").exists());
}

struct CleanupDir(PathBuf);

impl Drop for CleanupDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}
