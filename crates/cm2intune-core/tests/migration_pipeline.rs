use std::path::{Path, PathBuf};

use cm2intune_core::classify::{classify, MigrationCategory};
use cm2intune_core::descriptor;
use cm2intune_core::detection::{self, DetectionInputs, DetectionRule};
use cm2intune_core::interaction::Unattended;
use cm2intune_core::manifest::{self, OriginFacts, OriginKind, PackageManifest};
use cm2intune_core::naming::{strip_version_suffix, NamePair};
use cm2intune_core::source::{self, CandidateOrigin, SourceQuery, VersionInfo, VersionProbe};
use cm2intune_core::staging::{self, StagingError, StagingLayout};
use uuid::Uuid;

const PRODUCT_CODE: &str = "{8A1F6C2E-0B4D-4E57-9C1A-3D2B7F6E5A90}";

/// 对所有 `.msi` 返回固定的产品属性。
struct FixedMsiProbe;

impl VersionProbe for FixedMsiProbe {
    fn extract(&self, path: &Path) -> Option<VersionInfo> {
        let is_msi = path.extension().is_some_and(|e| e.eq_ignore_ascii_case("msi"));
        is_msi.then(|| VersionInfo {
            product_version: Some("3.4.1".into()),
            company_name: Some("Contoso Ltd".into()),
            product_name: Some("Contoso Widget 3.4.1".into()),
            product_code: Some(PRODUCT_CODE.into()),
            ..Default::default()
        })
    }
}

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("{prefix}-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn write_file(path: &Path, content: &[u8]) {
    std::fs::create_dir_all(path.parent().expect("parent"))
        .unwrap_or_else(|e| panic!("create parent for {} failed: {e}", path.display()));
    std::fs::write(path, content).unwrap_or_else(|e| panic!("write {} failed: {e}", path.display()));
}

struct CleanupDir(PathBuf);

impl Drop for CleanupDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

const DESCRIPTOR: &str = r#"<?xml version="1.0" encoding="utf-16"?>
<AppMgmtDigest xmlns="http://schemas.microsoft.com/SystemCenterConfigurationManager/2009/AppMgmtDigest">
  <Application AuthoringScopeId="ScopeId_1" LogicalName="Application_1" Version="2">
    <DeploymentTypes><DeploymentType AuthoringScopeId="ScopeId_1" LogicalName="DeploymentType_1" Version="2"/></DeploymentTypes>
  </Application>
  <DeploymentType AuthoringScopeId="ScopeId_1" LogicalName="DeploymentType_1" Version="2">
    <Title>Contoso Widget x64</Title>
    <Technology>MSI</Technology>
    <Installer Technology="MSI">
      <DetectAction>
        <Provider>MSI</Provider>
        <Args><Arg Name="MethodBody" Type="String">{8A1F6C2E-0B4D-4E57-9C1A-3D2B7F6E5A90}</Arg></Args>
      </DetectAction>
      <InstallAction>
        <Args><Arg Name="InstallCommandLine" Type="String">msiexec /i "widget.msi" /qn</Arg></Args>
      </InstallAction>
      <UninstallAction>
        <Args><Arg Name="InstallCommandLine" Type="String">msiexec /x {8A1F6C2E-0B4D-4E57-9C1A-3D2B7F6E5A90} /qn</Arg></Args>
      </UninstallAction>
      <Contents>
        <Content ContentId="Content_1" Version="1">
          <Location>\\retired-srv\apps\Contoso\Widget\3.4.1\</Location>
        </Content>
      </Contents>
    </Installer>
  </DeploymentType>
  <Resources><Icon Id="Icon_1"><Data>iVBORw0K
  Ggo=</Data></Icon></Resources>
</AppMgmtDigest>"#;

#[test]
/// 旧服务器已下线：通过备用源根目录的智能匹配找到安装包，生成 MSI 检测规则并落盘。
fn descriptor_to_staged_package_via_alternate_root() {
    let root = unique_temp_dir("cm2intune-pipeline");
    let _cleanup = CleanupDir(root.clone());
    let alt = root.join("alt");
    let version_src = alt.join("Contoso").join("Contoso Widget").join("3.4.1");
    write_file(&version_src.join("widget.msi"), b"msi-bytes");
    write_file(&version_src.join("data").join("widget1.cab"), b"cab-bytes-here");

    let display_name = "Contoso Widget 3.4.1";
    let facts = descriptor::parse(DESCRIPTOR, display_name);
    assert_eq!(facts.len(), 1);
    let verdict = classify(&facts);
    assert!(verdict.is_migratable, "reason: {}", verdict.reason);
    assert_eq!(verdict.category, MigrationCategory::Win32Msi);
    let chosen = verdict.selected_facts().cloned().expect("selected deployment type");

    let product = strip_version_suffix(display_name);
    let query = SourceQuery {
        content_locations: &chosen.content_locations,
        publisher: "Contoso",
        product: &product,
        version: "3.4.1",
        alternate_root: Some(alt.as_path()),
    };
    let candidates = source::plan_candidates(&query);
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].dir, version_src);
    assert_eq!(candidates[0].origin, CandidateOrigin::SmartMatch);

    let src = source::locate(&query, &mut Unattended, &FixedMsiProbe).expect("installer located");
    assert_eq!(src.file_name, "widget.msi");
    assert_eq!(src.total_files(), 2);
    assert_eq!(src.total_size(), 9 + 14);

    let rule = detection::select(&DetectionInputs {
        source: Some(&src),
        uninstall_command: &chosen.uninstall_command,
        publisher: "Contoso",
        install_command: &chosen.install_command,
        app_name: display_name,
    });
    assert_eq!(rule, DetectionRule::Msi { product_code: PRODUCT_CODE.into() });

    let names = NamePair::from_record("Contoso", display_name, src.version_info.as_ref());
    let origin = OriginFacts {
        kind: OriginKind::Mecm,
        application_name: Some(display_name.into()),
        site_code: Some("P01".into()),
        deployment_type: Some(chosen.title.clone()),
        content_location: chosen.primary_content_location().map(str::to_string),
        install_command: Some(chosen.install_command.clone()),
        uninstall_command: Some(chosen.uninstall_command.clone()),
        category: Some(verdict.category),
        icon_payload: chosen.icon_payload.clone(),
    };
    let built = manifest::build(&names, "3.4.1", &src, rule, &origin);
    assert_eq!(built.display_name, "Contoso - Contoso Widget - 3.4.1");
    assert_eq!(built.install_command, r#"msiexec /i "widget.msi" /qn"#);
    assert_eq!(built.metadata.source_file_version.as_deref(), Some("3.4.1"));
    assert_eq!(built.metadata.icon.as_deref(), Some("Icon/app_icon.png"));
    assert_eq!(built.metadata.origin.deployment_type.as_deref(), Some("Contoso Widget x64"));

    let staging_root = root.join("staging");
    let layout = StagingLayout::for_manifest(&staging_root, &built);
    assert_eq!(
        layout.version_dir(),
        staging_root.join("Contoso").join("Contoso Widget").join("3.4.1")
    );
    let staged = staging::stage(&layout, &src, &built, origin.icon_payload.as_deref(), false)
        .expect("stage package");
    assert_eq!(staged.copied_files, 2);
    assert_eq!(staged.copied_bytes, 23);
    assert!(layout.source_dir().join("data").join("widget1.cab").is_file());
    assert_eq!(staged.icon, Some(layout.icon_path("png")));
    assert!(layout.container_dir().is_dir());

    let reloaded = PackageManifest::load(&layout.manifest_path()).expect("reload manifest");
    assert_eq!(reloaded, built);

    let again = staging::stage(&layout, &src, &built, None, false);
    assert!(matches!(again, Err(StagingError::AlreadyExists(_))));
    staging::stage(&layout, &src, &built, None, true).expect("forced restage");
    assert!(!layout.icon_path("png").exists());

    let artifact = root.join("out").join("widget.intunewin");
    write_file(&artifact, b"container");
    let backup = staging::backup_container(&layout, &artifact).expect("backup container");
    let backup_name = backup.file_name().unwrap().to_string_lossy().to_string();
    assert!(backup.starts_with(layout.container_dir()));
    assert!(backup_name.starts_with("widget_"), "{backup_name}");
    assert!(backup_name.ends_with(".intunewin"), "{backup_name}");
    assert_eq!(backup_name.len(), "widget_20261019_120000.intunewin".len());
}

#[test]
/// 声明的内容位置可用时直接采用，不询问操作员；没有 GUID 与产品代码时回退到文件检测。
fn declared_location_without_product_code_falls_back_to_file_rule() {
    let root = unique_temp_dir("cm2intune-pipeline-declared");
    let _cleanup = CleanupDir(root.clone());
    let share = root.join("share");
    write_file(&share.join("WidgetSetup.exe"), b"MZ");

    let locations = vec![share.display().to_string()];
    let missing_alt = root.join("missing-alt");
    let query = SourceQuery {
        content_locations: &locations,
        publisher: "Contoso",
        product: "Widget",
        version: "2.0",
        alternate_root: Some(missing_alt.as_path()),
    };
    let candidates = source::plan_candidates(&query);
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].origin, CandidateOrigin::Declared);

    let src = source::locate(&query, &mut Unattended, &FixedMsiProbe).expect("installer located");
    assert!(src.version_info.is_none());
    let rule = detection::select(&DetectionInputs {
        source: Some(&src),
        uninstall_command: r#""WidgetSetup.exe" /uninstall"#,
        publisher: "Contoso",
        install_command: r#""WidgetSetup.exe" /silent"#,
        app_name: "Widget 2.0",
    });
    assert_eq!(
        rule,
        DetectionRule::File { path: r"%ProgramFiles%\Contoso".into(), file_or_folder: "WidgetSetup".into() }
    );
}
