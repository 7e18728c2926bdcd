#![cfg(windows)]

use cm2intune_core::detection::DetectionRule;
use cm2intune_windows::local_detect::evaluate;
use uuid::Uuid;
use winreg::enums::HKEY_CURRENT_USER;
use winreg::RegKey;

#[test]
fn registry_rule_detects_existing_value_hkcu() {
    let (key_path, _guard) = create_test_key();

    let hkcu = RegKey::predef(HKEY_CURRENT_USER);
    let (key, _disp) = hkcu.create_subkey(&key_path).expect("create subkey");
    key.set_value("DisplayName", &"Contoso Widget").expect("set sz");

    let rule = DetectionRule::Registry {
        key_path: format!("HKEY_CURRENT_USER\\{key_path}"),
        value_name: "DisplayName".to_string(),
    };
    assert!(evaluate(&rule).expect("evaluate rule"));

    let missing_value = DetectionRule::Registry {
        key_path: format!("HKCU\\{key_path}"),
        value_name: "DisplayVersion".to_string(),
    };
    assert!(!evaluate(&missing_value).expect("evaluate rule"));
}

#[test]
fn registry_rule_missing_key_is_not_detected() {
    let rule = DetectionRule::Registry {
        key_path: format!("HKEY_CURRENT_USER\\Software\\Cm2IntuneTest\\{}", Uuid::new_v4()),
        value_name: "DisplayName".to_string(),
    };
    assert!(!evaluate(&rule).expect("evaluate rule"));
}

#[test]
fn msi_rule_for_unknown_product_is_not_detected() {
    let rule = DetectionRule::Msi {
        product_code: format!("{{{}}}", Uuid::new_v4()).to_uppercase(),
    };
    assert!(!evaluate(&rule).expect("evaluate rule"));
}

fn create_test_key() -> (String, CleanupKey) {
    let path = format!("Software\\Cm2IntuneTest\\{}", Uuid::new_v4());
    (path.clone(), CleanupKey(path))
}

struct CleanupKey(String);

impl Drop for CleanupKey {
    fn drop(&mut self) {
        let hkcu = RegKey::predef(HKEY_CURRENT_USER);
        let _ = hkcu.delete_subkey_all(&self.0);
    }
}
