use super::*;

#[test]
fn default_config_has_expected_values() {
    // Arrange / Act
    let config = Config::default();

    // Assert
    assert!(config.launch.close_on_exit);
    assert!(config.launch.wait_for_child_processes);
    assert!(config.devices.hide_devices);
    assert_eq!(config.controller.max_slots, 1);
    assert!(!config.is_uwp());
}

#[test]
fn partial_json_uses_defaults_for_missing_fields() {
    // Arrange
    let json = r#"{ "controller": { "maxControllers": 3 } }"#;

    // Act
    let config = from_str(json).unwrap();

    // Assert
    assert_eq!(config.controller.max_slots, 3);
    assert!(!config.controller.emulate_alternate_profile);
    assert!(config.devices.hide_devices);
}

#[test]
fn wrong_type_only_drops_that_field() {
    // Arrange
    let json = r#"{
        "launch": { "closeOnExit": "yes", "launchPath": "C:\\Games\\game.exe" },
        "devices": { "hideDevices": false }
    }"#;

    // Act
    let config = from_str(json).unwrap();

    // Assert
    assert!(config.launch.close_on_exit);
    assert_eq!(config.launch.launch_path, "C:\\Games\\game.exe");
    assert!(!config.devices.hide_devices);
}

#[test]
fn null_values_keep_defaults() {
    // Arrange
    let json = r#"{ "launch": { "waitForChildProcs": null }, "window": null }"#;

    // Act
    let config = from_str(json).unwrap();

    // Assert
    assert!(config.launch.wait_for_child_processes);
    assert!(config.window.hide_alt_tab);
}

#[test]
fn unknown_fields_are_ignored() {
    // Arrange
    let json = r#"{ "somethingNew": 42, "launch": { "futureFlag": true, "launch": true } }"#;

    // Act
    let config = from_str(json).unwrap();

    // Assert
    assert!(config.launch.launch);
}

#[test]
fn invalid_json_is_an_error() {
    // Act / Assert
    assert!(from_str("{ not json").is_err());
}

#[test]
fn max_slots_is_clamped() {
    // Arrange
    let json = r#"{ "controller": { "maxControllers": 9 } }"#;
    let negative = r#"{ "controller": { "maxControllers": -2 } }"#;

    // Act
    let high = from_str(json).unwrap();
    let low = from_str(negative).unwrap();

    // Assert
    assert_eq!(high.controller.max_slots, MAX_SLOTS);
    assert_eq!(high.max_slots(), 4);
    assert_eq!(low.max_slots(), 0);
}

#[test]
fn launcher_processes_are_read() {
    // Arrange
    let json = r#"{ "launch": { "launcherProcesses": ["EpicGamesLauncher.exe", "EADesktop.exe"] } }"#;

    // Act
    let config = from_str(json).unwrap();

    // Assert
    assert_eq!(
        config.launch.launcher_processes,
        vec!["EpicGamesLauncher.exe", "EADesktop.exe"]
    );
}

#[test]
fn launch_kind_is_derived_from_path_shape() {
    // Act / Assert
    assert_eq!(LaunchKind::from_path(r"C:\Games\a.exe"), LaunchKind::Native);
    assert_eq!(LaunchKind::from_path("D:/Games/a.exe"), LaunchKind::Native);
    assert_eq!(
        LaunchKind::from_path("com.epicgames.launcher://apps/Fortnite?action=launch"),
        LaunchKind::Url
    );
    assert_eq!(
        LaunchKind::from_path("Microsoft.GamingApp_8wekyb3d8bbwe!Microsoft.Xbox.App"),
        LaunchKind::Package
    );
}

#[test]
fn is_uwp_is_cached_after_load() {
    // Arrange
    let json = r#"{ "launch": { "launch": true, "launchPath": "Contoso.Game_abc123!App" } }"#;

    // Act
    let config = from_str(json).unwrap();

    // Assert
    assert!(config.is_uwp());
}

#[test]
fn is_uwp_requires_launch_enabled() {
    // Arrange
    let json = r#"{ "launch": { "launch": false, "launchPath": "Contoso.Game_abc123!App" } }"#;

    // Act
    let config = from_str(json).unwrap();

    // Assert
    assert!(!config.is_uwp());
}

#[test]
fn overrides_are_applied() {
    // Arrange
    let mut config = Config::default();
    config.launch.ignore_launcher = false;

    // Act
    config.apply_overrides(Overrides {
        extended_logging: true,
        ignore_launcher: true,
        window_mode: false,
    });

    // Assert
    assert!(config.extended_logging);
    assert!(config.launch.ignore_launcher);
    assert!(!config.window.window_mode);
}

#[test]
fn to_json_uses_document_field_names() {
    // Arrange
    let config = Config::default();

    // Act
    let json = config.to_json();

    // Assert
    assert_eq!(json["controller"]["maxControllers"], 1);
    assert_eq!(json["launch"]["waitForChildProcs"], true);
    assert_eq!(json["devices"]["realDeviceIds"], false);
}

#[test]
fn try_load_reads_file_from_disk() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("target.json");
    std::fs::write(&path, r#"{ "name": "My Game", "controller": { "emulateDS4": true } }"#)
        .unwrap();

    // Act
    let config = try_load(&path).unwrap();

    // Assert
    assert_eq!(config.name, "My Game");
    assert!(config.controller.emulate_alternate_profile);
}

#[test]
fn load_missing_file_falls_back_to_defaults() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.json");

    // Act
    let config = load(Some(&path));

    // Assert
    assert_eq!(config.controller.max_slots, 1);
}

#[test]
fn resolve_path_prefers_existing_file() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("direct.json");
    std::fs::write(&path, "{}").unwrap();

    // Act
    let resolved = resolve_path(path.to_str());

    // Assert
    assert_eq!(resolved, Some(path));
}

#[test]
fn resolve_path_appends_json_suffix_for_names() {
    // Act
    let resolved = resolve_path(Some("Some Game"));

    // Assert
    if let Some(path) = resolved {
        assert!(path.ends_with("Targets/Some Game.json") || path.ends_with(r"Targets\Some Game.json"));
    }
}
