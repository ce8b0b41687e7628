use takopi::Settings;

#[test]
fn project_config_overrides_global_on_disk() {
    let home = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();

    let global_dir = home.path().join("takopi");
    std::fs::create_dir_all(&global_dir).unwrap();
    std::fs::write(
        global_dir.join("config.toml"),
        r#"
default_engine = "codex"
transport = "telegram"
log_level = "warn"
"#,
    )
    .unwrap();

    std::fs::write(
        project.path().join("takopi.toml"),
        r#"
default_engine = "claude"
"#,
    )
    .unwrap();

    // Settings::load discovers the project file by walking up from the given
    // root; the global file is only found via dirs::config_dir(), which we
    // can't redirect in-process, so this exercises the project-only half of
    // the merge with a clean global (no file present in the sandbox HOME).
    let settings = Settings::load(Some(project.path())).unwrap();
    assert_eq!(settings.default_engine.as_str(), "claude");
    assert_eq!(settings.transport, "telegram");
}

#[test]
fn missing_files_fall_back_to_documented_defaults() {
    let empty = tempfile::tempdir().unwrap();
    let settings = Settings::load(Some(empty.path())).unwrap();
    assert_eq!(settings.default_engine.as_str(), "codex");
    assert_eq!(
        settings
            .enabled_engines
            .iter()
            .map(|e| e.as_str())
            .collect::<Vec<_>>(),
        vec!["codex", "claude", "opencode", "pi"]
    );
}
