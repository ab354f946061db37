//! Configuration layering: defaults, global file, workspace file and environment

use dataprivacy::config::ConfigLoader;
use std::path::Path;
use tempfile::TempDir;

#[test]
fn test_environment_overrides_files() {
    let temp = TempDir::new().unwrap();
    let global = temp.path().join("global.toml");
    std::fs::write(&global, "[queue]\nworker_count = 6\nmax_attempts = 5\n").unwrap();
    std::fs::write(
        temp.path().join("dataprivacy.toml"),
        "[queue]\nworker_count = 4\n\n[storage]\narchive_path = \"/srv/archives\"\n",
    )
    .unwrap();

    std::env::set_var("DATAPRIVACY__QUEUE__WORKER_COUNT", "9");
    std::env::set_var("DATAPRIVACY__PROVIDERS__DISABLED", "mod_chat,block_rss_client");
    let loaded = ConfigLoader::load_layers(Some(&global), temp.path());
    std::env::remove_var("DATAPRIVACY__QUEUE__WORKER_COUNT");
    std::env::remove_var("DATAPRIVACY__PROVIDERS__DISABLED");

    let config = loaded.unwrap();
    assert_eq!(config.queue.worker_count, 9);
    assert_eq!(config.queue.max_attempts, 5);
    assert_eq!(config.storage.archive_path, Path::new("/srv/archives"));
    assert_eq!(config.storage.store_path, Path::new(".dataprivacy/store"));
    assert_eq!(config.providers.disabled, vec!["mod_chat", "block_rss_client"]);
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_file_is_reported() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("broken.toml");
    std::fs::write(&path, "[queue\nworker_count = ").unwrap();
    assert!(ConfigLoader::load_from_file(&path).is_err());
}

#[test]
fn test_invalid_values_fail_validation() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("dataprivacy.toml");
    std::fs::write(
        &path,
        "[export]\ndownload_base_url = \"not a url\"\n\n[logging]\nformat = \"xml\"\n",
    )
    .unwrap();
    let config = ConfigLoader::load_from_file(&path).unwrap();
    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 2);
}
