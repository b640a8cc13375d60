use std::path::PathBuf;
use std::time::Duration;

use edgeserve::config::Config;

#[test]
fn test_config_defaults() {
    let cfg = Config::default();

    assert_eq!(cfg.listen_addr, "127.0.0.1:8080");
    assert_eq!(cfg.buffer_size, 8192);
    assert_eq!(cfg.users_file, PathBuf::from("db/users"));
    assert_eq!(cfg.static_dir, PathBuf::from("share"));
    assert_eq!(cfg.write_timeout(), Duration::from_secs(10));
}

#[test]
fn test_empty_yaml_is_default() {
    assert_eq!(Config::from_yaml("").unwrap(), Config::default());
    assert_eq!(Config::from_yaml("\n  \n").unwrap(), Config::default());
}

#[test]
fn test_partial_yaml_keeps_other_defaults() {
    let cfg = Config::from_yaml("listen_addr: \"0.0.0.0:3000\"\nworkers: 3\n").unwrap();

    assert_eq!(cfg.listen_addr, "0.0.0.0:3000");
    assert_eq!(cfg.worker_count(), 3);
    assert_eq!(cfg.max_events, Config::default().max_events);
}

#[test]
fn test_zero_workers_means_available_parallelism() {
    let cfg = Config::from_yaml("workers: 0").unwrap();

    assert!(cfg.worker_count() >= 1);
}

#[test]
fn test_bad_yaml_is_an_error() {
    assert!(Config::from_yaml("workers: many").is_err());
}

#[test]
fn test_socket_addr() {
    let cfg = Config::from_yaml("listen_addr: \"127.0.0.1:8000\"").unwrap();
    let addr = cfg.socket_addr().unwrap();

    assert_eq!(addr.port(), 8000);
    assert!(addr.ip().is_loopback());
}

#[test]
fn test_missing_file_is_default() {
    let dir = tempfile::tempdir().unwrap();

    let cfg = Config::from_file(dir.path().join("nope.yaml")).unwrap();
    assert_eq!(cfg, Config::default());
}

#[test]
fn test_config_clone() {
    let cfg1 = Config::from_yaml("bcrypt_cost: 4").unwrap();
    let cfg2 = cfg1.clone();
    assert_eq!(cfg1, cfg2);
}

// Environment variables are process-wide, so every env-dependent check
// lives in this one test.
#[test]
fn test_load_from_environment() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("server.yaml");
    std::fs::write(&path, "listen_addr: \"127.0.0.1:9000\"\nbcrypt_cost: 5\n").unwrap();

    unsafe {
        std::env::set_var("SERVER_CONFIG", &path);
        std::env::remove_var("LISTEN");
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.listen_addr, "127.0.0.1:9000");
    assert_eq!(cfg.bcrypt_cost, 5);

    unsafe {
        std::env::set_var("LISTEN", "0.0.0.0:3000");
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.listen_addr, "0.0.0.0:3000");
    assert_eq!(cfg.bcrypt_cost, 5);

    unsafe {
        std::env::remove_var("LISTEN");
        std::env::remove_var("SERVER_CONFIG");
    }
}
