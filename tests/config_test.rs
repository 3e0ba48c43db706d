use landmark_rs::config::{Mode, Options};

// Both cases touch the same variables, so they run in one test.
#[test]
fn options_from_env() {
    unsafe {
        std::env::set_var("LANDMARK_API_KEY", "env-key");
        std::env::set_var("LANDMARK_HOST", "collector.example.com");
        std::env::set_var("LANDMARK_PORT", "8080");
        std::env::set_var("LANDMARK_MODE", "test");
    }

    let options = Options::from_env().unwrap();
    assert_eq!(options.api_key(), Some("env-key"));
    assert_eq!(options.host, "collector.example.com");
    assert_eq!(options.port, 8080);
    assert_eq!(options.mode, Mode::Test);

    unsafe {
        std::env::set_var("LANDMARK_PORT", "not-a-port");
    }
    assert!(Options::from_env().is_err());

    unsafe {
        std::env::remove_var("LANDMARK_API_KEY");
        std::env::remove_var("LANDMARK_HOST");
        std::env::remove_var("LANDMARK_PORT");
        std::env::remove_var("LANDMARK_MODE");
    }

    let options = Options::from_env().unwrap();
    assert_eq!(options.api_key(), None);
    assert_eq!(options.host, "landmark.io");
    assert_eq!(options.mode, Mode::Live);
}

#[test]
fn options_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("landmark.toml");
    std::fs::write(
        &path,
        r#"
        api_key = "file-key"
        host = "localhost"
        port = 8000
        transport = "pixel"
        track_hash_change = true

        [device.cookie]
        key = "did"
        "#,
    )
    .unwrap();

    let options = Options::load(&path).unwrap();
    assert_eq!(options.api_key(), Some("file-key"));
    assert_eq!(options.port, 8000);
    assert_eq!(options.transport, landmark_rs::config::TransportKind::Pixel);
    assert!(options.track_hash_change);
    assert_eq!(options.device.cookie.key, "did");
}

#[test]
fn options_load_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Options::load(&dir.path().join("absent.toml")).is_err());
}
