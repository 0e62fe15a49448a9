use aspctl::Config;
use std::io::Write;

#[test]
fn defaults_cover_every_field() {
    let config = Config::default();
    assert_eq!(config.subsystem, "ASP");
    assert_eq!(config.stand_count, 260);
    assert_eq!(config.boards_expected, 33);
    assert_eq!(config.send_retry_limit, 5);
    assert!(config.temp_critical_c > config.temp_warning_c);
}

#[test]
fn partial_json_overrides_only_named_fields() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"stand_count": 16, "boards_expected": 2, "bind_address": "127.0.0.1:4000"}}"#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.stand_count, 16);
    assert_eq!(config.boards_expected, 2);
    assert_eq!(config.bind_address, "127.0.0.1:4000");
    // Untouched fields keep their defaults.
    assert_eq!(config.subsystem, "ASP");
    assert_eq!(config.stands_per_board, 8);
}

#[test]
fn malformed_json_is_a_parse_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{{not json").unwrap();
    assert!(Config::load(file.path()).is_err());
}

#[test]
fn missing_file_is_an_io_error() {
    assert!(Config::load("/nonexistent/aspctl.json").is_err());
}

#[test]
fn sensor_names_fall_back_to_generated_names() {
    let config = Config::default();
    assert_eq!(config.sensor_name(0), "INTAKE");
    assert_eq!(config.sensor_name(5), "SENSOR6");
}
