use super::*;

fn with_servers(servers: Vec<RedisServerSettings>) -> Settings {
    Settings {
        redis_servers: servers,
        ..Default::default()
    }
}

fn server(id: i64, addr: &str) -> RedisServerSettings {
    RedisServerSettings {
        id,
        addr: addr.to_string(),
    }
}

#[test]
fn default_values() {
    let settings = Settings::default();

    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert_eq!(settings.server.notify_access_token, None);
    assert_eq!(settings.database.max_connections, 8);
    assert_eq!(settings.engine.ring_capacity, 4096);
    assert_eq!(settings.engine.scan_limit, 256);
    assert_eq!(settings.engine.scan_interval_secs, 30);
    assert_eq!(settings.consumer.fetch_limit, 128);
    assert_eq!(settings.consumer.fetch_max_bytes, 1024 * 1024);
    assert_eq!(settings.retention.max_total_events, 100_000);
    assert_eq!(settings.retention.delete_batch_size, 64);
    assert!(settings.redis_servers.is_empty());
}

#[test]
fn validation_rejects_an_empty_server_list() {
    let settings = Settings::default();
    assert!(settings.validate().is_err());
}

#[test]
fn validation_accepts_a_plain_server_list() {
    let settings = with_servers(vec![
        server(11, "localhost:6379"),
        server(12, "localhost:6380"),
    ]);
    assert!(settings.validate().is_ok());
}

#[test]
fn validation_rejects_duplicate_server_ids() {
    let settings = with_servers(vec![
        server(11, "localhost:6379"),
        server(11, "localhost:6380"),
    ]);
    let err = settings.validate().unwrap_err();
    assert!(err.to_string().contains("duplicated redis server id"));
}

#[test]
fn validation_rejects_duplicate_server_addresses() {
    let settings = with_servers(vec![
        server(11, "localhost:6379"),
        server(12, "localhost:6379"),
    ]);
    let err = settings.validate().unwrap_err();
    assert!(err.to_string().contains("duplicated redis server address"));
}

#[test]
fn validation_rejects_non_positive_server_ids() {
    let settings = with_servers(vec![server(0, "localhost:6379")]);
    assert!(settings.validate().is_err());
}

#[test]
fn validation_rejects_a_tiny_retention_cap() {
    let mut settings = with_servers(vec![server(11, "localhost:6379")]);
    settings.retention.max_total_events = 10;
    let err = settings.validate().unwrap_err();
    assert!(err.to_string().contains("max_total_events"));
}

#[test]
fn serve_overrides_take_precedence() {
    let mut settings = Settings::default();
    let overrides = ServeOverrides {
        server_host: Some("0.0.0.0".to_string()),
        server_port: Some(9090),
        database_url: Some("postgres://db:5432/other".to_string()),
    };

    settings.apply_serve_overrides(&overrides);

    assert_eq!(settings.server.host, "0.0.0.0");
    assert_eq!(settings.server.port, 9090);
    assert_eq!(settings.database.url, "postgres://db:5432/other");
}

#[test]
fn empty_overrides_change_nothing() {
    let mut settings = Settings::default();
    settings.apply_serve_overrides(&ServeOverrides::default());

    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert_eq!(settings.database.url, DEFAULT_DATABASE_URL);
}

#[test]
fn log_level_maps_to_level_filter() {
    use tracing::level_filters::LevelFilter;

    assert_eq!(LevelFilter::from(LogLevel::Trace), LevelFilter::TRACE);
    assert_eq!(LevelFilter::from(LogLevel::Info), LevelFilter::INFO);
    assert_eq!(LevelFilter::from(LogLevel::Error), LevelFilter::ERROR);
}
