pub mod metrics;
pub mod worker_pool;

/// Install the global logger, `RUST_LOG` overrides the default `info` level.
pub fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .target(env_logger::Target::Stdout)
        .init();
}
