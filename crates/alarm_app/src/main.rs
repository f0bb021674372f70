use alarm_app::app::run;
use alarm_core::AlarmConfig;

fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    let config = AlarmConfig::from_env().unwrap_or_else(|err| {
        tracing::warn!(%err, "invalid configuration, keeping defaults for unusable values");
        AlarmConfig::from_env_lenient()
    });
    if let Err(err) = run(config) {
        tracing::error!(%err, "Failed to run Shabbos desktop host");
    }
}
