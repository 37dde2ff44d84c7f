use tracing_subscriber::{
    filter::LevelFilter,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

/// Installs the process-wide fmt subscriber. Later calls are no-ops.
pub fn init(level: LevelFilter) {
    let subscriber = tracing_subscriber::registry().with(
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_filter(level),
    );

    let _ = subscriber.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        init(LevelFilter::WARN);
        init(LevelFilter::DEBUG);
        tracing::info!("still logging");
    }
}
