use tracing_subscriber::EnvFilter;

use crate::config::{LogConfig, LogFormat};
use crate::error::{Error, Result};

/// `RUST_LOG` があればそれを、なければ設定のレベルを使うフィルタ
pub fn env_filter(config: &LogConfig) -> EnvFilter {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(format!("tracker_import={level},{level}", level = config.level)),
    }
}

/// グローバルなtracingサブスクライバを設定（標準出力、既定はJSON）
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_writer(std::io::stdout);

    let result = match config.format {
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
        LogFormat::Text => builder.with_target(false).try_init(),
    };

    result.map_err(|e| Error::Unexpected(format!("Failed to initialize logging: {}", e)))
}
