mod service;

use anyhow::Result;
use std::backtrace::Backtrace;
use tracing_subscriber::{fmt, EnvFilter};

use signal_desk::config::Config;

use crate::service::Service;

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "Unknown panic".to_string());
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        tracing::error!(
            panic_msg = %payload,
            %location,
            "Panic\n{}",
            Backtrace::force_capture()
        );
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    install_panic_hook();
    cfg.validate()?;

    let service = Service::new(cfg.shared()).await?;
    service.run().await?;

    Ok(())
}
