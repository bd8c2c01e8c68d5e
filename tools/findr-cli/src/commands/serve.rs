//! Run the HTTP server.

use findr_common::config::AppConfig;

pub async fn run(
    mut config: AppConfig,
    bind: Option<String>,
    port: Option<u16>,
    jpeg_quality: Option<u8>,
) -> anyhow::Result<()> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(quality) = jpeg_quality {
        anyhow::ensure!(
            (1..=100).contains(&quality),
            "--jpeg-quality must be between 1 and 100"
        );
        config.server.jpeg_quality = quality;
    }

    let addr = config.server.address();
    tracing::info!(
        addr = %addr,
        upload_dir = %config.upload_dir.display(),
        "Starting Findr server"
    );
    findr_server::start_server(&addr, &config)
        .await
        .map_err(|e| anyhow::anyhow!("Server on {addr} failed: {e}"))
}
