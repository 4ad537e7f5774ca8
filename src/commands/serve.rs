use anyhow::{Context, Result};
use clap::ArgMatches;

use geko_runtime::api::HttpApiServer;

pub async fn run(matches: &ArgMatches) -> Result<()> {
    let (mut config, pipeline) = super::build_pipeline(matches)?;

    if let Some(host) = matches.get_one::<String>("host") {
        config.api.host = host.clone();
    }
    if let Some(port) = matches.get_one::<u16>("port") {
        config.api.port = *port;
    }

    tracing::info!(
        "Serving {} on {}:{}",
        pipeline.active_model(),
        config.api.host,
        config.api.port
    );

    HttpApiServer::new(config.api, pipeline)
        .start()
        .await
        .context("HTTP server stopped")
}
