use anyhow::{Context, Result};

use chromabridge_core::{AppConfig, PortResolver};

pub async fn run(config: AppConfig) -> Result<()> {
    let resolver = PortResolver::new(&config)?;
    let endpoint = resolver
        .resolve()
        .await
        .context("no companion process found")?;

    println!("{}:{}", endpoint.host, endpoint.port);
    Ok(())
}
