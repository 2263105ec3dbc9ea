use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use cosmo_infra::{JobStatusStore, JobStoreConfig, RedisHashStore};
use cosmo_jobctl::{Cli, execute};

#[tokio::main]
async fn main() -> ExitCode {
    cosmo_observability::init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "command failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let mut config = JobStoreConfig::from_env()?;
    if let Some(url) = cli.redis_url {
        config.redis_url = url;
    }

    let backend = RedisHashStore::connect(&config.redis_url)
        .await
        .context("connecting to redis")?;
    let store: JobStatusStore<RedisHashStore> = JobStatusStore::from_config(backend, &config);

    let result = execute(&store, cli.command).await;
    store.into_backend().close();

    let report = result?;
    println!("{}", serde_json::to_string_pretty(&report.output)?);
    Ok(report.exit_code)
}
