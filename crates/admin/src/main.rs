use anyhow::{Context, Result};
use clap::Parser;

use jobtrack_admin::{Args, reassign_owner};
use jobtrack_client::{AuthStore, ClientConfig, PocketBaseClient};
use jobtrack_core::collections;
use jobtrack_observability::LogFormat;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // A missing .env file is fine; real environment variables still apply.
    dotenvy::dotenv().ok();
    let args = Args::parse();
    jobtrack_observability::init_with(LogFormat::Pretty);

    let credentials = args.credentials()?;
    let config = ClientConfig::new(args.pb_url.as_str());
    let client = PocketBaseClient::new(config, std::sync::Arc::new(AuthStore::new()))
        .context("failed to build http client")?;

    client
        .auth_with_password(
            collections::SUPERUSERS,
            &credentials.email,
            &credentials.password,
        )
        .await
        .context("superuser authentication failed")?;
    println!("authenticated as {}", credentials.email);

    let mut stdout = std::io::stdout().lock();
    let report = reassign_owner(&client, &credentials.target, args.dry_run, &mut stdout).await?;
    tracing::info!(
        matched = report.matched,
        updated = report.updated.len(),
        dry_run = report.dry_run,
        "reassignment finished"
    );
    Ok(())
}
