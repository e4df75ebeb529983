use anyhow::{ensure, Result};
use clap::Parser;
use tracing::info;

use amisweep::ec2::AwsEc2;
use amisweep::images::{collect_instance_image_ids, collect_owned_images, resolve_unused};
use amisweep::reclaim::reclaim_images;

#[derive(Parser, Debug)]
#[command(name = "amisweep")]
#[command(about = "Deregister unused AMIs and delete their snapshots")]
#[command(version)]
struct Args {
    /// AWS account id that owns the AMIs
    #[arg(long)]
    owner_account_id: String,

    /// Report what would be removed without calling any write operation
    #[arg(long)]
    no_op: bool,

    /// AWS region (defaults to the ambient provider chain)
    #[arg(long)]
    region: Option<String>,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let owner_id = args.owner_account_id.trim().to_string();
    ensure!(!owner_id.is_empty(), "--owner-account-id must not be empty");

    let api = AwsEc2::new(args.region).await;

    info!("retrieving image ids referenced by instances");
    let in_use = collect_instance_image_ids(&api).await?;

    info!(owner_id = %owner_id, "retrieving owned images");
    let owned = collect_owned_images(&api, &owner_id).await?;

    let candidates = resolve_unused(&owned, &in_use);
    info!(
        in_use = in_use.len(),
        owned = owned.len(),
        unused = candidates.len(),
        "image survey complete"
    );
    for image_id in &candidates {
        info!(image_id = %image_id, "unused image");
    }

    let report = reclaim_images(&api, &owned, &candidates, args.no_op).await;

    info!(
        deregistered = report.deregistered(),
        snapshots_deleted = report.snapshots_deleted(),
        skipped_archived = report.skipped_archived(),
        failed = report.failed(),
        no_op = args.no_op,
        "sweep complete"
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}
