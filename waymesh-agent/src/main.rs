use clap::Parser;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use waymesh_agent::config::{Cli, Commands};
use waymesh_agent::rbac::PolicyStore;
use waymesh_agent::tables::PinnedTables;
use waymesh_agent::workload::hashname::HashName;
use waymesh_agent::workload::processor::Processor;
use waymesh_agent::{xds, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Daemon(args) => {
            setup_subscriber();

            let tables = PinnedTables::from_bpffs(&args.bpf_fs)?;
            let hash_name = HashName::load(&args.hash_name_snapshot);
            let processor = Processor::new(tables, hash_name, args.node_name, args.start_mode);
            let policies = PolicyStore::default();

            let cancel = CancellationToken::new();
            let mut xds_handle = tokio::spawn(xds::run(
                args.xds_address,
                processor,
                policies,
                cancel.child_token(),
            ));
            let mut shutdown_handle = tokio::spawn(async move { shutdown_signal().await });
            tokio::select! {
                h = &mut xds_handle => exit("discovery", h),
                _ = &mut shutdown_handle => {
                    cancel.cancel();
                    match xds_handle.await {
                        Ok(Err(e)) => error!("discovery exited with error: {}", e.to_string()),
                        Err(e) => error!("discovery task failed to complete: {}", e.to_string()),
                        Ok(Ok(())) => {}
                    }
                },
            };
            info!("Exiting...");
        }
    }
    Ok(())
}

fn setup_subscriber() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waymesh_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };
    tokio::select! {
        _ = ctrl_c => {
            info!("captured ctrl_c signal");
        },
        _ = terminate => {},
    }
}

fn exit(task: &str, out: Result<Result<()>, JoinError>) {
    match out {
        Ok(Ok(_)) => {
            info!("{task} exited")
        }
        Ok(Err(e)) => {
            error!("{task} failed with error: {e}")
        }
        Err(e) => {
            error!("{task} task failed to complete: {e}")
        }
    }
}
