//! Shoal CLI
//!
//! Runs an in-process Shoal overlay: two federated servers, two providers
//! sharing the same files, and one consumer that searches and downloads.
//!
//! Usage:
//!   shoal-cli --demo                                # Run the demo in ./shoal-demo
//!   shoal-cli --demo --workdir /tmp/shoal           # Use another working directory
//!   shoal-cli --demo --query "report !draft"        # Search for something else
//!   shoal-cli --demo --strategy sequential          # Download one block at a time

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use shoal_core::data::short_hash;
use shoal_core::network::share::{DownloadStatus, DownloadStrategy};
use shoal_core::testing::TerminalDirectory;
use shoal_core::{ClientNode, ProtocolConfig, ProtocolError, ProtocolEvent, ServerNode};

/// How long the demo waits for all downloads
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Files every demo provider shares: (name, size in bytes)
const DEMO_FILES: &[(&str, usize)] = &[
    ("holiday-photos.zip", 512 * 1024),
    ("holiday-video.mp4", 1024 * 1024),
    ("quarterly-report.pdf", 96 * 1024),
    ("quarterly-report-draft.pdf", 64 * 1024),
];

fn print_usage() {
    println!("Shoal - search and transfer overlay");
    println!();
    println!("Usage: shoal-cli --demo [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --demo                  Run the in-process demo overlay");
    println!("  --workdir <DIR>         Working directory (default: shoal-demo)");
    println!("  --query <QUERY>         Search query (default: holiday)");
    println!("  --strategy <STRATEGY>   sequential or parallel (default: parallel)");
    println!("  --testing               Small blocks and fast liveness sweeps");
    println!("  -h, --help              Show this help");
    println!();
    println!("Environment:");
    println!("  RUST_LOG                Log filter (default: info)");
}

/// Deterministic content for a demo file
fn demo_content(name: &str, size: usize) -> Vec<u8> {
    let seed = name.bytes().fold(7u8, |acc, b| acc.wrapping_mul(31).wrapping_add(b));
    (0..size)
        .map(|i| seed.wrapping_add((i % 251) as u8))
        .collect()
}

async fn seed_folder(folder: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(folder).await?;
    for (name, size) in DEMO_FILES {
        let path = folder.join(name);
        if tokio::fs::metadata(&path).await.is_err() {
            tokio::fs::write(&path, demo_content(name, *size)).await?;
        }
    }
    Ok(())
}

fn peer_config(base: &ProtocolConfig, workdir: &Path, peer: &str) -> ProtocolConfig {
    base.clone()
        .with_shared_folder(workdir.join(peer).join("shared"))
        .with_db_path(workdir.join(peer).join("shoal.db"))
}

async fn wait_for_downloads(
    events: &mut mpsc::Receiver<ProtocolEvent>,
    mut pending: usize,
) -> usize {
    let mut completed = 0;
    let waited = tokio::time::timeout(DOWNLOAD_TIMEOUT, async {
        while pending > 0 {
            match events.recv().await {
                Some(ProtocolEvent::FileComplete(done)) => {
                    println!(
                        "  done: {} ({} bytes) -> {}",
                        done.file_name,
                        done.size,
                        done.path.display()
                    );
                    completed += 1;
                    pending -= 1;
                }
                Some(ProtocolEvent::DownloadChanged(changed)) => {
                    info!(hash = short_hash(&changed.hash), status = %changed.status, "download status");
                    if changed.status == DownloadStatus::Canceled {
                        pending -= 1;
                    }
                }
                Some(ProtocolEvent::FileFound(_)) => {}
                None => break,
            }
        }
    })
    .await;

    if waited.is_err() {
        println!("  timed out waiting for downloads");
    }
    completed
}

async fn run_demo(
    workdir: PathBuf,
    query: String,
    base: ProtocolConfig,
) -> Result<(), ProtocolError> {
    for peer in ["provider-a", "provider-b"] {
        seed_folder(&workdir.join(peer).join("shared")).await?;
    }

    // Two servers joined into one federation
    let directory = TerminalDirectory::new();
    let east = ServerNode::new(&base, directory.clone());
    let west = ServerNode::new(&base, directory.clone());
    directory.register("east", east.federation().clone());
    directory.register("west", west.federation().clone());
    west.connect_federation("east").await?;

    let provider_a = ClientNode::start(peer_config(&base, &workdir, "provider-a")).await?;
    let provider_b = ClientNode::start(peer_config(&base, &workdir, "provider-b")).await?;
    let consumer = ClientNode::start(peer_config(&base, &workdir, "consumer")).await?;
    let Some(mut events) = consumer.events().await else {
        return Err(ProtocolError::NotRunning);
    };

    provider_a.connect(east.clone()).await?;
    provider_b.connect(west.clone()).await?;
    consumer.connect(west.clone()).await?;

    println!("Searching for \"{}\"", query);
    let id = consumer.search(&query).await?;
    let results = consumer.results(id).await?;
    if results.is_empty() {
        println!("  nothing found");
    }

    let mut requested = 0;
    for (hash, reply) in &results {
        println!(
            "  found: {} ({} bytes) from {} provider(s)",
            reply.record.name,
            reply.record.size,
            reply.providers.len()
        );
        if consumer.download(id, hash).await? > 0 {
            requested += 1;
        }
    }

    if requested > 0 {
        println!("Downloading {} file(s)", requested);
        let completed = wait_for_downloads(&mut events, requested).await;
        println!("{} of {} download(s) completed", completed, requested);
    }

    let saved = consumer.shutdown().await?;
    if saved > 0 {
        println!("{} unfinished download(s) saved for next run", saved);
    }
    provider_a.shutdown().await?;
    provider_b.shutdown().await?;

    Ok(())
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let show_help = args.iter().any(|a| a == "--help" || a == "-h");
    let demo_mode = args.iter().any(|a| a == "--demo");
    let testing_mode = args.iter().any(|a| a == "--testing");

    // Parse --workdir
    let workdir: PathBuf = args
        .windows(2)
        .find(|w| w[0] == "--workdir")
        .map(|w| PathBuf::from(&w[1]))
        .unwrap_or_else(|| PathBuf::from("shoal-demo"));

    // Parse --query
    let query: String = args
        .windows(2)
        .find(|w| w[0] == "--query")
        .map(|w| w[1].clone())
        .unwrap_or_else(|| "holiday".to_string());

    // Parse --strategy
    let strategy: Option<DownloadStrategy> = args
        .windows(2)
        .find(|w| w[0] == "--strategy")
        .and_then(|w| {
            DownloadStrategy::parse(&w[1]).or_else(|| {
                eprintln!("Invalid --strategy value: {}", w[1]);
                eprintln!("   Expected: sequential or parallel");
                None
            })
        });

    if show_help || !demo_mode {
        print_usage();
        return;
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    println!("Shoal demo v0.1.0");
    println!("  workdir: {}", workdir.display());
    println!();

    let mut config = if testing_mode {
        ProtocolConfig::for_testing("shared")
    } else {
        ProtocolConfig::default()
    };
    if let Some(strategy) = strategy {
        config = config.with_strategy(strategy);
    }

    if let Err(e) = run_demo(workdir, query, config).await {
        eprintln!("Demo failed: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_content_is_stable() {
        let a = demo_content("x.bin", 1000);
        assert_eq!(a.len(), 1000);
        assert_eq!(a, demo_content("x.bin", 1000));
        assert_ne!(a, demo_content("y.bin", 1000));
    }

    #[test]
    fn test_peer_config_paths() {
        let config = peer_config(&ProtocolConfig::default(), Path::new("/w"), "consumer");
        assert_eq!(config.shared_folder, PathBuf::from("/w/consumer/shared"));
        assert_eq!(config.resolved_db_path(), PathBuf::from("/w/consumer/shoal.db"));
    }

    #[tokio::test]
    async fn test_demo_downloads_from_federation() {
        let dir = tempfile::tempdir().unwrap();
        run_demo(
            dir.path().to_path_buf(),
            "report !draft".to_string(),
            ProtocolConfig::for_testing("shared"),
        )
        .await
        .unwrap();

        let downloaded = dir.path().join("consumer").join("shared").join("quarterly-report.pdf");
        assert_eq!(
            std::fs::read(downloaded).unwrap(),
            demo_content("quarterly-report.pdf", 96 * 1024)
        );
        assert!(!dir
            .path()
            .join("consumer")
            .join("shared")
            .join("quarterly-report-draft.pdf")
            .exists());
    }
}
