//! Registry Sync - mirror image bundles to container registries

use registry_sync::cli::{Args, Runner};
use registry_sync::logging;
use std::process;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let args = Args::parse_args();
    logging::init(args.verbose, args.quiet);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, finishing in-flight copies");
            on_signal.cancel();
        }
    });

    let runner = Runner::new(args);
    if let Err(e) = runner.run(&cancel).await {
        runner.logger().error(&format!("sync failed: {}", e));
        process::exit(1);
    }
}
