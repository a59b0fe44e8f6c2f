//! Runs one sync from parsed arguments and reports the outcome

use crate::cli::args::Args;
use crate::error::Result;
use crate::logging::Logger;
use crate::sync::{SyncReport, Syncer};
use tokio_util::sync::CancellationToken;

pub struct Runner {
    args: Args,
    logger: Logger,
}

impl Runner {
    pub fn new(args: Args) -> Self {
        let logger = if args.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(args.verbose)
        };
        Self { args, logger }
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        self.logger.section("Registry Sync");
        self.args.validate()?;
        let config = self.args.to_config()?;

        let bundles = self
            .args
            .bundles
            .iter()
            .map(|b| format!("{}={}", b.name(), b.mount_point().display()))
            .collect::<Vec<_>>()
            .join(", ");
        self.logger.summary_kv(
            "Configuration",
            &[
                ("Bundles", bundles),
                ("Destinations", self.args.hosts.join(", ")),
                ("TLS verify", (!config.system.insecure_skip_tls_verify).to_string()),
                (
                    "Policy",
                    config
                        .system
                        .signature_policy_path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "accept anything".to_string()),
                ),
            ],
        );

        let syncer = Syncer::with_http_transport(self.args.bundles.clone(), config)?
            .with_logger(self.logger.clone());
        let report = syncer.sync(&self.args.hosts, cancel).await?;

        self.print_report(&report);
        Ok(report)
    }

    fn print_report(&self, report: &SyncReport) {
        for bundle in &report.bundles {
            let items: Vec<(&str, String)> = bundle
                .destinations
                .iter()
                .map(|d| (d.registry.as_str(), format!("{} image(s)", d.images_copied)))
                .collect();
            self.logger
                .summary_kv(&format!("Bundle {} (served on {})", bundle.bundle, bundle.source), &items);
        }
        self.logger.verbose(&format!(
            "total elapsed: {}",
            self.logger.format_duration(self.logger.elapsed())
        ));
    }
}
