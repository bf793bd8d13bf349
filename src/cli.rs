use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "vaws",
    version,
    about = "A terminal dashboard for browsing cloud resources and opening tunnels."
)]
pub struct CliArgs {
    /// Named credentials profile passed to the aws CLI
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Region passed to the aws CLI
    #[arg(short, long)]
    pub region: Option<String>,

    /// Maximum simultaneous detail requests (overrides the config file)
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Items requested per listing page (overrides the config file)
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Tick interval in milliseconds for status and tunnel polling
    #[arg(long, default_value_t = 1_000)]
    pub refresh_ms: u64,

    /// tracing filter (for example: info,debug,trace)
    #[arg(long, default_value = "info")]
    pub log_filter: String,

    /// Write logs to this file instead of discarding them
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Configuration file (defaults to VAWS_CONFIG or discovered vaws.yaml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::CliArgs;
    use clap::Parser;

    #[test]
    fn parses_overrides() {
        let args = CliArgs::parse_from([
            "vaws",
            "--profile",
            "prod",
            "--concurrency",
            "4",
            "--page-size",
            "50",
            "--log-file",
            "/tmp/vaws.log",
        ]);
        assert_eq!(args.profile.as_deref(), Some("prod"));
        assert_eq!(args.concurrency, Some(4));
        assert_eq!(args.page_size, Some(50));
        assert_eq!(args.refresh_ms, 1_000);
        assert!(args.log_file.is_some());
    }
}
