use clap::{Arg, ArgMatches, Command};

pub const ARG_MEDIA_DIR: &str = "media-dir";
pub const ARG_REPORT_THRESHOLD: &str = "report-threshold";

/// DSN selecting the in-memory store.
pub const MEMORY_DSN: &str = "memory://";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Directory for uploaded images; kept in memory when unset.
    pub media_dir: Option<String>,
    pub report_threshold: usize,
}

impl Options {
    /// Parse storage and moderation arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the report threshold is zero.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let report_threshold = matches
            .get_one::<usize>(ARG_REPORT_THRESHOLD)
            .copied()
            .unwrap_or(10);
        if report_threshold == 0 {
            anyhow::bail!("--{ARG_REPORT_THRESHOLD} must be at least 1");
        }
        Ok(Self {
            media_dir: matches
                .get_one::<String>(ARG_MEDIA_DIR)
                .cloned()
                .filter(|v| !v.trim().is_empty()),
            report_threshold,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MEDIA_DIR)
                .long(ARG_MEDIA_DIR)
                .help("Directory where uploaded images are stored")
                .env("EDURESOLVE_MEDIA_DIR"),
        )
        .arg(
            Arg::new(ARG_REPORT_THRESHOLD)
                .long(ARG_REPORT_THRESHOLD)
                .help("Distinct reports after which a message is removed")
                .env("EDURESOLVE_REPORT_THRESHOLD")
                .default_value("10")
                .value_parser(clap::value_parser!(usize)),
        )
}
