use clap::{Arg, ArgMatches, Command};

pub const ARG_MAIL_RELAY_URL: &str = "mail-relay-url";
pub const ARG_MAIL_FROM: &str = "mail-from";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Relay endpoint; mail is only logged when unset.
    pub relay_url: Option<String>,
    pub from: String,
}

impl Options {
    /// Parse mail delivery arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the sender address is blank.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let relay_url = matches
            .get_one::<String>(ARG_MAIL_RELAY_URL)
            .cloned()
            .filter(|v| !v.trim().is_empty());
        let from = match matches.get_one::<String>(ARG_MAIL_FROM) {
            Some(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => anyhow::bail!("missing required argument: --{ARG_MAIL_FROM}"),
        };
        Ok(Self { relay_url, from })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MAIL_RELAY_URL)
                .long(ARG_MAIL_RELAY_URL)
                .help("HTTP endpoint accepting outbound mail as JSON")
                .env("EDURESOLVE_MAIL_RELAY_URL"),
        )
        .arg(
            Arg::new(ARG_MAIL_FROM)
                .long(ARG_MAIL_FROM)
                .help("Sender address for outbound mail")
                .env("EDURESOLVE_MAIL_FROM")
                .default_value("no-reply@eduresolve.dev"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_relay_means_log_only() -> anyhow::Result<()> {
        temp_env::with_vars(
            [
                ("EDURESOLVE_MAIL_RELAY_URL", Some("  ")),
                ("EDURESOLVE_MAIL_FROM", None),
            ],
            || {
                let matches = with_args(Command::new("test")).try_get_matches_from(["test"])?;
                assert_eq!(
                    Options::parse(&matches)?,
                    Options {
                        relay_url: None,
                        from: "no-reply@eduresolve.dev".to_string(),
                    }
                );
                Ok(())
            },
        )
    }
}
