use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_PASSWORD_RESET_TTL_SECONDS: &str = "password-reset-ttl-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub jwt_secret: SecretString,
    pub session_ttl_seconds: i64,
    pub password_reset_ttl_seconds: i64,
}

impl Options {
    /// Parse session and recovery arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the signing secret is missing or a TTL is not positive.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let jwt_secret = match matches.get_one::<String>(ARG_JWT_SECRET) {
            Some(value) if !value.trim().is_empty() => SecretString::from(value.clone()),
            _ => anyhow::bail!("missing required argument: --{ARG_JWT_SECRET}"),
        };

        let positive = |id: &str, default: i64| -> anyhow::Result<i64> {
            let value = matches.get_one::<i64>(id).copied().unwrap_or(default);
            if value <= 0 {
                anyhow::bail!("--{id} must be positive, got {value}");
            }
            Ok(value)
        };

        Ok(Self {
            jwt_secret,
            session_ttl_seconds: positive(ARG_SESSION_TTL_SECONDS, 86_400)?,
            password_reset_ttl_seconds: positive(ARG_PASSWORD_RESET_TTL_SECONDS, 180)?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HMAC secret used to sign session tokens")
                .env("EDURESOLVE_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session lifetime in seconds")
                .env("EDURESOLVE_SESSION_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_RESET_TTL_SECONDS)
                .long(ARG_PASSWORD_RESET_TTL_SECONDS)
                .help("Validity of a password reset code in seconds")
                .env("EDURESOLVE_PASSWORD_RESET_TTL_SECONDS")
                .default_value("180")
                .value_parser(clap::value_parser!(i64)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn command() -> Command {
        with_args(Command::new("test"))
    }

    #[test]
    fn defaults_apply() -> anyhow::Result<()> {
        temp_env::with_vars(
            [
                ("EDURESOLVE_JWT_SECRET", None::<&str>),
                ("EDURESOLVE_SESSION_TTL_SECONDS", None),
                ("EDURESOLVE_PASSWORD_RESET_TTL_SECONDS", None),
            ],
            || {
                let matches = command().try_get_matches_from(["test", "--jwt-secret", "s3cret"])?;
                let options = Options::parse(&matches)?;
                assert_eq!(options.jwt_secret.expose_secret(), "s3cret");
                assert_eq!(options.session_ttl_seconds, 86_400);
                assert_eq!(options.password_reset_ttl_seconds, 180);
                Ok(())
            },
        )
    }

    #[test]
    fn env_overrides_ttls() -> anyhow::Result<()> {
        temp_env::with_vars(
            [
                ("EDURESOLVE_JWT_SECRET", Some("from-env")),
                ("EDURESOLVE_SESSION_TTL_SECONDS", Some("60")),
                ("EDURESOLVE_PASSWORD_RESET_TTL_SECONDS", Some("200")),
            ],
            || {
                let matches = command().try_get_matches_from(["test"])?;
                let options = Options::parse(&matches)?;
                assert_eq!(options.jwt_secret.expose_secret(), "from-env");
                assert_eq!(options.session_ttl_seconds, 60);
                assert_eq!(options.password_reset_ttl_seconds, 200);
                Ok(())
            },
        )
    }

    #[test]
    fn non_positive_ttl_is_rejected() -> anyhow::Result<()> {
        temp_env::with_vars([("EDURESOLVE_SESSION_TTL_SECONDS", None::<&str>)], || {
            let matches = command().try_get_matches_from([
                "test",
                "--jwt-secret",
                "s3cret",
                "--session-ttl-seconds",
                "0",
            ])?;
            assert!(Options::parse(&matches).is_err());
            Ok(())
        })
    }
}
