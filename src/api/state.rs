//! Shared application state and tunables.

use std::{fmt, sync::Arc};

use super::{blobs::BlobStore, email::MailSender, handlers::auth::TokenCodec};
use crate::store::Store;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_PASSWORD_RESET_TTL_SECONDS: i64 = 3 * 60;
const DEFAULT_REPORT_THRESHOLD: usize = 10;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 4 * 1024 * 1024;
const DEFAULT_COMPRESS_ABOVE_BYTES: usize = 2 * 1024 * 1024;
const DEFAULT_MAIL_FROM: &str = "no-reply@eduresolve.dev";

#[derive(Clone, Debug)]
pub struct AppConfig {
    frontend_base_url: String,
    session_ttl_seconds: i64,
    password_reset_ttl_seconds: i64,
    report_threshold: usize,
    max_upload_bytes: usize,
    compress_above_bytes: usize,
    mail_from: String,
}

impl AppConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            password_reset_ttl_seconds: DEFAULT_PASSWORD_RESET_TTL_SECONDS,
            report_threshold: DEFAULT_REPORT_THRESHOLD,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            compress_above_bytes: DEFAULT_COMPRESS_ABOVE_BYTES,
            mail_from: DEFAULT_MAIL_FROM.to_string(),
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_password_reset_ttl_seconds(mut self, seconds: i64) -> Self {
        self.password_reset_ttl_seconds = seconds;
        self
    }

    /// A zero threshold would delete threads on the first report; clamp to 1.
    #[must_use]
    pub fn with_report_threshold(mut self, threshold: usize) -> Self {
        self.report_threshold = threshold.max(1);
        self
    }

    #[must_use]
    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    #[must_use]
    pub fn with_compress_above_bytes(mut self, bytes: usize) -> Self {
        self.compress_above_bytes = bytes;
        self
    }

    #[must_use]
    pub fn with_mail_from(mut self, mail_from: String) -> Self {
        self.mail_from = mail_from;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub const fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub const fn password_reset_ttl_seconds(&self) -> i64 {
        self.password_reset_ttl_seconds
    }

    #[must_use]
    pub const fn report_threshold(&self) -> usize {
        self.report_threshold
    }

    #[must_use]
    pub const fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    #[must_use]
    pub const fn compress_above_bytes(&self) -> usize {
        self.compress_above_bytes
    }

    #[must_use]
    pub fn mail_from(&self) -> &str {
        &self.mail_from
    }
}

/// Collaborators and configuration handed to every handler through an
/// `Extension<Arc<AppState>>`.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn Store>,
    blobs: Arc<dyn BlobStore>,
    mailer: Arc<dyn MailSender>,
    tokens: TokenCodec,
    config: AppConfig,
}

impl AppState {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        blobs: Arc<dyn BlobStore>,
        mailer: Arc<dyn MailSender>,
        tokens: TokenCodec,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            blobs,
            mailer,
            tokens,
            config,
        }
    }

    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    #[must_use]
    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    #[must_use]
    pub fn mailer(&self) -> &dyn MailSender {
        self.mailer.as_ref()
    }

    #[must_use]
    pub const fn tokens(&self) -> &TokenCodec {
        &self.tokens
    }

    #[must_use]
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("tokens", &"***")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::new("http://localhost:5173".to_string());
        assert_eq!(config.session_ttl_seconds(), 86_400);
        assert_eq!(config.password_reset_ttl_seconds(), 180);
        assert_eq!(config.report_threshold(), 10);
        assert_eq!(config.max_upload_bytes(), 4 * 1024 * 1024);
        assert_eq!(config.compress_above_bytes(), 2 * 1024 * 1024);
    }

    #[test]
    fn report_threshold_is_at_least_one() {
        let config = AppConfig::new(String::new()).with_report_threshold(0);
        assert_eq!(config.report_threshold(), 1);
    }
}
