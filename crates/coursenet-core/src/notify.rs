//! Failure escalation
//!
//! The maintenance job hands its error report to a [`Notifier`]. Delivery is
//! pluggable: the log, or a sendmail-compatible mail transfer agent.

use crate::config::{NotifierKind, NotifyConfig};
use crate::error::{CoreError, Result};
use crate::process::{ExitPolicy, Invocation, ProcessDelegate};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Receives the text of a failed maintenance run
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<()>;
}

/// Build the notifier selected in configuration
pub fn from_config(config: &NotifyConfig) -> Arc<dyn Notifier> {
    match config.kind {
        NotifierKind::Log => Arc::new(LogNotifier),
        NotifierKind::Sendmail => Arc::new(SendmailNotifier::from_config(config)),
    }
}

/// Writes the report to the error log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        error!(report = %text, "Maintenance run reported errors");
        Ok(())
    }
}

/// Pipes a plain-text mail into `<program> -t -i`
#[derive(Debug, Clone)]
pub struct SendmailNotifier {
    program: String,
    from: String,
    to: String,
    subject: String,
    delegate: ProcessDelegate,
}

impl SendmailNotifier {
    pub fn new(
        program: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            delegate: ProcessDelegate::with_default_timeout(Duration::from_secs(60)),
        }
    }

    pub fn from_config(config: &NotifyConfig) -> Self {
        Self::new(
            &config.sendmail_program,
            &config.from,
            &config.to,
            &config.subject,
        )
    }

    /// RFC 5322 message with the report as body
    fn message(&self, text: &str) -> String {
        format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}\r\n",
            self.from, self.to, self.subject, text
        )
    }
}

#[async_trait]
impl Notifier for SendmailNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        // -t: recipients from headers, -i: a lone '.' line does not end input
        let invocation = Invocation::new(&self.program)
            .args(["-t", "-i"])
            .stdin(self.message(text));

        let output = self.delegate.run(&invocation).await?;

        if let Some(reason) = output.failure(ExitPolicy::Strict) {
            return Err(CoreError::Notify {
                message: format!("{}: {}", self.program, reason.trim()),
            });
        }

        info!(to = %self.to, bytes = text.len(), "Error report mailed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        LogNotifier.notify("stderr text").await.unwrap();
    }

    #[test]
    fn test_message_layout() {
        let notifier = SendmailNotifier::new(
            "sendmail",
            "coursenet@example.org",
            "ops@example.org",
            "[ERROR] EPFL CourseNet",
        );
        let message = notifier.message("scraper crashed");

        assert!(message.starts_with("From: coursenet@example.org\r\nTo: ops@example.org\r\n"));
        assert!(message.contains("Subject: [ERROR] EPFL CourseNet\r\n"));
        assert!(message.ends_with("\r\n\r\nscraper crashed\r\n"));
    }

    #[tokio::test]
    async fn test_from_config_selects_kind() {
        let mut config = NotifyConfig {
            sendmail_program: "/nonexistent/sendmail".to_string(),
            ..Default::default()
        };

        // The log notifier never touches the mail program
        from_config(&config).notify("report").await.unwrap();

        config.kind = NotifierKind::Sendmail;
        let result = from_config(&config).notify("report").await;
        assert!(
            matches!(&result, Err(CoreError::ProcessSpawn { program, .. }) if program == "/nonexistent/sendmail"),
            "{:?}",
            result
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sendmail_receives_message_on_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("mail.txt");
        let program = dir.path().join("fake-sendmail");
        std::fs::write(
            &program,
            format!("#!/bin/sh\necho \"$@\" > {0}.args\ncat > {0}\n", capture.display()),
        )
        .unwrap();
        make_executable(&program);

        let notifier = SendmailNotifier::new(
            program.to_string_lossy(),
            "coursenet@example.org",
            "ops@example.org",
            "[ERROR] EPFL CourseNet",
        );
        notifier.notify("Traceback: scraper failed").await.unwrap();

        let mail = std::fs::read_to_string(&capture).unwrap();
        assert!(mail.contains("To: ops@example.org"));
        assert!(mail.contains("Traceback: scraper failed"));
        let args = std::fs::read_to_string(capture.with_extension("txt.args")).unwrap();
        assert_eq!(args.trim(), "-t -i");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sendmail_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("broken-sendmail");
        std::fs::write(&program, "#!/bin/sh\ncat > /dev/null\nexit 75\n").unwrap();
        make_executable(&program);

        let notifier = SendmailNotifier::new(program.to_string_lossy(), "a@b", "c@d", "s");
        let result = notifier.notify("report").await;

        assert!(matches!(result, Err(CoreError::Notify { message }) if message.contains("exited with code 75")));
    }

    #[cfg(unix)]
    fn make_executable(path: &std::path::Path) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}
