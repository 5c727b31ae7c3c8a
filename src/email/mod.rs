use anyhow::anyhow;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use log::{info, warn};

use crate::config::SmtpConfig;

/// Outbound mail. Sends are best-effort: a failure is logged and reported to
/// the caller as `false`, never bubbled up as a request error, because user
/// creation must not roll back when the mail relay is down.
pub struct Mailer {
    transport: SmtpTransport,
    from_address: String,
}

impl Mailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, anyhow::Error> {
        let transport = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => SmtpTransport::relay(&config.host)
                .map_err(|e| anyhow!("Failed to create SMTP transport: {e}"))?
                .port(config.port)
                .credentials(Credentials::new(user.clone(), pass.clone()))
                .build(),
            // Local relay without auth, for development setups.
            _ => SmtpTransport::builder_dangerous(&config.host)
                .port(config.port)
                .build(),
        };

        Ok(Self {
            transport,
            from_address: config.from_address.clone(),
        })
    }

    async fn send_plain(&self, to: &str, subject: &str, body: String) -> bool {
        let from = match self.from_address.parse() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Invalid from address {}: {e}", self.from_address);
                return false;
            }
        };
        let to_addr = match to.parse() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Invalid recipient address {to}: {e}");
                return false;
            }
        };

        let email = match Message::builder()
            .from(from)
            .to(to_addr)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
        {
            Ok(message) => message,
            Err(e) => {
                warn!("Failed to build email to {to}: {e}");
                return false;
            }
        };

        let transport = self.transport.clone();
        match tokio::task::spawn_blocking(move || transport.send(&email)).await {
            Ok(Ok(_)) => {
                info!("Email sent to {to}");
                true
            }
            Ok(Err(e)) => {
                warn!("Failed to send email to {to}: {e}");
                false
            }
            Err(e) => {
                warn!("Email task failed: {e}");
                false
            }
        }
    }

    /// Credentials mail for an instructor account an admin just created.
    pub async fn send_instructor_credentials(
        &self,
        to: &str,
        display_name: &str,
        temp_password: &str,
    ) -> bool {
        let body = format!(
            r#"Hello {},

An instructor account has been created for you.

  Email: {}
  Temporary password: {}

Please log in and change your password as soon as possible.

Best regards,
The Learning Platform Team"#,
            display_name, to, temp_password
        );

        self.send_plain(to, "Your instructor account", body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> SmtpConfig {
        SmtpConfig {
            host: "127.0.0.1".into(),
            // Nothing listens on port 1, so sends fail fast.
            port: 1,
            username: None,
            password: None,
            from_address: "no-reply@test.local".into(),
        }
    }

    #[test]
    fn test_relay_with_credentials_builds() {
        let config = SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            username: Some("user".into()),
            password: Some("pass".into()),
            from_address: "no-reply@example.com".into(),
        };
        assert!(Mailer::new(&config).is_ok());
    }

    #[tokio::test]
    async fn test_send_reports_failure_without_relay() {
        let mailer = Mailer::new(&unreachable_config()).expect("mailer");
        let sent = mailer
            .send_instructor_credentials("someone@test.local", "Someone", "Temp-Pass-1!")
            .await;
        assert!(!sent);
    }

    #[tokio::test]
    async fn test_send_reports_failure_for_bad_recipient() {
        let mailer = Mailer::new(&unreachable_config()).expect("mailer");
        let sent = mailer
            .send_instructor_credentials("not-an-address", "Someone", "Temp-Pass-1!")
            .await;
        assert!(!sent);
    }
}
