//! Delivery of OTP codes over SMTP.

use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use serde::Deserialize;

/// Email configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// SMTP server hostname.
    pub smtp_host: String,
    /// SMTP server port.
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// SMTP username (optional for local testing).
    #[serde(default)]
    pub smtp_user: Option<String>,
    /// SMTP password (optional for local testing).
    #[serde(default)]
    pub smtp_pass: Option<String>,
    /// From email address.
    pub from_email: String,
    /// From display name.
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_name() -> String {
    "Pantree".to_string()
}

/// Errors that can occur when sending email.
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("Failed to build email: {0}")]
    MessageError(String),
    #[error("Failed to send email: {0}")]
    TransportError(String),
}

/// Sends one-time login codes.
#[derive(Clone)]
pub struct EmailSender {
    config: EmailConfig,
}

impl EmailSender {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Builds the message carrying `code` for `to`.
    fn otp_message(&self, to: &str, code: &str, valid_minutes: i64) -> Result<Message, EmailError> {
        let body = format!(
            r#"Hi,

Your Pantree sign-in code is:

    {code}

It expires in {valid_minutes} minutes.

If you didn't request this, you can ignore this email.

- Pantree"#
        );

        let from = format!("{} <{}>", self.config.from_name, self.config.from_email);

        Message::builder()
            .from(
                from.parse()
                    .map_err(|e| EmailError::MessageError(format!("{}", e)))?,
            )
            .to(to
                .parse()
                .map_err(|e| EmailError::MessageError(format!("{}", e)))?)
            .subject("Your Pantree sign-in code")
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| EmailError::MessageError(e.to_string()))
    }

    /// Sends `code` to `to`.
    pub async fn send_otp(&self, to: &str, code: &str, valid_minutes: i64) -> Result<(), EmailError> {
        let email = self.otp_message(to, code, valid_minutes)?;
        let transport = self.build_transport()?;

        transport
            .send(email)
            .await
            .map_err(|e| EmailError::TransportError(e.to_string()))?;

        tracing::debug!(to, "sent OTP email");
        Ok(())
    }

    fn build_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, EmailError> {
        let mut builder = if self.config.smtp_port == 465 {
            // Implicit TLS
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.smtp_host)
                .map_err(|e| EmailError::TransportError(e.to_string()))?
                .port(465)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)
                .map_err(|e| EmailError::TransportError(e.to_string()))?
                .port(self.config.smtp_port)
        };

        if let (Some(user), Some(pass)) = (&self.config.smtp_user, &self.config.smtp_pass) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(builder.build())
    }
}

impl std::fmt::Debug for EmailSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailSender")
            .field("smtp_host", &self.config.smtp_host)
            .field("smtp_port", &self.config.smtp_port)
            .field("from_email", &self.config.from_email)
            .finish()
    }
}
