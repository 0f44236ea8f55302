use lettre::message::{header, Mailbox, Message as MailMessage};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{DeliveryError, Message, Notifier};
use crate::config::SmtpSettings;

/// Authenticated SMTP delivery. Port 465 uses implicit TLS, anything else
/// STARTTLS.
pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailNotifier {
    pub fn new(smtp: &SmtpSettings) -> Result<Self, DeliveryError> {
        let creds = Credentials::new(smtp.user.clone(), smtp.pass.clone());
        let builder = if smtp.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
        }
        .map_err(|e| DeliveryError::Transport(format!("invalid SMTP host {}: {e}", smtp.host)))?;

        let mailer = builder.port(smtp.port).credentials(creds).build();

        Ok(Self {
            mailer,
            from: smtp.from.clone(),
            to: smtp.to.clone(),
        })
    }
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, msg: &Message) -> Result<(), DeliveryError> {
        let mail = MailMessage::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(msg.subject.clone())
            .header(header::ContentType::TEXT_PLAIN)
            .body(msg.body.clone())
            .map_err(|e| DeliveryError::Build(e.to_string()))?;

        self.mailer
            .send(mail)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        tracing::info!(to = %self.to, "email sent");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "email"
    }
}
