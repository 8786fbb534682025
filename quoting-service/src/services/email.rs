//! Out-of-band delivery of validation codes and document notifications.

use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use service_core::error::AppError;
use std::time::Duration;

/// Delivery seam for everything the engine sends out of band: sent-quote
/// notifications and validation codes. Swapped for a recording double in
/// tests.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Notify the customer that a quote is ready, with its public link.
    async fn send_quote_notification(
        &self,
        to_email: &str,
        quote_number: &str,
        public_url: &str,
    ) -> Result<(), AppError>;

    /// Deliver a validation code. The code travels only through this channel.
    async fn send_validation_code(
        &self,
        to_email: &str,
        quote_number: &str,
        code: &str,
    ) -> Result<(), AppError>;

    /// Confirm to the customer that their accepted quote became an invoice.
    async fn send_conversion_confirmation(
        &self,
        to_email: &str,
        invoice_number: &str,
    ) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct SmtpDispatcher {
    mailer: SmtpTransport,
    from_email: String,
}

impl SmtpDispatcher {
    pub fn new(config: &crate::config::SmtpConfig) -> Result<Self, AppError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e.to_string())))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "SMTP dispatcher initialized");

        Ok(Self {
            mailer,
            from_email: config.from_email.clone(),
        })
    }

    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), AppError> {
        let email = Message::builder()
            .from(
                self.from_email
                    .parse()
                    .map_err(|e: lettre::address::AddressError| AppError::InternalError(e.into()))?,
            )
            .to(to_email
                .parse()
                .map_err(|e: lettre::address::AddressError| AppError::InternalError(e.into()))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| AppError::InternalError(e.into()))?;

        // Send in the blocking pool; SmtpTransport is synchronous.
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::InternalError(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to_email, subject = %subject, "Email sent");
                Ok(())
            }
            Err(e) => {
                tracing::error!(to = %to_email, error = %e, "Failed to send email");
                Err(AppError::EmailError(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl NotificationDispatcher for SmtpDispatcher {
    async fn send_quote_notification(
        &self,
        to_email: &str,
        quote_number: &str,
        public_url: &str,
    ) -> Result<(), AppError> {
        let subject = format!("Your quote {quote_number}");
        let body = format!(
            "Hello,\n\nYour quote {quote_number} is ready for review:\n\n{public_url}\n\n\
             This link requires no account.\n"
        );
        self.send_email(to_email, &subject, &body).await
    }

    async fn send_validation_code(
        &self,
        to_email: &str,
        quote_number: &str,
        code: &str,
    ) -> Result<(), AppError> {
        let subject = format!("Confirmation code for quote {quote_number}");
        let body = format!(
            "Hello,\n\nYour confirmation code for quote {quote_number} is:\n\n    {code}\n\n\
             The code expires in 15 minutes.\n"
        );
        self.send_email(to_email, &subject, &body).await
    }

    async fn send_conversion_confirmation(
        &self,
        to_email: &str,
        invoice_number: &str,
    ) -> Result<(), AppError> {
        let subject = format!("Invoice {invoice_number}");
        let body = format!(
            "Hello,\n\nYour accepted quote has been invoiced as {invoice_number}.\n"
        );
        self.send_email(to_email, &subject, &body).await
    }
}

/// Logging-only dispatcher for local development without SMTP credentials.
/// The validation code itself is never logged.
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send_quote_notification(
        &self,
        to_email: &str,
        quote_number: &str,
        public_url: &str,
    ) -> Result<(), AppError> {
        tracing::info!(
            to = %to_email,
            quote_number = %quote_number,
            public_url = %public_url,
            "Quote notification (log only)"
        );
        Ok(())
    }

    async fn send_validation_code(
        &self,
        to_email: &str,
        quote_number: &str,
        _code: &str,
    ) -> Result<(), AppError> {
        tracing::info!(
            to = %to_email,
            quote_number = %quote_number,
            "Validation code dispatched (log only, code withheld)"
        );
        Ok(())
    }

    async fn send_conversion_confirmation(
        &self,
        to_email: &str,
        invoice_number: &str,
    ) -> Result<(), AppError> {
        tracing::info!(
            to = %to_email,
            invoice_number = %invoice_number,
            "Conversion confirmation (log only)"
        );
        Ok(())
    }
}
