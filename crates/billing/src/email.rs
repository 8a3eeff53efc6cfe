//! Transactional email
//!
//! Thin wrapper over the Resend HTTP API. Email is best-effort throughout
//! the system: the in-app notification row is the authoritative record and
//! senders log failures without propagating them.

use serde_json::json;

use crate::error::{BillingError, BillingResult};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Email configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_key: String,
    pub from_address: String,
}

/// Sends templated billing emails
#[derive(Clone)]
pub struct BillingEmailService {
    config: Option<EmailConfig>,
    http: reqwest::Client,
}

impl BillingEmailService {
    /// Build from RESEND_API_KEY / EMAIL_FROM. Missing configuration
    /// disables sending rather than failing startup.
    pub fn from_env() -> Self {
        let config = std::env::var("RESEND_API_KEY").ok().map(|api_key| EmailConfig {
            api_key,
            from_address: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "billing@billtrack.app".to_string()),
        });

        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    /// Format cents for display: 125050 -> "1,250.50 USD" style without the
    /// thousands separator (kept simple on purpose).
    fn format_amount(cents: i64, currency: &str) -> String {
        format!("{}.{:02} {}", cents / 100, (cents % 100).abs(), currency.to_uppercase())
    }

    async fn send(&self, to: &str, subject: &str, html: &str) -> BillingResult<()> {
        let config = match &self.config {
            Some(c) => c,
            None => {
                tracing::debug!(to = %to, subject = %subject, "Email disabled, skipping send");
                return Ok(());
            }
        };

        let response = self
            .http
            .post(RESEND_API_URL)
            .bearer_auth(&config.api_key)
            .json(&json!({
                "from": config.from_address,
                "to": [to],
                "subject": subject,
                "html": html,
            }))
            .send()
            .await
            .map_err(|e| BillingError::EmailFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BillingError::EmailFailed(format!(
                "email API returned {}: {}",
                status, body
            )));
        }

        tracing::info!(to = %to, subject = %subject, "Email sent");
        Ok(())
    }

    pub async fn send_invoice(
        &self,
        to: &str,
        client_name: &str,
        invoice_number: &str,
        total_cents: i64,
        currency: &str,
        pay_url: Option<&str>,
    ) -> BillingResult<()> {
        let amount = Self::format_amount(total_cents, currency);
        let pay_link = pay_url
            .map(|url| format!(r#"<p><a href="{url}">Pay this invoice online</a></p>"#))
            .unwrap_or_default();
        let html = format!(
            r#"<h2>Invoice {invoice_number}</h2>
<p>Hi {client_name},</p>
<p>You have a new invoice for <strong>{amount}</strong>.</p>
{pay_link}
<p>Thank you for your business.</p>"#
        );
        self.send(to, &format!("Invoice {invoice_number}"), &html).await
    }

    pub async fn send_payment_received(
        &self,
        to: &str,
        client_name: &str,
        invoice_number: &str,
        amount_cents: i64,
        currency: &str,
        remaining_cents: i64,
    ) -> BillingResult<()> {
        let amount = Self::format_amount(amount_cents, currency);
        let balance_line = if remaining_cents > 0 {
            format!(
                "<p>Remaining balance: <strong>{}</strong></p>",
                Self::format_amount(remaining_cents, currency)
            )
        } else {
            "<p>This invoice is now fully paid.</p>".to_string()
        };
        let html = format!(
            r#"<h2>Payment received</h2>
<p>Hi {client_name},</p>
<p>We received your payment of <strong>{amount}</strong> for invoice {invoice_number}.</p>
{balance_line}"#
        );
        self.send(to, &format!("Payment received for {invoice_number}"), &html)
            .await
    }

    pub async fn send_refund_issued(
        &self,
        to: &str,
        client_name: &str,
        invoice_number: &str,
        amount_cents: i64,
        currency: &str,
    ) -> BillingResult<()> {
        let amount = Self::format_amount(amount_cents, currency);
        let html = format!(
            r#"<h2>Refund issued</h2>
<p>Hi {client_name},</p>
<p>A refund of <strong>{amount}</strong> was issued for invoice {invoice_number}.</p>
<p>Depending on your bank it may take 5-10 business days to appear.</p>"#
        );
        self.send(to, &format!("Refund issued for {invoice_number}"), &html)
            .await
    }

    pub async fn send_recurring_receipt(
        &self,
        to: &str,
        client_name: &str,
        invoice_number: &str,
        amount_cents: i64,
        currency: &str,
    ) -> BillingResult<()> {
        let amount = Self::format_amount(amount_cents, currency);
        let html = format!(
            r#"<h2>Subscription payment receipt</h2>
<p>Hi {client_name},</p>
<p>Your subscription payment of <strong>{amount}</strong> went through.
Invoice {invoice_number} has been added to your account.</p>"#
        );
        self.send(to, &format!("Receipt {invoice_number}"), &html).await
    }

    pub async fn send_user_invitation(
        &self,
        to: &str,
        inviter_name: &str,
        accept_url: &str,
    ) -> BillingResult<()> {
        let html = format!(
            r#"<h2>You're invited</h2>
<p>{inviter_name} invited you to the Billtrack dashboard.</p>
<p><a href="{accept_url}">Accept the invitation</a></p>"#
        );
        self.send(to, "You've been invited to Billtrack", &html).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount() {
        assert_eq!(BillingEmailService::format_amount(125050, "usd"), "1250.50 USD");
        assert_eq!(BillingEmailService::format_amount(5, "eur"), "0.05 EUR");
        assert_eq!(BillingEmailService::format_amount(100, "usd"), "1.00 USD");
    }
}
