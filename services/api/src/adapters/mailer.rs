//! services/api/src/adapters/mailer.rs
//!
//! This module contains the SendGrid adapter, the concrete implementation of
//! the `Mailer` port. One POST to the v3 mail-send endpoint per message;
//! SendGrid acknowledges accepted mail with exactly HTTP 202.

use async_trait::async_trait;
use dailylit_core::ports::{Mailer, PortError, PortResult};
use serde::Serialize;
use tracing::debug;

const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

//=========================================================================================
// Request Body Types
//=========================================================================================

#[derive(Serialize)]
struct SendRequest<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: Address<'a>,
    subject: &'a str,
    content: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Personalization<'a> {
    to: Vec<Address<'a>>,
}

#[derive(Serialize)]
struct Address<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    r#type: &'a str,
    value: &'a str,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A mail adapter that implements the `Mailer` port against SendGrid.
#[derive(Clone)]
pub struct SendGridMailer {
    http: reqwest::Client,
    api_key: String,
    from_email: String,
}

impl SendGridMailer {
    /// Creates a new `SendGridMailer`.
    pub fn new(http: reqwest::Client, api_key: String, from_email: String) -> Self {
        Self {
            http,
            api_key,
            from_email,
        }
    }
}

//=========================================================================================
// `Mailer` Trait Implementation
//=========================================================================================

#[async_trait]
impl Mailer for SendGridMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> PortResult<()> {
        let body = SendRequest {
            personalizations: vec![Personalization {
                to: vec![Address { email: to }],
            }],
            from: Address {
                email: &self.from_email,
            },
            subject,
            content: vec![Content {
                r#type: "text/html",
                value: html_body,
            }],
        };

        let response = self
            .http
            .post(SENDGRID_SEND_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(format!("SendGrid request failed: {}", e)))?;

        let status = response.status();
        debug!(%status, %to, "SendGrid responded");

        // Anything but 202 is a failure; the caller logs it and the same
        // chunk is retried on the next eligible cycle.
        if status.as_u16() == 202 {
            Ok(())
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(PortError::Unexpected(format!(
                "SendGrid rejected the message: {} {}",
                status, detail
            )))
        }
    }
}
