//! Best-effort subscription notifications.
//!
//! Messages go to a Telegram chat through the Bot API `sendMessage` method.
//! [`Notifier::spawn`] runs the send on a detached task: the webhook never
//! waits for it and a failure is only logged.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tokio::task::JoinHandle;

use plansync_core::{Plan, UserId};

use crate::config::ServiceConfig;

/// Timeout for a single send.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Notification failure. Never leaves the notifier task.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// Bot token or chat id missing.
    #[error("notification channel not configured")]
    NotConfigured,

    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx answer from the messaging API.
    #[error("messaging API returned {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
}

/// What a notification describes.
#[derive(Debug, Clone)]
pub struct SubscriptionNotice {
    /// Event that triggered it.
    pub event_type: String,
    /// Application user.
    pub user_id: UserId,
    /// Plan after reconciliation.
    pub plan: Plan,
    /// Amount in minor units.
    pub amount_minor: Option<i64>,
    /// Currency code.
    pub currency: Option<String>,
    /// Processor customer reference.
    pub customer_id: Option<String>,
    /// Processor subscription reference.
    pub subscription_id: Option<String>,
    /// Buyer name.
    pub customer_name: Option<String>,
    /// Buyer email.
    pub customer_email: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

/// Telegram notifier.
#[derive(Debug, Clone)]
pub struct Notifier {
    client: Client,
    api_base: String,
    bot_token: Option<String>,
    chat_id: Option<String>,
    app_base_url: String,
}

impl Notifier {
    /// Build a notifier from configuration. Missing credentials are not an
    /// error here; each send reports them.
    #[must_use]
    pub fn new(config: &ServiceConfig) -> Self {
        let client = Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_base: config.telegram_api_base.trim_end_matches('/').to_string(),
            bot_token: config.telegram_bot_token.clone(),
            chat_id: config.telegram_chat_id.clone(),
            app_base_url: config.app_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Whether both the bot token and the chat id are set.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.bot_token.is_some() && self.chat_id.is_some()
    }

    /// Send one notification and wait for the answer.
    ///
    /// # Errors
    ///
    /// Any configuration, transport or API failure.
    pub async fn send(&self, notice: &SubscriptionNotice) -> Result<(), NotificationError> {
        let (Some(token), Some(chat_id)) = (&self.bot_token, &self.chat_id) else {
            return Err(NotificationError::NotConfigured);
        };

        let text = format_message(notice, &self.app_base_url);
        let response = self
            .client
            .post(format!("{}/bot{}/sendMessage", self.api_base, token))
            .json(&SendMessage {
                chat_id,
                text: &text,
                parse_mode: "HTML",
                disable_web_page_preview: true,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    /// Send on a detached task.
    ///
    /// The handle resolves to whether the message was delivered; callers may
    /// drop it.
    pub fn spawn(self: &Arc<Self>, notice: SubscriptionNotice) -> JoinHandle<bool> {
        let notifier = Arc::clone(self);
        tokio::spawn(async move {
            match notifier.send(&notice).await {
                Ok(()) => {
                    tracing::info!(
                        user_id = %notice.user_id,
                        plan = %notice.plan,
                        "Subscription notification sent"
                    );
                    true
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        user_id = %notice.user_id,
                        event_type = %notice.event_type,
                        "Subscription notification failed"
                    );
                    false
                }
            }
        })
    }
}

/// Render the HTML message body.
#[must_use]
pub fn format_message(notice: &SubscriptionNotice, app_base_url: &str) -> String {
    let mut lines = vec![
        "<b>New subscription</b>".to_string(),
        format!("Plan: <b>{}</b>", notice.plan.display_name()),
    ];

    if let Some(amount) = notice.amount_minor {
        lines.push(format!(
            "Amount: {}",
            format_amount(amount, notice.currency.as_deref())
        ));
    }

    let customer = match (&notice.customer_name, &notice.customer_email) {
        (Some(name), Some(email)) => {
            Some(format!("{} ({})", escape_html(name), escape_html(email)))
        }
        (Some(only), None) | (None, Some(only)) => Some(escape_html(only)),
        (None, None) => None,
    };
    if let Some(customer) = customer {
        lines.push(format!("Customer: {customer}"));
    }

    lines.push(format!(
        "User: <code>{}</code>",
        escape_html(notice.user_id.as_str())
    ));
    if let Some(customer_id) = &notice.customer_id {
        lines.push(format!("Customer ID: <code>{}</code>", escape_html(customer_id)));
    }
    if let Some(subscription_id) = &notice.subscription_id {
        lines.push(format!(
            "Subscription ID: <code>{}</code>",
            escape_html(subscription_id)
        ));
    }
    lines.push(format!("Event: {}", escape_html(&notice.event_type)));
    lines.push(format!(
        "<a href=\"{}\">Open app</a>",
        escape_html(app_base_url)
    ));

    lines.join("\n")
}

/// Format minor units as `major.minor CUR`.
fn format_amount(amount_minor: i64, currency: Option<&str>) -> String {
    let sign = if amount_minor < 0 { "-" } else { "" };
    let abs = amount_minor.unsigned_abs();
    let amount = format!("{sign}{}.{:02}", abs / 100, abs % 100);

    match currency {
        Some(c) if !c.is_empty() => format!("{amount} {}", c.to_ascii_uppercase()),
        _ => amount,
    }
}

/// Escape the characters Telegram's HTML parse mode treats specially.
fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notice() -> SubscriptionNotice {
        SubscriptionNotice {
            event_type: "checkout.session.completed".into(),
            user_id: UserId::new("user_1").unwrap(),
            plan: Plan::Ultimate,
            amount_minor: Some(4900),
            currency: Some("usd".into()),
            customer_id: Some("cus_1".into()),
            subscription_id: Some("sub_1".into()),
            customer_name: Some("Ada <Admin>".into()),
            customer_email: Some("ada@example.com".into()),
        }
    }

    fn config(api_base: &str) -> ServiceConfig {
        ServiceConfig {
            telegram_bot_token: Some("123:abc".into()),
            telegram_chat_id: Some("-100".into()),
            telegram_api_base: api_base.into(),
            app_base_url: "https://app.example.com/".into(),
            ..ServiceConfig::default()
        }
    }

    #[test]
    fn amount_in_major_units() {
        assert_eq!(format_amount(4900, Some("usd")), "49.00 USD");
        assert_eq!(format_amount(5, Some("eur")), "0.05 EUR");
        assert_eq!(format_amount(-1250, None), "-12.50");
    }

    #[test]
    fn message_escapes_names() {
        let text = format_message(&notice(), "https://app.example.com");
        assert!(text.contains("Plan: <b>Ultimate</b>"));
        assert!(text.contains("Amount: 49.00 USD"));
        assert!(text.contains("Ada &lt;Admin&gt; (ada@example.com)"));
        assert!(text.contains("<code>sub_1</code>"));
        assert!(text.ends_with("<a href=\"https://app.example.com\">Open app</a>"));
    }

    #[test]
    fn message_has_one_field_per_line() {
        let notice = SubscriptionNotice {
            amount_minor: None,
            customer_name: None,
            customer_id: None,
            ..notice()
        };

        let text = format_message(&notice, "https://app.example.com");
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines,
            vec![
                "<b>New subscription</b>",
                "Plan: <b>Ultimate</b>",
                "Customer: ada@example.com",
                "User: <code>user_1</code>",
                "Subscription ID: <code>sub_1</code>",
                "Event: checkout.session.completed",
                "<a href=\"https://app.example.com\">Open app</a>",
            ]
        );
    }

    #[tokio::test]
    async fn send_posts_html_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_partial_json(serde_json::json!({
                "chat_id": "-100",
                "parse_mode": "HTML"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = Notifier::new(&config(&server.uri()));
        notifier.send(&notice()).await.unwrap();
    }

    #[tokio::test]
    async fn spawned_failure_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = Arc::new(Notifier::new(&config(&server.uri())));
        let delivered = notifier.spawn(notice()).await.unwrap();
        assert!(!delivered);
    }

    #[tokio::test]
    async fn missing_credentials_are_swallowed() {
        let notifier = Arc::new(Notifier::new(&ServiceConfig::default()));
        assert!(!notifier.is_configured());

        let err = notifier.send(&notice()).await.unwrap_err();
        assert!(matches!(err, NotificationError::NotConfigured));
        assert!(!notifier.spawn(notice()).await.unwrap());
    }
}
