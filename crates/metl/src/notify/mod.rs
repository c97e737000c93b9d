//! Completion notifications.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::NotificationConfig;
use crate::error::{MetlError, Result};

/// Outcome of a job run, as delivered to notifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub job: String,
    pub status: String,
    pub elapsed: Duration,
    pub rows: u64,
    pub accepted: u64,
    pub rejected: u64,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: processed {} rows; accepted {} and rejected {} in {}",
            self.job,
            self.rows,
            self.accepted,
            self.rejected,
            format_elapsed(self.elapsed)
        )
    }
}

/// Render a duration as `1h2m3.5s`, `1m30s`, `1.5s` or `250ms`.
fn format_elapsed(elapsed: Duration) -> String {
    let nanos = elapsed.as_nanos();
    match nanos {
        0 => return "0s".to_string(),
        1..=999 => return format!("{}ns", nanos),
        1_000..=999_999 => return format!("{}µs", decimal(nanos, 1_000)),
        1_000_000..=999_999_999 => return format!("{}ms", decimal(nanos, 1_000_000)),
        _ => {}
    }

    let secs = elapsed.as_secs();
    let (hours, minutes) = (secs / 3600, secs / 60 % 60);
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    let seconds = u128::from(secs % 60) * 1_000_000_000 + u128::from(elapsed.subsec_nanos());
    out.push_str(&decimal(seconds, 1_000_000_000));
    out.push('s');
    out
}

/// `value / unit` with trailing fractional zeros trimmed.
fn decimal(value: u128, unit: u128) -> String {
    let (whole, frac) = (value / unit, value % unit);
    if frac == 0 {
        return whole.to_string();
    }
    let width = unit.ilog10() as usize;
    let frac = format!("{:0width$}", frac, width = width);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

/// Body POSTed by [`WebhookNotifier`].
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    text: String,
    job: &'a str,
    status: &'a str,
    rows: u64,
    accepted: u64,
    rejected: u64,
    elapsed_ms: u64,
}

impl<'a> From<&'a Message> for WebhookPayload<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            text: message.to_string(),
            job: &message.job,
            status: &message.status,
            rows: message.rows,
            accepted: message.accepted,
            rejected: message.rejected,
            elapsed_ms: u64::try_from(message.elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Delivers a completion message somewhere.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &str;

    async fn notify(&self, message: &Message) -> Result<()>;
}

/// Writes the message to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, message: &Message) -> Result<()> {
        info!(job = %message.job, status = %message.status, "{}", message);
        Ok(())
    }
}

/// POSTs the message as JSON to a URL.
#[derive(Debug)]
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        &self.url
    }

    async fn notify(&self, message: &Message) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&WebhookPayload::from(message))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| MetlError::Notify(format!("{}: {}", self.url, e)))?;
        debug!(url = %self.url, "Webhook delivered");
        Ok(())
    }
}

/// Build the notifiers configured for a job.
pub fn notifiers_from(config: &NotificationConfig) -> Vec<Arc<dyn Notifier>> {
    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
    if config.log {
        notifiers.push(Arc::new(LogNotifier));
    }
    for url in &config.webhooks {
        notifiers.push(Arc::new(WebhookNotifier::new(url)));
    }
    notifiers
}

/// Send `message` to every notifier concurrently and wait for all of them.
///
/// Failures are logged and counted; one failing notifier never affects the
/// others. Returns the number of failed deliveries.
pub async fn notify_all(notifiers: &[Arc<dyn Notifier>], message: &Message) -> usize {
    let handles: Vec<_> = notifiers
        .iter()
        .map(|notifier| {
            let notifier = Arc::clone(notifier);
            let message = message.clone();
            tokio::spawn(async move {
                let result = notifier.notify(&message).await;
                (notifier.name().to_string(), result)
            })
        })
        .collect();

    let mut failures = 0;
    for joined in join_all(handles).await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((name, Err(e))) => {
                warn!(notifier = %name, error = %e, "Notification failed");
                failures += 1;
            }
            Err(e) => {
                warn!(error = %e, "Notification task panicked");
                failures += 1;
            }
        }
    }
    failures
}
