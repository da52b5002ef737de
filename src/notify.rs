use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::fiscal::{DateRange, FiscalQuarter};

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("cannot build message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("cannot read attachment {path}: {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bad content type: {0}")]
    ContentType(#[from] lettre::message::header::ContentTypeErr),

    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// What happened to the report mail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Failed(String),
    Skipped,
}

pub fn subject(range: &DateRange) -> String {
    format!(
        "Google Analytics Choropleth Maps for {} to {}",
        range.start, range.end
    )
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn is_html(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"))
}

/// Plain-text body: the subject, then a link per artifact
pub fn body(range: &DateRange, reports_url: &str, artifacts: &[PathBuf]) -> String {
    let base = reports_url.trim_end_matches('/');
    let mut body = format!("{}\n\n", subject(range));
    for artifact in artifacts {
        let label = if is_html(artifact) {
            "Interactive Map:"
        } else {
            "Static Map:"
        };
        body.push_str(&format!("{}\n{}/{}\n\n", label, base, basename(artifact)));
    }
    body
}

/// Build the report message. HTML artifacts are linked only; the rest are also attached.
pub fn compose(
    from: &str,
    to: &[String],
    range: &DateRange,
    reports_url: &str,
    artifacts: &[PathBuf],
) -> Result<Message, NotifyError> {
    let attachments: Vec<PathBuf> = artifacts.iter().filter(|a| !is_html(a)).cloned().collect();
    compose_message(
        from,
        to,
        &subject(range),
        body(range, reports_url, artifacts),
        &attachments,
    )
}

/// Plain-text message with every file in `attachments` attached
pub fn compose_message(
    from: &str,
    to: &[String],
    subject: &str,
    body: String,
    attachments: &[PathBuf],
) -> Result<Message, NotifyError> {
    let mut builder = Message::builder()
        .from(from.parse::<Mailbox>()?)
        .subject(subject);
    for recipient in to {
        builder = builder.to(recipient.parse::<Mailbox>()?);
    }

    let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(body));

    for attachment in attachments {
        let bytes = std::fs::read(attachment).map_err(|source| NotifyError::Attachment {
            path: attachment.clone(),
            source,
        })?;
        let mime = mime_guess::from_path(attachment).first_or_octet_stream();
        let content_type = ContentType::parse(mime.as_ref())?;
        debug!("Attaching {} as {}", attachment.display(), mime);
        parts = parts.singlepart(Attachment::new(basename(attachment)).body(bytes, content_type));
    }

    Ok(builder.multipart(parts)?)
}

/// Subject (and body) of the quarterly summary mail
pub fn summary_subject(quarter: &FiscalQuarter, range: &DateRange) -> String {
    format!(
        "Google Analytics Report for {} - {} to {}",
        quarter, range.start, range.end
    )
}

async fn send(config: &Config, message: Message) -> Result<(), NotifyError> {
    let mailer: AsyncSmtpTransport<Tokio1Executor> =
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(config.mail.smtp_host.as_str())
            .port(config.mail.smtp_port)
            .timeout(Some(SMTP_TIMEOUT))
            .build();
    mailer.send(message).await?;
    Ok(())
}

async fn deliver<F>(config: &Config, compose: F) -> Delivery
where
    F: FnOnce() -> Result<Message, NotifyError>,
{
    if !config.mail.enabled || config.mail.to.is_empty() {
        debug!("Mail disabled or no recipients; not sending");
        return Delivery::Skipped;
    }

    let message = match compose() {
        Ok(message) => message,
        Err(e) => {
            error!("Could not compose mail: {}", e);
            return Delivery::Failed(e.to_string());
        }
    };

    match send(config, message).await {
        Ok(()) => {
            info!("Sent mail to {}", config.mail.to.join(", "));
            Delivery::Sent
        }
        Err(e) => {
            error!("Could not send mail: {}", e);
            Delivery::Failed(e.to_string())
        }
    }
}

/// Mail the artifacts for `range`. Failures are logged and reported, never raised.
pub async fn notify(config: &Config, range: &DateRange, artifacts: &[PathBuf]) -> Delivery {
    deliver(config, || {
        compose(
            &config.mail.from,
            &config.mail.to,
            range,
            &config.output.reports_url,
            artifacts,
        )
    })
    .await
}

/// Mail the quarterly summary files as attachments
pub async fn notify_summary(
    config: &Config,
    quarter: &FiscalQuarter,
    range: &DateRange,
    files: &[PathBuf],
) -> Delivery {
    let subject = summary_subject(quarter, range);
    deliver(config, || {
        compose_message(
            &config.mail.from,
            &config.mail.to,
            &subject,
            format!("{}\n", subject),
            files,
        )
    })
    .await
}
