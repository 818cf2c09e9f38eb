//! Background delivery of queued notices.
//!
//! Polls the outbox, hands each pending notice to the mail transport and
//! records the outcome. A notice that keeps failing is parked as `failed`
//! after the configured number of attempts.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::{get_pending_notices, record_notice_failure, set_notice_sent, Database, Notice};

use super::transport::{Mail, MailTransport};

/// Notices fetched per poll.
const BATCH_SIZE: i64 = 50;

/// Run the notice dispatcher loop forever. Spawn it as a background task.
pub async fn run(config: Arc<Config>, db: Database, transport: Arc<dyn MailTransport>) {
    info!(
        poll_interval_secs = config.notice_poll_interval.as_secs(),
        max_attempts = config.notice_max_attempts,
        "Notice dispatcher started"
    );

    loop {
        match process_batch(&db, transport.as_ref(), config.notice_max_attempts).await {
            Ok(0) => debug!("No pending notices"),
            Ok(sent) => info!(sent, "Delivered notices"),
            Err(e) => error!("Failed to process notice batch: {e:#}"),
        }

        tokio::time::sleep(config.notice_poll_interval).await;
    }
}

/// Deliver one batch of pending notices, returning how many were sent.
///
/// # Errors
///
/// Returns an error only if the outbox cannot be read. Delivery failures are
/// recorded on the notice and logged.
pub async fn process_batch(
    db: &Database,
    transport: &dyn MailTransport,
    max_attempts: u32,
) -> Result<usize> {
    let notices = get_pending_notices(db.pool(), BATCH_SIZE).await?;
    let mut sent = 0;

    for notice in &notices {
        match transport.send(&mail_for(notice)).await {
            Ok(()) => {
                debug!(notice_id = notice.id, "Notice delivered");
                if let Err(e) = set_notice_sent(db.pool(), notice.id).await {
                    error!(notice_id = notice.id, "Failed to mark notice sent: {e:#}");
                    continue;
                }
                sent += 1;
            }
            Err(e) => {
                let attempt = notice.attempts + 1;
                warn!(
                    notice_id = notice.id,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Notice delivery failed"
                );
                if let Err(e) =
                    record_notice_failure(db.pool(), notice.id, &format!("{e:#}"), max_attempts)
                        .await
                {
                    error!(notice_id = notice.id, "Failed to record notice failure: {e:#}");
                }
            }
        }
    }

    Ok(sent)
}

fn mail_for(notice: &Notice) -> Mail {
    Mail {
        from: notice.sender.clone(),
        to: vec![notice.email.clone()],
        subject: notice.subject.clone(),
        text_body: notice.text_body.clone(),
        html_body: notice.html_body.clone(),
    }
}
