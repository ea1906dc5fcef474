//! Order-status notification dispatcher.
//!
//! The Order Status Service's contract ends at a successful enqueue: delivery
//! runs on a worker task behind an unbounded channel, so a slow or failing
//! sink can never block or roll back a status change. Delivery is
//! at-least-once; consumers must tolerate duplicates.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::OrderStatus;

/// Payload handed to the mail sink when an order's status changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEmail {
    pub order_id: Uuid,
    pub recipient: String,
    pub status: OrderStatus,
}

/// Terminal delivery boundary. Production uses [`TracingEmailSink`];
/// tests substitute a recording implementation.
pub trait EmailSink: Send + Sync + 'static {
    fn deliver(&self, email: &StatusEmail) -> anyhow::Result<()>;
}

/// Sink that logs the outgoing mail. Actual SMTP delivery is out of scope;
/// this is the seam where a real mailer would plug in.
pub struct TracingEmailSink;

impl EmailSink for TracingEmailSink {
    fn deliver(&self, email: &StatusEmail) -> anyhow::Result<()> {
        tracing::info!(
            order_id = %email.order_id,
            recipient = %email.recipient,
            status = %email.status,
            "order status email sent"
        );
        Ok(())
    }
}

/// Cloneable handle onto the dispatch queue.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<StatusEmail>,
}

impl Notifier {
    /// Spawn the worker draining the queue into `sink`. The worker exits once
    /// every `Notifier` clone has been dropped; awaiting the returned handle
    /// flushes any queued mail.
    pub fn spawn(sink: Arc<dyn EmailSink>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<StatusEmail>();
        let handle = tokio::spawn(async move {
            while let Some(email) = rx.recv().await {
                if let Err(err) = sink.deliver(&email) {
                    tracing::warn!(
                        order_id = %email.order_id,
                        error = %err,
                        "order status email delivery failed"
                    );
                }
            }
        });
        (Self { tx }, handle)
    }

    /// Fire-and-forget enqueue. A send failure (worker gone) is logged and
    /// swallowed; it never surfaces to the caller.
    pub fn enqueue(&self, email: StatusEmail) {
        if let Err(err) = self.tx.send(email) {
            tracing::warn!(error = %err, "notification enqueue failed, dropping email");
        }
    }
}
