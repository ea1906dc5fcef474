use std::sync::Arc;

use storefront_api::{
    models::OrderStatus,
    notify::{Notifier, StatusEmail},
};
use uuid::Uuid;

mod common;

use common::RecordingSink;

fn email(status: OrderStatus) -> StatusEmail {
    StatusEmail {
        order_id: Uuid::new_v4(),
        recipient: "buyer@example.com".to_string(),
        status,
    }
}

#[tokio::test]
async fn worker_delivers_queued_mail_in_order() {
    let sink = Arc::new(RecordingSink::new());
    let (notifier, worker) = Notifier::spawn(sink.clone());

    let first = email(OrderStatus::Shipped);
    let second = email(OrderStatus::Delivered);
    notifier.enqueue(first.clone());
    notifier.enqueue(second.clone());

    // Dropping the last handle closes the channel; the worker drains what is
    // left and exits.
    drop(notifier);
    worker.await.expect("worker panicked");

    assert_eq!(sink.emails(), vec![first, second]);
}

#[tokio::test]
async fn failing_sink_does_not_stop_the_worker() {
    let sink = Arc::new(RecordingSink::failing());
    let (notifier, worker) = Notifier::spawn(sink.clone());

    notifier.enqueue(email(OrderStatus::Pending));
    notifier.enqueue(email(OrderStatus::Shipped));

    drop(notifier);
    worker.await.expect("worker panicked");

    // Both deliveries were attempted even though the first one failed.
    assert_eq!(sink.emails().len(), 2);
}

#[tokio::test]
async fn enqueue_after_worker_exit_is_swallowed() {
    let sink = Arc::new(RecordingSink::new());
    let (notifier, worker) = Notifier::spawn(sink.clone());

    worker.abort();
    let _ = worker.await;

    // Must not panic; the send failure is logged and dropped.
    notifier.enqueue(email(OrderStatus::Delivered));
}
