//! Background removal of online bookings whose payment never arrived.

use std::time::Duration;

use futures::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, DateTime, Document},
    options::FindOptions,
    Collection,
};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::MongoConfig;
use crate::error::ApiResult;
use crate::models::{collections, Booking, PaymentMethod, PaymentStatus};
use crate::notifier::Notifier;

const BATCH_SIZE: i64 = 100;

pub struct PaymentSweeper {
    bookings: Collection<Booking>,
    notifier: Notifier,
    window_millis: i64,
}

impl PaymentSweeper {
    pub fn new(db: &MongoConfig, notifier: Notifier, window_mins: i64) -> Self {
        PaymentSweeper {
            bookings: db.collection(collections::BOOKINGS),
            notifier,
            window_millis: window_mins * 60 * 1000,
        }
    }

    /// Runs forever on the current runtime, one pass per tick.
    pub fn spawn(self, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Payment sweep started (every {:?})", every);

            loop {
                ticker.tick().await;
                match self.run_once(DateTime::now()).await {
                    Ok(0) => debug!("Payment sweep: nothing to remove"),
                    Ok(n) => info!("Payment sweep removed {} abandoned bookings", n),
                    Err(e) => error!("Payment sweep failed: {}", e),
                }
            }
        })
    }

    /// One pass over every stale booking, a batch at a time. Returns how
    /// many bookings were removed.
    pub async fn run_once(&self, now: DateTime) -> ApiResult<usize> {
        let cutoff = DateTime::from_millis(now.timestamp_millis() - self.window_millis);
        let mut removed = 0;
        let mut after = None;

        loop {
            let options = FindOptions::builder()
                .sort(doc! { "_id": 1 })
                .limit(BATCH_SIZE)
                .build();
            let batch: Vec<Booking> = self
                .bookings
                .find(page_filter(cutoff, after), options)
                .await?
                .try_collect()
                .await?;

            let fetched = batch.len();
            after = batch.last().and_then(|b| b.id);
            for booking in due(batch, now, self.window_millis) {
                if self.expire(booking).await {
                    removed += 1;
                }
            }

            if fetched < BATCH_SIZE as usize || after.is_none() {
                break;
            }
        }

        Ok(removed)
    }

    async fn expire(&self, booking: Booking) -> bool {
        let Some(id) = booking.id else { return false };

        // A payment verified since the read no longer matches, so the
        // delete leaves it alone.
        match self.bookings.delete_one(still_unpaid(id), None).await {
            Ok(r) if r.deleted_count == 1 => {
                self.notifier
                    .booking(
                        &booking,
                        "Payment Session Expired",
                        "Your booking was removed because payment was not completed in time.",
                    )
                    .await;
                true
            }
            Ok(_) => {
                debug!("Booking {} was paid or removed before the sweep", id);
                false
            }
            Err(e) => {
                warn!("Failed to remove abandoned booking {}: {}", id, e);
                false
            }
        }
    }
}

/// The bookings of a fetched batch that are past the payment window.
fn due(batch: Vec<Booking>, now: DateTime, window_millis: i64) -> Vec<Booking> {
    batch
        .into_iter()
        .filter(|b| b.id.is_some() && b.is_abandoned(now, window_millis))
        .collect()
}

fn unpaid_online() -> Document {
    doc! {
        "paymentMethod": { "$in": ["Online", "UPI", "Card"] },
        "paymentStatus": PaymentStatus::Pending.as_str(),
    }
}

fn abandoned_filter(cutoff: DateTime) -> Document {
    let mut filter = unpaid_online();
    filter.insert("createdAt", doc! { "$lt": cutoff });
    filter
}

/// Stale bookings with an id past `after`, so batches never repeat even
/// when a delete fails.
fn page_filter(cutoff: DateTime, after: Option<ObjectId>) -> Document {
    let mut filter = abandoned_filter(cutoff);
    if let Some(last) = after {
        filter.insert("_id", doc! { "$gt": last });
    }
    filter
}

fn still_unpaid(id: ObjectId) -> Document {
    let mut filter = unpaid_online();
    filter.insert("_id", id);
    filter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures;

    #[test]
    fn filter_targets_old_unpaid_online_bookings() {
        let cutoff = DateTime::from_millis(1_000_000);
        let filter = abandoned_filter(cutoff);

        assert_eq!(filter.get_str("paymentStatus").unwrap(), "pending");
        let methods = filter
            .get_document("paymentMethod")
            .unwrap()
            .get_array("$in")
            .unwrap();
        assert!(methods.iter().any(|m| m.as_str() == Some(PaymentMethod::Online.as_str())));
        assert!(!methods.iter().any(|m| m.as_str() == Some(PaymentMethod::Cod.as_str())));
        assert_eq!(
            filter.get_document("createdAt").unwrap().get_datetime("$lt").unwrap(),
            &cutoff
        );
    }

    #[test]
    fn delete_is_conditional_on_still_being_unpaid() {
        let id = ObjectId::new();
        let filter = still_unpaid(id);
        assert_eq!(filter.get_object_id("_id").unwrap(), id);
        assert_eq!(filter.get_str("paymentStatus").unwrap(), "pending");
        assert!(!filter.contains_key("createdAt"));
    }

    #[test]
    fn later_batches_start_after_the_last_id() {
        let cutoff = DateTime::from_millis(1_000_000);
        assert!(!page_filter(cutoff, None).contains_key("_id"));

        let last = ObjectId::new();
        let filter = page_filter(cutoff, Some(last));
        assert_eq!(filter.get_document("_id").unwrap().get_object_id("$gt").unwrap(), last);
        assert_eq!(filter.get_str("paymentStatus").unwrap(), "pending");
    }

    #[test]
    fn only_stale_unpaid_online_bookings_are_due() {
        const WINDOW: i64 = 5 * 60 * 1000;
        let now = DateTime::now();
        let stale = DateTime::from_millis(now.timestamp_millis() - 6 * 60 * 1000);
        let aged = |method| {
            let mut b = fixtures::booking(method);
            b.created_at = stale;
            b
        };

        let abandoned = aged(PaymentMethod::Online);
        let mut paid = aged(PaymentMethod::Online);
        paid.mark_paid("order_1", "pay_1");
        let cod = aged(PaymentMethod::Cod);
        let fresh = fixtures::booking(PaymentMethod::Online);
        let mut unsaved = aged(PaymentMethod::Online);
        unsaved.id = None;

        let picked = due(vec![abandoned.clone(), paid, cod, fresh, unsaved], now, WINDOW);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, abandoned.id);
    }
}
