//! Purchase entry point: admission followed by enqueueing the intent.

use std::sync::Arc;

use hotshop_core::{PurchaseIntent, UserId, VoucherId};
use tracing::{error, instrument};

use crate::admission::{AdmissionOutcome, InventoryAdmission};
use crate::error::{Result, SeckillError};
use crate::metrics;
use crate::queue::OrderQueue;

/// Producer side of the order pipeline.
///
/// A granted purchase returns its order id as soon as the intent is queued;
/// the order itself is persisted later by [`crate::OrderConsumer`].
#[derive(Clone)]
pub struct SeckillService {
    admission: InventoryAdmission,
    queue: Arc<dyn OrderQueue>,
    compensate_on_publish_failure: bool,
}

impl SeckillService {
    pub fn new(admission: InventoryAdmission, queue: Arc<dyn OrderQueue>) -> Self {
        Self {
            admission,
            queue,
            compensate_on_publish_failure: true,
        }
    }

    /// Whether a failed publish undoes the admission reservation.
    pub fn with_compensation(mut self, enabled: bool) -> Self {
        self.compensate_on_publish_failure = enabled;
        self
    }

    pub fn admission(&self) -> &InventoryAdmission {
        &self.admission
    }

    /// Admits and enqueues a purchase.
    ///
    /// Rejections come back as `Ok(AdmissionOutcome::Rejected(_))`. A publish
    /// failure is an error even when the reservation was released.
    #[instrument(skip(self))]
    pub async fn purchase(&self, voucher_id: VoucherId, user_id: UserId) -> Result<AdmissionOutcome> {
        let outcome = self.admission.admit(voucher_id, user_id).await?;
        let AdmissionOutcome::Granted { order_id } = outcome else {
            return Ok(outcome);
        };

        let intent = PurchaseIntent::new(order_id, user_id, voucher_id);
        if let Err(source) = self.queue.publish(&intent).await {
            metrics::record_publish_failure();
            error!(
                order_id,
                queue = self.queue.name(),
                error = %source,
                compensate = self.compensate_on_publish_failure,
                "failed to publish purchase intent"
            );
            if self.compensate_on_publish_failure {
                self.admission.release(voucher_id, user_id).await;
            }
            return Err(SeckillError::Publish { order_id, source });
        }
        Ok(outcome)
    }
}

impl std::fmt::Debug for SeckillService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeckillService")
            .field("admission", &self.admission)
            .field("queue", &self.queue.name())
            .field(
                "compensate_on_publish_failure",
                &self.compensate_on_publish_failure,
            )
            .finish()
    }
}
