//! Single-round-trip inventory admission.
//!
//! Admission state per voucher is two store keys: `seckill:stock:{id}` holds
//! the remaining admission stock and `seckill:order:{id}` is the set of
//! admitted users. One atomic script reads and updates both, which linearizes
//! every decision for a voucher. This state is a soft copy of inventory; the
//! order transaction re-checks against the system of record.

use std::sync::LazyLock;

use hotshop_core::{OrderId, UserId, VoucherId};
use hotshop_kv::script::arg;
use hotshop_kv::{AtomicScript, DynKvStore, KvError, LocalKeyspace, RetryPolicy, retry_idempotent};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::id::OrderIdWorker;
use crate::metrics;

pub const STOCK_KEY_PREFIX: &str = "seckill:stock:";
pub const ORDER_KEY_PREFIX: &str = "seckill:order:";

pub fn stock_key(voucher_id: VoucherId) -> String {
    format!("{STOCK_KEY_PREFIX}{voucher_id}")
}

pub fn order_key(voucher_id: VoucherId) -> String {
    format!("{ORDER_KEY_PREFIX}{voucher_id}")
}

const CODE_GRANTED: i64 = 0;
const CODE_OUT_OF_STOCK: i64 = 1;
const CODE_DUPLICATE: i64 = 2;

const ADMIT_LUA: &str = r"
if redis.call('SISMEMBER', KEYS[2], ARGV[1]) == 1 then
    return 2
end
local stock = tonumber(redis.call('GET', KEYS[1]))
if not stock or stock <= 0 then
    return 1
end
redis.call('INCRBY', KEYS[1], -1)
redis.call('SADD', KEYS[2], ARGV[1])
return 0
";

fn admit_local(ks: &mut LocalKeyspace, keys: &[String], args: &[String]) -> std::result::Result<i64, KvError> {
    let stock_key = arg("seckill_admit", keys, 0)?;
    let order_key = arg("seckill_admit", keys, 1)?;
    let user = arg("seckill_admit", args, 0)?;
    if ks.set_contains(order_key, user)? {
        return Ok(CODE_DUPLICATE);
    }
    let stock = ks
        .get_string(stock_key)?
        .and_then(|s| s.trim().parse::<i64>().ok());
    match stock {
        Some(stock) if stock > 0 => {
            ks.incr_by(stock_key, -1)?;
            ks.set_add(order_key, user)?;
            Ok(CODE_GRANTED)
        }
        _ => Ok(CODE_OUT_OF_STOCK),
    }
}

static ADMIT_SCRIPT: LazyLock<AtomicScript> =
    LazyLock::new(|| AtomicScript::new("seckill_admit", ADMIT_LUA, admit_local));

// Undoes one reservation. Gated on the set membership so a repeated
// compensation never returns stock twice.
const RELEASE_LUA: &str = r"
if redis.call('SREM', KEYS[2], ARGV[1]) == 0 then
    return 0
end
redis.call('INCRBY', KEYS[1], 1)
return 1
";

fn release_local(ks: &mut LocalKeyspace, keys: &[String], args: &[String]) -> std::result::Result<i64, KvError> {
    let stock_key = arg("seckill_release", keys, 0)?;
    let order_key = arg("seckill_release", keys, 1)?;
    let user = arg("seckill_release", args, 0)?;
    if !ks.set_remove(order_key, user)? {
        return Ok(0);
    }
    ks.incr_by(stock_key, 1)?;
    Ok(1)
}

static RELEASE_SCRIPT: LazyLock<AtomicScript> =
    LazyLock::new(|| AtomicScript::new("seckill_release", RELEASE_LUA, release_local));

const SEED_IF_ABSENT_LUA: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('SET', KEYS[1], ARGV[1])
return 1
";

fn seed_if_absent_local(
    ks: &mut LocalKeyspace,
    keys: &[String],
    args: &[String],
) -> std::result::Result<i64, KvError> {
    let key = arg("seckill_seed", keys, 0)?;
    let stock = arg("seckill_seed", args, 0)?;
    if ks.exists(key) {
        return Ok(0);
    }
    ks.set_string(key, stock, None);
    Ok(1)
}

static SEED_IF_ABSENT_SCRIPT: LazyLock<AtomicScript> =
    LazyLock::new(|| AtomicScript::new("seckill_seed", SEED_IF_ABSENT_LUA, seed_if_absent_local));

/// Why a purchase was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    OutOfStock,
    Duplicate,
}

impl Rejection {
    /// Purchaser-facing reason.
    pub fn reason(self) -> &'static str {
        match self {
            Rejection::OutOfStock => "Insufficient stock",
            Rejection::Duplicate => "Each user may only purchase this voucher once",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Rejection::OutOfStock => "out_of_stock",
            Rejection::Duplicate => "duplicate",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// The purchase holds a reservation; `order_id` is the order token.
    Granted { order_id: OrderId },
    Rejected(Rejection),
}

impl AdmissionOutcome {
    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            AdmissionOutcome::Granted { order_id } => Some(*order_id),
            AdmissionOutcome::Rejected(_) => None,
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, AdmissionOutcome::Granted { .. })
    }
}

/// Atomic stock and duplicate check for flash-sale vouchers.
#[derive(Clone)]
pub struct InventoryAdmission {
    store: DynKvStore,
    ids: OrderIdWorker,
    id_prefix: String,
    retry: RetryPolicy,
}

impl InventoryAdmission {
    pub fn new(store: DynKvStore, id_prefix: impl Into<String>) -> Self {
        Self {
            ids: OrderIdWorker::new(store.clone()),
            store,
            id_prefix: id_prefix.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Retry policy for idempotent reads and seeding.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Decides a purchase in one atomic step.
    ///
    /// The admission script is never retried: a lost reply after a
    /// successful decrement would otherwise be reported as a duplicate.
    pub async fn admit(&self, voucher_id: VoucherId, user_id: UserId) -> Result<AdmissionOutcome> {
        let keys = [stock_key(voucher_id), order_key(voucher_id)];
        let args = [user_id.to_string()];
        let code = self.store.eval(&ADMIT_SCRIPT, &keys, &args).await?;

        let rejection = match code {
            CODE_GRANTED => None,
            CODE_OUT_OF_STOCK => Some(Rejection::OutOfStock),
            CODE_DUPLICATE => Some(Rejection::Duplicate),
            other => {
                return Err(KvError::script(
                    ADMIT_SCRIPT.name(),
                    format!("unexpected reply {other}"),
                )
                .into());
            }
        };
        if let Some(rejection) = rejection {
            debug!(voucher_id, user_id, reason = rejection.as_str(), "admission rejected");
            metrics::record_admission(rejection.as_str());
            return Ok(AdmissionOutcome::Rejected(rejection));
        }

        let order_id = match self.ids.next_id(&self.id_prefix).await {
            Ok(id) => id,
            Err(e) => {
                warn!(voucher_id, user_id, error = %e, "order id allocation failed, releasing reservation");
                self.release(voucher_id, user_id).await;
                return Err(e.into());
            }
        };
        debug!(voucher_id, user_id, order_id, "admission granted");
        metrics::record_admission("granted");
        Ok(AdmissionOutcome::Granted { order_id })
    }

    /// Returns one reserved unit and forgets the user's admission.
    ///
    /// Returns `true` if a reservation existed. Failures are logged and
    /// reported as `false`; the reservation is then lost until reconciled.
    pub async fn release(&self, voucher_id: VoucherId, user_id: UserId) -> bool {
        let keys = [stock_key(voucher_id), order_key(voucher_id)];
        let args = [user_id.to_string()];
        match self.store.eval(&RELEASE_SCRIPT, &keys, &args).await {
            Ok(1) => {
                info!(voucher_id, user_id, "admission reservation released");
                metrics::record_compensation("released");
                true
            }
            Ok(_) => {
                warn!(voucher_id, user_id, "no admission reservation to release");
                metrics::record_compensation("not_reserved");
                false
            }
            Err(e) => {
                warn!(voucher_id, user_id, error = %e, "failed to release admission reservation");
                metrics::record_compensation("failed");
                false
            }
        }
    }

    /// Overwrites the admission stock of a voucher.
    pub async fn seed_stock(&self, voucher_id: VoucherId, stock: i64) -> Result<()> {
        let key = stock_key(voucher_id);
        let value = stock.to_string();
        retry_idempotent(&self.retry, "seed_stock", || self.store.set(&key, &value, None)).await?;
        info!(voucher_id, stock, "admission stock seeded");
        Ok(())
    }

    /// Seeds the admission stock only if none exists yet.
    ///
    /// Returns `true` if the stock was written.
    pub async fn seed_stock_if_absent(&self, voucher_id: VoucherId, stock: i64) -> Result<bool> {
        let keys = [stock_key(voucher_id)];
        let args = [stock.to_string()];
        let written = retry_idempotent(&self.retry, "seed_stock_if_absent", || {
            self.store.eval(&SEED_IF_ABSENT_SCRIPT, &keys, &args)
        })
        .await?;
        Ok(written == 1)
    }

    /// Current admission stock, `None` if the voucher was never seeded.
    pub async fn remaining_stock(&self, voucher_id: VoucherId) -> Result<Option<i64>> {
        let key = stock_key(voucher_id);
        let raw = retry_idempotent(&self.retry, "remaining_stock", || self.store.get(&key)).await?;
        Ok(raw.and_then(|s| s.parse().ok()))
    }
}

impl std::fmt::Debug for InventoryAdmission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryAdmission")
            .field("backend", &self.store.backend_name())
            .field("id_prefix", &self.id_prefix)
            .finish()
    }
}
