//! Billing record management: creating, updating and recalculating the
//! persisted billing snapshot for a visit.
//!
//! Line items are always replaced wholesale (delete all, insert all) so the
//! stored bill reflects the current clinical facts, never a patched total.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::discharge::ChargeAggregator;
use crate::error::{BillingError, BillingResult};
use crate::models::{
    BillingLineItem, BillingRecord, BillingTotals, DiscountAdjustment,
};

/// Result of a read-only billing calculation for a visit
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BillingCalculation {
    pub visit_id: Uuid,
    pub items: Vec<BillingLineItem>,
    pub subtotal: Decimal,
    pub total_amount: Decimal,
}

/// Cashier-supplied adjustments for a billing update
#[derive(Debug, Clone, Default)]
pub struct BillingOptions {
    pub discount: Option<Decimal>,
    pub discount_percentage: Option<Decimal>,
    pub insurance_coverage: Option<Decimal>,
}

/// Creates and maintains billing records for visits
pub struct BillingService {
    pool: PgPool,
    aggregator: ChargeAggregator,
}

impl BillingService {
    pub fn new(pool: PgPool) -> Self {
        let aggregator = ChargeAggregator::new(pool.clone());
        Self { pool, aggregator }
    }

    /// Current charges for a visit, computed from source tables without
    /// touching the persisted billing record
    pub async fn calculate_for_visit(&self, visit_id: Uuid) -> BillingResult<BillingCalculation> {
        let collected = self.aggregator.collect(visit_id).await?;
        let subtotal = collected.subtotal();
        Ok(BillingCalculation {
            visit_id,
            items: collected.items,
            subtotal,
            total_amount: subtotal,
        })
    }

    /// Billing record for a visit, if one has been initialized
    pub async fn find_by_visit(&self, visit_id: Uuid) -> BillingResult<Option<BillingRecord>> {
        let record = sqlx::query_as::<_, BillingRecord>(
            "SELECT * FROM billing_records WHERE visit_id = $1",
        )
        .bind(visit_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Initialize billing for a visit when its medical record is locked.
    /// Returns the existing record's id if billing was already initialized.
    pub async fn create_billing_from_medical_record(&self, visit_id: Uuid) -> BillingResult<Uuid> {
        let mut tx = self.pool.begin().await?;
        let billing_id = self
            .create_billing_from_medical_record_in(&mut tx, visit_id)
            .await?;
        tx.commit().await?;
        Ok(billing_id)
    }

    /// Same as [`Self::create_billing_from_medical_record`] but joins a
    /// caller-supplied transaction, for callers that lock the medical
    /// record and initialize billing as one atomic step.
    pub async fn create_billing_from_medical_record_in(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        visit_id: Uuid,
    ) -> BillingResult<Uuid> {
        let existing = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM billing_records WHERE visit_id = $1",
        )
        .bind(visit_id)
        .fetch_optional(&mut **tx)
        .await?;
        if let Some(billing_id) = existing {
            debug!(visit_id = %visit_id, billing_id = %billing_id, "billing already initialized");
            return Ok(billing_id);
        }

        let collected = self.aggregator.collect(visit_id).await?;
        let totals = BillingTotals::derive(
            collected.subtotal(),
            DiscountAdjustment::None,
            Decimal::ZERO,
            Decimal::ZERO,
        )?;

        let billing_id = insert_header(tx, visit_id, &totals).await?;
        replace_line_items(tx, billing_id, &collected.items).await?;
        info!(visit_id = %visit_id, billing_id = %billing_id, subtotal = %totals.subtotal, "billing initialized");
        Ok(billing_id)
    }

    /// Re-sum the persisted line items and rewrite the derived header
    /// amounts. Discount, insurance, paid amount and payment status are
    /// left as stored. For callers that mutated line items directly.
    pub async fn recalculate_billing(&self, visit_id: Uuid) -> BillingResult<BillingRecord> {
        let mut tx = self.pool.begin().await?;

        let record = lock_by_visit(&mut tx, visit_id)
            .await?
            .ok_or(BillingError::BillingNotFound(visit_id))?;

        let stored_sum: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(total_price), 0::numeric)
             FROM billing_line_items WHERE billing_id = $1",
        )
        .bind(record.id)
        .fetch_one(&mut *tx)
        .await?;

        let totals = BillingTotals::derive(
            stored_sum,
            DiscountAdjustment::Fixed(record.discount),
            record.insurance_coverage,
            record.paid_amount,
        )?;

        let updated = sqlx::query_as::<_, BillingRecord>(
            "UPDATE billing_records
             SET subtotal = $2, total_amount = $3, patient_payable = $4,
                 remaining_amount = $5, updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(record.id)
        .bind(totals.subtotal)
        .bind(totals.total_amount)
        .bind(totals.patient_payable)
        .bind(totals.remaining_amount)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(visit_id = %visit_id, subtotal = %totals.subtotal, "billing recalculated");
        Ok(updated)
    }

    /// Full recompute path used by the cashier: fresh items from source
    /// tables, discount and insurance applied, paid amount preserved.
    /// Creates the billing record if the visit has none yet.
    pub async fn create_or_update_billing(
        &self,
        visit_id: Uuid,
        user_id: Uuid,
        options: BillingOptions,
    ) -> BillingResult<Uuid> {
        let collected = self.aggregator.collect(visit_id).await?;
        let subtotal = collected.subtotal();

        let mut tx = self.pool.begin().await?;

        // lock serializes against concurrent payments on the same record
        let existing = lock_by_visit(&mut tx, visit_id).await?;

        let adjustment = effective_adjustment(&options, existing.as_ref());
        let insurance_coverage = options
            .insurance_coverage
            .or(existing.as_ref().map(|record| record.insurance_coverage))
            .unwrap_or(Decimal::ZERO);
        let paid_amount = existing
            .as_ref()
            .map(|record| record.paid_amount)
            .unwrap_or(Decimal::ZERO);

        let totals = BillingTotals::derive(subtotal, adjustment, insurance_coverage, paid_amount)?;

        let billing_id = match &existing {
            Some(record) => {
                update_header_totals(&mut tx, record.id, &totals).await?;
                record.id
            }
            None => insert_header(&mut tx, visit_id, &totals).await?,
        };
        replace_line_items(&mut tx, billing_id, &collected.items).await?;

        tx.commit().await?;
        info!(
            visit_id = %visit_id,
            billing_id = %billing_id,
            user_id = %user_id,
            total = %totals.total_amount,
            payable = %totals.patient_payable,
            "billing record written"
        );
        Ok(billing_id)
    }
}

/// Resolve the discount to apply from the request fields, falling back to
/// the stored discount when the request leaves both fields unset. A stored
/// percentage is reapplied as a percentage so it tracks the new subtotal.
fn effective_adjustment(
    options: &BillingOptions,
    existing: Option<&BillingRecord>,
) -> DiscountAdjustment {
    if options.discount.is_some() || options.discount_percentage.is_some() {
        return DiscountAdjustment::from_fields(options.discount, options.discount_percentage);
    }
    match existing {
        Some(record) => match record.discount_percentage {
            Some(pct) => DiscountAdjustment::Percentage(pct),
            None if record.discount > Decimal::ZERO => DiscountAdjustment::Fixed(record.discount),
            None => DiscountAdjustment::None,
        },
        None => DiscountAdjustment::None,
    }
}

async fn lock_by_visit(
    tx: &mut Transaction<'_, Postgres>,
    visit_id: Uuid,
) -> BillingResult<Option<BillingRecord>> {
    let record = sqlx::query_as::<_, BillingRecord>(
        "SELECT * FROM billing_records WHERE visit_id = $1 FOR UPDATE",
    )
    .bind(visit_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(record)
}

async fn insert_header(
    tx: &mut Transaction<'_, Postgres>,
    visit_id: Uuid,
    totals: &BillingTotals,
) -> BillingResult<Uuid> {
    let billing_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO billing_records
            (id, visit_id, subtotal, discount, discount_percentage, insurance_coverage,
             total_amount, patient_payable, paid_amount, remaining_amount, payment_status)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(billing_id)
    .bind(visit_id)
    .bind(totals.subtotal)
    .bind(totals.discount)
    .bind(totals.discount_percentage)
    .bind(totals.insurance_coverage)
    .bind(totals.total_amount)
    .bind(totals.patient_payable)
    .bind(totals.paid_amount)
    .bind(totals.remaining_amount)
    .bind(totals.payment_status)
    .execute(&mut **tx)
    .await?;
    Ok(billing_id)
}

/// Rewrites the monetary fields of an existing header. Paid amount and
/// payment status belong to the payment processor and are not touched.
async fn update_header_totals(
    tx: &mut Transaction<'_, Postgres>,
    billing_id: Uuid,
    totals: &BillingTotals,
) -> BillingResult<()> {
    sqlx::query(
        "UPDATE billing_records
         SET subtotal = $2, discount = $3, discount_percentage = $4,
             insurance_coverage = $5, total_amount = $6, patient_payable = $7,
             remaining_amount = $8, updated_at = NOW()
         WHERE id = $1",
    )
    .bind(billing_id)
    .bind(totals.subtotal)
    .bind(totals.discount)
    .bind(totals.discount_percentage)
    .bind(totals.insurance_coverage)
    .bind(totals.total_amount)
    .bind(totals.patient_payable)
    .bind(totals.remaining_amount)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Delete-all, insert-all replacement keyed by line number
async fn replace_line_items(
    tx: &mut Transaction<'_, Postgres>,
    billing_id: Uuid,
    items: &[BillingLineItem],
) -> BillingResult<()> {
    sqlx::query("DELETE FROM billing_line_items WHERE billing_id = $1")
        .bind(billing_id)
        .execute(&mut **tx)
        .await?;

    for (index, item) in items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO billing_line_items
                (id, billing_id, line_no, item_type, item_id, item_name, item_code,
                 description, quantity, unit_price, discount, total_price)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(Uuid::new_v4())
        .bind(billing_id)
        .bind((index + 1) as i32)
        .bind(item.item_type)
        .bind(item.item_id)
        .bind(&item.item_name)
        .bind(&item.item_code)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.discount)
        .bind(item.total_price)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentStatus;
    use chrono::Utc;

    fn dec(value: i64) -> Decimal {
        Decimal::from(value)
    }

    fn record_with(
        discount: Decimal,
        discount_percentage: Option<Decimal>,
        paid: Decimal,
    ) -> BillingRecord {
        BillingRecord {
            id: Uuid::new_v4(),
            visit_id: Uuid::new_v4(),
            subtotal: dec(1_000_000),
            discount,
            discount_percentage,
            insurance_coverage: Decimal::ZERO,
            total_amount: dec(1_000_000) - discount,
            patient_payable: dec(1_000_000) - discount,
            paid_amount: paid,
            remaining_amount: dec(1_000_000) - discount - paid,
            payment_status: PaymentStatus::Pending,
            payment_method: None,
            payment_reference: None,
            processed_by: None,
            processed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_request_percentage_wins_over_request_amount() {
        let options = BillingOptions {
            discount: Some(dec(50_000)),
            discount_percentage: Some(dec(10)),
            insurance_coverage: None,
        };
        let adjustment = effective_adjustment(&options, None);
        assert_eq!(adjustment, DiscountAdjustment::Percentage(dec(10)));

        // the percentage is applied, not the 50,000 fixed amount
        let totals =
            BillingTotals::derive(dec(1_000_000), adjustment, Decimal::ZERO, Decimal::ZERO)
                .unwrap();
        assert_eq!(totals.discount, dec(100_000));
    }

    #[test]
    fn test_absent_fields_preserve_stored_discount() {
        let options = BillingOptions::default();

        let fixed = record_with(dec(25_000), None, Decimal::ZERO);
        assert_eq!(
            effective_adjustment(&options, Some(&fixed)),
            DiscountAdjustment::Fixed(dec(25_000))
        );

        let percentage = record_with(dec(100_000), Some(dec(10)), Decimal::ZERO);
        assert_eq!(
            effective_adjustment(&options, Some(&percentage)),
            DiscountAdjustment::Percentage(dec(10))
        );

        assert_eq!(
            effective_adjustment(&options, None),
            DiscountAdjustment::None
        );
    }

    #[test]
    fn test_explicit_zero_discount_clears_stored_discount() {
        let options = BillingOptions {
            discount: Some(Decimal::ZERO),
            discount_percentage: None,
            insurance_coverage: None,
        };
        let stored = record_with(dec(25_000), None, Decimal::ZERO);
        assert_eq!(
            effective_adjustment(&options, Some(&stored)),
            DiscountAdjustment::Fixed(Decimal::ZERO)
        );
    }
}
