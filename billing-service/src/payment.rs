//! Payment processing: records money received against a billing record
//! and advances its settlement status.
//!
//! Payments are append-only. There is no refund or void here; a mistaken
//! payment is an operational correction, not a state transition.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{round_money, BillingRecord, BillingTotals, PaymentMethod, PaymentStatus};

/// A single payment to record
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PaymentRequest {
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_reference: Option<String>,
    /// Cash handed over by the patient, used to compute change
    pub amount_received: Option<Decimal>,
    pub notes: Option<String>,
}

/// Outcome of a recorded payment
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentOutcome {
    pub payment_id: Uuid,
    pub payment_status: PaymentStatus,
    pub paid_amount: Decimal,
    pub remaining_amount: Decimal,
    pub change_given: Option<Decimal>,
}

/// Amounts and status a payment settles to, computed before any write
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub paid_amount: Decimal,
    pub remaining_amount: Decimal,
    pub payment_status: PaymentStatus,
    pub change_given: Option<Decimal>,
}

/// Shape checks that need no database state
pub fn validate_request(request: &PaymentRequest) -> BillingResult<()> {
    if request.amount <= Decimal::ZERO {
        return Err(BillingError::Validation(
            "Payment amount must be greater than zero".to_string(),
        ));
    }
    if !request.payment_method.is_cash() {
        let has_reference = request
            .payment_reference
            .as_deref()
            .map_or(false, |reference| !reference.trim().is_empty());
        if !has_reference {
            return Err(BillingError::Validation(
                "Payment reference is required for non-cash payments".to_string(),
            ));
        }
    }
    Ok(())
}

/// Apply a payment against the current balance. Rejects overpayment and
/// short cash, computes change, and derives the resulting status.
pub fn settle(record: &BillingRecord, request: &PaymentRequest) -> BillingResult<Settlement> {
    let remaining_before = record.remaining_balance();
    if request.amount > remaining_before {
        return Err(BillingError::InvalidPayment(format!(
            "Payment of {} exceeds remaining balance of {}",
            request.amount, remaining_before
        )));
    }

    let change_given = match (request.payment_method.is_cash(), request.amount_received) {
        (true, Some(received)) => {
            let change = round_money(received - request.amount);
            if change.is_sign_negative() {
                return Err(BillingError::InvalidPayment(
                    "Amount received is less than the payment amount".to_string(),
                ));
            }
            Some(change)
        }
        _ => None,
    };

    let paid_amount = round_money(record.paid_amount + request.amount);
    let remaining_amount = round_money(record.patient_payable - paid_amount);

    Ok(Settlement {
        paid_amount,
        remaining_amount,
        payment_status: BillingTotals::status_for(paid_amount, remaining_amount),
        change_given,
    })
}

/// Records payments atomically against billing records
pub struct PaymentProcessor {
    pool: PgPool,
}

impl PaymentProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record one payment. The balance check and the paid-amount update
    /// run under the same row lock, so two concurrent payments cannot
    /// both pass the check and jointly overpay.
    pub async fn process(
        &self,
        billing_id: Uuid,
        user_id: Uuid,
        request: PaymentRequest,
    ) -> BillingResult<PaymentOutcome> {
        validate_request(&request)?;

        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, BillingRecord>(
            "SELECT * FROM billing_records WHERE id = $1 FOR UPDATE",
        )
        .bind(billing_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(BillingError::BillingNotFound(billing_id))?;

        let settlement = settle(&record, &request)?;

        let amount_received = if request.payment_method.is_cash() {
            request.amount_received
        } else {
            None
        };

        let payment_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO billing_payments
                (id, billing_id, amount, payment_method, payment_reference,
                 amount_received, change_given, received_by, notes)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(payment_id)
        .bind(billing_id)
        .bind(request.amount)
        .bind(request.payment_method)
        .bind(&request.payment_reference)
        .bind(amount_received)
        .bind(settlement.change_given)
        .bind(user_id)
        .bind(&request.notes)
        .execute(&mut *tx)
        .await?;

        // last payment wins for the denormalized header display fields
        sqlx::query(
            "UPDATE billing_records
             SET paid_amount = $2, remaining_amount = $3, payment_status = $4,
                 payment_method = $5, payment_reference = $6,
                 processed_by = $7, processed_at = NOW(), updated_at = NOW()
             WHERE id = $1",
        )
        .bind(billing_id)
        .bind(settlement.paid_amount)
        .bind(settlement.remaining_amount)
        .bind(settlement.payment_status)
        .bind(request.payment_method)
        .bind(&request.payment_reference)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            billing_id = %billing_id,
            payment_id = %payment_id,
            amount = %request.amount,
            status = ?settlement.payment_status,
            "payment recorded"
        );

        Ok(PaymentOutcome {
            payment_id,
            payment_status: settlement.payment_status,
            paid_amount: settlement.paid_amount,
            remaining_amount: settlement.remaining_amount,
            change_given: settlement.change_given,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn dec(value: i64) -> Decimal {
        Decimal::from(value)
    }

    fn record(payable: i64, paid: i64) -> BillingRecord {
        BillingRecord {
            id: Uuid::new_v4(),
            visit_id: Uuid::new_v4(),
            subtotal: dec(payable),
            discount: Decimal::ZERO,
            discount_percentage: None,
            insurance_coverage: Decimal::ZERO,
            total_amount: dec(payable),
            patient_payable: dec(payable),
            paid_amount: dec(paid),
            remaining_amount: dec(payable - paid),
            payment_status: BillingTotals::status_for(dec(paid), dec(payable - paid)),
            payment_method: None,
            payment_reference: None,
            processed_by: None,
            processed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn cash(amount: i64, received: Option<i64>) -> PaymentRequest {
        PaymentRequest {
            amount: dec(amount),
            payment_method: PaymentMethod::Cash,
            payment_reference: None,
            amount_received: received.map(dec),
            notes: None,
        }
    }

    #[test]
    fn test_zero_or_negative_amount_rejected() {
        assert!(matches!(
            validate_request(&cash(0, None)),
            Err(BillingError::Validation(_))
        ));
        assert!(matches!(
            validate_request(&cash(-5_000, None)),
            Err(BillingError::Validation(_))
        ));
        assert!(validate_request(&cash(5_000, None)).is_ok());
    }

    #[test]
    fn test_non_cash_requires_reference() {
        let mut request = cash(10_000, None);
        request.payment_method = PaymentMethod::Transfer;
        assert!(matches!(
            validate_request(&request),
            Err(BillingError::Validation(_))
        ));

        request.payment_reference = Some("  ".to_string());
        assert!(validate_request(&request).is_err());

        request.payment_reference = Some("TRF-20250310-001".to_string());
        assert!(validate_request(&request).is_ok());
    }

    #[test]
    fn test_overpayment_rejected() {
        let record = record(100_000, 0);
        let result = settle(&record, &cash(150_000, None));
        assert!(matches!(result, Err(BillingError::InvalidPayment(_))));
    }

    #[test]
    fn test_overpayment_checked_against_remaining_not_payable() {
        let record = record(100_000, 80_000);
        assert!(settle(&record, &cash(30_000, None)).is_err());
        assert!(settle(&record, &cash(20_000, None)).is_ok());
    }

    #[test]
    fn test_cash_change_computed() {
        let record = record(100_000, 0);
        let settlement = settle(&record, &cash(47_000, Some(50_000))).unwrap();
        assert_eq!(settlement.change_given, Some(dec(3_000)));

        let short = settle(&record, &cash(47_000, Some(40_000)));
        assert!(matches!(short, Err(BillingError::InvalidPayment(_))));
    }

    #[test]
    fn test_exact_cash_gives_zero_change() {
        let record = record(100_000, 0);
        let settlement = settle(&record, &cash(47_000, Some(47_000))).unwrap();
        assert_eq!(settlement.change_given, Some(Decimal::ZERO));
    }

    #[test]
    fn test_change_only_for_cash() {
        let record = record(100_000, 0);
        let request = PaymentRequest {
            amount: dec(47_000),
            payment_method: PaymentMethod::Card,
            payment_reference: Some("APPR-0081".to_string()),
            amount_received: Some(dec(50_000)),
            notes: None,
        };
        let settlement = settle(&record, &request).unwrap();
        assert_eq!(settlement.change_given, None);
    }

    #[test]
    fn test_two_half_payments_reach_paid() {
        let first = settle(&record(200_000, 0), &cash(100_000, None)).unwrap();
        assert_eq!(first.payment_status, PaymentStatus::Partial);
        assert_eq!(first.remaining_amount, dec(100_000));

        let second = settle(&record(200_000, 100_000), &cash(100_000, None)).unwrap();
        assert_eq!(second.payment_status, PaymentStatus::Paid);
        assert_eq!(second.remaining_amount, Decimal::ZERO);
    }

    #[test]
    fn test_single_full_payment_goes_straight_to_paid() {
        let settlement = settle(&record(200_000, 0), &cash(200_000, None)).unwrap();
        assert_eq!(settlement.payment_status, PaymentStatus::Paid);
        assert_eq!(settlement.paid_amount, dec(200_000));
    }
}
