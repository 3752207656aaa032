//! Read-only billing queries for display and receipt printing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::models::{BillingLineItemRow, BillingRecord, PaymentRecord};

/// Patient identity as printed on receipts
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PatientSummary {
    pub id: Uuid,
    pub name: String,
    pub mr_number: String,
}

/// Visit identity as printed on receipts
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VisitSummary {
    pub id: Uuid,
    pub visit_number: String,
    pub visit_type: String,
    pub created_at: DateTime<Utc>,
}

/// Billing record with its line items, payment history and identity
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BillingDetails {
    pub billing: BillingRecord,
    pub items: Vec<BillingLineItemRow>,
    pub payments: Vec<PaymentRecord>,
    pub patient: PatientSummary,
    pub visit: VisitSummary,
}

#[derive(Debug, FromRow)]
struct IdentityRow {
    patient_id: Uuid,
    patient_name: String,
    mr_number: String,
    visit_number: String,
    visit_type: String,
    visit_created_at: DateTime<Utc>,
}

/// Read-only assembly of billing state for a visit
pub struct BillingQuery {
    pool: PgPool,
}

impl BillingQuery {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Everything needed to display or print the bill for a visit.
    /// Returns `None` when billing has not been initialized yet.
    pub async fn billing_details(&self, visit_id: Uuid) -> BillingResult<Option<BillingDetails>> {
        let billing = sqlx::query_as::<_, BillingRecord>(
            "SELECT * FROM billing_records WHERE visit_id = $1",
        )
        .bind(visit_id)
        .fetch_optional(&self.pool)
        .await?;

        let billing = match billing {
            Some(billing) => billing,
            None => return Ok(None),
        };

        let (items, payments, identity) = tokio::try_join!(
            self.fetch_items(billing.id),
            self.fetch_payments(billing.id),
            self.fetch_identity(visit_id),
        )?;

        Ok(Some(BillingDetails {
            billing,
            items,
            payments,
            patient: PatientSummary {
                id: identity.patient_id,
                name: identity.patient_name,
                mr_number: identity.mr_number,
            },
            visit: VisitSummary {
                id: visit_id,
                visit_number: identity.visit_number,
                visit_type: identity.visit_type,
                created_at: identity.visit_created_at,
            },
        }))
    }

    async fn fetch_items(&self, billing_id: Uuid) -> BillingResult<Vec<BillingLineItemRow>> {
        let items = sqlx::query_as::<_, BillingLineItemRow>(
            "SELECT * FROM billing_line_items WHERE billing_id = $1 ORDER BY line_no",
        )
        .bind(billing_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn fetch_payments(&self, billing_id: Uuid) -> BillingResult<Vec<PaymentRecord>> {
        let payments = sqlx::query_as::<_, PaymentRecord>(
            "SELECT * FROM billing_payments WHERE billing_id = $1 ORDER BY created_at DESC",
        )
        .bind(billing_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    async fn fetch_identity(&self, visit_id: Uuid) -> BillingResult<IdentityRow> {
        let identity = sqlx::query_as::<_, IdentityRow>(
            "SELECT p.id AS patient_id, p.name AS patient_name, p.mr_number,
                    v.visit_number, v.visit_type, v.created_at AS visit_created_at
             FROM visits v
             JOIN patients p ON p.id = v.patient_id
             WHERE v.id = $1",
        )
        .bind(visit_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(identity)
    }
}
