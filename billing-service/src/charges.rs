//! Charge aggregation from clinical source tables.
//!
//! Every charge category is re-derived from its source of truth at
//! calculation time. Nothing here accumulates incrementally, so edits to
//! procedures, prescriptions or lab orders after the fact are reflected
//! the next time billing is computed.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use tracing::warn;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{BillingLineItem, ItemType, VisitType};

/// Service type of the flat administration fee
pub const SERVICE_TYPE_ADMINISTRATION: &str = "administration";
/// Service type of the flat consultation fee
pub const SERVICE_TYPE_CONSULTATION: &str = "consultation";

const SECONDS_PER_DAY: i64 = 86_400;

// ============================================================================
// Source rows
// ============================================================================

/// Visit identity row from the visits table
#[derive(Debug, Clone, FromRow)]
pub struct VisitRow {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub visit_number: String,
    pub visit_type: String,
    pub created_at: DateTime<Utc>,
}

impl VisitRow {
    pub fn visit_type(&self) -> BillingResult<VisitType> {
        VisitType::parse(&self.visit_type).ok_or_else(|| {
            BillingError::Validation(format!("Unknown visit type: {}", self.visit_type))
        })
    }
}

/// Bed assignment joined with its room's daily rate
#[derive(Debug, Clone, FromRow)]
pub struct BedAssignmentRow {
    pub id: Uuid,
    pub room_name: String,
    pub daily_rate: Decimal,
    pub assigned_at: DateTime<Utc>,
    pub discharged_at: Option<DateTime<Utc>>,
}

/// Material usage joined with the inventory item it consumed
#[derive(Debug, Clone, FromRow)]
pub struct MaterialUsageRow {
    pub id: Uuid,
    pub item_name: String,
    pub item_code: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    /// Total captured at time of use, taken as-is
    pub total_price: Decimal,
}

/// Fulfilled prescription joined with the drug's catalog price
#[derive(Debug, Clone, FromRow)]
pub struct PrescriptionRow {
    pub id: Uuid,
    pub drug_name: String,
    pub drug_code: Option<String>,
    pub quantity: Decimal,
    pub dispensed_quantity: Option<Decimal>,
    pub unit_price: Decimal,
}

/// Procedure with its billable service price, when one matches
#[derive(Debug, Clone, FromRow)]
pub struct ProcedureRow {
    pub id: Uuid,
    pub name: String,
    pub icd9_code: Option<String>,
    pub service_name: Option<String>,
    pub service_price: Option<Decimal>,
}

/// Verified lab order with the price locked in at order time
#[derive(Debug, Clone, FromRow)]
pub struct LabOrderRow {
    pub id: Uuid,
    pub test_name: String,
    pub test_code: Option<String>,
    pub price: Decimal,
}

/// Active flat-fee service record
#[derive(Debug, Clone, FromRow)]
pub struct ServiceFeeRow {
    pub id: Uuid,
    pub name: String,
    pub code: Option<String>,
    pub price: Decimal,
}

// ============================================================================
// Charge scope
// ============================================================================

/// Which charge sources apply to a visit.
///
/// Room and material charges only exist for inpatient stays. Inpatient
/// procedures are billed once completed; shorter visit forms bill every
/// recorded procedure. Prescriptions are billed only once fulfilled and
/// lab orders only once verified, for every visit type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeScope {
    pub include_room: bool,
    pub include_materials: bool,
    pub completed_procedures_only: bool,
}

impl ChargeScope {
    pub fn for_visit_type(visit_type: VisitType) -> Self {
        match visit_type {
            VisitType::Inpatient => Self {
                include_room: true,
                include_materials: true,
                completed_procedures_only: true,
            },
            VisitType::Outpatient | VisitType::Emergency => Self {
                include_room: false,
                include_materials: false,
                completed_procedures_only: false,
            },
        }
    }
}

// ============================================================================
// Source queries
// ============================================================================

pub async fn fetch_visit(pool: &PgPool, visit_id: Uuid) -> BillingResult<VisitRow> {
    sqlx::query_as::<_, VisitRow>(
        "SELECT id, patient_id, visit_number, visit_type, created_at
         FROM visits WHERE id = $1",
    )
    .bind(visit_id)
    .fetch_optional(pool)
    .await?
    .ok_or(BillingError::VisitNotFound(visit_id))
}

pub async fn fetch_bed_assignments(
    pool: &PgPool,
    visit_id: Uuid,
) -> BillingResult<Vec<BedAssignmentRow>> {
    let rows = sqlx::query_as::<_, BedAssignmentRow>(
        "SELECT ba.id, r.name AS room_name, r.daily_rate, ba.assigned_at, ba.discharged_at
         FROM bed_assignments ba
         JOIN rooms r ON r.id = ba.room_id
         WHERE ba.visit_id = $1
         ORDER BY ba.assigned_at",
    )
    .bind(visit_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn fetch_material_usage(
    pool: &PgPool,
    visit_id: Uuid,
) -> BillingResult<Vec<MaterialUsageRow>> {
    let rows = sqlx::query_as::<_, MaterialUsageRow>(
        "SELECT mu.id, i.name AS item_name, i.code AS item_code,
                mu.quantity, mu.unit_price, mu.total_price
         FROM material_usage mu
         JOIN inventory_items i ON i.id = mu.item_id
         WHERE mu.visit_id = $1
         ORDER BY mu.used_at",
    )
    .bind(visit_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn fetch_fulfilled_prescriptions(
    pool: &PgPool,
    visit_id: Uuid,
) -> BillingResult<Vec<PrescriptionRow>> {
    let rows = sqlx::query_as::<_, PrescriptionRow>(
        "SELECT p.id, i.name AS drug_name, i.code AS drug_code,
                p.quantity, p.dispensed_quantity, i.unit_price
         FROM prescriptions p
         JOIN inventory_items i ON i.id = p.item_id
         WHERE p.visit_id = $1 AND p.status = 'fulfilled'
         ORDER BY p.created_at",
    )
    .bind(visit_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Procedures reach the visit through its medical record. The billable
/// service is matched by procedure code; unmatched procedures keep NULL
/// service fields and are billed at zero.
pub async fn fetch_procedures(
    pool: &PgPool,
    visit_id: Uuid,
    completed_only: bool,
) -> BillingResult<Vec<ProcedureRow>> {
    let rows = sqlx::query_as::<_, ProcedureRow>(
        "SELECT pr.id, pr.name, pr.icd9_code, s.name AS service_name, s.price AS service_price
         FROM procedures pr
         JOIN medical_records mr ON mr.id = pr.medical_record_id
         LEFT JOIN services s ON s.code = pr.icd9_code AND s.is_active = TRUE
         WHERE mr.visit_id = $1
           AND ($2 = FALSE OR pr.status = 'completed')
         ORDER BY pr.created_at",
    )
    .bind(visit_id)
    .bind(completed_only)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn fetch_verified_lab_orders(
    pool: &PgPool,
    visit_id: Uuid,
) -> BillingResult<Vec<LabOrderRow>> {
    let rows = sqlx::query_as::<_, LabOrderRow>(
        "SELECT lo.id, lt.name AS test_name, lt.code AS test_code, lo.price
         FROM lab_orders lo
         JOIN lab_tests lt ON lt.id = lo.test_id
         WHERE lo.visit_id = $1 AND lo.status = 'verified'
         ORDER BY lo.created_at",
    )
    .bind(visit_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn fetch_active_service_fee(
    pool: &PgPool,
    service_type: &str,
) -> BillingResult<Option<ServiceFeeRow>> {
    let row = sqlx::query_as::<_, ServiceFeeRow>(
        "SELECT id, name, code, price
         FROM services
         WHERE service_type = $1 AND is_active = TRUE
         ORDER BY created_at
         LIMIT 1",
    )
    .bind(service_type)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

// ============================================================================
// Line item builders
// ============================================================================

/// Whole days between assignment and discharge (or now while ongoing),
/// rounded up, never less than one
pub fn days_stayed(
    assigned_at: DateTime<Utc>,
    discharged_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> i64 {
    let end = discharged_at.unwrap_or(now);
    let seconds = (end - assigned_at).num_seconds().max(0);
    let days = (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY;
    days.max(1)
}

/// One line per bed assignment so room transfers stay visible on the bill
pub fn room_items(rows: &[BedAssignmentRow], now: DateTime<Utc>) -> Vec<BillingLineItem> {
    rows.iter()
        .map(|row| {
            let days = days_stayed(row.assigned_at, row.discharged_at, now);
            BillingLineItem::new(
                ItemType::Room,
                Some(row.id),
                row.room_name.clone(),
                Decimal::from(days),
                row.daily_rate,
            )
            .with_description(format!(
                "{} day(s) from {}",
                days,
                row.assigned_at.format("%Y-%m-%d")
            ))
        })
        .collect()
}

pub fn material_items(rows: &[MaterialUsageRow]) -> Vec<BillingLineItem> {
    rows.iter()
        .map(|row| {
            let mut item = BillingLineItem::with_recorded_total(
                ItemType::Material,
                Some(row.id),
                row.item_name.clone(),
                row.quantity,
                row.unit_price,
                row.total_price,
            );
            if let Some(code) = &row.item_code {
                item = item.with_code(code.clone());
            }
            item
        })
        .collect()
}

/// Bills the dispensed quantity when pharmacy recorded one, otherwise the
/// ordered quantity
pub fn medication_items(rows: &[PrescriptionRow]) -> Vec<BillingLineItem> {
    rows.iter()
        .map(|row| {
            let quantity = row.dispensed_quantity.unwrap_or(row.quantity);
            let mut item = BillingLineItem::new(
                ItemType::Drug,
                Some(row.id),
                row.drug_name.clone(),
                quantity,
                row.unit_price,
            );
            if let Some(code) = &row.drug_code {
                item = item.with_code(code.clone());
            }
            item
        })
        .collect()
}

/// A procedure without a matching service price becomes a zero-priced line
/// instead of blocking the whole bill. The gap is logged for follow-up.
pub fn procedure_items(rows: &[ProcedureRow]) -> Vec<BillingLineItem> {
    rows.iter()
        .map(|row| {
            let unit_price = match row.service_price {
                Some(price) => price,
                None => {
                    warn!(
                        procedure_id = %row.id,
                        procedure = %row.name,
                        "no active service price matched, billing procedure at zero"
                    );
                    Decimal::ZERO
                }
            };
            let mut item = BillingLineItem::new(
                ItemType::Procedure,
                Some(row.id),
                row.name.clone(),
                Decimal::ONE,
                unit_price,
            );
            if let Some(code) = &row.icd9_code {
                item = item.with_code(code.clone());
            }
            if let Some(service_name) = &row.service_name {
                item = item.with_description(service_name.clone());
            }
            item
        })
        .collect()
}

pub fn lab_items(rows: &[LabOrderRow]) -> Vec<BillingLineItem> {
    rows.iter()
        .map(|row| {
            let mut item = BillingLineItem::new(
                ItemType::Laboratory,
                Some(row.id),
                row.test_name.clone(),
                Decimal::ONE,
                row.price,
            );
            if let Some(code) = &row.test_code {
                item = item.with_code(code.clone());
            }
            item
        })
        .collect()
}

pub fn service_fee_item(row: &ServiceFeeRow) -> BillingLineItem {
    let mut item = BillingLineItem::new(
        ItemType::Service,
        Some(row.id),
        row.name.clone(),
        Decimal::ONE,
        row.price,
    );
    if let Some(code) = &row.code {
        item = item.with_code(code.clone());
    }
    item
}
