//! Discharge aggregation: everything a visit owes, in one itemized summary

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::charges::{
    self, BedAssignmentRow, ChargeScope, LabOrderRow, MaterialUsageRow, PrescriptionRow,
    ProcedureRow, ServiceFeeRow, VisitRow, SERVICE_TYPE_ADMINISTRATION, SERVICE_TYPE_CONSULTATION,
};
use crate::error::BillingResult;
use crate::models::{round_money, subtotal_of, BillingLineItem, ItemType, VisitType};

/// Raw source rows gathered for one visit, before normalization
#[derive(Debug, Clone, Default)]
pub struct SourceCharges {
    pub admin_fee: Option<ServiceFeeRow>,
    pub consultation_fee: Option<ServiceFeeRow>,
    pub beds: Vec<BedAssignmentRow>,
    pub materials: Vec<MaterialUsageRow>,
    pub procedures: Vec<ProcedureRow>,
    pub prescriptions: Vec<PrescriptionRow>,
    pub lab_orders: Vec<LabOrderRow>,
}

/// Charges collected for a visit at a point in time
#[derive(Debug, Clone)]
pub struct CollectedCharges {
    pub visit: VisitRow,
    pub visit_type: VisitType,
    pub items: Vec<BillingLineItem>,
}

impl CollectedCharges {
    pub fn subtotal(&self) -> Decimal {
        subtotal_of(&self.items)
    }
}

/// Per-category slice of a discharge summary
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CategoryBreakdown {
    pub category: ItemType,
    pub label: String,
    pub count: usize,
    pub total: Decimal,
}

/// Itemized bill for a visit, grouped for display and printing
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DischargeSummary {
    pub visit_id: Uuid,
    pub visit_number: String,
    pub visit_type: VisitType,
    pub items: Vec<BillingLineItem>,
    pub breakdown: Vec<CategoryBreakdown>,
    pub subtotal: Decimal,
    pub item_count: usize,
}

/// Re-derives every billable charge for a visit from its source tables.
///
/// One aggregator serves every calculation path; the visit type decides
/// which charge sources are in scope via [`ChargeScope`].
pub struct ChargeAggregator {
    pool: PgPool,
}

impl ChargeAggregator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch all charge sources for the visit concurrently and normalize
    /// them into line items in stable category order.
    pub async fn collect(&self, visit_id: Uuid) -> BillingResult<CollectedCharges> {
        let visit = charges::fetch_visit(&self.pool, visit_id).await?;
        let visit_type = visit.visit_type()?;
        let scope = ChargeScope::for_visit_type(visit_type);

        // independent reads, no ordering dependency between them
        let (admin_fee, consultation_fee, beds, materials, procedures, prescriptions, lab_orders) =
            tokio::try_join!(
                charges::fetch_active_service_fee(&self.pool, SERVICE_TYPE_ADMINISTRATION),
                charges::fetch_active_service_fee(&self.pool, SERVICE_TYPE_CONSULTATION),
                async {
                    if scope.include_room {
                        charges::fetch_bed_assignments(&self.pool, visit_id).await
                    } else {
                        Ok(Vec::new())
                    }
                },
                async {
                    if scope.include_materials {
                        charges::fetch_material_usage(&self.pool, visit_id).await
                    } else {
                        Ok(Vec::new())
                    }
                },
                charges::fetch_procedures(&self.pool, visit_id, scope.completed_procedures_only),
                charges::fetch_fulfilled_prescriptions(&self.pool, visit_id),
                charges::fetch_verified_lab_orders(&self.pool, visit_id),
            )?;

        let sources = SourceCharges {
            admin_fee,
            consultation_fee,
            beds,
            materials,
            procedures,
            prescriptions,
            lab_orders,
        };
        let items = build_items(scope, &sources, Utc::now());

        Ok(CollectedCharges {
            visit,
            visit_type,
            items,
        })
    }

    /// Discharge summary with per-category breakdown
    pub async fn aggregate(&self, visit_id: Uuid) -> BillingResult<DischargeSummary> {
        let collected = self.collect(visit_id).await?;
        Ok(summarize(collected))
    }
}

/// Normalize source rows into line items in stable category order.
/// The scope gate is applied here, so out-of-scope source rows never
/// reach the bill even when a caller fetched them.
pub fn build_items(
    scope: ChargeScope,
    sources: &SourceCharges,
    now: chrono::DateTime<Utc>,
) -> Vec<BillingLineItem> {
    let mut items = Vec::new();
    match &sources.admin_fee {
        Some(fee) => items.push(charges::service_fee_item(fee)),
        None => warn!("no active administration fee configured"),
    }
    match &sources.consultation_fee {
        Some(fee) => items.push(charges::service_fee_item(fee)),
        None => warn!("no active consultation fee configured"),
    }
    if scope.include_room {
        items.extend(charges::room_items(&sources.beds, now));
    }
    if scope.include_materials {
        items.extend(charges::material_items(&sources.materials));
    }
    items.extend(charges::procedure_items(&sources.procedures));
    items.extend(charges::medication_items(&sources.prescriptions));
    items.extend(charges::lab_items(&sources.lab_orders));
    items
}

/// Group line items per category, in stable display order. Categories
/// without items are kept with zero totals so summaries render uniformly.
pub fn breakdown_of(items: &[BillingLineItem]) -> Vec<CategoryBreakdown> {
    ItemType::ALL
        .iter()
        .map(|category| {
            let mut count = 0usize;
            let mut total = Decimal::ZERO;
            for item in items.iter().filter(|item| item.item_type == *category) {
                count += 1;
                total += item.total_price;
            }
            CategoryBreakdown {
                category: *category,
                label: category.label().to_string(),
                count,
                total: round_money(total),
            }
        })
        .collect()
}

pub fn summarize(collected: CollectedCharges) -> DischargeSummary {
    let subtotal = collected.subtotal();
    let breakdown = breakdown_of(&collected.items);
    let item_count = collected.items.len();
    DischargeSummary {
        visit_id: collected.visit.id,
        visit_number: collected.visit.visit_number,
        visit_type: collected.visit_type,
        items: collected.items,
        breakdown,
        subtotal,
        item_count,
    }
}
