//! Data models for visit billing: line items, billing records, payments

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Scale used for all stored monetary amounts
pub const CURRENCY_SCALE: u32 = 2;

/// Round a monetary amount to currency scale, midpoint away from zero.
/// The result always carries exactly two decimal places, matching how
/// NUMERIC(14,2) columns come back from the database.
pub fn round_money(value: Decimal) -> Decimal {
    let mut rounded =
        value.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(CURRENCY_SCALE);
    rounded
}

/// Care setting of a visit. Stored as text on the visits table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum VisitType {
    Outpatient,
    Inpatient,
    Emergency,
}

impl VisitType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "outpatient" => Some(VisitType::Outpatient),
            "inpatient" => Some(VisitType::Inpatient),
            "emergency" => Some(VisitType::Emergency),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VisitType::Outpatient => "outpatient",
            VisitType::Inpatient => "inpatient",
            VisitType::Emergency => "emergency",
        }
    }
}

/// Category of a billing line item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "billing_item_type", rename_all = "lowercase")]
pub enum ItemType {
    Service,
    Room,
    Material,
    Procedure,
    Drug,
    Laboratory,
}

impl ItemType {
    /// Human-readable category label for summaries
    pub fn label(&self) -> &'static str {
        match self {
            ItemType::Service => "Services",
            ItemType::Room => "Room & Board",
            ItemType::Material => "Materials",
            ItemType::Procedure => "Procedures",
            ItemType::Drug => "Medications",
            ItemType::Laboratory => "Laboratory",
        }
    }

    /// Stable display order for grouped summaries
    pub const ALL: [ItemType; 6] = [
        ItemType::Service,
        ItemType::Room,
        ItemType::Material,
        ItemType::Procedure,
        ItemType::Drug,
        ItemType::Laboratory,
    ];
}

/// Settlement state of a billing record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Paid,
}

/// How a payment was tendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "payment_method", rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Transfer,
    Card,
}

impl PaymentMethod {
    pub fn is_cash(&self) -> bool {
        matches!(self, PaymentMethod::Cash)
    }
}

/// Discount applied to a billing record.
///
/// A percentage and a fixed amount can both arrive on an update request;
/// the percentage wins in that case.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiscountAdjustment {
    None,
    Fixed(Decimal),
    Percentage(Decimal),
}

impl DiscountAdjustment {
    /// Build from the optional request field pair. Percentage takes
    /// precedence when both are present.
    pub fn from_fields(discount: Option<Decimal>, discount_percentage: Option<Decimal>) -> Self {
        match (discount, discount_percentage) {
            (_, Some(pct)) => DiscountAdjustment::Percentage(pct),
            (Some(amount), None) => DiscountAdjustment::Fixed(amount),
            (None, None) => DiscountAdjustment::None,
        }
    }

    /// Percentage value to persist alongside the computed amount
    pub fn percentage(&self) -> Option<Decimal> {
        match self {
            DiscountAdjustment::Percentage(pct) => Some(*pct),
            _ => None,
        }
    }

    /// Resolve the discount amount against a subtotal, validating bounds
    pub fn amount_against(&self, subtotal: Decimal) -> BillingResult<Decimal> {
        match self {
            DiscountAdjustment::None => Ok(Decimal::ZERO),
            DiscountAdjustment::Fixed(amount) => {
                if amount.is_sign_negative() {
                    return Err(BillingError::Validation(
                        "Discount cannot be negative".to_string(),
                    ));
                }
                if *amount > subtotal {
                    return Err(BillingError::Validation(
                        "Discount cannot exceed subtotal".to_string(),
                    ));
                }
                Ok(round_money(*amount))
            }
            DiscountAdjustment::Percentage(pct) => {
                if pct.is_sign_negative() || *pct > Decimal::ONE_HUNDRED {
                    return Err(BillingError::Validation(
                        "Discount percentage must be between 0 and 100".to_string(),
                    ));
                }
                Ok(round_money(subtotal * *pct / Decimal::ONE_HUNDRED))
            }
        }
    }
}

/// A computed charge line. Line items are derived from clinical source
/// records at calculation time and replaced wholesale on persistence.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BillingLineItem {
    pub item_type: ItemType,
    /// Source record the charge was derived from, when one exists
    pub item_id: Option<Uuid>,
    pub item_name: String,
    pub item_code: Option<String>,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount: Decimal,
    pub total_price: Decimal,
}

impl BillingLineItem {
    /// Line item with total computed as quantity x unit price
    pub fn new(
        item_type: ItemType,
        item_id: Option<Uuid>,
        item_name: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> Self {
        Self {
            item_type,
            item_id,
            item_name: item_name.into(),
            item_code: None,
            description: None,
            quantity,
            unit_price,
            discount: Decimal::ZERO,
            total_price: round_money(quantity * unit_price),
        }
    }

    /// Line item carrying a total already computed at the source,
    /// e.g. material usage captured at dispense time
    pub fn with_recorded_total(
        item_type: ItemType,
        item_id: Option<Uuid>,
        item_name: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
        total_price: Decimal,
    ) -> Self {
        Self {
            item_type,
            item_id,
            item_name: item_name.into(),
            item_code: None,
            description: None,
            quantity,
            unit_price,
            discount: Decimal::ZERO,
            total_price: round_money(total_price),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.item_code = Some(code.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Sum of line totals, rounded to currency scale
pub fn subtotal_of(items: &[BillingLineItem]) -> Decimal {
    round_money(items.iter().map(|item| item.total_price).sum())
}

/// Persisted billing line item
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, FromRow)]
pub struct BillingLineItemRow {
    pub id: Uuid,
    pub billing_id: Uuid,
    /// Position within the billing record, starting at 1
    pub line_no: i32,
    pub item_type: ItemType,
    pub item_id: Option<Uuid>,
    pub item_name: String,
    pub item_code: Option<String>,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount: Decimal,
    pub total_price: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Persisted billing record header, one per visit
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, FromRow)]
pub struct BillingRecord {
    pub id: Uuid,
    pub visit_id: Uuid,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub discount_percentage: Option<Decimal>,
    pub insurance_coverage: Decimal,
    pub total_amount: Decimal,
    pub patient_payable: Decimal,
    pub paid_amount: Decimal,
    pub remaining_amount: Decimal,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<PaymentMethod>,
    pub payment_reference: Option<String>,
    pub processed_by: Option<Uuid>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BillingRecord {
    /// Balance still owed by the patient
    pub fn remaining_balance(&self) -> Decimal {
        round_money(self.patient_payable - self.paid_amount)
    }
}

/// Persisted payment against a billing record
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, FromRow)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub billing_id: Uuid,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_reference: Option<String>,
    pub amount_received: Option<Decimal>,
    pub change_given: Option<Decimal>,
    pub received_by: Uuid,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Derived monetary totals for a billing record.
///
/// All mutating paths go through [`BillingTotals::derive`] so the header
/// invariants hold whenever a record is written:
/// `total_amount = subtotal - discount`,
/// `patient_payable = total_amount - insurance_coverage`,
/// `remaining_amount = patient_payable - paid_amount`.
/// An adjustment that would drop `patient_payable` below `paid_amount` is
/// rejected, so `remaining_amount` never goes negative.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingTotals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub discount_percentage: Option<Decimal>,
    pub insurance_coverage: Decimal,
    pub total_amount: Decimal,
    pub patient_payable: Decimal,
    pub paid_amount: Decimal,
    pub remaining_amount: Decimal,
    pub payment_status: PaymentStatus,
}

impl BillingTotals {
    pub fn derive(
        subtotal: Decimal,
        adjustment: DiscountAdjustment,
        insurance_coverage: Decimal,
        paid_amount: Decimal,
    ) -> BillingResult<Self> {
        let subtotal = round_money(subtotal);
        let discount = adjustment.amount_against(subtotal)?;
        let total_amount = round_money(subtotal - discount);

        if insurance_coverage.is_sign_negative() {
            return Err(BillingError::Validation(
                "Insurance coverage cannot be negative".to_string(),
            ));
        }
        if insurance_coverage > total_amount {
            return Err(BillingError::Validation(
                "Insurance coverage cannot exceed the discounted total".to_string(),
            ));
        }

        let insurance_coverage = round_money(insurance_coverage);
        let patient_payable = round_money(total_amount - insurance_coverage);
        let paid_amount = round_money(paid_amount);
        if paid_amount > patient_payable {
            return Err(BillingError::Validation(
                "Paid amount exceeds the adjusted patient payable".to_string(),
            ));
        }
        let remaining_amount = round_money(patient_payable - paid_amount);

        Ok(Self {
            subtotal,
            discount,
            discount_percentage: adjustment.percentage(),
            insurance_coverage,
            total_amount,
            patient_payable,
            paid_amount,
            remaining_amount,
            payment_status: Self::status_for(paid_amount, remaining_amount),
        })
    }

    /// Settlement status from amounts alone. Paid requires at least one
    /// recorded payment, so a zero-payable record with no payments stays
    /// pending.
    pub fn status_for(paid_amount: Decimal, remaining_amount: Decimal) -> PaymentStatus {
        if paid_amount <= Decimal::ZERO {
            PaymentStatus::Pending
        } else if remaining_amount > Decimal::ZERO {
            PaymentStatus::Partial
        } else {
            PaymentStatus::Paid
        }
    }
}
