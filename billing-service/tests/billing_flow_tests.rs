//! End-to-end billing flows over the aggregation and settlement layer:
//! source rows in, itemized bill out, then discount, insurance and
//! payments against the derived totals.

use billing_service::{
    breakdown_of, build_items, settle, subtotal_of, summarize, BedAssignmentRow, BillingRecord,
    BillingTotals, ChargeScope, CollectedCharges, DiscountAdjustment, ItemType, LabOrderRow,
    MaterialUsageRow, PaymentMethod, PaymentRequest, PaymentStatus, PrescriptionRow,
    ProcedureRow, ServiceFeeRow, SourceCharges, VisitRow, VisitType,
};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

fn dec(value: i64) -> Decimal {
    Decimal::from(value)
}

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

fn fee(name: &str, code: &str, price: i64) -> ServiceFeeRow {
    ServiceFeeRow {
        id: Uuid::new_v4(),
        name: name.to_string(),
        code: Some(code.to_string()),
        price: dec(price),
    }
}

/// Inpatient visit fixture: 300,000/day room for a stay crossing three
/// days, one dispensed prescription, one completed priced procedure,
/// one verified lab order, plus both flat fees.
fn inpatient_sources() -> SourceCharges {
    SourceCharges {
        admin_fee: Some(fee("Administration Fee", "ADM", 20_000)),
        consultation_fee: Some(fee("Doctor Consultation", "CONS", 50_000)),
        beds: vec![BedAssignmentRow {
            id: Uuid::new_v4(),
            room_name: "VIP Room 3".to_string(),
            daily_rate: dec(300_000),
            assigned_at: at(2025, 3, 10, 8),
            discharged_at: Some(at(2025, 3, 12, 14)),
        }],
        materials: Vec::new(),
        procedures: vec![ProcedureRow {
            id: Uuid::new_v4(),
            name: "Appendectomy".to_string(),
            icd9_code: Some("47.09".to_string()),
            service_name: Some("Appendectomy".to_string()),
            service_price: Some(dec(150_000)),
        }],
        prescriptions: vec![PrescriptionRow {
            id: Uuid::new_v4(),
            drug_name: "Ceftriaxone 1g".to_string(),
            drug_code: Some("DRG-204".to_string()),
            quantity: dec(2),
            dispensed_quantity: Some(dec(2)),
            unit_price: dec(5_000),
        }],
        lab_orders: vec![LabOrderRow {
            id: Uuid::new_v4(),
            test_name: "Complete Blood Count".to_string(),
            test_code: Some("CBC".to_string()),
            price: dec(75_000),
        }],
    }
}

fn record_from(totals: &BillingTotals) -> BillingRecord {
    BillingRecord {
        id: Uuid::new_v4(),
        visit_id: Uuid::new_v4(),
        subtotal: totals.subtotal,
        discount: totals.discount,
        discount_percentage: totals.discount_percentage,
        insurance_coverage: totals.insurance_coverage,
        total_amount: totals.total_amount,
        patient_payable: totals.patient_payable,
        paid_amount: totals.paid_amount,
        remaining_amount: totals.remaining_amount,
        payment_status: totals.payment_status,
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
fn inpatient_discharge_itemizes_every_charge_source() {
    let scope = ChargeScope::for_visit_type(VisitType::Inpatient);
    let items = build_items(scope, &inpatient_sources(), at(2025, 3, 15, 0));

    // 2 fees, 1 room stay, 1 procedure, 1 drug, 1 lab
    assert_eq!(items.len(), 6);

    // stable category order, which persistence turns into line numbers
    let categories: Vec<ItemType> = items.iter().map(|item| item.item_type).collect();
    assert_eq!(
        categories,
        vec![
            ItemType::Service,
            ItemType::Service,
            ItemType::Room,
            ItemType::Procedure,
            ItemType::Drug,
            ItemType::Laboratory,
        ]
    );

    // 54 hours in a 300,000/day room bills three days
    let room = items
        .iter()
        .find(|item| item.item_type == ItemType::Room)
        .unwrap();
    assert_eq!(room.quantity, dec(3));
    assert_eq!(room.total_price, dec(900_000));

    // 20,000 + 50,000 + 900,000 + 150,000 + 10,000 + 75,000
    assert_eq!(subtotal_of(&items), dec(1_205_000));

    let breakdown = breakdown_of(&items);
    let by_category = |category: ItemType| {
        breakdown
            .iter()
            .find(|entry| entry.category == category)
            .unwrap()
    };
    assert_eq!(by_category(ItemType::Service).total, dec(70_000));
    assert_eq!(by_category(ItemType::Service).count, 2);
    assert_eq!(by_category(ItemType::Room).total, dec(900_000));
    assert_eq!(by_category(ItemType::Procedure).total, dec(150_000));
    assert_eq!(by_category(ItemType::Drug).total, dec(10_000));
    assert_eq!(by_category(ItemType::Laboratory).total, dec(75_000));
    assert_eq!(by_category(ItemType::Material).count, 0);
}

#[test]
fn outpatient_visit_never_bills_room_or_materials() {
    let mut sources = inpatient_sources();
    // stray ward data on an outpatient visit must not leak into the bill
    sources.materials = vec![MaterialUsageRow {
        id: Uuid::new_v4(),
        item_name: "Infusion Set".to_string(),
        item_code: None,
        quantity: dec(1),
        unit_price: dec(35_000),
        total_price: dec(35_000),
    }];

    let scope = ChargeScope::for_visit_type(VisitType::Outpatient);
    let items = build_items(scope, &sources, at(2025, 3, 15, 0));

    assert!(items.iter().all(|item| item.item_type != ItemType::Room));
    assert!(items.iter().all(|item| item.item_type != ItemType::Material));
    assert_eq!(subtotal_of(&items), dec(305_000));
}

#[test]
fn rebuilding_the_bill_from_unchanged_sources_is_stable() {
    let scope = ChargeScope::for_visit_type(VisitType::Inpatient);
    let now = at(2025, 3, 15, 0);
    let sources = inpatient_sources();

    let first = subtotal_of(&build_items(scope, &sources, now));
    let second = subtotal_of(&build_items(scope, &sources, now));
    assert_eq!(first, second);

    let derive = || {
        BillingTotals::derive(
            first,
            DiscountAdjustment::Percentage(dec(10)),
            dec(84_500),
            Decimal::ZERO,
        )
        .unwrap()
    };
    assert_eq!(derive(), derive());
}

#[test]
fn discount_insurance_and_two_payments_settle_the_bill() {
    let scope = ChargeScope::for_visit_type(VisitType::Inpatient);
    let items = build_items(scope, &inpatient_sources(), at(2025, 3, 15, 0));
    let subtotal = subtotal_of(&items);

    // cashier applies a 10% discount and insurance pays 84,500
    let totals = BillingTotals::derive(
        subtotal,
        DiscountAdjustment::Percentage(dec(10)),
        dec(84_500),
        Decimal::ZERO,
    )
    .unwrap();
    assert_eq!(totals.discount, dec(120_500));
    assert_eq!(totals.total_amount, dec(1_084_500));
    assert_eq!(totals.patient_payable, dec(1_000_000));
    assert_eq!(totals.payment_status, PaymentStatus::Pending);

    // first payment: cash, with change
    let record = record_from(&totals);
    let first = settle(&record, &cash(400_000, Some(500_000))).unwrap();
    assert_eq!(first.change_given, Some(dec(100_000)));
    assert_eq!(first.paid_amount, dec(400_000));
    assert_eq!(first.remaining_amount, dec(600_000));
    assert_eq!(first.payment_status, PaymentStatus::Partial);

    // second payment: transfer for the full remainder
    let mut after_first = record_from(&totals);
    after_first.paid_amount = first.paid_amount;
    after_first.remaining_amount = first.remaining_amount;
    after_first.payment_status = first.payment_status;

    let request = PaymentRequest {
        amount: dec(600_000),
        payment_method: PaymentMethod::Transfer,
        payment_reference: Some("TRF-20250315-0007".to_string()),
        amount_received: None,
        notes: None,
    };
    let second = settle(&after_first, &request).unwrap();
    assert_eq!(second.paid_amount, dec(1_000_000));
    assert_eq!(second.remaining_amount, Decimal::ZERO);
    assert_eq!(second.payment_status, PaymentStatus::Paid);

    // header invariants hold at every step
    assert_eq!(
        totals.patient_payable,
        totals.subtotal - totals.discount - totals.insurance_coverage
    );
    assert_eq!(
        second.remaining_amount,
        after_first.patient_payable - second.paid_amount
    );
}

#[test]
fn rejected_payment_does_not_move_the_balance() {
    let totals = BillingTotals::derive(
        dec(100_000),
        DiscountAdjustment::None,
        Decimal::ZERO,
        Decimal::ZERO,
    )
    .unwrap();
    let record = record_from(&totals);

    assert!(settle(&record, &cash(150_000, None)).is_err());
    assert_eq!(record.paid_amount, Decimal::ZERO);
    assert_eq!(record.remaining_amount, dec(100_000));
    assert_eq!(record.payment_status, PaymentStatus::Pending);
}

#[test]
fn visit_with_no_billable_activity_yields_an_empty_pending_bill() {
    let scope = ChargeScope::for_visit_type(VisitType::Outpatient);
    let items = build_items(scope, &SourceCharges::default(), Utc::now());
    assert!(items.is_empty());

    let totals = BillingTotals::derive(
        subtotal_of(&items),
        DiscountAdjustment::None,
        Decimal::ZERO,
        Decimal::ZERO,
    )
    .unwrap();
    assert_eq!(totals.patient_payable, Decimal::ZERO);
    assert_eq!(totals.payment_status, PaymentStatus::Pending);
}

#[test]
fn discharge_summary_serializes_money_as_two_decimal_strings() {
    let scope = ChargeScope::for_visit_type(VisitType::Inpatient);
    let items = build_items(scope, &inpatient_sources(), at(2025, 3, 15, 0));
    let visit_id = Uuid::new_v4();

    let summary = summarize(CollectedCharges {
        visit: VisitRow {
            id: visit_id,
            patient_id: Uuid::new_v4(),
            visit_number: "V-2025-000913".to_string(),
            visit_type: "inpatient".to_string(),
            created_at: at(2025, 3, 10, 7),
        },
        visit_type: VisitType::Inpatient,
        items,
    });

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["visit_type"], "inpatient");
    assert_eq!(json["subtotal"], "1205000.00");
    assert_eq!(json["item_count"], 6);
    let room_entry = json["breakdown"]
        .as_array()
        .unwrap()
        .iter()
        .find(|entry| entry["category"] == "room")
        .unwrap();
    assert_eq!(room_entry["label"], "Room & Board");
    assert_eq!(room_entry["total"], "900000.00");
}
