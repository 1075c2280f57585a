use anyhow::{bail, Result};
use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;

use super::normalizer::{FieldMapping, Normalizer, PaymentLookup, Strictness, DEFAULT_TOLERANCE, UNCATEGORIZED};
use super::{InvoiceRecord, NormalizationError, SalesRecord};
use crate::data::RawRow;

fn price_mapping() -> FieldMapping {
    FieldMapping {
        id: Some("ID".to_owned()),
        date: "DATE".to_owned(),
        time: None,
        item: "ITEM".to_owned(),
        category: Some("CATEGORY".to_owned()),
        quantity: "QTY".to_owned(),
        unit_price: Some("PRICE".to_owned()),
        amount: None,
        cost: None,
        payment: Some("PAYMENT".to_owned()),
        date_format: "%Y-%m-%d".to_owned(),
        ..FieldMapping::default()
    }
}

fn row(id: &str, category: &str, qty: &str, price: &str) -> RawRow {
    [
        ("ID", id),
        ("DATE", "2024-01-05"),
        ("ITEM", category),
        ("CATEGORY", category),
        ("QTY", qty),
        ("PRICE", price),
        ("PAYMENT", "Cash"),
    ]
    .into_iter()
    .collect()
}

fn normalize_all(normalizer: &Normalizer, rows: Vec<RawRow>) -> Result<(Vec<SalesRecord>, usize)> {
    let mut normalized = normalizer.normalize(rows);
    let mut records = Vec::new();
    for record in normalized.by_ref() {
        records.push(record?);
    }

    Ok((records, normalized.skipped()))
}

#[test]
fn test_amount_from_unit_price() -> Result<()> {
    let normalizer = Normalizer::new(price_mapping(), Strictness::Strict, DEFAULT_TOLERANCE)?;
    let (records, skipped) = normalize_all(&normalizer, vec![row("1", "Drinks", "2", "3.00")])?;

    assert_eq!(skipped, 0);
    assert_eq!(records.len(), 1);

    let record = &records[0];
    assert_eq!(record.transaction_id, "1");
    assert_eq!(record.quantity, dec!(2));
    assert_eq!(record.unit_price, dec!(3.00));
    assert_eq!(record.amount, dec!(6.00));
    assert_eq!(record.cost, dec!(0));
    assert_eq!(record.payment_method.as_deref(), Some("Cash"));
    assert_eq!(
        record.timestamp,
        NaiveDate::from_ymd_opt(2024, 1, 5).unwrap().and_hms_opt(0, 0, 0).unwrap()
    );

    Ok(())
}

#[test]
fn test_strict_amount_invariant() -> Result<()> {
    let normalizer = Normalizer::new(price_mapping(), Strictness::Strict, DEFAULT_TOLERANCE)?;
    let rows = vec![
        row("1", "Drinks", "3", "0.333"),
        row("2", "Food", "1.5", "4.10"),
        row("3", "Food", "7", "12.99"),
    ];

    let (records, _) = normalize_all(&normalizer, rows)?;
    for record in records {
        assert!((record.quantity * record.unit_price - record.amount).abs() <= DEFAULT_TOLERANCE);
    }

    Ok(())
}

#[test]
fn test_amount_mismatch() -> Result<()> {
    let mapping = FieldMapping {
        amount: Some("AMOUNT".to_owned()),
        ..price_mapping()
    };
    let normalizer = Normalizer::new(mapping, Strictness::Strict, DEFAULT_TOLERANCE)?;

    let good: RawRow = [
        ("ID", "1"),
        ("DATE", "2024-01-05"),
        ("ITEM", "Tea"),
        ("QTY", "2"),
        ("PRICE", "1.50"),
        ("AMOUNT", "3.004"),
    ]
    .into_iter()
    .collect();
    let record = normalizer.normalize_row(1, &good)?;
    assert_eq!(record.amount, dec!(3.004));

    let bad: RawRow = [
        ("ID", "2"),
        ("DATE", "2024-01-05"),
        ("ITEM", "Tea"),
        ("QTY", "2"),
        ("PRICE", "1.50"),
        ("AMOUNT", "3.50"),
    ]
    .into_iter()
    .collect();

    if let Err(err) = normalizer.normalize_row(2, &bad) {
        assert_eq!(
            err,
            NormalizationError::AmountMismatch {
                row: 2,
                quantity: dec!(2),
                unit_price: dec!(1.50),
                amount: dec!(3.50),
            }
        );
    } else {
        bail!("amount outside tolerance should be rejected");
    }

    Ok(())
}

#[test]
fn test_unit_price_from_amount() -> Result<()> {
    let mapping = FieldMapping {
        unit_price: None,
        amount: Some("AMOUNT".to_owned()),
        ..price_mapping()
    };
    let normalizer = Normalizer::new(mapping, Strictness::Strict, DEFAULT_TOLERANCE)?;

    let row: RawRow = [("ID", "9"), ("DATE", "2024-01-05"), ("ITEM", "Pizza"), ("QTY", "4"), ("AMOUNT", "1,250.00")]
        .into_iter()
        .collect();
    let record = normalizer.normalize_row(1, &row)?;

    assert_eq!(record.amount, dec!(1250.00));
    assert_eq!(record.unit_price, dec!(312.5));
    assert_eq!(record.category, UNCATEGORIZED);
    assert_eq!(record.payment_method, None);

    Ok(())
}

fn amount_mapping() -> FieldMapping {
    FieldMapping {
        unit_price: None,
        amount: Some("AMOUNT".to_owned()),
        ..price_mapping()
    }
}

fn amount_row(id: &str, qty: &str, amount: &str) -> RawRow {
    [("ID", id), ("DATE", "2024-01-05"), ("ITEM", "Pizza"), ("QTY", qty), ("AMOUNT", amount)]
        .into_iter()
        .collect()
}

#[test]
fn test_zero_quantity_with_amount() -> Result<()> {
    let normalizer = Normalizer::new(amount_mapping(), Strictness::Strict, DEFAULT_TOLERANCE)?;

    let err = match normalizer.normalize_row(1, &amount_row("1", "0", "5.00")) {
        Ok(record) => bail!("zero quantity cannot carry an amount, got {:?}", record),
        Err(err) => err,
    };
    assert_eq!(
        err,
        NormalizationError::ZeroQuantity {
            row: 1,
            amount: dec!(5.00)
        }
    );

    let record = normalizer.normalize_row(2, &amount_row("2", "0", "0.00"))?;
    assert_eq!((record.quantity, record.unit_price, record.amount), (dec!(0), dec!(0), dec!(0)));

    Ok(())
}

#[test]
fn test_out_of_range_rows_are_skipped() -> Result<()> {
    let lenient = Normalizer::new(amount_mapping(), Strictness::Lenient, DEFAULT_TOLERANCE)?;
    let rows = vec![
        amount_row("1", "0.0000000000000000000001", "99999999999"),
        amount_row("2", "2", "7.00"),
    ];

    let (records, skipped) = normalize_all(&lenient, rows.clone())?;
    assert_eq!(skipped, 1);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].unit_price, dec!(3.50));

    let strict = Normalizer::new(amount_mapping(), Strictness::Strict, DEFAULT_TOLERANCE)?;
    let err = match normalize_all(&strict, rows) {
        Ok(_) => bail!("an out of range unit price should stop a strict run"),
        Err(err) => err,
    };
    assert!(matches!(
        err.downcast_ref::<NormalizationError>(),
        Some(NormalizationError::Overflow { row: 1, column }) if column == "AMOUNT"
    ));

    Ok(())
}

#[test]
fn test_out_of_range_amount() -> Result<()> {
    let normalizer = Normalizer::new(price_mapping(), Strictness::Strict, DEFAULT_TOLERANCE)?;
    let huge = row("1", "Food", "10000000000000000000000000000", "10");

    let err = match normalizer.normalize_row(1, &huge) {
        Ok(record) => bail!("amount should be out of range, got {:?}", record),
        Err(err) => err,
    };
    assert_eq!(
        err,
        NormalizationError::Overflow {
            row: 1,
            column: "QTY".to_owned()
        }
    );

    Ok(())
}

#[test]
fn test_lenient_skips_bad_rows() -> Result<()> {
    let normalizer = Normalizer::new(price_mapping(), Strictness::Lenient, DEFAULT_TOLERANCE)?;

    let mut rows: Vec<RawRow> = (1..=9).map(|i| row(&i.to_string(), "Food", "1", "2.50")).collect();
    rows.insert(4, row("bad", "Food", "1", "two fifty"));

    let (records, skipped) = normalize_all(&normalizer, rows)?;

    assert_eq!(records.len(), 9);
    assert_eq!(skipped, 1);
    assert_eq!(
        records.iter().map(|r| r.transaction_id.as_str()).collect::<Vec<_>>(),
        vec!["1", "2", "3", "4", "5", "6", "7", "8", "9"]
    );

    Ok(())
}

#[test]
fn test_strict_stops_at_first_bad_row() -> Result<()> {
    let normalizer = Normalizer::new(price_mapping(), Strictness::Strict, DEFAULT_TOLERANCE)?;
    let rows = vec![
        row("1", "Food", "1", "2.50"),
        row("2", "Food", "x", "2.50"),
        row("3", "Food", "1", "2.50"),
    ];

    let results: Vec<_> = normalizer.normalize(rows).collect();

    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert_eq!(
        results[1],
        Err(NormalizationError::InvalidNumber {
            row: 2,
            column: "QTY".to_owned(),
            value: "x".to_owned(),
        })
    );

    Ok(())
}

#[test]
fn test_invalid_and_missing_date() -> Result<()> {
    let normalizer = Normalizer::new(price_mapping(), Strictness::Strict, DEFAULT_TOLERANCE)?;

    let bad_date: RawRow = [("ID", "1"), ("DATE", "05/01/2024"), ("ITEM", "Tea"), ("QTY", "1"), ("PRICE", "1")]
        .into_iter()
        .collect();

    assert!(matches!(
        normalizer.normalize_row(1, &bad_date),
        Err(NormalizationError::InvalidDate { ref column, .. }) if column == "DATE"
    ));

    let no_date: RawRow = [("ID", "1"), ("ITEM", "Tea"), ("QTY", "1"), ("PRICE", "1")].into_iter().collect();
    assert_eq!(
        normalizer.normalize_row(3, &no_date),
        Err(NormalizationError::MissingValue {
            row: 3,
            column: "DATE".to_owned(),
        })
    );

    Ok(())
}

#[test]
fn test_legacy_date_and_time_columns() -> Result<()> {
    let normalizer = Normalizer::new(FieldMapping::default(), Strictness::Strict, DEFAULT_TOLERANCE)?;

    let row: RawRow = [
        ("INV_NO", "1042"),
        ("DATE", "11/19/25 00:00:00"),
        ("TIME", "12/30/99 22:15:07"),
        ("ITEMS", "Shawarma"),
        ("CATOGERY", "Sandwiches"),
        ("QTY", "2"),
        ("AMOUNT", "9.00"),
        ("COST", "3.10"),
    ]
    .into_iter()
    .collect();

    let record = normalizer.normalize_row(1, &row)?;

    assert_eq!(
        record.timestamp,
        NaiveDate::from_ymd_opt(2025, 11, 19).unwrap().and_hms_opt(22, 15, 7).unwrap()
    );
    assert_eq!(record.transaction_id, "1042");
    assert_eq!(record.unit_price, dec!(4.5));
    assert_eq!(record.profit(), dec!(5.90));

    Ok(())
}

#[test]
fn test_payment_lookup_join() -> Result<()> {
    let invoices: Vec<RawRow> = vec![
        [("INV_NO", "1042"), ("SALE_INFO", "Card")].into_iter().collect(),
        [("INV_NO", "1043"), ("SALE_INFO", "")].into_iter().collect(),
    ];
    let payments = PaymentLookup::from_rows(&invoices, "INV_NO", "SALE_INFO");
    assert_eq!(payments.len(), 1);

    let normalizer = Normalizer::new(FieldMapping::default(), Strictness::Strict, DEFAULT_TOLERANCE)?
        .with_payments(Some(payments));

    let sale = |id: &str| -> RawRow {
        [
            ("INV_NO", id),
            ("DATE", "11/19/25 00:00:00"),
            ("ITEMS", "Tea"),
            ("QTY", "1"),
            ("AMOUNT", "2.00"),
        ]
        .into_iter()
        .collect()
    };

    assert_eq!(normalizer.normalize_row(1, &sale("1042"))?.payment_method.as_deref(), Some("Card"));
    assert_eq!(normalizer.normalize_row(2, &sale("1043"))?.payment_method, None);

    Ok(())
}

#[test]
fn test_incomplete_mapping() {
    let mapping = FieldMapping {
        unit_price: None,
        amount: Some(String::new()),
        ..FieldMapping::default()
    };

    assert_eq!(
        Normalizer::new(mapping, Strictness::Strict, DEFAULT_TOLERANCE).unwrap_err(),
        NormalizationError::IncompleteMapping
    );
}

fn invoice_row(pairs: &[(&str, &str)]) -> RawRow {
    pairs.iter().copied().collect()
}

#[test]
fn test_invoice_header() -> Result<()> {
    let normalizer = Normalizer::new(FieldMapping::default(), Strictness::Strict, DEFAULT_TOLERANCE)?;
    let row = invoice_row(&[
        ("INV_NO", "1001"),
        ("DATE", "03/08/25 00:00:00"),
        ("TIME", "12/30/99 12:10:00"),
        ("TABLE_NO", "7"),
        ("WAITOR", "Sami"),
        ("C_NO", "Dine in"),
        ("SALE_INFO", "Cash"),
        ("AMOUNT", "100.00"),
        ("DISCOUNT", "10.00"),
        ("SERVICE", "12.00"),
        ("VAT", "14.00"),
    ]);

    let invoice = normalizer.normalize_invoice(1, &row)?;

    assert_eq!(
        invoice,
        InvoiceRecord {
            invoice_id: "1001".to_owned(),
            timestamp: NaiveDate::from_ymd_opt(2025, 3, 8).unwrap().and_hms_opt(12, 10, 0).unwrap(),
            table: Some("7".to_owned()),
            waiter: Some("Sami".to_owned()),
            service_type: Some("Dine in".to_owned()),
            payment_method: Some("Cash".to_owned()),
            amount: dec!(100.00),
            discount: dec!(10.00),
            service: dec!(12.00),
            vat: dec!(14.00),
            total: dec!(116.00),
        }
    );

    let with_total = invoice_row(&[("INV_NO", "1002"), ("DATE", "03/08/25 00:00:00"), ("AMOUNT", "50"), ("TOTAL", "57")]);
    let invoice = normalizer.normalize_invoice(2, &with_total)?;
    assert_eq!((invoice.vat, invoice.total), (dec!(0), dec!(57)));
    assert_eq!(invoice.service_type, None);

    Ok(())
}

#[test]
fn test_bad_invoice_rows() -> Result<()> {
    let rows = vec![
        invoice_row(&[("INV_NO", "1"), ("DATE", "03/08/25 00:00:00"), ("AMOUNT", "20"), ("VAT", "2.80")]),
        invoice_row(&[("INV_NO", "2"), ("DATE", "03/08/25 00:00:00"), ("AMOUNT", "20"), ("VAT", "lots")]),
        invoice_row(&[("INV_NO", "3"), ("DATE", "03/08/25 00:00:00")]),
    ];

    let lenient = Normalizer::new(FieldMapping::default(), Strictness::Lenient, DEFAULT_TOLERANCE)?;
    let (invoices, skipped) = lenient.normalize_invoices(&rows)?;
    assert_eq!(skipped, 2);
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0].total, dec!(22.80));

    let strict = Normalizer::new(FieldMapping::default(), Strictness::Strict, DEFAULT_TOLERANCE)?;
    assert!(matches!(
        strict.normalize_invoices(&rows),
        Err(NormalizationError::InvalidNumber { row: 2, .. })
    ));

    Ok(())
}
