//! Cell value normalization. Every function here is total: malformed input
//! degrades to a sentinel or zero instead of failing the import.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use ledger_core::{BillingStatus, CellValue, SheetDate};

/// Spreadsheet serial of 1970-01-01.
const UNIX_EPOCH_SERIAL: f64 = 25569.0;
const SECONDS_PER_DAY: f64 = 86400.0;
/// Tenure after which a billed placement qualifies.
pub const QUALIFYING_DAYS: i64 = 90;

/// Serials accepted from text cells: 1950-01-01 through 2099-12-31.
const TEXT_SERIAL_RANGE: std::ops::RangeInclusive<f64> = 18264.0..=73050.0;

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%Y/%m/%d",
    // two-digit years first: %Y would read "24" as the year 24
    "%d-%b-%y",
    "%d-%b-%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%m/%d/%Y",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d/%m/%Y %H:%M"];

pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() {
        return None;
    }
    let secs = ((serial - UNIX_EPOCH_SERIAL) * SECONDS_PER_DAY).round() as i64;
    DateTime::from_timestamp(secs, 0).map(|dt| dt.date_naive())
}

pub fn parse_sheet_date(cell: &CellValue) -> SheetDate {
    match cell {
        CellValue::Empty => SheetDate::Missing,
        CellValue::Number(n) => serial_to_date(*n)
            .map(SheetDate::Date)
            .unwrap_or(SheetDate::Invalid),
        CellValue::Text(s) => parse_date_text(s),
    }
}

pub fn parse_date_text(raw: &str) -> SheetDate {
    let s = raw.trim();
    if s.is_empty() {
        return SheetDate::Missing;
    }
    if s.eq_ignore_ascii_case("na") {
        return SheetDate::NotApplicable;
    }
    if let Ok(serial) = s.parse::<f64>() {
        if !TEXT_SERIAL_RANGE.contains(&serial) {
            return SheetDate::Invalid;
        }
        return serial_to_date(serial)
            .map(SheetDate::Date)
            .unwrap_or(SheetDate::Invalid);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return SheetDate::Date(dt.date_naive());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return SheetDate::Date(dt.date());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return SheetDate::Date(d);
        }
    }
    SheetDate::Invalid
}

/// Keep digits, `.` and `-`; anything unreadable is zero.
pub fn parse_currency_text(raw: &str) -> f64 {
    let cleaned = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect::<String>();
    if cleaned.is_empty() {
        return 0.0;
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

pub fn parse_currency(cell: &CellValue) -> f64 {
    match cell {
        CellValue::Empty => 0.0,
        CellValue::Number(n) if n.is_finite() => *n,
        CellValue::Number(_) => 0.0,
        CellValue::Text(s) => parse_currency_text(s),
    }
}

/// Amount for optional aggregate fields: `None` when the cell carries no digits.
pub fn parse_optional_amount(cell: &CellValue) -> Option<f64> {
    match cell {
        CellValue::Empty => None,
        CellValue::Number(n) => n.is_finite().then_some(*n),
        CellValue::Text(s) => s
            .chars()
            .any(|c| c.is_ascii_digit())
            .then(|| parse_currency_text(s)),
    }
}

/// Render an amount the way the sheets write it, e.g. `$1,200.00`.
pub fn format_currency(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u128;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}${grouped}.{:02}", cents % 100)
}

pub fn normalize_billing_status(cell: &CellValue) -> BillingStatus {
    let Some(text) = cell.text() else {
        return BillingStatus::Pending;
    };
    match text.to_ascii_uppercase().as_str() {
        "COMPLETED" | "DONE" | "BILLED" => BillingStatus::Billed,
        "CANCELLED" => BillingStatus::Cancelled,
        "HOLD" => BillingStatus::Hold,
        _ => BillingStatus::Pending,
    }
}

/// Only an explicit "yes" is trusted. An explicit "no", a blank or anything
/// else is recomputed from tenure and billing.
pub fn derive_qualifier(
    explicit: Option<&str>,
    days_completed: Option<i64>,
    billing_status: BillingStatus,
) -> bool {
    if explicit.is_some_and(|v| v.trim().eq_ignore_ascii_case("yes")) {
        return true;
    }
    days_completed.is_some_and(|d| d > QUALIFYING_DAYS) && billing_status == BillingStatus::Billed
}

/// Non-zero amounts count as set, whether the cell is numeric or numeric text.
pub fn parse_flag(cell: &CellValue) -> bool {
    match cell {
        CellValue::Number(n) => *n != 0.0,
        _ => cell.text().is_some_and(|t| {
            let amount = t.trim_start_matches('$').replace(',', "");
            if let Ok(n) = amount.trim().parse::<f64>() {
                return n != 0.0;
            }
            matches!(
                t.to_ascii_lowercase().as_str(),
                "yes" | "y" | "true" | "paid" | "done"
            )
        }),
    }
}

/// Percentages arrive as `85%`, `85` or a fraction cell; values are returned as written.
pub fn parse_percent(cell: &CellValue) -> Option<f64> {
    parse_optional_amount(cell)
}

/// Explicit day count if the sheet has one, else join date to quit date (or `as_of`).
pub fn days_completed(
    explicit: &CellValue,
    join_date: SheetDate,
    quit_date: SheetDate,
    as_of: NaiveDate,
) -> Option<i64> {
    if let Some(days) = parse_optional_amount(explicit) {
        return Some(days.trunc() as i64);
    }
    let joined = join_date.date()?;
    let until = quit_date.date().unwrap_or(as_of);
    Some((until - joined).num_days())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn serials_use_the_unix_epoch_offset() {
        assert_eq!(serial_to_date(25569.0), Some(ymd(1970, 1, 1)));
        assert_eq!(serial_to_date(45301.0), Some(ymd(2024, 1, 10)));
        assert_eq!(
            parse_sheet_date(&CellValue::Number(45301.75)),
            SheetDate::Date(ymd(2024, 1, 10))
        );
    }

    #[test]
    fn date_strings_in_sheet_formats() {
        for raw in ["2024-01-10", "10/01/2024", "10-Jan-2024", "10 Jan 2024", "Jan 10, 2024", "45301"] {
            assert_eq!(parse_date_text(raw), SheetDate::Date(ymd(2024, 1, 10)), "{raw}");
        }
        assert_eq!(parse_date_text("01/25/2024"), SheetDate::Date(ymd(2024, 1, 25)));
    }

    #[test]
    fn bare_years_are_not_serials() {
        assert_eq!(parse_date_text("2024"), SheetDate::Invalid);
        assert_eq!(parse_date_text("12"), SheetDate::Invalid);
        assert_eq!(parse_date_text("45366"), SheetDate::Date(ymd(2024, 3, 15)));
    }

    #[test]
    fn na_is_absent_not_invalid() {
        assert_eq!(parse_date_text("NA"), SheetDate::NotApplicable);
        assert_eq!(parse_date_text("na"), SheetDate::NotApplicable);
        assert_eq!(parse_date_text("not joined"), SheetDate::Invalid);
        assert_eq!(parse_sheet_date(&CellValue::Empty), SheetDate::Missing);
        assert_eq!(parse_sheet_date(&CellValue::Text("  ".into())), SheetDate::Missing);
    }

    #[test]
    fn currency_parsing_never_fails() {
        assert_eq!(parse_currency_text("$1,200.00"), 1200.0);
        assert_eq!(parse_currency_text("-"), 0.0);
        assert_eq!(parse_currency_text(""), 0.0);
        assert_eq!(parse_currency_text("1.2.3"), 0.0);
        assert_eq!(parse_currency_text("INR 45,000"), 45000.0);
        assert_eq!(parse_currency(&CellValue::Number(1200.0)), 1200.0);
    }

    #[test]
    fn currency_round_trips_through_sheet_format() {
        let inputs = [
            CellValue::from("$1,200.00"),
            CellValue::from("-"),
            CellValue::from(""),
            CellValue::Number(1200.0),
            CellValue::from("-$3,450.5"),
            CellValue::from("1234567.89"),
        ];
        for cell in inputs {
            let once = parse_currency(&cell);
            let again = parse_currency_text(&format_currency(once));
            assert_eq!(again, once, "{cell:?}");
        }
        assert_eq!(format_currency(1200.0), "$1,200.00");
        assert_eq!(format_currency(-3450.5), "-$3,450.50");
        assert_eq!(format_currency(0.0), "$0.00");
    }

    #[test]
    fn billing_status_normalization() {
        assert_eq!(normalize_billing_status(&"Completed".into()), BillingStatus::Billed);
        assert_eq!(normalize_billing_status(&"done".into()), BillingStatus::Billed);
        assert_eq!(normalize_billing_status(&"BILLED".into()), BillingStatus::Billed);
        assert_eq!(normalize_billing_status(&"Hold".into()), BillingStatus::Hold);
        assert_eq!(normalize_billing_status(&"cancelled".into()), BillingStatus::Cancelled);
        assert_eq!(normalize_billing_status(&"awaiting PO".into()), BillingStatus::Pending);
        assert_eq!(normalize_billing_status(&CellValue::Empty), BillingStatus::Pending);
    }

    #[test]
    fn qualifier_law() {
        use BillingStatus::*;
        // explicit yes wins regardless of tenure or billing
        assert!(derive_qualifier(Some("Yes"), Some(3), Pending));
        assert!(derive_qualifier(Some(" yes "), None, Cancelled));
        // explicit no is recomputed
        assert!(derive_qualifier(Some("No"), Some(95), Billed));
        assert!(!derive_qualifier(Some("No"), Some(95), Pending));
        // absent or junk is recomputed
        assert!(derive_qualifier(None, Some(91), Billed));
        assert!(derive_qualifier(Some("maybe"), Some(120), Billed));
        assert!(!derive_qualifier(None, Some(90), Billed));
        assert!(!derive_qualifier(None, None, Billed));
    }

    #[test]
    fn days_fall_back_to_date_arithmetic() {
        let as_of = ymd(2024, 6, 1);
        let joined = SheetDate::Date(ymd(2024, 1, 10));
        assert_eq!(
            days_completed(&CellValue::Number(42.0), joined, SheetDate::Missing, as_of),
            Some(42)
        );
        assert_eq!(
            days_completed(&CellValue::Empty, joined, SheetDate::Date(ymd(2024, 2, 9)), as_of),
            Some(30)
        );
        assert_eq!(
            days_completed(&CellValue::Empty, joined, SheetDate::NotApplicable, as_of),
            Some(143)
        );
        assert_eq!(
            days_completed(&CellValue::Empty, SheetDate::Invalid, SheetDate::Missing, as_of),
            None
        );
    }

    #[test]
    fn flags_and_percentages() {
        assert!(parse_flag(&"Yes".into()));
        assert!(parse_flag(&"paid".into()));
        assert!(parse_flag(&CellValue::Number(1.0)));
        assert!(!parse_flag(&"No".into()));
        assert!(!parse_flag(&CellValue::Empty));
        assert_eq!(parse_flag(&"1".into()), parse_flag(&CellValue::Number(1.0)));
        assert!(parse_flag(&"1".into()));
        assert!(parse_flag(&"$5,000".into()));
        assert!(!parse_flag(&"0".into()));
        assert_eq!(parse_percent(&"85%".into()), Some(85.0));
        assert_eq!(parse_percent(&CellValue::Number(0.85)), Some(0.85));
        assert_eq!(parse_percent(&"NA".into()), None);
    }
}
