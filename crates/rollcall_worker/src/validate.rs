//! Stateless row validation against the employee schema.
//!
//! Field contract, applied in order with the first failure per field
//! reported. Normalization (trimming, decimal parsing, code-set enums, date
//! parsing) happens here so everything downstream works with typed values.

use crate::reader::Header;
use rollcall_protocol::types::{CountryCode, Currency, EmployeeRecord, RawRow};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::OnceLock;

/// One failed field constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

fn email_regex() -> &'static regex::Regex {
    static EMAIL: OnceLock<regex::Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        // local@domain with at least one dot in the domain.
        regex::Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static regex compiles")
    })
}

fn salary_cap() -> Decimal {
    Decimal::from(10_000_000_000u64)
}

/// Validate one raw row. Returns the normalized record, or every failed
/// field (one error per field, in schema order).
pub fn validate_row(
    row: &RawRow,
    header: &Header,
    today: chrono::NaiveDate,
) -> Result<EmployeeRecord, Vec<FieldError>> {
    let mut errors = Vec::new();

    let field = |name: &str| header.value(row, name).map(str::trim).unwrap_or("");

    // employee_number
    let employee_number = field("employee_number");
    if employee_number.is_empty() {
        errors.push(FieldError::new("employee_number", "is required"));
    } else if employee_number.len() > 50 {
        errors.push(FieldError::new(
            "employee_number",
            "must be at most 50 characters",
        ));
    } else if employee_number.chars().any(char::is_control) {
        errors.push(FieldError::new(
            "employee_number",
            "must not contain control characters",
        ));
    }

    // first_name / last_name
    for name in ["first_name", "last_name"] {
        let value = field(name);
        if value.is_empty() {
            errors.push(FieldError::new(name, "is required"));
        } else if value.len() > 100 {
            errors.push(FieldError::new(name, "must be at most 100 characters"));
        }
    }

    // email
    let email = field("email");
    if email.is_empty() {
        errors.push(FieldError::new("email", "is required"));
    } else if email.len() > 255 {
        errors.push(FieldError::new("email", "must be at most 255 characters"));
    } else if !email_regex().is_match(email) {
        errors.push(FieldError::new("email", "is not a valid email address"));
    }

    // department
    let department = field("department");
    if department.len() > 100 {
        errors.push(FieldError::new(
            "department",
            "must be at most 100 characters",
        ));
    }

    // salary
    let salary_raw = field("salary");
    let mut salary = None;
    if !salary_raw.is_empty() {
        match parse_salary(salary_raw) {
            Ok(value) => salary = Some(value),
            Err(message) => errors.push(FieldError::new("salary", message)),
        }
    }

    // currency
    let currency_raw = field("currency");
    let mut currency = None;
    if !currency_raw.is_empty() {
        match Currency::parse(currency_raw) {
            Some(value) => currency = Some(value),
            None => errors.push(FieldError::new(
                "currency",
                format!("'{currency_raw}' is not a supported currency"),
            )),
        }
    }

    // country_code
    let country_raw = field("country_code");
    let mut country_code = None;
    if !country_raw.is_empty() {
        match CountryCode::parse(country_raw) {
            Some(value) => country_code = Some(value),
            None => errors.push(FieldError::new(
                "country_code",
                format!("'{country_raw}' is not a supported country code"),
            )),
        }
    }

    // start_date
    let date_raw = field("start_date");
    let mut start_date = None;
    if !date_raw.is_empty() {
        match chrono::NaiveDate::parse_from_str(date_raw, "%Y-%m-%d") {
            Ok(date) if date <= today => start_date = Some(date),
            Ok(_) => errors.push(FieldError::new("start_date", "must not be in the future")),
            Err(_) => errors.push(FieldError::new(
                "start_date",
                "must be a valid date in YYYY-MM-DD format",
            )),
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(EmployeeRecord {
        employee_number: employee_number.to_string(),
        first_name: field("first_name").to_string(),
        last_name: field("last_name").to_string(),
        email: email.to_string(),
        department: (!department.is_empty()).then(|| department.to_string()),
        salary,
        currency,
        country_code,
        start_date,
    })
}

/// Strict numeric salary parse: digits, one period, optional leading minus.
/// Unit suffixes ("50k") and scientific notation are rejected outright.
fn parse_salary(raw: &str) -> Result<Decimal, String> {
    if !raw
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.' || c == '-')
    {
        return Err(format!("'{raw}' is not a number"));
    }
    let value = Decimal::from_str(raw).map_err(|_| format!("'{raw}' is not a number"))?;
    if value.is_sign_negative() {
        return Err("must not be negative".to_string());
    }
    if value > salary_cap() {
        return Err("exceeds the maximum supported amount".to_string());
    }
    if value.normalize().scale() > 2 {
        return Err("must have at most two decimal places".to_string());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn header() -> Header {
        let columns: Vec<String> = [
            "employee_number",
            "first_name",
            "last_name",
            "email",
            "department",
            "salary",
            "currency",
            "country_code",
            "start_date",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        Header::from_columns(&columns).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn row(values: &[&str]) -> RawRow {
        RawRow::new(1, values.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn full_row_normalizes() {
        let record = validate_row(
            &row(&[
                " E1 ", "Ann", "Lee", "a@x.co", "Eng", "1000.50", "usd", "ke", "2024-01-01",
            ]),
            &header(),
            today(),
        )
        .unwrap();

        assert_eq!(record.employee_number, "E1");
        assert_eq!(record.salary, Some(Decimal::new(100_050, 2)));
        assert_eq!(record.currency, Some(Currency::USD));
        assert_eq!(record.country_code, Some(CountryCode::KE));
        assert_eq!(record.start_date, NaiveDate::from_ymd_opt(2024, 1, 1));
    }

    #[test]
    fn optional_fields_may_be_empty() {
        let record = validate_row(
            &row(&["E2", "Bo", "Ng", "b@x.co", "", "", "", "", ""]),
            &header(),
            today(),
        )
        .unwrap();
        assert_eq!(record.department, None);
        assert_eq!(record.salary, None);
        assert_eq!(record.start_date, None);
    }

    #[test]
    fn required_fields_are_enforced() {
        let errors = validate_row(
            &row(&["", "", "Lee", "not-an-email", "", "", "", "", ""]),
            &header(),
            today(),
        )
        .unwrap_err();

        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["employee_number", "first_name", "email"]);
    }

    #[test]
    fn salary_rejects_unit_suffixes() {
        for bad in ["50k", "66.5k", "1,000", "1e3", "ten"] {
            let errors = validate_row(
                &row(&["E1", "Ann", "Lee", "a@x.co", "", bad, "", "", ""]),
                &header(),
                today(),
            )
            .unwrap_err();
            assert_eq!(errors.len(), 1, "expected one error for {bad}");
            assert_eq!(errors[0].field, "salary");
        }
    }

    #[test]
    fn salary_bounds_and_scale() {
        let negative = validate_row(
            &row(&["E1", "Ann", "Lee", "a@x.co", "", "-1", "", "", ""]),
            &header(),
            today(),
        )
        .unwrap_err();
        assert!(negative[0].message.contains("negative"));

        let too_precise = validate_row(
            &row(&["E1", "Ann", "Lee", "a@x.co", "", "10.555", "", "", ""]),
            &header(),
            today(),
        )
        .unwrap_err();
        assert!(too_precise[0].message.contains("two decimal"));

        let too_big = validate_row(
            &row(&["E1", "Ann", "Lee", "a@x.co", "", "10000000001", "", "", ""]),
            &header(),
            today(),
        )
        .unwrap_err();
        assert!(too_big[0].message.contains("maximum"));

        // Trailing zeros beyond two places are still the same value.
        let ok = validate_row(
            &row(&["E1", "Ann", "Lee", "a@x.co", "", "10.500", "", "", ""]),
            &header(),
            today(),
        )
        .unwrap();
        assert_eq!(ok.salary, Some(Decimal::new(1050, 2)));
    }

    #[test]
    fn email_needs_dotted_domain() {
        for bad in ["a@x", "a.b.co", "a @x.co", "@x.co"] {
            let errors = validate_row(
                &row(&["E1", "Ann", "Lee", bad, "", "", "", "", ""]),
                &header(),
                today(),
            )
            .unwrap_err();
            assert_eq!(errors[0].field, "email", "expected email error for {bad}");
        }
    }

    #[test]
    fn dates_must_be_calendar_valid_and_not_future() {
        let invalid = validate_row(
            &row(&["E1", "Ann", "Lee", "a@x.co", "", "", "", "", "2024-02-30"]),
            &header(),
            today(),
        )
        .unwrap_err();
        assert!(invalid[0].message.contains("valid date"));

        let future = validate_row(
            &row(&["E1", "Ann", "Lee", "a@x.co", "", "", "", "", "2031-01-01"]),
            &header(),
            today(),
        )
        .unwrap_err();
        assert!(future[0].message.contains("future"));

        let boundary = validate_row(
            &row(&["E1", "Ann", "Lee", "a@x.co", "", "", "", "", "2025-06-01"]),
            &header(),
            today(),
        )
        .unwrap();
        assert_eq!(boundary.start_date, Some(today()));
    }

    #[test]
    fn code_sets_are_closed() {
        let errors = validate_row(
            &row(&["E1", "Ann", "Lee", "a@x.co", "", "", "EUR", "US", ""]),
            &header(),
            today(),
        )
        .unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["currency", "country_code"]);
    }
}
