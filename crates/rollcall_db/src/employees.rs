//! Employee store operations: canonical rows, key lookups and the upsert.

use crate::error::{DbError, Result};
use crate::RollcallDb;
use chrono::{DateTime, NaiveDate, Utc};
use rollcall_protocol::types::{CountryCode, Currency, EmployeeRecord};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::str::FromStr;

/// A persisted employee row.
#[derive(Debug, Clone, Serialize)]
pub struct Employee {
    pub id: i64,
    pub employee_number: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub department: Option<String>,
    pub salary: Option<Decimal>,
    pub currency: Option<Currency>,
    pub country_code: Option<CountryCode>,
    pub start_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RollcallDb {
    /// Insert or update the employee identified by `employee_number` or
    /// (case-folded) `email`.
    ///
    /// If the two keys resolve to two different existing rows the write is
    /// refused with [`DbError::Constraint`]; callers surface that as a
    /// business-rule row error.
    pub async fn upsert_employee(&self, record: &EmployeeRecord) -> Result<Employee> {
        let mut tx = self.pool.begin().await?;
        let email_lower = record.email_lower();

        let by_number: Option<i64> =
            sqlx::query("SELECT id FROM employees WHERE employee_number = ?")
                .bind(&record.employee_number)
                .fetch_optional(&mut *tx)
                .await?
                .map(|row| row.get("id"));
        let by_email: Option<i64> = sqlx::query("SELECT id FROM employees WHERE email_lower = ?")
            .bind(&email_lower)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| row.get("id"));

        let existing = match (by_number, by_email) {
            (Some(a), Some(b)) if a != b => {
                tx.rollback().await?;
                return Err(DbError::constraint(format!(
                    "employee_number '{}' and email '{}' belong to different employees",
                    record.employee_number, record.email
                )));
            }
            (Some(id), _) | (None, Some(id)) => Some(id),
            (None, None) => None,
        };

        let now = Utc::now();
        let salary = record.salary.map(|s| s.to_string());
        let start_date = record.start_date.map(|d| d.to_string());
        let currency = record.currency.map(|c| c.as_str());
        let country = record.country_code.map(|c| c.as_str());

        let id = match existing {
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE employees SET
                        employee_number = ?,
                        first_name = ?,
                        last_name = ?,
                        email = ?,
                        email_lower = ?,
                        department = ?,
                        salary = ?,
                        currency = ?,
                        country_code = ?,
                        start_date = ?,
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&record.employee_number)
                .bind(&record.first_name)
                .bind(&record.last_name)
                .bind(&record.email)
                .bind(&email_lower)
                .bind(&record.department)
                .bind(&salary)
                .bind(currency)
                .bind(country)
                .bind(&start_date)
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                id
            }
            None => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO employees (
                        employee_number, first_name, last_name, email, email_lower,
                        department, salary, currency, country_code, start_date,
                        created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&record.employee_number)
                .bind(&record.first_name)
                .bind(&record.last_name)
                .bind(&record.email)
                .bind(&email_lower)
                .bind(&record.department)
                .bind(&salary)
                .bind(currency)
                .bind(country)
                .bind(&start_date)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                result.last_insert_rowid()
            }
        };

        tx.commit().await?;

        self.get_employee(id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("employee {id} vanished after upsert")))
    }

    pub async fn get_employee(&self, id: i64) -> Result<Option<Employee>> {
        let row = sqlx::query("SELECT * FROM employees WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_employee).transpose()
    }

    pub async fn find_by_employee_number(&self, number: &str) -> Result<Option<Employee>> {
        let row = sqlx::query("SELECT * FROM employees WHERE employee_number = ?")
            .bind(number)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_employee).transpose()
    }

    /// Case-insensitive email lookup.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<Employee>> {
        let row = sqlx::query("SELECT * FROM employees WHERE email_lower = ?")
            .bind(email.to_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_employee).transpose()
    }

    /// Chunk-sized batched lookup by employee number.
    pub async fn find_batch_by_numbers(&self, numbers: &[String]) -> Result<Vec<Employee>> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM employees WHERE employee_number IN (");
        let mut separated = qb.separated(", ");
        for number in numbers {
            separated.push_bind(number);
        }
        separated.push_unseparated(")");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_employee).collect()
    }

    /// Chunk-sized batched lookup by case-folded email.
    pub async fn find_batch_by_emails(&self, emails: &[String]) -> Result<Vec<Employee>> {
        if emails.is_empty() {
            return Ok(Vec::new());
        }
        let lowered: Vec<String> = emails.iter().map(|e| e.to_lowercase()).collect();
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM employees WHERE email_lower IN (");
        let mut separated = qb.separated(", ");
        for email in &lowered {
            separated.push_bind(email);
        }
        separated.push_unseparated(")");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_employee).collect()
    }

    pub async fn count_employees(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM employees")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }
}

fn row_to_employee(row: &sqlx::sqlite::SqliteRow) -> Result<Employee> {
    let salary = row
        .get::<Option<String>, _>("salary")
        .map(|s| {
            Decimal::from_str(&s)
                .map_err(|e| DbError::corrupt_row(format!("bad salary '{s}': {e}")))
        })
        .transpose()?;
    let currency = row
        .get::<Option<String>, _>("currency")
        .map(|s| {
            Currency::parse(&s).ok_or_else(|| DbError::corrupt_row(format!("bad currency '{s}'")))
        })
        .transpose()?;
    let country_code = row
        .get::<Option<String>, _>("country_code")
        .map(|s| {
            CountryCode::parse(&s)
                .ok_or_else(|| DbError::corrupt_row(format!("bad country code '{s}'")))
        })
        .transpose()?;
    let start_date = row
        .get::<Option<String>, _>("start_date")
        .map(|s| {
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map_err(|e| DbError::corrupt_row(format!("bad start date '{s}': {e}")))
        })
        .transpose()?;

    Ok(Employee {
        id: row.get("id"),
        employee_number: row.get("employee_number"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        email: row.get("email"),
        department: row.get("department"),
        salary,
        currency,
        country_code,
        start_date,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(number: &str, email: &str) -> EmployeeRecord {
        EmployeeRecord {
            employee_number: number.to_string(),
            first_name: "Ann".to_string(),
            last_name: "Lee".to_string(),
            email: email.to_string(),
            department: Some("Eng".to_string()),
            salary: Some(Decimal::new(100_000, 2)),
            currency: Some(Currency::USD),
            country_code: Some(CountryCode::KE),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
        }
    }

    #[tokio::test]
    async fn upsert_inserts_then_updates() {
        let db = RollcallDb::open_memory().await.unwrap();

        let created = db.upsert_employee(&record("E1", "a@x.co")).await.unwrap();
        assert_eq!(created.employee_number, "E1");
        assert_eq!(created.salary, Some(Decimal::new(100_000, 2)));

        let mut changed = record("E1", "a@x.co");
        changed.department = Some("Ops".to_string());
        let updated = db.upsert_employee(&changed).await.unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.department.as_deref(), Some("Ops"));
        assert_eq!(db.count_employees().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_matches_existing_by_either_key() {
        let db = RollcallDb::open_memory().await.unwrap();
        let created = db.upsert_employee(&record("E1", "old@x.co")).await.unwrap();

        // Same number, new email: the row's email moves.
        let updated = db.upsert_employee(&record("E1", "new@x.co")).await.unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.email, "new@x.co");

        // Same email (different case), new number: still the same row.
        let renamed = db.upsert_employee(&record("E9", "NEW@X.CO")).await.unwrap();
        assert_eq!(renamed.id, created.id);
        assert_eq!(renamed.employee_number, "E9");
        assert_eq!(db.count_employees().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cross_key_collision_is_refused() {
        let db = RollcallDb::open_memory().await.unwrap();
        db.upsert_employee(&record("E1", "a@x.co")).await.unwrap();
        db.upsert_employee(&record("E2", "b@x.co")).await.unwrap();

        // E1's number with E2's email: two distinct rows match.
        let clash = db.upsert_employee(&record("E1", "b@x.co")).await;
        assert!(matches!(clash, Err(DbError::Constraint(_))));
        assert_eq!(db.count_employees().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn batched_lookups_return_matches() {
        let db = RollcallDb::open_memory().await.unwrap();
        db.upsert_employee(&record("E1", "a@x.co")).await.unwrap();
        db.upsert_employee(&record("E2", "b@x.co")).await.unwrap();

        let by_numbers = db
            .find_batch_by_numbers(&["E1".into(), "E3".into()])
            .await
            .unwrap();
        assert_eq!(by_numbers.len(), 1);

        let by_emails = db
            .find_batch_by_emails(&["A@X.CO".into(), "b@x.co".into()])
            .await
            .unwrap();
        assert_eq!(by_emails.len(), 2);
        assert!(db.find_batch_by_numbers(&[]).await.unwrap().is_empty());
    }
}
