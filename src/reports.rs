// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::Result;
use chrono::{Datelike, Duration, Months, NaiveDate};
use csv::Writer;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::{LedgerError, LedgerResult};
use crate::exchange::{TransactionFilter, transaction_history, transactions_on};
use crate::limits::active_limit;
use crate::models::{Currency, Transaction, TransactionKind, TransactionStatus};
use crate::remittances::list_remittances;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrencyVolume {
    /// Foreign currency sold to clients
    pub bought_by_clients: Decimal,
    /// Foreign currency bought back from clients
    pub sold_by_clients: Decimal,
    /// VES exchanged in both directions
    pub local_volume: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub purchases: usize,
    pub sales: usize,
    pub cancelled: usize,
    pub total_commissions: Decimal,
    pub volumes: BTreeMap<Currency, CurrencyVolume>,
    pub transactions: Vec<Transaction>,
}

/// Running totals over a set of transactions. Cancelled ones are only counted.
#[derive(Debug, Clone, Default)]
struct Totals {
    purchases: usize,
    sales: usize,
    cancelled: usize,
    commissions: Decimal,
    volumes: BTreeMap<Currency, CurrencyVolume>,
}

impl Totals {
    fn add(&mut self, t: &Transaction) {
        if t.status == TransactionStatus::Cancelled {
            self.cancelled += 1;
            return;
        }
        self.commissions += t.commission;
        match t.kind {
            TransactionKind::Buy => {
                self.purchases += 1;
                let volume = self.volumes.entry(t.target_currency).or_default();
                volume.bought_by_clients += t.target_amount;
                volume.local_volume += t.source_amount;
            }
            TransactionKind::Sell => {
                self.sales += 1;
                let volume = self.volumes.entry(t.source_currency).or_default();
                volume.sold_by_clients += t.source_amount;
                volume.local_volume += t.target_amount;
            }
        }
    }

    fn local_volume(&self) -> Decimal {
        self.volumes.values().map(|v| v.local_volume).sum()
    }
}

/// Totals of completed transactions traded on a date
pub async fn daily_report(pool: &SqlitePool, date: NaiveDate) -> LedgerResult<DailyReport> {
    let transactions = transactions_on(pool, date).await?;

    let mut totals = Totals::default();
    for t in &transactions {
        totals.add(t);
    }

    Ok(DailyReport {
        date,
        purchases: totals.purchases,
        sales: totals.sales,
        cancelled: totals.cancelled,
        total_commissions: totals.commissions,
        volumes: totals.volumes,
        transactions,
    })
}

/// One day inside a weekly or monthly report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub weekday: String,
    pub purchases: usize,
    pub sales: usize,
    pub cancelled: usize,
    /// VES exchanged in both directions
    pub local_volume: Decimal,
    pub commissions: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodReport {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub purchases: usize,
    pub sales: usize,
    pub cancelled: usize,
    pub total_commissions: Decimal,
    pub volumes: BTreeMap<Currency, CurrencyVolume>,
    pub active_accounts: usize,
    pub active_clients: i64,
    /// Every day of the period, including days without trades
    pub days: Vec<DaySummary>,
}

const MAX_REPORT_DAYS: i64 = 366;

/// Totals and per-day breakdown of the transactions traded in `from..=to`
pub async fn period_report(pool: &SqlitePool, from: NaiveDate, to: NaiveDate) -> LedgerResult<PeriodReport> {
    if from > to || (to - from).num_days() >= MAX_REPORT_DAYS {
        return Err(LedgerError::validation(format!(
            "report period {} to {} must be in order and span at most {} days",
            from, to, MAX_REPORT_DAYS
        )));
    }

    let filter = TransactionFilter {
        from: Some(from),
        to: Some(to),
        ..Default::default()
    };
    let transactions = transaction_history(pool, &filter).await?;

    let mut totals = Totals::default();
    let mut by_day: BTreeMap<NaiveDate, Totals> = BTreeMap::new();
    let mut accounts = BTreeSet::new();
    for t in &transactions {
        totals.add(t);
        by_day.entry(t.trade_date).or_default().add(t);
        if t.status == TransactionStatus::Completed {
            accounts.insert(t.account_id);
        }
    }

    let (active_clients,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(DISTINCT a.client_id)
        FROM transactions t
        JOIN accounts a ON a.id = t.account_id
        WHERE t.trade_date >= ? AND t.trade_date <= ? AND t.status = 'completed'
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_one(pool)
    .await?;

    let days = from
        .iter_days()
        .take_while(|d| *d <= to)
        .map(|date| {
            let day = by_day.remove(&date).unwrap_or_default();
            DaySummary {
                date,
                weekday: date.format("%A").to_string(),
                purchases: day.purchases,
                sales: day.sales,
                cancelled: day.cancelled,
                local_volume: day.local_volume(),
                commissions: day.commissions,
            }
        })
        .collect();

    Ok(PeriodReport {
        from,
        to,
        purchases: totals.purchases,
        sales: totals.sales,
        cancelled: totals.cancelled,
        total_commissions: totals.commissions,
        volumes: totals.volumes,
        active_accounts: accounts.len(),
        active_clients,
        days,
    })
}

/// Monday to Sunday around `date`
pub fn week_of(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
    (monday, monday + Duration::days(6))
}

/// First to last day of the month of `date`
pub fn month_of(date: NaiveDate) -> LedgerResult<(NaiveDate, NaiveDate)> {
    let first = date - Duration::days(i64::from(date.day0()));
    let last = first
        .checked_add_months(Months::new(1))
        .map(|next| next - Duration::days(1))
        .ok_or_else(|| LedgerError::validation(format!("{} is out of range", date)))?;
    Ok((first, last))
}

pub async fn weekly_report(pool: &SqlitePool, date: NaiveDate) -> LedgerResult<PeriodReport> {
    let (from, to) = week_of(date);
    period_report(pool, from, to).await
}

pub async fn monthly_report(pool: &SqlitePool, date: NaiveDate) -> LedgerResult<PeriodReport> {
    let (from, to) = month_of(date)?;
    period_report(pool, from, to).await
}

/// Stock and limit state of one currency on one day
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Availability {
    pub date: NaiveDate,
    pub currency: Currency,
    pub remittance_count: usize,
    pub total_received: Decimal,
    pub total_sold: Decimal,
    pub total_available: Decimal,
    pub daily_limit: Option<Decimal>,
    pub limit_sold: Decimal,
    pub limit_remaining: Decimal,
    pub utilization_pct: f64,
    pub can_sell: bool,
    pub reason: Option<String>,
}

pub async fn availability(pool: &SqlitePool, date: NaiveDate, currency: Currency) -> LedgerResult<Availability> {
    let currency = currency.ensure_foreign()?;
    let remittances: Vec<_> = list_remittances(pool, date, Some(currency))
        .await?
        .into_iter()
        .filter(|r| r.active)
        .collect();
    let limit = active_limit(pool, date, currency).await?;

    let total_received: Decimal = remittances.iter().map(|r| r.received).sum();
    let total_sold: Decimal = remittances.iter().map(|r| r.sold).sum();
    let total_available: Decimal = remittances.iter().map(|r| r.available).sum();

    let reason = match &limit {
        _ if total_available <= Decimal::ZERO => {
            Some(format!("no {} remittance available on {}", currency, date))
        }
        None => Some(format!("no sales limit configured for {} on {}", currency, date)),
        Some(l) if l.remaining <= Decimal::ZERO => {
            Some(format!("daily {} limit reached on {}", currency, date))
        }
        Some(_) => None,
    };

    Ok(Availability {
        date,
        currency,
        remittance_count: remittances.len(),
        total_received,
        total_sold,
        total_available,
        daily_limit: limit.as_ref().map(|l| l.daily_limit),
        limit_sold: limit.as_ref().map(|l| l.sold).unwrap_or_default(),
        limit_remaining: limit.as_ref().map(|l| l.remaining).unwrap_or_default(),
        utilization_pct: limit.as_ref().map(|l| l.utilization_pct()).unwrap_or(0.0),
        can_sell: reason.is_none(),
        reason,
    })
}

/// Write the day's transactions to a CSV file, returning the row count
pub async fn export_transactions_csv(pool: &SqlitePool, date: NaiveDate, path: &Path) -> Result<usize> {
    let transactions = transactions_on(pool, date).await?;

    let file = std::fs::File::create(path)?;
    let mut writer = Writer::from_writer(file);

    writer.write_record([
        "Receipt",
        "Kind",
        "Status",
        "Account",
        "Trade Date",
        "Source Currency",
        "Source Amount",
        "Target Currency",
        "Target Amount",
        "Rate",
        "Commission",
        "Created At",
    ])?;

    for t in &transactions {
        writer.write_record([
            t.receipt.clone(),
            t.kind.as_str().to_string(),
            t.status.as_str().to_string(),
            t.account_id.to_string(),
            t.trade_date.to_string(),
            t.source_currency.to_string(),
            format!("{:.2}", t.source_amount),
            t.target_currency.to_string(),
            format!("{:.2}", t.target_amount),
            format!("{:.4}", t.rate),
            format!("{:.2}", t.commission),
            t.created_at.to_rfc3339(),
        ])?;
    }

    writer.flush()?;
    tracing::info!(path = %path.display(), rows = transactions.len(), "transactions exported");
    Ok(transactions.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::limits::configure_limit;
    use crate::remittances::{NewRemittance, register_remittance};
    use std::str::FromStr;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    #[tokio::test]
    async fn test_availability_reasons() -> Result<()> {
        let pool = create_test_pool().await?;

        let empty = availability(&pool, day(), Currency::Usd).await?;
        assert!(!empty.can_sell);
        assert_eq!(empty.reason.as_deref(), Some("no USD remittance available on 2025-03-14"));

        register_remittance(
            &pool,
            &NewRemittance {
                date: day(),
                currency: Currency::Usd,
                amount: Decimal::from_str("500")?,
                source: None,
                reference: None,
                notes: None,
            },
        )
        .await?;
        let no_limit = availability(&pool, day(), Currency::Usd).await?;
        assert_eq!(
            no_limit.reason.as_deref(),
            Some("no sales limit configured for USD on 2025-03-14")
        );

        configure_limit(&pool, day(), Currency::Usd, Decimal::ZERO).await?;
        let exhausted = availability(&pool, day(), Currency::Usd).await?;
        assert_eq!(exhausted.reason.as_deref(), Some("daily USD limit reached on 2025-03-14"));

        configure_limit(&pool, day(), Currency::Usd, Decimal::from_str("300")?).await?;
        let ready = availability(&pool, day(), Currency::Usd).await?;
        assert!(ready.can_sell);
        assert_eq!(ready.total_available, Decimal::from_str("500")?);
        assert_eq!(ready.limit_remaining, Decimal::from_str("300")?);
        assert_eq!(ready.remittance_count, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_empty_day_report_and_export() -> Result<()> {
        let pool = create_test_pool().await?;

        let report = daily_report(&pool, day()).await?;
        assert_eq!(report.purchases, 0);
        assert_eq!(report.total_commissions, Decimal::ZERO);
        assert!(report.volumes.is_empty());

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty.csv");
        assert_eq!(export_transactions_csv(&pool, day(), &path).await?, 0);
        let content = std::fs::read_to_string(&path)?;
        assert!(content.starts_with("Receipt,Kind,Status"));

        Ok(())
    }

    #[test]
    fn test_week_and_month_bounds() {
        let friday = day();
        let (monday, sunday) = week_of(friday);
        assert_eq!(monday, NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
        assert_eq!(sunday, NaiveDate::from_ymd_opt(2025, 3, 16).unwrap());
        assert_eq!(week_of(monday), (monday, sunday));
        assert_eq!(week_of(sunday), (monday, sunday));

        let (first, last) = month_of(friday).unwrap();
        assert_eq!(first, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(last, NaiveDate::from_ymd_opt(2025, 3, 31).unwrap());

        let leap = NaiveDate::from_ymd_opt(2024, 2, 10).unwrap();
        assert_eq!(month_of(leap).unwrap().1, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        let december = NaiveDate::from_ymd_opt(2025, 12, 31).unwrap();
        assert_eq!(month_of(december).unwrap().1, december);
    }

    #[tokio::test]
    async fn test_empty_period_reports_cover_every_day() -> Result<()> {
        let pool = create_test_pool().await?;

        let week = weekly_report(&pool, day()).await?;
        assert_eq!(week.days.len(), 7);
        assert_eq!(week.days[0].weekday, "Monday");
        assert_eq!(week.days[6].weekday, "Sunday");
        assert_eq!(week.purchases + week.sales + week.cancelled, 0);
        assert_eq!(week.active_clients, 0);

        let month = monthly_report(&pool, day()).await?;
        assert_eq!(month.days.len(), 31);
        assert!(month.days.iter().all(|d| d.local_volume.is_zero()));

        let backwards = period_report(&pool, day(), day() - Duration::days(1)).await;
        assert!(matches!(backwards, Err(LedgerError::Validation(_))));
        let too_long = period_report(&pool, day(), day() + Duration::days(400)).await;
        assert!(matches!(too_long, Err(LedgerError::Validation(_))));

        Ok(())
    }
}
