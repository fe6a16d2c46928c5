// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use divisas_rs::exchange::{BuyAmount, Conversion, TransactionFilter};
use divisas_rs::models::{Currency, Transaction, TransactionKind, TransactionStatus};
use divisas_rs::money::{format_amount, parse_amount};
use divisas_rs::remittances::{AdjustmentDirection, NewRemittance};
use divisas_rs::web::models::auth::{Role, issue_token};
use divisas_rs::{
    accounts, config, db, exchange, exchange_rates, limits, rate_sources, rates, remittances,
    reports, sales, web,
};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Register a received remittance
    RegisterRemittance {
        currency: Currency,
        amount: String,
        /// Business date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        reference: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Correct a remittance's received amount (signed, e.g. -25.00)
    AdjustRemittance {
        id: i64,
        #[arg(allow_negative_numbers = true)]
        amount: String,
        #[arg(long)]
        reason: String,
    },
    /// Exclude a remittance from availability and FIFO consumption
    DeactivateRemittance { id: i64 },
    /// List the remittances of a day
    ListRemittances {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        currency: Option<Currency>,
    },
    /// Set the daily sales limit for a currency
    ConfigureLimit {
        currency: Currency,
        limit: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show stock and limit state for a currency
    Availability {
        currency: Currency,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Check whether a sale would be accepted, without executing it
    AuthorizeSale {
        currency: Currency,
        amount: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Store a manual exchange rate (VES per unit)
    SetRate {
        currency: Currency,
        rate: String,
        #[arg(long, default_value = "manual")]
        source: String,
    },
    /// Fetch rates from the external sources
    FetchRates,
    /// Show active rates and quotes, or the history of one currency
    ListRates {
        #[arg(long)]
        currency: Option<Currency>,
        #[arg(long, default_value = "20")]
        limit: i64,
    },
    /// Register a client
    CreateClient { national_id: String, full_name: String },
    /// Open an account for a client
    OpenAccount { client_id: i64 },
    /// Credit an account
    Deposit {
        account_id: i64,
        currency: Currency,
        amount: String,
    },
    /// Client buys foreign currency with VES
    Buy {
        account_id: i64,
        currency: Currency,
        amount: String,
        /// Interpret the amount as VES to spend instead of foreign to receive
        #[arg(long)]
        local: bool,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Client sells foreign currency for VES
    Sell {
        account_id: i64,
        currency: Currency,
        amount: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Price a conversion at the current quote without executing it
    Preview {
        /// buy or sell, seen from the client
        kind: TransactionKind,
        currency: Currency,
        amount: String,
        /// Buys only: interpret the amount as VES to spend
        #[arg(long)]
        local: bool,
    },
    /// Reverse a completed transaction
    Cancel { receipt: String },
    /// List transactions, newest first
    History {
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        /// buy or sell
        #[arg(long)]
        kind: Option<TransactionKind>,
        #[arg(long)]
        currency: Option<Currency>,
        #[arg(long)]
        account: Option<i64>,
        /// completed or cancelled
        #[arg(long)]
        status: Option<TransactionStatus>,
        #[arg(long, default_value = "50")]
        limit: i64,
    },
    /// Summary of a day's transactions
    DailyReport {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Totals for the Monday-to-Sunday week containing the date
    WeeklyReport {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Totals for the month containing the date
    MonthlyReport {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Export a day's transactions to CSV
    ExportTransactions {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Sign an API token for a desk user
    IssueToken {
        #[arg(long)]
        email: String,
        /// admin or operator
        #[arg(long, default_value = "operator")]
        role: String,
        #[arg(long, default_value = "7")]
        days: i64,
    },
    /// Start the web server
    Serve {
        /// Port to bind to
        #[arg(long, default_value = "3000")]
        port: u16,
        /// Also refresh rates in the background during banking hours
        #[arg(long)]
        scheduler: bool,
    },
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn jwt_secret() -> Result<String> {
    env::var("JWT_SECRET").context("JWT_SECRET must be set")
}

/// Commands that need neither the config file nor the database. Returns
/// false when `command` is not one of them.
fn run_setup(command: &Commands) -> Result<bool> {
    match command {
        Commands::InitConfig { force } => {
            let path = config::get_config_path();
            config::init_config(&path, *force)?;
            println!("✅ Default configuration written to {}", path.display());
        }
        Commands::IssueToken { email, role, days } => {
            let role: Role = role.parse()?;
            let token = issue_token(&jwt_secret()?, email, email, role, Duration::days(*days))?;
            println!("{}", token);
        }
        _ => return Ok(false),
    }
    Ok(true)
}

fn print_transaction(t: &Transaction) {
    println!(
        "{} {} {:<4} {:<9} {:>14} {:<4} -> {:>14} {:<4} at {} fee {} (account #{})",
        t.receipt,
        t.trade_date,
        t.kind.as_str(),
        t.status.as_str(),
        format_amount(t.source_amount),
        t.source_currency,
        format_amount(t.target_amount),
        t.target_currency,
        t.rate,
        format_amount(t.commission),
        t.account_id
    );
}

fn print_volumes(volumes: &std::collections::BTreeMap<Currency, reports::CurrencyVolume>) {
    for (currency, v) in volumes {
        println!(
            "   {:<5} sold to clients {:>14} | bought from clients {:>14} | VES volume {:>16}",
            currency,
            format_amount(v.bought_by_clients),
            format_amount(v.sold_by_clients),
            format_amount(v.local_volume)
        );
    }
}

fn print_period(title: &str, report: &reports::PeriodReport) {
    println!("📊 {} {} to {}", title, report.from, report.to);
    println!(
        "   Purchases: {} | Sales: {} | Cancelled: {} | Commissions: {} VES",
        report.purchases,
        report.sales,
        report.cancelled,
        format_amount(report.total_commissions)
    );
    println!(
        "   Active accounts: {} | Active clients: {}",
        report.active_accounts, report.active_clients
    );
    print_volumes(&report.volumes);
    for d in report.days.iter().filter(|d| d.purchases + d.sales + d.cancelled > 0) {
        println!(
            "   {} {:<9} buys {:>3} sells {:>3} cancelled {:>3} | VES {:>16} | fees {:>12}",
            d.date,
            d.weekday,
            d.purchases,
            d.sales,
            d.cancelled,
            format_amount(d.local_volume),
            format_amount(d.commissions)
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "divisas_rs=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    if run_setup(&cli.command)? {
        return Ok(());
    }

    let config = config::load_config()?;

    let db_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:divisas.db".to_string());
    let pool = db::create_db_pool(&db_url).await?;

    match cli.command {
        Commands::RegisterRemittance {
            currency,
            amount,
            date,
            source,
            reference,
            notes,
        } => {
            let new = NewRemittance {
                date: date.unwrap_or_else(today),
                currency,
                amount: parse_amount(&amount)?,
                source,
                reference,
                notes,
            };
            let r = remittances::register_remittance(&pool, &new).await?;
            println!(
                "✅ Remittance #{} registered: {} {} for {}",
                r.id,
                format_amount(r.received),
                r.currency,
                r.date
            );
            let total = remittances::total_available(&pool, r.date, r.currency).await?;
            println!("   Available today: {} {}", format_amount(total), r.currency);
        }
        Commands::AdjustRemittance { id, amount, reason } => {
            let signed = parse_amount(&amount)?;
            let direction = if signed.is_sign_negative() {
                AdjustmentDirection::Decrease
            } else {
                AdjustmentDirection::Increase
            };
            let r = remittances::adjust_remittance(&pool, id, direction, signed.abs(), &reason).await?;
            println!(
                "✅ Remittance #{} adjusted: received {} / available {} {}",
                r.id,
                format_amount(r.received),
                format_amount(r.available),
                r.currency
            );
        }
        Commands::DeactivateRemittance { id } => {
            let r = remittances::deactivate_remittance(&pool, id).await?;
            println!("✅ Remittance #{} deactivated ({} {} left unsold)", r.id, format_amount(r.available), r.currency);
        }
        Commands::ListRemittances { date, currency } => {
            let date = date.unwrap_or_else(today);
            let list = remittances::list_remittances(&pool, date, currency).await?;
            if list.is_empty() {
                println!("No remittances on {}", date);
            }
            for r in list {
                println!(
                    "#{:<5} {:<5} received {:>14} sold {:>14} available {:>14} {}{}",
                    r.id,
                    r.currency,
                    format_amount(r.received),
                    format_amount(r.sold),
                    format_amount(r.available),
                    r.source.as_deref().unwrap_or("-"),
                    if r.active { "" } else { " (inactive)" }
                );
            }
        }
        Commands::ConfigureLimit {
            currency,
            limit,
            date,
        } => {
            let date = date.unwrap_or_else(today);
            let l = limits::configure_limit(&pool, date, currency, parse_amount(&limit)?).await?;
            println!(
                "✅ {} limit for {} set to {} (sold {}, remaining {})",
                l.currency,
                l.date,
                format_amount(l.daily_limit),
                format_amount(l.sold),
                format_amount(l.remaining)
            );
        }
        Commands::Availability { currency, date } => {
            let a = reports::availability(&pool, date.unwrap_or_else(today), currency).await?;
            println!("📊 {} on {}", a.currency, a.date);
            println!(
                "   Remittances: {} | received {} | sold {} | available {}",
                a.remittance_count,
                format_amount(a.total_received),
                format_amount(a.total_sold),
                format_amount(a.total_available)
            );
            match a.daily_limit {
                Some(limit) => println!(
                    "   Limit: {} | sold {} | remaining {} | {:.2}% used",
                    format_amount(limit),
                    format_amount(a.limit_sold),
                    format_amount(a.limit_remaining),
                    a.utilization_pct
                ),
                None => println!("   Limit: not configured"),
            }
            match a.reason {
                None => println!("✅ Sales allowed"),
                Some(reason) => println!("❌ Sales blocked: {}", reason),
            }
        }
        Commands::AuthorizeSale {
            currency,
            amount,
            date,
        } => {
            let date = date.unwrap_or_else(today);
            match sales::authorize_sale(&pool, date, currency, parse_amount(&amount)?).await {
                Ok(a) => println!(
                    "✅ Sale of {} {} authorized (available {}, limit remaining {})",
                    format_amount(a.amount),
                    a.currency,
                    format_amount(a.available),
                    format_amount(a.remaining)
                ),
                Err(divisas_rs::LedgerError::SaleRejected(reason)) => {
                    println!("❌ Rejected: {}", reason);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::SetRate {
            currency,
            rate,
            source,
        } => {
            let snapshot = rates::store_rate(&pool, currency, parse_amount(&rate)?, &source, db::now()).await?;
            println!("✅ {} rate set to {} VES ({})", snapshot.currency, snapshot.rate, snapshot.source);
        }
        Commands::FetchRates => {
            println!("Fetching current exchange rates...");
            let sources = rate_sources::default_sources(&config.rates)?;
            let summary = exchange_rates::update_exchange_rates(&sources, &pool).await?;
            for s in &summary.stored {
                println!("✅ {}: {} VES ({})", s.currency, s.rate, s.source);
            }
            for failure in &summary.failures {
                eprintln!("⚠️  {}", failure);
            }
            for currency in &summary.missing {
                eprintln!("⚠️  No new rate for {}", currency);
            }
            if !summary.success() {
                anyhow::bail!("No exchange rates could be fetched; previous rates remain active");
            }
        }
        Commands::ListRates { currency, limit } => match currency {
            Some(currency) => {
                for s in rates::rate_history(&pool, currency, limit).await? {
                    println!(
                        "{} {:>12} {:<20} {}{}",
                        s.currency,
                        s.rate,
                        s.source,
                        s.fetched_at.to_rfc3339(),
                        if s.active { " *" } else { "" }
                    );
                }
            }
            None => {
                for snapshot in rates::active_rates(&pool).await? {
                    let q = rates::RateQuote::from_base(&snapshot, config.rates.spread);
                    println!(
                        "{:<5} base {:>12} | buy {:>12} | sell {:>12} | {} at {}",
                        q.currency,
                        q.base,
                        q.buy,
                        q.sell,
                        q.source,
                        q.fetched_at.to_rfc3339()
                    );
                }
                let max_age = Duration::minutes(config.rates.max_age_minutes);
                let health = rates::rate_health(&pool, db::now(), max_age).await?;
                for warning in health.warnings {
                    println!("⚠️  {}", warning);
                }
            }
        },
        Commands::CreateClient {
            national_id,
            full_name,
        } => {
            let c = accounts::create_client(&pool, &national_id, &full_name).await?;
            println!("✅ Client #{} created: {} ({})", c.id, c.full_name, c.national_id);
        }
        Commands::OpenAccount { client_id } => {
            let a = accounts::open_account(&pool, client_id).await?;
            println!("✅ Account #{} opened: {}", a.id, a.number);
        }
        Commands::Deposit {
            account_id,
            currency,
            amount,
        } => {
            let m = accounts::deposit(&pool, account_id, currency, parse_amount(&amount)?).await?;
            println!(
                "✅ Deposited {} {}; balance {}",
                format_amount(m.amount),
                m.currency,
                format_amount(m.balance_after)
            );
        }
        Commands::Buy {
            account_id,
            currency,
            amount,
            local,
            date,
        } => {
            let value = parse_amount(&amount)?;
            let amount = if local {
                BuyAmount::Local(value)
            } else {
                BuyAmount::Foreign(value)
            };
            let result = exchange::buy_currency(
                &pool,
                &config,
                account_id,
                currency,
                amount,
                date.unwrap_or_else(today),
            )
            .await?;
            let t = &result.transaction;
            println!("✅ Purchase {}", t.receipt);
            println!(
                "   {} {} at {} | cost {} VES + commission {} VES = {} VES",
                format_amount(t.target_amount),
                t.target_currency,
                t.rate,
                format_amount(t.source_amount),
                format_amount(t.commission),
                format_amount(result.local_settled)
            );
            for take in &result.remittances {
                println!(
                    "   remittance #{}: {} (left {})",
                    take.remittance_id,
                    format_amount(take.amount),
                    format_amount(take.available_after())
                );
            }
        }
        Commands::Sell {
            account_id,
            currency,
            amount,
            date,
        } => {
            let result = exchange::sell_currency(
                &pool,
                &config,
                account_id,
                currency,
                parse_amount(&amount)?,
                date.unwrap_or_else(today),
            )
            .await?;
            let t = &result.transaction;
            println!("✅ Sale {}", t.receipt);
            println!(
                "   {} {} at {} | gross {} VES - commission {} VES = {} VES",
                format_amount(t.source_amount),
                t.source_currency,
                t.rate,
                format_amount(t.target_amount),
                format_amount(t.commission),
                format_amount(result.local_settled)
            );
        }
        Commands::Preview {
            kind,
            currency,
            amount,
            local,
        } => {
            let value = parse_amount(&amount)?;
            let conversion = match kind {
                TransactionKind::Buy if local => Conversion::Buy {
                    currency,
                    amount: BuyAmount::Local(value),
                },
                TransactionKind::Buy => Conversion::Buy {
                    currency,
                    amount: BuyAmount::Foreign(value),
                },
                TransactionKind::Sell if local => {
                    anyhow::bail!("--local only applies to purchases");
                }
                TransactionKind::Sell => Conversion::Sell {
                    currency,
                    amount: value,
                },
            };
            let p = exchange::preview_conversion(&pool, &config, conversion).await?;
            let (received, debited) = match p.kind {
                TransactionKind::Buy => (p.currency, Currency::Ves),
                TransactionKind::Sell => (Currency::Ves, p.currency),
            };
            println!("🔎 {} {} at {} (quote from {})", p.kind.as_str(), p.currency, p.rate, p.quote.source);
            println!(
                "   receives {} {} | commission {} VES | debited {} {}",
                format_amount(p.converted),
                received,
                format_amount(p.commission),
                format_amount(p.total_debited),
                debited
            );
        }
        Commands::Cancel { receipt } => {
            let t = exchange::cancel_transaction(&pool, &receipt).await?;
            println!("✅ Transaction {} cancelled", t.receipt);
        }
        Commands::History {
            from,
            to,
            kind,
            currency,
            account,
            status,
            limit,
        } => {
            let filter = TransactionFilter {
                from,
                to,
                kind,
                currency,
                account_id: account,
                status,
                limit: Some(limit),
            };
            let transactions = exchange::transaction_history(&pool, &filter).await?;
            if transactions.is_empty() {
                println!("No matching transactions");
            }
            for t in &transactions {
                print_transaction(t);
            }
        }
        Commands::DailyReport { date } => {
            let report = reports::daily_report(&pool, date.unwrap_or_else(today)).await?;
            println!("📊 Daily report for {}", report.date);
            println!(
                "   Purchases: {} | Sales: {} | Cancelled: {}",
                report.purchases, report.sales, report.cancelled
            );
            println!("   Commissions: {} VES", format_amount(report.total_commissions));
            print_volumes(&report.volumes);
        }
        Commands::WeeklyReport { date } => {
            let report = reports::weekly_report(&pool, date.unwrap_or_else(today)).await?;
            print_period("Weekly report", &report);
        }
        Commands::MonthlyReport { date } => {
            let report = reports::monthly_report(&pool, date.unwrap_or_else(today)).await?;
            print_period("Monthly report", &report);
        }
        Commands::ExportTransactions { date, output } => {
            let date = date.unwrap_or_else(today);
            let path = match output {
                Some(path) => path,
                None => {
                    std::fs::create_dir_all("output")?;
                    PathBuf::from(format!("output/transactions_{}.csv", date.format("%Y%m%d")))
                }
            };
            let rows = reports::export_transactions_csv(&pool, date, &path).await?;
            println!("✅ {} transactions written to {}", rows, path.display());
        }
        // Handled by run_setup before the database is opened
        Commands::InitConfig { .. } | Commands::IssueToken { .. } => {}
        Commands::Serve { port, scheduler } => {
            let jwt_secret = jwt_secret()?;

            if scheduler {
                let sources = rate_sources::default_sources(&config.rates)?;
                tokio::spawn(exchange_rates::run_rate_scheduler(
                    pool.clone(),
                    config.clone(),
                    sources,
                ));
            }

            let state = web::AppState::new(pool, config, jwt_secret);
            web::server::start_server(state, port).await?;
        }
    }

    Ok(())
}
