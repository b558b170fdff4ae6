//! Configuration for the Bridge server.
//!
//! CLI arguments with environment variable fallbacks; `.env` is loaded
//! before parsing.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;

use crate::ledger::{LedgerSettings, DEFAULT_CURRENCIES};

/// Backing store selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// PostgreSQL through sqlx, migrations run at startup.
    Postgres,
    /// In-process store; state is lost on exit.
    Memory,
}

/// Bridge ledger server: wallets, escrow, installments and billing.
#[derive(Parser, Debug, Clone)]
#[command(name = "bridge-server")]
#[command(about = "Wallet, escrow, installment and billing ledger API")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// PostgreSQL connection string (required for the postgres store)
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Backing store
    #[arg(long, env = "STORE", value_enum, default_value_t = StoreKind::Postgres)]
    pub store: StoreKind,

    /// Maximum pooled database connections
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value = "10")]
    pub db_max_connections: u32,

    /// Per-statement time bound inside a unit of work
    #[arg(long, env = "STATEMENT_TIMEOUT_MS", default_value = "5000")]
    pub statement_timeout_ms: u64,

    /// Comma-separated ISO currency codes accepted by the API
    #[arg(
        long,
        env = "SUPPORTED_CURRENCIES",
        value_delimiter = ',',
        default_values_t = DEFAULT_CURRENCIES.map(String::from)
    )]
    pub supported_currencies: Vec<String>,

    /// Lifetime of stored idempotent responses
    #[arg(long, env = "IDEMPOTENCY_TTL_HOURS", default_value = "24")]
    pub idempotency_ttl_hours: i64,

    /// Interval between sweeps of expired idempotency records
    #[arg(long, env = "IDEMPOTENCY_SWEEP_SECS", default_value = "3600")]
    pub idempotency_sweep_secs: u64,

    /// Insert the default fee catalog at startup
    #[arg(long, env = "SEED_FEE_CATALOG", default_value = "false")]
    pub seed_fee_catalog: bool,

    /// Capacity of the in-process payment event channel
    #[arg(long, env = "EVENT_QUEUE_CAPACITY", default_value = "1024")]
    pub event_queue_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.store == StoreKind::Postgres && self.database_url.is_none() {
            return Err("DATABASE_URL is required with the postgres store".to_string());
        }

        if self.db_max_connections == 0 {
            return Err("DB_MAX_CONNECTIONS must be at least 1".to_string());
        }

        if self.statement_timeout_ms == 0 {
            return Err("STATEMENT_TIMEOUT_MS must be positive".to_string());
        }

        if self.supported_currencies.is_empty() {
            return Err("SUPPORTED_CURRENCIES must name at least one currency".to_string());
        }

        if let Some(bad) = self
            .supported_currencies
            .iter()
            .find(|c| c.len() != 3 || !c.chars().all(|ch| ch.is_ascii_uppercase()))
        {
            return Err(format!("Invalid currency code in SUPPORTED_CURRENCIES: {}", bad));
        }

        if self.idempotency_ttl_hours <= 0 {
            return Err("IDEMPOTENCY_TTL_HOURS must be positive".to_string());
        }

        if self.idempotency_sweep_secs == 0 {
            return Err("IDEMPOTENCY_SWEEP_SECS must be positive".to_string());
        }

        if self.event_queue_capacity == 0 {
            return Err("EVENT_QUEUE_CAPACITY must be positive".to_string());
        }

        Ok(())
    }

    pub fn ledger_settings(&self) -> LedgerSettings {
        LedgerSettings {
            supported_currencies: self.supported_currencies.clone(),
            idempotency_ttl: chrono::Duration::hours(self.idempotency_ttl_hours),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["bridge-server"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_memory_store_needs_no_database() {
        let args = parse(&["--store", "memory"]);
        assert_eq!(args.store, StoreKind::Memory);
        assert!(args.validate().is_ok());
        assert_eq!(args.db_max_connections, 10);
        assert_eq!(args.supported_currencies.len(), 5);
    }

    #[test]
    fn test_postgres_requires_database_url() {
        let args = parse(&["--store", "postgres"]);
        if args.database_url.is_none() {
            assert!(args.validate().is_err());
        }
    }

    #[test]
    fn test_currency_list_parsing() {
        let args = parse(&["--store", "memory", "--supported-currencies", "KES,UGX"]);
        assert_eq!(args.supported_currencies, vec!["KES", "UGX"]);

        let settings = args.ledger_settings();
        assert!(settings.validate_currency("UGX").is_ok());
        assert!(settings.validate_currency("TZS").is_err());
    }

    #[test]
    fn test_rejects_bad_currency_code() {
        let args = parse(&["--store", "memory", "--supported-currencies", "kes"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_ttl() {
        let args = parse(&["--store", "memory", "--idempotency-ttl-hours", "0"]);
        assert!(args.validate().is_err());
    }
}
