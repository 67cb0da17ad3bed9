//! Database persistence for signals, trades, and per-user settings.
//!
//! Decimals are stored as TEXT to keep full precision; timestamps are TEXT
//! in SQLite's `datetime('now')` format. Conversion between stored rows and
//! domain types happens here and nowhere else.

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::config::AppConfig;
use crate::models::{
    Direction, ExitReason, MarginMode, ParsedSignal, Signal, Trade, TradeStatus,
};
use crate::trading::{TradeConfig, TradeConfigUpdate};

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Stored signal row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredSignal {
    id: i64,
    pair: String,
    direction: String,
    entry: String,
    stop_loss: String,
    take_profit: String,
    stated_stop_loss: Option<String>,
    stated_take_profit: Option<String>,
    raw_message: String,
    channel: String,
    created_at: String,
}

/// Stored trade row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredTrade {
    id: i64,
    user_id: i64,
    signal_id: Option<i64>,
    pair: String,
    direction: String,
    leverage: i64,
    entry_price: String,
    entry_quantity: Option<String>,
    order_id: Option<String>,
    stop_loss: String,
    take_profit: String,
    status: String,
    opened_at: Option<String>,
    closed_at: Option<String>,
    exit_price: Option<String>,
    pnl: Option<String>,
    pnl_percent: Option<String>,
    exit_reason: Option<String>,
    created_at: String,
}

/// Stored per-user settings row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredConfig {
    user_id: i64,
    margin_mode: String,
    leverage: i64,
    position_size: String,
    sl_percentage: String,
    tp_percentage: String,
    auto_execute: bool,
}

/// Fields of a new trade record. `opened` controls whether `opened_at` is
/// set: only trades whose entry order filled immediately open on insert.
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub user_id: i64,
    pub signal_id: Option<i64>,
    pub pair: String,
    pub direction: Direction,
    pub leverage: u32,
    pub entry_price: Decimal,
    pub entry_quantity: Option<Decimal>,
    pub order_id: Option<String>,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub status: TradeStatus,
    pub opened: bool,
}

impl Database {
    /// Connect and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        // Raw message audit log
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS market_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender TEXT NOT NULL,
                text TEXT NOT NULL,
                received_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Extracted signals
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pair TEXT NOT NULL,
                direction TEXT NOT NULL,
                entry TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                take_profit TEXT NOT NULL,
                stated_stop_loss TEXT,
                stated_take_profit TEXT,
                raw_message TEXT NOT NULL,
                channel TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Trades
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                signal_id INTEGER,
                pair TEXT NOT NULL,
                direction TEXT NOT NULL,
                leverage INTEGER NOT NULL,
                entry_price TEXT NOT NULL,
                entry_quantity TEXT,
                order_id TEXT,
                stop_loss TEXT NOT NULL,
                take_profit TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING',
                opened_at TEXT,
                closed_at TEXT,
                exit_price TEXT,
                pnl TEXT,
                pnl_percent TEXT,
                exit_reason TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (signal_id) REFERENCES signals(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Per-user settings
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_config (
                user_id INTEGER PRIMARY KEY,
                margin_mode TEXT NOT NULL,
                leverage INTEGER NOT NULL,
                position_size TEXT NOT NULL,
                sl_percentage TEXT NOT NULL,
                tp_percentage TEXT NOT NULL,
                auto_execute INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_user ON trades(user_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_signals_pair ON signals(pair)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Messages ====================

    /// Append a raw message to the audit log.
    pub async fn insert_raw_message(&self, sender: &str, text: &str) -> Result<()> {
        sqlx::query("INSERT INTO market_messages (sender, text) VALUES (?, ?)")
            .bind(sender)
            .bind(text)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== Signals ====================

    /// Persist an extracted signal. Returns the new signal id.
    pub async fn insert_signal(
        &self,
        parsed: &ParsedSignal,
        raw_message: &str,
        channel: &str,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO signals (
                pair, direction, entry, stop_loss, take_profit,
                stated_stop_loss, stated_take_profit, raw_message, channel
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&parsed.pair)
        .bind(parsed.direction.as_str())
        .bind(parsed.entry.to_string())
        .bind(parsed.stop_loss.to_string())
        .bind(parsed.take_profit.to_string())
        .bind(parsed.stated_stop_loss.map(|d| d.to_string()))
        .bind(parsed.stated_take_profit.map(|d| d.to_string()))
        .bind(raw_message)
        .bind(channel)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_signal(&self, id: i64) -> Result<Option<Signal>> {
        let row: Option<StoredSignal> =
            sqlx::query_as("SELECT * FROM signals WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(signal_from_row).transpose()
    }

    /// Most recent signals, newest first.
    pub async fn list_signals(&self, limit: i64) -> Result<Vec<Signal>> {
        let rows: Vec<StoredSignal> =
            sqlx::query_as("SELECT * FROM signals ORDER BY id DESC LIMIT ?")
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(signal_from_row).collect()
    }

    // ==================== Trades ====================

    /// Insert a trade record. Returns the new trade id.
    pub async fn insert_trade(&self, new: &NewTrade) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO trades (
                user_id, signal_id, pair, direction, leverage,
                entry_price, entry_quantity, order_id, stop_loss, take_profit,
                status, opened_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                CASE WHEN ? THEN datetime('now') ELSE NULL END)
            "#,
        )
        .bind(new.user_id)
        .bind(new.signal_id)
        .bind(&new.pair)
        .bind(new.direction.as_str())
        .bind(new.leverage as i64)
        .bind(new.entry_price.to_string())
        .bind(new.entry_quantity.map(|d| d.to_string()))
        .bind(new.order_id.as_deref())
        .bind(new.stop_loss.to_string())
        .bind(new.take_profit.to_string())
        .bind(new.status.as_str())
        .bind(new.opened)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_trade(&self, id: i64) -> Result<Option<Trade>> {
        let row: Option<StoredTrade> = sqlx::query_as("SELECT * FROM trades WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(trade_from_row).transpose()
    }

    /// Trades for a user, newest first, optionally filtered by status.
    pub async fn list_trades(
        &self,
        user_id: i64,
        status: Option<TradeStatus>,
        limit: i64,
    ) -> Result<Vec<Trade>> {
        let rows: Vec<StoredTrade> = match status {
            Some(status) => {
                sqlx::query_as(
                    "SELECT * FROM trades WHERE user_id = ? AND status = ? ORDER BY id DESC LIMIT ?",
                )
                .bind(user_id)
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM trades WHERE user_id = ? ORDER BY id DESC LIMIT ?")
                    .bind(user_id)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(trade_from_row).collect()
    }

    /// All trades currently marked OPEN for a user.
    pub async fn open_trades(&self, user_id: i64) -> Result<Vec<Trade>> {
        let rows: Vec<StoredTrade> =
            sqlx::query_as("SELECT * FROM trades WHERE user_id = ? AND status = 'OPEN'")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(trade_from_row).collect()
    }

    /// Close a trade record with its exit details.
    pub async fn close_trade_record(
        &self,
        id: i64,
        exit_price: Decimal,
        exit_reason: ExitReason,
        pnl: Option<Decimal>,
        pnl_percent: Decimal,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trades SET
                status = 'CLOSED',
                closed_at = datetime('now'),
                exit_price = ?,
                exit_reason = ?,
                pnl = ?,
                pnl_percent = ?
            WHERE id = ?
            "#,
        )
        .bind(exit_price.to_string())
        .bind(exit_reason.as_str())
        .bind(pnl.map(|d| d.to_string()))
        .bind(pnl_percent.to_string())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Sum of realized P&L across a user's closed trades.
    pub async fn total_pnl(&self, user_id: i64) -> Result<Decimal> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT pnl FROM trades WHERE user_id = ? AND status = 'CLOSED' AND pnl IS NOT NULL",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut total = Decimal::ZERO;
        for (pnl,) in rows {
            total += Decimal::from_str(&pnl).context("Malformed pnl value in trades table")?;
        }
        Ok(total)
    }

    // ==================== Settings ====================

    /// Fetch a user's settings, seeding them from the defaults on first use.
    pub async fn get_or_create_config(
        &self,
        user_id: i64,
        app: &AppConfig,
    ) -> Result<TradeConfig> {
        if let Some(row) = self.fetch_config(user_id).await? {
            return config_from_row(row);
        }
        let config = TradeConfig::defaults_for(user_id, app);
        self.save_config(&config).await?;
        Ok(config)
    }

    /// Apply a partial settings update, returning the new settings.
    pub async fn update_config(
        &self,
        user_id: i64,
        app: &AppConfig,
        update: &TradeConfigUpdate,
    ) -> Result<TradeConfig> {
        let current = self.get_or_create_config(user_id, app).await?;
        let updated = current.apply(update);
        self.save_config(&updated).await?;
        Ok(updated)
    }

    /// Reset a user's settings to the process defaults.
    pub async fn reset_config(&self, user_id: i64, app: &AppConfig) -> Result<TradeConfig> {
        let config = TradeConfig::defaults_for(user_id, app);
        self.save_config(&config).await?;
        Ok(config)
    }

    async fn fetch_config(&self, user_id: i64) -> Result<Option<StoredConfig>> {
        let row = sqlx::query_as("SELECT * FROM trade_config WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn save_config(&self, config: &TradeConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_config (
                user_id, margin_mode, leverage, position_size,
                sl_percentage, tp_percentage, auto_execute
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                margin_mode = excluded.margin_mode,
                leverage = excluded.leverage,
                position_size = excluded.position_size,
                sl_percentage = excluded.sl_percentage,
                tp_percentage = excluded.tp_percentage,
                auto_execute = excluded.auto_execute,
                updated_at = datetime('now')
            "#,
        )
        .bind(config.user_id)
        .bind(config.margin_mode.as_str())
        .bind(config.leverage as i64)
        .bind(config.position_size.to_string())
        .bind(config.sl_percentage.to_string())
        .bind(config.tp_percentage.to_string())
        .bind(config.auto_execute)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn parse_decimal(s: &str, column: &str) -> Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("Malformed decimal in column {column}"))
}

fn parse_opt_decimal(s: Option<&str>, column: &str) -> Result<Option<Decimal>> {
    s.map(|v| parse_decimal(v, column)).transpose()
}

/// SQLite `datetime('now')` timestamps are naive UTC.
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .with_context(|| format!("Malformed timestamp: {s}"))?;
    Ok(naive.and_utc())
}

fn signal_from_row(row: StoredSignal) -> Result<Signal> {
    Ok(Signal {
        id: row.id,
        direction: Direction::parse(&row.direction)
            .with_context(|| format!("Unknown direction: {}", row.direction))?,
        entry: parse_decimal(&row.entry, "entry")?,
        stop_loss: parse_decimal(&row.stop_loss, "stop_loss")?,
        take_profit: parse_decimal(&row.take_profit, "take_profit")?,
        stated_stop_loss: parse_opt_decimal(row.stated_stop_loss.as_deref(), "stated_stop_loss")?,
        stated_take_profit: parse_opt_decimal(
            row.stated_take_profit.as_deref(),
            "stated_take_profit",
        )?,
        pair: row.pair,
        raw_message: row.raw_message,
        channel: row.channel,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

fn trade_from_row(row: StoredTrade) -> Result<Trade> {
    Ok(Trade {
        id: row.id,
        user_id: row.user_id,
        signal_id: row.signal_id,
        direction: Direction::parse(&row.direction)
            .with_context(|| format!("Unknown direction: {}", row.direction))?,
        leverage: row.leverage.max(1) as u32,
        entry_price: parse_decimal(&row.entry_price, "entry_price")?,
        entry_quantity: parse_opt_decimal(row.entry_quantity.as_deref(), "entry_quantity")?,
        order_id: row.order_id,
        stop_loss: parse_decimal(&row.stop_loss, "stop_loss")?,
        take_profit: parse_decimal(&row.take_profit, "take_profit")?,
        status: TradeStatus::parse(&row.status)
            .with_context(|| format!("Unknown trade status: {}", row.status))?,
        opened_at: row.opened_at.as_deref().map(parse_timestamp).transpose()?,
        closed_at: row.closed_at.as_deref().map(parse_timestamp).transpose()?,
        exit_price: parse_opt_decimal(row.exit_price.as_deref(), "exit_price")?,
        pnl: parse_opt_decimal(row.pnl.as_deref(), "pnl")?,
        pnl_percent: parse_opt_decimal(row.pnl_percent.as_deref(), "pnl_percent")?,
        exit_reason: row
            .exit_reason
            .as_deref()
            .map(|r| {
                ExitReason::parse(r).with_context(|| format!("Unknown exit reason: {r}"))
            })
            .transpose()?,
        pair: row.pair,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

fn config_from_row(row: StoredConfig) -> Result<TradeConfig> {
    Ok(TradeConfig {
        user_id: row.user_id,
        margin_mode: MarginMode::parse(&row.margin_mode)
            .with_context(|| format!("Unknown margin mode: {}", row.margin_mode))?,
        leverage: row.leverage.max(1) as u32,
        position_size: parse_decimal(&row.position_size, "position_size")?,
        sl_percentage: parse_decimal(&row.sl_percentage, "sl_percentage")?,
        tp_percentage: parse_decimal(&row.tp_percentage, "tp_percentage")?,
        auto_execute: row.auto_execute,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tokio_test::assert_ok;

    /// Named shared-cache memory database, so every pool connection sees
    /// the same data.
    async fn test_db(name: &str) -> Database {
        let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
        Database::new(&url).await.expect("in-memory database")
    }

    fn test_app_config() -> AppConfig {
        AppConfig {
            api_key: "k".to_string(),
            api_secret: "s".to_string(),
            testnet: true,
            database_url: String::new(),
            default_leverage: 20,
            default_position_size: dec!(50),
            default_sl_percentage: dec!(5),
            default_tp_percentage: dec!(2.5),
            default_margin_mode: MarginMode::Crossed,
            auto_execute: true,
        }
    }

    fn sample_signal() -> ParsedSignal {
        ParsedSignal {
            pair: "BTCUSDT".to_string(),
            direction: Direction::Long,
            entry: dec!(42000),
            stop_loss: dec!(39900),
            take_profit: dec!(43050),
            stated_stop_loss: Some(dec!(41000)),
            stated_take_profit: None,
        }
    }

    fn sample_trade(status: TradeStatus, opened: bool) -> NewTrade {
        NewTrade {
            user_id: 1,
            signal_id: None,
            pair: "BTCUSDT".to_string(),
            direction: Direction::Long,
            leverage: 20,
            entry_price: dec!(42000),
            entry_quantity: Some(dec!(0.024)),
            order_id: Some("9001".to_string()),
            stop_loss: dec!(39900),
            take_profit: dec!(43050),
            status,
            opened,
        }
    }

    #[test]
    fn test_parse_timestamp_sqlite_format() {
        let ts = parse_timestamp("2024-03-01 12:30:45").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T12:30:45+00:00");
        assert!(parse_timestamp("not a date").is_err());
    }

    #[test]
    fn test_parse_decimal_rejects_garbage() {
        assert!(parse_decimal("42000.5", "entry").is_ok());
        assert!(parse_decimal("", "entry").is_err());
        assert!(parse_opt_decimal(None, "pnl").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_signal_roundtrip_preserves_decimals() {
        let db = test_db("signal_roundtrip").await;

        let id = db
            .insert_signal(&sample_signal(), "#BTCUSDT LONG\nEntry: 42000", "chan")
            .await
            .unwrap();

        let signal = db.get_signal(id).await.unwrap().expect("signal exists");
        assert_eq!(signal.pair, "BTCUSDT");
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.entry, dec!(42000));
        assert_eq!(signal.stop_loss, dec!(39900));
        assert_eq!(signal.take_profit, dec!(43050));
        assert_eq!(signal.stated_stop_loss, Some(dec!(41000)));
        assert_eq!(signal.stated_take_profit, None);
        assert_eq!(signal.channel, "chan");

        let listed = db.list_signals(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);

        assert!(db.get_signal(id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trade_lifecycle_open_then_close() {
        let db = test_db("trade_lifecycle").await;

        let trade_id = db
            .insert_trade(&sample_trade(TradeStatus::Open, true))
            .await
            .unwrap();

        let trade = db.get_trade(trade_id).await.unwrap().expect("trade exists");
        assert_eq!(trade.status, TradeStatus::Open);
        assert!(trade.opened_at.is_some());
        assert!(trade.closed_at.is_none());
        assert_eq!(trade.entry_quantity, Some(dec!(0.024)));

        assert_eq!(db.open_trades(1).await.unwrap().len(), 1);

        assert_ok!(
            db.close_trade_record(
                trade_id,
                dec!(43050),
                ExitReason::TpHit,
                Some(dec!(25.2)),
                dec!(2.5),
            )
            .await
        );

        let trade = db.get_trade(trade_id).await.unwrap().unwrap();
        assert_eq!(trade.status, TradeStatus::Closed);
        assert_eq!(trade.exit_reason, Some(ExitReason::TpHit));
        assert_eq!(trade.exit_price, Some(dec!(43050)));
        assert_eq!(trade.pnl, Some(dec!(25.2)));
        assert!(trade.closed_at.is_some());

        assert!(db.open_trades(1).await.unwrap().is_empty());
        assert_eq!(db.total_pnl(1).await.unwrap(), dec!(25.2));
    }

    #[tokio::test]
    async fn test_pending_trade_has_no_opened_at() {
        let db = test_db("pending_trade").await;

        let trade_id = db
            .insert_trade(&sample_trade(TradeStatus::Pending, false))
            .await
            .unwrap();

        let trade = db.get_trade(trade_id).await.unwrap().unwrap();
        assert_eq!(trade.status, TradeStatus::Pending);
        assert!(trade.opened_at.is_none());

        // PENDING trades are not reconciliation candidates.
        assert!(db.open_trades(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trade_listing_filters_by_status() {
        let db = test_db("trade_listing").await;

        db.insert_trade(&sample_trade(TradeStatus::Open, true))
            .await
            .unwrap();
        db.insert_trade(&sample_trade(TradeStatus::Pending, false))
            .await
            .unwrap();

        let all = db.list_trades(1, None, 10).await.unwrap();
        assert_eq!(all.len(), 2);

        let open = db
            .list_trades(1, Some(TradeStatus::Open), 10)
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].status, TradeStatus::Open);

        // Other users see nothing.
        assert!(db.list_trades(2, None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_config_seeds_updates_and_resets() {
        let db = test_db("config_lifecycle").await;
        let app = test_app_config();

        let config = db.get_or_create_config(7, &app).await.unwrap();
        assert_eq!(config.leverage, 20);
        assert_eq!(config.position_size, dec!(50));
        assert_eq!(config.margin_mode, MarginMode::Crossed);
        assert!(config.auto_execute);

        let updated = db
            .update_config(
                7,
                &app,
                &TradeConfigUpdate {
                    leverage: Some(10),
                    position_size: Some(dec!(25)),
                    auto_execute: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.leverage, 10);
        assert_eq!(updated.position_size, dec!(25));
        assert!(!updated.auto_execute);
        // Untouched fields keep their values.
        assert_eq!(updated.sl_percentage, dec!(5));

        // A fresh read sees the persisted update.
        let reread = db.get_or_create_config(7, &app).await.unwrap();
        assert_eq!(reread.leverage, 10);

        let reset = db.reset_config(7, &app).await.unwrap();
        assert_eq!(reset.leverage, 20);
        assert_eq!(reset.position_size, dec!(50));
    }

    #[tokio::test]
    async fn test_total_pnl_sums_only_closed_trades() {
        let db = test_db("total_pnl").await;

        for pnl in [dec!(10.5), dec!(-4.25)] {
            let id = db
                .insert_trade(&sample_trade(TradeStatus::Open, true))
                .await
                .unwrap();
            db.close_trade_record(id, dec!(42500), ExitReason::Manual, Some(pnl), Decimal::ZERO)
                .await
                .unwrap();
        }
        // One still-open trade must not count.
        db.insert_trade(&sample_trade(TradeStatus::Open, true))
            .await
            .unwrap();

        assert_eq!(db.total_pnl(1).await.unwrap(), dec!(6.25));
    }

    #[tokio::test]
    async fn test_raw_messages_are_appended() {
        let db = test_db("raw_messages").await;
        assert_ok!(db.insert_raw_message("chan", "gm").await);
        assert_ok!(db.insert_raw_message("chan", "#BTCUSDT LONG").await);
    }
}
