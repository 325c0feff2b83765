//! SQL for the ledger tables.
//!
//! Every function takes any Postgres executor, so the same statement runs on
//! the pool (auto-commit) or on an open transaction.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgExecutor};
use tracing::instrument;

use simplebank_common::{
    AccountId, Currency, Entity, EntryId, LedgerError, Result, TransferId,
};

use super::error::{map_insert_error, map_sqlx_error};
use crate::account::{Account, NewAccount};
use crate::entry::Entry;
use crate::store::{Page, StoreOp};
use crate::transfer::Transfer;

#[derive(Debug, FromRow)]
struct AccountRow {
    id: i64,
    owner: String,
    balance: i64,
    currency: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = LedgerError;

    fn try_from(row: AccountRow) -> Result<Self> {
        let currency: Currency = row.currency.parse().map_err(|e| {
            LedgerError::persistence("decode_account", format!("account {}: {e}", row.id))
        })?;
        Ok(Account {
            id: AccountId::new(row.id),
            owner: row.owner,
            balance: row.balance,
            currency,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct EntryRow {
    id: i64,
    account_id: i64,
    amount: i64,
    created_at: DateTime<Utc>,
}

impl From<EntryRow> for Entry {
    fn from(row: EntryRow) -> Self {
        Entry {
            id: EntryId::new(row.id),
            account_id: AccountId::new(row.account_id),
            amount: row.amount,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct TransferRow {
    id: i64,
    from_account_id: i64,
    to_account_id: i64,
    amount: i64,
    created_at: DateTime<Utc>,
}

impl From<TransferRow> for Transfer {
    fn from(row: TransferRow) -> Self {
        Transfer {
            id: TransferId::new(row.id),
            from_account_id: AccountId::new(row.from_account_id),
            to_account_id: AccountId::new(row.to_account_id),
            amount: row.amount,
            created_at: row.created_at,
        }
    }
}

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, created_at";
const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, created_at";

pub(crate) async fn create_account<'e, E>(executor: E, params: NewAccount) -> Result<Account>
where
    E: PgExecutor<'e>,
{
    params.validate()?;

    let sql = format!(
        "INSERT INTO accounts (owner, balance, currency) VALUES ($1, $2, $3) \
         RETURNING {ACCOUNT_COLUMNS}"
    );
    let row: AccountRow = sqlx::query_as(&sql)
        .bind(&params.owner)
        .bind(params.balance)
        .bind(params.currency.code())
        .fetch_one(executor)
        .await
        .map_err(|e| map_sqlx_error(StoreOp::CreateAccount, e))?;
    row.try_into()
}

pub(crate) async fn get_account<'e, E>(executor: E, id: AccountId) -> Result<Account>
where
    E: PgExecutor<'e>,
{
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 LIMIT 1");
    let row: Option<AccountRow> = sqlx::query_as(&sql)
        .bind(id.as_i64())
        .fetch_optional(executor)
        .await
        .map_err(|e| map_sqlx_error(StoreOp::GetAccount, e))?;
    row.ok_or_else(|| LedgerError::not_found(Entity::Account, id))?
        .try_into()
}

pub(crate) async fn list_accounts<'e, E>(executor: E, page: Page) -> Result<Vec<Account>>
where
    E: PgExecutor<'e>,
{
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id LIMIT $1 OFFSET $2");
    let rows: Vec<AccountRow> = sqlx::query_as(&sql)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(executor)
        .await
        .map_err(|e| map_sqlx_error(StoreOp::ListAccounts, e))?;
    rows.into_iter().map(Account::try_from).collect()
}

pub(crate) async fn delete_account<'e, E>(executor: E, id: AccountId) -> Result<()>
where
    E: PgExecutor<'e>,
{
    let done = sqlx::query("DELETE FROM accounts WHERE id = $1")
        .bind(id.as_i64())
        .execute(executor)
        .await
        .map_err(|e| map_sqlx_error(StoreOp::DeleteAccount, e))?;
    if done.rows_affected() == 0 {
        return Err(LedgerError::not_found(Entity::Account, id));
    }
    Ok(())
}

/// Add `delta` to the balance in place and return the updated row.
///
/// Takes the row lock when run inside a transaction.
#[instrument(level = "trace", skip(executor))]
pub(crate) async fn add_account_balance<'e, E>(
    executor: E,
    id: AccountId,
    delta: i64,
) -> Result<Account>
where
    E: PgExecutor<'e>,
{
    let sql = format!(
        "UPDATE accounts SET balance = balance + $2 WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
    );
    let row: Option<AccountRow> = sqlx::query_as(&sql)
        .bind(id.as_i64())
        .bind(delta)
        .fetch_optional(executor)
        .await
        .map_err(|e| map_sqlx_error(StoreOp::AddAccountBalance, e))?;
    row.ok_or_else(|| LedgerError::not_found(Entity::Account, id))?
        .try_into()
}

/// Whole milliseconds for a Postgres timeout setting, rounded up. Never `0`,
/// which would disable the timeout.
fn timeout_setting(remaining: Duration) -> String {
    let mut millis = remaining.as_millis();
    if remaining.subsec_nanos() % 1_000_000 != 0 {
        millis += 1;
    }
    format!("{}ms", millis.max(1))
}

/// Bound lock and statement waits for the rest of the current transaction.
#[instrument(level = "trace", skip(executor))]
pub(crate) async fn limit_waits<'e, E>(executor: E, remaining: Duration) -> Result<()>
where
    E: PgExecutor<'e>,
{
    let setting = timeout_setting(remaining);
    sqlx::query(
        "SELECT set_config('lock_timeout', $1, true), set_config('statement_timeout', $1, true)",
    )
    .bind(&setting)
    .execute(executor)
    .await
    .map_err(|e| map_sqlx_error(StoreOp::Begin, e))?;
    Ok(())
}

#[instrument(level = "trace", skip(executor))]
pub(crate) async fn create_transfer<'e, E>(
    executor: E,
    from: AccountId,
    to: AccountId,
    amount: i64,
) -> Result<Transfer>
where
    E: PgExecutor<'e>,
{
    let sql = format!(
        "INSERT INTO transfers (from_account_id, to_account_id, amount) VALUES ($1, $2, $3) \
         RETURNING {TRANSFER_COLUMNS}"
    );
    let row: TransferRow = sqlx::query_as(&sql)
        .bind(from.as_i64())
        .bind(to.as_i64())
        .bind(amount)
        .fetch_one(executor)
        .await
        .map_err(|e| {
            map_insert_error(
                StoreOp::CreateTransfer,
                e,
                &[
                    ("transfers_from_account_id_fkey", from),
                    ("transfers_to_account_id_fkey", to),
                ],
            )
        })?;
    Ok(row.into())
}

pub(crate) async fn get_transfer<'e, E>(executor: E, id: TransferId) -> Result<Transfer>
where
    E: PgExecutor<'e>,
{
    let sql = format!("SELECT {TRANSFER_COLUMNS} FROM transfers WHERE id = $1 LIMIT 1");
    let row: Option<TransferRow> = sqlx::query_as(&sql)
        .bind(id.as_i64())
        .fetch_optional(executor)
        .await
        .map_err(|e| map_sqlx_error(StoreOp::GetTransfer, e))?;
    row.map(Transfer::from)
        .ok_or_else(|| LedgerError::not_found(Entity::Transfer, id))
}

pub(crate) async fn list_transfers<'e, E>(
    executor: E,
    account: AccountId,
    page: Page,
) -> Result<Vec<Transfer>>
where
    E: PgExecutor<'e>,
{
    let sql = format!(
        "SELECT {TRANSFER_COLUMNS} FROM transfers \
         WHERE from_account_id = $1 OR to_account_id = $1 \
         ORDER BY id LIMIT $2 OFFSET $3"
    );
    let rows: Vec<TransferRow> = sqlx::query_as(&sql)
        .bind(account.as_i64())
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(executor)
        .await
        .map_err(|e| map_sqlx_error(StoreOp::ListTransfers, e))?;
    Ok(rows.into_iter().map(Transfer::from).collect())
}

#[instrument(level = "trace", skip(executor))]
pub(crate) async fn create_entry<'e, E>(executor: E, account: AccountId, amount: i64) -> Result<Entry>
where
    E: PgExecutor<'e>,
{
    let sql = format!(
        "INSERT INTO entries (account_id, amount) VALUES ($1, $2) RETURNING {ENTRY_COLUMNS}"
    );
    let row: EntryRow = sqlx::query_as(&sql)
        .bind(account.as_i64())
        .bind(amount)
        .fetch_one(executor)
        .await
        .map_err(|e| {
            map_insert_error(
                StoreOp::CreateEntry,
                e,
                &[("entries_account_id_fkey", account)],
            )
        })?;
    Ok(row.into())
}

pub(crate) async fn get_entry<'e, E>(executor: E, id: EntryId) -> Result<Entry>
where
    E: PgExecutor<'e>,
{
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = $1 LIMIT 1");
    let row: Option<EntryRow> = sqlx::query_as(&sql)
        .bind(id.as_i64())
        .fetch_optional(executor)
        .await
        .map_err(|e| map_sqlx_error(StoreOp::GetEntry, e))?;
    row.map(Entry::from)
        .ok_or_else(|| LedgerError::not_found(Entity::Entry, id))
}

pub(crate) async fn list_entries<'e, E>(
    executor: E,
    account: AccountId,
    page: Page,
) -> Result<Vec<Entry>>
where
    E: PgExecutor<'e>,
{
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM entries WHERE account_id = $1 \
         ORDER BY id LIMIT $2 OFFSET $3"
    );
    let rows: Vec<EntryRow> = sqlx::query_as(&sql)
        .bind(account.as_i64())
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(executor)
        .await
        .map_err(|e| map_sqlx_error(StoreOp::ListEntries, e))?;
    Ok(rows.into_iter().map(Entry::from).collect())
}
