//! Mapping of sqlx errors onto [`LedgerError`].
//!
//! | sqlx error | SQLSTATE | LedgerError |
//! |------------|----------|-------------|
//! | Database, foreign key violation on insert | `23503` | `NotFound(account)` |
//! | Database, lock or statement timeout | `55P03`, `57014` | `DeadlineExceeded` |
//! | Database, anything else | reported code | `Persistence` with the code |
//! | PoolTimedOut / PoolClosed | `08000` | `Persistence` |
//! | Io / Tls | `08006` | `Persistence` |
//! | Other | none | `Persistence` |

use simplebank_common::{AccountId, Entity, LedgerError};

use crate::store::StoreOp;

const FOREIGN_KEY_VIOLATION: &str = "23503";
const CONNECTION_EXCEPTION: &str = "08000";
const CONNECTION_FAILURE: &str = "08006";
const LOCK_NOT_AVAILABLE: &str = "55P03";
const QUERY_CANCELED: &str = "57014";

fn persistence(op: StoreOp, message: String, code: Option<&str>) -> LedgerError {
    LedgerError::Persistence {
        operation: op.to_string(),
        message,
        code: code.map(str::to_string),
    }
}

pub(crate) fn map_sqlx_error(op: StoreOp, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.into_owned());
            match code.as_deref() {
                // Raised by the timeouts `limit_waits` sets from the deadline.
                Some(LOCK_NOT_AVAILABLE | QUERY_CANCELED) => LedgerError::DeadlineExceeded {
                    operation: op.to_string(),
                },
                _ => persistence(op, db_err.message().to_string(), code.as_deref()),
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            persistence(op, err.to_string(), Some(CONNECTION_EXCEPTION))
        }
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            persistence(op, err.to_string(), Some(CONNECTION_FAILURE))
        }
        _ => persistence(op, err.to_string(), None),
    }
}

/// Map an insert error, turning a foreign key violation into `NotFound` for
/// the account behind the violated constraint.
///
/// `references` pairs each constraint name with the account id it checks.
pub(crate) fn map_insert_error(
    op: StoreOp,
    err: sqlx::Error,
    references: &[(&str, AccountId)],
) -> LedgerError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) {
            let by_constraint = db_err
                .constraint()
                .and_then(|name| references.iter().find(|(c, _)| *c == name));
            let missing = match (by_constraint, references) {
                (Some((_, id)), _) => Some(*id),
                (None, [(_, id)]) => Some(*id),
                _ => None,
            };
            if let Some(id) = missing {
                return LedgerError::not_found(Entity::Account, id);
            }
        }
    }
    map_sqlx_error(op, err)
}
