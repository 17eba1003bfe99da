use super::LedgerError;
use rusqlite::{Connection, Transaction};
use tracing::debug;

pub(crate) const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Bring the schema up to [`CURRENT_SCHEMA_VERSION`] in one transaction.
pub(crate) fn run_migrations(conn: &mut Connection) -> Result<(), LedgerError> {
    let mut version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(LedgerError::UnsupportedSchema {
            found: version,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }
    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        apply_migration(&tx, next)?;
        debug!("Ledger schema migrated to v{}", next);
        version = next;
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<(), LedgerError> {
    match version {
        1 => tx.execute_batch(include_str!("schemas/schema_v1.sql"))?,
        other => {
            return Err(LedgerError::UnsupportedSchema {
                found: other,
                supported: CURRENT_SCHEMA_VERSION,
            })
        }
    }
    Ok(())
}
