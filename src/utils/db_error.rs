//! Helpers for classifying database errors.

use crate::domain::sharding::LINKS_TABLE;

/// True if `e` is a unique violation on the `code` column of any link partition.
pub fn is_unique_violation_on_code(e: &sqlx::Error) -> bool {
    let Some(db_err) = e.as_database_error() else {
        return false;
    };

    if !db_err.is_unique_violation() {
        return false;
    }

    db_err.constraint().is_some_and(|name| {
        name.strip_prefix(LINKS_TABLE)
            .and_then(|rest| rest.strip_prefix('_'))
            .and_then(|rest| rest.strip_suffix("_code_key"))
            .is_some_and(|index| index.parse::<u32>().is_ok())
    })
}
