//! Converging a live table toward a desired definition.

use tracing::debug;

use crate::adapter::SqlAdapter;
use crate::core::Table;
use crate::error::Result;

/// Patch that converges `live` toward `desired`. See [`Table::diff`].
pub fn reconcile(live: &Table, desired: &Table) -> Table {
    live.diff(desired)
}

/// Apply `patch` to `live`: create the table when it does not exist yet,
/// otherwise alter it. Returns the converged table.
pub async fn apply<A: SqlAdapter>(
    adapter: &A,
    conn: &mut A::Conn,
    live: &Table,
    patch: &Table,
) -> Result<Table> {
    if !patch.exists() {
        return Ok(live.clone());
    }
    if !live.exists() {
        let mut table = patch.clone();
        table.delete_pk_fields = false;
        adapter.create_table(conn, &table).await?;
        debug!(
            "Created table {}.{} with {} columns",
            table.schema,
            table.name,
            table.columns.len()
        );
        return Ok(table);
    }
    adapter.patch_table_schema(conn, patch).await?;
    debug!(
        "Patched table {}.{}: {} new columns, primary key change: {}",
        live.schema,
        live.name,
        patch.columns.len(),
        patch.delete_pk_fields || !patch.pk_fields.is_empty()
    );
    Ok(live.apply_patch(patch))
}

/// Read the live table, diff it against `desired` and apply the patch.
pub async fn ensure_table<A: SqlAdapter>(
    adapter: &A,
    conn: &mut A::Conn,
    desired: &Table,
) -> Result<Table> {
    let live = adapter.get_table_schema(conn, &desired.name).await?;
    let patch = reconcile(&live, desired);
    apply(adapter, conn, &live, &patch).await
}
