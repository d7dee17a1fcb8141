/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The fixed registry of synchronized tables. The declaration order of
//! [`TIER_ORDER`] *is* the sync schedule: a table only ever references tables
//! that appear before it, so walking uploads and downloads in this order
//! satisfies foreign keys within a single device's data.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SyncTable {
    Users,
    Customers,
    Items,
    Jobs,
    Payments,
    LedgerEntries,
    AuditLog,
}

/// Every synchronized table, tier-ascending. Ties within a tier keep
/// declaration order.
pub const TIER_ORDER: [SyncTable; 7] = [
    SyncTable::Users,
    SyncTable::Customers,
    SyncTable::Items,
    SyncTable::Jobs,
    SyncTable::Payments,
    SyncTable::LedgerEntries,
    SyncTable::AuditLog,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    /// Milliseconds in storage, RFC-3339 string on the wire.
    Timestamp,
    /// Integer cents in storage, 2-decimal JSON number on the wire.
    Amount,
    /// Stored as serialized JSON text.
    Json,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub required: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ForeignRef {
    pub field: &'static str,
    pub references: SyncTable,
}

const fn col(name: &'static str, kind: ColumnKind, required: bool) -> Column {
    Column {
        name,
        kind,
        required,
    }
}

// Every synchronized row carries these; they lead each column list so the
// generated SQL reads the same way everywhere.
const ID: Column = col("id", ColumnKind::Text, true);
const DEVICE_ID: Column = col("device_id", ColumnKind::Text, true);
const CREATED_AT: Column = col("created_at", ColumnKind::Timestamp, true);
const UPDATED_AT: Column = col("updated_at", ColumnKind::Timestamp, true);

const USER_COLS: &[Column] = &[
    ID,
    DEVICE_ID,
    col("username", ColumnKind::Text, true),
    col("display_name", ColumnKind::Text, false),
    col("role", ColumnKind::Text, true),
    CREATED_AT,
    UPDATED_AT,
];

const CUSTOMER_COLS: &[Column] = &[
    ID,
    DEVICE_ID,
    col("name", ColumnKind::Text, true),
    col("phone", ColumnKind::Text, false),
    col("email", ColumnKind::Text, false),
    col("address", ColumnKind::Text, false),
    col("opening_balance", ColumnKind::Amount, false),
    col("outstanding_balance", ColumnKind::Amount, false),
    CREATED_AT,
    UPDATED_AT,
];

const ITEM_COLS: &[Column] = &[
    ID,
    DEVICE_ID,
    col("name", ColumnKind::Text, true),
    col("sku", ColumnKind::Text, false),
    col("unit_price", ColumnKind::Amount, true),
    col("stock_qty", ColumnKind::Integer, false),
    CREATED_AT,
    UPDATED_AT,
];

const JOB_COLS: &[Column] = &[
    ID,
    DEVICE_ID,
    col("customer_id", ColumnKind::Text, true),
    col("item_id", ColumnKind::Text, true),
    col("description", ColumnKind::Text, false),
    col("quantity", ColumnKind::Integer, true),
    col("unit_price", ColumnKind::Amount, true),
    col("total_amount", ColumnKind::Amount, true),
    col("paid_amount", ColumnKind::Amount, true),
    col("job_status", ColumnKind::Text, true),
    CREATED_AT,
    UPDATED_AT,
];

const PAYMENT_COLS: &[Column] = &[
    ID,
    DEVICE_ID,
    col("customer_id", ColumnKind::Text, true),
    col("job_id", ColumnKind::Text, false),
    col("amount", ColumnKind::Amount, true),
    col("method", ColumnKind::Text, true),
    col("note", ColumnKind::Text, false),
    CREATED_AT,
    UPDATED_AT,
];

const LEDGER_COLS: &[Column] = &[
    ID,
    DEVICE_ID,
    col("entry_type", ColumnKind::Text, true),
    col("reference_type", ColumnKind::Text, false),
    col("reference_id", ColumnKind::Text, false),
    col("customer_id", ColumnKind::Text, false),
    col("debit", ColumnKind::Amount, true),
    col("credit", ColumnKind::Amount, true),
    col("balance", ColumnKind::Amount, true),
    col("note", ColumnKind::Text, false),
    CREATED_AT,
    UPDATED_AT,
];

const AUDIT_COLS: &[Column] = &[
    ID,
    DEVICE_ID,
    col("entity_type", ColumnKind::Text, true),
    col("entity_id", ColumnKind::Text, true),
    col("action", ColumnKind::Text, true),
    col("details", ColumnKind::Json, false),
    CREATED_AT,
    UPDATED_AT,
];

const JOB_REFS: &[ForeignRef] = &[
    ForeignRef {
        field: "customer_id",
        references: SyncTable::Customers,
    },
    ForeignRef {
        field: "item_id",
        references: SyncTable::Items,
    },
];

const PAYMENT_REFS: &[ForeignRef] = &[
    ForeignRef {
        field: "customer_id",
        references: SyncTable::Customers,
    },
    ForeignRef {
        field: "job_id",
        references: SyncTable::Jobs,
    },
];

const LEDGER_REFS: &[ForeignRef] = &[ForeignRef {
    field: "customer_id",
    references: SyncTable::Customers,
}];

impl SyncTable {
    pub fn name(self) -> &'static str {
        match self {
            SyncTable::Users => "users",
            SyncTable::Customers => "customers",
            SyncTable::Items => "items",
            SyncTable::Jobs => "jobs",
            SyncTable::Payments => "payments",
            SyncTable::LedgerEntries => "ledger_entries",
            SyncTable::AuditLog => "audit_log",
        }
    }

    pub fn from_name(name: &str) -> Option<SyncTable> {
        TIER_ORDER.iter().copied().find(|t| t.name() == name)
    }

    pub fn tier(self) -> u8 {
        match self {
            SyncTable::Users | SyncTable::Customers | SyncTable::Items => 1,
            SyncTable::Jobs => 2,
            SyncTable::Payments => 3,
            SyncTable::LedgerEntries => 4,
            SyncTable::AuditLog => 5,
        }
    }

    /// Append-only tables reject updates and deletes outright; the server
    /// ingests them with `DO NOTHING` conflict handling.
    pub fn is_append_only(self) -> bool {
        matches!(self, SyncTable::LedgerEntries | SyncTable::AuditLog)
    }

    /// The wire-visible columns, in declaration order. The local-only
    /// `sync_status` and the server-only `server_updated_at` are deliberately
    /// absent.
    pub fn columns(self) -> &'static [Column] {
        match self {
            SyncTable::Users => USER_COLS,
            SyncTable::Customers => CUSTOMER_COLS,
            SyncTable::Items => ITEM_COLS,
            SyncTable::Jobs => JOB_COLS,
            SyncTable::Payments => PAYMENT_COLS,
            SyncTable::LedgerEntries => LEDGER_COLS,
            SyncTable::AuditLog => AUDIT_COLS,
        }
    }

    pub fn column(self, name: &str) -> Option<&'static Column> {
        self.columns().iter().find(|c| c.name == name)
    }

    /// `field -> referenced table`, used by the dependency queue and by the
    /// server's referential checks. The audit log's references are textual
    /// only (`entity_type`/`entity_id`), so it declares none.
    pub fn foreign_refs(self) -> &'static [ForeignRef] {
        match self {
            SyncTable::Jobs => JOB_REFS,
            SyncTable::Payments => PAYMENT_REFS,
            SyncTable::LedgerEntries => LEDGER_REFS,
            _ => &[],
        }
    }
}

impl fmt::Display for SyncTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_names() {
        for table in TIER_ORDER {
            assert_eq!(SyncTable::from_name(table.name()), Some(table));
        }
        assert_eq!(SyncTable::from_name("nope"), None);
    }

    #[test]
    fn test_tier_order_is_topological() {
        // Every referenced table must sit strictly earlier in a lower tier.
        for (idx, table) in TIER_ORDER.iter().enumerate() {
            for fref in table.foreign_refs() {
                let ref_idx = TIER_ORDER
                    .iter()
                    .position(|t| *t == fref.references)
                    .unwrap();
                assert!(ref_idx < idx, "{} -> {}", table, fref.references);
                assert!(fref.references.tier() < table.tier());
            }
        }
    }

    #[test]
    fn test_metadata_columns_everywhere() {
        for table in TIER_ORDER {
            for name in ["id", "device_id", "created_at", "updated_at"] {
                let column = table.column(name).unwrap_or_else(|| {
                    panic!("{} missing metadata column {}", table, name);
                });
                assert!(column.required);
            }
            assert!(table.column("sync_status").is_none());
            assert!(table.column("server_updated_at").is_none());
        }
    }

    #[test]
    fn test_foreign_ref_fields_are_columns() {
        for table in TIER_ORDER {
            for fref in table.foreign_refs() {
                assert!(
                    table.column(fref.field).is_some(),
                    "{}.{} not a column",
                    table,
                    fref.field
                );
            }
        }
    }
}
