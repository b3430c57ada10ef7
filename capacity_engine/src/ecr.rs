//! Embedded capacity register aggregation.
//!
//! Both register tables (at least 1MVA and under 1MVA) carry one row per
//! connection. Rows are summed per site, with the connection status deciding
//! which of the two capacity sums a row feeds.

use crate::models::{columns, OrderedGroups, Record, Value};
use crate::provenance::ColumnProvenance;

/// Source columns the status-aware sums read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcrColumns {
    pub status: &'static str,
    pub connected: &'static str,
    pub accepted: &'static str,
}

pub const REGISTER_COLUMNS: EcrColumns = EcrColumns {
    status: "connection_status",
    connected: "already_connected_registered_capacity_mw",
    accepted: "accepted_to_connect_registered_capacity_mw",
};

/// A blank status feeds both sums.
pub fn counts_as_connected(status: &str) -> bool {
    status.is_empty() || status.to_lowercase().contains("connected")
}

pub fn counts_as_accepted(status: &str) -> bool {
    status.is_empty() || status.to_lowercase().contains("accepted to connect")
}

/// Per-site sums plus the first row seen for the site.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedEcr {
    pub site_id: String,
    pub connected: f64,
    pub accepted: f64,
    pub first_row: Record,
}

impl AggregatedEcr {
    /// The first row with its capacity columns replaced by the sums.
    pub fn into_payload(self, cols: &EcrColumns) -> Record {
        self.first_row
            .with(cols.connected, self.connected)
            .with(cols.accepted, self.accepted)
    }
}

/// Group register rows by `key`, in first-seen order. Rows with a blank key
/// are dropped. Capacities that do not parse count as zero.
pub fn aggregate(rows: &[Record], key: &str, cols: &EcrColumns) -> Vec<AggregatedEcr> {
    let mut groups: OrderedGroups<AggregatedEcr> = OrderedGroups::default();

    for row in rows {
        let Some(site_id) = row.text(key).filter(|k| !k.trim().is_empty()) else {
            continue;
        };
        let status = row
            .text(cols.status)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        let connected = row.number_or_zero(cols.connected);
        let accepted = row.number_or_zero(cols.accepted);

        let entry = groups.entry_or_insert_with(&site_id, || AggregatedEcr {
            site_id: site_id.to_string(),
            connected: 0.0,
            accepted: 0.0,
            first_row: row.clone(),
        });
        if counts_as_connected(&status) {
            entry.connected += connected;
        }
        if counts_as_accepted(&status) {
            entry.accepted += accepted;
        }
    }

    groups.into_values()
}

/// Fold the under-1MW supply point labels into the main columns: the at
/// least 1MVA label wins when present, otherwise the under-1MW label,
/// otherwise null. The helper columns are dropped.
pub fn consolidate_supply_points(records: &mut [Record], provenance: &mut ColumnProvenance) {
    let pairs = [
        (columns::GRID_SUPPLY_POINT, columns::GRID_SUPPLY_POINT_BELOW),
        (columns::BULK_SUPPLY_POINT, columns::BULK_SUPPLY_POINT_BELOW),
    ];

    for record in records.iter_mut() {
        for (main, below) in pairs {
            let below_value = record.remove(below);
            let chosen = if !record.get(main).is_blank() {
                record.get(main).clone()
            } else if !below_value.is_blank() {
                below_value
            } else {
                Value::Null
            };
            record.set(main, chosen);
        }
    }

    for (main, below) in pairs {
        provenance.record_calculated(
            main,
            "Supply point label from the registers, preferring the at least 1MVA register",
            &format!("{main} if present, else {below}, else NULL"),
        );
    }
}
