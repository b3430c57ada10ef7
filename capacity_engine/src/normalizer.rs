//! Client-facing shape of the final table: internal columns hidden, columns
//! sorted A to Z, names made readable.

use crate::models::{columns, Record, Table};
use crate::provenance::ColumnProvenance;
use std::collections::HashSet;

/// Internal bookkeeping columns never written to the output.
pub const HIDDEN_COLUMNS: [&str; 3] = ["__hash", "__ingested_at", "id"];

const DISPLAY_NAMES: [(&str, &str); 36] = [
    ("installedcapacity_mva", "Installed Capacity MVA"),
    ("sitefunctionallocation", "Site Functional Location"),
    ("spatial_coordinates", "Spatial Coordinates"),
    ("local_authority", "Local Authority"),
    ("local_authority_code", "Local Authority Code"),
    ("postcode", "Postcode"),
    ("street", "Street"),
    ("suburb", "Suburb"),
    ("towncity", "Town City"),
    ("county", "County"),
    ("sitename", "Site Name"),
    ("sitetype", "Site Type"),
    ("sitevoltage", "Site Voltage"),
    ("siteclassification", "Site Classification"),
    ("siteassetcount", "Site Asset Count"),
    ("civilassetcount", "Civil Asset Count"),
    ("electricalassetcount", "Electrical Asset Count"),
    ("powertransformercount", "Power Transformer Count"),
    ("datecommissioned", "Date Commissioned"),
    ("yearcommissioned", "Year Commissioned"),
    ("assessmentdate", "Assessment Date"),
    ("next_assessmentdate", "Next Assessment Date"),
    ("last_report", "Last Report"),
    ("maxdemandsummer", "Max Demand Summer"),
    ("maxdemandwinter", "Max Demand Winter"),
    ("transratingsummer", "Transformer Rating Summer"),
    ("transratingwinter", "Transformer Rating Winter"),
    ("reversepower", "Reverse Power"),
    ("gridref", "Grid Reference"),
    ("easting", "Easting"),
    ("northing", "Northing"),
    ("licencearea", "Licence Area"),
    ("calculatedresistance", "Calculated Resistance"),
    ("measuredresistance_ohm", "Measured Resistance (Ohm)"),
    ("esqcroverallrisk", "ESQCR Overall Risk"),
    ("what3words", "What3Words"),
];

/// First character upper case, the rest lower case.
fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Readable name for an output column.
pub fn display_name(column: &str) -> String {
    if let Some((_, name)) = DISPLAY_NAMES.iter().find(|(raw, _)| *raw == column) {
        return name.to_string();
    }

    if column.starts_with("Trans") && (column.contains("_Summer") || column.contains("_Winter")) {
        if let Some((position, season)) = column.split_once('_').filter(|(_, s)| !s.contains('_')) {
            return format!("{} {}", position.replace("Trans", "Transformer "), season);
        }
    }

    if column.contains("ECR") && (column.contains('<') || column.contains('>')) {
        return column.to_string();
    }

    if column.contains('_') {
        return column.split('_').map(capitalize).collect::<Vec<_>>().join(" ");
    }

    capitalize(column)
}

#[derive(Debug, Clone)]
pub struct OutputNormalizer {
    hidden: Vec<String>,
}

impl Default for OutputNormalizer {
    fn default() -> Self {
        Self {
            hidden: HIDDEN_COLUMNS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl OutputNormalizer {
    pub fn with_hidden(hidden: Vec<String>) -> Self {
        Self { hidden }
    }

    /// Build the output table. Columns are ordered by their raw names, then
    /// renamed. A display name already taken by an earlier column leaves the
    /// later column under its raw name.
    pub fn normalize(&self, records: &[Record], provenance: &mut ColumnProvenance) -> Table {
        let mut table = Table::from_records(records);

        let keep: Vec<usize> = table
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !self.hidden.contains(*c))
            .map(|(idx, _)| idx)
            .collect();
        let hidden = table.columns.len() - keep.len();
        if hidden > 0 {
            table.columns = keep.iter().map(|&idx| table.columns[idx].clone()).collect();
            for row in table.rows.iter_mut() {
                let kept = keep.iter().map(|&idx| std::mem::take(&mut row[idx])).collect();
                *row = kept;
            }
        }

        let names: Vec<String> = table.columns.iter().map(|c| display_name(c)).collect();
        let mut taken: HashSet<String> = table
            .columns
            .iter()
            .zip(&names)
            .filter(|(raw, name)| raw == name)
            .map(|(raw, _)| raw.clone())
            .collect();
        let mut renamed = 0;
        for (column, name) in table.columns.iter_mut().zip(names) {
            if name == *column {
                continue;
            }
            if !taken.insert(name.clone()) {
                log::warn!("display name '{}' for '{}' already used, keeping raw name", name, column);
                continue;
            }
            log::debug!("renamed '{}' -> '{}'", column, name);
            provenance.record_renamed(&name, column);
            *column = name;
            renamed += 1;
        }

        log::info!(
            "normalized output: {} columns, {} renamed, {} hidden",
            table.width(),
            renamed,
            hidden
        );
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Value;

    #[test]
    fn test_display_names() {
        assert_eq!(display_name("sitename"), "Site Name");
        assert_eq!(display_name("measuredresistance_ohm"), "Measured Resistance (Ohm)");
        assert_eq!(display_name("Trans2_Winter"), "Transformer 2 Winter");
        assert_eq!(display_name("ECR > 1MVA Already connected"), "ECR > 1MVA Already connected");
        assert_eq!(display_name("Generation_Headroom_MW"), "Generation Headroom Mw");
        assert_eq!(display_name("Connectivity_Voltage(kV)"), "Connectivity Voltage(kv)");
        assert_eq!(display_name("Grid Supply Point"), "Grid supply point");
        assert_eq!(display_name("Total Gen <1 (MW)"), "Total gen <1 (mw)");
        assert_eq!(display_name("Deviation"), "Deviation");
    }

    #[test]
    fn test_normalize_hides_sorts_and_renames() {
        let records = vec![Record::from_pairs([
            (columns::SITE_ID, Value::from("S1")),
            ("sitename", Value::from("BURWELL")),
            ("Firm_Capacity", Value::from(10.0)),
            ("__hash", Value::from("x")),
        ])];
        let mut provenance = ColumnProvenance::new();
        let table = OutputNormalizer::default().normalize(&records, &mut provenance);

        assert_eq!(
            table.columns,
            vec!["Firm Capacity", "Site Functional Location", "Site Name"]
        );
        assert_eq!(
            table.rows[0],
            vec![Value::from(10.0), Value::from("S1"), Value::from("BURWELL")]
        );
        assert_eq!(provenance.renamed_from("Site Name"), Some("sitename"));
        assert_eq!(
            provenance.renamed_from("Site Functional Location"),
            Some(columns::SITE_ID)
        );
    }

    #[test]
    fn test_site_key_survives_duplicate_names() {
        let records = vec![
            Record::from_pairs([(columns::SITE_ID, "S1"), ("sitename", "BURWELL")]),
            Record::from_pairs([(columns::SITE_ID, "S2"), ("sitename", "BURWELL")]),
        ];
        let mut provenance = ColumnProvenance::new();
        let table = OutputNormalizer::default().normalize(&records, &mut provenance);

        let key = table.column_index("Site Functional Location").unwrap();
        assert_eq!(table.rows[0][key], Value::from("S1"));
        assert_eq!(table.rows[1][key], Value::from("S2"));
        assert_ne!(table.rows[0], table.rows[1]);
    }

    #[test]
    fn test_colliding_display_names_keep_raw() {
        let records = vec![Record::from_pairs([("Deviation", 1.0), ("deviation", 2.0)])];
        let mut provenance = ColumnProvenance::new();
        let table = OutputNormalizer::default().normalize(&records, &mut provenance);
        assert_eq!(table.columns, vec!["Deviation", "deviation"]);
        assert!(provenance.renamed_from("Deviation").is_none());
    }
}
