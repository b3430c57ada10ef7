use crate::models::{columns, Record};
use crate::provenance::ColumnProvenance;

const ECR_COLUMNS: [&str; 4] = [
    columns::ECR_ABOVE_CONNECTED,
    columns::ECR_ABOVE_ACCEPTED,
    columns::ECR_BELOW_CONNECTED,
    columns::ECR_BELOW_ACCEPTED,
];

/// Generation totals per register tier and their sum.
pub fn apply_totals(records: &mut [Record], provenance: &mut ColumnProvenance) {
    for record in records.iter_mut() {
        let below = record.number_or_zero(columns::ECR_BELOW_CONNECTED)
            + record.number_or_zero(columns::ECR_BELOW_ACCEPTED);
        let above = record.number_or_zero(columns::ECR_ABOVE_CONNECTED)
            + record.number_or_zero(columns::ECR_ABOVE_ACCEPTED);
        record.set(columns::TOTAL_GEN_BELOW, below);
        record.set(columns::TOTAL_GEN_ABOVE, above);
        record.set(columns::TOTAL_ECR, below + above);
    }

    provenance.record_calculated(
        columns::TOTAL_GEN_BELOW,
        "Total generation capacity under 1MW",
        "ECR < 1MVA Already connected + ECR < 1MVA Accepted to connect",
    );
    provenance.record_calculated(
        columns::TOTAL_GEN_ABOVE,
        "Total generation capacity over 1MW",
        "ECR > 1MVA Already connected + ECR > 1MVA Accepted to connect",
    );
    provenance.record_calculated(
        columns::TOTAL_ECR,
        "Total ECR capacity",
        "Total Gen <1 (MW) + Total Gen >1 (MW)",
    );
}

/// Generation capacity left after every registered connection. May be negative.
pub fn apply_headroom(records: &mut [Record], provenance: &mut ColumnProvenance) {
    for record in records.iter_mut() {
        let registered: f64 = ECR_COLUMNS.iter().map(|c| record.number_or_zero(c)).sum();
        let headroom = record.number_or_zero(columns::GENERATION_CAPACITY) - registered;
        record.set(columns::GENERATION_HEADROOM, headroom);
    }

    provenance.record_calculated(
        columns::GENERATION_HEADROOM,
        "Generation headroom calculation",
        &format!("Generation_Capacity - ({})", ECR_COLUMNS.join(" + ")),
    );
}

pub fn deviation_percentage(installed: f64, total_below: f64, total_above: f64) -> f64 {
    if installed > 0.0 {
        (installed - total_below.max(total_above)).abs() / installed * 100.0
    } else {
        0.0
    }
}

/// Compare installed capacity with the larger generation total and flag
/// sites beyond `threshold_pct`.
pub fn apply_deviation(
    records: &mut [Record],
    threshold_pct: f64,
    provenance: &mut ColumnProvenance,
) -> usize {
    let mut flagged = 0;
    for record in records.iter_mut() {
        let pct = deviation_percentage(
            record.number_or_zero(columns::INSTALLED_CAPACITY),
            record.number_or_zero(columns::TOTAL_GEN_BELOW),
            record.number_or_zero(columns::TOTAL_GEN_ABOVE),
        );
        let flag = if pct > threshold_pct {
            flagged += 1;
            "Yes"
        } else {
            "No"
        };
        record.set(columns::DEVIATION_PERCENTAGE, pct);
        record.set(columns::DEVIATION, flag);
    }

    provenance.record_calculated(
        columns::DEVIATION_PERCENTAGE,
        "Percentage deviation between Installed Capacity MVA and Max Total Gen",
        "|installedcapacity_mva - MAX(Total Gen <1 (MW), Total Gen >1 (MW))| / installedcapacity_mva * 100",
    );
    provenance.record_calculated(
        columns::DEVIATION,
        &format!("Deviation flag (Yes if >{threshold_pct}%, No otherwise)"),
        &format!("Yes if Deviation_Percentage > {threshold_pct}%, else No"),
    );

    flagged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Value;

    fn ecr_site(gen: f64, values: [f64; 4]) -> Record {
        let mut record = Record::new().with(columns::GENERATION_CAPACITY, gen);
        for (column, value) in ECR_COLUMNS.iter().zip(values) {
            record.set(*column, value);
        }
        record
    }

    #[test]
    fn test_totals_and_headroom() {
        let mut provenance = ColumnProvenance::new();
        let mut records = vec![ecr_site(20.0, [5.0, 3.0, 1.0, 0.5])];
        apply_totals(&mut records, &mut provenance);
        apply_headroom(&mut records, &mut provenance);

        assert_eq!(records[0].number(columns::TOTAL_GEN_ABOVE), Some(8.0));
        assert_eq!(records[0].number(columns::TOTAL_GEN_BELOW), Some(1.5));
        assert_eq!(records[0].number(columns::TOTAL_ECR), Some(9.5));
        assert_eq!(records[0].number(columns::GENERATION_HEADROOM), Some(10.5));
    }

    #[test]
    fn test_headroom_can_go_negative() {
        let mut provenance = ColumnProvenance::new();
        let mut records = vec![ecr_site(2.0, [5.0, 0.0, 0.0, 0.0])];
        apply_headroom(&mut records, &mut provenance);
        assert_eq!(records[0].number(columns::GENERATION_HEADROOM), Some(-3.0));
    }

    #[test]
    fn test_deviation_flag() {
        assert_eq!(deviation_percentage(0.0, 3.0, 4.0), 0.0);
        assert_eq!(deviation_percentage(10.0, 3.0, 9.0), 10.0);

        let mut provenance = ColumnProvenance::new();
        let mut records = vec![
            Record::from_pairs([
                (columns::INSTALLED_CAPACITY, 10.0),
                (columns::TOTAL_GEN_BELOW, 3.0),
                (columns::TOTAL_GEN_ABOVE, 9.0),
            ]),
            Record::from_pairs([
                (columns::INSTALLED_CAPACITY, 10.0),
                (columns::TOTAL_GEN_BELOW, 0.0),
                (columns::TOTAL_GEN_ABOVE, 9.5),
            ]),
            Record::from_pairs([(columns::INSTALLED_CAPACITY, 0.0)]),
        ];
        let flagged = apply_deviation(&mut records, 5.0, &mut provenance);

        assert_eq!(flagged, 1);
        assert_eq!(records[0].get(columns::DEVIATION), &Value::from("Yes"));
        assert_eq!(records[1].get(columns::DEVIATION), &Value::from("No"));
        assert_eq!(records[2].get(columns::DEVIATION_PERCENTAGE), &Value::from(0.0));
        assert_eq!(records[2].get(columns::DEVIATION), &Value::from("No"));
    }
}
