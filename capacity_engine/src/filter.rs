use crate::metrics::StageMetrics;
use crate::models::{columns, Record};

/// One predicate of the filter chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFilter {
    /// Transformer count is numeric and positive.
    HasTransformers,
    /// Summer rating field is present and not zero.
    HasSummerRating,
    HasWinterRating,
    /// Reverse power field is present and not marked unavailable.
    HasReversePower,
}

impl RecordFilter {
    pub const CHAIN: [RecordFilter; 4] = [
        RecordFilter::HasTransformers,
        RecordFilter::HasSummerRating,
        RecordFilter::HasWinterRating,
        RecordFilter::HasReversePower,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RecordFilter::HasTransformers => "removed_no_transformers",
            RecordFilter::HasSummerRating => "removed_no_summer_rating",
            RecordFilter::HasWinterRating => "removed_no_winter_rating",
            RecordFilter::HasReversePower => "removed_no_reverse_power",
        }
    }

    pub fn keeps(&self, record: &Record) -> bool {
        match self {
            RecordFilter::HasTransformers => record
                .number(columns::TRANSFORMER_COUNT)
                .is_some_and(|n| n > 0.0),
            RecordFilter::HasSummerRating => has_rating(record, columns::RATING_SUMMER),
            RecordFilter::HasWinterRating => has_rating(record, columns::RATING_WINTER),
            RecordFilter::HasReversePower => match record.text(columns::REVERSE_POWER) {
                None => false,
                Some(value) => {
                    !value.is_empty()
                        && value != "nan"
                        && !value.to_lowercase().contains("not available")
                        && !value.contains("NA")
                }
            },
        }
    }
}

fn has_rating(record: &Record, column: &str) -> bool {
    record
        .text(column)
        .is_some_and(|v| !matches!(v.as_ref(), "" | "0" | "nan"))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterReport {
    pub rows_in: usize,
    /// Rows removed by each filter, in chain order.
    pub removed: Vec<(RecordFilter, usize)>,
}

impl FilterReport {
    pub fn rows_out(&self) -> usize {
        self.rows_in - self.removed.iter().map(|(_, n)| n).sum::<usize>()
    }

    pub fn record(&self, metrics: &mut StageMetrics) {
        for (filter, removed) in &self.removed {
            metrics.set(filter.name(), *removed);
        }
    }
}

/// Apply the filter chain in order. Surviving rows keep their relative order.
pub fn apply_filters(records: Vec<Record>) -> (Vec<Record>, FilterReport) {
    let mut report = FilterReport {
        rows_in: records.len(),
        removed: Vec::with_capacity(RecordFilter::CHAIN.len()),
    };

    let mut current = records;
    for filter in RecordFilter::CHAIN {
        let before = current.len();
        current.retain(|record| filter.keeps(record));
        let removed = before - current.len();
        log::info!("{}: {} rows removed, {} remain", filter.name(), removed, current.len());
        report.removed.push((filter, removed));
    }

    (current, report)
}
