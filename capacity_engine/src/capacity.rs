use crate::models::{columns, Record, Season};
use crate::provenance::ColumnProvenance;
use regex::Regex;
use std::sync::LazyLock;

static MVA_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d.]+)\s*mva").expect("valid MVA pattern"));
static PERCENT_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d.]+)\s*%").expect("valid percent pattern"));

/// Ratings parsed from one seasonal rating field.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SeasonRatings {
    /// One slot per transformer, in source position, null when missing.
    pub positions: Vec<Option<f64>>,
    /// Valid ratings truncated to the transformer count. Every seasonal
    /// calculation reads this list.
    pub usable: Vec<f64>,
}

/// Parse a comma-separated rating field for `count` transformers.
pub fn parse_ratings(raw: Option<&str>, count: usize) -> SeasonRatings {
    let parsed: Vec<Option<f64>> = match raw {
        Some(raw) => raw.split(',').map(parse_rating_token).collect(),
        None => Vec::new(),
    };

    let positions = (0..count)
        .map(|i| parsed.get(i).copied().flatten())
        .collect();
    let usable = parsed.iter().flatten().copied().take(count).collect();

    SeasonRatings { positions, usable }
}

fn parse_rating_token(token: &str) -> Option<f64> {
    let token = token.trim();
    if token.is_empty() || token.eq_ignore_ascii_case("null") {
        return None;
    }
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Sum of the plain numeric tokens of a demand field, 0.0 when none parse.
pub fn parse_demand(raw: Option<&str>) -> f64 {
    let Some(raw) = raw else {
        return 0.0;
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return 0.0;
    }

    if raw.contains(',') {
        raw.split(',')
            .map(str::trim)
            .filter(|token| is_plain_number(token))
            .filter_map(|token| token.parse::<f64>().ok())
            .sum()
    } else if is_plain_number(raw) {
        raw.parse::<f64>().unwrap_or(0.0)
    } else {
        0.0
    }
}

/// Digits with at most one `.` and one `-` anywhere in the token.
fn is_plain_number(token: &str) -> bool {
    let stripped = token.replacen('.', "", 1).replacen('-', "", 1);
    !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit())
}

/// Two decimals, halves to even.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

fn n_minus_one(ratings: &[f64]) -> f64 {
    let total: f64 = ratings.iter().sum();
    let largest = ratings.iter().copied().fold(None, |acc: Option<f64>, r| {
        Some(acc.map_or(r, |a| a.max(r)))
    });
    total - largest.unwrap_or(0.0)
}

/// Seasonal spare capacity: headroom left after demand with the largest
/// transformer out of service, de-rated by `multiplier`.
pub fn spare_capacity(ratings: &[f64], demand: f64, multiplier: f64) -> f64 {
    let available = match ratings {
        [single] => *single,
        _ => n_minus_one(ratings),
    };
    round2((available - demand) * multiplier)
}

/// The four readings of the free-text reverse power field.
#[derive(Debug, Clone, PartialEq)]
pub enum ReversePower {
    Missing,
    /// Exactly `100%`.
    Full,
    /// `<100%` and similar.
    BelowFull,
    /// Smallest of the stated MVA limits.
    MvaLimit(f64),
    Percentage(f64),
    Unrecognised,
}

impl ReversePower {
    pub fn classify(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return ReversePower::Missing;
        };
        let value = raw.trim().to_lowercase();
        if value.is_empty() {
            return ReversePower::Missing;
        }

        if value == "100%" {
            return ReversePower::Full;
        }
        if value.contains('<') && value.contains('%') {
            return ReversePower::BelowFull;
        }
        if value.contains("mva") {
            let limits: Vec<&str> = MVA_VALUE
                .captures_iter(&value)
                .filter_map(|c| c.get(1).map(|m| m.as_str()))
                .collect();
            if !limits.is_empty() {
                let parsed: Option<Vec<f64>> =
                    limits.iter().map(|v| v.parse::<f64>().ok()).collect();
                return match parsed {
                    Some(values) => ReversePower::MvaLimit(
                        values.into_iter().fold(f64::INFINITY, f64::min),
                    ),
                    None => ReversePower::Unrecognised,
                };
            }
        }
        if value.contains('%') {
            return PERCENT_VALUE
                .captures(&value)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<f64>().ok())
                .map(ReversePower::Percentage)
                .unwrap_or(ReversePower::Unrecognised);
        }
        ReversePower::Unrecognised
    }

    /// Generation capacity this reading allows against the first transformer.
    pub fn capacity(&self, ratings: &[f64]) -> f64 {
        let first = ratings.first().copied().unwrap_or(0.0);
        match self {
            ReversePower::Full => first,
            ReversePower::BelowFull => first / 2.0,
            ReversePower::MvaLimit(limit) => *limit,
            ReversePower::Percentage(pct) => first * (pct / 100.0),
            ReversePower::Missing | ReversePower::Unrecognised => 0.0,
        }
    }
}

pub fn calculate_generation_capacity(reverse_power: Option<&str>, ratings: &[f64]) -> f64 {
    ReversePower::classify(reverse_power).capacity(ratings)
}

fn firm_for_season(ratings: &[f64], multiplier: f64) -> Option<f64> {
    match ratings.len() {
        0 => None,
        1 => Some(ratings[0] * multiplier),
        _ => Some(n_minus_one(ratings) * multiplier),
    }
}

/// Firm capacity is the lower of the seasonal de-rated N-1 capacities; a
/// season without ratings makes it zero.
pub fn firm_capacity(summer: &[f64], winter: &[f64], multiplier: f64) -> f64 {
    match (
        firm_for_season(summer, multiplier),
        firm_for_season(winter, multiplier),
    ) {
        (Some(s), Some(w)) => round2(s.min(w)),
        _ => 0.0,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapacityMetrics {
    pub spare_summer: f64,
    pub spare_winter: f64,
    pub generation_capacity: f64,
    pub firm_capacity: f64,
}

/// Everything derived from one site row.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteCapacity {
    pub transformer_count: usize,
    pub summer: SeasonRatings,
    pub winter: SeasonRatings,
    pub metrics: CapacityMetrics,
}

pub struct CapacityCalculator {
    multiplier: f64,
}

impl CapacityCalculator {
    pub fn new(multiplier: f64) -> Self {
        Self { multiplier }
    }

    pub fn calculate(&self, record: &Record) -> SiteCapacity {
        let transformer_count = transformer_count(record);
        let reverse_power = record.text(columns::REVERSE_POWER);

        let season = |season: Season| {
            let ratings = parse_ratings(
                record.text(season.rating_column()).as_deref(),
                transformer_count,
            );
            let demand = parse_demand(record.text(season.demand_column()).as_deref());
            let spare = spare_capacity(&ratings.usable, demand, self.multiplier);
            let generation =
                calculate_generation_capacity(reverse_power.as_deref(), &ratings.usable);
            (ratings, spare, generation)
        };

        let (summer, spare_summer, gen_summer) = season(Season::Summer);
        let (winter, spare_winter, gen_winter) = season(Season::Winter);
        let firm = firm_capacity(&summer.usable, &winter.usable, self.multiplier);

        SiteCapacity {
            transformer_count,
            metrics: CapacityMetrics {
                spare_summer,
                spare_winter,
                generation_capacity: gen_summer.min(gen_winter),
                firm_capacity: firm,
            },
            summer,
            winter,
        }
    }

    /// Returns a new row carrying the per-transformer and capacity columns.
    pub fn apply(&self, record: &Record) -> Record {
        let capacity = self.calculate(record);
        let mut row = record.clone();

        for (season, ratings) in [(Season::Summer, &capacity.summer), (Season::Winter, &capacity.winter)] {
            for (i, rating) in ratings.positions.iter().enumerate() {
                row.set(season.transformer_column(i + 1), *rating);
            }
        }

        row.with(columns::SPARE_SUMMER, capacity.metrics.spare_summer)
            .with(columns::SPARE_WINTER, capacity.metrics.spare_winter)
            .with(columns::GENERATION_CAPACITY, capacity.metrics.generation_capacity)
            .with(columns::FIRM_CAPACITY, capacity.metrics.firm_capacity)
    }

    pub fn run(&self, records: &[Record], provenance: &mut ColumnProvenance) -> Vec<Record> {
        let mut max_count = 0;
        let rows = records
            .iter()
            .map(|record| {
                max_count = max_count.max(transformer_count(record));
                self.apply(record)
            })
            .collect();

        for position in 1..=max_count {
            for season in Season::ALL {
                let source = season.rating_column();
                provenance.record_calculated(
                    &season.transformer_column(position),
                    &format!("{} rating for transformer {}", season.label(), position),
                    &format!(
                        "Extracted from {} column, position {}, NULL if missing",
                        source, position
                    ),
                );
            }
        }
        self.record_formulas(provenance);

        rows
    }

    fn record_formulas(&self, provenance: &mut ColumnProvenance) {
        let spare_formula = format!(
            "Single rating: (rating - demand) * {m}; Multiple: ((sum(ratings) - max(rating)) - demand) * {m}",
            m = self.multiplier
        );
        provenance.record_calculated(columns::SPARE_SUMMER, "Summer spare capacity", &spare_formula);
        provenance.record_calculated(columns::SPARE_WINTER, "Winter spare capacity", &spare_formula);
        provenance.record_calculated(
            columns::GENERATION_CAPACITY,
            "Generation capacity from reverse power and first transformer rating",
            "min(gen_capacity_summer, gen_capacity_winter)",
        );
        provenance.record_calculated(
            columns::FIRM_CAPACITY,
            "Firm capacity based on transformer ratings with diversity factor",
            &format!(
                "Scenario-based: Multiple ratings: ((sum(ratings) - max(rating)) * {m}), Single rating: (rating * {m}), Final: min(summer_result, winter_result)",
                m = self.multiplier
            ),
        );
    }
}

/// Transformer count as a non-negative integer; anything unusable is zero.
pub fn transformer_count(record: &Record) -> usize {
    record
        .number(columns::TRANSFORMER_COUNT)
        .filter(|n| *n > 0.0)
        .map(|n| n.trunc() as usize)
        .unwrap_or(0)
}
