use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

/// Column names of the site table that the calculations read directly.
pub mod columns {
    pub const SITE_ID: &str = "sitefunctionallocation";
    pub const SITE_NAME: &str = "sitename";
    pub const TRANSFORMER_COUNT: &str = "powertransformercount";
    pub const RATING_SUMMER: &str = "transratingsummer";
    pub const RATING_WINTER: &str = "transratingwinter";
    pub const DEMAND_SUMMER: &str = "maxdemandsummer";
    pub const DEMAND_WINTER: &str = "maxdemandwinter";
    pub const REVERSE_POWER: &str = "reversepower";
    pub const SPATIAL_COORDINATES: &str = "spatial_coordinates";

    pub const SPARE_SUMMER: &str = "Spare_Summer";
    pub const SPARE_WINTER: &str = "Spare_Winter";
    pub const GENERATION_CAPACITY: &str = "Generation_Capacity";
    pub const FIRM_CAPACITY: &str = "Firm_Capacity";

    pub const ECR_ABOVE_CONNECTED: &str = "ECR > 1MVA Already connected";
    pub const ECR_ABOVE_ACCEPTED: &str = "ECR > 1MVA Accepted to connect";
    pub const ECR_BELOW_CONNECTED: &str = "ECR < 1MVA Already connected";
    pub const ECR_BELOW_ACCEPTED: &str = "ECR < 1MVA Accepted to connect";
    pub const GRID_SUPPLY_POINT: &str = "Grid Supply Point";
    pub const BULK_SUPPLY_POINT: &str = "Bulk Supply Point";
    pub const GRID_SUPPLY_POINT_BELOW: &str = "Grid Supply Point Under 1MW";
    pub const BULK_SUPPLY_POINT_BELOW: &str = "Bulk Supply Point Under 1MW";

    pub const TOTAL_GEN_BELOW: &str = "Total Gen <1 (MW)";
    pub const TOTAL_GEN_ABOVE: &str = "Total Gen >1 (MW)";
    pub const TOTAL_ECR: &str = "Total_ECR_Capacity";
    pub const GENERATION_HEADROOM: &str = "Generation_Headroom_MW";

    pub const INSTALLED_CAPACITY: &str = "installedcapacity_mva";
    pub const DEVIATION_PERCENTAGE: &str = "Deviation_Percentage";
    pub const DEVIATION: &str = "Deviation";
}

/// A single cell of a site row or a source row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Number(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null or the empty string.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            Value::Number(_) => false,
        }
    }

    /// String view of the cell, `None` for null.
    pub fn text(&self) -> Option<Cow<'_, str>> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(Cow::Borrowed(s.as_str())),
            Value::Number(n) => Some(Cow::Owned(format_number(*n))),
        }
    }

    /// Lenient numeric coercion: unparsable or non-finite values are `None`.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Null => None,
            Value::Number(n) if n.is_finite() => Some(*n),
            Value::Number(_) => None,
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<Option<f64>> for Value {
    fn from(n: Option<f64>) -> Self {
        n.map(Value::Number).unwrap_or(Value::Null)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Option<String>> for Value {
    fn from(s: Option<String>) -> Self {
        s.map(Value::Text).unwrap_or(Value::Null)
    }
}

pub fn format_number(n: f64) -> String {
    format!("{}", n)
}

static NULL: Value = Value::Null;

/// One row keyed by column name. Column iteration order is lexicographic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Missing columns read as null.
    pub fn get(&self, column: &str) -> &Value {
        self.fields.get(column).unwrap_or(&NULL)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.fields.contains_key(column)
    }

    pub fn text(&self, column: &str) -> Option<Cow<'_, str>> {
        self.get(column).text()
    }

    pub fn number(&self, column: &str) -> Option<f64> {
        self.get(column).to_number()
    }

    /// Numeric value with missing or invalid entries read as zero.
    pub fn number_or_zero(&self, column: &str) -> f64 {
        self.number(column).unwrap_or(0.0)
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(column.into(), value.into());
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn remove(&mut self, column: &str) -> Value {
        self.fields.remove(column).unwrap_or_default()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Groups keyed by text, iterated in first-insertion order.
#[derive(Debug, Clone)]
pub struct OrderedGroups<T> {
    index: HashMap<String, usize>,
    values: Vec<T>,
}

impl<T> Default for OrderedGroups<T> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            values: Vec::new(),
        }
    }
}

impl<T> OrderedGroups<T> {
    pub fn entry_or_insert_with(&mut self, key: &str, make: impl FnOnce() -> T) -> &mut T {
        let idx = match self.index.get(key) {
            Some(idx) => *idx,
            None => {
                self.values.push(make());
                self.index.insert(key.to_string(), self.values.len() - 1);
                self.values.len() - 1
            }
        };
        &mut self.values[idx]
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<T> {
        self.values
    }
}

/// Seasonal variants of the transformer rating and demand fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Season {
    Summer,
    Winter,
}

impl Season {
    pub const ALL: [Season; 2] = [Season::Summer, Season::Winter];

    pub fn label(&self) -> &'static str {
        match self {
            Season::Summer => "Summer",
            Season::Winter => "Winter",
        }
    }

    pub fn rating_column(&self) -> &'static str {
        match self {
            Season::Summer => columns::RATING_SUMMER,
            Season::Winter => columns::RATING_WINTER,
        }
    }

    pub fn demand_column(&self) -> &'static str {
        match self {
            Season::Summer => columns::DEMAND_SUMMER,
            Season::Winter => columns::DEMAND_WINTER,
        }
    }

    pub fn spare_column(&self) -> &'static str {
        match self {
            Season::Summer => columns::SPARE_SUMMER,
            Season::Winter => columns::SPARE_WINTER,
        }
    }

    /// Per-position rating column, 1-based: `Trans2_Winter`.
    pub fn transformer_column(&self, position: usize) -> String {
        format!("Trans{}_{}", position, self.label())
    }
}

/// The seven source tables the pipeline reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTableKind {
    GridAndPrimarySites,
    EmbeddedCapacityRegister,
    EmbeddedCapacityRegisterUnder1Mw,
    LtdsGeneration,
    Dnoa,
    LtdsInfrastructureProjects,
    GridSupplyPointsOverview,
}

impl SourceTableKind {
    pub const ALL: [SourceTableKind; 7] = [
        SourceTableKind::GridAndPrimarySites,
        SourceTableKind::EmbeddedCapacityRegister,
        SourceTableKind::EmbeddedCapacityRegisterUnder1Mw,
        SourceTableKind::LtdsGeneration,
        SourceTableKind::Dnoa,
        SourceTableKind::LtdsInfrastructureProjects,
        SourceTableKind::GridSupplyPointsOverview,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            SourceTableKind::GridAndPrimarySites => "grid_and_primary_sites",
            SourceTableKind::EmbeddedCapacityRegister => "ukpn_embedded_capacity_register",
            SourceTableKind::EmbeddedCapacityRegisterUnder1Mw => {
                "ukpn_embedded_capacity_register_1_under_1mw"
            }
            SourceTableKind::LtdsGeneration => "ltds_table_5_generation",
            SourceTableKind::Dnoa => "ukpn_dnoa",
            SourceTableKind::LtdsInfrastructureProjects => "ukpn_ltds_infrastructure_projects",
            SourceTableKind::GridSupplyPointsOverview => "ukpn_grid_supply_points_overview",
        }
    }
}

impl fmt::Display for SourceTableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

impl FromStr for SourceTableKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceTableKind::ALL
            .into_iter()
            .find(|kind| kind.table_name() == s)
            .ok_or_else(|| format!("unknown source table '{}'", s))
    }
}

/// Rows of one source table as fetched, every cell still text.
#[derive(Debug, Clone)]
pub struct SourceTable {
    pub kind: SourceTableKind,
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

impl SourceTable {
    pub fn new(kind: SourceTableKind, columns: Vec<String>, rows: Vec<Record>) -> Self {
        Self { kind, columns, rows }
    }

    pub fn empty(kind: SourceTableKind) -> Self {
        Self {
            kind,
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Rectangular table ready to be written, columns in output order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Union of all record columns, lexicographically ordered.
    pub fn from_records(records: &[Record]) -> Self {
        let columns: BTreeSet<&str> = records.iter().flat_map(|r| r.columns()).collect();
        let columns: Vec<String> = columns.into_iter().map(str::to_string).collect();
        let rows = records
            .iter()
            .map(|r| columns.iter().map(|c| r.get(c).clone()).collect())
            .collect();
        Self { columns, rows }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }
}
