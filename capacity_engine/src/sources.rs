//! The join descriptors for each source table.

use crate::ecr::REGISTER_COLUMNS;
use crate::integration::{Aggregation, ColumnMapping, Fill, MatchStrategy, SourceIntegration};
use crate::models::{columns, SourceTableKind};

/// Which embedded capacity register a descriptor reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcrTier {
    AtLeast1Mva,
    Under1Mva,
}

const CONNECTED_RULE: &str =
    "SUM of Already connected Registered Capacity (MW) WHERE Connection Status = \"Connected\" OR blank/null";
const ACCEPTED_RULE: &str =
    "SUM of Accepted to Connect Registered Capacity (MW) WHERE Connection Status = \"Accepted to Connect\" OR blank/null";

pub fn ecr(tier: EcrTier) -> SourceIntegration {
    let (stage, table, connected, accepted, gsp, bsp) = match tier {
        EcrTier::AtLeast1Mva => (
            "ecr_above_1mva",
            SourceTableKind::EmbeddedCapacityRegister,
            columns::ECR_ABOVE_CONNECTED,
            columns::ECR_ABOVE_ACCEPTED,
            columns::GRID_SUPPLY_POINT,
            columns::BULK_SUPPLY_POINT,
        ),
        EcrTier::Under1Mva => (
            "ecr_below_1mva",
            SourceTableKind::EmbeddedCapacityRegisterUnder1Mw,
            columns::ECR_BELOW_CONNECTED,
            columns::ECR_BELOW_ACCEPTED,
            columns::GRID_SUPPLY_POINT_BELOW,
            columns::BULK_SUPPLY_POINT_BELOW,
        ),
    };

    SourceIntegration {
        stage,
        table,
        site_key: columns::SITE_ID,
        source_key: columns::SITE_ID,
        strategy: MatchStrategy::Exact,
        aggregation: Aggregation::StatusAware(REGISTER_COLUMNS),
        columns: vec![
            ColumnMapping::aggregate(REGISTER_COLUMNS.connected, connected, Fill::Zero, CONNECTED_RULE),
            ColumnMapping::aggregate(REGISTER_COLUMNS.accepted, accepted, Fill::Zero, ACCEPTED_RULE),
            ColumnMapping::aggregate("grid_supply_point", gsp, Fill::EmptyText, "FIRST grid_supply_point per site"),
            ColumnMapping::aggregate("bulk_supply_point", bsp, Fill::EmptyText, "FIRST bulk_supply_point per site"),
        ],
        numeric_columns: vec![REGISTER_COLUMNS.connected, REGISTER_COLUMNS.accepted],
        require_positive: None,
    }
}

pub fn installed_capacity() -> SourceIntegration {
    SourceIntegration {
        stage: "installed_capacity",
        table: SourceTableKind::LtdsGeneration,
        site_key: columns::SITE_ID,
        source_key: columns::SITE_ID,
        strategy: MatchStrategy::NormalizedIdentifier,
        aggregation: Aggregation::Sum {
            column: columns::INSTALLED_CAPACITY,
        },
        columns: vec![ColumnMapping::aggregate(
            columns::INSTALLED_CAPACITY,
            columns::INSTALLED_CAPACITY,
            Fill::Zero,
            "SUM of installedcapacity_mva",
        )],
        numeric_columns: vec![columns::INSTALLED_CAPACITY],
        require_positive: Some(columns::INSTALLED_CAPACITY),
    }
}

/// DNOA source columns and the names they carry in the output.
pub const DNOA_COLUMNS: [(&str, &str); 19] = [
    ("substation_title", "Substation Title"),
    ("constraint_description", "Constraint description"),
    ("traditional_solution", "Traditional solution"),
    ("constraint_season", "Constraint season"),
    ("customers_served", "Customers served"),
    ("dnoa_result", "DNOA result"),
    ("dnoa_result_description", "DNOA result description"),
    ("dnoa_result_history_2023", "DNOA result history 2023"),
    ("dnoa_result_history_2024", "DNOA result history 2024"),
    ("dnoa_result_history_2025", "DNOA result history 2025"),
    ("flexibility_procurement_2024_25", "Flexibility procurement 2024/25"),
    ("flexibility_procurement_2025_26", "Flexibility procurement 2025/26"),
    ("flexibility_procurement_2026_27", "Flexibility procurement 2026/27"),
    ("flexibility_procurement_2027_28", "Flexibility procurement 2027/28"),
    ("flexibility_procurement_2028_29", "Flexibility procurement 2028/29"),
    ("constraint_occurrence_year", "Constraint occurrence year"),
    ("current_status", "Current Status"),
    ("type", "Type"),
    ("site", "Site"),
];

pub fn dnoa() -> SourceIntegration {
    SourceIntegration {
        stage: "dnoa",
        table: SourceTableKind::Dnoa,
        site_key: columns::SITE_ID,
        source_key: "functional_location",
        strategy: MatchStrategy::LocationThenSiteName {
            title_column: "substation_title",
            site_name_column: columns::SITE_NAME,
        },
        aggregation: Aggregation::Sequential,
        columns: DNOA_COLUMNS
            .iter()
            .map(|&(source, output)| ColumnMapping::copy(source, output, Fill::Null))
            .collect(),
        numeric_columns: vec![],
        require_positive: None,
    }
}

pub const PROJECT_COLUMNS: [(&str, &str); 8] = [
    ("substation_or_circuit_ple_name", "Substation_or_Circuit"),
    ("ltds_name", "LTDSName"),
    ("asset_type_or_quantity", "AssetType_Quantity"),
    ("associated_gsp", "AssociatedGSP"),
    ("justification_for_the_need", "Justification"),
    ("connectivity_voltage", "Connectivity_Voltage(kV)"),
    ("expected_start_year", "ExpectedStartYear"),
    ("expected_completion_year", "ExpectedCompletionYear"),
];

pub fn infrastructure_projects() -> SourceIntegration {
    SourceIntegration {
        stage: "infrastructure_projects",
        table: SourceTableKind::LtdsInfrastructureProjects,
        site_key: columns::SITE_ID,
        source_key: "site_functional_location",
        strategy: MatchStrategy::Exact,
        aggregation: Aggregation::FirstOccurrence,
        columns: PROJECT_COLUMNS
            .iter()
            .map(|&(source, output)| ColumnMapping::copy(source, output, Fill::Null))
            .collect(),
        numeric_columns: vec![],
        require_positive: None,
    }
}

pub const GSP_OVERVIEW_COLUMNS: [&str; 8] = [
    "minimum_observed_power_flow",
    "maximum_observed_power_flow",
    "asset_import_limit",
    "asset_export_limit",
    "technical_limit_import_summer",
    "technical_limit_import_winter",
    "technical_limit_import_access_period",
    "technical_limit_export",
];

pub fn gsp_overview() -> SourceIntegration {
    SourceIntegration {
        stage: "gsp_overview",
        table: SourceTableKind::GridSupplyPointsOverview,
        site_key: columns::GRID_SUPPLY_POINT,
        source_key: "gsp",
        strategy: MatchStrategy::SupplyPointName {
            site_column: columns::GRID_SUPPLY_POINT,
        },
        aggregation: Aggregation::FirstOccurrence,
        columns: GSP_OVERVIEW_COLUMNS
            .iter()
            .map(|&column| ColumnMapping::copy(column, column, Fill::Zero))
            .collect(),
        numeric_columns: GSP_OVERVIEW_COLUMNS.to_vec(),
        require_positive: None,
    }
}
