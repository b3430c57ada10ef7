use capacity_engine::models::columns;
use capacity_engine::provenance::{ColumnOrigin, COMPLETE_FILE, TABLE_MAPPING_FILE};
use capacity_engine::sources::{DNOA_COLUMNS, GSP_OVERVIEW_COLUMNS, PROJECT_COLUMNS};
use capacity_engine::{
    CsvDirectorySource, Pipeline, PipelineConfig, PipelineContext, PipelineError, PipelineOutcome,
    SourceTableKind, Table, Value,
};
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};

fn csv_field(field: &str) -> String {
    if field.contains(|c: char| matches!(c, ',' | '"' | '\n')) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn write_csv(dir: &Path, kind: SourceTableKind, header: &[&str], rows: &[Vec<&str>]) {
    let mut body = header.iter().map(|h| csv_field(h)).collect::<Vec<_>>().join(",");
    body.push('\n');
    for row in rows {
        assert_eq!(row.len(), header.len(), "fixture row width for {}", kind);
        body.push_str(&row.iter().map(|f| csv_field(f)).collect::<Vec<_>>().join(","));
        body.push('\n');
    }
    fs::write(dir.join(format!("{}.csv", kind.table_name())), body).unwrap();
}

/// A row with `values` in the named columns and blanks elsewhere.
fn sparse_row<'a>(header: &[&'a str], values: &[(&str, &'a str)]) -> Vec<&'a str> {
    header
        .iter()
        .map(|column| {
            values
                .iter()
                .find(|(name, _)| name == column)
                .map(|(_, value)| *value)
                .unwrap_or("")
        })
        .collect()
}

fn write_sources(dir: &Path) {
    fs::create_dir_all(dir).unwrap();

    write_csv(
        dir,
        SourceTableKind::GridAndPrimarySites,
        &[
            "sitefunctionallocation",
            "sitename",
            "powertransformercount",
            "transratingsummer",
            "transratingwinter",
            "maxdemandsummer",
            "maxdemandwinter",
            "reversepower",
            "spatial_coordinates",
            "__hash",
        ],
        &[
            vec!["S1", "BURWELL GRID", "2", "30,30", "36,36", "10", "12", "100%", r#"{"lat": 52.1, "lon": 0.3}"#, "h1"],
            vec!["S2", "ELY", "0", "20", "20", "1", "1", "100%", "", "h2"],
            vec!["S3", "SOHAM PRIMARY", "1", "20", "24", "5", "6", "<100%", "", "h3"],
        ],
    );

    let register = [
        "sitefunctionallocation",
        "connection_status",
        "already_connected_registered_capacity_mw",
        "accepted_to_connect_registered_capacity_mw",
        "grid_supply_point",
        "bulk_supply_point",
    ];
    write_csv(
        dir,
        SourceTableKind::EmbeddedCapacityRegister,
        &register,
        &[
            vec!["S1", "Connected", "5", "2", "BURWELL", "ELY"],
            vec!["S1", "Accepted to Connect", "0", "3", "BURWELL", "ELY"],
            vec!["S9", "Connected", "100", "100", "X", "Y"],
        ],
    );
    write_csv(
        dir,
        SourceTableKind::EmbeddedCapacityRegisterUnder1Mw,
        &register,
        &[
            vec!["S1", "", "1", "0.5", "", ""],
            vec!["S3", "Connected", "0.4", "0", "MARCH", "SOHAM"],
        ],
    );

    write_csv(
        dir,
        SourceTableKind::LtdsGeneration,
        &["sitefunctionallocation", "installedcapacity_mva"],
        &[
            vec!["S-1", "6"],
            vec!["S1", "4"],
            vec!["S3", "0"],
            vec!["SOHAM-S3X", "0.42"],
        ],
    );

    let mut dnoa: Vec<&str> = vec!["functional_location"];
    dnoa.extend(DNOA_COLUMNS.iter().map(|(source, _)| *source));
    write_csv(
        dir,
        SourceTableKind::Dnoa,
        &dnoa,
        &[
            sparse_row(
                &dnoa,
                &[
                    ("functional_location", "S1"),
                    ("substation_title", "Burwell Grid"),
                    ("dnoa_result", "Flexibility"),
                ],
            ),
            sparse_row(
                &dnoa,
                &[("substation_title", "Soham 33/11kV"), ("dnoa_result", "Reinforce")],
            ),
            sparse_row(
                &dnoa,
                &[
                    ("functional_location", "ZZZ"),
                    ("substation_title", "Nowhere"),
                    ("dnoa_result", "Defer"),
                ],
            ),
        ],
    );

    let mut projects: Vec<&str> = vec!["site_functional_location"];
    projects.extend(PROJECT_COLUMNS.iter().map(|(source, _)| *source));
    write_csv(
        dir,
        SourceTableKind::LtdsInfrastructureProjects,
        &projects,
        &[
            sparse_row(
                &projects,
                &[
                    ("site_functional_location", "S1"),
                    ("ltds_name", "BURW"),
                    ("expected_completion_year", "2027"),
                ],
            ),
            sparse_row(
                &projects,
                &[("site_functional_location", "S1"), ("ltds_name", "SECOND")],
            ),
        ],
    );

    let mut overview: Vec<&str> = vec!["gsp"];
    overview.extend(GSP_OVERVIEW_COLUMNS);
    write_csv(
        dir,
        SourceTableKind::GridSupplyPointsOverview,
        &overview,
        &[
            sparse_row(&overview, &[("gsp", "BURWELL"), ("maximum_observed_power_flow", "42")]),
            sparse_row(&overview, &[("gsp", "MARCH GSP"), ("maximum_observed_power_flow", "7")]),
        ],
    );
}

fn fixture() -> (TempDir, PipelineConfig) {
    let dir = tempdir().unwrap();
    let sources = dir.path().join("sources");
    write_sources(&sources);
    let config = PipelineConfig {
        source_dir: sources,
        snapshot_path: dir.path().join("snapshot.csv"),
        output_path: dir.path().join("out/transformed_transformer_data.csv"),
        artifacts_dir: dir.path().join("artifacts"),
        ..PipelineConfig::default()
    };
    (dir, config)
}

fn cell<'t>(table: &'t Table, row: usize, column: &str) -> &'t Value {
    let idx = table
        .column_index(column)
        .unwrap_or_else(|| panic!("no column {column} in {:?}", table.columns));
    &table.rows[row][idx]
}

fn number(table: &Table, row: usize, column: &str) -> f64 {
    cell(table, row, column)
        .to_number()
        .unwrap_or_else(|| panic!("{column} is not numeric"))
}

fn assert_close(actual: f64, expected: f64) {
    assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
}

#[test]
fn test_full_run_from_csv_sources() {
    let (_dir, config) = fixture();
    let pipeline = Pipeline::new(CsvDirectorySource::new(&config.source_dir), config.clone());
    let mut ctx = PipelineContext::default();
    let table = pipeline.compute(&mut ctx).unwrap();

    assert_eq!(table.height(), 2);
    assert_eq!(cell(&table, 0, "Site Name"), &Value::from("BURWELL GRID"));
    assert_eq!(cell(&table, 1, "Site Name"), &Value::from("SOHAM PRIMARY"));
    assert_eq!(cell(&table, 0, "Site Functional Location"), &Value::from("S1"));
    assert_eq!(cell(&table, 1, "Site Functional Location"), &Value::from("S3"));
    assert!(table.column_index("__hash").is_none());

    // capacity
    assert_close(number(&table, 0, "Spare Summer"), 19.2);
    assert_close(number(&table, 0, "Spare Winter"), 23.04);
    assert_close(number(&table, 0, "Generation Capacity"), 30.0);
    assert_close(number(&table, 0, "Firm Capacity"), 28.8);
    assert_close(number(&table, 1, "Generation Capacity"), 10.0);
    assert_close(number(&table, 0, "Transformer 2 Winter"), 36.0);

    // registers, totals and headroom
    assert_close(number(&table, 0, columns::ECR_ABOVE_CONNECTED), 5.0);
    assert_close(number(&table, 0, columns::ECR_ABOVE_ACCEPTED), 3.0);
    assert_close(number(&table, 0, columns::ECR_BELOW_ACCEPTED), 0.5);
    assert_close(number(&table, 0, "Total Ecr Capacity"), 9.5);
    assert_close(number(&table, 0, "Generation Headroom Mw"), 20.5);
    assert_close(number(&table, 1, "Generation Headroom Mw"), 9.6);
    assert_eq!(cell(&table, 0, "Grid supply point"), &Value::from("BURWELL"));
    assert_eq!(cell(&table, 1, "Grid supply point"), &Value::from("MARCH"));
    assert_eq!(cell(&table, 1, "Bulk supply point"), &Value::from("SOHAM"));
    assert!(table.column_index("Grid supply point under 1mw").is_none());

    // spatial, installed capacity and deviation
    assert_eq!(cell(&table, 0, "Spatial Coordinates"), &Value::from("52.1, 0.3"));
    assert_eq!(cell(&table, 1, "Spatial Coordinates"), &Value::from(""));
    assert_close(number(&table, 0, "Installed Capacity MVA"), 10.0);
    assert_close(number(&table, 1, "Installed Capacity MVA"), 0.42);
    assert_eq!(cell(&table, 0, "Deviation"), &Value::from("Yes"));
    assert_eq!(cell(&table, 1, "Deviation"), &Value::from("No"));

    // DNOA, projects and supply point overview
    assert_eq!(cell(&table, 0, "Dnoa result"), &Value::from("Flexibility"));
    assert_eq!(cell(&table, 1, "Dnoa result"), &Value::from("Reinforce"));
    assert_eq!(cell(&table, 0, "Ltdsname"), &Value::from("BURW"));
    assert!(cell(&table, 1, "Ltdsname").is_null());
    assert_close(number(&table, 0, "Maximum Observed Power Flow"), 42.0);
    assert_close(number(&table, 1, "Maximum Observed Power Flow"), 7.0);

    let report = &ctx.report;
    assert_eq!(report.stage("filter").unwrap().counter("removed_no_transformers"), 1);
    let dnoa = report.stage("dnoa").unwrap();
    assert_eq!(dnoa.counter("location_matches"), 1);
    assert_eq!(dnoa.counter("site_name_matches"), 1);
    assert_eq!(dnoa.counter("no_match"), 1);
    let installed = report.stage("installed_capacity").unwrap();
    assert_eq!(installed.counter("fallback:source_contains_site"), 1);
    let overview = report.stage("gsp_overview").unwrap();
    assert_eq!(overview.counter("names_exact"), 1);
    assert_eq!(overview.counter("names_fuzzy"), 1);
    assert_eq!(report.stage("deviation").unwrap().counter("flagged"), 1);

    assert!(matches!(
        ctx.provenance.resolve("Site Name"),
        Some(ColumnOrigin::Database(origin)) if origin.table == "grid_and_primary_sites"
    ));
    assert!(matches!(
        ctx.provenance.resolve("Generation Headroom Mw"),
        Some(ColumnOrigin::Calculated(_))
    ));
    assert!(matches!(
        ctx.provenance.resolve(columns::ECR_ABOVE_CONNECTED),
        Some(ColumnOrigin::Aggregated(_))
    ));

    // checkpoints are on by default
    assert!(config.output_path.is_file());
}

#[test]
fn test_run_writes_output_and_artifacts() {
    let (_dir, config) = fixture();
    let pipeline = Pipeline::new(CsvDirectorySource::new(&config.source_dir), config.clone());

    let report = match pipeline.run().unwrap() {
        PipelineOutcome::Completed(report) => report,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(report.output_rows, 2);
    assert!(report.finished_at.is_some());

    let output = fs::read_to_string(&config.output_path).unwrap();
    let header = output.lines().next().unwrap();
    assert!(header.contains("Generation Capacity"));
    assert!(header.contains("Site Functional Location"));
    assert!(!header.contains("sitefunctionallocation"));
    assert!(!header.contains("__hash"));
    assert_eq!(output.lines().count(), 3);

    for name in [TABLE_MAPPING_FILE, COMPLETE_FILE, "calculated_columns.json", "aggregated_columns.json", "pipeline_metrics.json"] {
        assert!(config.artifacts_dir.join(name).is_file(), "{name} missing");
    }
    let complete: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(config.artifacts_dir.join(COMPLETE_FILE)).unwrap()).unwrap();
    assert!(complete["calculated_columns"]["Generation_Headroom_MW"]["formula"].is_string());
    assert_eq!(complete["renamed_columns"]["Site Name"], "sitename");

    let mapping: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(config.artifacts_dir.join(TABLE_MAPPING_FILE)).unwrap()).unwrap();
    for table in [SourceTableKind::EmbeddedCapacityRegister, SourceTableKind::EmbeddedCapacityRegisterUnder1Mw] {
        let listed = mapping[table.table_name()].as_array().unwrap();
        assert!(
            listed.iter().any(|c| c["column_name"] == columns::SITE_ID),
            "{} lacks the site key",
            table.table_name()
        );
    }
}

#[test]
fn test_missing_required_table_is_fatal() {
    let (_dir, config) = fixture();
    fs::remove_file(config.source_dir.join("ukpn_dnoa.csv")).unwrap();

    let pipeline = Pipeline::new(CsvDirectorySource::new(&config.source_dir), config.clone());
    let err = pipeline.run().unwrap_err();
    assert!(matches!(err, PipelineError::MissingTable { table: "ukpn_dnoa", .. }));

    let lenient = PipelineConfig {
        optional_tables: vec![SourceTableKind::Dnoa],
        ..config.clone()
    };
    let pipeline = Pipeline::new(CsvDirectorySource::new(&config.source_dir), lenient);
    let mut ctx = PipelineContext::default();
    let table = pipeline.compute(&mut ctx).unwrap();
    assert!(cell(&table, 0, "Dnoa result").is_null());
}

#[test]
fn test_missing_column_is_reported() {
    let (_dir, config) = fixture();
    write_csv(
        &config.source_dir,
        SourceTableKind::LtdsGeneration,
        &["sitefunctionallocation"],
        &[vec!["S1"]],
    );

    let pipeline = Pipeline::new(CsvDirectorySource::new(&config.source_dir), config);
    let err = pipeline.compute(&mut PipelineContext::default()).unwrap_err();
    match err {
        PipelineError::MissingColumn { table, column } => {
            assert_eq!(table, "ltds_table_5_generation");
            assert_eq!(column, "installedcapacity_mva");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_unreachable_source_falls_back_to_snapshot() {
    let dir = tempdir().unwrap();
    let config = PipelineConfig {
        source_dir: dir.path().join("not-there"),
        snapshot_path: dir.path().join("snapshot.csv"),
        output_path: dir.path().join("out.csv"),
        artifacts_dir: dir.path().join("artifacts"),
        ..PipelineConfig::default()
    };

    let pipeline = Pipeline::new(CsvDirectorySource::new(&config.source_dir), config.clone());
    assert!(matches!(pipeline.run(), Err(PipelineError::SnapshotMissing(_))));

    fs::write(&config.snapshot_path, "Site Name\nBURWELL GRID\n").unwrap();
    let outcome = pipeline.run().unwrap();
    assert!(matches!(outcome, PipelineOutcome::RestoredSnapshot(_)));
    assert_eq!(fs::read_to_string(&config.output_path).unwrap(), "Site Name\nBURWELL GRID\n");
    assert!(!config.artifacts_dir.exists());
}
