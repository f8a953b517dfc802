use anyhow::Result;
use data_loader::{
    config::{self, PipelineConfig},
    load::{Sink, WriteMode},
    pipeline::{self, RunOptions},
    table::{column_cells, Cell},
};
use indoc::{formatdoc, indoc};
use pretty_assertions::assert_eq;
use std::{fs, path::PathBuf};
use tempfile::TempDir;

fn sample(name: &str, output: &TempDir) -> Result<PipelineConfig> {
    let mut config = config::load_pipeline_config(format!("sample_configs/{}.toml", name))?;
    config.output.output_path = output.path().to_path_buf();
    Ok(config)
}

fn parquet_parts(dir: &PathBuf) -> Result<Vec<PathBuf>> {
    let mut parts: Vec<PathBuf> = fs::read_dir(dir)?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    parts.sort();
    Ok(parts)
}

#[test]
fn set1_writes_partitioned_parquet() -> Result<()> {
    let out = TempDir::new()?;
    let config = sample("set1", &out)?;
    let summary = pipeline::run_pipeline(&config, &RunOptions::default())?;

    assert_eq!(summary.pipeline, "set1 purchases");
    assert_eq!(summary.rows, 4);
    assert_eq!(
        summary.columns,
        vec![
            "customer_id",
            "date",
            "purchase_location",
            "item_code",
            "item_name",
            "item_description",
            "price_paid",
            "currency",
            "data_label",
        ]
    );
    let table_dir = out.path().join("sales").join("purchases");
    assert_eq!(summary.destination, Some(table_dir.clone()));

    let parts = parquet_parts(&table_dir.join("data_label=set1"))?;
    assert_eq!(parts.len(), 1);
    let file = fs::File::open(&parts[0])?;
    let reader = parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    let ids = column_cells(batches[0].column(0).as_ref())?;
    assert_eq!(ids[0], Cell::Str("001".into()));
    assert!(batches[0].column_by_name("data_label").is_none());
    Ok(())
}

#[test]
fn set2_merges_inputs_into_duckdb() -> Result<()> {
    let out = TempDir::new()?;
    let config = sample("set2", &out)?;
    let summary = pipeline::run_pipeline(&config, &RunOptions::default())?;
    assert_eq!(summary.rows, 3);
    assert_eq!(
        summary.columns,
        vec!["customer_id", "full_name", "age", "gender", "city", "state", "data_label"]
    );
    let db = out.path().join("crm.duckdb");
    assert_eq!(summary.destination, Some(db.clone()));

    let conn = duckdb::Connection::open(&db)?;
    let (rows, missing_city, oldest): (i64, i64, i64) = conn.query_row(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE city IS NULL), MAX(age) FROM customers",
        [],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;
    assert_eq!((rows, missing_city, oldest), (3, 1, 85));
    drop(conn);

    // configured mode is overwrite, so a second run replaces the rows
    pipeline::run_pipeline(&config, &RunOptions::default())?;
    let conn = duckdb::Connection::open(&db)?;
    let rows: i64 = conn.query_row("SELECT COUNT(*) FROM customers", [], |r| r.get(0))?;
    assert_eq!(rows, 3);
    Ok(())
}

#[test]
fn cli_overrides_pick_sink_and_mode() -> Result<()> {
    let out = TempDir::new()?;
    let config = sample("set1", &out)?;
    let options = RunOptions {
        sink: Some(Sink::Sqlite),
        mode: Some(WriteMode::Append),
        ..RunOptions::default()
    };
    pipeline::run_pipeline(&config, &options)?;
    let db = pipeline::run_pipeline(&config, &options)?
        .destination
        .expect("sqlite file");
    assert_eq!(db, out.path().join("sales.sqlite"));

    let conn = rusqlite::Connection::open(&db)?;
    let (rows, first_date): (i64, String) = conn.query_row(
        "SELECT COUNT(*), MIN(date) FROM purchases",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    assert_eq!((rows, first_date.as_str()), (8, "2024-01-05"));

    let csv = pipeline::run_pipeline(
        &config,
        &RunOptions {
            sink: Some(Sink::Csv),
            mode: Some(WriteMode::Overwrite),
            ..RunOptions::default()
        },
    )?;
    let text = fs::read_to_string(csv.destination.expect("csv file"))?;
    assert_eq!(text.lines().count(), 5);
    assert!(text.starts_with("customer_id,date,purchase_location,"));
    Ok(())
}

#[test]
fn dry_run_writes_nothing() -> Result<()> {
    let out = TempDir::new()?;
    let config = sample("set1", &out)?;
    let summary = pipeline::run_pipeline(
        &config,
        &RunOptions {
            dry_run: true,
            ..RunOptions::default()
        },
    )?;
    assert_eq!(summary.destination, None);
    assert_eq!(fs::read_dir(out.path())?.count(), 0);
    Ok(())
}

/// A throwaway project whose transformer and data can be swapped per test.
fn scratch_project(dir: &TempDir, transformer: &str, data: &str) -> Result<PipelineConfig> {
    let root = dir.path();
    fs::create_dir_all(root.join("models"))?;
    fs::write(
        root.join("models/input.py"),
        indoc! {r#"
            import pandera as pa
            schema = pa.DataFrameSchema({"n": pa.Column(int, pa.Check.gt(0))}, name="Input")
        "#},
    )?;
    fs::write(
        root.join("models/output.py"),
        indoc! {r#"
            import pandera as pa
            schema = pa.DataFrameSchema({"n": pa.Column(int)}, name="Output")
        "#},
    )?;
    fs::write(root.join("transformer.py"), transformer)?;
    fs::write(root.join("data.csv"), data)?;

    let text = formatdoc! {r#"
            [details]
            project_path = "{root}"
            name = "scratch"
            transformer_pipeline = "transformer"

            [[extract_files]]
            data_file = "{root}/data.csv"
            schema_file = "models/input"
            label = "numbers"

            [output]
            schema_file = "models/output"
            output_path = "{root}/out"
            table_name = "numbers"
            db = "scratch"
            data_label = "test"
        "#,
        root = root.display()
    };
    Ok(toml::from_str(&text)?)
}

const IDENTITY: &str = indoc! {r#"
    import pandas as pd

    def transform(*dfs: pd.DataFrame, **kwargs) -> pd.DataFrame:
        return dfs[0]
"#};

#[test]
fn invalid_input_stops_the_run() -> Result<()> {
    let dir = TempDir::new()?;
    let config = scratch_project(&dir, IDENTITY, "n\n1\n-4\n")?;
    let err = pipeline::run_pipeline(&config, &RunOptions::default())
        .err()
        .expect("validation failure");
    let chain = format!("{:#}", err);
    assert!(chain.contains("input 'numbers' failed validation"), "{}", chain);
    assert!(!dir.path().join("out").exists());
    Ok(())
}

#[test]
fn mismatched_transformer_is_never_run() -> Result<()> {
    let dir = TempDir::new()?;
    let transformer = indoc! {r#"
        def transform(df, **kwargs):
            raise ValueError("should not run")
    "#};
    let config = scratch_project(&dir, transformer, "n\n1\n2\n")?;

    let err = pipeline::check_transformer(&config, None)
        .err()
        .expect("signature mismatch");
    let chain = format!("{:#}", err);
    assert!(chain.contains("function signature mismatch"), "{}", chain);

    let err = pipeline::run_pipeline(&config, &RunOptions::default())
        .err()
        .expect("signature mismatch");
    assert!(format!("{:#}", err).contains("function signature mismatch"));
    assert!(!dir.path().join("out").exists());
    Ok(())
}

#[test]
fn transformer_must_return_a_table() -> Result<()> {
    let dir = TempDir::new()?;
    let transformer = indoc! {r#"
        import pandas as pd

        def transform(*dfs: pd.DataFrame, **kwargs) -> pd.DataFrame:
            return len(dfs[0])
    "#};
    let config = scratch_project(&dir, transformer, "n\n1\n2\n")?;
    let err = pipeline::run_pipeline(&config, &RunOptions::default())
        .err()
        .expect("not a table");
    assert!(
        format!("{:#}", err).contains("transform returned 'int', expected a DataFrame"),
        "{:#}",
        err
    );

    let config = scratch_project(&dir, IDENTITY, "n\n1\n2\n")?;
    let summary = pipeline::run_pipeline(&config, &RunOptions::default())?;
    assert_eq!(summary.rows, 2);
    Ok(())
}
