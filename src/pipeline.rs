// src/pipeline.rs
//! read → validate → verify → transform → validate → write

use anyhow::{bail, Context, Result};
use arrow::{
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use std::{path::PathBuf, rc::Rc, sync::Arc};
use tracing::{info, instrument, warn};

use crate::{
    config::PipelineConfig,
    extract,
    load::{self, Sink, WriteMode, WriteRequest},
    schema::{self, TableSchema},
    table::{broadcast, Cell},
    transformer::{TransformerVerifier, VerifiedTransformer},
    unit::{UnitLoader, UnitLocation, Value},
};

/// Symbol a schema unit must define.
pub const SCHEMA_SYMBOL: &str = "schema";
/// Column that tags every output row with the run's label.
pub const DATA_LABEL_COLUMN: &str = "data_label";

/// Per-run overrides; `None` falls back to the configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub sink: Option<Sink>,
    pub mode: Option<WriteMode>,
    pub dry_run: bool,
    pub template: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub pipeline: String,
    pub rows: usize,
    pub columns: Vec<String>,
    /// `None` on a dry run.
    pub destination: Option<PathBuf>,
}

/// Runs one configured pipeline start to finish. Any failure stops the run.
#[instrument(skip_all, fields(pipeline = %config.details.name, dry_run = options.dry_run))]
pub fn run_pipeline(config: &PipelineConfig, options: &RunOptions) -> Result<RunSummary> {
    config.validate()?;
    info!(description = %config.details.description, "pipeline started");
    let loader = UnitLoader::new();

    let mut tables = Vec::with_capacity(config.extract_files.len());
    for (n, input) in config.extract_files.iter().enumerate() {
        let data = extract::read_table(&input.data_file)
            .with_context(|| format!("reading input {} ({})", n, input.label))?;
        info!(file = %input.data_file.display(), rows = data.num_rows(), "input {} loaded", n);

        let schema = load_schema(&loader, config, &input.schema_file)?;
        let validated = schema::validate(&data, &schema)
            .with_context(|| format!("input '{}' failed validation", input.label))?;
        info!(label = %input.label, schema = %schema.display_name(), "input validated");
        tables.push(validated);
    }

    let output_schema = load_schema(&loader, config, &config.output.schema_file)?;
    let transformer = verify_with(&loader, config, options.template.as_ref())?;

    let result = transformer
        .call(
            tables,
            vec![("output_schema".to_string(), Value::Schema(output_schema.clone()))],
        )
        .with_context(|| format!("running transformer {}", transformer.location()))?;
    let result = schema::validate(&result, &output_schema)
        .context("transformer output failed validation")?;
    let result = with_label(&result, &config.output.data_label)?;
    info!(rows = result.num_rows(), "output validated");

    let columns = result
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let destination = if options.dry_run {
        info!("dry run, nothing written");
        None
    } else {
        let sink = options.sink.or(config.output.sink).unwrap_or_default();
        let mode = options.mode.or(config.output.mode).unwrap_or_default();
        let mut request = WriteRequest::new(
            &config.output.output_path,
            &config.output.db,
            &config.output.table_name,
        )
        .with_mode(mode);
        if sink == Sink::Parquet {
            request = request.with_partitions(config.output.partition_cols.clone());
        } else if !config.output.partition_cols.is_empty() {
            warn!(%sink, "partition_cols only apply to parquet output");
        }
        Some(load::write_table(&result, sink, &request)?)
    };

    Ok(RunSummary {
        pipeline: config.details.name.clone(),
        rows: result.num_rows(),
        columns,
        destination,
    })
}

/// Verifies the configured transformer without reading any data.
#[instrument(skip_all, fields(pipeline = %config.details.name))]
pub fn check_transformer(
    config: &PipelineConfig,
    template: Option<&PathBuf>,
) -> Result<VerifiedTransformer> {
    verify_with(&UnitLoader::new(), config, template)
}

fn verify_with(
    loader: &UnitLoader,
    config: &PipelineConfig,
    template: Option<&PathBuf>,
) -> Result<VerifiedTransformer> {
    let template = template.unwrap_or(&config.details.template_file);
    let transformer = TransformerVerifier::new(loader.clone())
        .verify(
            &UnitLocation::from_path(&config.transformer_path()),
            &UnitLocation::from_path(template),
        )
        .with_context(|| {
            format!(
                "transformer '{}' was not accepted",
                config.details.transformer_pipeline
            )
        })?;
    Ok(transformer)
}

fn load_schema(loader: &UnitLoader, config: &PipelineConfig, relative: &str) -> Result<Rc<TableSchema>> {
    let location = UnitLocation::from_path(&config.unit_path(relative));
    let loaded = loader
        .load_from(&location, SCHEMA_SYMBOL)
        .with_context(|| format!("loading schema '{}'", relative))?;
    match loaded.value {
        Value::Schema(schema) => Ok(schema),
        other => bail!(
            "'{}' in {} is a {}, expected a DataFrameSchema",
            SCHEMA_SYMBOL,
            loaded.path.display(),
            other.type_name()
        ),
    }
}

/// Sets the `data_label` column to `label` on every row.
fn with_label(batch: &RecordBatch, label: &str) -> Result<RecordBatch> {
    let column = broadcast(&Cell::Str(label.to_string()), batch.num_rows());
    let schema = batch.schema();
    let mut fields: Vec<Field> = Vec::with_capacity(schema.fields().len() + 1);
    let mut columns = Vec::with_capacity(fields.capacity());
    for (field, array) in schema.fields().iter().zip(batch.columns()) {
        if field.name() != DATA_LABEL_COLUMN {
            fields.push(field.as_ref().clone());
            columns.push(array.clone());
        }
    }
    fields.push(Field::new(DATA_LABEL_COLUMN, DataType::Utf8, false));
    columns.push(column);
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Int64Array, StringArray};
    use pretty_assertions::assert_eq;

    #[test]
    fn label_column_is_appended_or_replaced() -> anyhow::Result<()> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("data_label", DataType::Utf8, true),
            Field::new("id", DataType::Int64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["old", "old"])) as ArrayRef,
                Arc::new(Int64Array::from(vec![1, 2])),
            ],
        )?;
        let labelled = with_label(&batch, "set1")?;
        let names: Vec<_> = labelled.schema().fields().iter().map(|f| f.name().clone()).collect();
        assert_eq!(names, vec!["id", "data_label"]);
        assert_eq!(
            crate::table::column_cells(labelled.column(1).as_ref())?,
            vec![Cell::Str("set1".into()), Cell::Str("set1".into())]
        );
        Ok(())
    }
}
