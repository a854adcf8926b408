//! Local file connector. The connection string is the file path.
//!
//! Format comes from the `format` parameter, then the registered type name,
//! then the file extension. Writes append to whatever is already there.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema};
use arrow::error::ArrowError;
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use fieldflow_utils::{ConnectorError, FieldflowResult, Record, Value};
use tokio::io::AsyncWriteExt;

use super::{field_union, post_filter, run_blocking};
use crate::destinations::DestinationWriter;
use crate::pipeline::DataSourceConfig;
use crate::sources::traits::{fields_of_first, SourceReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Json,
    JsonLines,
    Arrow,
}

impl FileFormat {
    fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "csv" | "tsv" => Some(FileFormat::Csv),
            "json" => Some(FileFormat::Json),
            "jsonl" | "ndjson" | "jsonlines" => Some(FileFormat::JsonLines),
            "arrow" | "ipc" | "feather" => Some(FileFormat::Arrow),
            _ => None,
        }
    }

    pub fn resolve(connector_type: &str, config: &DataSourceConfig) -> FieldflowResult<Self> {
        let from_ext = || {
            Path::new(config.connection_string.trim())
                .extension()
                .and_then(|e| e.to_str())
                .and_then(FileFormat::from_name)
        };
        config
            .param("format")
            .and_then(FileFormat::from_name)
            .or_else(|| FileFormat::from_name(connector_type))
            .or_else(from_ext)
            .ok_or_else(|| {
                ConnectorError::new(
                    connector_type,
                    format!(
                        "cannot infer file format for '{}'; set the 'format' parameter",
                        config.connection_string
                    ),
                )
                .into()
            })
    }
}

/// One instance per registered type name (`csv`, `json`, `jsonl`, `arrow`, `file`).
#[derive(Debug, Clone)]
pub struct FileConnector {
    connector_type: String,
}

impl FileConnector {
    pub fn new(connector_type: impl Into<String>) -> Self {
        Self { connector_type: connector_type.into() }
    }

    fn path(&self, config: &DataSourceConfig) -> FieldflowResult<PathBuf> {
        let raw = config.connection_string.trim();
        if raw.is_empty() {
            return Err(ConnectorError::new(
                self.connector_type.as_str(),
                "connection string must be a file path",
            )
            .into());
        }
        Ok(PathBuf::from(raw))
    }

    fn err(&self, message: impl Into<String>) -> ConnectorError {
        ConnectorError::new(self.connector_type.as_str(), message)
    }

    fn wrap<E>(&self, message: impl Into<String>, cause: E) -> ConnectorError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ConnectorError::wrap(self.connector_type.as_str(), message, cause)
    }

    async fn read_all(&self, config: &DataSourceConfig) -> FieldflowResult<Vec<Record>> {
        let path = self.path(config)?;
        let format = FileFormat::resolve(&self.connector_type, config)?;
        if format == FileFormat::Arrow {
            let connector = self.clone();
            return run_blocking("arrow", move || connector.read_arrow(&path)).await;
        }

        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| self.wrap(format!("failed to read {}", path.display()), e))?;
        match format {
            FileFormat::Csv => self.parse_csv(&text, delimiter(config)),
            FileFormat::Json => self.parse_json(&text),
            FileFormat::JsonLines | FileFormat::Arrow => self.parse_json_lines(&text),
        }
    }

    fn parse_csv(&self, text: &str, delimiter: u8) -> FieldflowResult<Vec<Record>> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(text.as_bytes());
        let headers = reader
            .headers()
            .map_err(|e| self.wrap("failed to read CSV header", e))?
            .clone();
        let mut records = Vec::new();
        for (line, row) in reader.records().enumerate() {
            let row = row.map_err(|e| self.wrap(format!("malformed CSV row {}", line + 1), e))?;
            records.push(
                headers
                    .iter()
                    .zip(row.iter())
                    .map(|(h, v)| (h.to_string(), Value::from(v)))
                    .collect(),
            );
        }
        Ok(records)
    }

    fn parse_json(&self, text: &str) -> FieldflowResult<Vec<Record>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let json: serde_json::Value =
            serde_json::from_str(text).map_err(|e| self.wrap("invalid JSON document", e))?;
        match json {
            serde_json::Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    Record::from_json(item)
                        .ok_or_else(|| self.err(format!("element {i} is not a JSON object")).into())
                })
                .collect(),
            obj @ serde_json::Value::Object(_) => Ok(Record::from_json(obj).into_iter().collect()),
            _ => Err(self.err("JSON document must be an array of objects or an object").into()),
        }
    }

    fn parse_json_lines(&self, text: &str) -> FieldflowResult<Vec<Record>> {
        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                let json: serde_json::Value = serde_json::from_str(line)
                    .map_err(|e| self.wrap(format!("invalid JSON on line {}", i + 1), e))?;
                Record::from_json(json)
                    .ok_or_else(|| self.err(format!("line {} is not a JSON object", i + 1)).into())
            })
            .collect()
    }

    fn read_arrow(&self, path: &Path) -> FieldflowResult<Vec<Record>> {
        let file = std::fs::File::open(path)
            .map_err(|e| self.wrap(format!("failed to open {}", path.display()), e))?;
        let reader = FileReader::try_new(file, None)
            .map_err(|e| self.wrap("invalid Arrow IPC file", e))?;
        let mut records = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|e| self.wrap("failed to read Arrow batch", e))?;
            records.extend(
                batch_to_records(&batch).map_err(|e| self.wrap("unsupported Arrow column", e))?,
            );
        }
        Ok(records)
    }

    fn write_arrow(&self, path: &Path, records: Vec<Record>) -> FieldflowResult<()> {
        let mut all = if path.exists() { self.read_arrow(path)? } else { Vec::new() };
        all.extend(records);
        let batch =
            records_to_batch(&all).map_err(|e| self.wrap("failed to build Arrow batch", e))?;
        let file = std::fs::File::create(path)
            .map_err(|e| self.wrap(format!("failed to create {}", path.display()), e))?;
        let mut writer = FileWriter::try_new(file, &batch.schema())
            .map_err(|e| self.wrap("failed to start Arrow IPC writer", e))?;
        writer.write(&batch).map_err(|e| self.wrap("failed to write Arrow batch", e))?;
        writer.finish().map_err(|e| self.wrap("failed to finish Arrow IPC file", e))?;
        Ok(())
    }

    async fn existing_csv_header(
        &self,
        path: &Path,
        delimiter: u8,
    ) -> FieldflowResult<Option<Vec<String>>> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.wrap(format!("failed to read {}", path.display()), e).into()),
        };
        if text.trim().is_empty() {
            return Ok(None);
        }
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .from_reader(text.as_bytes());
        let headers = reader.headers().map_err(|e| self.wrap("failed to read CSV header", e))?;
        Ok(Some(headers.iter().map(str::to_string).collect()))
    }

    async fn append(&self, path: &Path, bytes: &[u8]) -> FieldflowResult<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| self.wrap(format!("failed to open {} for append", path.display()), e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| self.wrap(format!("failed to append to {}", path.display()), e))?;
        file.flush()
            .await
            .map_err(|e| self.wrap(format!("failed to flush {}", path.display()), e))?;
        Ok(())
    }

    async fn write_csv(
        &self,
        path: &Path,
        delimiter: u8,
        records: &[Record],
    ) -> FieldflowResult<()> {
        let existing = self.existing_csv_header(path, delimiter).await?;
        let header = existing.clone().unwrap_or_else(|| field_union(records));
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .from_writer(Vec::new());
        if existing.is_none() {
            writer.write_record(&header).map_err(|e| self.wrap("failed to encode CSV header", e))?;
        }
        for record in records {
            let row: Vec<String> = header
                .iter()
                .map(|h| record.get(h).map(Value::to_string).unwrap_or_default())
                .collect();
            writer.write_record(&row).map_err(|e| self.wrap("failed to encode CSV row", e))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| self.err(format!("failed to flush CSV buffer: {e}")))?;
        self.append(path, &bytes).await
    }

    async fn write_json(&self, path: &Path, records: &[Record]) -> FieldflowResult<()> {
        let mut all = match tokio::fs::read_to_string(path).await {
            Ok(text) => self.parse_json(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(self.wrap(format!("failed to read {}", path.display()), e).into()),
        };
        all.extend_from_slice(records);
        let json = serde_json::Value::Array(all.iter().map(Record::to_json).collect());
        let bytes =
            serde_json::to_vec_pretty(&json).map_err(|e| self.wrap("failed to encode JSON", e))?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| self.wrap(format!("failed to write {}", path.display()), e).into())
    }

    async fn write_json_lines(&self, path: &Path, records: &[Record]) -> FieldflowResult<()> {
        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, &record.to_json())
                .map_err(|e| self.wrap("failed to encode JSON line", e))?;
            buf.push(b'\n');
        }
        self.append(path, &buf).await
    }
}

fn delimiter(config: &DataSourceConfig) -> u8 {
    match config.param("delimiter") {
        Some("\\t") | Some("tab") => b'\t',
        Some(d) => d.as_bytes().first().copied().unwrap_or(b','),
        None if config.connection_string.trim().ends_with(".tsv") => b'\t',
        None => b',',
    }
}

/// Convert one Arrow batch into records, one per row.
pub fn batch_to_records(batch: &RecordBatch) -> Result<Vec<Record>, ArrowError> {
    let schema = batch.schema();
    let columns: Vec<Vec<Value>> = batch
        .columns()
        .iter()
        .map(column_values)
        .collect::<Result<_, _>>()?;
    Ok((0..batch.num_rows())
        .map(|row| {
            schema
                .fields()
                .iter()
                .zip(columns.iter())
                .map(|(field, col)| (field.name().clone(), col[row].clone()))
                .collect()
        })
        .collect())
}

fn column_values(col: &ArrayRef) -> Result<Vec<Value>, ArrowError> {
    let dt = col.data_type();
    let values = if dt == &DataType::Boolean {
        let arr = col.as_boolean();
        (0..arr.len())
            .map(|i| if arr.is_null(i) { Value::Null } else { Value::Bool(arr.value(i)) })
            .collect()
    } else if dt.is_integer() {
        let cast = arrow::compute::cast(col, &DataType::Int64)?;
        let arr = cast.as_primitive::<Int64Type>();
        (0..arr.len())
            .map(|i| if arr.is_null(i) { Value::Null } else { Value::Int(arr.value(i)) })
            .collect()
    } else if dt.is_floating()
        || matches!(dt, DataType::Decimal128(..) | DataType::Decimal256(..))
    {
        let cast = arrow::compute::cast(col, &DataType::Float64)?;
        let arr = cast.as_primitive::<Float64Type>();
        (0..arr.len())
            .map(|i| if arr.is_null(i) { Value::Null } else { Value::Float(arr.value(i)) })
            .collect()
    } else {
        let cast = arrow::compute::cast(col, &DataType::Utf8)?;
        let arr = cast.as_string::<i32>();
        (0..arr.len())
            .map(|i| if arr.is_null(i) { Value::Null } else { Value::from(arr.value(i)) })
            .collect()
    };
    Ok(values)
}

#[derive(Clone, Copy, PartialEq)]
enum ColumnKind {
    Empty,
    Bool,
    Int,
    Float,
    Text,
}

fn widen(kind: ColumnKind, value: &Value) -> ColumnKind {
    use ColumnKind::*;
    match (kind, value) {
        (k, Value::Null) => k,
        (Empty, Value::Bool(_)) | (Bool, Value::Bool(_)) => Bool,
        (Empty, Value::Int(_)) | (Int, Value::Int(_)) => Int,
        (Empty | Int | Float, Value::Float(_)) | (Float, Value::Int(_)) => Float,
        _ => Text,
    }
}

/// Infer a schema over the records and pack them into one batch. Columns
/// mixing ints and floats widen to Float64; any other mix becomes Utf8.
pub fn records_to_batch(records: &[Record]) -> Result<RecordBatch, ArrowError> {
    let names = field_union(records);
    let mut fields = Vec::with_capacity(names.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(names.len());

    for name in &names {
        let cells: Vec<&Value> = records
            .iter()
            .map(|r| r.get(name).unwrap_or(&Value::Null))
            .collect();
        let kind = cells.iter().fold(ColumnKind::Empty, |k, v| widen(k, v));
        let (data_type, array): (DataType, ArrayRef) = match kind {
            ColumnKind::Bool => (
                DataType::Boolean,
                Arc::new(BooleanArray::from(
                    cells
                        .iter()
                        .map(|v| match v {
                            Value::Bool(b) => Some(*b),
                            _ => None,
                        })
                        .collect::<Vec<_>>(),
                )),
            ),
            ColumnKind::Int => (
                DataType::Int64,
                Arc::new(Int64Array::from(
                    cells
                        .iter()
                        .map(|v| match v {
                            Value::Int(i) => Some(*i),
                            _ => None,
                        })
                        .collect::<Vec<_>>(),
                )),
            ),
            ColumnKind::Float => (
                DataType::Float64,
                Arc::new(Float64Array::from(
                    cells.iter().map(|v| v.as_number().map(|n| n.as_f64())).collect::<Vec<_>>(),
                )),
            ),
            ColumnKind::Text | ColumnKind::Empty => (
                DataType::Utf8,
                Arc::new(StringArray::from(
                    cells
                        .iter()
                        .map(|v| if v.is_null() { None } else { Some(v.to_string()) })
                        .collect::<Vec<_>>(),
                )),
            ),
        };
        fields.push(Field::new(name.as_str(), data_type, true));
        arrays.push(array);
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
}

#[async_trait]
impl SourceReader for FileConnector {
    fn connector_type(&self) -> &str {
        &self.connector_type
    }

    async fn read(&self, config: &DataSourceConfig) -> FieldflowResult<Vec<Record>> {
        let records = self.read_all(config).await?;
        Ok(post_filter(config, records))
    }

    async fn discover_schema(&self, config: &DataSourceConfig) -> FieldflowResult<Vec<String>> {
        if FileFormat::resolve(&self.connector_type, config)? == FileFormat::Csv {
            let path = self.path(config)?;
            return Ok(self
                .existing_csv_header(&path, delimiter(config))
                .await?
                .unwrap_or_default());
        }
        let sample = SourceReader::dry_run_preview(self, config, 1).await?;
        Ok(fields_of_first(&sample))
    }

    async fn dry_run_preview(
        &self,
        config: &DataSourceConfig,
        limit: usize,
    ) -> FieldflowResult<Vec<Record>> {
        let mut records = self.read(config).await?;
        records.truncate(limit);
        Ok(records)
    }

    async fn test_connection(&self, config: &DataSourceConfig) -> FieldflowResult<()> {
        let path = self.path(config)?;
        FileFormat::resolve(&self.connector_type, config)?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        if tokio::fs::try_exists(parent).await.unwrap_or(false) {
            Ok(())
        } else {
            Err(self.err(format!("neither {} nor its directory exists", path.display())).into())
        }
    }
}

#[async_trait]
impl DestinationWriter for FileConnector {
    fn connector_type(&self) -> &str {
        &self.connector_type
    }

    async fn write(&self, config: &DataSourceConfig, records: &[Record]) -> FieldflowResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let path = self.path(config)?;
        match FileFormat::resolve(&self.connector_type, config)? {
            FileFormat::Csv => self.write_csv(&path, delimiter(config), records).await,
            FileFormat::Json => self.write_json(&path, records).await,
            FileFormat::JsonLines => self.write_json_lines(&path, records).await,
            FileFormat::Arrow => {
                let connector = self.clone();
                let records = records.to_vec();
                run_blocking("arrow", move || connector.write_arrow(&path, records)).await
            }
        }
    }

    async fn validate_schema(
        &self,
        config: &DataSourceConfig,
        fields: &[String],
    ) -> FieldflowResult<bool> {
        if FileFormat::resolve(&self.connector_type, config)? != FileFormat::Csv {
            return Ok(true);
        }
        let path = self.path(config)?;
        match self.existing_csv_header(&path, delimiter(config)).await? {
            Some(header) => Ok(fields.iter().all(|f| header.contains(f))),
            None => Ok(true),
        }
    }
}
