//! Binary-columnar row storage and the JSON columnar envelope.
//!
//! A binary-columnar artifact is four files:
//!
//! - `<name>.binary-columnar.bin`: row payloads (one UTF-8 JSON object each), concatenated
//! - `<name>.binary-columnar.offsets.bin`: one little-endian `u64` start offset per row
//! - `<name>.binary-columnar.lengths.varint`: one unsigned LEB128 length per row
//! - `<name>.binary-columnar.meta.json`: format, row count, file names and shared tables

use std::io::Cursor;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ArtifactError, Result};
use crate::kind::ArtifactKind;
use crate::path::RelativeSafePath;
use crate::reader::read_json_value;
use crate::util::{atomic_write, read_file_limited};

pub const BINARY_COLUMNAR_FORMAT: &str = "binary-columnar-v1";
const SUPPORTED_BYTE_ORDERS: &[&str] = &["le", "little", "little-endian"];

/// Locations of the four binary-columnar files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnarSidecars {
    pub meta: PathBuf,
    pub data: Option<PathBuf>,
    pub offsets: Option<PathBuf>,
    pub lengths: Option<PathBuf>,
}

impl ColumnarSidecars {
    /// Sidecars found by file name only; the meta decides where the other files live.
    pub fn legacy(dir: &Path, stem: &str) -> Self {
        Self {
            meta: default_file(dir, stem, "meta.json"),
            data: None,
            offsets: None,
            lengths: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryColumnarMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_order: Option<String>,
    #[serde(default)]
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offsets: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lengths: Option<String>,
    #[serde(default)]
    pub arrays: ColumnarArrays,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnarArrays {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_table: Vec<String>,
}

fn default_file(dir: &Path, stem: &str, suffix: &str) -> PathBuf {
    dir.join(format!("{stem}.binary-columnar.{suffix}"))
}

fn parse_meta(name: &str, path: &Path, raw: Value) -> Result<BinaryColumnarMeta> {
    let Value::Object(mut obj) = raw else {
        return Err(ArtifactError::columnar(name, "meta must be an object"));
    };
    // Writers may nest the scalar fields under `fields` and keep `arrays` at the top level.
    let arrays = obj.remove("arrays");
    let mut fields = match obj.remove("fields") {
        Some(Value::Object(fields)) => fields,
        Some(other) => {
            obj.insert("fields".to_string(), other);
            obj
        }
        None => obj,
    };
    if let Some(arrays) = arrays {
        fields.entry("arrays").or_insert(arrays);
    }
    let meta: BinaryColumnarMeta = serde_json::from_value(Value::Object(fields))
        .map_err(|err| ArtifactError::parse_invalid(path, &err))?;

    if let Some(format) = meta.format.as_deref() {
        if !format.trim().eq_ignore_ascii_case(BINARY_COLUMNAR_FORMAT) {
            return Err(ArtifactError::columnar(
                name,
                format!("unsupported format {format}; expected {BINARY_COLUMNAR_FORMAT}"),
            ));
        }
    }
    if let Some(order) = meta.byte_order.as_deref() {
        let order = order.trim().to_ascii_lowercase();
        if !SUPPORTED_BYTE_ORDERS.contains(&order.as_str()) {
            return Err(ArtifactError::columnar(
                name,
                format!("unsupported byteOrder {order}"),
            ));
        }
    }
    Ok(meta)
}

/// Read the meta sidecar only.
pub fn read_binary_columnar_meta(
    name: &str,
    sidecars: &ColumnarSidecars,
    max_bytes: u64,
) -> Result<BinaryColumnarMeta> {
    let raw = read_json_value(&sidecars.meta, max_bytes)?;
    parse_meta(name, &sidecars.meta, raw)
}

fn resolve_layout_path(
    name: &str,
    dir: &Path,
    declared: Option<&str>,
    explicit: Option<&PathBuf>,
    default_suffix: &str,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.clone());
    }
    let rel = declared
        .map(str::to_string)
        .unwrap_or_else(|| format!("{name}.binary-columnar.{default_suffix}"));
    let safe = RelativeSafePath::new(&rel).map_err(|reason| ArtifactError::UnsafePath {
        path: rel.clone(),
        reason,
    })?;
    Ok(safe.resolve(dir))
}

/// Decode every row of a binary-columnar artifact, in order.
pub fn read_binary_columnar_rows(
    name: &str,
    sidecars: &ColumnarSidecars,
    max_bytes: u64,
) -> Result<Vec<Value>> {
    let meta = read_binary_columnar_meta(name, sidecars, max_bytes)?;
    let dir = sidecars.meta.parent().unwrap_or_else(|| Path::new("."));
    let data_path = resolve_layout_path(
        name,
        dir,
        meta.data.as_deref(),
        sidecars.data.as_ref(),
        "bin",
    )?;
    let offsets_path = resolve_layout_path(
        name,
        dir,
        meta.offsets.as_deref(),
        sidecars.offsets.as_ref(),
        "offsets.bin",
    )?;
    let lengths_path = resolve_layout_path(
        name,
        dir,
        meta.lengths.as_deref(),
        sidecars.lengths.as_ref(),
        "lengths.varint",
    )?;

    let count = usize::try_from(meta.count)
        .map_err(|_| ArtifactError::columnar(name, "row count does not fit in memory"))?;
    if count == 0 {
        return Ok(Vec::new());
    }
    let offsets = decode_offsets(name, &read_file_limited(&offsets_path, max_bytes)?)?;
    let lengths = decode_lengths(name, &read_file_limited(&lengths_path, max_bytes)?)?;
    if offsets.len() < count || lengths.len() < count {
        return Err(ArtifactError::columnar(
            name,
            format!(
                "frame metadata count mismatch (count={count}, offsets={}, lengths={})",
                offsets.len(),
                lengths.len()
            ),
        ));
    }
    let data = read_file_limited(&data_path, max_bytes)?;

    let mut rows = Vec::with_capacity(count);
    for idx in 0..count {
        let start = offsets[idx];
        let end = start
            .checked_add(lengths[idx])
            .filter(|end| *end <= data.len() as u64)
            .ok_or_else(|| ArtifactError::columnar(name, format!("row {idx} data truncated")))?;
        let payload = &data[start as usize..end as usize];
        let mut row: Value = serde_json::from_slice(payload)
            .map_err(|err| ArtifactError::line_invalid(&data_path, idx + 1, &err))?;
        resolve_file_ref(name, &mut row, &meta.arrays.file_table)?;
        rows.push(row);
    }
    Ok(rows)
}

fn resolve_file_ref(name: &str, row: &mut Value, file_table: &[String]) -> Result<()> {
    let Value::Object(obj) = row else {
        return Err(ArtifactError::columnar(name, "row payload must be an object"));
    };
    if !obj.get("file").map_or(true, Value::is_null) {
        return Ok(());
    }
    let Some(file_ref) = obj.get("fileRef").and_then(Value::as_u64) else {
        return Ok(());
    };
    let file = file_table
        .get(file_ref as usize)
        .ok_or_else(|| ArtifactError::columnar(name, format!("fileRef {file_ref} out of range")))?;
    obj.insert("file".to_string(), Value::String(file.clone()));
    obj.remove("fileRef");
    Ok(())
}

fn decode_offsets(name: &str, bytes: &[u8]) -> Result<Vec<u64>> {
    if bytes.len() % 8 != 0 {
        return Err(ArtifactError::columnar(
            name,
            "offsets length is not a multiple of 8",
        ));
    }
    let mut cursor = Cursor::new(bytes);
    let mut out = Vec::with_capacity(bytes.len() / 8);
    while (cursor.position() as usize) < bytes.len() {
        out.push(cursor.read_u64::<LittleEndian>()?);
    }
    Ok(out)
}

/// Decode a run of unsigned LEB128 integers.
pub fn decode_lengths(name: &str, bytes: &[u8]) -> Result<Vec<u64>> {
    let mut out = Vec::new();
    let mut value = 0u64;
    let mut shift = 0u32;
    for &byte in bytes {
        if shift >= 64 {
            return Err(ArtifactError::columnar(name, "varint overflows u64"));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            out.push(value);
            value = 0;
            shift = 0;
        } else {
            shift += 7;
        }
    }
    if shift != 0 {
        return Err(ArtifactError::columnar(name, "truncated varint"));
    }
    Ok(out)
}

pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Write `rows` as a binary-columnar artifact under `dir`.
///
/// Rows whose `file` appears in the shared table are written with a `fileRef` instead.
pub fn write_binary_columnar(
    dir: &Path,
    kind: ArtifactKind,
    rows: &[Value],
) -> Result<ColumnarSidecars> {
    let name = kind.as_str();
    let sidecars = ColumnarSidecars {
        meta: default_file(dir, name, "meta.json"),
        data: Some(default_file(dir, name, "bin")),
        offsets: Some(default_file(dir, name, "offsets.bin")),
        lengths: Some(default_file(dir, name, "lengths.varint")),
    };
    let mut file_table: Vec<String> = Vec::new();
    let mut file_index = std::collections::HashMap::new();
    let mut data = Vec::new();
    let mut offsets = Vec::with_capacity(rows.len() * 8);
    let mut lengths = Vec::new();

    for row in rows {
        let mut row = row.clone();
        if let Value::Object(obj) = &mut row {
            if let Some(Value::String(file)) = obj.remove("file") {
                let idx = *file_index.entry(file.clone()).or_insert_with(|| {
                    file_table.push(file);
                    file_table.len() - 1
                });
                obj.insert("fileRef".to_string(), Value::from(idx as u64));
            }
        }
        let payload = serde_json::to_vec(&row)?;
        offsets.write_u64::<LittleEndian>(data.len() as u64)?;
        encode_varint(payload.len() as u64, &mut lengths);
        data.extend_from_slice(&payload);
    }

    let file_name = |path: &Option<PathBuf>| {
        path.as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    };
    let meta = BinaryColumnarMeta {
        format: Some(BINARY_COLUMNAR_FORMAT.to_string()),
        byte_order: Some("le".to_string()),
        count: rows.len() as u64,
        data: file_name(&sidecars.data),
        offsets: file_name(&sidecars.offsets),
        lengths: file_name(&sidecars.lengths),
        arrays: ColumnarArrays { file_table },
    };
    if let (Some(data_path), Some(offsets_path), Some(lengths_path)) =
        (&sidecars.data, &sidecars.offsets, &sidecars.lengths)
    {
        atomic_write(data_path, &data)?;
        atomic_write(offsets_path, &offsets)?;
        atomic_write(lengths_path, &lengths)?;
    }
    atomic_write(&sidecars.meta, &serde_json::to_vec_pretty(&meta)?)?;
    Ok(sidecars)
}

/// Whether `value` is a `{format: "columnar", ...}` envelope.
pub fn is_columnar_envelope(value: &Value) -> bool {
    value.get("format").and_then(Value::as_str) == Some("columnar")
}

/// Expand a columnar envelope into row objects.
///
/// Columns with a table store indices into it. Missing array slots become `null`.
pub fn inflate_columnar_rows(name: &str, value: &Value) -> Result<Vec<Value>> {
    let columns: Vec<&str> = value
        .get("columns")
        .and_then(Value::as_array)
        .ok_or_else(|| ArtifactError::columnar(name, "envelope missing columns"))?
        .iter()
        .map(|c| {
            c.as_str()
                .ok_or_else(|| ArtifactError::columnar(name, "column names must be strings"))
        })
        .collect::<Result<_>>()?;
    let arrays = value
        .get("arrays")
        .and_then(Value::as_object)
        .ok_or_else(|| ArtifactError::columnar(name, "envelope missing arrays"))?;
    let tables = value.get("tables").and_then(Value::as_object);
    let longest = columns
        .iter()
        .filter_map(|c| arrays.get(*c).and_then(Value::as_array).map(Vec::len))
        .max()
        .unwrap_or(0);
    let length = match value.get("length").and_then(Value::as_u64) {
        Some(declared) => match usize::try_from(declared) {
            Ok(length) if length <= longest => length,
            _ => return Err(ArtifactError::columnar(name, "length exceeds column data")),
        },
        None => longest,
    };

    let mut rows = Vec::with_capacity(length);
    for idx in 0..length {
        let mut row = Map::new();
        for column in &columns {
            let raw = arrays
                .get(*column)
                .and_then(Value::as_array)
                .and_then(|values| values.get(idx))
                .cloned()
                .unwrap_or(Value::Null);
            let table = tables
                .and_then(|tables| tables.get(*column))
                .and_then(Value::as_array);
            let cell = match (table, raw.as_u64()) {
                (Some(table), Some(slot)) => table.get(slot as usize).cloned().ok_or_else(|| {
                    ArtifactError::columnar(
                        name,
                        format!("column {column} index {slot} out of table range"),
                    )
                })?,
                _ => raw,
            };
            row.insert((*column).to_string(), cell);
        }
        rows.push(Value::Object(row));
    }
    Ok(rows)
}
