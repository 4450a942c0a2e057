//! Table schema: row layout, column groups and indexes.
//!
//! The schema is persisted as `dbmeta.json`:
//!
//! ```json
//! {
//!   "columns": [{"name": "id", "type": "sint64"}, {"name": "name", "type": "strzero"}],
//!   "colgroups": [{"name": "names", "columns": ["name"], "encoding": "dictzip"}],
//!   "indexes": [{"name": "pk", "fields": ["id"], "unique": true}]
//! }
//! ```
//!
//! Columns not named by any column group are grouped implicitly: every
//! inplace-updatable column gets a group of its own, the rest share one
//! group called `rest`.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use crate::index::IntKeyShape;
use strata_codec::{
    encode_key, encode_key_payloads, fixed_key_len, key_field_width, ColumnMeta, ColumnType,
    Schema, Value,
};
use strata_storage::write_atomic;

/// Name of the implicit group of remaining columns.
pub const REST_COLGROUP: &str = "rest";

/// Physical encoding of a column group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreEncoding {
    /// Chosen from the column types when the segment is built.
    #[default]
    Auto,
    /// Fixed stride byte array.
    FixLen,
    /// Minimum-subtracted bit-packed integers.
    ZipInt,
    /// zstd with a trained dictionary.
    DictZip,
    /// Offsets plus uncompressed heap.
    Plain,
}

/// Declared column group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColgroupDef {
    /// Group name, used for file names.
    pub name: String,
    /// Member column names, in storage order.
    pub columns: Vec<String>,
    /// Requested encoding for readonly segments.
    #[serde(default)]
    pub encoding: StoreEncoding,
}

/// Declared index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name; defaults to the field names joined by commas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Key fields, most significant first.
    pub fields: Vec<String>,
    /// Whether at most one live row may hold a key.
    #[serde(default)]
    pub unique: bool,
}

/// Serialized form of a table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchemaDef {
    /// Row columns.
    pub columns: Vec<ColumnMeta>,
    /// Explicit column groups.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub colgroups: Vec<ColgroupDef>,
    /// Indexes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDef>,
}

impl TableSchemaDef {
    /// Starts a definition with the given row columns.
    #[must_use]
    pub fn new(columns: Vec<ColumnMeta>) -> Self {
        Self {
            columns,
            colgroups: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Adds an explicit column group.
    #[must_use]
    pub fn colgroup(mut self, name: &str, columns: &[&str], encoding: StoreEncoding) -> Self {
        self.colgroups.push(ColgroupDef {
            name: name.to_string(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            encoding,
        });
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, name: &str, fields: &[&str], unique: bool) -> Self {
        self.indexes.push(IndexDef {
            name: Some(name.to_string()),
            fields: fields.iter().map(|c| (*c).to_string()).collect(),
            unique,
        });
        self
    }

    /// Validates the definition.
    ///
    /// # Errors
    ///
    /// See [`TableSchema::new`].
    pub fn build(self) -> CoreResult<TableSchema> {
        TableSchema::new(self)
    }
}

/// A resolved column group.
#[derive(Debug, Clone)]
pub struct ColgroupSchema {
    /// Group name.
    pub name: String,
    /// Row column positions.
    pub columns: Vec<usize>,
    /// Layout of a group value.
    pub schema: Schema,
    /// Requested encoding.
    pub encoding: StoreEncoding,
    /// True when every member is inplace-updatable and fixed-width.
    pub inplace_updatable: bool,
}

impl ColgroupSchema {
    /// Returns the value width if it is fixed.
    #[must_use]
    pub fn fixed_len(&self) -> Option<usize> {
        self.schema.fixed_row_len()
    }

    /// Encoding used by writable segments.
    #[must_use]
    pub fn writable_encoding(&self) -> StoreEncoding {
        if self.fixed_len().is_some() {
            StoreEncoding::FixLen
        } else {
            StoreEncoding::Plain
        }
    }

    /// Encoding used when the group is written into a readonly segment.
    #[must_use]
    pub fn readonly_encoding(&self) -> StoreEncoding {
        if self.inplace_updatable {
            return StoreEncoding::FixLen;
        }
        match self.encoding {
            StoreEncoding::Auto => {
                if self.is_single_integer() {
                    StoreEncoding::ZipInt
                } else if self.fixed_len().is_some() {
                    StoreEncoding::FixLen
                } else {
                    StoreEncoding::DictZip
                }
            }
            other => other,
        }
    }

    /// Returns the integer type if the group is one integer column.
    #[must_use]
    pub fn single_integer_type(&self) -> Option<ColumnType> {
        match self.schema.columns() {
            [col] if col.ty.is_integer() => Some(col.ty),
            _ => None,
        }
    }

    fn is_single_integer(&self) -> bool {
        self.single_integer_type().is_some()
    }
}

/// A resolved index.
#[derive(Debug, Clone)]
pub struct IndexSchema {
    /// Index name.
    pub name: String,
    /// Row column positions of the key fields.
    pub columns: Vec<usize>,
    /// Layout of the key fields.
    pub schema: Schema,
    /// Whether keys are unique among live rows.
    pub unique: bool,
}

impl IndexSchema {
    /// Returns the encoded key length if every field has a fixed width.
    #[must_use]
    pub fn fixed_key_len(&self) -> Option<usize> {
        fixed_key_len(&self.schema)
    }

    /// Returns the key shape if the index has a single integer field.
    #[must_use]
    pub fn int_key_shape(&self) -> Option<IntKeyShape> {
        if self.schema.len() != 1 || !self.schema.column(0).ty.is_integer() {
            return None;
        }
        let col = self.schema.column(0);
        Some(IntKeyShape {
            tag: col.ty.tag() + 1,
            width: key_field_width(col)? - 1,
        })
    }

    /// Returns true if the leading key field is a string.
    #[must_use]
    pub fn is_string_keyed(&self) -> bool {
        self.schema.column(0).ty == ColumnType::StrZero
    }

    /// Encodes typed key values.
    ///
    /// # Errors
    ///
    /// Returns an error if the values do not fit the key fields.
    pub fn encode_key(&self, values: &[Value]) -> CoreResult<Vec<u8>> {
        Ok(encode_key(&self.schema, values)?)
    }
}

/// Row split for storage: one value per column group and one key per index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRow {
    /// Column group values in group order.
    pub colgroups: Vec<Vec<u8>>,
    /// Index keys in index order.
    pub keys: Vec<Vec<u8>>,
}

/// A validated table schema.
#[derive(Debug, Clone)]
pub struct TableSchema {
    def: TableSchemaDef,
    row: Schema,
    colgroups: Vec<ColgroupSchema>,
    indexes: Vec<IndexSchema>,
    column_map: Vec<(usize, usize)>,
}

impl TableSchema {
    /// Validates a definition and resolves column groups and indexes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] for unknown or repeated column
    /// names, inplace-updatable columns that are not fixed-width, and
    /// encodings the group's columns cannot use.
    pub fn new(def: TableSchemaDef) -> CoreResult<Self> {
        let row = Schema::new(def.columns.clone())?;
        if row.is_empty() {
            return Err(CoreError::invalid_format("table has no columns"));
        }
        for col in row.columns() {
            if col.inplace_updatable && col.width().is_none() {
                return Err(CoreError::invalid_format(format!(
                    "inplace-updatable column '{}' must be fixed-width",
                    col.name
                )));
            }
        }

        let mut covered = vec![false; row.len()];
        let mut colgroups = Vec::new();
        let mut names = HashSet::new();
        for cg in &def.colgroups {
            let columns = resolve_columns(&row, &cg.columns, &cg.name)?;
            for &c in &columns {
                if covered[c] {
                    return Err(CoreError::invalid_format(format!(
                        "column '{}' is in more than one column group",
                        row.column(c).name
                    )));
                }
                covered[c] = true;
            }
            colgroups.push(make_colgroup(&row, &cg.name, columns, cg.encoding)?);
        }
        for (c, col) in row.columns().iter().enumerate() {
            if !covered[c] && col.inplace_updatable {
                covered[c] = true;
                colgroups.push(make_colgroup(&row, &col.name, vec![c], StoreEncoding::FixLen)?);
            }
        }
        let rest: Vec<usize> = (0..row.len()).filter(|&c| !covered[c]).collect();
        if !rest.is_empty() {
            colgroups.push(make_colgroup(&row, REST_COLGROUP, rest, StoreEncoding::Auto)?);
        }
        for cg in &colgroups {
            if !names.insert(cg.name.clone()) {
                return Err(CoreError::invalid_format(format!(
                    "duplicate column group '{}'",
                    cg.name
                )));
            }
        }

        let mut column_map = vec![(0, 0); row.len()];
        for (g, cg) in colgroups.iter().enumerate() {
            for (pos, &c) in cg.columns.iter().enumerate() {
                column_map[c] = (g, pos);
            }
        }

        let mut indexes = Vec::new();
        let mut index_names = HashSet::new();
        for idx in &def.indexes {
            let name = idx.name.clone().unwrap_or_else(|| idx.fields.join(","));
            let columns = resolve_columns(&row, &idx.fields, &name)?;
            if !index_names.insert(name.clone()) {
                return Err(CoreError::invalid_format(format!("duplicate index '{name}'")));
            }
            let schema = row.project(&columns)?;
            indexes.push(IndexSchema {
                name,
                columns,
                schema,
                unique: idx.unique,
            });
        }

        Ok(Self {
            def,
            row,
            colgroups,
            indexes,
            column_map,
        })
    }

    /// Loads and validates `dbmeta.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let data = std::fs::read(path)?;
        let def: TableSchemaDef = serde_json::from_slice(&data)?;
        Self::new(def)
    }

    /// Writes `dbmeta.json` atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        let data = serde_json::to_vec_pretty(&self.def)?;
        write_atomic(path, &data, true)?;
        Ok(())
    }

    /// Returns the serialized definition.
    #[must_use]
    pub fn def(&self) -> &TableSchemaDef {
        &self.def
    }

    /// Returns the full row layout.
    #[must_use]
    pub fn row(&self) -> &Schema {
        &self.row
    }

    /// Returns the column groups.
    #[must_use]
    pub fn colgroups(&self) -> &[ColgroupSchema] {
        &self.colgroups
    }

    /// Returns the indexes.
    #[must_use]
    pub fn indexes(&self) -> &[IndexSchema] {
        &self.indexes
    }

    /// Returns index `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of range.
    #[must_use]
    pub fn index(&self, i: usize) -> &IndexSchema {
        &self.indexes[i]
    }

    /// Finds an index by name.
    #[must_use]
    pub fn index_id(&self, name: &str) -> Option<usize> {
        self.indexes.iter().position(|i| i.name == name)
    }

    /// Returns `(colgroup, position)` holding row column `col`.
    ///
    /// # Panics
    ///
    /// Panics if `col` is out of range.
    #[must_use]
    pub fn column_location(&self, col: usize) -> (usize, usize) {
        self.column_map[col]
    }

    /// Returns true if some index includes row column `col`.
    #[must_use]
    pub fn is_indexed(&self, col: usize) -> bool {
        self.indexes.iter().any(|i| i.columns.contains(&col))
    }

    /// Splits a row into column group values and index keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the row does not parse under the row schema.
    pub fn prepare_row(&self, row: &[u8]) -> CoreResult<PreparedRow> {
        let payloads = self.row.parse_row(row)?;
        let pick = |cols: &[usize]| cols.iter().map(|&c| payloads[c]).collect::<Vec<_>>();

        let colgroups = self
            .colgroups
            .iter()
            .map(|cg| cg.schema.combine_row(&pick(&cg.columns)))
            .collect::<Result<Vec<_>, _>>()?;
        let keys = self
            .indexes
            .iter()
            .map(|idx| encode_key_payloads(&idx.schema, &pick(&idx.columns)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PreparedRow { colgroups, keys })
    }

    /// Reassembles a full row from its column group values.
    ///
    /// # Errors
    ///
    /// Returns an error if a value does not parse under its group schema.
    pub fn combine_colgroups(&self, values: &[Vec<u8>]) -> CoreResult<Vec<u8>> {
        assert_eq!(values.len(), self.colgroups.len(), "column group count");
        let parsed = self
            .colgroups
            .iter()
            .zip(values)
            .map(|(cg, v)| cg.schema.parse_row(v))
            .collect::<Result<Vec<_>, _>>()?;
        let payloads: Vec<&[u8]> = self
            .column_map
            .iter()
            .map(|&(g, pos)| parsed[g][pos])
            .collect();
        Ok(self.row.combine_row(&payloads)?)
    }

    /// Encodes the columns `cols` out of already fetched group values.
    ///
    /// `values[g]` must be present for every group holding a requested
    /// column.
    ///
    /// # Errors
    ///
    /// Returns an error if a value does not parse.
    pub fn project_colgroups(
        &self,
        cols: &[usize],
        values: &[Option<Vec<u8>>],
    ) -> CoreResult<Vec<u8>> {
        let mut parsed: Vec<Option<Vec<&[u8]>>> = vec![None; self.colgroups.len()];
        for (g, value) in values.iter().enumerate() {
            if let Some(v) = value {
                parsed[g] = Some(self.colgroups[g].schema.parse_row(v)?);
            }
        }
        let mut payloads = Vec::with_capacity(cols.len());
        for &c in cols {
            let (g, pos) = self.column_map[c];
            let Some(group) = &parsed[g] else {
                return Err(CoreError::invalid_operation(format!(
                    "column group '{}' was not fetched",
                    self.colgroups[g].name
                )));
            };
            payloads.push(group[pos]);
        }
        let projected = self.row.project(cols)?;
        Ok(projected.combine_row(&payloads)?)
    }
}

fn resolve_columns(row: &Schema, names: &[String], owner: &str) -> CoreResult<Vec<usize>> {
    if names.is_empty() {
        return Err(CoreError::invalid_format(format!("'{owner}' has no columns")));
    }
    names
        .iter()
        .map(|n| {
            row.column_index(n).ok_or_else(|| {
                CoreError::invalid_format(format!("'{owner}' names unknown column '{n}'"))
            })
        })
        .collect()
}

fn make_colgroup(
    row: &Schema,
    name: &str,
    columns: Vec<usize>,
    encoding: StoreEncoding,
) -> CoreResult<ColgroupSchema> {
    let schema = row.project(&columns)?;
    let inplace_updatable = schema
        .columns()
        .iter()
        .all(|c| c.inplace_updatable && c.width().is_some());
    let cg = ColgroupSchema {
        name: name.to_string(),
        columns,
        schema,
        encoding,
        inplace_updatable,
    };
    match encoding {
        StoreEncoding::ZipInt if !cg.is_single_integer() => Err(CoreError::invalid_format(
            format!("zipint group '{name}' must hold exactly one integer column"),
        )),
        StoreEncoding::FixLen if cg.fixed_len().is_none() => Err(CoreError::invalid_format(
            format!("fixlen group '{name}' has variable-width columns"),
        )),
        _ => Ok(cg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_codec::RowCodec;
    use tempfile::tempdir;

    fn people() -> TableSchemaDef {
        TableSchemaDef::new(vec![
            ColumnMeta::new("id", ColumnType::Sint64),
            ColumnMeta::new("name", ColumnType::StrZero),
            ColumnMeta::new("hits", ColumnType::Uint32).inplace(),
            ColumnMeta::new("age", ColumnType::Uint08),
        ])
        .index("pk", &["id"], true)
        .index("by_name", &["name"], false)
    }

    #[test]
    fn implicit_colgroups() {
        let schema = people().build().unwrap();
        let names: Vec<_> = schema.colgroups().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["hits", REST_COLGROUP]);
        assert!(schema.colgroups()[0].inplace_updatable);
        assert_eq!(schema.column_location(0), (1, 0));
        assert_eq!(schema.column_location(2), (0, 0));
        assert_eq!(schema.column_location(3), (1, 2));
        assert_eq!(schema.colgroups()[1].readonly_encoding(), StoreEncoding::DictZip);
    }

    #[test]
    fn explicit_colgroups_and_encodings() {
        let schema = people()
            .colgroup("ids", &["id"], StoreEncoding::Auto)
            .build()
            .unwrap();
        let ids = &schema.colgroups()[0];
        assert_eq!(ids.readonly_encoding(), StoreEncoding::ZipInt);
        assert_eq!(ids.writable_encoding(), StoreEncoding::FixLen);

        let bad = people().colgroup("n", &["name"], StoreEncoding::FixLen).build();
        assert!(bad.is_err());
        let bad = people().colgroup("n", &["name"], StoreEncoding::ZipInt).build();
        assert!(bad.is_err());
    }

    #[test]
    fn rejects_bad_definitions() {
        let twice = people()
            .colgroup("a", &["id"], StoreEncoding::Auto)
            .colgroup("b", &["id"], StoreEncoding::Auto)
            .build();
        assert!(twice.is_err());
        assert!(people().index("x", &["nope"], false).build().is_err());
        assert!(people().index("pk", &["age"], false).build().is_err());

        let var_inplace =
            TableSchemaDef::new(vec![ColumnMeta::new("s", ColumnType::StrZero).inplace()]);
        assert!(var_inplace.build().is_err());
    }

    #[test]
    fn prepare_and_combine() {
        let schema = people().build().unwrap();
        let row = schema
            .row()
            .encode(&vec![
                Value::Int(7),
                Value::from("ann"),
                Value::Uint(3),
                Value::Uint(40),
            ])
            .unwrap();

        let prepared = schema.prepare_row(&row).unwrap();
        assert_eq!(prepared.colgroups.len(), 2);
        assert_eq!(prepared.keys.len(), 2);
        assert_eq!(
            prepared.keys[0],
            schema.index(0).encode_key(&[Value::Int(7)]).unwrap()
        );
        assert_eq!(schema.combine_colgroups(&prepared.colgroups).unwrap(), row);

        let values = vec![None, Some(prepared.colgroups[1].clone())];
        let projected = schema.project_colgroups(&[3, 0], &values).unwrap();
        let projection = schema.row().project(&[3, 0]).unwrap();
        assert_eq!(
            projection.decode(&projected).unwrap(),
            vec![Value::Uint(40), Value::Int(7)]
        );
        assert!(schema.project_colgroups(&[2], &values).is_err());
    }

    #[test]
    fn save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dbmeta.json");
        let schema = people().build().unwrap();
        schema.save(&path).unwrap();

        let loaded = TableSchema::load(&path).unwrap();
        assert_eq!(loaded.def(), schema.def());
        assert_eq!(loaded.index_id("by_name"), Some(1));
        assert!(loaded.is_indexed(1));
        assert!(!loaded.is_indexed(2));
    }
}
