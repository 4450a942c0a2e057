//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data that maintains the
//! invariants the table expects: values fit their column types and
//! operation sequences only touch rows that exist.

use proptest::prelude::*;
use strata_codec::{ColumnMeta, ColumnType, Schema, Value};

/// Strategy for a value of column `col`.
pub fn value_strategy(col: &ColumnMeta) -> BoxedStrategy<Value> {
    let uint = |max: u64| (0..=max).prop_map(Value::Uint).boxed();
    let int = |min: i64, max: i64| (min..=max).prop_map(Value::Int).boxed();
    match col.ty {
        ColumnType::Uint08 => uint(u64::from(u8::MAX)),
        ColumnType::Uint16 => uint(u64::from(u16::MAX)),
        ColumnType::Uint32 => uint(u64::from(u32::MAX)),
        ColumnType::Uint64 | ColumnType::VarUint => any::<u64>().prop_map(Value::Uint).boxed(),
        ColumnType::Sint08 => int(i64::from(i8::MIN), i64::from(i8::MAX)),
        ColumnType::Sint16 => int(i64::from(i16::MIN), i64::from(i16::MAX)),
        ColumnType::Sint32 => int(i64::from(i32::MIN), i64::from(i32::MAX)),
        ColumnType::Sint64 | ColumnType::VarSint => any::<i64>().prop_map(Value::Int).boxed(),
        // Float32 values round-trip exactly only if they are f32 to begin with.
        ColumnType::Float32 => any::<i16>().prop_map(|v| Value::Float(f64::from(v) / 4.0)).boxed(),
        ColumnType::Float64 => (-1e12f64..1e12).prop_map(Value::Float).boxed(),
        ColumnType::Uuid | ColumnType::Fixed => {
            let width = col.width().unwrap_or(16);
            prop::collection::vec(any::<u8>(), width).prop_map(Value::Bytes).boxed()
        }
        ColumnType::Binary => {
            prop::collection::vec(any::<u8>(), 0..64).prop_map(Value::Bytes).boxed()
        }
        ColumnType::StrZero => text_strategy().prop_map(Value::Text).boxed(),
    }
}

/// Strategy for short printable strings without NUL bytes.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 _-]{0,24}").expect("Invalid regex")
}

/// Strategy for names drawn from a small alphabet, so prefixes collide.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-d]{1,6}").expect("Invalid regex")
}

/// Strategy for a full record of `schema`.
pub fn record_strategy(schema: &Schema) -> impl Strategy<Value = Vec<Value>> {
    schema
        .columns()
        .iter()
        .map(value_strategy)
        .collect::<Vec<_>>()
}

/// Strategy for a column definition of any type.
pub fn column_strategy(name: &'static str) -> impl Strategy<Value = ColumnMeta> {
    prop_oneof![
        Just(ColumnMeta::new(name, ColumnType::Uint08)),
        Just(ColumnMeta::new(name, ColumnType::Sint16)),
        Just(ColumnMeta::new(name, ColumnType::Uint32)),
        Just(ColumnMeta::new(name, ColumnType::Sint64)),
        Just(ColumnMeta::new(name, ColumnType::Float64)),
        Just(ColumnMeta::new(name, ColumnType::Uuid)),
        (1u32..8).prop_map(move |len| ColumnMeta::fixed(name, len)),
        Just(ColumnMeta::new(name, ColumnType::VarSint)),
        Just(ColumnMeta::new(name, ColumnType::VarUint)),
        Just(ColumnMeta::new(name, ColumnType::StrZero)),
        Just(ColumnMeta::new(name, ColumnType::Binary)),
    ]
}

/// One step of a people-table workload.
///
/// Row positions index into the rows the model currently holds; they are
/// taken modulo the model size when applied.
#[derive(Debug, Clone)]
pub enum TableOp {
    /// Insert a row with this primary key and name.
    Insert(i64, String),
    /// Remove the n-th live row.
    Remove(usize),
    /// Rename the n-th live row.
    Update(usize, String),
    /// Bump the hits counter of the n-th live row in place.
    Touch(usize, u32),
    /// Compact all eligible segments.
    Compact,
    /// Merge adjacent readonly segments.
    Merge,
}

/// Strategy for a single workload step.
pub fn table_op_strategy() -> impl Strategy<Value = TableOp> {
    prop_oneof![
        6 => (0i64..200, name_strategy()).prop_map(|(id, name)| TableOp::Insert(id, name)),
        2 => any::<usize>().prop_map(TableOp::Remove),
        2 => (any::<usize>(), name_strategy()).prop_map(|(n, name)| TableOp::Update(n, name)),
        1 => (any::<usize>(), any::<u32>()).prop_map(|(n, hits)| TableOp::Touch(n, hits)),
        1 => Just(TableOp::Compact),
        1 => Just(TableOp::Merge),
    ]
}

/// Strategy for a workload of up to `max_len` steps.
pub fn table_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<TableOp>> {
    prop::collection::vec(table_op_strategy(), 1..max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;
    use strata_codec::RowCodec;

    fn mixed_schema() -> Schema {
        Schema::new(vec![
            ColumnMeta::new("a", ColumnType::Sint08),
            ColumnMeta::new("b", ColumnType::Float32),
            ColumnMeta::fixed("c", 3),
            ColumnMeta::new("d", ColumnType::StrZero),
            ColumnMeta::new("e", ColumnType::Binary),
        ])
        .unwrap()
    }

    proptest! {
        #[test]
        fn generated_records_encode(record in record_strategy(&mixed_schema())) {
            let schema = mixed_schema();
            let row = schema.encode(&record).unwrap();
            prop_assert_eq!(schema.decode(&row).unwrap(), record);
        }

        #[test]
        fn generated_columns_form_schemas(col in column_strategy("x")) {
            prop_assert!(Schema::new(vec![col]).is_ok());
        }
    }

    #[test]
    fn ops_are_nonempty() {
        let mut runner = TestRunner::default();
        let ops = table_ops_strategy(8)
            .new_tree(&mut runner)
            .unwrap()
            .current();
        assert!(!ops.is_empty() && ops.len() < 8);
    }
}
