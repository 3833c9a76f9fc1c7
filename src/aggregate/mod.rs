//! GROUP BY / aggregation engine.
//!
//! An [`Aggregate`] is fed every row of the scan and computes one result row
//! per group on exhaustion. Result columns are the group-by columns first,
//! then the aggregate aliases. Groups are keyed by the display strings of
//! the group-by values; a BTreeMap keeps group output deterministic.

mod hll;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::{DataType, EngineError, Row, Schema, Value};

pub use hll::HyperLogLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
    DistinctCount,
    DistinctHllCount,
}

impl FuncKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "COUNT" => Some(Self::Count),
            "SUM" => Some(Self::Sum),
            "AVG" => Some(Self::Avg),
            "MIN" => Some(Self::Min),
            "MAX" => Some(Self::Max),
            "FIRST" => Some(Self::First),
            "LAST" => Some(Self::Last),
            "DISTINCT_COUNT" => Some(Self::DistinctCount),
            "DISTINCT_HLL_COUNT" => Some(Self::DistinctHllCount),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FuncSpec {
    pub kind: FuncKind,
    pub column: String,
    pub alias: String,
}

trait Accumulator {
    fn push(&mut self, value: &Value);
    fn result(&self) -> Value;
}

#[derive(Default)]
struct CountAcc {
    n: i64,
}

impl Accumulator for CountAcc {
    fn push(&mut self, value: &Value) {
        if !value.is_null() {
            self.n += 1;
        }
    }
    fn result(&self) -> Value {
        Value::Integer(self.n)
    }
}

/// Numeric view for SUM/AVG. Text values coming out of flat files carry
/// their numbers as strings, so those parse here too.
fn numeric(value: &Value) -> Option<(f64, Option<i64>)> {
    match value {
        Value::Text(s) => {
            let t = s.trim();
            let f = t.parse::<f64>().ok()?;
            Some((f, t.parse::<i64>().ok()))
        }
        v => v.as_f64().map(|f| (f, v.as_int())),
    }
}

#[derive(Default)]
struct SumAcc {
    int: i64,
    float: f64,
    any_float: bool,
    seen: bool,
}

impl Accumulator for SumAcc {
    fn push(&mut self, value: &Value) {
        if let Some((f, i)) = numeric(value) {
            self.seen = true;
            self.float += f;
            match i {
                Some(i) if !self.any_float => self.int += i,
                _ => self.any_float = true,
            }
        }
    }
    fn result(&self) -> Value {
        if !self.seen {
            Value::Null
        } else if self.any_float {
            Value::Real(self.float)
        } else {
            Value::Integer(self.int)
        }
    }
}

#[derive(Default)]
struct AvgAcc {
    sum: f64,
    n: i64,
}

impl Accumulator for AvgAcc {
    fn push(&mut self, value: &Value) {
        if let Some((f, _)) = numeric(value) {
            self.sum += f;
            self.n += 1;
        }
    }
    fn result(&self) -> Value {
        if self.n == 0 {
            Value::Null
        } else {
            Value::Real(self.sum / self.n as f64)
        }
    }
}

struct ExtremeAcc {
    best: Option<Value>,
    want_greater: bool,
}

impl Accumulator for ExtremeAcc {
    fn push(&mut self, value: &Value) {
        if value.is_null() {
            return;
        }
        let replace = match &self.best {
            None => true,
            Some(current) => match value.compare(current) {
                Some(std::cmp::Ordering::Greater) => self.want_greater,
                Some(std::cmp::Ordering::Less) => !self.want_greater,
                _ => false,
            },
        };
        if replace {
            self.best = Some(value.clone());
        }
    }
    fn result(&self) -> Value {
        self.best.clone().unwrap_or(Value::Null)
    }
}

#[derive(Default)]
struct EdgeAcc {
    value: Option<Value>,
    keep_first: bool,
}

impl Accumulator for EdgeAcc {
    fn push(&mut self, value: &Value) {
        if self.keep_first && self.value.is_some() {
            return;
        }
        self.value = Some(value.clone());
    }
    fn result(&self) -> Value {
        self.value.clone().unwrap_or(Value::Null)
    }
}

#[derive(Default)]
struct DistinctAcc {
    seen: std::collections::BTreeSet<String>,
}

impl Accumulator for DistinctAcc {
    fn push(&mut self, value: &Value) {
        if !value.is_null() {
            self.seen.insert(value.to_string());
        }
    }
    fn result(&self) -> Value {
        Value::Integer(self.seen.len() as i64)
    }
}

#[derive(Default)]
struct HllAcc {
    hll: HyperLogLog,
}

impl Accumulator for HllAcc {
    fn push(&mut self, value: &Value) {
        if !value.is_null() {
            self.hll.add(&value.to_string());
        }
    }
    fn result(&self) -> Value {
        Value::Integer(self.hll.count())
    }
}

fn make_accumulator(kind: FuncKind) -> Box<dyn Accumulator> {
    match kind {
        FuncKind::Count => Box::new(CountAcc::default()),
        FuncKind::Sum => Box::new(SumAcc::default()),
        FuncKind::Avg => Box::new(AvgAcc::default()),
        FuncKind::Min => Box::new(ExtremeAcc {
            best: None,
            want_greater: false,
        }),
        FuncKind::Max => Box::new(ExtremeAcc {
            best: None,
            want_greater: true,
        }),
        FuncKind::First => Box::new(EdgeAcc {
            value: None,
            keep_first: true,
        }),
        FuncKind::Last => Box::new(EdgeAcc {
            value: None,
            keep_first: false,
        }),
        FuncKind::DistinctCount => Box::new(DistinctAcc::default()),
        FuncKind::DistinctHllCount => Box::new(HllAcc::default()),
    }
}

struct GroupState {
    key_values: Vec<Value>,
    accs: Vec<Box<dyn Accumulator>>,
}

pub struct Aggregate {
    group_cols: Vec<usize>,
    /// Per spec: the input column index, or None for COUNT(*)-style targets.
    specs: Vec<(FuncKind, Option<usize>)>,
    groups: BTreeMap<Vec<String>, GroupState>,
    result_schema: Arc<Schema>,
}

impl Aggregate {
    pub fn new(
        input: &Arc<Schema>,
        group_columns: &[String],
        specs: Vec<FuncSpec>,
    ) -> Result<Self, EngineError> {
        let mut group_cols = Vec::with_capacity(group_columns.len());
        let mut result = Schema::new("aggregate");
        for name in group_columns {
            let idx = input
                .column_at(name)
                .ok_or_else(|| EngineError::UnknownColumn(name.clone()))?;
            result.add_column(name, input.columns[idx].data_type);
            group_cols.push(idx);
        }

        let mut resolved = Vec::with_capacity(specs.len());
        for spec in &specs {
            let target = spec.column.trim();
            let idx = if matches!(target, "*" | "1" | "0") {
                None
            } else {
                Some(
                    input
                        .column_at(target)
                        .ok_or_else(|| EngineError::UnknownColumn(target.to_string()))?,
                )
            };
            let out_type = match spec.kind {
                FuncKind::Count | FuncKind::DistinctCount | FuncKind::DistinctHllCount => {
                    DataType::Integer
                }
                FuncKind::Avg => DataType::Real,
                FuncKind::Sum => match idx.map(|i| input.columns[i].data_type) {
                    Some(DataType::Integer) => DataType::Integer,
                    _ => DataType::Real,
                },
                FuncKind::Min | FuncKind::Max | FuncKind::First | FuncKind::Last => idx
                    .map_or(DataType::Integer, |i| input.columns[i].data_type),
            };
            result.add_column(&spec.alias, out_type);
            resolved.push((spec.kind, idx));
        }

        Ok(Self {
            group_cols,
            specs: resolved,
            groups: BTreeMap::new(),
            result_schema: Arc::new(result),
        })
    }

    pub fn result_schema(&self) -> Arc<Schema> {
        Arc::clone(&self.result_schema)
    }

    /// Feed one input row into its group's accumulators.
    pub fn row(&mut self, row: &Row) -> Result<(), EngineError> {
        let mut key = Vec::with_capacity(self.group_cols.len());
        for &c in &self.group_cols {
            key.push(row.get(c)?.to_string());
        }
        let state = match self.groups.entry(key) {
            std::collections::btree_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::btree_map::Entry::Vacant(e) => {
                let mut key_values = Vec::with_capacity(self.group_cols.len());
                for &c in &self.group_cols {
                    key_values.push(row.get(c)?.clone());
                }
                e.insert(GroupState {
                    key_values,
                    accs: self.specs.iter().map(|&(k, _)| make_accumulator(k)).collect(),
                })
            }
        };

        let one = Value::Integer(1);
        for ((_, idx), acc) in self.specs.iter().zip(state.accs.iter_mut()) {
            let value = match idx {
                Some(i) => row.get(*i)?,
                None => &one,
            };
            acc.push(value);
        }
        Ok(())
    }

    /// Produce one result row per group. Without GROUP BY columns the whole
    /// input is a single global group, present even when no rows arrived.
    pub fn compute(mut self) -> Result<Vec<Row>, EngineError> {
        if self.group_cols.is_empty() && self.groups.is_empty() {
            self.groups.insert(
                Vec::new(),
                GroupState {
                    key_values: Vec::new(),
                    accs: self.specs.iter().map(|&(k, _)| make_accumulator(k)).collect(),
                },
            );
        }

        let mut out = Vec::with_capacity(self.groups.len());
        for state in self.groups.into_values() {
            let mut row = Row::new(Arc::clone(&self.result_schema));
            let mut col = 0;
            for v in state.key_values {
                row.set(col, v)?;
                col += 1;
            }
            for acc in &state.accs {
                row.set(col, acc.result())?;
                col += 1;
            }
            out.push(row);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input_schema() -> Arc<Schema> {
        let mut s = Schema::new("t");
        s.add_column("id", DataType::Integer)
            .add_column("category", DataType::Text)
            .add_column("qty", DataType::Integer);
        Arc::new(s)
    }

    fn row(s: &Arc<Schema>, id: i64, cat: &str, qty: i64) -> Row {
        Row::from_values(
            Arc::clone(s),
            vec![Value::Integer(id), Value::Text(cat.into()), Value::Integer(qty)],
        )
        .unwrap()
    }

    #[test]
    fn test_group_by_sum() {
        let s = input_schema();
        let mut agg = Aggregate::new(
            &s,
            &["category".to_string()],
            vec![FuncSpec {
                kind: FuncKind::Sum,
                column: "qty".into(),
                alias: "SUM(qty)".into(),
            }],
        )
        .unwrap();
        for (id, cat, qty) in [(1, "fruit", 10), (2, "fruit", 20), (3, "veg", 5)] {
            agg.row(&row(&s, id, cat, qty)).unwrap();
        }
        let rows = agg.compute().unwrap();
        assert_eq!(rows.len(), 2);
        // BTreeMap order: fruit before veg.
        assert_eq!(rows[0].get(0).unwrap(), &Value::Text("fruit".into()));
        assert_eq!(rows[0].get(1).unwrap(), &Value::Integer(30));
        assert_eq!(rows[1].get(0).unwrap(), &Value::Text("veg".into()));
        assert_eq!(rows[1].get(1).unwrap(), &Value::Integer(5));
    }

    #[test]
    fn test_global_group_on_empty_input() {
        let s = input_schema();
        let agg = Aggregate::new(
            &s,
            &[],
            vec![FuncSpec {
                kind: FuncKind::Count,
                column: "*".into(),
                alias: "COUNT(*)".into(),
            }],
        )
        .unwrap();
        let rows = agg.compute().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(0).unwrap(), &Value::Integer(0));
    }

    #[test]
    fn test_min_max_avg_first_last() {
        let s = input_schema();
        let specs = vec![
            FuncSpec { kind: FuncKind::Min, column: "qty".into(), alias: "lo".into() },
            FuncSpec { kind: FuncKind::Max, column: "qty".into(), alias: "hi".into() },
            FuncSpec { kind: FuncKind::Avg, column: "qty".into(), alias: "mean".into() },
            FuncSpec { kind: FuncKind::First, column: "id".into(), alias: "head".into() },
            FuncSpec { kind: FuncKind::Last, column: "id".into(), alias: "tail".into() },
        ];
        let mut agg = Aggregate::new(&s, &[], specs).unwrap();
        for (id, qty) in [(1, 10), (2, 30), (3, 20)] {
            agg.row(&row(&s, id, "x", qty)).unwrap();
        }
        let rows = agg.compute().unwrap();
        let r = &rows[0];
        assert_eq!(r.get(0).unwrap(), &Value::Integer(10));
        assert_eq!(r.get(1).unwrap(), &Value::Integer(30));
        assert_eq!(r.get(2).unwrap(), &Value::Real(20.0));
        assert_eq!(r.get(3).unwrap(), &Value::Integer(1));
        assert_eq!(r.get(4).unwrap(), &Value::Integer(3));
    }

    #[test]
    fn test_distinct_counts() {
        let s = input_schema();
        let specs = vec![
            FuncSpec { kind: FuncKind::DistinctCount, column: "category".into(), alias: "dc".into() },
            FuncSpec { kind: FuncKind::DistinctHllCount, column: "category".into(), alias: "hc".into() },
        ];
        let mut agg = Aggregate::new(&s, &[], specs).unwrap();
        for cat in ["a", "b", "a", "c", "b"] {
            agg.row(&row(&s, 1, cat, 1)).unwrap();
        }
        let rows = agg.compute().unwrap();
        assert_eq!(rows[0].get(0).unwrap(), &Value::Integer(3));
        assert_eq!(rows[0].get(1).unwrap(), &Value::Integer(3));
    }

    #[test]
    fn test_count_skips_null() {
        let s = input_schema();
        let mut agg = Aggregate::new(
            &s,
            &[],
            vec![FuncSpec {
                kind: FuncKind::Count,
                column: "category".into(),
                alias: "c".into(),
            }],
        )
        .unwrap();
        let mut r = row(&s, 1, "x", 1);
        agg.row(&r).unwrap();
        r.set(1, Value::Null).unwrap();
        agg.row(&r).unwrap();
        let rows = agg.compute().unwrap();
        assert_eq!(rows[0].get(0).unwrap(), &Value::Integer(1));
    }

    #[test]
    fn test_unknown_column_rejected() {
        let s = input_schema();
        assert!(Aggregate::new(&s, &["nope".to_string()], Vec::new()).is_err());
    }
}
