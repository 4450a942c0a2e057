//! Prefix and regex matching over index keys.

use super::SortedIndex;
use crate::error::{CoreError, CoreResult};
use crate::schema::IndexSchema;
use regex::Regex;
use strata_codec::ColumnType;

/// Memory budget for expanding match candidates.
#[derive(Debug, Clone, Copy)]
pub struct MatchBudget {
    limit: usize,
    used: usize,
}

impl MatchBudget {
    /// Creates a budget of `limit` bytes.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self { limit, used: 0 }
    }

    /// Charges `bytes` against the budget.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MatchBudgetExceeded`] once the budget is spent.
    pub fn charge(&mut self, bytes: usize) -> CoreResult<()> {
        self.used = self.used.saturating_add(bytes);
        if self.used > self.limit {
            return Err(CoreError::MatchBudgetExceeded { budget: self.limit });
        }
        Ok(())
    }

    /// Returns the bytes charged so far.
    #[must_use]
    pub fn used(&self) -> usize {
        self.used
    }
}

/// Selects keys of a string-keyed index.
///
/// Matching looks at the leading string field only; candidates are the keys
/// sharing the literal prefix the pattern starts with.
#[derive(Debug, Clone)]
pub struct KeyMatcher {
    scan_prefix: Vec<u8>,
    regex: Option<Regex>,
}

impl KeyMatcher {
    /// Matches keys whose leading string starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is not string keyed.
    pub fn prefix(index: &IndexSchema, prefix: &str) -> CoreResult<Self> {
        check_string_keyed(index)?;
        Ok(Self {
            scan_prefix: string_key_prefix(prefix),
            regex: None,
        })
    }

    /// Matches keys whose leading string matches `pattern`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is not string keyed or the pattern is
    /// invalid.
    pub fn regex(index: &IndexSchema, pattern: &str) -> CoreResult<Self> {
        check_string_keyed(index)?;
        let regex = Regex::new(pattern)?;
        Ok(Self {
            scan_prefix: string_key_prefix(&literal_prefix(pattern)),
            regex: Some(regex),
        })
    }

    /// Returns the encoded prefix every candidate key starts with.
    #[must_use]
    pub fn scan_prefix(&self) -> &[u8] {
        &self.scan_prefix
    }

    /// Returns true if `key` is selected.
    #[must_use]
    pub fn accepts(&self, key: &[u8]) -> bool {
        if !key.starts_with(&self.scan_prefix) {
            return false;
        }
        let Some(regex) = &self.regex else {
            return true;
        };
        let body = &key[1..];
        let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
        std::str::from_utf8(&body[..end]).is_ok_and(|text| regex.is_match(text))
    }

    /// Collects rows of every selected key of `index` into `out`, charging
    /// visited keys and collected ids against `budget`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MatchBudgetExceeded`] if the budget runs out.
    pub fn collect(
        &self,
        index: &dyn SortedIndex,
        budget: &mut MatchBudget,
        out: &mut Vec<u32>,
    ) -> CoreResult<()> {
        let mut key = Vec::new();
        for ord in index.lower_bound(&self.scan_prefix)..index.num_keys() {
            key.clear();
            index.key_at(ord, &mut key);
            if !key.starts_with(&self.scan_prefix) {
                break;
            }
            budget.charge(key.len())?;
            if self.accepts(&key) {
                let before = out.len();
                out.extend(index.postings().rows_of(ord));
                budget.charge((out.len() - before) * std::mem::size_of::<u32>())?;
            }
        }
        Ok(())
    }
}

fn check_string_keyed(index: &IndexSchema) -> CoreResult<()> {
    if index.is_string_keyed() {
        Ok(())
    } else {
        Err(CoreError::invalid_operation(format!(
            "index '{}' is not keyed by a string column",
            index.name
        )))
    }
}

fn string_key_prefix(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 1);
    out.push(ColumnType::StrZero.tag() + 1);
    out.extend_from_slice(text.as_bytes());
    out
}

/// Returns the literal text an anchored pattern must start with.
fn literal_prefix(pattern: &str) -> String {
    let Some(rest) = pattern.strip_prefix('^') else {
        return String::new();
    };
    if pattern.contains('|') {
        return String::new();
    }
    let mut prefix = String::new();
    let mut chars = rest.chars().peekable();
    while let Some(&c) = chars.peek() {
        if ".^$*+?()[]{}|\\".contains(c) {
            // An optional or repeated last literal is not required.
            if matches!(c, '*' | '?' | '{') {
                prefix.pop();
            }
            break;
        }
        prefix.push(c);
        chars.next();
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{TableSchema, TableSchemaDef};
    use strata_codec::{ColumnMeta, Value};

    fn schema() -> TableSchema {
        TableSchemaDef::new(vec![
            ColumnMeta::new("name", ColumnType::StrZero),
            ColumnMeta::new("age", ColumnType::Uint32),
        ])
        .index("by_name", &["name"], false)
        .index("by_age", &["age"], false)
        .build()
        .unwrap()
    }

    #[test]
    fn literal_prefixes() {
        assert_eq!(literal_prefix("^abc.*"), "abc");
        assert_eq!(literal_prefix("^abc*"), "ab");
        assert_eq!(literal_prefix("^ab+"), "ab");
        assert_eq!(literal_prefix("abc"), "");
        assert_eq!(literal_prefix("^a|^b"), "");
    }

    #[test]
    fn regex_accepts_leading_string() {
        let schema = schema();
        let index = schema.index(0);
        let matcher = KeyMatcher::regex(index, "^jo(h?)n$").unwrap();
        let key = |s: &str| index.encode_key(&[Value::from(s)]).unwrap();
        assert!(matcher.accepts(&key("john")));
        assert!(matcher.accepts(&key("jon")));
        assert!(!matcher.accepts(&key("joan")));
        assert!(!matcher.accepts(&key("mary")));
        assert_eq!(matcher.scan_prefix(), &key("jo")[..3]);
    }

    #[test]
    fn rejects_non_string_index() {
        let schema = schema();
        assert!(KeyMatcher::prefix(schema.index(1), "a").is_err());
        assert!(matches!(
            KeyMatcher::regex(schema.index(0), "("),
            Err(CoreError::Pattern(_))
        ));
    }

    #[test]
    fn budget_trips() {
        let mut budget = MatchBudget::new(10);
        budget.charge(6).unwrap();
        budget.charge(4).unwrap();
        assert!(matches!(
            budget.charge(1),
            Err(CoreError::MatchBudgetExceeded { budget: 10 })
        ));
        assert_eq!(budget.used(), 11);
    }
}
