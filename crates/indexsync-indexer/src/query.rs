//! Queries understood by the index engine.
//!
//! Only what the synchronizer needs: exact term match, field presence
//! and boolean combinations.

use crate::document::Document;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Matches every document
    All,
    /// Field holds exactly this value
    Term { field: String, value: String },
    /// Field is present with any value
    Exists(String),
    And(Vec<Query>),
    Or(Vec<Query>),
}

impl Query {
    pub fn term(field: &str, value: impl ToString) -> Self {
        Query::Term {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn exists(field: &str) -> Self {
        Query::Exists(field.to_string())
    }

    pub fn and(self, other: Query) -> Self {
        match self {
            Query::And(mut clauses) => {
                clauses.push(other);
                Query::And(clauses)
            }
            first => Query::And(vec![first, other]),
        }
    }

    /// Any of the values in one field.
    pub fn any_of<I, V>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        Query::Or(values.into_iter().map(|v| Query::term(field, v)).collect())
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Query::All => true,
            Query::Term { field, value } => doc.contains(field, value),
            Query::Exists(field) => doc.has_field(field),
            Query::And(clauses) => clauses.iter().all(|q| q.matches(doc)),
            Query::Or(clauses) => clauses.iter().any(|q| q.matches(doc)),
        }
    }
}

fn write_clauses(f: &mut fmt::Formatter<'_>, clauses: &[Query], op: &str) -> fmt::Result {
    for (i, clause) in clauses.iter().enumerate() {
        if i > 0 {
            write!(f, " {} ", op)?;
        }
        match clause {
            Query::And(_) | Query::Or(_) => write!(f, "({})", clause)?,
            _ => write!(f, "{}", clause)?,
        }
    }
    Ok(())
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::All => f.write_str("*:*"),
            Query::Term { field, value } => write!(f, "{}:{}", field, value),
            Query::Exists(field) => write!(f, "{}:*", field),
            Query::And(clauses) => write_clauses(f, clauses, "AND"),
            Query::Or(clauses) => write_clauses(f, clauses, "OR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{FIELD_DBID, FIELD_FTSSTATUS, FIELD_PARENT_ASSOC_CRC};

    #[test]
    fn test_display() {
        let query = Query::term(FIELD_DBID, 12).and(Query::term(FIELD_PARENT_ASSOC_CRC, 99));
        assert_eq!(query.to_string(), "DBID:12 AND PARENT_ASSOC_CRC:99");

        let unclean = Query::any_of(FIELD_FTSSTATUS, ["New", "Dirty"]);
        assert_eq!(unclean.to_string(), "FTSSTATUS:New OR FTSSTATUS:Dirty");
    }

    #[test]
    fn test_matches() {
        let mut doc = Document::new("a");
        doc.set(FIELD_DBID, 12);
        doc.set(FIELD_PARENT_ASSOC_CRC, 7);

        assert!(Query::term(FIELD_DBID, 12).matches(&doc));
        assert!(!Query::term(FIELD_DBID, 12)
            .and(Query::term(FIELD_PARENT_ASSOC_CRC, 8))
            .matches(&doc));
        assert!(Query::exists(FIELD_PARENT_ASSOC_CRC).matches(&doc));
        assert!(Query::any_of(FIELD_DBID, [1, 12]).matches(&doc));
        assert!(!Query::any_of(FIELD_DBID, Vec::<i64>::new()).matches(&doc));
    }
}
