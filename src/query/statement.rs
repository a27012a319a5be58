//! Parameterized statement assembly
//!
//! A WHERE clause is an ordered list of [`Predicate`]s. Each predicate owns
//! the bind values for its own `?` placeholders, so rendering the list
//! left to right yields the SQL text and a parameter list that line up
//! placeholder for placeholder. Nothing is reordered or deduplicated.

use super::BindValue;

/// Separator between predicates in a WHERE clause
pub const PREDICATE_SEPARATOR: &str = " AND ";

/// A SQL fragment together with the values for its placeholders
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    sql: String,
    params: Vec<BindValue>,
}

impl Predicate {
    /// Create a predicate from a fragment and its bind values
    ///
    /// `params` must hold exactly one value per `?` in `sql`. A `?` inside
    /// a quoted literal or identifier is not a placeholder. The count is
    /// asserted in debug builds only.
    pub fn new(sql: impl Into<String>, params: Vec<BindValue>) -> Self {
        let sql = sql.into();
        debug_assert_eq!(
            count_placeholders(&sql),
            params.len(),
            "placeholder/parameter mismatch in {:?}",
            sql
        );
        Self { sql, params }
    }

    /// `column = ?`
    pub fn eq(column: &str, value: impl Into<BindValue>) -> Self {
        Self::new(format!("{} = ?", column), vec![value.into()])
    }

    /// `column >= ? AND column <= ?`
    pub fn between_inclusive(
        column: &str,
        low: impl Into<BindValue>,
        high: impl Into<BindValue>,
    ) -> Self {
        Self::new(
            format!("{0} >= ?{1}{0} <= ?", column, PREDICATE_SEPARATOR),
            vec![low.into(), high.into()],
        )
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[BindValue] {
        &self.params
    }
}

/// Ordered conjunction of predicates
#[derive(Debug, Clone, Default)]
pub struct PredicateList {
    predicates: Vec<Predicate>,
}

impl PredicateList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a predicate after everything already in the list
    pub fn push(&mut self, predicate: Predicate) -> &mut Self {
        self.predicates.push(predicate);
        self
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Render to `(sql, params)` in append order
    pub fn render(self) -> (String, Vec<BindValue>) {
        let mut fragments = Vec::with_capacity(self.predicates.len());
        let mut params = Vec::new();

        for predicate in self.predicates {
            fragments.push(predicate.sql);
            params.extend(predicate.params);
        }

        (fragments.join(PREDICATE_SEPARATOR), params)
    }
}

/// Final SQL text and its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub params: Vec<BindValue>,
}

impl BoundStatement {
    /// Number of `?` placeholders in the SQL text
    pub fn placeholder_count(&self) -> usize {
        count_placeholders(&self.sql)
    }
}

/// Count `?` outside '...' literals and "..." identifiers
///
/// A doubled quote inside a quoted run closes and reopens it, which leaves
/// the count unchanged.
fn count_placeholders(sql: &str) -> usize {
    let mut quote: Option<char> = None;
    let mut count = 0;

    for c in sql.chars() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '?') => count += 1,
            _ => {}
        }
    }

    count
}
