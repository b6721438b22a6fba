//! Parameter numbering shared by every statement of a batch.

use crate::dialect::Dialect;
use docmodel_core::error::{QueryError, QueryErrorKind};
use docmodel_core::{Error, Result, Value};

/// Hands out placeholders and per-batch slot numbers.
///
/// One counter is used for a whole batch so placeholders never collide when
/// the statements are sent as a single command.
#[derive(Debug, Clone)]
pub struct ParameterCounter {
    dialect: Dialect,
    next: usize,
    next_slot: usize,
}

impl ParameterCounter {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            next: 1,
            next_slot: 0,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Number of parameters bound so far.
    pub fn count(&self) -> usize {
        self.next - 1
    }

    /// Record `value` in `params` and return its placeholder.
    pub fn bind(&mut self, value: Value, params: &mut Vec<Value>) -> String {
        let placeholder = self.dialect.placeholder(self.next);
        self.next += 1;
        params.push(value);
        placeholder
    }

    /// A number unique within the batch, for naming temporaries.
    pub fn next_slot(&mut self) -> usize {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    /// Replace each `?` marker outside quoted text with a placeholder,
    /// binding `values` in order.
    ///
    /// `??` writes a literal `?`, for operators such as Postgres `jsonb ? 'key'`.
    pub fn bind_markers(&mut self, sql: &str, values: &[Value], params: &mut Vec<Value>) -> Result<String> {
        let mut out = String::with_capacity(sql.len() + values.len() * 3);
        let mut values = values.iter();
        let mut quote: Option<char> = None;
        let mut chars = sql.chars().peekable();
        while let Some(ch) = chars.next() {
            match (quote, ch) {
                (Some(q), c) if c == q => {
                    quote = None;
                    out.push(c);
                }
                (Some(_), c) => out.push(c),
                (None, '\'' | '"' | '`') => {
                    quote = Some(ch);
                    out.push(ch);
                }
                (None, '?') if chars.peek() == Some(&'?') => {
                    chars.next();
                    out.push('?');
                }
                (None, '?') => {
                    let value = values.next().ok_or_else(|| marker_mismatch(sql))?;
                    out.push_str(&self.bind(value.clone(), params));
                }
                (None, c) => out.push(c),
            }
        }
        if values.next().is_some() {
            return Err(marker_mismatch(sql));
        }
        Ok(out)
    }
}

fn marker_mismatch(sql: &str) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Syntax,
        sql: Some(sql.to_string()),
        message: "number of '?' markers does not match the number of parameters".to_string(),
        source: None,
    })
}
