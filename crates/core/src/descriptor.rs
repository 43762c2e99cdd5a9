//! Query descriptors.
//!
//! A `QueryDescriptor` is the immutable description of one read against a
//! backing store: which target, which columns, which rows and in what order.
//! Two descriptors that compare equal describe the same logical query.

use crate::value::Value;
use std::fmt;

/// Immutable description of a read request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueryDescriptor {
    target: String,
    projection: Option<Vec<String>>,
    selection: Option<String>,
    selection_args: Vec<Value>,
    sort_order: Option<String>,
}

impl QueryDescriptor {
    /// Creates a descriptor reading every column and row of `target`.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            projection: None,
            selection: None,
            selection_args: Vec::new(),
            sort_order: None,
        }
    }

    /// Restricts the returned columns, in the given order.
    pub fn projection<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the filter expression. `?` placeholders are bound from the
    /// selection arguments in order.
    pub fn selection(mut self, selection: impl Into<String>) -> Self {
        self.selection = Some(selection.into());
        self
    }

    /// Appends one selection argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.selection_args.push(value.into());
        self
    }

    /// Replaces the selection arguments.
    pub fn args<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.selection_args = values.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the ordering clause, e.g. `"age DESC, name"`.
    pub fn sort_order(mut self, sort_order: impl Into<String>) -> Self {
        self.sort_order = Some(sort_order.into());
        self
    }

    /// Returns the target identifier.
    #[inline]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the projected columns, `None` meaning all columns.
    pub fn projected_columns(&self) -> Option<&[String]> {
        self.projection.as_deref()
    }

    /// Returns the filter expression.
    pub fn selection_expr(&self) -> Option<&str> {
        self.selection.as_deref()
    }

    /// Returns the selection arguments.
    #[inline]
    pub fn selection_args(&self) -> &[Value] {
        &self.selection_args
    }

    /// Returns the ordering clause.
    pub fn sort_clause(&self) -> Option<&str> {
        self.sort_order.as_deref()
    }
}

impl fmt::Display for QueryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.projection {
            Some(cols) => write!(f, "SELECT {} FROM {}", cols.join(", "), self.target)?,
            None => write!(f, "SELECT * FROM {}", self.target)?,
        }
        if let Some(selection) = &self.selection {
            write!(f, " WHERE {}", selection)?;
        }
        if let Some(order) = &self.sort_order {
            write!(f, " ORDER BY {}", order)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_defaults() {
        let d = QueryDescriptor::new("contacts");
        assert_eq!(d.target(), "contacts");
        assert!(d.projected_columns().is_none());
        assert!(d.selection_expr().is_none());
        assert!(d.selection_args().is_empty());
        assert!(d.sort_clause().is_none());
    }

    #[test]
    fn test_descriptor_builder() {
        let d = QueryDescriptor::new("contacts")
            .projection(["name", "age"])
            .selection("age > ? AND name != ?")
            .arg(18)
            .arg("root")
            .sort_order("age DESC");
        assert_eq!(d.projected_columns().unwrap(), &["name", "age"]);
        assert_eq!(d.selection_args(), &[Value::Integer(18), Value::Text("root".into())]);
        assert_eq!(d.sort_clause(), Some("age DESC"));
    }

    #[test]
    fn test_descriptor_structural_equality() {
        let a = QueryDescriptor::new("t").selection("a = ?").arg(1);
        let b = QueryDescriptor::new("t").selection("a = ?").arg(1);
        let c = QueryDescriptor::new("t").selection("a = ?").arg(2);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_descriptor_display() {
        let d = QueryDescriptor::new("t").projection(["a"]).selection("a = ?").sort_order("a");
        assert_eq!(d.to_string(), "SELECT a FROM t WHERE a = ? ORDER BY a");
    }
}
