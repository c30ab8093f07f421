//! Window functions added to a rendered query.
//!
//! Injection is textual: the `OVER (...)` items are spliced in front of the
//! statement's single top-level `FROM`. A statement with no top-level
//! `FROM`, or with more than one, is returned untouched.

use dbmesh_core::sql::{leading_keyword, top_level_keyword_positions};
use serde::{Deserialize, Serialize};

/// One `function(expression) OVER (...)` select item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowFunction {
    /// Function name, e.g. `LAG` or `ROW_NUMBER`.
    pub function: String,
    /// Function arguments.
    pub expression: String,
    /// Output column name.
    pub alias: Option<String>,
    /// PARTITION BY list.
    pub partition_by: Option<String>,
    /// ORDER BY list.
    pub order_by: Option<String>,
    /// Frame clause, e.g. `ROWS BETWEEN 3 PRECEDING AND CURRENT ROW`.
    pub frame: Option<String>,
}

impl WindowFunction {
    /// Create a window function call.
    pub fn new(function: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            expression: expression.into(),
            ..Default::default()
        }
    }

    /// Set the output column name.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Set the PARTITION BY list.
    pub fn partition_by(mut self, columns: impl Into<String>) -> Self {
        self.partition_by = Some(columns.into());
        self
    }

    /// Set the ORDER BY list.
    pub fn order_by(mut self, items: impl Into<String>) -> Self {
        self.order_by = Some(items.into());
        self
    }

    /// Set the frame clause.
    pub fn frame(mut self, frame: impl Into<String>) -> Self {
        self.frame = Some(frame.into());
        self
    }

    /// Render the select item.
    pub fn to_sql(&self) -> String {
        let mut over = Vec::new();
        if let Some(partition) = non_empty(&self.partition_by) {
            over.push(format!("PARTITION BY {}", partition));
        }
        if let Some(order) = non_empty(&self.order_by) {
            over.push(format!("ORDER BY {}", order));
        }
        if let Some(frame) = non_empty(&self.frame) {
            over.push(frame.to_string());
        }

        let mut sql = format!(
            "{}({}) OVER ({})",
            self.function,
            self.expression,
            over.join(" ")
        );
        if let Some(alias) = non_empty(&self.alias) {
            sql.push_str(" AS ");
            sql.push_str(alias);
        }
        sql
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Insert `functions` into the select list of `sql`.
pub fn inject_window_functions(sql: &str, functions: &[WindowFunction]) -> String {
    if functions.is_empty() || leading_keyword(sql).as_deref() != Some("SELECT") {
        return sql.to_string();
    }

    let positions = top_level_keyword_positions(sql, "FROM");
    let [from] = positions.as_slice() else {
        return sql.to_string();
    };

    let head = sql[..*from].trim_end();
    let items = functions
        .iter()
        .map(WindowFunction::to_sql)
        .collect::<Vec<_>>()
        .join(", ");

    // The head is never bare: it holds at least the SELECT keyword.
    let separator = if head.ends_with(',') || head.eq_ignore_ascii_case("SELECT") {
        " "
    } else {
        ", "
    };

    format!("{}{}{} {}", head, separator, items, &sql[*from..])
}
