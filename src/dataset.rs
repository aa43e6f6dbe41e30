use std::fmt;

use serde::Deserialize;

/// How a staged text column is coerced during transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Date,
    Integer,
    Decimal,
    Flag,
}

impl ColumnKind {
    /// DuckDB type of the column in the transformed snapshot.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnKind::Text => "VARCHAR",
            ColumnKind::Date => "DATE",
            ColumnKind::Integer => "BIGINT",
            ColumnKind::Decimal => "DECIMAL(12,2)",
            ColumnKind::Flag => "BOOLEAN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub required: bool,
}

const fn required(name: &'static str, kind: ColumnKind) -> ColumnSpec {
    ColumnSpec {
        name,
        kind,
        required: true,
    }
}

const fn optional(name: &'static str, kind: ColumnKind) -> ColumnSpec {
    ColumnSpec {
        name,
        kind,
        required: false,
    }
}

const NEWS_COLUMNS: [ColumnSpec; 9] = [
    required("title", ColumnKind::Text),
    required("description", ColumnKind::Text),
    required("url", ColumnKind::Text),
    required("category", ColumnKind::Text),
    required("updated", ColumnKind::Date),
    optional("source_category", ColumnKind::Text),
    optional("tags", ColumnKind::Text),
    optional("live", ColumnKind::Flag),
    optional("in_pagination", ColumnKind::Flag),
];

const SALES_COLUMNS: [ColumnSpec; 11] = [
    required("order_id", ColumnKind::Text),
    required("order_line", ColumnKind::Integer),
    required("order_date", ColumnKind::Date),
    required("customer_id", ColumnKind::Text),
    required("customer_name", ColumnKind::Text),
    required("product_id", ColumnKind::Text),
    required("product_name", ColumnKind::Text),
    required("quantity", ColumnKind::Integer),
    required("unit_price", ColumnKind::Decimal),
    optional("customer_city", ColumnKind::Text),
    optional("product_category", ColumnKind::Text),
];

/// The record families the pipeline knows how to stage and load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    News,
    Sales,
}

impl Dataset {
    pub fn columns(&self) -> &'static [ColumnSpec] {
        match self {
            Dataset::News => &NEWS_COLUMNS,
            Dataset::Sales => &SALES_COLUMNS,
        }
    }

    pub fn natural_key(&self) -> &'static [&'static str] {
        match self {
            Dataset::News => &["url"],
            Dataset::Sales => &["order_id", "order_line"],
        }
    }

    pub fn required_columns(&self) -> impl Iterator<Item = &'static str> {
        self.columns()
            .iter()
            .filter(|column| column.required)
            .map(|column| column.name)
    }

    pub fn columns_of_kind(&self, kind: ColumnKind) -> impl Iterator<Item = &'static ColumnSpec> {
        self.columns().iter().filter(move |column| column.kind == kind)
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Dataset::News => write!(f, "news"),
            Dataset::Sales => write!(f, "sales"),
        }
    }
}
