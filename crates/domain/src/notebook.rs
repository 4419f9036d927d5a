use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One output produced by executing a cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum CellOutput {
    /// Captured stdout or stderr.
    Stream { name: StreamName, text: String },

    /// Value of the trailing expression (the REPL convention).
    ExecuteResult { text: String },

    /// Rich output drained from the display sink (base64-encoded).
    DisplayData { data: String, mime_type: String },

    /// An exception raised by user code.
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    Code,
    Markdown,
}

/// An ordered unit within a notebook: source text plus its most recent
/// outputs. `execution_count` is `None` until the cell first runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub id: Uuid,
    pub kind: CellKind,
    pub source: String,
    pub outputs: Vec<CellOutput>,
    pub execution_count: Option<u32>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Cell {
    pub fn new(kind: CellKind, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            source: source.into(),
            outputs: Vec::new(),
            execution_count: None,
            metadata: Map::new(),
        }
    }
}

/// A notebook: ordered cells plus the most recent kernel counter observed.
/// Cell order is authoritative for re-execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notebook {
    pub id: Uuid,
    pub owner_id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub cells: Vec<Cell>,
    pub execution_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_output_tagged_by_output_type() {
        let out = CellOutput::Stream {
            name: StreamName::Stdout,
            text: "hi\n".into(),
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["output_type"], "stream");
        assert_eq!(json["name"], "stdout");
    }

    #[test]
    fn error_output_round_trips() {
        let out = CellOutput::Error {
            ename: "ZeroDivisionError".into(),
            evalue: "division by zero".into(),
            traceback: vec!["Traceback (most recent call last):".into()],
        };
        let json = serde_json::to_string(&out).unwrap();
        let back: CellOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(back, out);
    }

    #[test]
    fn new_cell_has_no_execution_count() {
        let cell = Cell::new(CellKind::Code, "x = 1");
        assert!(cell.execution_count.is_none());
        assert!(cell.outputs.is_empty());
    }
}
