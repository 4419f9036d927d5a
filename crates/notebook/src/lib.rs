//! In-memory notebook storage: notebooks, cells, and their outputs.

mod store;

pub use store::{CellPatch, NotebookStore};
