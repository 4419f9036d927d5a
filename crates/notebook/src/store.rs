//! In-memory notebook store.
//!
//! Owns every [`Notebook`] exclusively; tools and API handlers mutate
//! through this interface only. Cell order is the `Vec` order, so
//! positions are contiguous by construction; every mutation bumps
//! `updated_at`.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use cl_domain::error::{Error, Result};
use cl_domain::notebook::{Cell, CellKind, CellOutput, Notebook};

const DEFAULT_CELL_SOURCE: &str = "\
# Welcome to the code lab!
# numpy, pandas and matplotlib are preloaded; cells share variables,
# just like a Jupyter notebook.

import numpy as np
import pandas as pd
import matplotlib.pyplot as plt

print(\"Hello, Code Lab!\")
x = 10  # available in later cells
";

/// Patch applied by `update_cell`; `None` fields are left untouched.
#[derive(Debug, Default, Clone)]
pub struct CellPatch {
    pub source: Option<String>,
    pub kind: Option<CellKind>,
    pub outputs: Option<Vec<CellOutput>>,
    pub execution_count: Option<u32>,
}

pub struct NotebookStore {
    notebooks: RwLock<HashMap<Uuid, Notebook>>,
}

impl Default for NotebookStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NotebookStore {
    pub fn new() -> Self {
        Self {
            notebooks: RwLock::new(HashMap::new()),
        }
    }

    // ── Notebook CRUD ──────────────────────────────────────────────

    /// Create a notebook. With no initial cells a welcome code cell is
    /// seeded so a fresh notebook is immediately runnable.
    pub fn create(
        &self,
        owner_id: i64,
        title: impl Into<String>,
        description: Option<String>,
        initial_cells: Vec<Cell>,
    ) -> Notebook {
        let now = Utc::now();
        let cells = if initial_cells.is_empty() {
            vec![Cell::new(CellKind::Code, DEFAULT_CELL_SOURCE)]
        } else {
            initial_cells
        };

        let notebook = Notebook {
            id: Uuid::new_v4(),
            owner_id,
            title: title.into(),
            description,
            cells,
            execution_count: 0,
            created_at: now,
            updated_at: now,
        };

        tracing::info!(notebook_id = %notebook.id, owner_id, "notebook created");
        self.notebooks
            .write()
            .insert(notebook.id, notebook.clone());
        notebook
    }

    pub fn get(&self, id: &Uuid) -> Option<Notebook> {
        self.notebooks.read().get(id).cloned()
    }

    /// Notebooks owned by a user, most recently updated first.
    pub fn list(&self, owner_id: i64) -> Vec<Notebook> {
        let mut out: Vec<Notebook> = self
            .notebooks
            .read()
            .values()
            .filter(|nb| nb.owner_id == owner_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        out
    }

    pub fn rename(
        &self,
        id: &Uuid,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<Notebook> {
        self.mutate(id, |nb| {
            if let Some(title) = title {
                nb.title = title;
            }
            if let Some(description) = description {
                nb.description = Some(description);
            }
            Ok(())
        })
    }

    pub fn delete(&self, id: &Uuid) -> bool {
        self.notebooks.write().remove(id).is_some()
    }

    // ── Cell operations ────────────────────────────────────────────

    /// Insert a cell at `index` (appended when `None` or out of range).
    pub fn add_cell(
        &self,
        id: &Uuid,
        kind: CellKind,
        source: impl Into<String>,
        index: Option<usize>,
    ) -> Result<Cell> {
        let cell = Cell::new(kind, source);
        let added = cell.clone();
        self.mutate(id, move |nb| {
            let at = index.unwrap_or(nb.cells.len()).min(nb.cells.len());
            nb.cells.insert(at, cell);
            Ok(())
        })?;
        Ok(added)
    }

    pub fn update_cell(&self, id: &Uuid, cell_id: &Uuid, patch: CellPatch) -> Result<Cell> {
        let mut updated = None;
        self.mutate(id, |nb| {
            let cell = nb
                .cells
                .iter_mut()
                .find(|c| c.id == *cell_id)
                .ok_or_else(|| Error::NotFound(format!("cell {cell_id}")))?;
            if let Some(source) = patch.source {
                cell.source = source;
            }
            if let Some(kind) = patch.kind {
                cell.kind = kind;
            }
            if let Some(outputs) = patch.outputs {
                cell.outputs = outputs;
            }
            if let Some(count) = patch.execution_count {
                cell.execution_count = Some(count);
            }
            updated = Some(cell.clone());
            Ok(())
        })?;
        Ok(updated.expect("cell updated above"))
    }

    pub fn delete_cell(&self, id: &Uuid, cell_id: &Uuid) -> Result<()> {
        self.mutate(id, |nb| {
            let before = nb.cells.len();
            nb.cells.retain(|c| c.id != *cell_id);
            if nb.cells.len() == before {
                return Err(Error::NotFound(format!("cell {cell_id}")));
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Move a cell to `new_index` (clamped to the valid range).
    pub fn move_cell(&self, id: &Uuid, cell_id: &Uuid, new_index: usize) -> Result<()> {
        self.mutate(id, |nb| {
            let from = nb
                .cells
                .iter()
                .position(|c| c.id == *cell_id)
                .ok_or_else(|| Error::NotFound(format!("cell {cell_id}")))?;
            let cell = nb.cells.remove(from);
            let to = new_index.min(nb.cells.len());
            nb.cells.insert(to, cell);
            Ok(())
        })?;
        Ok(())
    }

    /// Record a cell's execution: outputs, per-cell counter, and the
    /// notebook counter (the most recent kernel counter observed).
    pub fn save_cell_execution(
        &self,
        id: &Uuid,
        cell_id: &Uuid,
        outputs: Vec<CellOutput>,
        execution_count: u32,
    ) -> Result<Notebook> {
        self.mutate(id, |nb| {
            let cell = nb
                .cells
                .iter_mut()
                .find(|c| c.id == *cell_id)
                .ok_or_else(|| Error::NotFound(format!("cell {cell_id}")))?;
            cell.outputs = outputs;
            cell.execution_count = Some(execution_count);
            nb.execution_count = nb.execution_count.max(execution_count);
            Ok(())
        })
    }

    /// Sync the notebook counter with the kernel's (monotonic).
    pub fn update_execution_count(&self, id: &Uuid, execution_count: u32) -> Result<Notebook> {
        self.mutate(id, |nb| {
            nb.execution_count = nb.execution_count.max(execution_count);
            Ok(())
        })
    }

    // ── Internal ───────────────────────────────────────────────────

    fn mutate<F>(&self, id: &Uuid, f: F) -> Result<Notebook>
    where
        F: FnOnce(&mut Notebook) -> Result<()>,
    {
        let mut notebooks = self.notebooks.write();
        let nb = notebooks
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("notebook {id}")))?;
        f(nb)?;
        nb.updated_at = Utc::now();
        Ok(nb.clone())
    }
}
