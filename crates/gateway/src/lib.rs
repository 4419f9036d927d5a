//! CodeLab gateway: HTTP surface over the kernel registry, notebook
//! store, tool runtime, and streaming ReAct agent.

pub mod api;
pub mod bridge;
pub mod state;
