#[macro_use]
extern crate static_assertions;

pub mod config;
pub mod diagnostics;
pub mod dispatch;
pub mod layer;
pub mod tracker;

pub use config::{DebugAction, LayerConfig};
pub use diagnostics::{Diagnostic, DiagnosticCode, Reporter, Severity};
pub use layer::{LayerExtension, MemTracker, LAYER_EXTENSIONS};
pub use tracker::handles::ObjectHandle;
