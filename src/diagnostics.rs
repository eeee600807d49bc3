//! Structured diagnostics emitted by the tracker.
//!
//! Every violation the tracker observes becomes a [`Diagnostic`] with a
//! severity, a stable code and the raw handle of the subject object. The
//! [`Reporter`] fans a diagnostic out to the configured sinks: the log
//! file (or standard output) and any registered callbacks. All reports
//! are additionally mirrored to the `log` facade.

use std::fmt::{Debug, Display, Formatter};
use std::fs::File;
use std::io::{BufWriter, Stdout, Write};
use std::sync::Mutex;

use crate::config::{DebugAction, LayerConfig};

/// Severity of a diagnostic. Ordered so that `Info < Warning < Error`,
/// which makes the minimum-level filter a plain comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARN",
            Severity::Error => "ERROR",
        })
    }
}

/// Stable identifiers for everything the tracker can complain about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticCode {
    /// Informational message with no violation attached.
    None,
    /// Unknown or freed memory handle in an operation.
    InvalidMemObj,
    /// Unknown or destroyed command buffer.
    InvalidCb,
    /// Unknown object handle.
    InvalidObject,
    /// Binding an object that already has a memory edge.
    RebindObject,
    /// Command recorded using an unbound object.
    MissingMemBindings,
    /// Failed to record a command-buffer to memory edge.
    MemoryBindingError,
    /// Clearing a binding that did not exist.
    MemObjClearEmptyBindings,
    /// Free attempted while references remain.
    FreedMemRef,
    /// Memory still live at device teardown.
    MemoryLeak,
    /// Submitting signalled, resetting unsignalled, or waiting on an
    /// already signalled fence.
    InvalidFenceState,
    /// Begin or reset on an unretired command buffer.
    ResetCbWhileInFlight,
    /// Operation on an object in the wrong state, e.g. mapping memory
    /// that is not host visible.
    InvalidState,
    /// The tracker's own invariants are broken.
    InternalError,
}

impl Display for DiagnosticCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DiagnosticCode::None => "NONE",
            DiagnosticCode::InvalidMemObj => "INVALID_MEM_OBJ",
            DiagnosticCode::InvalidCb => "INVALID_CB",
            DiagnosticCode::InvalidObject => "INVALID_OBJECT",
            DiagnosticCode::RebindObject => "REBIND_OBJECT",
            DiagnosticCode::MissingMemBindings => "MISSING_MEM_BINDINGS",
            DiagnosticCode::MemoryBindingError => "MEMORY_BINDING_ERROR",
            DiagnosticCode::MemObjClearEmptyBindings => "MEM_OBJ_CLEAR_EMPTY_BINDINGS",
            DiagnosticCode::FreedMemRef => "FREED_MEM_REF",
            DiagnosticCode::MemoryLeak => "MEMORY_LEAK",
            DiagnosticCode::InvalidFenceState => "INVALID_FENCE_STATE",
            DiagnosticCode::ResetCbWhileInFlight => "RESET_CB_WHILE_IN_FLIGHT",
            DiagnosticCode::InvalidState => "INVALID_STATE",
            DiagnosticCode::InternalError => "INTERNAL_ERROR",
        })
    }
}

/// One report. `object` is the raw handle of the subject, zero when the
/// message is not about a particular object.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub object: u64,
    pub message: String,
}

pub type CallbackId = u64;

type CallbackFn = Box<dyn Fn(&Diagnostic) + Send + Sync>;

struct Callback {
    id: CallbackId,
    func: CallbackFn,
}

enum Sink {
    Stdout(Stdout),
    File(BufWriter<File>),
}

impl Sink {
    fn write_line(&mut self, line: &str) {
        let result = match self {
            Sink::Stdout(out) => writeln!(out, "{}", line),
            Sink::File(file) => writeln!(file, "{}", line).and_then(|_| file.flush()),
        };
        if let Err(err) = result {
            log::error!("Failed to write diagnostic to log sink: {}", err);
        }
    }
}

struct ReporterInner {
    action: DebugAction,
    action_is_default: bool,
    sink: Sink,
    callbacks: Vec<Callback>,
    next_callback_id: CallbackId,
}

/// Dispatches diagnostics to the configured sinks.
///
/// The reporter is internally synchronized and safe to call from any
/// thread. It is deliberately a leaf lock: the tracker may report while
/// holding its own state mutex.
pub struct Reporter {
    level: Severity,
    inner: Mutex<ReporterInner>,
}

impl Reporter {
    pub fn new(config: &LayerConfig) -> Self {
        let sink = match &config.log_file {
            Some(path) => match File::create(path) {
                Ok(file) => Sink::File(BufWriter::new(file)),
                Err(err) => {
                    log::warn!("Failed to open log file {:?}: {}, using stdout", path, err);
                    Sink::Stdout(std::io::stdout())
                }
            },
            None => Sink::Stdout(std::io::stdout()),
        };

        Self {
            level: config.report_level,
            inner: Mutex::new(ReporterInner {
                action: config.debug_action,
                action_is_default: config.action_is_default,
                sink,
                callbacks: Vec::new(),
                next_callback_id: 1,
            }),
        }
    }

    /// True if a diagnostic of this severity would be emitted at all.
    /// Lets callers skip building expensive table dumps.
    pub fn enabled(&self, severity: Severity) -> bool {
        severity >= self.level
    }

    pub fn report(&self, severity: Severity, code: DiagnosticCode, object: u64, message: String) {
        if !self.enabled(severity) {
            return;
        }

        match severity {
            Severity::Error => log::error!("[{}] object {:#x}: {}", code, object, message),
            Severity::Warning => log::warn!("[{}] object {:#x}: {}", code, object, message),
            Severity::Info => log::info!("[{}] object {:#x}: {}", code, object, message),
        }

        let diagnostic = Diagnostic {
            severity,
            code,
            object,
            message,
        };

        let mut inner = self.inner.lock().unwrap();
        if inner.action.contains(DebugAction::LOG_MSG) {
            let line = format!(
                "MEM({}): [{}] object {:#x}: {}",
                diagnostic.severity, diagnostic.code, diagnostic.object, diagnostic.message
            );
            inner.sink.write_line(&line);
        }
        if inner.action.contains(DebugAction::CALLBACK) {
            for callback in &inner.callbacks {
                (callback.func)(&diagnostic);
            }
        }
        // DebugAction::BREAK has no stable breakpoint primitive to hook;
        // the tracker must not abort, so the flag is a marker only.
    }

    /// Registers a diagnostic callback. Registering the first callback
    /// while the action mask is still the default switches reporting to
    /// callback-only mode.
    pub fn register_callback<F>(&self, func: F) -> CallbackId
    where
        F: Fn(&Diagnostic) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_callback_id;
        inner.next_callback_id += 1;
        inner.callbacks.push(Callback {
            id,
            func: Box::new(func),
        });
        if inner.action_is_default {
            inner.action = DebugAction::CALLBACK;
        }
        id
    }

    /// Unregisters a callback. Removing the last callback restores the
    /// default log action, or just drops the callback bit when the mask
    /// was configured explicitly.
    pub fn unregister_callback(&self, id: CallbackId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.callbacks.len();
        inner.callbacks.retain(|callback| callback.id != id);
        let removed = inner.callbacks.len() != before;

        if inner.callbacks.is_empty() {
            if inner.action_is_default {
                inner.action = DebugAction::LOG_MSG;
            } else {
                inner.action -= DebugAction::CALLBACK;
            }
        }
        removed
    }

    #[cfg(test)]
    fn current_action(&self) -> DebugAction {
        self.inner.lock().unwrap().action
    }
}

impl Debug for Reporter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter").field("level", &self.level).finish()
    }
}
