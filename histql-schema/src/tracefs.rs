//! Loader for tracefs `events/<system>/<event>/format` files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::{EventDef, EventRegistry, FieldDef};

/// Errors raised while reading trace-event metadata.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The tracefs events directory could not be read at all.
    #[error("cannot read tracefs events under {path}: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Scan `<dir>/events/<system>/<event>/format` and build a registry.
///
/// Unreadable or malformed individual format files are skipped with a debug
/// log line; only a missing `events` directory is an error.
pub fn load_events(dir: &Path) -> Result<EventRegistry, SchemaError> {
    let events_dir = dir.join("events");
    let systems = fs::read_dir(&events_dir).map_err(|source| SchemaError::Unavailable {
        path: events_dir.clone(),
        source,
    })?;

    let mut registry = EventRegistry::new();

    for system_entry in systems.flatten() {
        if !system_entry.path().is_dir() {
            continue;
        }
        let system = system_entry.file_name().to_string_lossy().into_owned();
        // The top-level "enable" and "header_*" entries are files, already
        // filtered by the is_dir check above.
        let Ok(events) = fs::read_dir(system_entry.path()) else {
            continue;
        };
        for event_entry in events.flatten() {
            let format_path = event_entry.path().join("format");
            let Ok(text) = fs::read_to_string(&format_path) else {
                continue;
            };
            match parse_format(&system, &text) {
                Some(def) => registry.register_event(def),
                None => debug!(path = %format_path.display(), "skipping malformed format file"),
            }
        }
    }

    debug!(events = registry.len(), "loaded trace event formats");
    Ok(registry)
}

/// Parse one format file. Layout:
///
/// ```text
/// name: sched_switch
/// ID: 316
/// format:
///     field:unsigned short common_type;  offset:0;  size:2;  signed:0;
///     field:pid_t next_pid;              offset:24; size:4;  signed:1;
/// ```
fn parse_format(system: &str, text: &str) -> Option<EventDef> {
    let mut name = None;
    let mut fields = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if let Some(n) = line.strip_prefix("name:") {
            name = Some(n.trim().to_string());
        } else if let Some(decl) = line.strip_prefix("field:") {
            // Everything up to the first ';' is the C declaration; the final
            // whitespace-separated token is the field name, the rest its type.
            let decl = decl.split(';').next()?.trim();
            let (type_name, field_name) = split_declaration(decl)?;
            fields.push(FieldDef {
                name: field_name,
                type_name,
            });
        }
    }

    Some(EventDef {
        name: name?,
        system: system.to_string(),
        fields,
    })
}

/// Split a C field declaration into (type, name). Array suffixes stay with
/// the type: `char comm[16]` becomes (`char[16]`, `comm`).
fn split_declaration(decl: &str) -> Option<(String, String)> {
    let idx = decl.rfind(char::is_whitespace)?;
    let type_part = decl[..idx].trim();
    let name_part = decl[idx..].trim();

    if let Some(bracket) = name_part.find('[') {
        let (name, dims) = name_part.split_at(bracket);
        Some((format!("{}{}", type_part, dims), name.to_string()))
    } else {
        Some((type_part.to_string(), name_part.to_string()))
    }
}
