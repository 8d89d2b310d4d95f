//! Compiler - main interface.
//!
//! Compiles histql queries to hist-trigger programs.

use std::sync::Arc;

use tracing::debug;

use histql_schema::{EventMetadata, StubMetadata};

use crate::builder::Compilation;
use crate::codegen::{CodeGenerator, CompiledQuery};
use crate::error::Result;
use crate::parser;
use crate::resolver::Resolver;

/// Query compiler bound to an event metadata source.
pub struct Compiler {
    metadata: Arc<dyn EventMetadata>,
}

impl Compiler {
    pub fn new(metadata: Arc<dyn EventMetadata>) -> Self {
        Self { metadata }
    }

    /// A compiler with no event metadata: triggers are still generated,
    /// with `(system)` and `(unknown)` markers standing in for lookups.
    pub fn with_stub() -> Self {
        Self::new(Arc::new(StubMetadata))
    }

    /// Compile one statement into its trigger program.
    pub fn compile(&self, query: &str) -> Result<CompiledQuery> {
        let compilation = parser::parse(query)?;
        self.dump_tables(&compilation);
        CodeGenerator::new(&compilation, self.metadata.as_ref()).generate()
    }

    /// Parse only, handing back the query tree (for debugging).
    pub fn parse(&self, query: &str) -> Result<Compilation> {
        parser::parse(query)
    }

    /// Trace the table tree after parsing, one line per table.
    fn dump_tables(&self, c: &Compilation) {
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }
        let resolver = Resolver::new(&c.tree, &c.arena, &c.interner);
        for (id, table) in c.tree.tables() {
            let name = table
                .name
                .map(|n| c.interner.resolve(n))
                .unwrap_or("<unnamed>");
            let from = table
                .from
                .map(|f| resolver.resolve(id, c.interner.resolve(f)))
                .unwrap_or_default();
            let to = table
                .to
                .map(|t| resolver.resolve(id, c.interner.resolve(t)))
                .unwrap_or_default();
            let selections: Vec<String> = table
                .selections
                .iter()
                .map(|s| resolver.render_display(s.expr))
                .collect();
            debug!(
                table = name,
                from_event = from,
                to_event = to,
                selections = selections.join(", "),
                matches = table.matches.len(),
                "parsed table"
            );
        }
    }
}
