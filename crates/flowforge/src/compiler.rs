//! A compile session: identifier registry, target network, instance bindings
//! and the rows emitted so far.
//!
//! ```text
//! domain items ──compile_domain──▶ polygons, points, links, starter metrics
//!                                       │ (network + metric index)
//! template + sections ──slice──▶ kept items ──compile_template──▶
//!     metrics (per context) → triggers (per context) → cards, charts, maps → pages
//! ```
//!
//! Stages run in that order because each one resolves references to what the
//! previous ones produced.

use serde_json::Value;

use crate::config::CompileOptions;
use crate::descriptor::Aliases;
use crate::error::Result;
use crate::fixture::{self, FixtureRow};
use crate::ids::IdRegistry;
use crate::instances::Instances;
use crate::low_level::parse_domain;
use crate::network::Network;
use crate::resolve::Resolver;
use crate::slicer::{self, Slice};
use crate::template::{AbstractionItem, parse_template};

#[derive(Debug)]
pub struct Compiler {
    pub(crate) options: CompileOptions,
    pub(crate) aliases: Aliases,
    pub(crate) ids: IdRegistry,
    pub(crate) network: Network,
    pub(crate) instances: Instances,
    pub(crate) rows: Vec<FixtureRow>,
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            aliases: options.aliases(),
            ids: IdRegistry::new(options.id_policy),
            network: Network::new(),
            instances: Instances::new(),
            rows: Vec::new(),
            options,
        }
    }

    /// Continues from rows of an earlier run.
    ///
    /// The rows are re-emitted first. Their keys are reserved, their targets
    /// and metrics are reused instead of duplicated, and triggers among them
    /// are updated in place when a recompile produces the same output metric.
    pub fn with_existing(options: CompileOptions, existing: Vec<FixtureRow>) -> Self {
        let mut compiler = Self::new(options);
        compiler.ids.seed(&existing);
        compiler.network.index_rows(&existing);
        if !existing.is_empty() {
            log::info!("continuing from {} existing row(s)", existing.len());
        }
        compiler.rows = existing;
        compiler
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn instances(&self) -> &Instances {
        &self.instances
    }

    pub fn rows(&self) -> &[FixtureRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<FixtureRow> {
        self.rows
    }

    /// Materializes the part of `template` the pages in `sections` need.
    ///
    /// Returns the rows this call appended. Triggers updated in place are part
    /// of [`Compiler::rows`] but not of the returned slice.
    pub fn compile_template(
        &mut self,
        template: &[AbstractionItem],
        sections: &[String],
    ) -> &[FixtureRow] {
        let start = self.rows.len();
        let slice = slicer::slice(template, sections, &self.aliases);
        if slice.is_empty() {
            log::info!("no template items selected");
            return &self.rows[start..];
        }
        self.materialize(template, &slice);
        log::info!("template produced {} row(s)", self.rows.len() - start);
        &self.rows[start..]
    }

    fn materialize(&mut self, template: &[AbstractionItem], slice: &Slice) {
        let kept = slice.items(template);
        self.create_metrics(&kept);
        self.create_triggers(&kept);
        self.create_widgets(&kept);
        self.create_pages(&kept);
    }

    pub(crate) fn push(&mut self, row: FixtureRow) -> usize {
        self.rows.push(row);
        self.rows.len() - 1
    }

    pub(crate) fn resolver(&mut self) -> Resolver<'_> {
        Resolver::new(&self.network, &self.instances, &mut self.ids, &self.aliases)
    }

    /// Rows of `model` emitted so far.
    pub fn rows_of<'r>(&'r self, model: &'r str) -> impl Iterator<Item = &'r FixtureRow> + 'r {
        self.rows.iter().filter(move |row| row.is(model))
    }
}

/// Everything one end-to-end compile reads.
#[derive(Debug, Clone, Default)]
pub struct CompileInput {
    pub domain: Value,
    pub template: Value,
    pub sections: Vec<String>,
    pub existing: Vec<FixtureRow>,
}

/// Runs the low-level stage over `input.domain`, then the high-level stage
/// over `input.template`, and returns the full row list.
pub fn compile(input: CompileInput, options: CompileOptions) -> Result<Vec<FixtureRow>> {
    let domain = match input.domain {
        Value::Null => Vec::new(),
        ref value => parse_domain(value)?,
    };
    let template = match input.template {
        Value::Null => Vec::new(),
        ref value => parse_template(value)?,
    };
    let mut compiler = Compiler::with_existing(options, input.existing);
    compiler.compile_domain(&domain)?;
    compiler.compile_template(&template, &input.sections);
    Ok(compiler.into_rows())
}

/// [`compile`] with JSON output.
pub fn compile_to_json(input: CompileInput, options: CompileOptions) -> Result<Value> {
    compile(input, options).map(|rows| fixture::rows_to_json(&rows))
}
