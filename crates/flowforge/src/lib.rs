//! Compiles a water-network description (zones and sensors) plus a library
//! of metric, trigger and UI templates into bulk-load fixture rows.

pub mod compiler;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod fixture;
pub mod geo;
pub mod ids;
pub mod input;
pub mod instances;
pub mod low_level;
pub mod map_bindings;
mod materialize;
pub mod network;
pub mod resolve;
pub mod slicer;
pub mod template;
mod ui;

pub use compiler::{CompileInput, Compiler, compile, compile_to_json};
pub use config::CompileOptions;
pub use descriptor::{Aliases, Descriptor};
pub use error::{CompileError, Result};
pub use fixture::{FixtureRow, Pk};
pub use ids::IdPolicy;
pub use low_level::{DomainItem, parse_domain};
pub use template::{AbstractionItem, parse_template};
