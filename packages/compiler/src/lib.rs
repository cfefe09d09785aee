//! PIT compiler - Turn Peach PIT documents into an executable fuzzing model.
//!
//! A pit is an XML document describing the layout of a protocol or file
//! format, where it may be mutated, and the state machine that drives a
//! target through it. This crate compiles a pit into a [`Dom`], the
//! in-memory model a fuzzing engine consumes.
//!
//! # Example
//!
//! ```
//! use pit_compiler::{Defines, PitCompiler};
//!
//! let pit = r#"<Peach>
//!     <DataModel name="Packet">
//!         <Number name="length" size="8"><Relation type="size" of="body"/></Number>
//!         <Blob name="body" value="abc"/>
//!     </DataModel>
//! </Peach>"#;
//!
//! let compiled = PitCompiler::new().compile(pit, &Defines::new(), None).unwrap();
//! let model = compiled.dom.find_data_model("Packet").unwrap();
//! let bytes = pit_compiler::render::render_model(model, &pit_compiler::SimpleEvaluator).unwrap();
//! assert_eq!(bytes, vec![3, b'a', b'b', b'c']);
//! ```
//!
//! # Architecture
//!
//! - [`compiler`]: Document compiler and its passes
//! - [`defines`]: `##KEY##` substitution and defines files
//! - [`schema`]: Structural validation
//! - [`registry`]: Element factories and plugin descriptors
//! - [`builder`]: Data element builder
//! - [`coercion`]: `value`/`valueType` coercion
//! - [`binder`]: Relation binding
//! - [`plugin`]: Plugin resolution and the built-in catalog
//! - [`assembler`]: State models, agents and tests
//! - [`dataset`]: `<Data>` datasets
//! - [`render`]: Default-value rendering
//! - [`dom`]: The compiled model
//! - [`expression`]: Expression evaluation
//! - [`script`]: Scripting host interface
//! - [`session`]: Per-compile state
//! - [`config`]: Constants and compile options
//! - [`error`]: Error types and Result alias
//! - [`xml`]: XML utilities
//! - [`cli`]: Command-line interface

pub mod assembler;
pub mod binder;
pub mod builder;
pub mod cli;
pub mod coercion;
pub mod compiler;
pub mod config;
pub mod dataset;
pub mod defines;
pub mod dom;
pub mod error;
pub mod expression;
pub mod plugin;
pub mod registry;
pub mod render;
pub mod schema;
pub mod script;
pub mod session;
pub mod xml;

pub use compiler::{Compiled, CompilerHooks, DefaultHooks, PitCompiler};
pub use config::CompileOptions;
pub use defines::Defines;
pub use dom::Dom;
pub use error::{CompileError, Result};
pub use expression::SimpleEvaluator;
pub use registry::Registry;
