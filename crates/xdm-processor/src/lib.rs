//! Query and transformation processors over the XDM model.
//!
//! The [`Engine`] owns the process-wide lifecycle and hands out
//! independent processor instances:
//!
//! - [`XPathProcessor`] compiles and evaluates XPath expressions,
//! - [`Xslt30Processor`] compiles stylesheets and applies templates,
//! - [`XQueryProcessor`] runs queries with direct element constructors,
//! - [`SchemaValidator`] checks instance documents against schemas.
//!
//! ```no_run
//! use xdm_processor::Engine;
//!
//! # fn main() -> xdm_processor::Result<()> {
//! let engine = Engine::init()?;
//! let doc = engine.parse_xml_str("<out><person>text1</person></out>")?;
//! let mut xpath = engine.new_xpath_processor()?;
//! xpath.set_context(xdm::XdmItem::Node(doc));
//! let hits = xpath.evaluate("/out/person")?;
//! assert_eq!(hits.size(), 1);
//! # Ok(())
//! # }
//! ```

mod engine;
mod error;
mod validator;
mod xpath;
mod xquery;
mod xslt;

pub use engine::Engine;
pub use error::{Error, Result};
pub use validator::{SchemaValidator, ValidationFailure, ValidationReport};
pub use xpath::{SequenceType, XPathProcessor};
pub use xquery::XQueryProcessor;
pub use xslt::Xslt30Processor;
