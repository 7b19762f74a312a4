//! Flow configuration language
//!
//! Turns configuration text into the [`flow_types::Body`] tree consumed by
//! the graph builder:
//!
//! ```text
//! testcomponents.count "inc" {
//!     frequency = "10ms"
//!     max       = 10
//! }
//!
//! testcomponents.summation "sum" {
//!     input = testcomponents.count.inc.count
//! }
//! ```
//!
//! The pipeline is [`lexer`] (text to tokens) followed by [`parser`]
//! (tokens to blocks, attributes and expressions).

#![deny(unsafe_code)]

pub mod errors;
pub mod lexer;
pub mod parser;

pub use errors::{DslError, DslResult};
pub use parser::Parser;

/// Parse a complete configuration
pub fn parse(input: &str) -> DslResult<flow_types::Body> {
    Parser::parse(input)
}

/// Parse a single expression
pub fn parse_expression(input: &str) -> DslResult<flow_types::Expr> {
    Parser::parse_expression(input)
}
