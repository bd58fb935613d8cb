// Parser module: provider field layout and item normalization.

pub mod flow_parser;

pub use flow_parser::{field_codes, FlowParser, Parser};
