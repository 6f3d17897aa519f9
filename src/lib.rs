pub mod api;
pub mod assembler;
pub mod ast;
pub mod builder;
pub mod error;
pub mod lexer;
pub mod meta;
pub mod utils;

pub use api::{compile, compile_file, compile_with, CompileOptions};
pub use ast::Grammar;
pub use error::EmugError;
