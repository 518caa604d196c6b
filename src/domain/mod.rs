//! Core domain: the transpiler pipeline from script text to Rust source.

pub mod token;
pub mod lexer;
pub mod registry;
pub mod ast;
pub mod parser;
pub mod complexity;
pub mod expr;
pub mod transform;
pub mod codegen;
pub mod converter;
pub mod settings;
pub mod error;
