pub mod ast;
pub mod cache;
pub mod compiler;
pub mod parser;
