pub mod analyzer;
pub mod token;
pub mod tokenizer;
