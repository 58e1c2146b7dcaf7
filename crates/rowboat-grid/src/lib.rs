pub mod error;
pub mod infer;
pub mod metadata;
pub mod table;
pub mod tokenizer;
pub mod warning;
