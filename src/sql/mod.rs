pub mod analysis;
pub mod tokenizer;

pub use analysis::*;
pub use tokenizer::{render, tokenize, Token, TokenKind};
