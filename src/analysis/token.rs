/// Token produced by a tokenizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub position: u32,     // Position in the field value (for phrases)
    pub offset: usize,     // Byte offset in the original text
}

impl Token {
    pub fn new(text: String, position: u32, offset: usize) -> Self {
        Token { text, position, offset }
    }
}
