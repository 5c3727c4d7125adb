use crate::analysis::filter::TokenFilter;
use crate::analysis::token::Token;

/// Drops tokens shorter than `min` or longer than `max` characters, per a
/// field's `min_word_length`/`max_word_length` configuration.
pub struct WordLengthFilter {
    pub min: usize,
    pub max: usize,
}

impl TokenFilter for WordLengthFilter {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token> {
        tokens
            .into_iter()
            .filter(|t| t.text.chars().count() >= self.min && t.text.chars().count() <= self.max)
            .collect()
    }

    fn name(&self) -> &str {
        "word_length"
    }

    fn clone_box(&self) -> Box<dyn TokenFilter> {
        Box::new(WordLengthFilter { min: self.min, max: self.max })
    }
}
