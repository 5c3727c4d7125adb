use crate::analysis::filter::TokenFilter;
use crate::analysis::filters::{LowercaseFilter, StemmerFilter, StopWordFilter, WordLengthFilter};
use crate::analysis::token::Token;
use crate::analysis::tokenizer::{StandardTokenizer, Tokenizer};
use crate::schema::FieldDef;
use rust_stemmers::Algorithm;

/// A tokenizer plus an ordered chain of filters. One is built per text field
/// from its [`FieldDef`], rather than looked up by name: unlike the
/// named-profile model of a general search engine, an index's fields are
/// its only analyzer configuration.
pub struct Analyzer {
    pub tokenizer: Box<dyn Tokenizer>,
    pub filters: Vec<Box<dyn TokenFilter>>,
}

impl Analyzer {
    pub fn new(tokenizer: Box<dyn Tokenizer>) -> Self {
        Analyzer { tokenizer, filters: Vec::new() }
    }

    pub fn add_filter(mut self, filter: Box<dyn TokenFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn analyze(&self, text: &str) -> Vec<Token> {
        let mut tokens = self.tokenizer.tokenize(text);
        for filter in &self.filters {
            tokens = filter.filter(tokens);
        }
        tokens
    }

    /// Lowercase, unicode-word tokenizer with no stopword/stemmer filtering.
    /// Used for fields that don't opt into either.
    pub fn standard() -> Self {
        Analyzer::new(Box::new(StandardTokenizer::default())).add_filter(Box::new(LowercaseFilter))
    }

    /// Build the analyzer a field's configuration calls for: word-length
    /// bounds, then the index's custom stopword list, then stemming, in that
    /// order so stemming only ever sees already-filtered tokens.
    pub fn for_field(field: &FieldDef, remove_words: &[String]) -> Self {
        let mut tokenizer = StandardTokenizer::default();
        if let Some(max) = field.max_word_length {
            tokenizer.max_token_length = max;
        }
        let mut analyzer = Analyzer::new(Box::new(tokenizer)).add_filter(Box::new(LowercaseFilter));

        if field.min_word_length.is_some() || field.max_word_length.is_some() {
            analyzer = analyzer.add_filter(Box::new(WordLengthFilter {
                min: field.min_word_length.unwrap_or(0),
                max: field.max_word_length.unwrap_or(usize::MAX),
            }));
        }
        if field.use_remove_words && !remove_words.is_empty() {
            analyzer = analyzer.add_filter(Box::new(StopWordFilter::new(remove_words.to_vec())));
        }
        if field.use_stemmer {
            analyzer = analyzer.add_filter(Box::new(StemmerFilter::new(Algorithm::English)));
        }
        analyzer
    }
}
