use std::fmt;

/// One dictionary entry: an input code and the text it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub code: String,
    pub text: String,
}

impl Word {
    pub fn new(code: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            text: text.into(),
        }
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.text, self.code)
    }
}
