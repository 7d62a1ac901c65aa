use crate::address::{Address, ValidationMode, check_syntax_with_mode};
use crate::outcome::Category;
use crate::pipeline::{Verdict, VerificationStrategy};

/// Malformed addresses are invalid; nothing after this stage sees them.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntaxStrategy {
    mode: ValidationMode,
}

impl SyntaxStrategy {
    pub fn new(mode: ValidationMode) -> Self {
        Self { mode }
    }
}

impl VerificationStrategy for SyntaxStrategy {
    fn name(&self) -> &'static str {
        "syntax"
    }

    fn classify(&self, address: &Address) -> Verdict {
        match check_syntax_with_mode(address, self.mode) {
            Ok(_) => Verdict::Defer,
            Err(err) => Verdict::classified(Category::Invalid, err.reason()),
        }
    }
}
