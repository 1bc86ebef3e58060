#![no_main]

use libfuzzer_sys::fuzz_target;
use veil_compiler::lexer::Lexer;
use veil_compiler::token::Token;

fuzz_target!(|data: &[u8]| {
    // The lexer must never panic on any input. Errors are fine, panics are bugs.
    let mut lexer = Lexer::new(data);
    loop {
        match lexer.advance() {
            Ok(tok) if tok.token == Token::Eof => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }
});
