//! Veil: compiles a Lua-subset program into a self-contained script that
//! carries its own randomized bytecode interpreter.
//!
//! ```no_run
//! let options = veil::Options::default().with_seed(7);
//! let out = veil::obfuscate("print('hello')", &options).unwrap();
//! std::fs::write("hello.obf.lua", &out.script).unwrap();
//! ```

use log::{debug, info, trace};
use std::borrow::Cow;
use thiserror::Error;
use veil_compiler::chunk::BytecodeChunk;
use veil_compiler::disasm::disassemble;
use veil_vmgen::{vmgen, OpcodeMapping, Rng, SerializeError};

pub use veil_compiler;
pub use veil_vmgen;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] veil_compiler::Error),
    #[error("serialization failed: {0}")]
    Serialize(#[from] SerializeError),
}

/// Build settings.
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Seed for every randomized step. `None` seeds from the clock.
    pub seed: Option<u64>,
    /// Text placed before the generated definitions.
    pub prologue: String,
    /// Text placed after the definitions, before the line that starts the VM.
    pub epilogue: String,
}

impl Options {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_prologue(mut self, text: impl Into<String>) -> Self {
        self.prologue = text.into();
        self
    }

    pub fn with_epilogue(mut self, text: impl Into<String>) -> Self {
        self.epilogue = text.into();
        self
    }
}

/// Result of one build.
#[derive(Clone, Debug)]
pub struct Obfuscated {
    pub script: String,
    pub chunk: BytecodeChunk,
    pub mapping: OpcodeMapping,
    /// Seed the build ran with; passing it back reproduces `script`.
    pub seed: u64,
}

/// Rewrite CRLF line endings as LF.
pub fn normalize_newlines(source: &str) -> Cow<'_, str> {
    if source.contains("\r\n") {
        Cow::Owned(source.replace("\r\n", "\n"))
    } else {
        Cow::Borrowed(source)
    }
}

/// Compile `source` and wrap it in a freshly randomized VM.
pub fn obfuscate(source: &str, options: &Options) -> Result<Obfuscated, Error> {
    let source = normalize_newlines(source);
    let chunk = veil_compiler::compile_source(source.as_bytes())?;
    info!(
        "compiled {} instructions, {} constants",
        chunk.code.len(),
        chunk.constants.len()
    );
    trace!("{}", disassemble(&chunk));

    let mut rng = match options.seed {
        Some(seed) => Rng::seeded(seed),
        None => Rng::from_entropy(),
    };
    debug!("build seed {:#018x}", rng.seed());

    let mapping = OpcodeMapping::build(&mut rng);
    debug!("opcode mapping assigns {} bytes", mapping.iter().count());

    let vm = vmgen::build(&chunk, &mapping, &mut rng)?;
    debug!(
        "decorations: {} byte prologue, {} byte epilogue",
        options.prologue.len(),
        options.epilogue.len()
    );
    let script = vm.assemble(&options.prologue, &options.epilogue);
    info!("generated {} byte script", script.len());

    Ok(Obfuscated {
        script,
        chunk,
        mapping,
        seed: rng.seed(),
    })
}
