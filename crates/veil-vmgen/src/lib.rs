//! Veil VM generator: per-build opcode shuffling, bytecode serialization,
//! and emission of the Lua interpreter that runs the serialized chunk.

pub mod base85;
pub mod interp;
pub mod rng;
pub mod serialize;
pub mod shuffle;
pub mod vmgen;

pub use rng::Rng;
pub use serialize::SerializeError;
pub use shuffle::OpcodeMapping;
pub use vmgen::{build, generate, VmScript};
