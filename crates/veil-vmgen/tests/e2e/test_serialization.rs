use super::helpers::*;
use proptest::prelude::*;
use veil_compiler::chunk::{BytecodeChunk, Constant};
use veil_compiler::opcode::{Instruction, OpCode};
use veil_vmgen::base85::{self, DECOY, SENTINEL};
use veil_vmgen::serialize::{deserialize, serialize, SerializeError};
use veil_vmgen::{OpcodeMapping, Rng};

fn mapping(seed: u64) -> OpcodeMapping {
    OpcodeMapping::build(&mut Rng::seeded(seed))
}

/// Serialize, base-85 encode, decode and deserialize.
fn through_blob(chunk: &BytecodeChunk, mapping: &OpcodeMapping) -> BytecodeChunk {
    let bytes = serialize(chunk, mapping).unwrap();
    let decoded = base85::decode(&base85::encode(&bytes)).unwrap();
    // Group padding reads back as zero bytes, too short for an instruction.
    assert!(decoded.len() - bytes.len() < 4);
    assert!(decoded[bytes.len()..].iter().all(|b| *b == 0));
    deserialize(&decoded, mapping).unwrap()
}

#[test]
fn test_empty_chunk_round_trip() {
    let chunk = BytecodeChunk::new();
    let back = through_blob(&chunk, &mapping(1));
    assert!(back.code.is_empty());
    assert!(back.constants.is_empty());
}

#[test]
fn test_single_constant_and_instruction() {
    let mut chunk = BytecodeChunk::new();
    chunk.add_constant(Constant::Str(b"only".to_vec()));
    chunk.emit(Instruction::abx(OpCode::GetGlobal, 0, 0), 1);
    let back = through_blob(&chunk, &mapping(2));
    assert_eq!(back.code, chunk.code);
    assert_eq!(back.constants, chunk.constants);
}

#[test]
fn test_many_constants_and_instructions() {
    let mut chunk = BytecodeChunk::new();
    for i in 0..200 {
        chunk.add_constant(Constant::number(f64::from(i) * 1.5));
    }
    for i in 0..500u16 {
        chunk.emit(Instruction::abc(OpCode::Add, (i % 200) as u8, 256 + (i % 200), i % 7), 1);
        chunk.emit(Instruction::asbx(OpCode::Jmp, 0, -i32::from(i)), 1);
    }
    let back = through_blob(&chunk, &mapping(3));
    assert_eq!(back.code, chunk.code);
    assert_eq!(back.constants, chunk.constants);
}

#[test]
fn test_sentinel_text_in_constants() {
    let source = format!(
        "local a, b, c = '{SENTINEL}', '{DECOY}', '{SENTINEL}{DECOY}{SENTINEL}' print(a .. b, c)"
    );
    let chunk = compile_str(&source);
    let back = through_blob(&chunk, &mapping(4));
    assert_eq!(back.constants, chunk.constants);

    let vm = run_lua(&source);
    assert_eq!(
        vm.output(),
        [format!("{SENTINEL}{DECOY}\t{SENTINEL}{DECOY}{SENTINEL}")]
    );
}

#[test]
fn test_numeric_looking_strings_stay_strings() {
    check_output(
        "local a, b, c = '12', ' 0x10 ', '1e3' print(a .. b .. c, type(a))",
        &["12 0x10 1e3\tstring"],
    );
}

#[test]
fn test_serialized_opcodes_use_mapping() {
    let chunk = compile_str("print(1)");
    let first = serialize(&chunk, &mapping(10)).unwrap();
    let second = serialize(&chunk, &mapping(11)).unwrap();
    assert_ne!(first, second);
    match deserialize(&first, &mapping(11)) {
        Ok(wrong) => assert_ne!(wrong.code, chunk.code),
        Err(e) => assert!(matches!(e, SerializeError::UnknownOpcode { .. }), "{e}"),
    }
}

#[test]
fn test_too_many_constants_rejected() {
    let mut chunk = BytecodeChunk::new();
    for i in 0..300 {
        chunk.add_constant(Constant::number(f64::from(i)));
    }
    assert!(matches!(
        serialize(&chunk, &mapping(5)),
        Err(SerializeError::TooManyConstants(300))
    ));
}

proptest! {
    #[test]
    fn prop_base85_round_trip(data in proptest::collection::vec(any::<u8>(), 0..600)) {
        let text = base85::encode(&data);
        prop_assert!(text.starts_with(SENTINEL));
        let decoded = base85::decode(&text).unwrap();
        prop_assert_eq!(decoded.len(), data.len().div_ceil(4) * 4);
        prop_assert_eq!(&decoded[..data.len()], &data[..]);
    }

    #[test]
    fn prop_string_constants_round_trip(
        strings in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..40), 0..30),
        seed in any::<u64>(),
    ) {
        let mut chunk = BytecodeChunk::new();
        for s in strings {
            chunk.add_constant(Constant::Str(s));
        }
        let m = mapping(seed);
        let back = deserialize(&serialize(&chunk, &m).unwrap(), &m).unwrap();
        prop_assert_eq!(back.constants, chunk.constants);
    }
}
