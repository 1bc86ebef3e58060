use proptest::prelude::*;
use std::collections::HashSet;
use veil_compiler::opcode::OpCode;
use veil_vmgen::shuffle::{FIRST_OPCODE_BYTE, LAST_OPCODE_BYTE};
use veil_vmgen::{OpcodeMapping, Rng};

fn assert_bijective(mapping: &OpcodeMapping) {
    let bytes: HashSet<u8> = mapping.iter().map(|(_, b)| b).collect();
    assert_eq!(bytes.len(), OpCode::COUNT);
    for (op, byte) in mapping.iter() {
        assert!((FIRST_OPCODE_BYTE..=LAST_OPCODE_BYTE).contains(&byte));
        assert_eq!(mapping.opcode(byte), Some(op));
    }
    let assigned = (0..=255u8).filter(|b| mapping.opcode(*b).is_some()).count();
    assert_eq!(assigned, OpCode::COUNT);
}

#[test]
fn test_mapping_bijective_for_first_hundred_seeds() {
    for seed in 0..100 {
        assert_bijective(&OpcodeMapping::build(&mut Rng::seeded(seed)));
    }
}

#[test]
fn test_mappings_vary_across_seeds() {
    let distinct: HashSet<Vec<u8>> = (0..100)
        .map(|seed| {
            OpcodeMapping::build(&mut Rng::seeded(seed))
                .iter()
                .map(|(_, b)| b)
                .collect()
        })
        .collect();
    assert_eq!(distinct.len(), 100);
}

#[test]
fn test_reserved_bytes_never_assigned() {
    for seed in 0..100 {
        let mapping = OpcodeMapping::build(&mut Rng::seeded(seed));
        assert_eq!(mapping.opcode(0), None);
        for byte in 251..=255u8 {
            assert_eq!(mapping.opcode(byte), None);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_mapping_bijective(seed in any::<u64>()) {
        let mapping = OpcodeMapping::build(&mut Rng::seeded(seed));
        let bytes: HashSet<u8> = mapping.iter().map(|(_, b)| b).collect();
        prop_assert_eq!(bytes.len(), OpCode::COUNT);
        for (op, byte) in mapping.iter() {
            prop_assert_eq!(mapping.opcode(byte), Some(op));
        }
    }
}
