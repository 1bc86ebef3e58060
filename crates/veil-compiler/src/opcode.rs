/// Register-machine opcodes and instruction layout.
///
/// An instruction carries an opcode plus three operands:
/// - A: target register (8 bits)
/// - B: register, constant reference or signed jump offset (16 bits, signed)
/// - C: register or constant reference (16 bits)
///
/// Operands that accept either a register or a constant ("RK") encode a
/// constant as `RK_BIAS + index`.
use std::fmt;

/// Operand values at or above this refer to the constant pool.
pub const RK_BIAS: u16 = 256;

pub const MAX_SBX: i32 = i16::MAX as i32;
pub const MIN_SBX: i32 = i16::MIN as i32;

/// The 38 canonical opcodes, in their fixed order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum OpCode {
    Move = 0,
    LoadK,
    LoadBool,
    LoadNil,
    /// `R[A] = R[B][1]`: read a captured local through its cell.
    GetUpval,
    GetGlobal,
    GetTable,
    SetGlobal,
    /// `R[B][1] = R[A]`
    SetUpval,
    SetTable,
    NewTable,
    Self_,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
    Not,
    Len,
    Concat,
    Jmp,
    Eq,
    Lt,
    Le,
    Test,
    TestSet,
    Call,
    TailCall,
    Return,
    ForLoop,
    ForPrep,
    TForLoop,
    SetList,
    /// `R[A] = {R[A]}`: box a captured local into a fresh cell.
    Close,
    Closure,
    VarArg,
}

impl OpCode {
    /// Number of opcodes.
    pub const COUNT: usize = 38;

    /// Every opcode in canonical order.
    pub const ALL: [OpCode; OpCode::COUNT] = {
        use OpCode::*;
        [
            Move, LoadK, LoadBool, LoadNil, GetUpval, GetGlobal, GetTable, SetGlobal, SetUpval,
            SetTable, NewTable, Self_, Add, Sub, Mul, Div, Mod, Pow, Unm, Not, Len, Concat, Jmp,
            Eq, Lt, Le, Test, TestSet, Call, TailCall, Return, ForLoop, ForPrep, TForLoop,
            SetList, Close, Closure, VarArg,
        ]
    };

    /// Get the opcode from its canonical index.
    pub fn from_u8(val: u8) -> Option<OpCode> {
        Self::ALL.get(val as usize).copied()
    }

    /// Operand layout of this opcode.
    pub fn format(&self) -> InstructionFormat {
        use InstructionFormat::*;
        use OpCode::*;
        match self {
            LoadK | GetGlobal | SetGlobal | Closure => IABx,
            Jmp | ForLoop | ForPrep => IAsBx,
            _ => IABC,
        }
    }

    /// Mnemonic used by the disassembler.
    pub fn name(&self) -> &'static str {
        use OpCode::*;
        match self {
            Move => "MOVE",
            LoadK => "LOADK",
            LoadBool => "LOADBOOL",
            LoadNil => "LOADNIL",
            GetUpval => "GETUPVAL",
            GetGlobal => "GETGLOBAL",
            GetTable => "GETTABLE",
            SetGlobal => "SETGLOBAL",
            SetUpval => "SETUPVAL",
            SetTable => "SETTABLE",
            NewTable => "NEWTABLE",
            Self_ => "SELF",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            Mod => "MOD",
            Pow => "POW",
            Unm => "UNM",
            Not => "NOT",
            Len => "LEN",
            Concat => "CONCAT",
            Jmp => "JMP",
            Eq => "EQ",
            Lt => "LT",
            Le => "LE",
            Test => "TEST",
            TestSet => "TESTSET",
            Call => "CALL",
            TailCall => "TAILCALL",
            Return => "RETURN",
            ForLoop => "FORLOOP",
            ForPrep => "FORPREP",
            TForLoop => "TFORLOOP",
            SetList => "SETLIST",
            Close => "CLOSE",
            Closure => "CLOSURE",
            VarArg => "VARARG",
        }
    }

    /// Opcodes that conditionally skip the next instruction.
    pub fn is_test(&self) -> bool {
        use OpCode::*;
        matches!(self, Eq | Lt | Le | Test | TestSet)
    }
}

/// How the operand bits of an instruction are split.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstructionFormat {
    IABC,
    /// B is an unbiased constant index.
    IABx,
    /// B is a signed jump offset.
    IAsBx,
}

/// One bytecode instruction.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    op: OpCode,
    a: u8,
    b: i16,
    c: u16,
}

impl Instruction {
    // ---- Constructors ----

    pub fn abc(op: OpCode, a: u8, b: u16, c: u16) -> Self {
        Instruction {
            op,
            a,
            b: b as i16,
            c,
        }
    }

    /// Instruction whose B is an unbiased constant index.
    pub fn abx(op: OpCode, a: u8, bx: u16) -> Self {
        Self::abc(op, a, bx, 0)
    }

    /// Instruction whose B is a signed offset.
    pub fn asbx(op: OpCode, a: u8, sbx: i32) -> Self {
        Instruction {
            op,
            a,
            b: sbx.clamp(MIN_SBX, MAX_SBX) as i16,
            c: 0,
        }
    }

    // ---- Field accessors ----

    pub fn opcode(&self) -> OpCode {
        self.op
    }

    pub fn a(&self) -> u8 {
        self.a
    }

    /// B as an unsigned operand (register or RK); offsets read back in two's complement.
    pub fn b(&self) -> u16 {
        self.b as u16
    }

    pub fn sbx(&self) -> i32 {
        i32::from(self.b)
    }

    pub fn c(&self) -> u16 {
        self.c
    }

    // ---- Mutators ----

    pub fn set_a(&mut self, a: u8) {
        self.a = a;
    }

    pub fn set_sbx(&mut self, sbx: i32) {
        self.b = sbx.clamp(MIN_SBX, MAX_SBX) as i16;
    }

    pub fn set_c(&mut self, c: u16) {
        self.c = c;
    }
}

/// True when an RK operand names a constant.
pub fn is_constant(rk: u16) -> bool {
    rk >= RK_BIAS
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op.name())?;
        match self.op.format() {
            InstructionFormat::IABC => write!(f, " A={} B={} C={}", self.a, self.b(), self.c),
            InstructionFormat::IABx => write!(f, " A={} Bx={}", self.a, self.b()),
            InstructionFormat::IAsBx => write!(f, " A={} sBx={}", self.a, self.sbx()),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_count() {
        assert_eq!(OpCode::VarArg as u8 + 1, OpCode::COUNT as u8);
    }

    #[test]
    fn test_all_opcodes_from_u8() {
        for i in 0..OpCode::COUNT {
            let op = OpCode::from_u8(i as u8).unwrap();
            assert_eq!(op as u8, i as u8);
        }
        assert!(OpCode::from_u8(OpCode::COUNT as u8).is_none());
    }

    #[test]
    fn test_canonical_order_names() {
        let names: Vec<&str> = OpCode::ALL.iter().map(|op| op.name()).collect();
        assert_eq!(&names[..4], &["MOVE", "LOADK", "LOADBOOL", "LOADNIL"]);
        assert_eq!(names[22], "JMP");
        assert_eq!(names[37], "VARARG");
    }

    #[test]
    fn test_abc_with_constant_operands() {
        let inst = Instruction::abc(OpCode::Add, 3, RK_BIAS + 1, 2);
        assert_eq!(inst.opcode(), OpCode::Add);
        assert_eq!(inst.a(), 3);
        assert_eq!(inst.b(), 257);
        assert_eq!(inst.c(), 2);
        assert!(is_constant(inst.b()));
        assert!(!is_constant(inst.c()));
    }

    #[test]
    fn test_asbx_roundtrip() {
        let inst = Instruction::asbx(OpCode::Jmp, 0, -5);
        assert_eq!(inst.sbx(), -5);
        assert_eq!(inst.b(), 0xFFFB);

        let mut inst = Instruction::asbx(OpCode::ForPrep, 2, 0);
        inst.set_sbx(1234);
        assert_eq!(inst.sbx(), 1234);
        assert_eq!(inst.a(), 2);
    }

    #[test]
    fn test_format() {
        assert_eq!(OpCode::LoadK.format(), InstructionFormat::IABx);
        assert_eq!(OpCode::ForLoop.format(), InstructionFormat::IAsBx);
        assert_eq!(OpCode::Call.format(), InstructionFormat::IABC);
    }

    #[test]
    fn test_debug_display() {
        let inst = Instruction::abc(OpCode::Move, 1, 2, 0);
        assert_eq!(format!("{inst}"), "MOVE A=1 B=2 C=0");
        let jmp = Instruction::asbx(OpCode::Jmp, 0, -3);
        assert_eq!(format!("{jmp:?}"), "JMP A=0 sBx=-3");
    }
}
