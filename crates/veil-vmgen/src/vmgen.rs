//! Lua source of the virtual machine that runs a serialized chunk.
//!
//! The script defines, in order: the closure factory table, the encoded blob
//! and its decoder, the byte readers and constant loader, the register state,
//! the opcode handlers and the dispatch function. A final entry line runs the
//! dispatch function with the script's arguments and returns its results.
use crate::base85;
use crate::rng::Rng;
use crate::serialize::{self, SerializeError, FORMAT_VERSION, INSTRUCTION_WIDTH, TAG_FUNCTION, TAG_STRING};
use crate::shuffle::{OpcodeMapping, FIRST_OPCODE_BYTE, LAST_OPCODE_BYTE};
use log::{debug, trace};
use std::fmt::Write;
use veil_compiler::chunk::BytecodeChunk;
use veil_compiler::opcode::{OpCode, RK_BIAS};

/// Filler handlers bound to bytes no opcode uses.
pub const DECOY_HANDLERS: usize = 8;

/// A generated VM split at the point where the entry line begins.
#[derive(Clone, Debug)]
pub struct VmScript {
    definitions: String,
    entry: String,
}

impl VmScript {
    /// Everything up to and including the dispatch function.
    pub fn definitions(&self) -> &str {
        &self.definitions
    }

    /// The final `return` that starts the VM.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Join the script with `prologue` placed before the definitions and
    /// `epilogue` between the definitions and the entry line.
    pub fn assemble(&self, prologue: &str, epilogue: &str) -> String {
        let mut out = String::with_capacity(
            prologue.len() + self.definitions.len() + epilogue.len() + self.entry.len() + 3,
        );
        for part in [prologue, &self.definitions, epilogue, &self.entry] {
            if part.is_empty() {
                continue;
            }
            out.push_str(part);
            if !part.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }
}

/// Generate the complete script for a chunk.
pub fn generate(
    chunk: &BytecodeChunk,
    mapping: &OpcodeMapping,
    rng: &mut Rng,
) -> Result<String, SerializeError> {
    Ok(build(chunk, mapping, rng)?.assemble("", ""))
}

/// Generate the script in two parts so decorations can be placed around it.
pub fn build(
    chunk: &BytecodeChunk,
    mapping: &OpcodeMapping,
    rng: &mut Rng,
) -> Result<VmScript, SerializeError> {
    let bytes = serialize::serialize(chunk, mapping)?;
    let blob = base85::encode(&bytes);
    debug!(
        "serialized {} bytes into a {} character blob",
        bytes.len(),
        blob.len()
    );

    let mut out = String::new();
    emit_factories(&mut out, chunk);
    emit_loader(&mut out, &blob);
    emit_state(&mut out);
    emit_handlers(&mut out, mapping, rng);
    emit_dispatch(&mut out);

    Ok(VmScript {
        definitions: out,
        entry: "return run(...)\n".to_string(),
    })
}

fn emit_factories(out: &mut String, chunk: &BytecodeChunk) {
    out.push_str("local _F = {\n");
    for (_, source) in chunk.function_constants() {
        out.push_str(source);
        out.push_str(",\n");
    }
    out.push_str("}\n");
}

/// Wrap text in the lowest-level long bracket (at least `[=[`) whose closer
/// first occurs at the end.
pub fn long_string(text: &str) -> String {
    let mut level = 1;
    loop {
        let equals = "=".repeat(level);
        let close = format!("]{equals}]");
        let closed = format!("{text}{close}");
        if closed.find(&close) == Some(text.len()) {
            return format!("[{equals}[{closed}");
        }
        level += 1;
    }
}

fn emit_loader(out: &mut String, blob: &str) {
    let sentinel = base85::SENTINEL;
    let decoy = base85::DECOY;
    let _ = writeln!(out, "local D = {}", long_string(blob));
    let _ = write!(
        out,
        r#"local function d85(s)
  local o, i = {{}}, 1
  while i <= #s do
    if string.sub(s, i, i + {sentinel_end}) == "{sentinel}" then
      i = i + {sentinel_len}
    elseif string.sub(s, i, i + {decoy_end}) == "{decoy}" then
      i = i + {decoy_len}
    else
      local c1, c2, c3, c4, c5 = string.byte(s, i, i + 4)
      if c1 and c5 then
        local v = (c1 - 33) * 52200625 + (c2 - 33) * 614125 + (c3 - 33) * 7225 + (c4 - 33) * 85 + (c5 - 33)
        o[#o + 1] = string.char(math.floor(v / 16777216) % 256, math.floor(v / 65536) % 256, math.floor(v / 256) % 256, v % 256)
      end
      i = i + 5
    end
  end
  return table.concat(o)
end
D = d85(D)
local pos = 1
local function rb()
  local b = string.byte(D, pos)
  pos = pos + 1
  return b or 0
end
local function rw()
  local lo = rb()
  return lo + rb() * 256
end
local function rs()
  local n = rw()
  local s = string.sub(D, pos, pos + n - 1)
  pos = pos + n
  return s
end
if rb() ~= {version} then error("unsupported bytecode version") end
local K = {{}}
for i = 1, rb() do
  local s = rs()
  local t = string.byte(s, 1)
  if t == {tag_string} then
    K[i - 1] = string.sub(s, 2)
  elseif t == {tag_function} then
    K[i - 1] = _F[tonumber(string.sub(s, 2))]
  else
    K[i - 1] = tonumber(s) or s
  end
end
"#,
        sentinel_end = sentinel.len() - 1,
        sentinel_len = sentinel.len(),
        decoy_end = decoy.len() - 1,
        decoy_len = decoy.len(),
        version = FORMAT_VERSION,
        tag_string = TAG_STRING,
        tag_function = TAG_FUNCTION,
    );
}

fn emit_state(out: &mut String) {
    let _ = write!(
        out,
        r##"local unpack = table.unpack or unpack
local G = getfenv and getfenv() or _ENV
local function pk(...) return {{ n = select("#", ...), ... }} end
local S, V, T, res = {{}}, {{ n = 0 }}, 0, nil
local A, B, C = 0, 0, 0
local function rk(x)
  if x >= {bias} then return K[x - {bias}] end
  return S[x]
end
local H = {{}}
"##,
        bias = RK_BIAS,
    );
}

/// Lua body of the handler for one opcode. Operands live in the upvalues
/// `A`, `B` and `C`; `pos` already points at the next instruction.
fn handler_body(op: OpCode) -> String {
    let w = INSTRUCTION_WIDTH;
    match op {
        OpCode::Move => "S[A] = S[B]".into(),
        OpCode::LoadK => "S[A] = K[B]".into(),
        OpCode::LoadBool => format!("S[A] = B ~= 0 if C ~= 0 then pos = pos + {w} end"),
        OpCode::LoadNil => "for i = A, B do S[i] = nil end".into(),
        OpCode::GetUpval => "S[A] = S[B][1]".into(),
        OpCode::GetGlobal => "S[A] = G[K[B]]".into(),
        OpCode::GetTable => "S[A] = S[B][rk(C)]".into(),
        OpCode::SetGlobal => "G[K[B]] = S[A]".into(),
        OpCode::SetUpval => "S[B][1] = S[A]".into(),
        OpCode::SetTable => "S[A][rk(B)] = rk(C)".into(),
        OpCode::NewTable => "S[A] = {}".into(),
        OpCode::Self_ => "local o = S[B] S[A + 1] = o S[A] = o[rk(C)]".into(),
        OpCode::Add => "S[A] = rk(B) + rk(C)".into(),
        OpCode::Sub => "S[A] = rk(B) - rk(C)".into(),
        OpCode::Mul => "S[A] = rk(B) * rk(C)".into(),
        OpCode::Div => "S[A] = rk(B) / rk(C)".into(),
        OpCode::Mod => "S[A] = rk(B) % rk(C)".into(),
        OpCode::Pow => "S[A] = rk(B) ^ rk(C)".into(),
        OpCode::Unm => "S[A] = -S[B]".into(),
        OpCode::Not => "S[A] = not S[B]".into(),
        OpCode::Len => "S[A] = #S[B]".into(),
        OpCode::Concat => "local v = S[C] for i = C - 1, B, -1 do v = S[i] .. v end S[A] = v".into(),
        OpCode::Jmp => format!("pos = pos + B * {w}"),
        OpCode::Eq => format!("if (rk(B) == rk(C)) ~= (A ~= 0) then pos = pos + {w} end"),
        OpCode::Lt => format!("if (rk(B) < rk(C)) ~= (A ~= 0) then pos = pos + {w} end"),
        OpCode::Le => format!("if (rk(B) <= rk(C)) ~= (A ~= 0) then pos = pos + {w} end"),
        OpCode::Test => format!("if (not not S[A]) ~= (C ~= 0) then pos = pos + {w} end"),
        OpCode::TestSet => {
            format!("if (not not S[B]) == (C ~= 0) then S[A] = S[B] else pos = pos + {w} end")
        }
        OpCode::Call => concat!(
            "local n = B - 1 if B == 0 then n = T - A - 1 end ",
            "local r = pk(S[A](unpack(S, A + 1, A + n))) ",
            "if C == 0 then for i = 1, r.n do S[A + i - 1] = r[i] end T = A + r.n ",
            "else for i = 1, C - 1 do S[A + i - 1] = r[i] end end"
        )
        .into(),
        OpCode::TailCall => concat!(
            "local n = B - 1 if B == 0 then n = T - A - 1 end ",
            "res = pk(S[A](unpack(S, A + 1, A + n))) pos = #D + 1"
        )
        .into(),
        OpCode::Return => concat!(
            "local n = B - 1 if B == 0 then n = T - A end ",
            "res = pk(unpack(S, A, A + n - 1)) pos = #D + 1"
        )
        .into(),
        OpCode::ForLoop => format!(
            "local i = S[A] + S[A + 2] S[A] = i \
             if (S[A + 2] > 0 and i <= S[A + 1]) or (S[A + 2] <= 0 and i >= S[A + 1]) \
             then pos = pos + B * {w} S[A + 3] = i end"
        ),
        OpCode::ForPrep => format!("S[A] = S[A] - S[A + 2] pos = pos + B * {w}"),
        OpCode::TForLoop => format!(
            "local r = pk(S[A](S[A + 1], S[A + 2])) for i = 1, C do S[A + 2 + i] = r[i] end \
             if r[1] ~= nil then S[A + 2] = r[1] else pos = pos + {w} end"
        ),
        OpCode::SetList => concat!(
            "local n = B if n == 0 then n = T - A - 1 end ",
            "local t = S[A] for i = 1, n do t[C + i - 1] = S[A + i] end"
        )
        .into(),
        OpCode::Close => "S[A] = { S[A] }".into(),
        OpCode::Closure => "S[A] = K[B](S)".into(),
        OpCode::VarArg => concat!(
            "local n = B - 1 if B == 0 then n = V.n T = A + n end ",
            "for i = 1, n do S[A + i - 1] = V[i] end"
        )
        .into(),
    }
}

fn emit_handlers(out: &mut String, mapping: &OpcodeMapping, rng: &mut Rng) {
    let mut handlers: Vec<(u8, String)> = mapping
        .iter()
        .map(|(op, byte)| (byte, handler_body(op)))
        .collect();

    let mut unused: Vec<u8> = (FIRST_OPCODE_BYTE..=LAST_OPCODE_BYTE)
        .filter(|b| mapping.opcode(*b).is_none())
        .collect();
    rng.shuffle(&mut unused);
    for &byte in unused.iter().take(DECOY_HANDLERS) {
        let filler = rng.below(1000) + 1;
        handlers.push((byte, format!("local _ = {filler}")));
    }

    rng.shuffle(&mut handlers);
    for (byte, body) in &handlers {
        trace!("handler H[{byte}]");
        let _ = writeln!(out, "H[{byte}] = function() {body} end");
    }
}

fn emit_dispatch(out: &mut String) {
    let _ = write!(
        out,
        r#"local function run(...)
  V = pk(...)
  while pos + {last} <= #D do
    local op = rb()
    A = rb()
    B = rw()
    if B >= 32768 then B = B - 65536 end
    C = rw()
    local h = H[op]
    if h then h() end
  end
  if res then return unpack(res, 1, res.n) end
end
"#,
        last = INSTRUCTION_WIDTH - 1,
    );
}
