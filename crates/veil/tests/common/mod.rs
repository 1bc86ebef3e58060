//! Programs and helpers shared by the runtime tests.
use veil::Options;

/// Programs whose output must not change under obfuscation, on any runtime.
pub const PROGRAMS: &[&str] = &[
    "print(1 + 2 * 3, (2 + 3) * 4, 2 ^ 10)",
    "local x = 1 + 2; print(x)",
    "local n = 0 for i = 1, 5 do n = n + 1 end print(n)",
    "local s = '' for i = 10, 1, -3 do s = s .. i .. ',' end print(s)",
    "local t = {'a', 'b', 'c'} for i, v in ipairs(t) do print(i, v) end",
    "local n = 0 repeat n = n + 1 until n >= 3 print(n)",
    "local log = '' for i = 1, 3 do local j = 0 while true do j = j + 1 if j > i then break end log = log .. j end end print(log)",
    "local a, b = 'LPH+m0<X;z', 'z!!' print(a .. b, '12' .. '0x10', type('12'))",
    "local a, b = 1, 2 a, b = b, a print(a, b, a > b, b < a, a >= b, not a)",
    "local t = {kind = type} print(t:kind())",
    "local x = nil print(x or 'default', x and 1, #'four')",
    "local x = 2 ^ 62 x = x * 4 print(x)",
    "print(10 / 2, -7 % 3, 7 % -3, 0x10, 1e2, 9007199254740993, 2 ^ 53 + 1)",
];

/// Closures over chunk locals, with the output every runtime prints.
pub const CLOSURE_PROGRAMS: &[(&str, &[&str])] = &[
    (
        "local f do local x = 5 f = function() return x end end local y = 10 print(f())",
        &["5"],
    ),
    (
        "local fs = {} for i = 1, 3 do fs[i] = function() return i end end print(fs[1](), fs[2](), fs[3]())",
        &["1\t2\t3"],
    ),
    (
        "local fs = {} for k, v in ipairs({'a', 'b'}) do fs[k] = function() return k .. v end end print(fs[1](), fs[2]())",
        &["1a\t2b"],
    ),
    (
        "local fs = {} for i = 1, 2 do local j = i * 10 fs[i] = function() j = j + 1 return j end end print(fs[1](), fs[1](), fs[2]())",
        &["11\t12\t21"],
    ),
    (
        "local fs, i = {}, 0 while i < 3 do i = i + 1 local c = i fs[i] = function() return c end end print(fs[1](), fs[3]())",
        &["1\t3"],
    ),
    (
        "local fs, i = {}, 0 repeat i = i + 1 local c = i * 2 fs[i] = function() return c end until c >= 4 print(fs[1](), fs[2]())",
        &["2\t4"],
    ),
    (
        "local n = 0 local function inc(by) n = n + by end inc(2) inc(3) print(n) n = 10 inc(1) print(n)",
        &["5", "11"],
    ),
    (
        "local a, b = 1, 2 local f = function() return a .. b end a, b = b, a print(f(), a, b)",
        &["21\t2\t1"],
    ),
    (
        "local x = 1 local x = function() return x end print(x())",
        &["1"],
    ),
    (
        "local function fact(n) if n <= 1 then return 1 end return n * fact(n - 1) end print(fact(10))",
        &["3628800"],
    ),
];

/// Obfuscate `source` with `seed`, returning the script text.
pub fn obfuscated(source: &str, seed: u64) -> String {
    veil::obfuscate(source, &Options::default().with_seed(seed))
        .unwrap_or_else(|e| panic!("obfuscate failed: {e}\nsource:\n{source}"))
        .script
}
