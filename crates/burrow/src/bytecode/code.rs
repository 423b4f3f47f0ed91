use std::rc::Rc;

/// Binary operators understood by the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub(crate) enum BinOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "//")]
    FloorDiv,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "**")]
    Pow,
    #[strum(serialize = "<<")]
    Shl,
    #[strum(serialize = ">>")]
    Shr,
    #[strum(serialize = "&")]
    BitAnd,
    #[strum(serialize = "|")]
    BitOr,
    #[strum(serialize = "^")]
    BitXor,
}

/// Comparison operators understood by the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub(crate) enum CmpOp {
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    NotEq,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    LtE,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    GtE,
    #[strum(serialize = "is")]
    Is,
    #[strum(serialize = "is not")]
    IsNot,
    #[strum(serialize = "in")]
    In,
    #[strum(serialize = "not in")]
    NotIn,
}

/// A single VM instruction.
///
/// Stack effects are noted as `before -> after`, top of stack on the right.
#[derive(Debug, Clone, Copy, PartialEq, strum::IntoStaticStr)]
pub(crate) enum Instr {
    /// `-> null`
    LoadNull,
    LoadBool(bool),
    LoadInt(i64),
    LoadFloat(f64),
    /// `-> string` from the code's string pool.
    LoadStr(u32),
    LoadLocal(u16),
    /// `value ->`
    StoreLocal(u16),
    /// Root table lookup by the pooled name.
    LoadGlobal(u32),
    /// `value ->` into the root table under the pooled name.
    StoreGlobal(u32),
    /// `container key -> value`
    GetField,
    /// `container key value ->`, create or overwrite.
    SetField,
    /// `value container key ->`, create or overwrite.
    StoreField,
    /// `container key ->`
    DeleteField,
    /// `k1 v1 .. kn vn -> table`
    NewTable(u16),
    /// `v1 .. vn -> array`
    NewArray(u16),
    /// `array -> vn .. v1` (first element on top).
    Unpack(u16),
    Binary(BinOp),
    Compare(CmpOp),
    Neg,
    Not,
    Invert,
    Jump(u32),
    /// Pops the condition.
    JumpIfFalse(u32),
    /// Keeps the condition on the stack when jumping, pops it otherwise.
    JumpIfFalseOrPop(u32),
    JumpIfTrueOrPop(u32),
    /// `callee a1 .. an -> result`
    Call(u8),
    /// `value ->` and leaves the frame.
    Return,
    Pop,
    Dup,
    /// `a b -> a b a b`
    DupTwo,
    /// `-> closure` for the nested function at this index.
    MakeFunction(u32),
    /// `iterable -> iterator`
    GetIter,
    /// `iterator -> iterator item`, or pops the iterator and jumps when exhausted.
    ForIter(u32),
    /// `message ->` and raises a runtime error.
    Raise,
}

/// Compiled function body.
#[derive(Debug)]
pub(crate) struct Code {
    pub name: String,
    pub filename: Rc<str>,
    pub instrs: Vec<Instr>,
    /// One source line per instruction; empty when debug info is off.
    pub lines: Vec<u32>,
    pub strings: Vec<String>,
    pub functions: Vec<Rc<Code>>,
    pub num_params: usize,
    pub num_locals: usize,
}

impl Code {
    pub fn line_at(&self, ip: usize) -> Option<u32> {
        self.lines.get(ip).copied()
    }

    pub fn string(&self, index: u32) -> &str {
        &self.strings[index as usize]
    }
}
