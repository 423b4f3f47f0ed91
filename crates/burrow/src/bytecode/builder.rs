//! Builder for emitting instructions during compilation.
//!
//! `CodeBuilder` collects instructions, pools string constants, handles
//! forward jumps with patching, and records source lines for error reports.

use std::rc::Rc;

use ahash::AHashMap;

use super::code::{Code, Instr};

/// A forward jump awaiting its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "forward jumps must be patched"]
pub(crate) struct JumpLabel(usize);

/// Builder for emitting instructions during compilation.
///
/// # Usage
///
/// ```ignore
/// let mut builder = CodeBuilder::new(true);
/// builder.set_line(3);
/// builder.emit(Instr::LoadNull);
/// let jump = builder.emit_jump(Instr::JumpIfFalse);
/// // ... emit more code ...
/// builder.patch_jump(jump);
/// let code = builder.build("<module>", filename, 0, 0);
/// ```
#[derive(Debug, Default)]
pub(crate) struct CodeBuilder {
    instrs: Vec<Instr>,
    /// Parallel to `instrs` when `debug_info` is set.
    lines: Vec<u32>,
    strings: Vec<String>,
    string_ids: AHashMap<String, u32>,
    functions: Vec<Rc<Code>>,
    current_line: u32,
    debug_info: bool,
}

impl CodeBuilder {
    pub fn new(debug_info: bool) -> Self {
        Self {
            debug_info,
            ..Self::default()
        }
    }

    /// Sets the source line recorded for subsequent instructions.
    pub fn set_line(&mut self, line: u32) {
        self.current_line = line;
    }

    pub fn emit(&mut self, instr: Instr) {
        self.instrs.push(instr);
        if self.debug_info {
            self.lines.push(self.current_line);
        }
    }

    /// Emits a jump-style instruction with a placeholder target.
    pub fn emit_jump(&mut self, make: fn(u32) -> Instr) -> JumpLabel {
        let label = JumpLabel(self.instrs.len());
        self.emit(make(u32::MAX));
        label
    }

    /// Points a previously emitted jump at the next instruction to be emitted.
    ///
    /// # Panics
    /// Panics if the label does not refer to a jump instruction.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = self.position();
        let instr = &mut self.instrs[label.0];
        *instr = match *instr {
            Instr::Jump(_) => Instr::Jump(target),
            Instr::JumpIfFalse(_) => Instr::JumpIfFalse(target),
            Instr::JumpIfFalseOrPop(_) => Instr::JumpIfFalseOrPop(target),
            Instr::JumpIfTrueOrPop(_) => Instr::JumpIfTrueOrPop(target),
            Instr::ForIter(_) => Instr::ForIter(target),
            other => panic!("CodeBuilder::patch_jump: {other:?} is not a jump"),
        };
    }

    /// Index of the next instruction to be emitted.
    pub fn position(&self) -> u32 {
        u32::try_from(self.instrs.len()).expect("code object exceeds u32 instructions")
    }

    /// Pools a string constant and returns its index.
    pub fn intern(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.string_ids.get(s) {
            return id;
        }
        let id = u32::try_from(self.strings.len()).expect("string pool exceeds u32 entries");
        self.strings.push(s.to_owned());
        self.string_ids.insert(s.to_owned(), id);
        id
    }

    pub fn add_function(&mut self, code: Code) -> u32 {
        let id = u32::try_from(self.functions.len()).expect("function table exceeds u32 entries");
        self.functions.push(Rc::new(code));
        id
    }

    pub fn build(self, name: String, filename: Rc<str>, num_params: usize, num_locals: usize) -> Code {
        Code {
            name,
            filename,
            instrs: self.instrs,
            lines: self.lines,
            strings: self.strings,
            functions: self.functions,
            num_params,
            num_locals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_jump() {
        let mut builder = CodeBuilder::new(false);
        let jump = builder.emit_jump(Instr::Jump);
        builder.emit(Instr::LoadNull);
        builder.emit(Instr::Pop);
        builder.patch_jump(jump);
        builder.emit(Instr::LoadNull);
        builder.emit(Instr::Return);

        let code = builder.build("<test>".to_owned(), Rc::from("t.py"), 0, 0);
        assert_eq!(code.instrs[0], Instr::Jump(3));
        assert!(code.lines.is_empty());
    }

    #[test]
    fn test_lines_follow_instructions() {
        let mut builder = CodeBuilder::new(true);
        builder.set_line(1);
        builder.emit(Instr::LoadInt(1));
        builder.set_line(4);
        builder.emit(Instr::Pop);

        let code = builder.build("<test>".to_owned(), Rc::from("t.py"), 0, 0);
        assert_eq!(code.line_at(0), Some(1));
        assert_eq!(code.line_at(1), Some(4));
        assert_eq!(code.line_at(2), None);
    }

    #[test]
    fn test_intern_deduplicates() {
        let mut builder = CodeBuilder::new(false);
        let a = builder.intern("width");
        let b = builder.intern("height");
        let c = builder.intern("width");
        assert_eq!(a, c);
        assert_ne!(a, b);
    }
}
