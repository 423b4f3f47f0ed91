//! Compiles script source into [`Code`] objects.
//!
//! Scripts use Python surface syntax, parsed with `ruff_python_parser`, but run
//! with this VM's semantics: globals live in the root table, tables stand in for
//! dicts and objects, and only the subset listed in the crate docs is accepted.

use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use ruff_python_ast::{
    self as ast, BoolOp, CmpOp as AstCmpOp, ElifElseClause, Expr as AstExpr, Number, Operator as AstOperator, Stmt,
    UnaryOp,
};
use ruff_python_parser::parse_module;
use ruff_text_size::{Ranged, TextRange};

use super::{
    builder::{CodeBuilder, JumpLabel},
    code::{BinOp, CmpOp, Code, Instr},
};

/// Name given to the top-level code object of every script.
pub(crate) const MAIN_FUNCTION_NAME: &str = "main";

/// A syntax or unsupported-construct error with a 1-based source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CompileError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

type CompileResult<T> = Result<T, CompileError>;

/// Compiles a whole script into its top-level code object.
pub(crate) fn compile(source: &str, filename: &str, debug_info: bool) -> CompileResult<Code> {
    let ctx = Context {
        lines: LineIndex::new(source),
        filename: Rc::from(filename),
        debug_info,
    };
    let parsed = parse_module(source).map_err(|e| ctx.error(e.to_string(), e.range()))?;
    let module = parsed.into_syntax();

    let mut compiler = FunctionCompiler::new(&ctx, None);
    compiler.compile_block(&module.body)?;
    compiler.builder.emit(Instr::LoadNull);
    compiler.builder.emit(Instr::Return);
    Ok(compiler
        .builder
        .build(MAIN_FUNCTION_NAME.to_owned(), ctx.filename.clone(), 0, 0))
}

/// Byte offsets of line starts, for turning ranges into line/column pairs.
struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { line_starts }
    }

    fn line_col(&self, offset: usize) -> (u32, u32) {
        let line = self.line_starts.partition_point(|&start| start <= offset).max(1) - 1;
        let column = offset - self.line_starts[line];
        (
            u32::try_from(line + 1).unwrap_or(u32::MAX),
            u32::try_from(column + 1).unwrap_or(u32::MAX),
        )
    }
}

/// State shared by every function compiled from one source file.
struct Context {
    lines: LineIndex,
    filename: Rc<str>,
    debug_info: bool,
}

impl Context {
    fn error(&self, message: impl Into<String>, range: TextRange) -> CompileError {
        let (line, column) = self.lines.line_col(range.start().into());
        CompileError {
            message: message.into(),
            line,
            column,
        }
    }
}

/// Break/continue bookkeeping for the innermost loop.
struct LoopContext {
    continue_target: u32,
    breaks: Vec<JumpLabel>,
    /// `for` loops keep their iterator on the stack; `break` must drop it.
    owns_iterator: bool,
}

/// Compiles one function body (or the module body when `locals` is `None`).
struct FunctionCompiler<'a> {
    ctx: &'a Context,
    builder: CodeBuilder,
    locals: Option<AHashMap<String, u16>>,
    loops: Vec<LoopContext>,
}

impl<'a> FunctionCompiler<'a> {
    fn new(ctx: &'a Context, locals: Option<AHashMap<String, u16>>) -> Self {
        Self {
            ctx,
            builder: CodeBuilder::new(ctx.debug_info),
            locals,
            loops: Vec::new(),
        }
    }

    fn set_line(&mut self, range: TextRange) {
        let (line, _) = self.ctx.lines.line_col(range.start().into());
        self.builder.set_line(line);
    }

    fn compile_block(&mut self, body: &[Stmt]) -> CompileResult<()> {
        body.iter().try_for_each(|stmt| self.compile_stmt(stmt))
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        self.set_line(stmt.range());
        match stmt {
            Stmt::Expr(ast::StmtExpr { value, .. }) => {
                self.compile_expr(value)?;
                self.builder.emit(Instr::Pop);
            }
            Stmt::Assign(ast::StmtAssign { targets, value, .. }) => {
                self.compile_expr(value)?;
                for (i, target) in targets.iter().enumerate() {
                    if i + 1 < targets.len() {
                        self.builder.emit(Instr::Dup);
                    }
                    self.store_target(target)?;
                }
            }
            Stmt::AnnAssign(ast::StmtAnnAssign { target, value, .. }) => {
                if let Some(value) = value {
                    self.compile_expr(value)?;
                    self.store_target(target)?;
                }
            }
            Stmt::AugAssign(ast::StmtAugAssign {
                target, op, value, range, ..
            }) => self.compile_aug_assign(target, *op, value, *range)?,
            Stmt::If(ast::StmtIf {
                test,
                body,
                elif_else_clauses,
                ..
            }) => self.compile_if(test, body, elif_else_clauses)?,
            Stmt::While(ast::StmtWhile { test, body, orelse, .. }) => {
                let start = self.builder.position();
                self.compile_expr(test)?;
                let exit = self.builder.emit_jump(Instr::JumpIfFalse);
                self.compile_loop_body(start, false, body)?;
                self.builder.emit(Instr::Jump(start));
                self.builder.patch_jump(exit);
                self.finish_loop(orelse)?;
            }
            Stmt::For(ast::StmtFor {
                is_async,
                target,
                iter,
                body,
                orelse,
                range,
                ..
            }) => {
                if *is_async {
                    return Err(self.ctx.error("async for loops are not supported", *range));
                }
                self.compile_expr(iter)?;
                self.builder.emit(Instr::GetIter);
                let start = self.builder.position();
                let exit = self.builder.emit_jump(Instr::ForIter);
                self.store_target(target)?;
                self.compile_loop_body(start, true, body)?;
                self.builder.emit(Instr::Jump(start));
                self.builder.patch_jump(exit);
                self.finish_loop(orelse)?;
            }
            Stmt::Break(b) => {
                let Some(ctx) = self.loops.last() else {
                    return Err(self.ctx.error("'break' outside loop", b.range));
                };
                if ctx.owns_iterator {
                    self.builder.emit(Instr::Pop);
                }
                let label = self.builder.emit_jump(Instr::Jump);
                if let Some(ctx) = self.loops.last_mut() {
                    ctx.breaks.push(label);
                }
            }
            Stmt::Continue(c) => {
                let Some(ctx) = self.loops.last() else {
                    return Err(self.ctx.error("'continue' outside loop", c.range));
                };
                let target = ctx.continue_target;
                self.builder.emit(Instr::Jump(target));
            }
            Stmt::FunctionDef(function) => self.compile_function_def(function)?,
            Stmt::Return(ast::StmtReturn { value, .. }) => {
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => self.builder.emit(Instr::LoadNull),
                }
                self.builder.emit(Instr::Return);
            }
            // collected by the locals pre-pass
            Stmt::Global(_) | Stmt::Pass(_) => {}
            Stmt::Delete(ast::StmtDelete { targets, .. }) => {
                for target in targets {
                    self.compile_container_and_key(target)?;
                    self.builder.emit(Instr::DeleteField);
                }
            }
            Stmt::Assert(ast::StmtAssert { test, msg, .. }) => {
                self.compile_expr(test)?;
                let fail = self.builder.emit_jump(Instr::JumpIfFalse);
                let end = self.builder.emit_jump(Instr::Jump);
                self.builder.patch_jump(fail);
                match msg {
                    Some(msg) => self.compile_expr(msg)?,
                    None => {
                        let id = self.builder.intern("assertion failed");
                        self.builder.emit(Instr::LoadStr(id));
                    }
                }
                self.builder.emit(Instr::Raise);
                self.builder.patch_jump(end);
            }
            Stmt::Raise(ast::StmtRaise { exc, range, .. }) => {
                let Some(exc) = exc else {
                    return Err(self.ctx.error("bare 'raise' is not supported", *range));
                };
                self.compile_expr(exc)?;
                self.builder.emit(Instr::Raise);
            }
            other => {
                return Err(self.ctx.error("unsupported statement", other.range()));
            }
        }
        Ok(())
    }

    fn compile_if(&mut self, test: &AstExpr, body: &[Stmt], clauses: &[ElifElseClause]) -> CompileResult<()> {
        self.compile_expr(test)?;
        let else_jump = self.builder.emit_jump(Instr::JumpIfFalse);
        self.compile_block(body)?;
        let Some((clause, rest)) = clauses.split_first() else {
            self.builder.patch_jump(else_jump);
            return Ok(());
        };
        let end = self.builder.emit_jump(Instr::Jump);
        self.builder.patch_jump(else_jump);
        match &clause.test {
            Some(test) => self.compile_if(test, &clause.body, rest)?,
            None => self.compile_block(&clause.body)?,
        }
        self.builder.patch_jump(end);
        Ok(())
    }

    fn compile_loop_body(&mut self, continue_target: u32, owns_iterator: bool, body: &[Stmt]) -> CompileResult<()> {
        self.loops.push(LoopContext {
            continue_target,
            breaks: Vec::new(),
            owns_iterator,
        });
        self.compile_block(body)
    }

    /// Emits the `else` block and patches every `break` to land after it.
    fn finish_loop(&mut self, orelse: &[Stmt]) -> CompileResult<()> {
        let ctx = self.loops.pop().expect("finish_loop without an open loop");
        self.compile_block(orelse)?;
        for label in ctx.breaks {
            self.builder.patch_jump(label);
        }
        Ok(())
    }

    fn compile_aug_assign(
        &mut self,
        target: &AstExpr,
        op: AstOperator,
        value: &AstExpr,
        range: TextRange,
    ) -> CompileResult<()> {
        let op = self.convert_op(op, range)?;
        match target {
            AstExpr::Name(ast::ExprName { id, .. }) => {
                self.load_name(id.as_str());
                self.compile_expr(value)?;
                self.builder.emit(Instr::Binary(op));
                self.store_name(id.as_str());
            }
            AstExpr::Attribute(_) | AstExpr::Subscript(_) => {
                self.compile_container_and_key(target)?;
                self.builder.emit(Instr::DupTwo);
                self.builder.emit(Instr::GetField);
                self.compile_expr(value)?;
                self.builder.emit(Instr::Binary(op));
                self.builder.emit(Instr::SetField);
            }
            other => return Err(self.ctx.error("invalid augmented assignment target", other.range())),
        }
        Ok(())
    }

    fn compile_function_def(&mut self, function: &ast::StmtFunctionDef) -> CompileResult<()> {
        let range = function.range;
        if function.is_async {
            return Err(self.ctx.error("async functions are not supported", range));
        }
        if !function.decorator_list.is_empty() {
            return Err(self.ctx.error("decorators are not supported", range));
        }
        let params = &function.parameters;
        if !params.posonlyargs.is_empty()
            || params.vararg.is_some()
            || !params.kwonlyargs.is_empty()
            || params.kwarg.is_some()
        {
            return Err(self.ctx.error("only plain positional parameters are supported", range));
        }

        let mut locals = AHashMap::new();
        for param in &params.args {
            if param.default.is_some() {
                return Err(self.ctx.error("default parameter values are not supported", param.range));
            }
            let slot = u16::try_from(locals.len()).map_err(|_| self.ctx.error("too many parameters", range))?;
            locals.insert(param.parameter.name.as_str().to_owned(), slot);
        }
        let num_params = locals.len();

        let mut assigned = Vec::new();
        let mut globals = AHashSet::new();
        collect_assigned(&function.body, &mut assigned, &mut globals);
        for name in assigned {
            if globals.contains(&name) || locals.contains_key(&name) {
                continue;
            }
            let slot = u16::try_from(locals.len()).map_err(|_| self.ctx.error("too many local variables", range))?;
            locals.insert(name, slot);
        }
        let num_locals = locals.len();

        let mut inner = FunctionCompiler::new(self.ctx, Some(locals));
        inner.set_line(range);
        inner.compile_block(&function.body)?;
        inner.builder.emit(Instr::LoadNull);
        inner.builder.emit(Instr::Return);
        let name = function.name.as_str().to_owned();
        let code = inner
            .builder
            .build(name.clone(), self.ctx.filename.clone(), num_params, num_locals);

        let id = self.builder.add_function(code);
        self.builder.emit(Instr::MakeFunction(id));
        self.store_name(&name);
        Ok(())
    }

    /// Pushes `container key` for an attribute or subscript expression.
    fn compile_container_and_key(&mut self, target: &AstExpr) -> CompileResult<()> {
        match target {
            AstExpr::Attribute(ast::ExprAttribute { value, attr, .. }) => {
                self.compile_expr(value)?;
                let id = self.builder.intern(attr.as_str());
                self.builder.emit(Instr::LoadStr(id));
            }
            AstExpr::Subscript(ast::ExprSubscript { value, slice, .. }) => {
                self.compile_expr(value)?;
                self.compile_index(slice)?;
            }
            other => return Err(self.ctx.error("expected an attribute or subscript", other.range())),
        }
        Ok(())
    }

    /// Stores the value on top of the stack into `target`.
    fn store_target(&mut self, target: &AstExpr) -> CompileResult<()> {
        match target {
            AstExpr::Name(ast::ExprName { id, .. }) => self.store_name(id.as_str()),
            AstExpr::Attribute(_) | AstExpr::Subscript(_) => {
                // `value container key` -> rotate into `container key value`
                self.compile_container_and_key(target)?;
                self.builder.emit(Instr::StoreField);
            }
            AstExpr::Tuple(ast::ExprTuple { elts, range, .. }) | AstExpr::List(ast::ExprList { elts, range, .. }) => {
                let count = u16::try_from(elts.len()).map_err(|_| self.ctx.error("too many targets", *range))?;
                self.builder.emit(Instr::Unpack(count));
                for elt in elts {
                    self.store_target(elt)?;
                }
            }
            other => return Err(self.ctx.error("invalid assignment target", other.range())),
        }
        Ok(())
    }

    fn load_name(&mut self, name: &str) {
        if let Some(slot) = self.locals.as_ref().and_then(|locals| locals.get(name)) {
            self.builder.emit(Instr::LoadLocal(*slot));
        } else {
            let id = self.builder.intern(name);
            self.builder.emit(Instr::LoadGlobal(id));
        }
    }

    fn store_name(&mut self, name: &str) {
        if let Some(slot) = self.locals.as_ref().and_then(|locals| locals.get(name)) {
            self.builder.emit(Instr::StoreLocal(*slot));
        } else {
            let id = self.builder.intern(name);
            self.builder.emit(Instr::StoreGlobal(id));
        }
    }

    fn compile_index(&mut self, slice: &AstExpr) -> CompileResult<()> {
        if let AstExpr::Slice(s) = slice {
            return Err(self.ctx.error("slices are not supported", s.range));
        }
        self.compile_expr(slice)
    }

    fn compile_expr(&mut self, expr: &AstExpr) -> CompileResult<()> {
        match expr {
            AstExpr::BoolOp(ast::ExprBoolOp { op, values, .. }) => {
                let make: fn(u32) -> Instr = match op {
                    BoolOp::And => Instr::JumpIfFalseOrPop,
                    BoolOp::Or => Instr::JumpIfTrueOrPop,
                };
                let mut ends = Vec::with_capacity(values.len());
                let (last, rest) = values.split_last().expect("boolean operation without operands");
                for value in rest {
                    self.compile_expr(value)?;
                    ends.push(self.builder.emit_jump(make));
                }
                self.compile_expr(last)?;
                for end in ends {
                    self.builder.patch_jump(end);
                }
            }
            AstExpr::BinOp(ast::ExprBinOp {
                left, op, right, range, ..
            }) => {
                let op = self.convert_op(*op, *range)?;
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.builder.emit(Instr::Binary(op));
            }
            AstExpr::UnaryOp(ast::ExprUnaryOp { op, operand, .. }) => {
                self.compile_expr(operand)?;
                match op {
                    UnaryOp::Not => self.builder.emit(Instr::Not),
                    UnaryOp::USub => self.builder.emit(Instr::Neg),
                    UnaryOp::Invert => self.builder.emit(Instr::Invert),
                    UnaryOp::UAdd => {}
                }
            }
            AstExpr::Compare(ast::ExprCompare {
                left,
                ops,
                comparators,
                range,
                ..
            }) => {
                let ([op], [right]) = (&ops[..], &comparators[..]) else {
                    return Err(self.ctx.error("chained comparisons are not supported", *range));
                };
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.builder.emit(Instr::Compare(convert_compare_op(*op)));
            }
            AstExpr::Call(ast::ExprCall {
                func, arguments, range, ..
            }) => {
                if !arguments.keywords.is_empty() {
                    return Err(self.ctx.error("keyword arguments are not supported", *range));
                }
                self.compile_expr(func)?;
                for arg in &arguments.args {
                    if let AstExpr::Starred(s) = arg {
                        return Err(self.ctx.error("argument unpacking is not supported", s.range));
                    }
                    self.compile_expr(arg)?;
                }
                let argc = u8::try_from(arguments.args.len())
                    .map_err(|_| self.ctx.error("too many arguments in call", *range))?;
                self.builder.emit(Instr::Call(argc));
            }
            AstExpr::If(ast::ExprIf {
                test, body, orelse, ..
            }) => {
                self.compile_expr(test)?;
                let else_jump = self.builder.emit_jump(Instr::JumpIfFalse);
                self.compile_expr(body)?;
                let end = self.builder.emit_jump(Instr::Jump);
                self.builder.patch_jump(else_jump);
                self.compile_expr(orelse)?;
                self.builder.patch_jump(end);
            }
            AstExpr::Dict(ast::ExprDict { items, range, .. }) => {
                for ast::DictItem { key, value } in items {
                    let Some(key) = key else {
                        return Err(self.ctx.error("dict unpacking is not supported", *range));
                    };
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                let count = u16::try_from(items.len()).map_err(|_| self.ctx.error("table literal too large", *range))?;
                self.builder.emit(Instr::NewTable(count));
            }
            AstExpr::List(ast::ExprList { elts, range, .. }) | AstExpr::Tuple(ast::ExprTuple { elts, range, .. }) => {
                for elt in elts {
                    if let AstExpr::Starred(s) = elt {
                        return Err(self.ctx.error("starred expressions are not supported", s.range));
                    }
                    self.compile_expr(elt)?;
                }
                let count = u16::try_from(elts.len()).map_err(|_| self.ctx.error("array literal too large", *range))?;
                self.builder.emit(Instr::NewArray(count));
            }
            AstExpr::StringLiteral(ast::ExprStringLiteral { value, .. }) => {
                let id = self.builder.intern(&value.to_string());
                self.builder.emit(Instr::LoadStr(id));
            }
            AstExpr::NumberLiteral(ast::ExprNumberLiteral { value, range, .. }) => match value {
                Number::Int(i) => {
                    let Some(i) = i.as_i64() else {
                        return Err(self.ctx.error(format!("integer literal too large: {i}"), *range));
                    };
                    self.builder.emit(Instr::LoadInt(i));
                }
                Number::Float(f) => self.builder.emit(Instr::LoadFloat(*f)),
                Number::Complex { .. } => {
                    return Err(self.ctx.error("complex numbers are not supported", *range));
                }
            },
            AstExpr::BooleanLiteral(ast::ExprBooleanLiteral { value, .. }) => {
                self.builder.emit(Instr::LoadBool(*value));
            }
            AstExpr::NoneLiteral(_) => self.builder.emit(Instr::LoadNull),
            AstExpr::Name(ast::ExprName { id, .. }) => self.load_name(id.as_str()),
            AstExpr::Attribute(_) | AstExpr::Subscript(_) => {
                self.compile_container_and_key(expr)?;
                self.builder.emit(Instr::GetField);
            }
            other => return Err(self.ctx.error("unsupported expression", other.range())),
        }
        Ok(())
    }

    fn convert_op(&self, op: AstOperator, range: TextRange) -> CompileResult<BinOp> {
        Ok(match op {
            AstOperator::Add => BinOp::Add,
            AstOperator::Sub => BinOp::Sub,
            AstOperator::Mult => BinOp::Mul,
            AstOperator::Div => BinOp::Div,
            AstOperator::FloorDiv => BinOp::FloorDiv,
            AstOperator::Mod => BinOp::Mod,
            AstOperator::Pow => BinOp::Pow,
            AstOperator::LShift => BinOp::Shl,
            AstOperator::RShift => BinOp::Shr,
            AstOperator::BitAnd => BinOp::BitAnd,
            AstOperator::BitOr => BinOp::BitOr,
            AstOperator::BitXor => BinOp::BitXor,
            AstOperator::MatMult => return Err(self.ctx.error("the '@' operator is not supported", range)),
        })
    }
}

fn convert_compare_op(op: AstCmpOp) -> CmpOp {
    match op {
        AstCmpOp::Eq => CmpOp::Eq,
        AstCmpOp::NotEq => CmpOp::NotEq,
        AstCmpOp::Lt => CmpOp::Lt,
        AstCmpOp::LtE => CmpOp::LtE,
        AstCmpOp::Gt => CmpOp::Gt,
        AstCmpOp::GtE => CmpOp::GtE,
        AstCmpOp::Is => CmpOp::Is,
        AstCmpOp::IsNot => CmpOp::IsNot,
        AstCmpOp::In => CmpOp::In,
        AstCmpOp::NotIn => CmpOp::NotIn,
    }
}

/// Collects every name bound in `body` without descending into nested functions.
///
/// Names declared `global` are gathered separately so the caller can exclude them.
fn collect_assigned(body: &[Stmt], names: &mut Vec<String>, globals: &mut AHashSet<String>) {
    for stmt in body {
        match stmt {
            Stmt::Assign(ast::StmtAssign { targets, .. }) => {
                for target in targets {
                    collect_target(target, names);
                }
            }
            Stmt::AnnAssign(ast::StmtAnnAssign {
                target, value: Some(_), ..
            })
            | Stmt::AugAssign(ast::StmtAugAssign { target, .. }) => collect_target(target, names),
            Stmt::For(ast::StmtFor {
                target, body, orelse, ..
            }) => {
                collect_target(target, names);
                collect_assigned(body, names, globals);
                collect_assigned(orelse, names, globals);
            }
            Stmt::While(ast::StmtWhile { body, orelse, .. }) => {
                collect_assigned(body, names, globals);
                collect_assigned(orelse, names, globals);
            }
            Stmt::If(ast::StmtIf {
                body, elif_else_clauses, ..
            }) => {
                collect_assigned(body, names, globals);
                for clause in elif_else_clauses {
                    collect_assigned(&clause.body, names, globals);
                }
            }
            Stmt::FunctionDef(function) => names.push(function.name.as_str().to_owned()),
            Stmt::Global(ast::StmtGlobal { names: declared, .. }) => {
                globals.extend(declared.iter().map(|name| name.as_str().to_owned()));
            }
            _ => {}
        }
    }
}

fn collect_target(target: &AstExpr, names: &mut Vec<String>) {
    match target {
        AstExpr::Name(ast::ExprName { id, .. }) => names.push(id.as_str().to_owned()),
        AstExpr::Tuple(ast::ExprTuple { elts, .. }) | AstExpr::List(ast::ExprList { elts, .. }) => {
            for elt in elts {
                collect_target(elt, names);
            }
        }
        _ => {}
    }
}
