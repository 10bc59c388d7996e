//! Single-pass Pratt compiler.
//!
//! Parsing and code generation happen together: each grammar rule emits
//! bytecode into the function currently being compiled, so no AST is ever
//! built. Functions under compilation form a stack (the innermost is
//! `current`); resolving a name walks outward through it, turning hits in
//! enclosing functions into upvalues.
//!
//! Diagnostics print to stderr as they are found. After the first error the
//! parser goes into panic mode and stays quiet until a statement boundary,
//! which keeps one mistake from producing a page of follow-on noise. The
//! bytecode of a failed compile is never run.

use lute_core::debug::disassemble_chunk;
use lute_core::{Heap, Obj, ObjFunction, ObjRef, OpCode, Value};
use thiserror::Error;

use crate::scanner::{Scanner, Token, TokenKind};

/// Compilation failed; the diagnostics already went to stderr.
#[derive(Debug, Error)]
#[error("compile error")]
pub struct CompileError;

/// Compile a source string into a script function on `heap`. With
/// `print_code` set, every finished function is disassembled to stderr.
pub fn compile(heap: &mut Heap, source: &str, print_code: bool) -> Result<ObjRef, CompileError> {
    let mut parser = Parser::new(heap, source, print_code);
    parser.advance();
    while !parser.match_token(TokenKind::Eof) {
        parser.declaration();
    }
    let (function, _) = parser.end_compiler();
    if parser.had_error {
        Err(CompileError)
    } else {
        Ok(function)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn<'src, 'h> = fn(&mut Parser<'src, 'h>, bool);

struct ParseRule<'src, 'h> {
    prefix: Option<ParseFn<'src, 'h>>,
    infix: Option<ParseFn<'src, 'h>>,
    precedence: Precedence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

#[derive(Debug)]
struct Local<'src> {
    name: &'src str,
    /// Scope depth, or -1 while the initializer is still being compiled so
    /// `var a = a;` can be caught.
    depth: i32,
    is_captured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CompilerUpvalue {
    index: u8,
    is_local: bool,
}

/// Per-function compilation state. These form a stack in the parser; the
/// top entry is the function whose chunk instructions currently go into.
struct Compiler<'src> {
    function: ObjRef,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    upvalues: Vec<CompilerUpvalue>,
    scope_depth: i32,
}

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;

struct Parser<'src, 'h> {
    scanner: Scanner<'src>,
    heap: &'h mut Heap,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    compilers: Vec<Compiler<'src>>,
    /// Depth of enclosing class declarations; `this` is legal when > 0.
    class_depth: usize,
    print_code: bool,
}

impl<'src, 'h> Parser<'src, 'h> {
    fn new(heap: &'h mut Heap, source: &'src str, print_code: bool) -> Parser<'src, 'h> {
        let placeholder = Token {
            kind: TokenKind::Eof,
            lexeme: "",
            line: 1,
        };
        let mut parser = Parser {
            scanner: Scanner::new(source),
            heap,
            current: placeholder,
            previous: placeholder,
            had_error: false,
            panic_mode: false,
            compilers: Vec::new(),
            class_depth: 0,
            print_code,
        };
        parser.push_compiler(FunctionKind::Script);
        parser
    }

    // -----------------------------------------------------------------
    // Compiler stack
    // -----------------------------------------------------------------

    fn push_compiler(&mut self, kind: FunctionKind) {
        // Named functions intern their name from the just-consumed token;
        // the script has none.
        let name = if kind == FunctionKind::Script {
            None
        } else {
            self.maybe_collect();
            Some(self.heap.intern(self.previous.lexeme))
        };

        // Pin the name: allocating the function below may collect.
        if let Some(name) = name {
            self.heap.push_root(Value::obj(name));
        }
        self.maybe_collect();
        let function = self.heap.alloc(Obj::Function(ObjFunction::new(name)));
        if name.is_some() {
            self.heap.pop_root();
        }

        let mut compiler = Compiler {
            function,
            kind,
            locals: Vec::new(),
            upvalues: Vec::new(),
            scope_depth: 0,
        };
        // Slot 0 belongs to the callee: the receiver in methods, otherwise
        // an unnameable placeholder.
        let slot_zero = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "this",
            _ => "",
        };
        compiler.locals.push(Local {
            name: slot_zero,
            depth: 0,
            is_captured: false,
        });
        self.compilers.push(compiler);
    }

    fn end_compiler(&mut self) -> (ObjRef, Vec<CompilerUpvalue>) {
        self.emit_return();
        let compiler = self.compilers.pop().expect("compiler stack underflow");
        let function = compiler.function;
        self.heap.retally(function);

        if self.print_code && !self.had_error {
            let heap: &Heap = self.heap;
            let name = match heap.function(function).name {
                Some(name) => heap.string(name).chars.to_string(),
                None => "<script>".to_string(),
            };
            let chunk = &heap.function(function).chunk;
            eprint!("{}", disassemble_chunk(heap, chunk, &name));
        }

        (function, compiler.upvalues)
    }

    fn current(&self) -> &Compiler<'src> {
        let index = self.compilers.len() - 1;
        &self.compilers[index]
    }

    fn current_mut(&mut self) -> &mut Compiler<'src> {
        let index = self.compilers.len() - 1;
        &mut self.compilers[index]
    }

    fn current_chunk_len(&self) -> usize {
        let function = self.current().function;
        self.heap.function(function).chunk.code.len()
    }

    /// Collection check before any allocating call: gray the in-progress
    /// function chain, then let the heap do the rest.
    fn maybe_collect(&mut self) {
        if !self.heap.needs_collect() {
            return;
        }
        for compiler in &self.compilers {
            self.heap.mark_object(compiler.function);
        }
        self.heap.collect();
    }

    // -----------------------------------------------------------------
    // Token plumbing and diagnostics
    // -----------------------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme;
            self.error_at_current(message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;

        eprint!("[line {}] Error", token.line);
        match token.kind {
            TokenKind::Eof => eprint!(" at end"),
            TokenKind::Error => {}
            _ => eprint!(" at '{}'", token.lexeme),
        }
        eprintln!(": {message}");
        self.had_error = true;
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    /// Leave panic mode at the next statement boundary so one mistake does
    /// not cascade.
    fn synchronize(&mut self) {
        self.panic_mode = false;

        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // -----------------------------------------------------------------
    // Emission
    // -----------------------------------------------------------------

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        let function = self.current().function;
        self.heap.function_mut(function).chunk.write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_ops(&mut self, first: OpCode, second: OpCode) {
        self.emit_op(first);
        self.emit_op(second);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);

        let offset = self.current_chunk_len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }

        self.emit_byte(((offset >> 8) & 0xff) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    /// Emit a jump with a placeholder offset; returns the offset operand's
    /// position for `patch_jump`.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk_len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        // -2 adjusts for the offset operand itself.
        let jump = self.current_chunk_len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }

        let function = self.current().function;
        let code = &mut self.heap.function_mut(function).chunk.code;
        code[offset] = ((jump >> 8) & 0xff) as u8;
        code[offset + 1] = (jump & 0xff) as u8;
    }

    fn emit_return(&mut self) {
        // An initializer's implicit return hands back the instance in
        // slot 0; everything else returns nil.
        if self.current().kind == FunctionKind::Initializer {
            self.emit_op(OpCode::GetLocal);
            self.emit_byte(0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let function = self.current().function;
        match self.heap.function_mut(function).chunk.add_constant(value) {
            Some(index) => index,
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let constant = self.make_constant(value);
        self.emit_op(OpCode::Constant);
        self.emit_byte(constant);
    }

    fn identifier_constant(&mut self, name: Token<'src>) -> u8 {
        self.maybe_collect();
        let interned = self.heap.intern(name.lexeme);
        self.make_constant(Value::obj(interned))
    }

    // -----------------------------------------------------------------
    // Scopes, locals, upvalues
    // -----------------------------------------------------------------

    fn begin_scope(&mut self) {
        self.current_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.current_mut().scope_depth -= 1;

        loop {
            let depth = self.current().scope_depth;
            let Some(local) = self.current().locals.last() else {
                break;
            };
            if local.depth <= depth {
                break;
            }
            let captured = local.is_captured;
            if captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
            self.current_mut().locals.pop();
        }
    }

    fn add_local(&mut self, name: Token<'src>) {
        if self.current().locals.len() == MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.current_mut().locals.push(Local {
            name: name.lexeme,
            depth: -1,
            is_captured: false,
        });
    }

    fn declare_variable(&mut self) {
        if self.current().scope_depth == 0 {
            return;
        }

        let name = self.previous;
        let mut duplicate = false;
        {
            let compiler = self.current();
            for local in compiler.locals.iter().rev() {
                if local.depth != -1 && local.depth < compiler.scope_depth {
                    break;
                }
                if local.name == name.lexeme {
                    duplicate = true;
                    break;
                }
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);

        self.declare_variable();
        if self.current().scope_depth > 0 {
            return 0;
        }

        self.identifier_constant(self.previous)
    }

    fn mark_initialized(&mut self) {
        let compiler = self.current_mut();
        if compiler.scope_depth == 0 {
            return;
        }
        let depth = compiler.scope_depth;
        if let Some(local) = compiler.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.current().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op(OpCode::DefineGlobal);
        self.emit_byte(global);
    }

    fn resolve_local(&mut self, compiler_index: usize, name: Token<'src>) -> Option<u8> {
        for i in (0..self.compilers[compiler_index].locals.len()).rev() {
            if self.compilers[compiler_index].locals[i].name == name.lexeme {
                if self.compilers[compiler_index].locals[i].depth == -1 {
                    self.error("Can't read local variable in its own initializer.");
                }
                return Some(i as u8);
            }
        }
        None
    }

    /// Resolve a name in an enclosing function, threading an upvalue chain
    /// down to the current one.
    fn resolve_upvalue(&mut self, compiler_index: usize, name: Token<'src>) -> Option<u8> {
        if compiler_index == 0 {
            return None;
        }

        if let Some(local) = self.resolve_local(compiler_index - 1, name) {
            self.compilers[compiler_index - 1].locals[local as usize].is_captured = true;
            return Some(self.add_upvalue(compiler_index, local, true));
        }

        if let Some(upvalue) = self.resolve_upvalue(compiler_index - 1, name) {
            return Some(self.add_upvalue(compiler_index, upvalue, false));
        }

        None
    }

    fn add_upvalue(&mut self, compiler_index: usize, index: u8, is_local: bool) -> u8 {
        for (i, upvalue) in self.compilers[compiler_index].upvalues.iter().enumerate() {
            if upvalue.index == index && upvalue.is_local == is_local {
                return i as u8;
            }
        }

        if self.compilers[compiler_index].upvalues.len() == MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }

        self.compilers[compiler_index]
            .upvalues
            .push(CompilerUpvalue { index, is_local });
        let count = self.compilers[compiler_index].upvalues.len();
        let function = self.compilers[compiler_index].function;
        self.heap.function_mut(function).upvalue_count = count;
        (count - 1) as u8
    }

    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let compiler_index = self.compilers.len() - 1;
        let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(compiler_index, name) {
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else if let Some(upvalue) = self.resolve_upvalue(compiler_index, name) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, upvalue)
        } else {
            let constant = self.identifier_constant(name);
            (OpCode::GetGlobal, OpCode::SetGlobal, constant)
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op(set_op);
        } else {
            self.emit_op(get_op);
        }
        self.emit_byte(arg);
    }

    // -----------------------------------------------------------------
    // Pratt rules
    // -----------------------------------------------------------------

    fn get_rule(kind: TokenKind) -> ParseRule<'src, 'h> {
        let (prefix, infix, precedence): (
            Option<ParseFn<'src, 'h>>,
            Option<ParseFn<'src, 'h>>,
            Precedence,
        ) = match kind {
            TokenKind::LeftParen => (
                Some(Parser::grouping as ParseFn<'src, 'h>),
                Some(Parser::call as _),
                Precedence::Call,
            ),
            TokenKind::Dot => (None, Some(Parser::dot as _), Precedence::Call),
            TokenKind::Minus => (
                Some(Parser::unary as _),
                Some(Parser::binary as _),
                Precedence::Term,
            ),
            TokenKind::Plus => (None, Some(Parser::binary as _), Precedence::Term),
            TokenKind::Slash | TokenKind::Star => {
                (None, Some(Parser::binary as _), Precedence::Factor)
            }
            TokenKind::Bang => (Some(Parser::unary as _), None, Precedence::None),
            TokenKind::BangEqual | TokenKind::EqualEqual => {
                (None, Some(Parser::binary as _), Precedence::Equality)
            }
            TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual => (None, Some(Parser::binary as _), Precedence::Comparison),
            TokenKind::Identifier => (Some(Parser::variable as _), None, Precedence::None),
            TokenKind::Str => (Some(Parser::string as _), None, Precedence::None),
            TokenKind::Number => (Some(Parser::number as _), None, Precedence::None),
            TokenKind::And => (None, Some(Parser::and_ as _), Precedence::And),
            TokenKind::Or => (None, Some(Parser::or_ as _), Precedence::Or),
            TokenKind::False | TokenKind::Nil | TokenKind::True => {
                (Some(Parser::literal as _), None, Precedence::None)
            }
            TokenKind::This => (Some(Parser::this_ as _), None, Precedence::None),
            _ => (None, None, Precedence::None),
        };
        ParseRule {
            prefix,
            infix,
            precedence,
        }
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = Self::get_rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };

        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= Self::get_rule(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = Self::get_rule(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or_default();
        self.emit_constant(Value::number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let contents = &lexeme[1..lexeme.len() - 1];
        self.maybe_collect();
        let interned = self.heap.intern(contents);
        self.emit_constant(Value::obj(interned));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::True => self.emit_op(OpCode::True),
            _ => unreachable!("literal rule on non-literal token"),
        }
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous, can_assign);
    }

    fn this_(&mut self, _can_assign: bool) {
        if self.class_depth == 0 {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.variable(false);
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;

        self.parse_precedence(Precedence::Unary);

        match operator {
            TokenKind::Bang => self.emit_op(OpCode::Not),
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            _ => unreachable!("unary rule on non-unary token"),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let rule = Self::get_rule(operator);
        self.parse_precedence(rule.precedence.next());

        match operator {
            TokenKind::BangEqual => self.emit_ops(OpCode::Equal, OpCode::Not),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => self.emit_ops(OpCode::Less, OpCode::Not),
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => self.emit_ops(OpCode::Greater, OpCode::Not),
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            _ => unreachable!("binary rule on non-binary token"),
        }
    }

    fn and_(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);

        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);

        self.patch_jump(end_jump);
    }

    fn or_(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);

        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, _can_assign: bool) {
        let argc = self.argument_list();
        self.emit_op(OpCode::Call);
        self.emit_byte(argc);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(self.previous);

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op(OpCode::SetProperty);
            self.emit_byte(name);
        } else if self.match_token(TokenKind::LeftParen) {
            // Fused access-and-call; skips materializing a bound method.
            let argc = self.argument_list();
            self.emit_op(OpCode::Invoke);
            self.emit_byte(name);
            self.emit_byte(argc);
        } else {
            self.emit_op(OpCode::GetProperty);
            self.emit_byte(name);
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count as u8
    }

    // -----------------------------------------------------------------
    // Declarations and statements
    // -----------------------------------------------------------------

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous;
        let name_constant = self.identifier_constant(self.previous);
        self.declare_variable();

        self.emit_op(OpCode::Class);
        self.emit_byte(name_constant);
        self.define_variable(name_constant);

        self.class_depth += 1;

        // Reload the class so each Method op finds it under the closure.
        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        self.class_depth -= 1;
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let constant = self.identifier_constant(self.previous);

        let kind = if self.previous.lexeme == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind);

        self.emit_op(OpCode::Method);
        self.emit_byte(constant);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // Functions may refer to themselves; the name is usable as soon as
        // the body starts compiling.
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn function(&mut self, kind: FunctionKind) {
        self.push_compiler(kind);
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                let function = self.current().function;
                if self.heap.function(function).arity == 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.heap.function_mut(function).arity += 1;
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        // No end_scope: the frame unwinds wholesale on return.
        let (function, upvalues) = self.end_compiler();
        let constant = self.make_constant(Value::obj(function));
        self.emit_op(OpCode::Closure);
        self.emit_byte(constant);
        for upvalue in upvalues {
            self.emit_byte(u8::from(upvalue.is_local));
            self.emit_byte(upvalue.index);
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");

        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }

        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );

        self.define_variable(global);
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }

        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }

        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk_len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenKind::Semicolon) {
            // No initializer.
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk_len();
        let mut exit_jump = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");

            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            // The increment runs after the body, so jump over it now and
            // loop back to it from the body's end.
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk_len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }
        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.current().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }

        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.current().kind == FunctionKind::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;

    fn compiles(source: &str) -> bool {
        let mut heap = Heap::new();
        compile(&mut heap, source, false).is_ok()
    }

    fn script_code(source: &str) -> Vec<u8> {
        let mut heap = Heap::new();
        let function = compile(&mut heap, source, false).expect("compile failed");
        heap.function(function).chunk.code.clone()
    }

    #[test]
    fn empty_script_returns_nil() {
        assert_eq!(
            script_code(""),
            vec![OpCode::Nil as u8, OpCode::Return as u8]
        );
    }

    #[test]
    fn arithmetic_expression() {
        // 1 + 2 => Constant 0, Constant 1, Add, Print.
        assert_eq!(
            script_code("print 1 + 2;"),
            vec![
                OpCode::Constant as u8,
                0,
                OpCode::Constant as u8,
                1,
                OpCode::Add as u8,
                OpCode::Print as u8,
                OpCode::Nil as u8,
                OpCode::Return as u8,
            ]
        );
    }

    #[test]
    fn comparison_operators_desugar() {
        let code = script_code("print 1 <= 2;");
        assert!(code.contains(&(OpCode::Greater as u8)));
        assert!(code.contains(&(OpCode::Not as u8)));
    }

    #[test]
    fn locals_use_slots_not_names() {
        let code = script_code("{ var a = 1; print a; }");
        assert!(code.contains(&(OpCode::GetLocal as u8)));
        assert!(!code.contains(&(OpCode::GetGlobal as u8)));
    }

    #[test]
    fn globals_go_through_the_constant_pool() {
        let code = script_code("var a = 1; print a;");
        assert!(code.contains(&(OpCode::DefineGlobal as u8)));
        assert!(code.contains(&(OpCode::GetGlobal as u8)));
    }

    #[test]
    fn functions_close_over_enclosing_locals() {
        let mut heap = Heap::new();
        let script = compile(
            &mut heap,
            "fun outer() { var x = 1; fun inner() { return x; } return inner; }",
            false,
        )
        .expect("compile failed");
        // The script holds outer; outer's chunk holds inner with one upvalue.
        let outer = heap
            .function(script)
            .chunk
            .constants
            .iter()
            .find_map(|c| {
                c.as_obj()
                    .filter(|&r| matches!(&heap[r], lute_core::Obj::Function(_)))
            })
            .expect("outer not in constants");
        let inner = heap
            .function(outer)
            .chunk
            .constants
            .iter()
            .find_map(|c| {
                c.as_obj()
                    .filter(|&r| matches!(&heap[r], lute_core::Obj::Function(_)))
            })
            .expect("inner not in constants");
        assert_eq!(heap.function(inner).upvalue_count, 1);
        assert_eq!(heap.function(inner).arity, 0);
    }

    #[test]
    fn method_calls_fuse_into_invoke() {
        let code = script_code("class A { m() {} } var a = A(); a.m();");
        assert!(code.contains(&(OpCode::Invoke as u8)));
    }

    #[test]
    fn property_reads_do_not_fuse() {
        let code = script_code("class A { m() {} } var a = A(); var m = a.m;");
        assert!(code.contains(&(OpCode::GetProperty as u8)));
    }

    #[test]
    fn self_read_in_initializer_is_rejected_in_blocks() {
        assert!(!compiles("{ var a = a; }"));
        // At global scope the same shape resolves through the globals table.
        assert!(compiles("var a = a;"));
    }

    #[test]
    fn duplicate_local_is_rejected() {
        assert!(!compiles("{ var a = 1; var a = 2; }"));
        // Shadowing in an inner scope is fine.
        assert!(compiles("{ var a = 1; { var a = 2; } }"));
    }

    #[test]
    fn top_level_return_is_rejected() {
        assert!(!compiles("return 1;"));
        assert!(compiles("fun f() { return 1; }"));
    }

    #[test]
    fn initializer_cannot_return_a_value() {
        assert!(!compiles("class A { init() { return 1; } }"));
        // A bare return is allowed; it hands back the instance.
        assert!(compiles("class A { init() { return; } }"));
    }

    #[test]
    fn this_outside_a_class_is_rejected() {
        assert!(!compiles("print this;"));
        assert!(!compiles("fun f() { return this; }"));
        assert!(compiles("class A { m() { return this; } }"));
    }

    #[test]
    fn invalid_assignment_targets_are_rejected() {
        assert!(!compiles("var a = 1; var b = 2; a + b = 3;"));
        assert!(!compiles("1 = 2;"));
    }

    #[test]
    fn super_has_no_rule() {
        assert!(!compiles("print super.x;"));
    }

    #[test]
    fn local_slots_cap_at_255_user_locals() {
        let mut ok = String::from("fun f() {\n");
        for i in 0..255 {
            let _ = writeln!(ok, "var l{i} = 0;");
        }
        ok.push('}');
        assert!(compiles(&ok));

        let mut over = String::from("fun f() {\n");
        for i in 0..256 {
            let _ = writeln!(over, "var l{i} = 0;");
        }
        over.push('}');
        assert!(!compiles(&over));
    }

    #[test]
    fn constant_pool_caps_at_256() {
        let mut ok = String::new();
        for i in 0..255 {
            let _ = writeln!(ok, "print {i};");
        }
        assert!(compiles(&ok));

        let mut over = String::new();
        for i in 0..256 {
            let _ = writeln!(over, "print {i};");
        }
        assert!(!compiles(&over));
    }

    #[test]
    fn upvalues_cap_at_256() {
        // inner captures 100 locals from outer (through middle) plus 200
        // of middle's own, overflowing its upvalue array.
        let mut over = String::from("fun outer() {\n");
        for i in 0..100 {
            let _ = writeln!(over, "var a{i};");
        }
        over.push_str("fun middle() {\n");
        for i in 0..200 {
            let _ = writeln!(over, "var b{i};");
        }
        over.push_str("fun inner() {\n");
        for i in 0..100 {
            let _ = writeln!(over, "a{i};");
        }
        for i in 0..200 {
            let _ = writeln!(over, "b{i};");
        }
        over.push_str("}\n}\n}");
        assert!(!compiles(&over));

        let mut ok = String::from("fun outer() {\n");
        for i in 0..100 {
            let _ = writeln!(ok, "var a{i};");
        }
        ok.push_str("fun inner() {\n");
        for i in 0..100 {
            let _ = writeln!(ok, "a{i};");
        }
        ok.push_str("}\n}");
        assert!(compiles(&ok));
    }

    #[test]
    fn oversized_then_branch_is_rejected() {
        let mut source = String::from("if (true) {\n");
        // 3 bytes per statement; ~66k statements overflow the u16 offset.
        for _ in 0..22_000 {
            source.push_str("!true;\n");
        }
        source.push('}');
        assert!(!compiles(&source));
    }

    #[test]
    fn parameters_cap_at_255() {
        let params = |n: usize| {
            let names: Vec<String> = (0..n).map(|i| format!("p{i}")).collect();
            format!("fun f({}) {{}}", names.join(", "))
        };
        assert!(compiles(&params(255)));
        assert!(!compiles(&params(256)));
    }

    #[test]
    fn arguments_cap_at_255() {
        let args: Vec<String> = (0..256).map(|_| "0".to_string()).collect();
        let source = format!("fun f() {{}} f({});", args.join(", "));
        assert!(!compiles(&source));
    }

    #[test]
    fn compiled_chunks_disassemble_to_their_exact_length() {
        let mut heap = Heap::new();
        let function = compile(
            &mut heap,
            "fun add(a, b) { return a + b; }\n\
             var total = 0;\n\
             for (var i = 0; i < 3; i = i + 1) { total = add(total, i); }\n\
             print total;",
            false,
        )
        .expect("compile failed");
        let chunk = &heap.function(function).chunk;
        let mut offset = 0;
        while offset < chunk.code.len() {
            let (_, next) = lute_core::debug::disassemble_instruction(&heap, chunk, offset);
            assert!(next > offset);
            offset = next;
        }
        assert_eq!(offset, chunk.code.len());
    }

    #[test]
    fn panic_mode_recovers_at_statement_boundaries() {
        // Both statements are bad; both should be reported, which means the
        // compiler kept going after the first.
        let mut heap = Heap::new();
        let result = compile(&mut heap, "var 1 = 2; print 3", false);
        assert!(result.is_err());
    }

    #[test]
    fn repeated_compiles_share_one_heap() {
        let mut heap = Heap::new();
        assert!(compile(&mut heap, "var a = 1;", false).is_ok());
        assert!(compile(&mut heap, "var b = 2;", false).is_ok());
    }
}
