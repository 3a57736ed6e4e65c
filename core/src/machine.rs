//! A tree-walking interpreter over a resolved [crate::code_tree] (spec.md
//! §4.6).
//!
//! Two byte buffers back every value that isn't a fresh computed result: a
//! stack segment reused frame-by-frame across calls, and a global segment
//! that lives for the whole run. Every expression evaluates to an
//! [EvalValue]: either bytes computed fresh (an immediate, not addressable)
//! or a location in one of those buffers (addressable, an lvalue).

use crate::ccall::CCallId;
use crate::code_tree::{Block, Expr, ExprKind, ProcedureBody, Stmt};
use crate::error::{RuntimeError, SourceErrorWrapper, WithSource};
use crate::operators::{BinaryOp, UnaryOp};
use crate::resolver::ResolvedProgram;
use crate::symbol::Address;
use crate::types::{Type, TypeKind, POINTER_SIZE};
use crate::util::Span;
use std::rc::Rc;

type RtResult<T> = Result<T, SourceErrorWrapper<RuntimeError>>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum MemBase {
    Stack,
    Global,
}

#[derive(Clone, Debug)]
enum EvalValue {
    /// A value with no backing address: a literal, a computed arithmetic
    /// result, a freshly-built pointer.
    Immediate(Vec<u8>),
    /// A value living at a byte offset in one of the two segments.
    Address { base: MemBase, offset: u32 },
}

/// What a statement handed control back as. Modeled as an explicit enum
/// rather than counters so a `break`/`continue`/`return` can only ever mean
/// one thing as it propagates back up through nested blocks.
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Option<EvalValue>),
}

enum Callee {
    Code(Rc<ProcedureBody>),
    CCall(CCallId),
}

/// Hook points a debugger or tracer can observe.
pub enum Interception<'a> {
    Statement(&'a Stmt),
    ProcedureCall,
    ProcedureReturn,
}

enum Numeric {
    Int(i64),
    Real(f64),
}

impl Numeric {
    fn as_i64(&self) -> i64 {
        match self {
            Numeric::Int(i) => *i,
            Numeric::Real(r) => *r as i64,
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            Numeric::Int(i) => *i as f64,
            Numeric::Real(r) => *r,
        }
    }
}

pub struct Interpreter<'a> {
    program: &'a ResolvedProgram,
    stack: Vec<u8>,
    globals: Vec<u8>,
    sp: u32,
    cycle_count: u64,
    cycle_limit: u64,
    /// Procedure values that have been taken as a runtime bit pattern
    /// (assigned to a variable, passed as an argument) get interned here so
    /// a later call through that variable can look the body back up.
    proc_table: Vec<Rc<ProcedureBody>>,
    interceptor: Option<Box<dyn FnMut(Interception) + 'a>>,
}

fn runtime_err<T>(err: RuntimeError, span: Span) -> RtResult<T> {
    Err(SourceErrorWrapper::new(err, span, ""))
}

fn type_tag(ty: &Type) -> i64 {
    match ty.kind {
        TypeKind::Integer => 0,
        TypeKind::Real => 1,
        TypeKind::Bool => 2,
        TypeKind::Character => 3,
        TypeKind::Pointer(_) => 4,
        _ => -1,
    }
}

impl<'a> Interpreter<'a> {
    pub fn new(program: &'a ResolvedProgram, stack_bytes: u32, cycle_limit: u64) -> Self {
        Interpreter {
            program,
            stack: vec![0; stack_bytes as usize],
            globals: vec![0; program.globals_size as usize],
            sp: 0,
            cycle_count: 0,
            cycle_limit,
            proc_table: Vec::new(),
            interceptor: None,
        }
    }

    pub fn set_interceptor(&mut self, hook: impl FnMut(Interception) + 'a) {
        self.interceptor = Some(Box::new(hook));
    }

    pub fn run(&mut self) -> Result<(), WithSource<RuntimeError>> {
        let main = Rc::clone(&self.program.main);
        self.call_procedure(&main, &[], Span::synthetic())
            .map(|_| ())
            .map_err(|e| WithSource::new(vec![e], String::new()))
    }

    fn intercept(&mut self, event: Interception<'a>) {
        if let Some(hook) = &mut self.interceptor {
            hook(event);
        }
    }

    fn tick(&mut self) -> RtResult<()> {
        self.cycle_count += 1;
        if self.cycle_count > self.cycle_limit {
            return runtime_err(RuntimeError::TooManyCycles, Span::synthetic());
        }
        Ok(())
    }

    fn mem(&self, base: MemBase) -> &[u8] {
        match base {
            MemBase::Stack => &self.stack,
            MemBase::Global => &self.globals,
        }
    }

    fn mem_mut(&mut self, base: MemBase) -> &mut [u8] {
        match base {
            MemBase::Stack => &mut self.stack,
            MemBase::Global => &mut self.globals,
        }
    }

    fn read_bytes(&self, v: &EvalValue, size: u32) -> Vec<u8> {
        match v {
            EvalValue::Immediate(bytes) => {
                let mut bytes = bytes.clone();
                bytes.resize(size as usize, 0);
                bytes
            }
            EvalValue::Address { base, offset } => {
                let mem = self.mem(*base);
                mem[*offset as usize..(*offset + size) as usize].to_vec()
            }
        }
    }

    fn write_bytes(&mut self, target: &EvalValue, data: &[u8]) {
        match target {
            EvalValue::Immediate(_) => {
                unreachable!("the resolver only allows assignment into lvalues")
            }
            EvalValue::Address { base, offset } => {
                let mem = self.mem_mut(*base);
                mem[*offset as usize..*offset as usize + data.len()].copy_from_slice(data);
            }
        }
    }

    fn read_bool(&self, v: &EvalValue) -> bool {
        self.read_bytes(v, 1)[0] != 0
    }

    fn encode_pointer(&self, base: MemBase, offset: u32) -> [u8; 8] {
        let tag: u64 = match base {
            MemBase::Stack => 0,
            MemBase::Global => 1,
        };
        ((offset as u64) << 1 | tag).to_le_bytes()
    }

    fn decode_pointer(&self, bytes: &[u8]) -> (MemBase, u32) {
        let v = u64::from_le_bytes(bytes[..8].try_into().unwrap());
        let base = if v & 1 == 0 {
            MemBase::Stack
        } else {
            MemBase::Global
        };
        (base, (v >> 1) as u32)
    }

    fn encode_function_value(&mut self, addr: &Address) -> [u8; 8] {
        match addr {
            Address::Code(body) => {
                let idx = self.proc_table.len() as u64;
                self.proc_table.push(Rc::clone(body));
                (idx << 1).to_le_bytes()
            }
            Address::CCall(id) => (((id.0 as u64) << 1) | 1).to_le_bytes(),
            _ => unreachable!("only procedure-typed addresses are encoded as function values"),
        }
    }

    fn decode_function_value(&self, bytes: &[u8]) -> Callee {
        let v = u64::from_le_bytes(bytes[..8].try_into().unwrap());
        let idx = (v >> 1) as usize;
        if v & 1 == 0 {
            Callee::Code(Rc::clone(&self.proc_table[idx]))
        } else {
            Callee::CCall(CCallId(idx as u32))
        }
    }

    fn decode_numeric(&self, ty: &Type, v: &EvalValue) -> Numeric {
        let bytes = self.read_bytes(v, ty.runtime_size.get().max(1) as u32);
        match ty.kind {
            TypeKind::Real => Numeric::Real(f64::from_le_bytes(bytes[..8].try_into().unwrap())),
            TypeKind::Character => Numeric::Int(bytes[0] as i8 as i64),
            TypeKind::Bool => Numeric::Int(bytes[0] as i64),
            _ => {
                let mut buf = [0u8; 8];
                buf[..bytes.len().min(8)].copy_from_slice(&bytes[..bytes.len().min(8)]);
                Numeric::Int(i64::from_le_bytes(buf))
            }
        }
    }

    // ---- expressions ------------------------------------------------

    fn eval_expr(&mut self, frame_base: u32, expr: &Expr) -> RtResult<EvalValue> {
        self.tick()?;
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(EvalValue::Immediate(encode_literal(lit))),
            ExprKind::Address(cell) => {
                let addr = cell.borrow().clone();
                match addr {
                    Address::Stack(off) => Ok(EvalValue::Address {
                        base: MemBase::Stack,
                        offset: frame_base + off,
                    }),
                    Address::Global(off) => Ok(EvalValue::Address {
                        base: MemBase::Global,
                        offset: off,
                    }),
                    Address::Code(_) | Address::CCall(_) => Ok(EvalValue::Immediate(
                        self.encode_function_value(&addr).to_vec(),
                    )),
                    Address::Unassigned => {
                        unreachable!("a type symbol cannot appear in an evaluated expression")
                    }
                }
            }
            ExprKind::Offset(base, off) => {
                let base_val = self.eval_expr(frame_base, base)?;
                match base_val {
                    EvalValue::Address { base, offset } => Ok(EvalValue::Address {
                        base,
                        offset: offset + *off as u32,
                    }),
                    EvalValue::Immediate(_) => {
                        unreachable!("member access target is always addressable")
                    }
                }
            }
            ExprKind::Subscript(base, index) => {
                let base_val = self.eval_expr(frame_base, base)?;
                let idx_val = self.eval_expr(frame_base, index)?;
                let idx = i64::from_le_bytes(self.read_bytes(&idx_val, 8)[..8].try_into().unwrap());
                let elem_size = expr.ty.runtime_size.get() as i64;
                let (mem_base, offset) = match base_val {
                    EvalValue::Address { base, offset } => (base, offset),
                    EvalValue::Immediate(bytes) => self.decode_pointer(&bytes),
                };
                Ok(EvalValue::Address {
                    base: mem_base,
                    offset: (offset as i64 + idx * elem_size) as u32,
                })
            }
            ExprKind::Deref(inner) => {
                let v = self.eval_expr(frame_base, inner)?;
                let bytes = self.read_bytes(&v, POINTER_SIZE as u32);
                let (base, offset) = self.decode_pointer(&bytes);
                Ok(EvalValue::Address { base, offset })
            }
            ExprKind::AddressOf(inner) => {
                let v = self.eval_expr(frame_base, inner)?;
                match v {
                    EvalValue::Address { base, offset } => {
                        Ok(EvalValue::Immediate(self.encode_pointer(base, offset).to_vec()))
                    }
                    EvalValue::Immediate(_) => unreachable!("`&` only applies to lvalues"),
                }
            }
            ExprKind::Unary(op, operand) => {
                let v = self.eval_expr(frame_base, operand)?;
                Ok(EvalValue::Immediate(self.eval_unary(*op, &operand.ty, &v)))
            }
            ExprKind::Binary(op, lhs, rhs) => {
                self.eval_binary(frame_base, *op, lhs, rhs, &expr.ty, expr.span)
            }
            ExprKind::TypeCast(inner) => {
                let v = self.eval_expr(frame_base, inner)?;
                Ok(EvalValue::Immediate(self.eval_cast(&inner.ty, &expr.ty, &v)))
            }
            ExprKind::ProcedureCall {
                callee,
                args,
                variadic_args,
            } => self.eval_call(frame_base, callee, args, variadic_args, expr.span),
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, ty: &Type, v: &EvalValue) -> Vec<u8> {
        let n = self.decode_numeric(ty, v);
        let mut bytes = match (op, &ty.kind) {
            (UnaryOp::Negate, TypeKind::Real) => (-n.as_f64()).to_le_bytes().to_vec(),
            (UnaryOp::Negate, _) => n.as_i64().wrapping_neg().to_le_bytes().to_vec(),
            (UnaryOp::Plus, TypeKind::Real) => n.as_f64().to_le_bytes().to_vec(),
            (UnaryOp::Plus, _) => n.as_i64().to_le_bytes().to_vec(),
            (UnaryOp::Not, _) => vec![(n.as_i64() == 0) as u8],
            (UnaryOp::BitNot, _) => (!n.as_i64()).to_le_bytes().to_vec(),
        };
        bytes.truncate(ty.runtime_size.get().max(1) as usize);
        bytes
    }

    /// Evaluates the right operand before the left: a quirk carried over
    /// from the evaluator this one is modeled on, observable whenever both
    /// operands have side effects.
    fn eval_binary(
        &mut self,
        frame_base: u32,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        result_ty: &Type,
        span: Span,
    ) -> RtResult<EvalValue> {
        if matches!(op, BinaryOp::LogicalAnd | BinaryOp::LogicalOr) {
            let l = self.eval_expr(frame_base, lhs)?;
            let l_bool = self.read_bool(&l);
            if op == BinaryOp::LogicalAnd && !l_bool {
                return Ok(EvalValue::Immediate(vec![0]));
            }
            if op == BinaryOp::LogicalOr && l_bool {
                return Ok(EvalValue::Immediate(vec![1]));
            }
            let r = self.eval_expr(frame_base, rhs)?;
            return Ok(EvalValue::Immediate(vec![self.read_bool(&r) as u8]));
        }

        let r = self.eval_expr(frame_base, rhs)?;
        let l = self.eval_expr(frame_base, lhs)?;

        if lhs.ty.is_pointer() || rhs.ty.is_pointer() {
            return self.eval_pointer_binary(op, &lhs.ty, &rhs.ty, &l, &r, span);
        }

        let lv = self.decode_numeric(&lhs.ty, &l);
        let rv = self.decode_numeric(&rhs.ty, &r);
        let is_real = matches!(lhs.ty.kind, TypeKind::Real) || matches!(rhs.ty.kind, TypeKind::Real);

        let mut bytes = match op {
            BinaryOp::Add if is_real => (lv.as_f64() + rv.as_f64()).to_le_bytes().to_vec(),
            BinaryOp::Add => lv.as_i64().wrapping_add(rv.as_i64()).to_le_bytes().to_vec(),
            BinaryOp::Subtract if is_real => (lv.as_f64() - rv.as_f64()).to_le_bytes().to_vec(),
            BinaryOp::Subtract => lv.as_i64().wrapping_sub(rv.as_i64()).to_le_bytes().to_vec(),
            BinaryOp::Multiply if is_real => (lv.as_f64() * rv.as_f64()).to_le_bytes().to_vec(),
            BinaryOp::Multiply => lv.as_i64().wrapping_mul(rv.as_i64()).to_le_bytes().to_vec(),
            BinaryOp::Divide if is_real => (lv.as_f64() / rv.as_f64()).to_le_bytes().to_vec(),
            BinaryOp::Divide => {
                let divisor = rv.as_i64();
                if divisor == 0 {
                    return runtime_err(RuntimeError::DivideByZero, span);
                }
                (lv.as_i64() / divisor).to_le_bytes().to_vec()
            }
            BinaryOp::Modulo => {
                let divisor = rv.as_i64();
                if divisor == 0 {
                    return runtime_err(RuntimeError::DivideByZero, span);
                }
                (lv.as_i64() % divisor).to_le_bytes().to_vec()
            }
            BinaryOp::BitAnd => (lv.as_i64() & rv.as_i64()).to_le_bytes().to_vec(),
            BinaryOp::BitOr => (lv.as_i64() | rv.as_i64()).to_le_bytes().to_vec(),
            BinaryOp::BitXor => (lv.as_i64() ^ rv.as_i64()).to_le_bytes().to_vec(),
            BinaryOp::ShiftLeft => (lv.as_i64() << rv.as_i64()).to_le_bytes().to_vec(),
            BinaryOp::ShiftRight => (lv.as_i64() >> rv.as_i64()).to_le_bytes().to_vec(),
            BinaryOp::Equal if is_real => vec![(lv.as_f64() == rv.as_f64()) as u8],
            BinaryOp::Equal => vec![(lv.as_i64() == rv.as_i64()) as u8],
            BinaryOp::NotEqual if is_real => vec![(lv.as_f64() != rv.as_f64()) as u8],
            BinaryOp::NotEqual => vec![(lv.as_i64() != rv.as_i64()) as u8],
            BinaryOp::Less if is_real => vec![(lv.as_f64() < rv.as_f64()) as u8],
            BinaryOp::Less => vec![(lv.as_i64() < rv.as_i64()) as u8],
            BinaryOp::LessEqual if is_real => vec![(lv.as_f64() <= rv.as_f64()) as u8],
            BinaryOp::LessEqual => vec![(lv.as_i64() <= rv.as_i64()) as u8],
            BinaryOp::Greater if is_real => vec![(lv.as_f64() > rv.as_f64()) as u8],
            BinaryOp::Greater => vec![(lv.as_i64() > rv.as_i64()) as u8],
            BinaryOp::GreaterEqual if is_real => vec![(lv.as_f64() >= rv.as_f64()) as u8],
            BinaryOp::GreaterEqual => vec![(lv.as_i64() >= rv.as_i64()) as u8],
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => unreachable!("handled above"),
        };
        bytes.truncate(result_ty.runtime_size.get().max(1) as usize);
        Ok(EvalValue::Immediate(bytes))
    }

    fn eval_pointer_binary(
        &mut self,
        op: BinaryOp,
        lty: &Type,
        rty: &Type,
        l: &EvalValue,
        r: &EvalValue,
        span: Span,
    ) -> RtResult<EvalValue> {
        match op {
            BinaryOp::Add => {
                let (ptr_ty, ptr_val, int_val) = if lty.is_pointer() {
                    (lty, l, r)
                } else {
                    (rty, r, l)
                };
                let elem_size = ptr_ty.pointee().map(|t| t.runtime_size.get().max(1)).unwrap_or(1) as i64;
                let (base, offset) = self.decode_pointer(&self.read_bytes(ptr_val, POINTER_SIZE as u32));
                let idx = i64::from_le_bytes(self.read_bytes(int_val, 8)[..8].try_into().unwrap());
                let new_offset = (offset as i64 + idx * elem_size) as u32;
                Ok(EvalValue::Immediate(self.encode_pointer(base, new_offset).to_vec()))
            }
            BinaryOp::Subtract if rty.is_pointer() => {
                let elem_size = lty.pointee().map(|t| t.runtime_size.get().max(1)).unwrap_or(1) as i64;
                let (lb, lo) = self.decode_pointer(&self.read_bytes(l, POINTER_SIZE as u32));
                let (_, ro) = self.decode_pointer(&self.read_bytes(r, POINTER_SIZE as u32));
                let _ = lb;
                let diff = (lo as i64 - ro as i64) / elem_size;
                Ok(EvalValue::Immediate(diff.to_le_bytes().to_vec()))
            }
            BinaryOp::Subtract => {
                let elem_size = lty.pointee().map(|t| t.runtime_size.get().max(1)).unwrap_or(1) as i64;
                let (base, offset) = self.decode_pointer(&self.read_bytes(l, POINTER_SIZE as u32));
                let idx = i64::from_le_bytes(self.read_bytes(r, 8)[..8].try_into().unwrap());
                let new_offset = (offset as i64 - idx * elem_size) as u32;
                Ok(EvalValue::Immediate(self.encode_pointer(base, new_offset).to_vec()))
            }
            BinaryOp::Equal | BinaryOp::NotEqual => {
                let (lb, lo) = self.decode_pointer(&self.read_bytes(l, POINTER_SIZE as u32));
                let (rb, ro) = self.decode_pointer(&self.read_bytes(r, POINTER_SIZE as u32));
                let eq = lb == rb && lo == ro;
                Ok(EvalValue::Immediate(vec![
                    (if op == BinaryOp::Equal { eq } else { !eq }) as u8,
                ]))
            }
            _ => {
                let _ = span;
                unreachable!("no other pointer binary operator is ever registered")
            }
        }
    }

    fn eval_cast(&mut self, from_ty: &Type, to_ty: &Type, v: &EvalValue) -> Vec<u8> {
        use TypeKind::*;
        match (&from_ty.kind, &to_ty.kind) {
            (Pointer(_), Pointer(_)) | (Pointer(_), Integer) | (Integer, Pointer(_)) => {
                self.read_bytes(v, POINTER_SIZE as u32)
            }
            (StaticArray(arr), ArrayView(_)) => match v {
                EvalValue::Address { base, offset } => {
                    let mut out = arr.count.to_le_bytes().to_vec();
                    out.extend_from_slice(&self.encode_pointer(*base, *offset));
                    out
                }
                EvalValue::Immediate(_) => unreachable!("an array value is always addressable"),
            },
            (StaticArray(_), Pointer(_)) => match v {
                EvalValue::Address { base, offset } => self.encode_pointer(*base, *offset).to_vec(),
                EvalValue::Immediate(_) => unreachable!("an array value is always addressable"),
            },
            _ => {
                let n = self.decode_numeric(from_ty, v);
                let mut bytes = match &to_ty.kind {
                    Integer => n.as_i64().to_le_bytes().to_vec(),
                    Character => (n.as_i64() & 0xff).to_le_bytes().to_vec(),
                    Real => n.as_f64().to_le_bytes().to_vec(),
                    Bool => vec![(n.as_i64() != 0) as u8],
                    _ => unreachable!("the resolver already rejected any other cast"),
                };
                bytes.truncate(to_ty.runtime_size.get().max(1) as usize);
                bytes
            }
        }
    }

    fn eval_call(
        &mut self,
        frame_base: u32,
        callee: &Expr,
        args: &[Expr],
        variadic_args: &[Expr],
        span: Span,
    ) -> RtResult<EvalValue> {
        let callee_val = self.eval_expr(frame_base, callee)?;
        let bytes = self.read_bytes(&callee_val, POINTER_SIZE as u32);
        let target = self.decode_function_value(&bytes);

        let mut arg_values = Vec::with_capacity(args.len());
        for a in args {
            let v = self.eval_expr(frame_base, a)?;
            arg_values.push(self.read_bytes(&v, a.ty.runtime_size.get().max(1) as u32));
        }
        let mut variadic_values = Vec::with_capacity(variadic_args.len());
        for a in variadic_args {
            let v = self.eval_expr(frame_base, a)?;
            let size = a.ty.runtime_size.get().min(POINTER_SIZE).max(1) as u32;
            variadic_values.push((type_tag(&a.ty), self.read_bytes(&v, size)));
        }

        match target {
            Callee::Code(proc) => self.call_procedure(&proc, &arg_values, span),
            Callee::CCall(id) => Ok(self.call_ccall(id, &arg_values, &variadic_values)),
        }
    }

    fn call_ccall(&mut self, id: CCallId, args: &[Vec<u8>], variadic: &[(i64, Vec<u8>)]) -> EvalValue {
        let entry = self.program.ccalls.get(id).clone();
        let (ret_size, is_variadic) = match &entry.signature.kind {
            TypeKind::Procedure(p) => (
                p.return_type.as_ref().map(|t| t.runtime_size.get()).unwrap_or(0),
                p.variadic,
            ),
            _ => (0, false),
        };
        let ret_size = ret_size as usize;

        let mut frame = vec![0u8; ret_size];
        for a in args {
            frame.extend_from_slice(a);
        }
        if is_variadic {
            // The final declared argument slot: a pointer to the first
            // (lowest-address) packed tag below, or a null pointer if no
            // variadic arguments were passed (spec.md §4.4, §8). "Pointer"
            // here is a byte offset into this same frame, the native
            // callback's only addressable space.
            let tag_region_start = if variadic.is_empty() {
                0u64
            } else {
                (frame.len() + POINTER_SIZE as usize) as u64
            };
            frame.extend_from_slice(&tag_region_start.to_le_bytes());
        }
        // Variadic tail, packed in reverse (last argument first), each
        // entry an 8-byte type tag followed by its pointer-size-padded
        // value.
        for (tag, bytes) in variadic.iter().rev() {
            frame.extend_from_slice(&tag.to_le_bytes());
            let mut padded = bytes.clone();
            padded.resize(POINTER_SIZE as usize, 0);
            frame.extend_from_slice(&padded);
        }

        (entry.callback)(&mut frame);
        EvalValue::Immediate(frame[..ret_size].to_vec())
    }

    fn call_procedure(
        &mut self,
        proc: &ProcedureBody,
        args: &[Vec<u8>],
        span: Span,
    ) -> RtResult<EvalValue> {
        self.tick()?;
        self.intercept(Interception::ProcedureCall);

        let new_base = (self.sp + 7) & !7;
        let needed = new_base as u64 + proc.frame_size as u64;
        if needed > self.stack.len() as u64 {
            return runtime_err(
                RuntimeError::StackOverflow {
                    limit: self.stack.len() as u64,
                },
                span,
            );
        }
        let saved_sp = self.sp;
        self.sp = new_base + proc.frame_size;

        for (param, arg_bytes) in proc.params.iter().zip(args) {
            if let Address::Stack(off) = &*param.address.borrow() {
                let start = (new_base + off) as usize;
                self.stack[start..start + arg_bytes.len()].copy_from_slice(arg_bytes);
            }
        }

        let flow = self.exec_block(new_base, &proc.body)?;
        let result_bytes = match &flow {
            Flow::Return(Some(v)) => {
                let size = proc
                    .return_type
                    .as_ref()
                    .map(|t| t.runtime_size.get())
                    .unwrap_or(0) as u32;
                Some(self.read_bytes(v, size))
            }
            _ => None,
        };
        self.sp = saved_sp;
        self.intercept(Interception::ProcedureReturn);

        Ok(EvalValue::Immediate(result_bytes.unwrap_or_default()))
    }

    // ---- statements ---------------------------------------------------

    fn exec_block(&mut self, frame_base: u32, block: &Block) -> RtResult<Flow> {
        for stmt in &block.statements {
            match self.exec_stmt(frame_base, stmt)? {
                Flow::Normal => continue,
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, frame_base: u32, stmt: &Stmt) -> RtResult<Flow> {
        self.tick()?;
        self.intercept(Interception::Statement(stmt));
        match stmt {
            Stmt::Expression(e) => {
                self.eval_expr(frame_base, e)?;
                Ok(Flow::Normal)
            }
            Stmt::Assignment(target, value) => {
                let t = self.eval_expr(frame_base, target)?;
                let v = self.eval_expr(frame_base, value)?;
                let bytes = self.read_bytes(&v, value.ty.runtime_size.get().max(1) as u32);
                self.write_bytes(&t, &bytes);
                Ok(Flow::Normal)
            }
            Stmt::If {
                condition,
                true_branch,
                false_branch,
            } => {
                let cond = self.eval_expr(frame_base, condition)?;
                if self.read_bool(&cond) {
                    self.exec_stmt(frame_base, true_branch)
                } else if let Some(f) = false_branch {
                    self.exec_stmt(frame_base, f)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { condition, body } => {
                loop {
                    let cond = self.eval_expr(frame_base, condition)?;
                    if !self.read_bool(&cond) {
                        break;
                    }
                    match self.exec_stmt(frame_base, body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Do { body, condition } => {
                loop {
                    match self.exec_stmt(frame_base, body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    let cond = self.eval_expr(frame_base, condition)?;
                    if !self.read_bool(&cond) {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                init,
                condition,
                increment,
                body,
            } => {
                if let Some(init) = init {
                    self.exec_stmt(frame_base, init)?;
                }
                loop {
                    if let Some(cond) = condition {
                        let c = self.eval_expr(frame_base, cond)?;
                        if !self.read_bool(&c) {
                            break;
                        }
                    }
                    match self.exec_stmt(frame_base, body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if let Some(incr) = increment {
                        self.eval_expr(frame_base, incr)?;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Return(value) => {
                let v = match value {
                    Some(e) => Some(self.eval_expr(frame_base, e)?),
                    None => None,
                };
                Ok(Flow::Return(v))
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Block(b) => self.exec_block(frame_base, b),
        }
    }
}

fn encode_literal(lit: &crate::ast::LiteralValue) -> Vec<u8> {
    use crate::ast::LiteralValue::*;
    match lit {
        Integer(i) => i.to_le_bytes().to_vec(),
        Real(r) => r.to_le_bytes().to_vec(),
        Bool(b) => vec![*b as u8],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::LiteralValue;

    #[test]
    fn test_type_tag_matches_ccall_wire_format() {
        // cli/src/main.rs and server/src/server.rs both decode a print
        // ccall's variadic tail against these exact tag values.
        assert_eq!(type_tag(&Type::integer()), 0);
        assert_eq!(type_tag(&Type::real()), 1);
        assert_eq!(type_tag(&Type::boolean()), 2);
        assert_eq!(type_tag(&Type::character()), 3);
        assert_eq!(type_tag(&Type::pointer(Rc::new(Type::integer()))), 4);
    }

    #[test]
    fn test_encode_literal() {
        assert_eq!(encode_literal(&LiteralValue::Integer(7)), 7i64.to_le_bytes());
        assert_eq!(encode_literal(&LiteralValue::Bool(true)), vec![1u8]);
        assert_eq!(encode_literal(&LiteralValue::Bool(false)), vec![0u8]);
        assert_eq!(
            encode_literal(&LiteralValue::Real(1.5)),
            1.5f64.to_le_bytes()
        );
    }
}
