//! Sandboxed tree-walking evaluator.
//!
//! Scopes, heap objects and callables live in arenas owned by the
//! [`Interpreter`] and are addressed by index, so closures never form
//! reference cycles. Nothing here touches the host: there is no I/O, no
//! clock access for programs and every evaluation step is metered against
//! [`ExecutionLimits`].

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

use crate::error::ExecutionError;
use crate::javascript::ast::*;
use crate::javascript::emit::{emit_expression, emit_function};
use crate::javascript::parser::parse;
use crate::javascript::value::{
    number_to_string, string_to_number, to_integer, FunctionId, ObjectId, Value,
};
use crate::limits::ExecutionLimits;

type ScopeId = usize;
type Eval<T = Value> = Result<T, ExecutionError>;

const GLOBAL_SCOPE: ScopeId = 0;

/// Steps between wall-clock checks.
const CLOCK_INTERVAL: u64 = 1024;

/// Heap slots filled per metered step.
const SLOTS_PER_STEP: usize = 16;

/// String bytes built per metered step.
const BYTES_PER_STEP: usize = 1024;

const MAX_ARRAY_LENGTH: usize = 1 << 22;

/// Parse `source`, run it and stringify its completion value.
pub fn run_source(source: &str, limits: ExecutionLimits) -> Result<String, ExecutionError> {
    let program = parse(source).map_err(|err| ExecutionError::InvalidArtifact(err.to_string()))?;
    let mut interpreter = Interpreter::new(limits);
    let value = interpreter.run(&program)?;
    interpreter.to_string(&value)
}

#[derive(Debug)]
struct Binding {
    value: Value,
    mutable: bool,
}

#[derive(Debug, Default)]
struct Scope {
    parent: Option<ScopeId>,
    bindings: HashMap<String, Binding>,
}

#[derive(Debug)]
enum HeapObject {
    Array(Vec<Value>),
    /// Properties in insertion order
    Plain(Vec<(String, Value)>),
}

impl HeapObject {
    fn slots(&self) -> usize {
        match self {
            HeapObject::Array(items) => items.len(),
            HeapObject::Plain(props) => props.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MathFn {
    Abs,
    Floor,
    Ceil,
    Round,
    Sqrt,
    Pow,
    Min,
    Max,
    Trunc,
    Sign,
}

impl MathFn {
    const ALL: [MathFn; 10] = [
        MathFn::Abs,
        MathFn::Floor,
        MathFn::Ceil,
        MathFn::Round,
        MathFn::Sqrt,
        MathFn::Pow,
        MathFn::Min,
        MathFn::Max,
        MathFn::Trunc,
        MathFn::Sign,
    ];

    fn name(self) -> &'static str {
        match self {
            MathFn::Abs => "abs",
            MathFn::Floor => "floor",
            MathFn::Ceil => "ceil",
            MathFn::Round => "round",
            MathFn::Sqrt => "sqrt",
            MathFn::Pow => "pow",
            MathFn::Min => "min",
            MathFn::Max => "max",
            MathFn::Trunc => "trunc",
            MathFn::Sign => "sign",
        }
    }

    fn arity(self) -> usize {
        match self {
            MathFn::Pow | MathFn::Min | MathFn::Max => 2,
            _ => 1,
        }
    }
}

/// Built-in methods of arrays, strings, numbers and booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Push,
    Pop,
    Join,
    IndexOf,
    Includes,
    Slice,
    ToUpperCase,
    ToLowerCase,
    Trim,
    CharAt,
    ToFixed,
    ToString,
}

impl Method {
    fn parse(name: &str) -> Option<Self> {
        let method = match name {
            "push" => Method::Push,
            "pop" => Method::Pop,
            "join" => Method::Join,
            "indexOf" => Method::IndexOf,
            "includes" => Method::Includes,
            "slice" => Method::Slice,
            "toUpperCase" => Method::ToUpperCase,
            "toLowerCase" => Method::ToLowerCase,
            "trim" => Method::Trim,
            "charAt" => Method::CharAt,
            "toFixed" => Method::ToFixed,
            "toString" => Method::ToString,
            _ => return None,
        };
        Some(method)
    }

    fn name(self) -> &'static str {
        match self {
            Method::Push => "push",
            Method::Pop => "pop",
            Method::Join => "join",
            Method::IndexOf => "indexOf",
            Method::Includes => "includes",
            Method::Slice => "slice",
            Method::ToUpperCase => "toUpperCase",
            Method::ToLowerCase => "toLowerCase",
            Method::Trim => "trim",
            Method::CharAt => "charAt",
            Method::ToFixed => "toFixed",
            Method::ToString => "toString",
        }
    }

    fn on_array(self) -> bool {
        matches!(
            self,
            Method::Push
                | Method::Pop
                | Method::Join
                | Method::IndexOf
                | Method::Includes
                | Method::Slice
                | Method::ToString
        )
    }

    fn on_string(self) -> bool {
        matches!(
            self,
            Method::IndexOf
                | Method::Includes
                | Method::Slice
                | Method::ToUpperCase
                | Method::ToLowerCase
                | Method::Trim
                | Method::CharAt
                | Method::ToString
        )
    }
}

#[derive(Debug)]
enum Callable {
    Closure { func: Rc<Function>, scope: ScopeId },
    Math(MathFn),
    Method { receiver: Value, method: Method },
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Callee of a call expression. Built-in methods are dispatched directly
/// instead of allocating a bound function.
enum CallTarget {
    Value(Value),
    Method(Value, Method),
}

enum Reference {
    Binding(String),
    Property(Value, String),
}

pub struct Interpreter {
    limits: ExecutionLimits,
    scopes: Vec<Scope>,
    objects: Vec<HeapObject>,
    /// Slots held by `objects`; the arena is never compacted
    heap_slots: usize,
    callables: Vec<Callable>,
    strict: bool,
    steps: u64,
    next_clock_check: u64,
    depth: usize,
    closures_created: usize,
    completion: Value,
    started: Instant,
}

impl Interpreter {
    pub fn new(limits: ExecutionLimits) -> Self {
        let mut interpreter = Self {
            limits,
            scopes: vec![Scope::default()],
            objects: Vec::new(),
            heap_slots: 0,
            callables: Vec::new(),
            strict: false,
            steps: 0,
            next_clock_check: CLOCK_INTERVAL,
            depth: 0,
            closures_created: 0,
            completion: Value::Undefined,
            started: Instant::now(),
        };
        interpreter.install_globals();
        interpreter
    }

    fn install_globals(&mut self) {
        self.declare(GLOBAL_SCOPE, "undefined", Value::Undefined, false);
        self.declare(GLOBAL_SCOPE, "NaN", Value::Number(f64::NAN), false);
        self.declare(GLOBAL_SCOPE, "Infinity", Value::Number(f64::INFINITY), false);

        let mut math = vec![
            ("PI".to_string(), Value::Number(std::f64::consts::PI)),
            ("E".to_string(), Value::Number(std::f64::consts::E)),
        ];
        for f in MathFn::ALL {
            let id = self.callables.len();
            self.callables.push(Callable::Math(f));
            math.push((f.name().to_string(), Value::Function(id)));
        }
        let math = self.store(HeapObject::Plain(math));
        self.declare(GLOBAL_SCOPE, "Math", math, true);
    }

    /// Run a program and return its completion value: the value of the last
    /// expression statement evaluated outside any function.
    pub fn run(&mut self, program: &Program) -> Eval {
        self.strict = program.directives.iter().any(|d| d == "use strict");
        self.started = Instant::now();
        self.completion = Value::Undefined;

        self.hoist(&program.body, GLOBAL_SCOPE);
        self.exec_block(&program.body, GLOBAL_SCOPE)?;
        Ok(std::mem::replace(&mut self.completion, Value::Undefined))
    }

    /// `String(value)`.
    pub fn to_string(&self, value: &Value) -> Eval<String> {
        self.stringify(value, &mut Vec::new())
    }

    // ── metering ───────────────────────────────────────────────────

    fn tick(&mut self) -> Eval<()> {
        self.charge(1)
    }

    fn charge(&mut self, steps: u64) -> Eval<()> {
        self.steps = self.steps.saturating_add(steps);
        if self.steps > self.limits.max_steps {
            return Err(ExecutionError::StepLimit(self.limits.max_steps));
        }
        if self.steps >= self.next_clock_check {
            self.next_clock_check = self.steps.saturating_add(CLOCK_INTERVAL);
            if self.started.elapsed() > self.limits.timeout {
                return Err(ExecutionError::Timeout(self.limits.timeout.as_millis()));
            }
        }
        Ok(())
    }

    /// Meter a freshly built string by its size.
    fn charge_string(&mut self, value: &Value) -> Eval<()> {
        match value {
            Value::String(s) => self.charge((s.len() / BYTES_PER_STEP) as u64),
            _ => Ok(()),
        }
    }

    /// Account for `slots` new heap slots before they are filled.
    fn reserve(&mut self, slots: usize) -> Eval<()> {
        let total = self.heap_slots.saturating_add(slots);
        if total > self.limits.max_heap_slots {
            return Err(ExecutionError::HeapLimit(self.limits.max_heap_slots));
        }
        self.charge((slots / SLOTS_PER_STEP) as u64)?;
        self.heap_slots = total;
        Ok(())
    }

    fn release(&mut self, slots: usize) {
        self.heap_slots = self.heap_slots.saturating_sub(slots);
    }

    fn check_length(&self, s: String) -> Eval<String> {
        if s.len() > self.limits.max_string_length {
            Err(ExecutionError::runtime("Invalid string length"))
        } else {
            Ok(s)
        }
    }

    // ── arenas ─────────────────────────────────────────────────────

    fn alloc(&mut self, object: HeapObject) -> Eval {
        self.reserve(object.slots())?;
        Ok(self.store(object))
    }

    /// Push without accounting; callers reserve first.
    fn store(&mut self, object: HeapObject) -> Value {
        self.objects.push(object);
        Value::Object(self.objects.len() - 1)
    }

    fn new_scope(&mut self, parent: ScopeId) -> ScopeId {
        self.scopes.push(Scope {
            parent: Some(parent),
            bindings: HashMap::new(),
        });
        self.scopes.len() - 1
    }

    /// Drop scopes created since `mark` unless a closure may have captured one.
    fn reclaim(&mut self, (scopes, closures): (usize, usize)) {
        if self.closures_created == closures {
            self.scopes.truncate(scopes);
        }
    }

    fn mark(&self) -> (usize, usize) {
        (self.scopes.len(), self.closures_created)
    }

    fn make_closure(&mut self, func: Rc<Function>, scope: ScopeId) -> Value {
        self.closures_created += 1;
        self.callables.push(Callable::Closure { func, scope });
        Value::Function(self.callables.len() - 1)
    }

    fn bind_method(&mut self, receiver: Value, method: Method) -> Value {
        self.callables.push(Callable::Method { receiver, method });
        Value::Function(self.callables.len() - 1)
    }

    // ── bindings ───────────────────────────────────────────────────

    fn declare(&mut self, scope: ScopeId, name: &str, value: Value, mutable: bool) {
        self.scopes[scope]
            .bindings
            .insert(name.to_string(), Binding { value, mutable });
    }

    fn find(&self, scope: ScopeId, name: &str) -> Option<ScopeId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            if self.scopes[id].bindings.contains_key(name) {
                return Some(id);
            }
            current = self.scopes[id].parent;
        }
        None
    }

    fn lookup(&self, scope: ScopeId, name: &str) -> Eval {
        self.find(scope, name)
            .and_then(|id| self.scopes[id].bindings.get(name))
            .map(|binding| binding.value.clone())
            .ok_or_else(|| ExecutionError::runtime(format!("{name} is not defined")))
    }

    fn assign(&mut self, scope: ScopeId, name: &str, value: Value) -> Eval<()> {
        let Some(id) = self.find(scope, name) else {
            if self.strict {
                return Err(ExecutionError::runtime(format!("{name} is not defined")));
            }
            self.declare(GLOBAL_SCOPE, name, value, true);
            return Ok(());
        };
        if let Some(binding) = self.scopes[id].bindings.get_mut(name) {
            if !binding.mutable {
                return Err(ExecutionError::runtime("Assignment to constant variable."));
            }
            binding.value = value;
        }
        Ok(())
    }

    fn hoist(&mut self, body: &[Stmt], scope: ScopeId) {
        for name in var_declared_names(body) {
            if !self.scopes[scope].bindings.contains_key(name) {
                self.declare(scope, name, Value::Undefined, true);
            }
        }
        self.hoist_functions(body, scope);
    }

    fn hoist_functions(&mut self, body: &[Stmt], scope: ScopeId) {
        for stmt in body {
            if let Stmt::Function(func) = stmt {
                if let Some(name) = &func.name {
                    let closure = self.make_closure(func.clone(), scope);
                    self.declare(scope, name, closure, true);
                }
            }
        }
    }

    // ── statements ─────────────────────────────────────────────────

    fn exec_block(&mut self, body: &[Stmt], scope: ScopeId) -> Eval<Flow> {
        for stmt in body {
            match self.exec(stmt, scope)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, scope: ScopeId) -> Eval<Flow> {
        self.tick()?;
        match stmt {
            Stmt::Expr(expr) => {
                let value = self.eval(expr, scope)?;
                if self.depth == 0 {
                    self.completion = value;
                }
            }
            Stmt::VarDecl { kind, decls } => {
                for decl in decls {
                    let value = match &decl.init {
                        Some(init) => Some(self.eval(init, scope)?),
                        None => None,
                    };
                    match (kind, value) {
                        (VarKind::Var, Some(value)) => self.assign(scope, &decl.name, value)?,
                        (VarKind::Var, None) => {}
                        (kind, value) => self.declare(
                            scope,
                            &decl.name,
                            value.unwrap_or(Value::Undefined),
                            *kind == VarKind::Let,
                        ),
                    }
                }
            }
            Stmt::Function(_) | Stmt::Empty => {}
            Stmt::Return(arg) => {
                let value = match arg {
                    Some(arg) => self.eval(arg, scope)?,
                    None => Value::Undefined,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, scope)?.truthy() {
                    return self.exec(consequent, scope);
                }
                if let Some(alternate) = alternate {
                    return self.exec(alternate, scope);
                }
            }
            Stmt::While { test, body } => loop {
                self.tick()?;
                if !self.eval(test, scope)?.truthy() {
                    break;
                }
                match self.exec(body, scope)? {
                    Flow::Break => break,
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            Stmt::For {
                init,
                test,
                update,
                body,
            } => return self.exec_for(init.as_deref(), test.as_ref(), update.as_ref(), body, scope),
            Stmt::Block(body) => {
                let lexical = body.iter().any(|stmt| {
                    matches!(
                        stmt,
                        Stmt::Function(_)
                            | Stmt::VarDecl {
                                kind: VarKind::Let | VarKind::Const,
                                ..
                            }
                    )
                });
                if !lexical {
                    return self.exec_block(body, scope);
                }
                let mark = self.mark();
                let block_scope = self.new_scope(scope);
                self.hoist_functions(body, block_scope);
                let flow = self.exec_block(body, block_scope);
                self.reclaim(mark);
                return flow;
            }
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
            Stmt::Throw(arg) => {
                let value = self.eval(arg, scope)?;
                return Err(ExecutionError::Thrown(self.thrown_message(&value)?));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
        scope: ScopeId,
    ) -> Eval<Flow> {
        let lexical = matches!(
            init,
            Some(Stmt::VarDecl {
                kind: VarKind::Let | VarKind::Const,
                ..
            })
        );
        let loop_scope = if lexical { self.new_scope(scope) } else { scope };

        if let Some(init) = init {
            self.exec(init, loop_scope)?;
        }
        loop {
            self.tick()?;
            if let Some(test) = test {
                if !self.eval(test, loop_scope)?.truthy() {
                    break;
                }
            }
            match self.exec(body, loop_scope)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
            if let Some(update) = update {
                self.eval(update, loop_scope)?;
            }
        }
        Ok(Flow::Normal)
    }

    /// Message reported for an uncaught `throw`.
    fn thrown_message(&self, value: &Value) -> Eval<String> {
        if let Value::Object(id) = value {
            if let HeapObject::Plain(props) = &self.objects[*id] {
                if let Some((_, message)) = props.iter().find(|(k, _)| k == "message") {
                    return self.to_string(message);
                }
            }
        }
        self.to_string(value)
    }

    // ── expressions ────────────────────────────────────────────────

    fn eval(&mut self, expr: &Expr, scope: ScopeId) -> Eval {
        self.tick()?;
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::String(s) => Ok(Value::string(s.as_str())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Ident(name) => self.lookup(scope, name),
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, scope)?);
                }
                self.alloc(HeapObject::Array(values))
            }
            Expr::Object(entries) => {
                let mut props: Vec<(String, Value)> = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    let value = self.eval(value, scope)?;
                    set_own(&mut props, key, value);
                }
                self.alloc(HeapObject::Plain(props))
            }
            Expr::Function(func) => Ok(self.function_value(func, scope)),
            Expr::Unary { op, arg } => self.eval_unary(*op, arg, scope),
            Expr::Update { op, prefix, target } => {
                let reference = self.reference(target, scope)?;
                let current = self.get_reference(&reference, scope)?;
                let old = self.to_number(&current)?;
                let new = match op {
                    UpdateOp::Increment => old + 1.0,
                    UpdateOp::Decrement => old - 1.0,
                };
                self.put_reference(&reference, Value::Number(new), scope)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                let value = self.binary(*op, &left, &right)?;
                self.charge_string(&value)?;
                Ok(value)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, scope)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.truthy(),
                    LogicalOp::Or => left.truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Assign { op, target, value } => {
                let reference = self.reference(target, scope)?;
                let value = match op.binary() {
                    None => self.eval(value, scope)?,
                    Some(binary) => {
                        let current = self.get_reference(&reference, scope)?;
                        let rhs = self.eval(value, scope)?;
                        let value = self.binary(binary, &current, &rhs)?;
                        self.charge_string(&value)?;
                        value
                    }
                };
                self.put_reference(&reference, value.clone(), scope)?;
                Ok(value)
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(consequent, scope)
                } else {
                    self.eval(alternate, scope)
                }
            }
            Expr::Call { callee, args } => self.eval_call(callee, args, scope),
            Expr::Member { object, property } => {
                let object = self.eval(object, scope)?;
                let key = self.property_key(property, scope)?;
                self.get_property(&object, &key)
            }
        }
    }

    fn function_value(&mut self, func: &Rc<Function>, scope: ScopeId) -> Value {
        match (&func.name, func.is_arrow) {
            // a named function expression sees its own name
            (Some(name), false) => {
                let own = self.new_scope(scope);
                let closure = self.make_closure(func.clone(), own);
                self.declare(own, name, closure.clone(), false);
                closure
            }
            _ => self.make_closure(func.clone(), scope),
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, arg: &Expr, scope: ScopeId) -> Eval {
        if op == UnaryOp::Typeof {
            if let Expr::Ident(name) = arg {
                if self.find(scope, name).is_none() {
                    return Ok(Value::string("undefined"));
                }
            }
        }
        let value = self.eval(arg, scope)?;
        Ok(match op {
            UnaryOp::Not => Value::Bool(!value.truthy()),
            UnaryOp::Neg => Value::Number(-self.to_number(&value)?),
            UnaryOp::Plus => Value::Number(self.to_number(&value)?),
            UnaryOp::Typeof => Value::string(value.type_of()),
        })
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], scope: ScopeId) -> Eval {
        let target = match callee {
            Expr::Member { object, property } => {
                let receiver = self.eval(object, scope)?;
                let key = self.property_key(property, scope)?;
                match self.method_of(&receiver, &key) {
                    Some(method) => CallTarget::Method(receiver, method),
                    None => CallTarget::Value(self.get_property(&receiver, &key)?),
                }
            }
            _ => CallTarget::Value(self.eval(callee, scope)?),
        };

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, scope)?);
        }

        match target {
            CallTarget::Value(Value::Function(id)) => self.call(id, values),
            CallTarget::Value(_) => Err(ExecutionError::runtime(format!(
                "{} is not a function",
                emit_expression(callee)
            ))),
            CallTarget::Method(receiver, method) => self.call_method(receiver, method, values),
        }
    }

    fn call(&mut self, id: FunctionId, args: Vec<Value>) -> Eval {
        match &self.callables[id] {
            Callable::Closure { func, scope } => {
                let (func, scope) = (func.clone(), *scope);
                self.call_closure(&func, scope, args)
            }
            Callable::Math(f) => {
                let f = *f;
                self.call_math(f, &args)
            }
            Callable::Method { receiver, method } => {
                let (receiver, method) = (receiver.clone(), *method);
                self.call_method(receiver, method, args)
            }
        }
    }

    fn call_closure(&mut self, func: &Function, scope: ScopeId, args: Vec<Value>) -> Eval {
        if self.depth >= self.limits.max_call_depth {
            return Err(ExecutionError::StackOverflow);
        }

        let mark = self.mark();
        let frame = self.new_scope(scope);
        let mut args = args.into_iter();
        for param in &func.params {
            let value = args.next().unwrap_or(Value::Undefined);
            self.declare(frame, param, value, true);
        }

        self.depth += 1;
        let result = match &func.body {
            FunctionBody::Block(body) => {
                self.hoist(body, frame);
                self.exec_block(body, frame).map(|flow| match flow {
                    Flow::Return(value) => value,
                    _ => Value::Undefined,
                })
            }
            FunctionBody::Expr(expr) => self.eval(expr, frame),
        };
        self.depth -= 1;
        self.reclaim(mark);
        result
    }

    fn call_math(&self, f: MathFn, args: &[Value]) -> Eval {
        let mut numbers = Vec::with_capacity(args.len());
        for arg in args {
            numbers.push(self.to_number(arg)?);
        }
        let arg = |i: usize| numbers.get(i).copied().unwrap_or(f64::NAN);

        let result = match f {
            MathFn::Abs => arg(0).abs(),
            MathFn::Floor => arg(0).floor(),
            MathFn::Ceil => arg(0).ceil(),
            MathFn::Round => js_round(arg(0)),
            MathFn::Sqrt => arg(0).sqrt(),
            MathFn::Pow => js_pow(arg(0), arg(1)),
            MathFn::Trunc => arg(0).trunc(),
            MathFn::Sign => {
                let n = arg(0);
                if n.is_nan() || n == 0.0 {
                    n
                } else {
                    n.signum()
                }
            }
            MathFn::Min => numbers.iter().fold(f64::INFINITY, |acc, &n| {
                if acc.is_nan() || n.is_nan() {
                    f64::NAN
                } else {
                    acc.min(n)
                }
            }),
            MathFn::Max => numbers.iter().fold(f64::NEG_INFINITY, |acc, &n| {
                if acc.is_nan() || n.is_nan() {
                    f64::NAN
                } else {
                    acc.max(n)
                }
            }),
        };
        Ok(Value::Number(result))
    }

    fn call_method(&mut self, receiver: Value, method: Method, args: Vec<Value>) -> Eval {
        let result = self.dispatch_method(receiver, method, args)?;
        self.charge_string(&result)?;
        Ok(result)
    }

    fn dispatch_method(&mut self, receiver: Value, method: Method, args: Vec<Value>) -> Eval {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Undefined);

        match (&receiver, method) {
            (Value::Object(id), _) if matches!(self.objects[*id], HeapObject::Array(_)) => {
                self.call_array_method(*id, method, &args)
            }
            (Value::String(s), Method::IndexOf) => {
                let needle = self.to_string(&arg(0))?;
                let index = s
                    .find(needle.as_str())
                    .map_or(-1.0, |byte| s[..byte].chars().count() as f64);
                Ok(Value::Number(index))
            }
            (Value::String(s), Method::Includes) => {
                let needle = self.to_string(&arg(0))?;
                Ok(Value::Bool(s.contains(needle.as_str())))
            }
            (Value::String(s), Method::Slice) => {
                let chars: Vec<char> = s.chars().collect();
                let (start, end) = self.slice_bounds(&args, chars.len())?;
                Ok(Value::string(chars[start..end].iter().collect::<String>()))
            }
            (Value::String(s), Method::ToUpperCase) => Ok(Value::string(s.to_uppercase())),
            (Value::String(s), Method::ToLowerCase) => Ok(Value::string(s.to_lowercase())),
            (Value::String(s), Method::Trim) => Ok(Value::string(s.trim())),
            (Value::String(s), Method::CharAt) => {
                let index = to_integer(self.to_number(&arg(0))?);
                let found = if index >= 0.0 {
                    s.chars().nth(index as usize)
                } else {
                    None
                };
                Ok(Value::string(found.map(String::from).unwrap_or_default()))
            }
            (Value::Number(n), Method::ToFixed) => {
                let digits = to_integer(self.to_number(&arg(0))?);
                if !(0.0..=100.0).contains(&digits) {
                    return Err(ExecutionError::runtime(
                        "toFixed() digits argument must be between 0 and 100",
                    ));
                }
                let text = if n.is_finite() && n.abs() < 1e21 {
                    format!("{:.*}", digits as usize, n)
                } else {
                    number_to_string(*n)
                };
                Ok(Value::string(text))
            }
            (_, Method::ToString) => match &receiver {
                Value::Object(_) => Ok(Value::string("[object Object]")),
                other => Ok(Value::string(self.to_string(other)?)),
            },
            _ => Err(ExecutionError::runtime(format!(
                "{} is not a function",
                method.name()
            ))),
        }
    }

    fn call_array_method(&mut self, id: ObjectId, method: Method, args: &[Value]) -> Eval {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Undefined);

        match method {
            Method::Push => {
                let len = match &self.objects[id] {
                    HeapObject::Array(items) => items.len(),
                    HeapObject::Plain(_) => return Ok(Value::Undefined),
                };
                if len + args.len() > MAX_ARRAY_LENGTH {
                    return Err(ExecutionError::runtime("Invalid array length"));
                }
                self.reserve(args.len())?;
                let HeapObject::Array(items) = &mut self.objects[id] else {
                    return Ok(Value::Undefined);
                };
                items.extend(args.iter().cloned());
                Ok(Value::Number(items.len() as f64))
            }
            Method::Pop => {
                let popped = match &mut self.objects[id] {
                    HeapObject::Array(items) => items.pop(),
                    HeapObject::Plain(_) => None,
                };
                match popped {
                    Some(value) => {
                        self.release(1);
                        Ok(value)
                    }
                    None => Ok(Value::Undefined),
                }
            }
            Method::Join | Method::ToString => {
                let separator = match arg(0) {
                    Value::Undefined => ",".to_string(),
                    sep if method == Method::Join => self.to_string(&sep)?,
                    _ => ",".to_string(),
                };
                let joined = self.join(id, &separator, &mut Vec::new())?;
                Ok(Value::string(joined))
            }
            Method::IndexOf | Method::Includes => {
                let needle = arg(0);
                let HeapObject::Array(items) = &self.objects[id] else {
                    return Ok(Value::Undefined);
                };
                if method == Method::Includes {
                    Ok(Value::Bool(items.iter().any(|v| v.same_value_zero(&needle))))
                } else {
                    let index = items
                        .iter()
                        .position(|v| v.strict_equals(&needle))
                        .map_or(-1.0, |i| i as f64);
                    Ok(Value::Number(index))
                }
            }
            Method::Slice => {
                let len = match &self.objects[id] {
                    HeapObject::Array(items) => items.len(),
                    HeapObject::Plain(_) => 0,
                };
                let (start, end) = self.slice_bounds(args, len)?;
                self.reserve(end - start)?;
                let sliced = match &self.objects[id] {
                    HeapObject::Array(items) => items[start..end].to_vec(),
                    HeapObject::Plain(_) => Vec::new(),
                };
                Ok(self.store(HeapObject::Array(sliced)))
            }
            _ => Err(ExecutionError::runtime(format!(
                "{} is not a function",
                method.name()
            ))),
        }
    }

    /// Resolve `slice(start, end)` arguments against a length.
    fn slice_bounds(&self, args: &[Value], len: usize) -> Eval<(usize, usize)> {
        let resolve = |value: Option<&Value>, default: usize| -> Eval<usize> {
            let n = match value {
                None | Some(Value::Undefined) => return Ok(default),
                Some(v) => to_integer(self.to_number(v)?),
            };
            let len = len as f64;
            Ok(if n < 0.0 {
                (len + n).max(0.0) as usize
            } else {
                n.min(len) as usize
            })
        };
        let start = resolve(args.first(), 0)?;
        let end = resolve(args.get(1), len)?;
        Ok((start, end.max(start)))
    }

    // ── references and properties ──────────────────────────────────

    fn reference(&mut self, target: &Expr, scope: ScopeId) -> Eval<Reference> {
        match target {
            Expr::Ident(name) => Ok(Reference::Binding(name.clone())),
            Expr::Member { object, property } => {
                let object = self.eval(object, scope)?;
                let key = self.property_key(property, scope)?;
                Ok(Reference::Property(object, key))
            }
            _ => Err(ExecutionError::runtime("Invalid assignment target")),
        }
    }

    fn get_reference(&mut self, reference: &Reference, scope: ScopeId) -> Eval {
        match reference {
            Reference::Binding(name) => self.lookup(scope, name),
            Reference::Property(object, key) => self.get_property(object, key),
        }
    }

    fn put_reference(&mut self, reference: &Reference, value: Value, scope: ScopeId) -> Eval<()> {
        match reference {
            Reference::Binding(name) => self.assign(scope, name, value),
            Reference::Property(object, key) => self.set_property(object, key, value),
        }
    }

    fn property_key(&mut self, property: &MemberProp, scope: ScopeId) -> Eval<String> {
        match property {
            MemberProp::Named(name) => Ok(name.clone()),
            MemberProp::Computed(expr) => {
                let key = self.eval(expr, scope)?;
                self.to_string(&key)
            }
        }
    }

    /// Built-in method reachable as `receiver[key]`, if no own property shadows it.
    fn method_of(&self, receiver: &Value, key: &str) -> Option<Method> {
        let method = Method::parse(key)?;
        let available = match receiver {
            Value::Object(id) => match &self.objects[*id] {
                HeapObject::Array(_) => method.on_array(),
                HeapObject::Plain(props) => {
                    method == Method::ToString && !props.iter().any(|(k, _)| k == key)
                }
            },
            Value::String(_) => method.on_string(),
            Value::Number(_) => matches!(method, Method::ToFixed | Method::ToString),
            Value::Bool(_) | Value::Function(_) => method == Method::ToString,
            Value::Undefined | Value::Null => false,
        };
        available.then_some(method)
    }

    fn get_property(&mut self, object: &Value, key: &str) -> Eval {
        if let Some(method) = self.method_of(object, key) {
            return Ok(self.bind_method(object.clone(), method));
        }

        let value = match object {
            Value::Undefined | Value::Null => {
                return Err(ExecutionError::runtime(format!(
                    "Cannot read properties of {} (reading '{key}')",
                    self.to_string(object)?
                )));
            }
            Value::Object(id) => match &self.objects[*id] {
                HeapObject::Array(items) if key == "length" => Value::Number(items.len() as f64),
                HeapObject::Array(items) => array_index(key)
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or(Value::Undefined),
                HeapObject::Plain(props) => props
                    .iter()
                    .find(|(k, _)| k == key)
                    .map_or(Value::Undefined, |(_, v)| v.clone()),
            },
            Value::String(s) if key == "length" => Value::Number(s.chars().count() as f64),
            Value::String(s) => array_index(key)
                .and_then(|i| s.chars().nth(i))
                .map_or(Value::Undefined, |c| Value::string(c.to_string())),
            Value::Function(id) => match (&self.callables[*id], key) {
                (Callable::Closure { func, .. }, "name") => {
                    Value::string(func.name.clone().unwrap_or_default())
                }
                (Callable::Closure { func, .. }, "length") => Value::Number(func.params.len() as f64),
                (Callable::Math(f), "name") => Value::string(f.name()),
                (Callable::Math(f), "length") => Value::Number(f.arity() as f64),
                (Callable::Method { method, .. }, "name") => Value::string(method.name()),
                _ => Value::Undefined,
            },
            Value::Bool(_) | Value::Number(_) => Value::Undefined,
        };
        Ok(value)
    }

    fn set_property(&mut self, object: &Value, key: &str, value: Value) -> Eval<()> {
        match object {
            Value::Undefined | Value::Null => Err(ExecutionError::runtime(format!(
                "Cannot set properties of {} (setting '{key}')",
                self.to_string(object)?
            ))),
            Value::Object(id) => {
                let id = *id;
                match &self.objects[id] {
                    HeapObject::Array(items) => {
                        let len = items.len();
                        self.set_array_slot(id, len, key, value)
                    }
                    HeapObject::Plain(props) => {
                        if !props.iter().any(|(k, _)| k == key) {
                            self.reserve(1)?;
                        }
                        if let HeapObject::Plain(props) = &mut self.objects[id] {
                            set_own(props, key, value);
                        }
                        Ok(())
                    }
                }
            }
            Value::Function(_) => Ok(()),
            primitive if self.strict => Err(ExecutionError::runtime(format!(
                "Cannot create property '{key}' on {} '{}'",
                primitive.type_of(),
                self.to_string(primitive)?
            ))),
            _ => Ok(()),
        }
    }

    /// `array.length = n` or `array[i] = v`; named properties are ignored.
    fn set_array_slot(&mut self, id: ObjectId, len: usize, key: &str, value: Value) -> Eval<()> {
        let (target, index) = if key == "length" {
            let length = self.to_number(&value)?;
            if length < 0.0 || length.fract() != 0.0 || length > MAX_ARRAY_LENGTH as f64 {
                return Err(ExecutionError::runtime("Invalid array length"));
            }
            (length as usize, None)
        } else if let Some(index) = array_index(key) {
            if index >= MAX_ARRAY_LENGTH {
                return Err(ExecutionError::runtime("Invalid array length"));
            }
            (len.max(index + 1), Some(index))
        } else {
            return Ok(());
        };

        if target > len {
            self.reserve(target - len)?;
        } else {
            self.release(len - target);
        }
        if let HeapObject::Array(items) = &mut self.objects[id] {
            items.resize(target, Value::Undefined);
            if let Some(index) = index {
                items[index] = value;
            }
        }
        Ok(())
    }

    // ── conversions and operators ──────────────────────────────────

    fn stringify(&self, value: &Value, seen: &mut Vec<ObjectId>) -> Eval<String> {
        let text = match value {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::String(s) => s.to_string(),
            Value::Function(id) => match &self.callables[*id] {
                Callable::Closure { func, .. } => emit_function(func),
                Callable::Math(f) => format!("function {}() {{ [native code] }}", f.name()),
                Callable::Method { method, .. } => {
                    format!("function {}() {{ [native code] }}", method.name())
                }
            },
            Value::Object(id) => match &self.objects[*id] {
                HeapObject::Plain(_) => "[object Object]".to_string(),
                HeapObject::Array(_) => self.join(*id, ",", seen)?,
            },
        };
        Ok(text)
    }

    /// `Array.prototype.join`; arrays already being joined render as empty.
    fn join(&self, id: ObjectId, separator: &str, seen: &mut Vec<ObjectId>) -> Eval<String> {
        let HeapObject::Array(items) = &self.objects[id] else {
            return Ok(String::new());
        };
        if seen.contains(&id) {
            return Ok(String::new());
        }
        if seen.len() >= self.limits.max_nesting_depth {
            return Err(ExecutionError::StackOverflow);
        }
        seen.push(id);
        let mut out = String::new();
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.push_str(separator);
            }
            if !item.is_nullish() {
                out.push_str(&self.stringify(item, seen)?);
            }
            if out.len() > self.limits.max_string_length {
                return Err(ExecutionError::runtime("Invalid string length"));
            }
        }
        seen.pop();
        Ok(out)
    }

    fn to_primitive(&self, value: &Value) -> Eval {
        match value {
            Value::Object(_) | Value::Function(_) => Ok(Value::string(self.to_string(value)?)),
            other => Ok(other.clone()),
        }
    }

    fn to_number(&self, value: &Value) -> Eval<f64> {
        Ok(self.to_primitive(value)?.to_number())
    }

    fn binary(&self, op: BinaryOp, left: &Value, right: &Value) -> Eval {
        let value = match op {
            BinaryOp::Add => {
                let left = self.to_primitive(left)?;
                let right = self.to_primitive(right)?;
                if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
                    let mut joined = self.to_string(&left)?;
                    joined.push_str(&self.to_string(&right)?);
                    Value::string(self.check_length(joined)?)
                } else {
                    Value::Number(left.to_number() + right.to_number())
                }
            }
            BinaryOp::Sub => Value::Number(self.to_number(left)? - self.to_number(right)?),
            BinaryOp::Mul => Value::Number(self.to_number(left)? * self.to_number(right)?),
            BinaryOp::Div => Value::Number(self.to_number(left)? / self.to_number(right)?),
            BinaryOp::Rem => Value::Number(self.to_number(left)? % self.to_number(right)?),
            BinaryOp::Exp => Value::Number(js_pow(self.to_number(left)?, self.to_number(right)?)),
            BinaryOp::Eq => Value::Bool(self.loose_equals(left, right)?),
            BinaryOp::NotEq => Value::Bool(!self.loose_equals(left, right)?),
            BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
            BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
            BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
                Value::Bool(self.compare(op, left, right)?)
            }
        };
        Ok(value)
    }

    fn compare(&self, op: BinaryOp, left: &Value, right: &Value) -> Eval<bool> {
        let left = self.to_primitive(left)?;
        let right = self.to_primitive(right)?;
        if let (Value::String(a), Value::String(b)) = (&left, &right) {
            return Ok(match op {
                BinaryOp::Lt => a < b,
                BinaryOp::Lte => a <= b,
                BinaryOp::Gt => a > b,
                _ => a >= b,
            });
        }
        let (a, b) = (left.to_number(), right.to_number());
        Ok(match op {
            BinaryOp::Lt => a < b,
            BinaryOp::Lte => a <= b,
            BinaryOp::Gt => a > b,
            _ => a >= b,
        })
    }

    /// `==` with the usual primitive coercions.
    fn loose_equals(&self, left: &Value, right: &Value) -> Eval<bool> {
        use Value::*;
        let equal = match (left, right) {
            (Undefined | Null, Undefined | Null) => true,
            (Undefined | Null, _) | (_, Undefined | Null) => false,
            (Number(n), String(s)) | (String(s), Number(n)) => *n == string_to_number(s),
            (Bool(_), _) => self.loose_equals(&Number(left.to_number()), right)?,
            (_, Bool(_)) => self.loose_equals(left, &Number(right.to_number()))?,
            (Object(_) | Function(_), Number(_) | String(_)) => {
                self.loose_equals(&self.to_primitive(left)?, right)?
            }
            (Number(_) | String(_), Object(_) | Function(_)) => {
                self.loose_equals(left, &self.to_primitive(right)?)?
            }
            _ => left.strict_equals(right),
        };
        Ok(equal)
    }
}

fn set_own(props: &mut Vec<(String, Value)>, key: &str, value: Value) {
    match props.iter_mut().find(|(k, _)| k == key) {
        Some((_, slot)) => *slot = value,
        None => props.push((key.to_string(), value)),
    }
}

/// Canonical array index (`"3"` but not `"03"` or `"3.0"`).
fn array_index(key: &str) -> Option<usize> {
    let index: usize = key.parse().ok()?;
    (index.to_string() == key).then_some(index)
}

/// `Math.round`: halves round towards positive infinity.
fn js_round(n: f64) -> f64 {
    if !n.is_finite() {
        return n;
    }
    let floor = n.floor();
    if n - floor >= 0.5 {
        floor + 1.0
    } else {
        floor
    }
}

fn js_pow(base: f64, exponent: f64) -> f64 {
    if exponent.is_nan() || (base.abs() == 1.0 && exponent.is_infinite()) {
        f64::NAN
    } else {
        base.powf(exponent)
    }
}
