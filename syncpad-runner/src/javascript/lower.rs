//! ES2015 → ES5 lowering.
//!
//! * arrow functions become `function` expressions with a block body
//! * `let` / `const` become `var`; a block-scoped binding that would collide
//!   with a binding already visible is renamed (`x` → `_x`, `_x2`, ...)
//! * writes to a `const` binding are rejected
//! * anonymous functions bound to a variable or object key take that name
//! * the program always carries a `"use strict"` directive

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::error::TransformError;
use crate::javascript::ast::*;

const USE_STRICT: &str = "use strict";

pub fn lower(program: &Program) -> Result<Program, TransformError> {
    let mut used = HashSet::new();
    for stmt in &program.body {
        collect_stmt_names(stmt, &mut used);
    }

    let mut lowerer = Lowerer {
        scopes: Vec::new(),
        claimed: Vec::new(),
        used,
        loop_depth: 0,
    };

    lowerer.enter_function(&[], &program.body)?;
    let body = lowerer.lower_statements(&program.body)?;
    lowerer.exit_function();

    let mut directives = vec![USE_STRICT.to_string()];
    directives.extend(
        program
            .directives
            .iter()
            .filter(|d| d.as_str() != USE_STRICT)
            .cloned(),
    );
    Ok(Program { directives, body })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindingKind {
    Var,
    Let,
    Const,
    Param,
    Function,
}

#[derive(Debug)]
struct Binding {
    emitted: String,
    kind: BindingKind,
}

#[derive(Debug, Default)]
struct Scope {
    bindings: HashMap<String, Binding>,
}

struct Lowerer {
    scopes: Vec<Scope>,
    /// Emitted names occupying each open function's `var` namespace.
    claimed: Vec<HashSet<String>>,
    /// Every name in the program plus every generated one.
    used: HashSet<String>,
    loop_depth: usize,
}

impl Lowerer {
    // ── scopes ─────────────────────────────────────────────────────

    fn enter_function(&mut self, params: &[String], body: &[Stmt]) -> Result<(), TransformError> {
        self.scopes.push(Scope::default());
        self.claimed.push(HashSet::new());

        for param in params {
            self.bind(param, param.clone(), BindingKind::Param);
        }
        for name in var_declared_names(body) {
            if self.lookup_local(name).is_none() {
                self.bind(name, name.to_string(), BindingKind::Var);
            }
        }
        self.declare_block(body, true)
    }

    fn exit_function(&mut self) {
        self.scopes.pop();
        self.claimed.pop();
    }

    fn bind(&mut self, name: &str, emitted: String, kind: BindingKind) {
        if let Some(claimed) = self.claimed.last_mut() {
            claimed.insert(emitted.clone());
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.bindings.insert(name.to_string(), Binding { emitted, kind });
        }
    }

    fn lookup_local(&self, name: &str) -> Option<&Binding> {
        self.scopes.last().and_then(|s| s.bindings.get(name))
    }

    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|s| s.bindings.get(name))
    }

    fn resolve(&self, name: &str) -> String {
        self.lookup(name)
            .map_or_else(|| name.to_string(), |b| b.emitted.clone())
    }

    /// Declare the `let`/`const`/function bindings that live directly in a block.
    fn declare_block(&mut self, body: &[Stmt], function_level: bool) -> Result<(), TransformError> {
        for stmt in body {
            match stmt {
                Stmt::VarDecl { kind, decls } if *kind != VarKind::Var => {
                    let binding_kind = if *kind == VarKind::Const {
                        BindingKind::Const
                    } else {
                        BindingKind::Let
                    };
                    for decl in decls {
                        self.declare_lexical(&decl.name, binding_kind, function_level)?;
                    }
                }
                Stmt::Function(func) => {
                    if let Some(name) = &func.name {
                        if let Some(existing) = self.lookup_local(name) {
                            if matches!(existing.kind, BindingKind::Let | BindingKind::Const) {
                                return Err(already_declared(name));
                            }
                        }
                        self.bind(name, name.clone(), BindingKind::Function);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn declare_lexical(
        &mut self,
        name: &str,
        kind: BindingKind,
        function_level: bool,
    ) -> Result<(), TransformError> {
        if self.lookup_local(name).is_some() {
            return Err(already_declared(name));
        }

        let collides = self.claimed.last().is_some_and(|c| c.contains(name))
            || self.scopes.iter().any(|s| s.bindings.contains_key(name));
        let emitted = if function_level || !collides {
            name.to_string()
        } else {
            self.generate_name(name)
        };
        self.bind(name, emitted, kind);
        Ok(())
    }

    fn generate_name(&mut self, name: &str) -> String {
        let stem = match name.trim_start_matches('_') {
            "" => "ref",
            stem => stem,
        };
        let mut n = 1;
        loop {
            let candidate = if n == 1 {
                format!("_{stem}")
            } else {
                format!("_{stem}{n}")
            };
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    fn check_writable(&self, target: &Expr) -> Result<(), TransformError> {
        if let Expr::Ident(name) = target {
            if self.lookup(name).is_some_and(|b| b.kind == BindingKind::Const) {
                return Err(TransformError::invalid(format!("\"{name}\" is read-only")));
            }
        }
        Ok(())
    }

    // ── statements ─────────────────────────────────────────────────

    fn lower_statements(&mut self, body: &[Stmt]) -> Result<Vec<Stmt>, TransformError> {
        body.iter().map(|stmt| self.lower_stmt(stmt)).collect()
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<Stmt, TransformError> {
        let lowered = match stmt {
            Stmt::Expr(expr) => Stmt::Expr(self.lower_expr(expr)?),
            Stmt::VarDecl { kind, decls } => self.lower_var_decl(*kind, decls)?,
            Stmt::Function(func) => Stmt::Function(Rc::new(self.lower_function(func, None)?)),
            Stmt::Return(arg) => Stmt::Return(self.lower_opt(arg.as_ref())?),
            Stmt::If {
                test,
                consequent,
                alternate,
            } => Stmt::If {
                test: self.lower_expr(test)?,
                consequent: Box::new(self.lower_stmt(consequent)?),
                alternate: match alternate {
                    Some(alt) => Some(Box::new(self.lower_stmt(alt)?)),
                    None => None,
                },
            },
            Stmt::While { test, body } => {
                let test = self.lower_expr(test)?;
                let body = Box::new(self.lower_loop_body(body)?);
                Stmt::While { test, body }
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => self.lower_for(init.as_deref(), test.as_ref(), update.as_ref(), body)?,
            Stmt::Block(body) => {
                self.scopes.push(Scope::default());
                let lowered = self
                    .declare_block(body, false)
                    .and_then(|()| self.lower_statements(body));
                self.scopes.pop();
                Stmt::Block(lowered?)
            }
            Stmt::Break => Stmt::Break,
            Stmt::Continue => Stmt::Continue,
            Stmt::Throw(arg) => Stmt::Throw(self.lower_expr(arg)?),
            Stmt::Empty => Stmt::Empty,
        };
        Ok(lowered)
    }

    fn lower_var_decl(&mut self, kind: VarKind, decls: &[Declarator]) -> Result<Stmt, TransformError> {
        let mut lowered = Vec::with_capacity(decls.len());
        for decl in decls {
            let name = self.resolve(&decl.name);
            let init = match &decl.init {
                Some(init) => Some(self.lower_named(init, &name)?),
                // a loop body re-enters the block; reset the binding each time
                None if kind != VarKind::Var && self.loop_depth > 0 => {
                    Some(Expr::Ident("undefined".to_string()))
                }
                None => None,
            };
            lowered.push(Declarator { name, init });
        }
        Ok(Stmt::VarDecl {
            kind: VarKind::Var,
            decls: lowered,
        })
    }

    fn lower_for(
        &mut self,
        init: Option<&Stmt>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
    ) -> Result<Stmt, TransformError> {
        self.scopes.push(Scope::default());
        let lowered = self.lower_for_in_scope(init, test, update, body);
        self.scopes.pop();
        lowered
    }

    fn lower_for_in_scope(
        &mut self,
        init: Option<&Stmt>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
    ) -> Result<Stmt, TransformError> {
        let init = match init {
            Some(stmt) => {
                self.declare_block(std::slice::from_ref(stmt), false)?;
                Some(Box::new(self.lower_stmt(stmt)?))
            }
            None => None,
        };
        Ok(Stmt::For {
            init,
            test: self.lower_opt(test)?,
            update: self.lower_opt(update)?,
            body: Box::new(self.lower_loop_body(body)?),
        })
    }

    fn lower_loop_body(&mut self, body: &Stmt) -> Result<Stmt, TransformError> {
        self.loop_depth += 1;
        let lowered = self.lower_stmt(body);
        self.loop_depth -= 1;
        lowered
    }

    fn lower_function(
        &mut self,
        func: &Function,
        inferred_name: Option<&str>,
    ) -> Result<Function, TransformError> {
        let name = func.name.clone().or_else(|| {
            inferred_name
                .filter(|n| !function_mentions(func, n))
                .map(str::to_string)
        });

        // a function expression's own name is visible only inside it
        let own_scope = !func.is_arrow && func.name.is_some();
        if own_scope {
            self.scopes.push(Scope::default());
            if let Some(name) = &func.name {
                if let Some(scope) = self.scopes.last_mut() {
                    scope.bindings.insert(
                        name.clone(),
                        Binding {
                            emitted: name.clone(),
                            kind: BindingKind::Function,
                        },
                    );
                }
            }
        }

        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        let empty = Vec::new();
        let statements = match &func.body {
            FunctionBody::Block(body) => body,
            FunctionBody::Expr(_) => &empty,
        };

        let body = self
            .enter_function(&func.params, statements)
            .and_then(|()| match &func.body {
                FunctionBody::Block(body) => self.lower_statements(body),
                FunctionBody::Expr(expr) => Ok(vec![Stmt::Return(Some(self.lower_expr(expr)?))]),
            });
        self.exit_function();
        self.loop_depth = saved_loops;
        if own_scope {
            self.scopes.pop();
        }

        Ok(Function {
            name,
            params: func.params.clone(),
            body: FunctionBody::Block(body?),
            is_arrow: false,
        })
    }

    // ── expressions ────────────────────────────────────────────────

    fn lower_opt(&mut self, expr: Option<&Expr>) -> Result<Option<Expr>, TransformError> {
        expr.map(|e| self.lower_expr(e)).transpose()
    }

    fn lower_boxed(&mut self, expr: &Expr) -> Result<Box<Expr>, TransformError> {
        Ok(Box::new(self.lower_expr(expr)?))
    }

    /// Lower an expression bound to `name`, naming it if it is an anonymous function.
    fn lower_named(&mut self, expr: &Expr, name: &str) -> Result<Expr, TransformError> {
        match expr {
            Expr::Function(func) if func.name.is_none() && is_plain_identifier(name) => {
                Ok(Expr::Function(Rc::new(self.lower_function(func, Some(name))?)))
            }
            _ => self.lower_expr(expr),
        }
    }

    fn lower_expr(&mut self, expr: &Expr) -> Result<Expr, TransformError> {
        let lowered = match expr {
            Expr::Number(_) | Expr::String(_) | Expr::Bool(_) | Expr::Null => expr.clone(),
            Expr::Ident(name) => Expr::Ident(self.resolve(name)),
            Expr::Array(items) => Expr::Array(
                items
                    .iter()
                    .map(|item| self.lower_expr(item))
                    .collect::<Result<_, _>>()?,
            ),
            Expr::Object(entries) => {
                let mut lowered = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    lowered.push((key.clone(), self.lower_named(value, key)?));
                }
                Expr::Object(lowered)
            }
            Expr::Function(func) => Expr::Function(Rc::new(self.lower_function(func, None)?)),
            Expr::Unary { op, arg } => Expr::Unary {
                op: *op,
                arg: self.lower_boxed(arg)?,
            },
            Expr::Update { op, prefix, target } => {
                self.check_writable(target)?;
                Expr::Update {
                    op: *op,
                    prefix: *prefix,
                    target: self.lower_boxed(target)?,
                }
            }
            Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: self.lower_boxed(left)?,
                right: self.lower_boxed(right)?,
            },
            Expr::Logical { op, left, right } => Expr::Logical {
                op: *op,
                left: self.lower_boxed(left)?,
                right: self.lower_boxed(right)?,
            },
            Expr::Assign { op, target, value } => {
                self.check_writable(target)?;
                let target = self.lower_boxed(target)?;
                let value = match (&*target, op) {
                    (Expr::Ident(name), AssignOp::Assign) => Box::new(self.lower_named(value, name)?),
                    _ => self.lower_boxed(value)?,
                };
                Expr::Assign {
                    op: *op,
                    target,
                    value,
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => Expr::Conditional {
                test: self.lower_boxed(test)?,
                consequent: self.lower_boxed(consequent)?,
                alternate: self.lower_boxed(alternate)?,
            },
            Expr::Call { callee, args } => Expr::Call {
                callee: self.lower_boxed(callee)?,
                args: args
                    .iter()
                    .map(|arg| self.lower_expr(arg))
                    .collect::<Result<_, _>>()?,
            },
            Expr::Member { object, property } => Expr::Member {
                object: self.lower_boxed(object)?,
                property: match property {
                    MemberProp::Named(name) => MemberProp::Named(name.clone()),
                    MemberProp::Computed(key) => MemberProp::Computed(self.lower_boxed(key)?),
                },
            },
        };
        Ok(lowered)
    }
}

fn already_declared(name: &str) -> TransformError {
    TransformError::invalid(format!("Identifier '{name}' has already been declared"))
}

/// Identifier that can name a function (not a reserved word).
pub fn is_plain_identifier(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete",
        "do", "else", "enum", "export", "extends", "false", "finally", "for", "function", "if",
        "import", "in", "instanceof", "let", "new", "null", "return", "super", "switch", "this",
        "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
    ];
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$');
    valid_start
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        && !RESERVED.contains(&name)
}

fn function_mentions(func: &Function, name: &str) -> bool {
    let mut names = HashSet::new();
    collect_function_names(func, &mut names);
    names.contains(name)
}

fn collect_function_names(func: &Function, out: &mut HashSet<String>) {
    if let Some(name) = &func.name {
        out.insert(name.clone());
    }
    out.extend(func.params.iter().cloned());
    match &func.body {
        FunctionBody::Block(body) => body.iter().for_each(|s| collect_stmt_names(s, out)),
        FunctionBody::Expr(expr) => collect_expr_names(expr, out),
    }
}

fn collect_stmt_names(stmt: &Stmt, out: &mut HashSet<String>) {
    match stmt {
        Stmt::Expr(expr) | Stmt::Throw(expr) => collect_expr_names(expr, out),
        Stmt::VarDecl { decls, .. } => {
            for decl in decls {
                out.insert(decl.name.clone());
                if let Some(init) = &decl.init {
                    collect_expr_names(init, out);
                }
            }
        }
        Stmt::Function(func) => collect_function_names(func, out),
        Stmt::Return(arg) => {
            if let Some(arg) = arg {
                collect_expr_names(arg, out);
            }
        }
        Stmt::If {
            test,
            consequent,
            alternate,
        } => {
            collect_expr_names(test, out);
            collect_stmt_names(consequent, out);
            if let Some(alt) = alternate {
                collect_stmt_names(alt, out);
            }
        }
        Stmt::While { test, body } => {
            collect_expr_names(test, out);
            collect_stmt_names(body, out);
        }
        Stmt::For {
            init,
            test,
            update,
            body,
        } => {
            if let Some(init) = init {
                collect_stmt_names(init, out);
            }
            for expr in [test, update].into_iter().flatten() {
                collect_expr_names(expr, out);
            }
            collect_stmt_names(body, out);
        }
        Stmt::Block(body) => body.iter().for_each(|s| collect_stmt_names(s, out)),
        Stmt::Break | Stmt::Continue | Stmt::Empty => {}
    }
}

fn collect_expr_names(expr: &Expr, out: &mut HashSet<String>) {
    match expr {
        Expr::Number(_) | Expr::String(_) | Expr::Bool(_) | Expr::Null => {}
        Expr::Ident(name) => {
            out.insert(name.clone());
        }
        Expr::Array(items) => items.iter().for_each(|e| collect_expr_names(e, out)),
        Expr::Object(entries) => entries.iter().for_each(|(_, e)| collect_expr_names(e, out)),
        Expr::Function(func) => collect_function_names(func, out),
        Expr::Unary { arg, .. } => collect_expr_names(arg, out),
        Expr::Update { target, .. } => collect_expr_names(target, out),
        Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
            collect_expr_names(left, out);
            collect_expr_names(right, out);
        }
        Expr::Assign { target, value, .. } => {
            collect_expr_names(target, out);
            collect_expr_names(value, out);
        }
        Expr::Conditional {
            test,
            consequent,
            alternate,
        } => {
            collect_expr_names(test, out);
            collect_expr_names(consequent, out);
            collect_expr_names(alternate, out);
        }
        Expr::Call { callee, args } => {
            collect_expr_names(callee, out);
            args.iter().for_each(|e| collect_expr_names(e, out));
        }
        Expr::Member { object, property } => {
            collect_expr_names(object, out);
            if let MemberProp::Computed(key) = property {
                collect_expr_names(key, out);
            }
        }
    }
}
