//! Source text generation.
//!
//! One statement per line, two-space indentation, parentheses only where
//! precedence or statement position requires them.

use crate::javascript::ast::*;
use crate::javascript::lower::is_plain_identifier;
use crate::javascript::value::number_to_string;

const INDENT: &str = "  ";

/// Render a whole program: directives, a blank line, then the body.
pub fn emit_program(program: &Program) -> String {
    let mut emitter = Emitter::default();
    let mut out = String::new();

    for directive in &program.directives {
        out.push_str(&quote(directive));
        out.push_str(";\n");
    }
    if !program.body.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        for stmt in &program.body {
            emitter.stmt(stmt, &mut out);
        }
    }

    out.truncate(out.trim_end().len());
    out
}

/// Render a single expression, e.g. for error messages.
pub fn emit_expression(expr: &Expr) -> String {
    Emitter::default().expr(expr, 0, false)
}

/// Source text of a function, as returned by `String(fn)`.
pub fn emit_function(func: &Function) -> String {
    Emitter::default().function(func)
}

// Binding power of each expression form; higher binds tighter.
const ASSIGN: u8 = 1;
const CONDITIONAL: u8 = 2;
const NULLISH: u8 = 3;
const OR: u8 = 4;
const AND: u8 = 5;
const EQUALITY: u8 = 6;
const RELATIONAL: u8 = 7;
const ADDITIVE: u8 = 8;
const MULTIPLICATIVE: u8 = 9;
const EXPONENT: u8 = 10;
const PREFIX: u8 = 11;
const POSTFIX: u8 = 12;
const CALL: u8 = 13;
const PRIMARY: u8 = 14;

fn binary_precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::StrictEq | BinaryOp::StrictNotEq => EQUALITY,
        BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => RELATIONAL,
        BinaryOp::Add | BinaryOp::Sub => ADDITIVE,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => MULTIPLICATIVE,
        BinaryOp::Exp => EXPONENT,
    }
}

fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Assign { .. } => ASSIGN,
        Expr::Function(func) if func.is_arrow => ASSIGN,
        Expr::Conditional { .. } => CONDITIONAL,
        Expr::Logical { op, .. } => match op {
            LogicalOp::Nullish => NULLISH,
            LogicalOp::Or => OR,
            LogicalOp::And => AND,
        },
        Expr::Binary { op, .. } => binary_precedence(*op),
        Expr::Unary { .. } | Expr::Update { prefix: true, .. } => PREFIX,
        Expr::Update { prefix: false, .. } => POSTFIX,
        Expr::Call { .. } | Expr::Member { .. } => CALL,
        _ => PRIMARY,
    }
}

fn binary_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        BinaryOp::Exp => "**",
        BinaryOp::Eq => "==",
        BinaryOp::NotEq => "!=",
        BinaryOp::StrictEq => "===",
        BinaryOp::StrictNotEq => "!==",
        BinaryOp::Lt => "<",
        BinaryOp::Lte => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Gte => ">=",
    }
}

fn logical_symbol(op: LogicalOp) -> &'static str {
    match op {
        LogicalOp::And => "&&",
        LogicalOp::Or => "||",
        LogicalOp::Nullish => "??",
    }
}

fn assign_symbol(op: AssignOp) -> &'static str {
    match op {
        AssignOp::Assign => "=",
        AssignOp::Add => "+=",
        AssignOp::Sub => "-=",
        AssignOp::Mul => "*=",
        AssignOp::Div => "/=",
        AssignOp::Rem => "%=",
    }
}

/// Double-quoted string literal.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{b}' => out.push_str("\\v"),
            '\u{c}' => out.push_str("\\f"),
            '\0' => out.push_str("\\0"),
            c if c.is_control() || c == '\u{2028}' || c == '\u{2029}' => {
                out.push_str(&format!("\\u{:04X}", u32::from(c)));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[derive(Default)]
struct Emitter {
    depth: usize,
}

impl Emitter {
    fn line(&self, out: &mut String, text: &str) {
        for _ in 0..self.depth {
            out.push_str(INDENT);
        }
        out.push_str(text);
        out.push('\n');
    }

    fn stmt(&mut self, stmt: &Stmt, out: &mut String) {
        let text = self.stmt_text(stmt);
        self.line(out, &text);
    }

    /// Statement text; nested lines are indented relative to the current depth.
    fn stmt_text(&mut self, stmt: &Stmt) -> String {
        match stmt {
            Stmt::Expr(expr) => format!("{};", self.expr(expr, 0, true)),
            Stmt::VarDecl { .. } => format!("{};", self.var_decl(stmt)),
            Stmt::Function(func) => self.function(func),
            Stmt::Return(None) => "return;".to_string(),
            Stmt::Return(Some(arg)) => format!("return {};", self.expr(arg, 0, false)),
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                let mut text = format!("if ({}) {}", self.expr(test, 0, false), self.stmt_text(consequent));
                if let Some(alt) = alternate {
                    if matches!(**consequent, Stmt::Block(_)) {
                        text.push(' ');
                    } else {
                        text.push('\n');
                        text.push_str(&INDENT.repeat(self.depth));
                    }
                    text.push_str("else ");
                    text.push_str(&self.stmt_text(alt));
                }
                text
            }
            Stmt::While { test, body } => {
                format!("while ({}) {}", self.expr(test, 0, false), self.stmt_text(body))
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                let init = match init.as_deref() {
                    Some(decl @ Stmt::VarDecl { .. }) => self.var_decl(decl),
                    Some(Stmt::Expr(expr)) => self.expr(expr, 0, false),
                    _ => String::new(),
                };
                let test = test
                    .as_ref()
                    .map_or_else(String::new, |e| format!(" {}", self.expr(e, 0, false)));
                let update = update
                    .as_ref()
                    .map_or_else(String::new, |e| format!(" {}", self.expr(e, 0, false)));
                format!("for ({init};{test};{update}) {}", self.stmt_text(body))
            }
            Stmt::Block(body) => self.block(body),
            Stmt::Break => "break;".to_string(),
            Stmt::Continue => "continue;".to_string(),
            Stmt::Throw(arg) => format!("throw {};", self.expr(arg, 0, false)),
            Stmt::Empty => ";".to_string(),
        }
    }

    fn var_decl(&mut self, stmt: &Stmt) -> String {
        let Stmt::VarDecl { kind, decls } = stmt else {
            return String::new();
        };
        let decls: Vec<String> = decls
            .iter()
            .map(|decl| match &decl.init {
                Some(init) => format!("{} = {}", decl.name, self.expr(init, ASSIGN, false)),
                None => decl.name.clone(),
            })
            .collect();
        format!("{} {}", kind.keyword(), decls.join(", "))
    }

    fn block(&mut self, body: &[Stmt]) -> String {
        if body.is_empty() {
            return "{}".to_string();
        }
        let mut text = String::from("{\n");
        self.depth += 1;
        for stmt in body {
            self.stmt(stmt, &mut text);
        }
        self.depth -= 1;
        text.push_str(&INDENT.repeat(self.depth));
        text.push('}');
        text
    }

    fn function(&mut self, func: &Function) -> String {
        let params = func.params.join(", ");
        if func.is_arrow {
            let body = match &func.body {
                FunctionBody::Block(body) => self.block(body),
                FunctionBody::Expr(expr) if matches!(**expr, Expr::Object(_)) => {
                    format!("({})", self.expr(expr, ASSIGN, false))
                }
                FunctionBody::Expr(expr) => self.expr(expr, ASSIGN, false),
            };
            return format!("({params}) => {body}");
        }

        let body = match &func.body {
            FunctionBody::Block(body) => self.block(body),
            FunctionBody::Expr(expr) => {
                self.block(&[Stmt::Return(Some(expr.as_ref().clone()))])
            }
        };
        match &func.name {
            Some(name) => format!("function {name}({params}) {body}"),
            None => format!("function ({params}) {body}"),
        }
    }

    /// Render `expr`, parenthesising it if it binds looser than `min`.
    ///
    /// `leading` marks an expression that starts a statement, where a
    /// leftmost `function` or `{` must be wrapped to stay an expression.
    fn expr(&mut self, expr: &Expr, min: u8, leading: bool) -> String {
        let prec = precedence(expr);
        if prec < min {
            return format!("({})", self.expr(expr, 0, false));
        }

        match expr {
            Expr::Number(n) => number_to_string(*n),
            Expr::String(s) => quote(s),
            Expr::Bool(b) => b.to_string(),
            Expr::Null => "null".to_string(),
            Expr::Ident(name) => name.clone(),
            Expr::Array(items) => {
                let items: Vec<String> = items.iter().map(|e| self.expr(e, ASSIGN, false)).collect();
                format!("[{}]", items.join(", "))
            }
            Expr::Object(entries) => {
                let text = self.object(entries);
                if leading {
                    format!("({text})")
                } else {
                    text
                }
            }
            Expr::Function(func) => {
                let text = self.function(func);
                if leading && !func.is_arrow {
                    format!("({text})")
                } else {
                    text
                }
            }
            Expr::Unary { op, arg } => {
                let arg_text = self.expr(arg, PREFIX, false);
                match op {
                    UnaryOp::Not => format!("!{arg_text}"),
                    UnaryOp::Typeof => format!("typeof {arg_text}"),
                    UnaryOp::Neg if arg_text.starts_with('-') => format!("- {arg_text}"),
                    UnaryOp::Neg => format!("-{arg_text}"),
                    UnaryOp::Plus if arg_text.starts_with('+') => format!("+ {arg_text}"),
                    UnaryOp::Plus => format!("+{arg_text}"),
                }
            }
            Expr::Update { op, prefix, target } => {
                let symbol = match op {
                    UpdateOp::Increment => "++",
                    UpdateOp::Decrement => "--",
                };
                if *prefix {
                    format!("{symbol}{}", self.expr(target, PREFIX, false))
                } else {
                    format!("{}{symbol}", self.expr(target, CALL, leading))
                }
            }
            Expr::Binary { op, left, right } => {
                let (left_min, right_min) = if *op == BinaryOp::Exp {
                    (POSTFIX, prec)
                } else {
                    (prec, prec + 1)
                };
                format!(
                    "{} {} {}",
                    self.expr(left, left_min, leading),
                    binary_symbol(*op),
                    self.expr(right, right_min, false)
                )
            }
            Expr::Logical { op, left, right } => {
                // `??` may not be mixed with `||` / `&&` without parentheses
                let operand_min = |operand: &Expr| match (op, operand) {
                    (LogicalOp::Nullish, Expr::Logical { op: inner, .. })
                        if *inner != LogicalOp::Nullish =>
                    {
                        PRIMARY
                    }
                    _ => prec,
                };
                let left_min = operand_min(&**left);
                let right_min = operand_min(&**right).max(prec + 1);
                format!(
                    "{} {} {}",
                    self.expr(left, left_min, leading),
                    logical_symbol(*op),
                    self.expr(right, right_min, false)
                )
            }
            Expr::Assign { op, target, value } => format!(
                "{} {} {}",
                self.expr(target, CALL, leading),
                assign_symbol(*op),
                self.expr(value, ASSIGN, false)
            ),
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => format!(
                "{} ? {} : {}",
                self.expr(test, NULLISH, leading),
                self.expr(consequent, ASSIGN, false),
                self.expr(alternate, ASSIGN, false)
            ),
            Expr::Call { callee, args } => {
                let callee_min = if matches!(**callee, Expr::Function(ref f) if f.is_arrow) {
                    PRIMARY + 1
                } else {
                    CALL
                };
                let args: Vec<String> = args.iter().map(|e| self.expr(e, ASSIGN, false)).collect();
                format!("{}({})", self.expr(callee, callee_min, leading), args.join(", "))
            }
            Expr::Member { object, property } => {
                let object_text = match **object {
                    Expr::Number(_) => format!("({})", self.expr(object, 0, false)),
                    Expr::Function(ref f) if f.is_arrow => format!("({})", self.expr(object, 0, false)),
                    _ => self.expr(object, CALL, leading),
                };
                match property {
                    MemberProp::Named(name) => format!("{object_text}.{name}"),
                    MemberProp::Computed(key) => {
                        format!("{object_text}[{}]", self.expr(key, 0, false))
                    }
                }
            }
        }
    }

    fn object(&mut self, entries: &[(String, Expr)]) -> String {
        if entries.is_empty() {
            return "{}".to_string();
        }
        self.depth += 1;
        let indent = INDENT.repeat(self.depth);
        let lines: Vec<String> = entries
            .iter()
            .map(|(key, value)| {
                let key = if is_plain_identifier(key) {
                    key.clone()
                } else {
                    quote(key)
                };
                format!("{indent}{key}: {}", self.expr(value, ASSIGN, false))
            })
            .collect();
        self.depth -= 1;
        format!("{{\n{}\n{}}}", lines.join(",\n"), INDENT.repeat(self.depth))
    }
}
