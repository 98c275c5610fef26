use crate::{
    ast::{
        BinaryOp, CatchClause, ClassDecl, Expr, ExprKind, Literal, Param, Program, Stmt, StmtKind,
        TypeExpr, UnaryOp,
    },
    config::LanguageConfig,
};

/// Renders an AST back to canonical source using the configured keyword
/// spellings. Printing a program, reparsing it, and printing again yields
/// identical text.
pub struct Printer<'a> {
    config: &'a LanguageConfig,
    out: String,
    indent: usize,
}

impl<'a> Printer<'a> {
    pub fn new(config: &'a LanguageConfig) -> Self {
        Self {
            config,
            out: String::new(),
            indent: 0,
        }
    }

    pub fn print(mut self, program: &Program) -> String {
        for stmt in &program.statements {
            self.stmt(stmt);
        }
        self.out
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn open(&mut self, header: &str) {
        self.line(&format!("{header} {{"));
        self.indent += 1;
    }

    fn close(&mut self, trailer: &str) {
        self.indent -= 1;
        self.line(&format!("}}{trailer}"));
    }

    fn block(&mut self, header: &str, body: &[Stmt], trailer: &str) {
        self.open(header);
        for stmt in body {
            self.stmt(stmt);
        }
        self.close(trailer);
    }

    fn stmt(&mut self, stmt: &Stmt) {
        let kw = &self.config.keywords;
        match &stmt.kind {
            StmtKind::VarDecl {
                name,
                annotation,
                initializer,
            } => {
                let mut text = format!("{} {name}", kw.var);
                if let Some(annotation) = annotation {
                    text.push_str(&format!(": {}", type_expr(annotation)));
                }
                if let Some(initializer) = initializer {
                    text.push_str(&format!(" = {}", self.expr(initializer)));
                }
                text.push(';');
                self.line(&text);
            }
            StmtKind::Function {
                name,
                params,
                return_type,
                body,
                is_async,
            } => {
                let header = self.function_header(*is_async, name, params, return_type.as_ref());
                self.block(&header, body, "");
            }
            StmtKind::Class(class) => self.class(class),
            StmtKind::Import { module } => {
                self.line(&format!("{} {module};", kw.import));
            }
            StmtKind::Expr(expr) => {
                let text = format!("{};", self.expr(expr));
                self.line(&text);
            }
            StmtKind::Block(body) => self.block("", body, ""),
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => self.if_chain(condition, then_branch, else_branch.as_deref()),
            StmtKind::While { condition, body } => {
                let header = format!("{} {}", kw.while_, self.expr(condition));
                self.block(&header, body, "");
            }
            StmtKind::ForIn {
                binding,
                iterable,
                body,
            } => {
                let header = format!(
                    "{} {binding} {} {}",
                    kw.for_,
                    kw.in_,
                    self.expr(iterable)
                );
                self.block(&header, body, "");
            }
            StmtKind::Try {
                body,
                catches,
                finally,
            } => self.try_stmt(body, catches, finally.as_deref()),
            StmtKind::Throw(expr) => {
                let text = format!("{} {};", kw.throw, self.expr(expr));
                self.line(&text);
            }
            StmtKind::Return(expr) => {
                let text = match expr {
                    Some(expr) => format!("{} {};", kw.return_, self.expr(expr)),
                    None => format!("{};", kw.return_),
                };
                self.line(&text);
            }
            StmtKind::Break => {
                let text = format!("{};", kw.break_);
                self.line(&text);
            }
            StmtKind::Continue => {
                let text = format!("{};", kw.continue_);
                self.line(&text);
            }
        }
    }

    fn if_chain(&mut self, condition: &Expr, then_branch: &[Stmt], else_branch: Option<&[Stmt]>) {
        let header = format!(
            "{} {}",
            self.config.keywords.if_,
            self.expr(condition)
        );
        match else_branch {
            None => self.block(&header, then_branch, ""),
            Some(else_branch) => {
                self.open(&header);
                for stmt in then_branch {
                    self.stmt(stmt);
                }
                self.indent -= 1;
                let else_kw = self.config.keywords.else_.clone();
                self.line(&format!("}} {else_kw} {{"));
                self.indent += 1;
                for stmt in else_branch {
                    self.stmt(stmt);
                }
                self.close("");
            }
        }
    }

    fn try_stmt(&mut self, body: &[Stmt], catches: &[CatchClause], finally: Option<&[Stmt]>) {
        let kw = &self.config.keywords;
        self.open(&kw.try_.clone());
        for stmt in body {
            self.stmt(stmt);
        }
        self.indent -= 1;
        for clause in catches {
            let catch_kw = self.config.keywords.catch.clone();
            let header = match (&clause.filter, &clause.binding) {
                (Some(filter), Some(binding)) => format!("}} {catch_kw} ({filter} {binding}) {{"),
                (None, Some(binding)) => format!("}} {catch_kw} ({binding}) {{"),
                _ => format!("}} {catch_kw} {{"),
            };
            self.line(&header);
            self.indent += 1;
            for stmt in &clause.body {
                self.stmt(stmt);
            }
            self.indent -= 1;
        }
        if let Some(finally) = finally {
            let finally_kw = self.config.keywords.finally.clone();
            self.line(&format!("}} {finally_kw} {{"));
            self.indent += 1;
            for stmt in finally {
                self.stmt(stmt);
            }
            self.indent -= 1;
        }
        self.line("}");
    }

    fn class(&mut self, class: &ClassDecl) {
        let kw = &self.config.keywords;
        let header = match &class.parent {
            Some(parent) => format!("{} {} {} {parent}", kw.class, class.name, kw.extends),
            None => format!("{} {}", kw.class, class.name),
        };
        self.open(&header);
        for field in &class.fields {
            let mut text = format!("{} {}", self.config.keywords.var, field.name);
            if let Some(annotation) = &field.annotation {
                text.push_str(&format!(": {}", type_expr(annotation)));
            }
            if let Some(default) = &field.default {
                text.push_str(&format!(" = {}", self.expr(default)));
            }
            text.push(';');
            self.line(&text);
        }
        for method in &class.methods {
            let header = self.function_header(
                method.is_async,
                &method.name,
                &method.params,
                method.return_type.as_ref(),
            );
            self.block(&header, &method.body, "");
        }
        self.close("");
    }

    fn function_header(
        &self,
        is_async: bool,
        name: &str,
        params: &[Param],
        return_type: Option<&TypeExpr>,
    ) -> String {
        let kw = &self.config.keywords;
        let mut header = String::new();
        if is_async {
            header.push_str(&kw.async_);
            header.push(' ');
        }
        header.push_str(&kw.function);
        header.push(' ');
        header.push_str(name);
        header.push('(');
        header.push_str(&self.params(params));
        header.push(')');
        if let Some(ret) = return_type {
            header.push_str(&format!(": {}", type_expr(ret)));
        }
        header
    }

    fn params(&self, params: &[Param]) -> String {
        params
            .iter()
            .map(|param| {
                let mut text = param.name.clone();
                if let Some(annotation) = &param.annotation {
                    text.push_str(&format!(": {}", type_expr(annotation)));
                }
                if let Some(default) = &param.default {
                    text.push_str(&format!(" = {}", self.expr(default)));
                }
                text
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn expr(&self, expr: &Expr) -> String {
        let kw = &self.config.keywords;
        match &expr.kind {
            ExprKind::Literal(lit) => literal(lit, self.config),
            ExprKind::Variable(name) => name.clone(),
            ExprKind::Binary { op, left, right } => {
                format!("{} {} {}", self.expr(left), op_symbol(*op), self.expr(right))
            }
            ExprKind::Unary { op, expr: inner } => {
                let symbol = match op {
                    UnaryOp::Negate => "-",
                    UnaryOp::Not => "!",
                };
                format!("{symbol}{}", self.expr(inner))
            }
            ExprKind::Assign { target, value } => {
                format!("{} = {}", self.expr(target), self.expr(value))
            }
            ExprKind::Call { callee, args } => {
                format!("{}({})", self.expr(callee), self.args(args))
            }
            ExprKind::ListLiteral(items) => format!("[{}]", self.args(items)),
            ExprKind::MapLiteral(entries) => {
                let inner = entries
                    .iter()
                    .map(|(key, value)| format!("{}: {}", self.expr(key), self.expr(value)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{inner}}}")
            }
            ExprKind::Group(inner) => format!("({})", self.expr(inner)),
            ExprKind::Index { target, index } => {
                format!("{}[{}]", self.expr(target), self.expr(index))
            }
            ExprKind::Field { target, field } => format!("{}.{field}", self.expr(target)),
            ExprKind::Lambda { params, body } => {
                let mut text = format!("{} ({}) {{ ", kw.lambda, self.params(params));
                for stmt in body {
                    let mut nested = Printer::new(self.config);
                    nested.stmt(stmt);
                    text.push_str(nested.out.trim_end());
                    text.push(' ');
                }
                text.push('}');
                text
            }
            ExprKind::New { class, args } => {
                format!("{} {}({})", kw.new, type_expr(class), self.args(args))
            }
            ExprKind::This => kw.this.clone(),
            ExprKind::Await(inner) => format!("{} {}", kw.await_, self.expr(inner)),
        }
    }

    fn args(&self, args: &[Expr]) -> String {
        args.iter()
            .map(|arg| self.expr(arg))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn literal(lit: &Literal, config: &LanguageConfig) -> String {
    match lit {
        Literal::Int(n) => n.to_string(),
        Literal::Float(f) => {
            let text = f.to_string();
            if text.contains('.') {
                text
            } else {
                format!("{text}.0")
            }
        }
        Literal::Bool(true) => config.keywords.true_.clone(),
        Literal::Bool(false) => config.keywords.false_.clone(),
        Literal::Str(s) => format!(
            "\"{}\"",
            s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
        ),
        Literal::Null => config.keywords.null.clone(),
    }
}

fn type_expr(expr: &TypeExpr) -> String {
    if expr.args.is_empty() {
        expr.name.clone()
    } else {
        let args = expr
            .args
            .iter()
            .map(type_expr)
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}<{args}>", expr.name)
    }
}

fn op_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Equal => "==",
        BinaryOp::NotEqual => "!=",
        BinaryOp::Less => "<",
        BinaryOp::LessEqual => "<=",
        BinaryOp::Greater => ">",
        BinaryOp::GreaterEqual => ">=",
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
    }
}
