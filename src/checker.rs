use indexmap::IndexMap;

use crate::{
    ast::{
        BinaryOp, CatchClause, ClassDecl, Expr, ExprKind, Literal, MethodDecl, Param, Program,
        Stmt, StmtKind, UnaryOp,
    },
    config::LanguageConfig,
    diagnostics::{Diagnostic, DiagnosticKind, SourcePos},
    registry::Registry,
    types::Type,
};

#[derive(Clone)]
pub struct ParamSig {
    pub name: String,
    pub ty: Type,
    pub has_default: bool,
}

#[derive(Clone)]
pub struct FuncSig {
    pub params: Vec<ParamSig>,
    pub ret: Type,
    pub is_async: bool,
}

impl FuncSig {
    fn required(&self) -> usize {
        self.params.iter().filter(|p| !p.has_default).count()
    }
}

#[derive(Clone)]
pub struct ClassSig {
    pub parent: Option<String>,
    pub fields: IndexMap<String, Type>,
    pub methods: IndexMap<String, FuncSig>,
}

/// Single-pass accumulating type checker. Never aborts on the first problem:
/// every diagnostic for a program is collected in source order, and a failed
/// inference degrades to `Unknown` so one mistake does not cascade.
pub struct TypeChecker<'a> {
    config: &'a LanguageConfig,
    scopes: Vec<IndexMap<String, Type>>,
    functions: IndexMap<String, FuncSig>,
    classes: IndexMap<String, ClassSig>,
    /// Per-module export signatures: natives plus overlay functions.
    module_sigs: IndexMap<String, IndexMap<String, FuncSig>>,
    /// Names bound by `import` in the program under check.
    imported: IndexMap<String, String>,
    /// Ambient globals seeded before checking; module overlays run with
    /// their own module's exports predefined, and are checked the same way.
    preset_globals: IndexMap<String, FuncSig>,
    diagnostics: Vec<Diagnostic>,
    current_class: Option<String>,
    loop_depth: usize,
}

impl<'a> TypeChecker<'a> {
    pub fn new(config: &'a LanguageConfig, registry: &Registry) -> Self {
        let mut module_sigs = IndexMap::new();
        for def in registry.modules() {
            let mut sigs: IndexMap<String, FuncSig> = def
                .natives
                .values()
                .map(|native| {
                    let params = native
                        .params
                        .iter()
                        .enumerate()
                        .map(|(idx, ty)| ParamSig {
                            name: format!("arg{idx}"),
                            ty: ty.clone(),
                            has_default: false,
                        })
                        .collect();
                    (
                        native.name.to_string(),
                        FuncSig {
                            params,
                            ret: native.ret.clone(),
                            is_async: false,
                        },
                    )
                })
                .collect();
            if let Some(program) = &def.overlay {
                for stmt in &program.statements {
                    if let StmtKind::Function {
                        name,
                        params,
                        return_type,
                        is_async,
                        ..
                    } = &stmt.kind
                    {
                        sigs.insert(
                            name.clone(),
                            Self::signature_of(config, params, return_type.as_ref(), *is_async),
                        );
                    }
                }
            }
            module_sigs.insert(def.name.clone(), sigs);
        }
        Self {
            config,
            scopes: Vec::new(),
            functions: IndexMap::new(),
            classes: IndexMap::new(),
            module_sigs,
            imported: IndexMap::new(),
            preset_globals: IndexMap::new(),
            diagnostics: Vec::new(),
            current_class: None,
            loop_depth: 0,
        }
    }

    /// Puts a module's exports in scope as ambient globals, mirroring the
    /// environment an overlay source executes in at import time.
    pub fn with_module_globals(mut self, module: &str) -> Self {
        if let Some(sigs) = self.module_sigs.get(module) {
            self.preset_globals = sigs.clone();
        }
        self
    }

    /// Checks a whole program and hands back every diagnostic found, errors
    /// and warnings interleaved in source order.
    pub fn check(mut self, program: &Program) -> Vec<Diagnostic> {
        self.collect_signatures(program);
        self.scopes.push(IndexMap::new());
        self.check_block(&program.statements);
        self.scopes.pop();
        self.diagnostics
    }

    fn signature_of(
        config: &LanguageConfig,
        params: &[Param],
        return_type: Option<&crate::ast::TypeExpr>,
        is_async: bool,
    ) -> FuncSig {
        let params = params
            .iter()
            .map(|param| ParamSig {
                name: param.name.clone(),
                ty: param
                    .annotation
                    .as_ref()
                    .map(|ann| Type::from_annotation(ann, &config.root_types))
                    .unwrap_or(Type::Unknown),
                has_default: param.default.is_some(),
            })
            .collect();
        let ret = return_type
            .map(|ann| Type::from_annotation(ann, &config.root_types))
            .unwrap_or(Type::Unknown);
        FuncSig {
            params,
            ret,
            is_async,
        }
    }

    /// Pre-pass over top-level declarations so functions and classes may be
    /// referenced before their definition appears.
    fn collect_signatures(&mut self, program: &Program) {
        for stmt in &program.statements {
            match &stmt.kind {
                StmtKind::Function {
                    name,
                    params,
                    return_type,
                    is_async,
                    ..
                } => {
                    let sig =
                        Self::signature_of(self.config, params, return_type.as_ref(), *is_async);
                    if self.functions.insert(name.clone(), sig).is_some() {
                        self.error(stmt.pos, format!("`{name}` is declared more than once"));
                    }
                }
                StmtKind::Class(class) => {
                    let sig = self.class_signature(class);
                    if self.classes.insert(class.name.clone(), sig).is_some() {
                        self.error(
                            stmt.pos,
                            format!("class `{}` is declared more than once", class.name),
                        );
                    }
                }
                _ => {}
            }
        }
        for stmt in &program.statements {
            if let StmtKind::Class(class) = &stmt.kind {
                if let Some(parent) = &class.parent {
                    if !self.classes.contains_key(parent) {
                        self.error(
                            class.pos,
                            format!("class `{}` extends unknown class `{parent}`", class.name),
                        );
                    }
                }
            }
        }
    }

    fn class_signature(&self, class: &ClassDecl) -> ClassSig {
        let fields = class
            .fields
            .iter()
            .map(|field| {
                let ty = field
                    .annotation
                    .as_ref()
                    .map(|ann| Type::from_annotation(ann, &self.config.root_types))
                    .unwrap_or(Type::Unknown);
                (field.name.clone(), ty)
            })
            .collect();
        let methods = class
            .methods
            .iter()
            .map(|method| {
                (
                    method.name.clone(),
                    Self::signature_of(
                        self.config,
                        &method.params,
                        method.return_type.as_ref(),
                        method.is_async,
                    ),
                )
            })
            .collect();
        ClassSig {
            parent: class.parent.clone(),
            fields,
            methods,
        }
    }

    fn error(&mut self, pos: SourcePos, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::new(DiagnosticKind::Type, message).with_pos(pos));
    }

    fn warn(&mut self, pos: SourcePos, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::warning(DiagnosticKind::Type, message).with_pos(pos));
    }

    fn declare(&mut self, name: &str, ty: Type, pos: SourcePos) {
        let scope = match self.scopes.last_mut() {
            Some(scope) => scope,
            None => return,
        };
        if scope.contains_key(name) {
            self.error(pos, format!("`{name}` is already declared in this scope"));
        } else {
            scope.insert(name.to_string(), ty);
        }
    }

    fn lookup(&self, name: &str) -> Option<Type> {
        for scope in self.scopes.iter().rev() {
            if let Some(ty) = scope.get(name) {
                return Some(ty.clone());
            }
        }
        None
    }

    fn resolve(&self, annotation: &crate::ast::TypeExpr) -> Type {
        Type::from_annotation(annotation, &self.config.root_types)
    }

    // --- statements ---

    fn check_block(&mut self, statements: &[Stmt]) {
        let mut terminated = false;
        for stmt in statements {
            if terminated {
                // Only the first unreachable statement is flagged; the rest
                // are still checked for other mistakes.
                self.warn(stmt.pos, "unreachable statement");
                terminated = false;
            }
            self.check_stmt(stmt);
            if matches!(
                stmt.kind,
                StmtKind::Return(_) | StmtKind::Throw(_) | StmtKind::Break | StmtKind::Continue
            ) {
                terminated = true;
            }
        }
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::VarDecl {
                name,
                annotation,
                initializer,
            } => {
                let declared = annotation.as_ref().map(|ann| self.resolve(ann));
                let inferred = initializer
                    .as_ref()
                    .map(|expr| self.infer(expr))
                    .unwrap_or(Type::Null);
                if let (Some(expected), Some(init)) = (&declared, initializer) {
                    if !expected.accepts(&inferred) {
                        self.error(
                            init.pos,
                            format!(
                                "cannot initialize `{name}`: expected {expected}, found {inferred}"
                            ),
                        );
                    }
                }
                let bound = declared.unwrap_or(inferred);
                self.declare(name, bound, stmt.pos);
            }
            StmtKind::Function {
                name,
                params,
                return_type,
                body,
                is_async,
            } => {
                let sig = Self::signature_of(self.config, params, return_type.as_ref(), *is_async);
                // Top-level functions were collected in the pre-pass; nested
                // ones are introduced here.
                if self.scopes.len() > 1 && !self.functions.contains_key(name) {
                    self.declare(name, function_type(&sig), stmt.pos);
                }
                self.check_function_body(params, &sig.ret, body);
            }
            StmtKind::Class(class) => self.check_class(class),
            StmtKind::Import { module } => {
                if self.module_sigs.contains_key(module) {
                    self.imported.insert(module.clone(), module.clone());
                } else {
                    self.error(stmt.pos, format!("unknown module `{module}`"));
                }
            }
            StmtKind::Expr(expr) => {
                self.infer(expr);
            }
            StmtKind::Block(statements) => {
                self.scopes.push(IndexMap::new());
                self.check_block(statements);
                self.scopes.pop();
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.infer(condition);
                self.scopes.push(IndexMap::new());
                self.check_block(then_branch);
                self.scopes.pop();
                if let Some(else_branch) = else_branch {
                    self.scopes.push(IndexMap::new());
                    self.check_block(else_branch);
                    self.scopes.pop();
                }
            }
            StmtKind::While { condition, body } => {
                self.infer(condition);
                self.loop_depth += 1;
                self.scopes.push(IndexMap::new());
                self.check_block(body);
                self.scopes.pop();
                self.loop_depth -= 1;
            }
            StmtKind::ForIn {
                binding,
                iterable,
                body,
            } => {
                let iterable_ty = self.infer(iterable);
                let element = self.element_type(&iterable_ty, iterable.pos);
                self.loop_depth += 1;
                self.scopes.push(IndexMap::new());
                self.declare(binding, element, stmt.pos);
                self.check_block(body);
                self.scopes.pop();
                self.loop_depth -= 1;
            }
            StmtKind::Try {
                body,
                catches,
                finally,
            } => {
                self.scopes.push(IndexMap::new());
                self.check_block(body);
                self.scopes.pop();
                for clause in catches {
                    self.check_catch(clause);
                }
                if let Some(finally) = finally {
                    self.scopes.push(IndexMap::new());
                    self.check_block(finally);
                    self.scopes.pop();
                }
            }
            StmtKind::Throw(expr) => {
                self.infer(expr);
            }
            StmtKind::Return(expr) => {
                if let Some(expr) = expr {
                    self.infer(expr);
                }
            }
            StmtKind::Break | StmtKind::Continue => {
                if self.loop_depth == 0 {
                    let keyword = if matches!(stmt.kind, StmtKind::Break) {
                        "break"
                    } else {
                        "continue"
                    };
                    self.error(stmt.pos, format!("`{keyword}` outside of a loop"));
                }
            }
        }
    }

    fn check_catch(&mut self, clause: &CatchClause) {
        self.scopes.push(IndexMap::new());
        if let Some(binding) = &clause.binding {
            self.declare(binding, Type::Class("Exception".into()), clause.pos);
        }
        self.check_block(&clause.body);
        self.scopes.pop();
    }

    fn check_function_body(&mut self, params: &[Param], ret: &Type, body: &[Stmt]) {
        self.scopes.push(IndexMap::new());
        for param in params {
            let ty = param
                .annotation
                .as_ref()
                .map(|ann| self.resolve(ann))
                .unwrap_or(Type::Unknown);
            if let Some(default) = &param.default {
                let default_ty = self.infer(default);
                if !ty.accepts(&default_ty) {
                    self.error(
                        default.pos,
                        format!(
                            "default for `{}` has type {default_ty}, expected {ty}",
                            param.name
                        ),
                    );
                }
            }
            self.declare(&param.name, ty, param.pos);
        }
        let return_pos = body.last().map(|s| s.pos);
        self.check_block(body);
        self.check_returns(ret, body, return_pos);
        self.scopes.pop();
    }

    /// Shallow result check: every `return <expr>` directly in the body (and
    /// its nested blocks) must produce the annotated type.
    fn check_returns(&mut self, ret: &Type, body: &[Stmt], _pos: Option<SourcePos>) {
        if matches!(ret, Type::Unknown) {
            return;
        }
        for stmt in body {
            match &stmt.kind {
                StmtKind::Return(Some(expr)) => {
                    let found = self.infer_quietly(expr);
                    if !ret.accepts(&found) {
                        self.error(
                            expr.pos,
                            format!("return type mismatch: expected {ret}, found {found}"),
                        );
                    }
                }
                StmtKind::Return(None) => {
                    if !matches!(ret, Type::Null) {
                        self.error(
                            stmt.pos,
                            format!("return type mismatch: expected {ret}, found null"),
                        );
                    }
                }
                StmtKind::If {
                    then_branch,
                    else_branch,
                    ..
                } => {
                    self.check_returns(ret, then_branch, None);
                    if let Some(else_branch) = else_branch {
                        self.check_returns(ret, else_branch, None);
                    }
                }
                StmtKind::While { body, .. }
                | StmtKind::ForIn { body, .. }
                | StmtKind::Block(body) => {
                    self.check_returns(ret, body, None);
                }
                StmtKind::Try { body, catches, .. } => {
                    self.check_returns(ret, body, None);
                    for clause in catches {
                        self.check_returns(ret, &clause.body, None);
                    }
                }
                _ => {}
            }
        }
    }

    fn check_class(&mut self, class: &ClassDecl) {
        let previous = self.current_class.replace(class.name.clone());
        for field in &class.fields {
            if let (Some(annotation), Some(default)) = (&field.annotation, &field.default) {
                let expected = self.resolve(annotation);
                let found = self.infer(default);
                if !expected.accepts(&found) {
                    self.error(
                        default.pos,
                        format!(
                            "field `{}` default has type {found}, expected {expected}",
                            field.name
                        ),
                    );
                }
            } else if let Some(default) = &field.default {
                self.infer(default);
            }
        }
        for method in &class.methods {
            self.check_method(method);
        }
        self.current_class = previous;
    }

    fn check_method(&mut self, method: &MethodDecl) {
        let sig = Self::signature_of(
            self.config,
            &method.params,
            method.return_type.as_ref(),
            method.is_async,
        );
        self.check_function_body(&method.params, &sig.ret, &method.body);
    }

    // --- expressions ---

    fn infer_quietly(&mut self, expr: &Expr) -> Type {
        let before = self.diagnostics.len();
        let ty = self.infer(expr);
        self.diagnostics.truncate(before);
        ty
    }

    fn infer(&mut self, expr: &Expr) -> Type {
        match &expr.kind {
            ExprKind::Literal(lit) => match lit {
                Literal::Int(_) => Type::Int,
                Literal::Float(_) => Type::Float,
                Literal::Bool(_) => Type::Bool,
                Literal::Str(_) => Type::Str,
                Literal::Null => Type::Null,
            },
            ExprKind::Variable(name) => self.infer_variable(name, expr.pos),
            ExprKind::Binary { op, left, right } => self.infer_binary(*op, left, right, expr.pos),
            ExprKind::Unary { op, expr: inner } => {
                let ty = self.infer(inner);
                match op {
                    UnaryOp::Not => Type::Bool,
                    UnaryOp::Negate => match ty {
                        Type::Int | Type::Float | Type::Unknown => ty,
                        other => {
                            self.error(
                                inner.pos,
                                format!("cannot negate a value of type {other}"),
                            );
                            Type::Unknown
                        }
                    },
                }
            }
            ExprKind::Assign { target, value } => self.infer_assign(target, value),
            ExprKind::Call { callee, args } => self.infer_call(callee, args, expr.pos),
            ExprKind::ListLiteral(items) => {
                let mut element = Type::Unknown;
                for (idx, item) in items.iter().enumerate() {
                    let ty = self.infer(item);
                    if idx == 0 {
                        element = ty;
                    } else if !element.accepts(&ty) && !ty.accepts(&element) {
                        element = Type::Unknown;
                    }
                }
                Type::list(element)
            }
            ExprKind::MapLiteral(entries) => {
                let mut key = Type::Unknown;
                let mut value = Type::Unknown;
                for (idx, (k, v)) in entries.iter().enumerate() {
                    let key_ty = self.infer(k);
                    let value_ty = self.infer(v);
                    if idx == 0 {
                        key = key_ty;
                        value = value_ty;
                    } else {
                        if !key.accepts(&key_ty) {
                            key = Type::Unknown;
                        }
                        if !value.accepts(&value_ty) {
                            value = Type::Unknown;
                        }
                    }
                }
                Type::map(key, value)
            }
            ExprKind::Group(inner) => self.infer(inner),
            ExprKind::Index { target, index } => self.infer_index(target, index, expr.pos),
            ExprKind::Field { target, field } => self.infer_field(target, field, expr.pos),
            ExprKind::Lambda { params, body } => {
                let sig = Self::signature_of(self.config, params, None, false);
                self.check_function_body(params, &Type::Unknown, body);
                function_type(&sig)
            }
            ExprKind::New { class, args } => self.infer_new(class, args, expr.pos),
            ExprKind::This => match &self.current_class {
                Some(name) => Type::Class(name.clone()),
                None => {
                    self.error(expr.pos, "`this` outside of a class method");
                    Type::Unknown
                }
            },
            ExprKind::Await(inner) => {
                let ty = self.infer(inner);
                match ty {
                    Type::Generic { base, mut args } if base == "Task" => {
                        args.pop().unwrap_or(Type::Unknown)
                    }
                    Type::Unknown => Type::Unknown,
                    other => {
                        self.error(
                            inner.pos,
                            format!("`await` expects a Task, found {other}"),
                        );
                        Type::Unknown
                    }
                }
            }
        }
    }

    fn infer_variable(&mut self, name: &str, pos: SourcePos) -> Type {
        if let Some(ty) = self.lookup(name) {
            return ty;
        }
        if let Some(sig) = self.functions.get(name) {
            return function_type(&sig.clone());
        }
        if let Some(sig) = self.preset_globals.get(name) {
            return function_type(&sig.clone());
        }
        if self.imported.contains_key(name) || builtin_sig(name).is_some() {
            // Modules and builtin globals are value-like but opaque here;
            // calls through them are resolved at the call site.
            return Type::Unknown;
        }
        if self.classes.contains_key(name) {
            return Type::Unknown;
        }
        self.error(pos, format!("undefined variable `{name}`"));
        Type::Unknown
    }

    fn infer_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr, pos: SourcePos) -> Type {
        let lhs = self.infer(left);
        let rhs = self.infer(right);
        match op {
            BinaryOp::Add => match (&lhs, &rhs) {
                (Type::Str, Type::Str) => Type::Str,
                (Type::Str, Type::Unknown) | (Type::Unknown, Type::Str) => Type::Str,
                _ => self.numeric_result(op, &lhs, &rhs, pos),
            },
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                self.numeric_result(op, &lhs, &rhs, pos)
            }
            BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
                let comparable = |ty: &Type| {
                    matches!(ty, Type::Int | Type::Float | Type::Str | Type::Unknown)
                };
                if !comparable(&lhs) || !comparable(&rhs) {
                    self.error(
                        pos,
                        format!("cannot compare {lhs} with {rhs}"),
                    );
                }
                Type::Bool
            }
            BinaryOp::Equal | BinaryOp::NotEqual => Type::Bool,
            BinaryOp::And | BinaryOp::Or => Type::Bool,
        }
    }

    fn numeric_result(&mut self, op: BinaryOp, lhs: &Type, rhs: &Type, pos: SourcePos) -> Type {
        let numeric = |ty: &Type| matches!(ty, Type::Int | Type::Float | Type::Unknown);
        if !numeric(lhs) || !numeric(rhs) {
            let symbol = match op {
                BinaryOp::Add => "+",
                BinaryOp::Sub => "-",
                BinaryOp::Mul => "*",
                BinaryOp::Div => "/",
                BinaryOp::Mod => "%",
                _ => "?",
            };
            self.error(pos, format!("operator `{symbol}` cannot combine {lhs} and {rhs}"));
            return Type::Unknown;
        }
        match (lhs, rhs) {
            (Type::Int, Type::Int) => Type::Int,
            (Type::Unknown, _) | (_, Type::Unknown) => Type::Unknown,
            _ => Type::Float,
        }
    }

    fn infer_assign(&mut self, target: &Expr, value: &Expr) -> Type {
        let value_ty = self.infer(value);
        match &target.kind {
            ExprKind::Variable(name) => match self.lookup(name) {
                Some(expected) => {
                    if !expected.accepts(&value_ty) {
                        self.error(
                            value.pos,
                            format!(
                                "cannot assign to `{name}`: expected {expected}, found {value_ty}"
                            ),
                        );
                    }
                    expected
                }
                None => {
                    self.error(target.pos, format!("undefined variable `{name}`"));
                    Type::Unknown
                }
            },
            ExprKind::Index { target, index } => {
                let container = self.infer(target);
                self.infer(index);
                match &container {
                    Type::Generic { base, args } if base == "List" => {
                        let element = args.first().cloned().unwrap_or(Type::Unknown);
                        if !element.accepts(&value_ty) {
                            self.error(
                                value.pos,
                                format!("{container} cannot hold a value of type {value_ty}"),
                            );
                        }
                        element
                    }
                    Type::Generic { base, args } if base == "Map" => {
                        let element = args.get(1).cloned().unwrap_or(Type::Unknown);
                        if !element.accepts(&value_ty) {
                            self.error(
                                value.pos,
                                format!("{container} cannot hold a value of type {value_ty}"),
                            );
                        }
                        element
                    }
                    _ => Type::Unknown,
                }
            }
            ExprKind::Field { target, field } => {
                let owner = self.infer(target);
                if let Type::Class(class) = &owner {
                    if let Some(expected) = self.field_type(class, field) {
                        if !expected.accepts(&value_ty) {
                            self.error(
                                value.pos,
                                format!(
                                    "field `{field}` of `{class}` expects {expected}, found {value_ty}"
                                ),
                            );
                        }
                        return expected;
                    }
                    self.error(
                        target.pos,
                        format!("class `{class}` has no field `{field}`"),
                    );
                }
                Type::Unknown
            }
            _ => {
                self.error(target.pos, "invalid assignment target");
                Type::Unknown
            }
        }
    }

    fn infer_index(&mut self, target: &Expr, index: &Expr, pos: SourcePos) -> Type {
        let container = self.infer(target);
        let index_ty = self.infer(index);
        match &container {
            Type::Generic { base, args } if base == "List" => {
                if !Type::Int.accepts(&index_ty) {
                    self.error(index.pos, format!("list index must be int, found {index_ty}"));
                }
                args.first().cloned().unwrap_or(Type::Unknown)
            }
            Type::Generic { base, args } if base == "Map" => {
                let key = args.first().cloned().unwrap_or(Type::Unknown);
                if !key.accepts(&index_ty) {
                    self.error(
                        index.pos,
                        format!("map key must be {key}, found {index_ty}"),
                    );
                }
                args.get(1).cloned().unwrap_or(Type::Unknown)
            }
            Type::Str => {
                if !Type::Int.accepts(&index_ty) {
                    self.error(
                        index.pos,
                        format!("string index must be int, found {index_ty}"),
                    );
                }
                Type::Str
            }
            Type::Unknown => Type::Unknown,
            other => {
                self.error(pos, format!("cannot index into a value of type {other}"));
                Type::Unknown
            }
        }
    }

    fn infer_field(&mut self, target: &Expr, field: &str, pos: SourcePos) -> Type {
        // Module member access resolves through the registry signatures.
        if let ExprKind::Variable(name) = &target.kind {
            if self.imported.contains_key(name) && self.lookup(name).is_none() {
                if let Some(sig) = self
                    .module_sigs
                    .get(name)
                    .and_then(|sigs| sigs.get(field))
                {
                    return function_type(&sig.clone());
                }
                self.error(pos, format!("module `{name}` has no export `{field}`"));
                return Type::Unknown;
            }
        }
        let owner = self.infer(target);
        match &owner {
            Type::Class(class) => {
                if let Some(ty) = self.field_type(class, field) {
                    return ty;
                }
                if let Some(sig) = self.method_sig(class, field) {
                    return function_type(&sig);
                }
                if class == "Exception" {
                    return Type::Unknown;
                }
                self.error(pos, format!("class `{class}` has no member `{field}`"));
                Type::Unknown
            }
            Type::Generic { .. } | Type::Str => {
                // Prototype methods are not first-class values; only the
                // call form is allowed, matching the interpreter.
                if prototype_sig(&owner, field).is_some() {
                    self.error(
                        pos,
                        format!("{owner} has no member `{field}`; call its methods directly"),
                    );
                } else {
                    self.error(pos, format!("{owner} has no method `{field}`"));
                }
                Type::Unknown
            }
            Type::Unknown => Type::Unknown,
            other => {
                self.error(pos, format!("{other} has no member `{field}`"));
                Type::Unknown
            }
        }
    }

    fn field_type(&self, class: &str, field: &str) -> Option<Type> {
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            let sig = self.classes.get(&name)?;
            if let Some(ty) = sig.fields.get(field) {
                return Some(ty.clone());
            }
            current = sig.parent.clone();
        }
        None
    }

    fn method_sig(&self, class: &str, method: &str) -> Option<FuncSig> {
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            let sig = self.classes.get(&name)?;
            if let Some(found) = sig.methods.get(method) {
                return Some(found.clone());
            }
            current = sig.parent.clone();
        }
        None
    }

    fn infer_call(&mut self, callee: &Expr, args: &[Expr], pos: SourcePos) -> Type {
        let arg_types: Vec<(Type, SourcePos)> = args
            .iter()
            .map(|arg| (self.infer(arg), arg.pos))
            .collect();

        match &callee.kind {
            ExprKind::Variable(name) => {
                if let Some(builtin) = builtin_sig(name) {
                    return self.check_builtin_call(name, &builtin, &arg_types, pos);
                }
                if self.lookup(name).is_none() {
                    if let Some(sig) = self.functions.get(name).cloned() {
                        return self.check_sig_call(name, &sig, &arg_types, pos);
                    }
                    if let Some(sig) = self.preset_globals.get(name).cloned() {
                        return self.check_sig_call(name, &sig, &arg_types, pos);
                    }
                }
                let callee_ty = self.infer(callee);
                self.check_function_value(&callee_ty, &arg_types, pos)
            }
            ExprKind::Field { target, field } => {
                // Module export call.
                if let ExprKind::Variable(module) = &target.kind {
                    if self.imported.contains_key(module) && self.lookup(module).is_none() {
                        if let Some(sig) = self
                            .module_sigs
                            .get(module)
                            .and_then(|sigs| sigs.get(field))
                            .cloned()
                        {
                            let label = format!("{module}.{field}");
                            return self.check_sig_call(&label, &sig, &arg_types, pos);
                        }
                        self.error(
                            pos,
                            format!("module `{module}` has no export `{field}`"),
                        );
                        return Type::Unknown;
                    }
                }
                let owner = self.infer(target);
                match &owner {
                    Type::Class(class) => {
                        if let Some(sig) = self.method_sig(class, field) {
                            let label = format!("{class}.{field}");
                            return self.check_sig_call(&label, &sig, &arg_types, pos);
                        }
                        if class == "Exception" {
                            return Type::Unknown;
                        }
                        self.error(pos, format!("class `{class}` has no method `{field}`"));
                        Type::Unknown
                    }
                    Type::Generic { .. } | Type::Str => match prototype_sig(&owner, field) {
                        Some(sig) => self.check_sig_call(field, &sig, &arg_types, pos),
                        None => {
                            self.error(pos, format!("{owner} has no method `{field}`"));
                            Type::Unknown
                        }
                    },
                    Type::Unknown => Type::Unknown,
                    other => {
                        self.error(pos, format!("{other} has no method `{field}`"));
                        Type::Unknown
                    }
                }
            }
            _ => {
                let callee_ty = self.infer(callee);
                self.check_function_value(&callee_ty, &arg_types, pos)
            }
        }
    }

    fn check_function_value(
        &mut self,
        callee_ty: &Type,
        args: &[(Type, SourcePos)],
        pos: SourcePos,
    ) -> Type {
        match callee_ty {
            Type::Function { params, ret } => {
                if args.len() != params.len() {
                    self.error(
                        pos,
                        format!(
                            "expected {} arguments but received {}",
                            params.len(),
                            args.len()
                        ),
                    );
                } else {
                    for (param, (arg, arg_pos)) in params.iter().zip(args) {
                        if !param.accepts(arg) {
                            self.error(
                                *arg_pos,
                                format!("argument type mismatch: expected {param}, found {arg}"),
                            );
                        }
                    }
                }
                (**ret).clone()
            }
            Type::Unknown => Type::Unknown,
            other => {
                self.error(pos, format!("cannot call a value of type {other}"));
                Type::Unknown
            }
        }
    }

    fn check_sig_call(
        &mut self,
        name: &str,
        sig: &FuncSig,
        args: &[(Type, SourcePos)],
        pos: SourcePos,
    ) -> Type {
        let required = sig.required();
        if args.len() < required || args.len() > sig.params.len() {
            let expected = if required == sig.params.len() {
                format!("{required}")
            } else {
                format!("{required} to {}", sig.params.len())
            };
            self.error(
                pos,
                format!(
                    "`{name}` expected {expected} arguments but received {}",
                    args.len()
                ),
            );
        } else {
            for (param, (arg, arg_pos)) in sig.params.iter().zip(args) {
                if !param.ty.accepts(arg) {
                    self.error(
                        *arg_pos,
                        format!(
                            "argument `{}` of `{name}`: expected {}, found {arg}",
                            param.name, param.ty
                        ),
                    );
                }
            }
        }
        if sig.is_async {
            Type::task(sig.ret.clone())
        } else {
            sig.ret.clone()
        }
    }

    fn check_builtin_call(
        &mut self,
        name: &str,
        builtin: &BuiltinSig,
        args: &[(Type, SourcePos)],
        pos: SourcePos,
    ) -> Type {
        if !builtin.variadic && args.len() != builtin.params {
            self.error(
                pos,
                format!(
                    "`{name}` expected {} arguments but received {}",
                    builtin.params,
                    args.len()
                ),
            );
        }
        builtin.ret.clone()
    }

    fn infer_new(&mut self, class: &crate::ast::TypeExpr, args: &[Expr], pos: SourcePos) -> Type {
        let resolved = self.resolve(class);
        match &resolved {
            Type::Generic { base, .. } => {
                if base == "Task" {
                    self.error(pos, "tasks are created by calling async functions");
                    return Type::Unknown;
                }
                for arg in args {
                    self.infer(arg);
                }
                if !args.is_empty() {
                    self.error(
                        pos,
                        format!("`new {base}` does not take constructor arguments"),
                    );
                }
                resolved
            }
            Type::Class(name) => {
                let arg_types: Vec<(Type, SourcePos)> = args
                    .iter()
                    .map(|arg| (self.infer(arg), arg.pos))
                    .collect();
                match self.classes.get(name) {
                    Some(_) => {
                        if let Some(ctor) = self.method_sig(name, "constructor") {
                            let label = format!("{name}.constructor");
                            self.check_sig_call(&label, &ctor, &arg_types, pos);
                        } else if !args.is_empty() {
                            self.error(
                                pos,
                                format!("class `{name}` has no constructor taking arguments"),
                            );
                        }
                        resolved.clone()
                    }
                    None => {
                        self.error(pos, format!("unknown class `{name}`"));
                        Type::Unknown
                    }
                }
            }
            other => {
                self.error(pos, format!("cannot instantiate {other}"));
                Type::Unknown
            }
        }
    }

    fn element_type(&mut self, iterable: &Type, pos: SourcePos) -> Type {
        match iterable {
            Type::Generic { base, args } if base == "List" || base == "Set" => {
                args.first().cloned().unwrap_or(Type::Unknown)
            }
            // Map iteration yields [key, value] pairs.
            Type::Generic { base, .. } if base == "Map" => Type::list(Type::Unknown),
            Type::Str => Type::Str,
            Type::Unknown => Type::Unknown,
            other => {
                self.error(pos, format!("cannot iterate over a value of type {other}"));
                Type::Unknown
            }
        }
    }
}

fn function_type(sig: &FuncSig) -> Type {
    let ret = if sig.is_async {
        Type::task(sig.ret.clone())
    } else {
        sig.ret.clone()
    };
    Type::Function {
        params: sig.params.iter().map(|p| p.ty.clone()).collect(),
        ret: Box::new(ret),
    }
}

struct BuiltinSig {
    params: usize,
    ret: Type,
    variadic: bool,
}

/// Globals available without any import.
fn builtin_sig(name: &str) -> Option<BuiltinSig> {
    let sig = match name {
        "print" => BuiltinSig {
            params: 0,
            ret: Type::Null,
            variadic: true,
        },
        "len" => BuiltinSig {
            params: 1,
            ret: Type::Int,
            variadic: false,
        },
        "type_of" => BuiltinSig {
            params: 1,
            ret: Type::Str,
            variadic: false,
        },
        "exception_kind" | "exception_message" => BuiltinSig {
            params: 1,
            ret: Type::Str,
            variadic: false,
        },
        "exception_trace" => BuiltinSig {
            params: 1,
            ret: Type::list(Type::Str),
            variadic: false,
        },
        _ => return None,
    };
    Some(sig)
}

/// Method signatures on the built-in container and string types, with the
/// generic parameters of the receiver substituted in.
fn prototype_sig(receiver: &Type, method: &str) -> Option<FuncSig> {
    let sig = |params: Vec<Type>, ret: Type| {
        let params = params
            .into_iter()
            .enumerate()
            .map(|(idx, ty)| ParamSig {
                name: format!("arg{idx}"),
                ty,
                has_default: false,
            })
            .collect();
        Some(FuncSig {
            params,
            ret,
            is_async: false,
        })
    };
    match receiver {
        Type::Generic { base, args } if base == "List" => {
            let element = args.first().cloned().unwrap_or(Type::Unknown);
            match method {
                "push" => sig(vec![element], Type::Null),
                "pop" => sig(vec![], element),
                "get" => sig(vec![Type::Int], element),
                "set" => sig(vec![Type::Int, element], Type::Null),
                "remove_at" => sig(vec![Type::Int], element),
                "index_of" => sig(vec![element], Type::Int),
                "contains" => sig(vec![element], Type::Bool),
                "slice" => sig(vec![Type::Int, Type::Int], Type::list(element)),
                "join" => sig(vec![Type::Str], Type::Str),
                "len" => sig(vec![], Type::Int),
                "clear" => sig(vec![], Type::Null),
                _ => None,
            }
        }
        Type::Generic { base, args } if base == "Map" => {
            let key = args.first().cloned().unwrap_or(Type::Unknown);
            let value = args.get(1).cloned().unwrap_or(Type::Unknown);
            match method {
                "get" => sig(vec![key], value),
                "set" => sig(vec![key, value], Type::Null),
                "has" => sig(vec![key], Type::Bool),
                "remove" => sig(vec![key], value),
                "keys" => sig(vec![], Type::list(key)),
                "values" => sig(vec![], Type::list(value)),
                "len" => sig(vec![], Type::Int),
                "clear" => sig(vec![], Type::Null),
                _ => None,
            }
        }
        Type::Generic { base, args } if base == "Set" => {
            let element = args.first().cloned().unwrap_or(Type::Unknown);
            match method {
                "add" => sig(vec![element], Type::Null),
                "has" => sig(vec![element], Type::Bool),
                "remove" => sig(vec![element], Type::Bool),
                "values" => sig(vec![], Type::list(element)),
                "len" => sig(vec![], Type::Int),
                "clear" => sig(vec![], Type::Null),
                _ => None,
            }
        }
        Type::Str => match method {
            "len" => sig(vec![], Type::Int),
            "upper" => sig(vec![], Type::Str),
            "lower" => sig(vec![], Type::Str),
            "trim" => sig(vec![], Type::Str),
            "split" => sig(vec![Type::Str], Type::list(Type::Str)),
            "contains" => sig(vec![Type::Str], Type::Bool),
            "starts_with" => sig(vec![Type::Str], Type::Bool),
            "ends_with" => sig(vec![Type::Str], Type::Bool),
            "replace" => sig(vec![Type::Str, Type::Str], Type::Str),
            "substring" => sig(vec![Type::Int, Type::Int], Type::Str),
            _ => None,
        },
        _ => None,
    }
}
