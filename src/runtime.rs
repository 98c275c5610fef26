use std::rc::Rc;

use indexmap::IndexMap;
use tracing::debug;

use crate::{
    ast::{
        BinaryOp, CatchClause, ClassDecl, Expr, ExprKind, Literal, Param, Program, Stmt, StmtKind,
        TypeExpr, UnaryOp,
    },
    config::LanguageConfig,
    diagnostics::SourcePos,
    environment::{Environment, EnvironmentRef},
    exception::Exception,
    parser,
    registry::{collections_len, Registry},
    scheduler::{Scheduler, TaskHandle},
    types::Type,
    value::{
        Effect, Instance, InstanceRef, MapKey, ModuleValue, NativeFunction, UserFunction, Value,
        ValueKind,
    },
};

/// Why a statement stopped executing. `NextValue` carries the value of an
/// expression statement so the session and REPL can report the last result.
enum FlowControl {
    Next,
    NextValue(Value),
    Return(Value),
    Break,
    Continue,
}

type Exec = Result<FlowControl, Exception>;
type Eval = Result<Value, Exception>;

/// One level of the explicit call stack. The position tracks the statement
/// or expression currently executing in that frame, so an unwinding
/// exception can record where each caller was.
struct Frame {
    name: String,
    pos: SourcePos,
}

/// Tree-walking evaluator with an explicit call stack and a cooperative
/// task scheduler. Single-threaded throughout; every shared structure is
/// `Rc`-based and no evaluation step ever races another.
pub struct Interpreter {
    config: LanguageConfig,
    registry: Rc<Registry>,
    globals: EnvironmentRef,
    env: EnvironmentRef,
    classes: IndexMap<String, Rc<ClassDecl>>,
    frames: Vec<Frame>,
    this_stack: Vec<Option<InstanceRef>>,
    scheduler: Scheduler,
    modules: IndexMap<String, ModuleValue>,
}

impl Interpreter {
    pub fn new(config: LanguageConfig, registry: Rc<Registry>) -> Self {
        let globals = Environment::new();
        install_builtins(&globals);
        let env = Rc::clone(&globals);
        Self {
            config,
            registry,
            globals,
            env,
            classes: IndexMap::new(),
            frames: Vec::new(),
            this_stack: Vec::new(),
            scheduler: Scheduler::new(),
            modules: IndexMap::new(),
        }
    }

    pub fn config(&self) -> &LanguageConfig {
        &self.config
    }

    /// Executes a whole program. The result is the value of the last
    /// top-level expression statement, or null when there is none. An
    /// uncaught exception arrives with its traceback frames already
    /// recorded innermost-first, ending with `<top-level>`.
    pub fn run(&mut self, program: &Program) -> Result<Value, Exception> {
        self.frames.push(Frame {
            name: "<top-level>".into(),
            pos: SourcePos::start(),
        });
        let mut last = Value::null();
        for stmt in &program.statements {
            match self.execute(stmt) {
                Ok(FlowControl::NextValue(value)) => last = value,
                Ok(_) => {}
                Err(mut exc) => {
                    let pos = self.frames.last().map(|f| f.pos).unwrap_or(stmt.pos);
                    exc.push_frame("<top-level>", pos);
                    self.frames.pop();
                    return Err(exc);
                }
            }
        }
        self.frames.pop();
        Ok(last)
    }

    /// Parse-and-run convenience for the REPL and embedding callers.
    pub fn eval(&mut self, source: &str) -> crate::diagnostics::Result<Value> {
        let program = parser::parse_program(source, &self.config)?;
        Ok(self.run(&program)?)
    }

    fn cursor(&self) -> SourcePos {
        self.frames
            .last()
            .map(|frame| frame.pos)
            .unwrap_or_else(SourcePos::start)
    }

    fn set_cursor(&mut self, pos: SourcePos) {
        if let Some(frame) = self.frames.last_mut() {
            frame.pos = pos;
        }
    }

    // --- statements ---

    fn execute(&mut self, stmt: &Stmt) -> Exec {
        self.set_cursor(stmt.pos);
        match &stmt.kind {
            StmtKind::VarDecl {
                name,
                annotation,
                initializer,
            } => {
                let declared = annotation
                    .as_ref()
                    .map(|ann| Type::from_annotation(ann, &self.config.root_types));
                let value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::null(),
                };
                self.set_cursor(stmt.pos);
                self.env.borrow_mut().declare(name, value, declared)?;
                Ok(FlowControl::Next)
            }
            StmtKind::Function {
                name,
                params,
                body,
                is_async,
                ..
            } => {
                let function = UserFunction {
                    name: Some(name.clone()),
                    params: params.clone(),
                    body: body.clone(),
                    env: Rc::clone(&self.env),
                    is_async: *is_async,
                    this: None,
                };
                self.env.borrow_mut().declare(
                    name,
                    Value::new(ValueKind::Function(function)),
                    None,
                )?;
                Ok(FlowControl::Next)
            }
            StmtKind::Class(class) => {
                if self.classes.contains_key(&class.name) {
                    return Err(Exception::redeclaration(&class.name));
                }
                self.classes
                    .insert(class.name.clone(), Rc::new(class.clone()));
                Ok(FlowControl::Next)
            }
            StmtKind::Import { module } => {
                let value = self.import_module(module)?;
                self.env.borrow_mut().define(module.clone(), value, None);
                Ok(FlowControl::Next)
            }
            StmtKind::Expr(expr) => {
                let value = self.evaluate(expr)?;
                Ok(FlowControl::NextValue(value))
            }
            StmtKind::Block(statements) => self.execute_block(statements),
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute_block(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.execute_block(else_branch)
                } else {
                    Ok(FlowControl::Next)
                }
            }
            StmtKind::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    match self.execute_block(body)? {
                        FlowControl::Break => break,
                        FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
                        _ => {}
                    }
                }
                Ok(FlowControl::Next)
            }
            StmtKind::ForIn {
                binding,
                iterable,
                body,
            } => {
                let source = self.evaluate(iterable)?;
                let items = iterate(&source)?;
                for item in items {
                    let child = Environment::with_parent(Rc::clone(&self.env));
                    child.borrow_mut().define(binding.clone(), item, None);
                    match self.execute_in(child, body)? {
                        FlowControl::Break => break,
                        FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
                        _ => {}
                    }
                }
                Ok(FlowControl::Next)
            }
            StmtKind::Try {
                body,
                catches,
                finally,
            } => self.execute_try(body, catches, finally.as_deref()),
            StmtKind::Throw(expr) => {
                let value = self.evaluate(expr)?;
                Err(self.raise(value))
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::null(),
                };
                Ok(FlowControl::Return(value))
            }
            StmtKind::Break => Ok(FlowControl::Break),
            StmtKind::Continue => Ok(FlowControl::Continue),
        }
    }

    fn execute_block(&mut self, statements: &[Stmt]) -> Exec {
        let child = Environment::with_parent(Rc::clone(&self.env));
        self.execute_in(child, statements)
    }

    /// Runs statements with `env` installed, restoring the previous scope on
    /// every exit path.
    fn execute_in(&mut self, env: EnvironmentRef, statements: &[Stmt]) -> Exec {
        let previous = std::mem::replace(&mut self.env, env);
        let mut flow = FlowControl::Next;
        for stmt in statements {
            match self.execute(stmt) {
                Ok(FlowControl::Next) | Ok(FlowControl::NextValue(_)) => {}
                Ok(other) => {
                    flow = other;
                    break;
                }
                Err(exc) => {
                    self.env = previous;
                    return Err(exc);
                }
            }
        }
        self.env = previous;
        Ok(flow)
    }

    fn execute_try(
        &mut self,
        body: &[Stmt],
        catches: &[CatchClause],
        finally: Option<&[Stmt]>,
    ) -> Exec {
        let outcome = match self.execute_block(body) {
            Err(exc) => match catches.iter().find(|c| self.catch_matches(c, &exc)) {
                Some(clause) => {
                    let child = Environment::with_parent(Rc::clone(&self.env));
                    if let Some(binding) = &clause.binding {
                        child.borrow_mut().define(
                            binding.clone(),
                            Value::exception(exc),
                            None,
                        );
                    }
                    self.execute_in(child, &clause.body)
                }
                None => Err(exc),
            },
            other => other,
        };
        if let Some(finally) = finally {
            // A finally block always runs; its own failure wins over the
            // body's outcome.
            self.execute_block(finally)?;
        }
        outcome
    }

    fn catch_matches(&self, clause: &CatchClause, exc: &Exception) -> bool {
        let filter = match &clause.filter {
            None => return true,
            Some(filter) => filter,
        };
        if filter == "Exception" || filter == &exc.kind {
            return true;
        }
        // A filter naming an ancestor class matches exceptions thrown as
        // instances of a subclass.
        let mut current = self.classes.get(&exc.kind);
        while let Some(class) = current {
            if let Some(parent) = &class.parent {
                if parent == filter {
                    return true;
                }
                current = self.classes.get(parent);
            } else {
                break;
            }
        }
        false
    }

    /// Converts a thrown value into an exception.
    fn raise(&self, value: Value) -> Exception {
        match &*value.0 {
            ValueKind::Exception(exc) => exc.clone(),
            ValueKind::Str(message) => Exception::new("Exception", message.clone()),
            ValueKind::Instance(instance) => {
                let borrowed = instance.borrow();
                let message = borrowed
                    .fields
                    .get("message")
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| format!("<{} instance>", borrowed.class));
                let kind = borrowed.class.clone();
                drop(borrowed);
                Exception::new(kind, message).with_payload(value.clone())
            }
            _ => Exception::new("Exception", value.to_string()),
        }
    }

    // --- expressions ---

    fn evaluate(&mut self, expr: &Expr) -> Eval {
        self.set_cursor(expr.pos);
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(literal_value(lit)),
            ExprKind::Variable(name) => Environment::get(&self.env, name),
            ExprKind::Binary { op, left, right } => self.eval_binary(*op, left, right),
            ExprKind::Unary { op, expr: inner } => {
                let value = self.evaluate(inner)?;
                match op {
                    UnaryOp::Not => Ok(Value::bool(!value.is_truthy())),
                    UnaryOp::Negate => match &*value.0 {
                        ValueKind::Int(n) => Ok(Value::int(-n)),
                        ValueKind::Float(f) => Ok(Value::float(-f)),
                        _ => Err(Exception::type_error(format!(
                            "cannot negate a value of type {}",
                            value.type_name()
                        ))),
                    },
                }
            }
            ExprKind::Assign { target, value } => self.eval_assign(target, value),
            ExprKind::Call { callee, args } => self.eval_call(callee, args),
            ExprKind::ListLiteral(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.evaluate(item)?);
                }
                Ok(Value::list(Type::Unknown, values))
            }
            ExprKind::MapLiteral(entries) => {
                let map = Value::map(Type::Unknown, Type::Unknown);
                if let ValueKind::Map(inner) = &*map.0 {
                    for (key_expr, value_expr) in entries {
                        let key = self.evaluate(key_expr)?;
                        let value = self.evaluate(value_expr)?;
                        let key = MapKey::from_value(&key)?;
                        inner.entries.borrow_mut().insert(key, value);
                    }
                }
                Ok(map)
            }
            ExprKind::Group(inner) => self.evaluate(inner),
            ExprKind::Index { target, index } => {
                let container = self.evaluate(target)?;
                let index = self.evaluate(index)?;
                index_get(&container, &index)
            }
            ExprKind::Field { target, field } => {
                let owner = self.evaluate(target)?;
                self.field_get(&owner, field)
            }
            ExprKind::Lambda { params, body } => Ok(Value::new(ValueKind::Function(UserFunction {
                name: None,
                params: params.clone(),
                body: body.clone(),
                env: Rc::clone(&self.env),
                is_async: false,
                this: self.this_stack.last().cloned().flatten(),
            }))),
            ExprKind::New { class, args } => self.eval_new(class, args),
            ExprKind::This => match self.this_stack.last().cloned().flatten() {
                Some(instance) => Ok(Value::new(ValueKind::Instance(instance))),
                None => Err(Exception::name_error(
                    "`this` is only available inside methods",
                )),
            },
            ExprKind::Await(inner) => {
                let value = self.evaluate(inner)?;
                match &*value.0 {
                    ValueKind::Task(handle) => self.await_task(&handle.clone()),
                    _ => Err(Exception::type_error(format!(
                        "`await` expects a Task, found {}",
                        value.type_name()
                    ))),
                }
            }
        }
    }

    fn eval_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Eval {
        // Logical operators short-circuit before the right side evaluates.
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            let lhs = self.evaluate(left)?;
            return match op {
                BinaryOp::And if !lhs.is_truthy() => Ok(Value::bool(false)),
                BinaryOp::Or if lhs.is_truthy() => Ok(Value::bool(true)),
                _ => Ok(Value::bool(self.evaluate(right)?.is_truthy())),
            };
        }
        let lhs = self.evaluate(left)?;
        let rhs = self.evaluate(right)?;
        binary_values(op, &lhs, &rhs)
    }

    fn eval_assign(&mut self, target: &Expr, value: &Expr) -> Eval {
        let value = self.evaluate(value)?;
        match &target.kind {
            ExprKind::Variable(name) => {
                Environment::assign(&self.env, name, value.clone())?;
                Ok(value)
            }
            ExprKind::Index {
                target: container,
                index,
            } => {
                let container = self.evaluate(container)?;
                let index = self.evaluate(index)?;
                index_set(&container, &index, value.clone())?;
                Ok(value)
            }
            ExprKind::Field {
                target: owner,
                field,
            } => {
                let owner = self.evaluate(owner)?;
                match &*owner.0 {
                    ValueKind::Instance(instance) => {
                        instance
                            .borrow_mut()
                            .fields
                            .insert(field.clone(), value.clone());
                        Ok(value)
                    }
                    _ => Err(Exception::type_error(format!(
                        "cannot set field `{field}` on a value of type {}",
                        owner.type_name()
                    ))),
                }
            }
            _ => Err(Exception::type_error("invalid assignment target")),
        }
    }

    fn field_get(&mut self, owner: &Value, field: &str) -> Eval {
        match &*owner.0 {
            ValueKind::Module(module) => module.exports.get(field).cloned().ok_or_else(|| {
                Exception::name_error(format!(
                    "module `{}` has no export `{field}`",
                    module.name
                ))
            }),
            ValueKind::Instance(instance) => {
                if let Some(value) = instance.borrow().fields.get(field) {
                    return Ok(value.clone());
                }
                if let Some(method) = self.find_method(&instance.borrow().class, field) {
                    return Ok(Value::new(ValueKind::Function(
                        self.bind_method(&method, Rc::clone(instance)),
                    )));
                }
                Err(Exception::name_error(format!(
                    "`{}` has no member `{field}`",
                    instance.borrow().class
                )))
            }
            _ => Err(Exception::type_error(format!(
                "{} has no member `{field}`; call its methods directly",
                owner.type_name()
            ))),
        }
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr]) -> Eval {
        if let ExprKind::Field { target, field } = &callee.kind {
            let owner = self.evaluate(target)?;
            match &*owner.0 {
                ValueKind::List(_) | ValueKind::Map(_) | ValueKind::Set(_) | ValueKind::Str(_) => {
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.evaluate(arg)?);
                    }
                    return collection_method(&owner, field, &values);
                }
                ValueKind::Instance(instance) => {
                    let method = self
                        .find_method(&instance.borrow().class, field)
                        .ok_or_else(|| {
                            Exception::name_error(format!(
                                "`{}` has no method `{field}`",
                                instance.borrow().class
                            ))
                        })?;
                    let bound = self.bind_method(&method, Rc::clone(instance));
                    let values = self.fill_arguments(&bound.params, args, field)?;
                    return self.invoke(&bound, values);
                }
                ValueKind::Module(module) => {
                    let export = module.exports.get(field).cloned().ok_or_else(|| {
                        Exception::name_error(format!(
                            "module `{}` has no export `{field}`",
                            module.name
                        ))
                    })?;
                    return self.call_value(&export, args, field);
                }
                _ => {
                    return Err(Exception::type_error(format!(
                        "{} has no method `{field}`",
                        owner.type_name()
                    )));
                }
            }
        }
        let callee_value = self.evaluate(callee)?;
        let label = match &callee.kind {
            ExprKind::Variable(name) => name.as_str(),
            _ => "<anonymous>",
        };
        self.call_value(&callee_value, args, label)
    }

    fn call_value(&mut self, callee: &Value, args: &[Expr], label: &str) -> Eval {
        match &*callee.0 {
            ValueKind::Function(function) => {
                let function = function.clone();
                let values = self.fill_arguments(&function.params, args, label)?;
                self.invoke(&function, values)
            }
            ValueKind::NativeFunction(native) => {
                let native = native.clone();
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.evaluate(arg)?);
                }
                if native.effect == Effect::Io {
                    debug!(function = native.name, "io native call");
                }
                native.call(&values)
            }
            _ => Err(Exception::type_error(format!(
                "`{label}` is not callable (found {})",
                callee.type_name()
            ))),
        }
    }

    /// Evaluates call arguments left to right, then fills omitted trailing
    /// parameters by evaluating their default expressions in the caller's
    /// scope at this call site.
    fn fill_arguments(
        &mut self,
        params: &[Param],
        args: &[Expr],
        label: &str,
    ) -> Result<Vec<Value>, Exception> {
        if args.len() > params.len() {
            return Err(Exception::type_error(format!(
                "`{label}` expected at most {} arguments but received {}",
                params.len(),
                args.len()
            )));
        }
        let mut values = Vec::with_capacity(params.len());
        for arg in args {
            values.push(self.evaluate(arg)?);
        }
        for param in params.iter().skip(args.len()) {
            match &param.default {
                Some(default) => values.push(self.evaluate(default)?),
                None => {
                    return Err(Exception::type_error(format!(
                        "`{label}` missing required argument `{}`",
                        param.name
                    )));
                }
            }
        }
        Ok(values)
    }

    /// Calls a user function with fully materialized arguments. An async
    /// function does not run here: it becomes an unstarted task.
    fn invoke(&mut self, function: &UserFunction, values: Vec<Value>) -> Eval {
        if function.is_async {
            let handle = self.scheduler.spawn(function.clone(), values);
            debug!(task = handle.id, "spawned task");
            return Ok(Value::new(ValueKind::Task(handle)));
        }
        self.run_function(function, values)
    }

    fn run_function(&mut self, function: &UserFunction, values: Vec<Value>) -> Eval {
        let name = function
            .name
            .clone()
            .unwrap_or_else(|| "<anonymous>".into());
        let child = Environment::with_parent(Rc::clone(&function.env));
        {
            let mut scope = child.borrow_mut();
            for (param, value) in function.params.iter().zip(values) {
                scope.define(param.name.clone(), value, None);
            }
        }
        let entry = function
            .body
            .first()
            .map(|stmt| stmt.pos)
            .unwrap_or_else(SourcePos::start);
        self.frames.push(Frame {
            name: name.clone(),
            pos: entry,
        });
        self.this_stack.push(function.this.clone());
        let result = self.execute_in(child, &function.body);
        self.this_stack.pop();
        match result {
            Ok(FlowControl::Return(value)) => {
                self.frames.pop();
                Ok(value)
            }
            Ok(_) => {
                self.frames.pop();
                Ok(Value::null())
            }
            Err(mut exc) => {
                let pos = self.cursor();
                exc.push_frame(name, pos);
                self.frames.pop();
                Err(exc)
            }
        }
    }

    fn find_method(&self, class: &str, name: &str) -> Option<Rc<crate::ast::MethodDecl>> {
        let mut current = self.classes.get(class);
        while let Some(decl) = current {
            if let Some(method) = decl.methods.iter().find(|m| m.name == name) {
                return Some(Rc::new(method.clone()));
            }
            current = decl
                .parent
                .as_ref()
                .and_then(|parent| self.classes.get(parent));
        }
        None
    }

    fn bind_method(
        &self,
        method: &crate::ast::MethodDecl,
        instance: InstanceRef,
    ) -> UserFunction {
        UserFunction {
            name: Some(method.name.clone()),
            params: method.params.clone(),
            body: method.body.clone(),
            env: Rc::clone(&self.globals),
            is_async: method.is_async,
            this: Some(instance),
        }
    }

    fn eval_new(&mut self, class: &TypeExpr, args: &[Expr]) -> Eval {
        let resolved = Type::from_annotation(class, &self.config.root_types);
        match resolved {
            Type::Generic {
                base,
                args: mut args_ty,
            } if base == "List" => {
                let element = args_ty.pop().unwrap_or(Type::Unknown);
                self.require_no_args(args, "List")?;
                Ok(Value::list(element, Vec::new()))
            }
            Type::Generic {
                base,
                args: mut args_ty,
            } if base == "Map" => {
                let value_ty = args_ty.pop().unwrap_or(Type::Unknown);
                let key_ty = args_ty.pop().unwrap_or(Type::Unknown);
                self.require_no_args(args, "Map")?;
                Ok(Value::map(key_ty, value_ty))
            }
            Type::Generic {
                base,
                args: mut args_ty,
            } if base == "Set" => {
                let element = args_ty.pop().unwrap_or(Type::Unknown);
                self.require_no_args(args, "Set")?;
                Ok(Value::set(element))
            }
            Type::Class(name) => self.instantiate(&name, args),
            other => Err(Exception::type_error(format!("cannot instantiate {other}"))),
        }
    }

    fn require_no_args(&self, args: &[Expr], base: &str) -> Result<(), Exception> {
        if args.is_empty() {
            Ok(())
        } else {
            Err(Exception::type_error(format!(
                "`new {base}` does not take constructor arguments"
            )))
        }
    }

    fn instantiate(&mut self, class: &str, args: &[Expr]) -> Eval {
        let decl = self
            .classes
            .get(class)
            .cloned()
            .ok_or_else(|| Exception::name_error(format!("unknown class `{class}`")))?;
        let instance: InstanceRef = Rc::new(std::cell::RefCell::new(Instance {
            class: class.to_string(),
            fields: IndexMap::new(),
        }));
        // Field defaults run ancestor-first so a subclass default can shadow
        // its parent's.
        let mut chain = Vec::new();
        let mut current = Some(decl);
        while let Some(link) = current {
            current = link
                .parent
                .as_ref()
                .and_then(|parent| self.classes.get(parent).cloned());
            chain.push(link);
        }
        for link in chain.iter().rev() {
            for field in &link.fields {
                let value = match &field.default {
                    Some(default) => self.evaluate(default)?,
                    None => Value::null(),
                };
                instance
                    .borrow_mut()
                    .fields
                    .insert(field.name.clone(), value);
            }
        }
        if let Some(ctor) = self.find_method(class, "constructor") {
            let bound = self.bind_method(&ctor, Rc::clone(&instance));
            let values = self.fill_arguments(&bound.params, args, "constructor")?;
            self.run_function(&bound, values)?;
        } else if !args.is_empty() {
            return Err(Exception::type_error(format!(
                "class `{class}` has no constructor taking arguments"
            )));
        }
        Ok(Value::new(ValueKind::Instance(instance)))
    }

    // --- tasks ---

    /// Drives the scheduler until the awaited task completes. Tasks that
    /// became ready earlier run first; readiness order is await order.
    fn await_task(&mut self, handle: &TaskHandle) -> Eval {
        if let Some(result) = handle.result() {
            return result;
        }
        if handle.is_running() {
            return Err(Exception::new(
                "TaskError",
                "task is already being awaited",
            ));
        }
        self.scheduler.mark_ready(handle);
        while handle.result().is_none() {
            let next = match self.scheduler.next_ready() {
                Some(next) => next,
                None => {
                    return Err(Exception::new(
                        "TaskError",
                        "awaited task never became ready",
                    ));
                }
            };
            let (function, args) = match next.take_pending() {
                Some(pending) => pending,
                None => continue,
            };
            debug!(task = next.id, "task started");
            let result = self.run_function(&function, args);
            debug!(task = next.id, ok = result.is_ok(), "task finished");
            next.finish(result);
        }
        match handle.result() {
            Some(result) => result,
            None => Err(Exception::new("TaskError", "task completed without a result")),
        }
    }

    // --- modules ---

    /// Materializes a configured builtin module on first import: native
    /// functions first, then the overlay script's top-level bindings layered
    /// over them.
    fn import_module(&mut self, name: &str) -> Eval {
        if let Some(module) = self.modules.get(name) {
            return Ok(Value::new(ValueKind::Module(module.clone())));
        }
        let registry = Rc::clone(&self.registry);
        let def = registry
            .module(name)
            .ok_or_else(|| Exception::name_error(format!("unknown module `{name}`")))?;
        let mut exports: IndexMap<String, Value> = def
            .natives
            .values()
            .map(|native| {
                (
                    native.name.to_string(),
                    Value::new(ValueKind::NativeFunction(native.clone())),
                )
            })
            .collect();
        if let Some(program) = def.overlay.clone() {
            let scope = Environment::with_parent(Rc::clone(&self.globals));
            for (export, value) in &exports {
                scope.borrow_mut().define(export.clone(), value.clone(), None);
            }
            self.frames.push(Frame {
                name: format!("<module {name}>"),
                pos: SourcePos::start(),
            });
            let outcome = self.execute_in(Rc::clone(&scope), &program.statements);
            self.frames.pop();
            if let Err(mut exc) = outcome {
                exc.push_frame(format!("<module {name}>"), SourcePos::start());
                return Err(exc);
            }
            for (binding, value) in scope.borrow().snapshot() {
                exports.insert(binding, value);
            }
        }
        let module = ModuleValue {
            name: name.to_string(),
            exports,
        };
        self.modules.insert(name.to_string(), module.clone());
        Ok(Value::new(ValueKind::Module(module)))
    }
}

// --- helpers ---

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Int(n) => Value::int(*n),
        Literal::Float(f) => Value::float(*f),
        Literal::Bool(b) => Value::bool(*b),
        Literal::Str(s) => Value::string(s.clone()),
        Literal::Null => Value::null(),
    }
}

fn binary_values(op: BinaryOp, lhs: &Value, rhs: &Value) -> Eval {
    match op {
        BinaryOp::Equal => return Ok(Value::bool(lhs.equals(rhs))),
        BinaryOp::NotEqual => return Ok(Value::bool(!lhs.equals(rhs))),
        _ => {}
    }
    if let (ValueKind::Str(a), ValueKind::Str(b)) = (&*lhs.0, &*rhs.0) {
        return match op {
            BinaryOp::Add => Ok(Value::string(format!("{a}{b}"))),
            BinaryOp::Less => Ok(Value::bool(a < b)),
            BinaryOp::LessEqual => Ok(Value::bool(a <= b)),
            BinaryOp::Greater => Ok(Value::bool(a > b)),
            BinaryOp::GreaterEqual => Ok(Value::bool(a >= b)),
            _ => Err(Exception::type_error(format!(
                "operator `{}` cannot combine string and string",
                op_symbol(op)
            ))),
        };
    }
    match (&*lhs.0, &*rhs.0) {
        (ValueKind::Int(a), ValueKind::Int(b)) => int_binary(op, *a, *b),
        (ValueKind::Int(a), ValueKind::Float(b)) => float_binary(op, *a as f64, *b),
        (ValueKind::Float(a), ValueKind::Int(b)) => float_binary(op, *a, *b as f64),
        (ValueKind::Float(a), ValueKind::Float(b)) => float_binary(op, *a, *b),
        _ => Err(Exception::type_error(format!(
            "operator `{}` cannot combine {} and {}",
            op_symbol(op),
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

fn int_binary(op: BinaryOp, a: i64, b: i64) -> Eval {
    let value = match op {
        BinaryOp::Add => Value::int(a.wrapping_add(b)),
        BinaryOp::Sub => Value::int(a.wrapping_sub(b)),
        BinaryOp::Mul => Value::int(a.wrapping_mul(b)),
        BinaryOp::Div => {
            if b == 0 {
                return Err(Exception::new("ZeroDivisionError", "division by zero"));
            }
            Value::int(a.wrapping_div(b))
        }
        BinaryOp::Mod => {
            if b == 0 {
                return Err(Exception::new("ZeroDivisionError", "modulo by zero"));
            }
            Value::int(a.wrapping_rem(b))
        }
        BinaryOp::Less => Value::bool(a < b),
        BinaryOp::LessEqual => Value::bool(a <= b),
        BinaryOp::Greater => Value::bool(a > b),
        BinaryOp::GreaterEqual => Value::bool(a >= b),
        _ => return Err(Exception::type_error("unsupported integer operation")),
    };
    Ok(value)
}

fn float_binary(op: BinaryOp, a: f64, b: f64) -> Eval {
    let value = match op {
        BinaryOp::Add => Value::float(a + b),
        BinaryOp::Sub => Value::float(a - b),
        BinaryOp::Mul => Value::float(a * b),
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(Exception::new("ZeroDivisionError", "division by zero"));
            }
            Value::float(a / b)
        }
        BinaryOp::Mod => Value::float(a % b),
        BinaryOp::Less => Value::bool(a < b),
        BinaryOp::LessEqual => Value::bool(a <= b),
        BinaryOp::Greater => Value::bool(a > b),
        BinaryOp::GreaterEqual => Value::bool(a >= b),
        _ => return Err(Exception::type_error("unsupported float operation")),
    };
    Ok(value)
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

fn index_get(container: &Value, index: &Value) -> Eval {
    match &*container.0 {
        ValueKind::List(list) => {
            let idx = list_index(index, list.items.borrow().len())?;
            Ok(list.items.borrow()[idx].clone())
        }
        ValueKind::Map(map) => {
            let key = MapKey::from_value(index)?;
            map.entries
                .borrow()
                .get(&key)
                .cloned()
                .ok_or_else(|| Exception::key_error(format!("missing key `{key}`")))
        }
        ValueKind::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = list_index(index, chars.len())?;
            Ok(Value::string(chars[idx].to_string()))
        }
        _ => Err(Exception::type_error(format!(
            "cannot index into a value of type {}",
            container.type_name()
        ))),
    }
}

fn index_set(container: &Value, index: &Value, value: Value) -> Result<(), Exception> {
    match &*container.0 {
        ValueKind::List(list) => {
            list.admit(&value)?;
            let idx = list_index(index, list.items.borrow().len())?;
            list.items.borrow_mut()[idx] = value;
            Ok(())
        }
        ValueKind::Map(map) => {
            map.admit(index, &value)?;
            let key = MapKey::from_value(index)?;
            map.entries.borrow_mut().insert(key, value);
            Ok(())
        }
        _ => Err(Exception::type_error(format!(
            "cannot assign by index into a value of type {}",
            container.type_name()
        ))),
    }
}

fn list_index(index: &Value, len: usize) -> Result<usize, Exception> {
    let raw = match &*index.0 {
        ValueKind::Int(n) => *n,
        _ => {
            return Err(Exception::type_error(format!(
                "index must be int, found {}",
                index.type_name()
            )));
        }
    };
    if raw < 0 || raw as usize >= len {
        return Err(Exception::index_error(format!(
            "index {raw} out of range for length {len}"
        )));
    }
    Ok(raw as usize)
}

fn iterate(value: &Value) -> Result<Vec<Value>, Exception> {
    match &*value.0 {
        ValueKind::List(list) => Ok(list.items.borrow().clone()),
        ValueKind::Map(map) => Ok(map
            .entries
            .borrow()
            .iter()
            .map(|(key, value)| {
                Value::list(Type::Unknown, vec![key.to_value(), value.clone()])
            })
            .collect()),
        ValueKind::Set(set) => Ok(set.items.borrow().iter().map(MapKey::to_value).collect()),
        ValueKind::Str(s) => Ok(s
            .chars()
            .map(|c| Value::string(c.to_string()))
            .collect()),
        _ => Err(Exception::type_error(format!(
            "cannot iterate over a value of type {}",
            value.type_name()
        ))),
    }
}

fn arity(method: &str, expected: usize, args: &[Value]) -> Result<(), Exception> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(Exception::type_error(format!(
            "`{method}` expected {expected} arguments but received {}",
            args.len()
        )))
    }
}

/// Methods on the built-in containers and strings. Mutating list and map
/// methods enforce the receiver's declared element types at runtime.
fn collection_method(owner: &Value, method: &str, args: &[Value]) -> Eval {
    match &*owner.0 {
        ValueKind::List(list) => match method {
            "push" => {
                arity("push", 1, args)?;
                list.admit(&args[0])?;
                list.items.borrow_mut().push(args[0].clone());
                Ok(Value::null())
            }
            "pop" => {
                arity("pop", 0, args)?;
                list.items
                    .borrow_mut()
                    .pop()
                    .ok_or_else(|| Exception::index_error("pop from an empty list"))
            }
            "get" => {
                arity("get", 1, args)?;
                let idx = list_index(&args[0], list.items.borrow().len())?;
                Ok(list.items.borrow()[idx].clone())
            }
            "set" => {
                arity("set", 2, args)?;
                list.admit(&args[1])?;
                let idx = list_index(&args[0], list.items.borrow().len())?;
                list.items.borrow_mut()[idx] = args[1].clone();
                Ok(Value::null())
            }
            "remove_at" => {
                arity("remove_at", 1, args)?;
                let idx = list_index(&args[0], list.items.borrow().len())?;
                Ok(list.items.borrow_mut().remove(idx))
            }
            "index_of" => {
                arity("index_of", 1, args)?;
                let found = list
                    .items
                    .borrow()
                    .iter()
                    .position(|item| item.equals(&args[0]));
                Ok(Value::int(found.map(|i| i as i64).unwrap_or(-1)))
            }
            "contains" => {
                arity("contains", 1, args)?;
                Ok(Value::bool(
                    list.items.borrow().iter().any(|item| item.equals(&args[0])),
                ))
            }
            "slice" => {
                arity("slice", 2, args)?;
                let items = list.items.borrow();
                let start = list_index(&args[0], items.len() + 1)?;
                let end = list_index(&args[1], items.len() + 1)?;
                if start > end {
                    return Err(Exception::index_error(format!(
                        "slice start {start} is past end {end}"
                    )));
                }
                Ok(Value::list(
                    list.element.clone(),
                    items[start..end].to_vec(),
                ))
            }
            "join" => {
                arity("join", 1, args)?;
                let separator = match &*args[0].0 {
                    ValueKind::Str(s) => s.clone(),
                    _ => {
                        return Err(Exception::type_error(format!(
                            "`join` expected string, found {}",
                            args[0].type_name()
                        )));
                    }
                };
                let joined = list
                    .items
                    .borrow()
                    .iter()
                    .map(|item| item.to_string())
                    .collect::<Vec<_>>()
                    .join(&separator);
                Ok(Value::string(joined))
            }
            "len" => {
                arity("len", 0, args)?;
                Ok(Value::int(list.items.borrow().len() as i64))
            }
            "clear" => {
                arity("clear", 0, args)?;
                list.items.borrow_mut().clear();
                Ok(Value::null())
            }
            _ => Err(no_method("List", method)),
        },
        ValueKind::Map(map) => match method {
            "get" => {
                arity("get", 1, args)?;
                let key = MapKey::from_value(&args[0])?;
                map.entries
                    .borrow()
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| Exception::key_error(format!("missing key `{key}`")))
            }
            "set" => {
                arity("set", 2, args)?;
                map.admit(&args[0], &args[1])?;
                let key = MapKey::from_value(&args[0])?;
                map.entries.borrow_mut().insert(key, args[1].clone());
                Ok(Value::null())
            }
            "has" => {
                arity("has", 1, args)?;
                let key = MapKey::from_value(&args[0])?;
                Ok(Value::bool(map.entries.borrow().contains_key(&key)))
            }
            "remove" => {
                arity("remove", 1, args)?;
                let key = MapKey::from_value(&args[0])?;
                map.entries
                    .borrow_mut()
                    .shift_remove(&key)
                    .ok_or_else(|| Exception::key_error(format!("missing key `{key}`")))
            }
            "keys" => {
                arity("keys", 0, args)?;
                Ok(Value::list(
                    map.key.clone(),
                    map.entries.borrow().keys().map(MapKey::to_value).collect(),
                ))
            }
            "values" => {
                arity("values", 0, args)?;
                Ok(Value::list(
                    map.value.clone(),
                    map.entries.borrow().values().cloned().collect(),
                ))
            }
            "len" => {
                arity("len", 0, args)?;
                Ok(Value::int(map.entries.borrow().len() as i64))
            }
            "clear" => {
                arity("clear", 0, args)?;
                map.entries.borrow_mut().clear();
                Ok(Value::null())
            }
            _ => Err(no_method("Map", method)),
        },
        ValueKind::Set(set) => match method {
            "add" => {
                arity("add", 1, args)?;
                set.admit(&args[0])?;
                let key = MapKey::from_value(&args[0])?;
                set.items.borrow_mut().insert(key);
                Ok(Value::null())
            }
            "has" => {
                arity("has", 1, args)?;
                let key = MapKey::from_value(&args[0])?;
                Ok(Value::bool(set.items.borrow().contains(&key)))
            }
            "remove" => {
                arity("remove", 1, args)?;
                let key = MapKey::from_value(&args[0])?;
                Ok(Value::bool(set.items.borrow_mut().shift_remove(&key)))
            }
            "values" => {
                arity("values", 0, args)?;
                Ok(Value::list(
                    set.element.clone(),
                    set.items.borrow().iter().map(MapKey::to_value).collect(),
                ))
            }
            "len" => {
                arity("len", 0, args)?;
                Ok(Value::int(set.items.borrow().len() as i64))
            }
            "clear" => {
                arity("clear", 0, args)?;
                set.items.borrow_mut().clear();
                Ok(Value::null())
            }
            _ => Err(no_method("Set", method)),
        },
        ValueKind::Str(s) => string_method(s, method, args),
        _ => Err(no_method(&owner.type_name(), method)),
    }
}

fn string_method(s: &str, method: &str, args: &[Value]) -> Eval {
    let expect_str = |value: &Value, name: &str| match &*value.0 {
        ValueKind::Str(s) => Ok(s.clone()),
        _ => Err(Exception::type_error(format!(
            "`{name}` expected string, found {}",
            value.type_name()
        ))),
    };
    match method {
        "len" => {
            arity("len", 0, args)?;
            Ok(Value::int(s.chars().count() as i64))
        }
        "upper" => {
            arity("upper", 0, args)?;
            Ok(Value::string(s.to_uppercase()))
        }
        "lower" => {
            arity("lower", 0, args)?;
            Ok(Value::string(s.to_lowercase()))
        }
        "trim" => {
            arity("trim", 0, args)?;
            Ok(Value::string(s.trim().to_string()))
        }
        "split" => {
            arity("split", 1, args)?;
            let separator = expect_str(&args[0], "split")?;
            let parts: Vec<Value> = if separator.is_empty() {
                s.chars().map(|c| Value::string(c.to_string())).collect()
            } else {
                s.split(&separator)
                    .map(|part| Value::string(part.to_string()))
                    .collect()
            };
            Ok(Value::list(Type::Str, parts))
        }
        "contains" => {
            arity("contains", 1, args)?;
            Ok(Value::bool(s.contains(&expect_str(&args[0], "contains")?)))
        }
        "starts_with" => {
            arity("starts_with", 1, args)?;
            Ok(Value::bool(
                s.starts_with(&expect_str(&args[0], "starts_with")?),
            ))
        }
        "ends_with" => {
            arity("ends_with", 1, args)?;
            Ok(Value::bool(s.ends_with(&expect_str(&args[0], "ends_with")?)))
        }
        "replace" => {
            arity("replace", 2, args)?;
            let from = expect_str(&args[0], "replace")?;
            let to = expect_str(&args[1], "replace")?;
            Ok(Value::string(s.replace(&from, &to)))
        }
        "substring" => {
            arity("substring", 2, args)?;
            let chars: Vec<char> = s.chars().collect();
            let start = list_index(&args[0], chars.len() + 1)?;
            let end = list_index(&args[1], chars.len() + 1)?;
            if start > end {
                return Err(Exception::index_error(format!(
                    "substring start {start} is past end {end}"
                )));
            }
            Ok(Value::string(chars[start..end].iter().collect::<String>()))
        }
        _ => Err(no_method("string", method)),
    }
}

fn no_method(receiver: &str, method: &str) -> Exception {
    Exception::name_error(format!("{receiver} has no method `{method}`"))
}

/// Globals available to every program without an import.
fn install_builtins(globals: &EnvironmentRef) {
    let mut scope = globals.borrow_mut();
    let mut install = |native: NativeFunction| {
        scope.define(
            native.name.to_string(),
            Value::new(ValueKind::NativeFunction(native)),
            None,
        );
    };
    install(NativeFunction {
        name: "print",
        params: Vec::new(),
        ret: Type::Null,
        effect: Effect::Io,
        variadic: true,
        callback: builtin_print,
    });
    install(NativeFunction {
        name: "len",
        params: vec![Type::Unknown],
        ret: Type::Int,
        effect: Effect::Pure,
        variadic: false,
        callback: collections_len,
    });
    install(NativeFunction {
        name: "type_of",
        params: vec![Type::Unknown],
        ret: Type::Str,
        effect: Effect::Pure,
        variadic: false,
        callback: builtin_type_of,
    });
    install(NativeFunction {
        name: "exception_kind",
        params: vec![Type::Unknown],
        ret: Type::Str,
        effect: Effect::Pure,
        variadic: false,
        callback: builtin_exception_kind,
    });
    install(NativeFunction {
        name: "exception_message",
        params: vec![Type::Unknown],
        ret: Type::Str,
        effect: Effect::Pure,
        variadic: false,
        callback: builtin_exception_message,
    });
    install(NativeFunction {
        name: "exception_trace",
        params: vec![Type::Unknown],
        ret: Type::list(Type::Str),
        effect: Effect::Pure,
        variadic: false,
        callback: builtin_exception_trace,
    });
}

fn builtin_print(args: &[Value]) -> Result<Value, Exception> {
    let line = args
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    println!("{line}");
    Ok(Value::null())
}

fn builtin_type_of(args: &[Value]) -> Result<Value, Exception> {
    Ok(Value::string(args[0].type_name()))
}

fn expect_exception(value: &Value, name: &str) -> Result<Exception, Exception> {
    match &*value.0 {
        ValueKind::Exception(exc) => Ok(exc.clone()),
        _ => Err(Exception::type_error(format!(
            "`{name}` expected a caught exception, found {}",
            value.type_name()
        ))),
    }
}

fn builtin_exception_kind(args: &[Value]) -> Result<Value, Exception> {
    let exc = expect_exception(&args[0], "exception_kind")?;
    Ok(Value::string(exc.kind))
}

fn builtin_exception_message(args: &[Value]) -> Result<Value, Exception> {
    let exc = expect_exception(&args[0], "exception_message")?;
    Ok(Value::string(exc.message))
}

fn builtin_exception_trace(args: &[Value]) -> Result<Value, Exception> {
    let exc = expect_exception(&args[0], "exception_trace")?;
    let frames = exc
        .frames
        .iter()
        .map(|frame| {
            Value::string(format!(
                "{} (line {}, column {})",
                frame.function, frame.line, frame.column
            ))
        })
        .collect();
    Ok(Value::list(Type::Str, frames))
}
