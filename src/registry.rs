use std::fs;

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::{
    ast::Program,
    checker::TypeChecker,
    config::LanguageConfig,
    diagnostics::{CallaError, Result},
    exception::Exception,
    parser,
    types::Type,
    value::{Effect, MapKey, NativeFunction, Value, ValueKind},
};

/// One builtin capability module: its native function table plus an optional
/// overlay script parsed from `<module-root>/<name>.ca`.
pub struct ModuleDef {
    pub name: String,
    pub natives: IndexMap<String, NativeFunction>,
    pub overlay: Option<Program>,
}

/// Name-to-module mapping populated eagerly at startup from configuration.
/// Immutable after load; any number of tasks may read it concurrently.
pub struct Registry {
    modules: IndexMap<String, ModuleDef>,
}

impl Registry {
    /// Eagerly loads every configured module. A module name the runtime does
    /// not provide, a missing overlay file, or an overlay that fails its own
    /// parse or type check all abort with `ModuleLoadError` before any user
    /// statement executes.
    pub fn load(config: &LanguageConfig) -> Result<Registry> {
        let mut modules = IndexMap::new();
        for name in &config.builtin_modules {
            let natives = match name.as_str() {
                "fs" => fs_module(),
                "http" => http_module(),
                "collections" => collections_module(),
                "vector" => vector_module(),
                "math" => math_module(),
                "json" => json_module(),
                other => {
                    return Err(CallaError::ModuleLoad {
                        module: other.to_string(),
                        reason: "no builtin module with this name".into(),
                    });
                }
            };
            let overlay = match &config.module_root {
                Some(root) => {
                    let path = root.join(format!("{name}.ca"));
                    let source = fs::read_to_string(&path).map_err(|err| CallaError::ModuleLoad {
                        module: name.clone(),
                        reason: format!("cannot read `{}`: {err}", path.display()),
                    })?;
                    let program =
                        parser::parse_program(&source, config).map_err(|diag| {
                            CallaError::ModuleLoad {
                                module: name.clone(),
                                reason: diag.to_string(),
                            }
                        })?;
                    debug!(module = %name, path = %path.display(), "parsed module overlay");
                    Some(program)
                }
                None => None,
            };
            modules.insert(
                name.clone(),
                ModuleDef {
                    name: name.clone(),
                    natives,
                    overlay,
                },
            );
        }

        let registry = Registry { modules };

        // Overlays are type-checked with their own module's exports in scope,
        // matching the environment they execute in at import time; a broken
        // overlay is a startup failure, not a user-code diagnostic.
        for def in registry.modules.values() {
            if let Some(program) = &def.overlay {
                let diagnostics = TypeChecker::new(config, &registry)
                    .with_module_globals(&def.name)
                    .check(program);
                if let Some(error) = diagnostics.iter().find(|d| d.is_error()) {
                    return Err(CallaError::ModuleLoad {
                        module: def.name.clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        info!("{}", registry.summary());
        Ok(registry)
    }

    pub fn module(&self, name: &str) -> Option<&ModuleDef> {
        self.modules.get(name)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleDef> {
        self.modules.values()
    }

    /// Stable one-line summary consumed by external tooling: module count
    /// plus names sorted lexically.
    pub fn summary(&self) -> String {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        format!("{} modules loaded ({})", names.len(), names.join(", "))
    }
}

fn native(
    name: &'static str,
    params: Vec<Type>,
    ret: Type,
    effect: Effect,
    callback: fn(&[Value]) -> std::result::Result<Value, Exception>,
) -> NativeFunction {
    NativeFunction {
        name,
        params,
        ret,
        effect,
        variadic: false,
        callback,
    }
}

fn module(entries: Vec<NativeFunction>) -> IndexMap<String, NativeFunction> {
    entries
        .into_iter()
        .map(|fun| (fun.name.to_string(), fun))
        .collect()
}

fn expect_string(value: &Value, name: &str) -> std::result::Result<String, Exception> {
    match &*value.0 {
        ValueKind::Str(s) => Ok(s.clone()),
        _ => Err(Exception::type_error(format!(
            "`{name}` expected string, found {}",
            value.type_name()
        ))),
    }
}

fn expect_int(value: &Value, name: &str) -> std::result::Result<i64, Exception> {
    match &*value.0 {
        ValueKind::Int(n) => Ok(*n),
        _ => Err(Exception::type_error(format!(
            "`{name}` expected int, found {}",
            value.type_name()
        ))),
    }
}

fn expect_number(value: &Value, name: &str) -> std::result::Result<f64, Exception> {
    match &*value.0 {
        ValueKind::Int(n) => Ok(*n as f64),
        ValueKind::Float(f) => Ok(*f),
        _ => Err(Exception::type_error(format!(
            "`{name}` expected a numeric value, found {}",
            value.type_name()
        ))),
    }
}

fn expect_numbers(value: &Value, name: &str) -> std::result::Result<Vec<f64>, Exception> {
    match &*value.0 {
        ValueKind::List(list) => list
            .items
            .borrow()
            .iter()
            .map(|item| expect_number(item, name))
            .collect(),
        _ => Err(Exception::type_error(format!(
            "`{name}` expected a list of numbers, found {}",
            value.type_name()
        ))),
    }
}

fn float_list(values: Vec<f64>) -> Value {
    Value::list(Type::Float, values.into_iter().map(Value::float).collect())
}

fn io_error(name: &str, path: &str, err: std::io::Error) -> Exception {
    Exception::new("IoError", format!("`{name}` failed for `{path}`: {err}"))
}

// --- fs ---

fn fs_module() -> IndexMap<String, NativeFunction> {
    module(vec![
        native("read_text", vec![Type::Str], Type::Str, Effect::Io, fs_read_text),
        native(
            "write_text",
            vec![Type::Str, Type::Str],
            Type::Null,
            Effect::Io,
            fs_write_text,
        ),
        native(
            "append_text",
            vec![Type::Str, Type::Str],
            Type::Null,
            Effect::Io,
            fs_append_text,
        ),
        native("exists", vec![Type::Str], Type::Bool, Effect::Io, fs_exists),
        native("is_file", vec![Type::Str], Type::Bool, Effect::Io, fs_is_file),
        native("is_dir", vec![Type::Str], Type::Bool, Effect::Io, fs_is_dir),
        native("make_dir", vec![Type::Str], Type::Null, Effect::Io, fs_make_dir),
        native("remove", vec![Type::Str], Type::Null, Effect::Io, fs_remove),
        native(
            "list_dir",
            vec![Type::Str],
            Type::list(Type::Str),
            Effect::Io,
            fs_list_dir,
        ),
    ])
}

fn fs_read_text(args: &[Value]) -> std::result::Result<Value, Exception> {
    let path = expect_string(&args[0], "fs.read_text")?;
    fs::read_to_string(&path)
        .map(Value::string)
        .map_err(|err| io_error("fs.read_text", &path, err))
}

fn fs_write_text(args: &[Value]) -> std::result::Result<Value, Exception> {
    let path = expect_string(&args[0], "fs.write_text")?;
    let contents = expect_string(&args[1], "fs.write_text")?;
    fs::write(&path, contents)
        .map(|_| Value::null())
        .map_err(|err| io_error("fs.write_text", &path, err))
}

fn fs_append_text(args: &[Value]) -> std::result::Result<Value, Exception> {
    use std::io::Write;
    let path = expect_string(&args[0], "fs.append_text")?;
    let contents = expect_string(&args[1], "fs.append_text")?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|err| io_error("fs.append_text", &path, err))?;
    file.write_all(contents.as_bytes())
        .map(|_| Value::null())
        .map_err(|err| io_error("fs.append_text", &path, err))
}

fn fs_exists(args: &[Value]) -> std::result::Result<Value, Exception> {
    let path = expect_string(&args[0], "fs.exists")?;
    Ok(Value::bool(std::path::Path::new(&path).exists()))
}

fn fs_is_file(args: &[Value]) -> std::result::Result<Value, Exception> {
    let path = expect_string(&args[0], "fs.is_file")?;
    Ok(Value::bool(std::path::Path::new(&path).is_file()))
}

fn fs_is_dir(args: &[Value]) -> std::result::Result<Value, Exception> {
    let path = expect_string(&args[0], "fs.is_dir")?;
    Ok(Value::bool(std::path::Path::new(&path).is_dir()))
}

fn fs_make_dir(args: &[Value]) -> std::result::Result<Value, Exception> {
    let path = expect_string(&args[0], "fs.make_dir")?;
    fs::create_dir_all(&path)
        .map(|_| Value::null())
        .map_err(|err| io_error("fs.make_dir", &path, err))
}

fn fs_remove(args: &[Value]) -> std::result::Result<Value, Exception> {
    let path = expect_string(&args[0], "fs.remove")?;
    let target = std::path::Path::new(&path);
    let result = if target.is_dir() {
        fs::remove_dir_all(target)
    } else {
        fs::remove_file(target)
    };
    result
        .map(|_| Value::null())
        .map_err(|err| io_error("fs.remove", &path, err))
}

fn fs_list_dir(args: &[Value]) -> std::result::Result<Value, Exception> {
    let path = expect_string(&args[0], "fs.list_dir")?;
    let mut names = Vec::new();
    let entries = fs::read_dir(&path).map_err(|err| io_error("fs.list_dir", &path, err))?;
    for entry in entries {
        let entry = entry.map_err(|err| io_error("fs.list_dir", &path, err))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort_unstable();
    Ok(Value::list(
        Type::Str,
        names.into_iter().map(Value::string).collect(),
    ))
}

// --- http ---

fn http_module() -> IndexMap<String, NativeFunction> {
    module(vec![native(
        "request",
        vec![Type::map(Type::Str, Type::Unknown)],
        Type::map(Type::Str, Type::Unknown),
        Effect::Io,
        http_request,
    )])
}

/// Deterministic mock transport: the response echoes the request so scripts
/// and tests never depend on a live network.
fn http_request(args: &[Value]) -> std::result::Result<Value, Exception> {
    let options = match &*args[0].0 {
        ValueKind::Map(map) => map.clone(),
        _ => {
            return Err(Exception::type_error(format!(
                "`http.request` expected an options map, found {}",
                args[0].type_name()
            )));
        }
    };
    let entries = options.entries.borrow();
    let url = entries
        .get(&MapKey::Str("url".into()))
        .map(|v| v.to_string())
        .ok_or_else(|| Exception::key_error("`http.request` options require a `url` entry"))?;
    let method = entries
        .get(&MapKey::Str("method".into()))
        .map(|v| v.to_string())
        .unwrap_or_else(|| "GET".to_string());

    let body = serde_json::json!({ "url": url, "method": method });
    let response = Value::map(Type::Str, Type::Unknown);
    if let ValueKind::Map(map) = &*response.0 {
        let headers = Value::map(Type::Str, Type::Str);
        if let ValueKind::Map(header_map) = &*headers.0 {
            header_map.entries.borrow_mut().insert(
                MapKey::Str("content-type".into()),
                Value::string("application/json"),
            );
        }
        let mut out = map.entries.borrow_mut();
        out.insert(MapKey::Str("status".into()), Value::int(200));
        out.insert(MapKey::Str("body".into()), Value::string(body.to_string()));
        out.insert(MapKey::Str("headers".into()), headers);
    }
    Ok(response)
}

// --- collections ---

fn collections_module() -> IndexMap<String, NativeFunction> {
    module(vec![
        native(
            "range",
            vec![Type::Int, Type::Int],
            Type::list(Type::Int),
            Effect::Pure,
            collections_range,
        ),
        native(
            "range_step",
            vec![Type::Int, Type::Int, Type::Int],
            Type::list(Type::Int),
            Effect::Pure,
            collections_range_step,
        ),
        native("len", vec![Type::Unknown], Type::Int, Effect::Pure, collections_len),
    ])
}

fn collections_range(args: &[Value]) -> std::result::Result<Value, Exception> {
    let start = expect_int(&args[0], "collections.range")?;
    let end = expect_int(&args[1], "collections.range")?;
    let step = if start <= end { 1 } else { -1 };
    range_impl(start, end, step)
}

fn collections_range_step(args: &[Value]) -> std::result::Result<Value, Exception> {
    let start = expect_int(&args[0], "collections.range_step")?;
    let end = expect_int(&args[1], "collections.range_step")?;
    let step = expect_int(&args[2], "collections.range_step")?;
    if step == 0 {
        return Err(Exception::new("ValueError", "range step must be non-zero"));
    }
    range_impl(start, end, step)
}

fn range_impl(start: i64, end: i64, step: i64) -> std::result::Result<Value, Exception> {
    let mut values = Vec::new();
    let mut current = start;
    if step > 0 {
        while current < end {
            values.push(Value::int(current));
            current += step;
        }
    } else {
        while current > end {
            values.push(Value::int(current));
            current += step;
        }
    }
    Ok(Value::list(Type::Int, values))
}

pub(crate) fn collections_len(args: &[Value]) -> std::result::Result<Value, Exception> {
    let len = match &*args[0].0 {
        ValueKind::Str(s) => s.chars().count(),
        ValueKind::List(list) => list.items.borrow().len(),
        ValueKind::Map(map) => map.entries.borrow().len(),
        ValueKind::Set(set) => set.items.borrow().len(),
        _ => {
            return Err(Exception::type_error(format!(
                "`len` expected string, List, Map, or Set, found {}",
                args[0].type_name()
            )));
        }
    };
    Ok(Value::int(len as i64))
}

// --- vector ---

fn vector_module() -> IndexMap<String, NativeFunction> {
    let vec_ty = || Type::list(Type::Float);
    module(vec![
        native("dot", vec![vec_ty(), vec_ty()], Type::Float, Effect::Pure, vector_dot),
        native("norm", vec![vec_ty()], Type::Float, Effect::Pure, vector_norm),
        native(
            "scale",
            vec![vec_ty(), Type::Float],
            Type::list(Type::Float),
            Effect::Pure,
            vector_scale,
        ),
        native(
            "add",
            vec![vec_ty(), vec_ty()],
            Type::list(Type::Float),
            Effect::Pure,
            vector_add,
        ),
        native(
            "cosine",
            vec![vec_ty(), vec_ty()],
            Type::Float,
            Effect::Pure,
            vector_cosine,
        ),
    ])
}

fn paired(
    args: &[Value],
    name: &str,
) -> std::result::Result<(Vec<f64>, Vec<f64>), Exception> {
    let left = expect_numbers(&args[0], name)?;
    let right = expect_numbers(&args[1], name)?;
    if left.len() != right.len() {
        return Err(Exception::new(
            "ValueError",
            format!(
                "`{name}` expects vectors of equal length, found {} and {}",
                left.len(),
                right.len()
            ),
        ));
    }
    Ok((left, right))
}

fn vector_dot(args: &[Value]) -> std::result::Result<Value, Exception> {
    let (left, right) = paired(args, "vector.dot")?;
    Ok(Value::float(
        left.iter().zip(right.iter()).map(|(a, b)| a * b).sum(),
    ))
}

fn vector_norm(args: &[Value]) -> std::result::Result<Value, Exception> {
    let values = expect_numbers(&args[0], "vector.norm")?;
    Ok(Value::float(
        values.iter().map(|v| v * v).sum::<f64>().sqrt(),
    ))
}

fn vector_scale(args: &[Value]) -> std::result::Result<Value, Exception> {
    let values = expect_numbers(&args[0], "vector.scale")?;
    let factor = expect_number(&args[1], "vector.scale")?;
    Ok(float_list(values.into_iter().map(|v| v * factor).collect()))
}

fn vector_add(args: &[Value]) -> std::result::Result<Value, Exception> {
    let (left, right) = paired(args, "vector.add")?;
    Ok(float_list(
        left.iter().zip(right.iter()).map(|(a, b)| a + b).collect(),
    ))
}

fn vector_cosine(args: &[Value]) -> std::result::Result<Value, Exception> {
    let (left, right) = paired(args, "vector.cosine")?;
    let dot: f64 = left.iter().zip(right.iter()).map(|(a, b)| a * b).sum();
    let norm_left = left.iter().map(|v| v * v).sum::<f64>().sqrt();
    let norm_right = right.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm_left == 0.0 || norm_right == 0.0 {
        return Err(Exception::new(
            "ValueError",
            "`vector.cosine` is undefined for zero-length vectors",
        ));
    }
    Ok(Value::float(dot / (norm_left * norm_right)))
}

// --- math ---

fn math_module() -> IndexMap<String, NativeFunction> {
    let matrix = || Type::list(Type::list(Type::Float));
    module(vec![
        native("abs", vec![Type::Unknown], Type::Unknown, Effect::Pure, math_abs),
        native("floor", vec![Type::Float], Type::Int, Effect::Pure, math_floor),
        native("ceil", vec![Type::Float], Type::Int, Effect::Pure, math_ceil),
        native("round", vec![Type::Float], Type::Int, Effect::Pure, math_round),
        native("sqrt", vec![Type::Float], Type::Float, Effect::Pure, math_sqrt),
        native(
            "pow",
            vec![Type::Float, Type::Float],
            Type::Float,
            Effect::Pure,
            math_pow,
        ),
        native(
            "matmul",
            vec![matrix(), matrix()],
            matrix(),
            Effect::Pure,
            math_matmul,
        ),
        native("transpose", vec![matrix()], matrix(), Effect::Pure, math_transpose),
    ])
}

fn math_abs(args: &[Value]) -> std::result::Result<Value, Exception> {
    match &*args[0].0 {
        ValueKind::Int(n) => Ok(Value::int(n.abs())),
        ValueKind::Float(f) => Ok(Value::float(f.abs())),
        _ => Err(Exception::type_error(format!(
            "`math.abs` expected a numeric value, found {}",
            args[0].type_name()
        ))),
    }
}

fn math_floor(args: &[Value]) -> std::result::Result<Value, Exception> {
    let value = expect_number(&args[0], "math.floor")?;
    Ok(Value::int(value.floor() as i64))
}

fn math_ceil(args: &[Value]) -> std::result::Result<Value, Exception> {
    let value = expect_number(&args[0], "math.ceil")?;
    Ok(Value::int(value.ceil() as i64))
}

fn math_round(args: &[Value]) -> std::result::Result<Value, Exception> {
    let value = expect_number(&args[0], "math.round")?;
    Ok(Value::int(value.round() as i64))
}

fn math_sqrt(args: &[Value]) -> std::result::Result<Value, Exception> {
    let value = expect_number(&args[0], "math.sqrt")?;
    if value < 0.0 {
        return Err(Exception::new(
            "ValueError",
            "`math.sqrt` expects a non-negative input",
        ));
    }
    Ok(Value::float(value.sqrt()))
}

fn math_pow(args: &[Value]) -> std::result::Result<Value, Exception> {
    let base = expect_number(&args[0], "math.pow")?;
    let exponent = expect_number(&args[1], "math.pow")?;
    Ok(Value::float(base.powf(exponent)))
}

fn expect_matrix(value: &Value, name: &str) -> std::result::Result<Vec<Vec<f64>>, Exception> {
    match &*value.0 {
        ValueKind::List(list) => {
            let rows: Vec<Vec<f64>> = list
                .items
                .borrow()
                .iter()
                .map(|row| expect_numbers(row, name))
                .collect::<std::result::Result<_, _>>()?;
            if let Some(first) = rows.first() {
                if rows.iter().any(|row| row.len() != first.len()) {
                    return Err(Exception::new(
                        "ValueError",
                        format!("`{name}` expects rectangular matrices"),
                    ));
                }
            }
            Ok(rows)
        }
        _ => Err(Exception::type_error(format!(
            "`{name}` expected a matrix (list of rows), found {}",
            value.type_name()
        ))),
    }
}

fn matrix_value(rows: Vec<Vec<f64>>) -> Value {
    Value::list(
        Type::list(Type::Float),
        rows.into_iter().map(float_list).collect(),
    )
}

fn math_matmul(args: &[Value]) -> std::result::Result<Value, Exception> {
    let left = expect_matrix(&args[0], "math.matmul")?;
    let right = expect_matrix(&args[1], "math.matmul")?;
    let inner = left.first().map(Vec::len).unwrap_or(0);
    if right.len() != inner {
        return Err(Exception::new(
            "ValueError",
            format!(
                "`math.matmul` dimension mismatch: {}x{inner} times {}x{}",
                left.len(),
                right.len(),
                right.first().map(Vec::len).unwrap_or(0)
            ),
        ));
    }
    let cols = right.first().map(Vec::len).unwrap_or(0);
    let mut out = vec![vec![0.0; cols]; left.len()];
    for (i, row) in left.iter().enumerate() {
        for (k, &value) in row.iter().enumerate() {
            for j in 0..cols {
                out[i][j] += value * right[k][j];
            }
        }
    }
    Ok(matrix_value(out))
}

fn math_transpose(args: &[Value]) -> std::result::Result<Value, Exception> {
    let matrix = expect_matrix(&args[0], "math.transpose")?;
    let rows = matrix.len();
    let cols = matrix.first().map(Vec::len).unwrap_or(0);
    let mut out = vec![vec![0.0; rows]; cols];
    for (i, row) in matrix.iter().enumerate() {
        for (j, &value) in row.iter().enumerate() {
            out[j][i] = value;
        }
    }
    Ok(matrix_value(out))
}

// --- json ---

fn json_module() -> IndexMap<String, NativeFunction> {
    module(vec![
        native("parse", vec![Type::Str], Type::Unknown, Effect::Pure, json_parse),
        native("stringify", vec![Type::Unknown], Type::Str, Effect::Pure, json_stringify),
    ])
}

fn json_parse(args: &[Value]) -> std::result::Result<Value, Exception> {
    let text = expect_string(&args[0], "json.parse")?;
    let parsed: serde_json::Value = serde_json::from_str(&text)
        .map_err(|err| Exception::new("ValueError", format!("`json.parse` failed: {err}")))?;
    Ok(json_to_value(&parsed))
}

fn json_stringify(args: &[Value]) -> std::result::Result<Value, Exception> {
    let json = value_to_json(&args[0])?;
    Ok(Value::string(json.to_string()))
}

fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::null(),
        serde_json::Value::Bool(b) => Value::bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::int(i)
            } else {
                Value::float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::string(s.clone()),
        serde_json::Value::Array(items) => Value::list(
            Type::Unknown,
            items.iter().map(json_to_value).collect(),
        ),
        serde_json::Value::Object(entries) => {
            let map = Value::map(Type::Str, Type::Unknown);
            if let ValueKind::Map(inner) = &*map.0 {
                let mut out = inner.entries.borrow_mut();
                for (key, value) in entries {
                    out.insert(MapKey::Str(key.clone()), json_to_value(value));
                }
            }
            map
        }
    }
}

fn value_to_json(value: &Value) -> std::result::Result<serde_json::Value, Exception> {
    Ok(match &*value.0 {
        ValueKind::Null => serde_json::Value::Null,
        ValueKind::Bool(b) => serde_json::Value::Bool(*b),
        ValueKind::Int(n) => serde_json::Value::from(*n),
        ValueKind::Float(f) => serde_json::Value::from(*f),
        ValueKind::Str(s) => serde_json::Value::String(s.clone()),
        ValueKind::List(list) => serde_json::Value::Array(
            list.items
                .borrow()
                .iter()
                .map(value_to_json)
                .collect::<std::result::Result<_, _>>()?,
        ),
        ValueKind::Map(map) => {
            let mut out = serde_json::Map::new();
            for (key, entry) in map.entries.borrow().iter() {
                out.insert(key.to_string(), value_to_json(entry)?);
            }
            serde_json::Value::Object(out)
        }
        ValueKind::Set(set) => serde_json::Value::Array(
            set.items
                .borrow()
                .iter()
                .map(|key| value_to_json(&key.to_value()))
                .collect::<std::result::Result<_, _>>()?,
        ),
        _ => {
            return Err(Exception::type_error(format!(
                "`json.stringify` cannot serialize a {}",
                value.type_name()
            )));
        }
    })
}
