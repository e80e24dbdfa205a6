use log::debug;

use crate::builtins;
use crate::env::Environments;
use crate::error::{AtomError, AtomResult};
use crate::heap::{Heap, Object};
use crate::lexer;
use crate::parser::Parser;
use crate::printer;
use crate::symbol::{sym, SymbolTable};
use crate::value::{EnvId, SymbolId, Value};

/// The calling convention for applicative built-ins: arguments arrive
/// already evaluated, left-to-right, in the caller's environment.
pub type NativeFn = fn(&mut Interp, &[Value]) -> AtomResult<Value>;

/// Special forms. They are bound in the global frame like any procedure,
/// but the evaluator dispatches them inline on raw syntax so that tail
/// positions can continue the evaluation loop.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FormKind {
    Quote,
    If,
    Set,
    Define,
    Lambda,
    Begin,
    Let,
    LetStar,
    Cond,
    Case,
    And,
    Or,
    Quasiquote,
}

/// The interpreter handle. All state lives here so the collector can find
/// its roots and embedders get an explicit context instead of ambient
/// globals.
pub struct Interp {
    pub heap: Heap,
    pub symbols: SymbolTable,
    pub envs: Environments,
    /// The root environment; the collector's sole root.
    pub global: EnvId,
    /// Depth of nested `load` calls; collection runs only when the
    /// outermost load finishes.
    load_depth: usize,
}

enum ProcKind {
    Form(FormKind),
    Native(NativeFn),
    Closure {
        formals: Value,
        body: Value,
        env: EnvId,
    },
}

impl Interp {
    pub fn new() -> Self {
        let mut envs = Environments::new();
        let global = envs.new_root();
        let mut interp = Interp {
            heap: Heap::new(),
            symbols: SymbolTable::new(),
            envs,
            global,
            load_depth: 0,
        };
        builtins::install(&mut interp);
        interp
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Evaluate one expression. The loop rewrites `env`/`expr` in place for
    /// tail positions: the final expression of a body, `if` branches,
    /// `cond`/`case` clause tails, `begin`, and the last `and`/`or` operand.
    pub fn eval(&mut self, env: EnvId, expr: Value) -> AtomResult<Value> {
        let mut env = env;
        let mut expr = expr;

        'eval: loop {
            let id = match expr {
                Value::Symbol(name) => return self.lookup(env, name),
                Value::Nil => {
                    return Err(AtomError::Domain(
                        "missing procedure in expression".to_string(),
                    ))
                }
                Value::Pair(id) => id,
                // Booleans, numbers, characters, strings, vectors and the
                // rest self-evaluate.
                other => return Ok(other),
            };

            // An application. The head must be a symbol naming a procedure;
            // computed operators are not supported.
            let head = self.heap.car(id);
            let op = head.as_symbol().ok_or(AtomError::Type {
                expected: "symbol",
                actual: head.type_name(),
            })?;
            let rest = self.heap.cdr(id);

            let callee = self.lookup(env, op)?;
            let pid = match callee {
                Value::Procedure(pid) => pid,
                _ => {
                    return Err(AtomError::Domain(format!(
                        "{} is not a procedure",
                        self.symbols.name(op)
                    )))
                }
            };
            let kind = match self.heap.object(pid) {
                Object::Form(k) => ProcKind::Form(*k),
                Object::Native { f, .. } => ProcKind::Native(*f),
                Object::Closure { formals, body, env } => ProcKind::Closure {
                    formals: *formals,
                    body: *body,
                    env: *env,
                },
                _ => unreachable!("procedure cell expected"),
            };

            match kind {
                ProcKind::Native(f) => {
                    let args = self.eval_args(env, rest)?;
                    return f(self, &args);
                }

                ProcKind::Closure {
                    formals,
                    body,
                    env: captured,
                } => {
                    let child = self.envs.new_child(captured);
                    self.bind_formals(child, formals, env, rest)?;
                    expr = self.eval_body_head(child, body)?;
                    env = child;
                }

                ProcKind::Form(form) => match form {
                    FormKind::Quote => return self.syntax_req(rest, 1),

                    FormKind::If => {
                        let test = self.syntax_req(rest, 1)?;
                        let test = self.eval(env, test)?;
                        if test.is_truthy() {
                            expr = self.syntax_req(rest, 2)?;
                        } else {
                            match self.syntax_opt(rest, 3) {
                                Some(alternate) => expr = alternate,
                                // No alternate: the result is unspecified;
                                // the test value (necessarily #f) is handy.
                                None => return Ok(test),
                            }
                        }
                    }

                    FormKind::Set => {
                        let var = self.syntax_req(rest, 1)?;
                        let name = var.as_symbol().ok_or(AtomError::Type {
                            expected: "symbol",
                            actual: var.type_name(),
                        })?;
                        let value = self.syntax_req(rest, 2)?;
                        let value = self.eval(env, value)?;
                        if !self.envs.set(env, name, value) {
                            return Err(AtomError::Unbound(
                                self.symbols.name(name).to_string(),
                            ));
                        }
                        return Ok(value);
                    }

                    FormKind::Define => return self.form_define(env, rest),

                    FormKind::Lambda => {
                        let formals = self.syntax_req(rest, 1)?;
                        let body = self.syntax_tail(rest);
                        return self.make_procedure(env, formals, body);
                    }

                    FormKind::Begin => {
                        if rest.is_nil() {
                            return Ok(Value::Bool(false));
                        }
                        expr = self.eval_body_head(env, rest)?;
                    }

                    FormKind::Let | FormKind::LetStar => {
                        let star = form == FormKind::LetStar;
                        let bindings = self.syntax_req(rest, 1)?;
                        let body = self.syntax_tail(rest);
                        if body.is_nil() {
                            return Err(AtomError::Domain("No expression in body".to_string()));
                        }

                        let child = self.envs.new_child(env);
                        // let evaluates each init in the outer environment;
                        // let* in the child, so earlier bindings are visible.
                        let target = if star { child } else { env };

                        let mut b = bindings;
                        while let Value::Pair(bid) = b {
                            let binding = self.heap.car(bid);
                            let pid = binding.as_pair().ok_or(AtomError::Type {
                                expected: "pair",
                                actual: binding.type_name(),
                            })?;
                            let var = self.heap.car(pid);
                            let name = var.as_symbol().ok_or(AtomError::Type {
                                expected: "symbol",
                                actual: var.type_name(),
                            })?;
                            let init = self.syntax_req(self.heap.cdr(pid), 1)?;
                            let init = self.eval(target, init)?;
                            self.envs.define(child, name, init);
                            b = self.heap.cdr(bid);
                        }

                        expr = self.eval_body_head(child, body)?;
                        env = child;
                    }

                    FormKind::Cond => {
                        let mut clause = rest;
                        while let Value::Pair(cid) = clause {
                            let c = self.heap.car(cid);
                            let tid = c.as_pair().ok_or(AtomError::Domain(
                                "malformed cond clause".to_string(),
                            ))?;
                            let test = self.heap.car(tid);
                            let is_else =
                                matches!(test, Value::Symbol(s) if s == sym::ELSE);
                            let value = if is_else {
                                Value::Bool(true)
                            } else {
                                self.eval(env, test)?
                            };
                            if value.is_truthy() {
                                let body = self.heap.cdr(tid);
                                if body.is_nil() {
                                    // A clause of only a test yields the
                                    // test's value.
                                    return Ok(value);
                                }
                                expr = self.eval_body_head(env, body)?;
                                continue 'eval;
                            }
                            clause = self.heap.cdr(cid);
                        }
                        return Ok(Value::Bool(false));
                    }

                    FormKind::Case => {
                        let key = self.syntax_req(rest, 1)?;
                        let key = self.eval(env, key)?;
                        let mut clause = self.syntax_tail(rest);
                        while let Value::Pair(cid) = clause {
                            let c = self.heap.car(cid);
                            let tid = c.as_pair().ok_or(AtomError::Domain(
                                "malformed case clause".to_string(),
                            ))?;
                            let datums = self.heap.car(tid);
                            let matched = if matches!(datums, Value::Symbol(s) if s == sym::ELSE)
                            {
                                true
                            } else {
                                self.case_matches(key, datums)?
                            };
                            if matched {
                                let body = self.heap.cdr(tid);
                                if body.is_nil() {
                                    return Ok(Value::Bool(false));
                                }
                                expr = self.eval_body_head(env, body)?;
                                continue 'eval;
                            }
                            clause = self.heap.cdr(cid);
                        }
                        return Ok(Value::Bool(false));
                    }

                    FormKind::And => {
                        if rest.is_nil() {
                            return Ok(Value::Bool(true));
                        }
                        let mut cell = rest;
                        loop {
                            let cid = cell.as_pair().ok_or(AtomError::Domain(
                                "malformed argument list".to_string(),
                            ))?;
                            let e = self.heap.car(cid);
                            let next = self.heap.cdr(cid);
                            if next.is_nil() {
                                expr = e;
                                continue 'eval;
                            }
                            let value = self.eval(env, e)?;
                            if !value.is_truthy() {
                                return Ok(value);
                            }
                            cell = next;
                        }
                    }

                    FormKind::Or => {
                        if rest.is_nil() {
                            return Ok(Value::Bool(false));
                        }
                        let mut cell = rest;
                        loop {
                            let cid = cell.as_pair().ok_or(AtomError::Domain(
                                "malformed argument list".to_string(),
                            ))?;
                            let e = self.heap.car(cid);
                            let next = self.heap.cdr(cid);
                            if next.is_nil() {
                                expr = e;
                                continue 'eval;
                            }
                            let value = self.eval(env, e)?;
                            if value.is_truthy() {
                                return Ok(value);
                            }
                            cell = next;
                        }
                    }

                    FormKind::Quasiquote => {
                        let template = self.syntax_req(rest, 1)?;
                        return self.quasiquote(env, template);
                    }
                },
            }
        }
    }

    /// Apply an already-evaluated procedure to already-evaluated arguments.
    /// Entry point for the `apply` built-in.
    pub fn apply_procedure(&mut self, callee: Value, args: &[Value]) -> AtomResult<Value> {
        let pid = match callee {
            Value::Procedure(pid) => pid,
            other => {
                return Err(AtomError::Type {
                    expected: "procedure",
                    actual: other.type_name(),
                })
            }
        };
        let kind = match self.heap.object(pid) {
            Object::Form(k) => ProcKind::Form(*k),
            Object::Native { f, .. } => ProcKind::Native(*f),
            Object::Closure { formals, body, env } => ProcKind::Closure {
                formals: *formals,
                body: *body,
                env: *env,
            },
            _ => unreachable!("procedure cell expected"),
        };
        match kind {
            ProcKind::Native(f) => f(self, args),
            ProcKind::Closure {
                formals,
                body,
                env: captured,
            } => {
                let child = self.envs.new_child(captured);
                let mut formal = formals;
                let mut supplied = args.iter();
                let mut count = 0;
                while let Value::Pair(fid) = formal {
                    let var = self.heap.car(fid);
                    let name = var.as_symbol().ok_or(AtomError::Type {
                        expected: "symbol",
                        actual: var.type_name(),
                    })?;
                    count += 1;
                    let value = supplied
                        .next()
                        .copied()
                        .ok_or(AtomError::Arity { expected: count })?;
                    self.envs.define(child, name, value);
                    formal = self.heap.cdr(fid);
                }
                let last = self.eval_body_head(child, body)?;
                self.eval(child, last)
            }
            ProcKind::Form(_) => Err(AtomError::Domain(
                "cannot apply a special form".to_string(),
            )),
        }
    }

    /// Evaluate each argument expression left-to-right in the caller's
    /// environment.
    fn eval_args(&mut self, env: EnvId, list: Value) -> AtomResult<Vec<Value>> {
        let mut args = Vec::new();
        let mut current = list;
        while let Value::Pair(id) = current {
            let e = self.heap.car(id);
            args.push(self.eval(env, e)?);
            current = self.heap.cdr(id);
        }
        if !current.is_nil() {
            return Err(AtomError::Domain("malformed argument list".to_string()));
        }
        Ok(args)
    }

    /// Bind a closure's formals in `child`, evaluating argument expressions
    /// in the caller's environment. Missing arguments are an arity error;
    /// surplus arguments are ignored.
    fn bind_formals(
        &mut self,
        child: EnvId,
        formals: Value,
        caller: EnvId,
        mut args: Value,
    ) -> AtomResult<()> {
        let mut formal = formals;
        let mut count = 0;
        while let Value::Pair(fid) = formal {
            let var = self.heap.car(fid);
            let name = var.as_symbol().ok_or(AtomError::Type {
                expected: "symbol",
                actual: var.type_name(),
            })?;
            count += 1;
            let aid = match args {
                Value::Pair(aid) => aid,
                _ => return Err(AtomError::Arity { expected: count }),
            };
            let value = self.eval(caller, self.heap.car(aid))?;
            self.envs.define(child, name, value);
            formal = self.heap.cdr(fid);
            args = self.heap.cdr(aid);
        }
        Ok(())
    }

    /// Evaluate all but the last expression of a non-empty body for effect
    /// and hand back the last expression unevaluated, for the caller's
    /// tail loop.
    fn eval_body_head(&mut self, env: EnvId, body: Value) -> AtomResult<Value> {
        let mut stmt = body;
        loop {
            let id = match stmt {
                Value::Pair(id) => id,
                _ => return Err(AtomError::Domain("malformed body".to_string())),
            };
            let e = self.heap.car(id);
            let next = self.heap.cdr(id);
            if next.is_nil() {
                return Ok(e);
            }
            self.eval(env, e)?;
            stmt = next;
        }
    }

    fn form_define(&mut self, env: EnvId, rest: Value) -> AtomResult<Value> {
        let first = self.syntax_req(rest, 1)?;
        match first {
            Value::Symbol(name) => {
                let value = self.syntax_req(rest, 2)?;
                let value = self.eval(env, value)?;
                self.envs.define(env, name, value);
            }
            Value::Pair(fid) => {
                // (define (name . formals) body...) is sugar for a lambda.
                let var = self.heap.car(fid);
                let name = var.as_symbol().ok_or(AtomError::Type {
                    expected: "symbol",
                    actual: var.type_name(),
                })?;
                let formals = self.heap.cdr(fid);
                let body = self.syntax_tail(rest);
                let value = self.make_procedure(env, formals, body)?;
                self.envs.define(env, name, value);
            }
            _ => {
                return Err(AtomError::Domain(
                    "symbol or pair expected as parameter 1 to define".to_string(),
                ))
            }
        }
        // The result of a definition is unspecified.
        Ok(Value::Bool(false))
    }

    fn make_procedure(&mut self, env: EnvId, formals: Value, body: Value) -> AtomResult<Value> {
        match formals {
            Value::Nil | Value::Pair(_) => {}
            other => {
                return Err(AtomError::Type {
                    expected: "pair",
                    actual: other.type_name(),
                })
            }
        }
        if !body.is_pair() {
            return Err(AtomError::Type {
                expected: "pair",
                actual: body.type_name(),
            });
        }
        Ok(self.heap.alloc_closure(formals, body, env))
    }

    /// One level of quasiquotation: `(unquote x)` evaluates, a spliced
    /// `(unquote-splicing x)` must produce a list whose elements are
    /// inserted in place; everything else is copied structurally. Vectors
    /// in the template are not descended into.
    fn quasiquote(&mut self, env: EnvId, template: Value) -> AtomResult<Value> {
        let id = match template {
            Value::Pair(id) => id,
            other => return Ok(other),
        };

        if let Some(s) = self.heap.car(id).as_symbol() {
            if s == sym::UNQUOTE {
                let inner = self.syntax_req(self.heap.cdr(id), 1)?;
                return self.eval(env, inner);
            }
            if s == sym::UNQUOTE_SPLICING {
                return Err(AtomError::Domain(
                    "unquote-splicing outside list".to_string(),
                ));
            }
        }

        let mut items = Vec::new();
        let mut current = template;
        while let Value::Pair(cid) = current {
            let head = self.heap.car(cid);
            let tag = match head {
                Value::Pair(hid) => self.heap.car(hid).as_symbol().map(|s| (s, hid)),
                _ => None,
            };
            match tag {
                Some((s, hid)) if s == sym::UNQUOTE => {
                    let inner = self.syntax_req(self.heap.cdr(hid), 1)?;
                    items.push(self.eval(env, inner)?);
                }
                Some((s, hid)) if s == sym::UNQUOTE_SPLICING => {
                    let inner = self.syntax_req(self.heap.cdr(hid), 1)?;
                    let spliced = self.eval(env, inner)?;
                    match self.heap.list_to_vec(spliced) {
                        Some(elems) => items.extend(elems),
                        None => {
                            return Err(AtomError::Type {
                                expected: "pair",
                                actual: spliced.type_name(),
                            })
                        }
                    }
                }
                _ => {
                    let expanded = self.quasiquote(env, head)?;
                    items.push(expanded);
                }
            }
            current = self.heap.cdr(cid);
        }

        // A dotted tail is kept literally.
        Ok(self.heap.list_with_tail(&items, current))
    }

    fn case_matches(&self, key: Value, datums: Value) -> AtomResult<bool> {
        let mut current = datums;
        while let Value::Pair(id) = current {
            if builtins::eq_helper(&self.heap, key, self.heap.car(id), true, false) {
                return Ok(true);
            }
            current = self.heap.cdr(id);
        }
        Ok(false)
    }

    fn lookup(&self, env: EnvId, name: SymbolId) -> AtomResult<Value> {
        self.envs
            .get(env, name)
            .ok_or_else(|| AtomError::Unbound(self.symbols.name(name).to_string()))
    }

    /// 1-based positional access into raw syntax; missing positions are
    /// arity errors.
    fn syntax_req(&self, list: Value, n: usize) -> AtomResult<Value> {
        self.syntax_opt(list, n)
            .ok_or(AtomError::Arity { expected: n })
    }

    fn syntax_opt(&self, list: Value, n: usize) -> Option<Value> {
        let mut current = list;
        for _ in 1..n {
            current = match current {
                Value::Pair(id) => self.heap.cdr(id),
                _ => return None,
            };
        }
        match current {
            Value::Pair(id) => Some(self.heap.car(id)),
            _ => None,
        }
    }

    /// Everything after the first element of a syntax list.
    fn syntax_tail(&self, list: Value) -> Value {
        match list {
            Value::Pair(id) => self.heap.cdr(id),
            _ => Value::Nil,
        }
    }

    // ========================================================================
    // Garbage collection
    // ========================================================================

    /// Precise mark-and-sweep from the root environment. Returns the number
    /// of cells and frames reclaimed.
    pub fn collect_garbage(&mut self) -> (usize, usize) {
        let mut objs = Vec::new();
        let mut env_wl = vec![self.global];
        loop {
            self.envs
                .process_worklist(&mut env_wl, &mut objs, &mut self.heap);
            self.heap.process_worklist(&mut objs, &mut env_wl);
            if env_wl.is_empty() && objs.is_empty() {
                break;
            }
        }
        let cells = self.heap.sweep();
        let frames = self.envs.sweep();
        debug!(
            "gc: {} cells collected, {} remain allocated",
            cells,
            self.heap.live_count()
        );
        (cells, frames)
    }

    // ========================================================================
    // Top-level driver
    // ========================================================================

    /// Load a source text: tokenize it all, then repeatedly parse a datum,
    /// evaluate it, and print the result. Any error stops the remainder of
    /// the text and is reported to stderr; recovery happens here. The
    /// collector runs when the outermost load finishes, error or not.
    pub fn load(&mut self, source: &str) {
        self.load_depth += 1;
        if let Err(e) = self.load_inner(source) {
            eprintln!("Error: {}", e);
        }
        self.load_depth -= 1;
        if self.load_depth == 0 {
            self.collect_garbage();
        }
    }

    fn load_inner(&mut self, source: &str) -> AtomResult<()> {
        let tokens = lexer::tokenize(source)?;
        let mut pos = 0;
        loop {
            let (datum, next) = {
                let mut parser = Parser::new(&tokens, pos, &mut self.heap, &mut self.symbols);
                match parser.next_datum()? {
                    Some(d) => (d, parser.position()),
                    None => break,
                }
            };
            pos = next;
            let value = self.eval(self.global, datum)?;
            println!("{}", printer::write_value(value, &self.heap, &self.symbols));
        }
        Ok(())
    }

    /// Read a whole file into memory and load it. An unreadable file is an
    /// error in the caller's scope, not the new load's.
    pub fn load_file(&mut self, path: &str) -> AtomResult<()> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| AtomError::Io(format!("Error opening file {}: {}", path, e)))?;
        debug!("loading {} ({} bytes)", path, source.len());
        self.load(&source);
        Ok(())
    }

    /// Evaluate every datum in `source` and return the last value. The
    /// embedding entry point; errors propagate instead of being reported,
    /// and no collection runs — but the depth guard still keeps a `load`
    /// reached from here from collecting mid-expression.
    pub fn eval_str(&mut self, source: &str) -> AtomResult<Value> {
        self.load_depth += 1;
        let result = self.eval_str_inner(source);
        self.load_depth -= 1;
        result
    }

    fn eval_str_inner(&mut self, source: &str) -> AtomResult<Value> {
        let tokens = lexer::tokenize(source)?;
        let mut pos = 0;
        let mut last = Value::Bool(false);
        loop {
            let (datum, next) = {
                let mut parser = Parser::new(&tokens, pos, &mut self.heap, &mut self.symbols);
                match parser.next_datum()? {
                    Some(d) => (d, parser.position()),
                    None => break,
                }
            };
            pos = next;
            last = self.eval(self.global, datum)?;
        }
        Ok(last)
    }
}

impl Default for Interp {
    fn default() -> Self {
        Interp::new()
    }
}
