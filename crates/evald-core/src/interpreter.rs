//! The opaque interpreter seam and a built-in reference implementation.
//!
//! The service core treats the evaluated language as opaque: anything that
//! implements [`Interpreter`] can sit behind the evaluator. The built-in
//! [`ScriptInterpreter`] implements a small Tcl-flavored command language —
//! enough to exercise assignment, procedures, loops and large output without
//! dragging a real language runtime into the core.

use crate::capability::CapabilityGate;
use crate::script::{self, Word};
use crate::session::{ProcDef, Session, SessionSnapshot};

/// Result of one evaluation: ordered output lines plus an error flag.
///
/// Immutable after creation. Failures inside evaluated code are reported
/// here, never as a transport-level error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationResult {
    pub output: Vec<String>,
    pub is_error: bool,
}

impl EvaluationResult {
    pub fn ok(output: Vec<String>) -> Self {
        Self {
            output,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            output: vec![message.into()],
            is_error: true,
        }
    }
}

/// The opaque evaluation primitive.
///
/// A single `eval` call must be atomic with respect to session content: it
/// either completes or leaves the session as it was. The built-in
/// interpreter satisfies this per command; the snapshot/restore pair exists
/// so the service can roll session content back to any history entry.
pub trait Interpreter: Send {
    /// Evaluates a script against the session, returning output lines.
    ///
    /// `is_admin` carries the caller's trust tier: substitution can move a
    /// privileged name into command position after the pre-dispatch scan,
    /// so dispatch itself must know the tier. `Err` carries a
    /// human-readable evaluation failure; the caller maps it to
    /// `is_error = true`.
    fn eval(&mut self, code: &str, is_admin: bool) -> Result<Vec<String>, String>;

    /// Captures the current session content.
    fn snapshot(&self) -> SessionSnapshot;

    /// Replaces the session content wholesale.
    fn restore(&mut self, snapshot: &SessionSnapshot);
}

/// Upper bound on `repeat` counts, so a single evaluation cannot hang the
/// worker behind an unbounded loop.
const MAX_REPEAT: i64 = 10_000;

/// Maximum procedure call nesting.
const MAX_DEPTH: usize = 64;

/// Built-in reference interpreter over [`Session`] content.
#[derive(Debug, Default)]
pub struct ScriptInterpreter {
    session: Session,
    gate: CapabilityGate,
    admin: bool,
}

impl ScriptInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session,
            ..Self::default()
        }
    }

    /// Uses a configured gate instead of the built-in denylist.
    pub fn with_gate(gate: CapabilityGate) -> Self {
        Self {
            gate,
            ..Self::default()
        }
    }

    /// Evaluates a script, returning the result of its last command.
    fn eval_script(
        &mut self,
        code: &str,
        output: &mut Vec<String>,
        depth: usize,
    ) -> Result<String, String> {
        if depth > MAX_DEPTH {
            return Err("too many nested calls".to_string());
        }

        let mut last_result = String::new();
        for command in script::split_commands(code) {
            last_result = self.eval_command(&command, output, depth)?;
        }
        Ok(last_result)
    }

    fn eval_command(
        &mut self,
        command: &str,
        output: &mut Vec<String>,
        depth: usize,
    ) -> Result<String, String> {
        let words = script::parse_words(command);
        let Some(first) = words.first() else {
            return Ok(String::new());
        };
        let name = first.text().to_string();

        // Substitution can move a denied name into command position after
        // the pre-dispatch scan, so dispatch checks the tier again.
        if !self.admin && self.gate.is_denied(&name) {
            return Err(format!(
                "command \"{}\" requires the admin capability",
                name
            ));
        }

        // Arguments: bare words get $name substitution, brace words stay
        // literal (so proc and loop bodies are not expanded early).
        let mut args: Vec<String> = Vec::with_capacity(words.len().saturating_sub(1));
        let mut raw_args: Vec<Word> = Vec::with_capacity(words.len().saturating_sub(1));
        for word in &words[1..] {
            let value = match word {
                Word::Bare(text) => self.substitute(text)?,
                Word::Brace(text) => text.clone(),
            };
            args.push(value);
            raw_args.push(word.clone());
        }

        match name.as_str() {
            "set" => self.cmd_set(&args),
            "unset" => self.cmd_unset(&args),
            "incr" => self.cmd_incr(&args),
            "append" => self.cmd_append(&args),
            "puts" => {
                output.push(args.join(" "));
                Ok(String::new())
            }
            "expr" => self.cmd_expr(&args),
            "proc" => self.cmd_proc(&args, &raw_args),
            "repeat" => self.cmd_repeat(&args, output, depth),
            "vars" => Ok(self
                .session
                .vars
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(" ")),
            "procs" => Ok(self
                .session
                .procs
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(" ")),
            "reset" => {
                self.session = Session::new();
                Ok(String::new())
            }
            "rename" => self.cmd_rename(&args),
            _ => self.call_proc(&name, &args, output, depth),
        }
    }

    fn cmd_set(&mut self, args: &[String]) -> Result<String, String> {
        match args {
            [name] => self
                .session
                .vars
                .get(name)
                .cloned()
                .ok_or_else(|| format!("can't read \"{}\": no such variable", name)),
            [name, value] => {
                self.session.vars.insert(name.clone(), value.clone());
                Ok(value.clone())
            }
            _ => Err("wrong # args: should be \"set name ?value?\"".to_string()),
        }
    }

    fn cmd_unset(&mut self, args: &[String]) -> Result<String, String> {
        match args {
            [name] => {
                self.session
                    .vars
                    .remove(name)
                    .ok_or_else(|| format!("can't unset \"{}\": no such variable", name))?;
                Ok(String::new())
            }
            _ => Err("wrong # args: should be \"unset name\"".to_string()),
        }
    }

    fn cmd_incr(&mut self, args: &[String]) -> Result<String, String> {
        let (name, by) = match args {
            [name] => (name, 1i64),
            [name, by] => (
                name,
                by.parse::<i64>()
                    .map_err(|_| format!("expected integer but got \"{}\"", by))?,
            ),
            _ => return Err("wrong # args: should be \"incr name ?by?\"".to_string()),
        };

        let current = match self.session.vars.get(name) {
            Some(value) => value
                .parse::<i64>()
                .map_err(|_| format!("expected integer but got \"{}\"", value))?,
            None => return Err(format!("can't read \"{}\": no such variable", name)),
        };

        let next = current
            .checked_add(by)
            .ok_or_else(|| "integer overflow".to_string())?
            .to_string();
        self.session.vars.insert(name.clone(), next.clone());
        Ok(next)
    }

    fn cmd_append(&mut self, args: &[String]) -> Result<String, String> {
        let Some((name, rest)) = args.split_first() else {
            return Err("wrong # args: should be \"append name ?value ...?\"".to_string());
        };
        let entry = self.session.vars.entry(name.clone()).or_default();
        for piece in rest {
            entry.push_str(piece);
        }
        Ok(entry.clone())
    }

    fn cmd_expr(&mut self, args: &[String]) -> Result<String, String> {
        let expression = args.join(" ");
        eval_int_expr(&expression).map(|n| n.to_string())
    }

    fn cmd_proc(&mut self, args: &[String], raw_args: &[Word]) -> Result<String, String> {
        if args.len() != 3 {
            return Err("wrong # args: should be \"proc name params body\"".to_string());
        }
        // The body must be brace-grouped so it is stored unevaluated.
        if !matches!(raw_args[2], Word::Brace(_)) {
            return Err("proc body must be brace-grouped".to_string());
        }
        let params: Vec<String> = args[1].split_whitespace().map(|s| s.to_string()).collect();
        self.session.procs.insert(
            args[0].clone(),
            ProcDef {
                params,
                body: args[2].clone(),
            },
        );
        Ok(String::new())
    }

    fn cmd_repeat(
        &mut self,
        args: &[String],
        output: &mut Vec<String>,
        depth: usize,
    ) -> Result<String, String> {
        if args.len() != 2 {
            return Err("wrong # args: should be \"repeat count body\"".to_string());
        }
        let count = args[0]
            .parse::<i64>()
            .map_err(|_| format!("expected integer but got \"{}\"", args[0]))?;
        if count < 0 || count > MAX_REPEAT {
            return Err(format!("repeat count must be between 0 and {}", MAX_REPEAT));
        }
        for _ in 0..count {
            self.eval_script(&args[1], output, depth + 1)?;
        }
        Ok(String::new())
    }

    fn cmd_rename(&mut self, args: &[String]) -> Result<String, String> {
        match args {
            [old, new] => {
                let def = self
                    .session
                    .procs
                    .remove(old)
                    .ok_or_else(|| format!("can't rename \"{}\": no such proc", old))?;
                self.session.procs.insert(new.clone(), def);
                Ok(String::new())
            }
            _ => Err("wrong # args: should be \"rename old new\"".to_string()),
        }
    }

    fn call_proc(
        &mut self,
        name: &str,
        args: &[String],
        output: &mut Vec<String>,
        depth: usize,
    ) -> Result<String, String> {
        let Some(def) = self.session.procs.get(name).cloned() else {
            return Err(format!("invalid command name \"{}\"", name));
        };
        if args.len() != def.params.len() {
            return Err(format!(
                "wrong # args: should be \"{} {}\"",
                name,
                def.params.join(" ")
            ));
        }

        // Parameters bind by textual substitution into the body; good enough
        // for a reference language without local scopes.
        let mut body = def.body;
        for (param, value) in def.params.iter().zip(args) {
            body = body.replace(&format!("${}", param), value);
        }

        self.eval_script(&body, output, depth + 1)
    }

    /// Substitutes `$name` references in a bare word.
    fn substitute(&self, text: &str) -> Result<String, String> {
        if !text.contains('$') {
            return Ok(text.to_string());
        }

        let mut result = String::new();
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '$' {
                result.push(c);
                continue;
            }
            let mut name = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_alphanumeric() || next == '_' {
                    name.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                result.push('$');
                continue;
            }
            match self.session.vars.get(&name) {
                Some(value) => result.push_str(value),
                None => return Err(format!("can't read \"{}\": no such variable", name)),
            }
        }
        Ok(result)
    }
}

impl Interpreter for ScriptInterpreter {
    fn eval(&mut self, code: &str, is_admin: bool) -> Result<Vec<String>, String> {
        script::validate_braces(code)?;
        self.admin = is_admin;

        let mut output = Vec::new();
        let result = self.eval_script(code, &mut output, 0)?;
        if !result.is_empty() {
            output.push(result);
        }
        Ok(output)
    }

    fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    fn restore(&mut self, snapshot: &SessionSnapshot) {
        self.session.restore(snapshot);
    }
}

/// Evaluates a whitespace-separated integer expression with `+ - * / %`.
///
/// `*`, `/` and `%` bind tighter than `+` and `-`; no parentheses.
fn eval_int_expr(expression: &str) -> Result<i64, String> {
    let tokens: Vec<&str> = expression.split_whitespace().collect();
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    if tokens.len() % 2 == 0 {
        return Err(format!("malformed expression \"{}\"", expression));
    }

    let parse = |t: &str| {
        t.parse::<i64>()
            .map_err(|_| format!("expected integer but got \"{}\"", t))
    };

    // First pass: collapse * / % runs into `current`.
    let mut terms: Vec<i64> = Vec::new();
    let mut ops: Vec<&str> = Vec::new();
    let mut current = parse(tokens[0])?;
    let mut i = 1;
    while i + 1 < tokens.len() {
        let op = tokens[i];
        let rhs = parse(tokens[i + 1])?;
        match op {
            "/" | "%" if rhs == 0 => return Err("divide by zero".to_string()),
            "*" => current = current.wrapping_mul(rhs),
            "/" => current = current.wrapping_div(rhs),
            "%" => current = current.wrapping_rem(rhs),
            "+" | "-" => {
                terms.push(current);
                ops.push(op);
                current = rhs;
            }
            _ => return Err(format!("unknown operator \"{}\"", op)),
        }
        i += 2;
    }

    // Second pass: fold + and -.
    let mut value = terms.first().copied().unwrap_or(current);
    for (op, term) in ops.into_iter().zip(terms.into_iter().skip(1).chain([current])) {
        value = if op == "+" {
            value.wrapping_add(term)
        } else {
            value.wrapping_sub(term)
        };
    }
    Ok(value)
}
