//! [`SchemaSet`] – argument rules every probe command must satisfy.
//!
//! Each program is registered with one or more [`CommandSchema`]s.  A
//! [`CommandSpec`] is accepted when its argument list matches **any** schema
//! registered for its program, position by position.  Unknown programs are
//! always rejected.
//!
//! Validation happens before a process exists, so a rejected command never
//! costs a spawn.

use std::collections::HashMap;
use std::sync::LazyLock;

use os4ai_types::GatewayError;
use regex::Regex;

use crate::command_gateway::CommandSpec;

/// Strict MAC address shape: six hex octets separated by `:` or `-`.
static MAC_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}$").expect("MAC pattern is a valid regex")
});

/// `true` when `s` is a well-formed MAC address.
pub fn is_mac_address(s: &str) -> bool {
    MAC_ADDRESS.is_match(s)
}

// ────────────────────────────────────────────────────────────────────────────
// ArgPattern
// ────────────────────────────────────────────────────────────────────────────

/// Shape of one positional argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgPattern {
    /// Exactly one of the listed strings.
    Literal(Vec<String>),
    MacAddress,
    /// Base-10 integer within `min..=max`.
    Integer { min: i64, max: i64 },
    /// Decimal number within `min..=max`.
    Decimal { min: f64, max: f64 },
}

impl ArgPattern {
    pub fn literal(s: &str) -> Self {
        ArgPattern::Literal(vec![s.to_string()])
    }

    pub fn one_of<'a>(choices: impl IntoIterator<Item = &'a str>) -> Self {
        ArgPattern::Literal(choices.into_iter().map(str::to_string).collect())
    }

    fn check(&self, arg: &str) -> Result<(), String> {
        match self {
            ArgPattern::Literal(choices) => {
                if choices.iter().any(|c| c == arg) {
                    Ok(())
                } else {
                    Err(format!("'{arg}' is not one of {choices:?}"))
                }
            }
            ArgPattern::MacAddress => {
                if is_mac_address(arg) {
                    Ok(())
                } else {
                    Err(format!("'{arg}' is not a MAC address"))
                }
            }
            ArgPattern::Integer { min, max } => match arg.parse::<i64>() {
                Ok(n) if (*min..=*max).contains(&n) => Ok(()),
                Ok(n) => Err(format!("{n} is outside {min}..={max}")),
                Err(_) => Err(format!("'{arg}' is not an integer")),
            },
            ArgPattern::Decimal { min, max } => match arg.parse::<f64>() {
                Ok(n) if n.is_finite() && n >= *min && n <= *max => Ok(()),
                Ok(n) => Err(format!("{n} is outside {min}..={max}")),
                Err(_) => Err(format!("'{arg}' is not a number")),
            },
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CommandSchema
// ────────────────────────────────────────────────────────────────────────────

/// One accepted argument shape for a program.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSchema {
    pub program: String,
    pub args: Vec<ArgPattern>,
}

impl CommandSchema {
    pub fn new(program: impl Into<String>, args: Vec<ArgPattern>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Check `args` against this shape.  The error names the first mismatch.
    pub fn accepts(&self, args: &[String]) -> Result<(), String> {
        if args.len() != self.args.len() {
            return Err(format!(
                "expected {} argument(s), got {}",
                self.args.len(),
                args.len()
            ));
        }
        for (i, (pattern, arg)) in self.args.iter().zip(args).enumerate() {
            pattern.check(arg).map_err(|e| format!("argument {i}: {e}"))?;
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SchemaSet
// ────────────────────────────────────────────────────────────────────────────

/// Registry of every program the gateway is allowed to run.
#[derive(Debug, Clone, Default)]
pub struct SchemaSet {
    by_program: HashMap<String, Vec<CommandSchema>>,
}

impl SchemaSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register another accepted shape.  Shapes for the same program
    /// accumulate.
    pub fn register(&mut self, schema: CommandSchema) {
        self.by_program
            .entry(schema.program.clone())
            .or_default()
            .push(schema);
    }

    pub fn extend(&mut self, schemas: impl IntoIterator<Item = CommandSchema>) {
        for schema in schemas {
            self.register(schema);
        }
    }

    pub fn knows(&self, program: &str) -> bool {
        self.by_program.contains_key(program)
    }

    pub fn programs(&self) -> impl Iterator<Item = &str> {
        self.by_program.keys().map(String::as_str)
    }

    /// # Errors
    ///
    /// [`GatewayError::Rejected`] when the program is unknown or no schema
    /// accepts the arguments.
    pub fn validate(&self, spec: &CommandSpec) -> Result<(), GatewayError> {
        let Some(schemas) = self.by_program.get(&spec.program) else {
            return Err(GatewayError::Rejected(format!(
                "program '{}' is not allow-listed",
                spec.program
            )));
        };
        let mut reasons = Vec::with_capacity(schemas.len());
        for schema in schemas {
            match schema.accepts(&spec.args) {
                Ok(()) => return Ok(()),
                Err(reason) => reasons.push(reason),
            }
        }
        Err(GatewayError::Rejected(format!(
            "{}: {}",
            spec.program,
            reasons.join("; ")
        )))
    }
}
