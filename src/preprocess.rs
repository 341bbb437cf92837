//! Build flags for WGSL programs.
//!
//! WGSL has no preprocessor, so a program built from one source file in
//! several variants needs a small one. Flags use the familiar compiler
//! syntax (`-D NAME`, `-DNAME`, `-D NAME=VALUE`) and the source selects
//! code with line directives:
//!
//! ```text
//! #ifdef SHORTTYPE
//! @group(0) @binding(0) var input: texture_2d<u32>;
//! #else
//! @group(0) @binding(0) var input: texture_2d<f32>;
//! #endif
//! ```
//!
//! Supported directives are `#ifdef`, `#ifndef`, `#else` and `#endif`, and
//! they nest. A define with a value also replaces whole-identifier
//! occurrences of its name in active lines.

use std::collections::BTreeMap;

/// Flag that switches the convolution kernels to `uint16` samples.
pub const SHORT_TYPE_FLAG: &str = "-D SHORTTYPE";

/// Parsed build flags: a set of defines with optional values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildFlags {
    defines: BTreeMap<String, Option<String>>,
}

impl BuildFlags {
    /// Parses a flag string.
    ///
    /// # Errors
    ///
    /// Returns the offending option text for anything that is not a
    /// well-formed `-D` define.
    pub fn parse(flags: &str) -> Result<Self, String> {
        let mut defines = BTreeMap::new();
        let mut tokens = flags.split_whitespace();
        while let Some(token) = tokens.next() {
            let define = match token.strip_prefix("-D") {
                Some("") => tokens
                    .next()
                    .ok_or_else(|| "build option '-D' is missing a name".to_string())?,
                Some(rest) => rest,
                None => return Err(format!("unsupported build option '{}'", token)),
            };
            let (name, value) = match define.split_once('=') {
                Some((name, value)) => (name, Some(value.to_string())),
                None => (define, None),
            };
            if !is_identifier(name) {
                return Err(format!("invalid define name '{}'", name));
            }
            defines.insert(name.to_string(), value);
        }
        Ok(Self { defines })
    }

    /// Returns true if `name` is defined.
    pub fn is_defined(&self, name: &str) -> bool {
        self.defines.contains_key(name)
    }

    /// Returns true if no defines are set.
    pub fn is_empty(&self) -> bool {
        self.defines.is_empty()
    }

    /// Applies the flags to `source`.
    ///
    /// Directive lines are dropped from the output, as are lines in inactive
    /// branches, so reported line numbers refer to the preprocessed text.
    ///
    /// # Errors
    ///
    /// Returns a diagnostic naming the 1-based line for unknown or
    /// unbalanced directives.
    pub fn apply(&self, source: &str) -> Result<String, String> {
        // (branch taken, else seen, enclosing branch active)
        let mut stack: Vec<(bool, bool, bool)> = Vec::new();
        let mut active = true;
        let mut output = String::with_capacity(source.len());

        for (index, line) in source.lines().enumerate() {
            let line_no = index + 1;
            let trimmed = line.trim_start();
            if let Some(directive) = trimmed.strip_prefix('#') {
                let mut parts = directive.split_whitespace();
                let keyword = parts.next().unwrap_or("");
                let argument = parts.next();
                match keyword {
                    "ifdef" | "ifndef" => {
                        let name = argument.ok_or_else(|| {
                            format!("line {}: #{} needs a name", line_no, keyword)
                        })?;
                        let taken = self.is_defined(name) == (keyword == "ifdef");
                        stack.push((taken, false, active));
                        active = active && taken;
                    }
                    "else" => {
                        let top = stack
                            .last_mut()
                            .ok_or_else(|| format!("line {}: #else without #ifdef", line_no))?;
                        if top.1 {
                            return Err(format!("line {}: duplicate #else", line_no));
                        }
                        top.1 = true;
                        active = top.2 && !top.0;
                    }
                    "endif" => {
                        let (_, _, outer) = stack
                            .pop()
                            .ok_or_else(|| format!("line {}: #endif without #ifdef", line_no))?;
                        active = outer;
                    }
                    other => {
                        return Err(format!("line {}: unknown directive '#{}'", line_no, other))
                    }
                }
                continue;
            }
            if active {
                output.push_str(&self.substitute(line));
                output.push('\n');
            }
        }

        if !stack.is_empty() {
            return Err(format!("{} unterminated #ifdef block(s)", stack.len()));
        }
        Ok(output)
    }

    fn substitute(&self, line: &str) -> String {
        if self.defines.values().all(Option::is_none) {
            return line.to_string();
        }
        let mut out = String::with_capacity(line.len());
        let mut ident = String::new();
        for ch in line.chars() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ident.push(ch);
                continue;
            }
            self.flush_ident(&mut ident, &mut out);
            out.push(ch);
        }
        self.flush_ident(&mut ident, &mut out);
        out
    }

    fn flush_ident(&self, ident: &mut String, out: &mut String) {
        match self.defines.get(ident.as_str()) {
            Some(Some(value)) => out.push_str(value),
            _ => out.push_str(ident),
        }
        ident.clear();
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
