//! String-keyed backend options checked against a hand-written schema.
//!
//! Each backend declares a table of [`OptionField`]s. The setter variant of a
//! field fixes the type its raw string value is parsed as. Option names are
//! normalized to `snake_case` first, so `InMemory`, `in-memory` and
//! `IN_MEMORY` all address the `in_memory` field.

use std::collections::HashMap;

use crate::error::CacheError;

/// Typed setter for a single option field.
pub enum Setter<T> {
    Bool(fn(&mut T, bool)),
    I32(fn(&mut T, i32)),
    U64(fn(&mut T, u64)),
    Usize(fn(&mut T, usize)),
    Str(fn(&mut T, String)),
}

impl<T> Setter<T> {
    fn type_name(&self) -> &'static str {
        match self {
            Setter::Bool(_) => "bool",
            Setter::I32(_) => "i32",
            Setter::U64(_) => "u64",
            Setter::Usize(_) => "usize",
            Setter::Str(_) => "string",
        }
    }
}

/// A recognized option name and how to apply its value.
pub struct OptionField<T> {
    pub name: &'static str,
    pub setter: Setter<T>,
}

/// Translates a raw option key into the schema's `snake_case` convention.
pub fn normalize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    let mut prev: Option<char> = None;
    for ch in raw.trim().chars() {
        if matches!(ch, '_' | '-' | ' ' | '.') {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
        } else if ch.is_ascii_uppercase() {
            if prev.is_some_and(|p| p.is_ascii_lowercase() || p.is_ascii_digit())
                && !out.ends_with('_')
            {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
        prev = Some(ch);
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Rejects any option key the schema does not declare.
pub fn validate_names<T>(
    backend: &str,
    raw: &HashMap<String, String>,
    fields: &[OptionField<T>],
) -> Result<(), CacheError> {
    let mut unknown: Vec<&str> = raw
        .keys()
        .filter(|key| lookup(fields, key).is_none())
        .map(String::as_str)
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    unknown.sort_unstable();
    Err(CacheError::config(format!(
        "unknown {backend} option(s): {}",
        unknown.join(", ")
    )))
}

/// Builds an options value from `raw`, starting from `T::default()`.
///
/// All keys are validated before any value is parsed.
pub fn parse<T: Default>(
    backend: &str,
    raw: &HashMap<String, String>,
    fields: &[OptionField<T>],
) -> Result<T, CacheError> {
    validate_names(backend, raw, fields)?;

    let mut opts = T::default();
    for (key, value) in raw {
        let Some(field) = lookup(fields, key) else {
            continue;
        };
        let value = value.trim();
        let invalid = || {
            CacheError::config(format!(
                "{backend} option `{}` expects {}, got `{value}`",
                field.name,
                field.setter.type_name()
            ))
        };
        match &field.setter {
            Setter::Bool(set) => set(&mut opts, parse_bool(value).ok_or_else(invalid)?),
            Setter::I32(set) => set(&mut opts, value.parse().map_err(|_| invalid())?),
            Setter::U64(set) => set(&mut opts, value.parse().map_err(|_| invalid())?),
            Setter::Usize(set) => set(&mut opts, value.parse().map_err(|_| invalid())?),
            Setter::Str(set) => set(&mut opts, value.to_owned()),
        }
    }
    Ok(opts)
}

fn lookup<'a, T>(fields: &'a [OptionField<T>], raw_key: &str) -> Option<&'a OptionField<T>> {
    let name = normalize_name(raw_key);
    fields.iter().find(|field| field.name == name)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" => Some(true),
        "false" | "f" | "0" => Some(false),
        _ => None,
    }
}
