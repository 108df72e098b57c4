//! Deferred method invocations and the argument binding used to replay them.
//!
//! A [`Step`] is captured at record time without looking at its arguments.
//! Wrapped types bind the payload against a [`Signature`] only when the step
//! is applied, so argument mismatches surface during collection.

use crate::errors::StepFailure;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
}

impl Step {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Call-site style rendering, e.g. `tab_header("Air", subtitle="May")`.
    pub fn summary(&self) -> String {
        let mut parts = self
            .args
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>();
        parts.extend(
            self.kwargs
                .iter()
                .map(|(key, value)| format!("{key}={value}")),
        );
        format!("{}({})", self.method, parts.join(", "))
    }
}

/// Parameter list a wrapped type expects for one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub params: &'static [&'static str],
    /// Accept keyword arguments beyond `params` (collected into [`BoundArgs::extra`]).
    pub var_keyword: bool,
}

impl Signature {
    pub const fn new(params: &'static [&'static str]) -> Self {
        Self {
            params,
            var_keyword: false,
        }
    }

    pub const fn with_var_keyword(params: &'static [&'static str]) -> Self {
        Self {
            params,
            var_keyword: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BoundArgs<'a> {
    method: &'a str,
    values: BTreeMap<&'static str, &'a Value>,
    extra: BTreeMap<&'a str, &'a Value>,
}

/// Binds positional arguments by position and keyword arguments by name.
pub fn bind<'a>(step: &'a Step, signature: &Signature) -> Result<BoundArgs<'a>, StepFailure> {
    if step.args.len() > signature.params.len() {
        return Err(StepFailure::new(format!(
            "{}() takes {} positional argument(s) but {} were given",
            step.method,
            signature.params.len(),
            step.args.len()
        )));
    }

    let mut values = BTreeMap::new();
    for (name, value) in signature.params.iter().zip(step.args.iter()) {
        values.insert(*name, value);
    }

    let mut extra = BTreeMap::new();
    for (key, value) in &step.kwargs {
        match signature.params.iter().find(|name| **name == key.as_str()) {
            Some(name) => {
                if values.insert(*name, value).is_some() {
                    return Err(StepFailure::new(format!(
                        "{}() got multiple values for argument '{key}'",
                        step.method
                    )));
                }
            }
            None if signature.var_keyword => {
                extra.insert(key.as_str(), value);
            }
            None => {
                return Err(StepFailure::new(format!(
                    "{}() got an unexpected keyword argument '{key}'",
                    step.method
                )));
            }
        }
    }

    Ok(BoundArgs {
        method: &step.method,
        values,
        extra,
    })
}

impl<'a> BoundArgs<'a> {
    pub fn optional(&self, name: &str) -> Option<&'a Value> {
        self.values
            .get(name)
            .copied()
            .filter(|value| !value.is_null())
    }

    pub fn required(&self, name: &str) -> Result<&'a Value, StepFailure> {
        self.optional(name).ok_or_else(|| {
            StepFailure::new(format!(
                "{}() missing required argument: '{name}'",
                self.method
            ))
        })
    }

    pub fn required_str(&self, name: &str) -> Result<&'a str, StepFailure> {
        let value = self.required(name)?;
        value.as_str().ok_or_else(|| self.type_error(name, "a string"))
    }

    pub fn optional_str(&self, name: &str) -> Result<Option<&'a str>, StepFailure> {
        match self.optional(name) {
            Some(value) => value
                .as_str()
                .map(Some)
                .ok_or_else(|| self.type_error(name, "a string")),
            None => Ok(None),
        }
    }

    pub fn optional_u64(&self, name: &str) -> Result<Option<u64>, StepFailure> {
        match self.optional(name) {
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| self.type_error(name, "a non-negative integer")),
            None => Ok(None),
        }
    }

    pub fn optional_bool(&self, name: &str) -> Result<Option<bool>, StepFailure> {
        match self.optional(name) {
            Some(value) => value
                .as_bool()
                .map(Some)
                .ok_or_else(|| self.type_error(name, "a boolean")),
            None => Ok(None),
        }
    }

    /// A single string or a list of strings.
    pub fn required_names(&self, name: &str) -> Result<Vec<String>, StepFailure> {
        let value = self.required(name)?;
        self.names_from(name, value)
    }

    pub fn optional_names(&self, name: &str) -> Result<Option<Vec<String>>, StepFailure> {
        match self.optional(name) {
            Some(value) => self.names_from(name, value).map(Some),
            None => Ok(None),
        }
    }

    pub fn extra(&self) -> &BTreeMap<&'a str, &'a Value> {
        &self.extra
    }

    fn names_from(&self, name: &str, value: &Value) -> Result<Vec<String>, StepFailure> {
        match value {
            Value::String(single) => Ok(vec![single.clone()]),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| self.type_error(name, "a list of strings"))
                })
                .collect(),
            _ => Err(self.type_error(name, "a string or a list of strings")),
        }
    }

    fn type_error(&self, name: &str, expected: &str) -> StepFailure {
        StepFailure::new(format!(
            "{}() argument '{name}' must be {expected}",
            self.method
        ))
    }
}
