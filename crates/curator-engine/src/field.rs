//! Field path expressions used to flatten nested records into columns.
//!
//! Grammar:
//!
//! ```text
//! expr     := "null" | "concat:" path ("," path)* | [modifier ":"] path ("|" path)*
//! modifier := "ref" | "date"
//! path     := segment ("." segment)*
//! segment  := key | index | key "[" key "~" needle "]"
//! ```
//!
//! Alternatives separated by `|` are tried left to right; the first
//! non-empty scalar wins. `ref:` keeps the trailing id of a `Type/id` or
//! `urn:uuid:id` reference. `date:` normalizes timestamps to `YYYY-MM-DD`
//! and drops values that are not dates. A selector segment
//! `key[field~needle]` picks the last element of array `key` whose
//! `field` contains `needle`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// Why an expression could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid field expression '{expr}': {reason}")]
pub struct ExprError {
    pub expr: String,
    pub reason: String,
}

/// Why an expression could not be evaluated against a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("path '{path}' resolved to a non-scalar value")]
pub struct NonScalar {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
    Select { field: String, needle: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Path {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modifier {
    Plain,
    Reference,
    Date,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Null,
    Lookup {
        modifier: Modifier,
        alternatives: Vec<Path>,
    },
    Concat(Vec<Path>),
}

/// A compiled field expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldExpr {
    kind: Kind,
}

impl FieldExpr {
    /// Compile an expression.
    ///
    /// # Errors
    ///
    /// Returns [`ExprError`] for empty paths, empty segments or malformed
    /// selectors.
    pub fn parse(expr: &str) -> Result<Self, ExprError> {
        let fail = |reason: &str| ExprError {
            expr: expr.to_string(),
            reason: reason.to_string(),
        };
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(fail("empty expression"));
        }
        if trimmed == "null" {
            return Ok(Self { kind: Kind::Null });
        }
        if let Some(rest) = trimmed.strip_prefix("concat:") {
            let paths = rest
                .split(',')
                .map(|p| Path::parse(p).map_err(|r| fail(&r)))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Self {
                kind: Kind::Concat(paths),
            });
        }

        let (modifier, rest) = if let Some(rest) = trimmed.strip_prefix("ref:") {
            (Modifier::Reference, rest)
        } else if let Some(rest) = trimmed.strip_prefix("date:") {
            (Modifier::Date, rest)
        } else {
            (Modifier::Plain, trimmed)
        };
        let alternatives = rest
            .split('|')
            .map(|p| Path::parse(p).map_err(|r| fail(&r)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            kind: Kind::Lookup {
                modifier,
                alternatives,
            },
        })
    }

    /// Evaluate against one record. `Ok(None)` is a null cell.
    ///
    /// # Errors
    ///
    /// Returns [`NonScalar`] when a path lands on an object or array.
    pub fn evaluate(&self, record: &Value) -> Result<Option<String>, NonScalar> {
        match &self.kind {
            Kind::Null => Ok(None),
            Kind::Lookup {
                modifier,
                alternatives,
            } => {
                for path in alternatives {
                    if let Some(value) = path.scalar(record)? {
                        return Ok(match modifier {
                            Modifier::Plain => Some(value),
                            Modifier::Reference => reference_id(&value),
                            Modifier::Date => normalize_date(&value),
                        });
                    }
                }
                Ok(None)
            }
            Kind::Concat(paths) => {
                let mut parts = Vec::with_capacity(paths.len());
                for path in paths {
                    if let Some(value) = path.scalar(record)? {
                        parts.push(value);
                    }
                }
                Ok((!parts.is_empty()).then(|| parts.join(" ")))
            }
        }
    }
}

impl Path {
    fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("empty path".to_string());
        }
        let mut segments = Vec::new();
        for part in raw.split('.') {
            if part.is_empty() {
                return Err(format!("empty segment in '{raw}'"));
            }
            if let Some(open) = part.find('[') {
                let (key, selector) = part.split_at(open);
                let inner = selector
                    .strip_prefix('[')
                    .and_then(|s| s.strip_suffix(']'))
                    .ok_or_else(|| format!("unterminated selector in '{part}'"))?;
                let (field, needle) = inner
                    .split_once('~')
                    .ok_or_else(|| format!("selector '{inner}' must be field~needle"))?;
                if key.is_empty() || field.is_empty() || needle.is_empty() {
                    return Err(format!("incomplete selector '{part}'"));
                }
                segments.push(Segment::Key(key.to_string()));
                segments.push(Segment::Select {
                    field: field.to_string(),
                    needle: needle.to_string(),
                });
            } else if let Ok(index) = part.parse::<usize>() {
                segments.push(Segment::Index(index));
            } else {
                segments.push(Segment::Key(part.to_string()));
            }
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    fn resolve<'a>(&self, record: &'a Value) -> Option<&'a Value> {
        let mut current = record;
        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get(key)?,
                (Segment::Index(i), Value::Array(items)) => items.get(*i)?,
                (Segment::Index(i), Value::Object(map)) => map.get(&i.to_string())?,
                (Segment::Select { field, needle }, Value::Array(items)) => {
                    items.iter().rev().find(|item| {
                        item.get(field)
                            .and_then(Value::as_str)
                            .is_some_and(|s| s.contains(needle.as_str()))
                    })?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Scalar at this path as text; empty strings count as missing.
    fn scalar(&self, record: &Value) -> Result<Option<String>, NonScalar> {
        match self.resolve(record) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(Value::Bool(b)) => Ok(Some(b.to_string())),
            Some(Value::Array(_) | Value::Object(_)) => Err(NonScalar {
                path: self.raw.clone(),
            }),
        }
    }
}

/// Trailing id of a reference such as `Patient/123` or `urn:uuid:abc`.
fn reference_id(reference: &str) -> Option<String> {
    let tail = reference.rsplit('/').next()?.rsplit(':').next()?;
    (!tail.is_empty()).then(|| tail.to_string())
}

/// `YYYY-MM-DD` in UTC, or `None` when the value is not a date.
fn normalize_date(value: &str) -> Option<String> {
    let value = value.trim();
    let date = if let Ok(d) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        d
    } else if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        dt.with_timezone(&Utc).date_naive()
    } else if let Ok(ndt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        ndt.date()
    } else {
        return None;
    };
    Some(date.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn eval(expr: &str, record: &Value) -> Option<String> {
        FieldExpr::parse(expr).unwrap().evaluate(record).unwrap()
    }

    #[test]
    fn dotted_path_with_indices() {
        let r = json!({"name": [{"given": ["Ada", "B"], "family": "Lovelace"}]});
        assert_eq!(eval("name.0.given.0", &r).as_deref(), Some("Ada"));
        assert_eq!(eval("name.0.family", &r).as_deref(), Some("Lovelace"));
        assert_eq!(eval("name.1.family", &r), None);
        assert_eq!(eval("name.0.given.5", &r), None);
    }

    #[test]
    fn fallback_takes_first_non_empty() {
        let r = json!({"period": {"start": ""}, "meta": {"lastUpdated": "2020-02-02"}});
        assert_eq!(
            eval("period.start | meta.lastUpdated", &r).as_deref(),
            Some("2020-02-02")
        );
    }

    #[test]
    fn reference_keeps_trailing_id() {
        let r = json!({
            "subject": {"reference": "Patient/abc-1"},
            "context": {"reference": "urn:uuid:enc-9"}
        });
        assert_eq!(eval("ref:subject.reference", &r).as_deref(), Some("abc-1"));
        assert_eq!(
            eval("ref:encounter.reference | context.reference", &r).as_deref(),
            Some("enc-9")
        );
    }

    #[test]
    fn concat_joins_present_parts() {
        let r = json!({"address": [{"line": ["1 Main St"], "city": "Boston", "state": "MA"}]});
        assert_eq!(
            eval("concat:address.0.line.0,address.0.line.1,address.0.city,address.0.state", &r)
                .as_deref(),
            Some("1 Main St Boston MA")
        );
        assert_eq!(eval("concat:nope,missing", &r), None);
    }

    #[test]
    fn scalars_render_as_text() {
        let r = json!({"valueQuantity": {"value": 5.4}, "active": true, "count": 3});
        assert_eq!(eval("valueQuantity.value", &r).as_deref(), Some("5.4"));
        assert_eq!(eval("active", &r).as_deref(), Some("true"));
        assert_eq!(eval("count", &r).as_deref(), Some("3"));
    }

    #[test]
    fn date_modifier_normalizes() {
        let r = json!({
            "a": "2011-03-04T10:15:00-05:00",
            "b": "1970-01-02",
            "c": "not a date",
            "d": "2011-03-04T23:30:00"
        });
        assert_eq!(eval("date:a", &r).as_deref(), Some("2011-03-04"));
        assert_eq!(eval("date:b", &r).as_deref(), Some("1970-01-02"));
        assert_eq!(eval("date:c", &r), None);
        assert_eq!(eval("date:d", &r).as_deref(), Some("2011-03-04"));
    }

    #[test]
    fn selector_picks_last_match() {
        let r = json!({"extension": [
            {"url": "http://x/us-core-race", "valueString": "r"},
            {"url": "http://x/identifier-SocialSecurityNumber", "valueString": "999-1"},
            {"url": "http://y/SocialSecurityNumber", "valueString": "999-2"}
        ]});
        assert_eq!(
            eval("extension[url~SocialSecurityNumber].valueString", &r).as_deref(),
            Some("999-2")
        );
    }

    #[test]
    fn null_expression_is_always_empty() {
        assert_eq!(eval("null", &json!({"null": "x"})), None);
    }

    #[test]
    fn object_value_is_non_scalar() {
        let r = json!({"code": {"coding": []}});
        let err = FieldExpr::parse("code").unwrap().evaluate(&r).unwrap_err();
        assert_eq!(err.path, "code");
    }

    #[test]
    fn malformed_expressions_rejected() {
        for bad in ["", "a..b", "a |", "concat:", "ext[url]", "ext[url~x", "[a~b]"] {
            assert!(FieldExpr::parse(bad).is_err(), "{bad} should fail");
        }
    }
}
