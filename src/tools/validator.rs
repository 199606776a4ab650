//! Input validation.
//!
//! A [`Validator`] hooks into the app's pre-processor pipe and converts the
//! fields of every parsed request body before write and make functions see
//! it. Each field is given a [`Converter`]; a field that fails to convert
//! fails the request with a 400 that names every bad field.
//!
//! ```rust
//! use rivet::{App, Error, Resource, UrlValues};
//! use rivet::tools::validator::{Converter, Validator};
//! use serde_json::Value;
//!
//! # fn demo() -> rivet::Result<()> {
//! let mut app = App::new();
//! let games = app.route(
//!     Resource::new("games").write(|_: UrlValues, v: Value| async move { Ok::<_, Error>(v) }),
//!     "/games",
//! )?;
//!
//! let validator = Validator::new();
//! validator
//!     .enforce(&games, "id", Converter::spec("int(min=1)")?)
//!     .enforce(&games, "players", Converter::list(Converter::spec("uuid")?))
//!     .restrict(&games, &["*id", "players"], false);
//! validator.attach_to(&mut app);
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::app::App;
use crate::context;
use crate::error::{Error, Result};
use crate::resource::Resource;

type ConvertFn = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

static SPEC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>[a-zA-Z_][a-zA-Z0-9_]*)(?:\((?P<args>.*)\))?$").expect("valid regex")
});

fn rejected(value: &Value) -> Error {
    Error::bad_request(format!("Cannot convert {value}"))
}

// ── Converters ────────────────────────────────────────────────────────────────

/// Converts one input field, failing if the value isn't acceptable.
#[derive(Clone)]
pub struct Converter(ConvertFn);

impl Converter {
    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// A converter from a specification such as `int`, `string(length=3)`
    /// or `any(red, green, blue)`:
    ///
    /// - `string(minlength=1, maxlength, length)` and its alias `default`
    /// - `path`: a non-empty string not starting with `/`
    /// - `any(items…)`: one of the listed values
    /// - `int(fixed_digits=0, min, max)`: a non-negative integer, from a
    ///   string of digits or a JSON number
    /// - `float(min, max)`: a non-negative number
    /// - `uuid`: normalized to the lowercase hyphenated form
    ///
    /// Arguments may be given by position or by name. Anything else is an
    /// [`Error::InvalidSpecification`].
    pub fn spec(spec: &str) -> Result<Self> {
        let invalid = || Error::InvalidSpecification(spec.to_owned());
        let caps = SPEC.captures(spec.trim()).ok_or_else(invalid)?;
        let args = Args::parse(caps.name("args").map_or("", |m| m.as_str())).ok_or_else(invalid)?;
        let converter = match &caps["name"] {
            "string" | "default" => string(&args),
            "path" => args.bind([]).map(|[]| path()),
            "any" => any(&args),
            "int" => int(&args),
            "float" => float(&args),
            "uuid" => args.bind([]).map(|[]| uuid()),
            _ => None,
        };
        converter.ok_or_else(invalid)
    }

    /// Expects an array and converts each of its items with `item`.
    pub fn list(item: Converter) -> Self {
        Self::func(move |value| {
            let items = value.as_array().ok_or_else(|| rejected(value))?;
            items.iter().map(|v| item.convert(v)).collect::<Result<Vec<_>>>().map(Value::Array)
        })
    }

    pub fn convert(&self, value: &Value) -> Result<Value> {
        (self.0)(value)
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Converter")
    }
}

/// Converter arguments: `a, b, key=value`. Values may be quoted.
struct Args {
    positional: Vec<String>,
    named: BTreeMap<String, String>,
}

impl Args {
    fn parse(raw: &str) -> Option<Self> {
        let mut args = Args { positional: Vec::new(), named: BTreeMap::new() };
        if raw.trim().is_empty() {
            return Some(args);
        }
        for item in raw.split(',').map(str::trim) {
            match item.split_once('=') {
                Some((key, value)) => {
                    let key = key.trim();
                    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                        return None;
                    }
                    args.named.insert(key.to_owned(), unquote(value.trim()).to_owned());
                }
                None if args.named.is_empty() && !item.is_empty() => {
                    args.positional.push(unquote(item).to_owned());
                }
                None => return None,
            }
        }
        Some(args)
    }

    /// Matches the arguments against parameter names, by position first
    /// and then by name. Extra or unknown arguments fail.
    fn bind<const N: usize>(&self, names: [&str; N]) -> Option<[Option<&str>; N]> {
        if self.positional.len() > N || self.named.keys().any(|k| !names.contains(&k.as_str())) {
            return None;
        }
        let mut bound = [None; N];
        for (i, name) in names.iter().enumerate() {
            let by_position = self.positional.get(i).map(String::as_str);
            let by_name = self.named.get(*name).map(String::as_str);
            if by_position.is_some() && by_name.is_some() {
                return None;
            }
            bound[i] = by_position.or(by_name);
        }
        Some(bound)
    }
}

fn unquote(s: &str) -> &str {
    ['"', '\'']
        .iter()
        .find_map(|q| s.strip_prefix(*q).and_then(|s| s.strip_suffix(*q)))
        .unwrap_or(s)
}

fn opt<T: FromStr>(arg: Option<&str>) -> Option<Option<T>> {
    arg.map(str::parse).transpose().ok()
}

fn string(args: &Args) -> Option<Converter> {
    let [min, max, length] = args.bind(["minlength", "maxlength", "length"])?;
    let min: usize = opt(min)?.unwrap_or(1);
    let max: Option<usize> = opt(max)?;
    let length: Option<usize> = opt(length)?;
    Some(Converter::func(move |value| {
        let n = value.as_str().ok_or_else(|| rejected(value))?.chars().count();
        let fits = match length {
            Some(length) => n == length,
            None => n >= min && max.is_none_or(|max| n <= max),
        };
        if fits { Ok(value.clone()) } else { Err(rejected(value)) }
    }))
}

fn path() -> Converter {
    Converter::func(|value| match value.as_str() {
        Some(s) if !s.is_empty() && !s.starts_with('/') => Ok(value.clone()),
        _ => Err(rejected(value)),
    })
}

fn any(args: &Args) -> Option<Converter> {
    if !args.named.is_empty() || args.positional.is_empty() {
        return None;
    }
    let items: BTreeSet<String> = args.positional.iter().cloned().collect();
    Some(Converter::func(move |value| {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(_) | Value::Bool(_) => value.to_string(),
            _ => return Err(rejected(value)),
        };
        if items.contains(&text) { Ok(value.clone()) } else { Err(rejected(value)) }
    }))
}

fn int(args: &Args) -> Option<Converter> {
    let [digits, min, max] = args.bind(["fixed_digits", "min", "max"])?;
    let digits: usize = opt(digits)?.unwrap_or(0);
    let min: Option<u64> = opt(min)?;
    let max: Option<u64> = opt(max)?;
    Some(Converter::func(move |value| {
        let (text, n) = match value {
            Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
                (s.clone(), s.parse::<u64>().ok())
            }
            Value::Number(n) => (n.to_string(), n.as_u64()),
            _ => return Err(rejected(value)),
        };
        let n = n.ok_or_else(|| rejected(value))?;
        let fits = (digits == 0 || text.len() == digits)
            && min.is_none_or(|min| n >= min)
            && max.is_none_or(|max| n <= max);
        if fits { Ok(Value::from(n)) } else { Err(rejected(value)) }
    }))
}

fn float(args: &Args) -> Option<Converter> {
    let [min, max] = args.bind(["min", "max"])?;
    let min: Option<f64> = opt(min)?;
    let max: Option<f64> = opt(max)?;
    Some(Converter::func(move |value| {
        let n = match value {
            Value::String(s) if s.bytes().all(|b| b.is_ascii_digit() || b == b'.') => s.parse::<f64>().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        };
        match n {
            Some(n) if n >= 0.0 && min.is_none_or(|min| n >= min) && max.is_none_or(|max| n <= max) => {
                Ok(Value::from(n))
            }
            _ => Err(rejected(value)),
        }
    }))
}

fn uuid() -> Converter {
    Converter::func(|value| {
        let id = value.as_str().and_then(|s| Uuid::parse_str(s).ok()).ok_or_else(|| rejected(value))?;
        Ok(Value::String(id.hyphenated().to_string()))
    })
}

// ── Validator ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Specs {
    global: BTreeMap<String, Converter>,
    resources: BTreeMap<String, BTreeMap<String, Converter>>,
    restrictions: BTreeMap<String, Restriction>,
}

struct Restriction {
    required: BTreeSet<String>,
    allowed: BTreeSet<String>,
    strip_extra: bool,
}

/// Validates and converts request input.
///
/// Cloning a validator gives another handle to the same specifications.
#[derive(Clone, Default)]
pub struct Validator {
    specs: Arc<RwLock<Specs>>,
}

impl Validator {
    pub fn new() -> Self { Self::default() }

    /// Runs the validator on the input of every request `app` handles.
    pub fn attach_to(&self, app: &mut App) {
        let validator = self.clone();
        app.pre_processor().push(move |data| validator.validate(data));
    }

    /// Converts `field` with `converter` on input to `resource`.
    pub fn enforce(&self, resource: &Resource, field: &str, converter: Converter) -> &Self {
        self.specs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .resources
            .entry(resource.name().to_owned())
            .or_default()
            .insert(field.to_owned(), converter);
        self
    }

    /// Converts `field` with `converter` on input to every resource, unless
    /// the resource has its own converter for the field.
    pub fn enforce_all(&self, field: &str, converter: Converter) -> &Self {
        self.specs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .global
            .insert(field.to_owned(), converter);
        self
    }

    /// Limits input to `resource` to the listed fields. A field written as
    /// `*name` is required.
    ///
    /// Unlisted fields fail validation, or are silently dropped when
    /// `strip_extra` is set.
    pub fn restrict(&self, resource: &Resource, fields: &[&str], strip_extra: bool) -> &Self {
        let mut restriction = Restriction { required: BTreeSet::new(), allowed: BTreeSet::new(), strip_extra };
        for field in fields {
            match field.strip_prefix('*') {
                Some(name) => {
                    restriction.required.insert(name.to_owned());
                    restriction.allowed.insert(name.to_owned());
                }
                None => {
                    restriction.allowed.insert((*field).to_owned());
                }
            }
        }
        self.specs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .restrictions
            .insert(resource.name().to_owned(), restriction);
        self
    }

    /// A converter accepting strings that match `pattern` in full.
    ///
    /// With a `template`, the result is the template with `$1`, `${name}`
    /// and the like expanded from the match; otherwise it's the string
    /// itself.
    pub fn regex(pattern: &str, template: Option<&str>) -> Result<Converter> {
        let re = Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|e| Error::InvalidSpecification(format!("{pattern}: {e}")))?;
        let template = template.map(str::to_owned);
        Ok(Converter::func(move |value| {
            let s = value.as_str().ok_or_else(|| rejected(value))?;
            let caps = re.captures(s).ok_or_else(|| rejected(value))?;
            Ok(Value::String(match &template {
                Some(t) => {
                    let mut out = String::new();
                    caps.expand(t, &mut out);
                    out
                }
                None => s.to_owned(),
            }))
        }))
    }

    /// A converter accepting date/times in a `strftime`-style `format`.
    ///
    /// Values are normalized to ISO 8601: RFC 3339 when the format carries
    /// an offset, a naive date/time or a plain date otherwise.
    pub fn datetime(format: &str) -> Converter {
        let format = format.to_owned();
        Converter::func(move |value| {
            let s = value.as_str().ok_or_else(|| rejected(value))?;
            if let Ok(dt) = DateTime::parse_from_str(s, &format) {
                return Ok(Value::String(dt.to_rfc3339()));
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, &format) {
                return Ok(serde_json::to_value(dt)?);
            }
            NaiveDate::parse_from_str(s, &format)
                .map(|d| Value::String(d.to_string()))
                .map_err(|_| rejected(value))
        })
    }

    /// Validates `data` for the resource of the current request.
    ///
    /// Outside of a request only the global converters apply.
    pub fn validate(&self, data: Value) -> Result<Value> {
        let ctx = context::current();
        self.validate_for(ctx.as_ref().map(|c| c.resource().name()), data)
    }

    fn validate_for(&self, resource: Option<&str>, data: Value) -> Result<Value> {
        let specs = self.specs.read().unwrap_or_else(PoisonError::into_inner);
        let restriction = resource.and_then(|r| specs.restrictions.get(r));
        let mut converters: BTreeMap<&str, &Converter> =
            specs.global.iter().map(|(f, c)| (f.as_str(), c)).collect();
        if let Some(own) = resource.and_then(|r| specs.resources.get(r)) {
            converters.extend(own.iter().map(|(f, c)| (f.as_str(), c)));
        }
        if converters.is_empty() && restriction.is_none() {
            return Ok(data);
        }

        let Value::Object(mut fields) = data else {
            return Err(Error::bad_request("Expected an object"));
        };

        if let Some(r) = restriction {
            let missing: Vec<String> = r.required.iter().filter(|f| !fields.contains_key(*f)).cloned().collect();
            if !missing.is_empty() {
                return Err(Error::ValidationFailed { fields: missing });
            }
            if r.strip_extra {
                fields.retain(|k, _| r.allowed.contains(k));
            } else {
                let extra: Vec<String> = fields.keys().filter(|k| !r.allowed.contains(*k)).cloned().collect();
                if !extra.is_empty() {
                    return Err(Error::ValidationFailed { fields: extra });
                }
            }
        }

        let mut failed = Vec::new();
        for (field, converter) in converters {
            let Some(value) = fields.get_mut(field) else { continue };
            match converter.convert(value) {
                Ok(converted) => *value = converted,
                Err(e @ Error::InvalidSpecification(_)) => return Err(e),
                Err(e) => {
                    debug!(field, error = %e, "field failed validation");
                    failed.push(field.to_owned());
                }
            }
        }

        if failed.is_empty() { Ok(Value::Object(fields)) } else { Err(Error::ValidationFailed { fields: failed }) }
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let specs = self.specs.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Validator")
            .field("global", &specs.global.keys().collect::<Vec<_>>())
            .field("resources", &specs.resources.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn int() -> Converter {
        Converter::spec("int").unwrap()
    }

    fn str_list() -> Converter {
        Converter::list(Converter::func(|v| v.as_str().map(|_| v.clone()).ok_or_else(|| rejected(v))))
    }

    fn failed_fields(result: Result<Value>) -> Vec<String> {
        match result {
            Err(Error::ValidationFailed { fields }) => fields,
            other => panic!("expected a validation failure, got {other:?}"),
        }
    }

    #[test]
    fn converts_and_strips() {
        let res = Resource::new("res");
        let v = Validator::new();
        v.enforce(&res, "foo", int())
            .enforce(&res, "bar", Converter::list(int()))
            .enforce(&res, "baz", str_list())
            .enforce(&res, "ext", int())
            .restrict(&res, &["*foo", "bar", "baz"], true);

        let data = json!({"foo": "9", "bar": ["49", "49", 2, "76"], "baz": ["384", "dju"], "ext": "newp"});
        assert_eq!(
            v.validate_for(Some("res"), data).unwrap(),
            json!({"foo": 9, "bar": [49, 49, 2, 76], "baz": ["384", "dju"]})
        );
    }

    #[test]
    fn fields_outside_the_spec_pass_through() {
        let v = Validator::new();
        v.enforce_all("foo", int()).enforce_all("baz", Converter::list(int()));
        let data = json!({"bar": "open the door", "baz": ["85", "58"]});
        assert_eq!(v.validate_for(None, data).unwrap(), json!({"bar": "open the door", "baz": [85, 58]}));
    }

    #[test]
    fn restrictions() {
        let res = Resource::new("res");
        let v = Validator::new();
        v.restrict(&res, &["*foo", "bar"], false);
        assert_eq!(failed_fields(v.validate_for(Some("res"), json!({"bar": "x"}))), vec!["foo"]);
        assert_eq!(failed_fields(v.validate_for(Some("res"), json!({"foo": 1, "qux": 2}))), vec!["qux"]);
        assert!(v.validate_for(Some("other"), json!({"qux": 2})).is_ok());
    }

    #[test]
    fn every_failing_field_is_reported() {
        let v = Validator::new();
        v.enforce_all("a", int())
            .enforce_all("b", int())
            .enforce_all("c", Converter::spec("any(john, jane)").unwrap());
        let data = json!({"a": "5", "b": "6fg", "c": "harry"});
        assert_eq!(failed_fields(v.validate_for(None, data)), vec!["b", "c"]);
    }

    #[test]
    fn resource_converters_override_global() {
        let res = Resource::new("res");
        let v = Validator::new();
        v.enforce_all("id", int()).enforce(&res, "id", Converter::spec("string").unwrap());
        assert_eq!(v.validate_for(Some("res"), json!({"id": "abc"})).unwrap(), json!({"id": "abc"}));
        assert!(v.validate_for(None, json!({"id": "abc"})).is_err());
    }

    #[test]
    fn malformed_specs() {
        for spec in ["dskjfhskdjfsdj", "int(", "int(bogus=1)", "string(1, 2, 3, 4)", "any", "int(min=x)"] {
            assert!(matches!(Converter::spec(spec), Err(Error::InvalidSpecification(_))), "{spec}");
        }
        assert!(Validator::regex("(unclosed", None).is_err());
    }

    #[test]
    fn named_converters() {
        let id = "029B2439-B561-4EC8-BDF0-710B6148A70D";
        let uuid = Converter::spec("uuid").unwrap();
        assert_eq!(uuid.convert(&json!(id)).unwrap(), json!(id.to_lowercase()));

        let s = Converter::spec("string(length=3)").unwrap();
        assert!(s.convert(&json!("abc")).is_ok());
        assert!(s.convert(&json!("abcd")).is_err());

        let n = Converter::spec("int(fixed_digits=3, max=100)").unwrap();
        assert_eq!(n.convert(&json!("001")).unwrap(), json!(1));
        assert!(n.convert(&json!("1")).is_err());
        assert!(n.convert(&json!("200")).is_err());
        assert!(n.convert(&json!("-1")).is_err());

        let f = Converter::spec("float(max=1000)").unwrap();
        assert_eq!(f.convert(&json!("2.5")).unwrap(), json!(2.5));
        assert!(f.convert(&json!(1500)).is_err());

        let p = Converter::spec("path").unwrap();
        assert!(p.convert(&json!("a/b/c")).is_ok());
        assert!(p.convert(&json!("/etc")).is_err());
    }

    #[test]
    fn regex_converter() {
        let plain = Validator::regex("boy", None).unwrap();
        assert_eq!(plain.convert(&json!("boy")).unwrap(), json!("boy"));
        assert!(plain.convert(&json!("That boy")).is_err());

        let gender = Validator::regex("(male|female)", Some("Gender: $1")).unwrap();
        assert_eq!(gender.convert(&json!("male")).unwrap(), json!("Gender: male"));
        assert!(gender.convert(&json!("alien")).is_err());
    }

    #[test]
    fn datetime_converter() {
        let day = Validator::datetime("%d/%m/%Y");
        assert_eq!(day.convert(&json!("01/03/2024")).unwrap(), json!("2024-03-01"));

        let stamp = Validator::datetime("%Y-%m-%d %H:%M");
        assert_eq!(stamp.convert(&json!("2024-03-01 10:30")).unwrap(), json!("2024-03-01T10:30:00"));
        assert!(stamp.convert(&json!("yesterday")).is_err());
    }
}
