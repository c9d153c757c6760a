//! Client-side solver selection: feature filters and ordering.
//!
//! Filter keys follow the form `key(__key)*(__operator)?`, with the key path
//! pointing at a derived solver attribute, an advertised parameter, or a
//! (possibly nested) solver property. The default operator is `eq`, except
//! for parameters where it is `available`.

use std::cmp::Ordering;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::solver::{Solver, DERIVED_PROPERTIES};

/// Filter predicate operators.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Op {
    Eq,
    Available,
    Lt,
    Lte,
    Gt,
    Gte,
    Regex,
    Covers,
    Within,
    In,
    Contains,
    Issubset,
    Issuperset,
}

impl Op {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "eq" => Some(Op::Eq),
            "available" => Some(Op::Available),
            "lt" => Some(Op::Lt),
            "lte" => Some(Op::Lte),
            "gt" => Some(Op::Gt),
            "gte" => Some(Op::Gte),
            "regex" => Some(Op::Regex),
            "covers" => Some(Op::Covers),
            "within" => Some(Op::Within),
            "in" => Some(Op::In),
            "contains" => Some(Op::Contains),
            "issubset" => Some(Op::Issubset),
            "issuperset" => Some(Op::Issuperset),
            _ => None,
        }
    }

    /// Applies the operator to a feature value and the filter argument.
    ///
    /// A missing feature (`lhs == None`) fails every predicate except
    /// `available` and equality against `null`; membership (`in`) also
    /// admits a missing feature when the argument contains `null`.
    fn eval(self, lhs: Option<&Value>, rhs: &Value) -> bool {
        match self {
            Op::Eq => match lhs {
                None => rhs.is_null(),
                Some(value) => value == rhs,
            },
            Op::Available => lhs.is_some() == truthy(rhs),
            Op::Lt => ordered(lhs, rhs, |ord| ord == Ordering::Less),
            Op::Lte => ordered(lhs, rhs, |ord| ord != Ordering::Greater),
            Op::Gt => ordered(lhs, rhs, |ord| ord == Ordering::Greater),
            Op::Gte => ordered(lhs, rhs, |ord| ord != Ordering::Less),
            Op::Regex => regex_match(lhs, rhs),
            Op::Covers => lhs.map(|prop| covers(prop, rhs)).unwrap_or(false),
            Op::Within => lhs.map(|prop| covers(rhs, prop)).unwrap_or(false),
            Op::In => rhs
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .any(|item| lhs.map(|v| v == item).unwrap_or_else(|| item.is_null()))
                })
                .unwrap_or(false),
            Op::Contains => lhs.map(|prop| contains(prop, rhs)).unwrap_or(false),
            Op::Issubset => match (lhs.and_then(Value::as_array), as_items(rhs)) {
                (Some(prop), Some(arg)) => is_subset(prop, arg),
                _ => false,
            },
            Op::Issuperset => match (lhs.and_then(Value::as_array), as_items(rhs)) {
                (Some(prop), Some(arg)) => is_subset(arg, prop),
                _ => false,
            },
        }
    }
}

fn ordered(lhs: Option<&Value>, rhs: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    match lhs.and_then(|value| cmp_values(value, rhs)) {
        Some(ord) => accept(ord),
        None => false,
    }
}

/// Total-enough ordering over JSON scalars and arrays; mixed types are
/// incomparable.
pub(crate) fn cmp_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64().partial_cmp(&y.as_f64()),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Array(x), Value::Array(y)) => {
            for (xi, yi) in x.iter().zip(y.iter()) {
                match cmp_values(xi, yi) {
                    Some(Ordering::Equal) => continue,
                    other => return other,
                }
            }
            Some(x.len().cmp(&y.len()))
        }
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn regex_match(lhs: Option<&Value>, rhs: &Value) -> bool {
    let (Some(Value::String(subject)), Value::String(pattern)) = (lhs, rhs) else {
        return false;
    };
    match Regex::new(&format!("^(?:{pattern})$")) {
        Ok(re) => re.is_match(subject),
        Err(err) => {
            warn!("invalid filter regex {pattern:?}: {err}");
            false
        }
    }
}

fn range_bounds(value: &Value) -> Option<(f64, f64)> {
    let items = value.as_array()?;
    if items.len() != 2 {
        return None;
    }
    let a = items[0].as_f64()?;
    let b = items[1].as_f64()?;
    Some((a.min(b), a.max(b)))
}

/// Does the `prop` range fully cover `arg` (a range or a single value)?
fn covers(prop: &Value, arg: &Value) -> bool {
    let Some((lo, hi)) = range_bounds(prop) else {
        return false;
    };
    if let Some((arg_lo, arg_hi)) = range_bounds(arg) {
        lo <= arg_lo && hi >= arg_hi
    } else if let Some(point) = arg.as_f64() {
        lo <= point && point <= hi
    } else {
        false
    }
}

fn contains(prop: &Value, arg: &Value) -> bool {
    match prop {
        Value::Array(items) => items.iter().any(|item| item == arg),
        Value::String(s) => arg.as_str().map(|needle| s.contains(needle)).unwrap_or(false),
        _ => false,
    }
}

fn as_items(value: &Value) -> Option<&Vec<Value>> {
    value.as_array()
}

fn is_subset(smaller: &[Value], larger: &[Value]) -> bool {
    smaller.iter().all(|item| larger.contains(item))
}

/// Walks a `__`-derived key path through nested maps, with numeric segments
/// indexing into arrays. A JSON `null` counts as missing.
fn pluck<'a>(map: &'a Map<String, Value>, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = map.get(first)?;
    for segment in rest {
        current = match current {
            Value::Object(inner) => inner.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    (!current.is_null()).then_some(current)
}

#[derive(Clone, Debug)]
struct Filter {
    key: String,
    path: Vec<String>,
    op: Option<Op>,
    value: Value,
}

impl Filter {
    fn new(key: &str, value: Value) -> Self {
        let segments: Vec<&str> = key.split("__").collect();
        let (path, op) = match segments.split_last() {
            Some((last, rest)) if !rest.is_empty() => match Op::from_name(last.as_ref()) {
                Some(op) => (rest.to_vec(), Some(op)),
                None => (segments.clone(), None),
            },
            _ => (segments.clone(), None),
        };

        Filter {
            key: key.to_string(),
            path: path.into_iter().map(str::to_string).collect(),
            op,
            value,
        }
    }

    /// Resolves the feature this filter points at and evaluates it: derived
    /// attributes first, then advertised parameters (defaulting to
    /// `available`), then properties.
    fn matches(&self, solver: &Solver) -> bool {
        let (lhs, op) = if self.path.len() == 1 && DERIVED_PROPERTIES.contains(&self.path[0].as_str())
        {
            (solver.derived(&self.path[0]), self.op.unwrap_or(Op::Eq))
        } else if let Some(value) = pluck(solver.parameters(), &self.path) {
            (Some(value.clone()), self.op.unwrap_or(Op::Available))
        } else if let Some(value) = pluck(solver.properties(), &self.path) {
            (Some(value.clone()), self.op.unwrap_or(Op::Eq))
        } else {
            (None, self.op.unwrap_or(Op::Eq))
        };

        op.eval(lhs.as_ref(), &self.value)
    }
}

/// Sort order for catalog queries.
enum SortOrder {
    /// Dot-separated attribute path, with a leading `-` for descending.
    Path(String),
    /// Caller-supplied key function; solvers yielding `None` sort last.
    Key(Arc<dyn Fn(&Solver) -> Option<Value> + Send + Sync>),
    /// Keep the order the API returned.
    Unsorted,
}

impl Clone for SortOrder {
    fn clone(&self) -> Self {
        match self {
            SortOrder::Path(path) => SortOrder::Path(path.clone()),
            SortOrder::Key(key) => SortOrder::Key(key.clone()),
            SortOrder::Unsorted => SortOrder::Unsorted,
        }
    }
}

impl Debug for SortOrder {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            SortOrder::Path(path) => f.debug_tuple("Path").field(path).finish(),
            SortOrder::Key(_) => f.write_str("Key(..)"),
            SortOrder::Unsorted => f.write_str("Unsorted"),
        }
    }
}

/// A solver selection query: feature filters plus an ordering.
///
/// Unless a filter on `online` is given explicitly, `online=true` is
/// implied. The default ordering is ascending average load.
///
/// ```
/// use dwave_cloud::SolverQuery;
/// use serde_json::json;
///
/// let query = SolverQuery::new()
///     .filter("num_qubits__gte", json!(2000))
///     .filter("num_reads_range__covers", json!(1000))
///     .filter("name__regex", json!(".*2000.*"))
///     .order_by("-num_active_qubits");
/// ```
#[derive(Clone, Debug)]
pub struct SolverQuery {
    filters: Vec<Filter>,
    order: SortOrder,
    refresh: bool,
}

impl Default for SolverQuery {
    fn default() -> Self {
        SolverQuery {
            filters: Vec::new(),
            order: SortOrder::Path("avg_load".to_string()),
            refresh: false,
        }
    }
}

impl SolverQuery {
    pub fn new() -> Self {
        SolverQuery::default()
    }

    /// Query matching a single solver by name.
    pub fn from_name(name: &str) -> Self {
        SolverQuery::new().filter("name", Value::String(name.to_string()))
    }

    /// Parses a configured default-solver value: a JSON feature map, or a
    /// bare solver name.
    pub fn from_spec(spec: &str) -> Self {
        match serde_json::from_str::<Value>(spec) {
            Ok(Value::Object(features)) => {
                let mut query = SolverQuery::new();
                for (key, value) in features {
                    query = query.filter(&key, value);
                }
                query
            }
            _ => {
                debug!("default solver spec is not a feature map, using it as a name: {spec:?}");
                SolverQuery::from_name(spec)
            }
        }
    }

    /// Adds one feature filter.
    pub fn filter(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::new(key, value.into()));
        self
    }

    /// Orders results by an attribute path; prefix with `-` for descending.
    pub fn order_by(mut self, path: &str) -> Self {
        self.order = SortOrder::Path(path.to_string());
        self
    }

    /// Orders results with a caller-supplied key function.
    pub fn order_by_key<F>(mut self, key: F) -> Self
    where
        F: Fn(&Solver) -> Option<Value> + Send + Sync + 'static,
    {
        self.order = SortOrder::Key(Arc::new(key));
        self
    }

    /// Keeps the order the API returned.
    pub fn unordered(mut self) -> Self {
        self.order = SortOrder::Unsorted;
        self
    }

    /// Bypasses the catalog cache for this query.
    pub fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub(crate) fn wants_refresh(&self) -> bool {
        self.refresh
    }

    /// A solver name this query pins exactly, letting the catalog fetch a
    /// single descriptor instead of the whole listing.
    pub(crate) fn exact_name(&self) -> Option<String> {
        self.filters
            .iter()
            .find(|f| f.key == "name" || f.key == "name__eq")
            .and_then(|f| f.value.as_str())
            .map(str::to_string)
    }

    pub(crate) fn matches(&self, solver: &Solver) -> bool {
        let online_filtered = self.filters.iter().any(|f| f.path == ["online"]);
        if !online_filtered && !solver.online() {
            return false;
        }
        self.filters.iter().all(|f| f.matches(solver))
    }

    /// Filters and orders a fetched solver list.
    pub(crate) fn apply(&self, solvers: Vec<Solver>) -> Vec<Solver> {
        let selected: Vec<Solver> = solvers
            .into_iter()
            .filter(|solver| self.matches(solver))
            .collect();

        match &self.order {
            SortOrder::Unsorted => selected,
            SortOrder::Key(key) => sort_stable(selected, |s| key(s), false),
            SortOrder::Path(spec) => {
                let (descending, path) = match spec.strip_prefix('-') {
                    Some(rest) => (true, rest),
                    None => (false, spec.as_str()),
                };
                if path.is_empty() {
                    let mut reversed = selected;
                    reversed.reverse();
                    reversed
                } else {
                    sort_stable(selected, |s| sort_key(s, path), descending)
                }
            }
        }
    }
}

/// Resolves a sort path against a solver: a derived attribute name, or a
/// path rooted at `properties` / `parameters`.
fn sort_key(solver: &Solver, path: &str) -> Option<Value> {
    let segments: Vec<String> = path.split('.').map(str::to_string).collect();
    match segments.split_first() {
        Some((first, [])) => solver.derived(first),
        Some((first, rest)) if first.as_str() == "properties" => {
            pluck(solver.properties(), rest).cloned()
        }
        Some((first, rest)) if first.as_str() == "parameters" => {
            pluck(solver.parameters(), rest).cloned()
        }
        _ => None,
    }
}

/// Stable sort pushing solvers without a key to the end, in both
/// directions; ties keep the API return order.
fn sort_stable(
    solvers: Vec<Solver>,
    key: impl Fn(&Solver) -> Option<Value>,
    descending: bool,
) -> Vec<Solver> {
    let keyed: Vec<(Option<Value>, Solver)> = solvers
        .into_iter()
        .map(|solver| (key(&solver), solver))
        .collect();

    let (mut valid, invalid): (Vec<_>, Vec<_>) =
        keyed.into_iter().partition(|(key, _)| key.is_some());

    valid.sort_by(|(a, _), (b, _)| {
        let ord = match (a, b) {
            (Some(a), Some(b)) => cmp_values(a, b).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        };
        if descending {
            ord.reverse()
        } else {
            ord
        }
    });

    valid
        .into_iter()
        .chain(invalid)
        .map(|(_, solver)| solver)
        .collect()
}
