//! Solver descriptors returned by the remote catalog.

use std::fmt::{self, Debug, Formatter};

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Derived attributes resolvable by name in filter and sort expressions.
pub(crate) const DERIVED_PROPERTIES: &[&str] =
    &["name", "id", "online", "avg_load", "num_active_qubits"];

/// Immutable descriptor of one remote solver.
///
/// Wraps the raw catalog record and exposes its `properties` map, the
/// advertised `parameters` (a sub-map of properties), and a few derived
/// attributes used by the filtering surface.
#[derive(Clone)]
pub struct Solver {
    id: String,
    data: Value,
    properties: Map<String, Value>,
    parameters: Map<String, Value>,
}

impl Solver {
    /// Validates and wraps a raw catalog descriptor.
    ///
    /// A descriptor without `id`, `properties`, or `properties.parameters`
    /// cannot be bound to a solver and fails with
    /// [`Error::UnsupportedSolver`].
    pub fn from_descriptor(data: Value) -> Result<Self> {
        let id = data
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::UnsupportedSolver("descriptor has no 'id'".to_string()))?
            .to_string();

        let properties = data
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| {
                Error::UnsupportedSolver(format!("solver {id:?} has no 'properties'"))
            })?;

        let parameters = properties
            .get("parameters")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| {
                Error::UnsupportedSolver(format!("solver {id:?} advertises no 'parameters'"))
            })?;

        Ok(Solver {
            id,
            data,
            properties,
            parameters,
        })
    }

    /// Solver id (also exposed as the `name` attribute).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The full raw descriptor.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Advertised solver properties.
    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    /// Parameters the solver accepts, with human-readable descriptions.
    pub fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }

    /// Whether the solver is accepting problems. Descriptors without a
    /// `status` field count as online.
    pub fn online(&self) -> bool {
        match self.data.get("status").and_then(Value::as_str) {
            Some(status) => status.eq_ignore_ascii_case("online"),
            None => true,
        }
    }

    /// Reported average load, when the catalog provides one.
    pub fn avg_load(&self) -> Option<f64> {
        self.data.get("avg_load").and_then(Value::as_f64)
    }

    /// Number of working qubits, from the advertised qubit list when
    /// present, otherwise the `num_qubits` property.
    pub fn num_active_qubits(&self) -> Option<u64> {
        if let Some(qubits) = self.properties.get("qubits").and_then(Value::as_array) {
            return Some(qubits.len() as u64);
        }
        self.properties.get("num_qubits").and_then(Value::as_u64)
    }

    /// Resolves a derived attribute by name.
    pub(crate) fn derived(&self, name: &str) -> Option<Value> {
        match name {
            "name" | "id" => Some(Value::String(self.id.clone())),
            "online" => Some(Value::Bool(self.online())),
            "avg_load" => self.avg_load().map(|load| {
                serde_json::Number::from_f64(load)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }),
            "num_active_qubits" => self.num_active_qubits().map(|n| Value::Number(n.into())),
            _ => None,
        }
        .filter(|value| !value.is_null())
    }
}

impl Debug for Solver {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Solver").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    pub(crate) fn descriptor(id: &str) -> Value {
        json!({
            "id": id,
            "description": "A test solver",
            "status": "online",
            "avg_load": 0.7,
            "properties": {
                "supported_problem_types": ["qubo", "ising"],
                "qubits": [0, 1, 2, 3, 4],
                "couplers": [[0, 1], [0, 2], [1, 2]],
                "num_qubits": 3,
                "parameters": {"num_reads": "Number of samples to return."},
            },
        })
    }

    #[test]
    fn wraps_complete_descriptor() {
        let solver = Solver::from_descriptor(descriptor("abc123")).unwrap();

        assert_eq!(solver.id(), "abc123");
        assert!(solver.online());
        assert_eq!(solver.avg_load(), Some(0.7));
        assert_eq!(solver.num_active_qubits(), Some(5));
        assert!(solver.parameters().contains_key("num_reads"));
    }

    #[test]
    fn rejects_descriptor_without_parameters() {
        let mut data = descriptor("abc123");
        data["properties"]
            .as_object_mut()
            .unwrap()
            .remove("parameters");

        let err = Solver::from_descriptor(data).unwrap_err();
        assert!(matches!(err, Error::UnsupportedSolver(_)));
    }

    #[test]
    fn missing_status_counts_as_online() {
        let mut data = descriptor("abc123");
        data.as_object_mut().unwrap().remove("status");
        let solver = Solver::from_descriptor(data).unwrap();
        assert!(solver.online());

        let mut data = descriptor("abc123");
        data["status"] = json!("offline");
        let solver = Solver::from_descriptor(data).unwrap();
        assert!(!solver.online());
    }

    #[test]
    fn derived_attributes_resolve() {
        let solver = Solver::from_descriptor(descriptor("abc123")).unwrap();

        assert_eq!(solver.derived("name"), Some(json!("abc123")));
        assert_eq!(solver.derived("online"), Some(json!(true)));
        assert_eq!(solver.derived("num_active_qubits"), Some(json!(5)));
        assert_eq!(solver.derived("nonexistent"), None);
    }
}
