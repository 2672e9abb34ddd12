//! Declarative fragment descriptions.
//!
//! A description names primitive instances by registered type, wires their
//! ports by `"<primitive>.<port>"` endpoints, exposes outputs on the root
//! fragment and optionally designates the completion signal. Building a
//! description goes through the [`PrimitiveRegistry`], so unknown types and
//! mistyped connections fail before any net exists.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use rcc_graph::{AnyInPort, Fragment};
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, ValidationError};
use crate::registry::PrimitiveRegistry;

/// A parameter as written in a description file.
///
/// YAML and JSON scalars are accepted as-is and handed to primitives in
/// their text form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ParameterValue {
    pub fn as_text(&self) -> String {
        match self {
            ParameterValue::Bool(v) => v.to_string(),
            ParameterValue::Integer(v) => v.to_string(),
            ParameterValue::Float(v) => v.to_string(),
            ParameterValue::Text(v) => v.clone(),
        }
    }
}

fn as_text_map(params: &BTreeMap<String, ParameterValue>) -> BTreeMap<String, String> {
    params
        .iter()
        .map(|(key, value)| (key.clone(), value.as_text()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveDef {
    pub id: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterValue>,
}

/// `from` is an out-port endpoint, `to` an in-port endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDef {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentDescription {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Overrides the core's default cycle time.
    #[serde(default)]
    pub cycle_time_ms: Option<u64>,
    pub primitives: Vec<PrimitiveDef>,
    #[serde(default)]
    pub connections: Vec<ConnectionDef>,
    /// Exposed output name to `"<primitive>.<port>"`.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    /// Endpoint of the bool out-port that completes the net.
    #[serde(default)]
    pub completion: Option<String>,
}

/// Split `"<primitive>.<port>"`.
fn endpoint<'a>(text: &'a str, field: &str) -> Result<(&'a str, &'a str), ValidationError> {
    match text.split_once('.') {
        Some((primitive, port)) if !primitive.is_empty() && !port.is_empty() => {
            Ok((primitive, port))
        }
        _ => Err(ValidationError::InvalidValue {
            field: field.to_string(),
            value: text.to_string(),
            reason: "expected '<primitive>.<port>'".to_string(),
        }),
    }
}

impl FragmentDescription {
    pub fn from_yaml_str(content: &str) -> AppResult<Self> {
        let description: FragmentDescription = serde_yaml::from_str(content)?;
        description.validate()?;
        Ok(description)
    }

    /// Check names and references. Port names and types are checked when
    /// the fragment is built.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "name".to_string(),
                value: self.name.clone(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.cycle_time_ms == Some(0) {
            return Err(ValidationError::InvalidValue {
                field: "cycle_time_ms".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let mut ids = HashSet::new();
        for primitive in &self.primitives {
            if !ids.insert(primitive.id.as_str()) {
                return Err(ValidationError::DuplicateId {
                    id: primitive.id.clone(),
                    context: "primitives".to_string(),
                });
            }
        }

        let known = |text: &str, field: &str| -> Result<(), ValidationError> {
            let (primitive, _) = endpoint(text, field)?;
            if !ids.contains(primitive) {
                return Err(ValidationError::MissingReference {
                    id: primitive.to_string(),
                    context: field.to_string(),
                });
            }
            Ok(())
        };
        for connection in &self.connections {
            known(&connection.from, "connection from")?;
            known(&connection.to, "connection to")?;
        }
        for source in self.outputs.values() {
            known(source, "outputs")?;
        }
        if let Some(completion) = &self.completion {
            known(completion, "completion")?;
        }
        Ok(())
    }

    /// Instantiate the described graph.
    pub fn build(&self, registry: &PrimitiveRegistry) -> AppResult<Fragment> {
        self.validate()?;
        let mut fragment = Fragment::new(self.name.as_str());
        for def in &self.primitives {
            let params = as_text_map(&def.parameters);
            fragment.add_boxed(registry.create(&def.type_name, &def.id, &params)?);
        }

        for connection in &self.connections {
            let (from, out_port) = endpoint(&connection.from, "connection from")?;
            let (to, in_port) = endpoint(&connection.to, "connection to")?;
            let source = fragment.child_by_name(from)?.core().output(out_port)?;
            fragment
                .child_by_name(to)?
                .core()
                .input(in_port)?
                .connect_any(source)?;
        }

        for (name, source) in &self.outputs {
            let (child, port) = endpoint(source, "outputs")?;
            fragment.expose_child_output(name, child, port)?;
        }

        if let Some(completion) = &self.completion {
            let (child, port) = endpoint(completion, "completion")?;
            let source = fragment.child_by_name(child)?.core().output(port)?;
            fragment.completion().connect_any(source)?;
        }
        Ok(fragment)
    }
}

/// A device the scenario creates before loading its net.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDef {
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterValue>,
}

impl DeviceDef {
    pub fn text_parameters(&self) -> BTreeMap<String, String> {
        as_text_map(&self.parameters)
    }
}

/// Devices plus the fragment driving them; the unit the command line works
/// with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub devices: Vec<DeviceDef>,
    pub fragment: FragmentDescription,
}

impl Scenario {
    pub fn load_yaml(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn load_json(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let scenario: Scenario = serde_json::from_str(&content)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn from_yaml_str(content: &str) -> AppResult<Self> {
        let scenario: Scenario = serde_yaml::from_str(content)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut names = HashSet::new();
        for device in &self.devices {
            if !names.insert(device.name.as_str()) {
                return Err(ValidationError::DuplicateId {
                    id: device.name.clone(),
                    context: "devices".to_string(),
                });
            }
        }
        self.fragment.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use rcc_graph::{GraphError, Primitive};

    const RAMP: &str = r#"
name: ramp
cycle_time_ms: 5
primitives:
  - id: target
    type: Constant<f64>
    parameters:
      value: 1.5
  - id: reached
    type: Threshold
    parameters:
      limit: 1
  - id: stop
    type: StopAfter
    parameters:
      cycles: 3
connections:
  - from: target.value
    to: reached.value
outputs:
  target: target.value
  reached: reached.reached
completion: stop.done
"#;

    #[test]
    fn parses_and_builds() {
        let description = FragmentDescription::from_yaml_str(RAMP).unwrap();
        assert_eq!(description.cycle_time_ms, Some(5));
        assert_eq!(
            description.primitives[0].parameters["value"],
            ParameterValue::Float(1.5)
        );
        assert_eq!(
            description.primitives[1].parameters["limit"],
            ParameterValue::Integer(1)
        );

        let fragment = description.build(&PrimitiveRegistry::standard()).unwrap();
        assert_eq!(fragment.name(), "ramp");
        assert_eq!(fragment.children().count(), 3);
        assert!(fragment.core().output("target").is_ok());
        assert!(fragment.core().output("reached").is_ok());
        assert!(fragment.completion().is_connected());
        let threshold = fragment.child_by_name("reached").unwrap();
        let input = threshold.core().input("value").unwrap();
        assert_eq!(input.source_owner(), Some(fragment.child_by_name("target").unwrap().id()));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let yaml = "name: d\nprimitives:\n  - {id: a, type: And}\n  - {id: a, type: And}\n";
        let err = FragmentDescription::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::DuplicateId { .. })
        ));
    }

    #[test]
    fn dangling_references_are_rejected() {
        let yaml = "name: d\nprimitives:\n  - {id: a, type: And}\nconnections:\n  - {from: b.value, to: a.a}\n";
        assert!(matches!(
            FragmentDescription::from_yaml_str(yaml),
            Err(AppError::Validation(ValidationError::MissingReference { .. }))
        ));

        let yaml = "name: d\nprimitives:\n  - {id: a, type: And}\ncompletion: a\n";
        assert!(matches!(
            FragmentDescription::from_yaml_str(yaml),
            Err(AppError::Validation(ValidationError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn build_reports_type_and_port_errors() {
        let registry = PrimitiveRegistry::standard();
        let unknown = FragmentDescription::from_yaml_str(
            "name: d\nprimitives:\n  - {id: a, type: Gripper}\n",
        )
        .unwrap();
        assert!(matches!(
            unknown.build(&registry),
            Err(AppError::UnknownPrimitiveType(_))
        ));

        let mistyped = FragmentDescription::from_yaml_str(
            "name: d\nprimitives:\n  - {id: c, type: CycleCounter}\n  - {id: a, type: And}\nconnections:\n  - {from: c.cycle, to: a.a}\n",
        )
        .unwrap();
        assert!(matches!(
            mistyped.build(&registry),
            Err(AppError::Graph(GraphError::PortTypeMismatch { .. }))
        ));

        let missing_port = FragmentDescription::from_yaml_str(
            "name: d\nprimitives:\n  - {id: a, type: And}\noutputs:\n  x: a.nope\n",
        )
        .unwrap();
        assert!(matches!(
            missing_port.build(&registry),
            Err(AppError::Graph(GraphError::UnknownPort { .. }))
        ));
    }

    #[test]
    fn scenario_rejects_duplicate_devices() {
        let yaml = r#"
devices:
  - {name: j1, type: sim_joint}
  - {name: j1, type: sim_joint}
fragment:
  name: s
  primitives: []
"#;
        assert!(matches!(
            Scenario::from_yaml_str(yaml),
            Err(AppError::Validation(ValidationError::DuplicateId { .. }))
        ));
    }

    #[test]
    fn device_parameters_render_as_text() {
        let yaml = r#"
devices:
  - name: j1
    type: sim_joint
    parameters: {tau: 0.2, initial: 0}
fragment:
  name: s
  primitives: []
"#;
        let scenario = Scenario::from_yaml_str(yaml).unwrap();
        let params = scenario.devices[0].text_parameters();
        assert_eq!(params["tau"], "0.2");
        assert_eq!(params["initial"], "0");
    }
}
