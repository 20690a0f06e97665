/*!
 * Typed action requests.
 *
 * The module receives an action name and a JSON object of arguments;
 * `ActionRequest::parse` turns that pair into one of the catalog actions,
 * and the analysis requests resolve their optional flags to defaults.
 */
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use icpflow_core::error::{Error, Result};
use icpflow_instrument::{AutoAnalysis, AutoAnalysisParams, ManualTarget};

/// Arguments of `start_auto_analysis`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoAnalysisRequest {
    /// Method to analyse with
    pub method_name: String,
    /// Dataset the results are written to
    pub dataset_name: String,
    /// Sample info file describing the batch
    pub sample_info_name: String,
    /// Export template applied to results
    pub export_template_name: String,
    /// Wavelength realignment mode
    pub wavelength_realign: i32,
    /// Calibrate before the samples; defaults to `false`
    #[serde(default)]
    pub precalibrate: Option<bool>,
    /// Use the method active in the software; defaults to `false`
    #[serde(default)]
    pub use_active_method: Option<bool>,
    /// Overrides the configured wait behaviour
    #[serde(default)]
    pub wait_for_completion: Option<bool>,
}

impl AutoAnalysisRequest {
    /// Resolve defaults into the session's request type
    pub fn to_analysis(&self) -> AutoAnalysis {
        AutoAnalysis {
            params: AutoAnalysisParams {
                method_name: self.method_name.clone(),
                dataset_name: self.dataset_name.clone(),
                sample_info_name: self.sample_info_name.clone(),
                export_template_name: self.export_template_name.clone(),
                wavelength_realign: self.wavelength_realign,
            },
            precalibrate: self.precalibrate.unwrap_or(false),
            use_active_method: self.use_active_method.unwrap_or(false),
        }
    }
}

/// Arguments of `start_manual_analysis`
///
/// Exactly one selector is expected. When several are given the first one
/// in the order sample, blank, standard, QC is used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualAnalysisRequest {
    /// Sample id
    #[serde(default)]
    pub sample_id: Option<String>,
    /// Calibration blank number
    #[serde(default)]
    pub blank_num: Option<i32>,
    /// Calibration standard number
    #[serde(default)]
    pub std_num: Option<i32>,
    /// QC check number
    #[serde(default)]
    pub qc_num: Option<i32>,
    /// Overrides the configured wait behaviour
    #[serde(default)]
    pub wait_for_completion: Option<bool>,
}

impl ManualAnalysisRequest {
    /// The item to analyse
    pub fn target(&self) -> Result<ManualTarget> {
        let selected = [
            self.sample_id.clone().map(ManualTarget::Sample),
            self.blank_num.map(ManualTarget::Blank),
            self.std_num.map(ManualTarget::Standard),
            self.qc_num.map(ManualTarget::Qc),
        ];
        let given = selected.iter().filter(|s| s.is_some()).count();
        let target = selected
            .into_iter()
            .flatten()
            .next()
            .ok_or_else(|| {
                Error::invalid_parameters(
                    "manual analysis needs one of sample_id, blank_num, std_num or qc_num",
                )
            })?;

        if given > 1 {
            warn!(?target, "several manual analysis selectors given, using the first");
        }
        Ok(target)
    }
}

/// One action from the module's catalog, with its arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionRequest {
    /// Ignite the plasma
    PlasmaOn,
    /// Extinguish the plasma
    PlasmaOff,
    /// Move the autosampler
    MoveAutosampler {
        /// Target location
        location: i32,
    },
    /// Halt the current analysis
    StopAnalysis,
    /// Start a batch analysis
    StartAutoAnalysis(AutoAnalysisRequest),
    /// Start a single-item analysis
    StartManualAnalysis(ManualAnalysisRequest),
    /// Realign on the mercury lamp
    HgRealign,
    /// Upload a sample info file
    LoadSampleInfo {
        /// Path of the sample info file
        file_path: String,
    },
    /// Load a stored method
    LoadMethod {
        /// Method name
        name: String,
    },
}

#[derive(Deserialize)]
struct LocationArgs {
    location: i32,
}

#[derive(Deserialize)]
struct FileArgs {
    file_path: String,
}

#[derive(Deserialize)]
struct NameArgs {
    name: String,
}

fn args<T: serde::de::DeserializeOwned>(action: &str, vars: Value) -> Result<T> {
    let vars = if vars.is_null() {
        Value::Object(Default::default())
    } else {
        vars
    };
    serde_json::from_value(vars)
        .map_err(|e| Error::invalid_parameters(format!("{}: {}", action, e)))
}

impl ActionRequest {
    /// Build a request from an action name and its JSON arguments
    pub fn parse(action: &str, vars: Value) -> Result<Self> {
        let request = match action {
            "plasma_on" => ActionRequest::PlasmaOn,
            "plasma_off" => ActionRequest::PlasmaOff,
            "move_autosampler" => {
                let LocationArgs { location } = args(action, vars)?;
                ActionRequest::MoveAutosampler { location }
            }
            "stop_analysis" => ActionRequest::StopAnalysis,
            "start_auto_analysis" => ActionRequest::StartAutoAnalysis(args(action, vars)?),
            "start_manual_analysis" => ActionRequest::StartManualAnalysis(args(action, vars)?),
            "hg_realign" => ActionRequest::HgRealign,
            "load_sample_info" => {
                let FileArgs { file_path } = args(action, vars)?;
                ActionRequest::LoadSampleInfo { file_path }
            }
            "load_method" => {
                let NameArgs { name } = args(action, vars)?;
                ActionRequest::LoadMethod { name }
            }
            other => {
                return Err(Error::invalid_parameters(format!("unknown action '{}'", other)))
            }
        };
        Ok(request)
    }

    /// Catalog name of the action
    pub fn name(&self) -> &'static str {
        match self {
            ActionRequest::PlasmaOn => "plasma_on",
            ActionRequest::PlasmaOff => "plasma_off",
            ActionRequest::MoveAutosampler { .. } => "move_autosampler",
            ActionRequest::StopAnalysis => "stop_analysis",
            ActionRequest::StartAutoAnalysis(_) => "start_auto_analysis",
            ActionRequest::StartManualAnalysis(_) => "start_manual_analysis",
            ActionRequest::HgRealign => "hg_realign",
            ActionRequest::LoadSampleInfo { .. } => "load_sample_info",
            ActionRequest::LoadMethod { .. } => "load_method",
        }
    }
}

/// One argument in the action catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionArgument {
    /// Argument name
    pub name: String,
    /// Argument type as shown to callers
    #[serde(rename = "type")]
    pub kind: String,
    /// Whether the argument must be present
    pub required: bool,
    /// What the argument does
    pub description: String,
}

/// One entry in the action catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDefinition {
    /// Action name
    pub name: String,
    /// What the action does
    pub description: String,
    /// Accepted arguments
    pub args: Vec<ActionArgument>,
}

fn arg(name: &str, kind: &str, required: bool, description: &str) -> ActionArgument {
    ActionArgument {
        name: name.to_string(),
        kind: kind.to_string(),
        required,
        description: description.to_string(),
    }
}

fn action(name: &str, description: &str, args: Vec<ActionArgument>) -> ActionDefinition {
    ActionDefinition {
        name: name.to_string(),
        description: description.to_string(),
        args,
    }
}

/// Every action the module accepts
pub fn catalog() -> Vec<ActionDefinition> {
    let wait = || {
        arg(
            "wait_for_completion",
            "bool",
            false,
            "Wait until the analysis is no longer running or paused",
        )
    };

    vec![
        action("plasma_on", "Turn on the plasma", vec![]),
        action("plasma_off", "Turn off the plasma", vec![]),
        action(
            "move_autosampler",
            "Move the autosampler to a specific position",
            vec![arg("location", "int", true, "Autosampler location")],
        ),
        action("stop_analysis", "Stop the analysis", vec![]),
        action(
            "start_auto_analysis",
            "Analyse the samples of a sample info file",
            vec![
                arg("method_name", "str", true, "Method to analyse with"),
                arg("dataset_name", "str", true, "Dataset the results are written to"),
                arg("sample_info_name", "str", true, "Sample info file describing the batch"),
                arg("export_template_name", "str", true, "Export template applied to results"),
                arg("wavelength_realign", "int", true, "Wavelength realignment mode"),
                arg("precalibrate", "bool", false, "Calibrate before the samples"),
                arg(
                    "use_active_method",
                    "bool",
                    false,
                    "Use the active method; only with precalibrate",
                ),
                wait(),
            ],
        ),
        action(
            "start_manual_analysis",
            "Analyse a single sample, blank, standard or QC",
            vec![
                arg("sample_id", "str", false, "Sample to analyse"),
                arg("blank_num", "int", false, "Calibration blank to analyse"),
                arg("std_num", "int", false, "Calibration standard to analyse"),
                arg("qc_num", "int", false, "QC check to analyse"),
                wait(),
            ],
        ),
        action("hg_realign", "Realign on the mercury lamp", vec![]),
        action(
            "load_sample_info",
            "Upload a sample info file",
            vec![arg("file_path", "str", true, "Path of the sample info file")],
        ),
        action(
            "load_method",
            "Load a stored method",
            vec![arg("name", "str", true, "Method name")],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_selector_wins() {
        let request = ManualAnalysisRequest {
            sample_id: Some("S1".into()),
            blank_num: Some(2),
            ..Default::default()
        };
        assert_eq!(request.target().unwrap(), ManualTarget::Sample("S1".into()));

        let request = ManualAnalysisRequest {
            std_num: Some(4),
            qc_num: Some(1),
            ..Default::default()
        };
        assert_eq!(request.target().unwrap(), ManualTarget::Standard(4));
    }

    #[test]
    fn test_no_selector_is_invalid() {
        let err = ManualAnalysisRequest::default().target().unwrap_err();
        assert!(matches!(err, Error::InvalidParameters(_)));
    }

    #[test]
    fn test_auto_defaults() {
        let request: AutoAnalysisRequest = serde_json::from_value(json!({
            "method_name": "Metals",
            "dataset_name": "Run",
            "sample_info_name": "run.sif",
            "export_template_name": "csv",
            "wavelength_realign": 0
        }))
        .unwrap();
        let analysis = request.to_analysis();
        assert!(!analysis.precalibrate);
        assert!(!analysis.use_active_method);
        assert_eq!(request.wait_for_completion, None);
    }

    #[test]
    fn test_parse_actions() {
        assert_eq!(
            ActionRequest::parse("move_autosampler", json!({"location": 12})).unwrap(),
            ActionRequest::MoveAutosampler { location: 12 }
        );
        assert_eq!(
            ActionRequest::parse("plasma_on", Value::Null).unwrap(),
            ActionRequest::PlasmaOn
        );
        assert_eq!(
            ActionRequest::parse("load_method", json!({"name": "Metals"})).unwrap().name(),
            "load_method"
        );
        let manual = ActionRequest::parse("start_manual_analysis", json!({"qc_num": 3})).unwrap();
        match manual {
            ActionRequest::StartManualAnalysis(request) => {
                assert_eq!(request.target().unwrap(), ManualTarget::Qc(3))
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(
            ActionRequest::parse("reboot", json!({})),
            Err(Error::InvalidParameters(_))
        ));
        assert!(matches!(
            ActionRequest::parse("move_autosampler", json!({"location": "left"})),
            Err(Error::InvalidParameters(_))
        ));
        assert!(matches!(
            ActionRequest::parse("load_sample_info", json!({})),
            Err(Error::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_catalog_matches_parser() {
        for definition in catalog() {
            let vars: serde_json::Map<String, Value> = definition
                .args
                .iter()
                .filter(|a| a.required)
                .map(|a| {
                    let value = match a.kind.as_str() {
                        "int" => json!(1),
                        "bool" => json!(true),
                        _ => json!("x"),
                    };
                    (a.name.clone(), value)
                })
                .collect();
            let vars = if definition.name == "start_manual_analysis" {
                json!({"blank_num": 1})
            } else {
                Value::Object(vars)
            };
            let request = ActionRequest::parse(&definition.name, vars).unwrap();
            assert_eq!(request.name(), definition.name);
        }
    }
}
