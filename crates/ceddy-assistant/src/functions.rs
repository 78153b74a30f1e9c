//! Domain functions the language model may call, and their registry.

use crate::error::AssistantError;
use ceddy_types::FunctionCallRecord;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub const SUGGEST_CLUB: &str = "suggest_club";
pub const CHECK_WIND_CONDITIONS: &str = "check_wind_conditions";

/// Accepted type of a function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Number,
    /// A finite number greater than zero.
    PositiveNumber,
    String,
    Boolean,
}

impl ParamKind {
    fn json_type(self) -> &'static str {
        match self {
            Self::Number | Self::PositiveNumber => "number",
            Self::String => "string",
            Self::Boolean => "boolean",
        }
    }

    /// Checks `value`, coercing numeric and boolean strings.
    fn coerce(self, value: &Value) -> Result<Value, String> {
        match self {
            Self::Number | Self::PositiveNumber => {
                let number = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                }
                .ok_or_else(|| format!("expected a number, got {value}"))?;
                if !number.is_finite() {
                    return Err("number must be finite".to_string());
                }
                if self == Self::PositiveNumber && number <= 0.0 {
                    return Err(format!("expected a positive number, got {number}"));
                }
                Ok(json!(number))
            }
            Self::String => match value {
                Value::String(s) => Ok(Value::String(s.clone())),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                _ => Err(format!("expected a string, got {value}")),
            },
            Self::Boolean => match value {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::String(s) => s
                    .trim()
                    .parse::<bool>()
                    .map(Value::Bool)
                    .map_err(|_| format!("expected a boolean, got {value}")),
                _ => Err(format!("expected a boolean, got {value}")),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub description: String,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: true,
        }
    }
}

/// What a domain function returns: structured data for the model and a
/// sentence the dispatcher can speak on its own if the model cannot.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionOutput {
    pub value: Value,
    pub summary: String,
}

pub type FunctionHandler = Arc<dyn Fn(&Map<String, Value>) -> FunctionOutput + Send + Sync>;

/// One registry entry: name, parameter schema, callable.
#[derive(Clone)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    handler: FunctionHandler,
}

impl fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl FunctionSpec {
    pub fn new(
        name: &str,
        description: &str,
        params: Vec<ParamSpec>,
        handler: impl Fn(&Map<String, Value>) -> FunctionOutput + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            params,
            handler: Arc::new(handler),
        }
    }

    /// JSON schema of the parameters object.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.params {
            properties.insert(
                param.name.clone(),
                json!({ "type": param.kind.json_type(), "description": param.description }),
            );
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        json!({ "type": "object", "properties": properties, "required": required })
    }

    /// Tool definition in the chat-completions format.
    pub fn tool_definition(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.json_schema(),
            }
        })
    }

    /// Validates and coerces raw model arguments.
    ///
    /// Accepts an object, a JSON-encoded object string, or null when the
    /// function takes no required parameters. Unknown keys are dropped.
    pub fn validate(&self, raw: &Value) -> Result<Map<String, Value>, AssistantError> {
        let invalid = |reason: String| AssistantError::InvalidArguments {
            function: self.name.clone(),
            reason,
        };

        let parsed;
        let object = match raw {
            Value::Object(map) => map,
            Value::Null => {
                parsed = Map::new();
                &parsed
            }
            Value::String(s) if s.trim().is_empty() => {
                parsed = Map::new();
                &parsed
            }
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(map)) => {
                    parsed = map;
                    &parsed
                }
                _ => return Err(invalid(format!("arguments are not a JSON object: {s}"))),
            },
            other => return Err(invalid(format!("arguments are not an object: {other}"))),
        };

        let mut args = Map::new();
        for param in &self.params {
            match object.get(&param.name) {
                Some(Value::Null) | None if param.required => {
                    return Err(invalid(format!("missing required '{}'", param.name)))
                }
                Some(Value::Null) | None => {}
                Some(value) => {
                    let coerced = param
                        .kind
                        .coerce(value)
                        .map_err(|e| invalid(format!("'{}': {e}", param.name)))?;
                    args.insert(param.name.clone(), coerced);
                }
            }
        }
        Ok(args)
    }

    pub fn call(&self, args: &Map<String, Value>) -> FunctionOutput {
        (self.handler)(args)
    }
}

/// Immutable set of domain functions, built at start-up and shared.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, FunctionSpec>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `suggest_club` over `clubs` plus `check_wind_conditions`.
    pub fn golf_defaults(clubs: ClubTable) -> Self {
        let mut registry = Self::new();
        let clubs = Arc::new(clubs);
        registry.insert(FunctionSpec::new(
            SUGGEST_CLUB,
            "Suggest a golf club based on distance",
            vec![ParamSpec::required(
                "distance",
                ParamKind::PositiveNumber,
                "Distance in yards",
            )],
            move |args| {
                let distance = args.get("distance").and_then(Value::as_f64).unwrap_or(0.0);
                let suggestion = clubs.suggest(distance);
                FunctionOutput {
                    summary: format!("I'd hit the {}. {}", suggestion.club, suggestion.explanation),
                    value: json!(suggestion),
                }
            },
        ));
        registry.insert(FunctionSpec::new(
            CHECK_WIND_CONDITIONS,
            "Check current wind conditions",
            Vec::new(),
            |_| {
                let wind = check_wind_conditions();
                FunctionOutput {
                    summary: format!(
                        "Wind is {} from the {}. {}",
                        wind.speed, wind.direction, wind.recommendation
                    ),
                    value: json!(wind),
                }
            },
        ));
        registry
    }

    /// Adds a function. Names must be unique.
    pub fn register(&mut self, spec: FunctionSpec) -> Result<(), AssistantError> {
        if self.functions.contains_key(&spec.name) {
            return Err(AssistantError::Config(format!(
                "function '{}' is already registered",
                spec.name
            )));
        }
        self.insert(spec);
        Ok(())
    }

    fn insert(&mut self, spec: FunctionSpec) {
        self.functions.insert(spec.name.clone(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&FunctionSpec> {
        self.functions.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn tool_definitions(&self) -> Vec<Value> {
        self.functions.values().map(FunctionSpec::tool_definition).collect()
    }

    /// Resolves, validates, and runs a function.
    pub fn invoke(
        &self,
        name: &str,
        raw_arguments: &Value,
    ) -> Result<(FunctionCallRecord, String), AssistantError> {
        let spec = self
            .get(name)
            .ok_or_else(|| AssistantError::UnknownFunction(name.to_string()))?;
        let args = spec.validate(raw_arguments)?;
        let output = spec.call(&args);
        Ok((
            FunctionCallRecord {
                function_name: spec.name.clone(),
                arguments: Value::Object(args),
                result: output.value,
            },
            output.summary,
        ))
    }
}

/// One row of the distance table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClubBand {
    /// Exclusive upper bound in yards. Only the last band may omit it.
    #[serde(default)]
    pub below: Option<f64>,
    pub club: String,
    pub explanation: String,
}

impl ClubBand {
    fn new(below: Option<f64>, club: &str, explanation: &str) -> Self {
        Self {
            below,
            club: club.to_string(),
            explanation: explanation.to_string(),
        }
    }
}

/// A club pick for a distance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClubSuggestion {
    pub club: String,
    pub explanation: String,
    pub distance: f64,
}

/// Monotonic distance → club lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ClubTable {
    bands: Vec<ClubBand>,
}

impl Default for ClubTable {
    fn default() -> Self {
        Self {
            bands: vec![
                ClubBand::new(
                    Some(20.0),
                    "Putter",
                    "Inside 20 yards, keep it on the ground with the putter.",
                ),
                ClubBand::new(
                    Some(100.0),
                    "Wedge",
                    "For short distances under 100 yards, a wedge is appropriate.",
                ),
                ClubBand::new(
                    Some(150.0),
                    "9 Iron",
                    "For distances between 100-150 yards, a 9 iron is a good choice.",
                ),
                ClubBand::new(
                    Some(180.0),
                    "7 Iron",
                    "For distances between 150-180 yards, a 7 iron is recommended.",
                ),
                ClubBand::new(
                    Some(220.0),
                    "5 Iron",
                    "For distances between 180-220 yards, a 5 iron provides good distance.",
                ),
                ClubBand::new(
                    None,
                    "Driver",
                    "For distances over 220 yards, use your driver for maximum distance.",
                ),
            ],
        }
    }
}

impl ClubTable {
    /// Builds a table, checking that bounds strictly increase.
    pub fn new(bands: Vec<ClubBand>) -> Result<Self, AssistantError> {
        if bands.is_empty() {
            return Err(AssistantError::Config("club table is empty".to_string()));
        }
        let mut previous = f64::NEG_INFINITY;
        for (i, band) in bands.iter().enumerate() {
            match band.below {
                Some(bound) if !bound.is_finite() || bound <= previous => {
                    return Err(AssistantError::Config(format!(
                        "club bound {bound} for '{}' must be finite and above {previous}",
                        band.club
                    )))
                }
                Some(bound) => previous = bound,
                None if i + 1 != bands.len() => {
                    return Err(AssistantError::Config(format!(
                        "only the last club may be open-ended, not '{}'",
                        band.club
                    )))
                }
                None => {}
            }
        }
        Ok(Self { bands })
    }

    pub fn bands(&self) -> &[ClubBand] {
        &self.bands
    }

    /// Picks the club for `distance` yards.
    ///
    /// Never fails: inputs below the table get the first club, inputs past
    /// every bound (or NaN) get the last.
    pub fn suggest(&self, distance: f64) -> ClubSuggestion {
        let band = self
            .bands
            .iter()
            .find(|band| band.below.is_some_and(|bound| distance < bound))
            .or_else(|| self.bands.last())
            .map(|band| (band.club.clone(), band.explanation.clone()))
            .unwrap_or_default();
        ClubSuggestion {
            club: band.0,
            explanation: band.1,
            distance,
        }
    }
}

/// Current wind at the course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindConditions {
    pub speed: String,
    pub direction: String,
    pub recommendation: String,
}

/// Wind report. Static until a weather source is wired in, so it always
/// returns immediately.
pub fn check_wind_conditions() -> WindConditions {
    WindConditions {
        speed: "10 mph".to_string(),
        direction: "North-East".to_string(),
        recommendation: "Adjust your aim slightly to the left to account for the crosswind."
            .to_string(),
    }
}
