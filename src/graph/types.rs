use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Write};

macro_rules! dense_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
        )]
        pub struct $name(pub u32);

        impl $name {
            #[inline(always)]
            pub fn index(&self) -> usize { self.0 as usize }
            pub fn new(idx: usize) -> Self { Self(idx as u32) }
        }
    };
}

dense_id!(
    /// An addressable result in the computation graph.
    ValueId
);
dense_id!(OpId);
dense_id!(InitializerId);
dense_id!(StatisticId);

/// A parameter attached to an operation or a statistic stage.
///
/// Parameters take part in cache fingerprints, so every variant has a
/// canonical text encoding (see [`ParamValue::write_canonical`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Type-tagged encoding; `Int(1)` and `Float(1.0)` never collide.
    pub fn write_canonical(&self, out: &mut String) {
        match self {
            ParamValue::None => out.push('n'),
            ParamValue::Bool(b) => { let _ = write!(out, "b:{}", b); }
            ParamValue::Int(i) => { let _ = write!(out, "i:{}", i); }
            ParamValue::Float(f) => { let _ = write!(out, "f:{:?}", f); }
            ParamValue::Str(s) => { let _ = write!(out, "s:{:?}", s); }
            ParamValue::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 { out.push(','); }
                    item.write_canonical(out);
                }
                out.push(']');
            }
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::None => write!(f, "None"),
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Str(s) => write!(f, "{}", s),
            ParamValue::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<bool> for ParamValue { fn from(v: bool) -> Self { ParamValue::Bool(v) } }
impl From<i64> for ParamValue { fn from(v: i64) -> Self { ParamValue::Int(v) } }
impl From<f64> for ParamValue { fn from(v: f64) -> Self { ParamValue::Float(v) } }
impl From<&str> for ParamValue { fn from(v: &str) -> Self { ParamValue::Str(v.to_string()) } }
impl From<String> for ParamValue { fn from(v: String) -> Self { ParamValue::Str(v) } }

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ParamValue::None)
    }
}

/// Parameters are kept sorted by key so that iteration is canonical.
pub type Params = BTreeMap<String, ParamValue>;

/// Appends `{k=v;...}` in key order.
pub fn write_canonical_params(params: &Params, out: &mut String) {
    out.push('{');
    for (key, value) in params {
        let _ = write!(out, "{:?}=", key);
        value.write_canonical(out);
        out.push(';');
    }
    out.push('}');
}

/// Where a value comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueSource {
    /// Filled from outside the graph: a declared input, a bound statistic
    /// result, or a value that was injected without either.
    Placeholder,
    Constant(ParamValue),
    Output { op: OpId, slot: u32 },
}

/// Defines the step performed by an operation of the raw graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpDef {
    pub kind: String,
    pub params: Params,
    pub num_outputs: u32,
    /// Creates a stateful resource (e.g. a lookup table). Its outputs are
    /// usable only once the matching initializer has run.
    pub resource: bool,
    /// Wraps a black-box function whose behaviour cannot be fingerprinted.
    pub opaque: bool,
}

impl OpDef {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: Params::new(),
            num_outputs: 1,
            resource: false,
            opaque: false,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_outputs(mut self, num_outputs: u32) -> Self {
        self.num_outputs = num_outputs;
        self
    }

    pub fn resource(mut self) -> Self {
        self.resource = true;
        self
    }

    pub fn opaque(mut self) -> Self {
        self.opaque = true;
        self
    }
}

/// A one-time setup step for a resource operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Initializer {
    pub name: String,
    pub resource: OpId,
    pub inputs: Vec<ValueId>,
    /// Whether the initializer is registered to run. Untracked initializers
    /// stay in the graph so that errors can name them.
    pub tracked: bool,
}
