//! File loaders: turning file content into values.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::object::{Record, value_from_json};
use super::{ObjectTree, TreeRef};
use crate::error::{TreeError, TreeResult};
use crate::parser;
use crate::template::Template;
use crate::value::{Function, Invocation, Thunk, Value};

/// How a file's bytes are interpreted when unpacked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Loader {
    /// UTF-8 text.
    Text,
    /// A JSON document, as a tree.
    Json,
    /// A YAML document, as a tree.
    Yaml,
    /// A template, as a function of its input.
    Template,
}

impl Loader {
    /// Interpret `bytes`. `container` is the tree holding the file.
    pub async fn load(self, bytes: &[u8], path: &str, container: Option<TreeRef>) -> TreeResult<Value> {
        let result = match self {
            Loader::Text => Ok(Value::String(String::from_utf8_lossy(bytes).into_owned())),
            Loader::Json => serde_json::from_slice::<serde_json::Value>(bytes)
                .map(|json| value_from_json(&json))
                .map_err(TreeError::from),
            Loader::Yaml => serde_yaml::from_slice::<serde_yaml::Value>(bytes)
                .map_err(TreeError::from)
                .and_then(|yaml| value_from_yaml(&yaml)),
            Loader::Template => {
                let text = String::from_utf8_lossy(bytes).into_owned();
                Template::compile(&text).map(|template| template_function(path, template, container))
            }
        };
        result.map_err(|err| TreeError::Load {
            path: path.to_string(),
            source: Box::new(err),
        })
    }

    /// True for loaders whose content is data that can be traversed.
    pub fn unpacks_to_tree(self) -> bool {
        matches!(self, Loader::Json | Loader::Yaml)
    }

    /// File content for a plain data document, for loaders that read data.
    pub fn serialize(self, data: &serde_json::Value) -> TreeResult<Option<Vec<u8>>> {
        match self {
            Loader::Json => {
                let mut bytes = serde_json::to_vec_pretty(data)?;
                bytes.push(b'\n');
                Ok(Some(bytes))
            }
            Loader::Yaml => Ok(Some(serde_yaml::to_string(data)?.into_bytes())),
            Loader::Text | Loader::Template => Ok(None),
        }
    }
}

/// A function applying `template` to its first argument.
fn template_function(path: &str, template: Template, container: Option<TreeRef>) -> Value {
    let template = Arc::new(template);
    Value::Function(Function::new(path, move |mut invocation: Invocation| {
        let template = template.clone();
        let container = container.clone().or_else(|| invocation.this.clone());
        let input = invocation.take(0);
        async move {
            let rendered = template.apply(input, container).await?;
            Ok(Some(Value::String(rendered.text)))
        }
    }))
}

/// Convert YAML into a value; mappings and sequences become trees.
///
/// A value tagged `!ori` is compiled as an expression and stored as a
/// getter, evaluated on first access in the scope of the tree holding it.
pub fn value_from_yaml(yaml: &serde_yaml::Value) -> TreeResult<Value> {
    use serde_yaml::Value as Yaml;

    Ok(match yaml {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(*b),
        Yaml::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Yaml::String(s) => Value::String(s.clone()),
        Yaml::Sequence(items) => {
            let values = items.iter().map(value_from_yaml).collect::<TreeResult<Vec<_>>>()?;
            Value::Tree(ObjectTree::new(Record::sequence(values)))
        }
        Yaml::Mapping(mapping) => {
            let mut record = Record::new();
            for (key, value) in mapping {
                record.insert(yaml_key(key), value_from_yaml(value)?);
            }
            Value::Tree(ObjectTree::new(record))
        }
        Yaml::Tagged(tagged) => {
            if tagged.tag == "ori" {
                let source = match &tagged.value {
                    Yaml::String(s) => s.clone(),
                    other => yaml_key(other),
                };
                let code = parser::parse_expression(&source)?;
                Value::Lazy(Thunk::new(Arc::new(code), None))
            } else {
                value_from_yaml(&tagged.value)?
            }
        }
    })
}

fn yaml_key(key: &serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}
