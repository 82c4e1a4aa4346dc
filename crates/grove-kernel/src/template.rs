//! Templates: text with `{{ expression }}` spans and optional front matter.
//!
//! A document may start with a YAML block between `---` lines. The block
//! becomes the template's data tree; the rest is the body.
//!
//! ```text
//! ---
//! name: Bob
//! ---
//! Hello, {{ name }}!
//! ```

use std::fmt;
use std::sync::{Arc, LazyLock};

use futures::future::try_join_all;
use regex::Regex;

use crate::ast::TemplatePart;
use crate::error::{ResultExt, TreeError, TreeResult};
use crate::interpreter::{self, builtins};
use crate::parser;
use crate::scope::Scope;
use crate::transform::MergeTree;
use crate::tree::loaders::value_from_yaml;
use crate::tree::{ObjectTree, Record, TreeRef};
use crate::value::Value;

static FRONT_MATTER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(?s)\A---\r?\n(?P<data>.*?)\r?\n---\r?\n(?P<body>.*)\z"));

/// A compiled template.
#[derive(Debug, Clone)]
pub struct Template {
    text: String,
    front_matter: Option<serde_yaml::Value>,
    parts: Vec<TemplatePart>,
}

impl Template {
    /// Split off front matter and parse the body.
    pub fn compile(text: &str) -> TreeResult<Template> {
        let front_matter = FRONT_MATTER
            .as_ref()
            .map_err(|e| TreeError::Eval(format!("front matter pattern: {e}")))?;
        let (front_matter, body) = match front_matter.captures(text) {
            Some(captures) => {
                let data = captures.name("data").map_or("", |m| m.as_str());
                let body = captures.name("body").map_or("", |m| m.as_str());
                let yaml: serde_yaml::Value = serde_yaml::from_str(data)?;
                (Some(yaml), body)
            }
            None => (None, text),
        };
        let parts = parser::parse_template_document(body)?;
        Ok(Template {
            text: text.to_string(),
            front_matter,
            parts,
        })
    }

    /// The full source, front matter included.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn parts(&self) -> &[TemplatePart] {
        &self.parts
    }

    /// A fresh tree over the front matter, if there is any.
    ///
    /// Built per call: getters in the front matter evaluate in the scope of
    /// the tree they're attached to.
    pub fn data(&self, container: Option<&TreeRef>) -> TreeResult<Option<TreeRef>> {
        let Some(yaml) = &self.front_matter else {
            return Ok(None);
        };
        let tree = match value_from_yaml(yaml)? {
            Value::Tree(tree) => tree,
            Value::Null => return Ok(None),
            other => ObjectTree::new(Record::new().field("0", other)),
        };
        if let Some(container) = container {
            tree.set_parent(Arc::downgrade(container));
        }
        Ok(Some(tree))
    }

    /// Render with `input` bound to `.` and `@input`.
    ///
    /// Names resolve through, in order: the ambient bindings, the input
    /// (when it is a tree), the front matter, and `container`'s scope.
    #[tracing::instrument(level = "debug", skip_all, fields(parts = self.parts.len()))]
    pub async fn apply(&self, input: Option<Value>, container: Option<TreeRef>) -> TreeResult<Rendered> {
        let data = self.data(container.as_ref())?;

        let template_info: TreeRef = ObjectTree::ambient([
            ("text", Some(Value::String(self.text.clone()))),
            ("data", data.clone().map(Value::Tree)),
        ]);
        let mut links: Vec<TreeRef> = vec![ObjectTree::ambient([
            (".", input.clone()),
            ("@input", input.clone()),
            ("@template", Some(Value::Tree(template_info))),
        ])];
        if let Some(Value::Tree(tree)) = &input {
            links.push(tree.clone());
        }
        if let Some(data) = &data {
            links.push(data.clone());
        }
        let base = match &container {
            Some(container) => Scope::of(container),
            None => builtins(),
        };
        let scope = Scope::prepend(links, base);

        let texts = try_join_all(self.parts.iter().map(|part| {
            let scope = scope.clone();
            async move {
                match part {
                    TemplatePart::Text(text) => Ok(text.clone()),
                    TemplatePart::Span { code, range } => {
                        let value = interpreter::evaluate(code, scope)
                            .await
                            .with_context(|| format!("in template span {}..{} `{code}`", range.start, range.end))?;
                        interpreter::stringify(value).await
                    }
                }
            }
        }))
        .await?;

        Ok(Rendered {
            text: texts.concat(),
            data,
            input,
        })
    }
}

/// The result of applying a template.
#[derive(Clone)]
pub struct Rendered {
    pub text: String,
    /// The front matter tree used while rendering.
    pub data: Option<TreeRef>,
    pub input: Option<Value>,
}

impl Rendered {
    /// The input merged over the front matter, as a tree.
    pub fn to_tree(&self) -> TreeRef {
        let mut trees = Vec::new();
        if let Some(Value::Tree(input)) = &self.input {
            trees.push(input.clone());
        }
        if let Some(data) = &self.data {
            trees.push(data.clone());
        }
        MergeTree::new(trees)
    }
}

impl fmt::Display for Rendered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for Rendered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rendered")
            .field("text", &self.text)
            .field("has_data", &self.data.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_front_matter_and_body() {
        let template = Template::compile("---\nname: Bob\n---\nHello, {{ name }}!").unwrap();
        let rendered = template.apply(None, None).await.unwrap();
        assert_eq!(rendered.to_string(), "Hello, Bob!");
    }

    #[tokio::test]
    async fn test_input_shadows_front_matter() {
        let template = Template::compile("---\nname: Bob\n---\n{{ name }}/{{ @template/data/name }}").unwrap();
        let input: TreeRef = ObjectTree::from_json(&serde_json::json!({"name": "Ann"}));
        let rendered = template.apply(Some(Value::Tree(input)), None).await.unwrap();
        assert_eq!(rendered.text, "Ann/Bob");
    }

    #[tokio::test]
    async fn test_dot_is_input() {
        let template = Template::compile("<p>{{ . }}</p>").unwrap();
        let rendered = template.apply(Some(Value::from("hi")), None).await.unwrap();
        assert_eq!(rendered.text, "<p>hi</p>");
    }

    #[tokio::test]
    async fn test_front_matter_line_endings() {
        for (text, expected) in [("---\r\nname: Ann\r\n---\r\nHi {{ name }}", "Hi Ann"), ("---\nname: Bo\n---\nHi {{ name }}", "Hi Bo")] {
            let rendered = Template::compile(text).unwrap().apply(None, None).await.unwrap();
            assert_eq!(rendered.text, expected);
        }
        assert!(FRONT_MATTER.is_ok());
    }

    #[test]
    fn test_no_front_matter() {
        let template = Template::compile("plain {{ x }}").unwrap();
        assert_eq!(template.parts().len(), 2);
        assert!(template.data(None).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_span_error_has_context() {
        let template = Template::compile("{{ name(1) }}").unwrap();
        let input: TreeRef = ObjectTree::from_json(&serde_json::json!({"name": "Bob"}));
        let err = template.apply(Some(Value::Tree(input)), None).await.unwrap_err();
        assert!(err.to_string().starts_with("in template span 0..13"));
        assert!(matches!(err.root_cause(), TreeError::Eval(_)));
    }

    #[tokio::test]
    async fn test_rendered_tree_merges_input_over_data() {
        let template = Template::compile("---\na: 1\nb: 2\n---\n").unwrap();
        let input: TreeRef = ObjectTree::from_json(&serde_json::json!({"b": 3}));
        let rendered = template.apply(Some(Value::Tree(input)), None).await.unwrap();
        let plain = crate::ops::plain(rendered.to_tree()).await.unwrap();
        assert_eq!(plain, serde_json::json!({"a": 1, "b": 3}));
    }
}
