//! Checked access into the positional JSON a form page embeds.
//!
//! The blob is an undocumented tree of nested arrays where meaning comes
//! from position alone. `Node` carries the path it was reached by, and
//! structure errors name that path (`form[1][1]`).

use serde_json::Value;

use crate::error::DatafactError;

#[derive(Debug, Clone)]
pub struct Node<'a> {
    value: &'a Value,
    path: String,
}

impl<'a> Node<'a> {
    pub fn root(value: &'a Value, name: &str) -> Self {
        Self {
            value,
            path: name.to_string(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The node's elements, or a structure error if it is not an array.
    pub fn elements(&self) -> Result<&'a [Value], DatafactError> {
        self.value
            .as_array()
            .map(Vec::as_slice)
            .ok_or_else(|| self.shape_error("array"))
    }

    /// Require an array with at least `min_len` elements.
    pub fn expect_array(&self, min_len: usize) -> Result<&'a [Value], DatafactError> {
        let items = self.elements()?;
        if items.len() < min_len {
            return Err(DatafactError::Scrape(format!(
                "expected at least {min_len} elements at {}, found {}",
                self.path,
                items.len()
            )));
        }
        Ok(items)
    }

    /// Required child: the node must be an array long enough to have `index`.
    pub fn at(&self, index: usize) -> Result<Node<'a>, DatafactError> {
        let items = self.expect_array(index + 1)?;
        Ok(self.child(&items[index], index))
    }

    /// Optional child: `None` when the node is not an array or is too short.
    pub fn get(&self, index: usize) -> Option<Node<'a>> {
        self.value
            .as_array()
            .and_then(|items| items.get(index))
            .map(|v| self.child(v, index))
    }

    /// Children of an array node, each tagged with its path.
    pub fn children(&self) -> Result<impl Iterator<Item = Node<'a>> + '_, DatafactError> {
        let items = self.elements()?;
        Ok(items.iter().enumerate().map(|(i, v)| self.child(v, i)))
    }

    /// Follow a chain of optional indices, e.g. `[4, 0, 0]`.
    pub fn dig(&self, indices: &[usize]) -> Option<Node<'a>> {
        indices
            .iter()
            .try_fold(self.clone(), |node, &i| node.get(i))
    }

    pub fn array_len(&self) -> Option<usize> {
        self.value.as_array().map(Vec::len)
    }

    pub fn as_str(&self) -> Option<&'a str> {
        self.value.as_str()
    }

    /// Integer value; whole floats are accepted since the blob is produced
    /// by a JavaScript serializer.
    pub fn as_i64(&self) -> Option<i64> {
        self.value.as_i64().or_else(|| {
            self.value
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        })
    }

    /// Strings as-is, numbers in plain decimal. Anything else is `None`.
    pub fn as_text(&self) -> Option<String> {
        match self.value {
            Value::String(s) => Some(s.clone()),
            // serde_json prints large floats as `1e20`; f64's Display never does.
            Value::Number(n) if n.is_f64() => n.as_f64().map(|f| f.to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn child(&self, value: &'a Value, index: usize) -> Node<'a> {
        Node {
            value,
            path: format!("{}[{index}]", self.path),
        }
    }

    fn shape_error(&self, expected: &str) -> DatafactError {
        DatafactError::Scrape(format!(
            "expected {expected} at {}, found {}",
            self.path,
            kind(self.value)
        ))
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
