use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved key whose presence marks a failed branch.
pub const ERROR_KEY: &str = "error";

/// Conventional key handlers write their primary result under.
pub const PAYLOAD_KEY: &str = "payload";

/// Free-form key/value record carried along one execution branch.
///
/// `Clone` is a deep copy, so every branch that receives a clone owns
/// an independent value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Map<String, Value>);

impl Message {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Builder form of [`Message::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn with_payload(self, payload: impl Into<Value>) -> Self {
        self.with(PAYLOAD_KEY, payload)
    }

    pub fn with_error(self, description: impl Into<String>) -> Self {
        self.with(ERROR_KEY, Value::String(description.into()))
    }

    pub fn has_error(&self) -> bool {
        self.0.contains_key(ERROR_KEY)
    }

    /// Error description, if the message carries the error-signal key.
    pub fn error(&self) -> Option<String> {
        self.0.get(ERROR_KEY).map(describe)
    }

    /// Remove the error-signal key and return its description.
    pub fn take_error(&mut self) -> Option<String> {
        self.0.remove(ERROR_KEY).map(|v| describe(&v))
    }

    /// Overlay every top-level entry of `other` onto this message.
    pub fn merge(&mut self, other: Message) {
        for (key, value) in other.0 {
            self.0.insert(key, value);
        }
    }

    /// Nested lookup such as `payload.items[0].name`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = split_path(path).into_iter();
        let first = segments.next()?;
        let mut current = self.0.get(&first)?;
        for segment in segments {
            current = step(current, &segment)?;
        }
        Some(current)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

/// Nested lookup into an arbitrary JSON value; an empty path yields the root.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    split_path(path)
        .iter()
        .try_fold(root, |current, segment| step(current, segment))
}

fn step<'a>(current: &'a Value, segment: &str) -> Option<&'a Value> {
    match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn split_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    for ch in path.chars() {
        match ch {
            '.' | '[' | ']' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
            }
            '"' | '\'' => {}
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl From<Map<String, Value>> for Message {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Message {
    type Error = Value;

    /// Only JSON objects convert; anything else is handed back.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}

impl From<Message> for Value {
    fn from(msg: Message) -> Self {
        msg.into_value()
    }
}

impl FromIterator<(String, Value)> for Message {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
