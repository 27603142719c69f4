use crate::dehydrator::error::Error;

/// Store key layout for one named dehydrator.
#[derive(Clone, Debug)]
pub struct Keys {
    name: String
}

impl Keys {
    pub fn new(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidArgument("dehydrator name is empty".to_string()));
        }
        // The name is embedded in KEYS patterns and must not widen them.
        if name.contains([':', '*', '?', '[', ']', '\\']) {
            return Err(Error::InvalidArgument(format!("dehydrator name {name:?} contains a reserved character")));
        }

        Ok(Self { name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// id -> duration in milliseconds
    pub fn durations(&self) -> String {
        format!("{}:durations", self.name)
    }

    /// id -> payload
    pub fn payloads(&self) -> String {
        format!("{}:payloads", self.name)
    }

    /// id -> absolute deadline, unix milliseconds
    pub fn deadlines(&self) -> String {
        format!("{}:deadlines", self.name)
    }

    pub fn bucket(&self, duration_ms: u64) -> String {
        format!("{}:bucket:{}", self.name, duration_ms)
    }

    pub fn buckets(&self) -> String {
        format!("{}:bucket:*", self.name)
    }

    pub fn dehydrating(&self, id: &str) -> String {
        format!("{}:dehydrating:{}", self.name, id)
    }

    pub fn all(&self) -> String {
        format!("{}:*", self.name)
    }
}
