use crate::dehydrator::error::Error;

/// Conversion between a caller's element type and the opaque bytes
/// kept in the store.
pub trait Payload: Sized {
    fn encode(&self) -> Result<Vec<u8>, Error>;
    fn decode(bytes: &[u8]) -> Option<Self>;
}

impl Payload for Vec<u8> {
    fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(self.clone())
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        Some(bytes.to_vec())
    }
}

impl Payload for String {
    fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(self.as_bytes().to_vec())
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        String::from_utf8(bytes.to_vec()).ok()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Json<T>(pub T);

impl<T: serde::de::DeserializeOwned + serde::Serialize> Payload for Json<T> {
    fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok().map(Json)
    }
}
