use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::Cause;

/// Parses a successful response body into a JSON document.
pub trait Decoder: Send + Sync {
    fn decode(&self, body: &[u8]) -> Result<serde_json::Value, Cause>;
}

/// Default [`Decoder`] using `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn decode(&self, body: &[u8]) -> Result<serde_json::Value, Cause> {
        serde_json::from_slice(body).map_err(|err| Arc::new(err) as Cause)
    }
}

/// Decodes `body` with `decoder` and maps the document onto `T`.
pub(crate) fn decode_into<T: DeserializeOwned>(
    decoder: &dyn Decoder,
    body: &[u8],
) -> Result<T, Cause> {
    let value = decoder.decode(body)?;
    serde_json::from_value(value).map_err(|err| Arc::new(err) as Cause)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        key: String,
    }

    #[test]
    fn decodes_into_struct() {
        let item: Item = decode_into(&JsonDecoder, br#"{"key":"value"}"#).expect("must decode");
        assert_eq!(item, Item { key: "value".to_owned() });
    }

    #[test]
    fn empty_body_is_a_decode_error() {
        let err = decode_into::<Item>(&JsonDecoder, b"").expect_err("empty body must fail");
        assert!(err.to_string().contains("EOF"));
    }

    #[test]
    fn shape_mismatch_is_a_decode_error() {
        let err = decode_into::<Item>(&JsonDecoder, br#"{"other":1}"#).expect_err("must fail");
        assert!(err.to_string().contains("missing field `key`"));
    }
}
