//! Byte codec for envelopes.
//!
//! Envelopes are encoded as named `MsgPack` (`rmp_serde::to_vec_named`) so
//! field names survive on the wire and decoding tolerates missing optionals.

use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode envelope: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encodes a request or response envelope to bytes.
///
/// # Errors
///
/// Returns `CodecError::Encode` if a payload value cannot be represented.
pub fn encode<T: Serialize>(envelope: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(envelope)?)
}

/// Decodes an envelope previously produced by [`encode`].
///
/// # Errors
///
/// Returns `CodecError::Decode` for truncated or mistyped input.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::messages::{Request, Response, ResponseType, WorkerError};

    #[test]
    fn error_response_survives_encoding() {
        let original = Response::error(
            "op-9",
            WorkerError::new("bad gateway")
                .with_code("HTTP_502")
                .with_stack_trace("at fetch"),
        );
        let bytes = encode(&original).unwrap();
        let decoded: Response = decode(&bytes).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn nested_request_payload_survives_encoding() {
        let original = Request::new(
            "op-1",
            "background",
            "executeTask",
            json!({"items": [1, 2, 3], "options": {"parallel": true, "label": null}}),
        );
        let decoded: Request = decode(&encode(&original).unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn garbage_input_is_a_decode_error() {
        let err = decode::<Response>(&[0xc1, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    proptest! {
        #[test]
        fn arbitrary_progress_values_keep_their_tag(id in "[a-z0-9-]{1,24}", pct in 0u8..=100) {
            let decoded: Response = decode(&encode(&Response::progress(id.clone(), pct)).unwrap()).unwrap();
            prop_assert_eq!(decoded.kind, ResponseType::Progress);
            prop_assert_eq!(decoded.id, id);
            prop_assert_eq!(decoded.data.as_u64(), Some(u64::from(pct)));
        }
    }
}
