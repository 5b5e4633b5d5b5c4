/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Key and value serialization.
//!
//! The defaults are [`Utf8`] for string keys and [`Json`] for values. An absent
//! key or value stays absent on the wire.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::SerializationError;

pub trait Serializer<T>: Send + Sync {
    fn serialize(&self, value: Option<&T>) -> Result<Option<Vec<u8>>, SerializationError>;
}

pub trait Deserializer<T>: Send + Sync {
    fn deserialize(&self, bytes: Option<&[u8]>) -> Result<Option<T>, SerializationError>;
}

/// UTF-8 string encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8;

impl Serializer<String> for Utf8 {
    fn serialize(&self, value: Option<&String>) -> Result<Option<Vec<u8>>, SerializationError> {
        Ok(value.map(|s| s.as_bytes().to_vec()))
    }
}

impl Deserializer<String> for Utf8 {
    fn deserialize(&self, bytes: Option<&[u8]>) -> Result<Option<String>, SerializationError> {
        bytes
            .map(|b| String::from_utf8(b.to_vec()))
            .transpose()
            .map_err(SerializationError::from)
    }
}

/// JSON encoding via serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json;

impl<T: Serialize + Sync> Serializer<T> for Json {
    fn serialize(&self, value: Option<&T>) -> Result<Option<Vec<u8>>, SerializationError> {
        value
            .map(serde_json::to_vec)
            .transpose()
            .map_err(SerializationError::from)
    }
}

impl<T: DeserializeOwned> Deserializer<T> for Json {
    fn deserialize(&self, bytes: Option<&[u8]>) -> Result<Option<T>, SerializationError> {
        bytes
            .map(serde_json::from_slice)
            .transpose()
            .map_err(SerializationError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Reading {
        id: i64,
        value: i32,
    }

    #[test]
    fn test_absent_values_stay_absent() {
        assert_eq!(Serializer::<String>::serialize(&Utf8, None).unwrap(), None);
        assert_eq!(Serializer::<Reading>::serialize(&Json, None).unwrap(), None);
        assert_eq!(Deserializer::<Reading>::deserialize(&Json, None).unwrap(), None);
    }

    #[test]
    fn test_json_value_encoding() {
        let reading = Reading { id: 1, value: 42 };
        let bytes = Json.serialize(Some(&reading)).unwrap().unwrap();
        assert_eq!(bytes, br#"{"id":1,"value":42}"#.to_vec());
        let back: Option<Reading> = Json.deserialize(Some(bytes.as_slice())).unwrap();
        assert_eq!(back, Some(reading));
    }

    #[test]
    fn test_invalid_payloads_are_errors() {
        let err = Deserializer::<String>::deserialize(&Utf8, Some(&[0xffu8, 0xfe][..])).unwrap_err();
        assert!(matches!(err, SerializationError::Utf8(_)));
        let err = Deserializer::<Reading>::deserialize(&Json, Some(&b"not json"[..])).unwrap_err();
        assert!(matches!(err, SerializationError::Json(_)));
    }
}
