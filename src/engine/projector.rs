// src/engine/projector.rs

//! Decodes the output node's result into the caller's type.

use std::any::{Any, type_name};

use serde::de::DeserializeOwned;

use crate::dag::{NodeOutput, NodeResult};
use crate::errors::{LevelflowError, Result};

/// Explicit decoding per [`NodeOutput`] tag:
///
/// | output    | result                                                  |
/// |-----------|---------------------------------------------------------|
/// | error set | `OutputNodeFailed`, whatever the error strategy          |
/// | `Empty`   | `MissingOutput`                                         |
/// | `Typed`   | downcast to `T`, else `OutputTypeMismatch`              |
/// | `Json`    | as-is when `T` is `serde_json::Value`, else deserialize |
/// | `Text`    | as-is when `T` is `String`, else parsed as JSON         |
pub struct ResultProjector;

impl ResultProjector {
    pub fn project<T>(node: &str, result: Option<&NodeResult>) -> Result<T>
    where
        T: DeserializeOwned + Clone + Any,
    {
        let Some(result) = result else {
            return Err(LevelflowError::MissingOutput {
                node: node.to_string(),
            });
        };

        if let Some(err) = &result.error {
            return Err(LevelflowError::OutputNodeFailed {
                node: node.to_string(),
                source: err.clone(),
            });
        }

        match &result.output {
            NodeOutput::Empty => Err(LevelflowError::MissingOutput {
                node: node.to_string(),
            }),
            NodeOutput::Typed {
                value,
                type_name: actual,
            } => value.downcast_ref::<T>().cloned().ok_or_else(|| {
                LevelflowError::OutputTypeMismatch {
                    node: node.to_string(),
                    expected: type_name::<T>(),
                    actual: actual.to_string(),
                }
            }),
            NodeOutput::Json(value) => {
                if let Some(direct) = (value as &dyn Any).downcast_ref::<T>() {
                    return Ok(direct.clone());
                }
                serde_json::from_value(value.clone()).map_err(|source| {
                    LevelflowError::OutputDecode {
                        node: node.to_string(),
                        expected: type_name::<T>(),
                        source,
                    }
                })
            }
            NodeOutput::Text(text) => {
                if let Some(direct) = (text as &dyn Any).downcast_ref::<T>() {
                    return Ok(direct.clone());
                }
                serde_json::from_str(text).map_err(|source| LevelflowError::OutputDecode {
                    node: node.to_string(),
                    expected: type_name::<T>(),
                    source,
                })
            }
        }
    }
}
