//! Foundry artifacts and init code construction.

use std::path::Path;

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier},
    json_abi::JsonAbi,
    primitives::Bytes,
};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DeployError;

/// The `bytecode` section of a Foundry artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BytecodeObject {
    pub object: Bytes,
}

/// The subset of a Foundry build artifact (`out/<File>.sol/<Contract>.json`) we need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForgeArtifact {
    pub abi: JsonAbi,
    pub bytecode: BytecodeObject,
}

impl ForgeArtifact {
    /// Load an artifact from a JSON file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read forge artifact {}", path.display()))?;
        let artifact: Self = serde_json::from_str(&content).with_context(|| {
            format!(
                "Failed to parse forge artifact {} (unlinked libraries are not supported)",
                path.display()
            )
        })?;
        tracing::debug!(path = %path.display(), bytecode_len = artifact.bytecode.object.len(), "Forge artifact loaded");
        Ok(artifact)
    }

    /// Build the init code: creation bytecode followed by the ABI-encoded constructor arguments.
    pub fn init_code(&self, args: &[Value]) -> Result<Bytes, DeployError> {
        let Some(constructor) = self.abi.constructor.as_ref() else {
            if !args.is_empty() {
                return Err(DeployError::invalid_input(format!(
                    "Artifact has no constructor but {} arguments were given",
                    args.len()
                )));
            }
            return Ok(self.bytecode.object.clone());
        };

        if constructor.inputs.len() != args.len() {
            return Err(DeployError::invalid_input(format!(
                "Constructor expects {} arguments, got {}",
                constructor.inputs.len(),
                args.len()
            )));
        }

        let values = constructor
            .inputs
            .iter()
            .zip(args)
            .map(|(param, arg)| {
                let ty = param.resolve().map_err(|e| {
                    DeployError::invalid_input(format!("Unsupported constructor parameter '{}': {}", param.name, e))
                })?;
                json_to_sol_value(&ty, arg).map_err(|e| {
                    DeployError::invalid_input(format!(
                        "Cannot encode {} as {} for parameter '{}': {}",
                        arg,
                        ty.sol_type_name(),
                        param.name,
                        e
                    ))
                })
            })
            .collect::<Result<Vec<DynSolValue>, DeployError>>()?;

        let encoded = constructor
            .abi_encode_input(&values)
            .map_err(|e| DeployError::invalid_input(format!("Failed to encode constructor arguments: {e}")))?;

        let mut init_code = self.bytecode.object.to_vec();
        init_code.extend_from_slice(&encoded);
        Ok(init_code.into())
    }
}

/// Convert a JSON argument into a value of type `ty`.
///
/// Strings meant as `string` are taken verbatim. Arrays and tuples are walked
/// element by element, and only the remaining scalars go through
/// [`DynSolType::coerce_str`].
fn json_to_sol_value(ty: &DynSolType, arg: &Value) -> Result<DynSolValue, String> {
    match (ty, arg) {
        (DynSolType::String, Value::String(s)) => Ok(DynSolValue::String(s.clone())),
        (DynSolType::Array(inner), Value::Array(items)) => Ok(DynSolValue::Array(
            items
                .iter()
                .map(|item| json_to_sol_value(inner, item))
                .collect::<Result<_, _>>()?,
        )),
        (DynSolType::FixedArray(inner, len), Value::Array(items)) => {
            if items.len() != *len {
                return Err(format!("expected {len} elements, got {}", items.len()));
            }
            Ok(DynSolValue::FixedArray(
                items
                    .iter()
                    .map(|item| json_to_sol_value(inner, item))
                    .collect::<Result<_, _>>()?,
            ))
        }
        (DynSolType::Tuple(types), Value::Array(items)) => {
            if items.len() != types.len() {
                return Err(format!("expected {} tuple fields, got {}", types.len(), items.len()));
            }
            Ok(DynSolValue::Tuple(
                types
                    .iter()
                    .zip(items)
                    .map(|(ty, item)| json_to_sol_value(ty, item))
                    .collect::<Result<_, _>>()?,
            ))
        }
        (_, Value::String(s)) => ty.coerce_str(s).map_err(|e| e.to_string()),
        (_, Value::Number(n)) => ty.coerce_str(&n.to_string()).map_err(|e| e.to_string()),
        (_, Value::Bool(b)) => ty.coerce_str(&b.to_string()).map_err(|e| e.to_string()),
        (_, Value::Array(_)) => Err("unexpected array".to_string()),
        (_, Value::Null | Value::Object(_)) => Err("unsupported argument".to_string()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloy_core::primitives::{U256, address};
    use serde_json::json;

    /// Creation code that returns an empty runtime, with a `constructor(string,uint256)` ABI.
    pub(crate) fn greeter_artifact() -> ForgeArtifact {
        serde_json::from_value(json!({
            "abi": [{
                "type": "constructor",
                "inputs": [
                    {"name": "greeting", "type": "string", "internalType": "string"},
                    {"name": "count", "type": "uint256", "internalType": "uint256"}
                ],
                "stateMutability": "nonpayable"
            }],
            "bytecode": {"object": "0x6080604052348015600f57600080fd5b50", "sourceMap": "", "linkReferences": {}}
        }))
        .unwrap()
    }

    /// Same bytecode, with a `constructor(address)` ABI.
    pub(crate) fn vault_artifact() -> ForgeArtifact {
        serde_json::from_value(json!({
            "abi": [{
                "type": "constructor",
                "inputs": [{"name": "token", "type": "address", "internalType": "address"}],
                "stateMutability": "nonpayable"
            }],
            "bytecode": {"object": "0x6080604052348015600f57600080fd5b5060aa"}
        }))
        .unwrap()
    }

    #[test]
    fn test_init_code_appends_encoded_args() {
        let artifact = greeter_artifact();
        let init_code = artifact.init_code(&[json!("hello"), json!(42)]).unwrap();

        let bytecode_len = artifact.bytecode.object.len();
        assert_eq!(&init_code[..bytecode_len], artifact.bytecode.object.as_ref());

        let expected = DynSolValue::Tuple(vec![
            DynSolValue::String("hello".to_string()),
            DynSolValue::Uint(U256::from(42), 256),
        ])
        .abi_encode_params();
        assert_eq!(&init_code[bytecode_len..], expected.as_slice());
    }

    #[test]
    fn test_init_code_address_arg() {
        let artifact = vault_artifact();
        let token = address!("0x70997970C51812dc3A010C7d01b50e0d17dc79C8");
        let init_code = artifact.init_code(&[json!(token.to_string())]).unwrap();
        let bytecode_len = artifact.bytecode.object.len();
        assert_eq!(&init_code[bytecode_len..], token.into_word().as_slice());
    }

    #[test]
    fn test_string_args_are_encoded_verbatim() {
        let artifact = greeter_artifact();
        let bytecode_len = artifact.bytecode.object.len();

        for greeting in ["  padded  ", "\"quoted\"", "[1,2]", ""] {
            let init_code = artifact.init_code(&[json!(greeting), json!(1)]).unwrap();
            let expected = DynSolValue::Tuple(vec![
                DynSolValue::String(greeting.to_string()),
                DynSolValue::Uint(U256::from(1), 256),
            ])
            .abi_encode_params();
            assert_eq!(&init_code[bytecode_len..], expected.as_slice(), "{greeting:?}");
        }
    }

    #[test]
    fn test_nested_string_array_is_verbatim() {
        let artifact: ForgeArtifact = serde_json::from_value(json!({
            "abi": [{
                "type": "constructor",
                "inputs": [
                    {"name": "names", "type": "string[]", "internalType": "string[]"},
                    {"name": "limits", "type": "uint8[2]", "internalType": "uint8[2]"}
                ],
                "stateMutability": "nonpayable"
            }],
            "bytecode": {"object": "0x6080"}
        }))
        .unwrap();

        let init_code = artifact
            .init_code(&[json!([" a ", "\"b\""]), json!([1, "2"])])
            .unwrap();
        let expected = DynSolValue::Tuple(vec![
            DynSolValue::Array(vec![
                DynSolValue::String(" a ".to_string()),
                DynSolValue::String("\"b\"".to_string()),
            ]),
            DynSolValue::FixedArray(vec![
                DynSolValue::Uint(U256::from(1), 8),
                DynSolValue::Uint(U256::from(2), 8),
            ]),
        ])
        .abi_encode_params();
        assert_eq!(&init_code[2..], expected.as_slice());

        assert!(artifact.init_code(&[json!(["a"]), json!([1, 2, 3])]).is_err());
    }

    #[test]
    fn test_init_code_arity_mismatch() {
        let artifact = greeter_artifact();
        assert!(matches!(
            artifact.init_code(&[json!("hello")]),
            Err(DeployError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_init_code_type_mismatch() {
        let artifact = vault_artifact();
        assert!(artifact.init_code(&[json!("not-an-address")]).is_err());
        assert!(artifact.init_code(&[json!({"a": 1})]).is_err());
    }

    #[test]
    fn test_init_code_without_constructor() {
        let artifact: ForgeArtifact = serde_json::from_value(json!({
            "abi": [],
            "bytecode": {"object": "0x6080"}
        }))
        .unwrap();
        assert_eq!(artifact.init_code(&[]).unwrap().as_ref(), &[0x60, 0x80]);
        assert!(artifact.init_code(&[json!(1)]).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir::TempDir::new("manydeploy-artifact").unwrap();
        let path = dir.path().join("Greeter.json");
        std::fs::write(&path, serde_json::to_string(&greeter_artifact()).unwrap()).unwrap();

        let loaded = ForgeArtifact::load_from_file(&path).unwrap();
        assert_eq!(loaded, greeter_artifact());

        assert!(ForgeArtifact::load_from_file(&dir.path().join("missing.json")).is_err());
    }
}
