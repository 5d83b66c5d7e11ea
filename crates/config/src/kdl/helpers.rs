//! Typed accessors for KDL nodes.
//!
//! Values live either as the first argument of a named child node
//! (`timeout-ms 60000`) or as properties (`name="shop.example.com"`).

use anyhow::{anyhow, Result};
use ::kdl::{KdlNode, KdlValue};

/// First positional argument of a node
pub fn get_first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|entry| entry.name().is_none())
        .map(|entry| entry.value())
}

/// First positional argument of a node, as a string
pub fn get_first_arg_string(node: &KdlNode) -> Option<String> {
    get_first_arg(node)
        .and_then(|value| value.as_string())
        .map(str::to_string)
}

/// Named property of a node, as a string
pub fn get_prop_string(node: &KdlNode, key: &str) -> Option<String> {
    node.entries()
        .iter()
        .find(|entry| entry.name().map(|name| name.value()) == Some(key))
        .and_then(|entry| entry.value().as_string())
        .map(str::to_string)
}

/// Child node by name
pub fn child<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlNode> {
    node.children()?
        .nodes()
        .iter()
        .find(|child| child.name().value() == name)
}

/// String value of a child entry (`email "ops@example.com"`)
pub fn get_string_entry(node: &KdlNode, name: &str) -> Result<Option<String>> {
    let Some(value) = child(node, name).and_then(get_first_arg) else {
        return Ok(None);
    };
    value
        .as_string()
        .map(|s| Some(s.to_string()))
        .ok_or_else(|| anyhow!("'{name}' in '{}' must be a string", node.name().value()))
}

/// Integer value of a child entry (`max-concurrent 3`)
pub fn get_int_entry(node: &KdlNode, name: &str) -> Result<Option<i128>> {
    let Some(value) = child(node, name).and_then(get_first_arg) else {
        return Ok(None);
    };
    value
        .as_integer()
        .map(Some)
        .ok_or_else(|| anyhow!("'{name}' in '{}' must be an integer", node.name().value()))
}

/// Non-negative integer entry converted to the target type
pub fn get_uint_entry<T: TryFrom<i128>>(node: &KdlNode, name: &str) -> Result<Option<T>> {
    match get_int_entry(node, name)? {
        Some(raw) => T::try_from(raw).map(Some).map_err(|_| {
            anyhow!(
                "'{name}' in '{}' is out of range: {raw}",
                node.name().value()
            )
        }),
        None => Ok(None),
    }
}

/// Boolean value of a child entry (`staging #true`)
pub fn get_bool_entry(node: &KdlNode, name: &str) -> Result<Option<bool>> {
    let Some(value) = child(node, name).and_then(get_first_arg) else {
        return Ok(None);
    };
    value
        .as_bool()
        .map(Some)
        .ok_or_else(|| anyhow!("'{name}' in '{}' must be a boolean", node.name().value()))
}
