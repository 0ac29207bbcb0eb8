// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Byte encoding of the flattened profile tree shipped between instances and
//! the coordinator.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::runtime_profile::TRuntimeProfileTree;

pub fn json_serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, String> {
    serde_json::to_vec(value).map_err(|e| e.to_string())
}

pub fn json_deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, String> {
    serde_json::from_slice(bytes).map_err(|e| e.to_string())
}

pub fn serialize_profile_tree(tree: &TRuntimeProfileTree) -> Result<Vec<u8>, String> {
    json_serialize(tree)
}

/// Decodes a tree and checks that the declared child counts cover the node list exactly.
pub fn deserialize_profile_tree(bytes: &[u8]) -> Result<TRuntimeProfileTree, String> {
    let tree: TRuntimeProfileTree = json_deserialize(bytes)?;
    validate_tree_shape(&tree)?;
    Ok(tree)
}

fn validate_tree_shape(tree: &TRuntimeProfileTree) -> Result<(), String> {
    if tree.nodes.is_empty() {
        return Err("profile tree has no nodes".to_string());
    }
    let mut remaining = 1i64;
    for (idx, node) in tree.nodes.iter().enumerate() {
        if remaining == 0 {
            return Err(format!(
                "profile tree has {} nodes outside the root subtree",
                tree.nodes.len() - idx
            ));
        }
        if node.num_children < 0 {
            return Err(format!(
                "profile node {} has negative child count {}",
                node.name, node.num_children
            ));
        }
        remaining = remaining - 1 + i64::from(node.num_children);
    }
    if remaining != 0 {
        return Err(format!(
            "profile tree truncated: {remaining} declared nodes missing"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::TUnit;
    use crate::runtime_profile::{TCounter, TRuntimeProfileNode};
    use std::collections::BTreeMap;

    fn leaf(name: &str, num_children: i32) -> TRuntimeProfileNode {
        TRuntimeProfileNode::new(
            name,
            num_children,
            vec![TCounter::new("Rows", TUnit::UNIT, 3, None, None, None)],
            0,
            true,
            BTreeMap::new(),
            Vec::new(),
            BTreeMap::new(),
            None,
        )
    }

    #[test]
    fn encoded_tree_decodes_to_same_nodes() {
        let tree = TRuntimeProfileTree::new(vec![leaf("root", 1), leaf("child", 0)]);
        let bytes = serialize_profile_tree(&tree).expect("encode");
        let decoded = deserialize_profile_tree(&bytes).expect("decode");
        assert_eq!(decoded, tree);
    }

    #[test]
    fn unit_is_encoded_by_name() {
        let bytes = json_serialize(&TCounter::new("t", TUnit::TIME_NS, 1, None, None, None))
            .expect("encode");
        let text = String::from_utf8(bytes).expect("utf8");
        assert!(text.contains("\"type\":\"TIME_NS\""), "{text}");
    }

    #[test]
    fn truncated_tree_is_rejected() {
        let tree = TRuntimeProfileTree::new(vec![leaf("root", 2), leaf("child", 0)]);
        let bytes = serialize_profile_tree(&tree).expect("encode");
        let err = deserialize_profile_tree(&bytes).unwrap_err();
        assert!(err.contains("truncated"), "{err}");
    }

    #[test]
    fn trailing_nodes_are_rejected() {
        let tree = TRuntimeProfileTree::new(vec![leaf("root", 0), leaf("stray", 0)]);
        let bytes = serialize_profile_tree(&tree).expect("encode");
        assert!(deserialize_profile_tree(&bytes).is_err());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(deserialize_profile_tree(b"not json").is_err());
    }
}
