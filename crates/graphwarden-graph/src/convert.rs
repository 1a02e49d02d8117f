//! Value conversion between JSON (the backend-neutral shape) and Bolt.

use std::collections::HashSet;

use neo4rs::{BoltBoolean, BoltFloat, BoltInteger, BoltList, BoltMap, BoltNull, BoltString, BoltType};
use serde_json::Value;

/// Convert a JSON parameter value to its Bolt equivalent.
pub fn json_to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::Boolean(BoltBoolean::new(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => BoltType::Integer(BoltInteger::new(i)),
            None => BoltType::Float(BoltFloat::new(n.as_f64().unwrap_or_default())),
        },
        Value::String(s) => BoltType::String(BoltString::new(s)),
        Value::Array(items) => {
            let mut list = BoltList::new();
            for item in items {
                list.push(json_to_bolt(item));
            }
            BoltType::List(list)
        }
        Value::Object(map) => {
            let mut bolt = BoltMap::new();
            for (key, item) in map {
                bolt.put(BoltString::new(key), json_to_bolt(item));
            }
            BoltType::Map(bolt)
        }
    }
}

/// Convert a Bolt result value to JSON.
///
/// Nodes and relationships become their property maps, which is the
/// shape state snapshots are compared in.
pub fn bolt_to_json(value: &BoltType) -> Value {
    match value {
        BoltType::Null(_) => Value::Null,
        BoltType::Boolean(b) => Value::Bool(b.value),
        BoltType::Integer(i) => Value::from(i.value),
        BoltType::Float(f) => serde_json::Number::from_f64(f.value)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        BoltType::String(s) => Value::String(s.value.clone()),
        BoltType::List(list) => Value::Array(list.value.iter().map(bolt_to_json).collect()),
        BoltType::Map(map) => map_to_json(map),
        BoltType::Node(node) => map_to_json(&node.properties),
        BoltType::Relation(rel) => map_to_json(&rel.properties),
        BoltType::UnboundedRelation(rel) => map_to_json(&rel.properties),
        other => Value::String(format!("{other:?}")),
    }
}

fn map_to_json(map: &BoltMap) -> Value {
    let mut out = serde_json::Map::new();
    for (key, value) in &map.value {
        out.insert(key.value.clone(), bolt_to_json(value));
    }
    Value::Object(out)
}

/// Counts distinct nodes and relationships seen across result values.
#[derive(Debug, Default)]
pub struct EntityTally {
    nodes: HashSet<i64>,
    relationships: HashSet<i64>,
}

impl EntityTally {
    pub fn observe(&mut self, value: &BoltType) {
        match value {
            BoltType::Node(node) => {
                self.nodes.insert(node.id.value);
            }
            BoltType::Relation(rel) => {
                self.relationships.insert(rel.id.value);
            }
            BoltType::UnboundedRelation(rel) => {
                self.relationships.insert(rel.id.value);
            }
            BoltType::List(list) => {
                for item in &list.value {
                    self.observe(item);
                }
            }
            BoltType::Map(map) => {
                for item in map.value.values() {
                    self.observe(item);
                }
            }
            _ => {}
        }
    }

    pub fn nodes(&self) -> u64 {
        self.nodes.len() as u64
    }

    pub fn relationships(&self) -> u64 {
        self.relationships.len() as u64
    }
}
