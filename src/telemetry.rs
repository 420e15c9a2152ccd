// Locating a 3-axis vector inside an arbitrarily shaped telemetry payload.
//
// Telemetry producers are heterogeneous and not under our control, so
// nothing here assumes a schema: the operator can give an explicit dotted
// path, and otherwise a bounded breadth-first search recovers a plausible
// vector from the decoded JSON tree.

use std::collections::VecDeque;

use serde_json::Value;

/// Field names probed before falling back to the tree search.
pub const AUTODETECT_CANDIDATES: [&str; 4] = ["gyro", "gyr", "angular_velocity", "angularVelocity"];

/// Key triples accepted as a vector when all three values are numeric,
/// tried in this order.
const AXIS_TRIPLES: [[&str; 3]; 3] = [["x", "y", "z"], ["gx", "gy", "gz"], ["wx", "wy", "wz"]];

/// Upper bound on nodes visited by the breadth-first search. Substitutes
/// for an identity-based cycle guard; decoded JSON cannot alias, but the
/// budget also keeps pathological payloads cheap.
const NODE_BUDGET: usize = 500;

/// Only the leading elements of a sequence are searched.
const SEQ_SCAN_LIMIT: usize = 10;

/// Path reported when the payload root itself is the vector.
pub const ROOT_PATH: &str = "<root>";

pub type Vec3 = (f64, f64, f64);

/// Resolve a dotted path: object segments by key, array segments by
/// non-negative index. The empty path resolves to the root. Never panics.
pub fn value_at<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Read a vector out of one node: a mapping carrying one of the axis key
/// triples, or a sequence whose first three elements are numeric.
fn vec3_of(node: &Value) -> Option<Vec3> {
    match node {
        Value::Object(map) => {
            for [kx, ky, kz] in AXIS_TRIPLES {
                let x = map.get(kx).and_then(Value::as_f64);
                let y = map.get(ky).and_then(Value::as_f64);
                let z = map.get(kz).and_then(Value::as_f64);
                if let (Some(x), Some(y), Some(z)) = (x, y, z) {
                    return Some((x, y, z));
                }
            }
            None
        }
        Value::Array(items) if items.len() >= 3 => {
            let x = items[0].as_f64()?;
            let y = items[1].as_f64()?;
            let z = items[2].as_f64()?;
            Some((x, y, z))
        }
        _ => None,
    }
}

/// Extract a vector at an explicit dotted path, or None.
pub fn extract_vec3(payload: &Value, path: &str) -> Option<Vec3> {
    vec3_of(value_at(payload, path)?)
}

fn join_path(base: &str, segment: &str) -> String {
    if base.is_empty() {
        segment.to_string()
    } else {
        format!("{base}.{segment}")
    }
}

/// Locate a vector without an explicit path: probe the common field names
/// first, then breadth-first over the tree in insertion order, visiting at
/// most `NODE_BUDGET` nodes and the first `SEQ_SCAN_LIMIT` elements of any
/// sequence. Returns the matched path alongside the vector.
pub fn autodetect_vec3(payload: &Value) -> Option<(String, Vec3)> {
    for path in AUTODETECT_CANDIDATES {
        if let Some(vec) = extract_vec3(payload, path) {
            return Some((path.to_string(), vec));
        }
    }

    let mut queue: VecDeque<(String, &Value)> = VecDeque::new();
    queue.push_back((String::new(), payload));
    let mut budget = NODE_BUDGET;

    while let Some((path, node)) = queue.pop_front() {
        if budget == 0 {
            break;
        }
        budget -= 1;

        if let Some(vec) = vec3_of(node) {
            let path = if path.is_empty() { ROOT_PATH.to_string() } else { path };
            return Some((path, vec));
        }

        match node {
            Value::Object(map) => {
                for (key, child) in map {
                    queue.push_back((join_path(&path, key), child));
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter().take(SEQ_SCAN_LIMIT).enumerate() {
                    queue.push_back((join_path(&path, &index.to_string()), child));
                }
            }
            _ => {}
        }
    }

    None
}
