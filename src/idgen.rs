//! Generated identifiers: snowflake, ULID, UUID v4/v7, and the timestamp
//! literal used wherever a `{{now}}` template is evaluated.

use crate::error::{AppError, ConfigError};
use chrono::Utc;
use std::sync::{Mutex, OnceLock};

const SNOWFLAKE_EPOCH_MS: i64 = 1_288_834_974_657;
const NODE_BITS: u8 = 10;
const SEQ_BITS: u8 = 12;
const MAX_NODE: i64 = (1 << NODE_BITS) - 1;
const SEQ_MASK: i64 = (1 << SEQ_BITS) - 1;

struct SnowflakeNode {
    node_id: i64,
    state: Mutex<(i64, i64)>,
}

static GLOBAL_NODE: OnceLock<SnowflakeNode> = OnceLock::new();

/// Install the process-wide snowflake node. Called once at startup; a second
/// call with a different node id is ignored.
pub fn init_snowflake(node_id: i64) -> Result<(), ConfigError> {
    if !(0..=MAX_NODE).contains(&node_id) {
        return Err(ConfigError::SnowflakeNode(node_id));
    }
    let _ = GLOBAL_NODE.set(SnowflakeNode {
        node_id,
        state: Mutex::new((0, 0)),
    });
    Ok(())
}

pub fn snowflake_id() -> Result<String, AppError> {
    let node = GLOBAL_NODE
        .get()
        .ok_or_else(|| AppError::Backend("snowflake node not initialized".into()))?;
    let mut state = node
        .state
        .lock()
        .map_err(|_| AppError::Backend("snowflake state poisoned".into()))?;
    let mut now = Utc::now().timestamp_millis();
    let (last, seq) = *state;
    let seq = if now == last {
        let next = (seq + 1) & SEQ_MASK;
        if next == 0 {
            // sequence exhausted within this millisecond
            while now <= last {
                now = Utc::now().timestamp_millis();
            }
        }
        next
    } else {
        0
    };
    *state = (now, seq);
    let id = ((now - SNOWFLAKE_EPOCH_MS) << (NODE_BITS + SEQ_BITS)) | (node.node_id << SEQ_BITS) | seq;
    Ok(id.to_string())
}

pub fn ulid_id() -> String {
    ulid::Ulid::new().to_string()
}

pub fn uuid_v4() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn uuid_v7() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Current UTC time as the literal every backend accepts in a
/// timestamp/datetime position.
pub fn now_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn snowflake_ids_are_unique_and_increasing() {
        init_snowflake(1).unwrap();
        let mut seen = HashSet::new();
        let mut prev: i64 = 0;
        for _ in 0..4096 {
            let id: i64 = snowflake_id().unwrap().parse().unwrap();
            assert!(id > 0);
            assert!(id >= prev);
            assert!(seen.insert(id));
            prev = id;
        }
    }

    #[test]
    fn snowflake_rejects_out_of_range_node() {
        assert!(init_snowflake(1024).is_err());
        assert!(init_snowflake(-1).is_err());
    }

    #[test]
    fn uuid_v4_shape() {
        let id = uuid_v4();
        assert_eq!(id.len(), 36);
        assert_eq!(&id[14..15], "4");
    }

    #[test]
    fn uuid_v7_is_parseable() {
        assert!(uuid::Uuid::parse_str(&uuid_v7()).is_ok());
    }

    #[test]
    fn ulid_is_26_chars() {
        assert_eq!(ulid_id().len(), 26);
    }

    #[test]
    fn now_timestamp_has_micros() {
        let ts = now_timestamp();
        assert_eq!(ts.len(), "2026-01-01 00:00:00.000000".len());
        assert!(ts.contains(' '));
    }
}
