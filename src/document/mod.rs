//! Metric documents
//!
//! A [`Document`] is the unit aggregated by a stash: a [`Tag`] naming the
//! aggregation bucket and a [`Meter`] whose fields merge associatively.
//!
//! Documents leave the pipeline as JSON objects:
//!
//! ```text
//! {"timestamp":1700000040,"tag":{"l3_epc_id_0":1,"protocol":6},"meter":{"packet_tx":3}}
//! ```

mod meter;
mod tag;

pub use meter::{MergeRule, Meter, MeterField};
pub use tag::{Tag, TagValue};

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    /// Seconds since the UNIX epoch
    pub timestamp: u32,
    pub tag: Tag,
    pub meter: Meter,
}

impl Document {
    pub fn new(timestamp: u32, tag: Tag, meter: Meter) -> Self {
        Document {
            timestamp,
            tag,
            meter,
        }
    }

    /// Encode as one JSON object
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_shape() {
        let doc = Document::new(
            1_700_000_040,
            Tag::new()
                .with("l3_epc_id_0", -1)
                .with("protocol", 6u8)
                .with("app", "dns"),
            Meter::new().sum("packet_tx", 3).max("max_packet_len", 1500),
        );

        let value: serde_json::Value = serde_json::from_str(&doc.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "timestamp": 1_700_000_040u32,
                "tag": {"l3_epc_id_0": -1, "protocol": 6, "app": "dns"},
                "meter": {"packet_tx": 3, "max_packet_len": 1500},
            })
        );
    }

    #[test]
    fn test_json_keeps_field_order() {
        let doc = Document::new(
            60,
            Tag::new().with("b", 1u32).with("a", 2u32),
            Meter::new().sum("y", 1).sum("x", 2),
        );
        assert_eq!(
            doc.to_json().unwrap(),
            r#"{"timestamp":60,"tag":{"b":1,"a":2},"meter":{"y":1,"x":2}}"#
        );
    }
}
