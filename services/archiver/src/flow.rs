use serde::{Deserialize, Serialize};

/// Flow record as emitted by the capture agent
///
/// Only the network layer endpoints are inspected by the classifier; the
/// remaining fields are carried through to the archive untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Flow {
    /// Flow identifier assigned by the capture agent
    #[serde(rename = "UUID", default)]
    pub uuid: String,
    /// Decoded layer path, e.g. `Ethernet/IPv4/TCP`
    #[serde(default)]
    pub layers_path: String,
    /// Network layer (IP endpoints)
    #[serde(default)]
    pub network: Option<FlowLayer>,
    /// Transport layer (ports)
    #[serde(default)]
    pub transport: Option<FlowLayer>,
    /// First packet timestamp, epoch milliseconds
    #[serde(default)]
    pub start: i64,
    /// Last packet timestamp, epoch milliseconds
    #[serde(default)]
    pub last: i64,
}

/// A single layer of a flow with its two endpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FlowLayer {
    #[serde(default)]
    pub protocol: String,
    /// Endpoint A (initiator side)
    #[serde(default)]
    pub a: String,
    /// Endpoint B
    #[serde(default)]
    pub b: String,
    #[serde(rename = "ID", default)]
    pub id: i64,
}

#[cfg(test)]
impl Flow {
    /// Create a flow with only a network layer between `a` and `b`
    pub(crate) fn between(uuid: impl Into<String>, a: impl Into<String>, b: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            layers_path: "IPv4".to_string(),
            network: Some(FlowLayer {
                protocol: "IPV4".to_string(),
                a: a.into(),
                b: b.into(),
                id: 0,
            }),
            ..Default::default()
        }
    }
}
