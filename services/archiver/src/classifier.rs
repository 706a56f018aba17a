use crate::flow::Flow;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;
use tracing::warn;

/// Errors raised while building a classifier
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Cannot parse network range '{range}': {source}")]
    InvalidRange {
        range: String,
        #[source]
        source: ipnet::AddrParseError,
    },
}

/// Direction of a flow relative to the internal network ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tag {
    /// Neither endpoint is internal, or the flow could not be classified
    Other,
    /// Internal endpoint A talking to an external endpoint B
    Egress,
    /// External endpoint A talking to an internal endpoint B
    Ingress,
    /// Both endpoints are internal
    Internal,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Other => "other",
            Tag::Egress => "egress",
            Tag::Ingress => "ingress",
            Tag::Internal => "internal",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Assigns a tag to a flow
///
/// Classification is total: implementations never fail, they fall back to
/// [`Tag::Other`] when the flow cannot be interpreted.
#[cfg_attr(test, mockall::automock)]
pub trait FlowClassifier: Send + Sync {
    /// Return the tag of the given flow
    fn flow_tag(&self, flow: &Flow) -> Tag;
}

/// Tag a flow that may not be present at all
pub fn classify_optional<C>(classifier: &C, flow: Option<&Flow>) -> Tag
where
    C: FlowClassifier + ?Sized,
{
    match flow {
        Some(flow) => classifier.flow_tag(flow),
        None => Tag::Other,
    }
}

/// Classifies flows by direction using the configured internal ranges
#[derive(Debug, Clone)]
pub struct FlowDirectionClassifier {
    ranges: Vec<IpNet>,
}

impl FlowDirectionClassifier {
    /// Build a classifier from CIDR literals
    ///
    /// Fails on the first literal that does not parse; no classifier is
    /// produced from a partially valid list.
    pub fn new<I, S>(ranges: I) -> Result<Self, ClassifierError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ranges = ranges
            .into_iter()
            .map(|range| {
                let range = range.as_ref().trim();
                range
                    .parse::<IpNet>()
                    .map(|net| net.trunc())
                    .map_err(|source| ClassifierError::InvalidRange {
                        range: range.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { ranges })
    }

    /// Configured internal ranges
    pub fn ranges(&self) -> &[IpNet] {
        &self.ranges
    }

    /// Check whether an address string falls inside any internal range
    fn is_internal(&self, address: &str) -> Option<bool> {
        let ip = match address.parse::<IpAddr>() {
            Ok(ip) => ip.to_canonical(),
            Err(e) => {
                warn!(address = %address, error = %e, "Cannot parse flow endpoint address");
                return None;
            }
        };

        Some(self.ranges.iter().any(|range| range.contains(&ip)))
    }
}

impl FlowClassifier for FlowDirectionClassifier {
    fn flow_tag(&self, flow: &Flow) -> Tag {
        let Some(network) = flow.network.as_ref() else {
            return Tag::Other;
        };
        let Some(a_internal) = self.is_internal(&network.a) else {
            return Tag::Other;
        };
        let Some(b_internal) = self.is_internal(&network.b) else {
            return Tag::Other;
        };

        match (a_internal, b_internal) {
            (true, true) => Tag::Internal,
            (true, false) => Tag::Egress,
            (false, true) => Tag::Ingress,
            (false, false) => Tag::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> FlowDirectionClassifier {
        FlowDirectionClassifier::new(["10.0.0.0/8"]).unwrap()
    }

    #[test]
    fn test_decision_table() {
        let classifier = classifier();

        let cases = [
            ("10.1.2.3", "8.8.8.8", Tag::Egress),
            ("8.8.8.8", "10.1.2.3", Tag::Ingress),
            ("10.1.2.3", "10.9.9.9", Tag::Internal),
            ("8.8.8.8", "9.9.9.9", Tag::Other),
        ];

        for (a, b, expected) in cases {
            let flow = Flow::between("f", a, b);
            assert_eq!(classifier.flow_tag(&flow), expected, "{a} -> {b}");
        }
    }

    #[test]
    fn test_unparsable_a_is_other_regardless_of_b() {
        let classifier = classifier();

        for b in ["10.1.2.3", "8.8.8.8", "garbage", ""] {
            let flow = Flow::between("f", "not-an-ip", b);
            assert_eq!(classifier.flow_tag(&flow), Tag::Other);
        }
    }

    #[test]
    fn test_unparsable_b_is_other() {
        let classifier = classifier();
        let flow = Flow::between("f", "10.1.2.3", "10.0.0.999");
        assert_eq!(classifier.flow_tag(&flow), Tag::Other);
    }

    #[test]
    fn test_missing_network_layer() {
        let classifier = classifier();

        let mut flow = Flow::between("f", "10.1.2.3", "10.9.9.9");
        flow.network = None;

        assert_eq!(classifier.flow_tag(&flow), Tag::Other);
        assert_eq!(classify_optional(&classifier, None), Tag::Other);
        assert_eq!(
            classify_optional(&classifier, Some(&Flow::between("f", "10.1.2.3", "10.9.9.9"))),
            Tag::Internal
        );

        let shared: &dyn FlowClassifier = &classifier;
        assert_eq!(classify_optional(shared, None), Tag::Other);
    }

    #[test]
    fn test_invalid_range_fails_construction() {
        let err = FlowDirectionClassifier::new(["10.0.0.0/8", "not-a-cidr"]).unwrap_err();

        match err {
            ClassifierError::InvalidRange { range, .. } => assert_eq!(range, "not-a-cidr"),
        }
    }

    #[test]
    fn test_bare_address_is_not_a_range() {
        assert!(FlowDirectionClassifier::new(["10.0.0.1"]).is_err());
    }

    #[test]
    fn test_host_bits_are_truncated() {
        let classifier = FlowDirectionClassifier::new([" 10.1.2.3/8 "]).unwrap();
        assert_eq!(classifier.ranges()[0].to_string(), "10.0.0.0/8");
    }

    #[test]
    fn test_overlapping_ranges_any_match_wins() {
        let classifier =
            FlowDirectionClassifier::new(["192.168.0.0/16", "192.168.1.0/24", "172.16.0.0/12"])
                .unwrap();

        let flow = Flow::between("f", "192.168.1.7", "172.20.0.1");
        assert_eq!(classifier.flow_tag(&flow), Tag::Internal);
    }

    #[test]
    fn test_ipv6_and_mapped_addresses() {
        let classifier = FlowDirectionClassifier::new(["10.0.0.0/8", "fd00::/8"]).unwrap();

        let flow = Flow::between("f", "fd12::1", "2001:4860::8888");
        assert_eq!(classifier.flow_tag(&flow), Tag::Egress);

        let flow = Flow::between("f", "::ffff:10.1.2.3", "10.2.2.2");
        assert_eq!(classifier.flow_tag(&flow), Tag::Internal);
    }

    #[test]
    fn test_empty_ranges_tag_everything_other() {
        let classifier = FlowDirectionClassifier::new(Vec::<String>::new()).unwrap();
        let flow = Flow::between("f", "10.1.2.3", "10.9.9.9");
        assert_eq!(classifier.flow_tag(&flow), Tag::Other);
    }

    #[test]
    fn test_tag_display() {
        assert_eq!(Tag::Egress.to_string(), "egress");
        assert_eq!(serde_json::to_string(&Tag::Internal).unwrap(), "\"internal\"");
    }
}
