//! Data exchanged with mechs and replicated between participants.

use crate::{MechInteractError, MechInteractResult};
use mech_primitives::{strip_hex_prefix, Address, HEX_PREFIX};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// CIDv1 base16 prefix (`f`, version 1, dag-pb, sha2-256, 32 bytes).
pub const CID_PREFIX: &str = "f01701220";

/// Characters stripped from the registry metadata hash (`0x`).
pub const METADATA_PREFIX_SIZE: usize = 2;

/// Key of the metadata hash inside a service metadata entry.
pub const METADATA_FIELD: &str = "metadata";

/// Default error carried by a response until it is resolved.
pub const UNKNOWN_ERROR: &str = "Unknown";

/// Content identifier in the off-chain store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    /// Content id of `bytes`.
    pub fn for_bytes(bytes: &[u8]) -> Self {
        Self::from_digest_hex(&hex::encode(Sha256::digest(bytes)))
    }

    /// Builds the id from a hex sha2-256 digest, `0x` optional.
    pub fn from_digest_hex(digest: &str) -> Self {
        Self(format!("{CID_PREFIX}{}", strip_hex_prefix(digest).to_lowercase()))
    }

    /// Wraps an id as returned by the store.
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Returns the digest part.
    pub fn digest_hex(&self) -> MechInteractResult<&str> {
        self.0
            .strip_prefix(CID_PREFIX)
            .filter(|digest| digest.len() == 64)
            .ok_or_else(|| MechInteractError::unexpected("content id", &self.0))
    }

    /// The request data carried on-chain: `0x` followed by the digest.
    pub fn request_data(&self) -> MechInteractResult<String> {
        Ok(format!("{HEX_PREFIX}{}", self.digest_hex()?))
    }

    /// Returns the id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What gets uploaded for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MechMetadata {
    /// Prompt sent to the tool.
    pub prompt: String,
    /// Tool to run.
    pub tool: String,
    /// Nonce pairing the request with its response.
    pub nonce: String,
}

/// Service entry of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Metadata entries; the first one carries the hash.
    #[serde(default)]
    pub metadata: Vec<BTreeMap<String, String>>,
}

impl Service {
    /// Metadata hash without its `0x` prefix.
    pub fn metadata_str(&self) -> Option<&str> {
        self.metadata
            .first()
            .and_then(|entry| entry.get(METADATA_FIELD))
            .and_then(|hash| hash.get(METADATA_PREFIX_SIZE..))
    }
}

/// One mech as listed by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MechInfo {
    /// Registry id; pages are ordered by it.
    pub id: u64,
    /// Mech contract.
    pub address: Address,
    /// Service metadata.
    #[serde(default)]
    pub service: Service,
    /// Reputation.
    #[serde(default)]
    pub karma: i64,
    /// Requests received.
    #[serde(default, alias = "receivedRequests")]
    pub received_requests: u64,
    /// Requests the mech delivered itself.
    #[serde(default, alias = "selfDeliveredFromReceived")]
    pub self_delivered: u64,
    /// Price ceiling per delivery.
    #[serde(default, alias = "maxDeliveryRate")]
    pub max_delivery_rate: u128,
    /// Tools left once irrelevant ones are removed.
    #[serde(default)]
    pub relevant_tools: BTreeSet<String>,
}

impl MechInfo {
    /// Returns true when the registry carries no metadata hash.
    pub fn empty_metadata(&self) -> bool {
        self.service.metadata_str().is_none()
    }

    /// Content id of the mech's tool listing.
    pub fn tools_content_id(&self) -> Option<ContentId> {
        self.service.metadata_str().map(ContentId::from_digest_hex)
    }

    /// Delivered ratio as a fraction, zero when nothing was received.
    fn delivered_ratio(&self) -> (u128, u128) {
        if self.received_requests == 0 {
            (0, 1)
        } else {
            (
                u128::from(self.self_delivered),
                u128::from(self.received_requests),
            )
        }
    }

    /// Selection order; `Less` means `self` is preferred.
    ///
    /// Lowest delivery rate first, then highest delivered ratio, then highest
    /// karma, then smallest address.
    pub fn rank(&self, other: &Self) -> Ordering {
        let (num, den) = self.delivered_ratio();
        let (other_num, other_den) = other.delivered_ratio();

        self.max_delivery_rate
            .cmp(&other.max_delivery_rate)
            .then_with(|| (other_num * den).cmp(&(num * other_den)))
            .then_with(|| other.karma.cmp(&self.karma))
            .then_with(|| self.address.cmp(&other.address))
    }
}

/// A request awaiting or holding its response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MechInteractionResponse {
    /// Nonce of the originating request.
    #[serde(default)]
    pub nonce: String,
    /// On-chain request data.
    #[serde(default)]
    pub data: String,
    /// Request id assigned on-chain.
    #[serde(default, alias = "requestId")]
    pub request_id: String,
    /// Delivered result.
    #[serde(default)]
    pub result: Option<String>,
    /// Why there is no result.
    #[serde(default = "unknown_error")]
    pub error: String,
    /// Mech that delivered.
    #[serde(default)]
    pub sender_address: Option<Address>,
}

fn unknown_error() -> String {
    UNKNOWN_ERROR.to_string()
}

impl MechInteractionResponse {
    /// A pending response for a freshly sent request.
    pub fn pending<N: Into<String>, D: Into<String>>(nonce: N, data: D) -> Self {
        Self {
            nonce: nonce.into(),
            data: data.into(),
            request_id: String::new(),
            result: None,
            error: unknown_error(),
            sender_address: None,
        }
    }

    /// Marks the response as given up after retries.
    pub fn retries_exceeded(&mut self) {
        self.error = "Retries were exceeded while trying to get the mech's response.".to_string();
    }

    /// Marks the response as malformed.
    pub fn incorrect_format<R: fmt::Display>(&mut self, res: R) {
        self.error = format!("The response's format was unexpected: {res}");
    }

    /// Returns true once a result was accepted.
    pub fn is_delivered(&self) -> bool {
        self.result.is_some()
    }

    /// Returns true while the response is neither delivered nor given up on.
    pub fn is_pending(&self) -> bool {
        self.result.is_none() && self.error == UNKNOWN_ERROR
    }
}

/// One call inside a multisend transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisendBatch {
    /// Called contract.
    pub to: Address,
    /// Native value attached.
    pub value: u128,
    /// Encoded call.
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

/// A mech's answer to a request, from polling or the out-of-band channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    /// Request being answered.
    pub request_id: String,
    /// Delivering mech.
    pub mech: Address,
    /// Delivered data, `0x` followed by the result's content digest.
    pub data: String,
}

pub(crate) mod hex_bytes {
    use mech_primitives::{decode_hex, encode_hex};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode_hex(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        decode_hex(&raw).map_err(serde::de::Error::custom)
    }
}
