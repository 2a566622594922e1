use std::{fmt, str::FromStr};

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use super::{ChannelId, NodeId};

/// Lifecycle of a channel row. Codes at or above `Closing` mean the channel no longer
/// carries balance and is dropped from the channel-state cache.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    IntoPrimitive,
    TryFromPrimitive,
    strum::Display,
)]
#[repr(u16)]
pub enum ChannelStatus {
    Opening = 0,
    Open = 1,
    Closing = 2,
    CooperativeClosed = 100,
    LocalForceClosed = 101,
    RemoteForceClosed = 102,
    BreachClosed = 103,
    FundingCancelled = 104,
    Abandoned = 105,
}

impl ChannelStatus {
    pub fn is_closed(&self) -> bool {
        *self >= ChannelStatus::Closing
    }

    /// Terminal statuses reached after the closing transaction confirmed.
    pub fn is_final(&self) -> bool {
        *self >= ChannelStatus::CooperativeClosed
    }
}

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ChannelFlags: u32 {
        const FUNDED_ON = 1;
        const CLOSED_ON = 1 << 1;
        const IMPORTED_FORWARDS = 1 << 2;
        const IMPORTED_HTLC_EVENTS = 1 << 3;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseIdError {
    #[error("invalid short channel id: {0}")]
    ShortChannelId(String),
    #[error("invalid channel point: {0}")]
    ChannelPoint(String),
}

/// Short channel id in its `BLOCKxTXxOUTPUT` form, convertible to the packed 64-bit form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShortChannelId {
    pub block_height: u32,
    pub tx_index: u32,
    pub output_index: u16,
}

impl ShortChannelId {
    pub fn new(block_height: u32, tx_index: u32, output_index: u16) -> Self {
        Self {
            block_height,
            tx_index,
            output_index,
        }
    }

    pub fn from_packed(packed: u64) -> Self {
        Self {
            block_height: (packed >> 40) as u32,
            tx_index: ((packed >> 16) & 0xff_ffff) as u32,
            output_index: (packed & 0xffff) as u16,
        }
    }

    pub fn packed(&self) -> u64 {
        ((self.block_height as u64) << 40)
            | (((self.tx_index as u64) & 0xff_ffff) << 16)
            | self.output_index as u64
    }

    pub fn is_zero(&self) -> bool {
        self.packed() == 0
    }
}

impl fmt::Display for ShortChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{}",
            self.block_height, self.tx_index, self.output_index
        )
    }
}

impl FromStr for ShortChannelId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseIdError::ShortChannelId(s.to_string());
        let mut parts = s.split('x');
        let block_height = parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
        let tx_index = parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
        let output_index = parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(Self::new(block_height, tx_index, output_index))
    }
}

/// Funding outpoint of a channel: hex transaction id plus output index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelPoint {
    pub funding_transaction_hash: String,
    pub funding_output_index: u32,
}

impl ChannelPoint {
    pub fn new(funding_transaction_hash: impl Into<String>, funding_output_index: u32) -> Self {
        Self {
            funding_transaction_hash: funding_transaction_hash.into(),
            funding_output_index,
        }
    }
}

impl fmt::Display for ChannelPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.funding_transaction_hash, self.funding_output_index
        )
    }
}

impl FromStr for ChannelPoint {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hash, index) = s
            .split_once(':')
            .ok_or_else(|| ParseIdError::ChannelPoint(s.to_string()))?;
        if hash.len() != 64 || hex::decode(hash).is_err() {
            return Err(ParseIdError::ChannelPoint(s.to_string()));
        }
        let index = index
            .parse()
            .map_err(|_| ParseIdError::ChannelPoint(s.to_string()))?;
        Ok(Self::new(hash, index))
    }
}

/// Persistent attributes of a channel as mirrored in the registry and the `channel` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    pub channel_id: ChannelId,
    pub short_channel_id: Option<ShortChannelId>,
    pub channel_point: Option<ChannelPoint>,
    pub capacity_sat: u64,
    pub private: bool,
    pub first_node_id: NodeId,
    pub second_node_id: NodeId,
    pub initiating_node_id: Option<NodeId>,
    pub accepting_node_id: Option<NodeId>,
    pub closing_node_id: Option<NodeId>,
    pub closing_transaction_hash: Option<String>,
    pub status: ChannelStatus,
    pub funding_block_height: Option<u32>,
    /// Unix millis
    pub funded_on: Option<u64>,
    pub closing_block_height: Option<u32>,
    pub closed_on: Option<u64>,
    pub flags: ChannelFlags,
}

impl ChannelSettings {
    pub fn new(
        short_channel_id: Option<ShortChannelId>,
        channel_point: Option<ChannelPoint>,
        capacity_sat: u64,
        first_node_id: NodeId,
        second_node_id: NodeId,
    ) -> Self {
        Self {
            channel_id: 0,
            short_channel_id,
            channel_point,
            capacity_sat,
            private: false,
            first_node_id,
            second_node_id,
            initiating_node_id: None,
            accepting_node_id: None,
            closing_node_id: None,
            closing_transaction_hash: None,
            status: ChannelStatus::Opening,
            funding_block_height: None,
            funded_on: None,
            closing_block_height: None,
            closed_on: None,
            flags: ChannelFlags::empty(),
        }
    }

    pub fn lnd_short_channel_id(&self) -> Option<u64> {
        self.short_channel_id.map(|scid| scid.packed())
    }

    pub fn has_flags(&self, flags: ChannelFlags) -> bool {
        self.flags.contains(flags)
    }

    /// The counterparty of `node_id` on this channel, if `node_id` is one of its ends.
    pub fn remote_node_id(&self, node_id: NodeId) -> Option<NodeId> {
        if self.first_node_id == node_id {
            Some(self.second_node_id)
        } else if self.second_node_id == node_id {
            Some(self.first_node_id)
        } else {
            None
        }
    }

    pub fn has_node(&self, node_id: NodeId) -> bool {
        self.first_node_id == node_id || self.second_node_id == node_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_channel_id_packing() {
        let scid: ShortChannelId = "761432x1012x1".parse().unwrap();
        assert_eq!(scid.block_height, 761432);
        assert_eq!(ShortChannelId::from_packed(scid.packed()), scid);
        assert_eq!(scid.to_string(), "761432x1012x1");
        assert!("761432x1012".parse::<ShortChannelId>().is_err());
        assert!("1x2x3x4".parse::<ShortChannelId>().is_err());
    }

    #[test]
    fn test_channel_point_parse() {
        let hash = "ab".repeat(32);
        let point: ChannelPoint = format!("{}:3", hash).parse().unwrap();
        assert_eq!(point.funding_output_index, 3);
        assert_eq!(point.to_string(), format!("{}:3", hash));
        assert!("zz:1".parse::<ChannelPoint>().is_err());
    }

    #[test]
    fn test_closed_statuses() {
        assert!(!ChannelStatus::Open.is_closed());
        assert!(ChannelStatus::Closing.is_closed());
        assert!(!ChannelStatus::Closing.is_final());
        assert!(ChannelStatus::BreachClosed.is_final());
        assert_eq!(
            ChannelStatus::try_from(101u16).ok(),
            Some(ChannelStatus::LocalForceClosed)
        );
    }
}
