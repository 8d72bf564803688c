//! Demand and supply notices
//!
//! Both kinds share the same routing metadata and differ only in direction,
//! so the fan-out machinery is generic over [`RoutedMessage`].

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

/// Category of demand/supply traffic
///
/// Valid values are `[0, max_channel_type)`; the bound is a registry setting.
pub type ChannelType = u32;

/// Which side of the exchange a routed message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// A request for some capability
    Demand,
    /// An offer of some capability
    Supply,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Demand => write!(f, "demand"),
            MessageKind::Supply => write!(f, "supply"),
        }
    }
}

/// Wall-clock creation time, protobuf style
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    /// Seconds since the Unix epoch
    pub seconds: i64,
    /// Sub-second nanoseconds
    pub nanos: i32,
}

impl Timestamp {
    /// Create a timestamp from raw parts
    pub fn new(seconds: i64, nanos: i32) -> Self {
        Self { seconds, nanos }
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            seconds: since_epoch.as_secs() as i64,
            nanos: since_epoch.subsec_nanos() as i32,
        }
    }

    /// True for the all-zero timestamp
    pub fn is_zero(&self) -> bool {
        self.seconds == 0 && self.nanos == 0
    }
}

/// Common view over [`Demand`] and [`Supply`]
pub trait RoutedMessage: Clone + std::fmt::Debug + Send + Sync + 'static {
    /// Kind of this message type
    const KIND: MessageKind;

    /// Message id
    fn id(&self) -> u64;

    /// Channel type the message is routed on
    fn channel_type(&self) -> ChannelType;

    /// Creation time, if the sender set one
    fn timestamp(&self) -> Option<Timestamp>;

    /// Overwrite the creation time
    fn set_timestamp(&mut self, ts: Timestamp);

    /// Set the creation time to now if the sender left it empty
    ///
    /// Returns `true` when the timestamp was filled in.
    fn stamp_if_unset(&mut self) -> bool {
        match self.timestamp() {
            Some(ts) if !ts.is_zero() => false,
            _ => {
                self.set_timestamp(Timestamp::now());
                true
            }
        }
    }
}

/// A request for some capability
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Demand {
    /// Message id
    pub id: u64,
    /// Sending client id
    pub sender_id: u64,
    /// Target message id (for proposals and selections)
    pub target_id: u64,
    /// Channel type
    pub channel_type: ChannelType,
    /// Human-readable name
    pub name: String,
    /// Creation time
    pub ts: Option<Timestamp>,
    /// JSON argument text
    pub arg_json: String,
    /// Mbus session attached to this exchange, 0 if none
    pub mbus_id: u64,
    /// Opaque content blob (shared, not copied, on fan-out)
    pub content: Bytes,
}

impl Demand {
    /// Create a demand with the given id on a channel type
    pub fn new(id: u64, channel_type: ChannelType) -> Self {
        Self {
            id,
            channel_type,
            ..Default::default()
        }
    }
}

impl RoutedMessage for Demand {
    const KIND: MessageKind = MessageKind::Demand;

    fn id(&self) -> u64 {
        self.id
    }

    fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    fn timestamp(&self) -> Option<Timestamp> {
        self.ts
    }

    fn set_timestamp(&mut self, ts: Timestamp) {
        self.ts = Some(ts);
    }
}

/// An offer of some capability
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Supply {
    /// Message id
    pub id: u64,
    /// Sending client id
    pub sender_id: u64,
    /// Target message id (for proposals and selections)
    pub target_id: u64,
    /// Channel type
    pub channel_type: ChannelType,
    /// Human-readable name
    pub name: String,
    /// Creation time
    pub ts: Option<Timestamp>,
    /// JSON argument text
    pub arg_json: String,
    /// Mbus session attached to this exchange, 0 if none
    pub mbus_id: u64,
    /// Opaque content blob
    pub content: Bytes,
}

impl Supply {
    /// Create a supply with the given id on a channel type
    pub fn new(id: u64, channel_type: ChannelType) -> Self {
        Self {
            id,
            channel_type,
            ..Default::default()
        }
    }
}

impl RoutedMessage for Supply {
    const KIND: MessageKind = MessageKind::Supply;

    fn id(&self) -> u64 {
        self.id
    }

    fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    fn timestamp(&self) -> Option<Timestamp> {
        self.ts
    }

    fn set_timestamp(&mut self, ts: Timestamp) {
        self.ts = Some(ts);
    }
}
