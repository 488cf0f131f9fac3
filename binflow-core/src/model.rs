//! Domain data structures for bins, routes, collections, and the actors working them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Identifier for a registered bin.
    BinId
);
uuid_id!(
    /// Identifier for a collection route.
    RouteId
);
uuid_id!(
    /// Identifier for a single pickup record.
    CollectionId
);
uuid_id!(
    /// Opaque reference to a resident, collector, or authority.
    ActorId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Physical kind of bin, fixed at registration.
pub enum BinType {
    /// General household waste.
    Standard,
    /// Recyclables; emptied mechanically on every pickup.
    Recycling,
    /// Oversized items.
    Bulk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Fill state of a bin, derived from its fill level and last emptying.
pub enum BinStatus {
    /// Below the partial threshold.
    Empty,
    /// Between the partial and full thresholds.
    Partial,
    /// At or above the full threshold.
    Full,
    /// Full and not emptied within the overdue window.
    Overdue,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
/// WGS84 coordinate pair in degrees.
pub struct GeoPoint {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl GeoPoint {
    /// Construct a point from latitude and longitude.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
/// Inclusive latitude/longitude rectangle.
pub struct BoundingBox {
    /// Southern edge.
    pub min_latitude: f64,
    /// Northern edge.
    pub max_latitude: f64,
    /// Western edge.
    pub min_longitude: f64,
    /// Eastern edge.
    pub max_longitude: f64,
}

impl BoundingBox {
    /// Whether the point lies inside the rectangle, edges included.
    #[must_use]
    pub fn contains(&self, point: GeoPoint) -> bool {
        (self.min_latitude..=self.max_latitude).contains(&point.latitude)
            && (self.min_longitude..=self.max_longitude).contains(&point.longitude)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A physical waste container tracked by QR code and position.
pub struct Bin {
    /// Unique identifier.
    pub id: BinId,
    /// QR code printed on the unit; unique across the registry.
    pub qr_code: String,
    /// Human-readable placement, e.g. a street corner.
    pub location: String,
    /// Geographic position.
    pub position: GeoPoint,
    /// Kind of bin.
    pub bin_type: BinType,
    /// Fill percentage. Nominally 0..=100 but not clamped by the registry.
    pub fill_level: i32,
    /// Current fill state.
    pub status: BinStatus,
    /// Last confirmed emptying, if any is known.
    pub last_emptied: Option<DateTime<Utc>>,
    /// Whether the bin needs operator attention.
    pub alert: bool,
    /// Optimistic concurrency token, bumped on every save.
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Lifecycle of a collection route.
pub enum RouteStatus {
    /// Dispatched to a collector, not started yet.
    Assigned,
    /// Collector is working the stops.
    InProgress,
    /// All work finished. Terminal.
    Completed,
    /// Called off by an authority. Terminal.
    Cancelled,
}

impl RouteStatus {
    /// Whether no further transition is allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Progress of a single stop within a route.
pub enum RouteBinStatus {
    /// Not visited yet.
    Pending,
    /// Collector is at the stop.
    InProgress,
    /// Bin was collected.
    Completed,
    /// Stop was passed over.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// One stop of a route.
pub struct RouteBin {
    /// Bin visited at this stop.
    pub bin_id: BinId,
    /// 1-based position within the route.
    pub sequence_order: u32,
    /// Visit state.
    pub status: RouteBinStatus,
    /// When the stop was completed or skipped.
    pub visited_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Ordered set of bin visits assigned to one collector by one authority.
pub struct Route {
    /// Unique identifier.
    pub id: RouteId,
    /// Display name.
    pub name: String,
    /// Collector working the route.
    pub collector: ActorId,
    /// Authority that dispatched the route.
    pub authority: ActorId,
    /// Lifecycle state.
    pub status: RouteStatus,
    /// When the route was dispatched.
    pub assigned_date: DateTime<Utc>,
    /// When the collector started.
    pub started_date: Option<DateTime<Utc>>,
    /// When the collector finished.
    pub completed_date: Option<DateTime<Utc>>,
    /// Planned duration, fixed per stop.
    pub estimated_duration_minutes: i64,
    /// Measured duration, known once completed after a start.
    pub actual_duration_minutes: Option<i64>,
    /// Straight-line length of the stop sequence, informational.
    pub total_distance_km: Option<f64>,
    /// Stops in visiting order; owned by the route.
    pub stops: Vec<RouteBin>,
    /// Optimistic concurrency token, bumped on every save.
    pub version: u64,
}

impl Route {
    /// Share of stops completed, as a percentage in `0.0..=100.0`.
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.stops.is_empty() {
            return 0.0;
        }
        let completed = self
            .stops
            .iter()
            .filter(|stop| stop.status == RouteBinStatus::Completed)
            .count();
        #[expect(
            clippy::cast_precision_loss,
            reason = "stop counts are far below f64 precision limits"
        )]
        let ratio = completed as f64 / self.stops.len() as f64;
        ratio * 100.0
    }

    /// Find a stop by its sequence number.
    #[must_use]
    pub fn stop(&self, sequence_order: u32) -> Option<&RouteBin> {
        self.stops
            .iter()
            .find(|stop| stop.sequence_order == sequence_order)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Kind of pickup, taken from the bin's type when the collection is created.
pub enum CollectionType {
    /// Household waste pickup.
    Standard,
    /// Recycling pickup.
    Recycling,
    /// Bulk item pickup.
    Bulk,
}

impl From<BinType> for CollectionType {
    fn from(bin_type: BinType) -> Self {
        match bin_type {
            BinType::Standard => Self::Standard,
            BinType::Recycling => Self::Recycling,
            BinType::Bulk => Self::Bulk,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Lifecycle of a pickup record.
pub enum CollectionStatus {
    /// Created, waiting for the collector.
    Assigned,
    /// Collector is emptying the bin.
    InProgress,
    /// Pickup done; the bin has been reset. Terminal.
    Completed,
    /// Pickup could not be performed. Terminal.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Record of one pickup event against a bin.
pub struct Collection {
    /// Unique identifier.
    pub id: CollectionId,
    /// Bin being emptied.
    pub bin_id: BinId,
    /// Collector performing the pickup.
    pub collector: ActorId,
    /// Route stop that produced the pickup, if any.
    pub route_id: Option<RouteId>,
    /// Pickup kind derived from the bin type.
    pub collection_type: CollectionType,
    /// Lifecycle state.
    pub status: CollectionStatus,
    /// Free-text description of the waste.
    pub waste_type: String,
    /// Percentage of the bin collected.
    pub waste_level: i32,
    /// Collector or operator notes.
    pub notes: Option<String>,
    /// When the pickup was recorded.
    pub collection_date: DateTime<Utc>,
    /// When the pickup was completed.
    pub completion_date: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped on every save.
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Role tag carried by every actor reference.
pub enum ActorRole {
    /// Reports disposals.
    Resident,
    /// Executes routes and pickups.
    Collector,
    /// Dispatches routes and overrides bin state.
    Authority,
}

impl fmt::Display for ActorRole {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Resident => "resident",
            Self::Collector => "collector",
            Self::Authority => "authority",
        };
        write!(formatter, "{label}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Identity supplied by the actor directory.
pub struct Actor {
    /// Unique identifier.
    pub id: ActorId,
    /// Display name.
    pub name: String,
    /// Role tag.
    pub role: ActorRole,
    /// Service region, meaningful for collectors.
    pub region: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// Event handed to the notification sink.
pub enum Notification {
    /// A bin raised its alert flag.
    BinAlert {
        /// Bin needing attention.
        bin_id: BinId,
        /// QR code of the bin.
        qr_code: String,
        /// Status at the time of the alert.
        status: BinStatus,
        /// Fill level at the time of the alert.
        fill_level: i32,
    },
    /// A route was dispatched to a collector.
    RouteAssigned {
        /// New route.
        route_id: RouteId,
        /// Collector receiving the route.
        collector: ActorId,
        /// Number of stops.
        stops: usize,
    },
    /// A collector was moved to another region.
    RegionReassigned {
        /// Collector being moved.
        collector: ActorId,
        /// New region.
        region: String,
    },
}
