//! Bin records and the fill/status state machine.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::{
    ActorId, ActorRole, Bin, BinId, BinStatus, BinType, BoundingBox, GeoPoint, Notification,
};
use crate::ports::{Ports, StoreError};

/// Fill level at which a bin counts as partially filled.
pub const PARTIAL_THRESHOLD: i32 = 50;
/// Fill level at which a bin counts as full.
pub const FULL_THRESHOLD: i32 = 90;
/// Hours a FULL bin may wait before [`is_overdue`] reports it.
pub const OVERDUE_AFTER_HOURS: i64 = 48;

/// Kilometres per degree of latitude used by the nearby-bins box.
const KM_PER_DEGREE: f64 = 111.0;

/// Status for a fill level using the registry thresholds (50/90).
#[must_use]
pub const fn status_for_fill_level(level: i32) -> BinStatus {
    if level < PARTIAL_THRESHOLD {
        BinStatus::Empty
    } else if level < FULL_THRESHOLD {
        BinStatus::Partial
    } else {
        BinStatus::Full
    }
}

/// Whether a bin is FULL and was last emptied more than 48 hours before `now`.
#[must_use]
pub fn is_overdue(bin: &Bin, now: DateTime<Utc>) -> bool {
    bin.status == BinStatus::Full
        && bin
            .last_emptied
            .is_some_and(|emptied| now - emptied > Duration::hours(OVERDUE_AFTER_HOURS))
}

/// Rectangle approximating a circle of `radius_km` around `center`.
///
/// Latitude spans `radius_km / 111` degrees, longitude is widened by
/// `1 / cos(latitude)`. Corners lie outside the circle.
#[must_use]
pub fn bounding_box(center: GeoPoint, radius_km: f64) -> BoundingBox {
    let lat_delta = radius_km / KM_PER_DEGREE;
    let lon_delta = radius_km / (KM_PER_DEGREE * center.latitude.to_radians().cos().abs());
    BoundingBox {
        min_latitude: center.latitude - lat_delta,
        max_latitude: center.latitude + lat_delta,
        min_longitude: center.longitude - lon_delta,
        max_longitude: center.longitude + lon_delta,
    }
}

/// State of a bin before and after a successful update.
#[derive(Debug, Clone)]
pub struct BinChange {
    /// Record as read.
    pub before: Bin,
    /// Record as stored.
    pub after: Bin,
}

impl BinChange {
    /// Whether the update raised the alert flag.
    #[must_use]
    pub fn raised_alert(&self) -> bool {
        !self.before.alert && self.after.alert
    }
}

/// Owner of bin records and their status transitions.
pub struct BinRegistry {
    ports: Ports,
    max_write_attempts: u32,
}

impl BinRegistry {
    /// Create a registry over the given ports.
    #[must_use]
    pub fn new(ports: Ports, config: &EngineConfig) -> Self {
        Self {
            ports,
            max_write_attempts: config.max_write_attempts.max(1),
        }
    }

    /// Register a new, empty bin.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateQrCode`] when the code is taken and
    /// [`EngineError::Validation`] for a blank code.
    pub async fn register(
        &self,
        qr_code: &str,
        location: &str,
        position: GeoPoint,
        bin_type: BinType,
    ) -> Result<Bin, EngineError> {
        let qr_code = qr_code.trim();
        if qr_code.is_empty() {
            return Err(EngineError::Validation("QR code is required".into()));
        }
        if self.ports.bins.find_by_qr(qr_code).await?.is_some() {
            return Err(EngineError::DuplicateQrCode(qr_code.to_owned()));
        }

        let bin = Bin {
            id: BinId::new(),
            qr_code: qr_code.to_owned(),
            location: location.to_owned(),
            position,
            bin_type,
            fill_level: 0,
            status: BinStatus::Empty,
            last_emptied: Some(self.ports.clock.now()),
            alert: false,
            version: 0,
        };

        let bin = self.ports.bins.insert(bin).await.map_err(|err| match err {
            StoreError::DuplicateKey(_) => EngineError::DuplicateQrCode(qr_code.to_owned()),
            other => EngineError::Storage(other),
        })?;
        info!(bin_id = %bin.id, qr_code = %bin.qr_code, "registered bin");
        Ok(bin)
    }

    /// Load a bin.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown id.
    pub async fn get(&self, id: &BinId) -> Result<Bin, EngineError> {
        self.ports
            .bins
            .get(id)
            .await?
            .ok_or_else(|| EngineError::not_found("bin", id))
    }

    /// Load every bin.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] when the store fails.
    pub async fn list(&self) -> Result<Vec<Bin>, EngineError> {
        Ok(self.ports.bins.list().await?)
    }

    /// Set the fill level and re-derive the status from the 50/90 thresholds.
    ///
    /// This is the sensor feed entry point; resident reports go through
    /// [`crate::disposal::DisposalDesk`], which checks the reporter.
    ///
    /// Never produces OVERDUE and never raises the alert flag; the flag is
    /// cleared when the bin is no longer FULL.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown id.
    pub async fn set_fill_level(&self, id: &BinId, level: i32) -> Result<Bin, EngineError> {
        let change = self
            .update(id, |bin| {
                bin.fill_level = level;
                bin.status = status_for_fill_level(level);
                if bin.status != BinStatus::Full {
                    bin.alert = false;
                }
            })
            .await?;
        debug!(bin_id = %id, level, status = ?change.after.status, "fill level updated");
        Ok(change.after)
    }

    /// Authority override of the status.
    ///
    /// Setting EMPTY always stamps `last_emptied` and clears the alert; the
    /// fill level becomes `fill_level` or 0.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] for an unknown bin or actor and
    /// [`EngineError::Validation`] when `authority` is not an authority.
    pub async fn set_status(
        &self,
        authority: &ActorId,
        id: &BinId,
        status: BinStatus,
        fill_level: Option<i32>,
    ) -> Result<Bin, EngineError> {
        self.ports
            .actor_with_role(authority, ActorRole::Authority)
            .await?;
        let now = self.ports.clock.now();
        let change = self
            .update(id, |bin| {
                bin.status = status;
                match status {
                    BinStatus::Empty => {
                        bin.fill_level = fill_level.unwrap_or(0);
                        bin.last_emptied = Some(now);
                        bin.alert = false;
                    }
                    BinStatus::Partial => {
                        if let Some(level) = fill_level {
                            bin.fill_level = level;
                        }
                        bin.alert = false;
                    }
                    BinStatus::Full => {
                        if let Some(level) = fill_level {
                            bin.fill_level = level;
                        }
                    }
                    BinStatus::Overdue => {
                        if let Some(level) = fill_level {
                            bin.fill_level = level;
                        }
                        bin.alert = true;
                    }
                }
            })
            .await?;
        info!(bin_id = %id, authority = %authority, status = ?status, "bin status overridden");
        Ok(change.after)
    }

    /// Move FULL bins not emptied within `threshold` to OVERDUE and raise
    /// their alert. Returns the bins that changed; repeat runs are no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] when the store fails.
    pub async fn mark_overdue_sweep(&self, threshold: Duration) -> Result<Vec<BinId>, EngineError> {
        let cutoff = self.ports.clock.now() - threshold;
        let candidates = self.ports.bins.full_emptied_before(cutoff).await?;

        let mut marked = Vec::new();
        for candidate in candidates {
            let change = self
                .update(&candidate.id, |bin| {
                    let stale = bin.last_emptied.is_some_and(|emptied| emptied < cutoff);
                    if bin.status == BinStatus::Full && stale {
                        bin.status = BinStatus::Overdue;
                        bin.alert = true;
                    }
                })
                .await?;
            if change.before.status != change.after.status {
                marked.push(candidate.id);
            }
        }

        if !marked.is_empty() {
            info!(count = marked.len(), "marked bins overdue");
        }
        Ok(marked)
    }

    /// Bins inside the bounding box of `radius_km` around the point.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for a negative or non-finite radius.
    pub async fn find_nearby(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    ) -> Result<Vec<Bin>, EngineError> {
        if !radius_km.is_finite() || radius_km < 0.0 {
            return Err(EngineError::Validation(format!(
                "radius must be a non-negative number of kilometres, got {radius_km}"
            )));
        }
        let area = bounding_box(GeoPoint::new(latitude, longitude), radius_km);
        Ok(self.ports.bins.within(area).await?)
    }

    /// Read-modify-write a bin with compare-and-swap, retrying on conflicts.
    ///
    /// The closure may run more than once. Unchanged records are not written.
    /// Raising the alert flag emits a [`Notification::BinAlert`].
    pub(crate) async fn update<F>(&self, id: &BinId, mut mutate: F) -> Result<BinChange, EngineError>
    where
        F: FnMut(&mut Bin) + Send,
    {
        for attempt in 1..=self.max_write_attempts {
            let before = self.get(id).await?;
            let mut candidate = before.clone();
            mutate(&mut candidate);

            if candidate == before {
                return Ok(BinChange {
                    after: before.clone(),
                    before,
                });
            }

            match self.ports.bins.save(candidate).await {
                Ok(after) => {
                    let change = BinChange { before, after };
                    if change.raised_alert() {
                        self.ports
                            .announce(Notification::BinAlert {
                                bin_id: change.after.id,
                                qr_code: change.after.qr_code.clone(),
                                status: change.after.status,
                                fill_level: change.after.fill_level,
                            })
                            .await;
                    }
                    return Ok(change);
                }
                Err(StoreError::Conflict) => {
                    debug!(bin_id = %id, attempt, "bin write conflict, retrying");
                }
                Err(StoreError::Missing) => return Err(EngineError::not_found("bin", id)),
                Err(err) => return Err(err.into()),
            }
        }
        Err(EngineError::Conflict)
    }
}
