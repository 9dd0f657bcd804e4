//! Guide compatibility matching
//!
//! The guide population belongs to the external profile collaborator and is
//! reached through [`GuideDirectory`]. Matching is a read-only filter plus a
//! deterministic ordering: rating desc, verified desc, guide id asc.
use super::error::TripError;
use super::trip::{GeoPoint, Trip};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceArea {
    pub center: GeoPoint,
    pub radius_km: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuideProfile {
    pub id: String,
    pub active: bool,
    pub verified: bool,
    pub rating: f64,
    pub languages: Vec<String>,
    // empty means the guide works anywhere
    pub service_areas: Vec<ServiceArea>,
}

impl GuideProfile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            active: true,
            verified: true,
            rating: 0.0,
            languages: vec![],
            service_areas: vec![],
        }
    }
    pub fn with_rating(mut self, rating: f64) -> Self {
        self.rating = rating;
        self
    }
    pub fn with_verified(mut self, verified: bool) -> Self {
        self.verified = verified;
        self
    }
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
    pub fn with_language(mut self, language: &str) -> Self {
        self.languages.push(language.to_ascii_lowercase());
        self
    }
    pub fn with_service_area(mut self, center: GeoPoint, radius_km: f64) -> Self {
        self.service_areas.push(ServiceArea { center, radius_km });
        self
    }

    fn speaks(&self, language: &str) -> bool {
        self.languages.iter().any(|l| l.eq_ignore_ascii_case(language))
    }

    fn serves(&self, point: &GeoPoint) -> bool {
        self.service_areas.is_empty()
            || self
                .service_areas
                .iter()
                .any(|area| area.center.distance_km(point) <= area.radius_km)
    }
}

/// Read-only view of a compatible guide, recomputed per query.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuideCandidate {
    pub guide_id: String,
    pub verified: bool,
    pub rating: f64,
    pub languages: Vec<String>,
}

impl From<&GuideProfile> for GuideCandidate {
    fn from(profile: &GuideProfile) -> Self {
        Self {
            guide_id: profile.id.clone(),
            verified: profile.verified,
            rating: profile.rating,
            languages: profile.languages.clone(),
        }
    }
}

pub trait GuideDirectory: Send + Sync {
    fn guides(&self) -> Result<Vec<GuideProfile>, TripError>;

    fn guide(&self, guide_id: &str) -> Result<Option<GuideProfile>, TripError> {
        Ok(self.guides()?.into_iter().find(|g| g.id == guide_id))
    }
}

/// Fixed guide population, for tests and demos.
#[derive(Debug, Default)]
pub struct StaticGuideDirectory {
    guides: BTreeMap<String, GuideProfile>,
}

impl StaticGuideDirectory {
    pub fn new(guides: impl IntoIterator<Item = GuideProfile>) -> Self {
        Self {
            guides: guides.into_iter().map(|g| (g.id.clone(), g)).collect(),
        }
    }
}

impl GuideDirectory for StaticGuideDirectory {
    fn guides(&self) -> Result<Vec<GuideProfile>, TripError> {
        Ok(self.guides.values().cloned().collect())
    }

    fn guide(&self, guide_id: &str) -> Result<Option<GuideProfile>, TripError> {
        Ok(self.guides.get(guide_id).cloned())
    }
}

pub struct GuideMatcher {
    directory: Arc<dyn GuideDirectory>,
    require_verified: bool,
}

impl GuideMatcher {
    pub fn new(directory: Arc<dyn GuideDirectory>, require_verified: bool) -> Self {
        Self {
            directory,
            require_verified,
        }
    }

    pub fn is_compatible(&self, trip: &Trip, guide: &GuideProfile) -> bool {
        if !guide.active || (self.require_verified && !guide.verified) {
            return false;
        }
        if let Some(language) = trip.preferred_language.as_deref() {
            if !guide.speaks(language) {
                return false;
            }
        }
        guide.serves(&trip.meeting_point)
    }

    /// Every compatible guide in ranking order. An empty result is a valid
    /// answer, not an error.
    pub fn find_compatible_guides(&self, trip: &Trip) -> Result<Vec<GuideCandidate>, TripError> {
        let mut compatible: Vec<GuideProfile> = self
            .directory
            .guides()?
            .into_iter()
            .filter(|g| self.is_compatible(trip, g))
            .collect();
        compatible.sort_by(rank);

        Ok(compatible.iter().map(GuideCandidate::from).collect())
    }

    pub fn page(
        &self,
        trip: &Trip,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<GuideCandidate>, TripError> {
        Ok(self
            .find_compatible_guides(trip)?
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    /// Looks a single guide up and re-checks it against the trip.
    pub fn compatible_guide(
        &self,
        trip: &Trip,
        guide_id: &str,
    ) -> Result<Option<GuideCandidate>, TripError> {
        Ok(self
            .directory
            .guide(guide_id)?
            .filter(|g| self.is_compatible(trip, g))
            .map(|g| GuideCandidate::from(&g)))
    }

    /// Resolves stored candidate ids, keeping their stored order. Guides the
    /// directory no longer knows are skipped.
    pub fn resolve(&self, guide_ids: &[String]) -> Result<Vec<GuideCandidate>, TripError> {
        let mut resolved = Vec::with_capacity(guide_ids.len());
        for id in guide_ids {
            if let Some(profile) = self.directory.guide(id)? {
                resolved.push(GuideCandidate::from(&profile));
            }
        }
        Ok(resolved)
    }
}

fn rank(a: &GuideProfile, b: &GuideProfile) -> Ordering {
    b.rating
        .total_cmp(&a.rating)
        .then_with(|| b.verified.cmp(&a.verified))
        .then_with(|| a.id.cmp(&b.id))
}
