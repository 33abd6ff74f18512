//! Viewer-side cache and merge rules
//!
//! A connected viewer keeps the records it may see plus any edits it has
//! staged but not yet sent. Incoming change events are merged
//! last-writer-wins on the server-assigned `updated_at`:
//!
//! - an event not strictly newer than the cached record is dropped, so
//!   duplicates and out-of-order deliveries never regress state;
//! - a newer event overwrites exactly the fields its patch carries;
//! - staged drafts are kept apart from the server view and survive merges.
//!
//! A viewer that cannot place an event (an update for a record it never saw,
//! or a resync request from the hub) flags itself for a full resync.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use super::hub::RealtimeMessage;
use crate::model::{
    ChangeEvent, ChangeKind, Notification, NotificationId, PatchField, PrincipalId, RequestId,
    ServiceRequest,
};

/// Local edits not yet sent to the server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedEdits {
    pub comments: Option<String>,
    pub result_artifact_ref: Option<String>,
}

impl StagedEdits {
    pub fn is_empty(&self) -> bool {
        self.comments.is_none() && self.result_artifact_ref.is_none()
    }

    fn fields(&self) -> HashSet<PatchField> {
        let mut fields = HashSet::new();
        if self.comments.is_some() {
            fields.insert(PatchField::Comments);
        }
        if self.result_artifact_ref.is_some() {
            fields.insert(PatchField::ResultArtifactRef);
        }
        fields
    }
}

/// Result of merging one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// New record added from a creation snapshot
    Inserted,
    /// Patch applied; `overlapping_drafts` lists staged fields the server also changed
    Applied {
        fields: Vec<PatchField>,
        overlapping_drafts: Vec<PatchField>,
    },
    Removed,
    /// Notification accepted for the first time
    Delivered,
    /// Not newer than what is cached, or already seen; ignored
    Stale,
    /// Event could not be placed; full state must be re-fetched
    NeedsResync,
}

/// Client-held view of the records a principal may see
#[derive(Debug, Clone)]
pub struct ViewerCache {
    viewer: PrincipalId,
    records: HashMap<RequestId, ServiceRequest>,
    /// Deletion stamps, so a late upsert cannot resurrect a removed record
    tombstones: HashMap<RequestId, DateTime<Utc>>,
    drafts: HashMap<RequestId, StagedEdits>,
    notifications: Vec<Notification>,
    seen_notifications: HashSet<NotificationId>,
    needs_resync: bool,
}

impl ViewerCache {
    pub fn new(viewer: PrincipalId) -> Self {
        Self {
            viewer,
            records: HashMap::new(),
            tombstones: HashMap::new(),
            drafts: HashMap::new(),
            notifications: Vec::new(),
            seen_notifications: HashSet::new(),
            needs_resync: false,
        }
    }

    /// Build a cache from a full snapshot
    pub fn from_snapshot(viewer: PrincipalId, records: Vec<ServiceRequest>) -> Self {
        let mut cache = Self::new(viewer);
        cache.resync(records);
        cache
    }

    pub fn viewer(&self) -> &PrincipalId {
        &self.viewer
    }

    pub fn get(&self, id: &RequestId) -> Option<&ServiceRequest> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &ServiceRequest> {
        self.records.values()
    }

    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Handle any hub message
    pub fn handle(&mut self, message: &RealtimeMessage) -> MergeOutcome {
        match message {
            RealtimeMessage::Change(event) => self.merge(event),
            RealtimeMessage::Notification(notification) => {
                if self.push_notification(notification.clone()) {
                    MergeOutcome::Delivered
                } else {
                    MergeOutcome::Stale
                }
            }
            RealtimeMessage::Resync => {
                self.needs_resync = true;
                MergeOutcome::NeedsResync
            }
        }
    }

    /// Merge one change event using last-writer-wins on `updated_at`
    pub fn merge(&mut self, event: &ChangeEvent) -> MergeOutcome {
        if let Some(deleted_at) = self.tombstones.get(&event.record_id) {
            if event.updated_at <= *deleted_at {
                return MergeOutcome::Stale;
            }
        }

        match event.kind {
            ChangeKind::Removed => self.merge_removal(event),
            ChangeKind::Upserted => self.merge_upsert(event),
        }
    }

    fn merge_removal(&mut self, event: &ChangeEvent) -> MergeOutcome {
        if let Some(cached) = self.records.get(&event.record_id) {
            if event.updated_at <= cached.updated_at {
                return MergeOutcome::Stale;
            }
        }
        self.tombstones
            .insert(event.record_id.clone(), event.updated_at);
        self.drafts.remove(&event.record_id);
        match self.records.remove(&event.record_id) {
            Some(_) => MergeOutcome::Removed,
            None => MergeOutcome::Stale,
        }
    }

    fn merge_upsert(&mut self, event: &ChangeEvent) -> MergeOutcome {
        if !self.records.contains_key(&event.record_id) {
            return match &event.snapshot {
                Some(snapshot) => {
                    self.records
                        .insert(event.record_id.clone(), snapshot.clone());
                    MergeOutcome::Inserted
                }
                None => {
                    self.needs_resync = true;
                    MergeOutcome::NeedsResync
                }
            };
        }
        let Some(cached) = self.records.get_mut(&event.record_id) else {
            return MergeOutcome::Stale;
        };

        if event.updated_at <= cached.updated_at {
            return MergeOutcome::Stale;
        }

        event.patch.apply_to(cached);
        cached.status = event.new_status;
        cached.updated_at = event.updated_at;

        let fields = event.patch.fields();
        let overlapping_drafts = match self.drafts.get(&event.record_id) {
            Some(draft) => {
                let staged = draft.fields();
                fields.iter().copied().filter(|f| staged.contains(f)).collect()
            }
            None => Vec::new(),
        };

        MergeOutcome::Applied {
            fields,
            overlapping_drafts,
        }
    }

    /// Replace the server view with a full snapshot. Drafts survive for
    /// records that still exist; deletion stamps survive for records the
    /// snapshot does not bring back, so redelivered events stay dead.
    pub fn resync(&mut self, records: Vec<ServiceRequest>) {
        self.records = records
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        let records = &self.records;
        self.drafts.retain(|id, _| records.contains_key(id));
        self.tombstones.retain(|id, _| !records.contains_key(id));
        self.needs_resync = false;
    }

    /// Stage a comment draft
    pub fn stage_comment(&mut self, id: &RequestId, text: impl Into<String>) {
        self.drafts.entry(id.clone()).or_default().comments = Some(text.into());
    }

    /// Stage an artifact reference draft
    pub fn stage_artifact(&mut self, id: &RequestId, artifact_ref: impl Into<String>) {
        self.drafts
            .entry(id.clone())
            .or_default()
            .result_artifact_ref = Some(artifact_ref.into());
    }

    pub fn draft(&self, id: &RequestId) -> Option<&StagedEdits> {
        self.drafts.get(id)
    }

    /// Remove and return staged edits, e.g. when sending them
    pub fn take_draft(&mut self, id: &RequestId) -> Option<StagedEdits> {
        self.drafts.remove(id).filter(|d| !d.is_empty())
    }

    /// Server view overlaid with staged drafts, for display
    pub fn draft_view(&self, id: &RequestId) -> Option<ServiceRequest> {
        let mut view = self.records.get(id)?.clone();
        if let Some(draft) = self.drafts.get(id) {
            if let Some(ref comments) = draft.comments {
                view.comments = Some(comments.clone());
            }
            if let Some(ref artifact) = draft.result_artifact_ref {
                view.result_artifact_ref = Some(artifact.clone());
            }
        }
        Some(view)
    }

    /// Record a delivered notification; redeliveries are ignored
    pub fn push_notification(&mut self, notification: Notification) -> bool {
        if !notification.audience.includes(&self.viewer) {
            return false;
        }
        if !self.seen_notifications.insert(notification.id) {
            return false;
        }
        self.notifications.push(notification);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        now_millis, Audience, NewServiceRequest, NotificationKind, NotificationOrigin,
        RequestPatch, RequestStatus,
    };
    use chrono::Duration;

    fn record() -> ServiceRequest {
        NewServiceRequest {
            owner_id: "c1".into(),
            created_by: "c1".into(),
            requested_service_id: "svc-notary".to_string(),
            comments: Some("original".to_string()),
        }
        .into_request(RequestId::new("r1"), now_millis())
    }

    fn update(base: &ServiceRequest, patch: RequestPatch, offset_ms: i64) -> ChangeEvent {
        let mut next = base.clone();
        patch.apply_to(&mut next);
        next.updated_at = base.updated_at + Duration::milliseconds(offset_ms);
        ChangeEvent::updated(&next, patch, &"a1".into())
    }

    fn claim_patch() -> RequestPatch {
        RequestPatch {
            status: Some(RequestStatus::Processing),
            handled_by: Some("a1".into()),
            ..RequestPatch::default()
        }
    }

    #[test]
    fn test_newer_event_updates_only_patched_fields() {
        let base = record();
        let mut cache = ViewerCache::from_snapshot("c1".into(), vec![base.clone()]);

        let outcome = cache.merge(&update(&base, claim_patch(), 5));
        assert_eq!(
            outcome,
            MergeOutcome::Applied {
                fields: vec![PatchField::Status, PatchField::HandledBy],
                overlapping_drafts: vec![],
            }
        );
        let cached = cache.get(&base.id).unwrap();
        assert_eq!(cached.status, RequestStatus::Processing);
        assert_eq!(cached.comments.as_deref(), Some("original"));
        assert_eq!(cached.requested_service_id, "svc-notary");
    }

    #[test]
    fn test_equal_or_older_event_is_noop() {
        let base = record();
        let mut cache = ViewerCache::from_snapshot("c1".into(), vec![base.clone()]);

        let same_stamp = update(&base, claim_patch(), 0);
        assert_eq!(cache.merge(&same_stamp), MergeOutcome::Stale);
        let older = update(&base, claim_patch(), -10);
        assert_eq!(cache.merge(&older), MergeOutcome::Stale);
        assert_eq!(cache.get(&base.id).unwrap(), &base);
    }

    #[test]
    fn test_out_of_order_delivery_does_not_regress() {
        let base = record();
        let mut cache = ViewerCache::from_snapshot("c1".into(), vec![base.clone()]);

        let claimed = update(&base, claim_patch(), 5);
        let mut after_claim = base.clone();
        claim_patch().apply_to(&mut after_claim);
        after_claim.updated_at = claimed.updated_at;
        let completed = update(
            &after_claim,
            RequestPatch::status(RequestStatus::Completed),
            5,
        );

        assert!(matches!(cache.merge(&completed), MergeOutcome::Applied { .. }));
        assert_eq!(cache.merge(&claimed), MergeOutcome::Stale);
        // Duplicate delivery
        assert_eq!(cache.merge(&completed), MergeOutcome::Stale);
        assert_eq!(cache.get(&base.id).unwrap().status, RequestStatus::Completed);
    }

    #[test]
    fn test_drafts_survive_merges() {
        let base = record();
        let mut cache = ViewerCache::from_snapshot("c1".into(), vec![base.clone()]);
        cache.stage_comment(&base.id, "draft reply");

        cache.merge(&update(&base, claim_patch(), 5));
        assert_eq!(
            cache.draft(&base.id).unwrap().comments.as_deref(),
            Some("draft reply")
        );
        assert_eq!(
            cache.draft_view(&base.id).unwrap().comments.as_deref(),
            Some("draft reply")
        );

        let rejection = RequestPatch {
            status: Some(RequestStatus::Rejected),
            comments: Some("out of scope".to_string()),
            ..RequestPatch::default()
        };
        let outcome = cache.merge(&update(&base, rejection, 10));
        assert_eq!(
            outcome,
            MergeOutcome::Applied {
                fields: vec![PatchField::Status, PatchField::Comments],
                overlapping_drafts: vec![PatchField::Comments],
            }
        );
        assert_eq!(cache.get(&base.id).unwrap().comments.as_deref(), Some("out of scope"));
        assert!(cache.take_draft(&base.id).is_some());
    }

    #[test]
    fn test_unknown_record_requests_resync() {
        let base = record();
        let mut cache = ViewerCache::new("c1".into());
        assert_eq!(cache.merge(&update(&base, claim_patch(), 1)), MergeOutcome::NeedsResync);
        assert!(cache.needs_resync());

        cache.resync(vec![base.clone()]);
        assert!(!cache.needs_resync());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_creation_snapshot_inserts() {
        let base = record();
        let mut cache = ViewerCache::new("c1".into());
        let created = ChangeEvent::created(&base, &"c1".into());
        assert_eq!(cache.merge(&created), MergeOutcome::Inserted);
        assert_eq!(cache.merge(&created), MergeOutcome::Stale);
    }

    #[test]
    fn test_removal_is_final_for_older_events() {
        let base = record();
        let mut cache = ViewerCache::from_snapshot("c1".into(), vec![base.clone()]);
        cache.stage_comment(&base.id, "never sent");

        let removed = ChangeEvent::removed(
            &base,
            base.updated_at + Duration::milliseconds(20),
            &"c1".into(),
        );
        assert_eq!(cache.merge(&removed), MergeOutcome::Removed);
        assert!(cache.draft(&base.id).is_none());

        let late = update(&base, claim_patch(), 5);
        assert_eq!(cache.merge(&late), MergeOutcome::Stale);
        assert!(cache.get(&base.id).is_none());
    }

    #[test]
    fn test_resync_keeps_deletions_final() {
        let base = record();
        let created = ChangeEvent::created(&base, &"c1".into());
        let removed = ChangeEvent::removed(
            &base,
            base.updated_at + Duration::milliseconds(1),
            &"c1".into(),
        );

        let mut cache = ViewerCache::new("c1".into());
        assert_eq!(cache.merge(&created), MergeOutcome::Inserted);
        assert_eq!(cache.merge(&removed), MergeOutcome::Removed);

        cache.resync(vec![]);
        assert_eq!(cache.merge(&created), MergeOutcome::Stale);
        assert!(cache.get(&base.id).is_none());
    }

    #[test]
    fn test_snapshot_clears_stamp_of_returned_record() {
        let base = record();
        let removed = ChangeEvent::removed(
            &base,
            base.updated_at + Duration::milliseconds(1),
            &"c1".into(),
        );
        let mut cache = ViewerCache::from_snapshot("c1".into(), vec![base.clone()]);
        cache.merge(&removed);

        cache.resync(vec![base.clone()]);
        assert!(cache.get(&base.id).is_some());
        assert!(matches!(
            cache.merge(&update(&base, claim_patch(), 5)),
            MergeOutcome::Applied { .. }
        ));
    }

    #[test]
    fn test_handle_reports_new_notifications() {
        let mut cache = ViewerCache::new("c1".into());
        let n = Notification::new(
            Audience::Principal("c1".into()),
            "Received",
            "We got your request",
            NotificationKind::Info,
            NotificationOrigin::Automated,
        );
        let message = RealtimeMessage::Notification(n);
        assert_eq!(cache.handle(&message), MergeOutcome::Delivered);
        assert_eq!(cache.handle(&message), MergeOutcome::Stale);
    }

    #[test]
    fn test_notifications_deduplicated() {
        let mut cache = ViewerCache::new("c1".into());
        let n = Notification::new(
            Audience::Principal("c1".into()),
            "Received",
            "We got your request",
            NotificationKind::Info,
            NotificationOrigin::Automated,
        );
        assert!(cache.push_notification(n.clone()));
        assert!(!cache.push_notification(n));

        let other = Notification::new(
            Audience::Principal("c2".into()),
            "x",
            "y",
            NotificationKind::Info,
            NotificationOrigin::Automated,
        );
        assert!(!cache.push_notification(other));
        assert_eq!(cache.notifications().len(), 1);
    }
}
