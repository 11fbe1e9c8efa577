use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::scene::SceneDescription;
use crate::timestamp_millis;

static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

/// Millisecond timestamp, bumped past the previous one so ids allocated
/// within the same instant stay unique and ordered.
fn next_stamp() -> u64 {
    let now = timestamp_millis() as u64;
    let mut prev = LAST_STAMP.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(prev + 1);
        match LAST_STAMP.compare_exchange(prev, candidate, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return candidate,
            Err(latest) => prev = latest,
        }
    }
}

/// Lifecycle of a gallery item. `Pending` items are owned by exactly one
/// background task until it resolves them to `Completed` or `Error`; the
/// only way back to `Pending` is an explicit rework (improve / 3D edit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Completed,
    Error,
}

fn default_status() -> ItemStatus {
    ItemStatus::Completed
}

/// What kind of content an item carries, derived from its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Vector,
    Raster,
    Scene,
}

/// Content payload of a completed item. Exactly one variant is ever set;
/// the variant is the `kind` discriminant, so an item can never hold both
/// vector markup and scene data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemPayload {
    Vector {
        #[serde(rename = "vectorContent")]
        vector_content: String,
        /// Raster render of the vector markup. A cache: recomputable, and
        /// stripped from gallery exports.
        #[serde(rename = "rasterContent", skip_serializing_if = "Option::is_none")]
        raster_cache: Option<String>,
    },
    Scene {
        #[serde(rename = "sceneData")]
        scene_data: Value,
        #[serde(rename = "sceneDescription")]
        scene_description: SceneDescription,
        #[serde(rename = "sourcePrompt", skip_serializing_if = "Option::is_none")]
        source_prompt: Option<String>,
        /// Weak reference to the 2D item this model was built from.
        #[serde(rename = "originSourceItemId", skip_serializing_if = "Option::is_none")]
        origin_source_item_id: Option<String>,
    },
    Raster {
        #[serde(rename = "rasterContent")]
        raster_content: String,
    },
}

impl ItemPayload {
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Vector { .. } => ItemKind::Vector,
            Self::Raster { .. } => ItemKind::Raster,
            Self::Scene { .. } => ItemKind::Scene,
        }
    }

    pub fn vector_content(&self) -> Option<&str> {
        match self {
            Self::Vector { vector_content, .. } => Some(vector_content),
            _ => None,
        }
    }
}

/// Inputs snapshotted while a 3D build is in flight. Never serialized and
/// cleared when the owning task resolves.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWork {
    pub source_vector: String,
    pub prompt: String,
    pub model: String,
    pub origin_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryItem {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default = "default_status")]
    pub status: ItemStatus,
    #[serde(flatten)]
    pub payload: Option<ItemPayload>,
    #[serde(skip)]
    pub work: Option<PendingWork>,
}

impl GalleryItem {
    /// A fresh pending item, as created by every user-initiated action.
    pub fn pending(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            prompt: None,
            status: ItemStatus::Pending,
            payload: None,
            work: None,
        }
    }

    pub fn kind(&self) -> Option<ItemKind> {
        self.payload.as_ref().map(ItemPayload::kind)
    }

    /// Numeric interpretation of the id's leading timestamp, used for the
    /// newest-first gallery ordering.
    pub fn sort_stamp(&self) -> u128 {
        leading_digits(&self.id)
    }
}

fn leading_digits(id: &str) -> u128 {
    let digits: String = id.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

/// Allocates `count` ids sharing one creation timestamp, with a sub-index
/// appended when the batch has more than one entry.
pub fn batch_ids(count: usize) -> Vec<String> {
    let base = next_stamp();
    if count <= 1 {
        return vec![base.to_string()];
    }
    (0..count).map(|index| format!("{base}-{index}")).collect()
}

/// Ordered collection of gallery items.
///
/// Items are stored in insertion order; [`GalleryStore::list`] recomputes
/// the newest-first presentation order on every call, purely from ids, so
/// items never reorder when their status changes. Every mutation bumps a
/// revision counter that the presentation layer polls to re-render.
#[derive(Debug, Default)]
pub struct GalleryStore {
    items: Vec<GalleryItem>,
    revision: u64,
}

impl GalleryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Appends an item; callers create items in `Pending` state except for
    /// synchronous copies (duplicate, import).
    pub fn create(&mut self, item: GalleryItem) {
        self.items.push(item);
        self.revision += 1;
    }

    pub fn get(&self, id: &str) -> Option<&GalleryItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Applies `apply` to the matching item. A no-op returning `false` when
    /// the id is unknown — the contract that makes completion updates from
    /// tasks whose item was deleted mid-flight harmless.
    pub fn update_with(&mut self, id: &str, apply: impl FnOnce(&mut GalleryItem)) -> bool {
        let Some(item) = self.items.iter_mut().find(|item| item.id == id) else {
            return false;
        };
        apply(item);
        self.revision += 1;
        true
    }

    /// Resolves a pending item with a content payload.
    pub fn complete(&mut self, id: &str, payload: ItemPayload) -> bool {
        self.update_with(id, |item| {
            item.status = ItemStatus::Completed;
            item.payload = Some(payload);
            item.work = None;
        })
    }

    /// Resolves a pending item as failed, replacing its display name with a
    /// user-facing label.
    pub fn fail(&mut self, id: &str, label: &str) -> bool {
        self.update_with(id, |item| {
            item.status = ItemStatus::Error;
            item.name = label.to_string();
            item.payload = None;
            item.work = None;
        })
    }

    /// Re-enters `Pending` for an improve / 3D-edit pass, reusing the item
    /// id and clearing the payload until the new task resolves.
    pub fn begin_rework(&mut self, id: &str, prompt: &str, work: Option<PendingWork>) -> bool {
        self.update_with(id, |item| {
            item.status = ItemStatus::Pending;
            item.prompt = Some(prompt.to_string());
            item.payload = None;
            item.work = work;
        })
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.id != id);
        if self.items.len() == before {
            return false;
        }
        self.revision += 1;
        true
    }

    /// Synchronously copies a completed item under a fresh id.
    pub fn duplicate(&mut self, id: &str) -> Option<String> {
        let source = self.get(id)?;
        if source.status != ItemStatus::Completed {
            return None;
        }
        let mut copy = source.clone();
        copy.id = next_stamp().to_string();
        copy.name = format!("{} (copy)", source.name);
        let new_id = copy.id.clone();
        self.create(copy);
        Some(new_id)
    }

    /// Items sorted newest-first by the numeric leading timestamp of their
    /// id; stable for same-instant batches.
    pub fn list(&self) -> Vec<GalleryItem> {
        let mut sorted = self.items.clone();
        sorted.sort_by(|a, b| b.sort_stamp().cmp(&a.sort_stamp()));
        sorted
    }
}

/// Cheaply clonable handle shared between the presentation layer and the
/// background tasks. Each task owns exactly one item id and only ever goes
/// through the id-keyed operations, so interleaved updates stay commutative.
#[derive(Debug, Clone, Default)]
pub struct SharedGallery {
    inner: Arc<Mutex<GalleryStore>>,
}

impl SharedGallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, access: impl FnOnce(&mut GalleryStore) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        access(&mut guard)
    }

    pub fn get(&self, id: &str) -> Option<GalleryItem> {
        self.with(|store| store.get(id).cloned())
    }

    pub fn list(&self) -> Vec<GalleryItem> {
        self.with(|store| store.list())
    }

    pub fn revision(&self) -> u64 {
        self.with(|store| store.revision())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{batch_ids, GalleryItem, GalleryStore, ItemKind, ItemPayload, ItemStatus};

    fn vector_payload(markup: &str) -> ItemPayload {
        ItemPayload::Vector {
            vector_content: markup.to_string(),
            raster_cache: Some("data:image/png;base64,AAAA".to_string()),
        }
    }

    #[test]
    fn list_orders_newest_first_by_leading_timestamp() {
        let mut store = GalleryStore::new();
        store.create(GalleryItem::pending("100", "old"));
        store.create(GalleryItem::pending("300-0", "newest"));
        store.create(GalleryItem::pending("200-0", "middle"));
        let names: Vec<String> = store.list().into_iter().map(|item| item.name).collect();
        assert_eq!(names, ["newest", "middle", "old"]);
    }

    #[test]
    fn status_changes_never_reorder_items() {
        let mut store = GalleryStore::new();
        store.create(GalleryItem::pending("100", "a"));
        store.create(GalleryItem::pending("200", "b"));
        store.complete("100", vector_payload("<svg/>"));
        let ids: Vec<String> = store.list().into_iter().map(|item| item.id).collect();
        assert_eq!(ids, ["200", "100"]);
    }

    #[test]
    fn update_on_unknown_id_is_a_noop() {
        let mut store = GalleryStore::new();
        store.create(GalleryItem::pending("100", "a"));
        let revision = store.revision();
        assert!(!store.update_with("missing", |item| item.name = "changed".to_string()));
        assert_eq!(store.revision(), revision);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn deleted_item_does_not_reappear_when_its_task_resolves() {
        let mut store = GalleryStore::new();
        store.create(GalleryItem::pending("100", "doomed"));
        assert!(store.remove("100"));
        // The task completes later; the id-keyed update must be a no-op.
        assert!(!store.complete("100", vector_payload("<svg/>")));
        assert!(store.is_empty());
    }

    #[test]
    fn complete_clears_transient_work_fields() {
        let mut store = GalleryStore::new();
        let mut item = GalleryItem::pending("100", "3d build");
        item.work = Some(super::PendingWork {
            source_vector: "<svg/>".to_string(),
            prompt: "make it metal".to_string(),
            model: "model-x".to_string(),
            origin_id: Some("90".to_string()),
        });
        store.create(item);
        store.complete(
            "100",
            ItemPayload::Scene {
                scene_data: json!({ "asset": { "version": "2.0" } }),
                scene_description: crate::scene::SceneDescription { objects: vec![] },
                source_prompt: Some("make it metal".to_string()),
                origin_source_item_id: Some("90".to_string()),
            },
        );
        let item = store.get("100").unwrap();
        assert!(item.work.is_none());
        assert_eq!(item.status, ItemStatus::Completed);
        assert_eq!(item.kind(), Some(ItemKind::Scene));
    }

    #[test]
    fn rework_reuses_id_and_clears_payload() {
        let mut store = GalleryStore::new();
        store.create(GalleryItem::pending("100", "cactus"));
        store.complete("100", vector_payload("<svg/>"));
        assert!(store.begin_rework("100", "more spikes", None));
        let item = store.get("100").unwrap();
        assert_eq!(item.status, ItemStatus::Pending);
        assert!(item.payload.is_none());
        assert_eq!(item.prompt.as_deref(), Some("more spikes"));
    }

    #[test]
    fn fail_replaces_name_with_label() {
        let mut store = GalleryStore::new();
        store.create(GalleryItem::pending("100", "cactus"));
        store.fail("100", "generation failed");
        let item = store.get("100").unwrap();
        assert_eq!(item.status, ItemStatus::Error);
        assert_eq!(item.name, "generation failed");
        assert!(item.payload.is_none());
    }

    #[test]
    fn duplicate_copies_completed_items_only() {
        let mut store = GalleryStore::new();
        store.create(GalleryItem::pending("100", "cactus"));
        assert_eq!(store.duplicate("100"), None);
        store.complete("100", vector_payload("<svg/>"));
        let copy_id = store.duplicate("100").unwrap();
        assert_ne!(copy_id, "100");
        let copy = store.get(&copy_id).unwrap();
        assert_eq!(copy.name, "cactus (copy)");
        assert_eq!(copy.status, ItemStatus::Completed);
    }

    #[test]
    fn batch_ids_share_one_timestamp_with_sub_indexes() {
        let ids = batch_ids(3);
        assert_eq!(ids.len(), 3);
        let stamps: Vec<&str> = ids
            .iter()
            .map(|id| id.split('-').next().unwrap_or(""))
            .collect();
        assert!(stamps.windows(2).all(|pair| pair[0] == pair[1]));
        assert!(ids[0].ends_with("-0"));
        assert!(ids[2].ends_with("-2"));
    }

    #[test]
    fn payload_serializes_with_interchange_field_names() {
        let item = GalleryItem {
            id: "100".to_string(),
            name: "cactus".to_string(),
            prompt: None,
            status: ItemStatus::Completed,
            payload: Some(vector_payload("<svg/>")),
            work: None,
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["vectorContent"], json!("<svg/>"));
        assert!(value.get("rasterContent").is_some());
        assert!(value.get("work").is_none());
    }
}
