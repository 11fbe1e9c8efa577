use serde_json::Value;

use crate::gallery::{GalleryItem, GalleryStore, ItemPayload, ItemStatus};

/// Snapshot of the completed gallery items, ready for serialization.
///
/// Pending and errored items are omitted, and the raster cache of vector
/// items is stripped since it is recomputable from the markup.
pub fn export_items(store: &GalleryStore) -> Vec<GalleryItem> {
    store
        .list()
        .into_iter()
        .filter(|item| item.status == ItemStatus::Completed)
        .map(|mut item| {
            if let Some(ItemPayload::Vector { raster_cache, .. }) = item.payload.as_mut() {
                *raster_cache = None;
            }
            item.work = None;
            item
        })
        .collect()
}

/// Outcome of an import: how many entries were added, skipped because their
/// id already exists, or rejected as structurally invalid.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    pub added: usize,
    pub skipped: usize,
    pub invalid: usize,
}

/// Merges previously exported items into the store.
///
/// An entry must carry an id, a name, and some content payload to be
/// accepted; entries whose id already exists are skipped so an import can
/// never clobber live items. Imported items are completed by construction.
pub fn import_items(store: &mut GalleryStore, entries: &[Value]) -> ImportReport {
    let mut report = ImportReport::default();
    for entry in entries {
        let Some(item) = parse_entry(entry) else {
            report.invalid += 1;
            continue;
        };
        if store.contains(&item.id) {
            report.skipped += 1;
            continue;
        }
        store.create(item);
        report.added += 1;
    }
    report
}

fn parse_entry(entry: &Value) -> Option<GalleryItem> {
    let id = entry.get("id").and_then(Value::as_str)?;
    let name = entry.get("name").and_then(Value::as_str)?;
    if id.trim().is_empty() || name.trim().is_empty() {
        return None;
    }
    let mut item: GalleryItem = serde_json::from_value(entry.clone()).ok()?;
    item.payload.as_ref()?;
    item.status = ItemStatus::Completed;
    item.work = None;
    Some(item)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{export_items, import_items};
    use crate::gallery::{GalleryItem, GalleryStore, ItemPayload, ItemStatus};

    fn completed_vector(id: &str, name: &str) -> GalleryItem {
        GalleryItem {
            id: id.to_string(),
            name: name.to_string(),
            prompt: Some("a cactus".to_string()),
            status: ItemStatus::Completed,
            payload: Some(ItemPayload::Vector {
                vector_content: "<svg/>".to_string(),
                raster_cache: Some("data:image/png;base64,AAAA".to_string()),
            }),
            work: None,
        }
    }

    #[test]
    fn export_keeps_completed_items_only() {
        let mut store = GalleryStore::new();
        store.create(completed_vector("100", "done"));
        store.create(GalleryItem::pending("200", "in flight"));
        let mut failed = GalleryItem::pending("300", "broken");
        failed.status = ItemStatus::Error;
        store.create(failed);

        let exported = export_items(&store);
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].id, "100");
    }

    #[test]
    fn export_strips_the_raster_cache() {
        let mut store = GalleryStore::new();
        store.create(completed_vector("100", "done"));
        let exported = export_items(&store);
        match exported[0].payload.as_ref() {
            Some(ItemPayload::Vector { raster_cache, .. }) => assert!(raster_cache.is_none()),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn import_skips_existing_ids_and_rejects_invalid_entries() {
        let mut store = GalleryStore::new();
        store.create(completed_vector("100", "already here"));

        let entries = vec![
            json!({ "id": "100", "name": "clash", "vectorContent": "<svg/>" }),
            json!({ "id": "200", "name": "fresh", "vectorContent": "<svg/>" }),
            json!({ "id": "300", "name": "no content" }),
            json!({ "name": "no id", "vectorContent": "<svg/>" }),
        ];
        let report = import_items(&mut store, &entries);
        assert_eq!(report.added, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.invalid, 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("200").unwrap().status, ItemStatus::Completed);
    }

    #[test]
    fn import_accepts_scene_entries() {
        let mut store = GalleryStore::new();
        let entries = vec![json!({
            "id": "400",
            "name": "tree (3D)",
            "sceneData": { "asset": { "version": "2.0" } },
            "sceneDescription": { "objects": [] },
            "sourcePrompt": "a tree"
        })];
        let report = import_items(&mut store, &entries);
        assert_eq!(report.added, 1);
        let item = store.get("400").unwrap();
        assert!(matches!(item.payload, Some(ItemPayload::Scene { .. })));
    }

    #[test]
    fn exported_items_round_trip_through_import() {
        let mut store = GalleryStore::new();
        store.create(completed_vector("100", "cactus"));
        let exported = export_items(&store);
        let entries: Vec<Value> = exported
            .iter()
            .map(|item| serde_json::to_value(item).unwrap())
            .collect();

        let mut fresh = GalleryStore::new();
        let report = import_items(&mut fresh, &entries);
        assert_eq!(report.added, 1);
        let imported = fresh.get("100").unwrap();
        assert_eq!(imported.name, "cactus");
        assert_eq!(imported.prompt.as_deref(), Some("a cactus"));
    }
}
