use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use trazo_contracts::events::{EventWriter, SessionEvent};
use trazo_contracts::gallery::{
    batch_ids, GalleryItem, ItemPayload, ItemStatus, PendingWork, SharedGallery,
};

use crate::client::Transport;
use crate::error::PipelineError;
use crate::pipeline::Pipeline;
use crate::truncate_text;

const NAME_PREVIEW_CHARS: usize = 48;

/// Orchestrates gallery tasks over a shared [`Pipeline`].
///
/// Each queued action owns exactly one gallery item id and runs on its own
/// thread until it resolves that item; deleting the item mid-flight makes
/// the resolution a harmless no-op. There is no cancellation.
pub struct Studio<T: Transport + 'static> {
    pipeline: Arc<Pipeline<T>>,
    gallery: SharedGallery,
    events: EventWriter,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Transport + 'static> Studio<T> {
    pub fn new(pipeline: Pipeline<T>, gallery: SharedGallery, events: EventWriter) -> Self {
        let _ = events.record(SessionEvent::SessionStarted {
            model: pipeline.model().to_string(),
        });
        Self {
            pipeline: Arc::new(pipeline),
            gallery,
            events,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn gallery(&self) -> &SharedGallery {
        &self.gallery
    }

    pub fn pipeline(&self) -> &Pipeline<T> {
        &self.pipeline
    }

    /// Queues one generation per `@`-separated prompt segment and returns
    /// the created item ids, newest batch sharing one timestamp.
    pub fn queue_generate(&self, raw_prompt: &str) -> Vec<String> {
        let prompts: Vec<String> = raw_prompt
            .split('@')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        let ids = batch_ids(prompts.len());
        let mut queued = Vec::with_capacity(prompts.len());

        for (id, prompt) in ids.into_iter().zip(prompts) {
            let mut item = GalleryItem::pending(&id, truncate_text(&prompt, NAME_PREVIEW_CHARS));
            item.prompt = Some(prompt.clone());
            self.gallery.with(|store| store.create(item));
            self.spawn_task(&id, "generate", move |pipeline| {
                let output = pipeline.generate_vector_image(&prompt)?;
                Ok(ItemPayload::Vector {
                    vector_content: output.vector_content,
                    raster_cache: Some(output.raster_content),
                })
            });
            queued.push(id);
        }
        queued
    }

    /// Re-enters an existing vector item as pending and refines it with a
    /// user instruction. Returns false when the item cannot be improved.
    pub fn queue_improve(&self, id: &str, instruction: &str) -> bool {
        let Some(item) = self.gallery.get(id) else {
            return false;
        };
        if item.status != ItemStatus::Completed {
            return false;
        }
        let Some(source) = item
            .payload
            .as_ref()
            .and_then(ItemPayload::vector_content)
            .map(str::to_string)
        else {
            return false;
        };

        self.gallery
            .with(|store| store.begin_rework(id, instruction, None));
        let instruction = instruction.to_string();
        self.spawn_task(id, "improve", move |pipeline| {
            let output = pipeline.improve_vector_image(&source, &instruction)?;
            Ok(ItemPayload::Vector {
                vector_content: output.vector_content,
                raster_cache: Some(output.raster_content),
            })
        });
        true
    }

    /// Builds a 3D scene from a completed vector item into a new gallery
    /// item named after the source.
    pub fn queue_build_scene(&self, source_id: &str, prompt: &str) -> Option<String> {
        let source = self.gallery.get(source_id)?;
        if source.status != ItemStatus::Completed {
            return None;
        }
        let vector = source
            .payload
            .as_ref()
            .and_then(ItemPayload::vector_content)
            .map(str::to_string)?;

        let id = batch_ids(1).remove(0);
        let mut item = GalleryItem::pending(&id, format!("{} (3D)", source.name));
        item.prompt = Some(prompt.to_string());
        item.work = Some(PendingWork {
            source_vector: vector.clone(),
            prompt: prompt.to_string(),
            model: self.pipeline.model().to_string(),
            origin_id: Some(source_id.to_string()),
        });
        self.gallery.with(|store| store.create(item));

        let prompt = prompt.to_string();
        let origin = source_id.to_string();
        self.spawn_task(&id, "build_scene", move |pipeline| {
            let output = pipeline.build_scene_from_vector(&vector, &prompt)?;
            Ok(ItemPayload::Scene {
                scene_data: output.scene_data,
                scene_description: output.scene_description,
                source_prompt: Some(prompt.clone()),
                origin_source_item_id: Some(origin.clone()),
            })
        });
        Some(id)
    }

    /// Edits a scene item by regenerating it from its origin drawing under
    /// a new instruction. Fails when the origin item no longer carries the
    /// source markup.
    pub fn queue_edit_scene(&self, id: &str, new_prompt: &str) -> bool {
        let Some(item) = self.gallery.get(id) else {
            return false;
        };
        let Some(ItemPayload::Scene {
            scene_description,
            origin_source_item_id,
            ..
        }) = item.payload
        else {
            return false;
        };
        let Some(vector) = origin_source_item_id
            .as_deref()
            .and_then(|origin| self.gallery.get(origin))
            .and_then(|origin| {
                origin
                    .payload
                    .as_ref()
                    .and_then(ItemPayload::vector_content)
                    .map(str::to_string)
            })
        else {
            return false;
        };

        let work = PendingWork {
            source_vector: vector.clone(),
            prompt: new_prompt.to_string(),
            model: self.pipeline.model().to_string(),
            origin_id: origin_source_item_id.clone(),
        };
        self.gallery
            .with(|store| store.begin_rework(id, new_prompt, Some(work)));

        let prompt = new_prompt.to_string();
        let previous = scene_description;
        self.spawn_task(id, "edit_scene", move |pipeline| {
            let output = pipeline.edit_scene(Some(&previous), &vector, &prompt)?;
            Ok(ItemPayload::Scene {
                scene_data: output.scene_data,
                scene_description: output.scene_description,
                source_prompt: Some(prompt.clone()),
                origin_source_item_id: origin_source_item_id.clone(),
            })
        });
        true
    }

    /// Blocks until every queued task has resolved its item.
    pub fn wait_idle(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self
                .handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
    }

    fn spawn_task(
        &self,
        id: &str,
        action: &'static str,
        task: impl FnOnce(&Pipeline<T>) -> Result<ItemPayload, PipelineError> + Send + 'static,
    ) {
        let pipeline = Arc::clone(&self.pipeline);
        let gallery = self.gallery.clone();
        let events = self.events.clone();
        let id = id.to_string();

        let _ = events.record(SessionEvent::ItemQueued {
            item_id: id.clone(),
            action: action.to_string(),
        });
        let handle = thread::spawn(move || match task(&pipeline) {
            Ok(payload) => {
                gallery.with(|store| store.complete(&id, payload));
                let _ = events.record(SessionEvent::ItemCompleted {
                    item_id: id.clone(),
                    action: action.to_string(),
                });
            }
            Err(err) => {
                gallery.with(|store| store.fail(&id, &err.gallery_label()));
                let _ = events.record(SessionEvent::ItemError {
                    item_id: id.clone(),
                    action: action.to_string(),
                    error: err.to_string(),
                });
            }
        });
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }
}
