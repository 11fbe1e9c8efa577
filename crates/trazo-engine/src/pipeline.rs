use serde_json::Value;
use trazo_contracts::scene::SceneDescription;

use crate::client::{extract_vector_markup, GenerativeClient, Transport};
use crate::error::PipelineError;
use crate::prompts;
use crate::raster;
use crate::scene::compile_scene;
use crate::svg;

/// Result of a 2D generation or improvement pass.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorOutput {
    pub vector_content: String,
    pub raster_content: String,
}

/// Result of a 3D build: the exported scene plus the declarative graph it
/// was built from, retained so the build can be repeated or edited later.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneOutput {
    pub scene_data: Value,
    pub scene_description: SceneDescription,
}

/// Chained generation stages over a [`GenerativeClient`]. Every exposed
/// operation is a fixed call sequence; the first failing stage aborts the
/// whole operation with its own error.
pub struct Pipeline<T: Transport> {
    client: GenerativeClient<T>,
    model: String,
}

impl<T: Transport> Pipeline<T> {
    pub fn new(client: GenerativeClient<T>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn client(&self) -> &GenerativeClient<T> {
        &self.client
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Classifies the request into a category label. The reply is used
    /// verbatim after trimming and lowercasing; an unrecognized label is
    /// not an error, it falls through to the default template downstream.
    pub fn classify_prompt(&self, user_prompt: &str) -> Result<String, PipelineError> {
        let reply = self
            .client
            .call_text(&self.model, &prompts::classification_prompt(user_prompt))?;
        Ok(reply.trim().to_lowercase())
    }

    /// First drafting pass, guided by the category's template.
    pub fn draft_vector(&self, label: &str, user_prompt: &str) -> Result<String, PipelineError> {
        let reply = self
            .client
            .call_structured(&self.model, &prompts::draft_prompt(label, user_prompt))?;
        vector_field(&reply, "draft")
    }

    /// Refinement pass over existing markup with the given instruction.
    pub fn detail_pass(
        &self,
        vector_markup: &str,
        instruction: &str,
    ) -> Result<String, PipelineError> {
        let reply = self.client.call_structured(
            &self.model,
            &prompts::refinement_prompt(vector_markup, instruction),
        )?;
        vector_field(&reply, "detail")
    }

    /// Full 2D generation: classify, draft, refine, rasterize.
    pub fn generate_vector_image(&self, user_prompt: &str) -> Result<VectorOutput, PipelineError> {
        let label = self.classify_prompt(user_prompt)?;
        let draft = self.draft_vector(&label, user_prompt)?;
        let refined = self.detail_pass(&draft, prompts::REFINEMENT_INSTRUCTION)?;
        self.finish_vector(refined)
    }

    /// User-directed improvement of existing markup: refine, rasterize.
    pub fn improve_vector_image(
        &self,
        vector_markup: &str,
        instruction: &str,
    ) -> Result<VectorOutput, PipelineError> {
        let refined = self.detail_pass(vector_markup, instruction)?;
        self.finish_vector(refined)
    }

    fn finish_vector(&self, vector_content: String) -> Result<VectorOutput, PipelineError> {
        let raster_content = raster::rasterize(&vector_content)?;
        Ok(VectorOutput {
            vector_content,
            raster_content,
        })
    }

    /// Derives a 3D scene from a 2D drawing: best-effort structure
    /// analysis, one structured scene-graph call, then a local build.
    pub fn build_scene_from_vector(
        &self,
        vector_markup: &str,
        user_prompt: &str,
    ) -> Result<SceneOutput, PipelineError> {
        let structure = svg::analyze(vector_markup);
        let reply = self.client.call_structured(
            &self.model,
            &prompts::scene_prompt(user_prompt, vector_markup, structure.as_ref()),
        )?;
        let description = SceneDescription::from_value(reply).map_err(PipelineError::InvalidScene)?;
        let compiled = compile_scene(&description, structure.as_ref())?;
        Ok(SceneOutput {
            scene_data: compiled.embedded_document(),
            scene_description: description,
        })
    }

    /// Edits a 3D scene by fully regenerating it from the original source
    /// drawing under the new instruction; the previous description is
    /// accepted for symmetry but not consulted.
    pub fn edit_scene(
        &self,
        _previous: Option<&SceneDescription>,
        original_vector_markup: &str,
        new_user_prompt: &str,
    ) -> Result<SceneOutput, PipelineError> {
        self.build_scene_from_vector(original_vector_markup, new_user_prompt)
    }
}

/// Reads the vector-markup field out of a structured reply.
fn vector_field(reply: &Value, stage: &'static str) -> Result<String, PipelineError> {
    let raw = reply
        .get("svg")
        .or_else(|| reply.get("svgContent"))
        .or_else(|| reply.get("vectorContent"))
        .and_then(Value::as_str)
        .ok_or(PipelineError::MissingVector { stage })?;
    let markup = extract_vector_markup(raw);
    if markup.trim_start().starts_with("<svg") {
        Ok(markup)
    } else {
        Err(PipelineError::MissingVector { stage })
    }
}
