use indexmap::IndexMap;
use std::sync::OnceLock;

use crate::svg::VectorStructure;

/// Category label the classifier falls back to when the reply matches no
/// known category.
pub const DEFAULT_CATEGORY: &str = "object";

/// Instruction for the automatic refinement pass; fixed, never
/// user-supplied.
pub const REFINEMENT_INSTRUCTION: &str = "Improve the connections between strokes and \
naturalize the drawing with organic, realistic lines. Keep the same subject, composition \
and palette.";

static TEMPLATES: OnceLock<IndexMap<&'static str, &'static str>> = OnceLock::new();

/// Per-category drawing guidance, keyed by classifier label. Order matters
/// only for listing; lookup is by exact label.
pub fn category_templates() -> &'static IndexMap<&'static str, &'static str> {
    TEMPLATES.get_or_init(|| {
        IndexMap::from([
            (
                "character",
                "Draw a stylized person or figure with a clear silhouette, simple facial \
                 features and distinct limbs.",
            ),
            (
                "animal",
                "Draw the animal in profile or three-quarter view with recognizable anatomy \
                 and a friendly, clean outline.",
            ),
            (
                "tree",
                "Draw a tree with a visible trunk and an organic crown; vary branch thickness \
                 and avoid perfect symmetry.",
            ),
            (
                "plant",
                "Draw the plant with layered leaves or petals and natural curvature in the \
                 stems.",
            ),
            (
                "car",
                "Draw the vehicle in side view with proportional wheels, window cutouts and \
                 a grounded shadow line.",
            ),
            (
                "bicycle",
                "Draw the bicycle in side view with two equal wheels, a visible frame triangle, \
                 handlebar and saddle.",
            ),
            (
                "motorcycle",
                "Draw the motorcycle in side view with a heavier body mass over the rear wheel \
                 and a clear handlebar.",
            ),
            (
                "airplane",
                "Draw the airplane with a fuselage, swept wings and a tail fin, seen slightly \
                 from the side.",
            ),
            (
                "helicopter",
                "Draw the helicopter with a cabin, tail boom, main rotor and tail rotor.",
            ),
            (
                "boat",
                "Draw the boat floating on a simple waterline with a visible hull and \
                 superstructure or sail.",
            ),
            (
                "building",
                "Draw the building front-on with aligned windows, a clear entrance and a \
                 distinct roofline.",
            ),
            (
                "object",
                "Draw the object centered, at a readable scale, with clean outlines and flat \
                 color fills.",
            ),
            (
                "landscape",
                "Draw the scene with layered depth planes, a horizon line and a simple sky.",
            ),
            (
                "logo",
                "Draw a bold, flat, centered emblem that stays readable at small sizes.",
            ),
            (
                "abstract",
                "Draw a balanced abstract composition of overlapping shapes with a limited \
                 palette.",
            ),
        ])
    })
}

/// Guidance for a label, falling back to the default category's template
/// when the label is unknown.
pub fn template_for(label: &str) -> &'static str {
    let templates = category_templates();
    templates
        .get(label)
        .or_else(|| templates.get(DEFAULT_CATEGORY))
        .copied()
        .unwrap_or("")
}

/// Prompt asking the model to pick one category label for the user prompt.
pub fn classification_prompt(user_prompt: &str) -> String {
    let labels: Vec<&str> = category_templates().keys().copied().collect();
    format!(
        "Classify the following drawing request into exactly one of these categories: {}. \
         Reply with the category name only, lowercase, no punctuation.\n\nRequest: {}",
        labels.join(", "),
        user_prompt
    )
}

/// Prompt for the first drafting pass, combining category guidance with
/// the user's request.
pub fn draft_prompt(label: &str, user_prompt: &str) -> String {
    format!(
        "Create an SVG drawing of: {user_prompt}\n\n{}\n\nUse a square viewBox \
         (0 0 1024 1024), only path, rect, circle, ellipse, line and polygon elements, \
         flat fills, and no external references. Reply with JSON of the form \
         {{\"svg\": \"<svg ...>...</svg>\"}} and nothing else.",
        template_for(label)
    )
}

/// Prompt for a refinement pass over an existing drawing; the instruction
/// is either [`REFINEMENT_INSTRUCTION`] or a user-supplied one.
pub fn refinement_prompt(vector_markup: &str, instruction: &str) -> String {
    format!(
        "{instruction}\n\nCurrent SVG:\n{vector_markup}\n\nReply with JSON of the form \
         {{\"svg\": \"<svg ...>...</svg>\"}} and nothing else."
    )
}

/// Prompt asking for a declarative scene graph built from a 2D drawing.
/// The structure summary is best effort; when analysis failed the prompt
/// simply omits it.
pub fn scene_prompt(
    user_prompt: &str,
    vector_markup: &str,
    structure: Option<&VectorStructure>,
) -> String {
    let mut prompt = format!(
        "Design a simple 3D scene for: {user_prompt}\n\nReply with JSON of the form \
         {{\"objects\": [...]}} where each object has \"type\" (one of \"extrude_svg\", \
         \"sphere\", \"box\", \"cylinder\", \"cone\"), \"material\" ({{\"color\", \
         \"metalness\", \"roughness\"}}), \"geometry\" (dimensions for its type), \
         \"position\" ({{\"x\", \"y\", \"z\"}}) and optional \"scale\". Reply with the \
         JSON only."
    );
    if let Some(structure) = structure {
        prompt.push_str(&format!(
            "\n\nThe source drawing is {:.0}x{:.0} with {} shapes",
            structure.width, structure.height, structure.shape_count
        ));
        let colors: Vec<&str> = structure
            .shapes
            .iter()
            .filter_map(|shape| shape.color.as_deref())
            .collect();
        if !colors.is_empty() {
            prompt.push_str(&format!(" using colors {}", colors.join(", ")));
        }
        prompt.push('.');
    }
    prompt.push_str("\n\nSource SVG:\n");
    prompt.push_str(vector_markup);
    prompt
}
