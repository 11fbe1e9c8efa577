use std::f32::consts::PI;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Map, Value};
use trazo_contracts::scene::{PrimitiveKind, SceneDescription, SceneObject};

use crate::error::PipelineError;
use crate::svg::VectorStructure;

const GLB_MAGIC: u32 = 0x4654_6C67;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

/// Indexed triangle list in local object space.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

/// Output of the local scene compiler: a glTF 2.0 document plus the
/// geometry buffer it references.
#[derive(Debug, Clone)]
pub struct CompiledScene {
    document: Value,
    binary: Vec<u8>,
    pub skipped_objects: usize,
}

impl CompiledScene {
    /// Self-contained glTF JSON with the buffer embedded as a data URI,
    /// the form retained on gallery items.
    pub fn embedded_document(&self) -> Value {
        let mut document = self.document.clone();
        if let Some(buffer) = document
            .get_mut("buffers")
            .and_then(Value::as_array_mut)
            .and_then(|buffers| buffers.first_mut())
        {
            buffer["uri"] = Value::String(format!(
                "data:application/octet-stream;base64,{}",
                BASE64.encode(&self.binary)
            ));
        }
        document
    }

    /// Binary glTF container for saving to disk.
    pub fn to_glb(&self) -> Vec<u8> {
        let mut json_bytes = self.document.to_string().into_bytes();
        while json_bytes.len() % 4 != 0 {
            json_bytes.push(b' ');
        }
        let mut bin_bytes = self.binary.clone();
        while bin_bytes.len() % 4 != 0 {
            bin_bytes.push(0);
        }

        let total = 12 + 8 + json_bytes.len() + 8 + bin_bytes.len();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&(json_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
        out.extend_from_slice(&json_bytes);
        out.extend_from_slice(&(bin_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        out.extend_from_slice(&bin_bytes);
        out
    }
}

/// Builds a glTF scene from a declarative description. Objects with an
/// unrecognized primitive kind are skipped; a description yielding no
/// buildable object at all is invalid.
pub fn compile_scene(
    description: &SceneDescription,
    source: Option<&VectorStructure>,
) -> Result<CompiledScene, PipelineError> {
    let mut builder = GltfBuilder::default();
    let mut skipped = 0usize;
    let mut centroid = [0.0f64; 3];
    let mut built = 0usize;

    for object in &description.objects {
        let Some(mesh) = mesh_for(object, source) else {
            skipped += 1;
            continue;
        };
        builder.push_object(object, &mesh);
        centroid[0] += object.position.x;
        centroid[1] += object.position.y;
        centroid[2] += object.position.z;
        built += 1;
    }
    if built == 0 {
        return Err(PipelineError::InvalidScene(
            "description yields no buildable objects".to_string(),
        ));
    }
    for value in &mut centroid {
        *value /= built as f64;
    }

    Ok(CompiledScene {
        document: builder.finish(centroid),
        binary: builder.binary,
        skipped_objects: skipped,
    })
}

fn mesh_for(object: &SceneObject, source: Option<&VectorStructure>) -> Option<Mesh> {
    let geometry = &object.geometry;
    match object.kind {
        PrimitiveKind::Sphere => {
            let radius = geometry_value(geometry, "radius", 100.0);
            Some(sphere_mesh(radius, 32))
        }
        PrimitiveKind::Box => Some(box_mesh(
            geometry_value(geometry, "width", 100.0),
            geometry_value(geometry, "height", 100.0),
            geometry_value(geometry, "depth", 100.0),
        )),
        PrimitiveKind::Cylinder => Some(frustum_mesh(
            geometry_value(geometry, "radiusTop", 50.0),
            geometry_value(geometry, "radiusBottom", 50.0),
            geometry_value(geometry, "height", 100.0),
            geometry_value(geometry, "radialSegments", 32.0) as u32,
        )),
        PrimitiveKind::Cone => Some(frustum_mesh(
            0.0,
            geometry_value(geometry, "radius", 5.0),
            geometry_value(geometry, "height", 10.0),
            geometry_value(geometry, "radialSegments", 8.0) as u32,
        )),
        // A real outline extrusion needs path tessellation; a slab with
        // the source drawing's footprint keeps proportions readable.
        PrimitiveKind::ExtrudeSvg => {
            let (width, height) = source
                .map(|structure| (structure.width, structure.height))
                .unwrap_or((100.0, 100.0));
            let depth = geometry_value(geometry, "extrusionDepth", 20.0);
            Some(box_mesh(width, height, depth))
        }
        PrimitiveKind::Unknown => None,
    }
}

fn geometry_value(geometry: &Map<String, Value>, key: &str, default: f64) -> f32 {
    geometry
        .get(key)
        .and_then(Value::as_f64)
        .unwrap_or(default) as f32
}

pub fn box_mesh(width: f32, height: f32, depth: f32) -> Mesh {
    let (hw, hh, hd) = (width / 2.0, height / 2.0, depth / 2.0);
    let corners = [
        [-hw, -hh, -hd],
        [hw, -hh, -hd],
        [hw, hh, -hd],
        [-hw, hh, -hd],
        [-hw, -hh, hd],
        [hw, -hh, hd],
        [hw, hh, hd],
        [-hw, hh, hd],
    ];
    let faces: [[usize; 4]; 6] = [
        [0, 3, 2, 1],
        [4, 5, 6, 7],
        [0, 1, 5, 4],
        [2, 3, 7, 6],
        [1, 2, 6, 5],
        [0, 4, 7, 3],
    ];
    let mut positions = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for face in faces {
        let base = positions.len() as u32;
        for corner in face {
            positions.push(corners[corner]);
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    Mesh { positions, indices }
}

pub fn sphere_mesh(radius: f32, segments: u32) -> Mesh {
    let segments = segments.max(3);
    let rings = segments / 2;
    let mut positions = Vec::new();
    let mut indices = Vec::new();
    for ring in 0..=rings {
        let phi = PI * ring as f32 / rings as f32;
        for segment in 0..=segments {
            let theta = 2.0 * PI * segment as f32 / segments as f32;
            positions.push([
                radius * phi.sin() * theta.cos(),
                radius * phi.cos(),
                radius * phi.sin() * theta.sin(),
            ]);
        }
    }
    let stride = segments + 1;
    for ring in 0..rings {
        for segment in 0..segments {
            let a = ring * stride + segment;
            let b = a + stride;
            indices.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
        }
    }
    Mesh { positions, indices }
}

/// Capped cylinder when both radii are positive; a cone when the top
/// radius is zero.
pub fn frustum_mesh(radius_top: f32, radius_bottom: f32, height: f32, segments: u32) -> Mesh {
    let segments = segments.max(3);
    let half = height / 2.0;
    let mut positions = Vec::new();
    let mut indices = Vec::new();

    for segment in 0..=segments {
        let theta = 2.0 * PI * segment as f32 / segments as f32;
        let (sin, cos) = theta.sin_cos();
        positions.push([radius_top * cos, half, radius_top * sin]);
        positions.push([radius_bottom * cos, -half, radius_bottom * sin]);
    }
    for segment in 0..segments {
        let top_a = segment * 2;
        let bottom_a = top_a + 1;
        let top_b = top_a + 2;
        let bottom_b = top_a + 3;
        indices.extend_from_slice(&[top_a, bottom_a, top_b, top_b, bottom_a, bottom_b]);
    }

    let top_center = positions.len() as u32;
    positions.push([0.0, half, 0.0]);
    let bottom_center = positions.len() as u32;
    positions.push([0.0, -half, 0.0]);
    for segment in 0..segments {
        let top_a = segment * 2;
        let bottom_a = top_a + 1;
        if radius_top > 0.0 {
            indices.extend_from_slice(&[top_center, top_a + 2, top_a]);
        }
        indices.extend_from_slice(&[bottom_center, bottom_a, bottom_a + 2]);
    }
    Mesh { positions, indices }
}

/// Accumulates meshes, materials and nodes into one glTF document with a
/// single geometry buffer.
#[derive(Default)]
struct GltfBuilder {
    binary: Vec<u8>,
    buffer_views: Vec<Value>,
    accessors: Vec<Value>,
    meshes: Vec<Value>,
    materials: Vec<Value>,
    nodes: Vec<Value>,
}

impl GltfBuilder {
    fn push_object(&mut self, object: &SceneObject, mesh: &Mesh) {
        let position_accessor = self.push_positions(&mesh.positions);
        let index_accessor = self.push_indices(&mesh.indices);
        let material_index = self.push_material(object);

        self.meshes.push(json!({
            "primitives": [{
                "attributes": { "POSITION": position_accessor },
                "indices": index_accessor,
                "material": material_index,
            }]
        }));

        let mut node = Map::new();
        node.insert("mesh".to_string(), json!(self.meshes.len() - 1));
        node.insert(
            "translation".to_string(),
            json!([
                object.position.x as f32,
                object.position.y as f32,
                object.position.z as f32
            ]),
        );
        if let Some(scale) = object.scale {
            node.insert(
                "scale".to_string(),
                json!([scale.x as f32, scale.y as f32, scale.z as f32]),
            );
        }
        self.nodes.push(Value::Object(node));
    }

    fn push_positions(&mut self, positions: &[[f32; 3]]) -> usize {
        let offset = self.binary.len();
        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];
        for position in positions {
            for axis in 0..3 {
                min[axis] = min[axis].min(position[axis]);
                max[axis] = max[axis].max(position[axis]);
                self.binary
                    .extend_from_slice(&position[axis].to_le_bytes());
            }
        }
        self.buffer_views.push(json!({
            "buffer": 0,
            "byteOffset": offset,
            "byteLength": self.binary.len() - offset,
        }));
        self.accessors.push(json!({
            "bufferView": self.buffer_views.len() - 1,
            "componentType": 5126,
            "count": positions.len(),
            "type": "VEC3",
            "min": min,
            "max": max,
        }));
        self.accessors.len() - 1
    }

    fn push_indices(&mut self, indices: &[u32]) -> usize {
        let offset = self.binary.len();
        for index in indices {
            self.binary.extend_from_slice(&index.to_le_bytes());
        }
        self.buffer_views.push(json!({
            "buffer": 0,
            "byteOffset": offset,
            "byteLength": self.binary.len() - offset,
        }));
        self.accessors.push(json!({
            "bufferView": self.buffer_views.len() - 1,
            "componentType": 5125,
            "count": indices.len(),
            "type": "SCALAR",
        }));
        self.accessors.len() - 1
    }

    fn push_material(&mut self, object: &SceneObject) -> usize {
        let [red, green, blue] = object
            .material
            .color
            .as_deref()
            .and_then(parse_hex_color)
            .unwrap_or([0.8, 0.8, 0.8]);
        self.materials.push(json!({
            "pbrMetallicRoughness": {
                "baseColorFactor": [red, green, blue, 1.0],
                "metallicFactor": object.material.metalness.unwrap_or(0.0),
                "roughnessFactor": object.material.roughness.unwrap_or(1.0),
            }
        }));
        self.materials.len() - 1
    }

    fn finish(&self, centroid: [f64; 3]) -> Value {
        let mut nodes = self.nodes.clone();
        let children: Vec<usize> = (0..nodes.len()).collect();
        // Root node recenters the group at the origin.
        nodes.push(json!({
            "children": children,
            "translation": [
                -centroid[0] as f32,
                -centroid[1] as f32,
                -centroid[2] as f32
            ],
        }));
        json!({
            "asset": { "version": "2.0", "generator": "trazo" },
            "scene": 0,
            "scenes": [{ "nodes": [nodes.len() - 1] }],
            "nodes": nodes,
            "meshes": self.meshes,
            "materials": self.materials,
            "accessors": self.accessors,
            "bufferViews": self.buffer_views,
            "buffers": [{ "byteLength": self.binary.len() }],
        })
    }
}

/// Rebuilds a GLB container from a self-contained document produced by
/// [`CompiledScene::embedded_document`].
pub fn glb_from_document(document: &Value) -> Option<Vec<u8>> {
    let uri = document
        .pointer("/buffers/0/uri")
        .and_then(Value::as_str)?;
    let binary = BASE64.decode(uri.split_once(";base64,")?.1.as_bytes()).ok()?;
    let mut stripped = document.clone();
    if let Some(buffer) = stripped
        .get_mut("buffers")
        .and_then(Value::as_array_mut)
        .and_then(|buffers| buffers.first_mut())
        .and_then(Value::as_object_mut)
    {
        buffer.remove("uri");
    }
    let compiled = CompiledScene {
        document: stripped,
        binary,
        skipped_objects: 0,
    };
    Some(compiled.to_glb())
}

fn parse_hex_color(color: &str) -> Option<[f64; 3]> {
    let hex = color.trim().strip_prefix('#')?;
    // Model replies are untrusted; walk chars so multi-byte input cannot
    // land inside a slice boundary.
    let digits: Vec<char> = hex.chars().collect();
    let expanded: Vec<char> = match digits.len() {
        3 => digits.iter().flat_map(|&c| [c, c]).collect(),
        6 => digits,
        _ => return None,
    };
    let channel = |pair: &[char]| {
        let text: String = pair.iter().collect();
        u8::from_str_radix(&text, 16)
            .ok()
            .map(|value| value as f64 / 255.0)
    };
    Some([
        channel(&expanded[0..2])?,
        channel(&expanded[2..4])?,
        channel(&expanded[4..6])?,
    ])
}
