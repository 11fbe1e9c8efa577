use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Declarative 3D scene graph returned by the model and consumed by the
/// local scene compiler. Retained on completed 3D items so a build can be
/// repeated or edited without re-deriving it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDescription {
    pub objects: Vec<SceneObject>,
}

impl SceneDescription {
    /// Validates the raw structured reply: an `objects` array is mandatory,
    /// anything else is an invalid description.
    pub fn from_value(value: Value) -> Result<Self, String> {
        if !value
            .get("objects")
            .map(Value::is_array)
            .unwrap_or(false)
        {
            return Err("scene description has no \"objects\" array".to_string());
        }
        serde_json::from_value(value).map_err(|err| err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObject {
    #[serde(rename = "type")]
    pub kind: PrimitiveKind,
    #[serde(default)]
    pub material: MaterialSpec,
    /// Loose per-primitive parameters (`radius`, `width`, `extrusionDepth`,
    /// ...); the compiler applies defaults for anything missing.
    #[serde(default)]
    pub geometry: Map<String, Value>,
    #[serde(default)]
    pub position: Vec3,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Vec3>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    ExtrudeSvg,
    Sphere,
    Box,
    Cylinder,
    Cone,
    /// Anything the model invented; the compiler skips it.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metalness: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roughness: Option<f64>,
}

impl Default for MaterialSpec {
    fn default() -> Self {
        Self {
            color: None,
            metalness: None,
            roughness: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Default for Vec3 {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }
}

impl Vec3 {
    pub fn splat(value: f64) -> Self {
        Self {
            x: value,
            y: value,
            z: value,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{PrimitiveKind, SceneDescription};

    #[test]
    fn parses_primitive_list_with_defaults() {
        let description = SceneDescription::from_value(json!({
            "objects": [
                {
                    "type": "cylinder",
                    "material": { "color": "#228B22", "metalness": 0.1, "roughness": 0.8 },
                    "geometry": { "radiusTop": 20, "radiusBottom": 20, "height": 1 },
                    "position": { "x": 0, "y": -50, "z": 0 },
                    "scale": { "x": 1, "y": 150, "z": 1 }
                },
                { "type": "cone", "position": { "x": 10 } }
            ]
        }))
        .unwrap();
        assert_eq!(description.objects.len(), 2);
        assert_eq!(description.objects[0].kind, PrimitiveKind::Cylinder);
        assert_eq!(description.objects[1].kind, PrimitiveKind::Cone);
        assert_eq!(description.objects[1].position.x, 10.0);
        assert_eq!(description.objects[1].position.y, 0.0);
        assert!(description.objects[1].scale.is_none());
    }

    #[test]
    fn unknown_primitive_kind_is_tolerated() {
        let description = SceneDescription::from_value(json!({
            "objects": [{ "type": "torus" }]
        }))
        .unwrap();
        assert_eq!(description.objects[0].kind, PrimitiveKind::Unknown);
    }

    #[test]
    fn missing_objects_array_is_rejected() {
        assert!(SceneDescription::from_value(json!({ "shapes": [] })).is_err());
        assert!(SceneDescription::from_value(json!({ "objects": 3 })).is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let description = SceneDescription::from_value(json!({
            "objects": [{
                "type": "sphere",
                "material": { "color": "#ff0000" },
                "geometry": { "radius": 40 },
                "position": { "x": 1, "y": 2, "z": 3 }
            }]
        }))
        .unwrap();
        let value = serde_json::to_value(&description).unwrap();
        let reparsed = SceneDescription::from_value(value).unwrap();
        assert_eq!(description, reparsed);
    }
}
