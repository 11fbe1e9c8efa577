use resvg::usvg;

/// Best-effort structural summary of a vector drawing, fed into the scene
/// prompt. Analysis failure degrades to `None`, never an error.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorStructure {
    pub shape_count: usize,
    pub shapes: Vec<ShapeInfo>,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeInfo {
    pub id: Option<String>,
    pub color: Option<String>,
}

/// Parses the markup and summarizes its drawable shapes. Gradients and
/// patterns are treated as colorless.
pub fn analyze(vector_markup: &str) -> Option<VectorStructure> {
    let tree = crate::raster::parse_tree(vector_markup).ok()?;
    let mut shapes = Vec::new();
    collect_shapes(tree.root(), &mut shapes);
    Some(VectorStructure {
        shape_count: shapes.len(),
        shapes,
        width: tree.size().width(),
        height: tree.size().height(),
    })
}

fn collect_shapes(group: &usvg::Group, shapes: &mut Vec<ShapeInfo>) {
    for node in group.children() {
        match node {
            usvg::Node::Group(child) => collect_shapes(child, shapes),
            usvg::Node::Path(path) => {
                let id = Some(path.id().to_string()).filter(|id| !id.is_empty());
                let color = path.fill().and_then(|fill| match fill.paint() {
                    usvg::Paint::Color(color) => Some(format!(
                        "#{:02x}{:02x}{:02x}",
                        color.red, color.green, color.blue
                    )),
                    _ => None,
                });
                shapes.push(ShapeInfo { id, color });
            }
            _ => {}
        }
    }
}
