use geo_types::Coord;

/// Axis-aligned rectangle in global (EPSG:3857) coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rectangle {
    pub min: Coord<f64>,
    pub max: Coord<f64>,
}

impl Rectangle {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min: Coord { x: min_x, y: min_y },
            max: Coord { x: max_x, y: max_y },
        }
    }

    /// An inverted rectangle that any `extend` call will replace.
    pub fn empty() -> Self {
        Self::new(f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY)
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    pub fn extend(&mut self, x: f64, y: f64) {
        self.min.x = self.min.x.min(x);
        self.min.y = self.min.y.min(y);
        self.max.x = self.max.x.max(x);
        self.max.y = self.max.y.max(y);
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min.x && x <= self.max.x && y >= self.min.y && y <= self.max.y
    }

    pub fn contains_rect(&self, other: &Rectangle) -> bool {
        self.contains_point(other.min.x, other.min.y) && self.contains_point(other.max.x, other.max.y)
    }

    pub fn intersects(&self, other: &Rectangle) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }
}

/// A query polygon: a single ring with its bounding box computed once.
#[derive(Debug, Clone)]
pub struct Polygon {
    vertices: Vec<Coord<f64>>,
    bbox: Rectangle,
}

impl Polygon {
    pub fn new(vertices: Vec<Coord<f64>>) -> Self {
        let mut bbox = Rectangle::empty();
        for vertex in &vertices {
            bbox.extend(vertex.x, vertex.y);
        }
        Self { vertices, bbox }
    }

    pub fn from_xy(points: &[(f64, f64)]) -> Self {
        Self::new(points.iter().map(|&(x, y)| Coord { x, y }).collect())
    }

    pub fn vertices(&self) -> &[Coord<f64>] {
        &self.vertices
    }

    pub fn bbox(&self) -> &Rectangle {
        &self.bbox
    }

    /// Even-odd ray crossing test. A closing vertex equal to the first one
    /// is harmless since the degenerate edge never crosses the ray.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        if self.vertices.len() < 3 || !self.bbox.contains_point(x, y) {
            return false;
        }
        let mut inside = false;
        let mut j = self.vertices.len() - 1;
        for i in 0..self.vertices.len() {
            let vi = self.vertices[i];
            let vj = self.vertices[j];
            if (vi.y > y) != (vj.y > y) && x < (vj.x - vi.x) * (y - vi.y) / (vj.y - vi.y) + vi.x {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}
