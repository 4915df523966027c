//! Ground-truth triangle meshes and area-weighted surface sampling.
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use ply_rs::parser::Parser;
use ply_rs::ply::{DefaultElement, Property};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cube::CanonicalCube;
use crate::error::{FieldError, Result};

/// Indexed triangle mesh.
#[derive(Debug, Clone)]
pub struct TriangleMesh {
    /// File the mesh was read from, used in error messages.
    pub source: PathBuf,
    pub vertices: Vec<[f32; 3]>,
    pub faces: Vec<[usize; 3]>,
}

/// Oriented surface samples with the face each one was drawn from.
#[derive(Debug, Clone, Default)]
pub struct SurfaceSamples {
    pub points: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub face_indices: Vec<usize>,
}

impl TriangleMesh {
    pub fn new(vertices: Vec<[f32; 3]>, faces: Vec<[usize; 3]>) -> Self {
        Self {
            source: PathBuf::new(),
            vertices,
            faces,
        }
    }

    /// Read an ASCII or binary PLY file.
    /// Polygonal faces are fan-triangulated.
    pub fn load_ply(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| FieldError::io(path, e))?;
        let mut reader = BufReader::new(file);
        let parser = Parser::<DefaultElement>::new();
        let ply = parser
            .read_ply(&mut reader)
            .map_err(|e| FieldError::mesh(path, e.to_string()))?;

        let vertex_elements = ply
            .payload
            .get("vertex")
            .ok_or_else(|| FieldError::mesh(path, "no vertex element"))?;

        let mut vertices = Vec::with_capacity(vertex_elements.len());
        for element in vertex_elements {
            let coord = |name: &str| {
                element
                    .get(name)
                    .and_then(scalar)
                    .ok_or_else(|| FieldError::mesh(path, format!("vertex without '{name}'")))
            };
            vertices.push([coord("x")?, coord("y")?, coord("z")?]);
        }

        let mut faces = Vec::new();
        if let Some(face_elements) = ply.payload.get("face") {
            for element in face_elements {
                let indices = element
                    .get("vertex_indices")
                    .or_else(|| element.get("vertex_index"))
                    .and_then(index_list)
                    .ok_or_else(|| FieldError::mesh(path, "face without vertex indices"))?;

                for k in 1..indices.len().saturating_sub(1) {
                    faces.push([indices[0], indices[k], indices[k + 1]]);
                }
            }
        }

        let mesh = Self {
            source: path.to_path_buf(),
            vertices,
            faces,
        };
        mesh.validate()?;
        Ok(mesh)
    }

    fn validate(&self) -> Result<()> {
        if self.faces.is_empty() {
            return Err(FieldError::mesh(&self.source, "mesh has no faces"));
        }
        let vertex_count = self.vertices.len();
        if let Some(face) = self.faces.iter().find(|f| f.iter().any(|&i| i >= vertex_count)) {
            return Err(FieldError::mesh(
                &self.source,
                format!("face {face:?} references a vertex out of {vertex_count}"),
            ));
        }
        Ok(())
    }

    fn corners(&self, face: usize) -> ([f32; 3], [f32; 3], [f32; 3]) {
        let [a, b, c] = self.faces[face];
        (self.vertices[a], self.vertices[b], self.vertices[c])
    }

    /// Unit normal of a face, zero for degenerate triangles.
    pub fn face_normal(&self, face: usize) -> [f32; 3] {
        let (a, b, c) = self.corners(face);
        let n = cross(sub(b, a), sub(c, a));
        let len = norm(n);
        if len > 1e-12 {
            [n[0] / len, n[1] / len, n[2] / len]
        } else {
            [0.0; 3]
        }
    }

    pub fn face_area(&self, face: usize) -> f32 {
        let (a, b, c) = self.corners(face);
        0.5 * norm(cross(sub(b, a), sub(c, a)))
    }

    /// Draw `count` points uniformly over the surface area, each with the
    /// normal of the face it lies on.
    pub fn sample<R: Rng>(&self, count: usize, rng: &mut R) -> Result<SurfaceSamples> {
        self.validate()?;
        let areas: Vec<f64> = (0..self.faces.len())
            .map(|face| self.face_area(face) as f64)
            .collect();
        let chooser = WeightedIndex::new(&areas)
            .map_err(|e| FieldError::mesh(&self.source, format!("cannot weight faces: {e}")))?;
        let face_normals: Vec<[f32; 3]> =
            (0..self.faces.len()).map(|face| self.face_normal(face)).collect();

        let mut samples = SurfaceSamples {
            points: Vec::with_capacity(count),
            normals: Vec::with_capacity(count),
            face_indices: Vec::with_capacity(count),
        };

        for _ in 0..count {
            let face = chooser.sample(rng);
            let (a, b, c) = self.corners(face);

            let mut u: f32 = rng.gen_range(0.0..1.0);
            let mut v: f32 = rng.gen_range(0.0..1.0);
            // Reflect into the lower triangle of the unit square.
            if u + v > 1.0 {
                u = 1.0 - u;
                v = 1.0 - v;
            }

            let ab = sub(b, a);
            let ac = sub(c, a);
            samples.points.push([
                a[0] + u * ab[0] + v * ac[0],
                a[1] + u * ab[1] + v * ac[1],
                a[2] + u * ab[2] + v * ac[2],
            ]);
            samples.normals.push(face_normals[face]);
            samples.face_indices.push(face);
        }

        Ok(samples)
    }
}

/// Sampling generator, seeded when reproducibility is requested.
pub fn sampling_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Load the mesh at `mesh_path`, sample `count` oriented points and map
/// them into the PSR canonical cube.
pub fn sample_ground_truth(
    mesh_path: &Path,
    count: usize,
    seed: Option<u64>,
) -> Result<SurfaceSamples> {
    if !mesh_path.is_file() {
        return Err(FieldError::MissingInput {
            path: mesh_path.to_path_buf(),
        });
    }
    let mesh = TriangleMesh::load_ply(mesh_path)?;
    let mut samples = mesh.sample(count, &mut sampling_rng(seed))?;
    CanonicalCube::psr().normalize_points(&mut samples.points);
    Ok(samples)
}

fn scalar(property: &Property) -> Option<f32> {
    match property {
        Property::Float(v) => Some(*v),
        Property::Double(v) => Some(*v as f32),
        Property::Int(v) => Some(*v as f32),
        Property::UInt(v) => Some(*v as f32),
        Property::Short(v) => Some(*v as f32),
        Property::UShort(v) => Some(*v as f32),
        Property::Char(v) => Some(*v as f32),
        Property::UChar(v) => Some(*v as f32),
        _ => None,
    }
}

fn index_list(property: &Property) -> Option<Vec<usize>> {
    match property {
        Property::ListInt(v) => v.iter().map(|&i| usize::try_from(i).ok()).collect(),
        Property::ListUInt(v) => Some(v.iter().map(|&i| i as usize).collect()),
        Property::ListShort(v) => v.iter().map(|&i| usize::try_from(i).ok()).collect(),
        Property::ListUShort(v) => Some(v.iter().map(|&i| i as usize).collect()),
        Property::ListChar(v) => v.iter().map(|&i| usize::try_from(i).ok()).collect(),
        Property::ListUChar(v) => Some(v.iter().map(|&i| i as usize).collect()),
        _ => None,
    }
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn norm(a: [f32; 3]) -> f32 {
    (a[0] * a[0] + a[1] * a[1] + a[2] * a[2]).sqrt()
}
