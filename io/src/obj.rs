//! OBJ (Wavefront Object) I/O
//!
//! Only geometry is read: `v` positions and `f` polygons. Texture and normal
//! references in faces (`v/vt/vn`) are accepted and ignored.

use nalgebra::Point3;
use scan_3d::TriangleMesh;
use scan_core::{Error, Result};
use std::io::{BufRead, Write};

/// Mesh data structure for OBJ with faces (supports polygons, not just triangles)
#[derive(Debug, Clone, Default)]
pub struct ObjMesh {
    pub vertices: Vec<Point3<f32>>,
    pub faces: Vec<Vec<usize>>, // 0-based
}

impl ObjMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert to TriangleMesh (triangulates n-gons using fan triangulation)
    pub fn to_triangle_mesh(&self) -> TriangleMesh {
        let triangles = self
            .faces
            .iter()
            .filter(|face| face.len() >= 3)
            .flat_map(|face| (1..face.len() - 1).map(move |i| [face[0], face[i], face[i + 1]]))
            .collect();
        TriangleMesh::with_vertices_and_faces(self.vertices.clone(), triangles)
    }

    /// Read a mesh with faces from OBJ.
    ///
    /// Indices are 1-based; negative indices count back from the last vertex
    /// read so far.
    pub fn read<R: BufRead>(reader: R) -> Result<Self> {
        let mut mesh = Self::new();

        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            let mut parts = line.split_whitespace();
            match parts.next() {
                Some("v") => {
                    let coords: Vec<f32> = parts
                        .take(3)
                        .map(|p| {
                            p.parse().map_err(|_| {
                                Error::ParseError(format!(
                                    "line {}: invalid coordinate '{p}'",
                                    number + 1
                                ))
                            })
                        })
                        .collect::<Result<_>>()?;
                    if coords.len() != 3 {
                        return Err(Error::ParseError(format!(
                            "line {}: vertex needs three coordinates",
                            number + 1
                        )));
                    }
                    mesh.vertices.push(Point3::new(coords[0], coords[1], coords[2]));
                }
                Some("f") => {
                    let count = mesh.vertices.len() as i64;
                    let face = parts
                        .map(|p| {
                            let index = p.split('/').next().unwrap_or(p);
                            let index: i64 = index.parse().map_err(|_| {
                                Error::ParseError(format!(
                                    "line {}: invalid face index '{p}'",
                                    number + 1
                                ))
                            })?;
                            let resolved = if index < 0 { count + index } else { index - 1 };
                            if !(0..count).contains(&resolved) {
                                return Err(Error::ParseError(format!(
                                    "line {}: face index {index} out of range",
                                    number + 1
                                )));
                            }
                            Ok(resolved as usize)
                        })
                        .collect::<Result<Vec<_>>>()?;
                    mesh.faces.push(face);
                }
                _ => {}
            }
        }

        Ok(mesh)
    }

    /// Write mesh to OBJ format
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        for v in &self.vertices {
            writeln!(writer, "v {} {} {}", v.x, v.y, v.z)?;
        }

        for face in &self.faces {
            write!(writer, "f")?;
            for &idx in face {
                write!(writer, " {}", idx + 1)?;
            }
            writeln!(writer)?;
        }

        Ok(())
    }
}

impl From<&TriangleMesh> for ObjMesh {
    fn from(mesh: &TriangleMesh) -> Self {
        Self {
            vertices: mesh.vertices.clone(),
            faces: mesh.faces.iter().map(|f| f.to_vec()).collect(),
        }
    }
}

/// Read an OBJ file as a triangle mesh.
pub fn read_obj_mesh<R: BufRead>(reader: R) -> Result<TriangleMesh> {
    Ok(ObjMesh::read(reader)?.to_triangle_mesh())
}

pub fn write_obj_mesh<W: Write>(writer: &mut W, mesh: &TriangleMesh) -> Result<()> {
    ObjMesh::from(mesh).write(writer)
}
