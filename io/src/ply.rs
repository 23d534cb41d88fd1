//! PLY (Polygon File Format) I/O
//!
//! Reads ASCII and binary little-endian files with arbitrary extra
//! properties; writes ASCII. Vertex colors are stored as `uchar` channels and
//! mapped to `[0, 1]` in memory.

use nalgebra::{Point3, Vector3};
use scan_3d::TriangleMesh;
use scan_core::{Error, PointCloud, Result};
use std::io::{BufRead, Read, Write};

/// Upper bound on storage reserved from a header count; larger elements grow
/// as they are read.
const MAX_RESERVE: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Ascii,
    BinaryLittleEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl ScalarType {
    fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "char" | "int8" => ScalarType::I8,
            "uchar" | "uint8" => ScalarType::U8,
            "short" | "int16" => ScalarType::I16,
            "ushort" | "uint16" => ScalarType::U16,
            "int" | "int32" => ScalarType::I32,
            "uint" | "uint32" => ScalarType::U32,
            "float" | "float32" => ScalarType::F32,
            "double" | "float64" => ScalarType::F64,
            _ => return Err(Error::ParseError(format!("unknown PLY type '{name}'"))),
        })
    }

    fn size(self) -> usize {
        match self {
            ScalarType::I8 | ScalarType::U8 => 1,
            ScalarType::I16 | ScalarType::U16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::F64 => 8,
        }
    }

    fn is_integer(self) -> bool {
        !matches!(self, ScalarType::F32 | ScalarType::F64)
    }
}

#[derive(Debug, Clone)]
enum Property {
    Scalar { name: String, ty: ScalarType },
    List { name: String, count: ScalarType, item: ScalarType },
}

impl Property {
    fn name(&self) -> &str {
        match self {
            Property::Scalar { name, .. } | Property::List { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone)]
struct Element {
    name: String,
    count: usize,
    properties: Vec<Property>,
}

#[derive(Debug)]
struct Header {
    format: Format,
    elements: Vec<Element>,
}

fn parse_header<R: BufRead>(reader: &mut R) -> Result<Header> {
    let mut line = String::new();
    let mut next_line = |line: &mut String| -> Result<()> {
        line.clear();
        if reader.read_line(line)? == 0 {
            return Err(Error::ParseError("unexpected end of file in PLY header".into()));
        }
        Ok(())
    };

    next_line(&mut line)?;
    if line.trim() != "ply" {
        return Err(Error::ParseError("missing 'ply' magic".into()));
    }

    let mut format = None;
    let mut elements: Vec<Element> = Vec::new();
    loop {
        next_line(&mut line)?;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["end_header"] => break,
            ["format", "ascii", _] => format = Some(Format::Ascii),
            ["format", "binary_little_endian", _] => format = Some(Format::BinaryLittleEndian),
            ["format", other, ..] => {
                return Err(Error::ParseError(format!("unsupported PLY format '{other}'")))
            }
            ["comment", ..] | ["obj_info", ..] | [] => {}
            ["element", name, count] => elements.push(Element {
                name: name.to_string(),
                count: count
                    .parse()
                    .map_err(|_| Error::ParseError(format!("invalid element count '{count}'")))?,
                properties: Vec::new(),
            }),
            ["property", "list", count, item, name] => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| Error::ParseError("property before any element".into()))?;
                element.properties.push(Property::List {
                    name: name.to_string(),
                    count: ScalarType::parse(count)?,
                    item: ScalarType::parse(item)?,
                });
            }
            ["property", ty, name] => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| Error::ParseError("property before any element".into()))?;
                element.properties.push(Property::Scalar {
                    name: name.to_string(),
                    ty: ScalarType::parse(ty)?,
                });
            }
            _ => {
                return Err(Error::ParseError(format!(
                    "unrecognized PLY header line '{}'",
                    line.trim()
                )))
            }
        }
    }

    let format = format.ok_or_else(|| Error::ParseError("PLY header has no format line".into()))?;
    Ok(Header { format, elements })
}

/// Source of typed values for the body of a PLY file.
trait ValueSource {
    fn next_value(&mut self, ty: ScalarType) -> Result<f64>;
}

struct AsciiSource<'a> {
    tokens: std::str::SplitWhitespace<'a>,
}

impl ValueSource for AsciiSource<'_> {
    fn next_value(&mut self, _ty: ScalarType) -> Result<f64> {
        let token = self
            .tokens
            .next()
            .ok_or_else(|| Error::ParseError("unexpected end of PLY data".into()))?;
        token
            .parse()
            .map_err(|_| Error::ParseError(format!("invalid PLY value '{token}'")))
    }
}

struct BinarySource<'a> {
    data: &'a [u8],
}

impl ValueSource for BinarySource<'_> {
    fn next_value(&mut self, ty: ScalarType) -> Result<f64> {
        let size = ty.size();
        if self.data.len() < size {
            return Err(Error::ParseError("unexpected end of PLY data".into()));
        }
        let (bytes, rest) = self.data.split_at(size);
        self.data = rest;
        let mut buf = [0u8; 8];
        buf[..size].copy_from_slice(bytes);
        Ok(match ty {
            ScalarType::I8 => i8::from_le_bytes([buf[0]]) as f64,
            ScalarType::U8 => buf[0] as f64,
            ScalarType::I16 => i16::from_le_bytes([buf[0], buf[1]]) as f64,
            ScalarType::U16 => u16::from_le_bytes([buf[0], buf[1]]) as f64,
            ScalarType::I32 => i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
            ScalarType::U32 => u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
            ScalarType::F32 => f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
            ScalarType::F64 => f64::from_le_bytes(buf),
        })
    }
}

/// Vertex attributes and polygons as stored in a PLY file.
#[derive(Debug, Default)]
struct PlyGeometry {
    points: Vec<Point3<f32>>,
    normals: Option<Vec<Vector3<f32>>>,
    colors: Option<Vec<Point3<f32>>>,
    faces: Vec<[usize; 3]>,
}

#[derive(Clone, Copy)]
enum VertexField {
    Position(usize),
    Normal(usize),
    Color(usize, f64),
    Skip,
}

fn read_body(header: &Header, source: &mut dyn ValueSource) -> Result<PlyGeometry> {
    let mut geometry = PlyGeometry::default();

    for element in &header.elements {
        match element.name.as_str() {
            "vertex" => read_vertices(element, source, &mut geometry)?,
            "face" => read_faces(element, source, &mut geometry)?,
            _ if element.properties.is_empty() => {}
            _ => {
                for _ in 0..element.count {
                    for property in &element.properties {
                        skip_property(property, source)?;
                    }
                }
            }
        }
    }

    let n = geometry.points.len();
    if let Some(face) = geometry.faces.iter().find(|f| f.iter().any(|&i| i >= n)) {
        return Err(Error::ParseError(format!(
            "face {face:?} references a vertex beyond the {n} read"
        )));
    }
    Ok(geometry)
}

fn skip_property(property: &Property, source: &mut dyn ValueSource) -> Result<()> {
    match property {
        Property::Scalar { ty, .. } => {
            source.next_value(*ty)?;
        }
        Property::List { count, item, .. } => {
            let n = source.next_value(*count)? as usize;
            for _ in 0..n {
                source.next_value(*item)?;
            }
        }
    }
    Ok(())
}

fn read_vertices(
    element: &Element,
    source: &mut dyn ValueSource,
    geometry: &mut PlyGeometry,
) -> Result<()> {
    let fields: Vec<VertexField> = element
        .properties
        .iter()
        .map(|p| {
            let color_divisor = match p {
                Property::Scalar { ty, .. } if ty.is_integer() => 255.0,
                _ => 1.0,
            };
            match p.name() {
                "x" => VertexField::Position(0),
                "y" => VertexField::Position(1),
                "z" => VertexField::Position(2),
                "nx" => VertexField::Normal(0),
                "ny" => VertexField::Normal(1),
                "nz" => VertexField::Normal(2),
                "red" | "r" => VertexField::Color(0, color_divisor),
                "green" | "g" => VertexField::Color(1, color_divisor),
                "blue" | "b" => VertexField::Color(2, color_divisor),
                _ => VertexField::Skip,
            }
        })
        .collect();
    let has = |pred: fn(&VertexField) -> bool| fields.iter().filter(|f| pred(f)).count() == 3;
    if !has(|f| matches!(f, VertexField::Position(_))) {
        return Err(Error::ParseError("PLY vertices need x, y and z".into()));
    }
    let has_normals = has(|f| matches!(f, VertexField::Normal(_)));
    let has_colors = has(|f| matches!(f, VertexField::Color(..)));

    let reserve = element.count.min(MAX_RESERVE);
    geometry.points.reserve(reserve);
    let mut normals = Vec::with_capacity(if has_normals { reserve } else { 0 });
    let mut colors = Vec::with_capacity(if has_colors { reserve } else { 0 });
    for _ in 0..element.count {
        let (mut p, mut n, mut c) = ([0.0f32; 3], [0.0f32; 3], [0.0f32; 3]);
        for (property, field) in element.properties.iter().zip(&fields) {
            match (property, *field) {
                (Property::Scalar { ty, .. }, VertexField::Position(i)) => {
                    p[i] = source.next_value(*ty)? as f32
                }
                (Property::Scalar { ty, .. }, VertexField::Normal(i)) => {
                    n[i] = source.next_value(*ty)? as f32
                }
                (Property::Scalar { ty, .. }, VertexField::Color(i, divisor)) => {
                    c[i] = (source.next_value(*ty)? / divisor) as f32
                }
                _ => skip_property(property, source)?,
            }
        }
        geometry.points.push(Point3::from(p));
        if has_normals {
            normals.push(Vector3::from(n));
        }
        if has_colors {
            colors.push(Point3::from(c));
        }
    }
    geometry.normals = has_normals.then_some(normals);
    geometry.colors = has_colors.then_some(colors);
    Ok(())
}

fn read_faces(
    element: &Element,
    source: &mut dyn ValueSource,
    geometry: &mut PlyGeometry,
) -> Result<()> {
    if element.properties.is_empty() {
        return Ok(());
    }
    geometry.faces.reserve(element.count.min(MAX_RESERVE));
    let mut polygon = Vec::new();
    for _ in 0..element.count {
        for property in &element.properties {
            match property {
                Property::List { name, count, item }
                    if name == "vertex_indices" || name == "vertex_index" =>
                {
                    let n = source.next_value(*count)? as usize;
                    polygon.clear();
                    for _ in 0..n {
                        let index = source.next_value(*item)?;
                        if index < 0.0 {
                            return Err(Error::ParseError(format!(
                                "negative vertex index {index}"
                            )));
                        }
                        polygon.push(index as usize);
                    }
                    for k in 1..n.saturating_sub(1) {
                        geometry.faces.push([polygon[0], polygon[k], polygon[k + 1]]);
                    }
                }
                _ => skip_property(property, source)?,
            }
        }
    }
    Ok(())
}

fn read_geometry<R: BufRead>(mut reader: R) -> Result<PlyGeometry> {
    let header = parse_header(&mut reader)?;
    let mut body = Vec::new();
    reader.read_to_end(&mut body)?;
    match header.format {
        Format::Ascii => {
            let text = std::str::from_utf8(&body)
                .map_err(|_| Error::ParseError("ASCII PLY body is not valid UTF-8".into()))?;
            let mut source = AsciiSource {
                tokens: text.split_whitespace(),
            };
            read_body(&header, &mut source)
        }
        Format::BinaryLittleEndian => {
            let mut source = BinarySource { data: &body };
            read_body(&header, &mut source)
        }
    }
}

/// Read a triangle mesh. Polygons are fan-triangulated.
pub fn read_ply_mesh<R: BufRead>(reader: R) -> Result<TriangleMesh> {
    let geometry = read_geometry(reader)?;
    Ok(TriangleMesh {
        vertices: geometry.points,
        faces: geometry.faces,
        normals: geometry.normals,
        colors: geometry.colors,
    })
}

/// Read the vertices of a PLY file as a point cloud; faces are ignored.
pub fn read_ply_point_cloud<R: BufRead>(reader: R) -> Result<PointCloud> {
    let geometry = read_geometry(reader)?;
    Ok(PointCloud {
        points: geometry.points,
        colors: geometry.colors,
        normals: geometry.normals,
    })
}

fn color_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn write_vertices<W: Write>(
    writer: &mut W,
    points: &[Point3<f32>],
    normals: Option<&[Vector3<f32>]>,
    colors: Option<&[Point3<f32>]>,
    faces: Option<&[[usize; 3]]>,
) -> Result<()> {
    writeln!(writer, "ply")?;
    writeln!(writer, "format ascii 1.0")?;
    writeln!(writer, "element vertex {}", points.len())?;
    writeln!(writer, "property float x")?;
    writeln!(writer, "property float y")?;
    writeln!(writer, "property float z")?;
    if normals.is_some() {
        writeln!(writer, "property float nx")?;
        writeln!(writer, "property float ny")?;
        writeln!(writer, "property float nz")?;
    }
    if colors.is_some() {
        writeln!(writer, "property uchar red")?;
        writeln!(writer, "property uchar green")?;
        writeln!(writer, "property uchar blue")?;
    }
    if let Some(faces) = faces {
        writeln!(writer, "element face {}", faces.len())?;
        writeln!(writer, "property list uchar int vertex_indices")?;
    }
    writeln!(writer, "end_header")?;

    for (i, p) in points.iter().enumerate() {
        write!(writer, "{} {} {}", p.x, p.y, p.z)?;
        if let Some(normals) = normals {
            let n = normals[i];
            write!(writer, " {} {} {}", n.x, n.y, n.z)?;
        }
        if let Some(colors) = colors {
            let c = colors[i];
            write!(writer, " {} {} {}", color_byte(c.x), color_byte(c.y), color_byte(c.z))?;
        }
        writeln!(writer)?;
    }
    for f in faces.unwrap_or(&[]) {
        writeln!(writer, "3 {} {} {}", f[0], f[1], f[2])?;
    }
    Ok(())
}

/// Write a triangle mesh as ASCII PLY, with normals and colors when present.
pub fn write_ply_mesh<W: Write>(writer: &mut W, mesh: &TriangleMesh) -> Result<()> {
    mesh.validate()?;
    write_vertices(
        writer,
        &mesh.vertices,
        mesh.normals.as_deref(),
        mesh.colors.as_deref(),
        Some(mesh.faces.as_slice()),
    )
}

/// Write a point cloud as ASCII PLY.
pub fn write_ply_point_cloud<W: Write>(writer: &mut W, cloud: &PointCloud) -> Result<()> {
    let n = cloud.len();
    if cloud.normals.as_ref().is_some_and(|v| v.len() != n)
        || cloud.colors.as_ref().is_some_and(|v| v.len() != n)
    {
        return Err(Error::InvalidInput(
            "point cloud attributes do not match its point count".into(),
        ));
    }
    write_vertices(
        writer,
        &cloud.points,
        cloud.normals.as_deref(),
        cloud.colors.as_deref(),
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_mesh_ascii_round_trip() {
        let mut mesh = TriangleMesh::create_box(1.0, 2.0, 3.0, 1);
        mesh.compute_vertex_normals();
        let colors = (0..mesh.num_vertices())
            .map(|i| Point3::new(i as f32 / 10.0, 0.5, 1.0))
            .collect();
        let mesh = mesh.with_colors(colors).unwrap();

        let mut buffer = Vec::new();
        write_ply_mesh(&mut buffer, &mesh).unwrap();
        let read = read_ply_mesh(Cursor::new(buffer)).unwrap();

        assert_eq!(read.faces, mesh.faces);
        assert_eq!(read.vertices, mesh.vertices);
        let normals = read.normals.as_ref().unwrap();
        for (a, b) in normals.iter().zip(mesh.normals.as_ref().unwrap()) {
            assert!((a - b).norm() < 1e-6);
        }
        let colors = read.colors.as_ref().unwrap();
        assert!((colors[3].x - 0.3).abs() < 1.0 / 255.0);
        assert_eq!(colors[3].z, 1.0);
    }

    #[test]
    fn test_binary_little_endian_mesh() {
        let mut data = b"ply\nformat binary_little_endian 1.0\ncomment made by hand\n\
element vertex 4\nproperty float x\nproperty float y\nproperty float z\n\
property uchar red\nproperty uchar green\nproperty uchar blue\nproperty float quality\n\
element face 1\nproperty list uchar int vertex_indices\nend_header\n"
            .to_vec();
        let vertices = [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]];
        for v in vertices {
            for c in v {
                data.extend_from_slice(&c.to_le_bytes());
            }
            data.extend_from_slice(&[255, 0, 51]);
            data.extend_from_slice(&7.5f32.to_le_bytes());
        }
        data.push(4);
        for i in [0i32, 1, 2, 3] {
            data.extend_from_slice(&i.to_le_bytes());
        }

        let mesh = read_ply_mesh(Cursor::new(data)).unwrap();
        assert_eq!(mesh.num_vertices(), 4);
        assert_eq!(mesh.faces, vec![[0, 1, 2], [0, 2, 3]]);
        assert_eq!(mesh.vertices[2], Point3::new(1.0, 1.0, 0.0));
        assert!(mesh.normals.is_none());
        let c = mesh.colors.as_ref().unwrap()[0];
        assert_eq!((c.x, c.y), (1.0, 0.0));
        assert!((c.z - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_point_cloud_round_trip() {
        let cloud = PointCloud::new(vec![Point3::new(0.5, -1.0, 2.0), Point3::new(1.0, 1.0, 1.0)])
            .with_normals(vec![Vector3::z(), Vector3::x()])
            .unwrap();
        let mut buffer = Vec::new();
        write_ply_point_cloud(&mut buffer, &cloud).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(!text.contains("element face"));

        let read = read_ply_point_cloud(Cursor::new(buffer)).unwrap();
        assert_eq!(read.points, cloud.points);
        assert_eq!(read.normals, cloud.normals);
        assert!(read.colors.is_none());
    }

    #[test]
    fn test_truncated_and_malformed_files() {
        let truncated = "ply\nformat ascii 1.0\nelement vertex 2\nproperty float x\n\
property float y\nproperty float z\nend_header\n0 0 0\n1 1\n";
        assert!(matches!(
            read_ply_mesh(Cursor::new(truncated)),
            Err(Error::ParseError(_))
        ));

        let big_endian = "ply\nformat binary_big_endian 1.0\nend_header\n";
        assert!(read_ply_mesh(Cursor::new(big_endian)).is_err());

        let bad_face = "ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\n\
property float y\nproperty float z\nelement face 1\nproperty list uchar int vertex_indices\n\
end_header\n0 0 0\n3 0 1 2\n";
        assert!(matches!(
            read_ply_mesh(Cursor::new(bad_face)),
            Err(Error::ParseError(_))
        ));
    }

    #[test]
    fn test_oversized_element_counts_fail_cleanly() {
        let huge_vertices = "ply\nformat ascii 1.0\nelement vertex 2305843009213693951\n\
property float x\nproperty float y\nproperty float z\nend_header\n0 0 0\n";
        assert!(matches!(
            read_ply_point_cloud(Cursor::new(huge_vertices)),
            Err(Error::ParseError(_))
        ));

        let huge_faces = "ply\nformat ascii 1.0\nelement vertex 3\nproperty float x\n\
property float y\nproperty float z\nelement face 2305843009213693951\n\
property list uchar int vertex_indices\nend_header\n0 0 0\n1 0 0\n0 1 0\n3 0 1 2\n";
        assert!(matches!(
            read_ply_mesh(Cursor::new(huge_faces)),
            Err(Error::ParseError(_))
        ));
    }
}
