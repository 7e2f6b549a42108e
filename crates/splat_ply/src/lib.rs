//! splat_ply: reader/writer for 3D Gaussian Splatting point clouds stored as PLY.
//!
//! The vertex schema is the one emitted by the reference 3DGS trainer:
//!
//! | property              | meaning                                           |
//! |-----------------------|---------------------------------------------------|
//! | `x y z`               | world-space center                                |
//! | `nx ny nz`            | unused normals (optional, ignored)                |
//! | `f_dc_0..2`           | degree-0 SH coefficient (RGB)                     |
//! | `f_rest_0..N`         | higher SH bands, channel-major: all R, all G, all B |
//! | `opacity`             | logit-space opacity                               |
//! | `scale_0..2`          | log-space principal axis lengths                  |
//! | `rot_0..3`            | quaternion (w, x, y, z), not necessarily unit     |
//!
//! The SH degree is derived from the number of `f_rest_*` properties:
//! 0 → 0, 9 → 1, 24 → 2, 45 → 3.
//!
//! Supported encodings: `ascii` and `binary_little_endian`. The `vertex`
//! element must come first; later elements (faces, cameras, ...) are ignored.

use std::fs::File;
use std::io::{self, ErrorKind, Write};
use std::path::Path;

/// Number of SH coefficients stored per splat (degree 3).
pub const SH_COEFFS_MAX: usize = 16;
/// Highest SH degree the format carries.
pub const SH_DEGREE_MAX: u32 = 3;

/// One Gaussian exactly as stored in the file (no activation applied).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplatRecord {
    pub position: [f32; 3],
    /// SH coefficients, `sh[0]` is the DC term. Bands above the cloud's
    /// degree are zero.
    pub sh: [[f32; 3]; SH_COEFFS_MAX],
    /// Logit-space opacity.
    pub opacity: f32,
    /// Log-space scale.
    pub scale: [f32; 3],
    /// Quaternion (w, x, y, z).
    pub rotation: [f32; 4],
}

impl Default for SplatRecord {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            sh: [[0.0; 3]; SH_COEFFS_MAX],
            opacity: 0.0,
            scale: [0.0; 3],
            rotation: [1.0, 0.0, 0.0, 0.0],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SplatCloud {
    pub sh_degree: u32,
    pub splats: Vec<SplatRecord>,
}

impl SplatCloud {
    #[inline]
    pub fn len(&self) -> usize {
        self.splats.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.splats.is_empty()
    }
}

/// Number of SH coefficients used by a given degree.
#[inline]
pub fn sh_coeff_count(degree: u32) -> usize {
    let d = degree as usize + 1;
    d * d
}

/// Maps the count of `f_rest_*` properties to an SH degree.
pub fn sh_degree_from_rest_count(rest: usize) -> Option<u32> {
    (0..=SH_DEGREE_MAX).find(|&d| 3 * (sh_coeff_count(d) - 1) == rest)
}

#[cold]
fn bad(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg)
}

#[inline(always)]
fn need(buf: &[u8], want: usize) -> io::Result<()> {
    if buf.len() < want {
        Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated PLY payload"))
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Ascii,
    BinaryLittleEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scalar {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl Scalar {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "char" | "int8" => Scalar::I8,
            "uchar" | "uint8" => Scalar::U8,
            "short" | "int16" => Scalar::I16,
            "ushort" | "uint16" => Scalar::U16,
            "int" | "int32" => Scalar::I32,
            "uint" | "uint32" => Scalar::U32,
            "float" | "float32" => Scalar::F32,
            "double" | "float64" => Scalar::F64,
            _ => return None,
        })
    }

    #[inline]
    fn byte_size(self) -> usize {
        match self {
            Scalar::I8 | Scalar::U8 => 1,
            Scalar::I16 | Scalar::U16 => 2,
            Scalar::I32 | Scalar::U32 | Scalar::F32 => 4,
            Scalar::F64 => 8,
        }
    }

    /// Decodes one little-endian value; `b` holds at least `byte_size()` bytes.
    #[inline]
    fn read_le(self, b: &[u8]) -> f32 {
        match self {
            Scalar::I8 => b[0] as i8 as f32,
            Scalar::U8 => b[0] as f32,
            Scalar::I16 => i16::from_le_bytes([b[0], b[1]]) as f32,
            Scalar::U16 => u16::from_le_bytes([b[0], b[1]]) as f32,
            Scalar::I32 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32,
            Scalar::U32 => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32,
            Scalar::F32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            Scalar::F64 => {
                f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32
            }
        }
    }
}

/// Destination of one vertex property inside a [`SplatRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Position(usize),
    Dc(usize),
    /// (coefficient index >= 1, channel)
    Rest(usize, usize),
    Opacity,
    Scale(usize),
    Rotation(usize),
    Ignored,
}

#[derive(Debug, Clone)]
struct Property {
    name: String,
    ty: Scalar,
}

#[derive(Debug, Clone)]
struct Header {
    encoding: Encoding,
    vertex_count: usize,
    properties: Vec<Property>,
    /// Byte offset of the payload (first byte after `end_header\n`).
    body_offset: usize,
}

fn find_header_end(bytes: &[u8]) -> io::Result<usize> {
    const MARKER: &[u8] = b"end_header";
    let pos = bytes
        .windows(MARKER.len())
        .position(|w| w == MARKER)
        .ok_or_else(|| bad("missing end_header"))?;

    let mut end = pos + MARKER.len();
    if bytes.get(end) == Some(&b'\r') {
        end += 1;
    }
    if bytes.get(end) != Some(&b'\n') {
        return Err(bad("end_header must be followed by a newline"));
    }
    Ok(end + 1)
}

fn parse_header(bytes: &[u8]) -> io::Result<Header> {
    let body_offset = find_header_end(bytes)?;
    let text = std::str::from_utf8(&bytes[..body_offset])
        .map_err(|_| bad("PLY header is not valid UTF-8"))?;

    let mut lines = text.lines().map(str::trim);
    if lines.next() != Some("ply") {
        return Err(bad("missing leading 'ply' marker"));
    }

    let mut encoding = None;
    let mut vertex_count = None;
    let mut properties = Vec::new();
    let mut in_vertex = false;
    let mut seen_element = false;

    for line in lines {
        let mut parts = line.split_whitespace();
        match parts.next() {
            None | Some("comment") | Some("obj_info") | Some("end_header") => {}
            Some("format") => {
                encoding = Some(match parts.next() {
                    Some("ascii") => Encoding::Ascii,
                    Some("binary_little_endian") => Encoding::BinaryLittleEndian,
                    Some(other) => {
                        return Err(bad(&format!("unsupported PLY format '{}'", other)))
                    }
                    None => return Err(bad("format line without encoding")),
                });
            }
            Some("element") => {
                let name = parts.next().unwrap_or_default();
                let count: usize = parts
                    .next()
                    .and_then(|c| c.parse().ok())
                    .ok_or_else(|| bad("invalid element count"))?;
                in_vertex = name == "vertex";
                if in_vertex {
                    if seen_element {
                        return Err(bad("vertex element must come first"));
                    }
                    vertex_count = Some(count);
                }
                seen_element = true;
            }
            Some("property") if in_vertex => {
                let ty_name = parts.next().unwrap_or_default();
                if ty_name == "list" {
                    return Err(bad("list properties are not supported in the vertex element"));
                }
                let ty = Scalar::parse(ty_name)
                    .ok_or_else(|| bad(&format!("unknown property type '{}'", ty_name)))?;
                let name = parts
                    .next()
                    .ok_or_else(|| bad("property without a name"))?
                    .to_string();
                properties.push(Property { name, ty });
            }
            Some("property") => {}
            Some(other) => return Err(bad(&format!("unexpected header keyword '{}'", other))),
        }
    }

    Ok(Header {
        encoding: encoding.ok_or_else(|| bad("missing format line"))?,
        vertex_count: vertex_count.ok_or_else(|| bad("missing vertex element"))?,
        properties,
        body_offset,
    })
}

/// Resolves property names to record fields and derives the SH degree.
fn resolve_fields(properties: &[Property]) -> io::Result<(Vec<Field>, u32)> {
    let rest_count = properties
        .iter()
        .filter(|p| p.name.starts_with("f_rest_"))
        .count();
    let sh_degree = sh_degree_from_rest_count(rest_count)
        .ok_or_else(|| bad(&format!("unsupported number of f_rest properties: {}", rest_count)))?;
    let rest_per_channel = sh_coeff_count(sh_degree) - 1;

    let indexed = |name: &str, prefix: &str, limit: usize| -> Option<usize> {
        name.strip_prefix(prefix)
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|&i| i < limit)
    };

    let mut fields = Vec::with_capacity(properties.len());
    for p in properties {
        let name = p.name.as_str();
        let field = match name {
            "x" => Field::Position(0),
            "y" => Field::Position(1),
            "z" => Field::Position(2),
            "opacity" => Field::Opacity,
            _ => {
                if let Some(i) = indexed(name, "f_dc_", 3) {
                    Field::Dc(i)
                } else if let Some(k) = indexed(name, "f_rest_", rest_count) {
                    Field::Rest(1 + k % rest_per_channel, k / rest_per_channel)
                } else if let Some(i) = indexed(name, "scale_", 3) {
                    Field::Scale(i)
                } else if let Some(i) = indexed(name, "rot_", 4) {
                    Field::Rotation(i)
                } else {
                    Field::Ignored
                }
            }
        };
        fields.push(field);
    }

    let required: [(Field, &str); 14] = [
        (Field::Position(0), "x"),
        (Field::Position(1), "y"),
        (Field::Position(2), "z"),
        (Field::Dc(0), "f_dc_0"),
        (Field::Dc(1), "f_dc_1"),
        (Field::Dc(2), "f_dc_2"),
        (Field::Opacity, "opacity"),
        (Field::Scale(0), "scale_0"),
        (Field::Scale(1), "scale_1"),
        (Field::Scale(2), "scale_2"),
        (Field::Rotation(0), "rot_0"),
        (Field::Rotation(1), "rot_1"),
        (Field::Rotation(2), "rot_2"),
        (Field::Rotation(3), "rot_3"),
    ];
    for (field, name) in required {
        if !fields.contains(&field) {
            return Err(bad(&format!("missing required vertex property '{}'", name)));
        }
    }

    Ok((fields, sh_degree))
}

#[inline(always)]
fn assign(record: &mut SplatRecord, field: Field, value: f32) {
    match field {
        Field::Position(i) => record.position[i] = value,
        Field::Dc(c) => record.sh[0][c] = value,
        Field::Rest(k, c) => record.sh[k][c] = value,
        Field::Opacity => record.opacity = value,
        Field::Scale(i) => record.scale[i] = value,
        Field::Rotation(i) => record.rotation[i] = value,
        Field::Ignored => {}
    }
}

fn parse_binary(body: &[u8], header: &Header, fields: &[Field]) -> io::Result<Vec<SplatRecord>> {
    let stride: usize = header.properties.iter().map(|p| p.ty.byte_size()).sum();
    let total = header
        .vertex_count
        .checked_mul(stride)
        .ok_or_else(|| bad("vertex payload size overflow"))?;
    need(body, total)?;
    let body = &body[..total];

    // Fast path: every property is f32 and the payload happens to be 4-aligned.
    #[cfg(target_endian = "little")]
    {
        if header.properties.iter().all(|p| p.ty == Scalar::F32) {
            if let Ok(values) = bytemuck::try_cast_slice::<u8, f32>(body) {
                let per_vertex = header.properties.len();
                return Ok(values
                    .chunks_exact(per_vertex)
                    .map(|vertex| {
                        let mut record = SplatRecord::default();
                        for (&field, &value) in fields.iter().zip(vertex) {
                            assign(&mut record, field, value);
                        }
                        record
                    })
                    .collect());
            }
        }
    }

    let mut splats = Vec::with_capacity(header.vertex_count);
    for vertex in body.chunks_exact(stride) {
        let mut record = SplatRecord::default();
        let mut offset = 0;
        for (prop, &field) in header.properties.iter().zip(fields) {
            let size = prop.ty.byte_size();
            assign(&mut record, field, prop.ty.read_le(&vertex[offset..offset + size]));
            offset += size;
        }
        splats.push(record);
    }
    Ok(splats)
}

fn parse_ascii(body: &[u8], header: &Header, fields: &[Field]) -> io::Result<Vec<SplatRecord>> {
    let text = std::str::from_utf8(body).map_err(|_| bad("ASCII payload is not valid UTF-8"))?;
    let mut tokens = text.split_ascii_whitespace();

    // Every value takes at least one digit and one separator.
    let mut splats = Vec::with_capacity(header.vertex_count.min(body.len() / 2));
    for _ in 0..header.vertex_count {
        let mut record = SplatRecord::default();
        for (prop, &field) in header.properties.iter().zip(fields) {
            let token = tokens.next().ok_or_else(|| {
                io::Error::new(ErrorKind::UnexpectedEof, "truncated ASCII PLY payload")
            })?;
            let value: f64 = token
                .parse()
                .map_err(|_| bad(&format!("invalid value '{}' for '{}'", token, prop.name)))?;
            assign(&mut record, field, value as f32);
        }
        splats.push(record);
    }
    Ok(splats)
}

/// Parse a PLY splat cloud from a contiguous byte slice. This is the single
/// source of truth for parsing.
pub fn parse_ply_bytes(bytes: &[u8]) -> io::Result<SplatCloud> {
    let header = parse_header(bytes)?;
    let (fields, sh_degree) = resolve_fields(&header.properties)?;
    let body = &bytes[header.body_offset..];

    let splats = match header.encoding {
        Encoding::Ascii => parse_ascii(body, &header, &fields)?,
        Encoding::BinaryLittleEndian => parse_binary(body, &header, &fields)?,
    };

    Ok(SplatCloud { sh_degree, splats })
}

/// Fast path: prefer mmap; fall back to a single read.
#[cfg(feature = "mmap")]
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<SplatCloud> {
    let file = File::open(path)?;
    let map = unsafe { memmap2::MmapOptions::new().map(&file)? };
    parse_ply_bytes(&map)
}

#[cfg(not(feature = "mmap"))]
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<SplatCloud> {
    let bytes = std::fs::read(path)?;
    parse_ply_bytes(&bytes)
}

/// Serialize a cloud as `binary_little_endian` with the full 3DGS schema.
pub fn write_ply_bytes(cloud: &SplatCloud) -> io::Result<Vec<u8>> {
    if cloud.sh_degree > SH_DEGREE_MAX {
        return Err(bad("SH degree above 3 cannot be stored"));
    }
    let rest_per_channel = sh_coeff_count(cloud.sh_degree) - 1;

    let mut out = Vec::new();
    writeln!(out, "ply")?;
    writeln!(out, "format binary_little_endian 1.0")?;
    writeln!(out, "element vertex {}", cloud.splats.len())?;
    for name in ["x", "y", "z", "nx", "ny", "nz", "f_dc_0", "f_dc_1", "f_dc_2"] {
        writeln!(out, "property float {}", name)?;
    }
    for k in 0..3 * rest_per_channel {
        writeln!(out, "property float f_rest_{}", k)?;
    }
    writeln!(out, "property float opacity")?;
    for i in 0..3 {
        writeln!(out, "property float scale_{}", i)?;
    }
    for i in 0..4 {
        writeln!(out, "property float rot_{}", i)?;
    }
    writeln!(out, "end_header")?;

    let floats_per_vertex = 9 + 3 * rest_per_channel + 1 + 3 + 4;
    out.reserve(cloud.splats.len() * floats_per_vertex * 4);
    for s in &cloud.splats {
        let mut put = |v: f32| out.extend_from_slice(&v.to_le_bytes());
        s.position.iter().copied().for_each(&mut put);
        [0.0f32; 3].iter().copied().for_each(&mut put);
        s.sh[0].iter().copied().for_each(&mut put);
        for c in 0..3 {
            for k in 1..=rest_per_channel {
                put(s.sh[k][c]);
            }
        }
        put(s.opacity);
        s.scale.iter().copied().for_each(&mut put);
        s.rotation.iter().copied().for_each(&mut put);
    }

    Ok(out)
}

pub fn write_file<P: AsRef<Path>>(path: P, cloud: &SplatCloud) -> io::Result<()> {
    let bytes = write_ply_bytes(cloud)?;
    let mut file = File::create(path)?;
    file.write_all(&bytes)?;
    file.flush()
}
