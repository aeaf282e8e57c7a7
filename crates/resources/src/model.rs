//! Wavefront OBJ loading.
//!
//! Only `v` and `f` records are read. Texture coordinates are derived from
//! the position by projecting it onto the unit sphere, and every vertex is
//! white. Faces are fan-triangulated and the result is de-indexed, so
//! `indices` is always `0..vertices.len()`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use glam::{Vec2, Vec3};
use tracing::{debug, info, warn};

use crate::error::{ResourceError, ResourceResult};

/// One vertex of a loaded model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelVertex {
    pub position: Vec3,
    pub color: Vec3,
    pub tex_coord: Vec2,
}

impl ModelVertex {
    fn from_position(position: Vec3) -> Self {
        let length = position.length();
        let tex_coord = if length > 0.0 {
            Vec2::new(position.x / length, -position.y / length)
        } else {
            Vec2::ZERO
        };

        Self {
            position,
            color: Vec3::ONE,
            tex_coord,
        }
    }
}

/// A triangle list ready for upload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Model {
    pub vertices: Vec<ModelVertex>,
    pub indices: Vec<u32>,
}

impl Model {
    /// Loads an OBJ file from disk.
    pub fn load(path: &Path) -> ResourceResult<Self> {
        let file = File::open(path).map_err(|source| ResourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let model = Self::parse(BufReader::new(file), path)?;
        info!(
            "Loaded model {} ({} vertices, {} triangles)",
            path.display(),
            model.vertices.len(),
            model.triangle_count()
        );
        Ok(model)
    }

    /// Parses OBJ text. `path` is only used in error messages.
    pub fn parse<R: BufRead>(reader: R, path: &Path) -> ResourceResult<Self> {
        let mut positions: Vec<ModelVertex> = Vec::new();
        // 1-based position indices, already in triangle order.
        let mut face_indices: Vec<(usize, i64)> = Vec::new();

        for (line_index, line) in reader.lines().enumerate() {
            let line_number = line_index + 1;
            let line = line.map_err(|source| ResourceError::Io {
                path: path.to_path_buf(),
                source,
            })?;

            let mut fields = line.split_whitespace();
            match fields.next() {
                Some("v") => {
                    let position = parse_position(fields, path, line_number)?;
                    positions.push(ModelVertex::from_position(position));
                }
                Some("f") => {
                    let face = parse_face(fields, path, line_number)?;
                    if face.len() != 3 {
                        debug!(
                            "{}:{}: {}-sided face triangulated",
                            path.display(),
                            line_number,
                            face.len()
                        );
                    }
                    for i in 0..face.len().saturating_sub(2) {
                        for index in [face[i + 2], face[i], face[i + 1]] {
                            face_indices.push((line_number, index));
                        }
                    }
                }
                _ => {}
            }
        }

        let mut model = Model {
            vertices: Vec::with_capacity(face_indices.len()),
            indices: Vec::with_capacity(face_indices.len()),
        };

        for (line, index) in face_indices {
            let vertex = usize::try_from(index)
                .ok()
                .and_then(|i| i.checked_sub(1))
                .and_then(|i| positions.get(i))
                .ok_or_else(|| ResourceError::IndexOutOfRange {
                    path: path.to_path_buf(),
                    line,
                    index,
                    count: positions.len(),
                })?;

            model.indices.push(model.vertices.len() as u32);
            model.vertices.push(*vertex);
        }

        if model.vertices.is_empty() {
            warn!("Model {} has no faces", path.display());
        }

        Ok(model)
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

fn parse_position<'a>(
    fields: impl Iterator<Item = &'a str>,
    path: &Path,
    line: usize,
) -> ResourceResult<Vec3> {
    let coords = fields
        .take(3)
        .map(|field| {
            field.parse::<f32>().map_err(|_| ResourceError::Parse {
                path: path.to_path_buf(),
                line,
                message: format!("invalid vertex coordinate '{}'", field),
            })
        })
        .collect::<ResourceResult<Vec<f32>>>()?;

    match coords.as_slice() {
        [x, y, z] => Ok(Vec3::new(*x, *y, *z)),
        _ => Err(ResourceError::Parse {
            path: path.to_path_buf(),
            line,
            message: format!("vertex needs 3 coordinates, got {}", coords.len()),
        }),
    }
}

/// Position indices of a face. Only the part before the first `/` is used.
fn parse_face<'a>(
    fields: impl Iterator<Item = &'a str>,
    path: &Path,
    line: usize,
) -> ResourceResult<Vec<i64>> {
    fields
        .map(|field| {
            let position = field.split('/').next().unwrap_or(field);
            position.parse::<i64>().map_err(|_| ResourceError::Parse {
                path: path.to_path_buf(),
                line,
                message: format!("invalid face index '{}'", field),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> ResourceResult<Model> {
        Model::parse(source.as_bytes(), Path::new("test.obj"))
    }

    #[test]
    fn test_triangle_is_rotated_and_deindexed() {
        let model = parse("v 1 0 0\nv 0 2 0\nv 0 0 3\nf 1 2 3\n").unwrap();

        assert_eq!(model.indices, vec![0, 1, 2]);
        let positions: Vec<Vec3> = model.vertices.iter().map(|v| v.position).collect();
        assert_eq!(
            positions,
            vec![
                Vec3::new(0.0, 0.0, 3.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(0.0, 2.0, 0.0),
            ]
        );
    }

    #[test]
    fn test_quad_becomes_two_triangles() {
        let model = parse("v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n").unwrap();

        assert_eq!(model.triangle_count(), 2);
        assert_eq!(model.indices, (0..6).collect::<Vec<u32>>());
        // (f2, f0, f1) then (f3, f1, f2)
        let xs: Vec<Vec3> = model.vertices.iter().map(|v| v.position).collect();
        assert_eq!(xs[0], Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(xs[1], Vec3::new(0.0, 0.0, 0.0));
        assert_eq!(xs[2], Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(xs[3], Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(xs[4], Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(xs[5], Vec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_tex_coord_is_projected_position() {
        let model = parse("v 3 4 0\nv 0 0 0\nv 0 0 1\nf 1 2 3\n").unwrap();

        let first = model.vertices[1];
        assert_eq!(first.position, Vec3::new(3.0, 4.0, 0.0));
        assert!((first.tex_coord - Vec2::new(0.6, -0.8)).length() < 1e-6);
        assert_eq!(first.color, Vec3::ONE);

        let origin = model.vertices[2];
        assert_eq!(origin.tex_coord, Vec2::ZERO);
    }

    #[test]
    fn test_slash_indices_use_position_only() {
        let model = parse("v 0 0 1\nv 0 1 0\nv 1 0 0\nf 1/7/9 2//4 3/1\n").unwrap();
        assert_eq!(model.vertices.len(), 3);
        assert_eq!(model.vertices[0].position, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_other_records_are_ignored() {
        let model = parse(
            "# teapot\n\nmtllib t.mtl\nvn 0 1 0\nvt 0 0\nv 0 0 1\nv 0 1 0\nv 1 0 0\ng lid\nf 1 2 3\n",
        )
        .unwrap();
        assert_eq!(model.triangle_count(), 1);
    }

    #[test]
    fn test_out_of_range_index_reports_line() {
        let err = parse("v 0 0 1\nv 0 1 0\n\nf 1 2 9\n").unwrap_err();
        match err {
            ResourceError::IndexOutOfRange {
                line, index, count, ..
            } => {
                assert_eq!(line, 4);
                assert_eq!(index, 9);
                assert_eq!(count, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zero_index_is_out_of_range() {
        let err = parse("v 0 0 1\nf 0 1 1\n").unwrap_err();
        assert!(matches!(err, ResourceError::IndexOutOfRange { index: 0, .. }));
    }

    #[test]
    fn test_bad_coordinate_reports_line() {
        let err = parse("v 0 0 1\nv 0 x 0\n").unwrap_err();
        assert!(matches!(err, ResourceError::Parse { line: 2, .. }));
        assert!(err.to_string().starts_with("test.obj:2:"));
    }

    #[test]
    fn test_short_vertex_is_rejected() {
        let err = parse("v 1 2\n").unwrap_err();
        assert!(err.to_string().contains("3 coordinates"));
    }

    #[test]
    fn test_degenerate_face_emits_nothing() {
        let model = parse("v 0 0 1\nv 0 1 0\nf 1 2\n").unwrap();
        assert!(model.vertices.is_empty());
        assert!(model.indices.is_empty());
    }
}
