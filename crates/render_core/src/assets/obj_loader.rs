//! OBJ file loader for 3D models
//!
//! Produces a deduplicated, triangulated [`LoadedMesh`]. Polygons are fanned
//! into triangles. The first `usemtl` statement selects the material, resolved
//! through the `mtllib` files the model names.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::assets::{AssetError, LoadedMesh, MaterialRef, MeshSource, MtlData, MtlParser};
use crate::render::primitives::Vertex;

/// Wavefront OBJ mesh source
#[derive(Debug, Default, Clone, Copy)]
pub struct ObjLoader;

/// Position, texture coordinate and normal indices of one face corner
type CornerKey = (usize, Option<usize>, Option<usize>);

impl ObjLoader {
    /// Load an OBJ file, reading referenced MTL files next to it
    pub fn load_obj<P: AsRef<Path>>(path: P) -> Result<LoadedMesh, AssetError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let base_dir = asset_dir(path);

        Self::parse(&contents, &base_dir, |library| {
            std::fs::read_to_string(base_dir.join(library)).map_err(AssetError::from)
        })
    }

    /// Parse OBJ text
    ///
    /// `read_mtl` returns the contents of a material library named by `mtllib`.
    /// Texture paths are resolved relative to `base_dir`.
    pub fn parse<F>(contents: &str, base_dir: &Path, mut read_mtl: F) -> Result<LoadedMesh, AssetError>
    where
        F: FnMut(&str) -> Result<String, AssetError>,
    {
        let mut positions: Vec<[f32; 3]> = Vec::new();
        let mut normals: Vec<[f32; 3]> = Vec::new();
        let mut tex_coords: Vec<[f32; 2]> = Vec::new();
        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        let mut corner_lookup: HashMap<CornerKey, u32> = HashMap::new();
        let mut libraries: HashMap<String, MtlData> = HashMap::new();
        let mut material_name: Option<String> = None;

        for (line_num, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts[0] {
                "v" => positions.push(Self::parse_floats::<3>(&parts, line_num, "vertex")?),
                "vn" => normals.push(Self::parse_floats::<3>(&parts, line_num, "normal")?),
                "vt" => tex_coords.push(Self::parse_floats::<2>(&parts, line_num, "tex coord")?),
                "f" => {
                    if parts.len() < 4 {
                        return Err(AssetError::InvalidFormat(format!(
                            "Line {}: face needs at least three corners",
                            line_num + 1
                        )));
                    }

                    let mut face = Vec::with_capacity(parts.len() - 1);
                    for corner in &parts[1..] {
                        let key = Self::parse_corner(corner, &positions, &tex_coords, &normals, line_num)?;
                        let index = match corner_lookup.get(&key) {
                            Some(&index) => index,
                            None => {
                                let (pos, tex, norm) = key;
                                let index = vertices.len() as u32;
                                vertices.push(Vertex {
                                    position: positions[pos],
                                    normal: norm.map_or([0.0; 3], |n| normals[n]),
                                    tex_coord: tex.map_or([0.0, 0.0], |t| tex_coords[t]),
                                });
                                corner_lookup.insert(key, index);
                                index
                            }
                        };
                        face.push(index);
                    }

                    // Fan triangulation
                    for i in 1..face.len() - 1 {
                        indices.extend_from_slice(&[face[0], face[i], face[i + 1]]);
                    }
                }
                "mtllib" => {
                    for library in &parts[1..] {
                        match read_mtl(library).and_then(|text| MtlParser::parse(&text)) {
                            Ok(parsed) => libraries.extend(parsed),
                            Err(e) => log::warn!("Skipping material library {}: {}", library, e),
                        }
                    }
                }
                "usemtl" => {
                    if material_name.is_none() {
                        material_name = parts.get(1).map(|name| (*name).to_string());
                    }
                }
                _ => {}
            }
        }

        if vertices.is_empty() {
            return Err(AssetError::InvalidFormat("No vertices found in OBJ file".to_string()));
        }

        let material = Self::resolve_material(material_name, &libraries, base_dir);
        log::debug!(
            "Parsed OBJ: {} vertices, {} indices, material '{}'",
            vertices.len(),
            indices.len(),
            material.name
        );

        Ok(LoadedMesh { vertices, indices, material })
    }

    fn resolve_material(name: Option<String>, libraries: &HashMap<String, MtlData>, base_dir: &Path) -> MaterialRef {
        let Some(name) = name else {
            return MaterialRef::default();
        };

        match libraries.get(&name) {
            Some(mtl) => MaterialRef {
                name,
                base_color: [mtl.diffuse[0], mtl.diffuse[1], mtl.diffuse[2], mtl.dissolve],
                diffuse_map: mtl.diffuse_map.as_ref().map(|map| base_dir.join(map)),
            },
            None => {
                log::warn!("Material '{}' not found in any material library, using defaults", name);
                MaterialRef { name, ..MaterialRef::default() }
            }
        }
    }

    fn parse_floats<const N: usize>(parts: &[&str], line_num: usize, what: &str) -> Result<[f32; N], AssetError> {
        let mut out = [0.0; N];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = parts
                .get(i + 1)
                .and_then(|p| p.parse().ok())
                .ok_or_else(|| AssetError::ParseError(format!("Line {}: invalid {}", line_num + 1, what)))?;
        }
        Ok(out)
    }

    /// Resolve one `v/vt/vn` corner into zero-based indices, handling negative
    /// (relative) references
    fn parse_corner(
        corner: &str,
        positions: &[[f32; 3]],
        tex_coords: &[[f32; 2]],
        normals: &[[f32; 3]],
        line_num: usize,
    ) -> Result<CornerKey, AssetError> {
        let mut fields = corner.split('/');
        let resolve = |field: Option<&str>, len: usize| -> Result<Option<usize>, AssetError> {
            let Some(text) = field.filter(|t| !t.is_empty()) else {
                return Ok(None);
            };
            let raw: i64 = text
                .parse()
                .map_err(|_| AssetError::ParseError(format!("Line {}: invalid index '{}'", line_num + 1, text)))?;
            let index = if raw < 0 { len as i64 + raw } else { raw - 1 };
            if index < 0 || index as usize >= len {
                return Err(AssetError::InvalidFormat(format!(
                    "Line {}: index {} out of bounds",
                    line_num + 1,
                    raw
                )));
            }
            Ok(Some(index as usize))
        };

        let position = resolve(fields.next(), positions.len())?.ok_or_else(|| {
            AssetError::InvalidFormat(format!("Line {}: face corner without position", line_num + 1))
        })?;
        let tex = resolve(fields.next(), tex_coords.len())?;
        let normal = resolve(fields.next(), normals.len())?;
        Ok((position, tex, normal))
    }
}

impl MeshSource for ObjLoader {
    fn load(&mut self, path: &Path) -> Result<LoadedMesh, AssetError> {
        Self::load_obj(path)
    }
}

/// Directory containing `path`, used to resolve relative references
pub fn asset_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUAD: &str = r#"
mtllib quad.mtl
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
vn 0 0 1
usemtl Painted
f 1/1/1 2/2/1 3/3/1 4/4/1
"#;

    const QUAD_MTL: &str = "newmtl Painted\nKd 0.5 0.25 1.0\nmap_Kd paint.png\n";

    fn no_libraries(_: &str) -> Result<String, AssetError> {
        Err(AssetError::InvalidFormat("no libraries in this test".to_string()))
    }

    #[test]
    fn test_quad_is_fanned() {
        let mesh = ObjLoader::parse(QUAD, Path::new("models"), |_| Ok(QUAD_MTL.to_string())).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(mesh.vertices[2].tex_coord, [1.0, 1.0]);
        assert_eq!(mesh.vertices[0].normal, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_material_resolved_from_library() {
        let mesh = ObjLoader::parse(QUAD, Path::new("models"), |name| {
            assert_eq!(name, "quad.mtl");
            Ok(QUAD_MTL.to_string())
        })
        .unwrap();
        assert_eq!(mesh.material.name, "Painted");
        assert_eq!(mesh.material.base_color, [0.5, 0.25, 1.0, 1.0]);
        assert_eq!(mesh.material.diffuse_map, Some(Path::new("models").join("paint.png")));
    }

    #[test]
    fn test_missing_library_falls_back_to_named_default() {
        let mesh = ObjLoader::parse(QUAD, Path::new(""), no_libraries).unwrap();
        assert_eq!(mesh.material.name, "Painted");
        assert_eq!(mesh.material.diffuse_map, None);
    }

    #[test]
    fn test_shared_corners_are_deduplicated() {
        let obj = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3\nf 1 3 4\n";
        let mesh = ObjLoader::parse(obj, Path::new(""), no_libraries).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices.len(), 6);
        assert_eq!(mesh.material, MaterialRef::default());
    }

    #[test]
    fn test_missing_normals_stay_zero() {
        let obj = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";
        let mesh = ObjLoader::parse(obj, Path::new(""), no_libraries).unwrap();
        assert!(mesh.vertices.iter().all(|v| v.normal == [0.0; 3]));
    }

    #[test]
    fn test_negative_indices() {
        let obj = "v 0 0 0\nv 1 0 0\nv 1 1 0\nf -3 -2 -1\n";
        let mesh = ObjLoader::parse(obj, Path::new(""), no_libraries).unwrap();
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        assert_eq!(mesh.vertices[2].position, [1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_out_of_bounds_index_is_error() {
        let obj = "v 0 0 0\nv 1 0 0\nf 1 2 3\n";
        assert!(matches!(
            ObjLoader::parse(obj, Path::new(""), no_libraries),
            Err(AssetError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_empty_file_is_error() {
        assert!(ObjLoader::parse("# nothing\n", Path::new(""), no_libraries).is_err());
    }

    #[test]
    fn test_asset_dir() {
        assert_eq!(asset_dir(Path::new("models/ship.obj")), Path::new("models"));
    }
}
