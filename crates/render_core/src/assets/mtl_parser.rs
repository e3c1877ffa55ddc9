//! MTL (Material Template Library) file parser
//!
//! Only the properties the renderer consumes are kept: diffuse color, opacity
//! and the diffuse texture map.

use std::collections::HashMap;

use crate::assets::AssetError;

/// Parsed MTL material data
#[derive(Debug, Clone, PartialEq)]
pub struct MtlData {
    /// Material name
    pub name: String,
    /// Diffuse color (Kd)
    pub diffuse: [f32; 3],
    /// Dissolve/opacity (d), 1.0 = opaque
    pub dissolve: f32,
    /// Diffuse texture map (map_Kd), as written in the file
    pub diffuse_map: Option<String>,
}

impl Default for MtlData {
    fn default() -> Self {
        Self {
            name: String::new(),
            diffuse: [0.8, 0.8, 0.8],
            dissolve: 1.0,
            diffuse_map: None,
        }
    }
}

/// MTL file parser
pub struct MtlParser;

impl MtlParser {
    /// Parse MTL file contents into a map of material name -> data
    pub fn parse(contents: &str) -> Result<HashMap<String, MtlData>, AssetError> {
        let mut materials = HashMap::new();
        let mut current: Option<MtlData> = None;

        for (line_num, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut tokens = line.split_whitespace();
            let Some(command) = tokens.next() else { continue };

            match command {
                "newmtl" => {
                    if let Some(mat) = current.take() {
                        materials.insert(mat.name.clone(), mat);
                    }
                    let name = tokens.next().ok_or_else(|| {
                        AssetError::ParseError(format!("Line {}: newmtl missing material name", line_num + 1))
                    })?;
                    current = Some(MtlData { name: name.to_string(), ..Default::default() });
                }
                "Kd" => {
                    if let Some(mat) = current.as_mut() {
                        mat.diffuse = Self::parse_vec3(&mut tokens, line_num, "Kd")?;
                    }
                }
                "d" => {
                    if let Some(mat) = current.as_mut() {
                        mat.dissolve = Self::parse_f32(&mut tokens, line_num, "d")?;
                    }
                }
                "Tr" => {
                    if let Some(mat) = current.as_mut() {
                        mat.dissolve = 1.0 - Self::parse_f32(&mut tokens, line_num, "Tr")?;
                    }
                }
                "map_Kd" => {
                    if let Some(mat) = current.as_mut() {
                        // Options such as `-s 1 1 1` precede the path; the path is last
                        let path = tokens.last().ok_or_else(|| {
                            AssetError::ParseError(format!("Line {}: map_Kd missing path", line_num + 1))
                        })?;
                        mat.diffuse_map = Some(path.to_string());
                    }
                }
                _ => {}
            }
        }

        if let Some(mat) = current {
            materials.insert(mat.name.clone(), mat);
        }

        Ok(materials)
    }

    fn parse_f32<'a>(
        tokens: &mut impl Iterator<Item = &'a str>,
        line_num: usize,
        command: &str,
    ) -> Result<f32, AssetError> {
        tokens
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| AssetError::ParseError(format!("Line {}: invalid value for {}", line_num + 1, command)))
    }

    fn parse_vec3<'a>(
        tokens: &mut impl Iterator<Item = &'a str>,
        line_num: usize,
        command: &str,
    ) -> Result<[f32; 3], AssetError> {
        Ok([
            Self::parse_f32(tokens, line_num, command)?,
            Self::parse_f32(tokens, line_num, command)?,
            Self::parse_f32(tokens, line_num, command)?,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_material() {
        let mtl_content = r#"
# Simple material
newmtl TestMaterial
Ka 1.0 1.0 1.0
Kd 0.8 0.2 0.2
d 1.0
illum 2
"#;
        let materials = MtlParser::parse(mtl_content).unwrap();
        assert_eq!(materials.len(), 1);

        let mat = &materials["TestMaterial"];
        assert_eq!(mat.diffuse, [0.8, 0.2, 0.2]);
        assert_eq!(mat.dissolve, 1.0);
        assert_eq!(mat.diffuse_map, None);
    }

    #[test]
    fn test_parse_texture_with_options() {
        let mtl_content = "newmtl Tex\nmap_Kd -s 2 2 1 textures/diffuse.png\n";
        let materials = MtlParser::parse(mtl_content).unwrap();
        assert_eq!(materials["Tex"].diffuse_map.as_deref(), Some("textures/diffuse.png"));
    }

    #[test]
    fn test_parse_multiple_materials_and_transparency() {
        let mtl_content = "newmtl A\nKd 1 0 0\nnewmtl B\nTr 0.25\n";
        let materials = MtlParser::parse(mtl_content).unwrap();
        assert_eq!(materials.len(), 2);
        assert_eq!(materials["A"].diffuse, [1.0, 0.0, 0.0]);
        assert!((materials["B"].dissolve - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_bad_number_is_error() {
        assert!(MtlParser::parse("newmtl A\nKd 1 x 0\n").is_err());
        assert!(MtlParser::parse("newmtl\n").is_err());
    }
}
