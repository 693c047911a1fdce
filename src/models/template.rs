use serde::{Deserialize, Serialize};

use super::Rect;

/// What a region contains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RegionKind {
    /// Printed text, recognized by OCR
    Text,
    /// 1D/2D barcode
    Barcode,
}

/// Named rectangle inside a template, in template reference pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRegion {
    /// Stable id
    pub id: i64,
    /// Display name
    pub name: String,
    /// Content type
    #[serde(rename = "type")]
    pub kind: RegionKind,
    /// Bounds in template space
    pub bounds: Rect,
    /// Presentation order
    #[serde(default)]
    pub sort_order: i32,
}

impl TemplateRegion {
    /// Convenience constructor
    pub fn new(id: i64, name: impl Into<String>, kind: RegionKind, bounds: Rect) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            bounds,
            sort_order: 0,
        }
    }
}

fn enabled_default() -> bool {
    true
}

/// Previously captured document layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Stable id
    pub id: i64,
    /// Display name
    pub name: String,
    /// Owning category
    #[serde(default)]
    pub category_id: Option<i64>,
    /// Width of the reference capture
    pub reference_width: u32,
    /// Height of the reference capture
    pub reference_height: u32,
    /// Persisted feature set location
    #[serde(default)]
    pub feature_path: Option<String>,
    /// Regions, in template reference pixels
    #[serde(default)]
    pub regions: Vec<TemplateRegion>,
    /// Disabled templates are skipped by `match_best`
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// Times this template has matched
    #[serde(default)]
    pub usage_count: u64,
}

impl Template {
    /// Template with no regions
    pub fn new(id: i64, name: impl Into<String>, reference_width: u32, reference_height: u32) -> Self {
        Self {
            id,
            name: name.into(),
            category_id: None,
            reference_width,
            reference_height,
            feature_path: None,
            regions: Vec::new(),
            enabled: true,
            usage_count: 0,
        }
    }

    /// Builder-style region attach
    pub fn with_region(mut self, region: TemplateRegion) -> Self {
        self.regions.push(region);
        self
    }

    /// Width over height of the reference capture
    pub fn aspect_ratio(&self) -> f32 {
        if self.reference_height == 0 {
            return 0.0;
        }
        self.reference_width as f32 / self.reference_height as f32
    }

    /// Regions in presentation order
    pub fn sorted_regions(&self) -> Vec<&TemplateRegion> {
        let mut regions: Vec<&TemplateRegion> = self.regions.iter().collect();
        regions.sort_by_key(|r| (r.sort_order, r.id));
        regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_json() {
        let json = r#"{
            "id": 7,
            "name": "shipping label",
            "reference_width": 800,
            "reference_height": 400,
            "regions": [
                {"id": 2, "name": "tracking", "type": "BARCODE",
                 "bounds": {"x": 10, "y": 10, "width": 300, "height": 80}, "sort_order": 1},
                {"id": 1, "name": "address", "type": "TEXT",
                 "bounds": {"x": 10, "y": 120, "width": 400, "height": 120}}
            ]
        }"#;
        let t: Template = serde_json::from_str(json).unwrap();
        assert!(t.enabled);
        assert_eq!(t.regions.len(), 2);
        assert_eq!(t.regions[0].kind, RegionKind::Barcode);
        assert_eq!(t.sorted_regions()[0].name, "address");
        assert!((t.aspect_ratio() - 2.0).abs() < 1e-6);
    }
}
